//! CPV (Common Procurement Vocabulary) dictionary
//!
//! Codes are eight digits where trailing zeros mark the depth:
//! `03000000` is a division, `03100000` a group, `03110000` a class and
//! anything more specific hangs under its four-digit class prefix.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stored dictionary row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CpvEntry {
    pub id: i64,
    pub cpv_code: String,
    pub cpv_level_code: String,
    pub cpv_parent_code: String,
    pub name_ua: String,
    pub name_en: String,
}

impl CpvEntry {
    pub fn label(&self) -> String {
        cpv_label(&self.cpv_code, &self.name_ua)
    }
}

pub fn cpv_label(code: &str, name_ua: &str) -> String {
    format!("{code} - {name_ua}")
}

/// Short reference embedded in categories, nomenclature and tenders
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CpvShort {
    pub id: i64,
    pub cpv_code: String,
    pub name_ua: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpvNode {
    pub id: i64,
    pub cpv_parent_code: String,
    pub cpv_level_code: String,
    pub cpv_code: String,
    pub name_ua: String,
    pub name_en: String,
    pub label: String,
    pub children: Vec<CpvNode>,
}

/// One level of the lazy tree
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CpvChild {
    pub id: i64,
    pub cpv_parent_code: String,
    pub cpv_level_code: String,
    pub cpv_code: String,
    pub name_ua: String,
    pub name_en: String,
    pub has_children: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpvChildResponse {
    #[serde(flatten)]
    pub node: CpvChild,
    pub label: String,
    /// Always empty, filled lazily by the client
    pub children: Vec<CpvChild>,
}

impl From<CpvChild> for CpvChildResponse {
    fn from(node: CpvChild) -> Self {
        Self {
            label: cpv_label(&node.cpv_code, &node.name_ua),
            node,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpvChildrenQuery {
    #[serde(default)]
    pub parent_level_code: Option<String>,
}

/// A row read from an import file before derivation
#[derive(Debug, Clone, Deserialize)]
pub struct CpvImportRecord {
    #[serde(alias = "cpv_code", alias = "код")]
    pub code: String,
    #[serde(alias = "name", alias = "назва")]
    pub name_ua: String,
    #[serde(default, alias = "name_eng")]
    pub name_en: String,
}

/// Derived columns ready for insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpvImportRow {
    pub cpv_code: String,
    pub cpv_level_code: String,
    pub cpv_parent_code: String,
    pub name_ua: String,
    pub name_en: String,
}

/// Keep the leading eight digits of a code such as `03110000-5`
pub fn normalize_code(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).take(8).collect();
    (digits.len() == 8).then_some(digits)
}

/// `(level_code, parent_code)` for a normalized eight-digit code
pub fn derive_levels(code: &str) -> (String, String) {
    let prefix = |n: usize| code.chars().take(n).collect::<String>();

    if code.ends_with("000000") {
        (prefix(2), "0".to_string())
    } else if code.ends_with("00000") {
        (prefix(3), prefix(2))
    } else if code.ends_with("0000") {
        (prefix(4), prefix(3))
    } else {
        ("0".to_string(), prefix(4))
    }
}

impl CpvImportRecord {
    pub fn into_row(self) -> Option<CpvImportRow> {
        let cpv_code = normalize_code(&self.code)?;
        let (cpv_level_code, cpv_parent_code) = derive_levels(&cpv_code);
        Some(CpvImportRow {
            cpv_code,
            cpv_level_code,
            cpv_parent_code,
            name_ua: self.name_ua.trim().to_string(),
            name_en: self.name_en.trim().to_string(),
        })
    }
}

/// Assemble the full tree. Roots are rows with an empty or `0` parent code or
/// a parent code no row carries as its level code.
pub fn build_cpv_tree(entries: Vec<CpvEntry>) -> Vec<CpvNode> {
    let level_codes: HashSet<String> = entries
        .iter()
        .filter(|e| !is_root_marker(&e.cpv_level_code))
        .map(|e| e.cpv_level_code.clone())
        .collect();

    let mut roots = Vec::new();
    let mut by_parent: HashMap<String, Vec<CpvEntry>> = HashMap::new();

    for entry in entries {
        if is_root_marker(&entry.cpv_parent_code) || !level_codes.contains(&entry.cpv_parent_code) {
            roots.push(entry);
        } else {
            by_parent.entry(entry.cpv_parent_code.clone()).or_default().push(entry);
        }
    }

    let mut roots: Vec<CpvNode> = roots
        .into_iter()
        .map(|entry| attach(entry, &mut by_parent))
        .collect();
    roots.sort_by(|a, b| a.cpv_code.cmp(&b.cpv_code));
    roots
}

fn is_root_marker(code: &str) -> bool {
    code.is_empty() || code == "0"
}

fn attach(entry: CpvEntry, by_parent: &mut HashMap<String, Vec<CpvEntry>>) -> CpvNode {
    // Leaves carry level code "0" and never own children
    let mut children: Vec<CpvNode> = if is_root_marker(&entry.cpv_level_code) {
        Vec::new()
    } else {
        by_parent
            .remove(&entry.cpv_level_code)
            .unwrap_or_default()
            .into_iter()
            .map(|child| attach(child, by_parent))
            .collect()
    };
    children.sort_by(|a, b| a.cpv_code.cmp(&b.cpv_code));

    CpvNode {
        label: entry.label(),
        id: entry.id,
        cpv_parent_code: entry.cpv_parent_code,
        cpv_level_code: entry.cpv_level_code,
        cpv_code: entry.cpv_code,
        name_ua: entry.name_ua,
        name_en: entry.name_en,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(id: i64, code: &str) -> CpvEntry {
        let (level, parent) = derive_levels(code);
        CpvEntry {
            id,
            cpv_code: code.to_string(),
            cpv_level_code: level,
            cpv_parent_code: parent,
            name_ua: format!("name {code}"),
            name_en: String::new(),
        }
    }

    #[test]
    fn level_derivation_by_trailing_zeros() {
        assert_eq!(derive_levels("03000000"), ("03".into(), "0".into()));
        assert_eq!(derive_levels("03100000"), ("031".into(), "03".into()));
        assert_eq!(derive_levels("03110000"), ("0311".into(), "031".into()));
        assert_eq!(derive_levels("03111000"), ("0".into(), "0311".into()));
        assert_eq!(derive_levels("03111100"), ("0".into(), "0311".into()));
    }

    #[test]
    fn codes_are_cut_to_eight_digits() {
        assert_eq!(normalize_code("03110000-5").as_deref(), Some("03110000"));
        assert_eq!(normalize_code(" 45000000 "), Some("45000000".to_string()));
        assert_eq!(normalize_code("123"), None);
    }

    #[test]
    fn tree_nests_levels_and_labels_nodes() {
        let tree = build_cpv_tree(vec![
            entry(4, "03111000"),
            entry(1, "03000000"),
            entry(3, "03110000"),
            entry(2, "03100000"),
            entry(5, "45000000"),
        ]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].cpv_code, "03000000");
        assert_eq!(tree[0].label, "03000000 - name 03000000");
        let group = &tree[0].children[0];
        assert_eq!(group.cpv_code, "03100000");
        let class = &group.children[0];
        assert_eq!(class.cpv_code, "03110000");
        assert_eq!(class.children[0].cpv_code, "03111000");
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn unknown_parent_becomes_root() {
        let tree = build_cpv_tree(vec![entry(1, "09110000")]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].cpv_parent_code, "091");
    }

    proptest! {
        #[test]
        fn derived_parent_is_a_prefix_of_the_code(code in "[0-9]{8}") {
            let (level, parent) = derive_levels(&code);
            if level != "0" {
                prop_assert!(code.starts_with(&level));
            }
            if parent != "0" {
                prop_assert!(code.starts_with(&parent));
                prop_assert!(parent.len() < 5);
            }
        }
    }
}
