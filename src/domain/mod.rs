//! Domain types and DTOs
//!
//! Row structs mirror the tables, request DTOs carry their own validation,
//! and response DTOs are what the API serializes.

use serde::{Deserialize, Deserializer};

pub mod cpv;
pub mod companies;
pub mod memberships;
pub mod nomenclature;
pub mod notifications;
pub mod org;
pub mod proposals;
pub mod references;
pub mod roles;
pub mod tenders;
pub mod tree;
pub mod users;

/// String-backed enums stored in TEXT columns
///
/// Generates `as_str`, `parse` and a Ukrainian display `label`.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal : $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`)
///
/// Use with `#[serde(default, deserialize_with = "nullable")]`.
pub fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        parent_id: Option<Option<Uuid>>,
    }

    #[test]
    fn nullable_distinguishes_missing_from_null() {
        let missing: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.parent_id, None);

        let cleared: Patch = serde_json::from_str(r#"{"parent_id": null}"#).unwrap();
        assert_eq!(cleared.parent_id, Some(None));

        let id = Uuid::new_v4();
        let set: Patch = serde_json::from_value(serde_json::json!({ "parent_id": id })).unwrap();
        assert_eq!(set.parent_id, Some(Some(id)));
    }
}
