//! In-memory assembly of parent-referencing trees

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

/// A row that points at its parent
pub trait TreeItem {
    fn id(&self) -> Uuid;
    fn parent_id(&self) -> Option<Uuid>;
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode<T: Serialize> {
    #[serde(flatten)]
    pub item: T,
    pub children: Vec<TreeNode<T>>,
}

/// Nest a flat list. Items whose parent is absent from the list become roots.
/// Input order is kept among siblings.
pub fn build_forest<T: TreeItem + Serialize>(items: Vec<T>) -> Vec<TreeNode<T>> {
    let ids: HashSet<Uuid> = items.iter().map(TreeItem::id).collect();
    let mut roots = Vec::new();
    let mut by_parent: HashMap<Uuid, Vec<T>> = HashMap::new();

    for item in items {
        match item.parent_id().filter(|p| *p != item.id() && ids.contains(p)) {
            Some(parent) => by_parent.entry(parent).or_default().push(item),
            None => roots.push(item),
        }
    }

    roots
        .into_iter()
        .map(|item| attach(item, &mut by_parent))
        .collect()
}

fn attach<T: TreeItem + Serialize>(item: T, by_parent: &mut HashMap<Uuid, Vec<T>>) -> TreeNode<T> {
    let children = by_parent
        .remove(&item.id())
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach(child, by_parent))
        .collect();

    TreeNode { item, children }
}

/// Would re-parenting `node` under `new_parent` make `node` its own ancestor?
///
/// `parents` maps every node of the tree to its current parent.
pub fn creates_cycle(node: Uuid, new_parent: Uuid, parents: &HashMap<Uuid, Option<Uuid>>) -> bool {
    let mut current = Some(new_parent);
    let mut steps = 0;

    while let Some(id) = current {
        if id == node {
            return true;
        }
        steps += 1;
        // Corrupt data could loop forever without this bound
        if steps > parents.len() {
            return true;
        }
        current = parents.get(&id).copied().flatten();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Serialize)]
    struct Node {
        id: Uuid,
        parent: Option<Uuid>,
    }

    impl TreeItem for Node {
        fn id(&self) -> Uuid {
            self.id
        }

        fn parent_id(&self) -> Option<Uuid> {
            self.parent
        }
    }

    fn count(nodes: &[TreeNode<Node>]) -> usize {
        nodes.iter().map(|n| 1 + count(&n.children)).sum()
    }

    #[test]
    fn nests_children_and_promotes_orphans() {
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let items = vec![
            Node { id: root, parent: None },
            Node { id: child, parent: Some(root) },
            Node { id: orphan, parent: Some(Uuid::new_v4()) },
        ];

        let forest = build_forest(items);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].item.id, root);
        assert_eq!(forest[0].children[0].item.id, child);
        assert_eq!(forest[1].item.id, orphan);
    }

    #[test]
    fn detects_self_and_descendant_parents() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let parents = HashMap::from([(a, None), (b, Some(a)), (c, Some(b))]);

        assert!(creates_cycle(a, a, &parents));
        assert!(creates_cycle(a, c, &parents));
        assert!(!creates_cycle(c, a, &parents));
        assert!(!creates_cycle(b, Uuid::new_v4(), &parents));
    }

    proptest! {
        // Every generated node points at an earlier one (or nothing), so the
        // input is always a forest and nothing may be dropped or duplicated.
        #[test]
        fn forest_keeps_every_node(parents in prop::collection::vec(prop::option::of(0usize..50), 1..60)) {
            let ids: Vec<Uuid> = (0..parents.len()).map(|_| Uuid::new_v4()).collect();
            let items: Vec<Node> = parents
                .iter()
                .enumerate()
                .map(|(i, p)| Node {
                    id: ids[i],
                    parent: p.filter(|p| *p < i).map(|p| ids[p]),
                })
                .collect();

            let forest = build_forest(items.clone());
            prop_assert_eq!(count(&forest), items.len());
        }
    }
}
