//! Semantic invariants of a decomposition tree not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::tree::{ItemId, WorkTree};

/// Check semantic invariants of the arena:
/// - Every child link resolves and points back at its parent
/// - No item is claimed by two parents
/// - Depth grows by exactly one per level
/// - Assigned paths are unique
/// - Descriptions are non-empty
///
/// Returns a list of stable error messages (ordered by item id).
pub fn validate_invariants(tree: &WorkTree) -> Vec<String> {
    let mut errors = Vec::new();
    let mut claimed: HashMap<ItemId, ItemId> = HashMap::new();
    let mut paths = HashSet::new();

    for item in tree.items() {
        if item.description.trim().is_empty() {
            errors.push(format!("{}: description must be non-empty", item.id));
        }
        if let Some(path) = &item.path
            && !paths.insert(path.as_str())
        {
            errors.push(format!("{}: duplicate path '{}'", item.id, path));
        }
        if item.parent.is_none() && item.id != tree.root_id() {
            errors.push(format!("{}: detached item has no parent", item.id));
        }

        for child_id in &item.children {
            if let Some(previous) = claimed.insert(*child_id, item.id) {
                errors.push(format!(
                    "{}: claimed by both {} and {}",
                    child_id, previous, item.id
                ));
            }
            let Some(child) = tree.get(*child_id) else {
                errors.push(format!("{}: child {} does not exist", item.id, child_id));
                continue;
            };
            if child.parent != Some(item.id) {
                errors.push(format!(
                    "{}: parent link does not point back at {}",
                    child_id, item.id
                ));
            }
            if child.depth != item.depth + 1 {
                errors.push(format!(
                    "{}: depth {} under parent depth {}",
                    child_id, child.depth, item.depth
                ));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;
    use crate::tree::{ItemKind, NestedItem};

    #[test]
    fn freshly_built_tree_has_no_violations() {
        let mut tree = WorkTree::with_root(spec("App", ItemKind::Page)).expect("root");
        tree.add_children(
            tree.root_id(),
            vec![spec("Login", ItemKind::Page), spec("Dashboard", ItemKind::Page)],
        )
        .expect("children");
        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn empty_descriptions_are_reported() {
        let nested = NestedItem {
            id: ItemId(0),
            name: "App".to_string(),
            kind: ItemKind::Page,
            description: " ".to_string(),
            summary: None,
            path: Some("src/App.tsx".to_string()),
            children: Vec::new(),
        };
        let tree = WorkTree::from_nested(&nested).expect("tree");
        let errors = validate_invariants(&tree);
        assert_eq!(errors, vec!["#0: description must be non-empty".to_string()]);
    }
}
