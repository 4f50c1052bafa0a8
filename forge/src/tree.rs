//! Work items and the arena that owns the decomposition tree.
//!
//! Items are stored by [`ItemId`] and refer to their children by id. Concurrent
//! tasks only ever see clones of the items they process; the arena itself is
//! mutated between scheduling rounds.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::path::{dedupe_path, default_file_path, normalize_proposed_path};
use crate::error::{ForgeError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two unit shapes a work item can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Component,
    Page,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Component => "component",
            ItemKind::Page => "page",
        }
    }
}

/// A record proposed by the model before the arena gives it an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    #[serde(alias = "type")]
    pub kind: ItemKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ItemSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ForgeError::Validation("item name must be non-empty".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(ForgeError::Validation(format!(
                "item '{}' has an empty description",
                self.name
            )));
        }
        Ok(())
    }
}

/// A node of the decomposition tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    pub description: String,
    pub summary: Option<String>,
    pub path: Option<String>,
    pub depth: u32,
    pub parent: Option<ItemId>,
    pub children: Vec<ItemId>,
}

impl WorkItem {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Nested rendering of the tree, used for manifests and prompts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedItem {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub children: Vec<NestedItem>,
}

/// Arena of work items keyed by id.
#[derive(Clone, Debug)]
pub struct WorkTree {
    items: BTreeMap<ItemId, WorkItem>,
    root: ItemId,
    next_id: u32,
    paths: BTreeSet<String>,
}

impl WorkTree {
    /// Create a tree whose root is built from `spec`.
    pub fn with_root(spec: ItemSpec) -> Result<Self> {
        spec.validate()?;
        let mut tree = Self {
            items: BTreeMap::new(),
            root: ItemId(0),
            next_id: 0,
            paths: BTreeSet::new(),
        };
        let root = tree.insert(spec, None, 0);
        tree.root = root;
        Ok(tree)
    }

    pub fn root_id(&self) -> ItemId {
        self.root
    }

    pub fn root(&self) -> &WorkItem {
        &self.items[&self.root]
    }

    pub fn get(&self, id: ItemId) -> Option<&WorkItem> {
        self.items.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }

    pub fn leaves(&self) -> Vec<&WorkItem> {
        self.items.values().filter(|item| item.is_leaf()).collect()
    }

    /// Attach validated child specs under `parent`, assigning ids and unique paths.
    pub fn add_children(&mut self, parent: ItemId, specs: Vec<ItemSpec>) -> Result<Vec<ItemId>> {
        let depth = self
            .items
            .get(&parent)
            .map(|item| item.depth + 1)
            .ok_or_else(|| ForgeError::Validation(format!("unknown parent item {parent}")))?;
        for spec in &specs {
            spec.validate()?;
        }
        u32::try_from(specs.len())
            .ok()
            .and_then(|count| self.next_id.checked_add(count))
            .ok_or_else(|| ForgeError::Validation("item ids exhausted".to_string()))?;

        let ids: Vec<ItemId> = specs
            .into_iter()
            .map(|spec| self.insert(spec, Some(parent), depth))
            .collect();
        if let Some(item) = self.items.get_mut(&parent) {
            item.children.extend(ids.iter().copied());
        }
        Ok(ids)
    }

    /// Replace an item's description with an expounded one. Name, kind and path are kept.
    pub fn set_description(&mut self, id: ItemId, description: String) -> Result<()> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| ForgeError::Validation(format!("unknown item {id}")))?;
        if description.trim().is_empty() {
            return Err(ForgeError::Validation(format!(
                "item '{}' has an empty description",
                item.name
            )));
        }
        item.description = description;
        Ok(())
    }

    /// Render the arena as a nested tree rooted at the root item.
    pub fn to_nested(&self) -> NestedItem {
        self.nest(self.root)
    }

    /// Rebuild an arena from its nested rendering, preserving ids and paths.
    pub fn from_nested(root: &NestedItem) -> Result<Self> {
        let mut tree = Self {
            items: BTreeMap::new(),
            root: root.id,
            next_id: 0,
            paths: BTreeSet::new(),
        };
        tree.absorb(root, None, 0)?;
        Ok(tree)
    }

    fn absorb(&mut self, nested: &NestedItem, parent: Option<ItemId>, depth: u32) -> Result<()> {
        if self.items.contains_key(&nested.id) {
            return Err(ForgeError::Validation(format!("duplicate item id {}", nested.id)));
        }
        if let Some(path) = &nested.path
            && !self.paths.insert(path.clone())
        {
            return Err(ForgeError::Validation(format!("duplicate item path {path}")));
        }
        let after = nested.id.0.checked_add(1).ok_or_else(|| {
            ForgeError::Validation(format!("item id {} leaves no room for new items", nested.id))
        })?;
        self.next_id = self.next_id.max(after);
        self.items.insert(
            nested.id,
            WorkItem {
                id: nested.id,
                name: nested.name.clone(),
                kind: nested.kind,
                description: nested.description.clone(),
                summary: nested.summary.clone(),
                path: nested.path.clone(),
                depth,
                parent,
                children: nested.children.iter().map(|child| child.id).collect(),
            },
        );
        for child in &nested.children {
            self.absorb(child, Some(nested.id), depth + 1)?;
        }
        Ok(())
    }

    fn nest(&self, id: ItemId) -> NestedItem {
        let item = &self.items[&id];
        NestedItem {
            id: item.id,
            name: item.name.clone(),
            kind: item.kind,
            description: item.description.clone(),
            summary: item.summary.clone(),
            path: item.path.clone(),
            children: item.children.iter().map(|child| self.nest(*child)).collect(),
        }
    }

    fn insert(&mut self, spec: ItemSpec, parent: Option<ItemId>, depth: u32) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;

        let proposed = spec
            .path
            .as_deref()
            .and_then(normalize_proposed_path)
            .unwrap_or_else(|| default_file_path(spec.kind, &spec.name));
        let path = dedupe_path(&proposed, &self.paths);
        self.paths.insert(path.clone());

        self.items.insert(
            id,
            WorkItem {
                id,
                name: spec.name.trim().to_string(),
                kind: spec.kind,
                description: spec.description,
                summary: spec.summary,
                path: Some(path),
                depth,
                parent,
                children: Vec::new(),
            },
        );
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;

    #[test]
    fn children_get_unique_paths_even_with_colliding_names() {
        let mut tree = WorkTree::with_root(spec("App", ItemKind::Page)).expect("root");
        let ids = tree
            .add_children(
                tree.root_id(),
                vec![
                    spec("Card", ItemKind::Component),
                    spec("Card", ItemKind::Component),
                ],
            )
            .expect("children");

        let first = tree.get(ids[0]).and_then(|item| item.path.clone());
        let second = tree.get(ids[1]).and_then(|item| item.path.clone());
        assert_eq!(first.as_deref(), Some("src/components/Card.tsx"));
        assert_eq!(second.as_deref(), Some("src/components/Card2.tsx"));
        assert_eq!(tree.get(ids[0]).map(|item| item.depth), Some(1));
    }

    #[test]
    fn proposed_paths_are_used_when_safe() {
        let mut root = spec("App", ItemKind::Page);
        root.path = Some("./src/App.tsx".to_string());
        let tree = WorkTree::with_root(root).expect("root");
        assert_eq!(tree.root().path.as_deref(), Some("src/App.tsx"));
    }

    #[test]
    fn empty_description_is_rejected() {
        let mut bad = spec("App", ItemKind::Page);
        bad.description = "   ".to_string();
        let err = WorkTree::with_root(bad).expect_err("should reject");
        assert!(err.to_string().contains("empty description"));
    }

    #[test]
    fn nested_round_trip_preserves_ids_and_paths() {
        let mut tree = WorkTree::with_root(spec("App", ItemKind::Page)).expect("root");
        let ids = tree
            .add_children(tree.root_id(), vec![spec("Login", ItemKind::Page)])
            .expect("children");
        tree.add_children(ids[0], vec![spec("Form", ItemKind::Component)])
            .expect("grandchild");

        let rebuilt = WorkTree::from_nested(&tree.to_nested()).expect("rebuild");
        assert_eq!(rebuilt.len(), 3);
        assert_eq!(rebuilt.to_nested(), tree.to_nested());
        assert_eq!(rebuilt.leaves().len(), 1);
    }

    #[test]
    fn largest_id_is_rejected_instead_of_wrapping() {
        let mut nested = WorkTree::with_root(spec("App", ItemKind::Page))
            .expect("root")
            .to_nested();
        nested.id = ItemId(u32::MAX);
        let err = WorkTree::from_nested(&nested).expect_err("no room");
        assert!(err.to_string().contains("leaves no room"));

        nested.id = ItemId(u32::MAX - 1);
        let mut tree = WorkTree::from_nested(&nested).expect("rebuild");
        let err = tree
            .add_children(
                tree.root_id(),
                vec![spec("A", ItemKind::Page), spec("B", ItemKind::Page)],
            )
            .expect_err("ids exhausted");
        assert!(err.to_string().contains("ids exhausted"));
        assert!(tree.root().children.is_empty());
    }

    #[test]
    fn item_spec_accepts_type_alias() {
        let parsed: ItemSpec = serde_json::from_str(
            r#"{"name":"Dashboard","type":"page","description":"Shows stats"}"#,
        )
        .expect("parse");
        assert_eq!(parsed.kind, ItemKind::Page);
    }
}
