//! Tree manifest load/save with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::invariants::validate_invariants;
use crate::tree::{NestedItem, WorkTree};

const MANIFEST_VERSION: u32 = 1;
const WORK_TREE_SCHEMA: &str = include_str!("../../schemas/work_tree.schema.json");

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    root: NestedItem,
}

/// Load and validate a tree manifest (schema + invariants).
pub fn load_tree(tree_path: &Path) -> Result<WorkTree> {
    let contents = fs::read_to_string(tree_path)
        .with_context(|| format!("read tree {}", tree_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse tree {}", tree_path.display()))?;
    validate_schema(&value)?;
    let manifest: Manifest = serde_json::from_value(value)
        .with_context(|| format!("deserialize tree {}", tree_path.display()))?;
    let tree = WorkTree::from_nested(&manifest.root)
        .with_context(|| format!("rebuild tree {}", tree_path.display()))?;
    validate_tree_invariants(&tree)?;
    Ok(tree)
}

/// Write the tree as a nested manifest.
pub fn write_tree(tree_path: &Path, tree: &WorkTree) -> Result<()> {
    validate_tree_invariants(tree)?;
    let manifest = Manifest {
        version: MANIFEST_VERSION,
        root: tree.to_nested(),
    };
    let mut buf = serde_json::to_string_pretty(&manifest)?;
    buf.push('\n');
    if let Some(parent) = tree_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(tree_path, buf).with_context(|| format!("write tree {}", tree_path.display()))
}

fn validate_schema(tree: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(WORK_TREE_SCHEMA).context("parse work tree schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(tree) {
        let messages = compiled
            .iter_errors(tree)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "tree schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_tree_invariants(tree: &WorkTree) -> Result<()> {
    let errors = validate_invariants(tree);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("tree invariants failed: {}", errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;
    use crate::tree::ItemKind;

    #[test]
    fn write_then_load_preserves_structure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tree.json");

        let mut tree = WorkTree::with_root(spec("App", ItemKind::Page)).expect("root");
        tree.add_children(
            tree.root_id(),
            vec![spec("Home", ItemKind::Page), spec("Nav", ItemKind::Component)],
        )
        .expect("children");
        write_tree(&path, &tree).expect("write");

        let loaded = load_tree(&path).expect("load");
        assert_eq!(loaded.to_nested(), tree.to_nested());
    }

    #[test]
    fn schema_rejects_unknown_kind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tree.json");
        fs::write(
            &path,
            r#"{"version":1,"root":{"id":0,"name":"App","kind":"widget","description":"d","children":[]}}"#,
        )
        .expect("write");
        let err = load_tree(&path).expect_err("schema");
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tree.json");
        fs::write(
            &path,
            r#"{"version":1,"root":{"id":0,"name":"App","kind":"page","description":"d","path":"src/A.tsx","children":[
                {"id":1,"name":"A","kind":"component","description":"d","path":"src/A.tsx","children":[]}
            ]}}"#,
        )
        .expect("write");
        assert!(load_tree(&path).is_err());
    }

    #[test]
    fn largest_item_id_is_refused_without_panicking() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tree.json");
        fs::write(
            &path,
            r#"{"version":1,"root":{"id":4294967295,"name":"App","kind":"page","description":"d","children":[]}}"#,
        )
        .expect("write");
        let err = load_tree(&path).expect_err("id out of range");
        assert!(format!("{err:#}").contains("schema validation failed"));
    }
}
