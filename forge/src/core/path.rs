//! Helpers for deterministic item paths and `/`-separated project paths.

use std::collections::BTreeSet;

use crate::tree::{ItemId, ItemKind, WorkTree};

/// Default file location for a unit of `kind` named `name`.
pub fn default_file_path(kind: ItemKind, name: &str) -> String {
    let dir = match kind {
        ItemKind::Component => "src/components",
        ItemKind::Page => "src/pages",
    };
    format!("{dir}/{}.tsx", pascal_case(name))
}

/// Accept a model-proposed path only if it stays inside the project.
pub fn normalize_proposed_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return None;
    }
    let normalized = normalize_segments(trimmed.split('/'))?;
    (!normalized.is_empty()).then_some(normalized)
}

/// Return `path`, or `path` with a numeric suffix before the extension, so it is not in `taken`.
pub fn dedupe_path(path: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(path) {
        return path.to_string();
    }
    let (stem, ext) = split_extension(path);
    (2u32..)
        .map(|n| match ext {
            Some(ext) => format!("{stem}{n}.{ext}"),
            None => format!("{stem}{n}"),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| path.to_string())
}

/// Return the `/`-separated name path from the root down to `target`.
pub fn branch_path(tree: &WorkTree, target: ItemId) -> Option<String> {
    let mut names = Vec::new();
    let mut cursor = Some(target);
    while let Some(id) = cursor {
        let item = tree.get(id)?;
        names.push(item.name.clone());
        cursor = item.parent;
    }
    names.reverse();
    Some(names.join("/"))
}

/// Join `relative` onto directory `base` and collapse `.` / `..` segments.
///
/// Returns `None` if the path escapes the project root.
pub fn join_normalized(base: &str, relative: &str) -> Option<String> {
    let segments = base
        .split('/')
        .chain(relative.split('/'))
        .filter(|segment| !segment.is_empty());
    normalize_segments(segments)
}

/// Canonical project-relative spelling of a file path, `None` when it is
/// empty or climbs above the project root.
pub fn project_path(path: &str) -> Option<String> {
    join_normalized("", path.trim()).filter(|p| !p.is_empty())
}

/// Directory portion of a `/`-separated path (empty for top-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// True when the last segment of `path` carries an extension.
pub fn has_extension(path: &str) -> bool {
    split_extension(path).1.is_some()
}

fn normalize_segments<'a>(segments: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut out: Vec<&str> = Vec::new();
    for segment in segments {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop()?;
            }
            other => out.push(other),
        }
    }
    Some(out.join("/"))
}

fn split_extension(path: &str) -> (&str, Option<&str>) {
    let file_start = path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(0) | None => (path, None),
        Some(dot) => {
            let dot = file_start + dot;
            (&path[..dot], Some(&path[dot + 1..]))
        }
    }
}

fn pascal_case(name: &str) -> String {
    let mut out = String::new();
    for word in name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() {
        return "Unit".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'U');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;

    #[test]
    fn default_paths_follow_kind_and_pascal_case() {
        assert_eq!(
            default_file_path(ItemKind::Page, "login page"),
            "src/pages/LoginPage.tsx"
        );
        assert_eq!(
            default_file_path(ItemKind::Component, "nav-bar"),
            "src/components/NavBar.tsx"
        );
        assert_eq!(default_file_path(ItemKind::Component, "!!"), "src/components/Unit.tsx");
    }

    #[test]
    fn proposed_paths_cannot_escape_root() {
        assert_eq!(normalize_proposed_path("../etc/passwd"), None);
        assert_eq!(normalize_proposed_path("/abs/path.tsx"), None);
        assert_eq!(
            normalize_proposed_path("src/./pages/Home.tsx"),
            Some("src/pages/Home.tsx".to_string())
        );
    }

    #[test]
    fn dedupe_inserts_suffix_before_extension() {
        let taken: BTreeSet<String> = ["src/A.tsx", "src/A2.tsx"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(dedupe_path("src/A.tsx", &taken), "src/A3.tsx");
        assert_eq!(dedupe_path("src/B.tsx", &taken), "src/B.tsx");
    }

    #[test]
    fn join_normalized_resolves_parent_segments() {
        assert_eq!(
            join_normalized("src/pages", "../components/Button"),
            Some("src/components/Button".to_string())
        );
        assert_eq!(join_normalized("", "./Button"), Some("Button".to_string()));
        assert_eq!(join_normalized("", "../Button"), None);
    }

    #[test]
    fn branch_path_walks_to_root() {
        let mut tree = WorkTree::with_root(spec("App", ItemKind::Page)).expect("root");
        let ids = tree
            .add_children(tree.root_id(), vec![spec("Dashboard", ItemKind::Page)])
            .expect("child");
        assert_eq!(
            branch_path(&tree, ids[0]),
            Some("App/Dashboard".to_string())
        );
        assert_eq!(branch_path(&tree, ItemId(99)), None);
    }
}
