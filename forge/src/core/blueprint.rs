//! Whole-project file graph and its integrity checks.
//!
//! A [`Blueprint`] lists every file of the generated project with the names it
//! exports and the files it imports. Validation is pure: the same blueprint
//! always yields the same [`GraphReport`], and the only effect is logging.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::path::{has_extension, join_normalized, parent_dir, project_path};
use crate::error::{ForgeError, Result};

/// Extensions probed, in order, for extension-less local imports.
pub const PROBE_EXTENSIONS: [&str; 3] = [".tsx", ".ts", ".css"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Imports {
    #[serde(default)]
    pub external: Vec<String>,
    #[serde(default)]
    pub local: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintFile {
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub imports: Imports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintValidation {
    pub all_local_imports_exist: bool,
    pub no_cyclical_dependencies: bool,
}

impl BlueprintValidation {
    pub fn is_clean(&self) -> bool {
        self.all_local_imports_exist && self.no_cyclical_dependencies
    }
}

/// The project file graph. Paths are unique; `validation` is only ever set by
/// [`validate_blueprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBlueprint")]
pub struct Blueprint {
    files: Vec<BlueprintFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<BlueprintValidation>,
}

#[derive(Deserialize)]
struct RawBlueprint {
    files: Vec<BlueprintFile>,
}

impl TryFrom<RawBlueprint> for Blueprint {
    type Error = ForgeError;

    fn try_from(raw: RawBlueprint) -> Result<Self> {
        Blueprint::new(raw.files)
    }
}

impl Blueprint {
    /// Paths are stored in canonical form, so `./src/App.tsx` and
    /// `src/App.tsx` are one file and a duplicate.
    pub fn new(mut files: Vec<BlueprintFile>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for file in &mut files {
            if file.path.trim().is_empty() {
                return Err(ForgeError::Validation(
                    "blueprint file path must be non-empty".to_string(),
                ));
            }
            file.path = project_path(&file.path).ok_or_else(|| {
                ForgeError::Validation(format!("blueprint path {} leaves the project", file.path))
            })?;
            if !seen.insert(file.path.clone()) {
                return Err(ForgeError::Validation(format!(
                    "duplicate blueprint path {}",
                    file.path
                )));
            }
        }
        Ok(Self {
            files,
            validation: None,
        })
    }

    pub fn files(&self) -> &[BlueprintFile] {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&BlueprintFile> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Flags computed by the last [`validate_blueprint`] call, if any.
    pub fn validation(&self) -> Option<BlueprintValidation> {
        self.validation
    }

    pub fn known_paths(&self) -> BTreeSet<String> {
        self.files.iter().map(|file| file.path.clone()).collect()
    }

    /// Find the blueprint file a build tool refers to, tolerating `./` prefixes
    /// and paths reported relative to a parent directory.
    pub fn owning_file(&self, reported: &str) -> Option<&BlueprintFile> {
        let normalized = reported.trim().trim_start_matches("./").replace('\\', "/");
        self.file(&normalized).or_else(|| {
            self.files
                .iter()
                .filter(|file| normalized.ends_with(&format!("/{}", file.path)))
                .max_by_key(|file| file.path.len())
        })
    }
}

/// A local import that does not resolve to a blueprint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingImport {
    pub file: String,
    pub import: String,
    pub resolved: String,
}

/// Findings of the two graph checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphReport {
    pub missing: Vec<MissingImport>,
    /// First cycle found, as a path list that starts and ends on the same file.
    pub cycle: Option<Vec<String>>,
}

impl GraphReport {
    pub fn flags(&self) -> BlueprintValidation {
        BlueprintValidation {
            all_local_imports_exist: self.missing.is_empty(),
            no_cyclical_dependencies: self.cycle.is_none(),
        }
    }

    /// Human-readable issue lines, used to re-prompt the architect.
    pub fn issues(&self) -> Vec<String> {
        let mut issues: Vec<String> = self
            .missing
            .iter()
            .map(|miss| {
                format!(
                    "{} imports '{}' (resolved to '{}') which is not a declared file",
                    miss.file, miss.import, miss.resolved
                )
            })
            .collect();
        if let Some(cycle) = &self.cycle {
            issues.push(format!("import cycle: {}", cycle.join(" -> ")));
        }
        issues
    }
}

/// Resolve a local import specifier written in `importer` to a project path.
///
/// `./` and `../` are relative to the importer, `@/` maps to `src/`, anything
/// else is root-relative. An exact match wins; otherwise an extension-less
/// name is probed with [`PROBE_EXTENSIONS`] in order. Unmatched names come back
/// normalized but otherwise unchanged. Resolving an already-resolved path
/// returns it unchanged.
pub fn resolve_import(importer: &str, import: &str, known: &BTreeSet<String>) -> String {
    let candidate = if let Some(rest) = import.strip_prefix("@/") {
        join_normalized("src", rest)
    } else if import.starts_with("./") || import.starts_with("../") {
        join_normalized(parent_dir(importer), import)
    } else {
        join_normalized("", import)
    };
    let Some(candidate) = candidate else {
        return import.to_string();
    };

    if known.contains(&candidate) {
        return candidate;
    }
    if !has_extension(&candidate) {
        for ext in PROBE_EXTENSIONS {
            let probe = format!("{candidate}{ext}");
            if known.contains(&probe) {
                return probe;
            }
        }
    }
    candidate
}

/// Run both graph checks without touching the blueprint.
pub fn check_graph(blueprint: &Blueprint) -> GraphReport {
    let known = blueprint.known_paths();
    let mut missing = Vec::new();
    let mut edges: BTreeMap<&str, Vec<String>> = BTreeMap::new();

    for file in &blueprint.files {
        let targets = edges.entry(file.path.as_str()).or_default();
        for import in &file.imports.local {
            let resolved = resolve_import(&file.path, import, &known);
            if known.contains(&resolved) {
                targets.push(resolved);
            } else {
                missing.push(MissingImport {
                    file: file.path.clone(),
                    import: import.clone(),
                    resolved,
                });
            }
        }
        targets.sort();
        targets.dedup();
    }

    GraphReport {
        missing,
        cycle: find_cycle(&edges),
    }
}

/// Populate `validation` from a fresh [`check_graph`] pass.
pub fn validate_blueprint(mut blueprint: Blueprint) -> (Blueprint, GraphReport) {
    let report = check_graph(&blueprint);
    if !report.missing.is_empty() {
        let available: Vec<&str> = blueprint.files.iter().map(|f| f.path.as_str()).collect();
        for miss in &report.missing {
            warn!(
                file = %miss.file,
                import = %miss.import,
                resolved = %miss.resolved,
                available = ?available,
                "local import does not resolve to a blueprint file"
            );
        }
    }
    if let Some(cycle) = &report.cycle {
        warn!(cycle = %cycle.join(" -> "), "blueprint import graph has a cycle");
    }
    blueprint.validation = Some(report.flags());
    (blueprint, report)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InStack,
    Done,
}

fn find_cycle(edges: &BTreeMap<&str, Vec<String>>) -> Option<Vec<String>> {
    let mut state: BTreeMap<String, Visit> = BTreeMap::new();
    let mut stack: Vec<String> = Vec::new();
    for node in edges.keys() {
        if !state.contains_key(*node)
            && let Some(cycle) = visit(node, edges, &mut state, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: &str,
    edges: &BTreeMap<&str, Vec<String>>,
    state: &mut BTreeMap<String, Visit>,
    stack: &mut Vec<String>,
) -> Option<Vec<String>> {
    state.insert(node.to_string(), Visit::InStack);
    stack.push(node.to_string());

    for next in edges.get(node).into_iter().flatten() {
        match state.get(next) {
            Some(Visit::InStack) => {
                let start = stack.iter().position(|entry| entry == next).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(next.clone());
                return Some(cycle);
            }
            Some(Visit::Done) => {}
            None => {
                if let Some(cycle) = visit(next, edges, state, stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    state.insert(node.to_string(), Visit::Done);
    None
}

static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)\bexport\s+(?:declare\s+)?(?:async\s+)?(?:abstract\s+)?(?:function\*?|const|let|var|class|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
    )
    .expect("export declaration regex")
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\bexport\s+default\s+(?:async\s+)?(?:(?:function|class)\s+)?([A-Za-z_$][\w$]*)?")
        .expect("export default regex")
});

static EXPORT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\bexport\s+(?:type\s+)?\{([^}]*)\}").expect("export list regex")
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[^'";]*?\s+from\s+)?['"]([^'"]+)['"]"#)
        .expect("import regex")
});

/// Names exported by a source file. A default export is recorded as `default`.
pub fn scan_exports(content: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for caps in EXPORT_DECL_RE.captures_iter(content) {
        names.insert(caps[1].to_string());
    }
    for caps in EXPORT_DEFAULT_RE.captures_iter(content) {
        names.insert("default".to_string());
        if let Some(name) = caps.get(1)
            && !matches!(name.as_str(), "function" | "class" | "async")
        {
            names.insert(name.as_str().to_string());
        }
    }
    for caps in EXPORT_LIST_RE.captures_iter(content) {
        for entry in caps[1].split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let exported = entry
                .rsplit_once(" as ")
                .map(|(_, alias)| alias)
                .unwrap_or(entry)
                .trim_start_matches("type ")
                .trim();
            names.insert(exported.to_string());
        }
    }
    names
}

/// Local (relative or `@/`) import specifiers used by a source file, in order.
pub fn scan_local_imports(content: &str) -> Vec<String> {
    IMPORT_RE
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .filter(|spec| spec.starts_with('.') || spec.starts_with("@/"))
        .collect()
}

/// One-file shape check: declared exports are present and local imports resolve.
pub fn check_unit_shape(file: &BlueprintFile, content: &str, known: &BTreeSet<String>) -> Vec<String> {
    let mut issues = Vec::new();
    let exported = scan_exports(content);
    for declared in &file.exports {
        let declared = declared.trim();
        if !declared.is_empty() && !exported.contains(declared) {
            issues.push(format!("{}: missing export '{}'", file.path, declared));
        }
    }
    for import in scan_local_imports(content) {
        let resolved = resolve_import(&file.path, &import, known);
        if !known.contains(&resolved) {
            issues.push(format!(
                "{}: local import '{}' does not resolve to a blueprint file",
                file.path, import
            ));
        }
    }
    issues
}
