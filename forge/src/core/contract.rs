//! Interface contracts for generated units.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::path::project_path;
use crate::error::{ForgeError, Result};

/// Declared props interface a generated unit must satisfy.
///
/// `required` and `optional` never share a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawContract")]
pub struct PropContract {
    unit_name: String,
    #[serde(default)]
    interface_text: String,
    path: String,
    required: Vec<String>,
    optional: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    unit_name: String,
    #[serde(default)]
    interface_text: String,
    path: String,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    optional: Vec<String>,
}

impl TryFrom<RawContract> for PropContract {
    type Error = ForgeError;

    fn try_from(raw: RawContract) -> Result<Self> {
        PropContract::new(raw.unit_name, raw.path, raw.required, raw.optional)
            .map(|contract| contract.with_interface_text(raw.interface_text))
    }
}

impl PropContract {
    pub fn new(
        unit_name: impl Into<String>,
        path: impl Into<String>,
        required: Vec<String>,
        optional: Vec<String>,
    ) -> Result<Self> {
        let unit_name = unit_name.into();
        if unit_name.trim().is_empty() {
            return Err(ForgeError::Validation(
                "contract unit name must be non-empty".to_string(),
            ));
        }
        let path: String = path.into();
        let path = project_path(&path).ok_or_else(|| {
            ForgeError::Validation(format!("contract for {unit_name} has unusable path '{path}'"))
        })?;
        let required_set: BTreeSet<&str> = required.iter().map(String::as_str).collect();
        let overlap: Vec<&str> = optional
            .iter()
            .map(String::as_str)
            .filter(|name| required_set.contains(name))
            .collect();
        if !overlap.is_empty() {
            return Err(ForgeError::Validation(format!(
                "contract for {unit_name} lists {} as both required and optional",
                overlap.join(", ")
            )));
        }
        Ok(Self {
            unit_name,
            interface_text: String::new(),
            path,
            required,
            optional,
        })
    }

    pub fn with_interface_text(mut self, text: impl Into<String>) -> Self {
        self.interface_text = text.into();
        self
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn interface_text(&self) -> &str {
        &self.interface_text
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn optional(&self) -> &[String] {
        &self.optional
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContractReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:readonly\s+)?['"]?([A-Za-z_$][\w$]*)['"]?\s*\??\s*[:(]"#)
        .expect("field regex")
});

/// Check `content` against a declared props contract.
pub fn validate_contract(content: &str, contract: &PropContract) -> ContractReport {
    let Some(body) = interface_body(content, contract.unit_name()) else {
        return ContractReport {
            ok: false,
            issues: vec![format!("missing interface for {}", contract.unit_name())],
        };
    };

    let fields = top_level_fields(body);
    let mut issues: Vec<String> = contract
        .required()
        .iter()
        .filter(|name| !fields.contains(name.as_str()))
        .map(|name| format!("missing required field '{name}'"))
        .collect();

    let unexpected: Vec<&str> = fields
        .iter()
        .map(String::as_str)
        .filter(|field| {
            !contract.required().iter().any(|name| name == field)
                && !contract.optional().iter().any(|name| name == field)
        })
        .collect();
    if !unexpected.is_empty() {
        issues.push(format!("unexpected fields: {}", unexpected.join(", ")));
    }

    ContractReport {
        ok: issues.is_empty(),
        issues,
    }
}

/// Body of `interface Name {..}` or `interface NameProps {..}` (type aliases too).
fn interface_body<'a>(content: &'a str, unit_name: &str) -> Option<&'a str> {
    let pattern = format!(
        r"\b(?:interface\s+{name}(?:Props)?\b[^{{]*|type\s+{name}(?:Props)?\s*=\s*)\{{",
        name = regex::escape(unit_name)
    );
    let opener = Regex::new(&pattern).ok()?.find(content)?;
    let start = opener.end();

    let mut depth = 1usize;
    for (offset, ch) in content[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Field names declared at nesting depth zero of an interface body.
fn top_level_fields(body: &str) -> BTreeSet<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut prev = None;
    for ch in body.chars() {
        match ch {
            // `=>` is an arrow, not a closing generic bracket.
            '>' if prev == Some('=') => current.push(ch),
            '{' | '(' | '[' | '<' => {
                depth += 1;
                current.push(ch);
            }
            '}' | ')' | ']' | '>' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ';' | ',' | '\n' if depth == 0 => segments.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
        prev = Some(ch);
    }
    segments.push(current);

    segments
        .iter()
        .filter_map(|segment| FIELD_RE.captures(segment))
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button_contract() -> PropContract {
        PropContract::new(
            "Button",
            "src/components/Button.tsx",
            vec!["label".to_string()],
            vec!["onClick".to_string()],
        )
        .expect("contract")
    }

    #[test]
    fn conforming_interface_passes() {
        let content = "export interface ButtonProps {\n  label: string;\n  onClick?: () => void;\n}\n";
        let report = validate_contract(content, &button_contract());
        assert!(report.ok, "{:?}", report.issues);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let content = "interface ButtonProps { onClick?: () => void }";
        let report = validate_contract(content, &button_contract());
        assert!(!report.ok);
        assert!(report.issues.iter().any(|issue| issue.contains("label")));
    }

    #[test]
    fn undeclared_field_is_unexpected() {
        let content = "interface ButtonProps {\n  label: string;\n  color: string;\n}";
        let report = validate_contract(content, &button_contract());
        assert!(!report.ok);
        assert_eq!(report.issues, vec!["unexpected fields: color".to_string()]);
    }

    #[test]
    fn missing_interface_is_a_single_issue() {
        let report = validate_contract("export const Button = () => null;", &button_contract());
        assert_eq!(report.issues, vec!["missing interface for Button".to_string()]);
    }

    #[test]
    fn nested_object_fields_are_not_top_level() {
        let content = "interface ButtonProps {\n  label: string;\n  onClick?: (e: { x: number; y: number }) => void;\n}";
        assert!(validate_contract(content, &button_contract()).ok);
    }

    #[test]
    fn callback_parameters_do_not_leak_fields() {
        let contract = PropContract::new(
            "List",
            "src/components/List.tsx",
            vec!["items".to_string(), "onSelect".to_string()],
            vec![],
        )
        .expect("contract");
        let content = "export interface ListProps {\n  items: string[];\n  onSelect: (item: string, done: () => void, index: number) => void;\n}";
        let report = validate_contract(content, &contract);
        assert!(report.ok, "{:?}", report.issues);

        let generic = "interface ListProps {\n  items: Array<Map<string, number>>;\n  onSelect: (pick: () => Promise<void>, index: number) => void;\n}";
        assert!(validate_contract(generic, &contract).ok);
    }

    #[test]
    fn overlapping_required_and_optional_is_rejected() {
        let err = PropContract::new(
            "Card",
            "src/components/Card.tsx",
            vec!["title".to_string()],
            vec!["title".to_string()],
        )
        .expect_err("overlap");
        assert!(err.to_string().contains("both required and optional"));

        let json = r#"{"unitName":"Card","path":"x.tsx","required":["a"],"optional":["a"]}"#;
        assert!(serde_json::from_str::<PropContract>(json).is_err());
    }

    #[test]
    fn contract_path_is_canonical() {
        let contract = PropContract::new("Card", "./src/components/Card.tsx", vec![], vec![])
            .expect("contract");
        assert_eq!(contract.path(), "src/components/Card.tsx");
    }
}
