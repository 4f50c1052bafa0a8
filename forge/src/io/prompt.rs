//! Prompt builder for every generation call.
//!
//! Templates carry `<!-- section:KEY required|droppable -->` markers. After
//! rendering, droppable sections are removed until the prompt fits the byte
//! budget.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::blueprint::BlueprintFile;
use crate::core::contract::PropContract;
use crate::core::diagnostics::BuildDiagnostic;
use crate::error::Result;
use crate::tree::WorkItem;

const TEMPLATES: [(&str, &str); 8] = [
    ("route", include_str!("prompts/route.md")),
    ("plan", include_str!("prompts/plan.md")),
    ("split", include_str!("prompts/split.md")),
    ("expound", include_str!("prompts/expound.md")),
    ("finalize", include_str!("prompts/finalize.md")),
    ("architect", include_str!("prompts/architect.md")),
    ("unit", include_str!("prompts/unit.md")),
    ("fix", include_str!("prompts/fix.md")),
];

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 2] = ["outline", "context"];

/// Work item fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
pub struct ItemPrompt {
    pub branch: String,
    pub name: String,
    pub kind: &'static str,
    pub description: String,
    pub path: String,
    pub depth: u32,
}

impl ItemPrompt {
    pub fn new(item: &WorkItem, branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            name: item.name.clone(),
            kind: item.kind.as_str(),
            description: item.description.clone(),
            path: item.path.clone().unwrap_or_default(),
            depth: item.depth,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct FilePrompt<'a> {
    path: &'a str,
    summary: &'a str,
    exports: &'a [String],
    local_imports: &'a [String],
    external_imports: &'a [String],
}

impl<'a> From<&'a BlueprintFile> for FilePrompt<'a> {
    fn from(file: &'a BlueprintFile) -> Self {
        Self {
            path: &file.path,
            summary: &file.summary,
            exports: &file.exports,
            local_imports: &file.imports.local,
            external_imports: &file.imports.external,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ContractPrompt<'a> {
    unit_name: &'a str,
    interface_text: &'a str,
    required: &'a [String],
    optional: &'a [String],
}

impl<'a> From<&'a PropContract> for ContractPrompt<'a> {
    fn from(contract: &'a PropContract) -> Self {
        Self {
            unit_name: contract.unit_name(),
            interface_text: contract.interface_text(),
            required: contract.required(),
            optional: contract.optional(),
        }
    }
}

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        // A broken template surfaces as a Prompt error when it is first rendered.
        if let Err(err) = env.add_template(name, source) {
            tracing::error!(template = name, err = %err, "invalid prompt template");
        }
    }
    env
});

fn render(name: &str, ctx: minijinja::Value) -> Result<String> {
    Ok(ENV.get_template(name)?.render(ctx)?)
}

fn non_empty(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|s| !s.is_empty())
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn route(&self, item: &ItemPrompt, summary: &str) -> Result<String> {
        self.finish(render(
            "route",
            context! { item => item, summary => non_empty(summary) },
        )?)
    }

    pub fn plan(&self, spec: &str) -> Result<String> {
        self.finish(render("plan", context! { spec => spec.trim() })?)
    }

    pub fn split(&self, item: &ItemPrompt, summary: &str) -> Result<String> {
        self.finish(render(
            "split",
            context! { item => item, summary => non_empty(summary) },
        )?)
    }

    pub fn expound(&self, item: &ItemPrompt, summary: &str) -> Result<String> {
        self.finish(render(
            "expound",
            context! { item => item, summary => non_empty(summary) },
        )?)
    }

    pub fn finalize(&self, item: &ItemPrompt, summary: &str) -> Result<String> {
        self.finish(render(
            "finalize",
            context! { item => item, summary => non_empty(summary) },
        )?)
    }

    pub fn architect(&self, spec: &str, issues: &[String]) -> Result<String> {
        self.finish(render(
            "architect",
            context! { spec => spec.trim(), issues => issues },
        )?)
    }

    pub fn unit(
        &self,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        issues: &[String],
        outline: &str,
        spec: &str,
    ) -> Result<String> {
        self.finish(render(
            "unit",
            context! {
                file => FilePrompt::from(file),
                contract => contract.map(ContractPrompt::from),
                issues => issues,
                outline => non_empty(outline),
                summary => non_empty(spec),
            },
        )?)
    }

    pub fn fix(
        &self,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        diagnostic: &BuildDiagnostic,
        content: &str,
        outline: &str,
    ) -> Result<String> {
        self.finish(render(
            "fix",
            context! {
                file => FilePrompt::from(file),
                contract => contract.map(ContractPrompt::from),
                diagnostic => diagnostic.to_string(),
                content => content,
                outline => non_empty(outline),
            },
        )?)
    }

    fn finish(&self, rendered: String) -> Result<String> {
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(flag)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = flag.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| secs.iter().map(|s| s.content.len()).sum::<usize>();

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(rest));
    let before_len = last.content.len();
    if before_len > allowed {
        const MARKER: &str = "\n[truncated]";
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(MARKER.len()));
        last.content.truncate(keep);
        if allowed > MARKER.len() {
            last.content.push_str(MARKER);
        }
        debug!(
            section = %last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blueprint::Imports;
    use crate::test_support::spec;
    use crate::tree::{ItemKind, WorkTree};

    fn item_prompt() -> ItemPrompt {
        let tree = WorkTree::with_root(spec("Dashboard", ItemKind::Page)).expect("root");
        ItemPrompt::new(tree.root(), "App/Dashboard")
    }

    #[test]
    fn every_template_renders_its_contract_heading() {
        let builder = PromptBuilder::new(100_000);
        let item = item_prompt();
        let file = BlueprintFile {
            path: "src/components/Button.tsx".to_string(),
            summary: "A button".to_string(),
            exports: vec!["Button".to_string()],
            imports: Imports::default(),
        };
        let contract = PropContract::new(
            "Button",
            "src/components/Button.tsx",
            vec!["label".to_string()],
            Vec::new(),
        )
        .expect("contract");
        let diagnostic = crate::core::diagnostics::parse_diagnostics(
            "src/components/Button.tsx(1,1): error TS2304: Cannot find name 'x'.",
        )
        .remove(0);

        let rendered = [
            ("### Route Contract", builder.route(&item, "ctx")),
            ("### Plan Contract", builder.plan("a todo app")),
            ("### Split Contract", builder.split(&item, "ctx")),
            ("### Expound Contract", builder.expound(&item, "ctx")),
            ("### Finalize Contract", builder.finalize(&item, "ctx")),
            ("### Architect Contract", builder.architect("a todo app", &[])),
            (
                "### Unit Contract",
                builder.unit(&file, Some(&contract), &[], "- src/App.tsx", "spec"),
            ),
            (
                "### Fix Contract",
                builder.fix(&file, Some(&contract), &diagnostic, "export {}", ""),
            ),
        ];
        for (heading, prompt) in rendered {
            let prompt = prompt.expect("render");
            assert!(prompt.starts_with(heading), "{heading} missing:\n{prompt}");
            assert!(!prompt.contains("<!-- section:"));
        }
    }

    #[test]
    fn route_prompt_lists_the_three_tokens_and_item() {
        let prompt = PromptBuilder::new(100_000)
            .route(&item_prompt(), "")
            .expect("render");
        for token in ["needs-detail", "needs-split", "ready-to-finalize"] {
            assert!(prompt.contains(token));
        }
        assert!(prompt.contains("Branch: App/Dashboard"));
        assert!(!prompt.contains("### Project Context"), "empty context is omitted");
    }

    #[test]
    fn budget_drops_context_before_required_sections() {
        let prompt = PromptBuilder::new(1_200)
            .split(&item_prompt(), &"shared context ".repeat(200))
            .expect("render");
        assert!(!prompt.contains("### Project Context"));
        assert!(prompt.contains("### Split Contract"));
        assert!(prompt.contains("### Work Item"));
    }

    #[test]
    fn architect_feedback_lists_previous_issues() {
        let issues = vec!["import cycle: A.tsx -> B.tsx -> A.tsx".to_string()];
        let prompt = PromptBuilder::new(100_000)
            .architect("spec", &issues)
            .expect("render");
        assert!(prompt.contains("### Previous Attempt Issues"));
        assert!(prompt.contains("A.tsx -> B.tsx -> A.tsx"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![ParsedSection {
            key: "spec".to_string(),
            required: true,
            content: "é".repeat(100),
        }];
        apply_budget_to_sections(&mut sections, 41);
        assert!(sections[0].content.len() <= 41);
        assert!(sections[0].content.ends_with("[truncated]"));
    }
}
