//! Architect agent: designs the whole-project file graph and prop contracts.

use serde::Deserialize;

use crate::core::blueprint::{Blueprint, BlueprintFile};
use crate::core::contract::PropContract;
use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::{ForgeError, Result};
use crate::io::dispatcher::Generator;
use crate::io::prompt::PromptBuilder;

use super::generate_record;

const BLUEPRINT_OUTPUT_SCHEMA: &str = include_str!("../../schemas/blueprint_output.schema.json");

#[derive(Debug, Deserialize)]
struct ArchitectOutput {
    files: Vec<BlueprintFile>,
    #[serde(default)]
    contracts: Vec<PropContract>,
}

/// Unvalidated project design as proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDesign {
    pub blueprint: Blueprint,
    pub contracts: Vec<PropContract>,
}

impl ProjectDesign {
    pub fn contract_for(&self, path: &str) -> Option<&PropContract> {
        self.contracts.iter().find(|contract| contract.path() == path)
    }
}

#[derive(Debug, Clone)]
pub struct ArchitectAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl ArchitectAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    /// `issues` lists problems of a previous attempt, empty on the first call.
    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        spec: &str,
        issues: &[String],
    ) -> Result<Generated<ProjectDesign>> {
        let prompt = self.prompts.architect(spec, issues)?;
        let output: Generated<ArchitectOutput> =
            generate_record(generator, &prompt, &self.profile, BLUEPRINT_OUTPUT_SCHEMA).await?;
        let usage = output.usage;
        let ArchitectOutput { files, contracts } = output.value;

        let blueprint = Blueprint::new(files)?;
        let known = blueprint.known_paths();
        if let Some(orphan) = contracts.iter().find(|c| !known.contains(c.path())) {
            return Err(ForgeError::Validation(format!(
                "contract for {} targets undeclared file {}",
                orphan.unit_name(),
                orphan.path()
            )));
        }

        Ok(Generated {
            value: ProjectDesign {
                blueprint,
                contracts,
            },
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, test_profile};

    const DESIGN: &str = r#"{
        "files": [
            {"path": "src/App.tsx", "summary": "shell", "exports": ["App"],
             "imports": {"external": ["react"], "local": ["./components/Button"]}},
            {"path": "src/components/Button.tsx", "summary": "button", "exports": ["Button"],
             "imports": {"external": ["react"], "local": []}}
        ],
        "contracts": [
            {"unitName": "Button", "path": "src/components/Button.tsx",
             "required": ["label"], "optional": ["onClick"]}
        ]
    }"#;

    #[tokio::test]
    async fn architect_returns_blueprint_and_contracts() {
        let generator = ScriptedGenerator::queued([DESIGN]);
        let agent = ArchitectAgent::new(PromptBuilder::new(20_000), test_profile());
        let got = agent.run(&generator, "a button app", &[]).await.expect("design");
        assert_eq!(got.value.blueprint.files().len(), 2);
        assert_eq!(got.value.blueprint.validation(), None, "validation is computed later");
        let contract = got
            .value
            .contract_for("src/components/Button.tsx")
            .expect("contract");
        assert_eq!(contract.required(), ["label".to_string()]);
    }

    #[tokio::test]
    async fn overlapping_contract_fields_are_a_validation_error() {
        let reply = DESIGN.replace(r#""optional": ["onClick"]"#, r#""optional": ["label"]"#);
        let generator = ScriptedGenerator::queued([reply]);
        let agent = ArchitectAgent::new(PromptBuilder::new(20_000), test_profile());
        let err = agent.run(&generator, "spec", &[]).await.expect_err("overlap");
        assert!(err.is_recoverable_validation());
    }

    #[tokio::test]
    async fn contract_for_unknown_file_is_rejected() {
        let reply = DESIGN.replace(
            r#""unitName": "Button", "path": "src/components/Button.tsx""#,
            r#""unitName": "Button", "path": "src/components/Missing.tsx""#,
        );
        let generator = ScriptedGenerator::queued([reply]);
        let agent = ArchitectAgent::new(PromptBuilder::new(20_000), test_profile());
        let err = agent.run(&generator, "spec", &[]).await.expect_err("orphan");
        assert!(err.to_string().contains("undeclared file"));
    }
}
