//! Expounder agent: rewrites a vague description with more detail.

use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::{ForgeError, Result};
use crate::io::dispatcher::Generator;
use crate::io::prompt::{ItemPrompt, PromptBuilder};
use crate::tree::ItemSpec;

use super::generate_record;

const ITEM_SCHEMA: &str = include_str!("../../schemas/item.schema.json");

#[derive(Debug, Clone)]
pub struct ExpounderAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl ExpounderAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    /// Returns the expanded description. Name and kind must come back unchanged
    /// and the description must grow.
    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        item: &ItemPrompt,
        summary: &str,
    ) -> Result<Generated<String>> {
        let prompt = self.prompts.expound(item, summary)?;
        let output: Generated<ItemSpec> =
            generate_record(generator, &prompt, &self.profile, ITEM_SCHEMA).await?;
        let expanded = &output.value;
        expanded.validate()?;

        if expanded.name.trim() != item.name || expanded.kind.as_str() != item.kind {
            return Err(ForgeError::Validation(format!(
                "expound changed '{}' ({}) into '{}' ({})",
                item.name,
                item.kind,
                expanded.name.trim(),
                expanded.kind.as_str()
            )));
        }
        let before = item.description.trim().chars().count();
        let after = expanded.description.trim().chars().count();
        if after <= before {
            return Err(ForgeError::Validation(format!(
                "expound of '{}' did not add detail ({after} <= {before} chars)",
                item.name
            )));
        }

        Ok(output.map(|spec| spec.description.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, item_prompt, test_profile};

    fn agent() -> ExpounderAgent {
        ExpounderAgent::new(PromptBuilder::new(10_000), test_profile())
    }

    #[tokio::test]
    async fn longer_description_is_accepted() {
        let generator = ScriptedGenerator::queued([r#"{
            "name": "Dashboard", "kind": "page",
            "description": "Dashboard page with a stats grid, a recent activity feed and a date range picker"
        }"#]);
        let got = agent()
            .run(&generator, &item_prompt("Dashboard"), "")
            .await
            .expect("expound");
        assert!(got.value.starts_with("Dashboard page with a stats grid"));
    }

    #[tokio::test]
    async fn kind_change_is_rejected() {
        let generator = ScriptedGenerator::queued([r#"{
            "name": "Dashboard", "kind": "component",
            "description": "A much longer description of the dashboard component"
        }"#]);
        let err = agent()
            .run(&generator, &item_prompt("Dashboard"), "")
            .await
            .expect_err("kind");
        assert!(err.is_recoverable_validation());
    }

    #[tokio::test]
    async fn description_must_grow() {
        let generator =
            ScriptedGenerator::queued([r#"{"name": "Dashboard", "kind": "page", "description": "Dash"}"#]);
        let err = agent()
            .run(&generator, &item_prompt("Dashboard"), "")
            .await
            .expect_err("shorter");
        assert!(err.to_string().contains("did not add detail"));
    }
}
