//! Splitter agent: breaks a work item into child items.

use serde::Deserialize;

use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::{ForgeError, Result};
use crate::io::dispatcher::Generator;
use crate::io::prompt::{ItemPrompt, PromptBuilder};
use crate::tree::ItemSpec;

use super::generate_record;

const SPLIT_OUTPUT_SCHEMA: &str = include_str!("../../schemas/split_output.schema.json");

#[derive(Debug, Deserialize)]
struct SplitOutput {
    #[serde(alias = "parts")]
    children: Vec<ItemSpec>,
}

#[derive(Debug, Clone)]
pub struct SplitterAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl SplitterAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    /// Fails with a recoverable `Validation` error when no children come back.
    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        item: &ItemPrompt,
        summary: &str,
    ) -> Result<Generated<Vec<ItemSpec>>> {
        let prompt = self.prompts.split(item, summary)?;
        let output: Generated<SplitOutput> =
            generate_record(generator, &prompt, &self.profile, SPLIT_OUTPUT_SCHEMA).await?;
        if output.value.children.is_empty() {
            return Err(ForgeError::Validation(format!(
                "split of '{}' produced no children",
                item.name
            )));
        }
        for child in &output.value.children {
            child.validate()?;
        }
        Ok(output.map(|out| out.children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, item_prompt, test_profile};

    fn agent() -> SplitterAgent {
        SplitterAgent::new(PromptBuilder::new(10_000), test_profile())
    }

    #[tokio::test]
    async fn splitter_accepts_children_and_parts() {
        for key in ["children", "parts"] {
            let reply = format!(
                r#"{{"{key}": [
                    {{"name": "Login", "kind": "page", "description": "Login form page"}},
                    {{"name": "Nav", "kind": "component", "description": "Top navigation"}}
                ]}}"#
            );
            let generator = ScriptedGenerator::queued([reply]);
            let got = agent()
                .run(&generator, &item_prompt("App"), "ctx")
                .await
                .expect("split");
            assert_eq!(got.value.len(), 2);
            assert_eq!(got.value[1].name, "Nav");
        }
    }

    #[tokio::test]
    async fn zero_children_is_recoverable() {
        let generator = ScriptedGenerator::queued([r#"{"children": []}"#]);
        let err = agent()
            .run(&generator, &item_prompt("App"), "ctx")
            .await
            .expect_err("empty");
        assert!(err.is_recoverable_validation());
        assert!(err.to_string().contains("no children"));
    }

    #[tokio::test]
    async fn child_with_blank_description_is_rejected() {
        let generator = ScriptedGenerator::queued([
            r#"{"children": [{"name": "Nav", "kind": "component", "description": "   "}]}"#,
        ]);
        let err = agent()
            .run(&generator, &item_prompt("App"), "ctx")
            .await
            .expect_err("blank");
        assert!(err.is_recoverable_validation());
    }
}
