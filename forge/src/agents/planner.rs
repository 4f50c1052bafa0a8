//! Planner agent: turns the free-text spec into the root work item.

use serde::Deserialize;

use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::{ForgeError, Result};
use crate::io::dispatcher::Generator;
use crate::io::prompt::PromptBuilder;
use crate::tree::ItemSpec;

use super::generate_record;

const PLAN_OUTPUT_SCHEMA: &str = include_str!("../../schemas/plan_output.schema.json");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanOutput {
    /// Shared project context passed to every later prompt.
    pub summary: String,
    pub root: ItemSpec,
}

#[derive(Debug, Clone)]
pub struct PlannerAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl PlannerAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        spec: &str,
    ) -> Result<Generated<PlanOutput>> {
        if spec.trim().is_empty() {
            return Err(ForgeError::Validation("specification is empty".to_string()));
        }
        let prompt = self.prompts.plan(spec)?;
        let output: Generated<PlanOutput> =
            generate_record(generator, &prompt, &self.profile, PLAN_OUTPUT_SCHEMA).await?;
        output.value.root.validate()?;
        if output.value.summary.trim().is_empty() {
            return Err(ForgeError::Validation("plan summary is empty".to_string()));
        }
        Ok(output)
    }
}
