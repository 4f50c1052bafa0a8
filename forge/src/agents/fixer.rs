//! Fixer agent: patches one file for one build diagnostic.

use crate::core::blueprint::BlueprintFile;
use crate::core::contract::PropContract;
use crate::core::diagnostics::BuildDiagnostic;
use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::Result;
use crate::io::dispatcher::Generator;
use crate::io::prompt::PromptBuilder;

use super::generate_code;

#[derive(Debug, Clone)]
pub struct FixerAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl FixerAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        diagnostic: &BuildDiagnostic,
        content: &str,
        outline: &str,
    ) -> Result<Generated<String>> {
        let prompt = self
            .prompts
            .fix(file, contract, diagnostic, content, outline)?;
        generate_code(generator, &prompt, &self.profile).await
    }
}
