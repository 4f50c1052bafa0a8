//! Finalizer agent: generates a leaf's source file and writes it.

use tracing::info;

use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::{ForgeError, Result};
use crate::io::dispatcher::Generator;
use crate::io::prompt::{ItemPrompt, PromptBuilder};
use crate::io::sink::FileSink;

use super::generate_code;

#[derive(Debug, Clone)]
pub struct FinalizerAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl FinalizerAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    /// Generate the item's file and write it through `sink`. Returns the written path.
    pub async fn run<G, S>(
        &self,
        generator: &G,
        sink: &S,
        item: &ItemPrompt,
        summary: &str,
    ) -> Result<Generated<String>>
    where
        G: Generator + ?Sized,
        S: FileSink + ?Sized,
    {
        if item.path.is_empty() {
            return Err(ForgeError::Validation(format!(
                "item '{}' has no output path",
                item.name
            )));
        }
        let prompt = self.prompts.finalize(item, summary)?;
        let code = generate_code(generator, &prompt, &self.profile).await?;
        sink.write(&item.path, &code.value).await?;
        info!(branch = %item.branch, path = %item.path, bytes = code.value.len(), "finalized item");
        Ok(code.map(|_| item.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemorySink, ScriptedGenerator, item_prompt, test_profile};

    #[tokio::test]
    async fn finalizer_strips_fence_and_writes() {
        let generator = ScriptedGenerator::queued([
            "```tsx\nexport default function Dashboard() { return null; }\n```",
        ]);
        let sink = MemorySink::default();
        let agent = FinalizerAgent::new(PromptBuilder::new(10_000), test_profile());
        let item = item_prompt("Dashboard");

        let got = agent.run(&generator, &sink, &item, "").await.expect("finalize");
        assert_eq!(got.value, "src/pages/Dashboard.tsx");
        assert_eq!(
            sink.get("src/pages/Dashboard.tsx").as_deref(),
            Some("export default function Dashboard() { return null; }")
        );
        assert!(generator.prompts()[0].contains("Finalize Contract"));
    }

    #[tokio::test]
    async fn second_finalize_of_same_path_collides() {
        let generator = ScriptedGenerator::queued(["export {};", "export {};"]);
        let sink = MemorySink::default();
        let agent = FinalizerAgent::new(PromptBuilder::new(10_000), test_profile());
        let item = item_prompt("Dashboard");

        agent.run(&generator, &sink, &item, "").await.expect("first");
        let err = agent.run(&generator, &sink, &item, "").await.expect_err("second");
        assert!(matches!(err, ForgeError::PathCollision { .. }));
        assert_eq!(sink.write_count(), 1);
    }
}
