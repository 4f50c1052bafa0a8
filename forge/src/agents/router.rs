//! Router agent: picks the next treatment for a work item.

use tracing::debug;

use crate::core::classifier::{Route, classify_route_reply};
use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::Result;
use crate::io::dispatcher::Generator;
use crate::io::prompt::{ItemPrompt, PromptBuilder};

#[derive(Debug, Clone)]
pub struct RouterAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

impl RouterAgent {
    /// `profile` is usually the main profile with a small output ceiling.
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        item: &ItemPrompt,
        summary: &str,
    ) -> Result<Generated<Route>> {
        let prompt = self.prompts.route(item, summary)?;
        let reply = generator.generate(&prompt, &self.profile).await?;
        let route = classify_route_reply(&reply.text)?;
        debug!(branch = %item.branch, route = route.token(), "routed item");
        Ok(Generated {
            value: route,
            usage: reply.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::test_support::{ScriptedGenerator, item_prompt, test_profile};

    fn agent() -> RouterAgent {
        RouterAgent::new(PromptBuilder::new(10_000), test_profile())
    }

    #[tokio::test]
    async fn router_classifies_reply() {
        let generator = ScriptedGenerator::queued([" Needs-Split \n"]);
        let got = agent()
            .run(&generator, &item_prompt("Dashboard"), "ctx")
            .await
            .expect("route");
        assert_eq!(got.value, Route::NeedsSplit);

        let prompts = generator.prompts();
        assert!(prompts[0].contains("Route Contract"));
        assert!(prompts[0].contains("Name: Dashboard"));
    }

    #[tokio::test]
    async fn router_surfaces_contract_violations() {
        let generator = ScriptedGenerator::queued(["I think it needs a split"]);
        let err = agent()
            .run(&generator, &item_prompt("Dashboard"), "")
            .await
            .expect_err("violation");
        assert!(matches!(err, ForgeError::RoutingContractViolation { .. }));
        assert_eq!(generator.prompts().len(), 1, "violations are not retried");
    }
}
