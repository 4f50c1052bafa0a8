//! Unit agent: writes one blueprint file.

use crate::core::blueprint::BlueprintFile;
use crate::core::contract::PropContract;
use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::Result;
use crate::io::dispatcher::Generator;
use crate::io::prompt::PromptBuilder;

use super::generate_code;

#[derive(Debug, Clone)]
pub struct UnitAgent {
    prompts: PromptBuilder,
    profile: RequestProfile,
}

/// Everything the unit prompt needs besides the file itself.
#[derive(Debug, Clone, Copy)]
pub struct UnitContext<'a> {
    pub spec: &'a str,
    /// One line per blueprint file.
    pub outline: &'a str,
}

impl UnitAgent {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile) -> Self {
        Self { prompts, profile }
    }

    /// Generate the file content. Checking it is up to the caller.
    pub async fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        issues: &[String],
        ctx: UnitContext<'_>,
    ) -> Result<Generated<String>> {
        let prompt = self
            .prompts
            .unit(file, contract, issues, ctx.outline, ctx.spec)?;
        generate_code(generator, &prompt, &self.profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blueprint::Imports;
    use crate::test_support::{ScriptedGenerator, test_profile};

    #[tokio::test]
    async fn unit_prompt_carries_exports_contract_and_issues() {
        let generator = ScriptedGenerator::queued(["```tsx\nexport const Button = () => null;\n```"]);
        let agent = UnitAgent::new(PromptBuilder::new(20_000), test_profile());
        let file = BlueprintFile {
            path: "src/components/Button.tsx".to_string(),
            summary: "Primary button".to_string(),
            exports: vec!["Button".to_string(), "ButtonProps".to_string()],
            imports: Imports {
                external: vec!["react".to_string()],
                local: Vec::new(),
            },
        };
        let contract = PropContract::new(
            "Button",
            "src/components/Button.tsx",
            vec!["label".to_string()],
            vec!["onClick".to_string()],
        )
        .expect("contract");
        let issues = vec!["missing required field 'label'".to_string()];

        let got = agent
            .run(
                &generator,
                &file,
                Some(&contract),
                &issues,
                UnitContext {
                    spec: "button demo",
                    outline: "- src/components/Button.tsx",
                },
            )
            .await
            .expect("unit");
        assert_eq!(got.value, "export const Button = () => null;");

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("Button, ButtonProps"));
        assert!(prompt.contains("interface ButtonProps"));
        assert!(prompt.contains("missing required field 'label'"));
    }
}
