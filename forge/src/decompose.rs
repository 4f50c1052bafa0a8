//! Recursive decomposition mode: plan the root item, then expand it breadth-first.

use tracing::{info, instrument};

use crate::agents::planner::PlannerAgent;
use crate::core::provider::RequestProfile;
use crate::core::types::TokenUsage;
use crate::error::Result;
use crate::io::config::ForgeConfig;
use crate::io::dispatcher::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::sink::FileSink;
use crate::schedule::{DecomposeReport, Pipeline, Scheduler, SchedulerLimits};
use crate::tree::WorkTree;

#[derive(Debug, Clone)]
pub struct DecomposeOutcome {
    /// Project context produced by the planner and shared by every prompt.
    pub summary: String,
    pub plan_usage: TokenUsage,
    pub report: DecomposeReport,
}

impl DecomposeOutcome {
    pub fn usage(&self) -> TokenUsage {
        self.plan_usage + self.report.usage()
    }
}

/// Plan `spec` and expand the resulting root until every leaf is written.
///
/// A failed plan is returned as an error since there is no tree to isolate it
/// in. Failures after that are recorded per branch in the report.
#[instrument(skip_all)]
pub async fn decompose<G, S>(
    generator: &G,
    sink: &S,
    profile: RequestProfile,
    config: &ForgeConfig,
    spec: &str,
) -> Result<DecomposeOutcome>
where
    G: Generator + ?Sized,
    S: FileSink + ?Sized,
{
    let prompts = PromptBuilder::new(config.schedule.prompt_budget_bytes);
    let plan = PlannerAgent::new(prompts.clone(), profile.clone())
        .run(generator, spec)
        .await?;
    let plan_usage = plan.usage;
    let summary = plan.value.summary;
    let tree = WorkTree::with_root(plan.value.root)?;
    info!(root = %tree.root().name, "plan accepted");

    let pipeline = Pipeline::new(prompts, profile, config.generation.routing_max_output_tokens);
    let limits = SchedulerLimits {
        max_depth: config.schedule.max_depth,
        max_concurrency: config.schedule.max_concurrency,
    };
    let report = Scheduler::new(generator, sink, pipeline, limits)
        .run(tree, &summary)
        .await;
    info!(
        written = report.written.len(),
        failures = report.failures.len(),
        total_tokens = report.usage().total_tokens(),
        "decomposition finished"
    );

    Ok(DecomposeOutcome {
        summary,
        plan_usage,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::test_support::{MemorySink, ScriptedGenerator, test_profile};

    const PLAN: &str = r#"{"summary": "todo app", "root": {"name": "App", "kind": "page", "description": "Todo list page"}}"#;

    #[tokio::test]
    async fn plan_then_finalize_single_root() {
        let generator = ScriptedGenerator::from_fn(|prompt| {
            if prompt.starts_with("### Plan Contract") {
                Ok(PLAN.to_string())
            } else if prompt.starts_with("### Route Contract") {
                Ok("ready-to-finalize".to_string())
            } else {
                Ok("export default function App() { return null; }".to_string())
            }
        });
        let sink = MemorySink::default();
        let outcome = decompose(&generator, &sink, test_profile(), &ForgeConfig::default(), "todo app")
            .await
            .expect("decompose");

        assert_eq!(outcome.summary, "todo app");
        assert!(outcome.report.is_clean());
        assert_eq!(outcome.report.written.len(), 1);
        assert_eq!(outcome.usage().total_tokens(), 6, "plan, route, finalize");
        assert!(sink.get("src/pages/App.tsx").is_some());
    }

    #[tokio::test]
    async fn invalid_plan_is_an_error() {
        let generator = ScriptedGenerator::queued([r#"{"summary": "x"}"#]);
        let sink = MemorySink::default();
        let err = decompose(&generator, &sink, test_profile(), &ForgeConfig::default(), "spec")
            .await
            .expect_err("plan without root");
        assert!(matches!(err, ForgeError::Validation(_)));
        assert_eq!(sink.write_count(), 0);
    }
}
