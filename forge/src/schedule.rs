//! Breadth-first, level-synchronous expansion of the decomposition tree.
//!
//! Each round processes the whole frontier concurrently (bounded by
//! `max_concurrency`). Tasks only see clones of their items; children and
//! expanded descriptions are folded into the arena after the round drains, and
//! the new children form the next frontier.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::expounder::ExpounderAgent;
use crate::agents::finalizer::FinalizerAgent;
use crate::agents::router::RouterAgent;
use crate::agents::splitter::SplitterAgent;
use crate::core::classifier::Route;
use crate::core::path::branch_path;
use crate::core::provider::RequestProfile;
use crate::core::types::TokenUsage;
use crate::error::Result;
use crate::io::dispatcher::{Generator, UsageMeter};
use crate::io::prompt::{ItemPrompt, PromptBuilder};
use crate::io::sink::FileSink;
use crate::tree::{ItemId, ItemSpec, WorkItem, WorkTree};

/// The four per-item agents, sharing one prompt builder and profile.
#[derive(Debug, Clone)]
pub struct Pipeline {
    router: RouterAgent,
    splitter: SplitterAgent,
    expounder: ExpounderAgent,
    finalizer: FinalizerAgent,
}

impl Pipeline {
    pub fn new(prompts: PromptBuilder, profile: RequestProfile, routing_max_output_tokens: u32) -> Self {
        Self {
            router: RouterAgent::new(
                prompts.clone(),
                profile.with_max_output_tokens(routing_max_output_tokens),
            ),
            splitter: SplitterAgent::new(prompts.clone(), profile.clone()),
            expounder: ExpounderAgent::new(prompts.clone(), profile.clone()),
            finalizer: FinalizerAgent::new(prompts, profile),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Items at this depth or deeper are finalized without routing.
    pub max_depth: u32,
    pub max_concurrency: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
    pub id: ItemId,
    pub path: String,
}

/// A branch that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchFailure {
    pub id: ItemId,
    pub name: String,
    pub branch: String,
    pub path: Option<String>,
    pub error: String,
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub round: u32,
    pub frontier: usize,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct DecomposeReport {
    pub tree: WorkTree,
    pub rounds: Vec<RoundSummary>,
    pub written: Vec<WrittenFile>,
    pub failures: Vec<BranchFailure>,
    /// Set when a run-fatal error stopped the run after its round drained.
    pub aborted: Option<String>,
}

impl DecomposeReport {
    pub fn usage(&self) -> TokenUsage {
        self.rounds.iter().map(|round| round.usage).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }
}

enum Treatment {
    Finalized { path: String },
    Split { children: Vec<ItemSpec> },
}

struct ItemOutcome {
    id: ItemId,
    name: String,
    branch: String,
    path: Option<String>,
    expanded: Option<String>,
    usage: TokenUsage,
    result: Result<Treatment>,
}

pub struct Scheduler<'a, G: ?Sized, S: ?Sized> {
    generator: &'a G,
    sink: &'a S,
    pipeline: Pipeline,
    limits: SchedulerLimits,
}

impl<'a, G, S> Scheduler<'a, G, S>
where
    G: Generator + ?Sized,
    S: FileSink + ?Sized,
{
    pub fn new(generator: &'a G, sink: &'a S, pipeline: Pipeline, limits: SchedulerLimits) -> Self {
        Self {
            generator,
            sink,
            pipeline,
            limits,
        }
    }

    /// Expand `tree` from its root until no pending items remain.
    #[instrument(skip_all, fields(root = %tree.root().name))]
    pub async fn run(&self, mut tree: WorkTree, summary: &str) -> DecomposeReport {
        let mut frontier = vec![tree.root_id()];
        let mut rounds = Vec::new();
        let mut written = Vec::new();
        let mut failures = Vec::new();
        let mut aborted = None;
        let mut round = 0u32;

        while !frontier.is_empty() {
            round += 1;
            info!(round, frontier = frontier.len(), "starting round");

            let tasks: Vec<(WorkItem, String)> = frontier
                .iter()
                .filter_map(|id| {
                    let item = tree.get(*id)?.clone();
                    let branch = branch_path(&tree, *id)?;
                    Some((item, branch))
                })
                .collect();
            let mut outcomes: Vec<ItemOutcome> = stream::iter(tasks)
                .map(|(item, branch)| self.process(item, branch, summary))
                .buffer_unordered(self.limits.max_concurrency.max(1))
                .collect()
                .await;
            outcomes.sort_by_key(|outcome| outcome.id);

            let frontier_len = frontier.len();
            let mut round_usage = TokenUsage::default();
            let mut next = Vec::new();
            for outcome in outcomes {
                round_usage += outcome.usage;
                if let Some(description) = outcome.expanded
                    && let Err(err) = tree.set_description(outcome.id, description)
                {
                    warn!(id = %outcome.id, err = %err, "could not apply expanded description");
                }

                let err = match outcome.result {
                    Ok(Treatment::Finalized { path }) => {
                        written.push(WrittenFile {
                            id: outcome.id,
                            path,
                        });
                        continue;
                    }
                    Ok(Treatment::Split { children }) => match tree.add_children(outcome.id, children) {
                        Ok(ids) => {
                            next.extend(ids);
                            continue;
                        }
                        Err(err) => err,
                    },
                    Err(err) => err,
                };

                let fatal = err.is_run_fatal();
                warn!(branch = %outcome.branch, err = %err, fatal, "branch failed");
                if fatal && aborted.is_none() {
                    aborted = Some(format!("{}: {err}", outcome.branch));
                }
                failures.push(BranchFailure {
                    id: outcome.id,
                    name: outcome.name,
                    branch: outcome.branch,
                    path: outcome.path,
                    error: err.to_string(),
                    fatal,
                });
            }

            info!(
                round,
                children = next.len(),
                tokens = round_usage.total_tokens(),
                "round complete"
            );
            rounds.push(RoundSummary {
                round,
                frontier: frontier_len,
                usage: round_usage,
            });
            if aborted.is_some() {
                warn!(round, "aborting run after fatal error");
                break;
            }
            frontier = next;
        }

        DecomposeReport {
            tree,
            rounds,
            written,
            failures,
            aborted,
        }
    }

    async fn process(&self, item: WorkItem, branch: String, summary: &str) -> ItemOutcome {
        let mut prompt_item = ItemPrompt::new(&item, branch.clone());
        let meter = UsageMeter::new(self.generator);
        let mut expanded = None;
        let result = self
            .treat(&meter, &item, &mut prompt_item, summary, &mut expanded)
            .await;
        ItemOutcome {
            id: item.id,
            name: item.name,
            branch,
            path: item.path,
            expanded,
            usage: meter.usage(),
            result,
        }
    }

    async fn treat(
        &self,
        generator: &UsageMeter<'_, G>,
        item: &WorkItem,
        prompt_item: &mut ItemPrompt,
        summary: &str,
        expanded: &mut Option<String>,
    ) -> Result<Treatment> {
        if item.depth >= self.limits.max_depth {
            info!(branch = %prompt_item.branch, depth = item.depth, "depth limit reached, finalizing");
            return self.finalize(generator, prompt_item, summary).await;
        }

        let route = self.pipeline.router.run(generator, prompt_item, summary).await?;

        match route.value {
            Route::ReadyToFinalize => return self.finalize(generator, prompt_item, summary).await,
            Route::NeedsSplit => {}
            Route::NeedsDetail => match self.pipeline.expounder.run(generator, prompt_item, summary).await {
                Ok(detail) => {
                    prompt_item.description = detail.value.clone();
                    *expanded = Some(detail.value);
                }
                Err(err) if err.is_recoverable_validation() => {
                    warn!(branch = %prompt_item.branch, err = %err, "expound rejected, finalizing as leaf");
                    return self.finalize(generator, prompt_item, summary).await;
                }
                Err(err) => return Err(err),
            },
        }

        match self.pipeline.splitter.run(generator, prompt_item, summary).await {
            Ok(split) => Ok(Treatment::Split {
                children: split.value,
            }),
            Err(err) if err.is_recoverable_validation() => {
                warn!(branch = %prompt_item.branch, err = %err, "split rejected, finalizing as leaf");
                self.finalize(generator, prompt_item, summary).await
            }
            Err(err) => Err(err),
        }
    }

    async fn finalize(
        &self,
        generator: &UsageMeter<'_, G>,
        prompt_item: &ItemPrompt,
        summary: &str,
    ) -> Result<Treatment> {
        let written = self
            .pipeline
            .finalizer
            .run(generator, self.sink, prompt_item, summary)
            .await?;
        Ok(Treatment::Finalized {
            path: written.value,
        })
    }
}
