//! Whole-project mode: blueprint, concurrent units, then build repair.
//!
//! The architect is re-prompted with graph problems until the blueprint is
//! clean or the attempts run out; a blueprint that is still broken is carried
//! forward with its validation flags set. Each unit is checked against its
//! blueprint entry and prop contract and re-prompted with the issues found.
//! Units are written even when issues remain.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::architect::{ArchitectAgent, ProjectDesign};
use crate::agents::fixer::FixerAgent;
use crate::agents::unit::{UnitAgent, UnitContext};
use crate::core::blueprint::{
    Blueprint, BlueprintFile, BlueprintValidation, GraphReport, check_unit_shape, validate_blueprint,
};
use crate::core::contract::{PropContract, validate_contract};
use crate::core::provider::RequestProfile;
use crate::core::types::TokenUsage;
use crate::error::{ForgeError, Result};
use crate::io::build::BuildService;
use crate::io::config::ForgeConfig;
use crate::io::dispatcher::{Generator, UsageMeter};
use crate::io::prompt::PromptBuilder;
use crate::io::sink::FileSink;
use crate::repair::{RepairLoop, RepairReport, outline};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub path: String,
    pub attempts: u32,
    /// Problems left in the written content.
    pub issues: Vec<String>,
    /// Set when no content could be generated at all.
    pub error: Option<String>,
}

impl UnitReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ProjectReport {
    pub blueprint: Blueprint,
    pub contracts: Vec<PropContract>,
    pub graph: GraphReport,
    pub blueprint_attempts: u32,
    pub units: Vec<UnitReport>,
    /// `None` when the build step was skipped.
    pub repair: Option<RepairReport>,
    pub usage: TokenUsage,
    /// Set when a run-fatal error stopped unit generation.
    pub aborted: Option<String>,
}

impl ProjectReport {
    pub fn flags(&self) -> BlueprintValidation {
        self.graph.flags()
    }

    pub fn is_clean(&self) -> bool {
        self.aborted.is_none()
            && self.flags().is_clean()
            && self.units.iter().all(UnitReport::is_clean)
            && self
                .repair
                .as_ref()
                .is_none_or(|report| report.status.succeeded())
    }
}

struct UnitOutcome {
    report: UnitReport,
    usage: TokenUsage,
    fatal: Option<String>,
}

pub struct ProjectBuilder<'a, G: ?Sized, S: ?Sized> {
    generator: &'a G,
    sink: &'a S,
    architect: ArchitectAgent,
    unit: UnitAgent,
    fixer: FixerAgent,
    config: &'a ForgeConfig,
}

impl<'a, G, S> ProjectBuilder<'a, G, S>
where
    G: Generator + ?Sized,
    S: FileSink + ?Sized,
{
    pub fn new(generator: &'a G, sink: &'a S, profile: RequestProfile, config: &'a ForgeConfig) -> Self {
        let prompts = PromptBuilder::new(config.schedule.prompt_budget_bytes);
        Self {
            generator,
            sink,
            architect: ArchitectAgent::new(prompts.clone(), profile.clone()),
            unit: UnitAgent::new(prompts.clone(), profile.clone()),
            fixer: FixerAgent::new(prompts, profile),
            config,
        }
    }

    /// Design, write and (when `build` is given) repair the project for `spec`.
    #[instrument(skip_all)]
    pub async fn run<B: BuildService + ?Sized>(&self, spec: &str, build: Option<&B>) -> Result<ProjectReport> {
        let (design, graph, blueprint_attempts, mut usage) = self.design(spec).await?;
        let ProjectDesign {
            blueprint,
            contracts,
        } = design;
        let outline = outline(&blueprint);

        let outcomes: Vec<UnitOutcome> = stream::iter(blueprint.files())
            .map(|file| {
                let contract = contracts.iter().find(|c| c.path() == file.path);
                self.write_unit(&blueprint, file, contract, UnitContext {
                    spec,
                    outline: &outline,
                })
            })
            .buffer_unordered(self.config.schedule.max_concurrency.max(1))
            .collect()
            .await;

        let mut units = Vec::with_capacity(outcomes.len());
        let mut aborted = None;
        for outcome in outcomes {
            usage += outcome.usage;
            if aborted.is_none() {
                aborted = outcome.fatal;
            }
            units.push(outcome.report);
        }
        units.sort_by(|a, b| a.path.cmp(&b.path));

        let repair = match (build, &aborted) {
            (Some(build), None) => {
                let report = RepairLoop::new(
                    self.generator,
                    self.sink,
                    build,
                    self.fixer.clone(),
                    self.config.repair.max_rounds,
                    self.config.schedule.max_concurrency,
                )
                .run(&blueprint, &contracts)
                .await?;
                usage += report.usage;
                Some(report)
            }
            _ => None,
        };

        info!(
            files = units.len(),
            clean_units = units.iter().filter(|unit| unit.is_clean()).count(),
            total_tokens = usage.total_tokens(),
            "project finished"
        );
        Ok(ProjectReport {
            blueprint,
            contracts,
            graph,
            blueprint_attempts,
            units,
            repair,
            usage,
            aborted,
        })
    }

    /// Ask the architect until the graph is clean or attempts run out.
    async fn design(&self, spec: &str) -> Result<(ProjectDesign, GraphReport, u32, TokenUsage)> {
        let attempts = self.config.project.blueprint_attempts.max(1);
        let meter = UsageMeter::new(self.generator);
        let mut issues: Vec<String> = Vec::new();
        let mut best: Option<(ProjectDesign, GraphReport)> = None;

        for attempt in 1..=attempts {
            let design = match self.architect.run(&meter, spec, &issues).await {
                Ok(design) => design,
                Err(err @ (ForgeError::Validation(_) | ForgeError::MalformedResponse(_)))
                    if attempt < attempts =>
                {
                    warn!(attempt, err = %err, "blueprint rejected");
                    issues = vec![err.to_string()];
                    continue;
                }
                Err(err) if best.is_some() && !err.is_run_fatal() => {
                    warn!(attempt, err = %err, "keeping previous blueprint");
                    break;
                }
                Err(err) => return Err(err),
            };
            let ProjectDesign {
                blueprint,
                contracts,
            } = design.value;
            let (blueprint, graph) = validate_blueprint(blueprint);
            let design = ProjectDesign {
                blueprint,
                contracts,
            };
            if graph.flags().is_clean() {
                info!(attempt, files = design.blueprint.files().len(), "blueprint accepted");
                return Ok((design, graph, attempt, meter.usage()));
            }
            warn!(attempt, issues = graph.issues().len(), "blueprint graph has problems");
            issues = graph.issues();
            best = Some((design, graph));
        }

        match best {
            Some((design, graph)) => Ok((design, graph, attempts, meter.usage())),
            None => Err(ForgeError::Validation("architect produced no usable blueprint".to_string())),
        }
    }

    async fn write_unit(
        &self,
        blueprint: &Blueprint,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        ctx: UnitContext<'_>,
    ) -> UnitOutcome {
        let known = blueprint.known_paths();
        let attempts = self.config.project.unit_attempts.max(1);
        let meter = UsageMeter::new(self.generator);
        let mut issues: Vec<String> = Vec::new();
        let mut content: Option<String> = None;
        let mut made = 0;
        let mut failure: Option<ForgeError> = None;

        for attempt in 1..=attempts {
            made = attempt;
            let generated = match self.unit.run(&meter, file, contract, &issues, ctx).await {
                Ok(generated) => generated,
                Err(err) => {
                    warn!(path = %file.path, attempt, err = %err, "unit generation failed");
                    let stop = err.is_run_fatal();
                    failure = Some(err);
                    if stop {
                        break;
                    }
                    continue;
                }
            };
            failure = None;
            issues = check_unit_shape(file, &generated.value, &known);
            if let Some(contract) = contract {
                issues.extend(validate_contract(&generated.value, contract).issues);
            }
            content = Some(generated.value);
            if issues.is_empty() {
                break;
            }
            warn!(path = %file.path, attempt, issues = issues.len(), "unit has issues");
        }

        let mut report = UnitReport {
            path: file.path.clone(),
            attempts: made,
            issues,
            error: None,
        };
        let mut fatal = None;
        match content {
            Some(content) => {
                if let Err(err) = self.sink.write(&file.path, &content).await {
                    warn!(path = %file.path, err = %err, "unit write failed");
                    report.error = Some(err.to_string());
                }
            }
            None => {
                let err = failure
                    .unwrap_or_else(|| ForgeError::MalformedResponse("no unit content".to_string()));
                if err.is_run_fatal() {
                    fatal = Some(err.to_string());
                }
                report.error = Some(err.to_string());
            }
        }
        UnitOutcome {
            report,
            usage: meter.usage(),
            fatal,
        }
    }
}
