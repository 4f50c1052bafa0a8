//! Iterative build repair.
//!
//! Each round runs the build, parses its diagnostics and asks the fixer to
//! patch the file that owns each one. Files are repaired concurrently; the
//! diagnostics of a single file are applied one after another so each fix sees
//! the previous one. A patch is written only if it still satisfies the file's
//! blueprint shape and prop contract.

use std::collections::{BTreeMap, BTreeSet};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::fixer::FixerAgent;
use crate::core::blueprint::{Blueprint, BlueprintFile, check_unit_shape};
use crate::core::contract::{PropContract, validate_contract};
use crate::core::diagnostics::{BuildDiagnostic, parse_diagnostics};
use crate::core::types::TokenUsage;
use crate::error::{ForgeError, Result};
use crate::io::build::BuildService;
use crate::io::dispatcher::{Generator, UsageMeter};
use crate::io::sink::FileSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairStatus {
    /// A build passed.
    Clean,
    /// The build failed but nothing in its output could be acted on.
    NoActionableDiagnostics,
    /// Every round still ended in a failing build.
    Unresolved,
}

impl RepairStatus {
    pub fn succeeded(self) -> bool {
        matches!(self, RepairStatus::Clean | RepairStatus::NoActionableDiagnostics)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDiagnostic {
    pub diagnostic: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub status: RepairStatus,
    /// Builds run, including the last one.
    pub rounds: u32,
    /// Paths replaced, once per accepted patch.
    pub patched: Vec<String>,
    pub skipped: Vec<SkippedDiagnostic>,
    pub usage: TokenUsage,
}

#[derive(Default)]
struct FileRepair {
    patched: Vec<String>,
    skipped: Vec<SkippedDiagnostic>,
    usage: TokenUsage,
    fatal: Option<ForgeError>,
}

pub struct RepairLoop<'a, G: ?Sized, S: ?Sized, B: ?Sized> {
    generator: &'a G,
    sink: &'a S,
    build: &'a B,
    fixer: FixerAgent,
    max_rounds: u32,
    max_concurrency: usize,
}

impl<'a, G, S, B> RepairLoop<'a, G, S, B>
where
    G: Generator + ?Sized,
    S: FileSink + ?Sized,
    B: BuildService + ?Sized,
{
    pub fn new(
        generator: &'a G,
        sink: &'a S,
        build: &'a B,
        fixer: FixerAgent,
        max_rounds: u32,
        max_concurrency: usize,
    ) -> Self {
        Self {
            generator,
            sink,
            build,
            fixer,
            max_rounds,
            max_concurrency,
        }
    }

    /// Run up to `max_rounds` build/fix rounds.
    ///
    /// Per-diagnostic failures are recorded as skipped. Build service errors and
    /// run-fatal generation errors are returned.
    #[instrument(skip_all, fields(max_rounds = self.max_rounds))]
    pub async fn run(&self, blueprint: &Blueprint, contracts: &[PropContract]) -> Result<RepairReport> {
        let outline = outline(blueprint);
        let mut report = RepairReport {
            status: RepairStatus::Unresolved,
            rounds: 0,
            patched: Vec::new(),
            skipped: Vec::new(),
            usage: TokenUsage::default(),
        };

        for round in 1..=self.max_rounds {
            report.rounds = round;
            let output = self.build.build().await?;
            if output.success {
                info!(round, "build is clean");
                report.status = RepairStatus::Clean;
                return Ok(report);
            }

            let diagnostics = parse_diagnostics(&output.diagnostics);
            if diagnostics.is_empty() {
                warn!(round, "build failed without actionable diagnostics");
                report.status = RepairStatus::NoActionableDiagnostics;
                return Ok(report);
            }
            info!(round, diagnostics = diagnostics.len(), "repair round");

            let mut by_file: BTreeMap<String, (&BlueprintFile, Vec<BuildDiagnostic>)> = BTreeMap::new();
            for diagnostic in diagnostics {
                match blueprint.owning_file(diagnostic.file()) {
                    Some(file) => by_file
                        .entry(file.path.clone())
                        .or_insert_with(|| (file, Vec::new()))
                        .1
                        .push(diagnostic),
                    None => report.skipped.push(SkippedDiagnostic {
                        diagnostic: diagnostic.to_string(),
                        reason: "no blueprint file owns this path".to_string(),
                    }),
                }
            }

            let results: Vec<FileRepair> = stream::iter(by_file.into_values())
                .map(|(file, diagnostics)| {
                    let contract = contracts.iter().find(|c| c.path() == file.path);
                    self.repair_file(blueprint, file, contract, diagnostics, &outline)
                })
                .buffer_unordered(self.max_concurrency.max(1))
                .collect()
                .await;

            let mut fatal = None;
            for result in results {
                report.usage += result.usage;
                report.patched.extend(result.patched);
                report.skipped.extend(result.skipped);
                if fatal.is_none() {
                    fatal = result.fatal;
                }
            }
            if let Some(err) = fatal {
                return Err(err);
            }
        }

        warn!(rounds = self.max_rounds, "build still failing after repair rounds");
        Ok(report)
    }

    async fn repair_file(
        &self,
        blueprint: &Blueprint,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        diagnostics: Vec<BuildDiagnostic>,
        outline: &str,
    ) -> FileRepair {
        let mut repair = FileRepair::default();
        let known = blueprint.known_paths();
        let meter = UsageMeter::new(self.generator);

        for diagnostic in diagnostics {
            match self.fix_one(&meter, file, contract, &diagnostic, outline, &known).await {
                Ok(None) => repair.patched.push(file.path.clone()),
                Ok(Some(reason)) => {
                    warn!(path = %file.path, code = diagnostic.code(), reason = %reason, "patch rejected");
                    repair.skipped.push(SkippedDiagnostic {
                        diagnostic: diagnostic.to_string(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!(path = %file.path, code = diagnostic.code(), err = %err, "fix failed");
                    let fatal = err.is_run_fatal();
                    repair.skipped.push(SkippedDiagnostic {
                        diagnostic: diagnostic.to_string(),
                        reason: err.to_string(),
                    });
                    if fatal {
                        repair.fatal = Some(err);
                        break;
                    }
                }
            }
        }
        repair.usage = meter.usage();
        repair
    }

    /// Returns `Ok(None)` when the patch was written, `Ok(Some(reason))` when it was rejected.
    async fn fix_one(
        &self,
        generator: &UsageMeter<'_, G>,
        file: &BlueprintFile,
        contract: Option<&PropContract>,
        diagnostic: &BuildDiagnostic,
        outline: &str,
        known: &BTreeSet<String>,
    ) -> Result<Option<String>> {
        let current = self.sink.read(&file.path).await?;
        let patched = self
            .fixer
            .run(generator, file, contract, diagnostic, &current, outline)
            .await?;

        let mut issues = check_unit_shape(file, &patched.value, known);
        if let Some(contract) = contract {
            issues.extend(validate_contract(&patched.value, contract).issues);
        }
        if !issues.is_empty() {
            return Ok(Some(issues.join("; ")));
        }

        self.sink.replace(&file.path, &patched.value).await?;
        info!(path = %file.path, code = diagnostic.code(), "applied patch");
        Ok(None)
    }
}

/// One line per blueprint file, used as prompt context.
pub fn outline(blueprint: &Blueprint) -> String {
    blueprint
        .files()
        .iter()
        .map(|file| {
            if file.summary.trim().is_empty() {
                format!("- {}", file.path)
            } else {
                format!("- {}: {}", file.path, file.summary.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blueprint::Imports;
    use crate::io::build::BuildOutput;
    use crate::io::prompt::PromptBuilder;
    use crate::test_support::{MemorySink, ScriptedBuild, ScriptedGenerator, test_profile};

    fn blueprint() -> Blueprint {
        Blueprint::new(vec![
            BlueprintFile {
                path: "src/App.tsx".to_string(),
                summary: "shell".to_string(),
                exports: vec!["App".to_string()],
                imports: Imports {
                    external: vec!["react".to_string()],
                    local: vec!["./components/Button".to_string()],
                },
            },
            BlueprintFile {
                path: "src/components/Button.tsx".to_string(),
                summary: "button".to_string(),
                exports: vec!["Button".to_string()],
                imports: Imports::default(),
            },
        ])
        .expect("blueprint")
    }

    fn fixer() -> FixerAgent {
        FixerAgent::new(PromptBuilder::new(50_000), test_profile())
    }

    const APP_ERROR: &str = "src/App.tsx(1,10): error TS2305: Module './components/Button' has no exported member 'Buton'.";

    #[tokio::test]
    async fn clean_first_build_makes_no_calls() {
        let generator = ScriptedGenerator::queued(Vec::<String>::new());
        let sink = MemorySink::default();
        let build = ScriptedBuild::new([BuildOutput::passed()]);
        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 3, 4)
            .run(&blueprint(), &[])
            .await
            .expect("repair");
        assert_eq!(report.status, RepairStatus::Clean);
        assert!(report.status.succeeded());
        assert_eq!(report.rounds, 1);
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn valid_patch_is_applied_then_build_passes() {
        let generator = ScriptedGenerator::queued([
            "```tsx\nimport { Button } from './components/Button';\nexport function App() { return Button; }\n```",
        ]);
        let sink = MemorySink::default();
        sink.insert("src/App.tsx", "import { Buton } from './components/Button';");
        sink.insert("src/components/Button.tsx", "export const Button = 1;");
        let build = ScriptedBuild::new([BuildOutput::failed(APP_ERROR), BuildOutput::passed()]);

        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 3, 4)
            .run(&blueprint(), &[])
            .await
            .expect("repair");
        assert_eq!(report.status, RepairStatus::Clean);
        assert_eq!(report.rounds, 2);
        assert_eq!(report.patched, vec!["src/App.tsx".to_string()]);
        assert!(sink.get("src/App.tsx").expect("app").contains("{ Button }"));
    }

    #[tokio::test]
    async fn patch_that_drops_an_export_is_not_written() {
        let generator = ScriptedGenerator::queued(["export const Other = 1;"]);
        let sink = MemorySink::default();
        sink.insert("src/App.tsx", "original");
        let build = ScriptedBuild::new([BuildOutput::failed(APP_ERROR)]);

        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 1, 4)
            .run(&blueprint(), &[])
            .await
            .expect("repair");
        assert_eq!(report.status, RepairStatus::Unresolved);
        assert!(!report.status.succeeded());
        assert_eq!(sink.get("src/App.tsx").as_deref(), Some("original"));
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("missing export 'App'"));
        assert_eq!(report.usage.total_tokens(), 2);
    }

    #[tokio::test]
    async fn empty_fix_reply_is_skipped_but_billed() {
        let generator = ScriptedGenerator::queued(["```tsx\n```"]);
        let sink = MemorySink::default();
        sink.insert("src/App.tsx", "original");
        let build = ScriptedBuild::new([BuildOutput::failed(APP_ERROR)]);

        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 1, 4)
            .run(&blueprint(), &[])
            .await
            .expect("repair");
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("no code"));
        assert_eq!(report.usage.total_tokens(), 2);
        assert_eq!(sink.get("src/App.tsx").as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn patch_violating_contract_is_not_written() {
        let contract = PropContract::new(
            "Button",
            "src/components/Button.tsx",
            vec!["label".to_string()],
            Vec::new(),
        )
        .expect("contract");
        let generator = ScriptedGenerator::queued([
            "export interface ButtonProps { color: string }\nexport const Button = 1;",
        ]);
        let sink = MemorySink::default();
        sink.insert("src/components/Button.tsx", "original");
        let build = ScriptedBuild::new([BuildOutput::failed(
            "src/components/Button.tsx(1,1): error TS2322: Type 'number' is not assignable to type 'string'.",
        )]);

        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 1, 4)
            .run(&blueprint(), &[contract])
            .await
            .expect("repair");
        assert_eq!(report.status, RepairStatus::Unresolved);
        assert!(report.skipped[0].reason.contains("label"));
        assert_eq!(sink.get("src/components/Button.tsx").as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn unparseable_failure_is_not_actionable() {
        let generator = ScriptedGenerator::queued(Vec::<String>::new());
        let sink = MemorySink::default();
        let build = ScriptedBuild::new([BuildOutput::failed("vite: command not found")]);
        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 3, 4)
            .run(&blueprint(), &[])
            .await
            .expect("repair");
        assert_eq!(report.status, RepairStatus::NoActionableDiagnostics);
        assert!(report.status.succeeded());
    }

    #[tokio::test]
    async fn diagnostics_for_unknown_files_are_skipped() {
        let generator = ScriptedGenerator::queued(Vec::<String>::new());
        let sink = MemorySink::default();
        let build = ScriptedBuild::new([BuildOutput::failed(
            "src/vite-env.d.ts(1,1): error TS2688: Cannot find type definition file.",
        )]);
        let report = RepairLoop::new(&generator, &sink, &build, fixer(), 2, 4)
            .run(&blueprint(), &[])
            .await
            .expect("repair");
        assert_eq!(report.status, RepairStatus::Unresolved);
        assert_eq!(report.rounds, 2);
        assert_eq!(report.skipped.len(), 2, "skipped once per round");
        assert!(generator.prompts().is_empty());
    }

    #[test]
    fn outline_lists_every_file() {
        assert_eq!(
            outline(&blueprint()),
            "- src/App.tsx: shell\n- src/components/Button.tsx: button"
        );
    }
}
