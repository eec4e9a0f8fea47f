use anyhow::Result;
use parking_lot::Mutex;
use std::time::Duration;

use crate::commands::CommandReport;
use crate::remote::api::ArchiveClient;
use crate::zettel::config::load_config;
use crate::zettel::convert::Converter;
use crate::zettel::id::Identifier;
use crate::zettel::manifest::Manifest;
use crate::zettel::paths::resolve_paths;
use crate::zettel::reconcile::{PipelineStage, ReconcileConfig, RunState, reconcile};
use crate::zettel::runner::RunnerConfig;
use crate::zettel::stage::{ArtifactRef, StageError, StageFn, StageId};
use crate::zettel::store;
use crate::zettel::util::acquire_run_lock;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Re-attempt the full universe instead of only what is missing:
    /// stage records are cleared and artifacts overwritten.
    pub full: bool,
    pub workers: Option<usize>,
    pub max_passes: Option<u32>,
}

fn write_failure(err: anyhow::Error) -> StageError {
    StageError::Transient(format!("artifact write failed: {err:#}"))
}

pub fn run(opts: &RunOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("run");
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let _lock = acquire_run_lock(&paths.lock_file())?;

    let mut manifest = Manifest::rebuild(&paths)?;
    if manifest.universe_len() == 0 {
        report.issue("universe is empty; run `zkarch extract` first");
        return Ok(report);
    }
    report.detail(format!("universe_total={}", manifest.universe_len()));

    if opts.full {
        manifest.clear_stage_records();
        report.detail("mode=full-universe");
    } else {
        report.detail("mode=missing-only");
    }

    let client = ArchiveClient::new(&cfg.remote)?;
    let converter = Converter::new(&cfg.converter.bin, cfg.converter.timeout_secs)?;

    let snapshot_stage = |id: &Identifier| -> Result<ArtifactRef, StageError> {
        let bytes = client.fetch_snapshot(id)?;
        store::write_artifact(&paths, StageId::Snapshot, &id.format(), &bytes)
            .map_err(write_failure)
    };
    let fetch_stage = |id: &Identifier| -> Result<ArtifactRef, StageError> {
        let bytes = client.fetch_record(id)?;
        store::write_artifact(&paths, StageId::Fetch, &id.format(), &bytes)
            .map_err(write_failure)
    };
    let convert_stage = |id: &Identifier| -> Result<ArtifactRef, StageError> {
        let key = id.format();
        let record_path = store::artifact_path(&paths, StageId::Fetch, &key);
        let markdown = converter.convert_record_file(&record_path)?;
        store::write_artifact(&paths, StageId::Convert, &key, markdown.as_bytes())
            .map_err(write_failure)
    };

    let pipeline = [
        PipelineStage {
            id: StageId::Snapshot,
            f: &snapshot_stage as &dyn StageFn,
        },
        PipelineStage {
            id: StageId::Fetch,
            f: &fetch_stage as &dyn StageFn,
        },
        PipelineStage {
            id: StageId::Convert,
            f: &convert_stage as &dyn StageFn,
        },
    ];

    let runner_cfg = RunnerConfig {
        workers: opts.workers.unwrap_or(cfg.runner.workers),
        max_retries: cfg.runner.max_retries,
        backoff: Duration::from_millis(cfg.runner.backoff_ms),
    };
    let reconcile_cfg = ReconcileConfig {
        max_passes: opts.max_passes.unwrap_or(cfg.runner.max_passes),
    };

    let manifest = Mutex::new(manifest);
    let outcome = reconcile(&manifest, &pipeline, &reconcile_cfg, &runner_cfg, &paths)?;

    let manifest = manifest.into_inner();
    report.detail(format!("attempted_total={}", outcome.attempted_total()));
    for stage_report in &outcome.stages {
        let Some(stage) = stage_report.stage else {
            continue;
        };
        let stats = manifest.completion_stats(stage);
        report.detail(format!(
            "stage={} passes={} done={} missing={} transient={} permanent={} complete={:.2}%",
            stage,
            stage_report.passes.len(),
            stats.done,
            stats.missing,
            stats.transient_failed,
            stats.permanent_failed,
            stats.percent_done()
        ));
    }

    match &outcome.state {
        RunState::Complete => report.detail("state=complete"),
        RunState::Stalled(stage) => {
            let stage_report = outcome
                .stages
                .iter()
                .find(|s| s.stage == Some(*stage));
            let remaining = stage_report.map(|s| s.remaining.as_slice()).unwrap_or(&[]);
            for entry in remaining.iter().take(20) {
                report.issue(format!(
                    "unresolved {} ({}){}",
                    entry.id,
                    entry.classification,
                    entry
                        .reason
                        .as_deref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                ));
            }
            if remaining.len() > 20 {
                report.issue(format!(
                    "...and {} more (see {})",
                    remaining.len() - 20,
                    paths.missing_file(*stage).display()
                ));
            }
            report.issue(format!(
                "stalled at stage {stage}: no progress across a pass; resume later with `zkarch run`"
            ));
        }
        other => report.detail(format!("state={other:?}")),
    }

    Ok(report)
}
