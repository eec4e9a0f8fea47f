//! Reconciler: drives repeated stage-runner passes across the pipeline
//! until the manifest is complete or a pass stops making progress. Replaces
//! the family of bespoke check-progress/find-missing/re-download scripts
//! with one state machine over a pluggable stage function.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::zettel::id::Identifier;
use crate::zettel::manifest::Manifest;
use crate::zettel::paths::ZkPaths;
use crate::zettel::runner::{PassSummary, RunnerConfig, run_pass};
use crate::zettel::stage::{StageFn, StageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    RunningStage(StageId),
    Stalled(StageId),
    Complete,
}

pub struct PipelineStage<'a> {
    pub id: StageId,
    pub f: &'a dyn StageFn,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    pub max_passes: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { max_passes: 5 }
    }
}

/// One remaining identifier and its recorded failure classification, if
/// any. `classification` is `missing` when the identifier was never
/// attempted (or its upstream artifact is absent).
#[derive(Debug, Clone)]
pub struct RemainingEntry {
    pub id: String,
    pub classification: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub stage: Option<StageId>,
    pub passes: Vec<PassSummary>,
    pub remaining: Vec<RemainingEntry>,
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub state: RunState,
    pub stages: Vec<StageReport>,
}

impl ReconcileReport {
    pub fn attempted_total(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.passes.iter())
            .map(|p| p.attempted)
            .sum()
    }
}

fn work_set(
    manifest: &Manifest,
    stage: StageId,
    upstream: Option<&BTreeSet<String>>,
) -> Vec<Identifier> {
    manifest
        .pending_within(stage, upstream)
        .iter()
        .filter_map(|key| manifest.identifier(key).cloned())
        .collect()
}

fn remaining_entries(
    manifest: &Manifest,
    stage: StageId,
    work: &[Identifier],
) -> Vec<RemainingEntry> {
    work.iter()
        .map(|id| {
            let key = id.format();
            match manifest.record(stage, &key) {
                Some(record) => RemainingEntry {
                    id: key,
                    classification: if record.outcome.is_permanent() {
                        "permanent".to_string()
                    } else {
                        "transient".to_string()
                    },
                    reason: record.outcome.reason().map(str::to_string),
                },
                None => RemainingEntry {
                    id: key,
                    classification: "missing".to_string(),
                    reason: None,
                },
            }
        })
        .collect()
}

/// Run the pipeline to completion or stall. Stage *i* only ever attempts
/// identifiers whose stage *i-1* artifact exists; within a stage, passes
/// repeat while pending shrinks, bounded by `max_passes`. The manifest is
/// persisted after every pass so an interrupted run resumes where it
/// stopped.
pub fn reconcile(
    manifest: &Mutex<Manifest>,
    pipeline: &[PipelineStage<'_>],
    cfg: &ReconcileConfig,
    runner_cfg: &RunnerConfig,
    paths: &ZkPaths,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        state: RunState::Idle,
        stages: Vec::new(),
    };

    let mut upstream: Option<BTreeSet<String>> = None;
    for stage in pipeline {
        report.state = RunState::RunningStage(stage.id);
        let mut stage_report = StageReport {
            stage: Some(stage.id),
            ..Default::default()
        };

        let mut passes = 0u32;
        loop {
            let work = {
                let manifest = manifest.lock();
                work_set(&manifest, stage.id, upstream.as_ref())
            };
            if work.is_empty() {
                break;
            }
            if passes >= cfg.max_passes {
                log::warn!(
                    "stage={} stalled: max passes ({}) reached with {} pending",
                    stage.id,
                    cfg.max_passes,
                    work.len()
                );
                stage_report.remaining = {
                    let manifest = manifest.lock();
                    remaining_entries(&manifest, stage.id, &work)
                };
                report.state = RunState::Stalled(stage.id);
                report.stages.push(stage_report);
                return Ok(report);
            }

            let summary = run_pass(stage.id, &work, stage.f, runner_cfg, manifest)?;
            passes += 1;
            log::info!(
                "stage={} pass={} attempted={} succeeded={} transient={} permanent={}",
                stage.id,
                passes,
                summary.attempted,
                summary.succeeded,
                summary.transient_failed,
                summary.permanent_failed
            );
            stage_report.passes.push(summary);
            manifest.lock().persist(paths)?;

            let after = {
                let manifest = manifest.lock();
                work_set(&manifest, stage.id, upstream.as_ref())
            };
            if after.is_empty() {
                break;
            }
            if after.len() >= work.len() {
                // A full pass with zero progress: systemic, not per-id.
                log::warn!(
                    "stage={} stalled: no progress across a pass, {} remaining",
                    stage.id,
                    after.len()
                );
                stage_report.remaining = {
                    let manifest = manifest.lock();
                    remaining_entries(&manifest, stage.id, &after)
                };
                report.state = RunState::Stalled(stage.id);
                report.stages.push(stage_report);
                return Ok(report);
            }
        }

        upstream = Some(manifest.lock().succeeded(stage.id));
        report.stages.push(stage_report);
    }

    report.state = RunState::Complete;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{PipelineStage, ReconcileConfig, RunState, reconcile};
    use crate::zettel::id::Identifier;
    use crate::zettel::manifest::Manifest;
    use crate::zettel::paths::ZkPaths;
    use crate::zettel::runner::RunnerConfig;
    use crate::zettel::stage::{ArtifactRef, StageError, StageFn, StageId};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn ids(raws: &[&str]) -> Vec<Identifier> {
        raws.iter().map(|raw| Identifier::parse(raw).expect(raw)).collect()
    }

    fn artifact(id: &Identifier) -> ArtifactRef {
        ArtifactRef {
            path: format!("{id}.json"),
            sha256: "0".repeat(64),
        }
    }

    fn test_paths(root: &std::path::Path) -> ZkPaths {
        ZkPaths {
            archive_home: root.to_path_buf(),
            manifest_dir: root.join("manifest"),
            snapshots_dir: root.join("snapshots"),
            records_dir: root.join("records"),
            documents_dir: root.join("documents"),
        }
    }

    fn quick_runner() -> RunnerConfig {
        RunnerConfig {
            workers: 2,
            max_retries: 0,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn single_stage_completes_and_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let manifest = Mutex::new(Manifest::new());
        manifest
            .lock()
            .register_universe(ids(&["A_1", "A_2", "A_10"]));

        let ok_stage = |id: &Identifier| Ok(artifact(id));
        let pipeline = [PipelineStage {
            id: StageId::Fetch,
            f: &ok_stage as &dyn StageFn,
        }];

        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig::default(),
            &quick_runner(),
            &paths,
        )
        .expect("reconcile");
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(report.attempted_total(), 3);

        // Second run with no external change: nothing left to attempt and
        // the manifest is unchanged.
        let before = manifest.lock().clone();
        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig::default(),
            &quick_runner(),
            &paths,
        )
        .expect("second reconcile");
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(report.attempted_total(), 0);
        let after = manifest.lock().clone();
        assert_eq!(
            before.pending(StageId::Fetch),
            after.pending(StageId::Fetch)
        );
        assert_eq!(
            before.record(StageId::Fetch, "A_1"),
            after.record(StageId::Fetch, "A_1")
        );
    }

    #[test]
    fn transient_failures_recover_across_passes() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(ids(&["A_1", "A_2"]));

        // A_2 fails on the first pass, succeeds on the second.
        let calls = Mutex::new(BTreeMap::<String, u32>::new());
        let flaky = |id: &Identifier| {
            let key = id.format();
            let mut calls = calls.lock();
            let seen = calls.entry(key.clone()).or_insert(0);
            *seen += 1;
            if key == "A_2" && *seen == 1 {
                Err(StageError::Transient("flaky".into()))
            } else {
                Ok(artifact(id))
            }
        };
        let pipeline = [PipelineStage {
            id: StageId::Fetch,
            f: &flaky as &dyn StageFn,
        }];

        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig::default(),
            &quick_runner(),
            &paths,
        )
        .expect("reconcile");
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(report.stages[0].passes.len(), 2);

        let manifest = manifest.lock();
        let record = manifest.record(StageId::Fetch, "A_2").expect("record");
        assert!(record.outcome.is_success());
        assert_eq!(record.retries, 1);
    }

    #[test]
    fn permanent_failures_do_not_block_completion() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(ids(&["A_1", "A_10"]));

        let gone = |id: &Identifier| {
            if id.format() == "A_10" {
                Err(StageError::Permanent("404".into()))
            } else {
                Ok(artifact(id))
            }
        };
        let pipeline = [PipelineStage {
            id: StageId::Fetch,
            f: &gone as &dyn StageFn,
        }];

        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig::default(),
            &quick_runner(),
            &paths,
        )
        .expect("reconcile");
        assert_eq!(report.state, RunState::Complete);

        let manifest = manifest.lock();
        let (_, permanent) = manifest.failure_lists(StageId::Fetch);
        assert_eq!(permanent, ["A_10"]);
    }

    #[test]
    fn zero_progress_pass_stalls_with_classified_remainder() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(ids(&["A_1", "A_2"]));

        let outage =
            |_: &Identifier| -> Result<ArtifactRef, StageError> {
                Err(StageError::Transient("connection refused".into()))
            };
        let pipeline = [PipelineStage {
            id: StageId::Fetch,
            f: &outage as &dyn StageFn,
        }];

        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig::default(),
            &quick_runner(),
            &paths,
        )
        .expect("reconcile");
        assert_eq!(report.state, RunState::Stalled(StageId::Fetch));
        let remaining = &report.stages[0].remaining;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.classification == "transient"));

        // The stall is resumable: state persisted, nothing lost.
        let rebuilt = Manifest::rebuild(&paths).expect("rebuild");
        assert_eq!(rebuilt.pending(StageId::Fetch).len(), 2);
    }

    #[test]
    fn downstream_stage_only_sees_upstream_successes() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(ids(&["A_1", "A_10"]));

        let first = |id: &Identifier| {
            if id.format() == "A_10" {
                Err(StageError::Permanent("404".into()))
            } else {
                Ok(artifact(id))
            }
        };
        let second_seen = Mutex::new(Vec::<String>::new());
        let second = |id: &Identifier| {
            second_seen.lock().push(id.format());
            Ok(artifact(id))
        };
        let pipeline = [
            PipelineStage {
                id: StageId::Fetch,
                f: &first as &dyn StageFn,
            },
            PipelineStage {
                id: StageId::Convert,
                f: &second as &dyn StageFn,
            },
        ];

        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig::default(),
            &quick_runner(),
            &paths,
        )
        .expect("reconcile");
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(second_seen.lock().as_slice(), ["A_1"]);
    }

    #[test]
    fn max_passes_bound_stalls_instead_of_spinning() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(ids(&["A_1", "A_2", "A_3"]));

        // Exactly one identifier recovers per pass, so pending shrinks every
        // time; a max-passes bound of 2 still has work left afterwards.
        let calls = Mutex::new(BTreeMap::<String, u32>::new());
        let slow_recovery = |id: &Identifier| {
            let mut calls = calls.lock();
            let key = id.format();
            let seen = calls.entry(key.clone()).or_insert(0);
            *seen += 1;
            let rank: usize = match key.as_str() {
                "A_1" => 1,
                "A_2" => 2,
                _ => 3,
            };
            if (*seen as usize) >= rank {
                Ok(artifact(id))
            } else {
                Err(StageError::Transient("later".into()))
            }
        };
        let pipeline = [PipelineStage {
            id: StageId::Fetch,
            f: &slow_recovery as &dyn StageFn,
        }];

        let report = reconcile(
            &manifest,
            &pipeline,
            &ReconcileConfig { max_passes: 2 },
            &quick_runner(),
            &paths,
        )
        .expect("reconcile");
        assert_eq!(report.state, RunState::Stalled(StageId::Fetch));
        assert_eq!(report.stages[0].passes.len(), 2);
        assert_eq!(report.stages[0].remaining.len(), 1);
    }
}
