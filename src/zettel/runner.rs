//! Stage runner: one pass of one stage over a work set, with a bounded
//! worker pool, per-identifier retry with increasing backoff, and exactly
//! one recorded outcome per identifier per pass.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::logging::warn_line;
use crate::zettel::id::Identifier;
use crate::zettel::manifest::{Manifest, Outcome};
use crate::zettel::stage::{StageError, StageFn, StageId};

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_retries: 3,
            backoff: Duration::from_millis(1_000),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub transient_failed: usize,
    pub permanent_failed: usize,
}

/// Invoke `f` for one identifier, retrying classified-transient errors up
/// to `max_retries` additional times with linearly increasing backoff.
/// Returns the terminal outcome and the number of failed invocations.
fn attempt(id: &Identifier, f: &dyn StageFn, cfg: &RunnerConfig) -> (Outcome, u32) {
    let mut failed = 0u32;
    loop {
        match f.invoke(id) {
            Ok(artifact) => return (Outcome::success(&artifact), failed),
            Err(StageError::Permanent(reason)) => {
                return (Outcome::Permanent { reason }, failed + 1);
            }
            Err(StageError::Transient(reason)) => {
                failed += 1;
                if failed > cfg.max_retries {
                    return (Outcome::Transient { reason }, failed);
                }
                log::debug!(
                    "{}",
                    warn_line(&[
                        ("id", &id.format()),
                        ("attempt", &failed.to_string()),
                        ("reason", &reason),
                    ])
                );
                thread::sleep(cfg.backoff.saturating_mul(failed));
            }
        }
    }
}

/// Run one pass of `stage` over `work`. At most `cfg.workers` invocations
/// are in flight at any time and each identifier is attempted by exactly
/// one worker; every identifier in the work set receives exactly one
/// recorded outcome.
pub fn run_pass(
    stage: StageId,
    work: &[Identifier],
    f: &dyn StageFn,
    cfg: &RunnerConfig,
    manifest: &Mutex<Manifest>,
) -> Result<PassSummary> {
    if work.is_empty() {
        return Ok(PassSummary::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers.max(1))
        .build()
        .context("failed to build stage worker pool")?;

    let succeeded = AtomicUsize::new(0);
    let transient_failed = AtomicUsize::new(0);
    let permanent_failed = AtomicUsize::new(0);

    pool.install(|| {
        work.par_iter().for_each(|id| {
            let (outcome, failed_attempts) = attempt(id, f, cfg);
            let id_key = id.format();
            match &outcome {
                Outcome::Success { .. } => {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Outcome::Transient { reason } => {
                    transient_failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "{}",
                        warn_line(&[
                            ("code", "STAGE_TRANSIENT"),
                            ("stage", stage.as_str()),
                            ("id", &id_key),
                            ("attempts", &failed_attempts.to_string()),
                            ("reason", reason),
                        ])
                    );
                }
                Outcome::Permanent { reason } => {
                    permanent_failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "{}",
                        warn_line(&[
                            ("code", "STAGE_PERMANENT"),
                            ("stage", stage.as_str()),
                            ("id", &id_key),
                            ("reason", reason),
                        ])
                    );
                }
            }
            manifest
                .lock()
                .record_result(stage, &id_key, outcome, failed_attempts);
        });
    });

    Ok(PassSummary {
        attempted: work.len(),
        succeeded: succeeded.into_inner(),
        transient_failed: transient_failed.into_inner(),
        permanent_failed: permanent_failed.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use super::{RunnerConfig, run_pass};
    use crate::zettel::id::Identifier;
    use crate::zettel::manifest::Manifest;
    use crate::zettel::stage::{ArtifactRef, StageError, StageId};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(raws: &[&str]) -> Vec<Identifier> {
        raws.iter().map(|raw| Identifier::parse(raw).expect(raw)).collect()
    }

    fn artifact(id: &Identifier) -> ArtifactRef {
        ArtifactRef {
            path: format!("{id}.json"),
            sha256: "0".repeat(64),
        }
    }

    fn quick_cfg(workers: usize, max_retries: u32) -> RunnerConfig {
        RunnerConfig {
            workers,
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn every_identifier_gets_exactly_one_record() {
        let work = ids(&["A_1", "A_2", "A_3", "A_10"]);
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(work.iter().cloned());

        let summary = run_pass(
            StageId::Fetch,
            &work,
            &|id: &Identifier| Ok(artifact(id)),
            &quick_cfg(2, 0),
            &manifest,
        )
        .expect("pass");

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.succeeded, 4);
        let manifest = manifest.lock();
        for id in &work {
            let record = manifest.record(StageId::Fetch, &id.format()).expect("record");
            assert!(record.outcome.is_success());
            assert_eq!(record.retries, 0);
        }
    }

    #[test]
    fn concurrency_stays_within_the_worker_limit() {
        let work = ids(&["A_1", "A_2", "A_3", "A_4", "A_5", "A_6", "A_7", "A_8"]);
        let manifest = Mutex::new(Manifest::new());

        let in_flight = AtomicUsize::new(0);
        let high_water = AtomicUsize::new(0);
        let stage_fn = |id: &Identifier| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(artifact(id))
        };

        run_pass(StageId::Fetch, &work, &stage_fn, &quick_cfg(3, 0), &manifest).expect("pass");
        assert!(high_water.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn transient_failures_retry_then_succeed_with_retry_count() {
        let work = ids(&["A_2"]);
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(work.iter().cloned());

        let calls = Mutex::new(BTreeMap::<String, u32>::new());
        let stage_fn = |id: &Identifier| {
            let mut calls = calls.lock();
            let seen = calls.entry(id.format()).or_insert(0);
            *seen += 1;
            if *seen <= 2 {
                Err(StageError::Transient("connection reset".into()))
            } else {
                Ok(artifact(id))
            }
        };

        let summary =
            run_pass(StageId::Fetch, &work, &stage_fn, &quick_cfg(1, 3), &manifest).expect("pass");
        assert_eq!(summary.succeeded, 1);

        let manifest = manifest.lock();
        let record = manifest.record(StageId::Fetch, "A_2").expect("record");
        assert!(record.outcome.is_success());
        assert_eq!(record.retries, 2);
    }

    #[test]
    fn retry_limit_exhaustion_records_transient() {
        let work = ids(&["A_1"]);
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(work.iter().cloned());

        let calls = AtomicUsize::new(0);
        let stage_fn = |_: &Identifier| -> Result<ArtifactRef, StageError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StageError::Transient("503".into()))
        };

        let summary =
            run_pass(StageId::Fetch, &work, &stage_fn, &quick_cfg(1, 2), &manifest).expect("pass");
        assert_eq!(summary.transient_failed, 1);
        // First attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let manifest = manifest.lock();
        let record = manifest.record(StageId::Fetch, "A_1").expect("record");
        assert!(record.outcome.is_failure());
        assert_eq!(record.retries, 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let work = ids(&["A_10"]);
        let manifest = Mutex::new(Manifest::new());
        manifest.lock().register_universe(work.iter().cloned());

        let calls = AtomicUsize::new(0);
        let stage_fn = |_: &Identifier| -> Result<ArtifactRef, StageError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StageError::Permanent("404 not found".into()))
        };

        let summary =
            run_pass(StageId::Fetch, &work, &stage_fn, &quick_cfg(1, 5), &manifest).expect("pass");
        assert_eq!(summary.permanent_failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let manifest = manifest.lock();
        assert!(!manifest.pending(StageId::Fetch).contains("A_10"));
    }
}
