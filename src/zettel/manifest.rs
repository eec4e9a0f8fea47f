//! Manifest store: the single source of truth for "what remains to be
//! done". Ties the universe of discovered identifiers to per-stage artifact
//! records, persists both as human-diffable lists plus a JSONL ledger, and
//! rebuilds itself from whatever artifacts exist in durable storage.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::zettel::id::{FoldedKey, Identifier, ParseError};
use crate::zettel::paths::ZkPaths;
use crate::zettel::stage::{ArtifactRef, StageId};
use crate::zettel::store;
use crate::zettel::util::now_epoch_secs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success { artifact: String, sha256: String },
    Transient { reason: String },
    Permanent { reason: String },
}

impl Outcome {
    pub fn success(artifact: &ArtifactRef) -> Self {
        Self::Success {
            artifact: artifact.path.clone(),
            sha256: artifact.sha256.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Transient { reason } | Self::Permanent { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub outcome: Outcome,
    pub retries: u32,
    pub updated_at_epoch_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerLine {
    stage: StageId,
    id: String,
    outcome: Outcome,
    retries: u32,
    updated_at_epoch_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CompletionStats {
    pub total: usize,
    pub done: usize,
    pub missing: usize,
    pub transient_failed: usize,
    pub permanent_failed: usize,
}

impl CompletionStats {
    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.done as f64 / self.total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOutcome {
    pub added: usize,
    pub repeated: usize,
}

/// Identifiers whose folded keys collide: same entity reachable through
/// distinct raw spellings. Reported for manual resolution, never merged.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    universe: BTreeMap<String, Identifier>,
    raw_duplicates: BTreeMap<String, u64>,
    parse_failures: BTreeMap<String, String>,
    records: BTreeMap<StageId, BTreeMap<String, StageRecord>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly discovered identifiers into the universe. An identifier
    /// seen again by exact string is a duplicate occurrence, counted and
    /// retained in the anomaly list rather than silently deduplicated.
    pub fn register_universe<I>(&mut self, ids: I) -> RegisterOutcome
    where
        I: IntoIterator<Item = Identifier>,
    {
        let mut out = RegisterOutcome::default();
        for id in ids {
            let key = id.format();
            if self.universe.contains_key(&key) {
                *self.raw_duplicates.entry(key).or_insert(0) += 1;
                out.repeated += 1;
            } else {
                self.universe.insert(key, id);
                out.added += 1;
            }
        }
        out
    }

    /// ParseErrors are excluded from the universe but never dropped without
    /// a trace.
    pub fn register_parse_failure(&mut self, raw: &str, err: &ParseError) {
        self.parse_failures
            .insert(raw.to_string(), err.to_string());
    }

    pub fn universe_len(&self) -> usize {
        self.universe.len()
    }

    pub fn contains(&self, id_key: &str) -> bool {
        self.universe.contains_key(id_key)
    }

    pub fn identifier(&self, id_key: &str) -> Option<&Identifier> {
        self.universe.get(id_key)
    }

    /// Universe in canonical archive order.
    pub fn canonical_universe(&self) -> Vec<&Identifier> {
        let mut ids: Vec<&Identifier> = self.universe.values().collect();
        ids.sort_by_cached_key(|id| (id.canonical_key(), id.format()));
        ids
    }

    pub fn raw_duplicates(&self) -> &BTreeMap<String, u64> {
        &self.raw_duplicates
    }

    pub fn parse_failures(&self) -> &BTreeMap<String, String> {
        &self.parse_failures
    }

    pub fn record(&self, stage: StageId, id_key: &str) -> Option<&StageRecord> {
        self.records.get(&stage)?.get(id_key)
    }

    pub fn stage_records(&self, stage: StageId) -> impl Iterator<Item = (&String, &StageRecord)> {
        self.records.get(&stage).into_iter().flatten()
    }

    /// Record the outcome of one stage attempt, overwriting any prior record
    /// for the pair. The retry count carries the number of failed
    /// invocations accumulated while the pair keeps failing:
    /// `failed_attempts` from this pass, plus the prior count when the
    /// previous record was itself a failure.
    pub fn record_result(
        &mut self,
        stage: StageId,
        id_key: &str,
        outcome: Outcome,
        failed_attempts: u32,
    ) {
        let prior = self
            .records
            .get(&stage)
            .and_then(|m| m.get(id_key))
            .filter(|r| r.outcome.is_failure())
            .map(|r| r.retries)
            .unwrap_or(0);

        self.records.entry(stage).or_default().insert(
            id_key.to_string(),
            StageRecord {
                outcome,
                retries: prior + failed_attempts,
                updated_at_epoch_secs: now_epoch_secs().unwrap_or(0),
            },
        );
    }

    /// Drop all stage records; used by full-universe runs so every
    /// identifier is re-attempted and artifacts are overwritten.
    pub fn clear_stage_records(&mut self) {
        self.records.clear();
    }

    pub fn succeeded(&self, stage: StageId) -> BTreeSet<String> {
        self.stage_records(stage)
            .filter(|(_, r)| r.outcome.is_success())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Universe minus Success minus Permanent for `stage`. Transient
    /// failures stay pending and are re-attempted by future passes.
    pub fn pending(&self, stage: StageId) -> BTreeSet<String> {
        self.pending_within(stage, None)
    }

    /// Pending restricted to an upstream subset; the reconciler passes the
    /// prior stage's Success set so no identifier is attempted before its
    /// upstream artifact exists.
    pub fn pending_within(
        &self,
        stage: StageId,
        upstream: Option<&BTreeSet<String>>,
    ) -> BTreeSet<String> {
        self.universe
            .keys()
            .filter(|key| upstream.is_none_or(|set| set.contains(*key)))
            .filter(|key| {
                !self
                    .record(stage, key)
                    .is_some_and(|r| r.outcome.is_success() || r.outcome.is_permanent())
            })
            .cloned()
            .collect()
    }

    pub fn completion_stats(&self, stage: StageId) -> CompletionStats {
        let mut stats = CompletionStats {
            total: self.universe.len(),
            ..Default::default()
        };
        for key in self.universe.keys() {
            match self.record(stage, key).map(|r| &r.outcome) {
                Some(Outcome::Success { .. }) => stats.done += 1,
                Some(Outcome::Transient { .. }) => stats.transient_failed += 1,
                Some(Outcome::Permanent { .. }) => stats.permanent_failed += 1,
                None => {}
            }
        }
        stats.missing = stats.total - stats.done - stats.permanent_failed;
        stats
    }

    /// Failure id lists for a stage, canonically ordered: (transient,
    /// permanent).
    pub fn failure_lists(&self, stage: StageId) -> (Vec<String>, Vec<String>) {
        let mut transient = Vec::new();
        let mut permanent = Vec::new();
        for id in self.canonical_universe() {
            let key = id.format();
            match self.record(stage, &key).map(|r| &r.outcome) {
                Some(Outcome::Transient { .. }) => transient.push(key),
                Some(Outcome::Permanent { .. }) => permanent.push(key),
                _ => {}
            }
        }
        (transient, permanent)
    }

    /// Folded-key collisions across distinct raw spellings (`a_1` vs `A_1`,
    /// `A_01` vs `A_1`). Both spellings stay in the universe unmerged.
    pub fn duplicates(&self) -> Vec<DuplicateGroup> {
        let mut groups: BTreeMap<FoldedKey, Vec<&Identifier>> = BTreeMap::new();
        for id in self.universe.values() {
            groups.entry(id.folded_key()).or_default().push(id);
        }

        let mut out = Vec::new();
        for (_, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let mut ids: Vec<String> = members.iter().map(|id| id.format()).collect();
            ids.sort();
            out.push(DuplicateGroup { ids });
        }
        out
    }

    // ----- persistence -----

    /// Persist the manifest: canonical-order newline lists plus the JSONL
    /// ledger holding the current record per (stage, id).
    pub fn persist(&self, paths: &ZkPaths) -> Result<()> {
        fs::create_dir_all(&paths.manifest_dir)
            .with_context(|| format!("failed to create {}", paths.manifest_dir.display()))?;

        let universe: Vec<String> = self
            .canonical_universe()
            .iter()
            .map(|id| id.format())
            .collect();
        write_lines_atomic(&paths.universe_file(), &universe)?;

        for stage in StageId::PIPELINE {
            let mut missing: Vec<&Identifier> = self
                .pending(stage)
                .iter()
                .filter_map(|key| self.universe.get(key))
                .collect();
            missing.sort_by_cached_key(|id| (id.canonical_key(), id.format()));
            let lines: Vec<String> = missing.iter().map(|id| id.format()).collect();
            write_lines_atomic(&paths.missing_file(stage), &lines)?;
        }

        let duplicate_lines: Vec<String> = self
            .duplicates()
            .into_iter()
            .flat_map(|group| group.ids)
            .collect();
        write_lines_atomic(&paths.duplicates_file(), &duplicate_lines)?;

        let occurrence_lines: Vec<String> =
            self.raw_duplicates.keys().cloned().collect();
        write_lines_atomic(&paths.duplicate_occurrences_file(), &occurrence_lines)?;

        let parse_lines: Vec<String> = self
            .parse_failures
            .iter()
            .map(|(raw, err)| format!("{raw}\t{err}"))
            .collect();
        write_lines_atomic(&paths.parse_errors_file(), &parse_lines)?;

        self.write_ledger(&paths.ledger_file())?;
        Ok(())
    }

    fn write_ledger(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (stage, records) in &self.records {
            for (id, record) in records {
                let line = LedgerLine {
                    stage: *stage,
                    id: id.clone(),
                    outcome: record.outcome.clone(),
                    retries: record.retries,
                    updated_at_epoch_secs: record.updated_at_epoch_secs,
                };
                out.push_str(&serde_json::to_string(&line)?);
                out.push('\n');
            }
        }
        write_atomic(path, out.as_bytes())
    }

    fn read_ledger(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: LedgerLine = serde_json::from_str(trimmed)
                .with_context(|| format!("failed to parse ledger line in {}", path.display()))?;
            // Last line per (stage, id) wins: the ledger may carry history.
            self.records.entry(entry.stage).or_default().insert(
                entry.id,
                StageRecord {
                    outcome: entry.outcome,
                    retries: entry.retries,
                    updated_at_epoch_secs: entry.updated_at_epoch_secs,
                },
            );
        }
        Ok(())
    }

    /// Rebuild the manifest from durable storage: the universe list, the
    /// ledger, and a scan of the artifact directories. File presence wins in
    /// both directions, so a crash mid-run only repeats idempotent work and
    /// a deleted artifact becomes pending again.
    pub fn rebuild(paths: &ZkPaths) -> Result<Self> {
        let mut manifest = Self::new();

        let universe_file = paths.universe_file();
        if universe_file.exists() {
            let raw = fs::read_to_string(&universe_file)
                .with_context(|| format!("failed to read {}", universe_file.display()))?;
            for line in raw.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match Identifier::parse(trimmed) {
                    Ok(id) => {
                        manifest.register_universe([id]);
                    }
                    Err(err) => {
                        log::warn!("universe entry rejected: {err}");
                        manifest.register_parse_failure(trimmed, &err);
                    }
                }
            }
        }

        manifest.read_ledger(&paths.ledger_file())?;

        for stage in StageId::PIPELINE {
            let on_disk = store::scan_stage(paths, stage)?;

            // Ledger successes whose artifact vanished go back to pending.
            let stale: Vec<String> = manifest
                .stage_records(stage)
                .filter(|(id, r)| r.outcome.is_success() && !on_disk.contains_key(*id))
                .map(|(id, _)| id.clone())
                .collect();
            if let Some(records) = manifest.records.get_mut(&stage) {
                for id in stale {
                    log::warn!(
                        "{}",
                        crate::logging::warn_line(&[
                            ("code", "ARTIFACT_MISSING"),
                            ("stage", stage.as_str()),
                            ("id", &id),
                        ])
                    );
                    records.remove(&id);
                }
            }

            // Artifacts present without a Success record count as done.
            for (id, path) in on_disk {
                let known = manifest
                    .record(stage, &id)
                    .is_some_and(|r| r.outcome.is_success());
                if known {
                    continue;
                }
                let sha256 = store::file_hash(&path)?;
                let prior_retries = manifest
                    .record(stage, &id)
                    .map(|r| r.retries)
                    .unwrap_or(0);
                manifest.records.entry(stage).or_default().insert(
                    id,
                    StageRecord {
                        outcome: Outcome::Success {
                            artifact: path.display().to_string(),
                            sha256,
                        },
                        retries: prior_retries,
                        updated_at_epoch_secs: now_epoch_secs().unwrap_or(0),
                    },
                );
            }
        }

        Ok(manifest)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create tempfile in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

fn write_lines_atomic(path: &Path, lines: &[String]) -> Result<()> {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    write_atomic(path, out.as_bytes())
}
