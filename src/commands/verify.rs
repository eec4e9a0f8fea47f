use anyhow::Result;
use std::collections::BTreeSet;
use std::env;
use std::path::Path;

use crate::commands::{CommandReport, detail_sample};
use crate::zettel::manifest::{Manifest, Outcome};
use crate::zettel::paths::resolve_paths;
use crate::zettel::stage::StageId;
use crate::zettel::store;
use crate::zettel::util::acquire_run_lock;

include!(concat!(env!("OUT_DIR"), "/zkarch_env_allowlist.rs"));

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
}

fn check_unknown_env_vars(report: &mut CommandReport) {
    let allowlist: BTreeSet<&str> = GENERATED_ZKARCH_ENV_ALLOWLIST.iter().copied().collect();
    for (key, _) in env::vars() {
        if key.starts_with("ZKARCH_") && !allowlist.contains(key.as_str()) {
            report.issue(format!("unknown environment variable {key}"));
        }
    }
}

fn check_artifact_drift(report: &mut CommandReport, manifest: &Manifest) {
    let mut drifted: Vec<String> = Vec::new();
    for stage in StageId::PIPELINE {
        for (id, record) in manifest.stage_records(stage) {
            let Outcome::Success { artifact, sha256 } = &record.outcome else {
                continue;
            };
            match store::file_hash(Path::new(artifact)) {
                Ok(actual) if actual == *sha256 => {}
                Ok(_) => drifted.push(format!("{stage}/{id}")),
                Err(_) => drifted.push(format!("{stage}/{id} (unreadable)")),
            }
        }
    }
    if !drifted.is_empty() {
        detail_sample(report, "drifted", drifted.iter(), 10);
        report.issue(format!(
            "{} artifacts drift from their recorded hashes",
            drifted.len()
        ));
    }
}

/// Anomaly audit: canonical duplicate collisions, raw duplicate
/// occurrences, parse errors, artifact hash drift, and unknown `ZKARCH_*`
/// environment variables. Refreshes the on-disk anomaly lists.
pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");
    let paths = resolve_paths()?;
    let _lock = acquire_run_lock(&paths.lock_file())?;

    let manifest = Manifest::rebuild(&paths)?;
    report.detail(format!("universe_total={}", manifest.universe_len()));

    let duplicate_groups = manifest.duplicates();
    if duplicate_groups.is_empty() {
        report.detail("duplicate_groups=0");
    } else {
        for group in duplicate_groups.iter().take(5) {
            report.detail(format!("duplicate_group: {}", group.ids.join(" / ")));
        }
        report.issue(format!(
            "{} identifiers collide after canonicalization (see {})",
            duplicate_groups.len(),
            paths.duplicates_file().display()
        ));
    }

    if !manifest.raw_duplicates().is_empty() {
        let repeats: Vec<String> = manifest
            .raw_duplicates()
            .iter()
            .map(|(id, count)| format!("{id} (+{count})"))
            .collect();
        detail_sample(&mut report, "repeated", repeats.iter(), 10);
        report.issue(format!(
            "{} identifiers discovered more than once (see {})",
            manifest.raw_duplicates().len(),
            paths.duplicate_occurrences_file().display()
        ));
    }

    if !manifest.parse_failures().is_empty() {
        report.issue(format!(
            "{} unparseable identifiers recorded (see {})",
            manifest.parse_failures().len(),
            paths.parse_errors_file().display()
        ));
    }

    check_artifact_drift(&mut report, &manifest);
    check_unknown_env_vars(&mut report);

    manifest.persist(&paths)?;

    if opts.strict && !report.ok {
        report.issue("strict verify failed");
    }

    Ok(report)
}
