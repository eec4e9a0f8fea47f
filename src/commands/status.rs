use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::commands::{CommandReport, detail_sample};
use crate::zettel::manifest::Manifest;
use crate::zettel::paths::resolve_paths;
use crate::zettel::stage::StageId;

/// Report-only run mode: completion stats per stage plus anomaly counts,
/// computed from durable storage. Mutates nothing.
pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!(
        "generated_at={}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    report.detail(format!("archive_home={}", paths.archive_home.display()));

    let manifest = Manifest::rebuild(&paths)?;
    report.detail(format!("universe_total={}", manifest.universe_len()));

    if manifest.universe_len() == 0 {
        report.issue("universe is empty; run `zkarch extract` first");
        return Ok(report);
    }

    for stage in StageId::PIPELINE {
        let stats = manifest.completion_stats(stage);
        report.detail(format!(
            "stage={} done={} missing={} transient={} permanent={} complete={:.2}%",
            stage,
            stats.done,
            stats.missing,
            stats.transient_failed,
            stats.permanent_failed,
            stats.percent_done()
        ));

        if stats.missing > 0 && stats.missing <= 20 {
            let pending = manifest.pending(stage);
            let label = format!("missing[{stage}]");
            detail_sample(&mut report, &label, pending.iter(), 20);
        }

        let (_, permanent) = manifest.failure_lists(stage);
        if !permanent.is_empty() {
            let label = format!("permanent[{stage}]");
            detail_sample(&mut report, &label, permanent.iter(), 10);
        }
    }

    let duplicate_groups = manifest.duplicates();
    report.detail(format!("duplicate_groups={}", duplicate_groups.len()));
    report.detail(format!(
        "duplicate_occurrences={}",
        manifest.raw_duplicates().len()
    ));
    report.detail(format!("parse_errors={}", manifest.parse_failures().len()));

    Ok(report)
}
