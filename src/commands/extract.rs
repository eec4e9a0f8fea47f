use anyhow::Result;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::zettel::extract::{ExtractionOutcome, extract_path};
use crate::zettel::manifest::Manifest;
use crate::zettel::paths::resolve_paths;
use crate::zettel::util::acquire_run_lock;

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub inputs: Vec<PathBuf>,
}

pub fn run(opts: &ExtractOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("extract");
    let paths = resolve_paths()?;
    let _lock = acquire_run_lock(&paths.lock_file())?;

    let mut manifest = Manifest::rebuild(&paths)?;
    let before = manifest.universe_len();

    let mut extraction = ExtractionOutcome::default();
    for input in &opts.inputs {
        extract_path(input, &mut extraction)?;
        report.detail(format!("processed {}", input.display()));
    }

    for (raw, err) in &extraction.failures {
        log::warn!(
            "{}",
            crate::logging::warn_line(&[("code", "ID_PARSE_ERROR"), ("raw", raw)])
        );
        manifest.register_parse_failure(raw, err);
    }

    let registered = manifest.register_universe(extraction.ids);
    manifest.persist(&paths)?;

    report.detail(format!("ids_added={}", registered.added));
    report.detail(format!("duplicate_occurrences={}", registered.repeated));
    report.detail(format!(
        "universe_total={} (was {before})",
        manifest.universe_len()
    ));
    report.detail(format!("universe_file={}", paths.universe_file().display()));

    if !extraction.failures.is_empty() {
        report.issue(format!(
            "{} unparseable identifiers (see {})",
            extraction.failures.len(),
            paths.parse_errors_file().display()
        ));
    }

    Ok(report)
}
