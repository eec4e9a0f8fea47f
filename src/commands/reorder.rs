use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::{CommandReport, detail_sample};
use crate::zettel::extract::id_part_of_link;
use crate::zettel::id::Identifier;

#[derive(Debug, Clone)]
pub struct ReorderOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
}

fn default_output(input: &PathBuf) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|v| v.to_str())
        .unwrap_or("links");
    let ext = input.extension().and_then(|v| v.to_str()).unwrap_or("txt");
    input.with_file_name(format!("{stem}_reord.{ext}"))
}

/// Sort a newline list of links (or bare identifiers) into canonical
/// archive order. Lines whose identifier part does not parse are excluded
/// from the output and reported.
pub fn run(opts: &ReorderOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("reorder");

    let raw = fs::read_to_string(&opts.input)
        .with_context(|| format!("failed to read {}", opts.input.display()))?;

    let mut entries: Vec<(Identifier, String)> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match Identifier::parse(id_part_of_link(trimmed)) {
            Ok(id) => entries.push((id, trimmed.to_string())),
            Err(_) => rejected.push(trimmed.to_string()),
        }
    }

    entries.sort_by_cached_key(|(id, line)| (id.canonical_key(), id.format(), line.clone()));

    let output = opts.output.clone().unwrap_or_else(|| default_output(&opts.input));
    let mut out = String::new();
    for (_, line) in &entries {
        out.push_str(line);
        out.push('\n');
    }
    fs::write(&output, out).with_context(|| format!("failed to write {}", output.display()))?;

    report.detail(format!("lines_sorted={}", entries.len()));
    report.detail(format!("output={}", output.display()));
    if !rejected.is_empty() {
        detail_sample(&mut report, "rejected", rejected.iter(), 10);
        report.issue(format!("{} unparseable lines excluded", rejected.len()));
    }

    Ok(report)
}
