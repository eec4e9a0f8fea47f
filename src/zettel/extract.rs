//! Link/ID extraction collaborator: pulls identifier links out of index
//! HTML (`<li><a href>` entries) or plain newline link lists, and derives
//! the identifier from each link.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use crate::zettel::id::{Identifier, ParseError};

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<li[^>]*>(.*?)</li>").expect("list item pattern"));
static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a[^>]*\bhref="([^"]+)""#).expect("href pattern"));

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Every identifier occurrence in first-seen order. Repeats are kept so
    /// the manifest can count duplicate occurrences.
    pub ids: Vec<Identifier>,
    pub failures: Vec<(String, ParseError)>,
}

impl ExtractionOutcome {
    fn push_raw(&mut self, raw: &str) {
        match Identifier::parse(raw) {
            Ok(id) => self.ids.push(id),
            Err(err) => self.failures.push((raw.to_string(), err)),
        }
    }
}

/// The identifier is the last fragment (`#ZK_...`) when present, otherwise
/// the last path segment of the link. Bare identifier lines pass through
/// unchanged.
pub fn id_part_of_link(link: &str) -> &str {
    let tail = match link.rsplit_once('#') {
        Some((_, fragment)) if !fragment.is_empty() => fragment,
        _ => link,
    };
    tail.rsplit('/').next().unwrap_or(tail)
}

pub fn extract_from_html(content: &str, out: &mut ExtractionOutcome) {
    for item in LIST_ITEM.captures_iter(content) {
        for href in HREF.captures_iter(&item[1]) {
            out.push_raw(id_part_of_link(&href[1]));
        }
    }
}

pub fn extract_from_lines(content: &str, out: &mut ExtractionOutcome) {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        out.push_raw(id_part_of_link(trimmed));
    }
}

/// Extract identifiers from one input file: `.html`/`.htm` files are parsed
/// for list-item links, anything else is treated as a newline link/id list.
pub fn extract_path(path: &Path, out: &mut ExtractionOutcome) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|v| v.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => extract_from_html(&content, out),
        _ => extract_from_lines(&content, out),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ExtractionOutcome, extract_from_html, extract_from_lines, id_part_of_link};

    #[test]
    fn id_part_prefers_fragment_over_path() {
        assert_eq!(
            id_part_of_link("https://example.org/branchview#ZK_1_NB_1_V"),
            "ZK_1_NB_1_V"
        );
        assert_eq!(
            id_part_of_link("https://example.org/zettel/ZK_1_NB_2_V"),
            "ZK_1_NB_2_V"
        );
        assert_eq!(id_part_of_link("ZK_1_NB_3_V"), "ZK_1_NB_3_V");
    }

    #[test]
    fn html_list_items_yield_ids_in_document_order() {
        let html = r##"<ul>
            <li><a href="/zettel/ZK_1_NB_1_V">1</a></li>
            <li class="sub"><a href="/zettel/ZK_1_NB_1-5_V">1-5</a></li>
            <p><a href="/zettel/ZK_1_NB_9_V">not in a list item</a></p>
        </ul>"##;
        let mut out = ExtractionOutcome::default();
        extract_from_html(html, &mut out);
        let got: Vec<String> = out.ids.iter().map(|id| id.format()).collect();
        assert_eq!(got, ["ZK_1_NB_1_V", "ZK_1_NB_1-5_V"]);
        assert!(out.failures.is_empty());
    }

    #[test]
    fn line_lists_keep_repeats_and_collect_failures() {
        let text = "ZK_1_NB_1_V\n\n# comment\nZK_1_NB_1_V\nnot an id!\n";
        let mut out = ExtractionOutcome::default();
        extract_from_lines(text, &mut out);
        assert_eq!(out.ids.len(), 2);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].0, "not an id!");
    }
}
