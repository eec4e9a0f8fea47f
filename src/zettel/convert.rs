//! Document conversion collaborator: extracts the transcription HTML from a
//! structured record and converts it to a document via an external
//! converter binary.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::zettel::stage::StageError;
use crate::zettel::util::run_command_with_optional_timeout;

static INTERNAL_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href="(/bestand[^"]*)""#).expect("internal href pattern")
});
static EXCESS_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("blank line pattern"));

const ARCHIVE_ORIGIN: &str = "https://niklas-luhmann-archiv.de";

#[derive(Debug, Clone)]
pub struct Converter {
    bin: PathBuf,
    timeout_secs: u64,
}

fn resolve_converter_bin(bin: &str) -> Result<PathBuf> {
    let candidate = Path::new(bin);
    if candidate.exists() {
        return Ok(candidate.to_path_buf());
    }
    let found = which::which(bin)
        .with_context(|| format!("converter binary `{bin}` not found on PATH"))?;
    Ok(found)
}

/// Card-internal links point at the archive root; absolutize them so the
/// converted document keeps working outside the site.
fn absolutize_internal_hrefs(html: &str) -> String {
    INTERNAL_HREF
        .replace_all(html, format!(r#"href="{ARCHIVE_ORIGIN}$1""#).as_str())
        .into_owned()
}

fn collapse_blank_lines(markdown: &str) -> String {
    let collapsed = EXCESS_BLANK_LINES.replace_all(markdown.trim(), "\n\n");
    format!("{collapsed}\n")
}

/// Pull the publishable transcription HTML out of a record. A record
/// without one can never convert, so the absence is permanent.
fn transcription_html(record: &Value) -> Result<String, StageError> {
    let transcription = record
        .get("transcription")
        .ok_or_else(|| StageError::Permanent("record has no transcription".to_string()))?;
    let ready = transcription
        .get("readyForPublication")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !ready {
        return Err(StageError::Permanent(
            "transcription not ready for publication".to_string(),
        ));
    }
    transcription
        .get("html")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StageError::Permanent("transcription has no html".to_string()))
}

impl Converter {
    pub fn new(bin: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            bin: resolve_converter_bin(bin)?,
            timeout_secs,
        })
    }

    fn run_converter(&self, html: &str) -> Result<String, StageError> {
        let mut input = tempfile::NamedTempFile::new()
            .map_err(|err| StageError::Transient(format!("tempfile failed: {err}")))?;
        input
            .write_all(html.as_bytes())
            .map_err(|err| StageError::Transient(format!("tempfile write failed: {err}")))?;

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-f").arg("html").arg("-t").arg("gfm").arg(input.path());
        let output = run_command_with_optional_timeout(&mut cmd, Some(self.timeout_secs))
            .map_err(|err| StageError::Transient(format!("converter failed to run: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::Permanent(format!(
                "converter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Convert one stored record to a document. Re-invokable per id; the
    /// caller overwrites the same artifact.
    pub fn convert_record_file(&self, record_path: &Path) -> Result<String, StageError> {
        let raw = fs::read_to_string(record_path)
            .map_err(|err| StageError::Transient(format!("record read failed: {err}")))?;
        let record: Value = serde_json::from_str(&raw).map_err(|err| {
            StageError::Permanent(format!("record is not valid json: {err}"))
        })?;

        let html = absolutize_internal_hrefs(&transcription_html(&record)?);
        let markdown = self.run_converter(&html)?;
        Ok(collapse_blank_lines(&markdown))
    }
}

#[cfg(test)]
mod tests {
    use super::{absolutize_internal_hrefs, collapse_blank_lines, transcription_html};
    use crate::zettel::stage::StageError;
    use serde_json::json;

    #[test]
    fn internal_hrefs_are_absolutized() {
        let html = r#"<a href="/bestand/zettelkasten/zettel/ZK_1_NB_1_V">1</a>"#;
        let got = absolutize_internal_hrefs(html);
        assert_eq!(
            got,
            r#"<a href="https://niklas-luhmann-archiv.de/bestand/zettelkasten/zettel/ZK_1_NB_1_V">1</a>"#
        );
    }

    #[test]
    fn external_hrefs_are_untouched() {
        let html = r#"<a href="https://example.com/x">x</a>"#;
        assert_eq!(absolutize_internal_hrefs(html), html);
    }

    #[test]
    fn blank_lines_collapse_to_paragraph_breaks() {
        let got = collapse_blank_lines("a\n\n\n\nb\n");
        assert_eq!(got, "a\n\nb\n");
    }

    #[test]
    fn ready_transcription_is_extracted() {
        let record = json!({
            "transcription": { "readyForPublication": true, "html": "<p>x</p>" }
        });
        assert_eq!(transcription_html(&record).expect("html"), "<p>x</p>");
    }

    #[test]
    fn unpublished_transcription_is_permanent() {
        let record = json!({
            "transcription": { "readyForPublication": false, "html": "<p>x</p>" }
        });
        assert!(matches!(
            transcription_html(&record),
            Err(StageError::Permanent(_))
        ));
    }

    #[test]
    fn missing_transcription_is_permanent() {
        let record = json!({ "other": 1 });
        assert!(matches!(
            transcription_html(&record),
            Err(StageError::Permanent(_))
        ));
    }
}
