pub mod extract;
pub mod reorder;
pub mod run;
pub mod status;
pub mod verify;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// List at most `limit` entries as report details, with a trailing summary
/// line pointing at the full on-disk list when truncated.
pub fn detail_sample<'a, I>(report: &mut CommandReport, label: &str, items: I, limit: usize)
where
    I: IntoIterator<Item = &'a String>,
{
    let mut shown = 0usize;
    let mut total = 0usize;
    for item in items {
        total += 1;
        if shown < limit {
            report.detail(format!("{label}: {item}"));
            shown += 1;
        }
    }
    if total > shown {
        report.detail(format!("{label}: ...and {} more", total - shown));
    }
}
