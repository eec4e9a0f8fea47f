use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::zettel::stage::StageId;

#[derive(Debug, Clone)]
pub struct ZkPaths {
    pub archive_home: PathBuf,
    pub manifest_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub records_dir: PathBuf,
    pub documents_dir: PathBuf,
}

impl ZkPaths {
    pub fn stage_dir(&self, stage: StageId) -> &PathBuf {
        match stage {
            StageId::Snapshot => &self.snapshots_dir,
            StageId::Fetch => &self.records_dir,
            StageId::Convert => &self.documents_dir,
        }
    }

    pub fn universe_file(&self) -> PathBuf {
        self.manifest_dir.join("universe.txt")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.manifest_dir.join("ledger.jsonl")
    }

    pub fn missing_file(&self, stage: StageId) -> PathBuf {
        self.manifest_dir.join(format!("missing_{}.txt", stage.as_str()))
    }

    pub fn duplicates_file(&self) -> PathBuf {
        self.manifest_dir.join("duplicates.txt")
    }

    pub fn duplicate_occurrences_file(&self) -> PathBuf {
        self.manifest_dir.join("duplicate_occurrences.txt")
    }

    pub fn parse_errors_file(&self) -> PathBuf {
        self.manifest_dir.join("parse_errors.txt")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.archive_home.join(".zkarch.lock")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ZkPaths> {
    let home = required_home_dir()?;
    let archive_home = env_or_default_path("ZKARCH_HOME", home.join("zettelkasten"));

    let manifest_dir = env_or_default_path("ZKARCH_MANIFEST_DIR", archive_home.join("manifest"));
    let snapshots_dir = env_or_default_path("ZKARCH_SNAPSHOTS_DIR", archive_home.join("snapshots"));
    let records_dir = env_or_default_path("ZKARCH_RECORDS_DIR", archive_home.join("records"));
    let documents_dir = env_or_default_path("ZKARCH_DOCUMENTS_DIR", archive_home.join("documents"));

    Ok(ZkPaths {
        archive_home,
        manifest_dir,
        snapshots_dir,
        records_dir,
        documents_dir,
    })
}
