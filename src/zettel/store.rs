use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::zettel::paths::ZkPaths;
use crate::zettel::stage::{ArtifactRef, StageId};

/// Artifact layout: one file per identifier per stage, addressed by the
/// canonical formatted string, overwritten on re-processing.
pub fn artifact_path(paths: &ZkPaths, stage: StageId, id_key: &str) -> PathBuf {
    paths
        .stage_dir(stage)
        .join(format!("{id_key}.{}", stage.artifact_ext()))
}

pub fn file_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(bytes_hash(&bytes))
}

pub fn bytes_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write an artifact atomically (tempfile in the target directory, then
/// rename over any previous version).
pub fn write_artifact(
    paths: &ZkPaths,
    stage: StageId,
    id_key: &str,
    bytes: &[u8],
) -> Result<ArtifactRef> {
    let dir = paths.stage_dir(stage);
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let target = artifact_path(paths, stage, id_key);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create tempfile in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write {}", target.display()))?;
    tmp.persist(&target)
        .with_context(|| format!("failed to persist {}", target.display()))?;

    Ok(ArtifactRef {
        path: target.display().to_string(),
        sha256: bytes_hash(bytes),
    })
}

/// Map of identifier string to artifact path for every artifact present on
/// disk for `stage`. A missing stage directory is an empty map, not an
/// error.
pub fn scan_stage(paths: &ZkPaths, stage: StageId) -> Result<BTreeMap<String, PathBuf>> {
    let dir = paths.stage_dir(stage);
    if !dir.exists() {
        return Ok(BTreeMap::new());
    }

    let mut out = BTreeMap::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|v| v.to_str()) != Some(stage.artifact_ext()) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|v| v.to_str()) else {
            continue;
        };
        out.insert(stem.to_string(), path);
    }
    Ok(out)
}
