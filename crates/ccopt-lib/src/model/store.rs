//! Directory-backed versioned model store
//!
//! Layout: `model_v{N}.json` holds the classifier, `model_v{N}.meta.json` its
//! metadata. The metadata file is written last and is the commit marker, so
//! a crash between the two writes leaves no resolvable version.

use super::metadata::ModelMetadata;
use crate::error::{OptimizerError, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const ARTIFACT_PREFIX: &str = "model_v";
const METADATA_SUFFIX: &str = ".meta.json";
const LOCK_FILE: &str = ".training.lock";

/// A lock file older than this whose holder is gone belongs to a crashed run
const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

/// Versioned model artifacts and metadata under one directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{}{}.json", ARTIFACT_PREFIX, version))
    }

    pub fn metadata_path(&self, version: u64) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", ARTIFACT_PREFIX, version, METADATA_SUFFIX))
    }

    /// Committed versions in ascending order
    pub fn list_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(v) = name
                .strip_prefix(ARTIFACT_PREFIX)
                .and_then(|rest| rest.strip_suffix(METADATA_SUFFIX))
                .and_then(|v| v.parse::<u64>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn latest_version(&self) -> Result<Option<u64>> {
        Ok(self.list_versions()?.last().copied())
    }

    /// Version the next commit will use
    pub fn next_version(&self) -> Result<u64> {
        Ok(self.latest_version()?.map_or(1, |v| v + 1))
    }

    pub fn read_metadata(&self, version: u64) -> Result<ModelMetadata> {
        let path = self.metadata_path(version);
        let bytes = fs::read(&path).map_err(|e| {
            OptimizerError::Artifact(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            OptimizerError::Artifact(format!("corrupt metadata {}: {}", path.display(), e))
        })
    }

    pub fn read_artifact(&self, version: u64) -> Result<Vec<u8>> {
        let path = self.artifact_path(version);
        fs::read(&path)
            .map_err(|e| OptimizerError::Artifact(format!("cannot read {}: {}", path.display(), e)))
    }

    /// Persist an artifact and then its metadata.
    ///
    /// `metadata.artifact_checksum` is overwritten with the checksum of
    /// `artifact`. Callers must hold the training lock.
    pub fn commit(&self, artifact: &[u8], metadata: &mut ModelMetadata) -> Result<()> {
        metadata.artifact_checksum = compute_checksum(artifact);

        write_atomic(&self.artifact_path(metadata.version), artifact)?;
        write_atomic(
            &self.metadata_path(metadata.version),
            &serde_json::to_vec_pretty(metadata)?,
        )?;

        info!(
            version = metadata.version,
            size = artifact.len(),
            checksum = %metadata.artifact_checksum,
            "Model committed"
        );
        Ok(())
    }

    /// Remove all but the newest `keep` versions; returns the removed versions.
    ///
    /// The latest version is never removed, so `keep` is treated as at least 1.
    pub fn prune(&self, keep: usize) -> Result<Vec<u64>> {
        let keep = keep.max(1);
        let versions = self.list_versions()?;
        if versions.len() <= keep {
            return Ok(Vec::new());
        }
        let stale = versions[..versions.len() - keep].to_vec();
        for &version in &stale {
            // Metadata first: once it is gone the version is unresolvable
            for path in [self.metadata_path(version), self.artifact_path(version)] {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "Failed to remove old model file");
                    }
                }
            }
            debug!(version, "Pruned model version");
        }
        Ok(stale)
    }

    /// Take the cross-process training lock
    pub fn lock(&self) -> Result<TrainingLock> {
        TrainingLock::acquire(&self.dir.join(LOCK_FILE))
    }
}

/// Exclusive training lock backed by a create-new lock file; released on drop.
///
/// The file records the holder's pid. A lock is stale once it is older than
/// an hour and its holder is no longer running on this host.
#[derive(Debug)]
pub struct TrainingLock {
    path: PathBuf,
}

impl TrainingLock {
    fn acquire(path: &Path) -> Result<Self> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match stale_contents(path) {
                Some(observed) => Self::take_over(path, &observed),
                None => Err(in_progress(path)),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "pid={} acquired_at={}", std::process::id(), Utc::now().to_rfc3339())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Move a stale lock aside, then claim the path.
    ///
    /// Only one racer can rename the file. A racer that moved a lock which
    /// no longer matches `observed` has grabbed a freshly created one: it
    /// links it back and backs off.
    fn take_over(path: &Path, observed: &str) -> Result<Self> {
        let aside = aside_path(path);
        match fs::rename(path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(in_progress(path)),
            Err(e) => return Err(e.into()),
        }

        let moved = fs::read_to_string(&aside).unwrap_or_default();
        if moved != observed {
            if let Err(e) = fs::hard_link(&aside, path) {
                if e.kind() != ErrorKind::AlreadyExists {
                    warn!(path = %path.display(), error = %e, "Failed to restore training lock");
                }
            }
            remove_aside(&aside);
            return Err(in_progress(path));
        }

        remove_aside(&aside);
        warn!(path = %path.display(), holder = observed.trim(), "Took over stale training lock");
        Self::create(path).map_err(|e| lock_error(path, e))
    }
}

impl Drop for TrainingLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release training lock");
        }
    }
}

fn in_progress(path: &Path) -> OptimizerError {
    OptimizerError::TrainingInProgress(path.display().to_string())
}

fn lock_error(path: &Path, e: std::io::Error) -> OptimizerError {
    if e.kind() == ErrorKind::AlreadyExists {
        in_progress(path)
    } else {
        e.into()
    }
}

/// Contents of the lock at `path` when it is stale
fn stale_contents(path: &Path) -> Option<String> {
    let aged = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE);
    if !aged {
        return None;
    }
    let contents = fs::read_to_string(path).ok()?;
    (!holder_alive(&contents)).then_some(contents)
}

fn holder_alive(contents: &str) -> bool {
    let pid = contents
        .split_whitespace()
        .find_map(|field| field.strip_prefix("pid="))
        .and_then(|pid| pid.parse::<u32>().ok());
    match pid {
        Some(pid) if pid == std::process::id() => true,
        Some(pid) => process_exists(pid),
        None => false,
    }
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_exists(_pid: u32) -> bool {
    false
}

fn aside_path(path: &Path) -> PathBuf {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(
        ".stale-{}-{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    PathBuf::from(aside)
}

fn remove_aside(aside: &Path) {
    if let Err(e) = fs::remove_file(aside) {
        warn!(path = %aside.display(), error = %e, "Failed to remove stale training lock");
    }
}

/// Write bytes to a temp file, fsync, then rename over the target
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Hex-encoded SHA-256 of `data`
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
