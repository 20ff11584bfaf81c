//! Scratch-file lifecycle for materialized programs.
//!
//! Every execution writes its program to a file named from the execution
//! id, so concurrent requests never share a path. The file is removed on
//! drop whether the run succeeded or failed; a failed removal is logged,
//! never raised.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::error::DaemonError;

/// File extension for materialized programs.
pub const MODULE_SUFFIX: &str = "flow";

/// A program materialized under the scratch directory.
pub struct ModuleFile {
    path: PathBuf,
}

impl ModuleFile {
    /// Write `code` to a uniquely named file under `scratch`.
    pub async fn materialize(
        scratch: &Path,
        execution_id: &str,
        code: &str,
    ) -> Result<Self, DaemonError> {
        fs::create_dir_all(scratch).await?;
        let path = scratch.join(module_name(execution_id));
        fs::write(&path, code).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the materialized program back, as the loader sees it.
    pub async fn load(&self) -> Result<String, DaemonError> {
        Ok(fs::read_to_string(&self.path).await?)
    }
}

impl Drop for ModuleFile {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %error, "failed to remove scratch module");
            }
        }
    }
}

/// Remove scratch modules left behind by a previous crash.
///
/// Runs once at startup, before the daemon accepts requests.
pub async fn sweep_orphans(scratch: &Path) -> Result<usize, DaemonError> {
    fs::create_dir_all(scratch).await?;

    let mut removed = 0usize;
    let mut entries = fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MODULE_SUFFIX) {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(error) => {
                warn!(path = %path.display(), %error, "could not remove orphaned module");
            }
        }
    }

    if removed > 0 {
        info!(removed, "swept orphaned scratch modules");
    }
    Ok(removed)
}

/// Execution ids come from callers; keep them filesystem-safe.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Scratch filename for an execution: the sanitized id plus a short hash
/// of the raw id, so ids that sanitize alike still get distinct files.
fn module_name(execution_id: &str) -> String {
    let tag = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(execution_id) as u32;
    format!("{}-{tag:08x}.{MODULE_SUFFIX}", sanitize_id(execution_id))
}
