use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;

/// Scratch space for one file's trip through the pipeline. The directory
/// and everything written into it are removed when the session is dropped,
/// whether processing succeeded or not.
pub struct ProcessingSession {
    pub id: String,
    pub source_file: String,
    dir: PathBuf,
    keep: bool,
}

impl ProcessingSession {
    pub fn start(sessions_root: &Path, source_file: &str, keep: bool) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = sessions_root.join(&id);
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(session = %id, file = source_file, "Session started");
        Ok(Self {
            id,
            source_file: source_file.to_string(),
            dir,
            keep,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a JSON artifact into the session directory.
    pub fn write_artifact<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(format!("{name}.json"));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

impl Drop for ProcessingSession {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            tracing::warn!(session = %self.id, error = %e, "Could not remove session artifacts");
        }
    }
}
