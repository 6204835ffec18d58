use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::CandidateFile;

const CHUNK_SIZE: usize = 8192;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "csv",
    "pdf",
    "txt",
    "text",
    #[cfg(feature = "xlsx")]
    "xlsx",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct DedupState {
    #[serde(default)]
    processed_hashes: Vec<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

pub struct DedupStats {
    pub total_processed: usize,
    pub watch_dir: PathBuf,
    pub state_path: PathBuf,
}

/// Content-hash gate in front of the pipeline. A file's identity is the
/// SHA-256 of its bytes, so renames and copies are not reprocessed.
pub struct DedupTracker {
    watch_dir: PathBuf,
    state_path: PathBuf,
    processed: BTreeSet<String>,
}

impl DedupTracker {
    pub fn open(watch_dir: &Path, state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(watch_dir)?;
        Ok(Self {
            watch_dir: watch_dir.to_path_buf(),
            state_path: state_path.to_path_buf(),
            processed: load_state(state_path),
        })
    }

    pub fn is_known(&self, hash: &str) -> bool {
        self.processed.contains(hash)
    }

    /// Unprocessed files in the watch directory, ordered by file name.
    /// Unreadable files are skipped with a warning and picked up again on
    /// the next scan.
    pub fn scan(&self) -> Result<Vec<CandidateFile>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.watch_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_supported_extension(p))
            .collect();
        paths.sort();

        let mut candidates = Vec::new();
        for path in paths {
            let (bytes, hash) = match read_and_hash(&path) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Could not read file, skipping");
                    continue;
                }
            };
            if self.is_known(&hash) {
                tracing::debug!(file = %path.display(), "Already processed");
                continue;
            }
            if candidates.iter().any(|c: &CandidateFile| c.hash == hash) {
                tracing::debug!(file = %path.display(), "Same content as an earlier file in this scan");
                continue;
            }
            candidates.push(CandidateFile { path, bytes, hash });
        }
        Ok(candidates)
    }

    /// Marks a hash as processed and rewrites the state file.
    pub fn admit(&mut self, hash: &str) -> Result<()> {
        if self.processed.insert(hash.to_string()) {
            self.save()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total_processed: self.processed.len(),
            watch_dir: self.watch_dir.clone(),
            state_path: self.state_path.clone(),
        }
    }

    fn save(&self) -> Result<()> {
        let state = DedupState {
            processed_hashes: self.processed.iter().cloned().collect(),
            last_updated: Some(chrono::Local::now().to_rfc3339()),
        };
        let json = serde_json::to_string_pretty(&state)?;
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Replace the state file atomically.
        let tmp = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp, format!("{json}\n"))?;
        std::fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }
}

fn load_state(path: &Path) -> BTreeSet<String> {
    if !path.exists() {
        return BTreeSet::new();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str::<DedupState>(&s).map_err(|e| e.to_string()));
    match parsed {
        Ok(state) => state.processed_hashes.into_iter().collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not load processed files");
            BTreeSet::new()
        }
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// SHA-256 over the bytes, fed in 8 KiB chunks.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        hasher.update(chunk);
    }
    hex::encode(hasher.finalize())
}

/// Reads a file and returns its bytes with their content hash.
pub fn read_and_hash(path: &Path) -> Result<(Vec<u8>, String)> {
    let bytes = std::fs::read(path)?;
    let hash = hash_bytes(&bytes);
    Ok((bytes, hash))
}
