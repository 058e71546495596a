// src/watch/hash.rs

//! Content hashing for material-change detection.
//!
//! Editors and build tools touch files without changing them. Each watched
//! path's last seen content hash is remembered so only real content changes
//! (and removals) produce refresh signals.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::engine::FileChangeKind;

/// Hash a single file's contents.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// In-memory map of path to last observed content hash.
#[derive(Debug, Default)]
pub struct ContentHashes {
    hashes: HashMap<PathBuf, String>,
}

impl ContentHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Record a change event and report whether it was material.
    ///
    /// A file that can no longer be read counts as removed.
    pub fn observe(&mut self, path: &Path, kind: FileChangeKind) -> bool {
        if kind == FileChangeKind::Removed {
            self.hashes.remove(path);
            return true;
        }

        match compute_file_hash(path) {
            Ok(hash) => {
                let previous = self.hashes.insert(path.to_path_buf(), hash.clone());
                let changed = previous.as_deref() != Some(hash.as_str());
                debug!(path = %path.display(), changed, "observed file content");
                changed
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "changed file unreadable; treating as removed");
                self.hashes.remove(path);
                true
            }
        }
    }
}
