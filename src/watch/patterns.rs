// src/watch/patterns.rs

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::WatchSection;
use crate::types::ServerMode;

/// Compiled include/exclude globs, evaluated against paths relative to a
/// watch root (e.g. `"src/test/java/FooTest.java"`).
#[derive(Clone)]
pub struct WatchPatterns {
    include: GlobSet,
    exclude: GlobSet,
    include_count: usize,
}

impl fmt::Debug for WatchPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchPatterns")
            .field("include_count", &self.include_count)
            .finish_non_exhaustive()
    }
}

impl WatchPatterns {
    pub fn compile(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
            include_count: include.len(),
        })
    }

    /// No include patterns: nothing can ever match.
    pub fn is_empty(&self) -> bool {
        self.include_count == 0
    }

    pub fn matches_relative(&self, rel_path: &str) -> bool {
        self.include.is_match(rel_path) && !self.exclude.is_match(rel_path)
    }

    /// Match an absolute event path against these patterns under `root`.
    pub fn matches(&self, root: &Path, path: &Path) -> bool {
        match relative_str(root, path) {
            Some(rel) => self.matches_relative(&rel),
            None => false,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern '{pattern}'"))?;
        builder.add(glob);
    }
    builder.build().context("building glob set")
}

/// `path` relative to `root` with forward slashes, retrying on canonical
/// paths when the prefixes differ (symlinked temp dirs on macOS).
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    let (root_canon, path_canon) = (root.canonicalize().ok()?, path.canonicalize().ok()?);
    path_canon
        .strip_prefix(&root_canon)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

/// Pattern sets for both families of server modes.
#[derive(Debug, Clone)]
pub struct ModePatterns {
    pub standard: WatchPatterns,
    pub light_weight: WatchPatterns,
}

impl ModePatterns {
    pub fn from_config(watch: &WatchSection) -> Result<Self> {
        Ok(Self {
            standard: WatchPatterns::compile(&watch.patterns, &watch.exclude)?,
            light_weight: WatchPatterns::compile(&watch.light_weight_patterns, &watch.exclude)?,
        })
    }

    /// Standard-ready modes watch test sources; LightWeight and Hybrid use
    /// the (usually empty) light-weight set.
    pub fn for_mode(&self, mode: ServerMode) -> &WatchPatterns {
        if mode.is_standard_ready() {
            &self.standard
        } else {
            &self.light_weight
        }
    }
}
