//! Scratch staging area for fetched charts.
//!
//! Each operation stages charts into its own name-prefixed temporary
//! directory. The directory is removed when the stage is dropped, so
//! cleanup happens on every exit path, including errors and cancellation.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::ChartLocations;

/// Allocate a unique scratch directory for an environment's charts.
///
/// The directory name is prefixed with the environment name so stray
/// directories are attributable. `root` overrides the system temp dir.
pub fn scratch_dir(root: Option<&Path>, env_name: &str) -> io::Result<TempDir> {
    let prefix = format!("{env_name}-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
}

/// Charts staged on disk for one install, with the scratch directory that
/// owns them.
#[derive(Debug)]
pub struct StagedCharts {
    dir: TempDir,
    pub locations: ChartLocations,
}

impl StagedCharts {
    pub fn new(dir: TempDir, locations: ChartLocations) -> Self {
        Self { dir, locations }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The scratch path, for asserting cleanup in tests.
    pub fn path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn scratch_dir_is_name_prefixed() {
        let dir = scratch_dir(None, "calm-heron-7").unwrap();
        let file_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("calm-heron-7-"), "got {file_name}");
    }

    #[test]
    fn dropping_stage_removes_directory() {
        let dir = scratch_dir(None, "calm-heron-7").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.exists());
        let stage = StagedCharts::new(dir, BTreeMap::new());
        drop(stage);
        assert!(!path.exists());
    }
}
