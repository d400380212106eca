//! Per-working-copy settings stored at `.svn/config.json`

use crate::error::{Result, WcError};
use crate::schema::{self, CONFIG_FILE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WcConfig {
    /// Number of `read_info` results kept in memory
    pub entries_cache_capacity: usize,
    /// Give installed files the last-changed time instead of the current time
    pub use_commit_times: bool,
    /// Largest amount of context lines a hunk may ignore while matching
    pub max_fuzz: usize,
    /// Delete the scratch files of a patch run when it finishes
    pub remove_tempfiles: bool,
    /// Write `.svnpatch.rej` files for rejected hunks
    pub keep_reject_files: bool,
}

impl Default for WcConfig {
    fn default() -> Self {
        Self {
            entries_cache_capacity: 256,
            use_commit_times: false,
            max_fuzz: 2,
            remove_tempfiles: true,
            keep_reject_files: true,
        }
    }
}

/// Nearest directory at or above `path` that holds a store
fn find_segment_root(path: &Path) -> Option<PathBuf> {
    let mut dir = path.to_path_buf();
    loop {
        if schema::has_store(&dir) {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

impl WcConfig {
    /// Load the config of the working copy containing `path`; defaults when
    /// there is no working copy or no config file.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(root) = find_segment_root(path) else {
            return Ok(Self::default());
        };
        let config_path = schema::adm_dir(&root).join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path).map_err(|e| WcError::io(&config_path, e))?;
        let config: WcConfig = serde_json::from_str(&data)?;
        tracing::debug!("Loaded working copy config from {:?}", config_path);
        Ok(config)
    }

    /// Save to the administrative area of the segment rooted at `segment_root`
    pub fn save(&self, segment_root: &Path) -> Result<()> {
        let config_path = schema::adm_dir(segment_root).join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data).map_err(|e| WcError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &config_path).map_err(|e| WcError::io(&config_path, e))?;
        Ok(())
    }
}
