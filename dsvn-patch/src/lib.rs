//! DSvn Patch Engine
//!
//! Applies unified diffs to a working copy managed by `dsvn-wc`:
//! - Unified diff parsing, forwards or reversed
//! - Target resolution with path stripping and containment checks
//! - Hunk matching at the recorded line, nearby, or anywhere, with fuzz
//! - Rejected hunks saved to `<target>.svnpatch.rej`
//! - Added files create missing parent directories; directories emptied
//!   by the patch are deleted

pub mod apply;
pub mod error;
pub mod lines;
pub mod matcher;
pub mod notify;
pub mod parse;
mod target;

pub use apply::{Callbacks, HunkOutcome, PatchReport, TargetOutcome, apply_patch_file};
pub use error::{PatchError, Result};
pub use notify::{ContentState, HunkNotification, Notification, Notifier, NotifyAction, PatchFilter};
pub use parse::{Hunk, Patch, PatchFile};
pub use target::strip_path;

use dsvn_wc::WcConfig;
use serde::{Deserialize, Serialize};

/// Highest fuzz level a hunk may be matched with
pub const MAX_FUZZ: usize = 2;

/// Patch run options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchOptions {
    /// Report what would happen without changing the working copy
    pub dry_run: bool,
    /// Leading path components removed from target names
    pub strip_count: usize,
    /// Apply the patch in reverse
    pub reverse: bool,
    /// Compare lines with whitespace removed
    pub ignore_whitespace: bool,
    pub remove_tempfiles: bool,
    pub max_fuzz: usize,
    pub keep_reject_files: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            strip_count: 0,
            reverse: false,
            ignore_whitespace: false,
            remove_tempfiles: true,
            max_fuzz: MAX_FUZZ,
            keep_reject_files: true,
        }
    }
}

impl PatchOptions {
    /// Defaults taken from a working copy's configuration
    pub fn from_config(config: &WcConfig) -> Self {
        Self {
            remove_tempfiles: config.remove_tempfiles,
            max_fuzz: config.max_fuzz.min(MAX_FUZZ),
            keep_reject_files: config.keep_reject_files,
            ..Default::default()
        }
    }
}
