//! Progress reporting and target filtering hooks

use crate::error::Result;
use dsvn_wc::Kind;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    Skip,
    Delete,
    Add,
    Patch,
    AppliedHunk,
    RejectedHunk,
}

/// What happened to the text of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    /// Skipped: nothing versioned there
    Missing,
    /// Skipped: a directory is in the way
    Obstructed,
    Unknown,
    /// Some hunks were rejected
    Conflicted,
    /// Applied on top of local modifications
    Merged,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkNotification {
    pub original_start: usize,
    pub original_length: usize,
    pub modified_start: usize,
    pub modified_length: usize,
    pub matched_line: usize,
    pub fuzz: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub path: PathBuf,
    pub action: NotifyAction,
    pub kind: Option<Kind>,
    pub content_state: Option<ContentState>,
    pub hunk: Option<HunkNotification>,
}

impl Notification {
    pub fn new(path: impl Into<PathBuf>, action: NotifyAction) -> Self {
        Self { path: path.into(), action, kind: None, content_state: None, hunk: None }
    }
}

/// One line per notification, in the style of `svn patch`
impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.display();
        match self.action {
            NotifyAction::Skip => write!(f, "Skipped '{}'", path),
            NotifyAction::Delete => write!(f, "D         {}", path),
            NotifyAction::Add => write!(f, "A         {}", path),
            NotifyAction::Patch => {
                let letter = match self.content_state {
                    Some(ContentState::Conflicted) => 'C',
                    Some(ContentState::Merged) => 'G',
                    _ => 'U',
                };
                write!(f, "{}         {}", letter, path)
            }
            NotifyAction::AppliedHunk | NotifyAction::RejectedHunk => {
                let Some(h) = self.hunk else {
                    return Ok(());
                };
                let header = format!(
                    "@@ -{},{} +{},{} @@",
                    h.original_start, h.original_length, h.modified_start, h.modified_length
                );
                if self.action == NotifyAction::RejectedHunk {
                    return write!(f, ">         rejected hunk {}", header);
                }
                let offset = h.matched_line as i64 - h.original_start as i64;
                match (offset, h.fuzz) {
                    (0, 0) => Ok(()),
                    (0, fuzz) => write!(f, ">         applied hunk {} with fuzz {}", header, fuzz),
                    (offset, 0) => write!(f, ">         applied hunk {} with offset {}", header, offset),
                    (offset, fuzz) => {
                        write!(f, ">         applied hunk {} with offset {} and fuzz {}", header, offset, fuzz)
                    }
                }
            }
        }
    }
}

/// Receives progress notifications. Delivery is best-effort.
pub trait Notifier {
    fn notify(&self, notification: &Notification);
}

impl<F> Notifier for F
where
    F: Fn(&Notification),
{
    fn notify(&self, notification: &Notification) {
        self(notification)
    }
}

/// Decides whether a target is skipped once its patched text is about to
/// be produced. Returning `true` skips the target.
pub trait PatchFilter {
    fn filter(&self, canon_path: &str, patched_path: &Path, reject_path: &Path) -> Result<bool>;
}

impl<F> PatchFilter for F
where
    F: Fn(&str, &Path, &Path) -> bool,
{
    fn filter(&self, canon_path: &str, patched_path: &Path, reject_path: &Path) -> Result<bool> {
        Ok(self(canon_path, patched_path, reject_path))
    }
}
