//! Deferred filesystem work recorded alongside store changes
//!
//! Items are queued in the same transaction as the rows they belong to and
//! run afterwards by [`run`]. An item stays queued until it has completed, so
//! a crash leaves it to be retried by the next run (for example by
//! `cleanup`). Every item must therefore be safe to repeat.

use crate::cancel::{Cancel, check_cancel};
use crate::error::{Result, WcError};
use crate::node::{mtime_micros, node_url};
use crate::properties::svn_props;
use crate::translate::{self, EolStyle, TranslatingWriter};
use crate::types::Kind;
use crate::wc_db::WcDb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum WorkItem {
    /// Write the working file from its pristine text (or from
    /// `source_abspath`) in working-file form
    FileInstall {
        local_abspath: PathBuf,
        source_abspath: Option<PathBuf>,
        use_commit_times: bool,
        record_fileinfo: bool,
    },
    FileRemove {
        local_abspath: PathBuf,
    },
    DirRemove {
        local_abspath: PathBuf,
        recursive: bool,
    },
    /// Apply `svn:executable` and `svn:needs-lock` to the file mode
    SyncFileFlags {
        local_abspath: PathBuf,
    },
    RecordFileinfo {
        local_abspath: PathBuf,
    },
}

impl WorkItem {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn local_abspath(&self) -> &Path {
        match self {
            WorkItem::FileInstall { local_abspath, .. }
            | WorkItem::FileRemove { local_abspath }
            | WorkItem::DirRemove { local_abspath, .. }
            | WorkItem::SyncFileFlags { local_abspath }
            | WorkItem::RecordFileinfo { local_abspath } => local_abspath,
        }
    }
}

/// Run the queue of the segment holding `wri_abspath` until it is empty.
/// Returns the number of items run.
pub fn run(db: &WcDb, wri_abspath: &Path, cancel: Option<&dyn Cancel>) -> Result<usize> {
    let mut count = 0;
    loop {
        check_cancel(cancel)?;
        let Some((id, item)) = db.wq_fetch(wri_abspath)? else {
            break;
        };
        tracing::debug!("Running work item {}: {:?}", id, item);
        if let Err(e) = dispatch(db, &item) {
            tracing::warn!("Work item {} failed on {:?}: {}", id, item.local_abspath(), e);
            return Err(e);
        }
        db.wq_completed(wri_abspath, id)?;
        count += 1;
    }
    Ok(count)
}

fn dispatch(db: &WcDb, item: &WorkItem) -> Result<()> {
    match item {
        WorkItem::FileInstall { local_abspath, source_abspath, use_commit_times, record_fileinfo } => {
            file_install(db, local_abspath, source_abspath.as_deref(), *use_commit_times, *record_fileinfo)
        }
        WorkItem::FileRemove { local_abspath } => match fs::remove_file(local_abspath) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(WcError::io(local_abspath, e)),
            _ => Ok(()),
        },
        WorkItem::DirRemove { local_abspath, recursive } => {
            let removed = if *recursive { fs::remove_dir_all(local_abspath) } else { fs::remove_dir(local_abspath) };
            match removed {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                // Unversioned leftovers keep a directory alive.
                Err(e) if !*recursive && e.kind() == io::ErrorKind::DirectoryNotEmpty => Ok(()),
                Err(e) => Err(WcError::io(local_abspath, e)),
            }
        }
        WorkItem::SyncFileFlags { local_abspath } => sync_file_flags(db, local_abspath),
        WorkItem::RecordFileinfo { local_abspath } => record_fileinfo(db, local_abspath),
    }
}

fn file_install(
    db: &WcDb,
    local_abspath: &Path,
    source_abspath: Option<&Path>,
    use_commit_times: bool,
    record: bool,
) -> Result<()> {
    let info = db.read_info(local_abspath)?;
    if info.kind == Kind::Symlink {
        if let Some(target) = &info.target {
            return install_symlink(local_abspath, target);
        }
    }

    let contents = match source_abspath {
        Some(src) => bytes::Bytes::from(fs::read(src).map_err(|e| WcError::io(src, e))?),
        None => {
            let checksum = info.checksum.as_ref().ok_or_else(|| {
                WcError::Corrupt(format!("Node '{}' has no pristine text to install", local_abspath.display()))
            })?;
            db.pristine_read(local_abspath, checksum)?
        }
    };

    let props = db.read_props(local_abspath)?;
    let eol = EolStyle::from_props(&props);
    let url = if props.contains(svn_props::KEYWORDS) { node_url(db, local_abspath)? } else { None };
    let keywords =
        translate::keywords_for(&props, info.changed.rev, url.as_deref(), info.changed.date, info.changed.author.as_deref());

    let tmp = db.temp_wcroot_tempdir(local_abspath)?.join(format!("install-{}.tmp", uuid::Uuid::new_v4()));
    let file = fs::File::create(&tmp).map_err(|e| WcError::io(&tmp, e))?;
    let mut writer = TranslatingWriter::new(file, &eol, keywords);
    let written = writer.write_all(&contents).and_then(|()| writer.finish()).and_then(|f| f.sync_all());
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            tracing::warn!("Failed to remove {:?}: {}", tmp, cleanup);
        }
        return Err(WcError::io(&tmp, e));
    }
    fs::rename(&tmp, local_abspath).map_err(|e| WcError::io(local_abspath, e))?;

    if use_commit_times {
        if let Some(date) = info.changed.date.and_then(|d| u64::try_from(d).ok()) {
            let when = UNIX_EPOCH + Duration::from_micros(date);
            set_mtime(local_abspath, when)?;
        }
    }
    // Flags last: a needs-lock file ends up read-only.
    sync_file_flags(db, local_abspath)?;
    if record {
        record_fileinfo(db, local_abspath)?;
    }
    Ok(())
}

#[cfg(unix)]
fn install_symlink(local_abspath: &Path, target: &str) -> Result<()> {
    match fs::remove_file(local_abspath) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(WcError::io(local_abspath, e)),
        _ => {}
    }
    std::os::unix::fs::symlink(target, local_abspath).map_err(|e| WcError::io(local_abspath, e))
}

#[cfg(not(unix))]
fn install_symlink(local_abspath: &Path, target: &str) -> Result<()> {
    fs::write(local_abspath, format!("link {}", target)).map_err(|e| WcError::io(local_abspath, e))
}

fn set_mtime(path: &Path, when: SystemTime) -> Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).map_err(|e| WcError::io(path, e))?;
    file.set_modified(when).map_err(|e| WcError::io(path, e))
}

fn sync_file_flags(db: &WcDb, local_abspath: &Path) -> Result<()> {
    let info = db.read_info(local_abspath)?;
    if info.kind != Kind::File {
        return Ok(());
    }
    let props = db.read_props(local_abspath)?;
    let meta = match fs::metadata(local_abspath) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(WcError::io(local_abspath, e)),
    };
    let mut perms = meta.permissions();
    let readonly = props.contains(svn_props::NEEDS_LOCK) && info.lock.is_none();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut mode = perms.mode();
        mode = if props.contains(svn_props::EXECUTABLE) {
            // Execute wherever read is granted
            mode | ((mode & 0o444) >> 2)
        } else {
            mode & !0o111
        };
        mode = if readonly { mode & !0o222 } else { mode | 0o200 };
        perms.set_mode(mode);
    }
    #[cfg(not(unix))]
    perms.set_readonly(readonly);

    fs::set_permissions(local_abspath, perms).map_err(|e| WcError::io(local_abspath, e))
}

fn record_fileinfo(db: &WcDb, local_abspath: &Path) -> Result<()> {
    let meta = match fs::metadata(local_abspath) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(WcError::io(local_abspath, e)),
    };
    let Some(mtime) = mtime_micros(&meta) else {
        return Ok(());
    };
    db.record_fileinfo(local_abspath, meta.len() as i64, mtime)
}
