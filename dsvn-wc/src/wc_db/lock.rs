//! Recursive advisory write locks on working copy directories
//!
//! A lock row records how many levels below its directory it covers; a
//! negative count covers the whole subtree.

use super::{Location, WcDb};
use crate::error::{Result, WcError};
use crate::paths::relpath_skip_ancestor;
use rusqlite::{ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};

fn locked_levels(conn: &rusqlite::Connection, relpath: &str) -> Result<Option<i32>> {
    let levels = conn
        .prepare_cached("SELECT locked_levels FROM wc_lock WHERE local_dir_relpath = ?1")?
        .query_row([relpath], |r| r.get(0))
        .optional()?;
    Ok(levels)
}

fn covers(levels: i32, distance: i32) -> bool {
    levels < 0 || distance <= levels
}

impl WcDb {
    /// Walk from `local_abspath` upwards and return the first lock that
    /// covers it, with the location it is recorded at
    fn covering_lock(&self, start: Location, include_self: bool) -> Result<Option<Location>> {
        let (mut seg, mut relpath) = start;
        let mut distance = 0;
        if !include_self {
            match self.parent_location(&seg, &relpath)? {
                Some(((pseg, prel), _)) => {
                    seg = pseg;
                    relpath = prel;
                    distance = 1;
                }
                None => return Ok(None),
            }
        }
        loop {
            let levels = locked_levels(&seg.conn(), &relpath)?;
            if let Some(levels) = levels {
                if covers(levels, distance) {
                    return Ok(Some((seg, relpath)));
                }
            }
            match self.parent_location(&seg, &relpath)? {
                Some(((pseg, prel), _)) => {
                    seg = pseg;
                    relpath = prel;
                    distance += 1;
                }
                None => return Ok(None),
            }
        }
    }

    /// Take a write lock on `local_dir_abspath` covering `levels_to_lock`
    /// levels below it (-1 for the whole subtree)
    pub fn wclock_set(&self, local_dir_abspath: &Path, levels_to_lock: i32) -> Result<()> {
        let abspath = super::check_abspath(local_dir_abspath)?;
        let (seg, relpath) = self.parse(&abspath)?;

        if let Some((lseg, lrel)) = self.covering_lock((seg.clone(), relpath.clone()), false)? {
            tracing::debug!("{:?} is covered by the lock on {:?}", abspath, lseg.abspath(&lrel));
            return Err(WcError::Locked(abspath));
        }

        let conn = seg.conn();
        let mut stmt = conn.prepare_cached("SELECT local_dir_relpath FROM wc_lock")?;
        let held = stmt.query_map([], |r| r.get::<_, String>(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        for other in held {
            let Some(below) = relpath_skip_ancestor(&relpath, &other) else {
                continue;
            };
            if below.is_empty() {
                continue;
            }
            let distance = below.split('/').count() as i32;
            if covers(levels_to_lock, distance) {
                tracing::debug!("{:?} has a locked descendant {:?}", abspath, other);
                return Err(WcError::Locked(abspath));
            }
        }

        let inserted = conn.execute(
            "INSERT INTO wc_lock (local_dir_relpath, locked_levels) VALUES (?1, ?2)",
            rusqlite::params![relpath, levels_to_lock],
        );
        drop(conn);
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(WcError::Locked(abspath));
            }
            Err(e) => return Err(e.into()),
        }

        seg.owned_locks().insert(relpath);
        tracing::debug!("Locked {:?} ({} levels)", abspath, levels_to_lock);
        Ok(())
    }

    /// Release a lock taken with [`WcDb::wclock_set`]
    pub fn wclock_remove(&self, local_dir_abspath: &Path) -> Result<()> {
        let (seg, relpath) = self.parse(local_dir_abspath)?;
        let n = seg
            .conn()
            .execute("DELETE FROM wc_lock WHERE local_dir_relpath = ?1", [&relpath])?;
        seg.owned_locks().remove(&relpath);
        if n == 0 {
            return Err(WcError::unexpected(format!(
                "Working copy '{}' not locked",
                local_dir_abspath.display()
            )));
        }
        tracing::debug!("Unlocked {:?}", local_dir_abspath);
        Ok(())
    }

    /// True when some lock, held by anyone, covers `local_abspath`
    pub fn wclocked(&self, local_abspath: &Path) -> Result<bool> {
        let start = self.parse(local_abspath)?;
        Ok(self.covering_lock(start, true)?.is_some())
    }

    /// True when the lock covering `local_abspath` was taken through this handle
    pub fn own_lock(&self, local_abspath: &Path) -> Result<bool> {
        let start = self.parse(local_abspath)?;
        match self.covering_lock(start, true)? {
            Some((seg, relpath)) => Ok(seg.owned_locks().contains(&relpath)),
            None => Ok(false),
        }
    }

    /// Lock `local_dir_abspath` until the returned guard is dropped
    pub fn acquire_write_lock(&self, local_dir_abspath: &Path, levels_to_lock: i32) -> Result<WriteLock<'_>> {
        let path = super::check_abspath(local_dir_abspath)?;
        self.wclock_set(&path, levels_to_lock)?;
        Ok(WriteLock { db: self, path })
    }
}

/// Releases its wclock when dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteLock<'a> {
    db: &'a WcDb,
    path: PathBuf,
}

impl WriteLock<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.db.wclock_remove(&self.path) {
            tracing::warn!("Failed to release lock on {:?}: {}", self.path, e);
        }
    }
}
