//! Working-copy metadata store
//!
//! The store is split into segments: every directory holding a `.svn/wc.db`
//! owns the rows of its subtree down to the next segment root. A segment
//! root is also recorded in its parent segment as a `subdir` stub row; the
//! two records are written by [`WcDb::sync_parent_stub`] only.
//!
//! Segment handles live in an arena keyed by canonical path. Parents are
//! found by path-prefix lookup, never by stored back-pointers. Writes that
//! touch two segments commit each segment separately, so a crash between the
//! two commits can leave only one of them applied.

mod base;
mod commit;
mod lock;
mod op;
mod read;
pub(crate) mod rows;
mod scan;
mod wq;

pub use lock::WriteLock;

use crate::config::WcConfig;
use crate::error::{Result, WcError};
use crate::paths::{abspath_skip_ancestor, basename, join_relpath, normalize, relpath_join};
use crate::properties::PropertySet;
use crate::schema::{self, in_txn};
use crate::types::{Depth, Kind, NodeInfo, Presence, Revnum};
use lru::LruCache;
use rows::{BaseRow, WorkingRow};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One per-directory database and its administrative area
pub(crate) struct Segment {
    root: PathBuf,
    conn: Mutex<Connection>,
    /// Relpaths of wclocks taken through this handle
    owned_locks: Mutex<HashSet<String>>,
}

impl Segment {
    fn new(root: PathBuf, conn: Connection) -> Self {
        Self { root, conn: Mutex::new(conn), owned_locks: Mutex::new(HashSet::new()) }
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn owned_locks(&self) -> MutexGuard<'_, HashSet<String>> {
        self.owned_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn abspath(&self, relpath: &str) -> PathBuf {
        join_relpath(&self.root, relpath)
    }

    pub(crate) fn pristine_dir(&self) -> PathBuf {
        schema::adm_dir(&self.root).join(schema::PRISTINE_DIR)
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        schema::adm_dir(&self.root).join(schema::TMP_DIR)
    }
}

/// A resolved node location: segment plus relpath inside it
pub(crate) type Location = (Arc<Segment>, String);

/// Layer a parent-side stub is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StubLayer {
    Base,
    Working,
}

pub struct WcDb {
    segments: Mutex<HashMap<PathBuf, Arc<Segment>>>,
    entries: Mutex<LruCache<PathBuf, NodeInfo>>,
}

impl Default for WcDb {
    fn default() -> Self {
        Self::new()
    }
}

impl WcDb {
    pub fn new() -> Self {
        Self::with_cache_capacity(WcConfig::default().entries_cache_capacity)
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            segments: Mutex::new(HashMap::new()),
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Open with the cache size configured for the working copy at `local_abspath`
    pub fn open(local_abspath: &Path) -> Result<Self> {
        let config = WcConfig::load(local_abspath)?;
        Ok(Self::with_cache_capacity(config.entries_cache_capacity))
    }

    /// Create a new store rooted at `local_abspath` holding only the root node
    pub fn init(
        &self,
        local_abspath: &Path,
        repos_relpath: &str,
        repos_root_url: &str,
        repos_uuid: &str,
        initial_rev: Revnum,
        depth: Depth,
    ) -> Result<()> {
        let abspath = check_abspath(local_abspath)?;
        if schema::has_store(&abspath) {
            return Err(WcError::AlreadyExists(abspath));
        }
        std::fs::create_dir_all(&abspath).map_err(|e| WcError::io(&abspath, e))?;
        let conn = schema::create_segment_db(&abspath)?;

        in_txn(&conn, |c| {
            let repos_id = rows::repos_ensure(c, repos_root_url, repos_uuid)?;
            let mut row = BaseRow::new(
                if initial_rev == 0 { Presence::Normal } else { Presence::Incomplete },
                Kind::Dir,
            );
            row.repos_id = Some(repos_id);
            row.repos_relpath = Some(repos_relpath.to_string());
            row.revnum = Some(initial_rev);
            row.depth = Some(depth);
            row.props = Some(PropertySet::new());
            if initial_rev == 0 {
                row.changed.rev = Some(0);
            }
            rows::insert_base(c, "", &row)
        })?;

        self.segments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(abspath.clone(), Arc::new(Segment::new(abspath.clone(), conn)));
        self.flush_entries(&abspath);
        tracing::info!("Created working copy store at {:?} ({}@{})", abspath, repos_relpath, initial_rev);
        Ok(())
    }

    /// Drop the handles of every segment at or below `local_abspath`
    pub fn close(&self, local_abspath: &Path) -> Result<()> {
        let abspath = check_abspath(local_abspath)?;
        self.segments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|root, _| !root.starts_with(&abspath));
        self.flush_entries(&abspath);
        Ok(())
    }

    /// Directory for temp files that must end up inside the working copy
    pub fn temp_wcroot_tempdir(&self, wri_abspath: &Path) -> Result<PathBuf> {
        let (seg, _) = self.parse(wri_abspath)?;
        Ok(seg.tmp_dir())
    }

    /// Root of the segment holding `local_abspath`
    pub fn segment_root(&self, local_abspath: &Path) -> Result<PathBuf> {
        let (seg, _) = self.parse(local_abspath)?;
        Ok(seg.root().to_path_buf())
    }

    fn segment_at(&self, dir: &Path) -> Result<Option<Arc<Segment>>> {
        let mut segments = self.segments.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(seg) = segments.get(dir) {
            return Ok(Some(seg.clone()));
        }
        if !schema::has_store(dir) {
            return Ok(None);
        }
        let conn = schema::open_segment_db(dir)?;
        tracing::debug!("Opened store segment {:?}", dir);
        let seg = Arc::new(Segment::new(dir.to_path_buf(), conn));
        segments.insert(dir.to_path_buf(), seg.clone());
        Ok(Some(seg))
    }

    /// Find the segment owning `local_abspath` and the relpath inside it
    pub(crate) fn parse(&self, local_abspath: &Path) -> Result<Location> {
        let abspath = check_abspath(local_abspath)?;
        let mut dir = abspath.clone();
        loop {
            if let Some(seg) = self.segment_at(&dir)? {
                let relpath = abspath_skip_ancestor(seg.root(), &abspath).unwrap_or_default();
                return Ok((seg, relpath));
            }
            if !dir.pop() {
                return Err(WcError::NotWorkingCopy(abspath));
            }
        }
    }

    /// Parent directory of a location, crossing into the parent segment when
    /// `relpath` is a segment root linked by a stub. Returns the parent
    /// location and the child's name.
    pub(crate) fn parent_location(&self, seg: &Arc<Segment>, relpath: &str) -> Result<Option<(Location, String)>> {
        if !relpath.is_empty() {
            let parent = crate::paths::relpath_dirname(relpath).to_string();
            let name = crate::paths::relpath_basename(relpath).to_string();
            return Ok(Some(((seg.clone(), parent), name)));
        }
        Ok(self.linked_parent(seg)?.map(|(pseg, prel, name)| ((pseg, prel), name)))
    }

    /// For a segment root: the parent segment, the parent dir relpath and the
    /// root's name, when the parent holds a stub for it
    pub(crate) fn linked_parent(&self, seg: &Arc<Segment>) -> Result<Option<(Arc<Segment>, String, String)>> {
        let Some(parent_dir) = seg.root().parent() else {
            return Ok(None);
        };
        let (pseg, prel) = match self.parse(parent_dir) {
            Ok(loc) => loc,
            Err(WcError::NotWorkingCopy(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let name = basename(seg.root());
        let child_rel = relpath_join(&prel, &name);
        let linked = rows::has_stub(&pseg.conn(), &child_rel)?;
        Ok(if linked { Some((pseg, prel, name)) } else { None })
    }

    /// Mirror the root row of a segment into its parent segment's stub.
    ///
    /// `presence == None` removes the stub. A segment without a parent
    /// working copy has nothing to mirror.
    pub(crate) fn sync_parent_stub(&self, seg: &Arc<Segment>, layer: StubLayer, presence: Option<Presence>) -> Result<()> {
        let Some(parent_dir) = seg.root().parent() else {
            return Ok(());
        };
        let (pseg, prel) = match self.parse(parent_dir) {
            Ok(loc) => loc,
            Err(WcError::NotWorkingCopy(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let child_rel = relpath_join(&prel, &basename(seg.root()));

        let root_base = if layer == StubLayer::Base && presence.is_some() {
            let root_row = rows::select_base(&seg.conn(), "")?;
            match root_row {
                Some(row) => {
                    let repos = match row.repos_id {
                        Some(id) => Some(rows::repos_fetch(&seg.conn(), id)?),
                        None => None,
                    };
                    Some((row, repos))
                }
                None => None,
            }
        } else {
            None
        };

        let conn = pseg.conn();
        in_txn(&conn, |c| {
            match (layer, presence) {
                (StubLayer::Base, None) => {
                    rows::delete_base(c, &child_rel)?;
                }
                (StubLayer::Working, None) => {
                    rows::delete_working(c, &child_rel)?;
                }
                (StubLayer::Base, Some(p)) => {
                    let mut stub = BaseRow::new(p, Kind::Subdir);
                    if let Some((row, repos)) = &root_base {
                        stub.revnum = row.revnum;
                        stub.repos_relpath = row.repos_relpath.clone();
                        if let Some((root, uuid)) = repos {
                            stub.repos_id = Some(rows::repos_ensure(c, root, uuid)?);
                        }
                    }
                    rows::insert_base(c, &child_rel, &stub)?;
                }
                (StubLayer::Working, Some(p)) => {
                    rows::insert_working(c, &child_rel, &WorkingRow::new(p, Kind::Subdir))?;
                }
            }
            Ok(())
        })?;
        drop(conn);
        tracing::debug!("Synced {:?} stub for {:?} to {:?}", layer, seg.root(), presence);
        self.flush_entries(seg.root());
        Ok(())
    }

    pub(crate) fn cached_info(&self, abspath: &Path) -> Option<NodeInfo> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).get(abspath).cloned()
    }

    pub(crate) fn cache_info(&self, abspath: &Path, info: &NodeInfo) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(abspath.to_path_buf(), info.clone());
    }

    /// Evict cached entries of the directory containing `local_abspath`
    pub(crate) fn flush_entries(&self, local_abspath: &Path) {
        let dir = local_abspath.parent().unwrap_or(local_abspath);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<PathBuf> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(dir))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }
}

/// Reject relative paths and fold `.`/`..`
pub(crate) fn check_abspath(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(WcError::InvalidArgument(format!("'{}' is not an absolute path", path.display())));
    }
    Ok(normalize(path))
}
