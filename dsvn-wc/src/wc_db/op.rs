//! WORKING and ACTUAL layer operations: local adds, copies, deletes,
//! property overrides and conflict bookkeeping

use super::rows::{self, ActualRow, WorkingRow};
use super::{StubLayer, WcDb};
use crate::error::{Result, WcError};
use crate::paths::{abspath_skip_ancestor, relpath_join};
use crate::pristine;
use crate::properties::PropertySet;
use crate::schema::in_txn;
use crate::types::{ChangedInfo, Checksum, Conflict, CopyOrigin, Depth, Kind, Presence, Status, TreeConflict};
use crate::workqueue::WorkItem;
use std::path::Path;

/// What a copy destination gets from its source
struct CopySource {
    presence: Presence,
    kind: Kind,
    origin: Option<CopyOrigin>,
    content: WorkingRow,
    actual: Option<ActualRow>,
    children: Vec<String>,
}

/// Outcome of a delete transition, used to mirror segment roots
enum DeleteOutcome {
    Unchanged,
    Working(Presence),
    Removed,
}

impl WcDb {
    /// Copy `src_abspath` (recursively for directories) to a new WORKING
    /// tree at `dst_abspath`
    pub fn op_copy(&self, src_abspath: &Path, dst_abspath: &Path, work_items: &[WorkItem]) -> Result<()> {
        let src = super::check_abspath(src_abspath)?;
        let dst = super::check_abspath(dst_abspath)?;
        if dst.starts_with(&src) {
            return Err(WcError::InvalidArgument(format!(
                "Cannot copy '{}' into its own subtree",
                src.display()
            )));
        }
        self.copy_node(&src, &dst, work_items)?;
        self.elide_tree(&dst)?;
        tracing::debug!("Copied {:?} to {:?}", src, dst);
        Ok(())
    }

    fn copy_node(&self, src: &Path, dst: &Path, work_items: &[WorkItem]) -> Result<()> {
        let source = self.copy_source(src)?;
        let (sseg, _) = self.parse(src)?;
        let (dseg, drel) = self.parse(dst)?;

        let existing = rows::select_working(&dseg.conn(), &drel)?;
        if existing.is_some_and(|w| w.presence == Presence::Normal) {
            return Err(WcError::AlreadyExists(dst.to_path_buf()));
        }

        if sseg.root() != dseg.root() && source.presence == Presence::Normal {
            if let Some(sha1) = &source.content.checksum {
                self.pristine_transfer(src, dst, sha1)?;
            }
        }

        let mut row = if source.presence == Presence::Normal {
            source.content
        } else {
            WorkingRow::new(source.presence, source.kind)
        };
        let is_dir = source.kind == Kind::Dir && source.presence == Presence::Normal;

        let conn = dseg.conn();
        in_txn(&conn, |c| {
            if let Some(origin) = &source.origin {
                row.copyfrom_repos_id = Some(rows::repos_ensure(c, &origin.root_url, &origin.uuid)?);
                row.copyfrom_repos_path = Some(origin.repos_relpath.clone());
                row.copyfrom_revnum = Some(origin.revision);
            }
            rows::insert_working(c, &drel, &row)?;
            if is_dir {
                for name in &source.children {
                    rows::insert_working_incomplete(c, &relpath_join(&drel, name))?;
                }
            }
            if let Some(actual) = &source.actual {
                rows::write_actual(c, &drel, actual)?;
            }
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);

        if drel.is_empty() && source.kind == Kind::Dir {
            self.sync_parent_stub(&dseg, StubLayer::Working, Some(source.presence))?;
        }
        self.flush_entries(dst);

        if is_dir {
            for name in &source.children {
                let child_src = src.join(name);
                let status = self.read_info(&child_src)?.status;
                if matches!(
                    status,
                    Status::Incomplete | Status::Obstructed | Status::ObstructedAdd | Status::ObstructedDelete
                ) {
                    tracing::debug!("Leaving placeholder for {:?} ({:?})", child_src, status);
                    continue;
                }
                self.copy_node(&child_src, &dst.join(name), &[])?;
            }
        }
        Ok(())
    }

    /// Work out presence, ancestry and content a copy of `src` receives
    fn copy_source(&self, src: &Path) -> Result<CopySource> {
        let (seg, relpath) = self.parse(src)?;
        let (base, working, actual, children) = {
            let conn = seg.conn();
            let base = rows::select_base(&conn, &relpath)?;
            let working = rows::select_working(&conn, &relpath)?;
            let actual = rows::select_actual(&conn, &relpath)?;
            let mut names = rows::base_children(&conn, &relpath)?;
            for name in rows::working_children(&conn, &relpath)? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            names.sort();
            (base, working, actual, names)
        };

        let obstructed = || WcError::unexpected(format!("Cannot copy obstructed node '{}'", src.display()));
        let unhandled = || WcError::unexpected(format!("Cannot handle status of '{}'", src.display()));

        let (presence, kind, origin, content) = match (base, working) {
            (None, None) => return Err(WcError::NotFound(src.to_path_buf())),
            (_, Some(w)) => match w.presence {
                Presence::Normal | Presence::Excluded if w.kind == Kind::Subdir => return Err(obstructed()),
                Presence::Normal | Presence::Excluded => {
                    let addition = self.scan_addition(src)?;
                    let origin = addition.original.map(|orig| {
                        let suffix = abspath_skip_ancestor(&addition.op_root_abspath, src).unwrap_or_default();
                        CopyOrigin { repos_relpath: relpath_join(&orig.repos_relpath, &suffix), ..orig }
                    });
                    let presence = match (&origin, w.presence) {
                        (_, Presence::Excluded) => Presence::Excluded,
                        (Some(_), _) => Presence::Normal,
                        // A local addition has nothing to copy from.
                        (None, _) => Presence::NotPresent,
                    };
                    (presence, w.kind, origin, w)
                }
                Presence::NotPresent | Presence::BaseDeleted => (Presence::NotPresent, w.kind, None, w),
                Presence::Incomplete => return Err(unhandled()),
                Presence::Absent => {
                    return Err(WcError::Corrupt(format!("WORKING node '{}' is absent", src.display())));
                }
            },
            (Some(b), None) => {
                if b.kind == Kind::Subdir {
                    return Err(obstructed());
                }
                let presence = match b.presence {
                    Presence::Normal => Presence::Normal,
                    Presence::Excluded => Presence::Excluded,
                    Presence::Absent | Presence::NotPresent => Presence::NotPresent,
                    Presence::Incomplete => return Err(unhandled()),
                    Presence::BaseDeleted => {
                        return Err(WcError::Corrupt(format!("BASE node '{}' is base-deleted", src.display())));
                    }
                };
                let origin = if presence == Presence::NotPresent {
                    None
                } else {
                    let (repos_relpath, root_url, uuid) = self.scan_base_repos(src)?;
                    let revision = b
                        .revnum
                        .ok_or_else(|| WcError::Corrupt(format!("BASE node '{}' has no revision", src.display())))?;
                    Some(CopyOrigin { repos_relpath, root_url, uuid, revision })
                };
                let mut content = WorkingRow::new(b.presence, b.kind);
                content.checksum = b.checksum;
                content.translated_size = b.translated_size;
                content.changed = b.changed;
                content.depth = b.depth;
                content.target = b.target;
                content.props = b.props;
                (presence, b.kind, origin, content)
            }
        };

        let mut content = content;
        content.presence = presence;
        content.copyfrom_repos_id = None;
        content.copyfrom_repos_path = None;
        content.copyfrom_revnum = None;
        content.moved_here = false;
        content.moved_to = None;
        content.last_mod_time = None;
        if content.props.is_none() {
            content.props = Some(PropertySet::new());
        }

        let actual = match actual {
            Some(a) if presence == Presence::Normal => {
                let copied = ActualRow { props: a.props, changelist: a.changelist, ..Default::default() };
                (!copied.is_empty()).then_some(copied)
            }
            _ => None,
        };

        Ok(CopySource { presence, kind, origin, content, actual, children })
    }

    fn elide_tree(&self, local_abspath: &Path) -> Result<()> {
        self.temp_elide_copyfrom(local_abspath)?;
        let (seg, relpath) = self.parse(local_abspath)?;
        let names = rows::working_children(&seg.conn(), &relpath)?;
        for name in names {
            self.elide_tree(&local_abspath.join(name))?;
        }
        Ok(())
    }

    /// Drop the copyfrom of a node whose origin is already implied by its
    /// parent's copy. Returns whether anything changed.
    pub fn temp_elide_copyfrom(&self, local_abspath: &Path) -> Result<bool> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let mine = {
            let conn = seg.conn();
            let Some(w) = rows::select_working(&conn, &relpath)? else {
                return Ok(false);
            };
            let (Some(id), Some(path), Some(rev)) = (w.copyfrom_repos_id, w.copyfrom_repos_path, w.copyfrom_revnum)
            else {
                return Ok(false);
            };
            let (root_url, uuid) = rows::repos_fetch(&conn, id)?;
            CopyOrigin { repos_relpath: path, root_url, uuid, revision: rev }
        };

        let Some(parent) = local_abspath.parent() else {
            return Ok(false);
        };
        let parent_info = match self.scan_addition(parent) {
            Ok(info) => info,
            Err(WcError::NotFound(_)) | Err(WcError::UnexpectedStatus(_)) | Err(WcError::NotWorkingCopy(_)) => {
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let Some(theirs) = parent_info.original else {
            return Ok(false);
        };
        let suffix = abspath_skip_ancestor(&parent_info.op_root_abspath, local_abspath).unwrap_or_default();
        let implied = relpath_join(&theirs.repos_relpath, &suffix);
        if implied != mine.repos_relpath
            || theirs.revision != mine.revision
            || theirs.root_url != mine.root_url
            || theirs.uuid != mine.uuid
        {
            return Ok(false);
        }

        seg.conn().execute(
            "UPDATE working_node SET copyfrom_repos_id = NULL, copyfrom_repos_path = NULL, \
             copyfrom_revnum = NULL, moved_here = NULL WHERE local_relpath = ?1",
            [&relpath],
        )?;
        self.flush_entries(local_abspath);
        Ok(true)
    }

    pub fn op_copy_dir(
        &self,
        local_abspath: &Path,
        props: &PropertySet,
        changed: &ChangedInfo,
        origin: &CopyOrigin,
        children: &[String],
        depth: Depth,
        work_items: &[WorkItem],
    ) -> Result<()> {
        let mut row = WorkingRow::new(Presence::Normal, Kind::Dir);
        row.depth = Some(depth);
        self.insert_copied(local_abspath, row, props, changed, origin, children, work_items)
    }

    /// Record a copied file whose text is already in the pristine store
    pub fn op_copy_file(
        &self,
        local_abspath: &Path,
        props: &PropertySet,
        changed: &ChangedInfo,
        origin: &CopyOrigin,
        checksum: &Checksum,
        translated_size: Option<i64>,
        work_items: &[WorkItem],
    ) -> Result<()> {
        let (seg, _) = self.parse(local_abspath)?;
        let sha1 = pristine::conn_lookup_sha1(&seg.conn(), checksum)?
            .ok_or_else(|| WcError::Missing(checksum.to_db()))?;
        let mut row = WorkingRow::new(Presence::Normal, Kind::File);
        row.checksum = Some(sha1);
        row.translated_size = translated_size;
        self.insert_copied(local_abspath, row, props, changed, origin, &[], work_items)
    }

    pub fn op_copy_symlink(
        &self,
        local_abspath: &Path,
        props: &PropertySet,
        changed: &ChangedInfo,
        origin: &CopyOrigin,
        target: &str,
        work_items: &[WorkItem],
    ) -> Result<()> {
        let mut row = WorkingRow::new(Presence::Normal, Kind::Symlink);
        row.target = Some(target.to_string());
        self.insert_copied(local_abspath, row, props, changed, origin, &[], work_items)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_copied(
        &self,
        local_abspath: &Path,
        mut row: WorkingRow,
        props: &PropertySet,
        changed: &ChangedInfo,
        origin: &CopyOrigin,
        children: &[String],
        work_items: &[WorkItem],
    ) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        row.props = Some(props.clone());
        row.changed = changed.clone();
        row.copyfrom_repos_path = Some(origin.repos_relpath.clone());
        row.copyfrom_revnum = Some(origin.revision);
        let kind = row.kind;

        let conn = seg.conn();
        in_txn(&conn, |c| {
            row.copyfrom_repos_id = Some(rows::repos_ensure(c, &origin.root_url, &origin.uuid)?);
            rows::insert_working(c, &relpath, &row)?;
            for name in children {
                rows::insert_working_incomplete(c, &relpath_join(&relpath, name))?;
            }
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);

        if relpath.is_empty() && kind == Kind::Dir {
            self.sync_parent_stub(&seg, StubLayer::Working, Some(Presence::Normal))?;
        }
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// Schedule a new directory for addition
    pub fn op_add_directory(&self, local_abspath: &Path, work_items: &[WorkItem]) -> Result<()> {
        let mut row = WorkingRow::new(Presence::Normal, Kind::Dir);
        row.depth = Some(Depth::Infinity);
        self.insert_added(local_abspath, row, work_items)
    }

    pub fn op_add_file(&self, local_abspath: &Path, work_items: &[WorkItem]) -> Result<()> {
        self.insert_added(local_abspath, WorkingRow::new(Presence::Normal, Kind::File), work_items)
    }

    pub fn op_add_symlink(&self, local_abspath: &Path, target: &str, work_items: &[WorkItem]) -> Result<()> {
        let mut row = WorkingRow::new(Presence::Normal, Kind::Symlink);
        row.target = Some(target.to_string());
        self.insert_added(local_abspath, row, work_items)
    }

    fn insert_added(&self, local_abspath: &Path, mut row: WorkingRow, work_items: &[WorkItem]) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        row.props = Some(PropertySet::new());
        let kind = row.kind;

        let conn = seg.conn();
        in_txn(&conn, |c| {
            if let Some(existing) = rows::select_working(c, &relpath)? {
                if existing.presence == Presence::Normal {
                    return Err(WcError::AlreadyExists(local_abspath.to_path_buf()));
                }
            }
            rows::insert_working(c, &relpath, &row)?;
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);

        if relpath.is_empty() && kind == Kind::Dir {
            self.sync_parent_stub(&seg, StubLayer::Working, Some(Presence::Normal))?;
        }
        self.flush_entries(local_abspath);
        tracing::debug!("Scheduled {:?} {:?} for addition", kind, local_abspath);
        Ok(())
    }

    /// Set (or with `None`, clear) the locally modified property set
    /// Override the node's properties, recording `conflict` in the same
    /// transaction
    pub fn op_set_props(
        &self,
        local_abspath: &Path,
        props: Option<&PropertySet>,
        conflict: Option<&Conflict>,
        work_items: &[WorkItem],
    ) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        in_txn(&conn, |c| {
            if rows::select_base(c, &relpath)?.is_none() && rows::select_working(c, &relpath)?.is_none() {
                return Err(WcError::NotFound(local_abspath.to_path_buf()));
            }
            let mut actual = rows::select_actual(c, &relpath)?.unwrap_or_default();
            actual.props = props.cloned();
            rows::write_actual(c, &relpath, &actual)?;
            if let Some(conflict) = conflict {
                rows::write_conflict(c, &relpath, conflict)?;
            }
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);
        self.record_root_tree_conflict(local_abspath, &relpath, conflict)?;
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// The tree conflict of a segment root lives in the parent segment and
    /// is written after the node's own transaction
    pub(super) fn record_root_tree_conflict(
        &self,
        local_abspath: &Path,
        relpath: &str,
        conflict: Option<&Conflict>,
    ) -> Result<()> {
        match conflict {
            Some(Conflict::Tree(tc)) if relpath.is_empty() => self.op_set_tree_conflict(local_abspath, Some(tc)),
            _ => Ok(()),
        }
    }

    pub fn op_set_changelist(&self, local_abspath: &Path, changelist: Option<&str>) -> Result<()> {
        self.update_actual(local_abspath, &[], |actual| {
            actual.changelist = changelist.map(str::to_string);
            Ok(())
        })
    }

    /// Record the marker files of a text conflict; `None` clears a marker
    pub fn op_set_text_conflict_marker_files(
        &self,
        local_abspath: &Path,
        old: Option<&str>,
        new: Option<&str>,
        working: Option<&str>,
    ) -> Result<()> {
        self.update_actual(local_abspath, &[], |actual| {
            actual.conflict_old = old.map(str::to_string);
            actual.conflict_new = new.map(str::to_string);
            actual.conflict_working = working.map(str::to_string);
            Ok(())
        })
    }

    pub fn op_set_property_conflict_marker_file(&self, local_abspath: &Path, reject_file: Option<&str>) -> Result<()> {
        self.update_actual(local_abspath, &[], |actual| {
            actual.prop_reject = reject_file.map(str::to_string);
            Ok(())
        })
    }

    /// Clear the selected kinds of conflict on a node
    pub fn op_mark_resolved(&self, local_abspath: &Path, text: bool, props: bool, tree: bool) -> Result<()> {
        if text || props {
            self.update_actual(local_abspath, &[], |actual| {
                if text {
                    actual.conflict_old = None;
                    actual.conflict_new = None;
                    actual.conflict_working = None;
                }
                if props {
                    actual.prop_reject = None;
                }
                Ok(())
            })?;
        }
        if tree {
            self.op_set_tree_conflict(local_abspath, None)?;
        }
        Ok(())
    }

    /// Store (or with `None`, remove) the tree conflict of a node in its
    /// parent directory's conflict map
    pub fn op_set_tree_conflict(&self, local_abspath: &Path, conflict: Option<&TreeConflict>) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let Some(((pseg, prel), name)) = self.parent_location(&seg, &relpath)? else {
            return Err(WcError::InvalidArgument(format!(
                "Cannot record a tree conflict on the working copy root '{}'",
                local_abspath.display()
            )));
        };

        let conn = pseg.conn();
        in_txn(&conn, |c| {
            let mut actual = rows::select_actual(c, &prel)?.unwrap_or_default();
            let mut map = actual.tree_conflicts()?;
            match conflict {
                Some(tc) => {
                    map.insert(name.clone(), tc.clone());
                }
                None => {
                    map.remove(&name);
                }
            }
            actual.set_tree_conflicts(&map)?;
            rows::write_actual(c, &prel, &actual)
        })?;
        drop(conn);

        self.flush_entries(local_abspath);
        Ok(())
    }

    pub fn op_read_tree_conflict(&self, local_abspath: &Path) -> Result<Option<TreeConflict>> {
        let (seg, relpath) = self.parse(local_abspath)?;
        self.tree_conflict_of(&seg, &relpath)
    }

    fn update_actual(
        &self,
        local_abspath: &Path,
        work_items: &[WorkItem],
        edit: impl FnOnce(&mut ActualRow) -> Result<()>,
    ) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        in_txn(&conn, |c| {
            if rows::select_base(c, &relpath)?.is_none() && rows::select_working(c, &relpath)?.is_none() {
                return Err(WcError::NotFound(local_abspath.to_path_buf()));
            }
            let mut actual = rows::select_actual(c, &relpath)?.unwrap_or_default();
            edit(&mut actual)?;
            rows::write_actual(c, &relpath, &actual)?;
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// Schedule a single node for deletion
    pub fn temp_op_delete(&self, local_abspath: &Path) -> Result<()> {
        let abspath = super::check_abspath(local_abspath)?;
        let (seg, relpath) = self.parse(&abspath)?;
        let (base, working) = {
            let conn = seg.conn();
            (rows::select_base(&conn, &relpath)?, rows::select_working(&conn, &relpath)?)
        };
        let base_present = base.as_ref().is_some_and(|b| b.presence.is_present());

        let outcome = match (&base, &working) {
            (None, None) => return Err(WcError::NotFound(abspath)),
            (_, Some(w)) => match w.presence {
                Presence::Normal if w.kind == Kind::Subdir => {
                    return Err(WcError::unexpected(format!(
                        "Cannot delete '{}' as its metadata is missing",
                        abspath.display()
                    )));
                }
                Presence::Normal | Presence::Excluded if base_present => DeleteOutcome::Working(Presence::BaseDeleted),
                Presence::Normal | Presence::Excluded => {
                    if self.is_add_or_root_of_copy(&abspath)? {
                        DeleteOutcome::Removed
                    } else {
                        DeleteOutcome::Working(Presence::NotPresent)
                    }
                }
                Presence::Incomplete => {
                    if self.is_add_or_root_of_copy(&abspath)? { DeleteOutcome::Removed } else { DeleteOutcome::Unchanged }
                }
                Presence::NotPresent | Presence::BaseDeleted => DeleteOutcome::Unchanged,
                Presence::Absent => {
                    return Err(WcError::Corrupt(format!("WORKING node '{}' is absent", abspath.display())));
                }
            },
            // An unreachable subdirectory stub is deleted like any BASE node.
            (Some(b), None) => match b.presence {
                Presence::Normal | Presence::Incomplete => DeleteOutcome::Working(Presence::BaseDeleted),
                Presence::NotPresent => DeleteOutcome::Unchanged,
                Presence::Absent | Presence::Excluded | Presence::BaseDeleted => {
                    return Err(WcError::unexpected(format!(
                        "Cannot delete '{}' with status {:?}",
                        abspath.display(),
                        b.presence
                    )));
                }
            },
        };

        let conn = seg.conn();
        in_txn(&conn, |c| {
            match &outcome {
                DeleteOutcome::Unchanged => {}
                DeleteOutcome::Removed => {
                    rows::delete_working(c, &relpath)?;
                    rows::delete_actual(c, &relpath)?;
                    // An undone addition takes its added descendants with it.
                    rows::delete_working_descendants(c, &relpath)?;
                }
                DeleteOutcome::Working(presence) => match &working {
                    Some(_) => rows::update_working_presence(c, &relpath, *presence)?,
                    None => {
                        let kind = base.as_ref().map(|b| b.kind).unwrap_or(Kind::Unknown);
                        let mut row = WorkingRow::new(*presence, kind);
                        row.depth = base.as_ref().and_then(|b| b.depth);
                        rows::insert_working(c, &relpath, &row)?;
                    }
                },
            }
            Ok(())
        })?;
        drop(conn);

        if relpath.is_empty() {
            match outcome {
                DeleteOutcome::Unchanged => {}
                DeleteOutcome::Removed => self.sync_parent_stub(&seg, StubLayer::Working, None)?,
                DeleteOutcome::Working(p) => self.sync_parent_stub(&seg, StubLayer::Working, Some(p))?,
            }
        }
        self.flush_entries(&abspath);
        tracing::debug!("Deleted {:?}", abspath);
        Ok(())
    }

    /// Whether the parent of a location holds a normal WORKING row
    /// Drop the WORKING row of a node, leaving BASE and ACTUAL alone
    pub fn temp_op_remove_working(&self, local_abspath: &Path) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        rows::delete_working(&seg.conn(), &relpath)?;
        if relpath.is_empty() {
            self.sync_parent_stub(&seg, StubLayer::Working, None)?;
        }
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// Forget a node in every layer
    pub fn temp_op_remove_entry(&self, local_abspath: &Path) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        in_txn(&conn, |c| {
            rows::delete_base(c, &relpath)?;
            rows::delete_working(c, &relpath)?;
            rows::delete_actual(c, &relpath)?;
            Ok(())
        })?;
        drop(conn);
        if relpath.is_empty() {
            self.sync_parent_stub(&seg, StubLayer::Base, None)?;
            self.sync_parent_stub(&seg, StubLayer::Working, None)?;
        }
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// Undo local changes to one node; only its changelist survives
    pub fn op_revert(&self, local_abspath: &Path) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        let had_working = in_txn(&conn, |c| {
            let removed = rows::delete_working(c, &relpath)? > 0;
            let changelist = rows::select_actual(c, &relpath)?.and_then(|a| a.changelist);
            rows::write_actual(c, &relpath, &ActualRow { changelist, ..Default::default() })?;
            Ok(removed)
        })?;
        drop(conn);

        if relpath.is_empty() && had_working {
            self.sync_parent_stub(&seg, StubLayer::Working, None)?;
        }
        if self.tree_conflict_of(&seg, &relpath)?.is_some() {
            self.op_set_tree_conflict(local_abspath, None)?;
        }
        self.flush_entries(local_abspath);
        tracing::debug!("Reverted {:?}", local_abspath);
        Ok(())
    }

    pub fn op_delete(&self, _local_abspath: &Path) -> Result<()> {
        Err(WcError::NotImplemented("op_delete"))
    }

    pub fn op_move(&self, _src_abspath: &Path, _dst_abspath: &Path) -> Result<()> {
        Err(WcError::NotImplemented("op_move"))
    }

    pub fn op_modified(&self, _local_abspath: &Path) -> Result<()> {
        Err(WcError::NotImplemented("op_modified"))
    }

    pub fn op_mark_conflict(&self, _local_abspath: &Path) -> Result<()> {
        Err(WcError::NotImplemented("op_mark_conflict"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::{BaseNode, ConflictAction, ConflictOperation, ConflictReason};

    fn copied_origin(path: &str) -> CopyOrigin {
        CopyOrigin { repos_relpath: path.into(), root_url: ROOT_URL.into(), uuid: UUID.into(), revision: 1 }
    }

    #[test]
    fn test_copy_file_records_origin() {
        let (_tmp, db, root) = checkout();
        db.op_copy(&root.join("iota"), &root.join("iota2"), &[]).unwrap();

        let info = db.read_info(&root.join("iota2")).unwrap();
        assert_eq!(info.status, Status::Added);
        assert_eq!(info.kind, Kind::File);
        assert_eq!(info.original, Some(copied_origin("trunk/iota")));
        assert_eq!(info.checksum, db.read_info(&root.join("iota")).unwrap().checksum);
    }

    #[test]
    fn test_copy_dir_elides_children() {
        let (_tmp, db, root) = checkout();
        db.op_copy(&root.join("A"), &root.join("A2"), &[]).unwrap();

        assert_eq!(db.read_info(&root.join("A2")).unwrap().original, Some(copied_origin("trunk/A")));
        let child = db.read_info(&root.join("A2/f")).unwrap();
        assert_eq!(child.status, Status::Added);
        assert_eq!(child.original, None);
        assert_eq!(db.read_children(&root.join("A2")).unwrap(), vec!["f"]);
    }

    #[test]
    fn test_copy_of_local_addition_is_not_present() {
        let (_tmp, db, root) = checkout();
        db.op_add_file(&root.join("new"), &[]).unwrap();
        db.op_copy(&root.join("new"), &root.join("new2"), &[]).unwrap();

        let info = db.read_info(&root.join("new2")).unwrap();
        assert_eq!(info.status, Status::Deleted);
        assert_eq!(info.original, None);
    }

    #[test]
    fn test_copy_skips_incomplete_children() {
        let (_tmp, db, root) = checkout();
        db.base_add_directory(&root.join("B"), &BaseNode::new("trunk/B", ROOT_URL, UUID, 1), &["later".into()], Depth::Infinity, &[])
            .unwrap();
        db.op_copy(&root.join("B"), &root.join("B2"), &[]).unwrap();

        let placeholder = db.read_info(&root.join("B2/later")).unwrap();
        assert_eq!(placeholder.status, Status::Incomplete);
    }

    #[test]
    fn test_copy_carries_local_props_and_changelist() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.op_set_props(&iota, Some(&PropertySet::new().with("color", "blue")), None, &[]).unwrap();
        db.op_set_changelist(&iota, Some("feature")).unwrap();
        db.op_copy(&iota, &root.join("iota2"), &[]).unwrap();

        let copy = db.read_info(&root.join("iota2")).unwrap();
        assert!(copy.props_mod);
        assert_eq!(copy.changelist.as_deref(), Some("feature"));
        assert_eq!(db.read_props(&root.join("iota2")).unwrap().get_str("color"), Some("blue"));
    }

    #[test]
    fn test_copy_into_itself_rejected() {
        let (_tmp, db, root) = checkout();
        let err = db.op_copy(&root.join("A"), &root.join("A/inner"), &[]).unwrap_err();
        assert!(matches!(err, WcError::InvalidArgument(_)));
    }

    #[test]
    fn test_copy_across_segments_moves_pristine() {
        let (_tmp, db, root) = checkout();
        let sub = root.join("sub");
        db.init(&sub, "trunk/sub", ROOT_URL, UUID, 1, Depth::Infinity).unwrap();
        db.base_add_directory(&sub, &BaseNode::new("trunk/sub", ROOT_URL, UUID, 1), &[], Depth::Infinity, &[])
            .unwrap();

        db.op_copy(&root.join("iota"), &sub.join("iota"), &[]).unwrap();
        let info = db.read_info(&sub.join("iota")).unwrap();
        assert_eq!(info.original, Some(copied_origin("trunk/iota")));
        let sha1 = info.checksum.unwrap();
        assert!(db.pristine_check(&sub, &sha1).unwrap());
        assert_eq!(&db.pristine_read(&sub, &sha1).unwrap()[..], b"This is iota\n");

        let addition = db.scan_addition(&sub.join("iota")).unwrap();
        assert_eq!(addition.repos_relpath, "trunk/sub/iota");
    }

    #[test]
    fn test_explicit_copy_ops() {
        let (_tmp, db, root) = checkout();
        let (sha1, _) = db.pristine_install_contents(&root, b"copied\n").unwrap();
        let changed = ChangedInfo { rev: Some(1), date: None, author: Some("jrandom".into()) };

        db.op_copy_dir(&root.join("D"), &PropertySet::new(), &changed, &copied_origin("branches/D"), &["x".into()], Depth::Infinity, &[])
            .unwrap();
        db.op_copy_file(&root.join("D/file"), &PropertySet::new(), &changed, &copied_origin("branches/file"), &sha1, Some(7), &[])
            .unwrap();
        db.op_copy_symlink(&root.join("D/link"), &PropertySet::new(), &changed, &copied_origin("branches/link"), "file", &[])
            .unwrap();

        assert_eq!(db.read_info(&root.join("D/x")).unwrap().status, Status::Incomplete);
        let file = db.read_info(&root.join("D/file")).unwrap();
        assert_eq!(file.translated_size, Some(7));
        assert_eq!(file.changed.author.as_deref(), Some("jrandom"));
        assert_eq!(db.read_info(&root.join("D/link")).unwrap().target.as_deref(), Some("file"));

        let missing = db.op_copy_file(&root.join("D/ghost"), &PropertySet::new(), &changed, &copied_origin("g"), &Checksum::sha1_of(b"nope"), None, &[]);
        assert!(matches!(missing, Err(WcError::Missing(_))));
    }

    #[test]
    fn test_delete_base_node_then_revert() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.temp_op_delete(&iota).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().status, Status::Deleted);

        // Deleting again changes nothing.
        db.temp_op_delete(&iota).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().status, Status::Deleted);

        db.op_revert(&iota).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().status, Status::Normal);
    }

    #[test]
    fn test_delete_plain_addition_removes_it() {
        let (_tmp, db, root) = checkout();
        let new = root.join("new");
        db.op_add_file(&new, &[]).unwrap();
        db.op_set_props(&new, Some(&PropertySet::new().with("k", "v")), None, &[]).unwrap();
        db.temp_op_delete(&new).unwrap();
        assert!(matches!(db.read_info(&new), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_delete_inside_copy_marks_not_present() {
        let (_tmp, db, root) = checkout();
        db.op_copy(&root.join("A"), &root.join("A2"), &[]).unwrap();
        db.temp_op_delete(&root.join("A2/f")).unwrap();
        assert_eq!(db.read_info(&root.join("A2/f")).unwrap().status, Status::Deleted);

        // The copy root itself goes away completely.
        db.temp_op_delete(&root.join("A2")).unwrap();
        assert!(matches!(db.read_info(&root.join("A2")), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_delete_replacement_keeps_base_deleted() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.temp_op_delete(&iota).unwrap();
        db.op_add_file(&iota, &[]).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().status, Status::Added);
        db.temp_op_delete(&iota).unwrap();

        let info = db.read_info(&iota).unwrap();
        assert_eq!(info.status, Status::Deleted);
        assert!(info.base_shadowed);
    }

    #[test]
    fn test_delete_mistagged_copy_child_stays_recorded() {
        let (_tmp, db, root) = checkout();
        db.op_copy(&root.join("A"), &root.join("A2"), &[]).unwrap();
        let (sha1, _) = db.pristine_install_contents(&root, b"g\n").unwrap();
        let changed = ChangedInfo { rev: Some(1), date: None, author: None };

        // Same origin as the parent copy implies: part of that copy.
        db.op_copy_file(&root.join("A2/g"), &PropertySet::new(), &changed, &copied_origin("trunk/A/g"), &sha1, None, &[])
            .unwrap();
        db.temp_op_delete(&root.join("A2/g")).unwrap();
        assert_eq!(db.read_info(&root.join("A2/g")).unwrap().status, Status::Deleted);

        // A genuinely separate copy is undone.
        db.op_copy_file(&root.join("A2/h"), &PropertySet::new(), &changed, &copied_origin("branches/h"), &sha1, None, &[])
            .unwrap();
        db.temp_op_delete(&root.join("A2/h")).unwrap();
        assert!(matches!(db.read_info(&root.join("A2/h")), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_delete_absent_is_refused() {
        let (_tmp, db, root) = checkout();
        let secret = root.join("secret");
        db.base_add_absent_node(&secret, &BaseNode::new("trunk/secret", ROOT_URL, UUID, 1), Kind::File, Presence::Absent, &[])
            .unwrap();
        assert!(matches!(db.temp_op_delete(&secret), Err(WcError::UnexpectedStatus(_))));
        assert!(matches!(db.temp_op_delete(&root.join("nothing")), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_delete_nested_segment_root_updates_stub() {
        let (_tmp, db, root) = checkout();
        let sub = root.join("sub");
        db.init(&sub, "trunk/sub", ROOT_URL, UUID, 1, Depth::Infinity).unwrap();
        db.base_add_directory(&sub, &BaseNode::new("trunk/sub", ROOT_URL, UUID, 1), &[], Depth::Infinity, &[])
            .unwrap();
        db.temp_op_delete(&sub).unwrap();
        assert_eq!(db.read_info(&sub).unwrap().status, Status::Deleted);

        let (parent, _) = db.parse(&root).unwrap();
        let stub = rows::select_working(&parent.conn(), "sub").unwrap().unwrap();
        assert_eq!(stub.kind, Kind::Subdir);
        assert_eq!(stub.presence, Presence::BaseDeleted);
    }

    #[test]
    fn test_delete_unreachable_segment_root() {
        let (_tmp, db, root) = checkout();
        let sub = root.join("sub");
        db.init(&sub, "trunk/sub", ROOT_URL, UUID, 1, Depth::Infinity).unwrap();
        db.base_add_directory(&sub, &BaseNode::new("trunk/sub", ROOT_URL, UUID, 1), &[], Depth::Infinity, &[])
            .unwrap();
        drop(db);
        std::fs::remove_dir_all(crate::schema::adm_dir(&sub)).unwrap();

        let db = WcDb::new();
        assert_eq!(db.read_info(&sub).unwrap().status, Status::Obstructed);
        db.temp_op_delete(&sub).unwrap();
        assert_eq!(db.read_info(&sub).unwrap().status, Status::ObstructedDelete);

        let (parent, _) = db.parse(&root).unwrap();
        let stub = rows::select_working(&parent.conn(), "sub").unwrap().unwrap();
        assert_eq!(stub.kind, Kind::Subdir);
        assert_eq!(stub.presence, Presence::BaseDeleted);
    }

    #[test]
    fn test_delete_incomplete_child_of_local_add_removes_it() {
        let (_tmp, db, root) = checkout();
        let n = root.join("N");
        db.op_add_directory(&n, &[]).unwrap();
        let (seg, _) = db.parse(&root).unwrap();
        rows::insert_working(&seg.conn(), "N/x", &WorkingRow::new(Presence::Incomplete, Kind::File)).unwrap();
        db.flush_entries(&n.join("x"));

        db.temp_op_delete(&n.join("x")).unwrap();
        assert!(matches!(db.read_info(&n.join("x")), Err(WcError::NotFound(_))));
        assert_eq!(db.read_info(&n).unwrap().status, Status::Added);
    }

    #[test]
    fn test_delete_incomplete_child_of_copy_keeps_it() {
        let (_tmp, db, root) = checkout();
        db.base_add_directory(&root.join("B"), &BaseNode::new("trunk/B", ROOT_URL, UUID, 1), &["later".into()], Depth::Infinity, &[])
            .unwrap();
        db.op_copy(&root.join("B"), &root.join("B2"), &[]).unwrap();

        db.temp_op_delete(&root.join("B2/later")).unwrap();
        assert_eq!(db.read_info(&root.join("B2/later")).unwrap().status, Status::Incomplete);
    }

    #[test]
    fn test_set_props_records_conflict_atomically() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        let conflict = Conflict::Property { reject_file: "iota.prej".into() };
        db.op_set_props(&iota, Some(&PropertySet::new().with("p", "v")), Some(&conflict), &[]).unwrap();

        let info = db.read_info(&iota).unwrap();
        assert!(info.props_mod);
        assert!(info.conflicted);
        assert_eq!(db.read_conflicts(&iota).unwrap(), vec![conflict.clone()]);

        let tc = TreeConflict {
            node_kind: Kind::File,
            operation: ConflictOperation::Update,
            action: ConflictAction::Edit,
            reason: ConflictReason::Deleted,
        };
        let f = root.join("A/f");
        db.op_set_props(&f, None, Some(&Conflict::Tree(tc.clone())), &[]).unwrap();
        assert_eq!(db.op_read_tree_conflict(&f).unwrap(), Some(tc));

        let err = db.op_set_props(&root.join("ghost"), None, Some(&conflict), &[]).unwrap_err();
        assert!(matches!(err, WcError::NotFound(_)));
    }

    #[test]
    fn test_tree_conflict_lives_in_parent() {
        let (_tmp, db, root) = checkout();
        let f = root.join("A/f");
        let tc = TreeConflict {
            node_kind: Kind::File,
            operation: ConflictOperation::Merge,
            action: ConflictAction::Delete,
            reason: ConflictReason::Edited,
        };
        db.op_set_tree_conflict(&f, Some(&tc)).unwrap();
        assert_eq!(db.op_read_tree_conflict(&f).unwrap(), Some(tc.clone()));
        assert!(db.read_info(&f).unwrap().conflicted);
        assert_eq!(db.read_conflict_victims(&root.join("A")).unwrap(), vec!["f"]);

        db.op_mark_resolved(&f, false, false, true).unwrap();
        assert_eq!(db.op_read_tree_conflict(&f).unwrap(), None);
        assert!(!db.read_info(&f).unwrap().conflicted);

        assert!(matches!(db.op_set_tree_conflict(&root, Some(&tc)), Err(WcError::InvalidArgument(_))));
    }

    #[test]
    fn test_mark_resolved_text_and_props() {
        let (_tmp, db, root) = checkout();
        let f = root.join("A/f");
        db.op_set_text_conflict_marker_files(&f, Some("f.r1"), Some("f.r2"), Some("f.mine")).unwrap();
        db.op_set_property_conflict_marker_file(&f, Some("f.prej")).unwrap();
        assert_eq!(db.read_conflicts(&f).unwrap().len(), 2);

        db.op_mark_resolved(&f, true, false, false).unwrap();
        assert_eq!(db.read_conflicts(&f).unwrap().len(), 1);
        db.op_mark_resolved(&f, false, true, false).unwrap();
        assert!(db.read_conflicts(&f).unwrap().is_empty());

        // The emptied ACTUAL row is gone.
        let (seg, _) = db.parse(&f).unwrap();
        assert!(rows::select_actual(&seg.conn(), "A/f").unwrap().is_none());
    }

    #[test]
    fn test_revert_keeps_changelist() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.op_set_changelist(&iota, Some("cl")).unwrap();
        db.op_set_props(&iota, Some(&PropertySet::new().with("p", "v")), None, &[]).unwrap();
        db.op_revert(&iota).unwrap();

        let info = db.read_info(&iota).unwrap();
        assert!(!info.props_mod);
        assert_eq!(info.changelist.as_deref(), Some("cl"));
    }

    #[test]
    fn test_set_props_on_unknown_node() {
        let (_tmp, db, root) = checkout();
        let err = db.op_set_props(&root.join("ghost"), Some(&PropertySet::new()), None, &[]).unwrap_err();
        assert!(matches!(err, WcError::NotFound(_)));
    }

    #[test]
    fn test_add_twice_fails() {
        let (_tmp, db, root) = checkout();
        db.op_add_symlink(&root.join("link"), "iota", &[]).unwrap();
        assert!(matches!(db.op_add_file(&root.join("link"), &[]), Err(WcError::AlreadyExists(_))));
    }

    #[test]
    fn test_remove_entry_and_working() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.temp_op_delete(&iota).unwrap();
        db.temp_op_remove_working(&iota).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().status, Status::Normal);

        db.temp_op_remove_entry(&iota).unwrap();
        assert!(matches!(db.read_info(&iota), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_unfinished_operations() {
        let (_tmp, db, root) = checkout();
        assert!(matches!(db.op_delete(&root.join("iota")), Err(WcError::NotImplemented(_))));
        assert!(matches!(db.op_move(&root.join("iota"), &root.join("b")), Err(WcError::NotImplemented(_))));
        assert!(matches!(db.op_modified(&root.join("iota")), Err(WcError::NotImplemented(_))));
        assert!(matches!(db.op_mark_conflict(&root.join("iota")), Err(WcError::NotImplemented(_))));
    }
}
