//! BASE layer: what the working copy last received from the repository

use super::read::{base_status, report_kind};
use super::rows::{self, BaseRow};
use super::{StubLayer, WcDb};
use crate::error::{Result, WcError};
use crate::paths::relpath_join;
use crate::pristine;
use crate::properties::PropertySet;
use crate::schema::in_txn;
use crate::types::{BaseInfo, BaseNode, Checksum, Depth, Kind, Presence};
use crate::workqueue::WorkItem;
use std::path::Path;

impl WcDb {
    /// Insert or replace a BASE directory and announce its children as
    /// incomplete placeholders
    pub fn base_add_directory(
        &self,
        local_abspath: &Path,
        node: &BaseNode,
        children: &[String],
        depth: Depth,
        work_items: &[WorkItem],
    ) -> Result<()> {
        self.base_add_node(local_abspath, node, Kind::Dir, children, work_items, |row| {
            row.depth = Some(depth);
            Ok(())
        })
    }

    /// Insert or replace a BASE file; the text must already be in the pristine store
    pub fn base_add_file(
        &self,
        local_abspath: &Path,
        node: &BaseNode,
        checksum: &Checksum,
        translated_size: Option<i64>,
        work_items: &[WorkItem],
    ) -> Result<()> {
        let (seg, _) = self.parse(local_abspath)?;
        let sha1 = pristine::conn_lookup_sha1(&seg.conn(), checksum)?
            .ok_or_else(|| WcError::Missing(checksum.to_db()))?;
        self.base_add_node(local_abspath, node, Kind::File, &[], work_items, |row| {
            row.checksum = Some(sha1);
            row.translated_size = translated_size;
            Ok(())
        })
    }

    pub fn base_add_symlink(
        &self,
        local_abspath: &Path,
        node: &BaseNode,
        target: &str,
        work_items: &[WorkItem],
    ) -> Result<()> {
        self.base_add_node(local_abspath, node, Kind::Symlink, &[], work_items, |row| {
            row.target = Some(target.to_string());
            Ok(())
        })
    }

    /// Record a node that is unauthorized, excluded or known not to exist
    pub fn base_add_absent_node(
        &self,
        local_abspath: &Path,
        node: &BaseNode,
        kind: Kind,
        presence: Presence,
        work_items: &[WorkItem],
    ) -> Result<()> {
        if !matches!(presence, Presence::Absent | Presence::Excluded | Presence::NotPresent) {
            return Err(WcError::InvalidArgument(format!(
                "Cannot record an absent node with presence '{:?}'",
                presence
            )));
        }
        let (seg, relpath) = self.parse(local_abspath)?;
        check_revision(node)?;

        let conn = seg.conn();
        in_txn(&conn, |c| {
            let mut row = BaseRow::new(presence, kind);
            row.repos_id = Some(rows::repos_ensure(c, &node.repos_root_url, &node.repos_uuid)?);
            row.repos_relpath = Some(node.repos_relpath.clone());
            row.revnum = Some(node.revision);
            rows::insert_base(c, &relpath, &row)?;
            if let Some(conflict) = &node.conflict {
                rows::write_conflict(c, &relpath, conflict)?;
            }
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);
        self.record_root_tree_conflict(local_abspath, &relpath, node.conflict.as_ref())?;

        if relpath.is_empty() {
            self.sync_parent_stub(&seg, StubLayer::Base, Some(presence))?;
        }
        self.flush_entries(local_abspath);
        Ok(())
    }

    fn base_add_node(
        &self,
        local_abspath: &Path,
        node: &BaseNode,
        kind: Kind,
        children: &[String],
        work_items: &[WorkItem],
        fill: impl FnOnce(&mut BaseRow) -> Result<()>,
    ) -> Result<()> {
        check_revision(node)?;
        let (seg, relpath) = self.parse(local_abspath)?;

        let mut row = BaseRow::new(Presence::Normal, kind);
        row.repos_relpath = Some(node.repos_relpath.clone());
        row.revnum = Some(node.revision);
        row.changed = node.changed.clone();
        row.props = Some(node.props.clone());
        fill(&mut row)?;

        let conn = seg.conn();
        in_txn(&conn, |c| {
            row.repos_id = Some(rows::repos_ensure(c, &node.repos_root_url, &node.repos_uuid)?);
            rows::insert_base(c, &relpath, &row)?;
            for name in children {
                rows::insert_base_incomplete(c, &relpath_join(&relpath, name), node.revision)?;
            }
            if let Some(conflict) = &node.conflict {
                rows::write_conflict(c, &relpath, conflict)?;
            }
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);
        self.record_root_tree_conflict(local_abspath, &relpath, node.conflict.as_ref())?;

        if relpath.is_empty() && kind == Kind::Dir {
            self.sync_parent_stub(&seg, StubLayer::Base, Some(Presence::Normal))?;
        }
        self.flush_entries(local_abspath);
        tracing::debug!("Added BASE {:?} {:?}@{}", kind, local_abspath, node.revision);
        Ok(())
    }

    /// Delete the BASE row only; WORKING and ACTUAL are left to the caller
    pub fn base_remove(&self, local_abspath: &Path) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        rows::delete_base(&seg.conn(), &relpath)?;
        if relpath.is_empty() {
            self.sync_parent_stub(&seg, StubLayer::Base, None)?;
        }
        self.flush_entries(local_abspath);
        Ok(())
    }

    pub fn base_get_info(&self, local_abspath: &Path) -> Result<BaseInfo> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        let row = rows::select_base(&conn, &relpath)?
            .ok_or_else(|| WcError::NotFound(local_abspath.to_path_buf()))?;

        let (root_url, uuid) = match row.repos_id {
            Some(id) => {
                let (root, uuid) = rows::repos_fetch(&conn, id)?;
                (Some(root), Some(uuid))
            }
            None => (None, None),
        };
        let lock = match (row.repos_id, &row.repos_relpath) {
            (Some(id), Some(rp)) => rows::select_lock(&conn, id, rp)?,
            _ => None,
        };

        Ok(BaseInfo {
            status: base_status(&row)?,
            kind: report_kind(row.kind),
            revision: row.revnum,
            repos_relpath: row.repos_relpath,
            repos_root_url: root_url,
            repos_uuid: uuid,
            changed: row.changed,
            last_mod_time: row.last_mod_time,
            depth: row.depth,
            checksum: row.checksum,
            translated_size: row.translated_size,
            target: row.target,
            lock,
        })
    }

    pub fn base_get_props(&self, local_abspath: &Path) -> Result<PropertySet> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let row = rows::select_base(&seg.conn(), &relpath)?
            .ok_or_else(|| WcError::NotFound(local_abspath.to_path_buf()))?;
        Ok(row.props.unwrap_or_default())
    }

    pub fn base_get_children(&self, local_abspath: &Path) -> Result<Vec<String>> {
        let (seg, relpath) = self.parse(local_abspath)?;
        rows::base_children(&seg.conn(), &relpath)
    }

    /// Flip a BASE directory between `normal` and `incomplete`
    pub fn temp_op_set_base_incomplete(&self, local_dir_abspath: &Path, incomplete: bool) -> Result<()> {
        let (seg, relpath) = self.parse(local_dir_abspath)?;
        let (from, to) = if incomplete {
            (Presence::Normal, Presence::Incomplete)
        } else {
            (Presence::Incomplete, Presence::Normal)
        };
        let n = seg.conn().execute(
            "UPDATE base_node SET presence = ?3 WHERE local_relpath = ?1 AND presence = ?2",
            rusqlite::params![relpath, from, to],
        )?;
        if n == 0 {
            return Err(WcError::unexpected(format!(
                "Expected '{}' to be a {:?} BASE directory",
                local_dir_abspath.display(),
                from
            )));
        }
        self.flush_entries(local_dir_abspath);
        Ok(())
    }
}

fn check_revision(node: &BaseNode) -> Result<()> {
    if node.revision < 0 {
        return Err(WcError::InvalidArgument(format!("Invalid revision {}", node.revision)));
    }
    match node.changed.rev {
        Some(rev) if rev >= 0 => Ok(()),
        _ => Err(WcError::InvalidArgument("A valid last-changed revision is required".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::{Conflict, ConflictAction, ConflictOperation, ConflictReason, Status, TreeConflict};

    #[test]
    fn test_conflict_written_with_node() {
        let (_tmp, db, root) = checkout();
        let (sha1, _) = db.pristine_install_contents(&root, b"theirs\n").unwrap();
        let mut node = BaseNode::new("trunk/g", ROOT_URL, UUID, 2);
        let text = Conflict::Text { old: Some("g.r1".into()), new: Some("g.r2".into()), working: Some("g.mine".into()) };
        node.conflict = Some(text.clone());
        db.base_add_file(&root.join("g"), &node, &sha1, None, &[]).unwrap();

        assert!(db.read_info(&root.join("g")).unwrap().conflicted);
        assert_eq!(db.read_conflicts(&root.join("g")).unwrap(), vec![text]);
        assert_eq!(db.read_conflict_victims(&root).unwrap(), vec!["g"]);

        // A segment root keeps its tree conflict in the parent segment.
        let sub = root.join("sub");
        db.init(&sub, "trunk/sub", ROOT_URL, UUID, 1, Depth::Infinity).unwrap();
        let tc = TreeConflict {
            node_kind: Kind::Dir,
            operation: ConflictOperation::Update,
            action: ConflictAction::Add,
            reason: ConflictReason::Obstructed,
        };
        let mut node = BaseNode::new("trunk/sub", ROOT_URL, UUID, 1);
        node.conflict = Some(Conflict::Tree(tc.clone()));
        db.base_add_directory(&sub, &node, &[], Depth::Infinity, &[]).unwrap();
        assert_eq!(db.op_read_tree_conflict(&sub).unwrap(), Some(tc));
    }

    #[test]
    fn test_children_become_placeholders() {
        let (_tmp, db, root) = checkout();
        db.base_add_directory(
            &root.join("B"),
            &BaseNode::new("trunk/B", ROOT_URL, UUID, 1),
            &["x".into(), "y".into()],
            Depth::Infinity,
            &[],
        )
        .unwrap();

        assert_eq!(db.base_get_children(&root.join("B")).unwrap(), vec!["x", "y"]);
        let x = db.base_get_info(&root.join("B/x")).unwrap();
        assert_eq!(x.status, Status::Incomplete);
        assert_eq!(x.kind, Kind::Unknown);
        assert_eq!(x.repos_relpath, None);
    }

    #[test]
    fn test_file_requires_pristine() {
        let (_tmp, db, root) = checkout();
        let err = db
            .base_add_file(
                &root.join("ghost"),
                &BaseNode::new("trunk/ghost", ROOT_URL, UUID, 1),
                &Checksum::sha1_of(b"never installed"),
                None,
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, WcError::Missing(_)));
    }

    #[test]
    fn test_invalid_revision_rejected() {
        let (_tmp, db, root) = checkout();
        let mut node = BaseNode::new("trunk/l", ROOT_URL, UUID, 1);
        node.changed.rev = None;
        let err = db.base_add_symlink(&root.join("l"), &node, "target", &[]).unwrap_err();
        assert!(matches!(err, WcError::InvalidArgument(_)));
    }

    #[test]
    fn test_absent_node_and_remove() {
        let (_tmp, db, root) = checkout();
        let secret = root.join("secret");
        db.base_add_absent_node(&secret, &BaseNode::new("trunk/secret", ROOT_URL, UUID, 1), Kind::File, Presence::Absent, &[])
            .unwrap();
        assert_eq!(db.base_get_info(&secret).unwrap().status, Status::Absent);

        db.base_remove(&secret).unwrap();
        assert!(matches!(db.base_get_info(&secret), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_nested_segment_writes_parent_stub() {
        let (_tmp, db, root) = checkout();
        let sub = root.join("sub");
        db.init(&sub, "trunk/sub", ROOT_URL, UUID, 1, Depth::Infinity).unwrap();
        db.base_add_directory(&sub, &BaseNode::new("trunk/sub", ROOT_URL, UUID, 1), &[], Depth::Infinity, &[])
            .unwrap();

        assert_eq!(db.base_get_info(&sub).unwrap().status, Status::Normal);
        assert!(!db.is_wcroot(&sub).unwrap());

        // Lose the child store: the parent stub reports an obstruction.
        drop(db);
        std::fs::remove_dir_all(sub.join(".svn")).unwrap();
        let db = WcDb::new();
        let info = db.base_get_info(&sub).unwrap();
        assert_eq!(info.status, Status::Obstructed);
        assert_eq!(info.kind, Kind::Dir);
        assert_eq!(db.read_info(&sub).unwrap().status, Status::Obstructed);
    }

    #[test]
    fn test_set_base_incomplete() {
        let (_tmp, db, root) = checkout();
        db.temp_op_set_base_incomplete(&root.join("A"), true).unwrap();
        assert_eq!(db.read_info(&root.join("A")).unwrap().status, Status::Incomplete);
        db.temp_op_set_base_incomplete(&root.join("A"), false).unwrap();
        assert_eq!(db.read_info(&root.join("A")).unwrap().status, Status::Normal);
        assert!(db.temp_op_set_base_incomplete(&root.join("A"), false).is_err());
    }
}
