//! Folding local changes into BASE and other repository-driven writes

use super::rows::{self, ActualRow, BaseRow};
use super::{StubLayer, WcDb};
use crate::error::{Result, WcError};
use crate::pristine;
use crate::schema::in_txn;
use crate::types::{ChangedInfo, Checksum, Kind, Lock, Presence, Revnum};
use crate::workqueue::WorkItem;
use rusqlite::OptionalExtension;
use std::path::Path;

impl WcDb {
    /// Record that a node was committed as `new_revision`.
    ///
    /// WORKING content (or BASE when nothing is scheduled) becomes the new
    /// BASE row, local property changes and conflict markers are dropped.
    /// A committed deletion removes the node from every layer.
    #[allow(clippy::too_many_arguments)]
    pub fn global_commit(
        &self,
        local_abspath: &Path,
        new_revision: Revnum,
        changed_date: Option<i64>,
        changed_author: Option<&str>,
        new_checksum: Option<&Checksum>,
        keep_changelist: bool,
        work_items: &[WorkItem],
    ) -> Result<()> {
        if new_revision < 1 {
            return Err(WcError::InvalidArgument(format!("Invalid commit revision {}", new_revision)));
        }
        let abspath = super::check_abspath(local_abspath)?;
        let (seg, relpath) = self.parse(&abspath)?;
        let (base, working, actual) = {
            let conn = seg.conn();
            (
                rows::select_base(&conn, &relpath)?,
                rows::select_working(&conn, &relpath)?,
                rows::select_actual(&conn, &relpath)?,
            )
        };

        if let Some(w) = &working {
            if matches!(w.presence, Presence::NotPresent | Presence::BaseDeleted) {
                let conn = seg.conn();
                in_txn(&conn, |c| {
                    rows::delete_base(c, &relpath)?;
                    rows::delete_working(c, &relpath)?;
                    rows::delete_actual(c, &relpath)?;
                    rows::wq_insert(c, work_items)
                })?;
                drop(conn);
                if relpath.is_empty() {
                    self.sync_parent_stub(&seg, StubLayer::Base, None)?;
                    self.sync_parent_stub(&seg, StubLayer::Working, None)?;
                }
                self.flush_entries(&abspath);
                tracing::debug!("Committed deletion of {:?} in r{}", abspath, new_revision);
                return Ok(());
            }
        }

        let (mut row, repos) = match (&base, working) {
            (_, Some(w)) => {
                let addition = self.scan_addition(&abspath)?;
                let mut row = BaseRow::new(Presence::Normal, w.kind);
                row.checksum = w.checksum;
                row.translated_size = w.translated_size;
                row.last_mod_time = w.last_mod_time;
                row.depth = w.depth;
                row.target = w.target;
                row.props = w.props;
                row.repos_relpath = Some(addition.repos_relpath);
                (row, Some((addition.repos_root_url, addition.repos_uuid)))
            }
            (Some(b), None) => (b.clone(), None),
            (None, None) => return Err(WcError::NotFound(abspath)),
        };

        if let Some(props) = actual.as_ref().and_then(|a| a.props.clone()) {
            row.props = Some(props);
        }
        if row.props.is_none() {
            row.props = Some(Default::default());
        }
        if let Some(checksum) = new_checksum {
            let sha1 = pristine::conn_lookup_sha1(&seg.conn(), checksum)?
                .ok_or_else(|| WcError::Missing(checksum.to_db()))?;
            row.checksum = Some(sha1);
            row.translated_size = None;
            row.last_mod_time = None;
        }
        row.presence = Presence::Normal;
        row.revnum = Some(new_revision);
        row.changed = ChangedInfo {
            rev: Some(new_revision),
            date: changed_date,
            author: changed_author.map(str::to_string),
        };
        let kind = row.kind;

        let conn = seg.conn();
        in_txn(&conn, |c| {
            if let Some((root_url, uuid)) = &repos {
                row.repos_id = Some(rows::repos_ensure(c, root_url, uuid)?);
            }
            rows::insert_base(c, &relpath, &row)?;
            rows::delete_working(c, &relpath)?;
            let changelist = if keep_changelist { actual.and_then(|a| a.changelist) } else { None };
            rows::write_actual(c, &relpath, &ActualRow { changelist, ..Default::default() })?;
            rows::wq_insert(c, work_items)
        })?;
        drop(conn);

        if relpath.is_empty() && kind == Kind::Dir {
            self.sync_parent_stub(&seg, StubLayer::Base, Some(Presence::Normal))?;
            self.sync_parent_stub(&seg, StubLayer::Working, None)?;
        }
        self.flush_entries(&abspath);
        tracing::debug!("Committed {:?} as r{}", abspath, new_revision);
        Ok(())
    }

    pub fn global_update(&self, _local_abspath: &Path, _new_revision: Revnum) -> Result<()> {
        Err(WcError::NotImplemented("global_update"))
    }

    /// Point the working copy rooted at `local_dir_abspath` (and every
    /// nested segment) at a new repository root URL
    pub fn global_relocate(&self, local_dir_abspath: &Path, new_root_url: &str) -> Result<()> {
        let (seg, relpath) = self.parse(local_dir_abspath)?;
        let root = rows::select_base(&seg.conn(), &relpath)?
            .ok_or_else(|| WcError::NotFound(local_dir_abspath.to_path_buf()))?;
        let (_, old_root_url, _) = self.scan_base_repos(local_dir_abspath)?;
        if root.kind != Kind::Dir {
            return Err(WcError::InvalidArgument(format!(
                "Cannot relocate '{}' as it is not a directory",
                local_dir_abspath.display()
            )));
        }
        self.relocate_segment(seg.root(), &old_root_url, new_root_url)?;
        self.flush_entries(local_dir_abspath);
        tracing::info!("Relocated {:?} from {} to {}", local_dir_abspath, old_root_url, new_root_url);
        Ok(())
    }

    fn relocate_segment(&self, segment_root: &Path, old_root_url: &str, new_root_url: &str) -> Result<()> {
        let (seg, _) = self.parse(segment_root)?;
        let nested: Vec<String> = {
            let conn = seg.conn();
            let taken: Option<i64> = conn
                .query_row("SELECT id FROM repository WHERE root = ?1", [new_root_url], |r| r.get(0))
                .optional()?;
            if taken.is_some() && old_root_url != new_root_url {
                return Err(WcError::InvalidArgument(format!(
                    "Repository root '{}' is already recorded",
                    new_root_url
                )));
            }
            conn.execute(
                "UPDATE repository SET root = ?2 WHERE root = ?1",
                rusqlite::params![old_root_url, new_root_url],
            )?;
            let mut stmt = conn.prepare_cached("SELECT local_relpath FROM base_node WHERE kind = 'subdir'")?;
            let names = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
            names
        };
        for child in nested {
            let child_root = seg.abspath(&child);
            if crate::schema::has_store(&child_root) {
                self.relocate_segment(&child_root, old_root_url, new_root_url)?;
            }
        }
        Ok(())
    }

    /// Remember the on-disk size and mtime of a file so later status checks
    /// can skip comparing contents
    pub fn record_fileinfo(&self, local_abspath: &Path, translated_size: i64, last_mod_time: i64) -> Result<()> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        let mut n = conn.execute(
            "UPDATE working_node SET translated_size = ?2, last_mod_time = ?3 \
             WHERE local_relpath = ?1 AND presence = 'normal'",
            rusqlite::params![relpath, translated_size, last_mod_time],
        )?;
        if n == 0 {
            n = conn.execute(
                "UPDATE base_node SET translated_size = ?2, last_mod_time = ?3 WHERE local_relpath = ?1",
                rusqlite::params![relpath, translated_size, last_mod_time],
            )?;
        }
        drop(conn);
        if n == 0 {
            return Err(WcError::NotFound(local_abspath.to_path_buf()));
        }
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// Record a repository lock on the BASE node
    pub fn lock_add(&self, local_abspath: &Path, lock: &Lock) -> Result<()> {
        let (repos_relpath, root_url, uuid) = self.scan_base_repos(local_abspath)?;
        let (seg, _) = self.parse(local_abspath)?;
        let conn = seg.conn();
        in_txn(&conn, |c| {
            let repos_id = rows::repos_ensure(c, &root_url, &uuid)?;
            c.execute(
                "INSERT OR REPLACE INTO lock (repos_id, repos_relpath, lock_token, lock_owner, lock_comment, lock_date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![repos_id, repos_relpath, lock.token, lock.owner, lock.comment, lock.date],
            )?;
            Ok(())
        })?;
        drop(conn);
        self.flush_entries(local_abspath);
        Ok(())
    }

    pub fn lock_remove(&self, local_abspath: &Path) -> Result<()> {
        let (repos_relpath, root_url, _) = self.scan_base_repos(local_abspath)?;
        let (seg, _) = self.parse(local_abspath)?;
        seg.conn().execute(
            "DELETE FROM lock WHERE repos_relpath = ?1 \
             AND repos_id = (SELECT id FROM repository WHERE root = ?2)",
            rusqlite::params![repos_relpath, root_url],
        )?;
        self.flush_entries(local_abspath);
        Ok(())
    }

    /// Id of the repository row in the segment of `wri_abspath`, created on demand
    pub fn repos_ensure(&self, wri_abspath: &Path, root_url: &str, uuid: &str) -> Result<i64> {
        let (seg, _) = self.parse(wri_abspath)?;
        rows::repos_ensure(&seg.conn(), root_url, uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::properties::PropertySet;
    use crate::types::{Depth, Status};

    #[test]
    fn test_commit_local_addition() {
        let (_tmp, db, root) = checkout();
        let new = root.join("A/new");
        db.op_add_file(&new, &[]).unwrap();
        db.op_set_props(&new, Some(&PropertySet::new().with("svn:eol-style", "native")), None, &[]).unwrap();
        let (sha1, _) = db.pristine_install_contents(&root, b"new file\n").unwrap();

        db.global_commit(&new, 2, Some(1_000_000), Some("jrandom"), Some(&sha1), false, &[]).unwrap();

        let info = db.read_info(&new).unwrap();
        assert_eq!(info.status, Status::Normal);
        assert_eq!(info.revision, Some(2));
        assert_eq!(info.repos_relpath.as_deref(), Some("trunk/A/new"));
        assert_eq!(info.checksum, Some(sha1));
        assert_eq!(info.changed.author.as_deref(), Some("jrandom"));
        assert!(!info.props_mod);
        assert_eq!(db.base_get_props(&new).unwrap().get_str("svn:eol-style"), Some("native"));
    }

    #[test]
    fn test_commit_deletion_forgets_node() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.temp_op_delete(&iota).unwrap();
        db.global_commit(&iota, 2, None, None, None, false, &[]).unwrap();
        assert!(matches!(db.read_info(&iota), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_commit_keeps_changelist_on_request() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.op_set_changelist(&iota, Some("cl")).unwrap();
        db.global_commit(&iota, 3, None, None, None, true, &[]).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().changelist.as_deref(), Some("cl"));
        assert_eq!(db.read_info(&iota).unwrap().revision, Some(3));

        db.global_commit(&iota, 4, None, None, None, false, &[]).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().changelist, None);
        assert!(db.global_commit(&iota, 0, None, None, None, false, &[]).is_err());
    }

    #[test]
    fn test_relocate_updates_nested_segments() {
        let (_tmp, db, root) = checkout();
        let sub = root.join("sub");
        db.init(&sub, "trunk/sub", ROOT_URL, UUID, 1, Depth::Infinity).unwrap();
        db.base_add_directory(&sub, &crate::types::BaseNode::new("trunk/sub", ROOT_URL, UUID, 1), &[], Depth::Infinity, &[])
            .unwrap();

        db.global_relocate(&root, "https://svn.example.org/repos").unwrap();
        assert_eq!(db.read_info(&root.join("iota")).unwrap().repos_root_url.as_deref(), Some("https://svn.example.org/repos"));
        assert_eq!(db.read_info(&sub).unwrap().repos_root_url.as_deref(), Some("https://svn.example.org/repos"));
    }

    #[test]
    fn test_record_fileinfo() {
        let (_tmp, db, root) = checkout();
        db.record_fileinfo(&root.join("iota"), 13, 42).unwrap();
        let info = db.read_info(&root.join("iota")).unwrap();
        assert_eq!(info.translated_size, Some(13));
        assert_eq!(info.last_mod_time, Some(42));
        assert!(matches!(db.record_fileinfo(&root.join("ghost"), 1, 1), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_repository_lock_roundtrip() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        let lock = Lock {
            token: "opaquelocktoken:1".into(),
            owner: Some("jrandom".into()),
            comment: None,
            date: Some(7),
        };
        db.lock_add(&iota, &lock).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().lock, Some(lock.clone()));
        assert_eq!(db.base_get_info(&iota).unwrap().lock, Some(lock));

        db.lock_remove(&iota).unwrap();
        assert_eq!(db.read_info(&iota).unwrap().lock, None);
    }

    #[test]
    fn test_update_is_unfinished() {
        let (_tmp, db, root) = checkout();
        assert!(matches!(db.global_update(&root, 2), Err(WcError::NotImplemented(_))));
    }
}
