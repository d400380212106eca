//! Status derivation and the other combined reads

use super::rows::{self, ActualRow, BaseRow, WorkingRow};
use super::{Segment, WcDb};
use crate::error::{Result, WcError};
use crate::paths::relpath_join;
use crate::properties::PropertySet;
use crate::types::{Conflict, CopyOrigin, Kind, NodeInfo, Presence, Status, TreeConflict};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Status implied by a BASE row on its own
pub(crate) fn base_status(row: &BaseRow) -> Result<Status> {
    Ok(match row.presence {
        Presence::Normal if row.kind == Kind::Subdir => Status::Obstructed,
        Presence::Normal => Status::Normal,
        Presence::Absent => Status::Absent,
        Presence::Excluded => Status::Excluded,
        Presence::NotPresent => Status::NotPresent,
        Presence::Incomplete => Status::Incomplete,
        Presence::BaseDeleted => {
            return Err(WcError::Corrupt("BASE row with presence 'base-deleted'".into()));
        }
    })
}

/// Status implied by a WORKING row layered over whatever BASE holds
pub(crate) fn working_status(row: &WorkingRow) -> Result<Status> {
    let stub = row.kind == Kind::Subdir;
    Ok(match row.presence {
        Presence::Normal if stub => Status::ObstructedAdd,
        Presence::Normal => Status::Added,
        Presence::NotPresent | Presence::BaseDeleted if stub => Status::ObstructedDelete,
        Presence::NotPresent | Presence::BaseDeleted => Status::Deleted,
        Presence::Incomplete => Status::Incomplete,
        Presence::Excluded => Status::Excluded,
        Presence::Absent => {
            return Err(WcError::Corrupt("WORKING row with presence 'absent'".into()));
        }
    })
}

/// Stubs are reported as the directory they stand for
pub(crate) fn report_kind(kind: Kind) -> Kind {
    if kind == Kind::Subdir { Kind::Dir } else { kind }
}

impl WcDb {
    /// Combine BASE, WORKING and ACTUAL into one status record
    pub fn read_info(&self, local_abspath: &Path) -> Result<NodeInfo> {
        let abspath = super::check_abspath(local_abspath)?;
        if let Some(info) = self.cached_info(&abspath) {
            return Ok(info);
        }

        let (seg, relpath) = self.parse(&abspath)?;
        let mut info = {
            let conn = seg.conn();
            let base = rows::select_base(&conn, &relpath)?;
            let working = rows::select_working(&conn, &relpath)?;
            let actual = rows::select_actual(&conn, &relpath)?;
            derive_info(&conn, &abspath, base, working, actual)?
        };

        if !info.conflicted && self.tree_conflict_of(&seg, &relpath)?.is_some() {
            info.conflicted = true;
        }

        self.cache_info(&abspath, &info);
        Ok(info)
    }

    /// Tree conflict recorded for this node in its parent's ACTUAL row
    pub(crate) fn tree_conflict_of(&self, seg: &Arc<Segment>, relpath: &str) -> Result<Option<TreeConflict>> {
        let Some(((pseg, prel), name)) = self.parent_location(seg, relpath)? else {
            return Ok(None);
        };
        let actual = rows::select_actual(&pseg.conn(), &prel)?;
        match actual {
            Some(row) => Ok(row.tree_conflicts()?.remove(&name)),
            None => Ok(None),
        }
    }

    /// ACTUAL properties if set, otherwise the pristine ones
    pub fn read_props(&self, local_abspath: &Path) -> Result<PropertySet> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let actual = rows::select_actual(&seg.conn(), &relpath)?;
        if let Some(props) = actual.and_then(|a| a.props) {
            return Ok(props);
        }
        self.read_pristine_props(local_abspath)
    }

    /// Properties of the node as last known to the repository or the copy source
    pub fn read_pristine_props(&self, local_abspath: &Path) -> Result<PropertySet> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        if let Some(w) = rows::select_working(&conn, &relpath)? {
            if matches!(w.presence, Presence::Normal | Presence::Incomplete) {
                return Ok(w.props.unwrap_or_default());
            }
        }
        match rows::select_base(&conn, &relpath)? {
            Some(b) => Ok(b.props.unwrap_or_default()),
            None => Err(WcError::NotFound(local_abspath.to_path_buf())),
        }
    }

    /// Names of all BASE and WORKING children
    pub fn read_children(&self, local_abspath: &Path) -> Result<Vec<String>> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        let mut names: BTreeSet<String> = rows::base_children(&conn, &relpath)?.into_iter().collect();
        names.extend(rows::working_children(&conn, &relpath)?);
        Ok(names.into_iter().collect())
    }

    /// Kind of a node, `Unknown` for unversioned paths when `allow_missing`
    pub fn read_kind(&self, local_abspath: &Path, allow_missing: bool) -> Result<Kind> {
        match self.read_info(local_abspath) {
            Ok(info) => Ok(info.kind),
            Err(WcError::NotFound(_)) if allow_missing => Ok(Kind::Unknown),
            Err(e) => Err(e),
        }
    }

    /// True for nodes that are absent, excluded or not present
    pub fn node_hidden(&self, local_abspath: &Path) -> Result<bool> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let conn = seg.conn();
        if let Some(w) = rows::select_working(&conn, &relpath)? {
            return Ok(w.presence == Presence::Excluded);
        }
        match rows::select_base(&conn, &relpath)? {
            Some(b) => Ok(matches!(b.presence, Presence::Absent | Presence::NotPresent | Presence::Excluded)),
            None => Err(WcError::NotFound(local_abspath.to_path_buf())),
        }
    }

    /// True when `local_abspath` is the top of a working copy: a segment root
    /// whose parent directory does not record it as a child
    pub fn is_wcroot(&self, local_abspath: &Path) -> Result<bool> {
        let (seg, relpath) = self.parse(local_abspath)?;
        if !relpath.is_empty() {
            return Ok(false);
        }
        Ok(self.linked_parent(&seg)?.is_none())
    }

    /// All conflicts attached to a node
    pub fn read_conflicts(&self, local_abspath: &Path) -> Result<Vec<Conflict>> {
        let (seg, relpath) = self.parse(local_abspath)?;
        let mut conflicts = Vec::new();
        let actual = rows::select_actual(&seg.conn(), &relpath)?;
        if let Some(row) = actual {
            if let Some(reject) = row.prop_reject.clone() {
                conflicts.push(Conflict::Property { reject_file: reject });
            }
            if row.has_text_conflict() {
                conflicts.push(Conflict::Text {
                    old: row.conflict_old,
                    new: row.conflict_new,
                    working: row.conflict_working,
                });
            }
        }
        if let Some(tc) = self.tree_conflict_of(&seg, &relpath)? {
            conflicts.push(Conflict::Tree(tc));
        }
        Ok(conflicts)
    }

    /// Names of the children of a directory that are in conflict
    pub fn read_conflict_victims(&self, local_dir_abspath: &Path) -> Result<Vec<String>> {
        let (seg, relpath) = self.parse(local_dir_abspath)?;
        let conn = seg.conn();
        let mut victims = BTreeSet::new();
        for name in rows::actual_children(&conn, &relpath)? {
            let row = rows::select_actual(&conn, &relpath_join(&relpath, &name))?;
            if row.is_some_and(|r| r.has_conflict_markers()) {
                victims.insert(name);
            }
        }
        if let Some(dir_row) = rows::select_actual(&conn, &relpath)? {
            victims.extend(dir_row.tree_conflicts()?.into_keys());
        }
        Ok(victims.into_iter().collect())
    }
}

fn derive_info(
    conn: &rusqlite::Connection,
    abspath: &Path,
    base: Option<BaseRow>,
    working: Option<WorkingRow>,
    actual: Option<ActualRow>,
) -> Result<NodeInfo> {
    let (status, kind) = match (&base, &working) {
        (None, None) => {
            return Err(match actual {
                Some(_) => WcError::Corrupt(format!(
                    "Node '{}' has ACTUAL data but no BASE or WORKING row",
                    abspath.display()
                )),
                None => WcError::NotFound(abspath.to_path_buf()),
            });
        }
        (_, Some(w)) => (working_status(w)?, w.kind),
        (Some(b), None) => (base_status(b)?, b.kind),
    };

    let mut info = NodeInfo {
        status,
        kind: report_kind(kind),
        revision: None,
        repos_relpath: None,
        repos_root_url: None,
        repos_uuid: None,
        changed: Default::default(),
        last_mod_time: None,
        depth: None,
        checksum: None,
        translated_size: None,
        target: None,
        changelist: None,
        original: None,
        props_mod: false,
        base_shadowed: base.is_some() && working.is_some(),
        conflicted: false,
        lock: None,
    };

    if let Some(b) = &base {
        if let (Some(id), Some(rp)) = (b.repos_id, &b.repos_relpath) {
            info.lock = rows::select_lock(conn, id, rp)?;
        }
    }

    match (base, working) {
        (_, Some(w)) => {
            if let (Some(id), Some(path), Some(rev)) = (w.copyfrom_repos_id, w.copyfrom_repos_path, w.copyfrom_revnum) {
                let (root_url, uuid) = rows::repos_fetch(conn, id)?;
                info.original = Some(CopyOrigin { repos_relpath: path, root_url, uuid, revision: rev });
            }
            info.changed = w.changed;
            info.last_mod_time = w.last_mod_time;
            info.depth = w.depth;
            info.checksum = w.checksum;
            info.translated_size = w.translated_size;
            info.target = w.target;
        }
        (Some(b), None) => {
            if let Some(id) = b.repos_id {
                let (root_url, uuid) = rows::repos_fetch(conn, id)?;
                info.repos_root_url = Some(root_url);
                info.repos_uuid = Some(uuid);
            }
            info.revision = b.revnum;
            info.repos_relpath = b.repos_relpath;
            info.changed = b.changed;
            info.last_mod_time = b.last_mod_time;
            info.depth = b.depth;
            info.checksum = b.checksum;
            info.translated_size = b.translated_size;
            info.target = b.target;
        }
        (None, None) => {}
    }

    if let Some(a) = actual {
        info.conflicted = a.has_conflict_markers();
        info.props_mod = a.props.is_some();
        info.changelist = a.changelist;
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::{ConflictAction, ConflictOperation, ConflictReason};

    #[test]
    fn test_read_info_is_idempotent() {
        let (_tmp, db, root) = checkout();
        let f = root.join("A/f");
        let first = db.read_info(&f).unwrap();
        let second = db.read_info(&f).unwrap();
        assert_eq!(first, second);

        let fresh = WcDb::with_cache_capacity(1);
        assert_eq!(fresh.read_info(&f).unwrap(), first);
    }

    #[test]
    fn test_base_only_node() {
        let (_tmp, db, root) = checkout();
        let info = db.read_info(&root.join("iota")).unwrap();
        assert_eq!(info.status, Status::Normal);
        assert_eq!(info.kind, Kind::File);
        assert_eq!(info.revision, Some(1));
        assert_eq!(info.repos_relpath.as_deref(), Some("trunk/iota"));
        assert_eq!(info.repos_uuid.as_deref(), Some(UUID));
        assert!(info.checksum.is_some());
        assert!(!info.base_shadowed);
        assert!(!info.conflicted);
    }

    #[test]
    fn test_not_found_and_corrupt() {
        let (_tmp, db, root) = checkout();
        assert!(matches!(db.read_info(&root.join("nope")), Err(WcError::NotFound(_))));

        let (seg, _) = db.parse(&root).unwrap();
        seg.conn()
            .execute("INSERT INTO actual_node (local_relpath, parent_relpath, changelist) VALUES ('orphan', '', 'cl')", [])
            .unwrap();
        assert!(matches!(db.read_info(&root.join("orphan")), Err(WcError::Corrupt(_))));
    }

    #[test]
    fn test_base_shadowed_implies_both_layers() {
        let (_tmp, db, root) = checkout();
        db.temp_op_delete(&root.join("iota")).unwrap();
        db.op_add_file(&root.join("newfile"), &[]).unwrap();

        for name in ["iota", "newfile", "A", "A/f"] {
            let path = root.join(name);
            let info = db.read_info(&path).unwrap();
            let (seg, rel) = db.parse(&path).unwrap();
            let conn = seg.conn();
            let has_base = rows::select_base(&conn, &rel).unwrap().is_some();
            let has_working = rows::select_working(&conn, &rel).unwrap().is_some();
            assert_eq!(info.base_shadowed, has_base && has_working, "{}", name);
        }
    }

    #[test]
    fn test_conflict_sources() {
        let (_tmp, db, root) = checkout();
        let f = root.join("A/f");
        db.op_set_text_conflict_marker_files(&f, Some("f.r1"), Some("f.r2"), Some("f.mine")).unwrap();
        assert!(db.read_info(&f).unwrap().conflicted);

        let tc = TreeConflict {
            node_kind: Kind::File,
            operation: ConflictOperation::Update,
            action: ConflictAction::Delete,
            reason: ConflictReason::Edited,
        };
        db.op_set_tree_conflict(&root.join("iota"), Some(&tc)).unwrap();
        assert!(db.read_info(&root.join("iota")).unwrap().conflicted);

        let conflicts = db.read_conflicts(&f).unwrap();
        assert!(matches!(&conflicts[0], Conflict::Text { old: Some(o), .. } if o == "f.r1"));
        assert_eq!(db.read_conflicts(&root.join("iota")).unwrap(), vec![Conflict::Tree(tc)]);

        assert_eq!(db.read_conflict_victims(&root).unwrap(), vec!["iota"]);
        assert_eq!(db.read_conflict_victims(&root.join("A")).unwrap(), vec!["f"]);
    }

    #[test]
    fn test_props_layers() {
        let (_tmp, db, root) = checkout();
        let f = root.join("A/f");
        assert!(db.read_props(&f).unwrap().is_empty());

        let props = PropertySet::new().with("svn:eol-style", "native");
        db.op_set_props(&f, Some(&props), None, &[]).unwrap();
        assert_eq!(db.read_props(&f).unwrap(), props);
        assert!(db.read_pristine_props(&f).unwrap().is_empty());
        assert!(db.read_info(&f).unwrap().props_mod);
    }

    #[test]
    fn test_children_kind_and_hidden() {
        let (_tmp, db, root) = checkout();
        db.op_add_directory(&root.join("new_dir"), &[]).unwrap();
        assert_eq!(db.read_children(&root).unwrap(), vec!["A", "iota", "new_dir"]);
        assert_eq!(db.read_kind(&root.join("A"), false).unwrap(), Kind::Dir);
        assert_eq!(db.read_kind(&root.join("zz"), true).unwrap(), Kind::Unknown);
        assert!(db.read_kind(&root.join("zz"), false).is_err());

        db.base_add_absent_node(&root.join("gone"), &crate::types::BaseNode::new("trunk/gone", ROOT_URL, UUID, 1), Kind::File, Presence::NotPresent, &[])
            .unwrap();
        assert!(db.node_hidden(&root.join("gone")).unwrap());
        assert!(!db.node_hidden(&root.join("iota")).unwrap());
    }

    #[test]
    fn test_wcroot_detection() {
        let (_tmp, db, root) = checkout();
        assert!(db.is_wcroot(&root).unwrap());
        assert!(!db.is_wcroot(&root.join("A")).unwrap());
    }
}
