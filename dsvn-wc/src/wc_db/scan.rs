//! Upward scans over the layer tables
//!
//! Each scan is an explicit loop over `(segment, relpath)` locations; moving
//! up from a segment root continues in the parent segment when it links the
//! root with a stub.

use super::rows::{self, WorkingRow};
use super::{Location, WcDb};
use crate::error::{Result, WcError};
use crate::paths::{abspath_skip_ancestor, relpath_join};
use crate::types::{AdditionInfo, CopyOrigin, DeletionInfo, Presence, Status};
use std::path::{Path, PathBuf};

impl WcDb {
    /// Repository location of a BASE node, inherited from the nearest
    /// ancestor that records one
    pub fn scan_base_repos(&self, local_abspath: &Path) -> Result<(String, String, String)> {
        let start = self.parse(local_abspath)?;
        self.scan_base_repos_at(start, local_abspath)
    }

    fn scan_base_repos_at(&self, start: Location, local_abspath: &Path) -> Result<(String, String, String)> {
        let (mut seg, mut relpath) = start;
        let mut suffix = String::new();
        let mut first = true;
        loop {
            let row = rows::select_base(&seg.conn(), &relpath)?;
            let Some(row) = row else {
                return Err(if first {
                    WcError::NotFound(local_abspath.to_path_buf())
                } else {
                    WcError::Corrupt(format!(
                        "Parent(s) of '{}' should have been present",
                        local_abspath.display()
                    ))
                });
            };
            first = false;

            if let (Some(id), Some(rp)) = (row.repos_id, row.repos_relpath) {
                let (root_url, uuid) = rows::repos_fetch(&seg.conn(), id)?;
                return Ok((relpath_join(&rp, &suffix), root_url, uuid));
            }

            match self.parent_location(&seg, &relpath)? {
                Some(((pseg, prel), name)) => {
                    suffix = relpath_join(&name, &suffix);
                    seg = pseg;
                    relpath = prel;
                }
                None => {
                    return Err(WcError::Corrupt(format!(
                        "Repository location of '{}' is not recorded in any parent",
                        local_abspath.display()
                    )));
                }
            }
        }
    }

    /// Walk up from an added node to the root of its addition
    pub fn scan_addition(&self, local_abspath: &Path) -> Result<AdditionInfo> {
        let abspath = super::check_abspath(local_abspath)?;
        let (mut seg, mut relpath) = self.parse(&abspath)?;

        let start = rows::select_working(&seg.conn(), &relpath)?
            .ok_or_else(|| WcError::NotFound(abspath.clone()))?;
        if !matches!(start.presence, Presence::Normal | Presence::Excluded | Presence::Incomplete) {
            return Err(WcError::unexpected(format!("Expected node '{}' to be added.", abspath.display())));
        }

        let mut found: Option<(Status, PathBuf, CopyOrigin)> = None;
        let mut op_root = abspath.clone();
        let mut current: WorkingRow = start;
        // Path from the current location down to the start node
        let mut below = String::new();

        loop {
            if found.is_none() {
                if current.has_copyfrom() {
                    let origin = origin_of(&seg.conn(), &current)?;
                    let status = if current.moved_here { Status::MovedHere } else { Status::Copied };
                    found = Some((status, seg.abspath(&relpath), origin));
                } else {
                    op_root = seg.abspath(&relpath);
                }
            }

            let Some(((pseg, prel), name)) = self.parent_location(&seg, &relpath)? else {
                return Err(WcError::Corrupt(format!(
                    "Added node '{}' has no versioned ancestor",
                    abspath.display()
                )));
            };
            below = relpath_join(&name, &below);
            seg = pseg;
            relpath = prel;

            let parent_row = rows::select_working(&seg.conn(), &relpath)?;
            match parent_row {
                Some(row) if row.presence == Presence::Normal || row.presence == Presence::Incomplete => {
                    current = row;
                }
                _ => break,
            }
        }

        // `seg`/`relpath` is now the nearest ancestor that is not added.
        let (base_relpath, root_url, uuid) = self.scan_base_repos_at((seg.clone(), relpath.clone()), &seg.abspath(&relpath))?;
        let repos_relpath = relpath_join(&base_relpath, &below);

        Ok(match found {
            Some((status, root, origin)) => AdditionInfo {
                status,
                op_root_abspath: root,
                repos_relpath,
                repos_root_url: root_url,
                repos_uuid: uuid,
                original: Some(origin),
            },
            None => AdditionInfo {
                status: Status::Added,
                op_root_abspath: op_root,
                repos_relpath,
                repos_root_url: root_url,
                repos_uuid: uuid,
                original: None,
            },
        })
    }

    /// Walk up from a deleted node to find what was deleted and where
    pub fn scan_deletion(&self, local_abspath: &Path) -> Result<DeletionInfo> {
        let abspath = super::check_abspath(local_abspath)?;
        let (mut seg, mut relpath) = self.parse(&abspath)?;
        let mut result = DeletionInfo::default();
        let mut child_presence: Option<Presence> = None;
        let mut child_abspath = abspath.clone();
        let mut first = true;

        loop {
            let (working, base) = {
                let conn = seg.conn();
                (rows::select_working(&conn, &relpath)?, rows::select_base(&conn, &relpath)?)
            };
            let current_abspath = seg.abspath(&relpath);

            let Some(working) = working else {
                if first {
                    return Err(WcError::NotFound(abspath));
                }
                break;
            };
            if first && !matches!(working.presence, Presence::NotPresent | Presence::BaseDeleted) {
                return Err(WcError::unexpected(format!("Expected node '{}' to be deleted.", abspath.display())));
            }
            first = false;

            // A deleted child directly below an addition roots a deletion inside it.
            if working.presence == Presence::Normal
                && child_presence == Some(Presence::NotPresent)
                && result.work_del_abspath.is_none()
            {
                result.work_del_abspath = Some(child_abspath.clone());
            }

            let has_base = base.as_ref().is_some_and(|b| b.presence.is_present());
            if has_base {
                if working.presence == Presence::Normal {
                    result.base_replaced = true;
                }
                if matches!(working.presence, Presence::Normal | Presence::BaseDeleted) {
                    result.base_del_abspath = Some(current_abspath.clone());
                }
            }

            if let Some(to) = &working.moved_to {
                result.base_del_abspath = Some(current_abspath.clone());
                result.moved_to_abspath = Some(seg.abspath(to));
                break;
            }

            child_presence = Some(working.presence);
            child_abspath = current_abspath;
            match self.parent_location(&seg, &relpath)? {
                Some(((pseg, prel), _)) => {
                    seg = pseg;
                    relpath = prel;
                }
                None => break,
            }
        }
        Ok(result)
    }

    /// True when deleting this added node should drop its rows entirely:
    /// it is a plain addition, or the root of a copy.
    ///
    /// A copied child whose recorded origin equals its parent's origin plus
    /// its own name at the same revision and repository is treated as part
    /// of the parent's copy, even though it carries its own copyfrom.
    pub(crate) fn is_add_or_root_of_copy(&self, local_abspath: &Path) -> Result<bool> {
        let info = self.scan_addition(local_abspath)?;
        if info.status == Status::Added {
            return Ok(true);
        }
        if info.op_root_abspath != local_abspath {
            return Ok(false);
        }
        if info.status != Status::Copied {
            return Ok(true);
        }
        let Some(parent) = local_abspath.parent() else {
            return Ok(true);
        };
        let parent_info = match self.scan_addition(parent) {
            Ok(p) => p,
            Err(WcError::NotFound(_)) | Err(WcError::UnexpectedStatus(_)) => return Ok(true),
            Err(e) => return Err(e),
        };
        if parent_info.status != Status::Copied {
            return Ok(true);
        }
        let (Some(mine), Some(theirs)) = (&info.original, &parent_info.original) else {
            return Ok(true);
        };
        let suffix = abspath_skip_ancestor(&parent_info.op_root_abspath, local_abspath).unwrap_or_default();
        let implied = relpath_join(&theirs.repos_relpath, &suffix);
        let mistagged = theirs.revision == mine.revision
            && theirs.uuid == mine.uuid
            && theirs.root_url == mine.root_url
            && implied == mine.repos_relpath;
        Ok(!mistagged)
    }
}

fn origin_of(conn: &rusqlite::Connection, row: &WorkingRow) -> Result<CopyOrigin> {
    let (Some(id), Some(path), Some(rev)) = (row.copyfrom_repos_id, &row.copyfrom_repos_path, row.copyfrom_revnum) else {
        return Err(WcError::Corrupt("Incomplete copyfrom information".into()));
    };
    let (root_url, uuid) = rows::repos_fetch(conn, id)?;
    Ok(CopyOrigin { repos_relpath: path.clone(), root_url, uuid, revision: rev })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::{BaseNode, Depth};

    #[test]
    fn test_scan_base_repos_inherits() {
        let (_tmp, db, root) = checkout();
        db.base_add_directory(&root.join("B"), &BaseNode::new("trunk/B", ROOT_URL, UUID, 1), &["c".into()], Depth::Infinity, &[])
            .unwrap();
        let (rp, url, uuid) = db.scan_base_repos(&root.join("B/c")).unwrap();
        assert_eq!(rp, "trunk/B/c");
        assert_eq!(url, ROOT_URL);
        assert_eq!(uuid, UUID);

        assert!(matches!(db.scan_base_repos(&root.join("nope")), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_scan_addition_plain_add() {
        let (_tmp, db, root) = checkout();
        db.op_add_directory(&root.join("A/new"), &[]).unwrap();
        db.op_add_file(&root.join("A/new/file"), &[]).unwrap();

        let info = db.scan_addition(&root.join("A/new/file")).unwrap();
        assert_eq!(info.status, Status::Added);
        assert_eq!(info.op_root_abspath, root.join("A/new"));
        assert_eq!(info.repos_relpath, "trunk/A/new/file");
        assert_eq!(info.original, None);
    }

    #[test]
    fn test_scan_addition_requires_added_node() {
        let (_tmp, db, root) = checkout();
        assert!(matches!(db.scan_addition(&root.join("iota")), Err(WcError::NotFound(_))));
        db.temp_op_delete(&root.join("iota")).unwrap();
        assert!(matches!(db.scan_addition(&root.join("iota")), Err(WcError::UnexpectedStatus(_))));
    }

    #[test]
    fn test_scan_addition_inside_copy() {
        let (_tmp, db, root) = checkout();
        db.op_copy(&root.join("A"), &root.join("A2"), &[]).unwrap();

        let info = db.scan_addition(&root.join("A2/f")).unwrap();
        assert_eq!(info.status, Status::Copied);
        assert_eq!(info.op_root_abspath, root.join("A2"));
        assert_eq!(info.repos_relpath, "trunk/A2/f");
        let origin = info.original.unwrap();
        assert_eq!(origin.repos_relpath, "trunk/A");
        assert_eq!(origin.revision, 1);
    }

    #[test]
    fn test_scan_deletion_of_base_node() {
        let (_tmp, db, root) = checkout();
        db.temp_op_delete(&root.join("A")).unwrap();
        db.temp_op_delete(&root.join("A/f")).unwrap();

        let info = db.scan_deletion(&root.join("A/f")).unwrap();
        assert_eq!(info.base_del_abspath, Some(root.join("A")));
        assert!(!info.base_replaced);
        assert_eq!(info.moved_to_abspath, None);
        assert_eq!(info.work_del_abspath, None);

        assert!(matches!(db.scan_deletion(&root.join("iota")), Err(WcError::NotFound(_))));
    }

    #[test]
    fn test_scan_deletion_inside_copy() {
        let (_tmp, db, root) = checkout();
        db.op_copy(&root.join("A"), &root.join("A2"), &[]).unwrap();
        db.temp_op_delete(&root.join("A2/f")).unwrap();

        let info = db.scan_deletion(&root.join("A2/f")).unwrap();
        assert_eq!(info.work_del_abspath, Some(root.join("A2/f")));
        assert_eq!(info.base_del_abspath, None);
    }

    #[test]
    fn test_scan_deletion_moved_to() {
        let (_tmp, db, root) = checkout();
        db.temp_op_delete(&root.join("A")).unwrap();
        db.temp_op_delete(&root.join("A/f")).unwrap();
        let (seg, _) = db.parse(&root).unwrap();
        seg.conn()
            .execute("UPDATE working_node SET moved_to = 'moved' WHERE local_relpath = 'A'", [])
            .unwrap();

        let info = db.scan_deletion(&root.join("A/f")).unwrap();
        assert_eq!(info.moved_to_abspath, Some(root.join("moved")));
        assert_eq!(info.base_del_abspath, Some(root.join("A")));
    }

    #[test]
    fn test_scan_deletion_replaced() {
        let (_tmp, db, root) = checkout();
        db.temp_op_delete(&root.join("A")).unwrap();
        db.op_add_directory(&root.join("A"), &[]).unwrap();
        db.op_add_file(&root.join("A/g"), &[]).unwrap();
        db.temp_op_delete(&root.join("A/f")).unwrap();

        let info = db.scan_deletion(&root.join("A/f")).unwrap();
        assert!(info.base_replaced);
        assert_eq!(info.base_del_abspath, Some(root.join("A")));
    }
}
