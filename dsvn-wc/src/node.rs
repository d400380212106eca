//! Node-level questions and edits built on [`WcDb`]
//!
//! These combine store rows with what is on disk, the way a client sees a
//! working copy: status letters, URLs, local text modifications, and
//! scheduling adds and deletes.

use crate::error::{Result, WcError};
use crate::properties::svn_props;
use crate::schema::ADM_DIR;
use crate::translate::{self, EolStyle};
use crate::types::{ChangedInfo, Checksum, Kind, Status};
use crate::wc_db::WcDb;
use crate::workqueue::{self, WorkItem};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Combined status of a path as a client would report it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Not versioned and not on disk
    None,
    Unversioned,
    Ignored,
    Normal,
    Modified,
    Added,
    Deleted,
    Replaced,
    /// Versioned but missing from disk
    Missing,
    /// Something of the wrong kind is in the way
    Obstructed,
    Conflicted,
    Incomplete,
}

/// What is on disk at `path`, without following a final symlink
pub fn disk_kind(path: &Path) -> Result<Option<Kind>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(Some(Kind::Symlink)),
        Ok(meta) if meta.is_dir() => Ok(Some(Kind::Dir)),
        Ok(_) => Ok(Some(Kind::File)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WcError::io(path, e)),
    }
}

/// True when a parent's `svn:ignore` patterns match the name of `local_abspath`
pub fn is_ignored(db: &WcDb, local_abspath: &Path) -> Result<bool> {
    let (Some(parent), Some(name)) = (local_abspath.parent(), local_abspath.file_name()) else {
        return Ok(false);
    };
    let props = match db.read_props(parent) {
        Ok(p) => p,
        Err(WcError::NotFound(_)) | Err(WcError::NotWorkingCopy(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    let Some(patterns) = props.get_str(svn_props::IGNORE) else {
        return Ok(false);
    };
    let name = name.to_string_lossy();
    Ok(patterns
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| glob::Pattern::new(p).ok())
        .any(|p| p.matches(&name)))
}

pub fn node_status(db: &WcDb, local_abspath: &Path) -> Result<NodeStatus> {
    let on_disk = disk_kind(local_abspath)?;
    let info = match db.read_info(local_abspath) {
        Ok(info) => info,
        Err(WcError::NotFound(_)) | Err(WcError::NotWorkingCopy(_)) => {
            return Ok(match on_disk {
                None => NodeStatus::None,
                Some(_) if is_ignored(db, local_abspath)? => NodeStatus::Ignored,
                Some(_) => NodeStatus::Unversioned,
            });
        }
        Err(e) => return Err(e),
    };

    if info.status.is_hidden() {
        return Ok(match on_disk {
            None => NodeStatus::None,
            Some(_) if is_ignored(db, local_abspath)? => NodeStatus::Ignored,
            Some(_) => NodeStatus::Unversioned,
        });
    }
    match info.status {
        Status::Incomplete => return Ok(NodeStatus::Incomplete),
        Status::Obstructed | Status::ObstructedAdd | Status::ObstructedDelete => {
            return Ok(NodeStatus::Obstructed);
        }
        Status::Deleted => {
            return Ok(if info.conflicted { NodeStatus::Conflicted } else { NodeStatus::Deleted });
        }
        _ => {}
    }

    let Some(disk) = on_disk else {
        return Ok(NodeStatus::Missing);
    };
    // Symlinks may be checked out as plain files where links are unsupported
    let kind_matches = match info.kind {
        Kind::Dir => disk == Kind::Dir,
        _ => disk != Kind::Dir,
    };
    if !kind_matches {
        return Ok(NodeStatus::Obstructed);
    }
    if info.conflicted {
        return Ok(NodeStatus::Conflicted);
    }
    Ok(match info.status {
        Status::Added | Status::Copied | Status::MovedHere if info.base_shadowed => NodeStatus::Replaced,
        Status::Added | Status::Copied | Status::MovedHere => NodeStatus::Added,
        _ if info.props_mod => NodeStatus::Modified,
        _ if info.kind == Kind::File && text_modified(db, local_abspath)? => NodeStatus::Modified,
        _ => NodeStatus::Normal,
    })
}

/// True when the node is scheduled for deletion (and not re-added)
pub fn is_status_deleted(db: &WcDb, local_abspath: &Path) -> Result<bool> {
    Ok(db.read_info(local_abspath)?.status == Status::Deleted)
}

/// Kind recorded for a node; `None` when unversioned, or hidden unless
/// `show_hidden`
pub fn read_node_kind(db: &WcDb, local_abspath: &Path, show_hidden: bool) -> Result<Option<Kind>> {
    match db.read_info(local_abspath) {
        Ok(info) if info.status.is_hidden() && !show_hidden => Ok(None),
        Ok(info) => Ok(Some(info.kind)),
        Err(WcError::NotFound(_)) | Err(WcError::NotWorkingCopy(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Last-changed revision, date and author of a node
pub fn node_changed_info(db: &WcDb, local_abspath: &Path) -> Result<ChangedInfo> {
    Ok(db.read_info(local_abspath)?.changed)
}

/// Repository URL the node corresponds to, if it has one
pub fn node_url(db: &WcDb, local_abspath: &Path) -> Result<Option<String>> {
    let info = db.read_info(local_abspath)?;
    let (root, relpath) = match info.status {
        Status::Added | Status::Copied | Status::MovedHere | Status::Incomplete if info.repos_relpath.is_none() => {
            match db.scan_addition(local_abspath) {
                Ok(a) => (a.repos_root_url, a.repos_relpath),
                Err(WcError::UnexpectedStatus(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Status::Deleted => {
            let (relpath, root, _) = db.scan_base_repos(local_abspath)?;
            (root, relpath)
        }
        _ => match (info.repos_root_url, info.repos_relpath) {
            (Some(root), Some(relpath)) => (root, relpath),
            _ => {
                let (relpath, root, _) = db.scan_base_repos(local_abspath)?;
                (root, relpath)
            }
        },
    };
    Ok(Some(if relpath.is_empty() { root } else { format!("{}/{}", root, relpath) }))
}

pub(crate) fn mtime_micros(meta: &fs::Metadata) -> Option<i64> {
    let t = meta.modified().ok()?;
    let d = t.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(d.as_micros()).ok()
}

/// True when the working file differs from its pristine text once
/// translated back to repository normal form
pub fn text_modified(db: &WcDb, local_abspath: &Path) -> Result<bool> {
    let info = db.read_info(local_abspath)?;
    let meta = match fs::metadata(local_abspath) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(WcError::io(local_abspath, e)),
    };
    let Some(checksum) = info.checksum else {
        return Ok(true);
    };

    if let (Some(size), Some(mtime)) = (info.translated_size, info.last_mod_time) {
        if size == meta.len() as i64 && Some(mtime) == mtime_micros(&meta) {
            return Ok(false);
        }
    }

    let data = fs::read(local_abspath).map_err(|e| WcError::io(local_abspath, e))?;
    let props = db.read_props(local_abspath)?;
    let eol = EolStyle::from_props(&props);
    let url = if props.contains(svn_props::KEYWORDS) { node_url(db, local_abspath)? } else { None };
    let keywords =
        translate::keywords_for(&props, info.changed.rev, url.as_deref(), info.changed.date, info.changed.author.as_deref());
    let normal = translate::normalize_bytes(&data, &eol, &keywords).map_err(|e| WcError::io(local_abspath, e))?;
    let expected = match checksum {
        Checksum::Sha1(_) => checksum,
        Checksum::Md5(_) => db.pristine_get_sha1(local_abspath, &checksum)?,
    };
    Ok(Checksum::sha1_of(&normal) != expected)
}

/// Schedule whatever is on disk at `local_abspath` for addition. A locally
/// deleted node is replaced.
pub fn add(db: &WcDb, local_abspath: &Path) -> Result<()> {
    let parent = local_abspath
        .parent()
        .ok_or_else(|| WcError::InvalidArgument(format!("Cannot add '{}'", local_abspath.display())))?;
    match read_node_kind(db, parent, false)? {
        Some(Kind::Dir) if !is_status_deleted(db, parent)? => {}
        _ => {
            return Err(WcError::unexpected(format!(
                "Can't add '{}' as its parent is not a versioned directory",
                local_abspath.display()
            )));
        }
    }

    match db.read_info(local_abspath) {
        Ok(info) if info.status == Status::Deleted || info.status.is_hidden() => {}
        Ok(_) => return Err(WcError::AlreadyExists(local_abspath.to_path_buf())),
        Err(WcError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    match disk_kind(local_abspath)? {
        Some(Kind::Dir) => db.op_add_directory(local_abspath, &[])?,
        Some(Kind::Symlink) => {
            let target = fs::read_link(local_abspath).map_err(|e| WcError::io(local_abspath, e))?;
            db.op_add_symlink(local_abspath, &target.to_string_lossy(), &[])?
        }
        Some(_) => db.op_add_file(local_abspath, &[])?,
        None => return Err(WcError::io(local_abspath, io::Error::from(io::ErrorKind::NotFound))),
    }
    tracing::info!("Added {:?}", local_abspath);
    Ok(())
}

/// Schedule a node (and for directories, everything below it) for deletion.
/// Unless `keep_local`, the on-disk item is removed through the work queue.
pub fn delete(db: &WcDb, local_abspath: &Path, keep_local: bool) -> Result<()> {
    let info = db.read_info(local_abspath)?;
    if info.kind == Kind::Dir && !info.status.is_hidden() {
        for name in db.read_children(local_abspath)? {
            let child = local_abspath.join(&name);
            match db.read_info(&child) {
                Ok(ci) if ci.status.is_hidden() || ci.status == Status::Deleted => continue,
                Ok(_) => delete(db, &child, true)?,
                Err(WcError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }
    db.temp_op_delete(local_abspath)?;

    if !keep_local {
        let item = match disk_kind(local_abspath)? {
            Some(Kind::Dir) => Some(WorkItem::DirRemove { local_abspath: local_abspath.to_path_buf(), recursive: true }),
            Some(_) => Some(WorkItem::FileRemove { local_abspath: local_abspath.to_path_buf() }),
            None => None,
        };
        if let Some(item) = item {
            let wri = local_abspath.parent().unwrap_or(local_abspath);
            db.wq_add(wri, &[item])?;
            workqueue::run(db, wri, None)?;
        }
    }
    tracing::info!("Deleted {:?}", local_abspath);
    Ok(())
}

/// Status of `local_dir_abspath` and its immediate children, versioned or
/// not, in name order
pub fn walk_status(db: &WcDb, local_dir_abspath: &Path) -> Result<Vec<(PathBuf, NodeStatus)>> {
    let mut names: Vec<String> = match db.read_children(local_dir_abspath) {
        Ok(names) => names,
        Err(WcError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e),
    };
    match fs::read_dir(local_dir_abspath) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry.map_err(|e| WcError::io(local_dir_abspath, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name != ADM_DIR && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(WcError::io(local_dir_abspath, e)),
    }
    names.sort();

    let mut out = vec![(local_dir_abspath.to_path_buf(), node_status(db, local_dir_abspath)?)];
    for name in names {
        let child = local_dir_abspath.join(&name);
        let status = node_status(db, &child)?;
        out.push((child, status));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertySet;
    use crate::wc_db::test_support::*;

    #[test]
    fn test_status_of_checkout() {
        let (_tmp, db, root) = checkout();
        assert_eq!(node_status(&db, &root.join("iota")).unwrap(), NodeStatus::Normal);
        assert_eq!(node_status(&db, &root.join("nothing")).unwrap(), NodeStatus::None);

        fs::write(root.join("stray"), b"x").unwrap();
        assert_eq!(node_status(&db, &root.join("stray")).unwrap(), NodeStatus::Unversioned);
    }

    #[test]
    fn test_modified_missing_obstructed() {
        let (_tmp, db, root) = checkout();
        fs::write(root.join("iota"), b"changed\n").unwrap();
        assert!(text_modified(&db, &root.join("iota")).unwrap());
        assert_eq!(node_status(&db, &root.join("iota")).unwrap(), NodeStatus::Modified);

        fs::remove_file(root.join("A/f")).unwrap();
        assert_eq!(node_status(&db, &root.join("A/f")).unwrap(), NodeStatus::Missing);

        fs::create_dir(root.join("A/f")).unwrap();
        assert_eq!(node_status(&db, &root.join("A/f")).unwrap(), NodeStatus::Obstructed);
    }

    #[test]
    fn test_ignored_by_parent_property() {
        let (_tmp, db, root) = checkout();
        db.op_set_props(&root, Some(&PropertySet::new().with(svn_props::IGNORE, "*.o\nbuild\n")), None, &[]).unwrap();
        fs::write(root.join("main.o"), b"").unwrap();
        fs::write(root.join("main.c"), b"").unwrap();
        assert_eq!(node_status(&db, &root.join("main.o")).unwrap(), NodeStatus::Ignored);
        assert_eq!(node_status(&db, &root.join("main.c")).unwrap(), NodeStatus::Unversioned);
    }

    #[test]
    fn test_eol_style_is_not_a_modification() {
        let (_tmp, db, root) = checkout();
        let iota = root.join("iota");
        db.op_set_props(&iota, Some(&PropertySet::new().with(svn_props::EOL_STYLE, "CRLF")), None, &[]).unwrap();
        fs::write(&iota, b"This is iota\r\n").unwrap();
        assert!(!text_modified(&db, &iota).unwrap());
    }

    #[test]
    fn test_add_and_replace() {
        let (_tmp, db, root) = checkout();
        fs::write(root.join("new"), b"n").unwrap();
        add(&db, &root.join("new")).unwrap();
        assert_eq!(node_status(&db, &root.join("new")).unwrap(), NodeStatus::Added);
        assert!(matches!(add(&db, &root.join("new")), Err(WcError::AlreadyExists(_))));

        delete(&db, &root.join("iota"), true).unwrap();
        assert!(is_status_deleted(&db, &root.join("iota")).unwrap());
        add(&db, &root.join("iota")).unwrap();
        assert_eq!(node_status(&db, &root.join("iota")).unwrap(), NodeStatus::Replaced);

        fs::create_dir_all(root.join("x/y")).unwrap();
        assert!(add(&db, &root.join("x/y")).is_err());
    }

    #[test]
    fn test_delete_directory_recursively() {
        let (_tmp, db, root) = checkout();
        delete(&db, &root.join("A"), false).unwrap();
        assert!(!root.join("A").exists());
        assert!(is_status_deleted(&db, &root.join("A")).unwrap());
        assert!(is_status_deleted(&db, &root.join("A/f")).unwrap());
        assert!(db.wq_fetch(&root).unwrap().is_none());
    }

    #[test]
    fn test_delete_added_directory_forgets_subtree() {
        let (_tmp, db, root) = checkout();
        fs::create_dir(root.join("N")).unwrap();
        fs::write(root.join("N/file"), b"").unwrap();
        add(&db, &root.join("N")).unwrap();
        add(&db, &root.join("N/file")).unwrap();

        delete(&db, &root.join("N"), true).unwrap();
        assert_eq!(read_node_kind(&db, &root.join("N"), true).unwrap(), None);
        assert_eq!(read_node_kind(&db, &root.join("N/file"), true).unwrap(), None);
        assert!(root.join("N/file").exists());
    }

    #[test]
    fn test_urls() {
        let (_tmp, db, root) = checkout();
        assert_eq!(node_url(&db, &root).unwrap().as_deref(), Some("http://svn.example.com/repos/trunk"));
        assert_eq!(node_url(&db, &root.join("A/f")).unwrap().as_deref(), Some("http://svn.example.com/repos/trunk/A/f"));

        db.op_add_file(&root.join("A/g"), &[]).unwrap();
        assert_eq!(node_url(&db, &root.join("A/g")).unwrap().as_deref(), Some("http://svn.example.com/repos/trunk/A/g"));
        db.temp_op_delete(&root.join("iota")).unwrap();
        assert_eq!(node_url(&db, &root.join("iota")).unwrap().as_deref(), Some("http://svn.example.com/repos/trunk/iota"));
    }

    #[test]
    fn test_walk_status_lists_unversioned() {
        let (_tmp, db, root) = checkout();
        fs::write(root.join("A/extra"), b"").unwrap();
        let statuses = walk_status(&db, &root.join("A")).unwrap();
        let names: Vec<_> = statuses.iter().map(|(p, s)| (p.file_name().unwrap().to_owned(), *s)).collect();
        assert_eq!(names.len(), 3);
        assert_eq!(names[0].1, NodeStatus::Normal);
        assert_eq!(names[1], ("extra".into(), NodeStatus::Unversioned));
        assert_eq!(names[2], ("f".into(), NodeStatus::Normal));
    }

    #[test]
    fn test_read_node_kind_hides_hidden_nodes() {
        let (_tmp, db, root) = checkout();
        assert_eq!(read_node_kind(&db, &root.join("A"), false).unwrap(), Some(Kind::Dir));
        assert_eq!(read_node_kind(&db, &root.join("nothing"), false).unwrap(), None);
        assert_eq!(node_changed_info(&db, &root.join("iota")).unwrap().rev, Some(1));
    }
}
