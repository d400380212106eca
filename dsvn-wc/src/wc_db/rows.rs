//! Row-level access to one segment database
//!
//! Free functions over `&Connection`; callers hold the segment lock and
//! decide the transaction boundaries.

use crate::error::{Result, WcError};
use crate::paths::{relpath_basename, relpath_dirname};
use crate::properties::PropertySet;
use crate::types::{ChangedInfo, Checksum, Conflict, Depth, Kind, Lock, Presence, Revnum, Token, TreeConflict};
use crate::workqueue::WorkItem;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

fn token_column<T: Token>(value: ValueRef<'_>) -> FromSqlResult<T> {
    let s = value.as_str()?;
    T::from_token(s).map_err(|e| FromSqlError::Other(Box::new(e)))
}

impl FromSql for Kind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        token_column(value)
    }
}

impl ToSql for Kind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.token()))
    }
}

impl FromSql for Presence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        token_column(value)
    }
}

impl ToSql for Presence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.token()))
    }
}

impl FromSql for Depth {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        token_column(value)
    }
}

impl ToSql for Depth {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.token()))
    }
}

impl FromSql for Checksum {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Checksum::from_db(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Checksum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Text(self.to_db())))
    }
}

impl FromSql for PropertySet {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        PropertySet::from_blob(value.as_blob()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for PropertySet {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let blob = self
            .to_blob()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::Owned(Value::Blob(blob)))
    }
}

fn parent_of(relpath: &str) -> Option<&str> {
    if relpath.is_empty() { None } else { Some(relpath_dirname(relpath)) }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BaseRow {
    pub presence: Presence,
    pub kind: Kind,
    pub repos_id: Option<i64>,
    pub repos_relpath: Option<String>,
    pub revnum: Option<Revnum>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub changed: ChangedInfo,
    pub depth: Option<Depth>,
    pub target: Option<String>,
    pub last_mod_time: Option<i64>,
    pub props: Option<PropertySet>,
}

impl BaseRow {
    pub fn new(presence: Presence, kind: Kind) -> Self {
        Self {
            presence,
            kind,
            repos_id: None,
            repos_relpath: None,
            revnum: None,
            checksum: None,
            translated_size: None,
            changed: ChangedInfo::default(),
            depth: None,
            target: None,
            last_mod_time: None,
            props: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WorkingRow {
    pub presence: Presence,
    pub kind: Kind,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub changed: ChangedInfo,
    pub depth: Option<Depth>,
    pub target: Option<String>,
    pub last_mod_time: Option<i64>,
    pub props: Option<PropertySet>,
    pub copyfrom_repos_id: Option<i64>,
    pub copyfrom_repos_path: Option<String>,
    pub copyfrom_revnum: Option<Revnum>,
    pub moved_here: bool,
    pub moved_to: Option<String>,
}

impl WorkingRow {
    pub fn new(presence: Presence, kind: Kind) -> Self {
        Self {
            presence,
            kind,
            checksum: None,
            translated_size: None,
            changed: ChangedInfo::default(),
            depth: None,
            target: None,
            last_mod_time: None,
            props: None,
            copyfrom_repos_id: None,
            copyfrom_repos_path: None,
            copyfrom_revnum: None,
            moved_here: false,
            moved_to: None,
        }
    }

    pub fn has_copyfrom(&self) -> bool {
        self.copyfrom_repos_path.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ActualRow {
    pub props: Option<PropertySet>,
    pub conflict_old: Option<String>,
    pub conflict_new: Option<String>,
    pub conflict_working: Option<String>,
    pub prop_reject: Option<String>,
    pub changelist: Option<String>,
    pub tree_conflict_data: Option<String>,
}

impl ActualRow {
    pub fn is_empty(&self) -> bool {
        self.props.is_none()
            && !self.has_conflict_markers()
            && self.changelist.is_none()
            && self.tree_conflict_data.is_none()
    }

    pub fn has_text_conflict(&self) -> bool {
        self.conflict_old.is_some() || self.conflict_new.is_some() || self.conflict_working.is_some()
    }

    pub fn has_conflict_markers(&self) -> bool {
        self.has_text_conflict() || self.prop_reject.is_some()
    }

    pub fn tree_conflicts(&self) -> Result<BTreeMap<String, TreeConflict>> {
        match &self.tree_conflict_data {
            Some(data) => Ok(serde_json::from_str(data)?),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn set_tree_conflicts(&mut self, map: &BTreeMap<String, TreeConflict>) -> Result<()> {
        self.tree_conflict_data = if map.is_empty() { None } else { Some(serde_json::to_string(map)?) };
        Ok(())
    }
}

const BASE_COLUMNS: &str = "presence, kind, repos_id, repos_relpath, revnum, checksum, translated_size, \
     changed_rev, changed_date, changed_author, depth, symlink_target, last_mod_time, properties";

const WORKING_COLUMNS: &str = "presence, kind, checksum, translated_size, changed_rev, changed_date, \
     changed_author, depth, symlink_target, last_mod_time, properties, copyfrom_repos_id, \
     copyfrom_repos_path, copyfrom_revnum, moved_here, moved_to";

fn base_from_row(r: &Row<'_>) -> rusqlite::Result<BaseRow> {
    Ok(BaseRow {
        presence: r.get(0)?,
        kind: r.get(1)?,
        repos_id: r.get(2)?,
        repos_relpath: r.get(3)?,
        revnum: r.get(4)?,
        checksum: r.get(5)?,
        translated_size: r.get(6)?,
        changed: ChangedInfo { rev: r.get(7)?, date: r.get(8)?, author: r.get(9)? },
        depth: r.get(10)?,
        target: r.get(11)?,
        last_mod_time: r.get(12)?,
        props: r.get(13)?,
    })
}

fn working_from_row(r: &Row<'_>) -> rusqlite::Result<WorkingRow> {
    Ok(WorkingRow {
        presence: r.get(0)?,
        kind: r.get(1)?,
        checksum: r.get(2)?,
        translated_size: r.get(3)?,
        changed: ChangedInfo { rev: r.get(4)?, date: r.get(5)?, author: r.get(6)? },
        depth: r.get(7)?,
        target: r.get(8)?,
        last_mod_time: r.get(9)?,
        props: r.get(10)?,
        copyfrom_repos_id: r.get(11)?,
        copyfrom_repos_path: r.get(12)?,
        copyfrom_revnum: r.get(13)?,
        moved_here: r.get::<_, Option<i64>>(14)?.unwrap_or(0) != 0,
        moved_to: r.get(15)?,
    })
}

pub(crate) fn select_base(conn: &Connection, relpath: &str) -> Result<Option<BaseRow>> {
    let sql = format!("SELECT {} FROM base_node WHERE local_relpath = ?1", BASE_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.query_row([relpath], base_from_row).optional()?)
}

pub(crate) fn select_working(conn: &Connection, relpath: &str) -> Result<Option<WorkingRow>> {
    let sql = format!("SELECT {} FROM working_node WHERE local_relpath = ?1", WORKING_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.query_row([relpath], working_from_row).optional()?)
}

pub(crate) fn select_actual(conn: &Connection, relpath: &str) -> Result<Option<ActualRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT properties, conflict_old, conflict_new, conflict_working, prop_reject, changelist, \
         tree_conflict_data FROM actual_node WHERE local_relpath = ?1",
    )?;
    let row = stmt
        .query_row([relpath], |r| {
            Ok(ActualRow {
                props: r.get(0)?,
                conflict_old: r.get(1)?,
                conflict_new: r.get(2)?,
                conflict_working: r.get(3)?,
                prop_reject: r.get(4)?,
                changelist: r.get(5)?,
                tree_conflict_data: r.get(6)?,
            })
        })
        .optional()?;
    Ok(row)
}

pub(crate) fn insert_base(conn: &Connection, relpath: &str, row: &BaseRow) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO base_node (local_relpath, parent_relpath, presence, kind, repos_id, \
         repos_relpath, revnum, checksum, translated_size, changed_rev, changed_date, changed_author, \
         depth, symlink_target, last_mod_time, properties) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?
    .execute(rusqlite::params![
        relpath,
        parent_of(relpath),
        row.presence,
        row.kind,
        row.repos_id,
        row.repos_relpath,
        row.revnum,
        row.checksum,
        row.translated_size,
        row.changed.rev,
        row.changed.date,
        row.changed.author,
        row.depth,
        row.target,
        row.last_mod_time,
        row.props,
    ])?;
    Ok(())
}

/// Placeholder for a child that a directory listing announced
pub(crate) fn insert_base_incomplete(conn: &Connection, relpath: &str, revnum: Revnum) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR IGNORE INTO base_node (local_relpath, parent_relpath, presence, kind, revnum) \
         VALUES (?1, ?2, 'incomplete', 'unknown', ?3)",
    )?
    .execute(rusqlite::params![relpath, parent_of(relpath), revnum])?;
    Ok(())
}

pub(crate) fn insert_working(conn: &Connection, relpath: &str, row: &WorkingRow) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO working_node (local_relpath, parent_relpath, presence, kind, checksum, \
         translated_size, changed_rev, changed_date, changed_author, depth, symlink_target, \
         last_mod_time, properties, copyfrom_repos_id, copyfrom_repos_path, copyfrom_revnum, \
         moved_here, moved_to) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
    )?
    .execute(rusqlite::params![
        relpath,
        parent_of(relpath),
        row.presence,
        row.kind,
        row.checksum,
        row.translated_size,
        row.changed.rev,
        row.changed.date,
        row.changed.author,
        row.depth,
        row.target,
        row.last_mod_time,
        row.props,
        row.copyfrom_repos_id,
        row.copyfrom_repos_path,
        row.copyfrom_revnum,
        if row.moved_here { Some(1i64) } else { None },
        row.moved_to,
    ])?;
    Ok(())
}

pub(crate) fn insert_working_incomplete(conn: &Connection, relpath: &str) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR IGNORE INTO working_node (local_relpath, parent_relpath, presence, kind) \
         VALUES (?1, ?2, 'incomplete', 'unknown')",
    )?
    .execute(rusqlite::params![relpath, parent_of(relpath)])?;
    Ok(())
}

/// Write an ACTUAL row, or drop it once every field is cleared
/// Record `conflict` on the node at `relpath`.
///
/// A tree conflict goes into the parent's map; for a segment root that map
/// lives in another segment and is left to the caller.
pub(crate) fn write_conflict(conn: &Connection, relpath: &str, conflict: &Conflict) -> Result<()> {
    if let Conflict::Tree(tc) = conflict {
        if relpath.is_empty() {
            return Ok(());
        }
        let parent = relpath_dirname(relpath);
        let mut actual = select_actual(conn, parent)?.unwrap_or_default();
        let mut map = actual.tree_conflicts()?;
        map.insert(relpath_basename(relpath).to_string(), tc.clone());
        actual.set_tree_conflicts(&map)?;
        return write_actual(conn, parent, &actual);
    }

    let mut actual = select_actual(conn, relpath)?.unwrap_or_default();
    match conflict {
        Conflict::Text { old, new, working } => {
            actual.conflict_old = old.clone();
            actual.conflict_new = new.clone();
            actual.conflict_working = working.clone();
        }
        Conflict::Property { reject_file } => actual.prop_reject = Some(reject_file.clone()),
        Conflict::Tree(_) => {}
    }
    write_actual(conn, relpath, &actual)
}

pub(crate) fn write_actual(conn: &Connection, relpath: &str, row: &ActualRow) -> Result<()> {
    if row.is_empty() {
        delete_actual(conn, relpath)?;
        return Ok(());
    }
    conn.prepare_cached(
        "INSERT OR REPLACE INTO actual_node (local_relpath, parent_relpath, properties, conflict_old, \
         conflict_new, conflict_working, prop_reject, changelist, tree_conflict_data) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?
    .execute(rusqlite::params![
        relpath,
        parent_of(relpath),
        row.props,
        row.conflict_old,
        row.conflict_new,
        row.conflict_working,
        row.prop_reject,
        row.changelist,
        row.tree_conflict_data,
    ])?;
    Ok(())
}

pub(crate) fn delete_base(conn: &Connection, relpath: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM base_node WHERE local_relpath = ?1", [relpath])?)
}

pub(crate) fn delete_working(conn: &Connection, relpath: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM working_node WHERE local_relpath = ?1", [relpath])?)
}

pub(crate) fn delete_actual(conn: &Connection, relpath: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM actual_node WHERE local_relpath = ?1", [relpath])?)
}

/// Drop WORKING and ACTUAL rows strictly below `relpath`
pub(crate) fn delete_working_descendants(conn: &Connection, relpath: &str) -> Result<()> {
    if relpath.is_empty() {
        conn.execute("DELETE FROM working_node WHERE local_relpath != ''", [])?;
        conn.execute("DELETE FROM actual_node WHERE local_relpath != ''", [])?;
        return Ok(());
    }
    let prefix = format!("{}/", relpath);
    conn.execute(
        "DELETE FROM working_node WHERE substr(local_relpath, 1, length(?1)) = ?1",
        [&prefix],
    )?;
    conn.execute(
        "DELETE FROM actual_node WHERE substr(local_relpath, 1, length(?1)) = ?1",
        [&prefix],
    )?;
    Ok(())
}

pub(crate) fn update_working_presence(conn: &Connection, relpath: &str, presence: Presence) -> Result<()> {
    conn.execute(
        "UPDATE working_node SET presence = ?2 WHERE local_relpath = ?1",
        rusqlite::params![relpath, presence],
    )?;
    Ok(())
}

fn child_names(conn: &Connection, sql: &str, relpath: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query([relpath])?;
    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        let child: String = row.get(0)?;
        names.push(relpath_basename(&child).to_string());
    }
    Ok(names)
}

pub(crate) fn base_children(conn: &Connection, relpath: &str) -> Result<Vec<String>> {
    child_names(
        conn,
        "SELECT local_relpath FROM base_node WHERE parent_relpath = ?1 ORDER BY local_relpath",
        relpath,
    )
}

pub(crate) fn working_children(conn: &Connection, relpath: &str) -> Result<Vec<String>> {
    child_names(
        conn,
        "SELECT local_relpath FROM working_node WHERE parent_relpath = ?1 ORDER BY local_relpath",
        relpath,
    )
}

pub(crate) fn actual_children(conn: &Connection, relpath: &str) -> Result<Vec<String>> {
    child_names(
        conn,
        "SELECT local_relpath FROM actual_node WHERE parent_relpath = ?1 ORDER BY local_relpath",
        relpath,
    )
}

/// Find or create the repository row
pub(crate) fn repos_ensure(conn: &Connection, root_url: &str, uuid: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .prepare_cached("SELECT id FROM repository WHERE root = ?1")?
        .query_row([root_url], |r| r.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO repository (root, uuid) VALUES (?1, ?2)",
        rusqlite::params![root_url, uuid],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn repos_fetch(conn: &Connection, id: i64) -> Result<(String, String)> {
    conn.prepare_cached("SELECT root, uuid FROM repository WHERE id = ?1")?
        .query_row([id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?
        .ok_or_else(|| WcError::Corrupt(format!("No repository with id {}", id)))
}

pub(crate) fn select_lock(conn: &Connection, repos_id: i64, repos_relpath: &str) -> Result<Option<Lock>> {
    let lock = conn
        .prepare_cached(
            "SELECT lock_token, lock_owner, lock_comment, lock_date FROM lock \
             WHERE repos_id = ?1 AND repos_relpath = ?2",
        )?
        .query_row(rusqlite::params![repos_id, repos_relpath], |r| {
            Ok(Lock { token: r.get(0)?, owner: r.get(1)?, comment: r.get(2)?, date: r.get(3)? })
        })
        .optional()?;
    Ok(lock)
}

/// True when the base or working layer holds a subdir stub at `relpath`
pub(crate) fn has_stub(conn: &Connection, relpath: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM base_node WHERE local_relpath = ?1 AND kind = 'subdir') + \
                (SELECT COUNT(*) FROM working_node WHERE local_relpath = ?1 AND kind = 'subdir')",
        [relpath],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub(crate) fn wq_insert(conn: &Connection, items: &[WorkItem]) -> Result<()> {
    for item in items {
        conn.prepare_cached("INSERT INTO work_queue (work) VALUES (?1)")?
            .execute([item.encode()?])?;
    }
    Ok(())
}
