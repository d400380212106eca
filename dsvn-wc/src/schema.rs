//! On-disk layout of a store segment
//!
//! Each segment keeps its administrative area in `.svn/` below the segment
//! root: the SQLite database `wc.db`, the pristine blobs and a temp area on
//! the same filesystem for atomic installs.

use crate::error::{Result, WcError};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub const ADM_DIR: &str = ".svn";
pub const DB_FILE: &str = "wc.db";
pub const PRISTINE_DIR: &str = "pristine";
pub const TMP_DIR: &str = "tmp";
pub const CONFIG_FILE: &str = "config.json";

/// Stamped into `PRAGMA user_version`
pub const FORMAT: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS repository (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root TEXT UNIQUE NOT NULL,
    uuid TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS base_node (
    local_relpath TEXT PRIMARY KEY,
    parent_relpath TEXT,
    repos_id INTEGER REFERENCES repository (id),
    repos_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    revnum INTEGER,
    checksum TEXT,
    translated_size INTEGER,
    changed_rev INTEGER,
    changed_date INTEGER,
    changed_author TEXT,
    depth TEXT,
    symlink_target TEXT,
    last_mod_time INTEGER,
    properties BLOB
);
CREATE INDEX IF NOT EXISTS i_base_parent ON base_node (parent_relpath);

CREATE TABLE IF NOT EXISTS working_node (
    local_relpath TEXT PRIMARY KEY,
    parent_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    checksum TEXT,
    translated_size INTEGER,
    changed_rev INTEGER,
    changed_date INTEGER,
    changed_author TEXT,
    depth TEXT,
    symlink_target TEXT,
    last_mod_time INTEGER,
    properties BLOB,
    copyfrom_repos_id INTEGER REFERENCES repository (id),
    copyfrom_repos_path TEXT,
    copyfrom_revnum INTEGER,
    moved_here INTEGER,
    moved_to TEXT
);
CREATE INDEX IF NOT EXISTS i_working_parent ON working_node (parent_relpath);

CREATE TABLE IF NOT EXISTS actual_node (
    local_relpath TEXT PRIMARY KEY,
    parent_relpath TEXT,
    properties BLOB,
    conflict_old TEXT,
    conflict_new TEXT,
    conflict_working TEXT,
    prop_reject TEXT,
    changelist TEXT,
    tree_conflict_data TEXT
);
CREATE INDEX IF NOT EXISTS i_actual_parent ON actual_node (parent_relpath);

CREATE TABLE IF NOT EXISTS pristine (
    checksum TEXT PRIMARY KEY,
    md5_checksum TEXT,
    size INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS i_pristine_md5 ON pristine (md5_checksum);

CREATE TABLE IF NOT EXISTS lock (
    repos_id INTEGER NOT NULL REFERENCES repository (id),
    repos_relpath TEXT NOT NULL,
    lock_token TEXT NOT NULL,
    lock_owner TEXT,
    lock_comment TEXT,
    lock_date INTEGER,
    PRIMARY KEY (repos_id, repos_relpath)
);

CREATE TABLE IF NOT EXISTS work_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wc_lock (
    local_dir_relpath TEXT PRIMARY KEY,
    locked_levels INTEGER NOT NULL DEFAULT -1
);
";

pub fn adm_dir(segment_root: &Path) -> PathBuf {
    segment_root.join(ADM_DIR)
}

pub fn db_path(segment_root: &Path) -> PathBuf {
    adm_dir(segment_root).join(DB_FILE)
}

/// True when `dir` is the root of a store segment
pub fn has_store(dir: &Path) -> bool {
    db_path(dir).is_file()
}

/// Open the database of an existing segment
pub fn open_segment_db(segment_root: &Path) -> Result<Connection> {
    let path = db_path(segment_root);
    let conn = Connection::open(&path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(10))?;
    let format: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if format != FORMAT {
        return Err(WcError::Corrupt(format!(
            "Working copy format {} of '{}' is not supported",
            format,
            segment_root.display()
        )));
    }
    Ok(conn)
}

/// Create the administrative area and an empty schema
pub fn create_segment_db(segment_root: &Path) -> Result<Connection> {
    let adm = adm_dir(segment_root);
    for dir in [adm.clone(), adm.join(PRISTINE_DIR), adm.join(TMP_DIR)] {
        std::fs::create_dir_all(&dir).map_err(|e| WcError::io(&dir, e))?;
    }
    let conn = Connection::open(db_path(segment_root))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", FORMAT)?;
    Ok(conn)
}

/// Run `f` inside one transaction; any error rolls everything back
pub fn in_txn<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(v) => {
            conn.execute_batch("COMMIT")?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rb) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("Rollback failed: {}", rb);
            }
            Err(e)
        }
    }
}
