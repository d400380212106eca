//! Closed vocabularies and record types of the metadata store
//!
//! Every enumeration that is persisted as a string token carries an explicit
//! two-way table; decoding only happens at the database boundary.

use crate::error::{Result, WcError};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::PathBuf;

/// Revision number
pub type Revnum = i64;

/// Enumerations stored as string tokens
pub trait Token: Sized + Copy + PartialEq + 'static {
    const TABLE: &'static [(Self, &'static str)];
    const WHAT: &'static str;

    fn token(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(v, _)| *v == self)
            .map(|(_, t)| *t)
            .unwrap_or("unknown")
    }

    fn from_token(s: &str) -> Result<Self> {
        Self::TABLE
            .iter()
            .find(|(_, t)| *t == s)
            .map(|(v, _)| *v)
            .ok_or_else(|| WcError::Corrupt(format!("Unknown {} token '{}'", Self::WHAT, s)))
    }
}

/// Node kind as recorded in a layer row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    File,
    Dir,
    Symlink,
    /// Parent-side record of a directory whose data lives in its own segment
    Subdir,
    Unknown,
}

impl Token for Kind {
    const TABLE: &'static [(Self, &'static str)] = &[
        (Kind::File, "file"),
        (Kind::Dir, "dir"),
        (Kind::Symlink, "symlink"),
        (Kind::Subdir, "subdir"),
        (Kind::Unknown, "unknown"),
    ];
    const WHAT: &'static str = "kind";
}

/// Presence stored in BASE and WORKING rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Presence {
    Normal,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
    BaseDeleted,
}

impl Token for Presence {
    const TABLE: &'static [(Self, &'static str)] = &[
        (Presence::Normal, "normal"),
        (Presence::Absent, "absent"),
        (Presence::Excluded, "excluded"),
        (Presence::NotPresent, "not-present"),
        (Presence::Incomplete, "incomplete"),
        (Presence::BaseDeleted, "base-deleted"),
    ];
    const WHAT: &'static str = "presence";
}

impl Presence {
    /// A BASE row that stands for something that exists in the repository
    pub fn is_present(self) -> bool {
        matches!(self, Presence::Normal | Presence::Incomplete)
    }
}

/// Derived node status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Normal,
    Added,
    MovedHere,
    Copied,
    Deleted,
    Obstructed,
    ObstructedAdd,
    ObstructedDelete,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
}

impl Status {
    /// Absent, excluded and not-present nodes are invisible to most callers
    pub fn is_hidden(self) -> bool {
        matches!(self, Status::Absent | Status::Excluded | Status::NotPresent)
    }
}

/// Depth of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Depth {
    Unknown,
    Exclude,
    Empty,
    Files,
    Immediates,
    Infinity,
}

impl Token for Depth {
    const TABLE: &'static [(Self, &'static str)] = &[
        (Depth::Unknown, "unknown"),
        (Depth::Exclude, "exclude"),
        (Depth::Empty, "empty"),
        (Depth::Files, "files"),
        (Depth::Immediates, "immediates"),
        (Depth::Infinity, "infinity"),
    ];
    const WHAT: &'static str = "depth";
}

/// Content checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Checksum {
    Sha1([u8; 20]),
    Md5([u8; 16]),
}

impl Checksum {
    pub fn sha1_of(data: &[u8]) -> Self {
        Checksum::Sha1(Sha1::digest(data).into())
    }

    pub fn md5_of(data: &[u8]) -> Self {
        Checksum::Md5(md5::compute(data).0)
    }

    pub fn is_sha1(&self) -> bool {
        matches!(self, Checksum::Sha1(_))
    }

    pub fn hex(&self) -> String {
        match self {
            Checksum::Sha1(d) => hex::encode(d),
            Checksum::Md5(d) => hex::encode(d),
        }
    }

    /// Database form: `$sha1$<hex>` or `$md5 $<hex>`
    pub fn to_db(&self) -> String {
        match self {
            Checksum::Sha1(d) => format!("$sha1${}", hex::encode(d)),
            Checksum::Md5(d) => format!("$md5 ${}", hex::encode(d)),
        }
    }

    pub fn from_db(s: &str) -> Result<Self> {
        let bad = || WcError::Corrupt(format!("Invalid checksum '{}'", s));
        if let Some(h) = s.strip_prefix("$sha1$") {
            let bytes = hex::decode(h).map_err(|_| bad())?;
            let arr: [u8; 20] = bytes.try_into().map_err(|_| bad())?;
            Ok(Checksum::Sha1(arr))
        } else if let Some(h) = s.strip_prefix("$md5 $") {
            let bytes = hex::decode(h).map_err(|_| bad())?;
            let arr: [u8; 16] = bytes.try_into().map_err(|_| bad())?;
            Ok(Checksum::Md5(arr))
        } else {
            Err(bad())
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_db())
    }
}

/// Last-change information carried by BASE and WORKING rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedInfo {
    pub rev: Option<Revnum>,
    /// Microseconds since the Unix epoch
    pub date: Option<i64>,
    pub author: Option<String>,
}

/// Repository lock on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub token: String,
    pub owner: Option<String>,
    pub comment: Option<String>,
    pub date: Option<i64>,
}

/// Repository location of a node that is being added from the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseNode {
    pub repos_relpath: String,
    pub repos_root_url: String,
    pub repos_uuid: String,
    pub revision: Revnum,
    pub props: crate::properties::PropertySet,
    pub changed: ChangedInfo,
    /// Conflict recorded together with the node
    pub conflict: Option<Conflict>,
}

impl BaseNode {
    pub fn new(repos_relpath: &str, repos_root_url: &str, repos_uuid: &str, revision: Revnum) -> Self {
        Self {
            repos_relpath: repos_relpath.to_string(),
            repos_root_url: repos_root_url.to_string(),
            repos_uuid: repos_uuid.to_string(),
            revision,
            props: crate::properties::PropertySet::new(),
            changed: ChangedInfo { rev: Some(revision), date: None, author: None },
            conflict: None,
        }
    }
}

/// Copy source recorded on a WORKING row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOrigin {
    pub repos_relpath: String,
    pub root_url: String,
    pub uuid: String,
    pub revision: Revnum,
}

/// Result of the unified status read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub status: Status,
    pub kind: Kind,
    pub revision: Option<Revnum>,
    pub repos_relpath: Option<String>,
    pub repos_root_url: Option<String>,
    pub repos_uuid: Option<String>,
    pub changed: ChangedInfo,
    pub last_mod_time: Option<i64>,
    pub depth: Option<Depth>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub target: Option<String>,
    pub changelist: Option<String>,
    pub original: Option<CopyOrigin>,
    pub props_mod: bool,
    pub base_shadowed: bool,
    pub conflicted: bool,
    pub lock: Option<Lock>,
}

/// BASE layer read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseInfo {
    pub status: Status,
    pub kind: Kind,
    pub revision: Option<Revnum>,
    pub repos_relpath: Option<String>,
    pub repos_root_url: Option<String>,
    pub repos_uuid: Option<String>,
    pub changed: ChangedInfo,
    pub last_mod_time: Option<i64>,
    pub depth: Option<Depth>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub target: Option<String>,
    pub lock: Option<Lock>,
}

/// Result of walking up from an added node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionInfo {
    /// One of `Added`, `Copied` or `MovedHere`
    pub status: Status,
    pub op_root_abspath: PathBuf,
    pub repos_relpath: String,
    pub repos_root_url: String,
    pub repos_uuid: String,
    pub original: Option<CopyOrigin>,
}

/// Result of walking up from a deleted node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionInfo {
    pub base_del_abspath: Option<PathBuf>,
    pub base_replaced: bool,
    pub moved_to_abspath: Option<PathBuf>,
    pub work_del_abspath: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOperation {
    None,
    Update,
    Switch,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictAction {
    Edit,
    Add,
    Delete,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    Edited,
    Obstructed,
    Deleted,
    Missing,
    Unversioned,
    Added,
    Replaced,
}

/// Tree conflict recorded for a name inside a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConflict {
    pub node_kind: Kind,
    pub operation: ConflictOperation,
    pub action: ConflictAction,
    pub reason: ConflictReason,
}

/// One conflict attached to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Text {
        old: Option<String>,
        new: Option<String>,
        working: Option<String>,
    },
    Property {
        reject_file: String,
    },
    Tree(TreeConflict),
}
