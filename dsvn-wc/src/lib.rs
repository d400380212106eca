//! DSvn Working Copy Library
//!
//! Working-copy administration for DSvn including:
//! - Metadata store with BASE, WORKING and ACTUAL layers (SQLite, one
//!   database per segment)
//! - Content-addressed pristine text store
//! - Persistent work queue for deferred filesystem changes
//! - Recursive working-copy write locks
//! - EOL and keyword translation between repository and working form
//! - Node status, add and delete on top of the store

pub mod cancel;
pub mod config;
pub mod error;
pub mod node;
pub mod paths;
pub mod pristine;
pub mod properties;
pub mod schema;
pub mod translate;
pub mod types;
pub mod wc_db;
pub mod workqueue;

pub use cancel::{Cancel, CancelFlag};
pub use config::WcConfig;
pub use error::{ErrorKind, Result, WcError};
pub use node::NodeStatus;
pub use properties::{PropertySet, svn_props};
pub use types::{
    AdditionInfo, BaseInfo, BaseNode, Checksum, ChangedInfo, Conflict, CopyOrigin, DeletionInfo, Depth, Kind,
    Lock, NodeInfo, Presence, Revnum, Status, TreeConflict,
};
pub use wc_db::{WcDb, WriteLock};
pub use workqueue::WorkItem;
