//! SVN property maps
//!
//! Properties are immutable-value maps from name to byte string. They are
//! stored in the metadata store as a bincode blob.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property value
pub type PropertyValue = Vec<u8>;

/// Properties of a single node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    /// Create a new empty property set
    pub fn new() -> Self {
        Self { properties: BTreeMap::new() }
    }

    /// Get a property value
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.properties.get(name).map(|v| v.as_slice())
    }

    /// Get a property value as UTF-8 text
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Set a property value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Builder form of [`PropertySet::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Remove a property
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// List all property names
    pub fn list(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    /// Check if property exists
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(blob)?)
    }
}

/// SVN standard properties
pub mod svn_props {
    /// Executable flag
    pub const EXECUTABLE: &str = "svn:executable";

    /// MIME type
    pub const MIME_TYPE: &str = "svn:mime-type";

    /// Ignore patterns
    pub const IGNORE: &str = "svn:ignore";

    /// End-of-line style
    pub const EOL_STYLE: &str = "svn:eol-style";

    /// Keywords
    pub const KEYWORDS: &str = "svn:keywords";

    /// Needs lock
    pub const NEEDS_LOCK: &str = "svn:needs-lock";

    /// Special file (symlink)
    pub const SPECIAL: &str = "svn:special";

    /// Externals
    pub const EXTERNALS: &str = "svn:externals";

    /// Merge info
    pub const MERGE_INFO: &str = "svn:mergeinfo";

    /// Value for svn:executable
    pub const EXECUTABLE_VALUE: &str = "*";

    /// Check whether a property name is in the reserved svn: namespace
    pub fn is_svn_property(name: &str) -> bool {
        name.starts_with("svn:")
    }
}
