//! Encoding of a (server, library) pair into the opaque key the backend uses
//! to index running sync jobs.
//!
//! The server id is always a canonical decimal integer, so the first `:` in an
//! encoded key is the split point and library ids may contain `:` themselves.

use crate::error::{MaintenanceError, Result};
use crate::types::ServerId;
use std::fmt;
use std::str::FromStr;

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncKey {
    server_id: ServerId,
    library_id: String,
}

impl SyncKey {
    pub fn new(server_id: ServerId, library_id: impl Into<String>) -> Self {
        Self {
            server_id,
            library_id: library_id.into(),
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn library_id(&self) -> &str {
        &self.library_id
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes a key produced by [`SyncKey::encode`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidSyncKey` when the separator is missing or the prefix is
    /// not a canonical decimal integer.
    pub fn parse(key: &str) -> Result<Self> {
        let (server, library) = key
            .split_once(SEPARATOR)
            .ok_or_else(|| MaintenanceError::InvalidSyncKey(key.to_string()))?;

        let server_id = server
            .parse::<ServerId>()
            .ok()
            .filter(|id| id.to_string() == server)
            .ok_or_else(|| MaintenanceError::InvalidSyncKey(key.to_string()))?;

        Ok(Self::new(server_id, library))
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.server_id, SEPARATOR, self.library_id)
    }
}

impl FromStr for SyncKey {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
