//! Point-in-time captures of host network state

use crate::archive;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a stored snapshot, derived from its creation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    const FORMAT: &'static str = "%Y%m%dT%H%M%S%.6fZ";

    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(at.format(Self::FORMAT).to_string())
    }

    /// Accept an id typed by an operator. Only file-name-safe ids are valid.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
            || raw.starts_with('.')
        {
            return Err(Error::Parse {
                message: format!("'{raw}' is not a snapshot id"),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One connection definition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    /// Connection name (the `id=` of the keyfile)
    pub name: String,
    /// File name inside the connection directory
    pub file_name: String,
    pub contents: String,
}

/// Decoded snapshot archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotContents {
    pub connections: Vec<ConnectionDefinition>,
    /// Interface and address state as reported by the host
    pub interfaces: String,
    pub agent_properties: Option<String>,
}

impl SnapshotContents {
    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections.iter().map(|c| c.name.as_str())
    }
}

/// A stored, checksummed archive of host network state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    /// blake3 of `archive`, hex encoded
    pub checksum: String,
    pub archive: Vec<u8>,
}

impl Snapshot {
    /// Pack `contents` into a new snapshot stamped `created_at`
    pub fn new(contents: &SnapshotContents, created_at: DateTime<Utc>) -> Result<Self> {
        let archive = archive::pack(contents)?;
        Ok(Self {
            id: SnapshotId::from_time(created_at),
            created_at,
            checksum: checksum(&archive),
            archive,
        })
    }

    /// Unpack the archive, refusing one whose checksum does not match
    pub fn contents(&self) -> Result<SnapshotContents> {
        self.verify()?;
        archive::unpack(&self.archive)
    }

    pub fn verify(&self) -> Result<()> {
        let actual = checksum(&self.archive);
        if actual != self.checksum {
            return Err(Error::Archive {
                message: format!(
                    "snapshot {} checksum mismatch (expected {}, got {actual})",
                    self.id, self.checksum
                ),
            });
        }
        Ok(())
    }

    pub fn metadata(&self) -> SnapshotMeta {
        SnapshotMeta {
            id: self.id.clone(),
            created_at: self.created_at,
            checksum: self.checksum.clone(),
            size: self.archive.len() as u64,
        }
    }
}

/// Snapshot details stored alongside each archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub size: u64,
}

fn checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
