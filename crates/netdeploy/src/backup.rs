//! Backup store
//!
//! Keeps the newest N snapshots by creation time. Retention is enforced on
//! every save, oldest first.

use crate::error::{Error, Result};
use crate::snapshot::{Snapshot, SnapshotId, SnapshotMeta};
use chrono::Duration as ChronoDuration;
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshots kept when no retention is configured
pub const DEFAULT_RETENTION: usize = 5;

const ARCHIVE_EXT: &str = "tar.gz";
const META_EXT: &str = "toml";

/// Persistent snapshot storage
pub trait BackupStore {
    /// Store a snapshot and evict the oldest beyond the retention limit.
    ///
    /// Returns the id it was stored under, which differs from
    /// `snapshot.id` only when that id was already taken.
    fn save(&mut self, snapshot: Snapshot) -> Result<SnapshotId>;

    /// The most recent snapshot, or [`Error::NoBackupAvailable`]
    fn latest(&self) -> Result<Snapshot>;

    /// A specific snapshot, or [`Error::SnapshotNotFound`]
    fn get(&self, id: &SnapshotId) -> Result<Snapshot>;

    /// Stored snapshots, newest first
    fn list(&self) -> Result<Vec<SnapshotMeta>>;
}

/// Give `snapshot` an id no stored snapshot uses, nudging its timestamp
fn make_unique(mut snapshot: Snapshot, taken: impl Fn(&SnapshotId) -> bool) -> Snapshot {
    while taken(&snapshot.id) {
        snapshot.created_at += ChronoDuration::microseconds(1);
        snapshot.id = SnapshotId::from_time(snapshot.created_at);
    }
    snapshot
}

fn newest_first(metas: &mut [SnapshotMeta]) {
    metas.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// In-memory store, used for previews and tests
#[derive(Debug)]
pub struct MemoryBackupStore {
    retention: usize,
    snapshots: Vec<Snapshot>,
}

impl MemoryBackupStore {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            snapshots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for MemoryBackupStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl BackupStore for MemoryBackupStore {
    fn save(&mut self, snapshot: Snapshot) -> Result<SnapshotId> {
        let snapshot = make_unique(snapshot, |id| self.snapshots.iter().any(|s| &s.id == id));
        let id = snapshot.id.clone();
        self.snapshots.push(snapshot);

        self.snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let keep = self.retention.min(self.snapshots.len());
        for evicted in self.snapshots.drain(keep..) {
            log::debug!("Evicted snapshot {}", evicted.id);
        }
        Ok(id)
    }

    fn latest(&self) -> Result<Snapshot> {
        self.snapshots
            .first()
            .cloned()
            .ok_or(Error::NoBackupAvailable)
    }

    fn get(&self, id: &SnapshotId) -> Result<Snapshot> {
        self.snapshots
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| Error::SnapshotNotFound { id: id.to_string() })
    }

    fn list(&self) -> Result<Vec<SnapshotMeta>> {
        Ok(self.snapshots.iter().map(Snapshot::metadata).collect())
    }
}

/// Directory-backed store: `<id>.tar.gz` plus `<id>.toml` metadata
#[derive(Debug)]
pub struct DirBackupStore {
    dir: PathBuf,
    retention: usize,
}

impl DirBackupStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>, retention: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retention: retention.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn archive_path(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{id}.{ARCHIVE_EXT}"))
    }

    fn meta_path(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{id}.{META_EXT}"))
    }

    fn read_meta(&self, path: &Path) -> Result<SnapshotMeta> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Metadata {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn remove(&self, id: &SnapshotId) -> Result<()> {
        for path in [self.archive_path(id), self.meta_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn enforce_retention(&self) -> Result<()> {
        let stored = self.list()?;
        for meta in stored.iter().skip(self.retention) {
            log::debug!("Evicting snapshot {}", meta.id);
            self.remove(&meta.id)?;
        }
        Ok(())
    }
}

impl BackupStore for DirBackupStore {
    fn save(&mut self, snapshot: Snapshot) -> Result<SnapshotId> {
        let snapshot = make_unique(snapshot, |id| self.meta_path(id).exists());
        let meta = snapshot.metadata();
        let meta_toml = toml::to_string_pretty(&meta).map_err(|e| Error::SnapshotFailed {
            reason: e.to_string(),
        })?;

        let archive_path = self.archive_path(&snapshot.id);
        fs::write(&archive_path, &snapshot.archive)?;
        restrict_permissions(&archive_path)?;
        // Metadata last: a snapshot without metadata is not listed.
        fs::write(self.meta_path(&snapshot.id), meta_toml)?;
        log::debug!("Saved snapshot {} to {}", snapshot.id, self.dir.display());

        self.enforce_retention()?;
        Ok(snapshot.id)
    }

    fn latest(&self) -> Result<Snapshot> {
        let newest = self
            .list()?
            .into_iter()
            .next()
            .ok_or(Error::NoBackupAvailable)?;
        self.get(&newest.id)
    }

    fn get(&self, id: &SnapshotId) -> Result<Snapshot> {
        let meta_path = self.meta_path(id);
        if !meta_path.exists() {
            return Err(Error::SnapshotNotFound { id: id.to_string() });
        }
        let meta = self.read_meta(&meta_path)?;
        let archive = fs::read(self.archive_path(id)).map_err(|e| Error::Archive {
            message: format!("snapshot {id}: {e}"),
        })?;
        let snapshot = Snapshot {
            id: meta.id,
            created_at: meta.created_at,
            checksum: meta.checksum,
            archive,
        };
        snapshot.verify()?;
        Ok(snapshot)
    }

    fn list(&self) -> Result<Vec<SnapshotMeta>> {
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            match self.read_meta(&path) {
                Ok(meta) => metas.push(meta),
                Err(e) => log::warn!("Skipping unreadable snapshot metadata: {e}"),
            }
        }
        newest_first(&mut metas);
        Ok(metas)
    }
}

#[cfg(unix)]
pub(crate) fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
