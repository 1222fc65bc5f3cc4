use crate::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Everything a node needs to pick up where it left off
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub elections: BTreeMap<String, Election>,
    pub chains: BTreeMap<String, Chain>,

    /// Secret shares by holder address, then election
    pub shares: BTreeMap<String, BTreeMap<String, SharedSecret>>,

    pub master: Option<MasterRecord>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        // If it starts with `{` then it's JSON
        match bytes.first() {
            None => Err(Error::Encoding("empty snapshot".into())),
            Some(b'{') => Ok(serde_json::from_slice(bytes)?),
            Some(_) => Ok(serde_cbor::from_slice(bytes)?),
        }
    }
}

/// Durable storage for snapshots
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot, or `None` if nothing was ever saved
    fn load(&self) -> Result<Option<Snapshot>, Error>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), Error>;
}

/// A store that keeps the encoded snapshot in memory
#[derive(Debug, Default)]
pub struct MemStore {
    inner: Mutex<Option<Vec<u8>>>,
    failing: Mutex<bool>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Make every following save fail until called again with `false`
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

impl SnapshotStore for MemStore {
    fn load(&self) -> Result<Option<Snapshot>, Error> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.as_deref().map(Snapshot::from_bytes).transpose()
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), Error> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "store is unavailable",
            )));
        }
        let bytes = snapshot.to_bytes()?;
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
        Ok(())
    }
}

/// A store backed by a single file, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Snapshot>, Error> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Snapshot::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let bytes = snapshot.to_bytes()?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, &bytes)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}
