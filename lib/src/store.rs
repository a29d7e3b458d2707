//! Flat-file persistence for pool state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::pool::{PoolSnapshot, PoolState};

/// Write `value` as pretty JSON. The file is replaced atomically: readers see
/// either the old contents or the new ones, never a torn write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Pool state on disk.
#[derive(Clone, Debug)]
pub struct PoolStore {
    path: PathBuf,
}

impl PoolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, state: &PoolState) -> Result<()> {
        self.save_snapshot(&state.snapshot())
    }

    pub fn save_snapshot(&self, snapshot: &PoolSnapshot) -> Result<()> {
        write_json_atomic(&self.path, snapshot)?;
        debug!(
            path = %self.path.display(),
            leaves = snapshot.tree.next_index,
            "pool state saved"
        );
        Ok(())
    }

    /// Load and verify a saved pool. A snapshot whose leaves don't reproduce
    /// its own frontier and root is rejected as `CorruptState`.
    pub fn load(&self) -> Result<PoolState> {
        let snapshot: PoolSnapshot = read_json(&self.path)?;
        PoolState::restore(snapshot)
    }
}
