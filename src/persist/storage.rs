//! Durable key-value media the persistence adapter writes to.

use crate::error::{Result, StoreError};
use fs2::FileExt;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Magic bytes for entry files.
const ENTRY_MAGIC: &[u8; 4] = b"PST\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// Magic, version, length prefix and checksum.
const ENTRY_OVERHEAD: u64 = 4 + 1 + 8 + 4;

/// A string key-value medium (the browser `localStorage` contract).
pub trait DurableStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Stand-in for an unavailable medium. Reads are empty, writes vanish.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStorage;

impl DurableStorage for NoopStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove_item(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Process-local storage, mostly for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Directory-backed storage, one checksummed file per key.
///
/// File layout: magic, format version, u64 length, UTF-8 value, crc32.
/// File names are the SHA-256 of the key so any key is a valid name.
/// The directory is held under an exclusive lock for the lifetime of the value.
pub struct FileStorage {
    path: PathBuf,
    _lock_file: File,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.path.join(format!("{}.entry", hex::encode(digest)))
    }

    fn read_entry(path: &Path) -> Result<String> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENTRY_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported entry version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        // The prefix is not covered by the checksum, so bound it by what is on disk.
        let available = file.metadata()?.len().saturating_sub(ENTRY_OVERHEAD);
        if len > available {
            return Err(StoreError::Corruption(format!(
                "Entry length {} exceeds the {} bytes on disk",
                len, available
            )));
        }

        let mut content = vec![0u8; len as usize];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&content);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        String::from_utf8(content)
            .map_err(|e| StoreError::Corruption(format!("Entry is not UTF-8: {}", e)))
    }
}

impl DurableStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_entry(&path).map(Some)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("tmp");

        {
            let mut file = File::create(&tmp_path)?;
            let bytes = value.as_bytes();
            file.write_all(ENTRY_MAGIC)?;
            file.write_all(&[ENTRY_VERSION])?;
            file.write_all(&(bytes.len() as u64).to_le_bytes())?;
            file.write_all(bytes)?;
            file.write_all(&crc32fast::hash(bytes).to_le_bytes())?;
            file.sync_all()?;
        }

        // Readers see the old entry or the new one, never a torn write.
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Which medium a store persists to.
#[derive(Clone, Debug, Default)]
pub enum StorageBackend {
    /// In-process map.
    #[default]
    Memory,
    /// Directory on disk.
    File(PathBuf),
    /// Persistence disabled; equivalent to an unavailable medium.
    Disabled,
}

impl StorageBackend {
    /// Open the medium. A medium that cannot be opened degrades to
    /// [`NoopStorage`] so the store still runs, in memory only.
    pub fn open(&self) -> Arc<dyn DurableStorage> {
        match self {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::File(path) => match FileStorage::open(path) {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "durable storage unavailable, running in memory only");
                    Arc::new(NoopStorage)
                }
            },
            StorageBackend::Disabled => Arc::new(NoopStorage),
        }
    }
}
