//! Persistent document store boundary.
//!
//! The synchronization engine treats durable storage as an opaque
//! collaborator behind [`DocumentStore`]. Two implementations live here:
//! [`FileStore`], a crash-safe directory-per-document store, and
//! [`MemoryStore`], a HashMap-backed store with failure injection for
//! scheduler tests.

use codoc_core::{DocumentId, Version};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const RECORD_FILE: &str = "record";
const MANIFEST_FILE: &str = "manifest";
const FORMAT_VERSION: u32 = 1;

/// The persisted view of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContent {
    pub text: String,
    pub version: Version,
    pub updated_at_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt storage: {0}")]
    Corrupt(&'static str),
    #[error("missing storage")]
    Missing,
}

/// Durable per-document storage. Implementations must be read-after-write
/// consistent for a single document.
pub trait DocumentStore: Send + Sync {
    /// Returns the persisted content, or `None` if the document has never
    /// been saved. I/O and corruption failures propagate.
    fn load_content(&self, document_id: &DocumentId) -> Result<Option<StoredContent>, StorageError>;

    /// Persists the full text and version for one document.
    fn save_content(
        &self,
        document_id: &DocumentId,
        text: &str,
        version: Version,
    ) -> Result<(), StorageError>;
}

/// Manifest written next to each record so torn writes are detected on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    record_checksum: u32,
    record_len: u64,
}

/// Directory-per-document file store. The record is written to a temporary
/// file and renamed into place, then the checksummed manifest is written, so
/// a crash mid-save leaves either the old or the new record readable.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, document_id: &DocumentId) -> PathBuf {
        self.root.join(document_id.to_string())
    }

    fn read_record(&self, document_id: &DocumentId) -> Result<StoredContent, StorageError> {
        let dir = self.document_dir(document_id);
        let manifest_bytes = match fs::read(dir.join(MANIFEST_FILE)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::Missing);
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|_| StorageError::Corrupt("manifest decode"))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StorageError::Corrupt("format version"));
        }

        let record = fs::read(dir.join(RECORD_FILE))?;
        if record.len() as u64 != manifest.record_len {
            return Err(StorageError::Corrupt("length mismatch"));
        }
        if checksum_bytes(&record) != manifest.record_checksum {
            return Err(StorageError::Corrupt("checksum mismatch"));
        }

        serde_json::from_slice(&record).map_err(|_| StorageError::Corrupt("record decode"))
    }
}

impl DocumentStore for FileStore {
    fn load_content(&self, document_id: &DocumentId) -> Result<Option<StoredContent>, StorageError> {
        match self.read_record(document_id) {
            Ok(content) => Ok(Some(content)),
            Err(StorageError::Missing) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save_content(
        &self,
        document_id: &DocumentId,
        text: &str,
        version: Version,
    ) -> Result<(), StorageError> {
        let dir = self.document_dir(document_id);
        fs::create_dir_all(&dir)?;

        let content = StoredContent {
            text: text.to_string(),
            version,
            updated_at_ms: now_ms(),
        };
        let record =
            serde_json::to_vec(&content).map_err(|_| StorageError::Corrupt("record encode"))?;

        let record_path = dir.join(RECORD_FILE);
        let temp_path = dir.join("record.tmp");
        fs::write(&temp_path, &record)?;
        fs::rename(&temp_path, &record_path)?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            record_checksum: checksum_bytes(&record),
            record_len: record.len() as u64,
        };
        let encoded =
            serde_json::to_vec(&manifest).map_err(|_| StorageError::Corrupt("manifest encode"))?;
        fs::write(dir.join(MANIFEST_FILE), &encoded)?;
        Ok(())
    }
}

/// In-memory store for tests: seedable, save-counting, and able to fail the
/// next save on demand.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<DocumentId, StoredContent>>,
    fail_next_save: AtomicBool,
    save_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, document_id: DocumentId, text: &str, version: Version) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            document_id,
            StoredContent {
                text: text.to_string(),
                version,
                updated_at_ms: now_ms(),
            },
        );
    }

    pub fn saved(&self, document_id: &DocumentId) -> Option<StoredContent> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(document_id).cloned()
    }

    /// Makes the next `save_content` call fail with an I/O error.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryStore {
    fn load_content(&self, document_id: &DocumentId) -> Result<Option<StoredContent>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.get(document_id).cloned())
    }

    fn save_content(
        &self,
        document_id: &DocumentId,
        text: &str,
        version: Version,
    ) -> Result<(), StorageError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("injected save failure")));
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            *document_id,
            StoredContent {
                text: text.to_string(),
                version,
                updated_at_ms: now_ms(),
            },
        );
        Ok(())
    }
}

fn checksum_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
