//! Storage port for persisted documents (usage ledger, response cache).
//!
//! The governor and cache never touch the filesystem directly; they go through
//! a [`DocumentStore`]. [`JsonFileStore`] writes pretty JSON with atomic
//! replace (temp file in the same directory, then rename), so an interrupted
//! write leaves the previous document intact. [`MemoryStore`] backs tests.

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{GovernorError, Result};

/// Load/save access to a single persisted document.
pub trait DocumentStore<T>: Send {
    /// Load the document. `Ok(None)` means nothing has been stored yet.
    fn load(&self) -> Result<Option<T>>;

    /// Replace the stored document.
    fn save(&self, doc: &T) -> Result<()>;
}

// ============================================================================
// JSON file
// ============================================================================

/// A JSON document on disk.
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    /// Store the document at `path`. Parent directories are created on save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> DocumentStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, doc: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(doc)?;
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
///
/// The temp file is deleted on every early return, so a failed write never
/// leaves a partial document or stray temp file behind.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| GovernorError::Persist {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile store, used in tests and for embedding without a data directory.
#[derive(Debug)]
pub struct MemoryStore<T> {
    doc: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            doc: Mutex::new(None),
        }
    }

    /// Store pre-seeded with `doc`.
    pub fn with(doc: T) -> Self {
        Self {
            doc: Mutex::new(Some(doc)),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> DocumentStore<T> for MemoryStore<T> {
    fn load(&self) -> Result<Option<T>> {
        Ok(self.doc.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, doc: &T) -> Result<()> {
        *self.doc.lock().unwrap_or_else(|e| e.into_inner()) = Some(doc.clone());
        Ok(())
    }
}
