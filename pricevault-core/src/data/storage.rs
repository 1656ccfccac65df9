//! Byte-level storage backends for cached series files.
//!
//! The cache layer encodes and decodes parquet; a [`SeriesStorage`] only moves
//! named blobs. The base location decides the backend: a plain path is a local
//! directory, an `http(s)://` prefix is an object store.

use crate::data::provider::DataError;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub trait SeriesStorage: Send + Sync {
    /// Contents of `name`, or `None` if it doesn't exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DataError>;

    /// Replace `name` with `bytes`.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), DataError>;

    /// Names of all stored series files.
    fn list(&self) -> Result<Vec<String>, DataError>;

    /// Move a corrupt file out of the way so the next read treats it as absent.
    fn quarantine(&self, name: &str) -> Result<(), DataError>;

    /// Human-readable location for logs and status output.
    fn describe(&self) -> String;
}

/// Pick a backend for `base_location`.
pub fn open_storage(base_location: &str) -> Result<Arc<dyn SeriesStorage>, DataError> {
    if base_location.starts_with("http://") || base_location.starts_with("https://") {
        Ok(Arc::new(HttpObjectStorage::new(base_location, Duration::from_secs(30))?))
    } else {
        Ok(Arc::new(LocalDirStorage::new(base_location)))
    }
}

// ── Local directory ─────────────────────────────────────────────────

/// One file per series under a directory. Writes are atomic (tmp + rename).
pub struct LocalDirStorage {
    root: PathBuf,
}

impl LocalDirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl SeriesStorage for LocalDirStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DataError> {
        match fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DataError::Storage(format!("read {name}: {e}"))),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), DataError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| DataError::Storage(format!("create {}: {e}", self.root.display())))?;
        let path = self.path(name);
        let tmp_path = self.path(&format!("{name}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|e| DataError::Storage(format!("write {name}.tmp: {e}")))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Storage(format!("atomic rename failed for {name}: {e}"))
        })
    }

    fn list(&self) -> Result<Vec<String>, DataError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DataError::Storage(format!("read dir: {e}"))),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::Storage(format!("dir entry: {e}")))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".parquet") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn quarantine(&self, name: &str) -> Result<(), DataError> {
        let path = self.path(name);
        let target = self.path(&format!("{name}.quarantined"));
        warn!(file = %path.display(), "quarantining corrupt cache file");
        fs::rename(&path, &target).map_err(|e| DataError::Storage(format!("quarantine {name}: {e}")))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

// ── Remote object store ─────────────────────────────────────────────

/// GET/PUT objects under a URL prefix. A 404 on GET means the series doesn't exist yet.
pub struct HttpObjectStorage {
    client: Client,
    prefix: String,
}

impl HttpObjectStorage {
    pub fn new(prefix: &str, timeout: Duration) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Storage(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }
}

impl SeriesStorage for HttpObjectStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DataError> {
        let resp = self
            .client
            .get(self.url(name))
            .send()
            .map_err(|e| DataError::Storage(format!("GET {name}: {e}")))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => resp
                .bytes()
                .map(|b| Some(b.to_vec()))
                .map_err(|e| DataError::Storage(format!("GET {name} body: {e}"))),
            s => Err(DataError::Storage(format!("GET {name}: HTTP {s}"))),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), DataError> {
        let resp = self
            .client
            .put(self.url(name))
            .body(bytes.to_vec())
            .send()
            .map_err(|e| DataError::Storage(format!("PUT {name}: {e}")))?;
        if !resp.status().is_success() {
            return Err(DataError::Storage(format!("PUT {name}: HTTP {}", resp.status())));
        }
        debug!(name, bytes = bytes.len(), "uploaded series");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, DataError> {
        Err(DataError::Storage(format!(
            "listing is not supported for object storage at {}",
            self.prefix
        )))
    }

    fn quarantine(&self, name: &str) -> Result<(), DataError> {
        // Objects are immutable from here; the next successful write replaces it.
        warn!(name, prefix = %self.prefix, "corrupt remote cache object left in place");
        Ok(())
    }

    fn describe(&self) -> String {
        self.prefix.clone()
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Process-local storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl SeriesStorage for MemoryStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DataError> {
        Ok(self.files.lock().get(name).cloned())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), DataError> {
        self.files.lock().insert(name.to_string(), bytes.to_vec());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, DataError> {
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|k| k.ends_with(".parquet"))
            .cloned()
            .collect())
    }

    fn quarantine(&self, name: &str) -> Result<(), DataError> {
        let mut files = self.files.lock();
        if let Some(bytes) = files.remove(name) {
            files.insert(format!("{name}.quarantined"), bytes);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
