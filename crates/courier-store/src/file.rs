use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// One JSON document on disk guarded by a lock.
pub(crate) struct JsonFile<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Opens the document, creating it with an empty value if it is missing.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = Self {
            path,
            lock: Mutex::new(()),
            _doc: PhantomData,
        };

        if !file.path.exists() {
            file.store(&T::default())?;
            info!("Created {}", file.path.display());
        } else {
            // Surface corruption at startup instead of on the first request
            file.load()?;
        }

        Ok(file)
    }

    pub fn with_data<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&T) -> Result<R>,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StoreError::Poisoned(format!("{}: {}", self.path.display(), e)))?;
        let doc = self.load()?;
        f(&doc)
    }

    /// Read-modify-write. The document is only written back when `f` succeeds.
    pub fn with_data_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StoreError::Poisoned(format!("{}: {}", self.path.display(), e)))?;
        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.store(&doc)?;
        Ok(out)
    }

    fn load(&self) -> Result<T> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes to a sibling temp file and renames it over the document, so a
    /// crash mid-write never leaves a truncated file behind.
    fn store(&self, doc: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, &bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!("Wrote {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
