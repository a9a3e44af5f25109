//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the host
//! simulation.
//!
//! - Namespace isolation: every key is stored as `namespace::key`.
//! - Persistence: when opened on a file, every write rewrites the whole
//!   store to a temporary file and renames it over the old one, so a
//!   crash leaves either the old or the new contents.
//! - The node config is stored postcard-encoded under `node::cfg` and is
//!   validated on load and on save.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::NodeConfig;

const CONFIG_NAMESPACE: &str = "node";
const CONFIG_KEY: &str = "cfg";

/// Largest value a key may hold.
const MAX_BLOB_SIZE: usize = 4000;

pub struct NvsAdapter {
    store: RefCell<BTreeMap<String, Vec<u8>>>,
    /// Backing file; `None` keeps everything in memory.
    path: Option<PathBuf>,
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl NvsAdapter {
    /// In-memory store, lost on exit.
    pub fn new() -> Self {
        Self {
            store: RefCell::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Store persisted in `path` (JSON).  A missing file starts empty; an
    /// unreadable one is reported and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let store = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("NVS: {} unreadable ({}), starting empty", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        info!("NvsAdapter: {} keys from {}", store.len(), path.display());
        Self {
            store: RefCell::new(store),
            path: Some(path),
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    fn commit(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string(&*self.store.borrow()).map_err(|_| StorageError::IoError)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|e| {
                warn!("NVS: commit to {} failed: {}", path.display(), e);
                StorageError::IoError
            })
    }
}

// ── ConfigPort implementation ─────────────────────────────────

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<NodeConfig, ConfigError> {
        let mut buf = [0u8; 256];
        let len = self
            .read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf)
            .map_err(|e| match e {
                StorageError::NotFound => ConfigError::NotFound,
                _ => ConfigError::IoError,
            })?;
        let cfg: NodeConfig = postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn save(&mut self, config: &NodeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|_| ConfigError::IoError)
    }
}

// ── StoragePort implementation ────────────────────────────────

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let composite = Self::composite_key(namespace, key);
        match self.store.borrow().get(&composite) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        let composite = Self::composite_key(namespace, key);
        let previous = self.store.borrow_mut().insert(composite.clone(), data.to_vec());
        if let Err(e) = self.commit() {
            // keep memory and file in step
            let mut store = self.store.borrow_mut();
            match previous {
                Some(old) => store.insert(composite, old),
                None => store.remove(&composite),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        if self.store.borrow_mut().remove(&composite).is_some() {
            self.commit()?;
        }
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .borrow()
            .contains_key(&Self::composite_key(namespace, key))
    }
}
