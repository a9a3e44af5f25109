//! Directory-backed SD card.
//!
//! Maps the card root onto a host directory.  `card_begin` "mounts" the
//! card: it fails with [`CardError::NotPresent`] when the directory does
//! not exist, which is how the simulation models an empty slot.  Every
//! other operation fails with [`CardError::NotPresent`] outside a session.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::app::ports::{CardError, CardPort, DirEntry};

pub struct DirCard {
    root: PathBuf,
    mounted: bool,
    sessions: u32,
}

impl DirCard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: false,
            sessions: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Completed `card_begin` calls.
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    /// Resolve a card path below the root.  Parent components are
    /// rejected so nothing outside the card is reachable.
    fn resolve(&self, path: &str) -> Result<PathBuf, CardError> {
        if !self.mounted {
            return Err(CardError::NotPresent);
        }
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(CardError::NotFound);
        }
        Ok(self.root.join(rel))
    }
}

fn io_error(e: &std::io::Error) -> CardError {
    match e.kind() {
        std::io::ErrorKind::NotFound => CardError::NotFound,
        _ => CardError::IoError,
    }
}

impl CardPort for DirCard {
    fn card_begin(&mut self) -> Result<(), CardError> {
        if !self.root.is_dir() {
            return Err(CardError::NotPresent);
        }
        self.mounted = true;
        self.sessions += 1;
        Ok(())
    }

    fn card_end(&mut self) {
        self.mounted = false;
    }

    fn card_exists(&mut self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.exists())
    }

    fn card_mkdir(&mut self, path: &str) -> Result<(), CardError> {
        let p = self.resolve(path)?;
        fs::create_dir_all(p).map_err(|e| io_error(&e))
    }

    fn card_append(&mut self, path: &str, data: &[u8]) -> Result<(), CardError> {
        let p = self.resolve(path)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&p)
            .map_err(|e| io_error(&e))?;
        f.write_all(data).map_err(|e| io_error(&e))?;
        debug!("card: +{} bytes {}", data.len(), p.display());
        Ok(())
    }

    fn card_read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, CardError> {
        let p = self.resolve(path)?;
        let mut f = fs::File::open(p).map_err(|e| io_error(&e))?;
        f.seek(SeekFrom::Start(offset)).map_err(|e| io_error(&e))?;
        f.read(buf).map_err(|e| io_error(&e))
    }

    fn card_remove(&mut self, path: &str) -> Result<(), CardError> {
        let p = self.resolve(path)?;
        fs::remove_file(p).map_err(|e| io_error(&e))
    }

    fn card_list(&mut self, path: &str) -> Result<Vec<DirEntry>, CardError> {
        let p = self.resolve(path)?;
        let mut out = Vec::new();
        for entry in fs::read_dir(p).map_err(|e| io_error(&e))? {
            let entry = entry.map_err(|e| io_error(&e))?;
            let meta = entry.metadata().map_err(|e| io_error(&e))?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}
