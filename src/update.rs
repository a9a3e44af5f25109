//! Firmware update and network migration from the SD card.
//!
//! Both checks run once per measurement cycle, after the data log write.
//!
//! ```text
//!  update.bin ──▶ download (Update)   ─┐
//!  fallback.bin ─▶ download (Fallback) ┴─▶ file removed ─▶ reboot on success
//!  MIGRATE.V3 ──▶ new AppEUI, DevAddr 0, rejoin ─▶ marker removed
//! ```
//!
//! The image file is removed after every attempt that got as far as
//! starting the downloader, so a bad image cannot cause a retry loop.

use log::{debug, error, info, warn};

use crate::app::ports::{CardPort, DownloadClient, DownloadStatus, FirmwarePort, ImageKind, StoragePort, UplinkPort};
use crate::error::UpdateError;
use crate::provisioning::ProvisioningRecord;

/// Image files, in the order they are tried.
pub const IMAGE_FILES: [(&str, ImageKind); 2] = [
    ("update.bin", ImageKind::Update),
    ("fallback.bin", ImageKind::Fallback),
];

pub const MIGRATE_MARKER: &str = "MIGRATE.V3";

/// AppEUI written by a migration (LSB first).
pub const MIGRATE_APP_EUI: [u8; 8] = [1, 0, 0, 0, 0, 0, 0, 0];

/// Bytes read from the card per refill.
pub const CHUNK_BYTES: usize = 256;

/// Downloader polls allowed before a transfer is abandoned.
pub const DOWNLOAD_POLL_BUDGET: u32 = 100_000;

// ---------------------------------------------------------------------------
// Image client
// ---------------------------------------------------------------------------

/// Feeds one image file to the downloader a chunk at a time.
///
/// The downloader asks for data through [`DownloadClient`]; a prompt only
/// raises [`wants_data`](Self::wants_data) and the update routine does the
/// card read, so the client never borrows the card.
#[derive(Debug, Default)]
pub struct ImageClient {
    chunk: Vec<u8>,
    pos: usize,
    offset: u64,
    wants_data: bool,
    exhausted: bool,
    status: Option<DownloadStatus>,
    total: u64,
}

impl ImageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wants_data(&self) -> bool {
        self.wants_data
    }

    pub fn status(&self) -> Option<DownloadStatus> {
        self.status
    }

    /// Bytes handed to the downloader so far.
    pub fn bytes_delivered(&self) -> u64 {
        self.total
    }

    /// Read the next chunk of `path`.  A read error ends the image.
    pub fn refill(&mut self, card: &mut (impl CardPort + ?Sized), path: &str) {
        self.wants_data = false;
        let mut buf = vec![0u8; CHUNK_BYTES];
        match card.card_read_at(path, self.offset, &mut buf) {
            Ok(0) => self.exhausted = true,
            Ok(n) => {
                buf.truncate(n);
                self.chunk = buf;
                self.pos = 0;
                self.offset += n as u64;
            }
            Err(e) => {
                error!("read {} failed at {}: {}", path, self.offset, e);
                self.exhausted = true;
            }
        }
    }
}

impl DownloadClient for ImageClient {
    fn query_available(&mut self) -> Option<usize> {
        let n = self.chunk.len() - self.pos;
        if n == 0 && self.exhausted { None } else { Some(n) }
    }

    fn prompt_for_data(&mut self) {
        self.wants_data = true;
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        // unused tail erased-flash style
        buf[n..].fill(0xFF);
        self.pos += n;
        self.total += n as u64;
        n
    }

    fn complete(&mut self, status: DownloadStatus) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }
}

// ---------------------------------------------------------------------------
// Firmware update
// ---------------------------------------------------------------------------

/// Look for an image on the card and flash it.
///
/// Returns the kind of image applied; the caller should reset to run it.
pub fn apply_sd_update<P>(p: &mut P) -> Result<ImageKind, UpdateError>
where
    P: CardPort + FirmwarePort + UplinkPort + ?Sized,
{
    if let Err(e) = p.card_begin() {
        debug!("update: no card: {}", e);
        p.card_end();
        return Err(UpdateError::NoImage);
    }

    let mut result = Err(UpdateError::NoImage);
    for (path, kind) in IMAGE_FILES {
        if !p.card_exists(path) {
            debug!("update: not found: {}", path);
            continue;
        }
        result = update_from_card(p, path, kind).map(|()| kind);
        info!("update: applied update from {}: {}", path, result.is_ok());
        break;
    }

    p.card_end();
    result
}

fn update_from_card<P>(p: &mut P, path: &str, kind: ImageKind) -> Result<(), UpdateError>
where
    P: CardPort + FirmwarePort + UplinkPort + ?Sized,
{
    info!("Attempting to load firmware from {}", path);

    if !p.download_start(kind) {
        // no callbacks will happen
        remove_or_warn(p, path);
        return Err(UpdateError::StartFailed);
    }

    let mut client = ImageClient::new();
    let mut polls = 0u32;
    let status = loop {
        if client.wants_data() {
            client.refill(&mut *p, path);
        }
        p.download_poll(&mut client);
        if let Some(status) = client.status() {
            break Some(status);
        }
        p.radio_poll();
        polls += 1;
        if polls >= DOWNLOAD_POLL_BUDGET {
            break None;
        }
    };

    remove_or_warn(p, path);

    match status {
        Some(DownloadStatus::Success) => {
            info!("download succeeded, {} bytes", client.bytes_delivered());
            Ok(())
        }
        Some(other) => {
            error!("download failed, status {:?}", other);
            Err(UpdateError::DownloadFailed)
        }
        None => {
            error!("download did not complete after {} polls", polls);
            Err(UpdateError::Timeout)
        }
    }
}

/// A file that cannot be removed is picked up again on the next cycle.
fn remove_or_warn<P: CardPort + ?Sized>(p: &mut P, path: &str) {
    if let Err(e) = p.card_remove(path) {
        warn!("could not remove {}: {}, it will be retried next cycle", path, e);
    }
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// Apply a pending network migration.  Returns whether one was applied.
pub fn check_migration<P>(p: &mut P) -> Result<bool, UpdateError>
where
    P: CardPort + StoragePort + UplinkPort + ?Sized,
{
    if p.card_begin().is_err() {
        p.card_end();
        return Ok(false);
    }
    let result = if p.card_exists(MIGRATE_MARKER) {
        migrate(p).map(|()| true)
    } else {
        Ok(false)
    };
    p.card_end();
    result
}

fn migrate<P>(p: &mut P) -> Result<(), UpdateError>
where
    P: CardPort + StoragePort + UplinkPort + ?Sized,
{
    let mut record = ProvisioningRecord::load(&*p).unwrap_or_default();
    record.app_eui = MIGRATE_APP_EUI;
    record.dev_addr = 0;
    if let Err(e) = record.save(&mut *p) {
        error!("AppEUI not updated: {}", e);
        return Err(UpdateError::ProvisioningStore);
    }

    p.rejoin();
    remove_or_warn(p, MIGRATE_MARKER);
    info!("AppEUI update: success");
    Ok(())
}
