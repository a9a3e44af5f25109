//! Host firmware "flasher".
//!
//! Implements [`FirmwarePort`] by pulling the image from the
//! [`DownloadClient`] in fixed blocks and keeping it in memory.  An image
//! is accepted when it is non-empty and starts with [`IMAGE_MAGIC`]; the
//! last accepted image can be inspected afterwards.

use log::{debug, info};

use crate::app::ports::{DownloadClient, DownloadStatus, FirmwarePort, ImageKind};

/// First bytes of a valid image.
pub const IMAGE_MAGIC: &[u8; 4] = b"SNFW";

/// Bytes pulled per poll, one flash page.
pub const BLOCK_BYTES: usize = 128;

#[derive(Debug, Default)]
pub struct MemFlasher {
    busy: Option<ImageKind>,
    image: Vec<u8>,
    applied: Option<(ImageKind, Vec<u8>)>,
}

impl MemFlasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last image that completed successfully.
    pub fn applied(&self) -> Option<&(ImageKind, Vec<u8>)> {
        self.applied.as_ref()
    }

    fn finish(&mut self, kind: ImageKind, client: &mut dyn DownloadClient) {
        self.busy = None;
        let image = core::mem::take(&mut self.image);
        let status = if image.is_empty() {
            DownloadStatus::Truncated
        } else if !image.starts_with(IMAGE_MAGIC) {
            DownloadStatus::Invalid
        } else {
            info!("flasher: {:?} image, {} bytes", kind, image.len());
            self.applied = Some((kind, image));
            DownloadStatus::Success
        };
        client.complete(status);
    }
}

impl FirmwarePort for MemFlasher {
    fn download_start(&mut self, kind: ImageKind) -> bool {
        if self.busy.is_some() {
            return false;
        }
        self.busy = Some(kind);
        self.image.clear();
        true
    }

    fn download_poll(&mut self, client: &mut dyn DownloadClient) {
        let Some(kind) = self.busy else {
            return;
        };
        match client.query_available() {
            None => self.finish(kind, client),
            Some(0) => client.prompt_for_data(),
            Some(n) => {
                let mut block = [0u8; BLOCK_BYTES];
                let want = n.min(BLOCK_BYTES);
                let got = client.read_bytes(&mut block[..want]);
                self.image.extend_from_slice(&block[..got]);
                debug!("flasher: {} bytes", self.image.len());
            }
        }
    }
}
