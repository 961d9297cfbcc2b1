// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::PodcastError;

/// The media-library scanner, as seen from the podcast core
pub trait LibraryScanner: Send + Sync {
    fn is_scanning(&self) -> bool;
}

/// Scan flag owned by whoever runs the library scanner.
///
/// The scanner is the only writer (`begin`/`finish`); the podcast core only
/// reads it through [`LibraryScanner`].
#[derive(Debug, Default, Clone)]
pub struct ScanState {
    scanning: Arc<AtomicBool>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.scanning.store(true, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }
}

impl LibraryScanner for ScanState {
    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

/// Checkpoint consulted by every mutating podcast operation
#[derive(Clone)]
pub struct ScanGuard {
    scanner: Arc<dyn LibraryScanner>,
}

impl ScanGuard {
    pub fn new(scanner: Arc<dyn LibraryScanner>) -> Self {
        Self { scanner }
    }

    pub fn is_library_scan_active(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Reject the operation while the library scanner is running
    pub fn check(&self, operation: &str) -> Result<(), PodcastError> {
        if self.is_library_scan_active() {
            debug!("Rejecting {} while the library scan is running", operation);
            return Err(PodcastError::ScanInProgress);
        }
        Ok(())
    }
}
