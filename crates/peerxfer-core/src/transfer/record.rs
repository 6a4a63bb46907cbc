//! The per-transfer data entity.
//!
//! A [`TransferRecord`] owns the open file behind a transfer from creation
//! until it reaches a terminal status. All status changes go through the
//! operations in [`super::machine`].

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::file::{chunk, strip_directory, unique_destination};

use super::progress::SpeedMeter;
use super::{Direction, PeerId, TransferId, TransferKey, TransferSize, TransferStatus};

/// Default throughput sample window.
pub const DEFAULT_SPEED_WINDOW: Duration = Duration::from_secs(1);

/// Which side put a transfer on hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOrigin {
    /// Paused by a local command
    Local,
    /// Paused by the peer
    Remote,
}

/// One in-flight or finished transfer.
#[derive(Debug)]
pub struct TransferRecord {
    pub(super) status: TransferStatus,
    pub(super) direction: Direction,
    pub(super) peer_id: PeerId,
    pub(super) transfer_id: TransferId,
    pub(super) position: u64,
    pub(super) size: TransferSize,
    pub(super) display_name: String,
    pub(super) local_path: PathBuf,
    pub(super) file: Option<File>,
    pub(super) peer_display_name: String,
    pub(super) speed: SpeedMeter,
    pub(super) pause_origin: Option<PauseOrigin>,
}

impl TransferRecord {
    /// Create the record for a file the transport already agreed to send.
    ///
    /// Opens `path` for reading. Does not contact the transport; the caller
    /// obtains `transfer_id` from it first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnreadable`] if the file cannot be opened, or
    /// [`Error::InvalidFileName`] if the path has no file name.
    pub fn create_outgoing(
        peer: PeerId,
        transfer_id: TransferId,
        path: &Path,
        size: TransferSize,
    ) -> Result<Self> {
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;

        let file = File::open(path).map_err(|source| Error::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(
            "Created upload #{} of '{}' to peer {}",
            transfer_id,
            path.display(),
            peer
        );

        Ok(Self::new(
            Direction::Upload,
            peer,
            transfer_id,
            size,
            display_name,
            path.to_path_buf(),
            file,
        ))
    }

    /// Create the record for a file offered by a peer.
    ///
    /// Strips directories from `suggested_name`, picks a collision-free path
    /// under `download_dir` and creates the file there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileName`] for names without a file component
    /// and [`Error::DestinationUnavailable`] if the file cannot be created.
    /// The caller must cancel the transfer with the transport in either case.
    pub fn create_incoming(
        peer: PeerId,
        transfer_id: TransferId,
        download_dir: &Path,
        suggested_name: &str,
        size: TransferSize,
    ) -> Result<Self> {
        let display_name = strip_directory(suggested_name)?.to_string();

        std::fs::create_dir_all(download_dir).map_err(|source| {
            Error::DestinationUnavailable {
                path: download_dir.to_path_buf(),
                source,
            }
        })?;

        let local_path = unique_destination(download_dir, &display_name)?;

        // Never overwrite a file another writer created after the name was chosen.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&local_path)
            .map_err(|source| Error::DestinationUnavailable {
                path: local_path.clone(),
                source,
            })?;

        tracing::debug!(
            "Created download #{} from peer {} at '{}'",
            transfer_id,
            peer,
            local_path.display()
        );

        Ok(Self::new(
            Direction::Download,
            peer,
            transfer_id,
            size,
            display_name,
            local_path,
            file,
        ))
    }

    fn new(
        direction: Direction,
        peer_id: PeerId,
        transfer_id: TransferId,
        size: TransferSize,
        display_name: String,
        local_path: PathBuf,
        file: File,
    ) -> Self {
        Self {
            status: TransferStatus::Requested,
            direction,
            peer_id,
            transfer_id,
            position: 0,
            size,
            display_name,
            local_path,
            file: Some(file),
            peer_display_name: format!("peer {peer_id}"),
            speed: SpeedMeter::new(DEFAULT_SPEED_WINDOW, Instant::now()),
            pause_origin: None,
        }
    }

    /// Use `window` as the throughput sample window.
    #[must_use]
    pub fn with_speed_window(mut self, window: Duration) -> Self {
        self.speed = SpeedMeter::new(window, Instant::now());
        self
    }

    /// Use `name` as the peer label.
    #[must_use]
    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_display_name = name.into();
        self
    }

    /// Event-dispatch key, or `None` once the transfer is terminal.
    ///
    /// Transports reuse transfer ids after completion, so a finished record
    /// must never match a later event.
    #[must_use]
    pub fn key(&self) -> Option<TransferKey> {
        (!self.status.is_terminal()).then(|| TransferKey::new(self.peer_id, self.transfer_id))
    }

    /// Current status.
    pub const fn status(&self) -> TransferStatus {
        self.status
    }

    /// Transfer direction.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Peer on the other end.
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Transfer number as assigned by the transport.
    pub const fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    /// Bytes moved so far.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Total length.
    pub const fn size(&self) -> TransferSize {
        self.size
    }

    /// Whether the transfer finished with every announced byte.
    ///
    /// A download the peer completes early ends in `Done` but is short.
    pub fn is_complete(&self) -> bool {
        self.status == TransferStatus::Done
            && self.size.known().map_or(true, |total| self.position == total)
    }

    /// File name without directories.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Path of the backing file.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Peer label used for display.
    pub fn peer_display_name(&self) -> &str {
        &self.peer_display_name
    }

    /// Update the peer label.
    pub fn set_peer_display_name(&mut self, name: impl Into<String>) {
        self.peer_display_name = name.into();
    }

    /// Cached speed in bytes per second.
    pub const fn speed(&self) -> f64 {
        self.speed.speed()
    }

    /// Who paused the transfer, while it is paused.
    pub const fn pause_origin(&self) -> Option<PauseOrigin> {
        self.pause_origin
    }

    /// Whether the backing file is still open.
    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Read `length` bytes at `position` from the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleClosed`] after a terminal status, otherwise see
    /// [`chunk::read_chunk`].
    pub fn read_chunk(&mut self, position: u64, length: usize) -> Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::HandleClosed(self.display_name.clone()))?;
        chunk::read_chunk(file, position, length)
    }

    /// Write `length` bytes of `data` at `position` into the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleClosed`] after a terminal status, otherwise see
    /// [`chunk::write_chunk`].
    pub fn write_chunk(&mut self, data: &[u8], position: u64, length: usize) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::HandleClosed(self.display_name.clone()))?;
        chunk::write_chunk(file, data, position, length)
    }

    /// Account `bytes` moved at `now`.
    ///
    /// The position never runs past a known size.
    pub(super) fn advance(&mut self, bytes: u64, now: Instant) {
        self.position = self.position.saturating_add(bytes);
        if let TransferSize::Known(total) = self.size {
            self.position = self.position.min(total);
        }
        self.speed.record(bytes, now);
    }

    /// Enter `status`, close the file and optionally remove a partial download.
    pub(super) fn terminate(&mut self, status: TransferStatus, remove_partial: bool) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.pause_origin = None;

        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                tracing::debug!("Failed to sync '{}': {}", self.local_path.display(), e);
            }
        }

        if remove_partial && self.direction == Direction::Download {
            match std::fs::remove_file(&self.local_path) {
                Ok(()) => tracing::debug!("Removed partial '{}'", self.local_path.display()),
                Err(e) => tracing::warn!(
                    "Failed to remove partial '{}': {}",
                    self.local_path.display(),
                    e
                ),
            }
        }

        tracing::info!(
            "{} '{}' with {} is {}",
            self.direction,
            self.display_name,
            self.peer_display_name,
            status
        );
    }
}
