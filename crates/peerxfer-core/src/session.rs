//! Event adapter between the transport and the transfer registry.
//!
//! A [`TransferSession`] is the only component that talks to the transport.
//! It owns the registry, resolves transport events to records by
//! `(peer, transfer)` and runs the matching state-machine operation. Local
//! commands address records by display index.
//!
//! Events for transfers the session does not know (finished, cleared or
//! never seen) are logged and ignored.
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerxfer_core::config::Config;
//! use peerxfer_core::session::TransferSession;
//!
//! let mut session = TransferSession::new(transport, Config::default());
//! let index = session.send_file(0, Path::new("report.pdf"))?;
//!
//! // later, from the transport's callbacks:
//! session.on_control_received(0, 7, ControlSignal::Resume)?;
//! session.on_chunk_requested(0, 7, 0, 1371)?;
//!
//! for line in session.progress_lines() {
//!     println!("{line}");
//! }
//! ```

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::Instant;

use crate::command::Command;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::transfer::{
    ControlSignal, FileKind, PeerId, ProgressView, TransferId, TransferRecord, TransferRegistry,
    TransferSize,
};
use crate::transport::Transport;

/// Transfer state of one client, bound to one transport.
#[derive(Debug)]
pub struct TransferSession<T: Transport> {
    transport: T,
    registry: TransferRegistry,
    config: Config,
    peer_names: HashMap<PeerId, String>,
}

impl<T: Transport> TransferSession<T> {
    /// Create a session with no transfers.
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport,
            registry: TransferRegistry::new(),
            config,
            peer_names: HashMap::new(),
        }
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// All transfers in display order.
    pub const fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Session configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Offer the file at `path` to `peer`.
    ///
    /// The transport is asked first; the record is only created once it has
    /// assigned a transfer id. Returns the new display index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnreadable`] if `path` is not a readable regular
    /// file, or the transport's rejection. If the file cannot be opened after
    /// the transport accepted the offer, the offer is cancelled again.
    pub fn send_file(&mut self, peer: PeerId, path: &Path) -> Result<usize> {
        let metadata = std::fs::metadata(path).map_err(|source| Error::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(Error::SourceUnreadable {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;
        let size = TransferSize::Known(metadata.len());

        let transfer = self.transport.begin_send(peer, size, &name)?;

        let record = match TransferRecord::create_outgoing(peer, transfer, path, size) {
            Ok(record) => record,
            Err(e) => {
                self.cancel_quietly(peer, transfer);
                return Err(e);
            }
        };

        tracing::info!(
            "Offering '{}' ({} bytes) to {}",
            name,
            metadata.len(),
            self.peer_label(peer)
        );
        Ok(self.register(record))
    }

    /// Handle a file offered by `peer`.
    ///
    /// Avatar offers are cancelled without creating a record.
    ///
    /// # Errors
    ///
    /// Returns the naming or file creation error after cancelling the offer,
    /// or the transport's rejection of that cancel.
    pub fn on_incoming_offer(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        kind: FileKind,
        size: u64,
        suggested_name: &str,
    ) -> Result<()> {
        if kind == FileKind::Avatar {
            tracing::debug!("Refusing avatar #{} from peer {}", transfer, peer);
            self.transport
                .send_control(peer, transfer, ControlSignal::Cancel)?;
            return Ok(());
        }

        let download_dir = self.config.transfer.download_dir();
        let size = TransferSize::from_raw(size);

        let record = match TransferRecord::create_incoming(
            peer,
            transfer,
            &download_dir,
            suggested_name,
            size,
        ) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    "Refusing '{}' from peer {}: {}",
                    suggested_name,
                    peer,
                    e
                );
                self.cancel_quietly(peer, transfer);
                return Err(e);
            }
        };

        tracing::info!(
            "{} offers '{}' ({})",
            self.peer_label(peer),
            record.display_name(),
            size.known()
                .map_or_else(|| "unknown size".to_string(), |n| format!("{n} bytes"))
        );
        self.register(record);
        Ok(())
    }

    /// Handle a control signal from the peer.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps all event handlers uniform.
    pub fn on_control_received(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        signal: ControlSignal,
    ) -> Result<()> {
        let Some(index) = self.lookup(peer, transfer, "control signal") else {
            return Ok(());
        };
        if let Some(record) = self.registry.get_mut(index) {
            record.on_control(signal);
        }
        self.registry.retire(index);
        Ok(())
    }

    /// Handle the transport's request for upload bytes.
    ///
    /// # Errors
    ///
    /// Returns read or transport errors; the transfer stays where it was.
    pub fn on_chunk_requested(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        offset: u64,
        length: usize,
    ) -> Result<()> {
        let Some(index) = self.lookup(peer, transfer, "chunk request") else {
            return Ok(());
        };
        let result = match self.registry.get_mut(index) {
            Some(record) => {
                record.on_chunk_requested(&mut self.transport, offset, length, Instant::now())
            }
            None => Ok(()),
        };
        self.registry.retire(index);
        result
    }

    /// Handle download bytes delivered by the transport.
    ///
    /// # Errors
    ///
    /// Returns write errors; the transfer stays where it was.
    pub fn on_chunk_delivered(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let Some(index) = self.lookup(peer, transfer, "chunk") else {
            return Ok(());
        };
        let result = match self.registry.get_mut(index) {
            Some(record) => record.on_chunk_delivered(offset, data, Instant::now()),
            None => Ok(()),
        };
        self.registry.retire(index);
        result
    }

    /// Remove finished transfers from the listing and return how many.
    pub fn refresh(&mut self) -> usize {
        let removed = self.registry.remove_terminal();
        if removed > 0 {
            tracing::debug!("Removed {} finished transfers", removed);
        }
        removed
    }

    /// Accept the download at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchTransfer`], [`Error::IllegalState`] or the
    /// transport's rejection.
    pub fn accept(&mut self, index: usize) -> Result<()> {
        self.with_record(index, |record, transport| record.accept(transport))
    }

    /// Decline the download at `index`.
    ///
    /// # Errors
    ///
    /// See [`accept`](Self::accept).
    pub fn decline(&mut self, index: usize) -> Result<()> {
        self.with_record(index, |record, transport| record.decline(transport))
    }

    /// Pause the transfer at `index`.
    ///
    /// # Errors
    ///
    /// See [`accept`](Self::accept).
    pub fn pause(&mut self, index: usize) -> Result<()> {
        self.with_record(index, |record, transport| record.pause(transport))
    }

    /// Continue the paused transfer at `index`.
    ///
    /// # Errors
    ///
    /// See [`accept`](Self::accept).
    pub fn resume(&mut self, index: usize) -> Result<()> {
        self.with_record(index, |record, transport| record.resume(transport))
    }

    /// Abort the transfer at `index`.
    ///
    /// # Errors
    ///
    /// See [`accept`](Self::accept).
    pub fn abort(&mut self, index: usize) -> Result<()> {
        self.with_record(index, |record, transport| record.abort(transport))
    }

    /// Run a parsed command.
    ///
    /// # Errors
    ///
    /// Returns the error of the command that was run.
    pub fn execute(&mut self, command: Command) -> Result<()> {
        tracing::debug!("Executing '{}'", command);
        match command {
            Command::Refresh => {
                self.refresh();
                Ok(())
            }
            Command::Accept(i) => self.accept(i),
            Command::Decline(i) => self.decline(i),
            Command::Pause(i) => self.pause(i),
            Command::Continue(i) => self.resume(i),
            Command::Abort(i) => self.abort(i),
        }
    }

    /// Remember a display name for `peer` and relabel its transfers.
    pub fn set_peer_name(&mut self, peer: PeerId, name: impl Into<String>) {
        let name = name.into();
        let renamed = self.registry.rename_peer(peer, &name);
        tracing::debug!("Peer {} is now '{}' ({} transfers)", peer, name, renamed);
        self.peer_names.insert(peer, name);
    }

    /// Display label for `peer`.
    #[must_use]
    pub fn peer_label(&self, peer: PeerId) -> String {
        self.peer_names
            .get(&peer)
            .cloned()
            .unwrap_or_else(|| format!("peer {peer}"))
    }

    /// One rendered line per transfer, in display order.
    #[must_use]
    pub fn progress_lines(&self) -> Vec<String> {
        let width = self.config.display.bar_width;
        self.registry
            .iter()
            .enumerate()
            .map(|(i, record)| record.progress_line(i, width))
            .collect()
    }

    /// Display values for every transfer, in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProgressView> {
        self.registry
            .iter()
            .enumerate()
            .map(|(i, record)| ProgressView::from_record(i, record))
            .collect()
    }

    /// Whether every transfer has finished.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.registry.active_count() == 0
    }

    /// Cancel all unfinished transfers with the transport and drop every
    /// record. Files on disk are left in place.
    ///
    /// Returns how many transfers were cancelled.
    pub fn teardown(&mut self) -> usize {
        let pending: Vec<_> = self
            .registry
            .iter()
            .filter_map(TransferRecord::key)
            .collect();

        for key in &pending {
            self.cancel_quietly(key.peer, key.transfer);
        }
        self.registry.clear();

        if !pending.is_empty() {
            tracing::info!("Cancelled {} unfinished transfers", pending.len());
        }
        pending.len()
    }

    fn register(&mut self, record: TransferRecord) -> usize {
        let label = self.peer_label(record.peer_id());
        let record = record
            .with_speed_window(self.config.transfer.speed_window)
            .with_peer_name(label);
        self.registry.insert(record)
    }

    fn lookup(&self, peer: PeerId, transfer: TransferId, what: &str) -> Option<usize> {
        let index = self.registry.position(peer, transfer);
        if index.is_none() {
            tracing::debug!(
                "Ignoring {} for unknown transfer #{} from peer {}",
                what,
                transfer,
                peer
            );
        }
        index
    }

    fn with_record<F>(&mut self, index: usize, op: F) -> Result<()>
    where
        F: FnOnce(&mut TransferRecord, &mut T) -> Result<()>,
    {
        let record = self
            .registry
            .get_mut(index)
            .ok_or(Error::NoSuchTransfer(index))?;
        let result = op(record, &mut self.transport);
        self.registry.retire(index);
        result
    }

    fn cancel_quietly(&mut self, peer: PeerId, transfer: TransferId) {
        if let Err(e) = self
            .transport
            .send_control(peer, transfer, ControlSignal::Cancel)
        {
            tracing::warn!("Failed to cancel #{} with peer {}: {}", transfer, peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferStatus;
    use crate::transport::{RecordingTransport, TransportCall};
    use tempfile::TempDir;

    fn session(dir: &TempDir) -> TransferSession<RecordingTransport> {
        let mut config = Config::default();
        config.transfer.download_dir = Some(dir.path().to_path_buf());
        TransferSession::new(RecordingTransport::default(), config)
    }

    #[test]
    fn test_unknown_transfer_events_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        session
            .on_control_received(1, 99, ControlSignal::Cancel)
            .unwrap();
        session.on_chunk_requested(1, 99, 0, 10).unwrap();
        session.on_chunk_delivered(1, 99, 0, b"abc").unwrap();

        assert!(session.transport().calls.is_empty());
        assert!(session.registry().is_empty());
    }

    #[test]
    fn test_out_of_range_index() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        assert!(matches!(session.accept(0), Err(Error::NoSuchTransfer(0))));
        assert!(matches!(
            session.execute(Command::Abort(3)),
            Err(Error::NoSuchTransfer(3))
        ));
    }

    #[test]
    fn test_send_file_offers_then_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, vec![0u8; 42]).unwrap();
        let mut session = session(&dir);

        let index = session.send_file(4, &path).unwrap();

        assert_eq!(
            session.transport().calls,
            [TransportCall::Offer {
                peer: 4,
                size: TransferSize::Known(42),
                name: "report.pdf".into(),
            }]
        );
        let record = session.registry().get(index).unwrap();
        assert_eq!(record.status(), TransferStatus::Requested);
        assert_eq!(record.transfer_id(), 0);
    }

    #[test]
    fn test_send_file_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        assert!(matches!(
            session.send_file(0, dir.path()),
            Err(Error::SourceUnreadable { .. })
        ));
        assert!(session.transport().calls.is_empty());
    }

    #[test]
    fn test_offer_with_bad_name_is_cancelled() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        let err = session
            .on_incoming_offer(2, 8, FileKind::Data, 10, "folder/")
            .unwrap_err();

        assert!(matches!(err, Error::InvalidFileName(_)));
        assert!(session.registry().is_empty());
        assert_eq!(
            session.transport().calls,
            [TransportCall::Control {
                peer: 2,
                transfer: 8,
                signal: ControlSignal::Cancel,
            }]
        );
    }

    #[test]
    fn test_peer_name_applies_to_new_records() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        session.set_peer_name(2, "carol");
        session
            .on_incoming_offer(2, 8, FileKind::Data, 10, "a.txt")
            .unwrap();

        assert_eq!(
            session.registry().get(0).unwrap().peer_display_name(),
            "carol"
        );
        assert!(session.progress_lines()[0].contains("(carol)"));
    }

    #[test]
    fn test_teardown_cancels_unfinished() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        session
            .on_incoming_offer(2, 8, FileKind::Data, 10, "a.txt")
            .unwrap();
        session
            .on_incoming_offer(2, 9, FileKind::Data, 10, "b.txt")
            .unwrap();
        session.decline(1).unwrap();
        session.transport_mut().calls.clear();

        assert_eq!(session.teardown(), 1);
        assert!(session.registry().is_empty());
        assert_eq!(
            session.transport().calls,
            [TransportCall::Control {
                peer: 2,
                transfer: 8,
                signal: ControlSignal::Cancel,
            }]
        );
        assert!(dir.path().join("a.txt").exists());
    }
}
