//! Transfer state machine.
//!
//! Local commands and transport events feed the same machine. Local commands
//! are guarded: each one is legal from exactly one status and fails with
//! [`Error::IllegalState`] otherwise, without side effects. For local commands
//! the control signal goes out first, and the local status only changes once
//! the transport has taken it.
//!
//! Cancelling, whether locally or by the peer, ends in `Declined` when no
//! data has moved yet and in `Aborted` otherwise.

use std::time::Instant;

use crate::error::{Error, Result};
use crate::transport::Transport;

use super::record::PauseOrigin;
use super::{ControlSignal, Direction, LocalAction, TransferRecord, TransferStatus};

impl TransferRecord {
    /// Accept an offered transfer.
    ///
    /// # Errors
    ///
    /// Fails unless the transfer is `Requested`, or if the transport rejects
    /// the resume signal.
    pub fn accept<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.guard(LocalAction::Accept, TransferStatus::Requested)?;
        self.send(transport, ControlSignal::Resume)?;

        self.status = TransferStatus::InProgress;
        self.speed.restart(Instant::now());
        tracing::info!("Accepted '{}' from {}", self.display_name, self.peer_display_name);
        Ok(())
    }

    /// Refuse an offered transfer.
    ///
    /// # Errors
    ///
    /// Fails unless the transfer is `Requested`, or if the transport rejects
    /// the cancel signal.
    pub fn decline<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.guard(LocalAction::Decline, TransferStatus::Requested)?;
        self.send(transport, ControlSignal::Cancel)?;

        self.terminate(TransferStatus::Declined, true);
        Ok(())
    }

    /// Put a running transfer on hold.
    ///
    /// # Errors
    ///
    /// Fails unless the transfer is `InProgress`, or if the transport rejects
    /// the pause signal.
    pub fn pause<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.guard(LocalAction::Pause, TransferStatus::InProgress)?;
        self.send(transport, ControlSignal::Pause)?;

        self.status = TransferStatus::Paused;
        self.pause_origin = Some(PauseOrigin::Local);
        tracing::info!("Paused '{}'", self.display_name);
        Ok(())
    }

    /// Continue a paused transfer.
    ///
    /// # Errors
    ///
    /// Fails unless the transfer is `Paused`, or if the transport rejects
    /// the resume signal.
    pub fn resume<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.guard(LocalAction::Continue, TransferStatus::Paused)?;
        self.send(transport, ControlSignal::Resume)?;

        self.status = TransferStatus::InProgress;
        self.pause_origin = None;
        tracing::info!("Continued '{}'", self.display_name);
        Ok(())
    }

    /// Cancel a running transfer.
    ///
    /// Partial downloads are removed unless the transfer is a stream of
    /// unknown length, where the received prefix is still useful.
    ///
    /// # Errors
    ///
    /// Fails unless the transfer is `InProgress`, or if the transport rejects
    /// the cancel signal.
    pub fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.guard(LocalAction::Abort, TransferStatus::InProgress)?;
        self.send(transport, ControlSignal::Cancel)?;

        self.terminate(self.cancelled_status(), !self.size.is_unbounded());
        Ok(())
    }

    /// React to a control signal from the peer.
    ///
    /// A remote resume never lifts a local pause of an upload.
    pub fn on_control(&mut self, signal: ControlSignal) {
        if self.status.is_terminal() {
            tracing::debug!("Ignoring {} for finished '{}'", signal, self.display_name);
            return;
        }

        match signal {
            ControlSignal::Cancel => {
                self.terminate(self.cancelled_status(), !self.size.is_unbounded());
            }
            ControlSignal::Pause => {
                self.status = TransferStatus::Paused;
                self.pause_origin.get_or_insert(PauseOrigin::Remote);
                tracing::info!("Peer paused '{}'", self.display_name);
            }
            ControlSignal::Resume => {
                if self.direction == Direction::Upload
                    && self.pause_origin == Some(PauseOrigin::Local)
                {
                    tracing::warn!(
                        "Peer tried to resume '{}', which is paused locally",
                        self.display_name
                    );
                    return;
                }
                if self.position == 0 {
                    self.speed.restart(Instant::now());
                }
                self.status = TransferStatus::InProgress;
                self.pause_origin = None;
                tracing::info!("Peer resumed '{}'", self.display_name);
            }
        }
    }

    /// Serve a chunk request for an upload.
    ///
    /// A zero `length` completes the transfer, even while it is paused.
    /// Requests for an upload that is offered or paused by the peer resume it
    /// implicitly; requests for an upload paused locally are ignored.
    ///
    /// # Errors
    ///
    /// Returns the read or transport error. The status and position are left
    /// unchanged so the transport can ask again.
    pub fn on_chunk_requested<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        offset: u64,
        length: usize,
        now: Instant,
    ) -> Result<()> {
        if self.direction != Direction::Upload {
            tracing::warn!("Chunk requested for download '{}'", self.display_name);
            return Ok(());
        }

        if length == 0 && !self.status.is_terminal() {
            self.terminate(TransferStatus::Done, false);
            return Ok(());
        }

        match (self.status, self.pause_origin) {
            (TransferStatus::InProgress, _) => {}
            (TransferStatus::Paused, Some(PauseOrigin::Local)) => {
                tracing::warn!(
                    "Ignoring chunk request for locally paused '{}'",
                    self.display_name
                );
                return Ok(());
            }
            (TransferStatus::Requested | TransferStatus::Paused, _) => {
                tracing::debug!("Chunk request resumes '{}'", self.display_name);
                if self.position == 0 {
                    self.speed.restart(now);
                }
                self.status = TransferStatus::InProgress;
                self.pause_origin = None;
            }
            (status, _) => {
                tracing::debug!(
                    "Ignoring chunk request for '{}' ({})",
                    self.display_name,
                    status
                );
                return Ok(());
            }
        }

        let data = self.read_chunk(offset, length).inspect_err(|e| {
            tracing::warn!("Failed to read chunk of '{}': {}", self.display_name, e);
        })?;
        transport.push_chunk(self.peer_id, self.transfer_id, offset, &data)?;

        tracing::debug!(
            "Sent {} bytes of '{}' at offset {}",
            length,
            self.display_name,
            offset
        );
        self.advance(length as u64, now);
        Ok(())
    }

    /// Store a chunk delivered for a download.
    ///
    /// Empty `data` completes the transfer. Chunks that were already in
    /// flight when the download was paused are still stored; chunks for a
    /// download that has not been accepted are dropped.
    ///
    /// # Errors
    ///
    /// Returns the write error; the status and position are left unchanged.
    pub fn on_chunk_delivered(&mut self, offset: u64, data: &[u8], now: Instant) -> Result<()> {
        if self.direction != Direction::Download {
            tracing::warn!("Chunk delivered for upload '{}'", self.display_name);
            return Ok(());
        }

        if !matches!(
            self.status,
            TransferStatus::InProgress | TransferStatus::Paused
        ) {
            tracing::warn!(
                "Dropping {} bytes for '{}' ({})",
                data.len(),
                self.display_name,
                self.status
            );
            return Ok(());
        }

        if data.is_empty() {
            if let Some(total) = self.size.known().filter(|&total| total != self.position) {
                tracing::warn!(
                    "'{}' finished at {} of {} bytes",
                    self.display_name,
                    self.position,
                    total
                );
            }
            self.terminate(TransferStatus::Done, false);
            return Ok(());
        }

        self.write_chunk(data, offset, data.len()).inspect_err(|e| {
            tracing::warn!("Failed to write chunk of '{}': {}", self.display_name, e);
        })?;

        tracing::debug!(
            "Stored {} bytes of '{}' at offset {}",
            data.len(),
            self.display_name,
            offset
        );
        self.advance(data.len() as u64, now);
        Ok(())
    }

    fn guard(&self, action: LocalAction, required: TransferStatus) -> Result<()> {
        if self.status == required {
            Ok(())
        } else {
            Err(Error::IllegalState {
                action,
                status: self.status,
            })
        }
    }

    fn send<T: Transport + ?Sized>(&self, transport: &mut T, signal: ControlSignal) -> Result<()> {
        transport
            .send_control(self.peer_id, self.transfer_id, signal)
            .map_err(Error::from)
    }

    const fn cancelled_status(&self) -> TransferStatus {
        if self.position == 0 {
            TransferStatus::Declined
        } else {
            TransferStatus::Aborted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferSize;
    use crate::transport::{RecordingTransport, TransportCall};
    use tempfile::TempDir;

    fn incoming(dir: &TempDir, size: u64) -> TransferRecord {
        TransferRecord::create_incoming(2, 5, dir.path(), "in.bin", TransferSize::from_raw(size))
            .unwrap()
    }

    fn outgoing(dir: &TempDir, content: &[u8]) -> TransferRecord {
        let path = dir.path().join("out.bin");
        std::fs::write(&path, content).unwrap();
        TransferRecord::create_outgoing(2, 6, &path, TransferSize::Known(content.len() as u64))
            .unwrap()
    }

    #[test]
    fn test_requested_rejects_other_commands() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport::default();

        for result in [
            record.pause(&mut transport),
            record.resume(&mut transport),
            record.abort(&mut transport),
        ] {
            assert!(matches!(
                result,
                Err(Error::IllegalState {
                    status: TransferStatus::Requested,
                    ..
                })
            ));
        }
        assert_eq!(record.status(), TransferStatus::Requested);
        assert!(transport.calls.is_empty());
    }

    #[test]
    fn test_accept_sends_resume() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();

        assert_eq!(record.status(), TransferStatus::InProgress);
        assert_eq!(
            transport.calls,
            vec![TransportCall::Control {
                peer: 2,
                transfer: 5,
                signal: ControlSignal::Resume
            }]
        );
        assert!(record.accept(&mut transport).is_err());
    }

    #[test]
    fn test_decline_removes_file() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let path = record.local_path().to_path_buf();
        let mut transport = RecordingTransport::default();

        record.decline(&mut transport).unwrap();

        assert_eq!(record.status(), TransferStatus::Declined);
        assert!(!record.is_open());
        assert!(!path.exists());
    }

    #[test]
    fn test_transport_rejection_keeps_status() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport {
            reject: true,
            ..RecordingTransport::default()
        };

        assert!(matches!(
            record.decline(&mut transport),
            Err(Error::Transport(_))
        ));
        assert_eq!(record.status(), TransferStatus::Requested);
        assert!(record.is_open());
        assert!(record.local_path().exists());
    }

    #[test]
    fn test_pause_and_continue() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.pause(&mut transport).unwrap();
        assert_eq!(record.status(), TransferStatus::Paused);
        assert_eq!(record.pause_origin(), Some(PauseOrigin::Local));
        assert!(record.pause(&mut transport).is_err());

        record.resume(&mut transport).unwrap();
        assert_eq!(record.status(), TransferStatus::InProgress);
        assert_eq!(transport.calls.len(), 3);
    }

    #[test]
    fn test_abort_before_progress_is_declined() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.abort(&mut transport).unwrap();

        assert_eq!(record.status(), TransferStatus::Declined);
    }

    #[test]
    fn test_abort_after_progress_is_aborted() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let path = record.local_path().to_path_buf();
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();
        record.abort(&mut transport).unwrap();

        assert_eq!(record.status(), TransferStatus::Aborted);
        assert!(!path.exists());
        assert!(record.key().is_none());
    }

    #[test]
    fn test_abort_keeps_partial_stream() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, u64::MAX);
        let path = record.local_path().to_path_buf();
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();
        record.abort(&mut transport).unwrap();

        assert_eq!(record.status(), TransferStatus::Aborted);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn test_remote_cancel() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();
        record.on_control(ControlSignal::Cancel);

        assert_eq!(record.status(), TransferStatus::Aborted);
        assert!(!record.is_open());

        record.on_control(ControlSignal::Resume);
        assert_eq!(record.status(), TransferStatus::Aborted);
    }

    #[test]
    fn test_remote_pause_and_resume() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.on_control(ControlSignal::Pause);
        assert_eq!(record.status(), TransferStatus::Paused);
        assert_eq!(record.pause_origin(), Some(PauseOrigin::Remote));

        record.on_control(ControlSignal::Resume);
        assert_eq!(record.status(), TransferStatus::InProgress);
    }

    #[test]
    fn test_remote_resume_starts_offered_download() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);

        record.on_control(ControlSignal::Resume);
        assert_eq!(record.status(), TransferStatus::InProgress);

        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();
        assert_eq!(record.position(), 3);
    }

    #[test]
    fn test_remote_pause_then_resume_of_offer() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);

        record.on_control(ControlSignal::Pause);
        assert_eq!(record.status(), TransferStatus::Paused);

        record.on_control(ControlSignal::Resume);
        assert_eq!(record.status(), TransferStatus::InProgress);
    }

    #[test]
    fn test_remote_resume_does_not_lift_local_upload_pause() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"0123456789");
        let mut transport = RecordingTransport::default();

        record.on_control(ControlSignal::Resume);
        assert_eq!(record.status(), TransferStatus::InProgress);

        record.pause(&mut transport).unwrap();
        record.on_control(ControlSignal::Resume);
        assert_eq!(record.status(), TransferStatus::Paused);

        record
            .on_chunk_requested(&mut transport, 0, 4, Instant::now())
            .unwrap();
        assert_eq!(record.status(), TransferStatus::Paused);
        assert_eq!(record.position(), 0);
    }

    #[test]
    fn test_chunk_request_serves_bytes() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"0123456789");
        let mut transport = RecordingTransport::default();

        record.on_control(ControlSignal::Resume);
        record
            .on_chunk_requested(&mut transport, 4, 3, Instant::now())
            .unwrap();

        assert_eq!(record.position(), 3);
        assert_eq!(
            transport.calls,
            vec![TransportCall::Chunk {
                peer: 2,
                transfer: 6,
                offset: 4,
                data: b"456".to_vec()
            }]
        );
    }

    #[test]
    fn test_chunk_request_implicitly_resumes_offer() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"0123456789");
        let mut transport = RecordingTransport::default();

        record
            .on_chunk_requested(&mut transport, 0, 2, Instant::now())
            .unwrap();
        assert_eq!(record.status(), TransferStatus::InProgress);
        assert_eq!(record.position(), 2);
    }

    #[test]
    fn test_chunk_request_read_failure_keeps_state() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"0123456789");
        let mut transport = RecordingTransport::default();

        record.on_control(ControlSignal::Resume);
        let err = record
            .on_chunk_requested(&mut transport, 8, 5, Instant::now())
            .unwrap_err();

        assert!(matches!(err, Error::ReadShortfall { .. }));
        assert_eq!(record.status(), TransferStatus::InProgress);
        assert_eq!(record.position(), 0);
        assert!(transport.calls.is_empty());
    }

    #[test]
    fn test_chunk_request_push_failure_keeps_position() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"0123456789");
        let mut transport = RecordingTransport {
            reject: true,
            ..RecordingTransport::default()
        };

        record.on_control(ControlSignal::Resume);
        let err = record
            .on_chunk_requested(&mut transport, 0, 5, Instant::now())
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(record.position(), 0);
        assert_eq!(record.status(), TransferStatus::InProgress);
    }

    #[test]
    fn test_zero_length_request_completes_upload() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"01");
        let mut transport = RecordingTransport::default();

        record.on_control(ControlSignal::Resume);
        record
            .on_chunk_requested(&mut transport, 0, 2, Instant::now())
            .unwrap();
        record
            .on_chunk_requested(&mut transport, 2, 0, Instant::now())
            .unwrap();

        assert_eq!(record.status(), TransferStatus::Done);
        assert!(!record.is_open());
        assert!(record.key().is_none());
        assert!(record.local_path().exists());
    }

    #[test]
    fn test_delivery_before_accept_is_dropped() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);

        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();

        assert_eq!(record.position(), 0);
        assert!(std::fs::read(record.local_path()).unwrap().is_empty());
    }

    #[test]
    fn test_delivery_while_paused_is_stored() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 6);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.pause(&mut transport).unwrap();
        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();

        assert_eq!(record.status(), TransferStatus::Paused);
        assert_eq!(record.position(), 3);

        record.resume(&mut transport).unwrap();
        record.on_chunk_delivered(3, b"def", Instant::now()).unwrap();
        record.on_chunk_delivered(6, b"", Instant::now()).unwrap();

        assert_eq!(record.status(), TransferStatus::Done);
        assert_eq!(std::fs::read(record.local_path()).unwrap(), b"abcdef");
    }

    #[test]
    fn test_zero_length_request_completes_paused_upload() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"01");
        let mut transport = RecordingTransport::default();

        record.on_control(ControlSignal::Resume);
        record
            .on_chunk_requested(&mut transport, 0, 2, Instant::now())
            .unwrap();
        record.pause(&mut transport).unwrap();
        record
            .on_chunk_requested(&mut transport, 2, 0, Instant::now())
            .unwrap();

        assert_eq!(record.status(), TransferStatus::Done);
    }

    #[test]
    fn test_accept_restarts_speed_window() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 10);
        let created = record.speed.last_sample_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let before_accept = Instant::now();

        record.accept(&mut RecordingTransport::default()).unwrap();

        assert!(record.speed.last_sample_time() >= before_accept);
        assert!(record.speed.last_sample_time() > created);
    }

    #[test]
    fn test_first_chunk_request_restarts_speed_window() {
        let dir = TempDir::new().unwrap();
        let mut record = outgoing(&dir, b"0123456789");
        let later = record.speed.last_sample_time() + std::time::Duration::from_secs(30);

        record
            .on_chunk_requested(&mut RecordingTransport::default(), 0, 2, later)
            .unwrap();

        assert_eq!(record.speed.last_sample_time(), later);
        assert_eq!(record.speed.bytes_since_sample(), 2);
        assert!(record.speed().abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_delivery_completes_download() {
        let dir = TempDir::new().unwrap();
        let mut record = incoming(&dir, 3);
        let mut transport = RecordingTransport::default();

        record.accept(&mut transport).unwrap();
        record.on_chunk_delivered(0, b"abc", Instant::now()).unwrap();
        record.on_chunk_delivered(3, b"", Instant::now()).unwrap();

        assert_eq!(record.status(), TransferStatus::Done);
        assert_eq!(std::fs::read(record.local_path()).unwrap(), b"abc");
    }
}
