//! Transport collaborator for peerxfer.
//!
//! The messaging transport owns framing, encryption and peer connectivity.
//! This crate only needs three calls from it, captured by [`Transport`]. The
//! transport reports events back through
//! [`TransferSession`](crate::session::TransferSession).
//!
//! [`loopback`] provides an in-memory link between two sessions, used by the
//! CLI and by tests. [`RecordingTransport`] only records what it is asked to
//! send.

pub mod loopback;

pub use loopback::{LinkEvent, Loopback, LoopbackEndpoint, Side};

use thiserror::Error;

use crate::transfer::{ControlSignal, PeerId, TransferId, TransferSize};

/// A call rejected by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport rejected {operation}: {reason}")]
pub struct TransportError {
    /// Name of the rejected call
    pub operation: &'static str,
    /// Transport-supplied reason
    pub reason: String,
}

impl TransportError {
    /// Create an error for `operation`.
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// Outbound calls the transfer subsystem makes into the transport.
pub trait Transport {
    /// Offer a file to `peer` and return the transfer id the transport
    /// assigned to it.
    fn begin_send(
        &mut self,
        peer: PeerId,
        size: TransferSize,
        suggested_name: &str,
    ) -> Result<TransferId, TransportError>;

    /// Send a control signal for an active transfer.
    fn send_control(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        signal: ControlSignal,
    ) -> Result<(), TransportError>;

    /// Push upload bytes starting at `offset`.
    fn push_chunk(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn begin_send(
        &mut self,
        peer: PeerId,
        size: TransferSize,
        suggested_name: &str,
    ) -> Result<TransferId, TransportError> {
        (**self).begin_send(peer, size, suggested_name)
    }

    fn send_control(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        signal: ControlSignal,
    ) -> Result<(), TransportError> {
        (**self).send_control(peer, transfer, signal)
    }

    fn push_chunk(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), TransportError> {
        (**self).push_chunk(peer, transfer, offset, data)
    }
}

/// A recorded outbound call, for transport doubles and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `begin_send`
    Offer {
        /// Receiving peer
        peer: PeerId,
        /// Announced size
        size: TransferSize,
        /// Announced name
        name: String,
    },
    /// `send_control`
    Control {
        /// Target peer
        peer: PeerId,
        /// Target transfer
        transfer: TransferId,
        /// Signal sent
        signal: ControlSignal,
    },
    /// `push_chunk`
    Chunk {
        /// Target peer
        peer: PeerId,
        /// Target transfer
        transfer: TransferId,
        /// Offset of the first byte
        offset: u64,
        /// Bytes pushed
        data: Vec<u8>,
    },
}

/// Transport that records every outbound call instead of sending it.
///
/// Transfer ids are handed out from 0 upwards. Setting `reject` makes every
/// call fail without being recorded.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Calls accepted so far, oldest first
    pub calls: Vec<TransportCall>,
    /// Fail every call
    pub reject: bool,
    pub(crate) next_id: TransferId,
}

impl RecordingTransport {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `push_chunk` calls as `(offset, data)`.
    #[must_use]
    pub fn chunks(&self) -> Vec<(u64, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Chunk { offset, data, .. } => Some((*offset, data.clone())),
                _ => None,
            })
            .collect()
    }

    /// Recorded `send_control` signals.
    #[must_use]
    pub fn signals(&self) -> Vec<ControlSignal> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Control { signal, .. } => Some(*signal),
                _ => None,
            })
            .collect()
    }

    fn check(&self, operation: &'static str) -> Result<(), TransportError> {
        if self.reject {
            Err(TransportError::new(operation, "link down"))
        } else {
            Ok(())
        }
    }
}

impl Transport for RecordingTransport {
    fn begin_send(
        &mut self,
        peer: PeerId,
        size: TransferSize,
        suggested_name: &str,
    ) -> Result<TransferId, TransportError> {
        self.check("begin_send")?;
        let id = self.next_id;
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| TransportError::new("begin_send", "out of transfer ids"))?;
        self.calls.push(TransportCall::Offer {
            peer,
            size,
            name: suggested_name.to_string(),
        });
        Ok(id)
    }

    fn send_control(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        signal: ControlSignal,
    ) -> Result<(), TransportError> {
        self.check("send_control")?;
        self.calls.push(TransportCall::Control {
            peer,
            transfer,
            signal,
        });
        Ok(())
    }

    fn push_chunk(
        &mut self,
        peer: PeerId,
        transfer: TransferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.check("push_chunk")?;
        self.calls.push(TransportCall::Chunk {
            peer,
            transfer,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }
}
