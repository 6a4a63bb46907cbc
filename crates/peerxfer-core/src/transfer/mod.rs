//! Transfer bookkeeping for peerxfer.
//!
//! This module holds everything that describes a transfer once it exists:
//!
//! - [`record`] - The per-transfer data entity and its constructors
//! - [`machine`] - Legal status transitions and their side effects
//! - [`registry`] - Ordered ownership of all records of a session
//! - [`progress`] - Throughput sampling and display values
//!
//! ## Status Transitions
//!
//! ```text
//! Requested --accept--> InProgress <--pause/continue--> Paused
//!     |                     |
//!  decline            abort / cancel / zero-length chunk
//!     v                     v
//! Declined        Declined | Aborted | Done
//! ```
//!
//! `Done`, `Declined` and `Aborted` are terminal.

pub mod machine;
pub mod progress;
pub mod record;
pub mod registry;

pub use progress::{format_size, ProgressView, SpeedMeter};
pub use record::TransferRecord;
pub use registry::TransferRegistry;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport-assigned peer identifier.
pub type PeerId = u32;

/// Transport-assigned transfer identifier, unique per peer while active.
pub type TransferId = u32;

/// Identifies an active transfer for event dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey {
    /// Peer on the other end
    pub peer: PeerId,
    /// Transfer number assigned by the transport
    pub transfer: TransferId,
}

impl TransferKey {
    /// Create a key from its parts.
    #[must_use]
    pub const fn new(peer: PeerId, transfer: TransferId) -> Self {
        Self { peer, transfer }
    }
}

/// Transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Offered, waiting for a decision
    Requested,
    /// Moving data
    InProgress,
    /// Held by one of the sides
    Paused,
    /// All bytes moved
    Done,
    /// Cancelled before any data moved
    Declined,
    /// Cancelled after some data moved
    Aborted,
}

impl TransferStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Declined | Self::Aborted)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Requested => "requested",
            Self::InProgress => "in progress",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Declined => "declined",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Receiving a file from the peer
    Download,
    /// Sending a file to the peer
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

/// Control signals exchanged with the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Start or continue moving data
    Resume,
    /// Hold the transfer
    Pause,
    /// Stop the transfer for good
    Cancel,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume => f.write_str("resume"),
            Self::Pause => f.write_str("pause"),
            Self::Cancel => f.write_str("cancel"),
        }
    }
}

/// Kind of an incoming offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Ordinary file data
    Data,
    /// Profile picture; handled elsewhere
    Avatar,
}

/// Total length of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSize {
    /// Length known up front
    Known(u64),
    /// Stream of unknown length
    Unbounded,
}

impl TransferSize {
    /// Interpret a raw transport value, mapping the sentinel to `Unbounded`.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        if raw == crate::UNBOUNDED_SIZE {
            Self::Unbounded
        } else {
            Self::Known(raw)
        }
    }

    /// Known length, if any.
    #[must_use]
    pub const fn known(self) -> Option<u64> {
        match self {
            Self::Known(n) => Some(n),
            Self::Unbounded => None,
        }
    }

    /// Whether this is a stream of unknown length.
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

/// Local commands a user can issue against a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAction {
    /// Accept an offered download
    Accept,
    /// Refuse an offered download
    Decline,
    /// Hold a running transfer
    Pause,
    /// Continue a paused transfer
    Continue,
    /// Cancel a running transfer
    Abort,
}

impl fmt::Display for LocalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Pause => "pause",
            Self::Continue => "continue",
            Self::Abort => "abort",
        };
        f.write_str(verb)
    }
}
