//! Error types for peerxfer.
//!
//! One error type covers the whole subsystem. Variants fall into four groups:
//! filesystem failures, transport rejections, command misuse and
//! configuration problems. None of them is fatal to the host; the worst case
//! is a stuck transfer that needs a manual abort.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::transfer::{LocalAction, TransferStatus};
use crate::transport::TransportError;

/// A specialized `Result` type for peerxfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for peerxfer.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End of file reached before a chunk could be filled
    #[error("short read at offset {position}: wanted {expected} bytes, got {actual}")]
    ReadShortfall {
        /// Offset the read started at
        position: u64,
        /// Bytes requested
        expected: usize,
        /// Bytes available before end of file
        actual: usize,
    },

    /// Chunk arguments do not describe a valid byte range
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// The record's file handle was already closed
    #[error("file handle for '{0}' is closed")]
    HandleClosed(String),

    /// A transport-supplied name has no usable file name component
    #[error("invalid file name: '{0}'")]
    InvalidFileName(String),

    /// No collision-free name could be found
    #[error("no free file name left for '{0}'")]
    NameSpaceExhausted(String),

    /// Outgoing file could not be opened
    #[error("cannot read '{}': {source}", path.display())]
    SourceUnreadable {
        /// Path that was requested
        path: PathBuf,
        /// Underlying failure
        source: io::Error,
    },

    /// Incoming file could not be created
    #[error("cannot create '{}': {source}", path.display())]
    DestinationUnavailable {
        /// Path that was resolved for the download
        path: PathBuf,
        /// Underlying failure
        source: io::Error,
    },

    /// Command issued against a transfer in the wrong state
    #[error("cannot {action} a transfer that is {status}")]
    IllegalState {
        /// The rejected command
        action: LocalAction,
        /// Status at the time of the command
        status: TransferStatus,
    },

    /// Display index does not refer to a transfer
    #[error("no transfer at index {0}")]
    NoSuchTransfer(usize),

    /// Command line could not be parsed
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The transport rejected a call
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Returns whether the transport may retry the operation that failed.
    ///
    /// Chunk-level failures leave the transfer in progress, so a re-requested
    /// or re-delivered chunk can still succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ReadShortfall { .. } | Self::Transport(_)
        )
    }

    /// Returns whether the error was caused by a rejected user command.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::IllegalState { .. } | Self::NoSuchTransfer(_) | Self::InvalidCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_state_message() {
        let err = Error::IllegalState {
            action: LocalAction::Pause,
            status: TransferStatus::Requested,
        };
        assert_eq!(err.to_string(), "cannot pause a transfer that is requested");
        assert!(err.is_user_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_shortfall_is_recoverable() {
        let err = Error::ReadShortfall {
            position: 10,
            expected: 4,
            actual: 1,
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("offset 10"));
    }
}
