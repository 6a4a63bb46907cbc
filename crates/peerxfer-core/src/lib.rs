//! # peerxfer Core Library
//!
//! `peerxfer-core` implements the file-transfer subsystem of a chat bridge
//! that talks to a peer-to-peer messaging transport. It turns the transport's
//! chunk-oriented events into resumable, user-controllable transfers.
//!
//! ## Features
//!
//! - **Offset-addressed chunk I/O**: seek-based reads and writes that tolerate
//!   short operations
//! - **Explicit state machine**: accept, decline, pause, continue and abort
//!   with per-state guards
//! - **Collision-safe downloads**: incoming files never overwrite existing ones
//! - **Progress accounting**: cached throughput estimate and display values
//!
//! ## Modules
//!
//! - [`command`] - Parser for the transfer command surface
//! - [`config`] - Configuration management
//! - [`error`] - Error type shared by the whole crate
//! - [`mod@file`] - Destination naming and chunk I/O
//! - [`session`] - Event adapter between the transport and the registry
//! - [`transfer`] - Transfer records, registry, state machine and progress
//! - [`transport`] - Transport collaborator trait and an in-memory loopback
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerxfer_core::session::TransferSession;
//!
//! let mut session = TransferSession::new(transport, config);
//! session.on_incoming_offer(0, 7, FileKind::Data, 3000, "notes.txt")?;
//! session.accept(0)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod command;
pub mod config;
pub mod error;
pub mod file;
pub mod session;
pub mod transfer;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size used by the loopback transport (bytes)
pub const DEFAULT_CHUNK_SIZE: usize = 1371;

/// Raw size value transports use to announce a stream of unknown length
pub const UNBOUNDED_SIZE: u64 = u64::MAX;
