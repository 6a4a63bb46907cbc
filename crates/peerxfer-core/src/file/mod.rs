//! File operations for peerxfer.
//!
//! This module handles:
//! - Stripping directory components from transport-supplied names
//! - Choosing collision-free destinations for downloads
//! - Offset-addressed chunk reads and writes
//!
//! ## Shared Download Directory
//!
//! All incoming transfers land in one directory. The uniqueness check in
//! [`unique_destination`] is the only synchronization point, which holds
//! under the single-threaded session model but not against other processes
//! writing into the same directory.

pub mod chunk;
pub mod naming;

pub use chunk::{read_chunk, write_chunk};
pub use naming::{strip_directory, unique_destination};
