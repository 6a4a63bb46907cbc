//! Common test utilities for `peerxfer` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use peerxfer_core::config::Config;
use peerxfer_core::session::TransferSession;

pub use peerxfer_core::transport::RecordingTransport;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Configuration that downloads into `dir`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.transfer.download_dir = Some(dir.to_path_buf());
    config
}

/// Session over a [`RecordingTransport`] that downloads into `dir`.
pub fn recording_session(dir: &Path) -> TransferSession<RecordingTransport> {
    TransferSession::new(RecordingTransport::default(), test_config(dir))
}
