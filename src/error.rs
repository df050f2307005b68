//! Error types for usb-installer
//!
//! This module provides the error taxonomy shared by fetching and provisioning:
//! - Input validation failures detected before any work starts
//! - Transfer failures (network, HTTP status, file type, local I/O)
//! - Cancellation, reported as its own terminal outcome
//! - Provisioning stage failures carrying the external command's output
//! - Unmet provisioning preconditions

use crate::types::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for usb-installer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usb-installer
///
/// Every variant renders a message suitable for showing to a user verbatim.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input, detected synchronously before any work starts
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Which input was rejected (e.g., "source", "destination", "device")
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Download failed; the partial file has already been removed
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// Download was cancelled by the caller; the partial file has been removed
    #[error("transfer cancelled")]
    Cancelled,

    /// An external provisioning command failed; later stages were not attempted
    #[error("{stage} stage failed{}: {output}", exit_code_suffix(.exit_code))]
    StageFailed {
        /// The stage that failed
        stage: Stage,
        /// Process exit code, `None` if the process could not be started or was killed
        exit_code: Option<i32>,
        /// Captured command output (stderr, falling back to stdout) or the spawn error
        output: String,
    },

    /// Provisioning was requested without a usable image, device, or EFI folder
    #[error("precondition not met: {0}")]
    PreconditionUnmet(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No async runtime was available to run background work
    #[error("runtime error: {0}")]
    Runtime(String),
}

fn exit_code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {})", code),
        None => String::new(),
    }
}

/// Reasons a fetch reaches the Failed state
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection, timeout, or body read failure
    #[error("network error fetching {url}: {reason}")]
    Network {
        /// The URL being fetched
        url: String,
        /// Underlying transport error
        reason: String,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The HTTP status code returned
        status: u16,
        /// The URL being fetched
        url: String,
    },

    /// URL does not name a supported image type (extension filter)
    #[error("unsupported file type for {url}: expected one of {}", .supported.join(", "))]
    UnsupportedFileType {
        /// The URL that was rejected
        url: String,
        /// The extensions that would have been accepted
        supported: Vec<String>,
    },

    /// Body length disagrees with the declared Content-Length
    #[error("received {received} bytes but server declared {expected}")]
    LengthMismatch {
        /// Declared length
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Not enough free space in the destination directory for the declared length
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the download
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Writing the destination file failed
    #[error("failed to write {path}: {reason}")]
    Io {
        /// The destination file
        path: PathBuf,
        /// Underlying I/O error
        reason: String,
    },

    /// The worker stopped unexpectedly (panic or abort)
    #[error("fetch worker terminated unexpectedly: {0}")]
    WorkerLost(String),
}

impl Error {
    /// Whether this error represents a user-initiated cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The failing stage, if this error came from the provisioning pipeline
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Machine-readable error code for presentation layers
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. } => "invalid_input",
            Error::Transfer(_) => "transfer_failed",
            Error::Cancelled => "cancelled",
            Error::StageFailed { .. } => "stage_failed",
            Error::PreconditionUnmet(_) => "precondition_unmet",
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Runtime(_) => "runtime_error",
        }
    }
}

impl TransferError {
    /// Machine-readable reason code, distinguishing failure kinds
    pub fn reason_code(&self) -> &'static str {
        match self {
            TransferError::Network { .. } => "network",
            TransferError::HttpStatus { .. } => "http_status",
            TransferError::UnsupportedFileType { .. } => "unsupported_file_type",
            TransferError::LengthMismatch { .. } => "length_mismatch",
            TransferError::InsufficientSpace { .. } => "insufficient_space",
            TransferError::Io { .. } => "io",
            TransferError::WorkerLost(_) => "worker_lost",
        }
    }
}
