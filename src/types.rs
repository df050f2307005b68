//! Core types and events

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of a fetch task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    /// Created but not yet started
    Idle = 0,
    /// Transfer in progress
    Running = 1,
    /// Cancelled by the caller (terminal)
    Cancelled = 2,
    /// Transfer finished and the file is on disk (terminal)
    Completed = 3,
    /// Transfer failed (terminal)
    Failed = 4,
}

impl FetchState {
    /// Convert from the atomic representation
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => FetchState::Running,
            2 => FetchState::Cancelled,
            3 => FetchState::Completed,
            4 => FetchState::Failed,
            _ => FetchState::Idle,
        }
    }

    /// Convert to the atomic representation
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether no further transition can occur
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FetchState::Cancelled | FetchState::Completed | FetchState::Failed
        )
    }
}

/// Provisioning stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Reformat the target device
    Erase,
    /// Raw block copy of the image onto the device, followed by a sync
    WriteImage,
    /// Copy EFI boot files onto the device's boot partition
    CopyBootFiles,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 3] = [Stage::Erase, Stage::WriteImage, Stage::CopyBootFiles];

    /// Stable name used in messages and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Erase => "erase",
            Stage::WriteImage => "write-image",
            Stage::CopyBootFiles => "copy-boot-files",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download progress as seen by observers
///
/// When the server does not declare a length no percentage can be derived,
/// so observers get [`Progress::Indeterminate`] instead of a made-up value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    /// Total size known; `percent` is `floor(transferred * 100 / expected)`, at most 100
    Percent {
        /// Percentage complete (0..=100)
        percent: u8,
    },
    /// Total size unknown
    Indeterminate {
        /// Bytes written so far
        bytes_transferred: u64,
    },
}

impl Progress {
    /// Derive progress from byte counters
    ///
    /// An expected length of `None` or zero is treated as unknown.
    pub fn from_bytes(bytes_transferred: u64, bytes_expected: Option<u64>) -> Self {
        match bytes_expected {
            Some(expected) if expected > 0 => {
                let percent = (u128::from(bytes_transferred) * 100 / u128::from(expected)).min(100);
                Progress::Percent {
                    percent: percent as u8,
                }
            }
            _ => Progress::Indeterminate { bytes_transferred },
        }
    }

    /// The percentage, if the total size is known
    pub fn percent(&self) -> Option<u8> {
        match self {
            Progress::Percent { percent } => Some(*percent),
            Progress::Indeterminate { .. } => None,
        }
    }
}

/// Point-in-time view of a fetch task, for polling callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSnapshot {
    /// Current state
    pub state: FetchState,
    /// Bytes written to the destination so far
    pub bytes_transferred: u64,
    /// Declared total size, if the server sent one
    pub bytes_expected: Option<u64>,
    /// Derived progress
    pub progress: Progress,
}

/// Summary of a completed fetch
#[must_use]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchReport {
    /// The URL that was fetched
    pub source: String,
    /// Where the image was written
    pub destination: PathBuf,
    /// Final size in bytes
    pub bytes_transferred: u64,
    /// Declared size, if any
    pub bytes_expected: Option<u64>,
    /// Wall-clock transfer time
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

/// Summary of a successful provisioning run
#[must_use]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// The device that was provisioned
    pub device: String,
    /// Stages that ran, in order
    pub stages: Vec<Stage>,
    /// Boot location the EFI files were copied to, when that stage ran
    pub boot_location: Option<PathBuf>,
}

/// Event emitted during fetch and provisioning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Response headers received; `total` is `None` when the size is unknown
    FetchStarted {
        /// Source URL
        url: String,
        /// Declared total size
        total: Option<u64>,
    },

    /// A chunk was written to the destination
    FetchProgress {
        /// Bytes written so far
        bytes_transferred: u64,
        /// Derived progress
        progress: Progress,
    },

    /// Download finished and the file is complete on disk
    FetchCompleted {
        /// Where the image was written
        destination: PathBuf,
        /// Final size in bytes
        bytes: u64,
    },

    /// Download was cancelled and the partial file removed
    FetchCancelled {
        /// The destination that was cleaned up
        destination: PathBuf,
    },

    /// Download failed and the partial file removed
    FetchFailed {
        /// Error message
        error: String,
        /// Machine-readable failure reason
        reason: String,
    },

    /// A provisioning stage started
    StageStarted {
        /// The stage
        stage: Stage,
        /// Target device
        device: String,
    },

    /// A provisioning stage finished successfully
    StageCompleted {
        /// The stage
        stage: Stage,
    },

    /// All requested stages finished successfully
    ProvisionComplete {
        /// Target device
        device: String,
    },

    /// A stage failed; no later stage was attempted
    ProvisionFailed {
        /// The stage that failed, `None` if a precondition failed
        stage: Option<Stage>,
        /// Error message
        error: String,
    },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
