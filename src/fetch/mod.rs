//! Cancellable, progress-reporting image download
//!
//! A [`FetchTask`] downloads one URL to one local file on a Tokio task of its
//! own. The returned [`FetchHandle`] can be polled for a [`FetchSnapshot`],
//! cancelled from any thread, and awaited for the final outcome. Progress is
//! also broadcast as [`Event`]s, one per written chunk.
//!
//! The destination only exists while the task is running or after it
//! completed: cancellation and every failure remove the partial file before
//! the terminal state becomes visible.
//!
//! ```no_run
//! use std::sync::Arc;
//! use usb_installer::fetch::{FetchOptions, FetchTask, HttpTransport};
//! use usb_installer::config::DownloadConfig;
//!
//! # async fn example() -> usb_installer::Result<()> {
//! let config = DownloadConfig::default();
//! let (event_tx, mut events) = tokio::sync::broadcast::channel(1000);
//! let task = FetchTask::new(
//!     Arc::new(HttpTransport::new(&config)?),
//!     event_tx,
//!     FetchOptions::from(&config),
//! );
//!
//! let handle = task.start("https://example.com/ventura.raw", "downloads/ventura.raw")?;
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! let report = handle.wait().await?;
//! println!("downloaded {} bytes", report.bytes_transferred);
//! # Ok(())
//! # }
//! ```

mod partial;
mod transport;
mod worker;


pub use transport::{HttpTransport, TransferBody, Transport};

use crate::config::DownloadConfig;
use crate::error::{Error, Result, TransferError};
use crate::types::{Event, FetchReport, FetchSnapshot, FetchState, Progress};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use partial::PartialFile;
use worker::{FetchContext, run_fetch};

/// Per-task behavior switches, taken from [`DownloadConfig`]
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Reject URLs whose path does not end in one of `supported_extensions`
    pub filter_extensions: bool,
    /// Extensions accepted by the filter, with leading dot
    pub supported_extensions: Vec<String>,
    /// Fail when the declared length exceeds free space at the destination
    pub check_disk_space: bool,
}

impl From<&DownloadConfig> for FetchOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            filter_extensions: config.filter_extensions,
            supported_extensions: config.supported_extensions.clone(),
            check_disk_space: config.check_disk_space,
        }
    }
}

/// State shared between a running transfer and its handle
#[derive(Debug)]
pub(crate) struct FetchShared {
    state: AtomicU8,
    bytes_transferred: AtomicU64,
    /// Zero means unknown
    bytes_expected: AtomicU64,
    /// Serializes cancel requests against the Completed transition
    transition: std::sync::Mutex<()>,
}

impl FetchShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(FetchState::Idle.to_u8()),
            bytes_transferred: AtomicU64::new(0),
            bytes_expected: AtomicU64::new(0),
            transition: std::sync::Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> FetchState {
        FetchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: FetchState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub(crate) fn bytes_expected(&self) -> Option<u64> {
        match self.bytes_expected.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    pub(crate) fn set_bytes_expected(&self, expected: Option<u64>) {
        self.bytes_expected
            .store(expected.unwrap_or(0), Ordering::SeqCst);
    }

    /// Add written bytes, returning the new total
    pub(crate) fn add_bytes(&self, n: u64) -> u64 {
        self.bytes_transferred.fetch_add(n, Ordering::SeqCst) + n
    }

    fn reset(&self) {
        self.bytes_transferred.store(0, Ordering::SeqCst);
        self.bytes_expected.store(0, Ordering::SeqCst);
        self.set_state(FetchState::Running);
    }

    fn lock_transition(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken invariant
        self.transition
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Cancel unless a terminal state has already been published
    fn request_cancel(&self, token: &CancellationToken) -> bool {
        let _guard = self.lock_transition();
        if self.state().is_terminal() || token.is_cancelled() {
            return false;
        }
        token.cancel();
        true
    }

    /// Publish Completed unless cancellation won the race
    pub(crate) fn try_complete(&self, token: &CancellationToken) -> bool {
        let _guard = self.lock_transition();
        if token.is_cancelled() {
            return false;
        }
        self.set_state(FetchState::Completed);
        true
    }

    fn snapshot(&self) -> FetchSnapshot {
        let bytes_transferred = self.bytes_transferred.load(Ordering::SeqCst);
        let bytes_expected = self.bytes_expected();
        FetchSnapshot {
            state: self.state(),
            bytes_transferred,
            bytes_expected,
            progress: Progress::from_bytes(bytes_transferred, bytes_expected),
        }
    }
}

/// Starts downloads
///
/// A `FetchTask` holds what every download needs (transport, event channel,
/// options); each call to [`FetchTask::start`] runs one independent transfer.
#[derive(Clone)]
pub struct FetchTask {
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<Event>,
    options: FetchOptions,
}

impl FetchTask {
    /// Create a fetch task using the given transport and event channel
    pub fn new(
        transport: Arc<dyn Transport>,
        event_tx: broadcast::Sender<Event>,
        options: FetchOptions,
    ) -> Self {
        Self {
            transport,
            event_tx,
            options,
        }
    }

    /// Subscribe to fetch events
    ///
    /// Subscribe before calling [`FetchTask::start`] to observe every event.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Begin downloading `source` into `destination` in the background
    ///
    /// Validation happens synchronously, before any background work.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `source` is not an http/https URL, or if
    ///   `destination` is empty, a directory, or its parent directory is
    ///   missing or not writable
    /// - [`Error::Runtime`] if called outside a Tokio runtime
    pub fn start(&self, source: &str, destination: impl Into<PathBuf>) -> Result<FetchHandle> {
        let url = crate::utils::parse_http_url(source)?;
        let destination = destination.into();
        crate::utils::check_destination_writable(&destination).map_err(|reason| {
            Error::InvalidInput {
                field: "destination",
                reason,
            }
        })?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("fetch must be started inside a Tokio runtime: {}", e)))?;

        let shared = Arc::new(FetchShared::new());
        shared.reset();
        let cancel_token = CancellationToken::new();

        tracing::info!(
            url = %url,
            destination = ?destination,
            transport = self.transport.name(),
            "starting fetch"
        );

        let ctx = FetchContext {
            url: url.clone(),
            destination: destination.clone(),
            transport: self.transport.clone(),
            event_tx: self.event_tx.clone(),
            options: self.options.clone(),
            shared: shared.clone(),
            cancel_token: cancel_token.clone(),
        };
        let partial = PartialFile::new(destination.clone());
        let join = runtime.spawn(run_fetch(ctx, partial));

        Ok(FetchHandle {
            url,
            destination,
            shared,
            cancel_token,
            join,
        })
    }
}

/// Handle to a running download
pub struct FetchHandle {
    url: url::Url,
    destination: PathBuf,
    shared: Arc<FetchShared>,
    cancel_token: CancellationToken,
    join: JoinHandle<Result<FetchReport>>,
}

impl FetchHandle {
    /// The URL being downloaded
    pub fn source(&self) -> &url::Url {
        &self.url
    }

    /// The file being written
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Current state
    pub fn state(&self) -> FetchState {
        self.shared.state()
    }

    /// Current progress counters, for polling callers
    pub fn snapshot(&self) -> FetchSnapshot {
        self.shared.snapshot()
    }

    /// Whether the task has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.shared.state().is_terminal()
    }

    /// Request cancellation
    ///
    /// Idempotent: repeated calls, or calls after a terminal state, do nothing.
    /// Once this returns while the task is still running, the task will end
    /// Cancelled and the destination file will be removed.
    pub fn cancel(&self) {
        if self.shared.request_cancel(&self.cancel_token) {
            tracing::info!(url = %self.url, "fetch cancellation requested");
        }
    }

    /// A cloneable handle that can cancel this download from another task or thread
    pub fn canceller(&self) -> FetchCanceller {
        FetchCanceller {
            shared: self.shared.clone(),
            cancel_token: self.cancel_token.clone(),
        }
    }

    /// Wait for the task to finish
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the download was cancelled
    /// - [`Error::Transfer`] if it failed
    ///
    /// In both cases the destination file no longer exists.
    pub async fn wait(self) -> Result<FetchReport> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                // The PartialFile guard already removed the file while unwinding
                self.shared.set_state(FetchState::Failed);
                tracing::error!(url = %self.url, error = %e, "fetch worker terminated unexpectedly");
                Err(TransferError::WorkerLost(e.to_string()).into())
            }
        }
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("url", &self.url.as_str())
            .field("destination", &self.destination)
            .field("snapshot", &self.shared.snapshot())
            .finish()
    }
}

/// Cancels a download from anywhere; see [`FetchHandle::cancel`]
#[derive(Clone, Debug)]
pub struct FetchCanceller {
    shared: Arc<FetchShared>,
    cancel_token: CancellationToken,
}

impl FetchCanceller {
    /// Request cancellation (idempotent)
    pub fn cancel(&self) {
        self.shared.request_cancel(&self.cancel_token);
    }

    /// Current state of the download
    pub fn state(&self) -> FetchState {
        self.shared.state()
    }
}
