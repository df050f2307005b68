//! # usb-installer
//!
//! Backend library for building bootable macOS installer USB drives.
//!
//! ## Design Philosophy
//!
//! usb-installer is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, or poll snapshots
//! - **Explicit about destruction** - Devices must be confirmed before they are erased
//!
//! The workflow has two halves. A cancellable background download fetches an
//! installer image; a provisioning pipeline then erases a device, writes the
//! image to it raw, and optionally copies an EFI folder to its boot partition.
//!
//! ## Quick Start
//!
//! ```no_run
//! use usb_installer::{Config, ConfirmedDevice, ImageSelection, ProvisionRequest, UsbInstaller};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let installer = UsbInstaller::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = installer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = installer.resolve(&ImageSelection::Preset("macOS Ventura".into()))?;
//!     let report = installer.start_fetch(&request)?.wait().await?;
//!
//!     let device = ConfirmedDevice::confirm("/dev/disk4")?;
//!     installer
//!         .provision(ProvisionRequest::new(report.destination, device).with_efi_dir("EFI"))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Image presets and custom URL resolution
pub mod catalog;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Cancellable image downloads
pub mod fetch;
/// Top-level facade
pub mod installer;
/// Erase, write and boot-file provisioning pipeline
pub mod provision;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use catalog::{FetchRequest, ImageSelection};
pub use config::{Config, DownloadConfig, ImagePreset, ProvisionConfig, ToolsConfig};
pub use error::{Error, Result, TransferError};
pub use fetch::{FetchCanceller, FetchHandle, FetchTask, HttpTransport, Transport};
pub use installer::UsbInstaller;
pub use provision::{
    CommandOutput, CommandRunner, ConfirmedDevice, Invocation, ProvisionPipeline,
    ProvisionRequest, SystemRunner,
};
pub use types::{
    Event, FetchReport, FetchSnapshot, FetchState, Progress, ProvisionReport, Stage,
};

/// Wait for a download, cancelling it if the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// On a signal the download is cancelled and its partial file removed before
/// this returns [`Error::Cancelled`].
///
/// # Example
///
/// ```no_run
/// use usb_installer::{Config, ImageSelection, UsbInstaller, wait_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let installer = UsbInstaller::new(Config::default()).await?;
///     let request = installer.resolve(&ImageSelection::Preset("macOS Monterey".into()))?;
///
///     let report = wait_with_shutdown(installer.start_fetch(&request)?).await?;
///     println!("saved to {}", report.destination.display());
///
///     Ok(())
/// }
/// ```
pub async fn wait_with_shutdown(handle: FetchHandle) -> Result<FetchReport> {
    let canceller = handle.canceller();
    let wait = handle.wait();
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => result,
        _ = wait_for_signal() => {
            canceller.cancel();
            wait.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Never resolve: without a signal source the download runs to completion
            std::future::pending::<()>().await;
        }
    }
}
