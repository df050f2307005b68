//! Top-level facade tying the catalog, downloads and provisioning together

use crate::catalog::{FetchRequest, ImageSelection};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{FetchHandle, FetchOptions, FetchTask, HttpTransport, Transport};
use crate::provision::{CommandRunner, ProvisionPipeline, ProvisionRequest, SystemRunner};
use crate::types::{Event, ProvisionReport};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Main entry point: downloads installer images and writes them to devices
///
/// Fetch and provisioning events from every operation started through one
/// `UsbInstaller` share a single broadcast channel, see [`UsbInstaller::subscribe`].
#[derive(Clone)]
pub struct UsbInstaller {
    /// Configuration (shared with spawned work)
    config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: broadcast::Sender<Event>,
    /// Starts image downloads
    fetch: FetchTask,
    /// Runs erase/write/copy against a device
    pipeline: ProvisionPipeline,
}

impl UsbInstaller {
    /// Create an installer using HTTP downloads and real system commands
    ///
    /// Validates the configuration and creates the download directory.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.download)?);
        Self::with_components(config, transport, Arc::new(SystemRunner)).await
    }

    /// Create an installer with a custom transport and command runner
    pub async fn with_components(
        config: Config,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_dir().display(),
                        e
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(config.event_channel_capacity);

        let fetch = FetchTask::new(
            transport,
            event_tx.clone(),
            FetchOptions::from(&config.download),
        );
        let pipeline = ProvisionPipeline::from_config(&config, runner, event_tx.clone());

        tracing::debug!(
            download_dir = ?config.download_dir(),
            presets = config.images.len(),
            "installer initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            fetch,
            pipeline,
        })
    }

    /// Subscribe to fetch and provisioning events
    ///
    /// Receivers only see events sent after they subscribed, so subscribe
    /// before starting the operation you want to observe.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use usb_installer::{Config, UsbInstaller};
    /// # async fn example() -> usb_installer::Result<()> {
    /// let installer = UsbInstaller::new(Config::default()).await?;
    /// let mut events = installer.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "installer event");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve a preset or custom URL into a download request
    pub fn resolve(&self, selection: &ImageSelection) -> Result<FetchRequest> {
        self.config.resolve(selection)
    }

    /// Start downloading a resolved image in the background
    pub fn start_fetch(&self, request: &FetchRequest) -> Result<FetchHandle> {
        self.fetch
            .start(request.source.as_str(), request.destination.clone())
    }

    /// Run the provisioning pipeline to completion on the current task
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionReport> {
        self.pipeline.run(request).await
    }

    /// Run the provisioning pipeline on its own Tokio task
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if called outside a Tokio runtime.
    pub fn spawn_provision(
        &self,
        request: ProvisionRequest,
    ) -> Result<JoinHandle<Result<ProvisionReport>>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::Runtime(format!("provisioning must be started inside a Tokio runtime: {}", e))
        })?;
        let pipeline = self.pipeline.clone();
        Ok(runtime.spawn(async move { pipeline.run(request).await }))
    }
}

impl std::fmt::Debug for UsbInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbInstaller")
            .field("download_dir", self.config.download_dir())
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}
