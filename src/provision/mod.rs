//! Provisioning pipeline for a downloaded image
//!
//! Turns a removable device into a bootable installer in three ordered stages:
//! 1. Erase - repartition and format the device
//! 2. WriteImage - raw block copy of the image, then flush OS buffers
//! 3. CopyBootFiles - copy an EFI folder onto the boot partition (optional)
//!
//! Each stage runs external tools through a [`CommandRunner`]. A stage only
//! starts after the previous one succeeded; the first failure stops the run.

mod commands;
mod runner;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use commands::{ProvisionCommands, ToolPaths};
pub use runner::{CommandOutput, CommandRunner, Invocation, SystemRunner};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Event, ProvisionReport, Stage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// A device identifier the user has explicitly confirmed as the target
///
/// The pipeline accepts only this type, never a plain string. Not `Clone`:
/// one confirmation authorizes one provisioning run.
#[derive(Debug, PartialEq, Eq)]
pub struct ConfirmedDevice(String);

impl ConfirmedDevice {
    /// Record the user's confirmation that `device` may be erased
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the identifier is empty or contains
    /// a NUL byte.
    pub fn confirm(device: impl Into<String>) -> Result<Self> {
        let device = device.into().trim().to_string();
        if device.is_empty() {
            return Err(Error::InvalidInput {
                field: "device",
                reason: "device identifier is empty".to_string(),
            });
        }
        if device.contains('\0') {
            return Err(Error::InvalidInput {
                field: "device",
                reason: "device identifier contains a NUL byte".to_string(),
            });
        }
        Ok(Self(device))
    }

    /// The device identifier, e.g. `/dev/disk4`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConfirmedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inputs for one provisioning run
#[derive(Debug)]
pub struct ProvisionRequest {
    /// A completely downloaded image file
    pub image_path: PathBuf,
    /// The confirmed target device
    pub device: ConfirmedDevice,
    /// Folder whose contents are copied to the boot partition; `None` skips that stage
    pub efi_source_dir: Option<PathBuf>,
}

impl ProvisionRequest {
    /// Create a request without boot files
    pub fn new(image_path: impl Into<PathBuf>, device: ConfirmedDevice) -> Self {
        Self {
            image_path: image_path.into(),
            device,
            efi_source_dir: None,
        }
    }

    /// Also copy the contents of `dir` to the boot partition
    pub fn with_efi_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.efi_source_dir = Some(dir.into());
        self
    }
}

/// Provisioning pipeline executor
#[derive(Clone)]
pub struct ProvisionPipeline {
    /// Runs the external tools
    runner: Arc<dyn CommandRunner>,
    /// Builds the per-stage invocations
    commands: ProvisionCommands,
    /// Event channel for stage notifications
    event_tx: broadcast::Sender<Event>,
    /// Index into [`Stage::ALL`] plus one of the last started stage; zero before any
    last_stage: Arc<AtomicU8>,
}

impl ProvisionPipeline {
    /// Create a pipeline from explicit parts
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        commands: ProvisionCommands,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            runner,
            commands,
            event_tx,
            last_stage: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Create a pipeline using the tools and parameters in `config`
    pub fn from_config(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self::new(runner, ProvisionCommands::from_config(config), event_tx)
    }

    /// Subscribe to provisioning events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The most recently started stage of the current or last run
    ///
    /// `None` before the first stage of a run has started.
    pub fn last_stage(&self) -> Option<Stage> {
        match self.last_stage.load(Ordering::SeqCst) {
            0 => None,
            n => Stage::ALL.get(usize::from(n) - 1).copied(),
        }
    }

    /// Run all applicable stages in order
    ///
    /// Preconditions are checked before any command runs. On failure no
    /// later stage is attempted and the device is left in whatever state the
    /// failing stage produced; there is no rollback.
    ///
    /// # Errors
    ///
    /// - [`Error::PreconditionUnmet`] if the image is missing or empty, or the
    ///   EFI folder is missing or empty
    /// - [`Error::StageFailed`] naming the first stage that failed
    pub async fn run(&self, request: ProvisionRequest) -> Result<ProvisionReport> {
        let device = request.device.as_str().to_string();

        info!(
            device = %device,
            image = ?request.image_path,
            efi = ?request.efi_source_dir,
            runner = self.runner.name(),
            "starting provisioning"
        );

        match self.run_stages(&request).await {
            Ok(report) => {
                info!(device = %device, stages = report.stages.len(), "provisioning complete");
                self.event_tx
                    .send(Event::ProvisionComplete {
                        device: device.clone(),
                    })
                    .ok();
                Ok(report)
            }
            Err(e) => {
                error!(device = %device, stage = ?e.stage(), error = %e, "provisioning failed");
                self.event_tx
                    .send(Event::ProvisionFailed {
                        stage: e.stage(),
                        error: e.to_string(),
                    })
                    .ok();
                Err(e)
            }
        }
    }

    async fn run_stages(&self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        self.last_stage.store(0, Ordering::SeqCst);
        check_preconditions(&request.image_path, request.efi_source_dir.as_deref()).await?;

        let device = request.device.as_str();
        let mut report = ProvisionReport {
            device: device.to_string(),
            stages: Vec::with_capacity(Stage::ALL.len()),
            boot_location: None,
        };

        self.run_stage(Stage::Erase, device, vec![self.commands.erase(device)])
            .await?;
        report.stages.push(Stage::Erase);

        self.run_stage(
            Stage::WriteImage,
            device,
            vec![
                self.commands.write_image(&request.image_path, device),
                self.commands.sync(),
            ],
        )
        .await?;
        report.stages.push(Stage::WriteImage);

        if let Some(efi_dir) = &request.efi_source_dir {
            let boot_location = self.commands.boot_location(device);
            self.stage_started(Stage::CopyBootFiles, device);
            ensure_boot_location(&boot_location).await?;
            self.execute(
                Stage::CopyBootFiles,
                self.commands.copy_boot_files(efi_dir, &boot_location),
            )
            .await?;
            self.stage_completed(Stage::CopyBootFiles);
            report.stages.push(Stage::CopyBootFiles);
            report.boot_location = Some(boot_location);
        }

        Ok(report)
    }

    async fn run_stage(&self, stage: Stage, device: &str, invocations: Vec<Invocation>) -> Result<()> {
        self.stage_started(stage, device);
        for invocation in invocations {
            self.execute(stage, invocation).await?;
        }
        self.stage_completed(stage);
        Ok(())
    }

    fn stage_started(&self, stage: Stage, device: &str) {
        if let Some(index) = Stage::ALL.iter().position(|s| *s == stage) {
            self.last_stage.store(index as u8 + 1, Ordering::SeqCst);
        }
        info!(stage = %stage, device = %device, "stage started");
        self.event_tx
            .send(Event::StageStarted {
                stage,
                device: device.to_string(),
            })
            .ok();
    }

    fn stage_completed(&self, stage: Stage) {
        info!(stage = %stage, "stage completed");
        self.event_tx.send(Event::StageCompleted { stage }).ok();
    }

    /// Run one command, mapping spawn errors and non-zero exits to [`Error::StageFailed`]
    async fn execute(&self, stage: Stage, invocation: Invocation) -> Result<()> {
        debug!(stage = %stage, command = %invocation, "running command");

        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| Error::StageFailed {
                stage,
                exit_code: None,
                output: e.to_string(),
            })?;

        if !output.is_success() {
            return Err(Error::StageFailed {
                stage,
                exit_code: output.exit_code,
                output: output.failure_text(),
            });
        }

        debug!(stage = %stage, program = %invocation.program_name(), "command succeeded");
        Ok(())
    }
}

/// Validate the image and EFI folder before touching the device
async fn check_preconditions(image_path: &Path, efi_source_dir: Option<&Path>) -> Result<()> {
    let metadata = tokio::fs::metadata(image_path).await.map_err(|_| {
        Error::PreconditionUnmet(format!(
            "image {} does not exist; download it first",
            image_path.display()
        ))
    })?;
    if !metadata.is_file() {
        return Err(Error::PreconditionUnmet(format!(
            "image {} is not a file",
            image_path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(Error::PreconditionUnmet(format!(
            "image {} is empty",
            image_path.display()
        )));
    }

    if let Some(dir) = efi_source_dir {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(Error::PreconditionUnmet(format!(
                "EFI folder {} does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(dir).await?;
        if entries.next_entry().await?.is_none() {
            return Err(Error::PreconditionUnmet(format!(
                "EFI folder {} is empty",
                dir.display()
            )));
        }
    }

    debug!(
        image = ?image_path,
        image_bytes = metadata.len(),
        efi = ?efi_source_dir,
        "preconditions satisfied"
    );
    Ok(())
}

async fn ensure_boot_location(boot_location: &Path) -> Result<()> {
    if tokio::fs::try_exists(boot_location).await.unwrap_or(false) {
        return Ok(());
    }
    Err(Error::StageFailed {
        stage: Stage::CopyBootFiles,
        exit_code: None,
        output: format!("boot location {} not found", boot_location.display()),
    })
}
