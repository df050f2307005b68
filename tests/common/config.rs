//! Test configuration helpers for creating isolated installers

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use usb_installer::{Config, HttpTransport, UsbInstaller};

use super::runner::RecordingRunner;

/// Configuration rooted in `download_dir`, with tools resolved by bare name
pub fn test_config(download_dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = download_dir.to_path_buf();
    config.tools.search_path = false;
    config
}

/// Create an installer that downloads over real HTTP and records commands
///
/// Returns the TempDir so it stays alive for the duration of the test.
pub async fn create_test_installer(runner: Arc<RecordingRunner>) -> (UsbInstaller, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(&temp_dir.path().join("downloads"));

    let transport =
        Arc::new(HttpTransport::new(&config.download).expect("Failed to create HTTP transport"));
    let installer = UsbInstaller::with_components(config, transport, runner)
        .await
        .expect("Failed to create installer");

    (installer, temp_dir)
}
