//! Configuration types for usb-installer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, time::Duration};

/// Download behavior configuration (directory, timeouts, file filtering)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory images are downloaded into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Overall request timeout (None = unlimited; images are several GB)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// Reject URLs whose path does not end in a supported extension (default: false)
    ///
    /// This is a best-effort check on the URL string only, not on the downloaded content.
    #[serde(default)]
    pub filter_extensions: bool,

    /// Extensions accepted when `filter_extensions` is enabled
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,

    /// Fail early when the declared size exceeds free space (default: true)
    #[serde(default = "default_true")]
    pub check_disk_space: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            filter_extensions: false,
            supported_extensions: default_supported_extensions(),
            check_disk_space: true,
        }
    }
}

/// External tool paths (diskutil, dd, cp, sync) and privilege elevation
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to diskutil executable (resolved by name if None)
    #[serde(default)]
    pub diskutil_path: Option<PathBuf>,

    /// Path to dd executable (resolved by name if None)
    #[serde(default)]
    pub dd_path: Option<PathBuf>,

    /// Path to cp executable (resolved by name if None)
    #[serde(default)]
    pub cp_path: Option<PathBuf>,

    /// Path to sync executable (resolved by name if None)
    #[serde(default)]
    pub sync_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Program every provisioning command is prefixed with (e.g. "sudo")
    ///
    /// Credentials are never requested or cached by this crate.
    #[serde(default)]
    pub elevate_with: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            diskutil_path: None,
            dd_path: None,
            cp_path: None,
            sync_path: None,
            search_path: true,
            elevate_with: None,
        }
    }
}

/// Parameters for the provisioning commands
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Filesystem passed to the erase command (default: "HFS+")
    #[serde(default = "default_filesystem")]
    pub filesystem: String,

    /// Volume label passed to the erase command (default: "USB_INSTALLER")
    #[serde(default = "default_volume_label")]
    pub volume_label: String,

    /// Partition scheme passed to the erase command (default: "MBRFormat")
    #[serde(default = "default_partition_scheme")]
    pub partition_scheme: String,

    /// Block size for the raw write (default: "1m")
    #[serde(default = "default_block_size")]
    pub block_size: String,

    /// Suffix appended to the device identifier to locate the boot partition (default: "s1")
    #[serde(default = "default_boot_partition_suffix")]
    pub boot_partition_suffix: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            filesystem: default_filesystem(),
            volume_label: default_volume_label(),
            partition_scheme: default_partition_scheme(),
            block_size: default_block_size(),
            boot_partition_suffix: default_boot_partition_suffix(),
        }
    }
}

/// A named, downloadable installer image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePreset {
    /// Display name (e.g. "macOS Ventura")
    pub name: String,
    /// Download URL
    pub url: String,
    /// File name inside the download directory
    pub filename: String,
}

/// Main configuration for UsbInstaller
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig): download directory, timeouts, filtering
/// - [`tools`](ToolsConfig): external binary paths, privilege elevation
/// - [`provision`](ProvisionConfig): erase/write/copy parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provisioning command parameters
    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Selectable installer images
    #[serde(default = "default_images")]
    pub images: Vec<ImagePreset>,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            tools: ToolsConfig::default(),
            provision: ProvisionConfig::default(),
            images: default_images(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Look up a preset by name (case-insensitive)
    pub fn preset(&self, name: &str) -> Option<&ImagePreset> {
        self.images
            .iter()
            .find(|preset| preset.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Check the configuration for values that would make every operation fail
    pub fn validate(&self) -> Result<()> {
        if self.download.download_dir.as_os_str().is_empty() {
            return Err(config_error("download_dir must not be empty", "download_dir"));
        }

        if self.event_channel_capacity == 0 {
            return Err(config_error(
                "event_channel_capacity must be greater than 0",
                "event_channel_capacity",
            ));
        }

        if self.download.filter_extensions && self.download.supported_extensions.is_empty() {
            return Err(config_error(
                "supported_extensions must not be empty when filter_extensions is enabled",
                "supported_extensions",
            ));
        }

        let provision = &self.provision;
        for (key, value) in [
            ("filesystem", &provision.filesystem),
            ("volume_label", &provision.volume_label),
            ("partition_scheme", &provision.partition_scheme),
            ("block_size", &provision.block_size),
            ("boot_partition_suffix", &provision.boot_partition_suffix),
        ] {
            if value.trim().is_empty() {
                return Err(config_error(&format!("{} must not be empty", key), key));
            }
        }

        let mut names = HashSet::new();
        for preset in &self.images {
            if !names.insert(preset.name.to_lowercase()) {
                return Err(config_error(
                    &format!("duplicate image preset '{}'", preset.name),
                    "images",
                ));
            }
            if preset.filename.trim().is_empty() || preset.filename.contains(['/', '\\']) {
                return Err(config_error(
                    &format!("image preset '{}' has an invalid filename", preset.name),
                    "images",
                ));
            }
            match url::Url::parse(&preset.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => {
                    return Err(config_error(
                        &format!("image preset '{}' has an invalid URL", preset.name),
                        "images",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_supported_extensions() -> Vec<String> {
    vec![".raw".into(), ".iso".into(), ".dmg".into()]
}

fn default_filesystem() -> String {
    "HFS+".into()
}

fn default_volume_label() -> String {
    "USB_INSTALLER".into()
}

fn default_partition_scheme() -> String {
    "MBRFormat".into()
}

fn default_block_size() -> String {
    "1m".into()
}

fn default_boot_partition_suffix() -> String {
    "s1".into()
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_images() -> Vec<ImagePreset> {
    vec![
        ImagePreset {
            name: "macOS Big Sur".into(),
            url: "https://download2364.mediafire.com/oave9rz6zulgdItRhYxhL3W7RLD6GfduuvYUwW6NWfDwDS5KG2BOXkg-s0VBXXIPgng1xoMeyPbwwHVJOETJ7YRxYANb8tvFuJrYtLs3R5eD7hsgK7pfoohwDMgO5JgGd8I327eNLEVc_sZTneNqj_Ml2iYAGKXlCIlj8IHptq0/bp5it8zrindw3hf/Olarila+BigSur+11.7.10.raw".into(),
            filename: "bigsur.raw".into(),
        },
        ImagePreset {
            name: "macOS Monterey".into(),
            url: "https://download2325.mediafire.com/kf7h329mzkcgFUns0t4zbNQO9JfAZRMbMe9mHAjVGZZyWYxe9cVl0_bB-r-zsW5RIY9YmYlXs244u38f1T7_XFgiLRonEhnFu3sR4bLerxtmIvril6G2mCCr6pbOvi2jkB1m6GkzsBHz3an1SNq3nAbIa6UOZoa3BiBNL5v_fZM/fer5pagguuk0kvl/Olarila+Monterey+12.7.5.raw".into(),
            filename: "monterey.raw".into(),
        },
        ImagePreset {
            name: "macOS Ventura".into(),
            url: "https://download2389.mediafire.com/fhbhesufoa7g37dPwVRZUCWhfKJMj0cqsOXSPlmfusHmZqYZ2tXdBVxvfhNAmu8idztUlRnxS-GhT62g-w-PKIYstHJXxUQzgN3WgnR00p00zakj-MHycoRrn8lTgHaGymBj0bCKgsibqjhAdmW8najBiTYFNlObjqI5tEiV-HI/a54wd640ayuvq5o/Olarila+Ventura+13.6.7.raw".into(),
            filename: "ventura.raw".into(),
        },
    ]
}

// Duration serialization helper (serialize as seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
