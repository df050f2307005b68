//! Builds the erase, write, sync and copy invocations from configuration

use super::runner::Invocation;
use crate::config::{Config, ProvisionConfig, ToolsConfig};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Resolved locations of the external tools
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    /// diskutil
    pub diskutil: PathBuf,
    /// dd
    pub dd: PathBuf,
    /// cp
    pub cp: PathBuf,
    /// sync
    pub sync: PathBuf,
}

impl ToolPaths {
    /// Resolve each tool from an explicit path, then from PATH, then by bare name
    ///
    /// A bare name is still handed to the OS at spawn time, so a missing tool
    /// surfaces as a stage failure rather than here.
    pub fn resolve(tools: &ToolsConfig) -> Self {
        Self {
            diskutil: resolve_tool(tools.diskutil_path.as_ref(), "diskutil", tools.search_path),
            dd: resolve_tool(tools.dd_path.as_ref(), "dd", tools.search_path),
            cp: resolve_tool(tools.cp_path.as_ref(), "cp", tools.search_path),
            sync: resolve_tool(tools.sync_path.as_ref(), "sync", tools.search_path),
        }
    }
}

fn resolve_tool(explicit: Option<&PathBuf>, name: &str, search_path: bool) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    if search_path {
        match which::which(name) {
            Ok(path) => return path,
            Err(_) => tracing::debug!(tool = name, "not found in PATH, using bare name"),
        }
    }
    PathBuf::from(name)
}

/// Produces the invocations for each provisioning stage
#[derive(Clone, Debug)]
pub struct ProvisionCommands {
    tools: ToolPaths,
    params: ProvisionConfig,
    elevate_with: Option<PathBuf>,
}

impl ProvisionCommands {
    /// Create a command builder from explicit parts
    pub fn new(tools: ToolPaths, params: ProvisionConfig, elevate_with: Option<PathBuf>) -> Self {
        Self {
            tools,
            params,
            elevate_with,
        }
    }

    /// Create a command builder from the full configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ToolPaths::resolve(&config.tools),
            config.provision.clone(),
            config.tools.elevate_with.clone(),
        )
    }

    fn finish(&self, invocation: Invocation) -> Invocation {
        match &self.elevate_with {
            Some(wrapper) => invocation.wrapped_in(wrapper),
            None => invocation,
        }
    }

    /// `diskutil eraseDisk <fs> <label> <scheme> <device>`
    pub fn erase(&self, device: &str) -> Invocation {
        self.finish(
            Invocation::new(&self.tools.diskutil)
                .arg("eraseDisk")
                .arg(&self.params.filesystem)
                .arg(&self.params.volume_label)
                .arg(&self.params.partition_scheme)
                .arg(device),
        )
    }

    /// `dd if=<image> of=<device> bs=<block size>`
    pub fn write_image(&self, image: &Path, device: &str) -> Invocation {
        let mut input = OsString::from("if=");
        input.push(image.as_os_str());
        self.finish(
            Invocation::new(&self.tools.dd)
                .arg(input)
                .arg(format!("of={}", device))
                .arg(format!("bs={}", self.params.block_size)),
        )
    }

    /// `sync`
    pub fn sync(&self) -> Invocation {
        self.finish(Invocation::new(&self.tools.sync))
    }

    /// `cp -R <source>/. <boot location>/`
    ///
    /// The trailing `/.` copies the directory's contents, including dotfiles,
    /// without relying on shell globbing.
    pub fn copy_boot_files(&self, source_dir: &Path, boot_location: &Path) -> Invocation {
        let mut target = boot_location.as_os_str().to_os_string();
        if !target.to_string_lossy().ends_with('/') {
            target.push("/");
        }
        self.finish(
            Invocation::new(&self.tools.cp)
                .arg("-R")
                .arg(source_dir.join("."))
                .arg(target),
        )
    }

    /// Where boot files go for `device`: the device identifier plus the configured suffix
    ///
    /// With the default suffix `s1`, `/dev/disk4` maps to `/dev/disk4s1`, the
    /// first partition of the device.
    pub fn boot_location(&self, device: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", device, self.params.boot_partition_suffix))
    }
}
