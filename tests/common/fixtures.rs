//! Image, EFI folder and device fixtures

use std::path::{Path, PathBuf};

/// Deterministic image content of `len` bytes
pub fn image_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Create an EFI folder with a small OpenCore-like tree and return its path
pub fn create_efi_folder(root: &Path) -> PathBuf {
    let efi = root.join("EFI");
    std::fs::create_dir_all(efi.join("BOOT")).expect("Failed to create EFI/BOOT");
    std::fs::create_dir_all(efi.join("OC").join("Kexts")).expect("Failed to create EFI/OC");
    std::fs::write(efi.join("BOOT").join("BOOTx64.efi"), b"MZ").expect("Failed to write BOOTx64.efi");
    std::fs::write(efi.join("OC").join("config.plist"), b"<plist/>")
        .expect("Failed to write config.plist");
    efi
}

/// A fake device identifier under `root` whose boot partition (`<device>s1`) exists
pub fn create_fake_device(root: &Path) -> String {
    let device = root.join("disk4").display().to_string();
    std::fs::create_dir_all(format!("{}s1", device)).expect("Failed to create boot partition dir");
    device
}
