//! Utility functions for file operations and URL handling

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// File name used when a URL has no usable last path segment
pub const FALLBACK_FILENAME: &str = "download.raw";

/// Derive a local file name from a URL's last path segment
///
/// The segment is percent-decoded. Segments that are empty, decode to
/// something containing a path separator, or name `.`/`..` fall back to
/// [`FALLBACK_FILENAME`].
///
/// # Examples
///
/// ```
/// use usb_installer::utils::filename_from_url;
///
/// let url = url::Url::parse("https://example.com/images/Ventura%2013.6.7.raw").unwrap();
/// assert_eq!(filename_from_url(&url), "Ventura 13.6.7.raw");
/// ```
pub fn filename_from_url(url: &url::Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        let decoded = urlencoding::decode(last_segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last_segment.to_string());
        if !decoded.contains(['/', '\\']) && decoded != "." && decoded != ".." {
            return decoded;
        }
    }

    FALLBACK_FILENAME.to_string()
}

/// Parse an http/https URL with a host
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] with field `source` for blank, malformed,
/// or non-http(s) input.
pub fn parse_http_url(raw: &str) -> Result<url::Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidInput {
            field: "source",
            reason: "URL is empty".to_string(),
        });
    }
    let url = url::Url::parse(raw).map_err(|e| Error::InvalidInput {
        field: "source",
        reason: format!("'{}' is not a valid URL: {}", raw, e),
    })?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        scheme => Err(Error::InvalidInput {
            field: "source",
            reason: format!("unsupported URL scheme '{}' (expected http or https)", scheme),
        }),
    }
}

/// Whether the URL path ends in one of the given extensions (case-insensitive)
///
/// Extensions are given with their leading dot, e.g. `".raw"`. This only looks
/// at the URL string; it says nothing about the content actually served.
pub fn has_supported_extension(url: &url::Url, supported: &[String]) -> bool {
    let path = url.path().to_ascii_lowercase();
    supported.iter().any(|ext| {
        let ext = ext.trim().to_ascii_lowercase();
        !ext.is_empty() && path.ends_with(&ext)
    })
}

/// Directory a destination file will be created in
///
/// A bare file name resolves to the current directory.
pub fn parent_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Check that a file can be created at `destination`
///
/// Returns a human-readable reason on failure. Writability is judged from the
/// parent directory's permissions, so this is a best-effort pre-check.
pub fn check_destination_writable(destination: &Path) -> std::result::Result<(), String> {
    if destination.as_os_str().is_empty() {
        return Err("path is empty".to_string());
    }
    if destination.is_dir() {
        return Err(format!("{} is a directory", destination.display()));
    }

    let parent = parent_dir(destination);
    let metadata = std::fs::metadata(&parent)
        .map_err(|e| format!("parent directory {} is not accessible: {}", parent.display(), e))?;
    if !metadata.is_dir() {
        return Err(format!("{} is not a directory", parent.display()));
    }
    if metadata.permissions().readonly() {
        return Err(format!("parent directory {} is not writable", parent.display()));
    }

    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(parent.as_os_str().as_bytes())
            .map_err(|e| format!("invalid path {}: {}", parent.display(), e))?;
        // SAFETY: c_path is a valid, null-terminated C string that outlives the call
        let rc = unsafe { libc::access(c_path.as_ptr(), libc::W_OK | libc::X_OK) };
        if rc != 0 {
            return Err(format!("parent directory {} is not writable", parent.display()));
        }
    }

    Ok(())
}

/// Remove a file, treating "already gone" as success
///
/// Returns `true` if a file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Arguments
///
/// * `path` - The path to check (typically the download directory)
///
/// # Returns
///
/// Returns the available disk space in bytes, or an IO error if the check fails.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid, null-terminated C string, stat is zeroed
        // before the call and only read after statvfs reports success
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is a valid, null-terminated wide string and all
        // output pointers reference live, aligned u64 locals
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(s: &str) -> url::Url {
        url::Url::parse(s).unwrap()
    }

    #[test]
    fn filename_uses_last_segment() {
        assert_eq!(
            filename_from_url(&url(
                "https://download2389.mediafire.com/abc/a54wd640ayuvq5o/Olarila+Ventura+13.6.7.raw"
            )),
            "Olarila+Ventura+13.6.7.raw"
        );
    }

    #[test]
    fn filename_ignores_query_string() {
        assert_eq!(
            filename_from_url(&url("https://example.com/files/bigsur.raw?token=abc")),
            "bigsur.raw"
        );
    }

    #[test]
    fn filename_falls_back_without_segment() {
        assert_eq!(filename_from_url(&url("https://example.com/")), FALLBACK_FILENAME);
        assert_eq!(filename_from_url(&url("https://example.com")), FALLBACK_FILENAME);
    }

    #[test]
    fn filename_rejects_encoded_separators() {
        assert_eq!(
            filename_from_url(&url("https://example.com/x/..%2F..%2Fetc%2Fpasswd")),
            FALLBACK_FILENAME
        );
    }

    #[test]
    fn only_http_urls_with_a_host_parse() {
        assert_eq!(
            parse_http_url("  https://example.com/a.raw ").unwrap().as_str(),
            "https://example.com/a.raw"
        );
        assert!(parse_http_url("http://127.0.0.1:8080/x").is_ok());

        for bad in ["", "example.com/a.raw", "ftp://example.com/a.raw", "data:text/plain,hi"] {
            assert!(
                matches!(parse_http_url(bad), Err(Error::InvalidInput { field: "source", .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let supported = vec![".raw".to_string(), ".iso".to_string(), ".dmg".to_string()];
        assert!(has_supported_extension(&url("https://e.com/a/B.RAW"), &supported));
        assert!(has_supported_extension(&url("https://e.com/a.dmg?x=1"), &supported));
        assert!(!has_supported_extension(&url("https://e.com/a.zip"), &supported));
        assert!(!has_supported_extension(&url("https://e.com/raw"), &supported));
        assert!(!has_supported_extension(&url("https://e.com/a.raw"), &[]));
    }

    #[test]
    fn parent_dir_of_bare_name_is_current_dir() {
        assert_eq!(parent_dir(Path::new("image.raw")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/tmp/image.raw")), PathBuf::from("/tmp"));
    }

    #[test]
    fn destination_in_temp_dir_is_writable() {
        let temp_dir = TempDir::new().unwrap();
        assert!(check_destination_writable(&temp_dir.path().join("image.raw")).is_ok());
    }

    #[test]
    fn destination_checks_reject_bad_paths() {
        let temp_dir = TempDir::new().unwrap();

        assert!(check_destination_writable(Path::new("")).is_err());
        assert!(check_destination_writable(temp_dir.path()).is_err());
        assert!(
            check_destination_writable(&temp_dir.path().join("missing").join("image.raw"))
                .is_err()
        );

        let file = temp_dir.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        assert!(check_destination_writable(&file.join("image.raw")).is_err());
    }

    #[tokio::test]
    async fn remove_file_if_exists_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("partial.raw");
        std::fs::write(&file, b"partial").unwrap();

        assert!(remove_file_if_exists(&file).await.unwrap());
        assert!(!remove_file_if_exists(&file).await.unwrap());
        assert!(!file.exists());
    }

    #[test]
    fn available_space_for_temp_dir() {
        let temp_dir = TempDir::new().unwrap();
        let available = get_available_space(temp_dir.path()).unwrap();
        assert!(available > 0, "Available space should be greater than 0");
    }

    #[test]
    fn available_space_nonexistent_path() {
        let result = get_available_space(Path::new("/nonexistent/path/that/should/not/exist"));
        assert!(result.is_err(), "Should return error for nonexistent path");
    }
}
