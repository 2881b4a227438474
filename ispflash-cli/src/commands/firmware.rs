//! Locating the HEX file to flash.
//!
//! First match wins: the path on the command line, the `flash.firmware`
//! config key, then `Resources/firmware.hex` next to the executable.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::CliError;

/// Bundled firmware, relative to the executable's directory.
const BUNDLED_FIRMWARE: &str = "Resources/firmware.hex";

/// Bundled firmware in `exe_dir`, if present.
pub fn bundled_firmware_in(exe_dir: &Path) -> Option<PathBuf> {
    let path = exe_dir.join(BUNDLED_FIRMWARE);
    path.is_file().then_some(path)
}

/// Resolve the firmware path for the running executable.
///
/// # Errors
///
/// Returns a usage error when no source yields a path.
pub fn resolve_firmware(
    explicit: Option<&PathBuf>,
    configured: Option<&PathBuf>,
) -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_firmware_from(explicit, configured, exe_dir.as_deref())
}

fn resolve_firmware_from(
    explicit: Option<&PathBuf>,
    configured: Option<&PathBuf>,
    exe_dir: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    if let Some(path) = configured {
        debug!("Using firmware from config: {}", path.display());
        return Ok(path.clone());
    }
    if let Some(path) = exe_dir.and_then(bundled_firmware_in) {
        debug!("Using bundled firmware: {}", path.display());
        return Ok(path);
    }

    Err(CliError::Usage(format!(
        "no firmware given; pass a .hex file, set flash.firmware or install {BUNDLED_FIRMWARE} next to the executable"
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn bundle(dir: &Path) {
        fs::create_dir_all(dir.join("Resources")).unwrap();
        fs::write(dir.join(BUNDLED_FIRMWARE), ":00000001FF\n").unwrap();
    }

    #[test]
    fn test_explicit_path_wins() {
        let tmp = tempfile::tempdir().unwrap();
        bundle(tmp.path());
        let explicit = PathBuf::from("/some/firmware.hex");
        let configured = PathBuf::from("/other/firmware.hex");

        let result =
            resolve_firmware_from(Some(&explicit), Some(&configured), Some(tmp.path())).unwrap();
        assert_eq!(result, explicit);
    }

    #[test]
    fn test_configured_path_wins_over_bundled() {
        let tmp = tempfile::tempdir().unwrap();
        bundle(tmp.path());
        let configured = PathBuf::from("/other/firmware.hex");

        let result = resolve_firmware_from(None, Some(&configured), Some(tmp.path())).unwrap();
        assert_eq!(result, configured);
    }

    #[test]
    fn test_bundled_firmware_is_the_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(bundled_firmware_in(tmp.path()).is_none());

        bundle(tmp.path());
        let result = resolve_firmware_from(None, None, Some(tmp.path())).unwrap();
        assert!(result.ends_with("Resources/firmware.hex"));
    }

    #[test]
    fn test_loose_hex_files_are_not_picked_up() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("app.hex"), ":00000001FF\n").unwrap();

        let err = resolve_firmware_from(None, None, Some(tmp.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
        assert!(err.to_string().contains("no firmware given"));
    }

    #[test]
    fn test_nothing_found_without_exe_dir() {
        let err = resolve_firmware_from(None, None, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
