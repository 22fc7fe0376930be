//! Module responsible for managing application directories and paths.
//! This provides a platform-independent API for the configuration, log,
//! and runtime (lock and socket) locations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "MdView";
const CONFIG_FILE_NAME: &str = "configuration.json";
const LOG_FILE_NAME: &str = "mdview.log";

/// Gets the base application directory for user-specific data.
/// On Windows, this is typically %LOCALAPPDATA%\MdView,
/// on Linux ~/.local/share/MdView.
pub fn get_app_data_dir() -> Option<PathBuf> {
    let mut data_dir = dirs::data_local_dir()?;
    data_dir.push(APP_DIR_NAME);
    Some(data_dir)
}

/// Directory holding the instance lock file and the channel socket.
///
/// Prefers the per-session runtime directory (XDG_RUNTIME_DIR), which is
/// private to the user and cleared on logout, then the cache directory,
/// then the system temp directory.
pub fn get_runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
}

/// Ensures all required application directories exist.
/// Creates them if they don't.
pub fn ensure_app_dirs_exist() -> io::Result<()> {
    if let Some(dir) = get_app_data_dir() {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            log::info!("Created application directory at: {}", dir.display());
        }
    }

    let runtime = get_runtime_dir();
    if !runtime.exists() {
        fs::create_dir_all(&runtime)?;
    }

    Ok(())
}

/// Returns the path to the configuration file.
/// An override pointing at an existing file is used as is; any other
/// override is treated as the directory to hold `configuration.json`.
pub fn get_config_file_path(override_path: Option<&Path>) -> Option<PathBuf> {
    resolve_file_path(override_path, CONFIG_FILE_NAME)
}

/// Returns the path to the log file.
pub fn get_log_file_path(override_path: Option<&Path>) -> Option<PathBuf> {
    let dir = match override_path {
        // A config file override puts the log next to it
        Some(path) if path.is_file() => path.parent().map(Path::to_path_buf),
        Some(path) => Some(path.to_path_buf()),
        None => get_app_data_dir(),
    }?;
    Some(dir.join(LOG_FILE_NAME))
}

fn resolve_file_path(override_path: Option<&Path>, file_name: &str) -> Option<PathBuf> {
    match override_path {
        Some(path) if path.is_file() => Some(path.to_path_buf()),
        Some(path) => Some(path.join(file_name)),
        None => Some(get_app_data_dir()?.join(file_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_get_app_data_dir() {
        let app_dir = get_app_data_dir();
        assert!(app_dir.is_some());
        let dir = app_dir.unwrap();
        assert!(dir.ends_with("MdView"));
    }

    #[test]
    fn test_get_config_file_path_with_file_override() {
        let temp_file = NamedTempFile::new().unwrap();
        let config_path = get_config_file_path(Some(temp_file.path()));
        assert_eq!(config_path.unwrap(), temp_file.path());
    }

    #[test]
    fn test_get_config_file_path_with_dir_override() {
        let dir = TempDir::new().unwrap();
        let config_path = get_config_file_path(Some(dir.path())).unwrap();
        assert_eq!(config_path, dir.path().join("configuration.json"));
    }

    #[test]
    fn test_get_config_file_path_default() {
        let path = get_config_file_path(None).unwrap();
        assert!(path.ends_with("configuration.json"));
        assert!(path.to_string_lossy().contains("MdView"));
    }

    #[test]
    fn test_log_file_sits_next_to_config_override() {
        let temp_file = NamedTempFile::new().unwrap();
        let log_path = get_log_file_path(Some(temp_file.path())).unwrap();
        assert_eq!(log_path.parent(), temp_file.path().parent());
        assert!(log_path.ends_with("mdview.log"));
    }
}
