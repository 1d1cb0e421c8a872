use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::toolchain::vm::DEFAULT_MAX_CALL_DEPTH;

const SETTINGS_VERSION: u32 = 1;

// ── Error type ──────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "I/O error: {e}"),
            SettingsError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Json(e)
    }
}

impl Serialize for SettingsError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ── Compiler settings ───────────────────────────────────────────────

/// Persistent defaults for compilations, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSettings {
    pub version: u32,
    #[serde(default)]
    pub warnings_as_errors: bool,
    /// Warning codes that are never reported.
    #[serde(default)]
    pub suppressed_warnings: Vec<String>,
    /// Deepest call chain compiled code may build before a
    /// `StackOverflowException` is raised.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            warnings_as_errors: false,
            suppressed_warnings: Vec::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Load settings from `path`. Returns None if no settings file exists.
pub fn load_settings(path: &Path) -> Result<Option<CompilerSettings>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Save settings to `path`, creating its directory if needed.
pub fn save_settings(path: &Path, settings: &CompilerSettings) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    write_json(path, settings)
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Per-file mutex map to serialize concurrent writes to the same path.
/// Entries live only while a write to that path is in flight.
static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Atomically write bytes to a file using write-to-temp-then-rename.
///
/// The data goes to a `.tmp` sibling first and is synced; the previous file
/// is kept as `.bak` (best-effort) before the rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SettingsError> {
    let lock = {
        let mut locks = FILE_LOCKS.lock();
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    };
    let result = {
        let _guard = lock.lock();
        write_replacing(path, data)
    };

    let mut locks = FILE_LOCKS.lock();
    // The map and this call hold the only handles: no writer is waiting.
    if Arc::strong_count(&lock) == 2 {
        locks.remove(path);
    }
    result
}

fn write_replacing(path: &Path, data: &[u8]) -> Result<(), SettingsError> {
    let file_name = path.file_name().unwrap_or_default();

    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut bak_name = OsString::from(file_name);
    bak_name.push(".bak");
    let bak_path = path.with_file_name(&bak_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if path.exists() {
        if let Err(e) = fs::rename(path, &bak_path) {
            warn!(path = %path.display(), error = %e, "could not keep a backup of the previous file");
        }
    }

    fs::rename(&tmp_path, path)?;

    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SettingsError> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_settings_round_trip() {
        let dir = scratch("dyncompile_test_settings");
        let path = dir.join("settings.json");

        let settings = CompilerSettings {
            warnings_as_errors: true,
            suppressed_warnings: vec!["CS0168".into()],
            ..CompilerSettings::default()
        };
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path).unwrap().expect("should load");
        assert_eq!(loaded, settings);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_atomic_write_keeps_backup_and_releases_lock() {
        let dir = scratch("dyncompile_test_atomic");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");

        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_to_string(dir.join("settings.json.bak")).unwrap(), "one");
        assert!(!FILE_LOCKS.lock().contains_key(&path));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = scratch("dyncompile_test_missing");
        assert!(load_settings(&dir.join("settings.json")).unwrap().is_none());
    }

    #[test]
    fn test_sparse_file_uses_defaults() {
        let dir = scratch("dyncompile_test_sparse");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, r#"{ "version": 1 }"#).unwrap();

        let loaded = load_settings(&path).unwrap().unwrap();
        assert!(!loaded.warnings_as_errors);
        assert_eq!(loaded.max_call_depth, DEFAULT_MAX_CALL_DEPTH);

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_settings(&path), Err(SettingsError::Json(_))));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_overwrite_keeps_backup() {
        let dir = scratch("dyncompile_test_backup");
        let path = dir.join("settings.json");
        save_settings(&path, &CompilerSettings::default()).unwrap();
        save_settings(&path, &CompilerSettings { max_call_depth: 8, ..CompilerSettings::default() }).unwrap();

        assert!(dir.join("settings.json.bak").exists());
        assert!(!dir.join("settings.json.tmp").exists());
        assert_eq!(load_settings(&path).unwrap().unwrap().max_call_depth, 8);

        let _ = fs::remove_dir_all(&dir);
    }
}
