//! Access to the host platform's list of trusted libraries.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use crate::corelib;
use crate::reference::Reference;

/// Overrides the trusted-library list of [`HostPlatform`]. Same format as the
/// platform list: library names or paths joined by the path separator.
pub const TRUSTED_LIBRARIES_ENV: &str = "DYNCOMPILE_TRUSTED_LIBRARIES";

pub trait Platform: Send + Sync {
    /// Path-separator-joined list of trusted libraries, or `None` when the
    /// platform does not expose one.
    fn trusted_libraries(&self) -> Option<OsString>;

    /// Resolve one entry of the list to a library.
    fn load_library(&self, entry: &Path) -> Option<Arc<Reference>>;
}

/// The in-process platform: its trusted list names the core libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn trusted_libraries(&self) -> Option<OsString> {
        if let Some(list) = std::env::var_os(TRUSTED_LIBRARIES_ENV) {
            return Some(list);
        }
        let files = corelib::LIBRARY_NAMES.iter().map(|name| format!("{name}.dll"));
        std::env::join_paths(files).ok()
    }

    fn load_library(&self, entry: &Path) -> Option<Arc<Reference>> {
        corelib::library(&library_name(entry)?)
    }
}

/// `/usr/share/dotnet/System.Console.dll` → `System.Console`.
pub fn library_name(entry: &Path) -> Option<String> {
    let file = entry.file_name()?.to_str()?;
    let name = file
        .strip_suffix(".dll")
        .or_else(|| file.strip_suffix(".DLL"))
        .unwrap_or(file);
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn library_names_strip_directory_and_extension() {
        assert_eq!(
            library_name(Path::new("/opt/runtime/System.Private.CoreLib.dll")).unwrap(),
            "System.Private.CoreLib"
        );
        assert_eq!(library_name(Path::new("System.Console")).unwrap(), "System.Console");
        assert!(library_name(Path::new("/")).is_none());
    }

    #[test]
    fn host_platform_resolves_core_libraries() {
        let platform = HostPlatform;
        let lib = platform
            .load_library(Path::new("/any/where/System.Collections.dll"))
            .unwrap();
        assert_eq!(lib.name(), corelib::COLLECTIONS_LIB);
        assert!(platform.load_library(Path::new("Unknown.dll")).is_none());
    }
}
