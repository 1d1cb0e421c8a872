//! Default compilation references, gathered once per process.

use std::path::Path;
use std::sync::{LazyLock, OnceLock};

use tracing::{info, warn};

use crate::error::Error;
use crate::platform::{HostPlatform, Platform};
use crate::reference::ReferenceSet;

/// Lazily built reference set for one platform. The first call to
/// [`Catalog::get`] builds it; the outcome (including failure) is kept.
pub struct Catalog {
    platform: Box<dyn Platform>,
    references: OnceLock<Result<ReferenceSet, Error>>,
}

impl Catalog {
    pub fn new(platform: impl Platform + 'static) -> Self {
        Self {
            platform: Box::new(platform),
            references: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<&ReferenceSet, Error> {
        self.references
            .get_or_init(|| initialize(self.platform.as_ref()))
            .as_ref()
            .map_err(Clone::clone)
    }
}

static CATALOG: LazyLock<Catalog> = LazyLock::new(|| Catalog::new(HostPlatform));

/// References every compilation starts from.
pub fn default_references() -> Result<&'static ReferenceSet, Error> {
    CATALOG.get()
}

/// Build a reference set from the platform's trusted-library list.
pub fn initialize(platform: &dyn Platform) -> Result<ReferenceSet, Error> {
    let list = platform
        .trusted_libraries()
        .ok_or_else(|| Error::PlatformUnsupported {
            message: "The host platform does not expose a list of trusted libraries.".to_string(),
        })?;

    let mut references = ReferenceSet::new();
    for entry in std::env::split_paths(&list) {
        if entry.as_os_str().is_empty() {
            continue;
        }
        match platform.load_library(Path::new(&entry)) {
            Some(reference) => {
                references.insert(reference);
            }
            None => warn!(entry = %entry.display(), "skipping unknown trusted library"),
        }
    }

    info!(count = references.len(), "reference catalog initialized");
    Ok(references)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::ffi::OsString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::corelib;
    use crate::reference::Reference;

    struct CountingPlatform {
        reads: Arc<AtomicUsize>,
    }

    impl Platform for CountingPlatform {
        fn trusted_libraries(&self) -> Option<OsString> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::env::join_paths(["System.Private.CoreLib.dll", "Missing.dll", "System.Console.dll"]).ok()
        }

        fn load_library(&self, entry: &Path) -> Option<Arc<Reference>> {
            HostPlatform.load_library(entry)
        }
    }

    struct NoListPlatform;

    impl Platform for NoListPlatform {
        fn trusted_libraries(&self) -> Option<OsString> {
            None
        }

        fn load_library(&self, _entry: &Path) -> Option<Arc<Reference>> {
            None
        }
    }

    #[test]
    fn concurrent_first_callers_share_one_initialization() {
        let reads = Arc::new(AtomicUsize::new(0));
        let catalog = Catalog::new(CountingPlatform { reads: Arc::clone(&reads) });

        let seen: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| std::ptr::from_ref(catalog.get().unwrap()) as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
        let names: Vec<&str> = catalog.get().unwrap().names().collect();
        assert_eq!(names, [corelib::CORE_LIB, corelib::CONSOLE_LIB]);
    }

    #[test]
    fn platform_without_list_fails_fast_every_time() {
        let catalog = Catalog::new(NoListPlatform);
        let first = catalog.get().unwrap_err();
        assert!(matches!(first, Error::PlatformUnsupported { .. }));
        assert_eq!(catalog.get().unwrap_err(), first);
    }

    #[test]
    fn default_catalog_holds_core_libraries() {
        let refs = default_references().unwrap();
        assert!(refs.contains(corelib::CORE_LIB));
        assert!(refs.find_type("System.Math").is_some());
        assert!(std::ptr::eq(refs, default_references().unwrap()));
    }
}
