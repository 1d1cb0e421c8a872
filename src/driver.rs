//! Sends generated source to a toolchain and loads what it emits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::{CompiledArtifact, LoadedModule};
use crate::catalog;
use crate::error::{Diagnostic, Error, Severity};
use crate::reference::{Reference, ReferenceSet};
use crate::settings::CompilerSettings;
use crate::toolchain::{BuiltinLoader, BuiltinToolchain};

/// Warning handling for one emit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitOptions {
    /// Report every warning as an error.
    pub warnings_as_errors: bool,
    /// Warning codes dropped entirely.
    pub suppressed_warnings: Vec<String>,
}

impl EmitOptions {
    /// Drop suppressed warnings, then escalate the rest when requested.
    pub fn apply(&self, diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
        diagnostics
            .into_iter()
            .filter(|d| d.severity == Severity::Error || !self.suppressed_warnings.contains(&d.code))
            .map(|d| if self.warnings_as_errors { d.escalate() } else { d })
            .collect()
    }
}

impl From<&CompilerSettings> for EmitOptions {
    fn from(settings: &CompilerSettings) -> Self {
        Self {
            warnings_as_errors: settings.warnings_as_errors,
            suppressed_warnings: settings.suppressed_warnings.clone(),
        }
    }
}

/// What a toolchain produced: an image when compilation succeeded, plus
/// every diagnostic it reported.
#[derive(Debug, Clone, Default)]
pub struct EmitOutput {
    pub image: Option<Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compiles source text into a loadable image.
pub trait Toolchain: Send + Sync {
    fn emit(&self, source: &str, references: &ReferenceSet, options: &EmitOptions) -> EmitOutput;
}

/// Turns an emitted image into a loaded module, linking it against the
/// references it was compiled with.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, image: &[u8], references: &ReferenceSet) -> Result<Arc<dyn LoadedModule>, String>;
}

#[derive(Debug, Clone)]
pub struct CompilationRequest {
    pub source: String,
    pub references: ReferenceSet,
}

impl CompilationRequest {
    /// Source plus the default references and `extra`, de-duplicated.
    pub fn new(
        source: impl Into<String>,
        extra: impl IntoIterator<Item = Arc<Reference>>,
    ) -> Result<Self, Error> {
        let mut references = catalog::default_references()?.clone();
        references.extend(extra);
        Ok(Self {
            source: source.into(),
            references,
        })
    }
}

#[derive(Clone)]
pub struct CompilationDriver {
    toolchain: Arc<dyn Toolchain>,
    loader: Arc<dyn ModuleLoader>,
}

impl CompilationDriver {
    pub fn new(toolchain: Arc<dyn Toolchain>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self { toolchain, loader }
    }

    /// The in-process toolchain and loader.
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinToolchain), Arc::new(BuiltinLoader::default()))
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn compile(
        &self,
        request: &CompilationRequest,
        options: &EmitOptions,
    ) -> Result<CompiledArtifact, Error> {
        debug!(
            references = request.references.len(),
            bytes = request.source.len(),
            "emitting compilation unit"
        );
        let output = self.toolchain.emit(&request.source, &request.references, options);

        let failures: Vec<Diagnostic> = output
            .diagnostics
            .iter()
            .filter(|d| d.is_blocking())
            .cloned()
            .collect();
        if !failures.is_empty() {
            warn!(errors = failures.len(), "compilation failed");
            return Err(Error::CompilationFailed {
                diagnostics: failures,
            });
        }

        let image = output
            .image
            .ok_or_else(|| Error::load_failed("the toolchain reported success but produced no image"))?;
        let module = self
            .loader
            .load(&image, &request.references)
            .map_err(Error::load_failed)?;
        debug!(module = module.name(), "image loaded");
        Ok(CompiledArtifact::new(module))
    }
}

impl Default for CompilationDriver {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedToolchain(Vec<Diagnostic>);

    impl Toolchain for FixedToolchain {
        fn emit(&self, _source: &str, _references: &ReferenceSet, options: &EmitOptions) -> EmitOutput {
            EmitOutput {
                image: Some(b"not an image".to_vec()),
                diagnostics: options.apply(self.0.clone()),
            }
        }
    }

    fn driver(diagnostics: Vec<Diagnostic>) -> CompilationDriver {
        CompilationDriver::new(Arc::new(FixedToolchain(diagnostics)), Arc::new(BuiltinLoader::default()))
    }

    #[test]
    fn only_blocking_diagnostics_are_reported() {
        let d = driver(vec![
            Diagnostic::warning("CS0219", "unused"),
            Diagnostic::error("CS0029", "bad conversion"),
            Diagnostic::error("CS1002", "; expected"),
        ]);
        let request = CompilationRequest::new("", []).unwrap();
        let err = d.compile(&request, &EmitOptions::default()).unwrap_err();
        let codes: Vec<&str> = err.diagnostics().iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, ["CS0029", "CS1002"]);
    }

    #[test]
    fn warnings_as_errors_block_unless_suppressed() {
        let d = driver(vec![Diagnostic::warning("CS0219", "unused")]);
        let request = CompilationRequest::new("", []).unwrap();
        let strict = EmitOptions {
            warnings_as_errors: true,
            suppressed_warnings: Vec::new(),
        };
        let err = d.compile(&request, &strict).unwrap_err();
        assert!(err.diagnostics()[0].is_warning_as_error);

        let suppressed = EmitOptions {
            warnings_as_errors: true,
            suppressed_warnings: vec!["CS0219".into()],
        };
        // Nothing blocks, so the garbage image reaches the loader.
        let err = d.compile(&request, &suppressed).unwrap_err();
        assert!(matches!(err, Error::LoadFailed { .. }));
    }

    #[test]
    fn requests_deduplicate_references() {
        let extra = Reference::builder(crate::corelib::CORE_LIB).build();
        let request = CompilationRequest::new("", [Arc::clone(&extra)]).unwrap();
        let core = request.references.get(crate::corelib::CORE_LIB).unwrap();
        assert!(!Arc::ptr_eq(core, &extra));
        assert_eq!(request.references.len(), catalog::default_references().unwrap().len());
    }
}
