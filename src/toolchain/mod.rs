#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod ast;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod parser;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod builtins;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod typeck;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod flow;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod compiler;
pub mod image;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod vm;
pub mod loader;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::driver::{EmitOptions, EmitOutput, Toolchain};
use crate::reference::ReferenceSet;
use error::CompileError;

pub use loader::BuiltinLoader;

static MODULE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The in-process compiler for the C# subset the source generator emits.
///
/// source → lex → parse → type check → flow analysis → bytecode → image bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinToolchain;

impl BuiltinToolchain {
    /// Every diagnostic for `source`, plus the image when no error was found.
    fn run(source: &str, references: &ReferenceSet) -> (Vec<CompileError>, Option<image::Image>) {
        let unit = match lexer::lex(source).and_then(parser::parse) {
            Ok(unit) => unit,
            Err(errors) => return (errors, None),
        };
        let checked = typeck::type_check(&unit, references);
        let mut errors = checked.diagnostics;
        if errors.iter().any(CompileError::is_error) {
            return (errors, None);
        }
        errors.extend(flow::check(&checked.program));
        errors.sort_by_key(|e| e.span.start);
        if errors.iter().any(CompileError::is_error) {
            return (errors, None);
        }
        let name = format!("dyncompile-{}", MODULE_COUNTER.fetch_add(1, Ordering::Relaxed));
        match compiler::compile(&checked.program, &name) {
            Ok(image) => (errors, Some(image)),
            Err(e) => {
                errors.push(e);
                (errors, None)
            }
        }
    }
}

impl Toolchain for BuiltinToolchain {
    fn emit(&self, source: &str, references: &ReferenceSet, options: &EmitOptions) -> EmitOutput {
        let (errors, image) = Self::run(source, references);
        let diagnostics = options.apply(errors.iter().map(|e| e.to_diagnostic(source)).collect());
        if diagnostics.iter().any(|d| d.is_blocking()) {
            return EmitOutput { image: None, diagnostics };
        }
        let Some(image) = image else {
            return EmitOutput { image: None, diagnostics };
        };
        match image.encode() {
            Ok(bytes) => {
                debug!(module = %image.module_name, bytes = bytes.len(), "emitted image");
                EmitOutput {
                    image: Some(bytes),
                    diagnostics,
                }
            }
            Err(message) => {
                let mut diagnostics = diagnostics;
                diagnostics.push(crate::error::Diagnostic::error(error::UNSUPPORTED, message));
                EmitOutput { image: None, diagnostics }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corelib;
    use crate::error::Severity;

    fn refs() -> ReferenceSet {
        corelib::LIBRARY_NAMES.iter().filter_map(|n| corelib::library(n)).collect()
    }

    #[test]
    fn clean_source_emits_an_image() {
        let out = BuiltinToolchain.emit(
            "public static class C { public static int F() { return 1; } }",
            &refs(),
            &EmitOptions::default(),
        );
        assert!(out.diagnostics.is_empty());
        let image = image::Image::decode(&out.image.unwrap()).unwrap();
        assert!(image.module_name.starts_with("dyncompile-"));
    }

    #[test]
    fn errors_carry_locations_and_block_the_image() {
        let source = "public static class C {\n  public static int F() { return \"x\"; }\n}";
        let out = BuiltinToolchain.emit(source, &refs(), &EmitOptions::default());
        assert!(out.image.is_none());
        let d = &out.diagnostics[0];
        assert_eq!(d.code, "CS0029");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.location.unwrap().line, 2);
    }

    #[test]
    fn syntax_errors_stop_before_type_checking() {
        let out = BuiltinToolchain.emit("class C { void F() { int x = } }", &refs(), &EmitOptions::default());
        assert!(out.image.is_none());
        assert_eq!(out.diagnostics[0].code, "CS1525");
    }

    #[test]
    fn flow_errors_follow_type_checking() {
        let source = "static class C { static int F(bool b) { if (b) return 1; } }";
        let out = BuiltinToolchain.emit(source, &refs(), &EmitOptions::default());
        let codes: Vec<&str> = out.diagnostics.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, ["CS0161"]);
    }

    #[test]
    fn warnings_as_errors_withhold_the_image() {
        let source = "static class C { static void F() { int unused = 1; } }";
        let lenient = BuiltinToolchain.emit(source, &refs(), &EmitOptions::default());
        assert!(lenient.image.is_some());
        assert_eq!(lenient.diagnostics[0].code, "CS0219");

        let strict = EmitOptions {
            warnings_as_errors: true,
            suppressed_warnings: Vec::new(),
        };
        let out = BuiltinToolchain.emit(source, &refs(), &strict);
        assert!(out.image.is_none());
        assert!(out.diagnostics[0].is_warning_as_error);
    }

    #[test]
    fn module_names_are_unique() {
        let source = "static class C { }";
        let a = BuiltinToolchain.emit(source, &refs(), &EmitOptions::default()).image.unwrap();
        let b = BuiltinToolchain.emit(source, &refs(), &EmitOptions::default()).image.unwrap();
        let (a, b) = (image::Image::decode(&a).unwrap(), image::Image::decode(&b).unwrap());
        assert_ne!(a.module_name, b.module_name);
    }
}
