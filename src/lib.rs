//! Compile C# method bodies into callables at runtime.
//!
//! A [`CallableShape`] describes the parameters (with their `in`/`ref`/`out`
//! modes) and result of the callable you want. The crate renders a
//! declaration for it, wraps the body in a generated compilation unit,
//! compiles that through a [`Toolchain`](driver::Toolchain), resolves the
//! generated method and binds it back to the shape.
//!
//! ```no_run
//! use dyncompile::{compile_function, CompileOptions};
//!
//! let add = compile_function::<(i32, i32), i32>(
//!     "a + b",
//!     &CompileOptions::new().argument_names(["a", "b"]),
//! )?;
//! assert_eq!(add.invoke((1, 2))?, 3);
//! # Ok::<(), dyncompile::Error>(())
//! ```

pub mod artifact;
pub mod binder;
pub mod catalog;
pub mod compile;
pub mod corelib;
pub mod defaults;
pub mod driver;
pub mod error;
pub mod platform;
pub mod reference;
pub mod settings;
pub mod shape;
pub mod signature;
pub mod source_gen;
pub mod symbols;
pub mod toolchain;
pub mod value;

pub use artifact::CompiledArtifact;
pub use binder::{Action, BoundCallable, Delegate, Function};
pub use compile::{
    compile_action, compile_assembly, compile_delegate, compile_function, compile_method, compile_shape,
    generate_source, CompileOptions, Compiler,
};
pub use driver::EmitOptions;
pub use error::{Diagnostic, Error, ExceptionKind, RuntimeError, Severity};
pub use reference::{Reference, ReferenceSet};
pub use shape::{ArgList, CallableShape, HostType, ParamMode, TypeDesc};
pub use source_gen::GenerationRequest;
pub use symbols::EntryPoint;
pub use value::Value;
