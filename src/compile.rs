//! The public compile-and-bind entry points.
//!
//! body + shape → declaration → generated source → compiled artifact →
//! entry point → bound callable

use std::sync::{Arc, LazyLock};

use tracing::debug;

use crate::artifact::CompiledArtifact;
use crate::binder::{self, Action, BoundCallable, Delegate, Function};
use crate::defaults;
use crate::driver::{CompilationDriver, CompilationRequest, EmitOptions};
use crate::error::Error;
use crate::reference::Reference;
use crate::settings::CompilerSettings;
use crate::shape::{ArgList, CallableShape, HostType};
use crate::signature;
use crate::source_gen::{self, GenerationRequest};
use crate::symbols::{self, EntryPoint};
use crate::toolchain::BuiltinLoader;

/// Per-call options. Every field has a default; see [`defaults`].
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Parameter names, in order. `None` names a single parameter `it`.
    pub argument_names: Option<Vec<String>>,
    /// Extra using directives, placed before the derived ones.
    pub usings: String,
    pub method_name: String,
    pub class_name: String,
    pub namespace_name: String,
    pub skeleton: String,
    /// Libraries referenced in addition to the default catalog.
    pub references: Vec<Arc<Reference>>,
    pub emit: EmitOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            argument_names: None,
            usings: defaults::USINGS.to_string(),
            method_name: defaults::METHOD_NAME.to_string(),
            class_name: defaults::CLASS_NAME.to_string(),
            namespace_name: defaults::NAMESPACE_NAME.to_string(),
            skeleton: defaults::SKELETON.to_string(),
            references: Vec::new(),
            emit: EmitOptions::default(),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn argument_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argument_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn usings(mut self, usings: impl Into<String>) -> Self {
        self.usings = usings.into();
        self
    }

    pub fn method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = name.into();
        self
    }

    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    pub fn namespace_name(mut self, name: impl Into<String>) -> Self {
        self.namespace_name = name.into();
        self
    }

    pub fn skeleton(mut self, skeleton: impl Into<String>) -> Self {
        self.skeleton = skeleton.into();
        self
    }

    pub fn reference(mut self, reference: Arc<Reference>) -> Self {
        self.references.push(reference);
        self
    }

    pub fn emit_options(mut self, emit: EmitOptions) -> Self {
        self.emit = emit;
        self
    }

    fn request(&self, body: &str) -> GenerationRequest {
        GenerationRequest::new(body)
            .usings(self.usings.clone())
            .method_name(self.method_name.clone())
            .class_name(self.class_name.clone())
            .namespace_name(self.namespace_name.clone())
            .skeleton(self.skeleton.clone())
    }
}

/// Caller usings first, then the derived ones the skeleton or the caller
/// does not already declare.
fn join_usings(skeleton: &str, caller: &str, derived: &str) -> String {
    let declared = |line: &str| {
        skeleton
            .lines()
            .chain(caller.lines())
            .any(|existing| existing.trim() == line.trim())
    };
    let derived: Vec<&str> = derived
        .lines()
        .filter(|line| !line.trim().is_empty() && !declared(line))
        .collect();
    match (caller.is_empty(), derived.is_empty()) {
        (true, _) => derived.join("\n"),
        (_, true) => caller.to_string(),
        _ => format!("{caller}\n{}", derived.join("\n")),
    }
}

/// Compiles bodies and source text through an injected toolchain and loader.
#[derive(Clone, Default)]
pub struct Compiler {
    driver: CompilationDriver,
}

impl Compiler {
    pub fn new(driver: CompilationDriver) -> Self {
        Self { driver }
    }

    /// The in-process toolchain with default limits.
    pub fn builtin() -> Self {
        Self::new(CompilationDriver::builtin())
    }

    /// The in-process toolchain with the call depth from `settings`.
    pub fn from_settings(settings: &CompilerSettings) -> Self {
        let loader = BuiltinLoader::with_max_call_depth(settings.max_call_depth);
        Self::new(CompilationDriver::builtin().with_loader(Arc::new(loader)))
    }

    /// Compile `body` as a method of `shape` and bind the result to it.
    pub fn compile_shape(
        &self,
        shape: &CallableShape,
        body: &str,
        options: &CompileOptions,
    ) -> Result<BoundCallable, Error> {
        let resolved = signature::resolve(shape)?;
        let names = signature::argument_names(options.argument_names.as_deref(), shape.arity())?;
        let parameters = signature::parameter_list(&resolved.parameters, &names)?;
        debug!(parameters = %parameters, result = %resolved.result_type_name, "declared signature");

        let request = options
            .request(body)
            .parameters(parameters)
            .return_type(resolved.result_type_name.clone())
            .usings(join_usings(&options.skeleton, &options.usings, &resolved.usings()));
        let source = source_gen::generate(&request)?;

        let references = options.references.iter().cloned().chain(shape.origins());
        let artifact = self.compile_source(&source, references, &options.emit)?;
        let entry = symbols::resolve(
            &artifact,
            &options.namespace_name,
            &options.class_name,
            &options.method_name,
        )?;
        binder::bind(entry, shape)
    }

    pub fn compile_delegate<D: Delegate>(&self, body: &str, options: &CompileOptions) -> Result<D, Error> {
        self.compile_shape(&D::shape(), body, options).map(D::from_bound)
    }

    pub fn compile_action<A: ArgList>(&self, body: &str, options: &CompileOptions) -> Result<Action<A>, Error> {
        self.compile_delegate(body, options)
    }

    pub fn compile_function<A: ArgList, R: HostType>(
        &self,
        body: &str,
        options: &CompileOptions,
    ) -> Result<Function<A, R>, Error> {
        self.compile_delegate(body, options)
    }

    /// Compile `body` with a hand-written parameter list and result type
    /// and return the unbound entry point.
    pub fn compile_method(
        &self,
        body: &str,
        parameters: &str,
        return_type: &str,
        options: &CompileOptions,
    ) -> Result<EntryPoint, Error> {
        let request = options.request(body).parameters(parameters).return_type(return_type);
        let source = source_gen::generate(&request)?;
        let artifact = self.compile_source(&source, options.references.iter().cloned(), &options.emit)?;
        symbols::resolve(
            &artifact,
            &options.namespace_name,
            &options.class_name,
            &options.method_name,
        )
    }

    /// Compile a complete compilation unit. Only the references and emit
    /// options of `options` apply.
    pub fn compile_assembly(&self, source: &str, options: &CompileOptions) -> Result<CompiledArtifact, Error> {
        self.compile_source(source, options.references.iter().cloned(), &options.emit)
    }

    fn compile_source(
        &self,
        source: &str,
        references: impl IntoIterator<Item = Arc<Reference>>,
        emit: &EmitOptions,
    ) -> Result<CompiledArtifact, Error> {
        debug!(source = %source, "generated compilation unit");
        let request = CompilationRequest::new(source, references)?;
        self.driver.compile(&request, emit)
    }
}

// ── Default compiler ────────────────────────────────────────────

static DEFAULT: LazyLock<Compiler> = LazyLock::new(Compiler::builtin);

pub fn generate_source(request: &GenerationRequest) -> Result<String, Error> {
    source_gen::generate(request)
}

pub fn compile_shape(shape: &CallableShape, body: &str, options: &CompileOptions) -> Result<BoundCallable, Error> {
    DEFAULT.compile_shape(shape, body, options)
}

pub fn compile_delegate<D: Delegate>(body: &str, options: &CompileOptions) -> Result<D, Error> {
    DEFAULT.compile_delegate(body, options)
}

pub fn compile_action<A: ArgList>(body: &str, options: &CompileOptions) -> Result<Action<A>, Error> {
    DEFAULT.compile_action(body, options)
}

pub fn compile_function<A: ArgList, R: HostType>(
    body: &str,
    options: &CompileOptions,
) -> Result<Function<A, R>, Error> {
    DEFAULT.compile_function(body, options)
}

pub fn compile_method(
    body: &str,
    parameters: &str,
    return_type: &str,
    options: &CompileOptions,
) -> Result<EntryPoint, Error> {
    DEFAULT.compile_method(body, parameters, return_type, options)
}

pub fn compile_assembly(source: &str, options: &CompileOptions) -> Result<CompiledArtifact, Error> {
    DEFAULT.compile_assembly(source, options)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::error::ExceptionKind;
    use crate::shape::{ParamMode, TypeDesc};
    use crate::value::{ObjectRef, Value};

    fn opts() -> CompileOptions {
        CompileOptions::default()
    }

    #[test]
    fn identity_in_both_body_forms() {
        let f = compile_function::<(i32,), i32>("it", &opts()).unwrap();
        assert_eq!(f.invoke((41,)).unwrap(), 41);
        let f = compile_function::<(String,), String>("return it;", &opts()).unwrap();
        assert_eq!(f.invoke(("hi".to_string(),)).unwrap(), "hi");
    }

    #[test]
    fn functions_of_every_arity() {
        let f = compile_function::<(), i32>("1", &opts()).unwrap();
        assert_eq!(f.invoke(()).unwrap(), 1);

        let f = compile_function::<(i32, i32), i32>("a + b", &opts().argument_names(["a", "b"])).unwrap();
        assert_eq!(f.invoke((1, 2)).unwrap(), 3);

        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let f = compile_function::<(i32, i32, i32, i32, i32, i32, i32, i32), i32>(
            "a + b + c + d + e + f + g + h",
            &opts().argument_names(names),
        )
        .unwrap();
        assert_eq!(f.invoke((1, 2, 3, 4, 5, 6, 7, 8)).unwrap(), 36);
    }

    #[test]
    fn mixed_argument_types() {
        let f = compile_function::<(i64, f64, bool), String>(
            "flag ? (count * scale).ToString() : \"off\"",
            &opts().argument_names(["count", "scale", "flag"]),
        )
        .unwrap();
        assert_eq!(f.invoke((3, 0.5, true)).unwrap(), "1.5");
        assert_eq!(f.invoke((3, 0.5, false)).unwrap(), "off");
    }

    #[test]
    fn actions_run_statements() {
        let a = compile_action::<()>("int x = 1; x++;", &opts()).unwrap();
        a.invoke(()).unwrap();

        let a = compile_action::<(i32,)>("if (it < 0) { int z = 1 / (it + it * -1); }", &opts()).unwrap();
        a.invoke((5,)).unwrap();
        let err = a.invoke((-5,)).unwrap_err();
        assert!(matches!(err, Error::Runtime { exception: ExceptionKind::DivideByZero, .. }));

        let a = compile_action::<(i32, String)>("var s = b + a;", &opts().argument_names(["a", "b"])).unwrap();
        a.invoke((1, "x".into())).unwrap();
    }

    struct Increment(BoundCallable);

    impl Delegate for Increment {
        fn shape() -> CallableShape {
            CallableShape::new().with_param(ParamMode::Ref, TypeDesc::int32())
        }

        fn from_bound(bound: BoundCallable) -> Self {
            Self(bound)
        }
    }

    #[test]
    fn ref_delegate_writes_back() {
        let inc: Increment = compile_delegate("x++;", &opts().argument_names(["x"])).unwrap();
        let mut args = [Value::Int(12)];
        assert_eq!(inc.0.invoke(&mut args).unwrap(), None);
        assert_eq!(args[0], Value::Int(13));
    }

    #[test]
    fn single_out_and_in_parameters() {
        let x = || opts().argument_names(["x"]);
        let out = CallableShape::new().with_param(ParamMode::Out, TypeDesc::int32());
        let bound = compile_shape(&out, "x = 13;", &x()).unwrap();
        let mut args = [Value::Null];
        bound.invoke(&mut args).unwrap();
        assert_eq!(args[0], Value::Int(13));

        let input = CallableShape::new()
            .with_param(ParamMode::In, TypeDesc::int32())
            .returning(TypeDesc::int32());
        let bound = compile_shape(&input, "x", &x()).unwrap();
        assert_eq!(bound.invoke(&mut [Value::Int(13)]).unwrap(), Some(Value::Int(13)));
    }

    #[test]
    fn out_and_in_parameters() {
        let shape = CallableShape::new()
            .with_param(ParamMode::Out, TypeDesc::string())
            .with_param(ParamMode::In, TypeDesc::int32())
            .returning(TypeDesc::boolean());
        let bound = compile_shape(
            &shape,
            "s = \"n=\" + n; return n > 0;",
            &opts().argument_names(["s", "n"]),
        )
        .unwrap();
        let mut args = [Value::string("ignored"), Value::Int(7)];
        assert_eq!(bound.invoke(&mut args).unwrap(), Some(Value::Bool(true)));
        assert_eq!(args[0], Value::string("n=7"));

        let err = compile_shape(&shape, "n = 1; s = \"\"; return true;", &opts().argument_names(["s", "n"]))
            .unwrap_err();
        assert_eq!(err.diagnostics()[0].code, "CS8331");
    }

    #[test]
    fn generic_result_types() {
        let f = compile_function::<(i32,), Vec<String>>(
            "var l = new List<string>(); l.Add(\"a\"); l.Add(it.ToString()); return l;",
            &opts(),
        )
        .unwrap();
        assert_eq!(f.invoke((3,)).unwrap(), ["a", "3"]);
    }

    #[test]
    fn extra_references_bring_data_classes() {
        let shop = Reference::builder("Shop")
            .class("Shop", "Item", |t| t.field("Price", TypeDesc::int32()))
            .build();
        let shape = CallableShape::new()
            .with_param(ParamMode::Value, shop.type_desc("Shop.Item").unwrap())
            .returning(TypeDesc::int32());
        // The library comes along through the parameter type.
        let bound = compile_shape(&shape, "it.Price * 2", &opts()).unwrap();

        let item = ObjectRef::new("Shop.Item", IndexMap::from([("Price".to_string(), Value::Int(21))]));
        assert_eq!(bound.invoke(&mut [Value::Object(item)]).unwrap(), Some(Value::Int(42)));
    }

    #[test]
    fn compile_method_exposes_the_entry_point() {
        let entry = compile_method("a + b", "int a, int b", "int", &opts()).unwrap();
        assert_eq!(entry.namespace(), "DynamicCompilation");
        assert_eq!(entry.signature().to_string(), "System.Int32(System.Int32, System.Int32)");
        let mut args = [Value::Int(1), Value::Int(2)];
        assert_eq!(entry.invoke_raw(&mut args).unwrap(), Value::Int(3));

        let named = opts().namespace_name("Calc").class_name("Ops").method_name("Sum");
        let entry = compile_method("return x;", "long x", "long", &named).unwrap();
        assert_eq!((entry.class_name(), entry.method_name()), ("Ops", "Sum"));
    }

    #[test]
    fn compilation_failures_carry_diagnostics() {
        let err = compile_function::<(i32,), i32>("it + \"x\"", &opts()).unwrap_err();
        assert_eq!(err.diagnostics()[0].code, "CS0029");
        assert!(err.to_string().starts_with("One or more errors happened during compilation:\nCS0029: "));

        let err = compile_action::<()>("int x = ", &opts()).unwrap_err();
        assert!(matches!(err, Error::CompilationFailed { .. }));
    }

    #[test]
    fn renamed_method_is_not_found() {
        let skeleton = "{0}\nnamespace {1} {{ public static class {2} {{ public static {3} Other({5}) {{ {6} }} }} }}";
        let err = compile_method("", "", "void", &opts().skeleton(skeleton)).unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));
        assert_eq!(
            err.to_string(),
            "Cannot find the method Execute of the class Executer in the given assembly, although the class is present."
        );

        let err = compile_method("", "", "void", &opts().namespace_name("Elsewhere").skeleton(
            "namespace Fixed {{ public static class {2} {{ public static void {4}() {{ }} }} }}",
        ))
        .unwrap_err();
        assert!(matches!(err, Error::TypeNotFound { .. }));
    }

    #[test]
    fn warnings_can_block() {
        let body = "int unused = 1;";
        compile_action::<()>(body, &opts()).unwrap();

        let strict = EmitOptions {
            warnings_as_errors: true,
            suppressed_warnings: Vec::new(),
        };
        let err = compile_action::<()>(body, &opts().emit_options(strict.clone())).unwrap_err();
        assert_eq!(err.diagnostics()[0].code, "CS0219");
        assert!(err.diagnostics()[0].is_warning_as_error);

        let relaxed = EmitOptions {
            suppressed_warnings: vec!["CS0219".into()],
            ..strict
        };
        compile_action::<()>(body, &opts().emit_options(relaxed)).unwrap();
    }

    #[test]
    fn typed_shapes_compile_cleanly_under_warnings_as_errors() {
        let strict = EmitOptions {
            warnings_as_errors: true,
            suppressed_warnings: Vec::new(),
        };
        let f = compile_function::<(i32,), i32>("it", &opts().emit_options(strict.clone())).unwrap();
        assert_eq!(f.invoke((5,)).unwrap(), 5);

        let f = compile_function::<(String,), String>("it", &opts().emit_options(strict)).unwrap();
        assert_eq!(f.invoke(("x".to_string(),)).unwrap(), "x");
    }

    #[test]
    fn derived_usings_skip_existing_directives() {
        let skeleton = defaults::SKELETON;
        assert_eq!(join_usings(skeleton, "", "using System;"), "");
        assert_eq!(join_usings(skeleton, "", "using System;\nusing Shop;"), "using Shop;");
        assert_eq!(join_usings("{0}", "using Shop;", "using Shop;\nusing System;"), "using Shop;\nusing System;");
        assert_eq!(join_usings("{0}", "", "using System;"), "using System;");
    }

    #[test]
    fn argument_name_count_must_match() {
        let err = compile_function::<(i32, i32), i32>("a", &opts()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        let err = compile_function::<(i32,), i32>("a", &opts().argument_names(["a", "b"])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn settings_limit_call_depth() {
        let settings = CompilerSettings {
            max_call_depth: 4,
            ..CompilerSettings::default()
        };
        let compiler = Compiler::from_settings(&settings);
        let source = "public static class R { public static int Down(int n) { return n == 0 ? 0 : Down(n - 1); } }";
        let artifact = compiler.compile_assembly(source, &opts()).unwrap();
        let down = symbols::resolve(&artifact, "", "R", "Down").unwrap();
        assert_eq!(down.invoke_raw(&mut [Value::Int(3)]).unwrap(), Value::Int(0));
        let err = down.invoke_raw(&mut [Value::Int(10)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::StackOverflow);
    }

    #[test]
    fn compiled_functions_are_shareable_across_threads() {
        let f = Arc::new(compile_function::<(i32,), i32>("it * it", &opts()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || f.invoke((i,)).unwrap())
            })
            .collect();
        let squares: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(squares, [0, 1, 4, 9]);
    }
}
