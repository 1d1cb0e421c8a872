//! Binds resolved entry points to callable shapes and invokes them.

use std::fmt;
use std::marker::PhantomData;

use tracing::debug;

use crate::error::Error;
use crate::shape::{ArgList, CallableShape, HostType, ParamMode, TypeDesc};
use crate::symbols::EntryPoint;
use crate::value::Value;

/// An entry point checked against the shape it was requested with.
#[derive(Debug, Clone)]
pub struct BoundCallable {
    entry: EntryPoint,
    shape: CallableShape,
}

pub fn bind(entry: EntryPoint, shape: &CallableShape) -> Result<BoundCallable, Error> {
    let signature = entry.signature();
    let method = format!("{}.{}", entry.class_name(), entry.method_name());

    if signature.params.len() != shape.arity() {
        return Err(Error::binding_mismatch(format!(
            "The method {method} takes {} parameters but {} were requested.",
            signature.params.len(),
            shape.arity()
        )));
    }

    for (index, (param, spec)) in signature.params.iter().zip(shape.params()).enumerate() {
        let requested = spec.ty.full_name()?;
        if param.mode != spec.mode || param.type_name != requested {
            return Err(Error::binding_mismatch(format!(
                "Parameter {} of {method} is '{}{}' but '{}{requested}' was requested.",
                index + 1,
                prefix(param.mode.modifier()),
                param.type_name,
                prefix(spec.mode.modifier()),
            )));
        }
    }

    let requested_result = shape.result().map(TypeDesc::full_name).transpose()?;
    if signature.result != requested_result {
        return Err(Error::binding_mismatch(format!(
            "The method {method} returns {} but {} was requested.",
            signature.result.as_deref().unwrap_or("void"),
            requested_result.as_deref().unwrap_or("void"),
        )));
    }

    debug!(method = %method, arity = shape.arity(), "bound entry point");
    Ok(BoundCallable {
        entry,
        shape: shape.clone(),
    })
}

fn prefix(modifier: Option<&str>) -> String {
    modifier.map(|m| format!("{m} ")).unwrap_or_default()
}

impl BoundCallable {
    pub fn shape(&self) -> &CallableShape {
        &self.shape
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    /// Invoke with one slot per parameter. `out` slots are reset to their
    /// type's default first; `ref` and `out` slots hold the final values
    /// afterwards. Returns the result, or `None` for shapes without one.
    pub fn invoke(&self, args: &mut [Value]) -> Result<Option<Value>, Error> {
        if args.len() != self.shape.arity() {
            return Err(Error::argument_mismatch(format!(
                "Expected {} arguments but got {}.",
                self.shape.arity(),
                args.len()
            )));
        }

        for (index, (spec, arg)) in self.shape.params().iter().zip(args.iter_mut()).enumerate() {
            if spec.mode == ParamMode::Out {
                *arg = spec.ty.default_value();
            } else if !spec.ty.accepts(arg) {
                return Err(Error::argument_mismatch(format!(
                    "Argument {}: expected {} but got {}.",
                    index + 1,
                    spec.ty.full_name()?,
                    arg.type_name().as_deref().unwrap_or("null")
                )));
            }
        }

        let result = self.entry.invoke_raw(args)?;
        Ok(self.shape.result().map(|_| result))
    }
}

// ── Typed wrappers ──────────────────────────────────────────────

/// A Rust type that a bound callable can be turned into.
pub trait Delegate: Sized {
    fn shape() -> CallableShape;
    fn from_bound(bound: BoundCallable) -> Self;
}

/// Callable taking the arguments `A` by value, without a result.
pub struct Action<A> {
    bound: BoundCallable,
    _args: PhantomData<fn(A)>,
}

impl<A> fmt::Debug for Action<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("bound", &self.bound).finish()
    }
}

impl<A: ArgList> Action<A> {
    pub fn invoke(&self, args: A) -> Result<(), Error> {
        let mut values = args.into_values();
        self.bound.invoke(&mut values)?;
        Ok(())
    }

    pub fn bound(&self) -> &BoundCallable {
        &self.bound
    }
}

impl<A: ArgList> Delegate for Action<A> {
    fn shape() -> CallableShape {
        CallableShape::from_args::<A>()
    }

    fn from_bound(bound: BoundCallable) -> Self {
        Self {
            bound,
            _args: PhantomData,
        }
    }
}

/// Callable taking the arguments `A` by value and returning `R`.
pub struct Function<A, R> {
    bound: BoundCallable,
    _sig: PhantomData<fn(A) -> R>,
}

impl<A, R> fmt::Debug for Function<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("bound", &self.bound).finish()
    }
}

impl<A: ArgList, R: HostType> Function<A, R> {
    pub fn invoke(&self, args: A) -> Result<R, Error> {
        let mut values = args.into_values();
        let result = self.bound.invoke(&mut values)?;
        R::from_value(result.unwrap_or(Value::Null))
    }

    pub fn bound(&self) -> &BoundCallable {
        &self.bound
    }
}

impl<A: ArgList, R: HostType> Delegate for Function<A, R> {
    fn shape() -> CallableShape {
        CallableShape::from_args::<A>().returning(R::type_desc())
    }

    fn from_bound(bound: BoundCallable) -> Self {
        Self {
            bound,
            _sig: PhantomData,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifact::{CompiledArtifact, LoadedModule, MethodHandle, MethodSignature, SignatureParam, TypeHandle};
    use crate::error::RuntimeError;
    use crate::symbols;

    /// One class `Demo.Calc` with `int Twice(int)` and `void Bump(ref int)`.
    #[derive(Debug)]
    struct CalcModule {
        signatures: Vec<MethodSignature>,
    }

    impl CalcModule {
        fn artifact() -> CompiledArtifact {
            let int = "System.Int32".to_string();
            let param = |mode| SignatureParam { name: "x".into(), mode, type_name: int.clone() };
            CompiledArtifact::new(Arc::new(Self {
                signatures: vec![
                    MethodSignature { params: vec![param(ParamMode::Value)], result: Some(int.clone()) },
                    MethodSignature { params: vec![param(ParamMode::Ref)], result: None },
                ],
            }))
        }
    }

    impl LoadedModule for CalcModule {
        fn name(&self) -> &str {
            "calc"
        }

        fn find_type(&self, full_name: &str) -> Option<TypeHandle> {
            (full_name == "Demo.Calc").then_some(TypeHandle(0))
        }

        fn find_static_method(&self, _ty: TypeHandle, name: &str) -> Option<MethodHandle> {
            match name {
                "Twice" => Some(MethodHandle(0)),
                "Bump" => Some(MethodHandle(1)),
                _ => None,
            }
        }

        fn signature(&self, method: MethodHandle) -> Option<&MethodSignature> {
            self.signatures.get(method.0 as usize)
        }

        fn invoke(&self, method: MethodHandle, args: &mut [Value]) -> Result<Value, RuntimeError> {
            match (method.0, args) {
                (0, [Value::Int(x)]) => Ok(Value::Int(*x * 2)),
                (1, [Value::Int(x)]) => {
                    *x += 1;
                    Ok(Value::Null)
                }
                _ => Err(RuntimeError::invalid_operation("unexpected call")),
            }
        }
    }

    fn int_shape(mode: ParamMode) -> CallableShape {
        CallableShape::new().with_param(mode, TypeDesc::int32())
    }

    #[test]
    fn bind_checks_modes_and_result() {
        let artifact = CalcModule::artifact();
        let twice = symbols::resolve(&artifact, "Demo", "Calc", "Twice").unwrap();
        let err = bind(twice.clone(), &int_shape(ParamMode::Value)).unwrap_err();
        assert!(err.to_string().contains("returns System.Int32 but void"));
        let err = bind(twice.clone(), &int_shape(ParamMode::Ref).returning(TypeDesc::int32())).unwrap_err();
        assert!(matches!(err, Error::BindingMismatch { .. }));
        let bound = bind(twice, &int_shape(ParamMode::Value).returning(TypeDesc::int32())).unwrap();
        assert_eq!(bound.invoke(&mut [Value::Int(21)]).unwrap(), Some(Value::Int(42)));
    }

    #[test]
    fn invoke_validates_arguments_and_writes_back() {
        let artifact = CalcModule::artifact();
        let bump = symbols::resolve(&artifact, "Demo", "Calc", "Bump").unwrap();
        let bound = bind(bump, &int_shape(ParamMode::Ref)).unwrap();

        let mut args = [Value::Int(12)];
        assert_eq!(bound.invoke(&mut args).unwrap(), None);
        assert_eq!(args[0], Value::Int(13));

        let err = bound.invoke(&mut [Value::string("12")]).unwrap_err();
        assert!(matches!(err, Error::ArgumentMismatch { .. }));
        let err = bound.invoke(&mut []).unwrap_err();
        assert!(matches!(err, Error::ArgumentMismatch { .. }));
    }
}
