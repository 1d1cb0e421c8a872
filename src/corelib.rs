//! The libraries every compilation references by default.

use std::io::Write;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::reference::Reference;
use crate::shape::TypeDesc;
use crate::value::Value;

pub const CORE_LIB: &str = "System.Private.CoreLib";
pub const CONSOLE_LIB: &str = "System.Console";
pub const COLLECTIONS_LIB: &str = "System.Collections";

/// Names of the libraries [`library`] knows how to build.
pub const LIBRARY_NAMES: [&str; 3] = [CORE_LIB, CONSOLE_LIB, COLLECTIONS_LIB];

pub fn library(name: &str) -> Option<Arc<Reference>> {
    match name {
        CORE_LIB => Some(core()),
        CONSOLE_LIB => Some(console()),
        COLLECTIONS_LIB => Some(collections()),
        _ => None,
    }
}

// ── Argument helpers ────────────────────────────────────────────

fn arg(args: &[Value], index: usize) -> Result<&Value, RuntimeError> {
    args.get(index)
        .ok_or_else(|| RuntimeError::host(format!("missing argument {index}")))
}

fn int_arg(args: &[Value], index: usize) -> Result<i32, RuntimeError> {
    match arg(args, index)? {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::invalid_cast(&type_of(other), "System.Int32")),
    }
}

fn long_arg(args: &[Value], index: usize) -> Result<i64, RuntimeError> {
    match arg(args, index)? {
        Value::Long(l) => Ok(*l),
        other => Err(RuntimeError::invalid_cast(&type_of(other), "System.Int64")),
    }
}

fn double_arg(args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    match arg(args, index)? {
        Value::Double(d) => Ok(*d),
        other => Err(RuntimeError::invalid_cast(&type_of(other), "System.Double")),
    }
}

/// A string argument; null is `None`.
fn str_arg(args: &[Value], index: usize) -> Result<Option<&str>, RuntimeError> {
    match arg(args, index)? {
        Value::Null => Ok(None),
        Value::Str(s) => Ok(Some(&**s)),
        other => Err(RuntimeError::invalid_cast(&type_of(other), "System.String")),
    }
}

fn type_of(value: &Value) -> String {
    value.type_name().unwrap_or_else(|| "null".to_string())
}

fn overflow() -> RuntimeError {
    RuntimeError::host("Negating the minimum value of a twos complement number is invalid.")
}

// ── System.Private.CoreLib ──────────────────────────────────────

fn core() -> Arc<Reference> {
    let int = TypeDesc::int32;
    let long = TypeDesc::int64;
    let dbl = TypeDesc::double;
    let string_ty = TypeDesc::string;

    Reference::builder(CORE_LIB)
        .primitive("System", "Object", |t| t)
        .primitive("System", "Boolean", |t| t)
        .primitive("System", "Int32", |t| {
            t.constant("MaxValue", int(), Value::Int(i32::MAX))
                .constant("MinValue", int(), Value::Int(i32::MIN))
                .function("Parse", vec![string_ty()], Some(int()), |a| {
                    let s = str_arg(a, 0)?.ok_or_else(|| RuntimeError::host("Value cannot be null."))?;
                    s.trim().parse::<i32>().map(Value::Int).map_err(|_| {
                        RuntimeError::host(format!("The input string '{s}' was not in a correct format."))
                    })
                })
        })
        .primitive("System", "Int64", |t| {
            t.constant("MaxValue", long(), Value::Long(i64::MAX))
                .constant("MinValue", long(), Value::Long(i64::MIN))
        })
        .primitive("System", "Double", |t| {
            t.constant("NaN", dbl(), Value::Double(f64::NAN))
                .constant("PositiveInfinity", dbl(), Value::Double(f64::INFINITY))
                .constant("NegativeInfinity", dbl(), Value::Double(f64::NEG_INFINITY))
        })
        .primitive("System", "String", |t| {
            t.constant("Empty", string_ty(), Value::string(""))
                .function("IsNullOrEmpty", vec![string_ty()], Some(TypeDesc::boolean()), |a| {
                    Ok(Value::Bool(str_arg(a, 0)?.map_or(true, str::is_empty)))
                })
                .function("Concat", vec![string_ty(), string_ty()], Some(string_ty()), |a| {
                    let left = str_arg(a, 0)?.unwrap_or_default();
                    let right = str_arg(a, 1)?.unwrap_or_default();
                    Ok(Value::string(format!("{left}{right}")))
                })
        })
        .static_class("System", "Math", |t| {
            t.constant("PI", dbl(), Value::Double(std::f64::consts::PI))
                .constant("E", dbl(), Value::Double(std::f64::consts::E))
                .function("Abs", vec![int()], Some(int()), |a| {
                    int_arg(a, 0)?.checked_abs().map(Value::Int).ok_or_else(overflow)
                })
                .function("Abs", vec![long()], Some(long()), |a| {
                    long_arg(a, 0)?.checked_abs().map(Value::Long).ok_or_else(overflow)
                })
                .function("Abs", vec![dbl()], Some(dbl()), |a| Ok(Value::Double(double_arg(a, 0)?.abs())))
                .function("Max", vec![int(), int()], Some(int()), |a| {
                    Ok(Value::Int(int_arg(a, 0)?.max(int_arg(a, 1)?)))
                })
                .function("Max", vec![long(), long()], Some(long()), |a| {
                    Ok(Value::Long(long_arg(a, 0)?.max(long_arg(a, 1)?)))
                })
                .function("Max", vec![dbl(), dbl()], Some(dbl()), |a| {
                    Ok(Value::Double(double_arg(a, 0)?.max(double_arg(a, 1)?)))
                })
                .function("Min", vec![int(), int()], Some(int()), |a| {
                    Ok(Value::Int(int_arg(a, 0)?.min(int_arg(a, 1)?)))
                })
                .function("Min", vec![long(), long()], Some(long()), |a| {
                    Ok(Value::Long(long_arg(a, 0)?.min(long_arg(a, 1)?)))
                })
                .function("Min", vec![dbl(), dbl()], Some(dbl()), |a| {
                    Ok(Value::Double(double_arg(a, 0)?.min(double_arg(a, 1)?)))
                })
                .function("Sqrt", vec![dbl()], Some(dbl()), |a| Ok(Value::Double(double_arg(a, 0)?.sqrt())))
                .function("Pow", vec![dbl(), dbl()], Some(dbl()), |a| {
                    Ok(Value::Double(double_arg(a, 0)?.powf(double_arg(a, 1)?)))
                })
                .function("Floor", vec![dbl()], Some(dbl()), |a| Ok(Value::Double(double_arg(a, 0)?.floor())))
                .function("Ceiling", vec![dbl()], Some(dbl()), |a| Ok(Value::Double(double_arg(a, 0)?.ceil())))
                .function("Round", vec![dbl()], Some(dbl()), |a| {
                    // Banker's rounding, like Math.Round(double).
                    Ok(Value::Double(double_arg(a, 0)?.round_ties_even()))
                })
        })
        .build()
}

// ── System.Console ──────────────────────────────────────────────

fn write_out(text: &str, newline: bool) {
    let mut out = std::io::stdout().lock();
    let _ = if newline {
        writeln!(out, "{text}")
    } else {
        write!(out, "{text}")
    };
}

fn console() -> Arc<Reference> {
    Reference::builder(CONSOLE_LIB)
        .static_class("System", "Console", |t| {
            t.function("WriteLine", vec![], None, |_| {
                write_out("", true);
                Ok(Value::Null)
            })
            .function("WriteLine", vec![TypeDesc::string()], None, |a| {
                write_out(&arg(a, 0)?.to_string(), true);
                Ok(Value::Null)
            })
            .function("WriteLine", vec![TypeDesc::object()], None, |a| {
                write_out(&arg(a, 0)?.to_string(), true);
                Ok(Value::Null)
            })
            .function("Write", vec![TypeDesc::string()], None, |a| {
                write_out(&arg(a, 0)?.to_string(), false);
                Ok(Value::Null)
            })
            .function("Write", vec![TypeDesc::object()], None, |a| {
                write_out(&arg(a, 0)?.to_string(), false);
                Ok(Value::Null)
            })
        })
        .build()
}

// ── System.Collections ──────────────────────────────────────────

fn collections() -> Arc<Reference> {
    Reference::builder(COLLECTIONS_LIB).generic_list().build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn call(lib: &Reference, ty: &str, name: &str, params: &[&str], args: &[Value]) -> Result<Value, RuntimeError> {
        let def = lib.find(ty).unwrap();
        let (_, method) = def
            .methods_named(name)
            .find(|(_, m)| {
                m.params
                    .iter()
                    .map(|p| p.full_name().unwrap())
                    .eq(params.iter().map(|s| (*s).to_string()))
            })
            .unwrap();
        (method.func)(args)
    }

    #[test]
    fn math_overloads_are_typed() {
        let lib = core();
        let r = call(&lib, "System.Math", "Max", &["System.Int32", "System.Int32"], &[Value::Int(2), Value::Int(7)]);
        assert_eq!(r.unwrap(), Value::Int(7));
        let r = call(&lib, "System.Math", "Abs", &["System.Int32"], &[Value::Int(i32::MIN)]);
        assert_eq!(r.unwrap_err().kind, crate::error::ExceptionKind::Host);
        assert_eq!(
            call(&lib, "System.Math", "Round", &["System.Double"], &[Value::Double(2.5)]).unwrap(),
            Value::Double(2.0)
        );
    }

    #[test]
    fn string_helpers_treat_null_as_empty() {
        let lib = core();
        let r = call(&lib, "System.String", "IsNullOrEmpty", &["System.String"], &[Value::Null]);
        assert_eq!(r.unwrap(), Value::Bool(true));
        let r = call(&lib, "System.String", "Concat", &["System.String", "System.String"], &[Value::Null, Value::string("x")]);
        assert_eq!(r.unwrap(), Value::string("x"));
    }

    #[test]
    fn known_libraries_resolve() {
        for name in LIBRARY_NAMES {
            assert_eq!(library(name).unwrap().name(), name);
        }
        assert!(library("System.Drawing").is_none());
    }
}
