use std::fmt;

use indexmap::IndexMap;

use super::builtins;
use super::compiler::Op;
use super::image::Image;
use crate::error::{ExceptionKind, RuntimeError};
use crate::reference::HostFn;
use crate::value::{self, ListRef, ObjectRef, Value};

/// Nested calls allowed before a `StackOverflowException`.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// An import after linking against the host libraries.
#[derive(Clone)]
pub enum Linked {
    Function {
        func: HostFn,
        arity: usize,
        returns: bool,
    },
    /// Host data class with its fields' default values.
    Class {
        type_name: String,
        fields: Vec<(String, Value)>,
    },
}

impl fmt::Debug for Linked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linked::Function { arity, returns, .. } => f
                .debug_struct("Function")
                .field("arity", arity)
                .field("returns", returns)
                .finish_non_exhaustive(),
            Linked::Class { type_name, .. } => f.debug_struct("Class").field("type_name", type_name).finish(),
        }
    }
}

fn bad_image(what: impl fmt::Display) -> RuntimeError {
    RuntimeError::invalid_operation(format!("invalid module image: {what}"))
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RuntimeError> {
    stack.pop().ok_or_else(|| bad_image("stack underflow"))
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, RuntimeError> {
    let at = stack.len().checked_sub(n).ok_or_else(|| bad_image("stack underflow"))?;
    Ok(stack.split_off(at))
}

fn pop_bool(stack: &mut Vec<Value>) -> Result<bool, RuntimeError> {
    match pop(stack)? {
        Value::Bool(b) => Ok(b),
        other => Err(bad_image(format_args!("expected a bool, found {other:?}"))),
    }
}

struct Frame {
    method: u32,
    pc: usize,
    locals: Vec<Value>,
}

/// Executes the methods of one linked image.
pub struct Machine<'a> {
    pub image: &'a Image,
    pub imports: &'a [Linked],
    pub max_call_depth: usize,
}

impl Machine<'_> {
    fn frame(&self, method: u32, args: Vec<Value>) -> Result<Frame, RuntimeError> {
        let image = self
            .image
            .methods
            .get(method as usize)
            .ok_or_else(|| bad_image(format_args!("no method {method}")))?;
        let mut locals = args;
        locals.resize(usize::from(image.local_count).max(locals.len()), Value::Null);
        Ok(Frame { method, pc: 0, locals })
    }

    fn param_count(&self, method: u32) -> Result<usize, RuntimeError> {
        self.image
            .methods
            .get(method as usize)
            .map(|m| m.signature.params.len())
            .ok_or_else(|| bad_image(format_args!("no method {method}")))
    }

    fn string(&self, index: u32) -> Result<&str, RuntimeError> {
        self.image
            .strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| bad_image(format_args!("no string {index}")))
    }

    fn import(&self, index: u32) -> Result<&Linked, RuntimeError> {
        self.imports
            .get(index as usize)
            .ok_or_else(|| bad_image(format_args!("no import {index}")))
    }

    /// Run `method` with one argument per parameter. By-ref slots of
    /// `args` receive the final values of their parameters.
    pub fn run(&self, method: u32, args: &mut [Value]) -> Result<Value, RuntimeError> {
        let expected = self.param_count(method)?;
        if args.len() != expected {
            return Err(RuntimeError::invalid_operation(format!(
                "expected {expected} arguments, got {}",
                args.len()
            )));
        }
        let mut frames = vec![self.frame(method, args.to_vec())?];
        let mut stack: Vec<Value> = Vec::new();

        loop {
            let Some(frame) = frames.last_mut() else {
                return Err(bad_image("no active frame"));
            };
            let code = &self
                .image
                .methods
                .get(frame.method as usize)
                .ok_or_else(|| bad_image("no method"))?
                .code;
            let op = *code
                .get(frame.pc)
                .ok_or_else(|| bad_image("execution ran past the end of a method"))?;
            frame.pc += 1;

            match op {
                Op::Const(i) => {
                    let constant = self
                        .image
                        .constants
                        .get(i as usize)
                        .ok_or_else(|| bad_image(format_args!("no constant {i}")))?;
                    stack.push(constant.to_value());
                }
                Op::LoadLocal(i) => {
                    let value = frame
                        .locals
                        .get(usize::from(i))
                        .ok_or_else(|| bad_image(format_args!("no local {i}")))?;
                    stack.push(value.clone());
                }
                Op::StoreLocal(i) => {
                    let value = pop(&mut stack)?;
                    let slot = frame
                        .locals
                        .get_mut(usize::from(i))
                        .ok_or_else(|| bad_image(format_args!("no local {i}")))?;
                    *slot = value;
                }
                Op::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| bad_image("stack underflow"))?;
                    stack.push(top);
                }
                Op::Pop => {
                    pop(&mut stack)?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(arith(op, a, b)?);
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(compare(op, &a, &b)?));
                }
                Op::Eq | Op::Ne => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool((a == b) == (op == Op::Eq)));
                }
                Op::Concat => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::string(format!("{a}{b}")));
                }
                Op::Neg => {
                    let value = match pop(&mut stack)? {
                        Value::Int(i) => Value::Int(i.wrapping_neg()),
                        Value::Long(l) => Value::Long(l.wrapping_neg()),
                        Value::Double(d) => Value::Double(-d),
                        other => return Err(bad_image(format_args!("cannot negate {other:?}"))),
                    };
                    stack.push(value);
                }
                Op::Not => {
                    let b = pop_bool(&mut stack)?;
                    stack.push(Value::Bool(!b));
                }
                Op::Convert(conv) => {
                    let value = pop(&mut stack)?;
                    stack.push(conv.apply(&value));
                }
                Op::CastTo(name) => {
                    let target = self.string(name)?;
                    let value = pop(&mut stack)?;
                    stack.push(cast(value, target)?);
                }
                Op::Jump(target) => frame.pc = target as usize,
                Op::JumpIfFalse(target) => {
                    if !pop_bool(&mut stack)? {
                        frame.pc = target as usize;
                    }
                }
                Op::JumpIfTrue(target) => {
                    if pop_bool(&mut stack)? {
                        frame.pc = target as usize;
                    }
                }
                Op::Call(method) => {
                    if frames.len() >= self.max_call_depth {
                        return Err(RuntimeError::new(
                            ExceptionKind::StackOverflow,
                            format!(
                                "Operation caused a stack overflow (more than {} nested calls).",
                                self.max_call_depth
                            ),
                        ));
                    }
                    let args = pop_n(&mut stack, self.param_count(method)?)?;
                    frames.push(self.frame(method, args)?);
                }
                Op::CallHost(import) => {
                    let Linked::Function { func, arity, returns } = self.import(import)? else {
                        return Err(bad_image(format_args!("import {import} is not a function")));
                    };
                    let args = pop_n(&mut stack, *arity)?;
                    let result = func(&args)?;
                    if *returns {
                        stack.push(result);
                    }
                }
                Op::Intrinsic(intrinsic) => {
                    let args = pop_n(&mut stack, intrinsic.arity())?;
                    let receiver = pop(&mut stack)?;
                    if let Some(result) = builtins::apply(intrinsic, &receiver, &args)? {
                        stack.push(result);
                    }
                }
                Op::NewList(element) => {
                    stack.push(Value::List(ListRef::new(self.string(element)?)));
                }
                Op::NewObject(import) => {
                    let Linked::Class { type_name, fields } = self.import(import)? else {
                        return Err(bad_image(format_args!("import {import} is not a class")));
                    };
                    let fields: IndexMap<String, Value> = fields.iter().cloned().collect();
                    stack.push(Value::Object(ObjectRef::new(type_name, fields)));
                }
                Op::LoadField(name) => {
                    let name = self.string(name)?;
                    let value = match pop(&mut stack)? {
                        Value::Object(object) => object
                            .get(name)
                            .ok_or_else(|| RuntimeError::invalid_operation(format!("no field '{name}'")))?,
                        Value::Null => return Err(RuntimeError::null_reference(name)),
                        other => return Err(bad_image(format_args!("no field '{name}' on {other:?}"))),
                    };
                    stack.push(value);
                }
                Op::StoreField(name) => {
                    let name = self.string(name)?;
                    let value = pop(&mut stack)?;
                    match pop(&mut stack)? {
                        Value::Object(object) => {
                            if !object.set(name, value.clone()) {
                                return Err(RuntimeError::invalid_operation(format!("no field '{name}'")));
                            }
                        }
                        Value::Null => return Err(RuntimeError::null_reference(name)),
                        other => return Err(bad_image(format_args!("no field '{name}' on {other:?}"))),
                    }
                    stack.push(value);
                }
                Op::Return | Op::ReturnVoid => {
                    let result = if op == Op::Return { Some(pop(&mut stack)?) } else { None };
                    let Some(done) = frames.pop() else {
                        return Err(bad_image("no active frame"));
                    };
                    let params = &self
                        .image
                        .methods
                        .get(done.method as usize)
                        .ok_or_else(|| bad_image("no method"))?
                        .signature
                        .params;
                    if frames.is_empty() {
                        for (i, param) in params.iter().enumerate() {
                            if param.mode.writes_back() {
                                args[i] = done.locals[i].clone();
                            }
                        }
                        return Ok(result.unwrap_or(Value::Null));
                    }
                    stack.extend(result);
                    for (i, param) in params.iter().enumerate() {
                        if param.mode.writes_back() {
                            stack.push(done.locals[i].clone());
                        }
                    }
                }
            }
        }
    }
}

fn arith(op: Op, a: Value, b: Value) -> Result<Value, RuntimeError> {
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(match op {
            Op::Add => x.wrapping_add(y),
            Op::Sub => x.wrapping_sub(y),
            Op::Mul => x.wrapping_mul(y),
            Op::Div | Op::Rem if y == 0 => return Err(RuntimeError::divide_by_zero()),
            Op::Div => x.wrapping_div(y),
            _ => x.wrapping_rem(y),
        }),
        (Value::Long(x), Value::Long(y)) => Value::Long(match op {
            Op::Add => x.wrapping_add(y),
            Op::Sub => x.wrapping_sub(y),
            Op::Mul => x.wrapping_mul(y),
            Op::Div | Op::Rem if y == 0 => return Err(RuntimeError::divide_by_zero()),
            Op::Div => x.wrapping_div(y),
            _ => x.wrapping_rem(y),
        }),
        (Value::Double(x), Value::Double(y)) => Value::Double(match op {
            Op::Add => x + y,
            Op::Sub => x - y,
            Op::Mul => x * y,
            Op::Div => x / y,
            _ => x % y,
        }),
        (a, b) => return Err(bad_image(format_args!("{op:?} on {a:?} and {b:?}"))),
    })
}

fn compare(op: Op, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::Long(x), Value::Long(y)) => x.partial_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        _ => return Err(bad_image(format_args!("{op:?} on {a:?} and {b:?}"))),
    };
    // NaN compares false with everything.
    Ok(ordering.is_some_and(|o| match op {
        Op::Lt => o.is_lt(),
        Op::Le => o.is_le(),
        Op::Gt => o.is_gt(),
        _ => o.is_ge(),
    }))
}

/// Checked conversion of an `object` to `target`.
fn cast(value: Value, target: &str) -> Result<Value, RuntimeError> {
    if target == value::OBJECT {
        return Ok(value);
    }
    let Some(actual) = value.type_name() else {
        let value_type = matches!(target, value::BOOLEAN | value::INT32 | value::INT64 | value::DOUBLE);
        return if value_type {
            Err(RuntimeError::null_reference(target))
        } else {
            Ok(Value::Null)
        };
    };
    if actual == target {
        Ok(value)
    } else {
        Err(RuntimeError::invalid_cast(&actual, target))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corelib;
    use crate::reference::ReferenceSet;
    use crate::toolchain::{compiler::compile, lexer::lex, parser::parse, typeck::type_check};

    fn image(src: &str) -> Image {
        let refs: ReferenceSet = corelib::LIBRARY_NAMES.iter().filter_map(|n| corelib::library(n)).collect();
        let checked = type_check(&parse(lex(src).unwrap()).unwrap(), &refs);
        assert!(checked.diagnostics.iter().all(|d| !d.is_error()), "{:?}", checked.diagnostics);
        compile(&checked.program, "test").unwrap()
    }

    fn run(src: &str, args: &mut [Value]) -> Result<Value, RuntimeError> {
        let image = image(src);
        let machine = Machine {
            image: &image,
            imports: &[],
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        };
        machine.run(0, args)
    }

    fn eval(ret: &str, body: &str) -> Value {
        run(&format!("static class C {{ static {ret} M() {{ {body} }} }}"), &mut []).unwrap()
    }

    #[test]
    fn arithmetic_and_control_flow() {
        assert_eq!(eval("int", "int s = 0; for (int i = 1; i <= 10; i++) s += i; return s;"), Value::Int(55));
        assert_eq!(eval("long", "long x = 3; x *= 4; return x - 1;"), Value::Long(11));
        assert_eq!(eval("double", "int a = 7; return a / 2.0;"), Value::Double(3.5));
        assert_eq!(eval("int", "int a = 7; int b = -2; return a / b + a % b;"), Value::Int(-2));
        assert_eq!(eval("int", "int x = int.MaxValue; x++; return x;"), Value::Int(i32::MIN));
        assert_eq!(
            eval("string", "string s = \"a\"; int n = 2; s += n; return s + null + true;"),
            Value::string("a2True")
        );
    }

    #[test]
    fn loops_with_break_and_continue() {
        let body = "int n = 0; int i = 0; while (true) { i++; if (i % 2 == 0) continue; if (i > 9) break; n += i; } return n;";
        assert_eq!(eval("int", body), Value::Int(25));
    }

    #[test]
    fn short_circuit_skips_the_right_side() {
        let src = "static class C { static bool M() { int x = 0; bool r = x != 0 && 10 / x > 1; return r || x == 0; } }";
        assert_eq!(run(src, &mut []).unwrap(), Value::Bool(true));
    }

    #[test]
    fn recursion_and_stack_overflow() {
        let src = "static class C { public static int F(int n) { return n <= 1 ? 1 : n * F(n - 1); } }";
        assert_eq!(run(src, &mut [Value::Int(10)]).unwrap(), Value::Int(3_628_800));

        let src = "static class C { public static int F(int n) { return F(n + 1); } }";
        let err = run(src, &mut [Value::Int(0)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::StackOverflow);
    }

    #[test]
    fn by_ref_values_flow_back() {
        let src = "static class C {\n\
                   public static void Entry(ref int a, out string s) { Bump(ref a); Bump(ref a); s = \"n=\" + a; }\n\
                   static void Bump(ref int v) { v = v + 1; }\n\
                   }";
        let mut args = [Value::Int(12), Value::Null];
        assert_eq!(run(src, &mut args).unwrap(), Value::Null);
        assert_eq!(args, [Value::Int(14), Value::string("n=14")]);
    }

    #[test]
    fn runtime_exceptions() {
        let src = "static class C { public static int F(int d) { return 10 / d; } }";
        assert_eq!(run(src, &mut [Value::Int(0)]).unwrap_err().kind, ExceptionKind::DivideByZero);

        let src = "static class C { public static int F(object o) { return (int)o; } }";
        assert_eq!(run(src, &mut [Value::Int(4)]).unwrap(), Value::Int(4));
        assert_eq!(run(src, &mut [Value::string("x")]).unwrap_err().kind, ExceptionKind::InvalidCast);
        assert_eq!(run(src, &mut [Value::Null]).unwrap_err().kind, ExceptionKind::NullReference);

        let src = "static class C { public static int F(string s) { return s.Length; } }";
        assert_eq!(run(src, &mut [Value::Null]).unwrap_err().kind, ExceptionKind::NullReference);
    }

    #[test]
    fn argument_count_is_checked() {
        let src = "static class C { public static int F(int a) { return a; } }";
        assert_eq!(run(src, &mut []).unwrap_err().kind, ExceptionKind::InvalidOperation);
    }

    #[test]
    fn nan_comparisons_are_false() {
        assert_eq!(eval("bool", "double n = 0.0 / 0.0; return n < 1.0 || n >= 1.0 || n == n;"), Value::Bool(false));
    }
}
