use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::ast::Span;
use super::builtins::IntrinsicOp;
use super::error::CompileError;
use super::image::{ClassImage, Constant, Image, Import, MethodImage, FORMAT_VERSION};
use super::typeck::{
    ArithOp, Conversion, Place, Ty, TypedArg, TypedExpr, TypedExprKind, TypedMethod, TypedProgram, TypedStmt,
    TypedStmtKind,
};
use crate::artifact::{MethodSignature, SignatureParam};
use crate::shape::ParamMode;
use crate::value::Value;

/// Numeric conversion between the primitive number types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumConv {
    IntToLong,
    IntToDouble,
    LongToDouble,
    LongToInt,
    DoubleToInt,
    DoubleToLong,
}

impl NumConv {
    /// Convert `value`. Narrowing truncates; doubles saturate and NaN
    /// becomes zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(self, value: &Value) -> Value {
        match (self, value) {
            (NumConv::IntToLong, Value::Int(i)) => Value::Long(i64::from(*i)),
            (NumConv::IntToDouble, Value::Int(i)) => Value::Double(f64::from(*i)),
            (NumConv::LongToDouble, Value::Long(l)) => Value::Double(*l as f64),
            (NumConv::LongToInt, Value::Long(l)) => Value::Int(*l as i32),
            (NumConv::DoubleToInt, Value::Double(d)) => Value::Int(*d as i32),
            (NumConv::DoubleToLong, Value::Double(d)) => Value::Long(*d as i64),
            (_, other) => other.clone(),
        }
    }
}

/// Bytecode operations for the stack machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push a constant from the pool.
    Const(u32),
    LoadLocal(u16),
    /// Pop into a local slot.
    StoreLocal(u16),
    Dup,
    Pop,

    // Arithmetic, on two operands of the same numeric type
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    /// String concatenation; null renders as empty.
    Concat,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,

    Convert(NumConv),
    /// Checked conversion from `object` to the named type.
    CastTo(u32),

    Jump(u32),
    /// Pop a bool and jump when false.
    JumpIfFalse(u32),
    JumpIfTrue(u32),

    /// Call a method of this module. Pops the arguments; pushes the result
    /// (unless void) followed by the final value of each `ref`/`out`
    /// parameter in order.
    Call(u32),
    /// Call an imported host function.
    CallHost(u32),
    /// Pop the arguments and the receiver, push the result if any.
    Intrinsic(IntrinsicOp),
    /// Push an empty list of the named element type.
    NewList(u32),
    /// Push a new instance of an imported host class.
    NewObject(u32),
    /// Pop an object, push the named field.
    LoadField(u32),
    /// Pop a value and an object, set the field, push the value back.
    StoreField(u32),

    /// Return the top of the stack.
    Return,
    ReturnVoid,
}

/// Lower a checked program to a module image.
pub fn compile(program: &TypedProgram, module_name: &str) -> Result<Image, CompileError> {
    let mut pools = Pools::default();
    let mut methods = Vec::with_capacity(program.methods.len());
    for method in &program.methods {
        methods.push(compile_method(program, method, &mut pools)?);
    }
    Ok(Image {
        format_version: FORMAT_VERSION,
        module_name: module_name.to_string(),
        constants: pools.constants,
        strings: pools.strings.into_iter().collect(),
        imports: pools.imports.into_iter().collect(),
        classes: program
            .classes
            .iter()
            .map(|c| ClassImage {
                full_name: c.full_name.clone(),
                is_public: c.is_public,
                is_static: c.is_static,
                methods: c.methods.clone(),
            })
            .collect(),
        methods,
    })
}

fn signature(method: &TypedMethod) -> MethodSignature {
    MethodSignature {
        params: method
            .params
            .iter()
            .map(|p| SignatureParam {
                name: p.name.clone(),
                mode: p.mode,
                type_name: p.ty.full_name(),
            })
            .collect(),
        result: match method.ret {
            Ty::Void => None,
            ref ty => Some(ty.full_name()),
        },
    }
}

fn compile_method(program: &TypedProgram, method: &TypedMethod, pools: &mut Pools) -> Result<MethodImage, CompileError> {
    let mut gen = MethodGen {
        program,
        pools,
        ops: Vec::new(),
        loops: Vec::new(),
        local_count: method.locals.len(),
        span: method.span,
    };
    for stmt in &method.body {
        gen.compile_stmt(stmt)?;
    }
    if method.ret == Ty::Void {
        gen.emit(Op::ReturnVoid);
    }
    let local_count = u16::try_from(gen.local_count)
        .map_err(|_| CompileError::unsupported("more than 65535 locals", method.span))?;
    Ok(MethodImage {
        name: method.name.clone(),
        class: method.class,
        is_public: method.is_public,
        is_static: method.is_static,
        signature: signature(method),
        local_count,
        code: gen.ops,
    })
}

// ── Pools ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Pools {
    constants: Vec<Constant>,
    strings: IndexSet<String>,
    imports: IndexSet<Import>,
}

fn index(len: usize, what: &str, span: Span) -> Result<u32, CompileError> {
    u32::try_from(len).map_err(|_| CompileError::unsupported(&format!("more than 4294967295 {what}"), span))
}

impl Pools {
    fn constant(&mut self, value: &Constant, span: Span) -> Result<u32, CompileError> {
        if let Some(i) = self.constants.iter().position(|c| c.same(value)) {
            return index(i, "constants", span);
        }
        let i = index(self.constants.len(), "constants", span)?;
        self.constants.push(value.clone());
        Ok(i)
    }

    fn string(&mut self, s: &str, span: Span) -> Result<u32, CompileError> {
        let (i, _) = self.strings.insert_full(s.to_string());
        index(i, "strings", span)
    }

    fn import(&mut self, import: Import, span: Span) -> Result<u32, CompileError> {
        let (i, _) = self.imports.insert_full(import);
        index(i, "imports", span)
    }
}

// ── Method bodies ──────────────────────────────────────────────────

#[derive(Default)]
struct LoopLabels {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct MethodGen<'a> {
    program: &'a TypedProgram,
    pools: &'a mut Pools,
    ops: Vec<Op>,
    loops: Vec<LoopLabels>,
    /// Declared locals plus temporaries allocated so far.
    local_count: usize,
    span: Span,
}

fn arith(op: ArithOp) -> Op {
    match op {
        ArithOp::Add => Op::Add,
        ArithOp::Sub => Op::Sub,
        ArithOp::Mul => Op::Mul,
        ArithOp::Div => Op::Div,
        ArithOp::Rem => Op::Rem,
        ArithOp::Concat => Op::Concat,
        ArithOp::Eq => Op::Eq,
        ArithOp::Ne => Op::Ne,
        ArithOp::Lt => Op::Lt,
        ArithOp::Le => Op::Le,
        ArithOp::Gt => Op::Gt,
        ArithOp::Ge => Op::Ge,
    }
}

fn one(ty: &Ty) -> Constant {
    match ty {
        Ty::Long => Constant::Long(1),
        Ty::Double => Constant::Double(1.0),
        _ => Constant::Int(1),
    }
}

impl MethodGen<'_> {
    fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    fn offset(&self) -> Result<u32, CompileError> {
        index(self.ops.len(), "instructions", self.span)
    }

    /// Emit a jump whose target is patched later.
    fn emit_jump(&mut self, op: fn(u32) -> Op) -> usize {
        self.ops.push(op(0));
        self.ops.len() - 1
    }

    fn patch(&mut self, at: usize, target: u32) {
        match &mut self.ops[at] {
            Op::Jump(dest) | Op::JumpIfFalse(dest) | Op::JumpIfTrue(dest) => *dest = target,
            _ => {}
        }
    }

    fn patch_here(&mut self, at: usize) -> Result<(), CompileError> {
        let target = self.offset()?;
        self.patch(at, target);
        Ok(())
    }

    fn emit_const(&mut self, value: &Constant) -> Result<(), CompileError> {
        let i = self.pools.constant(value, self.span)?;
        self.emit(Op::Const(i));
        Ok(())
    }

    fn temp(&mut self) -> Result<u16, CompileError> {
        let slot = u16::try_from(self.local_count)
            .map_err(|_| CompileError::unsupported("more than 65535 locals", self.span))?;
        self.local_count += 1;
        Ok(slot)
    }

    // ── Statements ─────────────────────────────────────────────────

    fn compile_stmt(&mut self, stmt: &TypedStmt) -> Result<(), CompileError> {
        match &stmt.kind {
            TypedStmtKind::Block(stmts) => {
                for s in stmts {
                    self.compile_stmt(s)?;
                }
            }
            TypedStmtKind::Expr(expr) => self.compile_effect(expr)?,
            TypedStmtKind::Return(Some(value)) => {
                self.compile_expr(value)?;
                self.emit(Op::Return);
            }
            TypedStmtKind::Return(None) => self.emit(Op::ReturnVoid),
            TypedStmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(cond)?;
                let to_else = self.emit_jump(Op::JumpIfFalse);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let to_end = self.emit_jump(Op::Jump);
                        self.patch_here(to_else)?;
                        self.compile_stmt(else_branch)?;
                        self.patch_here(to_end)?;
                    }
                    None => self.patch_here(to_else)?,
                }
            }
            TypedStmtKind::While { cond, body } => {
                let start = self.offset()?;
                self.compile_expr(cond)?;
                let to_end = self.emit_jump(Op::JumpIfFalse);
                self.loops.push(LoopLabels::default());
                self.compile_stmt(body)?;
                self.emit(Op::Jump(start));
                self.close_loop(start)?;
                self.patch_here(to_end)?;
            }
            TypedStmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                for s in init {
                    self.compile_stmt(s)?;
                }
                let start = self.offset()?;
                let to_end = match cond {
                    Some(cond) => {
                        self.compile_expr(cond)?;
                        Some(self.emit_jump(Op::JumpIfFalse))
                    }
                    None => None,
                };
                self.loops.push(LoopLabels::default());
                self.compile_stmt(body)?;
                let continue_at = self.offset()?;
                for s in step {
                    self.compile_effect(s)?;
                }
                self.emit(Op::Jump(start));
                self.close_loop(continue_at)?;
                if let Some(to_end) = to_end {
                    self.patch_here(to_end)?;
                }
            }
            TypedStmtKind::Break => {
                let at = self.emit_jump(Op::Jump);
                if let Some(labels) = self.loops.last_mut() {
                    labels.breaks.push(at);
                }
            }
            TypedStmtKind::Continue => {
                let at = self.emit_jump(Op::Jump);
                if let Some(labels) = self.loops.last_mut() {
                    labels.continues.push(at);
                }
            }
        }
        Ok(())
    }

    /// Pop the innermost loop: `continue` goes to `continue_at`, `break` to
    /// the current offset.
    fn close_loop(&mut self, continue_at: u32) -> Result<(), CompileError> {
        let labels = self.loops.pop().unwrap_or_default();
        let end = self.offset()?;
        for at in labels.continues {
            self.patch(at, continue_at);
        }
        for at in labels.breaks {
            self.patch(at, end);
        }
        Ok(())
    }

    /// Expression evaluated for its side effects only.
    fn compile_effect(&mut self, expr: &TypedExpr) -> Result<(), CompileError> {
        match &expr.kind {
            TypedExprKind::Assign {
                place: Place::Local(slot),
                value,
            } => {
                self.compile_expr(value)?;
                self.emit(Op::StoreLocal(*slot));
            }
            TypedExprKind::CompoundAssign {
                place: Place::Local(slot),
                op,
                value,
            } => {
                self.emit(Op::LoadLocal(*slot));
                self.compile_expr(value)?;
                self.emit(arith(*op));
                self.emit(Op::StoreLocal(*slot));
            }
            TypedExprKind::IncDec {
                place: Place::Local(slot),
                increment,
                ..
            } => {
                self.emit(Op::LoadLocal(*slot));
                self.emit_const(&one(&expr.ty))?;
                self.emit(if *increment { Op::Add } else { Op::Sub });
                self.emit(Op::StoreLocal(*slot));
            }
            _ => {
                self.compile_expr(expr)?;
                if expr.ty != Ty::Void {
                    self.emit(Op::Pop);
                }
            }
        }
        Ok(())
    }

    // ── Expressions ────────────────────────────────────────────────

    /// Push the value of `expr`; void expressions push nothing.
    fn compile_expr(&mut self, expr: &TypedExpr) -> Result<(), CompileError> {
        match &expr.kind {
            TypedExprKind::Const(value) => self.emit_const(value)?,
            TypedExprKind::Local(slot) => self.emit(Op::LoadLocal(*slot)),
            TypedExprKind::Field { object, name } => {
                self.compile_expr(object)?;
                let name = self.pools.string(name, expr.span)?;
                self.emit(Op::LoadField(name));
            }
            TypedExprKind::Assign { place, value } => match place {
                Place::Local(slot) => {
                    self.compile_expr(value)?;
                    self.emit(Op::Dup);
                    self.emit(Op::StoreLocal(*slot));
                }
                Place::Field { object, name } => {
                    self.compile_expr(object)?;
                    self.compile_expr(value)?;
                    let name = self.pools.string(name, expr.span)?;
                    self.emit(Op::StoreField(name));
                }
            },
            TypedExprKind::CompoundAssign { place, op, value } => match place {
                Place::Local(slot) => {
                    self.emit(Op::LoadLocal(*slot));
                    self.compile_expr(value)?;
                    self.emit(arith(*op));
                    self.emit(Op::Dup);
                    self.emit(Op::StoreLocal(*slot));
                }
                Place::Field { object, name } => {
                    let name = self.pools.string(name, expr.span)?;
                    self.compile_expr(object)?;
                    self.emit(Op::Dup);
                    self.emit(Op::LoadField(name));
                    self.compile_expr(value)?;
                    self.emit(arith(*op));
                    self.emit(Op::StoreField(name));
                }
            },
            TypedExprKind::IncDec {
                place,
                increment,
                prefix,
            } => self.compile_incdec(place, *increment, *prefix, &expr.ty, expr.span)?,
            TypedExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(arith(*op));
            }
            TypedExprKind::Logical { and, left, right } => {
                self.compile_expr(left)?;
                self.emit(Op::Dup);
                let to_end = self.emit_jump(if *and { Op::JumpIfFalse } else { Op::JumpIfTrue });
                self.emit(Op::Pop);
                self.compile_expr(right)?;
                self.patch_here(to_end)?;
            }
            TypedExprKind::Not(inner) => {
                self.compile_expr(inner)?;
                self.emit(Op::Not);
            }
            TypedExprKind::Neg(inner) => {
                self.compile_expr(inner)?;
                self.emit(Op::Neg);
            }
            TypedExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.compile_expr(cond)?;
                let to_else = self.emit_jump(Op::JumpIfFalse);
                self.compile_expr(then_expr)?;
                let to_end = self.emit_jump(Op::Jump);
                self.patch_here(to_else)?;
                self.compile_expr(else_expr)?;
                self.patch_here(to_end)?;
            }
            TypedExprKind::Convert { conversion, expr: inner } => {
                self.compile_expr(inner)?;
                match conversion {
                    Conversion::Numeric(conv) => self.emit(Op::Convert(*conv)),
                    Conversion::Cast(name) => {
                        let name = self.pools.string(name, expr.span)?;
                        self.emit(Op::CastTo(name));
                    }
                }
            }
            TypedExprKind::Call { method, args } => self.compile_call(*method, args)?,
            TypedExprKind::HostCall { import, args } => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let import = self.pools.import(Import::Function(import.clone()), expr.span)?;
                self.emit(Op::CallHost(import));
            }
            TypedExprKind::Intrinsic { op, receiver, args } => {
                self.compile_expr(receiver)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Op::Intrinsic(*op));
            }
            TypedExprKind::NewList { element } => {
                let element = self.pools.string(element, expr.span)?;
                self.emit(Op::NewList(element));
            }
            TypedExprKind::NewObject { type_name } => {
                let class = self.pools.import(
                    Import::Class {
                        type_name: type_name.clone(),
                    },
                    expr.span,
                )?;
                self.emit(Op::NewObject(class));
            }
        }
        Ok(())
    }

    fn compile_incdec(&mut self, place: &Place, increment: bool, prefix: bool, ty: &Ty, span: Span) -> Result<(), CompileError> {
        let step = if increment { Op::Add } else { Op::Sub };
        let one = one(ty);
        match place {
            Place::Local(slot) => {
                self.emit(Op::LoadLocal(*slot));
                if prefix {
                    self.emit_const(&one)?;
                    self.emit(step);
                    self.emit(Op::Dup);
                } else {
                    self.emit(Op::Dup);
                    self.emit_const(&one)?;
                    self.emit(step);
                }
                self.emit(Op::StoreLocal(*slot));
            }
            Place::Field { object, name } => {
                let name = self.pools.string(name, span)?;
                self.compile_expr(object)?;
                self.emit(Op::Dup);
                self.emit(Op::LoadField(name));
                if prefix {
                    self.emit_const(&one)?;
                    self.emit(step);
                    self.emit(Op::StoreField(name));
                } else {
                    let old = self.temp()?;
                    self.emit(Op::StoreLocal(old));
                    self.emit(Op::LoadLocal(old));
                    self.emit_const(&one)?;
                    self.emit(step);
                    self.emit(Op::StoreField(name));
                    self.emit(Op::Pop);
                    self.emit(Op::LoadLocal(old));
                }
            }
        }
        Ok(())
    }

    /// Arguments are copied in; the callee pushes the final value of each
    /// by-ref parameter after its result, and they are stored back here.
    fn compile_call(&mut self, method: u32, args: &[TypedArg]) -> Result<(), CompileError> {
        let mut writebacks = Vec::new();
        for arg in args {
            match (arg.mode, &arg.expr.kind) {
                (ParamMode::Out, TypedExprKind::Local(slot)) => {
                    self.emit_const(&arg.expr.ty.default_constant())?;
                    writebacks.push(*slot);
                }
                (ParamMode::Ref, TypedExprKind::Local(slot)) => {
                    self.emit(Op::LoadLocal(*slot));
                    writebacks.push(*slot);
                }
                _ => self.compile_expr(&arg.expr)?,
            }
        }
        if self.program.methods.get(method as usize).is_none() {
            return Err(CompileError::unsupported("call to an unknown method", self.span));
        }
        self.emit(Op::Call(method));
        for slot in writebacks.into_iter().rev() {
            self.emit(Op::StoreLocal(slot));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corelib;
    use crate::reference::ReferenceSet;
    use crate::toolchain::{lexer::lex, parser::parse, typeck::type_check};

    fn image(src: &str) -> Image {
        let refs: ReferenceSet = corelib::LIBRARY_NAMES.iter().filter_map(|n| corelib::library(n)).collect();
        let checked = type_check(&parse(lex(src).unwrap()).unwrap(), &refs);
        assert!(checked.diagnostics.iter().all(|d| !d.is_error()), "{:?}", checked.diagnostics);
        compile(&checked.program, "test").unwrap()
    }

    fn method_code(src: &str) -> Vec<Op> {
        image(src).methods.remove(0).code
    }

    #[test]
    fn narrowing_truncates_and_saturates() {
        assert_eq!(NumConv::DoubleToInt.apply(&Value::Double(2.9)), Value::Int(2));
        assert_eq!(NumConv::DoubleToInt.apply(&Value::Double(-2.9)), Value::Int(-2));
        assert_eq!(NumConv::DoubleToInt.apply(&Value::Double(f64::NAN)), Value::Int(0));
        assert_eq!(NumConv::DoubleToLong.apply(&Value::Double(1e30)), Value::Long(i64::MAX));
        assert_eq!(NumConv::LongToInt.apply(&Value::Long(0x1_0000_0001)), Value::Int(1));
        assert_eq!(NumConv::IntToDouble.apply(&Value::Int(3)), Value::Double(3.0));
    }

    #[test]
    fn signatures_use_full_names() {
        let img = image("static class C { public static int F(ref int a, out string b, long c) { b = null; return a; } }");
        let sig = &img.methods[0].signature;
        assert_eq!(sig.to_string(), "System.Int32(ref System.Int32, out System.String, System.Int64)");
        assert_eq!(img.methods[0].local_count, 3);
    }

    #[test]
    fn constants_are_pooled_once() {
        let img = image("static class C { static int F() { int a = 7; int b = 7; return a + b; } }");
        assert_eq!(img.constants, [Constant::Int(7)]);
    }

    #[test]
    fn by_ref_arguments_are_stored_back_in_reverse() {
        let code = method_code(
            "static class C { static void M() { int x = 1; string s; G(ref x, out s); x = x + s.Length; } static void G(ref int a, out string b) { b = \"\"; } }",
        );
        let call = code.iter().position(|op| matches!(op, Op::Call(1))).unwrap();
        assert_eq!(code[call + 1], Op::StoreLocal(1));
        assert_eq!(code[call + 2], Op::StoreLocal(0));
        assert_eq!(code[call - 2], Op::LoadLocal(0));
    }

    #[test]
    fn loops_patch_break_and_continue() {
        let code = method_code(
            "static class C { static int M() { int i = 0; while (true) { i++; if (i < 3) continue; break; } return i; } }",
        );
        let targets: Vec<u32> = code
            .iter()
            .filter_map(|op| match op {
                Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert!(targets.iter().all(|&t| (t as usize) <= code.len()));
        assert!(matches!(code.last(), Some(Op::Return)));
    }

    #[test]
    fn host_calls_and_classes_become_imports() {
        let img = image(
            "using System;\nusing System.Collections.Generic;\nstatic class C { static void M() { var xs = new List<int>(); xs.Add(1); Console.WriteLine(xs.Count); Console.WriteLine(\"x\"); } }",
        );
        assert_eq!(img.imports.len(), 2);
        assert_eq!(img.strings, ["System.Int32"]);
        let code = &img.methods[0].code;
        assert!(code.contains(&Op::NewList(0)));
        assert!(code.contains(&Op::Intrinsic(IntrinsicOp::ListAdd)));
        assert!(matches!(code.last(), Some(Op::ReturnVoid)));
    }
}
