//! Definite assignment and reachability over checked method bodies.

use std::collections::HashSet;

use super::ast::Span;
use super::error::CompileError;
use super::image::Constant;
use super::typeck::{Place, Ty, TypedExpr, TypedExprKind, TypedMethod, TypedProgram, TypedStmt, TypedStmtKind};
use crate::shape::ParamMode;

/// Which locals are definitely assigned; `None` when the point is unreachable.
type State = Option<Vec<bool>>;

fn join(a: State, b: State) -> State {
    match (a, b) {
        (None, other) | (other, None) => other,
        (Some(mut a), Some(b)) => {
            for (x, y) in a.iter_mut().zip(b) {
                *x = *x && y;
            }
            Some(a)
        }
    }
}

fn constant_bool(expr: &TypedExpr) -> Option<bool> {
    match expr.as_constant() {
        Some(Constant::Bool(b)) => Some(*b),
        _ => None,
    }
}

pub fn check(program: &TypedProgram) -> Vec<CompileError> {
    let mut errors = Vec::new();
    for method in &program.methods {
        let mut flow = Flow {
            method,
            loops: Vec::new(),
            reported: HashSet::new(),
            errors: Vec::new(),
        };
        flow.run();
        errors.append(&mut flow.errors);
    }
    errors
}

#[derive(Default)]
struct LoopExits {
    breaks: State,
    continues: State,
}

struct Flow<'a> {
    method: &'a TypedMethod,
    loops: Vec<LoopExits>,
    /// Locals already reported as unassigned.
    reported: HashSet<u16>,
    errors: Vec<CompileError>,
}

impl Flow<'_> {
    fn run(&mut self) {
        let method = self.method;
        let entry: Vec<bool> = method
            .locals
            .iter()
            .map(|l| matches!(l.param, Some(mode) if mode != ParamMode::Out))
            .collect();
        let end = self.block(&method.body, Some(entry));
        if end.is_some() {
            if method.ret == Ty::Void {
                self.check_out_params(end.as_deref(), method.span);
            } else {
                self.errors.push(CompileError::error(
                    "CS0161",
                    format!("'{}': not all code paths return a value", method.label),
                    method.span,
                ));
            }
        }
    }

    fn check_out_params(&mut self, state: Option<&[bool]>, span: Span) {
        let Some(state) = state else { return };
        let method = self.method;
        for (local, assigned) in method.locals.iter().zip(state) {
            if local.param == Some(ParamMode::Out) && !assigned {
                self.errors.push(CompileError::error(
                    "CS0177",
                    format!(
                        "The out parameter '{}' must be assigned to before control leaves the current method",
                        local.name
                    ),
                    span,
                ));
            }
        }
    }

    fn block(&mut self, stmts: &[TypedStmt], mut state: State) -> State {
        for stmt in stmts {
            state = self.stmt(stmt, state);
        }
        state
    }

    fn stmt(&mut self, stmt: &TypedStmt, state: State) -> State {
        match &stmt.kind {
            TypedStmtKind::Block(stmts) => self.block(stmts, state),
            TypedStmtKind::Expr(expr) => self.expr(expr, state),
            TypedStmtKind::Return(value) => {
                let state = match value {
                    Some(value) => self.expr(value, state),
                    None => state,
                };
                self.check_out_params(state.as_deref(), stmt.span);
                None
            }
            TypedStmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let state = self.expr(cond, state);
                let (then_in, else_in) = match constant_bool(cond) {
                    Some(true) => (state, None),
                    Some(false) => (None, state),
                    None => (state.clone(), state),
                };
                let then_out = self.stmt(then_branch, then_in);
                let else_out = match else_branch {
                    Some(else_branch) => self.stmt(else_branch, else_in),
                    None => else_in,
                };
                join(then_out, else_out)
            }
            TypedStmtKind::While { cond, body } => {
                let state = self.expr(cond, state);
                self.looping(Some(cond), None, body, state)
            }
            TypedStmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let mut state = self.block(init, state);
                if let Some(cond) = cond {
                    state = self.expr(cond, state);
                }
                self.looping(cond.as_ref(), Some(step.as_slice()), body, state)
            }
            TypedStmtKind::Break => {
                if let Some(exits) = self.loops.last_mut() {
                    exits.breaks = join(exits.breaks.take(), state);
                }
                None
            }
            TypedStmtKind::Continue => {
                if let Some(exits) = self.loops.last_mut() {
                    exits.continues = join(exits.continues.take(), state);
                }
                None
            }
        }
    }

    /// Body of a loop entered in `state` (after the first condition test).
    /// Leaving the loop joins the false condition with every `break`.
    fn looping(&mut self, cond: Option<&TypedExpr>, step: Option<&[TypedExpr]>, body: &TypedStmt, state: State) -> State {
        let forever = cond.map_or(true, |c| constant_bool(c) == Some(true));
        let never = cond.is_some_and(|c| constant_bool(c) == Some(false));
        self.loops.push(LoopExits::default());
        let body_in = if never { None } else { state.clone() };
        let body_out = self.stmt(body, body_in);
        let exits = self.loops.pop().unwrap_or_default();
        if let Some(step) = step {
            let mut at_step = join(body_out, exits.continues);
            for expr in step {
                at_step = self.expr(expr, at_step);
            }
        }
        let fall_out = if forever { None } else { state };
        join(fall_out, exits.breaks)
    }

    fn read(&mut self, slot: u16, state: &State, span: Span) {
        let Some(assigned) = state else { return };
        if assigned.get(slot as usize).copied().unwrap_or(true) || !self.reported.insert(slot) {
            return;
        }
        let method = self.method;
        let local = &method.locals[slot as usize];
        let error = if local.param == Some(ParamMode::Out) {
            CompileError::error("CS0269", format!("Use of unassigned out parameter '{}'", local.name), span)
        } else {
            CompileError::error("CS0165", format!("Use of unassigned local variable '{}'", local.name), span)
        };
        self.errors.push(error);
    }

    fn assign(slot: u16, state: &mut State) {
        if let Some(assigned) = state {
            if let Some(flag) = assigned.get_mut(slot as usize) {
                *flag = true;
            }
        }
    }

    fn place(&mut self, place: &Place, state: State) -> State {
        match place {
            Place::Local(_) => state,
            Place::Field { object, .. } => self.expr(object, state),
        }
    }

    fn expr(&mut self, expr: &TypedExpr, state: State) -> State {
        match &expr.kind {
            TypedExprKind::Const(_) | TypedExprKind::NewList { .. } | TypedExprKind::NewObject { .. } => state,
            TypedExprKind::Local(slot) => {
                self.read(*slot, &state, expr.span);
                state
            }
            TypedExprKind::Field { object, .. } => self.expr(object, state),
            TypedExprKind::Assign { place, value } => {
                let state = self.place(place, state);
                let mut state = self.expr(value, state);
                if let Place::Local(slot) = place {
                    Self::assign(*slot, &mut state);
                }
                state
            }
            TypedExprKind::CompoundAssign { place, value, .. } => {
                let state = self.place(place, state);
                if let Place::Local(slot) = place {
                    self.read(*slot, &state, expr.span);
                }
                self.expr(value, state)
            }
            TypedExprKind::IncDec { place, .. } => {
                let state = self.place(place, state);
                if let Place::Local(slot) = place {
                    self.read(*slot, &state, expr.span);
                }
                state
            }
            TypedExprKind::Binary { left, right, .. } => {
                let state = self.expr(left, state);
                self.expr(right, state)
            }
            TypedExprKind::Logical { left, right, .. } => {
                let state = self.expr(left, state);
                let after_right = self.expr(right, state.clone());
                join(state, after_right)
            }
            TypedExprKind::Not(inner) | TypedExprKind::Neg(inner) => self.expr(inner, state),
            TypedExprKind::Convert { expr: inner, .. } => self.expr(inner, state),
            TypedExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let state = self.expr(cond, state);
                let then_out = self.expr(then_expr, state.clone());
                let else_out = self.expr(else_expr, state);
                join(then_out, else_out)
            }
            TypedExprKind::Call { args, .. } => {
                let mut state = state;
                let mut outs = Vec::new();
                for arg in args {
                    match (arg.mode, &arg.expr.kind) {
                        (ParamMode::Out, TypedExprKind::Local(slot)) => outs.push(*slot),
                        _ => state = self.expr(&arg.expr, state),
                    }
                }
                for slot in outs {
                    Self::assign(slot, &mut state);
                }
                state
            }
            TypedExprKind::HostCall { args, .. } => {
                let mut state = state;
                for arg in args {
                    state = self.expr(arg, state);
                }
                state
            }
            TypedExprKind::Intrinsic { receiver, args, .. } => {
                let mut state = self.expr(receiver, state);
                for arg in args {
                    state = self.expr(arg, state);
                }
                state
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corelib;
    use crate::reference::ReferenceSet;
    use crate::toolchain::{lexer::lex, parser::parse, typeck::type_check};

    fn codes(src: &str) -> Vec<&'static str> {
        let refs: ReferenceSet = corelib::LIBRARY_NAMES.iter().filter_map(|n| corelib::library(n)).collect();
        let checked = type_check(&parse(lex(src).unwrap()).unwrap(), &refs);
        assert!(checked.diagnostics.iter().all(|d| !d.is_error()), "{:?}", checked.diagnostics);
        check(&checked.program).iter().map(|e| e.code).collect()
    }

    fn method(ret: &str, params: &str, body: &str) -> Vec<&'static str> {
        codes(&format!("static class C {{ static {ret} M({params}) {{ {body} }} }}"))
    }

    #[test]
    fn unassigned_locals() {
        assert_eq!(method("int", "", "int x; return x;"), ["CS0165"]);
        assert_eq!(method("int", "", "int x; x = 2; return x;"), Vec::<&str>::new());
        assert_eq!(method("int", "bool b", "int x; if (b) x = 1; return x;"), ["CS0165"]);
        assert_eq!(
            method("int", "bool b", "int x; if (b) x = 1; else x = 2; return x;"),
            Vec::<&str>::new()
        );
        assert_eq!(method("int", "", "int x; x++; return 0;"), ["CS0165"]);
    }

    #[test]
    fn out_parameters_must_be_assigned() {
        assert_eq!(method("void", "out int a", ""), ["CS0177"]);
        assert_eq!(method("void", "out int a", "a = 1;"), Vec::<&str>::new());
        assert_eq!(method("int", "out int a, bool b", "if (b) return 1; a = 2; return 0;"), ["CS0177"]);
        assert_eq!(method("int", "out int a", "return a;"), ["CS0269", "CS0177"]);
    }

    #[test]
    fn out_arguments_assign() {
        let src = "static class C { static void G(out int a) { a = 1; } static int M() { int x; G(out x); return x; } }";
        assert_eq!(codes(src), Vec::<&str>::new());
    }

    #[test]
    fn all_paths_return() {
        assert_eq!(method("int", "bool b", "if (b) return 1;"), ["CS0161"]);
        assert_eq!(method("int", "bool b", "if (b) return 1; else return 2;"), Vec::<&str>::new());
        assert_eq!(method("int", "", "while (true) { }"), Vec::<&str>::new());
        assert_eq!(method("int", "", "for (;;) { break; }"), ["CS0161"]);
        assert_eq!(method("int", "", "int i = 0; while (true) { i++; if (i > 3) break; } return i;"), Vec::<&str>::new());
    }

    #[test]
    fn loops_do_not_assign_on_exit() {
        assert_eq!(method("int", "bool b", "int x; while (b) { x = 1; } return x;"), ["CS0165"]);
        assert_eq!(method("int", "", "int x; while (true) { x = 1; break; } return x;"), Vec::<&str>::new());
    }
}
