//! Syntax tree for the C# subset accepted by the built-in toolchain.

use crate::shape::ParamMode;

/// Byte range in the compiled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A whole source file.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub usings: Vec<UsingDirective>,
    pub members: Vec<Member>,
}

/// `using System.Collections.Generic;`
#[derive(Debug, Clone)]
pub struct UsingDirective {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Member {
    Namespace(NamespaceDecl),
    Class(ClassDecl),
}

#[derive(Debug, Clone)]
pub struct NamespaceDecl {
    /// Dotted name as written, e.g. `A.B`.
    pub name: String,
    pub usings: Vec<UsingDirective>,
    pub members: Vec<Member>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub public: bool,
    pub private: bool,
    pub internal: bool,
    pub protected: bool,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub modifiers: Modifiers,
    pub methods: Vec<MethodDecl>,
    pub classes: Vec<ClassDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub modifiers: Modifiers,
    /// `None` for `void`.
    pub return_type: Option<TypeSyntax>,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `ref int value`
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub mode: ParamMode,
    pub ty: TypeSyntax,
    pub name: String,
    pub span: Span,
}

// ── Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predefined {
    Bool,
    Int,
    Long,
    Double,
    String,
    Object,
}

impl Predefined {
    pub fn keyword(self) -> &'static str {
        match self {
            Predefined::Bool => "bool",
            Predefined::Int => "int",
            Predefined::Long => "long",
            Predefined::Double => "double",
            Predefined::String => "string",
            Predefined::Object => "object",
        }
    }
}

/// One dotted component of a type name: `List<string>` in
/// `System.Collections.Generic.List<string>`.
#[derive(Debug, Clone)]
pub struct TypeSegment {
    pub name: String,
    pub args: Vec<TypeSyntax>,
}

#[derive(Debug, Clone)]
pub enum TypeSyntaxKind {
    Predefined(Predefined),
    Named(Vec<TypeSegment>),
}

#[derive(Debug, Clone)]
pub struct TypeSyntax {
    pub kind: TypeSyntaxKind,
    pub span: Span,
}

impl TypeSyntax {
    /// True for the contextual keyword `var`.
    pub fn is_var(&self) -> bool {
        match &self.kind {
            TypeSyntaxKind::Named(segments) => {
                matches!(segments.as_slice(), [seg] if seg.name == "var" && seg.args.is_empty())
            }
            TypeSyntaxKind::Predefined(_) => false,
        }
    }

    /// The name as written, for messages.
    pub fn display(&self) -> String {
        match &self.kind {
            TypeSyntaxKind::Predefined(p) => p.keyword().to_string(),
            TypeSyntaxKind::Named(segments) => segments
                .iter()
                .map(|seg| {
                    if seg.args.is_empty() {
                        seg.name.clone()
                    } else {
                        let args: Vec<String> = seg.args.iter().map(TypeSyntax::display).collect();
                        format!("{}<{}>", seg.name, args.join(", "))
                    }
                })
                .collect::<Vec<_>>()
                .join("."),
        }
    }
}

// ── Statements ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Vec<Stmt>),
    Empty,
    /// `int a = 1, b;` or `var x = ...;`. `ty` is the written type, which
    /// may be `var`.
    Local {
        ty: TypeSyntax,
        declarators: Vec<Declarator>,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        step: Vec<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
}

// ── Expressions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        }
    }
}

/// A call argument with its passing keyword.
#[derive(Debug, Clone)]
pub struct Argument {
    pub mode: ParamMode,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Bool(bool),
    Null,
    Name(String),
    /// `int` or `string` used as a qualifier, as in `int.MaxValue`.
    PredefinedType(Predefined),
    Member {
        object: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Argument>,
    },
    New {
        ty: TypeSyntax,
        args: Vec<Argument>,
    },
    /// `a = b` when `op` is `None`, `a += b` otherwise.
    Assign {
        op: Option<BinOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        ty: TypeSyntax,
        expr: Box<Expr>,
    },
    Paren(Box<Expr>),
}
