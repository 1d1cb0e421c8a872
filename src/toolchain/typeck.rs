use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use super::ast::*;
use super::builtins::{self, IntrinsicOp, Receiver, Slot};
use super::compiler::NumConv;
use super::error::CompileError;
use super::image::{Constant, FunctionImport};
use crate::reference::{HostTypeDef, HostTypeKind, ReferenceSet};
use crate::shape::{ParamMode, TypeDesc};
use crate::value;

// ── Types ──────────────────────────────────────────────────────────

/// Static type of an expression or slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Void,
    /// Type of the `null` literal.
    Null,
    Bool,
    Int,
    Long,
    Double,
    String,
    Object,
    List(Box<Ty>),
    /// Host data class, by definition name.
    Class(String),
    /// Result of an earlier error; converts to and from anything.
    Error,
}

impl Ty {
    /// Runtime name, as carried by values and signatures.
    pub fn full_name(&self) -> String {
        match self {
            Ty::Void => "System.Void".to_string(),
            Ty::Null => "<null>".to_string(),
            Ty::Bool => value::BOOLEAN.to_string(),
            Ty::Int => value::INT32.to_string(),
            Ty::Long => value::INT64.to_string(),
            Ty::Double => value::DOUBLE.to_string(),
            Ty::String => value::STRING.to_string(),
            Ty::Object => value::OBJECT.to_string(),
            Ty::List(element) => format!("{}<{}>", value::LIST, element.full_name()),
            Ty::Class(name) => name.clone(),
            Ty::Error => "?".to_string(),
        }
    }

    /// Name as shown in diagnostics.
    pub fn display(&self) -> String {
        match self {
            Ty::Void => "void".to_string(),
            Ty::Bool => "bool".to_string(),
            Ty::Int => "int".to_string(),
            Ty::Long => "long".to_string(),
            Ty::Double => "double".to_string(),
            Ty::String => "string".to_string(),
            Ty::Object => "object".to_string(),
            Ty::List(element) => format!("List<{}>", element.display()),
            other => other.full_name(),
        }
    }

    pub fn from_desc(desc: &TypeDesc) -> Ty {
        match desc.definition_name().as_deref() {
            Ok(value::BOOLEAN) => Ty::Bool,
            Ok(value::INT32) => Ty::Int,
            Ok(value::INT64) => Ty::Long,
            Ok(value::DOUBLE) => Ty::Double,
            Ok(value::STRING) => Ty::String,
            Ok(value::OBJECT) => Ty::Object,
            Ok(value::LIST) => Ty::List(Box::new(desc.args().first().map_or(Ty::Error, Ty::from_desc))),
            Ok(other) => Ty::Class(other.to_string()),
            Err(_) => Ty::Error,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Long | Ty::Double)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Ty::Null | Ty::String | Ty::Object | Ty::List(_) | Ty::Class(_))
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Ty::Int => Some(0),
            Ty::Long => Some(1),
            Ty::Double => Some(2),
            _ => None,
        }
    }

    fn receiver(&self) -> Option<Receiver> {
        match self {
            Ty::String => Some(Receiver::String),
            Ty::List(_) => Some(Receiver::List),
            _ => None,
        }
    }

    /// Value of an unassigned slot of this type.
    pub fn default_constant(&self) -> Constant {
        match self {
            Ty::Bool => Constant::Bool(false),
            Ty::Int => Constant::Int(0),
            Ty::Long => Constant::Long(0),
            Ty::Double => Constant::Double(0.0),
            _ => Constant::Null,
        }
    }
}

fn predefined_ty(p: Predefined) -> Ty {
    match p {
        Predefined::Bool => Ty::Bool,
        Predefined::Int => Ty::Int,
        Predefined::Long => Ty::Long,
        Predefined::Double => Ty::Double,
        Predefined::String => Ty::String,
        Predefined::Object => Ty::Object,
    }
}

fn predefined_name(p: Predefined) -> &'static str {
    match p {
        Predefined::Bool => value::BOOLEAN,
        Predefined::Int => value::INT32,
        Predefined::Long => value::INT64,
        Predefined::Double => value::DOUBLE,
        Predefined::String => value::STRING,
        Predefined::Object => value::OBJECT,
    }
}

fn constant_ty(c: &Constant) -> Ty {
    match c {
        Constant::Null => Ty::Null,
        Constant::Bool(_) => Ty::Bool,
        Constant::Int(_) => Ty::Int,
        Constant::Long(_) => Ty::Long,
        Constant::Double(_) => Ty::Double,
        Constant::Str(_) => Ty::String,
    }
}

// ── Conversions ────────────────────────────────────────────────────

/// Runtime work a conversion needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Numeric(NumConv),
    /// Unboxing or downcast from `object`, checked at run time.
    Cast(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Coercion {
    Identity,
    /// Reference or boxing conversion; no runtime work.
    Reference,
    Convert(Conversion),
}

fn implicit(from: &Ty, to: &Ty) -> Option<Coercion> {
    if from == to || matches!(from, Ty::Error) || matches!(to, Ty::Error) {
        return Some(Coercion::Identity);
    }
    let widening = match (from, to) {
        (Ty::Int, Ty::Long) => Some(NumConv::IntToLong),
        (Ty::Int, Ty::Double) => Some(NumConv::IntToDouble),
        (Ty::Long, Ty::Double) => Some(NumConv::LongToDouble),
        _ => None,
    };
    if let Some(conv) = widening {
        return Some(Coercion::Convert(Conversion::Numeric(conv)));
    }
    match (from, to) {
        (Ty::Null, to) if to.is_reference() => Some(Coercion::Reference),
        (Ty::Void | Ty::Null, Ty::Object) => None,
        (_, Ty::Object) => Some(Coercion::Reference),
        _ => None,
    }
}

fn explicit(from: &Ty, to: &Ty) -> Option<Coercion> {
    if let Some(c) = implicit(from, to) {
        return Some(c);
    }
    let narrowing = match (from, to) {
        (Ty::Long, Ty::Int) => Some(NumConv::LongToInt),
        (Ty::Double, Ty::Int) => Some(NumConv::DoubleToInt),
        (Ty::Double, Ty::Long) => Some(NumConv::DoubleToLong),
        _ => None,
    };
    if let Some(conv) = narrowing {
        return Some(Coercion::Convert(Conversion::Numeric(conv)));
    }
    match (from, to) {
        (Ty::Object, to) if !matches!(to, Ty::Void | Ty::Null) => {
            Some(Coercion::Convert(Conversion::Cast(to.full_name())))
        }
        _ => None,
    }
}

// ── Typed tree ─────────────────────────────────────────────────────

/// Operators left after typing. Operands of arithmetic and comparisons
/// already share one type; `Concat` accepts anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Assignable location.
#[derive(Debug, Clone)]
pub enum Place {
    Local(u16),
    Field { object: Box<TypedExpr>, name: String },
}

#[derive(Debug, Clone)]
pub struct TypedArg {
    pub mode: ParamMode,
    /// For `ref`/`out`/`in` arguments, always a local.
    pub expr: TypedExpr,
}

#[derive(Debug, Clone)]
pub struct TypedExpr {
    pub kind: TypedExprKind,
    pub ty: Ty,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypedExprKind {
    Const(Constant),
    Local(u16),
    Field {
        object: Box<TypedExpr>,
        name: String,
    },
    Assign {
        place: Place,
        value: Box<TypedExpr>,
    },
    CompoundAssign {
        place: Place,
        op: ArithOp,
        value: Box<TypedExpr>,
    },
    IncDec {
        place: Place,
        increment: bool,
        prefix: bool,
    },
    Binary {
        op: ArithOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    /// Short-circuit `&&` (`and`) or `||`.
    Logical {
        and: bool,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Not(Box<TypedExpr>),
    Neg(Box<TypedExpr>),
    Conditional {
        cond: Box<TypedExpr>,
        then_expr: Box<TypedExpr>,
        else_expr: Box<TypedExpr>,
    },
    Convert {
        conversion: Conversion,
        expr: Box<TypedExpr>,
    },
    /// Call to a method of this compilation.
    Call {
        method: u32,
        args: Vec<TypedArg>,
    },
    HostCall {
        import: FunctionImport,
        args: Vec<TypedExpr>,
    },
    Intrinsic {
        op: IntrinsicOp,
        receiver: Box<TypedExpr>,
        args: Vec<TypedExpr>,
    },
    NewList {
        element: String,
    },
    NewObject {
        type_name: String,
    },
}

impl TypedExpr {
    fn new(kind: TypedExprKind, ty: Ty, span: Span) -> Self {
        Self { kind, ty, span }
    }

    fn constant(value: Constant, span: Span) -> Self {
        let ty = constant_ty(&value);
        Self::new(TypedExprKind::Const(value), ty, span)
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            TypedExprKind::Const(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypedStmt {
    pub kind: TypedStmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypedStmtKind {
    Block(Vec<TypedStmt>),
    Expr(TypedExpr),
    Return(Option<TypedExpr>),
    If {
        cond: TypedExpr,
        then_branch: Box<TypedStmt>,
        else_branch: Option<Box<TypedStmt>>,
    },
    While {
        cond: TypedExpr,
        body: Box<TypedStmt>,
    },
    For {
        init: Vec<TypedStmt>,
        cond: Option<TypedExpr>,
        step: Vec<TypedExpr>,
        body: Box<TypedStmt>,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub struct TypedParam {
    pub name: String,
    pub mode: ParamMode,
    pub ty: Ty,
}

/// Slot of a method frame. Parameters come first.
#[derive(Debug, Clone)]
pub struct LocalMeta {
    pub name: String,
    pub ty: Ty,
    pub span: Span,
    pub param: Option<ParamMode>,
}

#[derive(Debug, Clone)]
pub struct TypedMethod {
    pub name: String,
    /// `Class.Method(int, ref string)`, for diagnostics.
    pub label: String,
    pub class: u32,
    pub is_public: bool,
    pub is_static: bool,
    pub params: Vec<TypedParam>,
    pub ret: Ty,
    pub locals: Vec<LocalMeta>,
    pub body: Vec<TypedStmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypedClass {
    pub full_name: String,
    pub is_public: bool,
    pub is_static: bool,
    pub methods: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TypedProgram {
    pub classes: Vec<TypedClass>,
    pub methods: Vec<TypedMethod>,
}

/// Checker output. The program is only meaningful when `diagnostics`
/// holds no errors.
#[derive(Debug)]
pub struct Checked {
    pub program: TypedProgram,
    pub diagnostics: Vec<CompileError>,
}

pub fn type_check(unit: &CompilationUnit, references: &ReferenceSet) -> Checked {
    let mut ctx = TypeContext::new(references);
    ctx.check(unit);
    let mut diagnostics = std::mem::take(&mut ctx.errors);
    diagnostics.sort_by_key(|d| d.span.start);
    Checked {
        program: TypedProgram {
            classes: ctx
                .classes
                .iter()
                .map(|c| TypedClass {
                    full_name: c.full_name.clone(),
                    is_public: c.decl.modifiers.public,
                    is_static: c.decl.modifiers.is_static,
                    methods: c.methods.clone(),
                })
                .collect(),
            methods: ctx.methods,
        },
        diagnostics,
    }
}

// ── Context ────────────────────────────────────────────────────────

struct ClassInfo<'a> {
    decl: &'a ClassDecl,
    /// `Ns.Outer+Inner`.
    full_name: String,
    namespace: String,
    parent: Option<usize>,
    /// Every using directive in effect for the class body.
    usings: Vec<String>,
    nested: IndexMap<String, usize>,
    methods: Vec<u32>,
}

impl ClassInfo<'_> {
    fn display(&self) -> String {
        self.full_name.replace('+', ".")
    }
}

#[derive(Debug, Clone)]
enum TypeSym {
    Host { def: String, args: Vec<Ty> },
    Compiled(usize),
}

#[derive(Debug, Clone)]
enum Resolved {
    Type(TypeSym),
    Namespace(String),
}

enum Lookup {
    Found(Resolved),
    Ambiguous(String, String),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeUse {
    Local,
    Param,
    Return,
    TypeArg,
    Cast,
    Other,
}

/// Result of resolving the left side of a `.`.
enum Qual {
    Value(TypedExpr),
    Type(TypeSym, String),
    Namespace(String),
    MethodGroup(String),
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    read: bool,
    written: bool,
    /// Assigned something other than a constant at least once.
    computed: bool,
}

#[derive(Debug, Clone)]
enum Target {
    Compiled(u32),
    Host(FunctionImport),
    Intrinsic(IntrinsicOp),
}

#[derive(Debug, Clone)]
struct Candidate {
    params: Vec<(ParamMode, Ty)>,
    ret: Ty,
    target: Target,
    label: String,
}

struct CheckedArg {
    mode: ParamMode,
    expr: TypedExpr,
    span: Span,
}

type CResult<T> = Result<T, CompileError>;

struct TypeContext<'a> {
    refs: &'a ReferenceSet,
    classes: Vec<ClassInfo<'a>>,
    /// Top-level classes by full name.
    top_level: HashMap<String, usize>,
    namespaces: HashSet<String>,
    methods: Vec<TypedMethod>,
    decls: Vec<&'a MethodDecl>,
    errors: Vec<CompileError>,
    // Per-method state.
    class: usize,
    method: usize,
    scopes: Vec<Vec<(String, u16)>>,
    usage: Vec<Usage>,
    loop_depth: usize,
}

fn join(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// `A.B` → `["A.B", "A", ""]`.
fn namespace_chain(namespace: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = namespace.to_string();
    while !current.is_empty() {
        chain.push(current.clone());
        current = current.rsplit_once('.').map_or(String::new(), |(head, _)| head.to_string());
    }
    chain.push(String::new());
    chain
}

fn param_label(mode: ParamMode, ty: &Ty) -> String {
    match mode.modifier() {
        Some(modifier) => format!("{modifier} {}", ty.display()),
        None => ty.display(),
    }
}

fn strip_parens(expr: &Expr) -> &Expr {
    match &expr.kind {
        ExprKind::Paren(inner) => strip_parens(inner),
        _ => expr,
    }
}

impl<'a> TypeContext<'a> {
    fn new(refs: &'a ReferenceSet) -> Self {
        Self {
            refs,
            classes: Vec::new(),
            top_level: HashMap::new(),
            namespaces: HashSet::new(),
            methods: Vec::new(),
            decls: Vec::new(),
            errors: Vec::new(),
            class: 0,
            method: 0,
            scopes: Vec::new(),
            usage: Vec::new(),
            loop_depth: 0,
        }
    }

    fn error(&mut self, code: &'static str, message: impl Into<String>, span: Span) {
        self.errors.push(CompileError::error(code, message, span));
    }

    fn check(&mut self, unit: &'a CompilationUnit) {
        let usings: Vec<String> = unit.usings.iter().map(|u| u.name.clone()).collect();
        let mut directive_lists = vec![unit.usings.as_slice()];
        self.collect(&unit.members, "", &usings, &mut directive_lists);
        for list in directive_lists {
            self.check_usings(list);
        }

        for class in 0..self.classes.len() {
            self.declare_methods(class);
        }
        for method in 0..self.methods.len() {
            self.check_method(method);
        }
    }

    // ── Declarations ───────────────────────────────────────────────

    fn collect(
        &mut self,
        members: &'a [Member],
        namespace: &str,
        usings: &[String],
        directive_lists: &mut Vec<&'a [UsingDirective]>,
    ) {
        for member in members {
            match member {
                Member::Namespace(ns) => {
                    let full = join(namespace, &ns.name);
                    let mut prefix = String::new();
                    for segment in full.split('.') {
                        prefix = join(&prefix, segment);
                        self.namespaces.insert(prefix.clone());
                    }
                    let mut inner = usings.to_vec();
                    inner.extend(ns.usings.iter().map(|u| u.name.clone()));
                    directive_lists.push(&ns.usings);
                    self.collect(&ns.members, &full, &inner, directive_lists);
                }
                Member::Class(class) => self.collect_class(class, namespace, usings, None),
            }
        }
    }

    fn collect_class(
        &mut self,
        decl: &'a ClassDecl,
        namespace: &str,
        usings: &[String],
        parent: Option<usize>,
    ) {
        let full_name = match parent {
            Some(p) => format!("{}+{}", self.classes[p].full_name, decl.name),
            None => join(namespace, &decl.name),
        };
        match parent {
            Some(p) if self.classes[p].nested.contains_key(&decl.name) => {
                let outer = self.classes[p].display();
                self.error(
                    "CS0102",
                    format!("The type '{outer}' already contains a definition for '{}'", decl.name),
                    decl.span,
                );
                return;
            }
            None if self.top_level.contains_key(&full_name) => {
                let ns = if namespace.is_empty() { "<global namespace>" } else { namespace };
                self.error(
                    "CS0101",
                    format!("The namespace '{ns}' already contains a definition for '{}'", decl.name),
                    decl.span,
                );
                return;
            }
            _ => {}
        }

        let index = self.classes.len();
        self.classes.push(ClassInfo {
            decl,
            full_name: full_name.clone(),
            namespace: namespace.to_string(),
            parent,
            usings: usings.to_vec(),
            nested: IndexMap::new(),
            methods: Vec::new(),
        });
        match parent {
            Some(p) => {
                self.classes[p].nested.insert(decl.name.clone(), index);
            }
            None => {
                self.top_level.insert(full_name, index);
            }
        }
        for nested in &decl.classes {
            self.collect_class(nested, namespace, usings, Some(index));
        }
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace) || self.refs.has_namespace(namespace)
    }

    fn check_usings(&mut self, usings: &[UsingDirective]) {
        let mut seen = HashSet::new();
        for using in usings {
            if !seen.insert(using.name.as_str()) {
                self.errors.push(CompileError::warning(
                    "CS0105",
                    format!("The using directive for '{}' appeared previously in this namespace", using.name),
                    using.span,
                ));
                continue;
            }
            if self.namespace_exists(&using.name) {
                continue;
            }
            if self.type_named(&using.name).is_some() {
                self.error(
                    "CS0138",
                    format!(
                        "A 'using namespace' directive can only be applied to namespaces; '{}' is a type not a namespace. Consider a 'using static' directive instead",
                        using.name
                    ),
                    using.span,
                );
                continue;
            }
            let mut prefix = String::new();
            for segment in using.name.split('.') {
                let next = join(&prefix, segment);
                if !self.namespace_exists(&next) {
                    if prefix.is_empty() {
                        self.error("CS0246", missing_type(segment), using.span);
                    } else {
                        self.error("CS0234", missing_in_namespace(segment, &prefix), using.span);
                    }
                    break;
                }
                prefix = next;
            }
        }
    }

    fn declare_methods(&mut self, class: usize) {
        self.class = class;
        let decl = self.classes[class].decl;
        let class_label = self.classes[class].display();
        for method in &decl.methods {
            if let Err(e) = self.declare_method(class, &class_label, method) {
                self.errors.push(e);
            }
        }
    }

    fn declare_method(&mut self, class: usize, class_label: &str, decl: &'a MethodDecl) -> CResult<()> {
        if !decl.modifiers.is_static {
            return Err(CompileError::unsupported("instance method", decl.span));
        }
        if decl.name == self.classes[class].decl.name {
            return Err(CompileError::error(
                "CS0542",
                format!("'{}': member names cannot be the same as their enclosing type", decl.name),
                decl.span,
            ));
        }

        let ret = match &decl.return_type {
            Some(ty) => self.resolve_type(ty, TypeUse::Return)?,
            None => Ty::Void,
        };
        let mut params = Vec::new();
        let mut seen = HashSet::new();
        for param in &decl.params {
            if !seen.insert(param.name.as_str()) {
                return Err(CompileError::error(
                    "CS0100",
                    format!("The parameter name '{}' is a duplicate", param.name),
                    param.span,
                ));
            }
            params.push(TypedParam {
                name: param.name.clone(),
                mode: param.mode,
                ty: self.resolve_type(&param.ty, TypeUse::Param)?,
            });
        }

        for &other in &self.classes[class].methods {
            let existing = &self.methods[other as usize];
            if existing.name != decl.name || existing.params.len() != params.len() {
                continue;
            }
            let same_types = existing.params.iter().zip(&params).all(|(a, b)| a.ty == b.ty);
            if !same_types {
                continue;
            }
            if existing.params.iter().zip(&params).all(|(a, b)| a.mode == b.mode) {
                return Err(CompileError::error(
                    "CS0111",
                    format!(
                        "Type '{class_label}' already defines a member called '{}' with the same parameter types",
                        decl.name
                    ),
                    decl.span,
                ));
            }
            let by_ref = |m: ParamMode| if m == ParamMode::Out { ParamMode::Ref } else { m };
            if existing.params.iter().zip(&params).all(|(a, b)| by_ref(a.mode) == by_ref(b.mode)) {
                return Err(CompileError::error(
                    "CS0663",
                    format!(
                        "'{class_label}' cannot define an overloaded method that differs only on parameter modifiers 'out' and 'ref'"
                    ),
                    decl.span,
                ));
            }
        }

        let labels: Vec<String> = params.iter().map(|p| param_label(p.mode, &p.ty)).collect();
        let locals = params
            .iter()
            .zip(&decl.params)
            .map(|(p, d)| LocalMeta {
                name: p.name.clone(),
                ty: p.ty.clone(),
                span: d.span,
                param: Some(p.mode),
            })
            .collect();
        let index = u32::try_from(self.methods.len())
            .map_err(|_| CompileError::unsupported("more than 4294967295 methods", decl.span))?;
        self.methods.push(TypedMethod {
            name: decl.name.clone(),
            label: format!("{class_label}.{}({})", decl.name, labels.join(", ")),
            class: u32::try_from(class).unwrap_or(u32::MAX),
            is_public: decl.modifiers.public,
            is_static: decl.modifiers.is_static,
            params,
            ret,
            locals,
            body: Vec::new(),
            span: decl.span,
        });
        self.decls.push(decl);
        self.classes[class].methods.push(index);
        Ok(())
    }

    // ── Type resolution ────────────────────────────────────────────

    /// A type with exactly this full name, compiled classes first.
    fn type_named(&self, full: &str) -> Option<TypeSym> {
        if let Some(&class) = self.top_level.get(full) {
            return Some(TypeSym::Compiled(class));
        }
        self.refs.find_type(full).map(|_| TypeSym::Host {
            def: full.to_string(),
            args: Vec::new(),
        })
    }

    /// Resolve a simple name from the current class outwards.
    fn find_simple(&self, name: &str) -> Lookup {
        let mut cursor = Some(self.class);
        while let Some(class) = cursor.filter(|&c| c < self.classes.len()) {
            if let Some(&nested) = self.classes[class].nested.get(name) {
                return Lookup::Found(Resolved::Type(TypeSym::Compiled(nested)));
            }
            cursor = self.classes[class].parent;
        }

        let (namespace, usings) = match self.classes.get(self.class) {
            Some(info) => (info.namespace.as_str(), info.usings.as_slice()),
            None => ("", [].as_slice()),
        };
        for prefix in namespace_chain(namespace) {
            let full = join(&prefix, name);
            if let Some(sym) = self.type_named(&full) {
                return Lookup::Found(Resolved::Type(sym));
            }
            if self.namespace_exists(&full) {
                return Lookup::Found(Resolved::Namespace(full));
            }
        }

        let mut found: Vec<(String, TypeSym)> = Vec::new();
        for using in usings {
            let full = join(using, name);
            if found.iter().any(|(f, _)| *f == full) {
                continue;
            }
            if let Some(sym) = self.type_named(&full) {
                found.push((full, sym));
            }
        }
        match found.len() {
            0 => Lookup::Missing,
            1 => found
                .pop()
                .map_or(Lookup::Missing, |(_, sym)| Lookup::Found(Resolved::Type(sym))),
            _ => Lookup::Ambiguous(found[0].0.clone(), found[1].0.clone()),
        }
    }

    /// `name` inside a namespace or type.
    fn find_member(&self, container: &Resolved, name: &str) -> Option<Resolved> {
        match container {
            Resolved::Namespace(ns) => {
                let full = join(ns, name);
                if let Some(sym) = self.type_named(&full) {
                    Some(Resolved::Type(sym))
                } else if self.namespace_exists(&full) {
                    Some(Resolved::Namespace(full))
                } else {
                    None
                }
            }
            Resolved::Type(TypeSym::Compiled(class)) => self.classes[*class]
                .nested
                .get(name)
                .map(|&n| Resolved::Type(TypeSym::Compiled(n))),
            Resolved::Type(TypeSym::Host { def, .. }) => {
                let full = format!("{def}.{name}");
                self.refs.find_type(&full).map(|_| {
                    Resolved::Type(TypeSym::Host {
                        def: full,
                        args: Vec::new(),
                    })
                })
            }
        }
    }

    fn sym_display(&self, sym: &TypeSym) -> String {
        match sym {
            TypeSym::Compiled(class) => self.classes[*class].display(),
            TypeSym::Host { def, .. } => def.clone(),
        }
    }

    fn with_args(&self, resolved: Resolved, args: Vec<Ty>, name: &str, span: Span) -> CResult<Resolved> {
        match resolved {
            Resolved::Type(TypeSym::Host { def, .. }) if def == value::LIST => {
                if args.len() == 1 {
                    Ok(Resolved::Type(TypeSym::Host { def, args }))
                } else {
                    Err(CompileError::error(
                        "CS0305",
                        "Using the generic type 'List<T>' requires 1 type arguments",
                        span,
                    ))
                }
            }
            Resolved::Namespace(_) if !args.is_empty() => Err(CompileError::error(
                "CS0246",
                missing_type(&format!("{name}<>")),
                span,
            )),
            Resolved::Type(sym) if !args.is_empty() => Err(CompileError::error(
                "CS0308",
                format!(
                    "The non-generic type '{}' cannot be used with type arguments",
                    self.sym_display(&sym)
                ),
                span,
            )),
            other => Ok(other),
        }
    }

    fn resolve_path(&mut self, segments: &[TypeSegment], span: Span) -> CResult<Resolved> {
        let Some((first, rest)) = segments.split_first() else {
            return Err(CompileError::error("CS1001", "Identifier expected", span));
        };
        let args = self.resolve_type_args(&first.args)?;
        let mut current = match self.find_simple(&first.name) {
            Lookup::Found(resolved) => self.with_args(resolved, args, &first.name, span)?,
            Lookup::Ambiguous(a, b) => return Err(ambiguous(&first.name, &a, &b, span)),
            Lookup::Missing => {
                return Err(CompileError::error("CS0246", missing_type(&first.name), span));
            }
        };
        for segment in rest {
            let args = self.resolve_type_args(&segment.args)?;
            current = match self.find_member(&current, &segment.name) {
                Some(found) => self.with_args(found, args, &segment.name, span)?,
                None => return Err(self.missing_member_type(&current, &segment.name, span)),
            };
        }
        Ok(current)
    }

    fn missing_member_type(&self, container: &Resolved, name: &str, span: Span) -> CompileError {
        match container {
            Resolved::Namespace(ns) => CompileError::error("CS0234", missing_in_namespace(name, ns), span),
            Resolved::Type(sym) => CompileError::error(
                "CS0426",
                format!("The type name '{name}' does not exist in the type '{}'", self.sym_display(sym)),
                span,
            ),
        }
    }

    fn resolve_type_args(&mut self, args: &[TypeSyntax]) -> CResult<Vec<Ty>> {
        args.iter().map(|a| self.resolve_type(a, TypeUse::TypeArg)).collect()
    }

    fn resolve_sym(&mut self, syntax: &TypeSyntax) -> CResult<TypeSym> {
        match &syntax.kind {
            TypeSyntaxKind::Predefined(p) => Ok(TypeSym::Host {
                def: predefined_name(*p).to_string(),
                args: Vec::new(),
            }),
            TypeSyntaxKind::Named(segments) => match self.resolve_path(segments, syntax.span)? {
                Resolved::Type(sym) => Ok(sym),
                Resolved::Namespace(ns) => Err(CompileError::error(
                    "CS0118",
                    format!("'{ns}' is a namespace but is used like a type"),
                    syntax.span,
                )),
            },
        }
    }

    fn resolve_type(&mut self, syntax: &TypeSyntax, usage: TypeUse) -> CResult<Ty> {
        if let TypeSyntaxKind::Predefined(p) = &syntax.kind {
            return Ok(predefined_ty(*p));
        }
        let sym = self.resolve_sym(syntax)?;
        self.sym_ty(&sym, usage, syntax.span)
    }

    fn sym_ty(&self, sym: &TypeSym, usage: TypeUse, span: Span) -> CResult<Ty> {
        let (def, args) = match sym {
            TypeSym::Compiled(class) => {
                return Err(CompileError::unsupported(
                    &format!("values of the compiled class '{}'", self.classes[*class].display()),
                    span,
                ));
            }
            TypeSym::Host { def, args } => (def.as_str(), args),
        };
        Ok(match def {
            value::OBJECT => Ty::Object,
            value::BOOLEAN => Ty::Bool,
            value::INT32 => Ty::Int,
            value::INT64 => Ty::Long,
            value::DOUBLE => Ty::Double,
            value::STRING => Ty::String,
            value::LIST => Ty::List(Box::new(args.first().cloned().unwrap_or(Ty::Error))),
            other => {
                let is_static = self
                    .refs
                    .find_type(other)
                    .is_some_and(|t| t.kind() == HostTypeKind::Static);
                if is_static {
                    return Err(static_type_error(other, usage, span));
                }
                Ty::Class(other.to_string())
            }
        })
    }
}

fn missing_type(name: &str) -> String {
    format!("The type or namespace name '{name}' could not be found (are you missing a using directive or an assembly reference?)")
}

fn missing_in_namespace(name: &str, namespace: &str) -> String {
    format!("The type or namespace name '{name}' does not exist in the namespace '{namespace}' (are you missing an assembly reference?)")
}

fn ambiguous(name: &str, a: &str, b: &str, span: Span) -> CompileError {
    CompileError::error(
        "CS0104",
        format!("'{name}' is an ambiguous reference between '{a}' and '{b}'"),
        span,
    )
}

fn static_type_error(name: &str, usage: TypeUse, span: Span) -> CompileError {
    let (code, message) = match usage {
        TypeUse::Local => ("CS0723", format!("Cannot declare a variable of static type '{name}'")),
        TypeUse::Param => ("CS0721", format!("'{name}': static types cannot be used as parameters")),
        TypeUse::Return => ("CS0722", format!("'{name}': static types cannot be used as return types")),
        TypeUse::TypeArg => ("CS0718", format!("'{name}': static types cannot be used as type arguments")),
        TypeUse::Cast => ("CS0716", format!("Cannot convert to static type '{name}'")),
        TypeUse::Other => ("CS0712", format!("Cannot create an instance of the static class '{name}'")),
    };
    CompileError::error(code, message, span)
}

// ── Bodies ─────────────────────────────────────────────────────────

impl TypeContext<'_> {
    fn check_method(&mut self, index: usize) {
        let decl = self.decls[index];
        self.method = index;
        self.class = self.methods[index].class as usize;
        self.loop_depth = 0;
        let params: Vec<(String, u16)> = self.methods[index]
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i as u16))
            .collect();
        let used = Usage {
            read: true,
            written: true,
            computed: true,
        };
        self.usage = vec![used; params.len()];
        self.scopes = vec![params, Vec::new()];

        let body = self.check_block(&decl.body);
        self.scopes.clear();
        self.warn_unused();
        self.methods[index].body = body;
    }

    fn warn_unused(&mut self) {
        let mut warnings = Vec::new();
        for (local, usage) in self.methods[self.method].locals.iter().zip(&self.usage) {
            if local.param.is_some() || usage.read {
                continue;
            }
            if !usage.written {
                warnings.push(CompileError::warning(
                    "CS0168",
                    format!("The variable '{}' is declared but never used", local.name),
                    local.span,
                ));
            } else if !usage.computed {
                warnings.push(CompileError::warning(
                    "CS0219",
                    format!("The variable '{}' is assigned but its value is never used", local.name),
                    local.span,
                ));
            }
        }
        self.errors.extend(warnings);
    }

    fn check_block(&mut self, stmts: &[Stmt]) -> Vec<TypedStmt> {
        let mut typed = Vec::new();
        for stmt in stmts {
            match self.check_stmt(stmt) {
                Ok(ts) => typed.push(ts),
                Err(e) => self.errors.push(e),
            }
        }
        typed
    }

    /// Statement whose errors are recorded in place, so siblings are still
    /// checked.
    fn check_embedded(&mut self, stmt: &Stmt) -> TypedStmt {
        self.check_stmt(stmt).unwrap_or_else(|e| {
            self.errors.push(e);
            TypedStmt {
                kind: TypedStmtKind::Block(Vec::new()),
                span: stmt.span,
            }
        })
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> CResult<TypedStmt> {
        let span = stmt.span;
        let kind = match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.scopes.push(Vec::new());
                let block = self.check_block(stmts);
                self.scopes.pop();
                TypedStmtKind::Block(block)
            }
            StmtKind::Empty => TypedStmtKind::Block(Vec::new()),
            StmtKind::Local { ty, declarators } => self.check_local(ty, declarators, span),
            StmtKind::Expr(expr) => TypedStmtKind::Expr(self.check_statement_expr(expr)?),
            StmtKind::Return(value) => self.check_return(value.as_ref(), span)?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.check_condition(cond);
                let then_branch = Box::new(self.check_embedded(then_branch));
                let else_branch = else_branch.as_ref().map(|s| Box::new(self.check_embedded(s)));
                TypedStmtKind::If {
                    cond: cond?,
                    then_branch,
                    else_branch,
                }
            }
            StmtKind::While { cond, body } => {
                let cond = self.check_condition(cond);
                self.loop_depth += 1;
                let body = Box::new(self.check_embedded(body));
                self.loop_depth -= 1;
                TypedStmtKind::While { cond: cond?, body }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(Vec::new());
                let result = self.check_for(init, cond.as_ref(), step, body);
                self.scopes.pop();
                result?
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(CompileError::error(
                        "CS0139",
                        "No enclosing loop out of which to break or continue",
                        span,
                    ));
                }
                if matches!(stmt.kind, StmtKind::Break) {
                    TypedStmtKind::Break
                } else {
                    TypedStmtKind::Continue
                }
            }
        };
        Ok(TypedStmt { kind, span })
    }

    fn check_for(
        &mut self,
        init: &[Stmt],
        cond: Option<&Expr>,
        step: &[Expr],
        body: &Stmt,
    ) -> CResult<TypedStmtKind> {
        let init = self.check_block(init);
        let cond = cond.map(|c| self.check_condition(c)).transpose();
        let step: CResult<Vec<TypedExpr>> = step.iter().map(|e| self.check_statement_expr(e)).collect();
        self.loop_depth += 1;
        let body = Box::new(self.check_embedded(body));
        self.loop_depth -= 1;
        Ok(TypedStmtKind::For {
            init,
            cond: cond?,
            step: step?,
            body,
        })
    }

    fn check_local(&mut self, ty: &TypeSyntax, declarators: &[Declarator], span: Span) -> TypedStmtKind {
        let implicit_type = ty.is_var();
        if implicit_type && declarators.len() > 1 {
            self.error("CS0819", "Implicitly-typed variables cannot have multiple declarators", span);
        }
        let declared = if implicit_type {
            None
        } else {
            Some(self.resolve_type(ty, TypeUse::Local).unwrap_or_else(|e| {
                self.errors.push(e);
                Ty::Error
            }))
        };

        let mut stmts = Vec::new();
        for declarator in declarators {
            let init = declarator.init.as_ref().map(|e| self.check_expr(e));
            let local_ty = match (&declared, &init) {
                (Some(ty), _) => ty.clone(),
                (None, None) => {
                    self.error("CS0818", "Implicitly-typed variables must be initialized", declarator.span);
                    Ty::Error
                }
                (None, Some(Ok(value))) if matches!(value.ty, Ty::Null | Ty::Void) => {
                    let shown = value.ty.display();
                    self.error(
                        "CS0815",
                        format!("Cannot assign {shown} to an implicitly-typed variable"),
                        declarator.span,
                    );
                    Ty::Error
                }
                (None, Some(Ok(value))) => value.ty.clone(),
                (None, Some(Err(_))) => Ty::Error,
            };

            let index = match self.declare_local(&declarator.name, local_ty.clone(), declarator.span) {
                Ok(index) => index,
                Err(e) => {
                    self.errors.push(e);
                    continue;
                }
            };
            let value = match init {
                Some(Ok(value)) => value,
                Some(Err(e)) => {
                    self.errors.push(e);
                    continue;
                }
                None => continue,
            };
            match self.coerce(value, &local_ty) {
                Ok(value) => {
                    self.note_write(index, &value);
                    let assign = TypedExpr::new(
                        TypedExprKind::Assign {
                            place: Place::Local(index),
                            value: Box::new(value),
                        },
                        local_ty,
                        declarator.span,
                    );
                    stmts.push(TypedStmt {
                        kind: TypedStmtKind::Expr(assign),
                        span: declarator.span,
                    });
                }
                Err(e) => self.errors.push(e),
            }
        }
        TypedStmtKind::Block(stmts)
    }

    fn check_statement_expr(&mut self, expr: &Expr) -> CResult<TypedExpr> {
        let allowed = matches!(
            expr.kind,
            ExprKind::Assign { .. } | ExprKind::IncDec { .. } | ExprKind::Call { .. } | ExprKind::New { .. }
        );
        if !allowed {
            return Err(CompileError::error(
                "CS0201",
                "Only assignment, call, increment, decrement, await, and new object expressions can be used as a statement",
                expr.span,
            ));
        }
        self.check_expr(expr)
    }

    fn check_return(&mut self, value: Option<&Expr>, span: Span) -> CResult<TypedStmtKind> {
        let ret = self.methods[self.method].ret.clone();
        match (value, &ret) {
            (None, Ty::Void) => Ok(TypedStmtKind::Return(None)),
            (Some(_), Ty::Void) => Err(CompileError::error(
                "CS0127",
                format!(
                    "Since '{}' returns void, a return keyword must not be followed by an object expression",
                    self.methods[self.method].label
                ),
                span,
            )),
            (None, ty) => Err(CompileError::error(
                "CS0126",
                format!("An object of a type convertible to '{}' is required", ty.display()),
                span,
            )),
            (Some(expr), ty) => {
                let value = self.check_expr(expr)?;
                Ok(TypedStmtKind::Return(Some(self.coerce(value, ty)?)))
            }
        }
    }

    fn check_condition(&mut self, expr: &Expr) -> CResult<TypedExpr> {
        let value = self.check_expr(expr)?;
        self.coerce(value, &Ty::Bool)
    }

    // ── Locals ─────────────────────────────────────────────────────

    fn lookup_local(&self, name: &str) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, index)| *index)
    }

    fn declare_local(&mut self, name: &str, ty: Ty, span: Span) -> CResult<u16> {
        if self.scopes.last().is_some_and(|s| s.iter().any(|(n, _)| n == name)) {
            return Err(CompileError::error(
                "CS0128",
                format!("A local variable or function named '{name}' is already defined in this scope"),
                span,
            ));
        }
        if self.lookup_local(name).is_some() {
            return Err(CompileError::error(
                "CS0136",
                format!(
                    "A local or parameter named '{name}' cannot be declared in this scope because that name is used in an enclosing local scope to define a local or parameter"
                ),
                span,
            ));
        }
        let method = &mut self.methods[self.method];
        let index = u16::try_from(method.locals.len())
            .map_err(|_| CompileError::unsupported("more than 65535 locals", span))?;
        method.locals.push(LocalMeta {
            name: name.to_string(),
            ty,
            span,
            param: None,
        });
        self.usage.push(Usage::default());
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), index));
        }
        Ok(index)
    }

    fn local_ty(&self, index: u16) -> Ty {
        self.methods[self.method].locals[index as usize].ty.clone()
    }

    fn note_write(&mut self, index: u16, value: &TypedExpr) {
        let usage = &mut self.usage[index as usize];
        usage.written = true;
        if value.as_constant().is_none() {
            usage.computed = true;
        }
    }
}

// ── Expressions ────────────────────────────────────────────────────

fn no_definition(owner: &str, name: &str, span: Span) -> CompileError {
    CompileError::error("CS0117", format!("'{owner}' does not contain a definition for '{name}'"), span)
}

fn no_instance_member(ty: &Ty, name: &str, span: Span) -> CompileError {
    let shown = ty.display();
    CompileError::error(
        "CS1061",
        format!(
            "'{shown}' does not contain a definition for '{name}' and no accessible extension method '{name}' accepting a first argument of type '{shown}' could be found (are you missing a using directive or an assembly reference?)"
        ),
        span,
    )
}

fn non_invocable(member: &str, span: Span) -> CompileError {
    CompileError::error("CS1955", format!("Non-invocable member '{member}' cannot be used like a method."), span)
}

fn bad_operand(op: &str, ty: &Ty, span: Span) -> CompileError {
    CompileError::error(
        "CS0023",
        format!("Operator '{op}' cannot be applied to operand of type '{}'", ty.display()),
        span,
    )
}

fn slot_ty(slot: Slot, receiver: &Ty) -> Ty {
    match slot {
        Slot::Void => Ty::Void,
        Slot::Bool => Ty::Bool,
        Slot::Int => Ty::Int,
        Slot::String => Ty::String,
        Slot::Object => Ty::Object,
        Slot::Element => match receiver {
            Ty::List(element) => (**element).clone(),
            _ => Ty::Object,
        },
    }
}

fn apply_coercion(expr: TypedExpr, coercion: Coercion, to: &Ty) -> TypedExpr {
    match coercion {
        Coercion::Identity => expr,
        Coercion::Reference => TypedExpr { ty: to.clone(), ..expr },
        Coercion::Convert(conversion) => {
            if let (Conversion::Numeric(conv), Some(value)) = (&conversion, expr.as_constant()) {
                if let Some(folded) = Constant::from_value(&conv.apply(&value.to_value())) {
                    return TypedExpr::new(TypedExprKind::Const(folded), to.clone(), expr.span);
                }
            }
            let span = expr.span;
            TypedExpr::new(
                TypedExprKind::Convert {
                    conversion,
                    expr: Box::new(expr),
                },
                to.clone(),
                span,
            )
        }
    }
}

/// Typing of a binary operator: the runtime operator, the type both
/// operands are converted to (none for concatenation and reference
/// equality) and the result type.
fn binary_typing(op: BinOp, left: &Ty, right: &Ty) -> Option<(ArithOp, Option<Ty>, Ty)> {
    let arith = match op {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mul => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        BinOp::Rem => ArithOp::Rem,
        BinOp::Lt => ArithOp::Lt,
        BinOp::Gt => ArithOp::Gt,
        BinOp::Le => ArithOp::Le,
        BinOp::Ge => ArithOp::Ge,
        BinOp::Eq => ArithOp::Eq,
        BinOp::Ne => ArithOp::Ne,
        BinOp::And | BinOp::Or => return None,
    };
    let comparison = matches!(op, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne);
    if op == BinOp::Add
        && (*left == Ty::String || *right == Ty::String)
        && *left != Ty::Void
        && *right != Ty::Void
    {
        return Some((ArithOp::Concat, None, Ty::String));
    }
    if let (Some(a), Some(b)) = (left.rank(), right.rank()) {
        let operand = if a >= b { left.clone() } else { right.clone() };
        let result = if comparison { Ty::Bool } else { operand.clone() };
        return Some((arith, Some(operand), result));
    }
    match op {
        BinOp::Eq | BinOp::Ne if *left == Ty::Bool && *right == Ty::Bool => {
            Some((arith, Some(Ty::Bool), Ty::Bool))
        }
        BinOp::Eq | BinOp::Ne
            if left.is_reference()
                && right.is_reference()
                && (implicit(left, right).is_some() || implicit(right, left).is_some()) =>
        {
            Some((arith, None, Ty::Bool))
        }
        _ => None,
    }
}

const DIVIDE_BY_ZERO: &str = "CS0020";
const OVERFLOW: &str = "CS0220";

enum Folded {
    Num(i128),
    Bool(bool),
}

fn fold_integral(op: ArithOp, a: i128, b: i128) -> Result<Option<Folded>, &'static str> {
    Ok(Some(match op {
        ArithOp::Add => Folded::Num(a + b),
        ArithOp::Sub => Folded::Num(a - b),
        ArithOp::Mul => Folded::Num(a * b),
        ArithOp::Div | ArithOp::Rem if b == 0 => return Err(DIVIDE_BY_ZERO),
        ArithOp::Div => Folded::Num(a / b),
        ArithOp::Rem => Folded::Num(a % b),
        ArithOp::Eq => Folded::Bool(a == b),
        ArithOp::Ne => Folded::Bool(a != b),
        ArithOp::Lt => Folded::Bool(a < b),
        ArithOp::Le => Folded::Bool(a <= b),
        ArithOp::Gt => Folded::Bool(a > b),
        ArithOp::Ge => Folded::Bool(a >= b),
        ArithOp::Concat => return Ok(None),
    }))
}

#[allow(clippy::float_cmp)]
fn fold_double(op: ArithOp, a: f64, b: f64) -> Option<Constant> {
    Some(match op {
        ArithOp::Add => Constant::Double(a + b),
        ArithOp::Sub => Constant::Double(a - b),
        ArithOp::Mul => Constant::Double(a * b),
        ArithOp::Div => Constant::Double(a / b),
        ArithOp::Rem => Constant::Double(a % b),
        ArithOp::Eq => Constant::Bool(a == b),
        ArithOp::Ne => Constant::Bool(a != b),
        ArithOp::Lt => Constant::Bool(a < b),
        ArithOp::Le => Constant::Bool(a <= b),
        ArithOp::Gt => Constant::Bool(a > b),
        ArithOp::Ge => Constant::Bool(a >= b),
        ArithOp::Concat => return None,
    })
}

/// Evaluate an operator on two constants of the operand type. Returns the
/// diagnostic code when the operation cannot be evaluated.
fn fold(op: ArithOp, left: &Constant, right: &Constant) -> Result<Option<Constant>, &'static str> {
    Ok(match (left, right) {
        (Constant::Int(a), Constant::Int(b)) => match fold_integral(op, i128::from(*a), i128::from(*b))? {
            Some(Folded::Num(n)) => Some(Constant::Int(i32::try_from(n).map_err(|_| OVERFLOW)?)),
            Some(Folded::Bool(b)) => Some(Constant::Bool(b)),
            None => None,
        },
        (Constant::Long(a), Constant::Long(b)) => match fold_integral(op, i128::from(*a), i128::from(*b))? {
            Some(Folded::Num(n)) => Some(Constant::Long(i64::try_from(n).map_err(|_| OVERFLOW)?)),
            Some(Folded::Bool(b)) => Some(Constant::Bool(b)),
            None => None,
        },
        (Constant::Double(a), Constant::Double(b)) => fold_double(op, *a, *b),
        (Constant::Str(a), Constant::Str(b)) => match op {
            ArithOp::Concat => Some(Constant::Str(format!("{a}{b}"))),
            ArithOp::Eq => Some(Constant::Bool(a == b)),
            ArithOp::Ne => Some(Constant::Bool(a != b)),
            _ => None,
        },
        (Constant::Str(s), Constant::Null) | (Constant::Null, Constant::Str(s)) if op == ArithOp::Concat => {
            Some(Constant::Str(s.clone()))
        }
        (Constant::Bool(a), Constant::Bool(b)) => match op {
            ArithOp::Eq => Some(Constant::Bool(a == b)),
            ArithOp::Ne => Some(Constant::Bool(a != b)),
            _ => None,
        },
        _ => None,
    })
}

fn fold_error(code: &'static str, span: Span) -> CompileError {
    if code == DIVIDE_BY_ZERO {
        CompileError::error(code, "Division by constant zero", span)
    } else {
        CompileError::error(code, "The operation overflows at compile time in checked mode", span)
    }
}

impl TypeContext<'_> {
    fn error_expr(span: Span) -> TypedExpr {
        TypedExpr::new(TypedExprKind::Const(Constant::Null), Ty::Error, span)
    }

    fn coerce(&self, expr: TypedExpr, to: &Ty) -> CResult<TypedExpr> {
        if let Some(coercion) = implicit(&expr.ty, to) {
            return Ok(apply_coercion(expr, coercion, to));
        }
        let (from, target) = (expr.ty.display(), to.display());
        Err(if explicit(&expr.ty, to).is_some() {
            CompileError::error(
                "CS0266",
                format!("Cannot implicitly convert type '{from}' to '{target}'. An explicit conversion exists (are you missing a cast?)"),
                expr.span,
            )
        } else {
            CompileError::error(
                "CS0029",
                format!("Cannot implicitly convert type '{from}' to '{target}'"),
                expr.span,
            )
        })
    }

    fn check_expr(&mut self, expr: &Expr) -> CResult<TypedExpr> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(v) => Ok(TypedExpr::constant(Constant::Int(*v), span)),
            ExprKind::Long(v) => Ok(TypedExpr::constant(Constant::Long(*v), span)),
            ExprKind::Double(v) => Ok(TypedExpr::constant(Constant::Double(*v), span)),
            ExprKind::Str(s) => Ok(TypedExpr::constant(Constant::Str(s.clone()), span)),
            ExprKind::Bool(b) => Ok(TypedExpr::constant(Constant::Bool(*b), span)),
            ExprKind::Null => Ok(TypedExpr::constant(Constant::Null, span)),
            ExprKind::Paren(inner) => self.check_expr(inner),
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::PredefinedType(_) => {
                let qual = self.qualifier(expr)?;
                self.qual_value(qual, span)
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, span),
            ExprKind::New { ty, args } => self.check_new(ty, args, span),
            ExprKind::Assign { op, target, value } => self.check_assign(*op, target, value, span),
            ExprKind::Binary { op, left, right } => self.check_binary(*op, left, right, span),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand, span),
            ExprKind::IncDec {
                increment,
                prefix,
                target,
            } => self.check_incdec(*increment, *prefix, target, span),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => self.check_conditional(cond, then_expr, else_expr, span),
            ExprKind::Cast { ty, expr: inner } => self.check_cast(ty, inner, span),
        }
    }

    fn qual_value(&self, qual: Qual, span: Span) -> CResult<TypedExpr> {
        match qual {
            Qual::Value(value) => Ok(value),
            Qual::Type(_, shown) => Err(CompileError::error(
                "CS0119",
                format!("'{shown}' is a type, which is not valid in the given context"),
                span,
            )),
            Qual::Namespace(ns) => Err(CompileError::error(
                "CS0118",
                format!("'{ns}' is a namespace but is used like a variable"),
                span,
            )),
            Qual::MethodGroup(label) => Err(CompileError::unsupported(
                &format!("method group '{label}' used as a value"),
                span,
            )),
        }
    }

    // ── Names and members ──────────────────────────────────────────

    fn qualifier(&mut self, expr: &Expr) -> CResult<Qual> {
        match &expr.kind {
            ExprKind::Name(name) => self.name_qual(name, expr.span),
            ExprKind::PredefinedType(p) => Ok(Qual::Type(
                TypeSym::Host {
                    def: predefined_name(*p).to_string(),
                    args: Vec::new(),
                },
                p.keyword().to_string(),
            )),
            ExprKind::Member { object, name } => {
                let base = self.qualifier(object)?;
                self.member_qual(base, name, expr.span)
            }
            _ => Ok(Qual::Value(self.check_expr(expr)?)),
        }
    }

    /// Innermost class in scope that declares methods called `name`.
    fn method_scope(&self, name: &str) -> Option<(usize, Vec<u32>)> {
        let mut cursor = Some(self.class);
        while let Some(class) = cursor {
            let methods: Vec<u32> = self.classes[class]
                .methods
                .iter()
                .copied()
                .filter(|&m| self.methods[m as usize].name == name)
                .collect();
            if !methods.is_empty() {
                return Some((class, methods));
            }
            cursor = self.classes[class].parent;
        }
        None
    }

    fn name_qual(&mut self, name: &str, span: Span) -> CResult<Qual> {
        if let Some(index) = self.lookup_local(name) {
            self.usage[index as usize].read = true;
            let ty = self.local_ty(index);
            return Ok(Qual::Value(TypedExpr::new(TypedExprKind::Local(index), ty, span)));
        }
        if let Some((class, _)) = self.method_scope(name) {
            return Ok(Qual::MethodGroup(format!("{}.{name}", self.classes[class].display())));
        }
        match self.find_simple(name) {
            Lookup::Found(Resolved::Type(sym)) => {
                let shown = self.sym_display(&sym);
                Ok(Qual::Type(sym, shown))
            }
            Lookup::Found(Resolved::Namespace(ns)) => Ok(Qual::Namespace(ns)),
            Lookup::Ambiguous(a, b) => Err(ambiguous(name, &a, &b, span)),
            Lookup::Missing => Err(CompileError::error(
                "CS0103",
                format!("The name '{name}' does not exist in the current context"),
                span,
            )),
        }
    }

    fn member_qual(&mut self, base: Qual, name: &str, span: Span) -> CResult<Qual> {
        match base {
            Qual::Namespace(ns) => match self.find_member(&Resolved::Namespace(ns.clone()), name) {
                Some(Resolved::Type(sym)) => {
                    let shown = self.sym_display(&sym);
                    Ok(Qual::Type(sym, shown))
                }
                Some(Resolved::Namespace(inner)) => Ok(Qual::Namespace(inner)),
                None => Err(CompileError::error("CS0234", missing_in_namespace(name, &ns), span)),
            },
            Qual::MethodGroup(label) => Err(CompileError::error(
                "CS0119",
                format!("'{label}' is a method, which is not valid in the given context"),
                span,
            )),
            Qual::Type(sym, shown) => self.static_member(&sym, &shown, name, span),
            Qual::Value(object) => self.instance_member(object, name, span),
        }
    }

    fn static_member(&self, sym: &TypeSym, shown: &str, name: &str, span: Span) -> CResult<Qual> {
        let refs = self.refs;
        match sym {
            TypeSym::Compiled(class) => {
                if let Some(&nested) = self.classes[*class].nested.get(name) {
                    return Ok(Qual::Type(TypeSym::Compiled(nested), self.classes[nested].display()));
                }
                let has_method = self.classes[*class]
                    .methods
                    .iter()
                    .any(|&m| self.methods[m as usize].name == name);
                if has_method {
                    return Ok(Qual::MethodGroup(format!("{shown}.{name}")));
                }
                Err(no_definition(shown, name, span))
            }
            TypeSym::Host { def, .. } => {
                let host = refs.find_type(def);
                if let Some(constant) = host.and_then(|h| h.constant(name)) {
                    let value = Constant::from_value(&constant.value).ok_or_else(|| {
                        CompileError::unsupported(&format!("constant '{shown}.{name}'"), span)
                    })?;
                    let ty = Ty::from_desc(&constant.ty);
                    return Ok(Qual::Value(TypedExpr::new(TypedExprKind::Const(value), ty, span)));
                }
                let nested = format!("{def}.{name}");
                if refs.find_type(&nested).is_some() {
                    return Ok(Qual::Type(
                        TypeSym::Host {
                            def: nested.clone(),
                            args: Vec::new(),
                        },
                        nested,
                    ));
                }
                if host.is_some_and(|h| h.field(name).is_some()) {
                    return Err(CompileError::error(
                        "CS0120",
                        format!("An object reference is required for the non-static field, method, or property '{shown}.{name}'"),
                        span,
                    ));
                }
                if host.is_some_and(|h| h.methods_named(name).next().is_some()) {
                    return Ok(Qual::MethodGroup(format!("{shown}.{name}")));
                }
                Err(no_definition(shown, name, span))
            }
        }
    }

    fn instance_member(&self, object: TypedExpr, name: &str, span: Span) -> CResult<Qual> {
        match &object.ty {
            Ty::Null | Ty::Void => return Err(bad_operand(".", &object.ty, span)),
            Ty::Error => return Ok(Qual::Value(Self::error_expr(span))),
            Ty::Class(def) => {
                if let Some(field) = self.refs.find_type(def).and_then(|h| h.field(name)) {
                    let ty = Ty::from_desc(&field.ty);
                    return Ok(Qual::Value(TypedExpr::new(
                        TypedExprKind::Field {
                            object: Box::new(object),
                            name: name.to_string(),
                        },
                        ty,
                        span,
                    )));
                }
            }
            _ => {}
        }
        let receiver = object.ty.receiver();
        if let Some(member) = builtins::lookup(receiver, name, true).first() {
            let ty = slot_ty(member.ret, &object.ty);
            return Ok(Qual::Value(TypedExpr::new(
                TypedExprKind::Intrinsic {
                    op: member.op,
                    receiver: Box::new(object),
                    args: Vec::new(),
                },
                ty,
                span,
            )));
        }
        if !builtins::lookup(receiver, name, false).is_empty() {
            return Ok(Qual::MethodGroup(format!("{}.{name}", object.ty.display())));
        }
        Err(no_instance_member(&object.ty, name, span))
    }
}

// ── Calls ──────────────────────────────────────────────────────────

fn same_ty(a: &Ty, b: &Ty) -> bool {
    a == b || matches!(a, Ty::Error) || matches!(b, Ty::Error)
}

fn arg_fits(arg: &CheckedArg, mode: ParamMode, ty: &Ty) -> bool {
    match mode {
        ParamMode::Value => arg.mode == ParamMode::Value && implicit(&arg.expr.ty, ty).is_some(),
        ParamMode::In => match arg.mode {
            ParamMode::Value => implicit(&arg.expr.ty, ty).is_some(),
            ParamMode::In => same_ty(&arg.expr.ty, ty),
            ParamMode::Ref | ParamMode::Out => false,
        },
        ParamMode::Ref | ParamMode::Out => arg.mode == mode && same_ty(&arg.expr.ty, ty),
    }
}

fn applicable(candidate: &Candidate, args: &[CheckedArg]) -> bool {
    candidate.params.len() == args.len()
        && args
            .iter()
            .zip(&candidate.params)
            .all(|(arg, (mode, ty))| arg_fits(arg, *mode, ty))
}

/// `Some(true)` when converting `from` to `a` beats converting it to `b`.
fn better_conversion(from: &Ty, a: &Ty, b: &Ty) -> Option<bool> {
    if a == b {
        return None;
    }
    if from == a {
        return Some(true);
    }
    if from == b {
        return Some(false);
    }
    match (implicit(a, b).is_some(), implicit(b, a).is_some()) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

fn better(a: &Candidate, b: &Candidate, args: &[CheckedArg]) -> bool {
    let mut strictly = false;
    for (k, arg) in args.iter().enumerate() {
        match better_conversion(&arg.expr.ty, &a.params[k].1, &b.params[k].1) {
            Some(true) => strictly = true,
            Some(false) => return false,
            None => {}
        }
    }
    strictly
}

fn mismatch(candidates: &[Candidate], args: &[CheckedArg], name: &str, span: Span) -> CompileError {
    let no_overload = || {
        CompileError::error(
            "CS1501",
            format!("No overload for method '{name}' takes {} arguments", args.len()),
            span,
        )
    };
    let Some(candidate) = candidates.iter().find(|c| c.params.len() == args.len()) else {
        return no_overload();
    };
    for (i, (arg, (mode, ty))) in args.iter().zip(&candidate.params).enumerate() {
        let position = i + 1;
        if mode.writes_back() && arg.mode != *mode {
            let keyword = mode.modifier().unwrap_or_default();
            return CompileError::error(
                "CS1620",
                format!("Argument {position} must be passed with the '{keyword}' keyword"),
                arg.span,
            );
        }
        let keyword_not_allowed = match mode {
            ParamMode::Value => arg.mode != ParamMode::Value,
            ParamMode::In => arg.mode.writes_back(),
            ParamMode::Ref | ParamMode::Out => false,
        };
        if keyword_not_allowed {
            let keyword = arg.mode.modifier().unwrap_or_default();
            return CompileError::error(
                "CS1615",
                format!("Argument {position} may not be passed with the '{keyword}' keyword"),
                arg.span,
            );
        }
        if !arg_fits(arg, *mode, ty) {
            return CompileError::error(
                "CS1503",
                format!(
                    "Argument {position}: cannot convert from '{}' to '{}'",
                    param_label(arg.mode, &arg.expr.ty),
                    param_label(*mode, ty)
                ),
                arg.span,
            );
        }
    }
    no_overload()
}

fn host_candidates(host: &HostTypeDef, name: &str, shown: &str) -> Vec<Candidate> {
    host.methods_named(name)
        .filter_map(|(_, method)| {
            let params = method
                .params
                .iter()
                .map(TypeDesc::full_name)
                .collect::<Result<Vec<_>, _>>()
                .ok()?;
            let result = method.result.as_ref().map(TypeDesc::full_name).transpose().ok()?;
            let tys: Vec<(ParamMode, Ty)> = method
                .params
                .iter()
                .map(|p| (ParamMode::Value, Ty::from_desc(p)))
                .collect();
            let labels: Vec<String> = tys.iter().map(|(_, t)| t.display()).collect();
            Some(Candidate {
                label: format!("{shown}.{name}({})", labels.join(", ")),
                params: tys,
                ret: method.result.as_ref().map_or(Ty::Void, Ty::from_desc),
                target: Target::Host(FunctionImport {
                    type_name: host.full_name(),
                    method: name.to_string(),
                    params,
                    result,
                }),
            })
        })
        .collect()
}

fn intrinsic_candidates(receiver: &Ty, name: &str) -> Vec<Candidate> {
    builtins::lookup(receiver.receiver(), name, false)
        .into_iter()
        .map(|member| {
            let params: Vec<(ParamMode, Ty)> = member
                .params
                .iter()
                .map(|slot| (ParamMode::Value, slot_ty(*slot, receiver)))
                .collect();
            let labels: Vec<String> = params.iter().map(|(_, t)| t.display()).collect();
            Candidate {
                label: format!("{}.{name}({})", receiver.display(), labels.join(", ")),
                params,
                ret: slot_ty(member.ret, receiver),
                target: Target::Intrinsic(member.op),
            }
        })
        .collect()
}

type CallTarget = (Vec<Candidate>, Option<TypedExpr>, String);

impl TypeContext<'_> {
    fn compiled_candidates(&self, methods: &[u32]) -> Vec<Candidate> {
        methods
            .iter()
            .map(|&m| {
                let method = &self.methods[m as usize];
                Candidate {
                    params: method.params.iter().map(|p| (p.mode, p.ty.clone())).collect(),
                    ret: method.ret.clone(),
                    target: Target::Compiled(m),
                    label: method.label.clone(),
                }
            })
            .collect()
    }

    fn check_call(&mut self, callee: &Expr, args: &[Argument], span: Span) -> CResult<TypedExpr> {
        let callee = strip_parens(callee);
        let (candidates, receiver, name) = match &callee.kind {
            ExprKind::Name(name) => {
                if self.lookup_local(name).is_some() {
                    return Err(CompileError::error("CS0149", "Method name expected", callee.span));
                }
                let Some((_, methods)) = self.method_scope(name) else {
                    return Err(match self.find_simple(name) {
                        Lookup::Missing => CompileError::error(
                            "CS0103",
                            format!("The name '{name}' does not exist in the current context"),
                            callee.span,
                        ),
                        _ => non_invocable(name, callee.span),
                    });
                };
                (self.compiled_candidates(&methods), None, name.clone())
            }
            ExprKind::Member { object, name } => {
                let qual = self.qualifier(object)?;
                self.member_candidates(qual, name, callee.span)?
            }
            _ => return Err(CompileError::error("CS0149", "Method name expected", callee.span)),
        };
        let args = args
            .iter()
            .map(|a| self.check_argument(a))
            .collect::<CResult<Vec<_>>>()?;
        self.resolve_call(candidates, receiver, &name, args, span)
    }

    fn member_candidates(&self, qual: Qual, name: &str, span: Span) -> CResult<CallTarget> {
        let refs = self.refs;
        match qual {
            Qual::Namespace(ns) => Err(CompileError::error("CS0234", missing_in_namespace(name, &ns), span)),
            Qual::MethodGroup(label) => Err(CompileError::error(
                "CS0119",
                format!("'{label}' is a method, which is not valid in the given context"),
                span,
            )),
            Qual::Type(TypeSym::Compiled(class), shown) => {
                let methods: Vec<u32> = self.classes[class]
                    .methods
                    .iter()
                    .copied()
                    .filter(|&m| self.methods[m as usize].name == name)
                    .collect();
                if methods.is_empty() {
                    return Err(if self.classes[class].nested.contains_key(name) {
                        non_invocable(&format!("{shown}.{name}"), span)
                    } else {
                        no_definition(&shown, name, span)
                    });
                }
                Ok((self.compiled_candidates(&methods), None, name.to_string()))
            }
            Qual::Type(TypeSym::Host { def, .. }, shown) => {
                let host = refs.find_type(&def);
                let candidates = host.map(|h| host_candidates(h, name, &shown)).unwrap_or_default();
                if candidates.is_empty() {
                    return Err(if host.is_some_and(|h| h.has_member(name)) {
                        non_invocable(&format!("{shown}.{name}"), span)
                    } else {
                        no_definition(&shown, name, span)
                    });
                }
                Ok((candidates, None, name.to_string()))
            }
            Qual::Value(object) => {
                if matches!(object.ty, Ty::Null | Ty::Void) {
                    return Err(bad_operand(".", &object.ty, span));
                }
                let candidates = intrinsic_candidates(&object.ty, name);
                if candidates.is_empty() {
                    let is_field = matches!(&object.ty, Ty::Class(def)
                        if refs.find_type(def).is_some_and(|h| h.field(name).is_some()));
                    let is_property = !builtins::lookup(object.ty.receiver(), name, true).is_empty();
                    return Err(if is_field || is_property {
                        non_invocable(&format!("{}.{name}", object.ty.display()), span)
                    } else {
                        no_instance_member(&object.ty, name, span)
                    });
                }
                Ok((candidates, Some(object), name.to_string()))
            }
        }
    }

    fn check_argument(&mut self, arg: &Argument) -> CResult<CheckedArg> {
        if arg.mode == ParamMode::Value {
            return Ok(CheckedArg {
                mode: arg.mode,
                expr: self.check_expr(&arg.expr)?,
                span: arg.span,
            });
        }
        let target = strip_parens(&arg.expr);
        if let ExprKind::Name(name) = &target.kind {
            if let Some(index) = self.lookup_local(name) {
                let local = &self.methods[self.method].locals[index as usize];
                if local.param == Some(ParamMode::In) && arg.mode.writes_back() {
                    return Err(CompileError::error(
                        "CS8329",
                        format!("Cannot use variable '{name}' as a ref or out value because it is a readonly variable"),
                        target.span,
                    ));
                }
                let ty = local.ty.clone();
                let usage = &mut self.usage[index as usize];
                match arg.mode {
                    ParamMode::Out => {
                        usage.written = true;
                        usage.computed = true;
                    }
                    ParamMode::Ref => {
                        usage.read = true;
                        usage.written = true;
                        usage.computed = true;
                    }
                    ParamMode::In | ParamMode::Value => usage.read = true,
                }
                return Ok(CheckedArg {
                    mode: arg.mode,
                    expr: TypedExpr::new(TypedExprKind::Local(index), ty, target.span),
                    span: arg.span,
                });
            }
        }
        let typed = self.check_expr(target)?;
        Err(match (arg.mode, &typed.kind) {
            (ParamMode::In, _) => CompileError::error(
                "CS8156",
                "An expression cannot be used in this context because it may not be passed or returned by reference",
                target.span,
            ),
            (_, TypedExprKind::Field { .. }) => CompileError::error(
                "CS0206",
                "A non ref-returning property or indexer may not be used as an out or ref value",
                target.span,
            ),
            _ => CompileError::error("CS1510", "A ref or out value must be an assignable variable", target.span),
        })
    }

    fn accessible(&self, method: u32) -> bool {
        let decl = self.decls[method as usize];
        let m = decl.modifiers;
        if m.public || m.internal || m.protected {
            return true;
        }
        let owner = self.methods[method as usize].class as usize;
        let mut cursor = Some(self.class);
        while let Some(class) = cursor {
            if class == owner {
                return true;
            }
            cursor = self.classes[class].parent;
        }
        false
    }

    fn resolve_call(
        &mut self,
        mut candidates: Vec<Candidate>,
        receiver: Option<TypedExpr>,
        name: &str,
        args: Vec<CheckedArg>,
        span: Span,
    ) -> CResult<TypedExpr> {
        let fits: Vec<usize> = (0..candidates.len())
            .filter(|&i| applicable(&candidates[i], &args))
            .collect();
        if fits.is_empty() {
            return Err(mismatch(&candidates, &args, name, span));
        }
        let best = fits
            .iter()
            .copied()
            .find(|&i| fits.iter().all(|&j| i == j || better(&candidates[i], &candidates[j], &args)));
        let Some(best) = best else {
            return Err(CompileError::error(
                "CS0121",
                format!(
                    "The call is ambiguous between the following methods or properties: '{}' and '{}'",
                    candidates[fits[0]].label,
                    candidates[fits[1]].label
                ),
                span,
            ));
        };
        let candidate = candidates.swap_remove(best);
        if let Target::Compiled(method) = candidate.target {
            if !self.accessible(method) {
                return Err(CompileError::error(
                    "CS0122",
                    format!("'{}' is inaccessible due to its protection level", candidate.label),
                    span,
                ));
            }
        }

        let mut typed_args = Vec::with_capacity(args.len());
        for (arg, (mode, ty)) in args.into_iter().zip(&candidate.params) {
            let expr = if mode.writes_back() {
                arg.expr
            } else {
                self.coerce(arg.expr, ty)?
            };
            typed_args.push(TypedArg { mode: *mode, expr });
        }
        let kind = match candidate.target {
            Target::Compiled(method) => TypedExprKind::Call {
                method,
                args: typed_args,
            },
            Target::Host(import) => TypedExprKind::HostCall {
                import,
                args: typed_args.into_iter().map(|a| a.expr).collect(),
            },
            Target::Intrinsic(op) => TypedExprKind::Intrinsic {
                op,
                receiver: Box::new(receiver.unwrap_or_else(|| Self::error_expr(span))),
                args: typed_args.into_iter().map(|a| a.expr).collect(),
            },
        };
        Ok(TypedExpr::new(kind, candidate.ret, span))
    }

    // ── Object creation ────────────────────────────────────────────

    fn check_new(&mut self, ty: &TypeSyntax, args: &[Argument], span: Span) -> CResult<TypedExpr> {
        let sym = self.resolve_sym(ty)?;
        match &sym {
            TypeSym::Host { def, .. }
                if self.refs.find_type(def).is_some_and(|h| h.kind() == HostTypeKind::Static) =>
            {
                return Err(static_type_error(def, TypeUse::Other, ty.span));
            }
            TypeSym::Compiled(class) if self.classes[*class].decl.modifiers.is_static => {
                return Err(static_type_error(&self.classes[*class].display(), TypeUse::Other, ty.span));
            }
            _ => {}
        }
        let target = self.sym_ty(&sym, TypeUse::Other, ty.span)?;
        let no_constructor = || {
            CompileError::error(
                "CS1729",
                format!(
                    "'{}' does not contain a constructor that takes {} arguments",
                    target.display(),
                    args.len()
                ),
                span,
            )
        };
        if !args.is_empty() {
            return Err(no_constructor());
        }
        let kind = match &target {
            Ty::List(element) => TypedExprKind::NewList {
                element: element.full_name(),
            },
            Ty::Class(def) => TypedExprKind::NewObject {
                type_name: def.clone(),
            },
            Ty::Bool | Ty::Int | Ty::Long | Ty::Double => TypedExprKind::Const(target.default_constant()),
            Ty::String => return Err(no_constructor()),
            _ => return Err(CompileError::unsupported(&format!("new {}()", target.display()), span)),
        };
        Ok(TypedExpr::new(kind, target, span))
    }

    // ── Assignment ─────────────────────────────────────────────────

    fn check_place(&mut self, target: &Expr, compound: bool, incdec: bool) -> CResult<(Place, Ty)> {
        let target = strip_parens(target);
        if let ExprKind::Name(name) = &target.kind {
            if let Some(index) = self.lookup_local(name) {
                let local = &self.methods[self.method].locals[index as usize];
                if local.param == Some(ParamMode::In) {
                    return Err(CompileError::error(
                        "CS8331",
                        format!("Cannot assign to variable '{name}' or use it as the right hand side of a ref assignment because it is a readonly variable"),
                        target.span,
                    ));
                }
                let ty = local.ty.clone();
                if compound {
                    let usage = &mut self.usage[index as usize];
                    usage.read = true;
                    usage.written = true;
                    usage.computed = true;
                }
                return Ok((Place::Local(index), ty));
            }
        }
        let typed = self.check_expr(target)?;
        match typed.kind {
            TypedExprKind::Field { object, name } => Ok((Place::Field { object, name }, typed.ty)),
            TypedExprKind::Intrinsic { op, receiver, .. } => Err(CompileError::error(
                "CS0200",
                format!(
                    "Property or indexer '{}.{}' cannot be assigned to -- it is read only",
                    receiver.ty.display(),
                    op.name()
                ),
                target.span,
            )),
            _ if incdec => Err(CompileError::error(
                "CS1059",
                "The operand of an increment or decrement operator must be a variable, property or indexer",
                target.span,
            )),
            _ => Err(CompileError::error(
                "CS0131",
                "The left-hand side of an assignment must be a variable, property or indexer",
                target.span,
            )),
        }
    }

    fn check_assign(&mut self, op: Option<BinOp>, target: &Expr, value: &Expr, span: Span) -> CResult<TypedExpr> {
        let (place, ty) = self.check_place(target, op.is_some(), false)?;
        let value = self.check_expr(value)?;
        let Some(op) = op else {
            let value = self.coerce(value, &ty)?;
            if let Place::Local(index) = &place {
                self.note_write(*index, &value);
            }
            return Ok(TypedExpr::new(
                TypedExprKind::Assign {
                    place,
                    value: Box::new(value),
                },
                ty,
                span,
            ));
        };

        if ty == Ty::Error || value.ty == Ty::Error {
            return Ok(Self::error_expr(span));
        }
        let Some((arith, operand, result)) = binary_typing(op, &ty, &value.ty) else {
            return Err(CompileError::error(
                "CS0019",
                format!(
                    "Operator '{}=' cannot be applied to operands of type '{}' and '{}'",
                    op.symbol(),
                    ty.display(),
                    value.ty.display()
                ),
                span,
            ));
        };
        if !matches!(implicit(&result, &ty), Some(Coercion::Identity | Coercion::Reference)) {
            let (from, to) = (result.display(), ty.display());
            return Err(if explicit(&result, &ty).is_some() {
                CompileError::error(
                    "CS0266",
                    format!("Cannot implicitly convert type '{from}' to '{to}'. An explicit conversion exists (are you missing a cast?)"),
                    span,
                )
            } else {
                CompileError::error("CS0029", format!("Cannot implicitly convert type '{from}' to '{to}'"), span)
            });
        }
        let value = match &operand {
            Some(operand) => self.coerce(value, operand)?,
            None => value,
        };
        Ok(TypedExpr::new(
            TypedExprKind::CompoundAssign {
                place,
                op: arith,
                value: Box::new(value),
            },
            ty,
            span,
        ))
    }

    fn check_incdec(&mut self, increment: bool, prefix: bool, target: &Expr, span: Span) -> CResult<TypedExpr> {
        let (place, ty) = self.check_place(target, true, true)?;
        if !ty.is_numeric() && ty != Ty::Error {
            return Err(bad_operand(if increment { "++" } else { "--" }, &ty, span));
        }
        Ok(TypedExpr::new(
            TypedExprKind::IncDec {
                place,
                increment,
                prefix,
            },
            ty,
            span,
        ))
    }

    // ── Operators ──────────────────────────────────────────────────

    fn check_binary(&mut self, op: BinOp, left: &Expr, right: &Expr, span: Span) -> CResult<TypedExpr> {
        let left = self.check_expr(left)?;
        let right = self.check_expr(right)?;
        if left.ty == Ty::Error || right.ty == Ty::Error {
            return Ok(Self::error_expr(span));
        }
        let invalid = || {
            CompileError::error(
                "CS0019",
                format!(
                    "Operator '{}' cannot be applied to operands of type '{}' and '{}'",
                    op.symbol(),
                    left.ty.display(),
                    right.ty.display()
                ),
                span,
            )
        };

        if matches!(op, BinOp::And | BinOp::Or) {
            if left.ty != Ty::Bool || right.ty != Ty::Bool {
                return Err(invalid());
            }
            let and = op == BinOp::And;
            if let (Some(Constant::Bool(a)), Some(Constant::Bool(b))) = (left.as_constant(), right.as_constant()) {
                let folded = if and { *a && *b } else { *a || *b };
                return Ok(TypedExpr::constant(Constant::Bool(folded), span));
            }
            return Ok(TypedExpr::new(
                TypedExprKind::Logical {
                    and,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Ty::Bool,
                span,
            ));
        }

        let Some((arith, operand, result)) = binary_typing(op, &left.ty, &right.ty) else {
            return Err(invalid());
        };
        let (left, right) = match &operand {
            Some(operand) => (self.coerce(left, operand)?, self.coerce(right, operand)?),
            None => (left, right),
        };
        if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
            if let Some(folded) = fold(arith, a, b).map_err(|code| fold_error(code, span))? {
                return Ok(TypedExpr::new(TypedExprKind::Const(folded), result, span));
            }
        }
        Ok(TypedExpr::new(
            TypedExprKind::Binary {
                op: arith,
                left: Box::new(left),
                right: Box::new(right),
            },
            result,
            span,
        ))
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> CResult<TypedExpr> {
        // `-2147483648` is an int even though the literal alone is not.
        if op == UnaryOp::Neg && matches!(strip_parens(operand).kind, ExprKind::Long(2_147_483_648)) {
            return Ok(TypedExpr::constant(Constant::Int(i32::MIN), span));
        }
        let value = self.check_expr(operand)?;
        if value.ty == Ty::Error {
            return Ok(value);
        }
        match op {
            UnaryOp::Not => {
                if value.ty != Ty::Bool {
                    return Err(bad_operand("!", &value.ty, span));
                }
                if let Some(Constant::Bool(b)) = value.as_constant() {
                    return Ok(TypedExpr::constant(Constant::Bool(!b), span));
                }
                Ok(TypedExpr::new(TypedExprKind::Not(Box::new(value)), Ty::Bool, span))
            }
            UnaryOp::Plus if value.ty.is_numeric() => Ok(value),
            UnaryOp::Neg if value.ty.is_numeric() => {
                let folded = match value.as_constant() {
                    Some(Constant::Int(i)) => Some(Constant::Int(
                        i.checked_neg().ok_or_else(|| fold_error(OVERFLOW, span))?,
                    )),
                    Some(Constant::Long(l)) => Some(Constant::Long(
                        l.checked_neg().ok_or_else(|| fold_error(OVERFLOW, span))?,
                    )),
                    Some(Constant::Double(d)) => Some(Constant::Double(-d)),
                    _ => None,
                };
                if let Some(folded) = folded {
                    return Ok(TypedExpr::constant(folded, span));
                }
                let ty = value.ty.clone();
                Ok(TypedExpr::new(TypedExprKind::Neg(Box::new(value)), ty, span))
            }
            UnaryOp::Plus | UnaryOp::Neg => Err(bad_operand(op.symbol(), &value.ty, span)),
        }
    }

    fn check_conditional(&mut self, cond: &Expr, then_expr: &Expr, else_expr: &Expr, span: Span) -> CResult<TypedExpr> {
        let cond = self.check_condition(cond)?;
        let then_expr = self.check_expr(then_expr)?;
        let else_expr = self.check_expr(else_expr)?;
        if then_expr.ty == Ty::Error || else_expr.ty == Ty::Error {
            return Ok(Self::error_expr(span));
        }
        let (a, b) = (&then_expr.ty, &else_expr.ty);
        let ty = if a == b {
            Some(a.clone())
        } else {
            match (implicit(a, b).is_some(), implicit(b, a).is_some()) {
                (true, false) => Some(b.clone()),
                (false, true) => Some(a.clone()),
                _ => None,
            }
        };
        let ty = match ty {
            Some(ty) if !matches!(ty, Ty::Null | Ty::Void) => ty,
            _ => {
                return Err(CompileError::error(
                    "CS0173",
                    format!(
                        "Type of conditional expression cannot be determined because there is no implicit conversion between '{}' and '{}'",
                        a.display(),
                        b.display()
                    ),
                    span,
                ));
            }
        };
        let then_expr = self.coerce(then_expr, &ty)?;
        let else_expr = self.coerce(else_expr, &ty)?;
        Ok(TypedExpr::new(
            TypedExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            ty,
            span,
        ))
    }

    fn check_cast(&mut self, ty: &TypeSyntax, inner: &Expr, span: Span) -> CResult<TypedExpr> {
        let target = self.resolve_type(ty, TypeUse::Cast)?;
        let value = self.check_expr(inner)?;
        match explicit(&value.ty, &target) {
            Some(coercion) => {
                let mut converted = apply_coercion(value, coercion, &target);
                converted.ty = target;
                converted.span = span;
                Ok(converted)
            }
            None => Err(CompileError::error(
                "CS0030",
                format!("Cannot convert type '{}' to '{}'", value.ty.display(), target.display()),
                span,
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corelib;
    use crate::reference::Reference;
    use crate::toolchain::lexer::lex;
    use crate::toolchain::parser::parse;

    fn refs() -> ReferenceSet {
        let mut set: ReferenceSet = corelib::LIBRARY_NAMES.iter().filter_map(|n| corelib::library(n)).collect();
        set.insert(
            Reference::builder("Shop")
                .class("Shop", "Item", |t| {
                    t.field("Price", TypeDesc::int32()).field("Name", TypeDesc::string())
                })
                .build(),
        );
        set
    }

    fn check(src: &str) -> Checked {
        type_check(&parse(lex(src).unwrap()).unwrap(), &refs())
    }

    fn codes(src: &str) -> Vec<&'static str> {
        check(src).diagnostics.iter().map(|d| d.code).collect()
    }

    fn error_codes(src: &str) -> Vec<&'static str> {
        check(src).diagnostics.iter().filter(|d| d.is_error()).map(|d| d.code).collect()
    }

    /// `stmts` inside `static class C { static <ret> M() { ... } }`.
    fn body_codes(ret: &str, stmts: &str) -> Vec<&'static str> {
        codes(&format!("using System;\nstatic class C {{ static {ret} M() {{ {stmts} }} }}"))
    }

    #[test]
    fn generated_shape_checks_clean() {
        let checked = check(
            "using System;\nnamespace Gen\n{\n    public static class Executer\n    {\n        public static int Execute(ref int it, string s)\n        {\n            it = it + s.Length;\n            return it;\n        }\n    }\n}",
        );
        assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
        assert_eq!(checked.program.classes[0].full_name, "Gen.Executer");
        let method = &checked.program.methods[0];
        assert_eq!(method.label, "Gen.Executer.Execute(ref int, string)");
        assert_eq!(method.params[0].mode, ParamMode::Ref);
        assert_eq!(method.ret, Ty::Int);
    }

    #[test]
    fn constants_fold_and_unused_locals_warn() {
        let checked = check("static class C { static void M() { var x = 1 + 2; } }");
        assert_eq!(checked.diagnostics.len(), 1);
        assert_eq!(checked.diagnostics[0].code, "CS0219");
        assert!(checked.diagnostics[0].warning);

        let TypedStmtKind::Block(stmts) = &checked.program.methods[0].body[0].kind else {
            panic!("expected declaration block");
        };
        let TypedStmtKind::Expr(assign) = &stmts[0].kind else { panic!("expected assignment") };
        let TypedExprKind::Assign { value, .. } = &assign.kind else { panic!("expected assignment") };
        assert_eq!(value.as_constant(), Some(&Constant::Int(3)));

        assert_eq!(body_codes("void", "int y;"), ["CS0168"]);
    }

    #[test]
    fn implicit_conversions() {
        assert_eq!(body_codes("void", "long a = 1; double b = a; Console.WriteLine(b);"), Vec::<&str>::new());
        assert_eq!(body_codes("int", "long a = 1; return a;"), ["CS0266"]);
        assert_eq!(body_codes("int", "return \"x\";"), ["CS0029"]);
        assert_eq!(body_codes("int", "return (int)2.5;"), Vec::<&str>::new());
        assert_eq!(body_codes("int", "return (int)\"x\";"), ["CS0030"]);
        assert_eq!(body_codes("void", "Console.WriteLine(y);"), ["CS0103"]);
    }

    #[test]
    fn overloads_pick_the_best_host_method() {
        let checked = check("using System;\nstatic class C { static long M() { return Math.Max(1, 2L); } }");
        assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
        let TypedStmtKind::Return(Some(value)) = &checked.program.methods[0].body[0].kind else {
            panic!("expected return");
        };
        let TypedExprKind::HostCall { import, .. } = &value.kind else { panic!("expected host call") };
        assert_eq!(import.type_name, "System.Math");
        assert_eq!(import.params, ["System.Int64", "System.Int64"]);

        let checked = check("using System;\nstatic class C { static void M() { Console.WriteLine(null); } }");
        let TypedStmtKind::Expr(call) = &checked.program.methods[0].body[0].kind else {
            panic!("expected call");
        };
        let TypedExprKind::HostCall { import, .. } = &call.kind else { panic!("expected host call") };
        assert_eq!(import.params, ["System.String"]);

        assert_eq!(body_codes("void", "Math.Max(1);"), ["CS1501"]);
        assert_eq!(body_codes("void", "Console.Beep();"), ["CS0117"]);
    }

    #[test]
    fn by_ref_arguments() {
        let src = |call: &str| {
            format!("static class C {{ static void F(ref int a) {{ }} static void G(out int a) {{ a = 1; }} static void M() {{ int x = 0; {call} }} }}")
        };
        assert_eq!(error_codes(&src("F(ref x);")), Vec::<&str>::new());
        assert_eq!(error_codes(&src("G(out x);")), Vec::<&str>::new());
        assert_eq!(error_codes(&src("F(x);")), ["CS1620"]);
        assert_eq!(error_codes(&src("F(out x);")), ["CS1620"]);
        assert_eq!(error_codes(&src("F(ref 5);")), ["CS1510"]);
    }

    #[test]
    fn static_types_and_usings() {
        assert!(body_codes("void", "Math m;").contains(&"CS0723"));
        assert!(body_codes("void", "var m = new Math();").contains(&"CS0712"));
        assert_eq!(codes("using Foo;\nstatic class C { }"), ["CS0246"]);
        assert_eq!(codes("using System.Math;\nstatic class C { }"), ["CS0138"]);
        assert_eq!(codes("using System;\nusing System;\nstatic class C { }"), ["CS0105"]);
    }

    #[test]
    fn list_members() {
        let src = "using System.Collections.Generic;\nstatic class C { static int M() { var xs = new List<string>(); xs.Add(\"a\"); return xs.Count; } }";
        assert!(check(src).diagnostics.is_empty());

        let src = "using System.Collections.Generic;\nstatic class C { static void M() { var xs = new List<string>(); xs.Add(1); } }";
        assert_eq!(error_codes(src), ["CS1503"]);

        let src = "using System.Collections.Generic;\nstatic class C { static void M() { var xs = new List<string>(); xs.Count = 2; } }";
        assert_eq!(error_codes(src), ["CS0200"]);
    }

    #[test]
    fn constant_arithmetic_errors() {
        assert!(body_codes("void", "int x = 1 / 0;").contains(&"CS0020"));
        assert!(body_codes("void", "int x = int.MaxValue + 1;").contains(&"CS0220"));
        assert_eq!(body_codes("int", "return -2147483648;"), Vec::<&str>::new());
    }

    #[test]
    fn statement_errors() {
        assert_eq!(body_codes("void", "break;"), ["CS0139"]);
        assert!(body_codes("void", "var x = null;").contains(&"CS0815"));
        assert!(body_codes("void", "int a = 1; int a = 2;").contains(&"CS0128"));
        assert!(body_codes("void", "int a = 1; { int a = 2; }").contains(&"CS0136"));
        assert_eq!(body_codes("void", "return 1;"), ["CS0127"]);
        assert_eq!(body_codes("int", "return;"), ["CS0126"]);
        assert_eq!(body_codes("void", "1 + 2;"), ["CS0201"]);
        assert_eq!(body_codes("void", "int x = 1; x.Foo();"), ["CS1061"]);
    }

    #[test]
    fn nested_classes_get_plus_names() {
        let checked = check(
            "static class Outer { static class Inner { public static int F() { return 1; } } static int M() { return Inner.F(); } }",
        );
        assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
        let names: Vec<&str> = checked.program.classes.iter().map(|c| c.full_name.as_str()).collect();
        assert_eq!(names, ["Outer", "Outer+Inner"]);
    }

    #[test]
    fn ambiguous_and_inaccessible_names() {
        let src = "namespace A { public static class Thing { public static void X() { } } }\n\
                   namespace B { public static class Thing { public static void X() { } } }\n\
                   namespace C { using A; using B; static class U { static void M() { Thing.X(); } } }";
        assert_eq!(error_codes(src), ["CS0104"]);

        let src = "static class A { static void Hidden() { } }\nstatic class B { static void M() { A.Hidden(); } }";
        assert_eq!(error_codes(src), ["CS0122"]);
    }

    #[test]
    fn host_data_classes() {
        let src = "using Shop;\nstatic class C { static int M() { var item = new Item(); item.Price = 3; item.Name = \"x\"; return item.Price; } }";
        let checked = check(src);
        assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);

        let src = "using Shop;\nstatic class C { static void M() { var item = new Item(); item.Price = \"x\"; } }";
        assert_eq!(error_codes(src), ["CS0029"]);
    }

    #[test]
    fn duplicate_methods() {
        assert_eq!(
            error_codes("static class C { static void F(int a) { } static void F(int b) { } }"),
            ["CS0111"]
        );
        assert_eq!(
            error_codes("static class C { static void F(ref int a) { } static void F(out int b) { b = 0; } }"),
            ["CS0663"]
        );
        assert_eq!(error_codes("class C { void F() { } }"), ["DC0001"]);
    }
}
