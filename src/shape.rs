//! Callable shapes: parameter modes, type descriptors and the Rust-side
//! mapping of host types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::reference::Reference;
use crate::value::{self, ListRef, Value};

// ── Type descriptors ────────────────────────────────────────────

/// Description of a host type, detailed enough to render its fully
/// qualified name and to find the library that defines it.
#[derive(Clone)]
pub struct TypeDesc {
    /// `None` for open generic parameters, which have no addressable name.
    namespace: Option<String>,
    enclosing: Vec<String>,
    name: String,
    args: Vec<TypeDesc>,
    origin: Option<Arc<Reference>>,
}

impl TypeDesc {
    /// A type in `namespace` (empty for the global namespace).
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            enclosing: Vec::new(),
            name: name.to_string(),
            args: Vec::new(),
            origin: None,
        }
    }

    /// A type nested inside `enclosing` (outermost first).
    pub fn nested(namespace: &str, enclosing: &[&str], name: &str) -> Self {
        let mut desc = Self::new(namespace, name);
        desc.enclosing = enclosing.iter().map(|s| (*s).to_string()).collect();
        desc
    }

    /// An open generic parameter such as `T`.
    pub fn generic_parameter(name: &str) -> Self {
        Self {
            namespace: None,
            enclosing: Vec::new(),
            name: name.to_string(),
            args: Vec::new(),
            origin: None,
        }
    }

    pub fn with_args(mut self, args: Vec<TypeDesc>) -> Self {
        self.args = args;
        self
    }

    pub fn with_origin(mut self, origin: Arc<Reference>) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn object() -> Self {
        Self::new("System", "Object")
    }

    pub fn boolean() -> Self {
        Self::new("System", "Boolean")
    }

    pub fn int32() -> Self {
        Self::new("System", "Int32")
    }

    pub fn int64() -> Self {
        Self::new("System", "Int64")
    }

    pub fn double() -> Self {
        Self::new("System", "Double")
    }

    pub fn string() -> Self {
        Self::new("System", "String")
    }

    pub fn list(element: TypeDesc) -> Self {
        Self::new("System.Collections.Generic", "List").with_args(vec![element])
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[TypeDesc] {
        &self.args
    }

    pub fn origin(&self) -> Option<&Arc<Reference>> {
        self.origin.as_ref()
    }

    /// `Namespace.Outer.Name` without generic arguments.
    pub fn definition_name(&self) -> Result<String, Error> {
        let namespace = self.namespace.as_deref().ok_or_else(|| {
            Error::invalid_input(format!(
                "The type '{}' has no fully qualified name.",
                self.name
            ))
        })?;
        let mut full = String::new();
        if !namespace.is_empty() {
            full.push_str(namespace);
            full.push('.');
        }
        for outer in &self.enclosing {
            full.push_str(outer);
            full.push('.');
        }
        full.push_str(&self.name);
        Ok(full)
    }

    /// `Namespace.Outer.Name<Arg1, Arg2>` with every component fully qualified.
    pub fn full_name(&self) -> Result<String, Error> {
        let mut full = self.definition_name()?;
        if !self.args.is_empty() {
            let args = self
                .args
                .iter()
                .map(TypeDesc::full_name)
                .collect::<Result<Vec<_>, _>>()?;
            full.push('<');
            full.push_str(&args.join(", "));
            full.push('>');
        }
        Ok(full)
    }

    /// Every library this type (including its generic arguments) comes from.
    pub fn origins(&self) -> Vec<Arc<Reference>> {
        let mut out = Vec::new();
        self.collect_origins(&mut out);
        out
    }

    fn collect_origins(&self, out: &mut Vec<Arc<Reference>>) {
        if let Some(origin) = &self.origin {
            out.push(Arc::clone(origin));
        }
        for arg in &self.args {
            arg.collect_origins(out);
        }
    }

    /// Value a slot of this type holds before anything is assigned to it.
    pub fn default_value(&self) -> Value {
        match self.definition_name().as_deref() {
            Ok(value::BOOLEAN) => Value::Bool(false),
            Ok(value::INT32) => Value::Int(0),
            Ok(value::INT64) => Value::Long(0),
            Ok(value::DOUBLE) => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    pub fn is_value_type(&self) -> bool {
        matches!(
            self.definition_name().as_deref(),
            Ok(value::BOOLEAN | value::INT32 | value::INT64 | value::DOUBLE)
        )
    }

    /// Whether `value` can be stored in a slot of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        let Ok(full) = self.full_name() else {
            return false;
        };
        if full == value::OBJECT {
            return true;
        }
        match value {
            Value::Null => !self.is_value_type(),
            other => other.type_name().is_some_and(|name| name == full),
        }
    }
}

/// Identity is the rendered name; the origin does not take part.
impl PartialEq for TypeDesc {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.enclosing == other.enclosing
            && self.name == other.name
            && self.args == other.args
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.full_name() {
            Ok(full) => write!(f, "TypeDesc({full})"),
            Err(_) => write!(f, "TypeDesc(<open {}>)", self.name),
        }
    }
}

// ── Callable shapes ─────────────────────────────────────────────

/// How an argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamMode {
    Value,
    In,
    Ref,
    Out,
}

impl ParamMode {
    /// Source keyword, `None` for by-value parameters.
    pub fn modifier(self) -> Option<&'static str> {
        match self {
            ParamMode::Value => None,
            ParamMode::In => Some("in"),
            ParamMode::Ref => Some("ref"),
            ParamMode::Out => Some("out"),
        }
    }

    /// True when the callee's final value flows back to the caller.
    pub fn writes_back(self) -> bool {
        matches!(self, ParamMode::Ref | ParamMode::Out)
    }
}

impl fmt::Display for ParamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.modifier().unwrap_or("value"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub mode: ParamMode,
    pub ty: TypeDesc,
}

/// Ordered parameters plus an optional result type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallableShape {
    params: Vec<ParamSpec>,
    result: Option<TypeDesc>,
}

impl CallableShape {
    pub fn new() -> Self {
        Self::default()
    }

    /// By-value parameters for every element of `A`, no result.
    pub fn from_args<A: ArgList>() -> Self {
        let mut shape = Self::new();
        for ty in A::type_descs() {
            shape = shape.with_param(ParamMode::Value, ty);
        }
        shape
    }

    pub fn with_param(mut self, mode: ParamMode, ty: TypeDesc) -> Self {
        self.params.push(ParamSpec { mode, ty });
        self
    }

    pub fn returning(mut self, ty: TypeDesc) -> Self {
        self.result = Some(ty);
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn result(&self) -> Option<&TypeDesc> {
        self.result.as_ref()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Libraries defining any parameter or result type.
    pub fn origins(&self) -> Vec<Arc<Reference>> {
        self.params
            .iter()
            .map(|p| &p.ty)
            .chain(self.result.iter())
            .flat_map(TypeDesc::origins)
            .collect()
    }
}

// ── Host type mapping ───────────────────────────────────────────

/// A Rust type that can cross into compiled code.
pub trait HostType: Sized {
    fn type_desc() -> TypeDesc;
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Result<Self, Error>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T, Error> {
    Err(Error::argument_mismatch(format!(
        "Expected a value of type {expected} but got {}.",
        value.type_name().as_deref().unwrap_or("null")
    )))
}

impl HostType for i32 {
    fn type_desc() -> TypeDesc {
        TypeDesc::int32()
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Int(i) => Ok(i),
            other => mismatch(value::INT32, &other),
        }
    }
}

impl HostType for i64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::int64()
    }

    fn into_value(self) -> Value {
        Value::Long(self)
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Long(l) => Ok(l),
            other => mismatch(value::INT64, &other),
        }
    }
}

impl HostType for f64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::double()
    }

    fn into_value(self) -> Value {
        Value::Double(self)
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Double(d) => Ok(d),
            other => mismatch(value::DOUBLE, &other),
        }
    }
}

impl HostType for bool {
    fn type_desc() -> TypeDesc {
        TypeDesc::boolean()
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => mismatch(value::BOOLEAN, &other),
        }
    }
}

impl HostType for String {
    fn type_desc() -> TypeDesc {
        TypeDesc::string()
    }

    fn into_value(self) -> Value {
        Value::string(self)
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => mismatch(value::STRING, &other),
        }
    }
}

/// `System.Object`: any value, including null.
impl HostType for Value {
    fn type_desc() -> TypeDesc {
        TypeDesc::object()
    }

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

/// `List<T>`: converted by copying the elements in either direction.
impl<T: HostType> HostType for Vec<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::list(T::type_desc())
    }

    fn into_value(self) -> Value {
        let element = T::type_desc();
        let element = element
            .full_name()
            .unwrap_or_else(|_| element.name().to_string());
        let items = self.into_iter().map(HostType::into_value).collect();
        Value::List(ListRef::from_vec(element, items))
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::List(list) => list.snapshot().into_iter().map(T::from_value).collect(),
            other => mismatch(value::LIST, &other),
        }
    }
}

/// Parameter lists of up to eight by-value arguments.
pub trait ArgList: Sized {
    fn type_descs() -> Vec<TypeDesc>;
    fn into_values(self) -> Vec<Value>;
}

macro_rules! impl_arg_list {
    ($($name:ident),*) => {
        impl<$($name: HostType),*> ArgList for ($($name,)*) {
            fn type_descs() -> Vec<TypeDesc> {
                vec![$($name::type_desc()),*]
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<Value> {
                let ($($name,)*) = self;
                vec![$($name.into_value()),*]
            }
        }
    };
}

impl_arg_list!();
impl_arg_list!(A1);
impl_arg_list!(A1, A2);
impl_arg_list!(A1, A2, A3);
impl_arg_list!(A1, A2, A3, A4);
impl_arg_list!(A1, A2, A3, A4, A5);
impl_arg_list!(A1, A2, A3, A4, A5, A6);
impl_arg_list!(A1, A2, A3, A4, A5, A6, A7);
impl_arg_list!(A1, A2, A3, A4, A5, A6, A7, A8);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generic_and_nested_names_render_fully_qualified() {
        let list = TypeDesc::list(TypeDesc::string());
        assert_eq!(
            list.full_name().unwrap(),
            "System.Collections.Generic.List<System.String>"
        );
        let nested = TypeDesc::nested("Shop.Model", &["Order"], "Line");
        assert_eq!(nested.full_name().unwrap(), "Shop.Model.Order.Line");
        let global = TypeDesc::new("", "Widget");
        assert_eq!(global.full_name().unwrap(), "Widget");
    }

    #[test]
    fn open_generic_parameter_has_no_full_name() {
        let err = TypeDesc::list(TypeDesc::generic_parameter("T"))
            .full_name()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn accepts_follows_runtime_types() {
        assert!(TypeDesc::int32().accepts(&Value::Int(1)));
        assert!(!TypeDesc::int32().accepts(&Value::Long(1)));
        assert!(!TypeDesc::int32().accepts(&Value::Null));
        assert!(TypeDesc::string().accepts(&Value::Null));
        assert!(TypeDesc::object().accepts(&Value::Double(1.0)));
        let list = vec!["a".to_string()].into_value();
        assert!(TypeDesc::list(TypeDesc::string()).accepts(&list));
        assert!(!TypeDesc::list(TypeDesc::int32()).accepts(&list));
    }

    #[test]
    fn arg_lists_cover_zero_to_eight() {
        assert!(<() as ArgList>::type_descs().is_empty());
        assert_eq!(<(i32, String) as ArgList>::type_descs().len(), 2);
        let values = (1, 2, 3, 4, 5, 6, 7, 8).into_values();
        assert_eq!(values.len(), 8);
        assert_eq!(values[7], Value::Int(8));
    }

    #[test]
    fn from_args_builds_by_value_params() {
        let shape = CallableShape::from_args::<(i32, bool)>();
        assert_eq!(shape.arity(), 2);
        assert!(shape.params().iter().all(|p| p.mode == ParamMode::Value));
        assert!(shape.result().is_none());
    }

    #[test]
    fn host_type_round_trip_through_list() {
        let v = vec![1_i64, 2, 3].into_value();
        assert_eq!(Vec::<i64>::from_value(v).unwrap(), vec![1, 2, 3]);
        assert!(i32::from_value(Value::string("x")).is_err());
    }
}
