//! Host libraries that compiled code can reference.
//!
//! A [`Reference`] is a named library of host types. Static classes expose
//! functions and constants, data classes expose typed fields, and the generic
//! list is provided by the core collections library.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, RuntimeError};
use crate::shape::TypeDesc;
use crate::value::Value;

pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Clone)]
pub struct HostMethod {
    pub name: String,
    pub params: Vec<TypeDesc>,
    pub result: Option<TypeDesc>,
    pub func: HostFn,
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct HostConstant {
    pub name: String,
    pub ty: TypeDesc,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct HostField {
    pub name: String,
    pub ty: TypeDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTypeKind {
    /// Built-in value or string type; may carry constants.
    Primitive,
    /// Static class: functions and constants only.
    Static,
    /// Data class with a parameterless constructor and public fields.
    Class,
    /// The generic `List<T>`.
    List,
}

#[derive(Debug, Clone)]
pub struct HostTypeDef {
    namespace: String,
    enclosing: Vec<String>,
    name: String,
    kind: HostTypeKind,
    methods: Vec<HostMethod>,
    constants: Vec<HostConstant>,
    fields: Vec<HostField>,
}

impl HostTypeDef {
    fn new(namespace: &str, enclosing: &[&str], name: &str, kind: HostTypeKind) -> Self {
        Self {
            namespace: namespace.to_string(),
            enclosing: enclosing.iter().map(|s| (*s).to_string()).collect(),
            name: name.to_string(),
            kind,
            methods: Vec::new(),
            constants: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> HostTypeKind {
        self.kind
    }

    /// `Namespace.Outer.Name`, without generic arguments.
    pub fn full_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.namespace.is_empty() {
            parts.push(&self.namespace);
        }
        parts.extend(self.enclosing.iter().map(String::as_str));
        parts.push(&self.name);
        parts.join(".")
    }

    pub fn desc(&self) -> TypeDesc {
        let enclosing: Vec<&str> = self.enclosing.iter().map(String::as_str).collect();
        TypeDesc::nested(&self.namespace, &enclosing, &self.name)
    }

    pub fn methods(&self) -> &[HostMethod] {
        &self.methods
    }

    /// Overloads of `name`, with their index in [`Self::methods`].
    pub fn methods_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (usize, &'a HostMethod)> + 'a {
        self.methods
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<&HostConstant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn fields(&self) -> &[HostField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&HostField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether any member (method, constant or field) is called `name`.
    pub fn has_member(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
            || self.constant(name).is_some()
            || self.field(name).is_some()
    }
}

// ── Libraries ───────────────────────────────────────────────────

/// A named host library.
pub struct Reference {
    name: String,
    types: IndexMap<String, HostTypeDef>,
}

impl Reference {
    pub fn builder(name: &str) -> ReferenceBuilder {
        ReferenceBuilder {
            name: name.to_string(),
            types: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> impl Iterator<Item = &HostTypeDef> {
        self.types.values()
    }

    pub fn find(&self, full_name: &str) -> Option<&HostTypeDef> {
        self.types.get(full_name)
    }

    /// Descriptor for one of this library's types. The descriptor remembers
    /// the library, so compiling against it references the library as well.
    pub fn type_desc(self: &Arc<Self>, full_name: &str) -> Result<TypeDesc, Error> {
        let def = self.find(full_name).ok_or_else(|| {
            Error::invalid_input(format!(
                "The library {} does not define the type {full_name}.",
                self.name
            ))
        })?;
        Ok(def.desc().with_origin(Arc::clone(self)))
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("name", &self.name)
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct ReferenceBuilder {
    name: String,
    types: IndexMap<String, HostTypeDef>,
}

impl ReferenceBuilder {
    pub fn primitive(
        self,
        namespace: &str,
        name: &str,
        members: impl FnOnce(TypeBuilder) -> TypeBuilder,
    ) -> Self {
        self.add(HostTypeDef::new(namespace, &[], name, HostTypeKind::Primitive), members)
    }

    pub fn static_class(
        self,
        namespace: &str,
        name: &str,
        members: impl FnOnce(TypeBuilder) -> TypeBuilder,
    ) -> Self {
        self.add(HostTypeDef::new(namespace, &[], name, HostTypeKind::Static), members)
    }

    pub fn class(
        self,
        namespace: &str,
        name: &str,
        members: impl FnOnce(TypeBuilder) -> TypeBuilder,
    ) -> Self {
        self.add(HostTypeDef::new(namespace, &[], name, HostTypeKind::Class), members)
    }

    /// A data class declared inside another type.
    pub fn nested_class(
        self,
        namespace: &str,
        enclosing: &[&str],
        name: &str,
        members: impl FnOnce(TypeBuilder) -> TypeBuilder,
    ) -> Self {
        self.add(HostTypeDef::new(namespace, enclosing, name, HostTypeKind::Class), members)
    }

    /// `System.Collections.Generic.List<T>`.
    pub fn generic_list(self) -> Self {
        self.add(
            HostTypeDef::new("System.Collections.Generic", &[], "List", HostTypeKind::List),
            |t| t,
        )
    }

    fn add(mut self, def: HostTypeDef, members: impl FnOnce(TypeBuilder) -> TypeBuilder) -> Self {
        let def = members(TypeBuilder { def }).def;
        self.types.entry(def.full_name()).or_insert(def);
        self
    }

    pub fn build(self) -> Arc<Reference> {
        Arc::new(Reference {
            name: self.name,
            types: self.types,
        })
    }
}

pub struct TypeBuilder {
    def: HostTypeDef,
}

impl TypeBuilder {
    pub fn function<F>(
        mut self,
        name: &str,
        params: Vec<TypeDesc>,
        result: Option<TypeDesc>,
        func: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.def.methods.push(HostMethod {
            name: name.to_string(),
            params,
            result,
            func: Arc::new(func),
        });
        self
    }

    pub fn constant(mut self, name: &str, ty: TypeDesc, value: Value) -> Self {
        self.def.constants.push(HostConstant {
            name: name.to_string(),
            ty,
            value,
        });
        self
    }

    pub fn field(mut self, name: &str, ty: TypeDesc) -> Self {
        self.def.fields.push(HostField {
            name: name.to_string(),
            ty,
        });
        self
    }
}

// ── Reference sets ──────────────────────────────────────────────

/// Ordered set of libraries, de-duplicated by library name (first wins).
#[derive(Clone, Default)]
pub struct ReferenceSet {
    refs: IndexMap<String, Arc<Reference>>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a library with the same name is already present.
    pub fn insert(&mut self, reference: Arc<Reference>) -> bool {
        if self.refs.contains_key(reference.name()) {
            return false;
        }
        self.refs.insert(reference.name().to_string(), reference);
        true
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.refs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Reference>> {
        self.refs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Reference>> {
        self.refs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.refs.keys().map(String::as_str)
    }

    /// First definition of `full_name` across the set.
    pub fn find_type(&self, full_name: &str) -> Option<&HostTypeDef> {
        self.refs.values().find_map(|r| r.find(full_name))
    }

    /// Whether some type lives in `namespace` or one of its children.
    pub fn has_namespace(&self, namespace: &str) -> bool {
        let prefix = format!("{namespace}.");
        self.refs
            .values()
            .flat_map(|r| r.types())
            .any(|t| t.namespace() == namespace || t.namespace().starts_with(&prefix))
    }
}

impl Extend<Arc<Reference>> for ReferenceSet {
    fn extend<I: IntoIterator<Item = Arc<Reference>>>(&mut self, iter: I) {
        for reference in iter {
            self.insert(reference);
        }
    }
}

impl FromIterator<Arc<Reference>> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = Arc<Reference>>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl fmt::Debug for ReferenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.refs.keys()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shop() -> Arc<Reference> {
        Reference::builder("Shop")
            .class("Shop.Model", "Item", |t| {
                t.field("Price", TypeDesc::int32())
                    .field("Name", TypeDesc::string())
            })
            .nested_class("Shop.Model", &["Order"], "Line", |t| t.field("Qty", TypeDesc::int32()))
            .build()
    }

    #[test]
    fn set_deduplicates_by_name_first_wins() {
        let first = shop();
        let second = Reference::builder("Shop").build();
        let set: ReferenceSet = [Arc::clone(&first), second].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert!(Arc::ptr_eq(set.get("Shop").unwrap(), &first));
        assert!(set.find_type("Shop.Model.Item").is_some());
    }

    #[test]
    fn type_desc_carries_origin() {
        let lib = shop();
        let desc = lib.type_desc("Shop.Model.Order.Line").unwrap();
        assert_eq!(desc.full_name().unwrap(), "Shop.Model.Order.Line");
        assert_eq!(desc.origin().unwrap().name(), "Shop");
        assert!(lib.type_desc("Shop.Model.Missing").is_err());
    }

    #[test]
    fn namespaces_are_discoverable() {
        let set: ReferenceSet = std::iter::once(shop()).collect();
        assert!(set.has_namespace("Shop"));
        assert!(set.has_namespace("Shop.Model"));
        assert!(!set.has_namespace("Sho"));
    }
}
