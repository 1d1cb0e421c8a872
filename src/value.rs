//! Dynamic runtime values passed into and out of compiled code.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

pub const OBJECT: &str = "System.Object";
pub const BOOLEAN: &str = "System.Boolean";
pub const INT32: &str = "System.Int32";
pub const INT64: &str = "System.Int64";
pub const DOUBLE: &str = "System.Double";
pub const STRING: &str = "System.String";
pub const LIST: &str = "System.Collections.Generic.List";

/// A value as seen by compiled code. Lists and objects are shared handles:
/// cloning a `Value` clones the handle, not the contents.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(Arc<str>),
    List(ListRef),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Fully qualified name of the runtime type, `None` for null.
    pub fn type_name(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(BOOLEAN.to_string()),
            Value::Int(_) => Some(INT32.to_string()),
            Value::Long(_) => Some(INT64.to_string()),
            Value::Double(_) => Some(DOUBLE.to_string()),
            Value::Str(_) => Some(STRING.to_string()),
            Value::List(list) => Some(list.type_name()),
            Value::Object(obj) => Some(obj.type_name().to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    /// Machine-readable rendering used by the CLI.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Long(l) => serde_json::Value::from(*l),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(list) => {
                serde_json::Value::Array(list.snapshot().iter().map(Value::to_json).collect())
            }
            Value::Object(obj) => {
                let map = obj
                    .fields()
                    .into_iter()
                    .map(|(name, value)| (name, value.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Strings and primitives compare by value, lists and objects by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Renders the way `ToString()` does in compiled code.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Double(d) => fmt_double(*d, f),
            Value::Str(s) => f.write_str(s),
            Value::List(list) => f.write_str(&list.type_name()),
            Value::Object(obj) => f.write_str(obj.type_name()),
        }
    }
}

fn fmt_double(d: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if d.is_nan() {
        f.write_str("NaN")
    } else if d.is_infinite() {
        f.write_str(if d > 0.0 { "∞" } else { "-∞" })
    } else {
        write!(f, "{d}")
    }
}

// ── Lists ───────────────────────────────────────────────────────

/// Shared, growable list with a fixed element type.
#[derive(Debug, Clone)]
pub struct ListRef {
    element: Arc<str>,
    items: Arc<Mutex<Vec<Value>>>,
}

impl ListRef {
    pub fn new(element: impl AsRef<str>) -> Self {
        Self::from_vec(element, Vec::new())
    }

    pub fn from_vec(element: impl AsRef<str>, items: Vec<Value>) -> Self {
        Self {
            element: Arc::from(element.as_ref()),
            items: Arc::new(Mutex::new(items)),
        }
    }

    /// Full name of the element type.
    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn type_name(&self) -> String {
        format!("{LIST}<{}>", self.element)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn push(&self, value: Value) {
        self.items.lock().push(value);
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.lock().iter().any(|v| v == value)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.lock().get(index).cloned()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.lock().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

// ── Objects ─────────────────────────────────────────────────────

/// Instance of a host data class: a named bag of typed fields.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    type_name: Arc<str>,
    fields: Arc<Mutex<IndexMap<String, Value>>>,
}

impl ObjectRef {
    pub fn new(type_name: impl AsRef<str>, fields: IndexMap<String, Value>) -> Self {
        Self {
            type_name: Arc::from(type_name.as_ref()),
            fields: Arc::new(Mutex::new(fields)),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.lock().get(field).cloned()
    }

    /// Overwrite an existing field. Returns false when the field is unknown.
    pub fn set(&self, field: &str, value: Value) -> bool {
        match self.fields.lock().get_mut(field) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copy of the fields in declaration order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.fields
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_shared_handles() {
        let list = ListRef::new(STRING);
        let alias = Value::List(list.clone());
        list.push(Value::string("a"));
        match &alias {
            Value::List(l) => assert_eq!(l.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(alias, Value::List(list));
        assert_ne!(alias, Value::List(ListRef::new(STRING)));
        assert_eq!(alias.type_name().unwrap(), "System.Collections.Generic.List<System.String>");
    }

    #[test]
    fn display_matches_to_string() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Int(-4).to_string(), "-4");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn object_fields_keep_declaration_order() {
        let mut fields = IndexMap::new();
        fields.insert("B".to_string(), Value::Int(0));
        fields.insert("A".to_string(), Value::Int(0));
        let obj = ObjectRef::new("Demo.Point", fields);
        assert!(obj.set("A", Value::Int(3)));
        assert!(!obj.set("C", Value::Int(3)));
        let names: Vec<String> = obj.fields().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["B", "A"]);
        let json = Value::Object(obj).to_json();
        assert_eq!(json["A"], 3);
    }
}
