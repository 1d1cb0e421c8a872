//! Serialized module image: what the toolchain emits and the loader reads.

use serde::{Deserialize, Serialize};

use super::compiler::Op;
use crate::artifact::MethodSignature;
use crate::value::Value;

pub const FORMAT_VERSION: u32 = 1;

/// Literal in a module's constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    /// Stored as raw bits so NaN and the infinities survive JSON.
    Double(#[serde(with = "double_bits")] f64),
    Str(String),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Long(l) => Value::Long(*l),
            Constant::Double(d) => Value::Double(*d),
            Constant::Str(s) => Value::string(s),
        }
    }

    /// Constant for a host value; lists and objects have no literal form.
    pub fn from_value(value: &Value) -> Option<Constant> {
        match value {
            Value::Null => Some(Constant::Null),
            Value::Bool(b) => Some(Constant::Bool(*b)),
            Value::Int(i) => Some(Constant::Int(*i)),
            Value::Long(l) => Some(Constant::Long(*l)),
            Value::Double(d) => Some(Constant::Double(*d)),
            Value::Str(s) => Some(Constant::Str(s.to_string())),
            Value::List(_) | Value::Object(_) => None,
        }
    }

    /// Bitwise identity, used to de-duplicate the pool.
    pub fn same(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

mod double_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

/// A host function the module calls, identified by its declaring type,
/// name and exact parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionImport {
    pub type_name: String,
    pub method: String,
    pub params: Vec<String>,
    pub result: Option<String>,
}

impl std::fmt::Display for FunctionImport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}({})", self.type_name, self.method, self.params.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Import {
    Function(FunctionImport),
    /// A host data class the module instantiates.
    Class { type_name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassImage {
    /// Nested classes use `Outer+Inner`.
    pub full_name: String,
    pub is_public: bool,
    pub is_static: bool,
    pub methods: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodImage {
    pub name: String,
    pub class: u32,
    pub is_public: bool,
    pub is_static: bool,
    pub signature: MethodSignature,
    /// Parameters, then declared locals, then compiler temporaries.
    pub local_count: u16,
    pub code: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub format_version: u32,
    pub module_name: String,
    pub constants: Vec<Constant>,
    /// Type and field names referenced by index from the code.
    pub strings: Vec<String>,
    pub imports: Vec<Import>,
    pub classes: Vec<ClassImage>,
    pub methods: Vec<MethodImage>,
}

impl Image {
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        serde_json::to_vec(self).map_err(|e| format!("failed to encode module image: {e}"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Image, String> {
        let image: Image =
            serde_json::from_slice(bytes).map_err(|e| format!("malformed module image: {e}"))?;
        if image.format_version != FORMAT_VERSION {
            return Err(format!(
                "unsupported image format version {} (expected {FORMAT_VERSION})",
                image.format_version
            ));
        }
        Ok(image)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image {
            format_version: FORMAT_VERSION,
            module_name: "m".into(),
            constants: vec![Constant::Double(f64::NAN), Constant::Str("x".into())],
            strings: vec![],
            imports: vec![],
            classes: vec![],
            methods: vec![],
        }
    }

    #[test]
    fn nan_survives_encoding() {
        let decoded = Image::decode(&image().encode().unwrap()).unwrap();
        assert!(matches!(decoded.constants[0], Constant::Double(d) if d.is_nan()));
        assert_eq!(decoded.constants[1], Constant::Str("x".into()));
    }

    #[test]
    fn rejects_other_versions_and_garbage() {
        let mut img = image();
        img.format_version = 99;
        let err = Image::decode(&img.encode().unwrap()).unwrap_err();
        assert!(err.contains("version 99"));
        assert!(Image::decode(b"not json").is_err());
    }

    #[test]
    fn constants_compare_by_bits() {
        assert!(Constant::Double(f64::NAN).same(&Constant::Double(f64::NAN)));
        assert!(!Constant::Double(0.0).same(&Constant::Double(-0.0)));
        assert_eq!(Constant::from_value(&Value::Int(3)), Some(Constant::Int(3)));
    }
}
