//! Loaded binary artifacts and the handles used to address their members.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::shape::ParamMode;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureParam {
    pub name: String,
    pub mode: ParamMode,
    /// Fully qualified type name.
    pub type_name: String,
}

/// Parameters and result of a loaded method, with fully qualified type names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub params: Vec<SignatureParam>,
    /// `None` for void methods.
    pub result: Option<String>,
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.result.as_deref().unwrap_or("void"))?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(modifier) = param.mode.modifier() {
                write!(f, "{modifier} ")?;
            }
            f.write_str(&param.type_name)?;
        }
        f.write_str(")")
    }
}

/// A module loaded into the process.
pub trait LoadedModule: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn find_type(&self, full_name: &str) -> Option<TypeHandle>;

    /// First public static method called `name` on `ty`.
    fn find_static_method(&self, ty: TypeHandle, name: &str) -> Option<MethodHandle>;

    fn signature(&self, method: MethodHandle) -> Option<&MethodSignature>;

    /// Run `method`. `args` holds one slot per parameter; by-ref slots hold
    /// the callee's final values afterwards. Void methods return null.
    fn invoke(&self, method: MethodHandle, args: &mut [Value]) -> Result<Value, RuntimeError>;
}

/// Shared handle to a loaded module. Entry points keep a clone, so the
/// module stays alive as long as anything resolved from it.
#[derive(Clone)]
pub struct CompiledArtifact {
    module: Arc<dyn LoadedModule>,
}

impl CompiledArtifact {
    pub fn new(module: Arc<dyn LoadedModule>) -> Self {
        Self { module }
    }

    pub fn module(&self) -> &dyn LoadedModule {
        self.module.as_ref()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.module, &other.module)
    }
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledArtifact").field(&self.module.name()).finish()
    }
}
