//! Locates the generated entry point inside a loaded artifact.

use tracing::debug;

use crate::artifact::{CompiledArtifact, MethodHandle, MethodSignature};
use crate::error::{Error, RuntimeError};
use crate::value::Value;

/// A public static method inside a loaded artifact.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    namespace: String,
    class_name: String,
    method_name: String,
    handle: MethodHandle,
    signature: MethodSignature,
    artifact: CompiledArtifact,
}

impl EntryPoint {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn artifact(&self) -> &CompiledArtifact {
        &self.artifact
    }

    /// Call the method without any shape checks. `args` must hold one slot
    /// per parameter.
    pub fn invoke_raw(&self, args: &mut [Value]) -> Result<Value, RuntimeError> {
        self.artifact.module().invoke(self.handle, args)
    }
}

/// Find `namespace.class_name::method_name` in `artifact`. An empty namespace
/// addresses a top-level class.
pub fn resolve(
    artifact: &CompiledArtifact,
    namespace: &str,
    class_name: &str,
    method_name: &str,
) -> Result<EntryPoint, Error> {
    let full_name = if namespace.is_empty() {
        class_name.to_string()
    } else {
        format!("{namespace}.{class_name}")
    };

    let module = artifact.module();
    let ty = module.find_type(&full_name).ok_or_else(|| Error::TypeNotFound {
        class_name: class_name.to_string(),
        full_name: full_name.clone(),
    })?;
    let not_found = || Error::MethodNotFound {
        method_name: method_name.to_string(),
        class_name: class_name.to_string(),
    };
    let handle = module.find_static_method(ty, method_name).ok_or_else(not_found)?;
    let signature = module.signature(handle).ok_or_else(not_found)?.clone();

    debug!(class = %full_name, method = method_name, signature = %signature, "resolved entry point");
    Ok(EntryPoint {
        namespace: namespace.to_string(),
        class_name: class_name.to_string(),
        method_name: method_name.to_string(),
        handle,
        signature,
        artifact: artifact.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::compile::{compile_assembly, CompileOptions};

    const SOURCE: &str = "namespace Demo {\n\
          public static class Calc {\n\
            public static int Twice(int x) { return x * 2; }\n\
            static int Hidden() { return 0; }\n\
          }\n\
        }\n\
        public static class Top { public static void Run() { } }";

    fn artifact() -> CompiledArtifact {
        compile_assembly(SOURCE, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn resolve_distinguishes_missing_type_and_method() {
        let artifact = artifact();
        let err = resolve(&artifact, "Demo", "Nope", "Twice").unwrap_err();
        assert!(matches!(err, Error::TypeNotFound { .. }));
        assert_eq!(err.to_string(), "Cannot find the class Nope in the given assembly.");

        let err = resolve(&artifact, "Demo", "Calc", "Thrice").unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));
        let err = resolve(&artifact, "Demo", "Calc", "Hidden").unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));

        let entry = resolve(&artifact, "Demo", "Calc", "Twice").unwrap();
        assert!(entry.artifact().ptr_eq(&artifact));
        assert_eq!(entry.signature().to_string(), "System.Int32(System.Int32)");
        assert_eq!(entry.invoke_raw(&mut [Value::Int(4)]).unwrap(), Value::Int(8));
    }

    #[test]
    fn empty_namespace_addresses_top_level_classes() {
        let artifact = artifact();
        let entry = resolve(&artifact, "", "Top", "Run").unwrap();
        assert_eq!((entry.namespace(), entry.class_name()), ("", "Top"));
        assert!(matches!(resolve(&artifact, "", "Calc", "Twice"), Err(Error::TypeNotFound { .. })));
    }
}
