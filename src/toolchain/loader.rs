//! Links an emitted image against its references and exposes it as a
//! [`LoadedModule`].

use std::sync::Arc;

use tracing::debug;

use super::image::{FunctionImport, Image, Import};
use super::vm::{Linked, Machine, DEFAULT_MAX_CALL_DEPTH};
use crate::artifact::{LoadedModule, MethodHandle, MethodSignature, TypeHandle};
use crate::driver::ModuleLoader;
use crate::error::RuntimeError;
use crate::reference::{HostTypeKind, ReferenceSet};
use crate::shape::TypeDesc;
use crate::value::Value;

/// Loads images produced by [`super::BuiltinToolchain`].
#[derive(Debug, Clone, Copy)]
pub struct BuiltinLoader {
    max_call_depth: usize,
}

impl Default for BuiltinLoader {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl BuiltinLoader {
    pub fn with_max_call_depth(max_call_depth: usize) -> Self {
        Self {
            max_call_depth: max_call_depth.max(1),
        }
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }
}

impl ModuleLoader for BuiltinLoader {
    fn load(&self, image: &[u8], references: &ReferenceSet) -> Result<Arc<dyn LoadedModule>, String> {
        let image = Image::decode(image)?;
        validate(&image)?;
        let imports = image
            .imports
            .iter()
            .map(|import| link(import, references))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            module = %image.module_name,
            classes = image.classes.len(),
            methods = image.methods.len(),
            imports = imports.len(),
            "linked module image"
        );
        Ok(Arc::new(BuiltinModule {
            image,
            imports,
            max_call_depth: self.max_call_depth,
        }))
    }
}

/// Cross-table indices must stay in range.
fn validate(image: &Image) -> Result<(), String> {
    let methods = image.methods.len();
    for class in &image.classes {
        if let Some(bad) = class.methods.iter().find(|&&m| m as usize >= methods) {
            return Err(format!("class {} lists unknown method {bad}", class.full_name));
        }
    }
    for method in &image.methods {
        if method.class as usize >= image.classes.len() {
            return Err(format!("method {} belongs to unknown class {}", method.name, method.class));
        }
        if usize::from(method.local_count) < method.signature.params.len() {
            return Err(format!("method {} has fewer locals than parameters", method.name));
        }
    }
    Ok(())
}

fn full_names(types: &[TypeDesc]) -> Option<Vec<String>> {
    types.iter().map(|t| t.full_name().ok()).collect()
}

fn link(import: &Import, references: &ReferenceSet) -> Result<Linked, String> {
    match import {
        Import::Function(function) => link_function(function, references),
        Import::Class { type_name } => {
            let def = references
                .find_type(type_name)
                .filter(|def| def.kind() == HostTypeKind::Class)
                .ok_or_else(|| format!("Could not load type '{type_name}' from the referenced libraries."))?;
            Ok(Linked::Class {
                type_name: def.full_name(),
                fields: def
                    .fields()
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.default_value()))
                    .collect(),
            })
        }
    }
}

fn link_function(import: &FunctionImport, references: &ReferenceSet) -> Result<Linked, String> {
    let missing = || format!("Method not found: '{import}'.");
    let def = references.find_type(&import.type_name).ok_or_else(missing)?;
    let method = def
        .methods_named(&import.method)
        .map(|(_, m)| m)
        .find(|m| {
            full_names(&m.params).as_ref() == Some(&import.params)
                && m.result.as_ref().map(TypeDesc::full_name).transpose().ok() == Some(import.result.clone())
        })
        .ok_or_else(missing)?;
    Ok(Linked::Function {
        func: Arc::clone(&method.func),
        arity: method.params.len(),
        returns: method.result.is_some(),
    })
}

/// A linked image ready to run.
#[derive(Debug)]
pub struct BuiltinModule {
    image: Image,
    imports: Vec<Linked>,
    max_call_depth: usize,
}

impl LoadedModule for BuiltinModule {
    fn name(&self) -> &str {
        &self.image.module_name
    }

    fn find_type(&self, full_name: &str) -> Option<TypeHandle> {
        let index = self.image.classes.iter().position(|c| c.full_name == full_name)?;
        u32::try_from(index).ok().map(TypeHandle)
    }

    fn find_static_method(&self, ty: TypeHandle, name: &str) -> Option<MethodHandle> {
        let class = self.image.classes.get(ty.0 as usize)?;
        class
            .methods
            .iter()
            .copied()
            .find(|&m| {
                self.image
                    .methods
                    .get(m as usize)
                    .is_some_and(|m| m.name == name && m.is_public && m.is_static)
            })
            .map(MethodHandle)
    }

    fn signature(&self, method: MethodHandle) -> Option<&MethodSignature> {
        self.image.methods.get(method.0 as usize).map(|m| &m.signature)
    }

    fn invoke(&self, method: MethodHandle, args: &mut [Value]) -> Result<Value, RuntimeError> {
        Machine {
            image: &self.image,
            imports: &self.imports,
            max_call_depth: self.max_call_depth,
        }
        .run(method.0, args)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::corelib;
    use crate::driver::{EmitOptions, Toolchain};
    use crate::error::ExceptionKind;
    use crate::reference::Reference;
    use crate::toolchain::BuiltinToolchain;

    fn shop() -> Arc<Reference> {
        Reference::builder("Shop")
            .class("Shop", "Item", |t| {
                t.field("Price", TypeDesc::int32()).field("Name", TypeDesc::string())
            })
            .build()
    }

    fn refs(extra: bool) -> ReferenceSet {
        let mut refs: ReferenceSet = corelib::LIBRARY_NAMES.iter().filter_map(|n| corelib::library(n)).collect();
        if extra {
            refs.insert(shop());
        }
        refs
    }

    fn emit(source: &str, refs: &ReferenceSet) -> Vec<u8> {
        let out = BuiltinToolchain.emit(source, refs, &EmitOptions::default());
        assert!(out.diagnostics.iter().all(|d| !d.is_blocking()), "{:?}", out.diagnostics);
        out.image.unwrap()
    }

    fn load(source: &str) -> Arc<dyn LoadedModule> {
        let refs = refs(true);
        BuiltinLoader::default().load(&emit(source, &refs), &refs).unwrap()
    }

    const SOURCE: &str = "using System;\n\
        namespace N {\n\
          public static class K {\n\
            static int Hidden() { return 1; }\n\
            public static int Big(int a, long b) { return (int)Math.Max(a, b) + Hidden(); }\n\
            public static string Item(int price) { var i = new Shop.Item(); i.Price = price; i.Price += 2; return i.Name + i.Price; }\n\
          }\n\
        }";

    #[test]
    fn resolves_public_static_methods() {
        let module = load(SOURCE);
        let ty = module.find_type("N.K").unwrap();
        assert!(module.find_type("K").is_none());
        assert!(module.find_static_method(ty, "Hidden").is_none());
        let big = module.find_static_method(ty, "Big").unwrap();
        assert_eq!(module.signature(big).unwrap().to_string(), "System.Int32(System.Int32, System.Int64)");

        let mut args = [Value::Int(3), Value::Long(9)];
        assert_eq!(module.invoke(big, &mut args).unwrap(), Value::Int(10));
    }

    #[test]
    fn host_data_classes_get_default_fields() {
        let module = load(SOURCE);
        let ty = module.find_type("N.K").unwrap();
        let item = module.find_static_method(ty, "Item").unwrap();
        assert_eq!(module.invoke(item, &mut [Value::Int(5)]).unwrap(), Value::string("7"));
    }

    #[test]
    fn missing_imports_fail_to_load() {
        let image = emit(SOURCE, &refs(true));
        let err = BuiltinLoader::default().load(&image, &refs(false)).unwrap_err();
        assert!(err.contains("Shop.Item"), "{err}");
        assert!(BuiltinLoader::default().load(b"garbage", &refs(false)).is_err());
    }

    #[test]
    fn call_depth_is_configurable() {
        let source = "public static class R { public static int Down(int n) { return n == 0 ? 0 : Down(n - 1); } }";
        let refs = refs(false);
        let image = emit(source, &refs);
        let shallow = BuiltinLoader::with_max_call_depth(8).load(&image, &refs).unwrap();
        let down = shallow.find_static_method(shallow.find_type("R").unwrap(), "Down").unwrap();
        assert_eq!(shallow.invoke(down, &mut [Value::Int(7)]).unwrap(), Value::Int(0));
        let err = shallow.invoke(down, &mut [Value::Int(8)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::StackOverflow);
    }
}
