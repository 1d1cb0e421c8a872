//! Turns a callable shape into declaration text.

use indexmap::IndexSet;

use crate::defaults;
use crate::error::Error;
use crate::shape::{CallableShape, ParamMode, TypeDesc};

/// One declared parameter: modifier, fully qualified type name and type.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDeclaration {
    pub mode: ParamMode,
    pub type_name: String,
    pub ty: TypeDesc,
}

impl ParameterDeclaration {
    /// `ref System.Int32 value`
    pub fn render(&self, name: &str) -> String {
        match self.mode.modifier() {
            Some(modifier) => format!("{modifier} {} {name}", self.type_name),
            None => format!("{} {name}", self.type_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSignature {
    pub parameters: Vec<ParameterDeclaration>,
    /// Fully qualified result type, or `void`.
    pub result_type_name: String,
    /// Distinct namespaces of the parameter and result types, first seen first.
    pub namespaces: Vec<String>,
}

impl ResolvedSignature {
    /// One `using` directive per namespace, newline separated.
    pub fn usings(&self) -> String {
        self.namespaces
            .iter()
            .map(|ns| format!("using {ns};"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn resolve(shape: &CallableShape) -> Result<ResolvedSignature, Error> {
    let mut namespaces = IndexSet::new();
    let mut parameters = Vec::with_capacity(shape.arity());

    for param in shape.params() {
        let type_name = param.ty.full_name()?;
        note_namespace(&mut namespaces, &param.ty);
        parameters.push(ParameterDeclaration {
            mode: param.mode,
            type_name,
            ty: param.ty.clone(),
        });
    }

    let result_type_name = match shape.result() {
        Some(ty) => {
            note_namespace(&mut namespaces, ty);
            ty.full_name()?
        }
        None => defaults::RETURN_TYPE.to_string(),
    };

    Ok(ResolvedSignature {
        parameters,
        result_type_name,
        namespaces: namespaces.into_iter().collect(),
    })
}

fn note_namespace(namespaces: &mut IndexSet<String>, ty: &TypeDesc) {
    if let Some(ns) = ty.namespace().filter(|ns| !ns.is_empty()) {
        namespaces.insert(ns.to_string());
    }
}

/// Names for `count` parameters. Without explicit names a single parameter
/// is called `it`; two or more need names.
pub fn argument_names(names: Option<&[String]>, count: usize) -> Result<Vec<String>, Error> {
    match names {
        Some(names) if names.len() == count => Ok(names.to_vec()),
        Some(names) => Err(Error::invalid_input(format!(
            "The number of argument names ({}) does not match the number of parameters ({count}).",
            names.len()
        ))),
        None if count == 0 => Ok(Vec::new()),
        None if count == 1 => Ok(vec![defaults::ARGUMENT_NAME.to_string()]),
        None => Err(Error::invalid_input(format!(
            "Argument names are required for {count} parameters."
        ))),
    }
}

/// `"[modifier ]Type name"` per parameter, joined by `", "`.
pub fn parameter_list(parameters: &[ParameterDeclaration], names: &[String]) -> Result<String, Error> {
    if parameters.len() != names.len() {
        return Err(Error::invalid_input(format!(
            "The number of argument names ({}) does not match the number of parameters ({}).",
            names.len(),
            parameters.len()
        )));
    }
    Ok(parameters
        .iter()
        .zip(names)
        .map(|(param, name)| param.render(name))
        .collect::<Vec<_>>()
        .join(", "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn by_ref_modes_render_keywords() {
        let shape = CallableShape::new()
            .with_param(ParamMode::Value, TypeDesc::string())
            .with_param(ParamMode::In, TypeDesc::int32())
            .with_param(ParamMode::Ref, TypeDesc::int64())
            .with_param(ParamMode::Out, TypeDesc::list(TypeDesc::double()));
        let sig = resolve(&shape).unwrap();
        let text = parameter_list(&sig.parameters, &names(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(
            text,
            "System.String a, in System.Int32 b, ref System.Int64 c, \
             out System.Collections.Generic.List<System.Double> d"
        );
        assert_eq!(sig.result_type_name, "void");
    }

    #[test]
    fn usings_are_distinct_and_ordered() {
        let shape = CallableShape::new()
            .with_param(ParamMode::Value, TypeDesc::list(TypeDesc::int32()))
            .with_param(ParamMode::Value, TypeDesc::new("Shop", "Item"))
            .with_param(ParamMode::Value, TypeDesc::new("Shop", "Order"))
            .returning(TypeDesc::string());
        let sig = resolve(&shape).unwrap();
        assert_eq!(sig.usings(), "using System.Collections.Generic;\nusing Shop;\nusing System;");
        assert_eq!(sig.result_type_name, "System.String");
    }

    #[test]
    fn zero_parameters_render_nothing() {
        let sig = resolve(&CallableShape::new()).unwrap();
        assert!(sig.parameters.is_empty());
        assert_eq!(parameter_list(&sig.parameters, &[]).unwrap(), "");
        assert_eq!(sig.usings(), "");
    }

    #[test]
    fn unnameable_types_are_rejected() {
        let shape = CallableShape::new().with_param(ParamMode::Value, TypeDesc::generic_parameter("T"));
        assert!(matches!(resolve(&shape), Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn argument_name_defaults() {
        assert_eq!(argument_names(None, 1).unwrap(), ["it"]);
        assert!(argument_names(None, 0).unwrap().is_empty());
        assert!(argument_names(None, 2).is_err());
        let given = names(&["a", "b"]);
        assert_eq!(argument_names(Some(&given), 2).unwrap(), given);
        assert!(argument_names(Some(&given), 3).is_err());
    }
}
