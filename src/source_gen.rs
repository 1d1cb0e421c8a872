//! Synthesizes the compilation unit around a method body.

use crate::defaults;
use crate::error::Error;

/// Everything needed to render a compilation unit. Only the body is
/// required; the rest defaults to the values in [`defaults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub body: Option<String>,
    pub parameters: String,
    pub return_type: String,
    pub usings: String,
    pub method_name: String,
    pub class_name: String,
    pub namespace_name: String,
    pub skeleton: String,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            body: None,
            parameters: String::new(),
            return_type: defaults::RETURN_TYPE.to_string(),
            usings: defaults::USINGS.to_string(),
            method_name: defaults::METHOD_NAME.to_string(),
            class_name: defaults::CLASS_NAME.to_string(),
            namespace_name: defaults::NAMESPACE_NAME.to_string(),
            skeleton: defaults::SKELETON.to_string(),
        }
    }
}

impl GenerationRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn usings(mut self, usings: impl Into<String>) -> Self {
        self.usings = usings.into();
        self
    }

    pub fn method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = name.into();
        self
    }

    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    pub fn namespace_name(mut self, name: impl Into<String>) -> Self {
        self.namespace_name = name.into();
        self
    }

    pub fn skeleton(mut self, skeleton: impl Into<String>) -> Self {
        self.skeleton = skeleton.into();
        self
    }
}

/// Render the compilation unit for `request`.
pub fn generate(request: &GenerationRequest) -> Result<String, Error> {
    let body = request
        .body
        .as_deref()
        .ok_or_else(|| Error::invalid_input("A method body is required."))?;
    let body = add_return_if_needed(body, &request.return_type);

    Ok(render_skeleton(
        &request.skeleton,
        [
            request.usings.as_str(),
            request.namespace_name.as_str(),
            request.class_name.as_str(),
            request.return_type.as_str(),
            request.method_name.as_str(),
            request.parameters.as_str(),
            body.as_str(),
        ],
    ))
}

/// A body counts as a single expression when it does not end with `;`.
/// Such a body gets wrapped in `return ...;` unless the method is void.
pub fn add_return_if_needed(body: &str, return_type: &str) -> String {
    if return_type != defaults::RETURN_TYPE && !body.ends_with(';') {
        format!("return {body};")
    } else {
        body.to_string()
    }
}

const SLOT_NAMES: [&str; 7] = [
    "usings",
    "namespaceName",
    "className",
    "returnType",
    "methodName",
    "parameters",
    "body",
];

/// Substitute `{0}`..`{6}` (or their named aliases) in `skeleton`. `{{` and
/// `}}` produce single braces; any other brace is copied as is.
pub fn render_skeleton(skeleton: &str, slots: [&str; 7]) -> String {
    let mut out = String::with_capacity(skeleton.len() + slots.iter().map(|s| s.len()).sum::<usize>());
    let mut rest = skeleton;

    while let Some(pos) = rest.find(|c| c == '{' || c == '}') {
        let (literal, tail) = rest.split_at(pos);
        out.push_str(literal);

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some((slot, after)) = slot_at(tail) {
            out.push_str(slots.get(slot).copied().unwrap_or_default());
            rest = after;
        } else {
            let (brace, after) = tail.split_at(1);
            out.push_str(brace);
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

/// Parses `{N}` or `{name}` at the start of `text`.
fn slot_at(text: &str) -> Option<(usize, &str)> {
    let inner = text.strip_prefix('{')?;
    let end = inner.find('}')?;
    let (name, after) = inner.split_at(end);
    let slot = match name.parse::<usize>() {
        Ok(index) if index < SLOT_NAMES.len() => index,
        Ok(_) => return None,
        Err(_) => SLOT_NAMES.iter().position(|n| *n == name)?,
    };
    Some((slot, after.strip_prefix('}')?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn expected(return_type: &str, body: &str) -> String {
        format!(
            "\nusing System;\n\n\nnamespace DynamicCompilation\n{{\n    public static class Executer\n    {{\n        \
             public static {return_type} Execute(argumentType argumentName)\n        {{\n            \
             {body}\n        }}\n    }}\n}}"
        )
    }

    #[test]
    fn bodies_without_trailing_semicolon_get_a_return() {
        for body in [
            "methodBodyWithoutSemicolon",
            ";methodBodyWithSemicolonAtTheBeginning",
            "methodBodyWithSemicolon;InTheMiddle",
        ] {
            let request = GenerationRequest::new(body)
                .parameters("argumentType argumentName")
                .return_type("somethingNotVoid");
            assert_eq!(
                generate(&request).unwrap(),
                expected("somethingNotVoid", &format!("return {body};"))
            );
        }
    }

    #[test]
    fn statement_bodies_are_embedded_verbatim() {
        let request = GenerationRequest::new("methodBodyWithSemicolon;").parameters("argumentType argumentName");
        assert_eq!(generate(&request).unwrap(), expected("void", "methodBodyWithSemicolon;"));
    }

    #[test]
    fn void_bodies_never_get_a_return() {
        assert_eq!(add_return_if_needed("x", "void"), "x");
        assert_eq!(add_return_if_needed("x;", "int"), "x;");
        assert_eq!(add_return_if_needed("x", "int"), "return x;");
    }

    #[test]
    fn missing_body_is_invalid_input() {
        let err = generate(&GenerationRequest::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn custom_skeleton_accepts_named_slots_and_stray_braces() {
        let request = GenerationRequest::new("1")
            .return_type("int")
            .skeleton("{namespaceName}.{className}::{methodName} => {body} {{x}} } {unknown} {9}");
        assert_eq!(
            generate(&request).unwrap(),
            "DynamicCompilation.Executer::Execute => return 1; {x} } {unknown} {9}"
        );
    }
}
