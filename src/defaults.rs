//! Default identifiers and the source skeleton for generated code.

/// Name of the single implicit parameter.
pub const ARGUMENT_NAME: &str = "it";
pub const CLASS_NAME: &str = "Executer";
pub const METHOD_NAME: &str = "Execute";
pub const NAMESPACE_NAME: &str = "DynamicCompilation";
/// Result type marker for callables without a result.
pub const RETURN_TYPE: &str = "void";
pub const USINGS: &str = "";

/// Compilation unit template. Slots `{0}`..`{6}` take the usings, namespace,
/// class name, return type, method name, parameter list and body.
pub const SKELETON: &str = "
using System;
{0}

namespace {1}
{{
    public static class {2}
    {{
        public static {3} {4}({5})
        {{
            {6}
        }}
    }}
}}";
