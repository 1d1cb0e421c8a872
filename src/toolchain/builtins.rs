use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::value::Value;

/// Operation behind a built-in member of `string`, `List<T>` or any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntrinsicOp {
    StringLength,
    StringToUpper,
    StringToLower,
    StringTrim,
    StringContains,
    StringStartsWith,
    StringEndsWith,
    StringIndexOf,
    StringReplace,
    StringSubstring,
    StringSubstringRange,
    ListCount,
    ListAdd,
    ListClear,
    ListContains,
    ToString,
    Equals,
}

/// Which receivers a member is defined on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    String,
    List,
    Any,
}

/// Parameter or result type, relative to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Void,
    Bool,
    Int,
    String,
    Object,
    /// The list's element type.
    Element,
}

/// Built-in member: single source of truth for name, signature and opcode.
#[derive(Debug, Clone)]
pub struct BuiltinMember {
    pub receiver: Receiver,
    pub name: &'static str,
    /// Read without parentheses, like `s.Length`.
    pub property: bool,
    pub params: &'static [Slot],
    pub ret: Slot,
    pub op: IntrinsicOp,
    pub description: &'static str,
}

pub static INTRINSICS: &[BuiltinMember] = &[
    // ── string ──────────────────────────────────────────────────
    BuiltinMember {
        receiver: Receiver::String, name: "Length", property: true, params: &[], ret: Slot::Int,
        op: IntrinsicOp::StringLength, description: "Number of characters",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "ToUpper", property: false, params: &[], ret: Slot::String,
        op: IntrinsicOp::StringToUpper, description: "Upper-case copy",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "ToLower", property: false, params: &[], ret: Slot::String,
        op: IntrinsicOp::StringToLower, description: "Lower-case copy",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "Trim", property: false, params: &[], ret: Slot::String,
        op: IntrinsicOp::StringTrim, description: "Copy without leading and trailing whitespace",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "Contains", property: false, params: &[Slot::String], ret: Slot::Bool,
        op: IntrinsicOp::StringContains, description: "Whether the substring occurs",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "StartsWith", property: false, params: &[Slot::String], ret: Slot::Bool,
        op: IntrinsicOp::StringStartsWith, description: "Whether the string starts with the prefix",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "EndsWith", property: false, params: &[Slot::String], ret: Slot::Bool,
        op: IntrinsicOp::StringEndsWith, description: "Whether the string ends with the suffix",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "IndexOf", property: false, params: &[Slot::String], ret: Slot::Int,
        op: IntrinsicOp::StringIndexOf, description: "Character index of the first occurrence, or -1",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "Replace", property: false, params: &[Slot::String, Slot::String], ret: Slot::String,
        op: IntrinsicOp::StringReplace, description: "Copy with every occurrence replaced",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "Substring", property: false, params: &[Slot::Int], ret: Slot::String,
        op: IntrinsicOp::StringSubstring, description: "Suffix starting at a character index",
    },
    BuiltinMember {
        receiver: Receiver::String, name: "Substring", property: false, params: &[Slot::Int, Slot::Int], ret: Slot::String,
        op: IntrinsicOp::StringSubstringRange, description: "Characters from an index, with a length",
    },
    // ── List<T> ─────────────────────────────────────────────────
    BuiltinMember {
        receiver: Receiver::List, name: "Count", property: true, params: &[], ret: Slot::Int,
        op: IntrinsicOp::ListCount, description: "Number of elements",
    },
    BuiltinMember {
        receiver: Receiver::List, name: "Add", property: false, params: &[Slot::Element], ret: Slot::Void,
        op: IntrinsicOp::ListAdd, description: "Append an element",
    },
    BuiltinMember {
        receiver: Receiver::List, name: "Clear", property: false, params: &[], ret: Slot::Void,
        op: IntrinsicOp::ListClear, description: "Remove every element",
    },
    BuiltinMember {
        receiver: Receiver::List, name: "Contains", property: false, params: &[Slot::Element], ret: Slot::Bool,
        op: IntrinsicOp::ListContains, description: "Whether an equal element is present",
    },
    // ── Any value ───────────────────────────────────────────────
    BuiltinMember {
        receiver: Receiver::Any, name: "ToString", property: false, params: &[], ret: Slot::String,
        op: IntrinsicOp::ToString, description: "Text rendering of the value",
    },
    BuiltinMember {
        receiver: Receiver::Any, name: "Equals", property: false, params: &[Slot::Object], ret: Slot::Bool,
        op: IntrinsicOp::Equals, description: "Value equality for primitives and strings, identity otherwise",
    },
];

/// Members called `name` that apply to `receiver`.
pub fn lookup(receiver: Option<Receiver>, name: &str, property: bool) -> Vec<&'static BuiltinMember> {
    INTRINSICS
        .iter()
        .filter(|m| m.name == name && m.property == property)
        .filter(|m| m.receiver == Receiver::Any || Some(m.receiver) == receiver)
        .collect()
}

fn member(op: IntrinsicOp) -> Option<&'static BuiltinMember> {
    INTRINSICS.iter().find(|m| m.op == op)
}

impl IntrinsicOp {
    /// Arguments taken besides the receiver.
    pub fn arity(self) -> usize {
        member(self).map_or(0, |m| m.params.len())
    }

    pub fn has_result(self) -> bool {
        member(self).is_some_and(|m| m.ret != Slot::Void)
    }

    pub fn name(self) -> &'static str {
        member(self).map_or("?", |m| m.name)
    }
}

// ── Evaluation ──────────────────────────────────────────────────

fn string_arg<'a>(args: &'a [Value], index: usize, param: &str) -> Result<&'a str, RuntimeError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(&**s),
        Some(Value::Null) | None => Err(RuntimeError::argument_null(param)),
        Some(other) => Err(RuntimeError::invalid_cast(
            &other.type_name().unwrap_or_default(),
            crate::value::STRING,
        )),
    }
}

fn int_arg(args: &[Value], index: usize, param: &str) -> Result<i32, RuntimeError> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        _ => Err(RuntimeError::argument_out_of_range(param)),
    }
}

/// `count` characters of `s` starting at character `start`.
fn substring(s: &str, start: i32, count: Option<i32>) -> Result<Value, RuntimeError> {
    let len = s.chars().count();
    let start = usize::try_from(start)
        .ok()
        .filter(|&st| st <= len)
        .ok_or_else(|| RuntimeError::argument_out_of_range("startIndex"))?;
    let count = match count {
        None => len - start,
        Some(c) => usize::try_from(c)
            .ok()
            .filter(|&c| start + c <= len)
            .ok_or_else(|| RuntimeError::argument_out_of_range("length"))?,
    };
    Ok(Value::string(s.chars().skip(start).take(count).collect::<String>()))
}

/// Run `op` on `receiver`. Returns `None` for members without a result.
pub fn apply(op: IntrinsicOp, receiver: &Value, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
    if receiver.is_null() {
        return Err(RuntimeError::null_reference(op.name()));
    }
    let value = match (op, receiver) {
        (IntrinsicOp::ToString, v) => Value::string(v.to_string()),
        (IntrinsicOp::Equals, v) => Value::Bool(args.first().is_some_and(|other| v == other)),

        (IntrinsicOp::StringLength, Value::Str(s)) => {
            Value::Int(i32::try_from(s.chars().count()).unwrap_or(i32::MAX))
        }
        (IntrinsicOp::StringToUpper, Value::Str(s)) => Value::string(s.to_uppercase()),
        (IntrinsicOp::StringToLower, Value::Str(s)) => Value::string(s.to_lowercase()),
        (IntrinsicOp::StringTrim, Value::Str(s)) => Value::string(s.trim()),
        (IntrinsicOp::StringContains, Value::Str(s)) => Value::Bool(s.contains(string_arg(args, 0, "value")?)),
        (IntrinsicOp::StringStartsWith, Value::Str(s)) => {
            Value::Bool(s.starts_with(string_arg(args, 0, "value")?))
        }
        (IntrinsicOp::StringEndsWith, Value::Str(s)) => Value::Bool(s.ends_with(string_arg(args, 0, "value")?)),
        (IntrinsicOp::StringIndexOf, Value::Str(s)) => {
            let needle = string_arg(args, 0, "value")?;
            let index = s.find(needle).map_or(-1, |byte| {
                i32::try_from(s[..byte].chars().count()).unwrap_or(i32::MAX)
            });
            Value::Int(index)
        }
        (IntrinsicOp::StringReplace, Value::Str(s)) => {
            let from = string_arg(args, 0, "oldValue")?;
            if from.is_empty() {
                return Err(RuntimeError::new(
                    crate::error::ExceptionKind::ArgumentOutOfRange,
                    "String cannot be of zero length. (Parameter 'oldValue')",
                ));
            }
            let to = match args.get(1) {
                Some(Value::Str(t)) => t.to_string(),
                _ => String::new(),
            };
            Value::string(s.replace(from, &to))
        }
        (IntrinsicOp::StringSubstring, Value::Str(s)) => substring(s, int_arg(args, 0, "startIndex")?, None)?,
        (IntrinsicOp::StringSubstringRange, Value::Str(s)) => {
            substring(s, int_arg(args, 0, "startIndex")?, Some(int_arg(args, 1, "length")?))?
        }

        (IntrinsicOp::ListCount, Value::List(list)) => {
            Value::Int(i32::try_from(list.len()).unwrap_or(i32::MAX))
        }
        (IntrinsicOp::ListAdd, Value::List(list)) => {
            list.push(args.first().cloned().unwrap_or(Value::Null));
            return Ok(None);
        }
        (IntrinsicOp::ListClear, Value::List(list)) => {
            list.clear();
            return Ok(None);
        }
        (IntrinsicOp::ListContains, Value::List(list)) => {
            Value::Bool(list.contains(args.first().unwrap_or(&Value::Null)))
        }

        (op, other) => {
            return Err(RuntimeError::invalid_operation(format!(
                "'{}' is not defined on {}",
                op.name(),
                other.type_name().unwrap_or_default()
            )));
        }
    };
    Ok(Some(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ExceptionKind;
    use crate::value::ListRef;

    fn call(op: IntrinsicOp, receiver: Value, args: &[Value]) -> Value {
        apply(op, &receiver, args).unwrap().unwrap()
    }

    #[test]
    fn every_op_has_one_table_entry() {
        for m in INTRINSICS {
            let entries = INTRINSICS.iter().filter(|other| other.op == m.op).count();
            assert_eq!(entries, 1, "{:?}", m.op);
        }
    }

    #[test]
    fn lookup_respects_receiver_and_kind() {
        assert_eq!(lookup(Some(Receiver::String), "Length", true).len(), 1);
        assert!(lookup(Some(Receiver::String), "Length", false).is_empty());
        assert!(lookup(Some(Receiver::List), "Length", true).is_empty());
        assert_eq!(lookup(Some(Receiver::String), "Substring", false).len(), 2);
        assert_eq!(lookup(None, "ToString", false).len(), 1);
        assert_eq!(lookup(Some(Receiver::List), "Contains", false)[0].op, IntrinsicOp::ListContains);
    }

    #[test]
    fn string_members() {
        let s = || Value::string("Héllo World");
        assert_eq!(call(IntrinsicOp::StringLength, s(), &[]), Value::Int(11));
        assert_eq!(call(IntrinsicOp::StringToUpper, s(), &[]), Value::string("HÉLLO WORLD"));
        assert_eq!(call(IntrinsicOp::StringIndexOf, s(), &[Value::string("World")]), Value::Int(6));
        assert_eq!(call(IntrinsicOp::StringIndexOf, s(), &[Value::string("x")]), Value::Int(-1));
        assert_eq!(call(IntrinsicOp::StringSubstring, s(), &[Value::Int(6)]), Value::string("World"));
        assert_eq!(
            call(IntrinsicOp::StringSubstringRange, s(), &[Value::Int(1), Value::Int(4)]),
            Value::string("éllo")
        );
        assert_eq!(
            call(IntrinsicOp::StringReplace, s(), &[Value::string("o"), Value::string("0")]),
            Value::string("Héll0 W0rld")
        );
        assert_eq!(call(IntrinsicOp::StringTrim, Value::string("  x "), &[]), Value::string("x"));
    }

    #[test]
    fn substring_bounds() {
        let err = apply(IntrinsicOp::StringSubstring, &Value::string("abc"), &[Value::Int(4)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ArgumentOutOfRange);
        let err = apply(
            IntrinsicOp::StringSubstringRange,
            &Value::string("abc"),
            &[Value::Int(1), Value::Int(3)],
        )
        .unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ArgumentOutOfRange);
        assert_eq!(call(IntrinsicOp::StringSubstring, Value::string("abc"), &[Value::Int(3)]), Value::string(""));
    }

    #[test]
    fn null_receivers_and_arguments() {
        let err = apply(IntrinsicOp::StringLength, &Value::Null, &[]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::NullReference);
        let err = apply(IntrinsicOp::StringContains, &Value::string("a"), &[Value::Null]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ArgumentNull);
    }

    #[test]
    fn list_members_share_storage() {
        let list = ListRef::new(crate::value::STRING);
        let v = Value::List(list.clone());
        assert_eq!(apply(IntrinsicOp::ListAdd, &v, &[Value::string("a")]).unwrap(), None);
        assert_eq!(call(IntrinsicOp::ListCount, v.clone(), &[]), Value::Int(1));
        assert_eq!(call(IntrinsicOp::ListContains, v.clone(), &[Value::string("a")]), Value::Bool(true));
        apply(IntrinsicOp::ListClear, &v, &[]).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn any_value_members() {
        assert_eq!(call(IntrinsicOp::ToString, Value::Bool(true), &[]), Value::string("True"));
        assert_eq!(call(IntrinsicOp::ToString, Value::Int(-3), &[]), Value::string("-3"));
        assert_eq!(call(IntrinsicOp::Equals, Value::Int(3), &[Value::Int(3)]), Value::Bool(true));
        assert_eq!(call(IntrinsicOp::Equals, Value::Int(3), &[Value::Long(3)]), Value::Bool(false));
    }
}
