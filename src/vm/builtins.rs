use std::rc::Rc;

use crate::error::RuntimeError;
use super::value::Value;

/// A host function callable from compiled code.
pub struct Builtin {
    pub name: &'static str,
    pub func: fn(&[Value]) -> Result<Value, RuntimeError>,
}

/// The fixed builtin table. Order matters: `OP_GET_BUILTIN` operands index
/// into it, so entries must never be reordered.
pub const BUILTINS: &[Builtin] = &[
    Builtin { name: "len", func: len },
    Builtin { name: "first", func: first },
    Builtin { name: "last", func: last },
    Builtin { name: "rest", func: rest },
    Builtin { name: "push", func: push },
    Builtin { name: "puts", func: puts },
];

fn want_args(args: &[Value], want: usize) -> Result<(), RuntimeError> {
    if args.len() == want {
        Ok(())
    } else {
        Err(RuntimeError::WrongArity { want, got: args.len() })
    }
}

fn len(args: &[Value]) -> Result<Value, RuntimeError> {
    want_args(args, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.len() as i64)),
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(RuntimeError::UnsupportedArgument { builtin: "len", got: other.type_name() }),
    }
}

fn first(args: &[Value]) -> Result<Value, RuntimeError> {
    want_args(args, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
        other => Err(RuntimeError::UnsupportedArgument { builtin: "first", got: other.type_name() }),
    }
}

fn last(args: &[Value]) -> Result<Value, RuntimeError> {
    want_args(args, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
        other => Err(RuntimeError::UnsupportedArgument { builtin: "last", got: other.type_name() }),
    }
}

fn rest(args: &[Value]) -> Result<Value, RuntimeError> {
    want_args(args, 1)?;
    match &args[0] {
        Value::Array(items) if items.is_empty() => Ok(Value::Null),
        Value::Array(items) => Ok(Value::Array(Rc::new(items[1..].to_vec()))),
        other => Err(RuntimeError::UnsupportedArgument { builtin: "rest", got: other.type_name() }),
    }
}

/// Returns a new array; the input is left untouched.
fn push(args: &[Value]) -> Result<Value, RuntimeError> {
    want_args(args, 2)?;
    match &args[0] {
        Value::Array(items) => {
            let mut items = items.as_ref().clone();
            items.push(args[1].clone());
            Ok(Value::Array(Rc::new(items)))
        }
        other => Err(RuntimeError::UnsupportedArgument { builtin: "push", got: other.type_name() }),
    }
}

fn puts(args: &[Value]) -> Result<Value, RuntimeError> {
    for arg in args {
        println!("{arg}");
    }
    Ok(Value::Null)
}
