use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::builtins::BUILTINS;

/// A function lowered to bytecode. Carries no environment: locals live in
/// the caller's stack frame region.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Vec<u8>,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Null,
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<HashMap<HashKey, Value>>),
    Function(Rc<CompiledFunction>),
    Builtin(usize),
}

/// The subset of values that may key a hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Bool(bool),
    Str(Rc<str>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "INTEGER",
            Value::Bool(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Str(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::Function(_) => "FUNCTION",
            Value::Builtin(_) => "BUILTIN",
        }
    }

    /// Only `false` and `null` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Null)
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Int(n) => Some(HashKey::Int(*n)),
            Value::Bool(b) => Some(HashKey::Bool(*b)),
            Value::Str(s) => Some(HashKey::Str(Rc::clone(s))),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(Value::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Hash(map) => {
                let mut pairs: Vec<String> =
                    map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                pairs.sort();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Value::Function(func) => write!(f, "<fn/{}>", func.num_parameters),
            Value::Builtin(idx) => match BUILTINS.get(*idx) {
                Some(b) => write!(f, "<builtin {}>", b.name),
                None => write!(f, "<builtin #{idx}>"),
            },
        }
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Int(n) => write!(f, "{n}"),
            HashKey::Bool(b) => write!(f, "{b}"),
            HashKey::Str(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Str(Rc::from("")).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn only_ints_bools_and_strings_hash() {
        assert_eq!(Value::Int(7).hash_key(), Some(HashKey::Int(7)));
        assert_eq!(Value::Bool(true).hash_key(), Some(HashKey::Bool(true)));
        assert_eq!(Value::Str(Rc::from("a")).hash_key(), Some(HashKey::Str(Rc::from("a"))));
        assert_eq!(Value::Null.hash_key(), None);
        assert_eq!(Value::Array(Rc::new(vec![])).hash_key(), None);
    }

    #[test]
    fn hash_keys_compare_by_value() {
        let a = Value::Str(Rc::from("one")).hash_key().unwrap();
        let b = Value::Str(Rc::from("one")).hash_key().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Str(Rc::from("hi")).to_string(), "hi");
        let arr = Value::Array(Rc::new(vec![Value::Int(1), Value::Bool(false)]));
        assert_eq!(arr.to_string(), "[1, false]");
    }
}
