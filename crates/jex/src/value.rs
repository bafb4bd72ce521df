use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    env::EnvId,
    error::{Error, EvalResult},
    prelude::BuiltinFn,
};

/// JSON document type used for source expressions, compiled instruction
/// arrays, and every wire document. Object key order is preserved.
pub type Json = serde_json::Value;

/// A runtime value.
///
/// Small values are stored inline; lists, maps, and closures sit behind
/// `Rc` so that environment extension and value-stack traffic clone
/// cheaply. All values are immutable once constructed: a "modified"
/// collection is a fresh value.
///
/// `Builtin` is an opaque host-provided callable. It appears only in the
/// prelude environment and is never serialized as executable code.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// IEEE-754 double; integers in range are represented exactly.
    Number(f64),
    String(String),
    List(Rc<Vec<Value>>),
    /// Insertion-ordered mapping. Keys are always strings after evaluation.
    Map(Rc<IndexMap<String, Value>>),
    Closure(Rc<Closure>),
    Builtin(BuiltinFn),
}

/// A function value carrying its lexical environment by handle.
///
/// The captured environment lives in the [`crate::EnvArena`]; cycles
/// between closures and environments (recursive definitions) go through
/// the arena rather than through reference-counted back-edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub params: SmallVec<[String; 4]>,
    /// The function body in source (JSON AST) form.
    pub body: Json,
    pub env: EnvId,
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(items))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::Map(Rc::new(entries))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Converts pure JSON data into a value, verbatim.
    ///
    /// No evaluation happens here: strings keep any leading `@`, arrays
    /// become lists, objects become maps. Used by `quote`, host responses,
    /// and literal instruction pushes.
    #[must_use]
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::list(items.iter().map(Self::from_json).collect()),
            Json::Object(entries) => {
                if let Some(n) = decode_number_sentinel(entries) {
                    return Self::Number(n);
                }
                Self::map(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Converts a pure-data value to JSON.
    ///
    /// Fails on closures and builtins. Non-finite numbers (producible as
    /// `min`/`max` identity elements) become `{"$number": ...}` sentinels
    /// because strict JSON cannot carry them.
    pub fn to_json(&self) -> EvalResult<Json> {
        match self {
            Self::Null => Ok(Json::Null),
            Self::Bool(b) => Ok(Json::Bool(*b)),
            Self::Number(n) => Ok(number_to_json(*n)),
            Self::String(s) => Ok(Json::String(s.clone())),
            Self::List(items) => items.iter().map(Self::to_json).collect::<EvalResult<Vec<_>>>().map(Json::Array),
            Self::Map(entries) => {
                let mut out = serde_json::Map::with_capacity(entries.len());
                for (k, v) in entries.iter() {
                    out.insert(k.clone(), v.to_json()?);
                }
                Ok(Json::Object(out))
            }
            Self::Closure(_) => Err(Error::Encode("a closure is not pure JSON data".to_owned())),
            Self::Builtin(f) => Err(Error::Encode(format!("builtin '{f}' is not serializable"))),
        }
    }

    /// Language truthiness: `false`, `null`, `0`, the empty string, empty
    /// list, and empty map are falsy; everything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
            Self::Closure(_) | Self::Builtin(_) => true,
        }
    }

    /// Stable kind name, as reported by `type-of` and used in error
    /// messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
            Self::Closure(_) => "closure",
            Self::Builtin(_) => "builtin",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Rough byte cost of this value for memory accounting. Shallow by
    /// intent: nested collections were charged when they were produced.
    #[must_use]
    pub(crate) fn estimate_size(&self) -> usize {
        match self {
            Self::String(s) => s.len() * 2,
            Self::List(items) => items.len() * 8,
            Self::Map(entries) => entries.len() * 24,
            _ => 0,
        }
    }

    /// Rendering used by `print` and string conversion: strings are bare,
    /// everything else renders as JSON-shaped text.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    /// Shallow structural equality.
    ///
    /// Closures compare by params, body, and environment *handle*; use
    /// [`crate::EnvArena::value_structural_eq`] for deep comparison across
    /// distinct environment handles with identical content.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write_number(f, *n),
            Self::String(s) => {
                // JSON string escaping
                write!(f, "{}", Json::String(s.clone()))
            }
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {v}", Json::String(k.clone()))?;
                }
                f.write_str("}")
            }
            Self::Closure(c) => write!(f, "<closure/{}>", c.params.len()),
            Self::Builtin(b) => write!(f, "<builtin {b}>"),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        return f.write_str("NaN");
    }
    if n.is_infinite() {
        return f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" });
    }
    if n.fract() == 0.0 && n.abs() < 9e15 {
        return write!(f, "{}", n as i64);
    }
    let mut buf = ryu::Buffer::new();
    f.write_str(buf.format(n))
}

/// Encodes a number as JSON, preferring the integer form when exact and
/// falling back to the `$number` sentinel for non-finite values.
#[must_use]
pub(crate) fn number_to_json(n: f64) -> Json {
    if n.is_nan() {
        return serde_json::json!({ "$number": "NaN" });
    }
    if n.is_infinite() {
        return serde_json::json!({ "$number": if n > 0.0 { "Infinity" } else { "-Infinity" } });
    }
    if n.fract() == 0.0 && n.abs() < 9e15 {
        return Json::Number((n as i64).into());
    }
    serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
}

fn decode_number_sentinel(entries: &serde_json::Map<String, Json>) -> Option<f64> {
    if entries.len() != 1 {
        return None;
    }
    match entries.get("$number")? {
        Json::String(s) => match s.as_str() {
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            "NaN" => Some(f64::NAN),
            _ => None,
        },
        _ => None,
    }
}
