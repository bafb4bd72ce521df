//! The fixed, versioned set of built-in functions.
//!
//! Builtins live only in the prelude environment and are never serialized;
//! a closure shipped to another runtime reattaches to the receiver's
//! prelude, so two runtimes can interoperate exactly when their prelude
//! IDs match.

use std::cmp::Ordering;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    env::{EnvArena, EnvId},
    error::{EvalResult, Raise},
    host::HostDispatcher,
    runtime::Runtime,
    value::Value,
};

/// Version string of the prelude function set.
pub const PRELUDE_VERSION: &str = "0.1.0";

/// Identity metadata for a prelude: the version string and a
/// content-derived ID stable across runs for the same function set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreludeInfo {
    pub version: String,
    pub id: String,
}

/// Enumerates every built-in function.
///
/// The strum derives give each variant its language-level name (`+`,
/// `str-upper`, `empty?`, ...) for `Display`, `FromStr`, and prelude
/// installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum BuiltinFn {
    // arithmetic
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "mod")]
    Mod,
    #[strum(serialize = "pow")]
    Pow,
    // comparison (chained, n-ary)
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    // logic
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "not")]
    Not,
    // math
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "max")]
    Max,
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "round")]
    Round,
    #[strum(serialize = "sqrt")]
    Sqrt,
    #[strum(serialize = "log")]
    Log,
    #[strum(serialize = "exp")]
    Exp,
    #[strum(serialize = "sin")]
    Sin,
    #[strum(serialize = "cos")]
    Cos,
    #[strum(serialize = "tan")]
    Tan,
    // lists
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "append")]
    Append,
    #[strum(serialize = "prepend")]
    Prepend,
    #[strum(serialize = "concat")]
    Concat,
    #[strum(serialize = "first")]
    First,
    #[strum(serialize = "rest")]
    Rest,
    #[strum(serialize = "nth")]
    Nth,
    #[strum(serialize = "length")]
    Length,
    #[strum(serialize = "empty?")]
    IsEmpty,
    #[strum(serialize = "slice")]
    Slice,
    #[strum(serialize = "reverse")]
    Reverse,
    #[strum(serialize = "contains?")]
    Contains,
    #[strum(serialize = "index")]
    Index,
    // maps
    #[strum(serialize = "get")]
    Get,
    #[strum(serialize = "set")]
    Set,
    #[strum(serialize = "keys")]
    Keys,
    #[strum(serialize = "values")]
    Values,
    #[strum(serialize = "merge")]
    Merge,
    #[strum(serialize = "has-key?")]
    HasKey,
    // record/collection queries
    #[strum(serialize = "pluck")]
    Pluck,
    #[strum(serialize = "index-by")]
    IndexBy,
    #[strum(serialize = "group-by")]
    GroupBy,
    #[strum(serialize = "get-path")]
    GetPath,
    // strings
    #[strum(serialize = "str-concat")]
    StrConcat,
    #[strum(serialize = "str-split")]
    StrSplit,
    #[strum(serialize = "str-join")]
    StrJoin,
    #[strum(serialize = "str-length")]
    StrLength,
    #[strum(serialize = "str-upper")]
    StrUpper,
    #[strum(serialize = "str-lower")]
    StrLower,
    #[strum(serialize = "matches")]
    Matches,
    // predicates
    #[strum(serialize = "null?")]
    IsNull,
    #[strum(serialize = "bool?")]
    IsBool,
    #[strum(serialize = "number?")]
    IsNumber,
    #[strum(serialize = "string?")]
    IsString,
    #[strum(serialize = "list?")]
    IsList,
    #[strum(serialize = "dict?")]
    IsDict,
    #[strum(serialize = "callable?")]
    IsCallable,
    // higher-order
    #[strum(serialize = "map")]
    MapFn,
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "reduce")]
    Reduce,
    #[strum(serialize = "apply")]
    Apply,
    // conversion
    #[strum(serialize = "to-string")]
    ToString,
    #[strum(serialize = "to-number")]
    ToNumber,
    #[strum(serialize = "type-of")]
    TypeOf,
    // effects
    #[strum(serialize = "print")]
    Print,
    #[strum(serialize = "error")]
    ErrorFn,
}

/// Gas classification used by the evaluators when charging operator
/// dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GasClass {
    Arithmetic,
    Comparison,
    Logical,
    Call,
}

impl BuiltinFn {
    pub(crate) fn gas_class(self) -> GasClass {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod | Self::Pow => GasClass::Arithmetic,
            Self::Eq | Self::Ne | Self::Lt | Self::Gt | Self::Le | Self::Ge => GasClass::Comparison,
            Self::And | Self::Or | Self::Not => GasClass::Logical,
            _ => GasClass::Call,
        }
    }

    /// Applies this builtin to already-evaluated arguments.
    pub(crate) fn call<H: HostDispatcher>(self, rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
        match self {
            Self::Add => add(args),
            Self::Sub => sub(args),
            Self::Mul => mul(args),
            Self::Div => div(args),
            Self::Mod => modulo(args),
            Self::Pow => {
                let [a, b] = take("pow", args)?;
                Ok(Value::Number(num("pow", &a)?.powf(num("pow", &b)?)))
            }
            Self::Eq => chained(args, |ord| ord == Ordering::Equal),
            Self::Ne => chained(args, |ord| ord != Ordering::Equal),
            Self::Lt => chained_ord(args, |ord| ord == Ordering::Less),
            Self::Gt => chained_ord(args, |ord| ord == Ordering::Greater),
            Self::Le => chained_ord(args, |ord| ord != Ordering::Greater),
            Self::Ge => chained_ord(args, |ord| ord != Ordering::Less),
            Self::And => Ok(Value::Bool(args.iter().all(Value::is_truthy))),
            Self::Or => Ok(Value::Bool(args.iter().any(Value::is_truthy))),
            Self::Not => {
                let [v] = take("not", args)?;
                Ok(Value::Bool(!v.is_truthy()))
            }
            Self::Min => extremum(args, f64::INFINITY, Ordering::Less),
            Self::Max => extremum(args, f64::NEG_INFINITY, Ordering::Greater),
            Self::Abs => unary_math("abs", args, f64::abs),
            Self::Round => round(args),
            Self::Sqrt => unary_math("sqrt", args, f64::sqrt),
            Self::Log => unary_math("log", args, f64::ln),
            Self::Exp => unary_math("exp", args, f64::exp),
            Self::Sin => unary_math("sin", args, f64::sin),
            Self::Cos => unary_math("cos", args, f64::cos),
            Self::Tan => unary_math("tan", args, f64::tan),
            Self::List => Ok(Value::list(args)),
            Self::Append => append(args),
            Self::Prepend => prepend(args),
            Self::Concat => concat(args),
            Self::First => first(args),
            Self::Rest => rest(args),
            Self::Nth => nth(args),
            Self::Length => length(args),
            Self::IsEmpty => is_empty(args),
            Self::Slice => slice(args),
            Self::Reverse => reverse(args),
            Self::Contains => contains(args),
            Self::Index => index(args),
            Self::Get => get(args),
            Self::Set => set(args),
            Self::Keys => keys(args),
            Self::Values => values(args),
            Self::Merge => merge(args),
            Self::HasKey => has_key(args),
            Self::Pluck => pluck(args),
            Self::IndexBy => index_by(args),
            Self::GroupBy => group_by(rt, args),
            Self::GetPath => get_path(args),
            Self::StrConcat => str_concat(args),
            Self::StrSplit => str_split(args),
            Self::StrJoin => str_join(args),
            Self::StrLength => str_length(args),
            Self::StrUpper => str_case("str-upper", args, str::to_uppercase),
            Self::StrLower => str_case("str-lower", args, str::to_lowercase),
            Self::Matches => matches(args),
            Self::IsNull => predicate("null?", args, |v| v.is_null()),
            Self::IsBool => predicate("bool?", args, |v| matches!(v, Value::Bool(_))),
            Self::IsNumber => predicate("number?", args, |v| matches!(v, Value::Number(_))),
            Self::IsString => predicate("string?", args, |v| matches!(v, Value::String(_))),
            Self::IsList => predicate("list?", args, |v| matches!(v, Value::List(_))),
            Self::IsDict => predicate("dict?", args, |v| matches!(v, Value::Map(_))),
            Self::IsCallable => predicate("callable?", args, |v| {
                matches!(v, Value::Closure(_) | Value::Builtin(_))
            }),
            Self::MapFn => map_fn(rt, args),
            Self::Filter => filter_fn(rt, args),
            Self::Reduce => reduce_fn(rt, args),
            Self::Apply => apply_fn(rt, args),
            Self::ToString => {
                let [v] = take("to-string", args)?;
                Ok(Value::String(v.to_display_string()))
            }
            Self::ToNumber => to_number(args),
            Self::TypeOf => {
                let [v] = take("type-of", args)?;
                Ok(Value::string(v.kind_name()))
            }
            Self::Print => print_fn(rt, args),
            Self::ErrorFn => {
                let [msg] = take("error", args)?;
                Err(Raise::user(msg.to_display_string()).into())
            }
        }
    }
}

/// Installs the prelude into `arena` and returns its handle plus identity
/// metadata. The ID is a SHA-256 over the version and the sorted builtin
/// names, so it is stable across runs for the same function set.
pub(crate) fn install_prelude(arena: &mut EnvArena) -> (EnvId, PreludeInfo) {
    let mut names: Vec<String> = BuiltinFn::iter().map(|f| f.to_string()).collect();
    names.sort_unstable();

    let mut bindings = IndexMap::with_capacity(names.len());
    for builtin in BuiltinFn::iter() {
        bindings.insert(builtin.to_string(), Value::Builtin(builtin));
    }
    let env = arena.alloc(bindings, None, true);

    let mut hasher = Sha256::new();
    hasher.update(PRELUDE_VERSION.as_bytes());
    for name in &names {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
    }
    let digest = hasher.finalize();
    let mut id = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(id, "{byte:02x}");
    }

    (
        env,
        PreludeInfo {
            version: PRELUDE_VERSION.to_owned(),
            id,
        },
    )
}

// ---------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------

fn take<const N: usize>(name: &str, args: Vec<Value>) -> EvalResult<[Value; N]> {
    let got = args.len();
    args.try_into()
        .map_err(|_| Raise::arity(name, N, got).into())
}

fn num(name: &str, v: &Value) -> EvalResult<f64> {
    v.as_number()
        .ok_or_else(|| Raise::type_error(format!("{name} expects a number, got {}", v.kind_name())).into())
}

fn text<'a>(name: &str, v: &'a Value) -> EvalResult<&'a str> {
    v.as_str()
        .ok_or_else(|| Raise::type_error(format!("{name} expects a string, got {}", v.kind_name())).into())
}

fn seq<'a>(name: &str, v: &'a Value) -> EvalResult<&'a [Value]> {
    v.as_list()
        .ok_or_else(|| Raise::type_error(format!("{name} expects a list, got {}", v.kind_name())).into())
}

fn compare(a: &Value, b: &Value) -> EvalResult<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| Raise::type_error("cannot compare NaN").into()),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(Raise::type_error(format!(
            "cannot compare {} with {}",
            a.kind_name(),
            b.kind_name()
        ))
        .into()),
    }
}

/// Chained equality-style comparison: true for fewer than two arguments.
fn chained(args: Vec<Value>, keep: fn(Ordering) -> bool) -> EvalResult<Value> {
    for pair in args.windows(2) {
        let ord = if pair[0] == pair[1] {
            Ordering::Equal
        } else {
            // unequal values of different kinds still compare unequal
            match compare(&pair[0], &pair[1]) {
                Ok(ord) => ord,
                Err(_) => Ordering::Greater,
            }
        };
        if !keep(ord) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// Chained ordering comparison: requires comparable values.
fn chained_ord(args: Vec<Value>, keep: fn(Ordering) -> bool) -> EvalResult<Value> {
    for pair in args.windows(2) {
        if !keep(compare(&pair[0], &pair[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn add(args: Vec<Value>) -> EvalResult<Value> {
    let mut total = 0.0;
    for arg in &args {
        total += num("+", arg)?;
    }
    Ok(Value::Number(total))
}

/// `-` is negation with one argument and left-associative subtraction
/// otherwise; the empty application yields 0.
fn sub(args: Vec<Value>) -> EvalResult<Value> {
    match args.len() {
        0 => Ok(Value::Number(0.0)),
        1 => Ok(Value::Number(-num("-", &args[0])?)),
        _ => {
            let mut total = num("-", &args[0])?;
            for arg in &args[1..] {
                total -= num("-", arg)?;
            }
            Ok(Value::Number(total))
        }
    }
}

fn mul(args: Vec<Value>) -> EvalResult<Value> {
    let mut total = 1.0;
    for arg in &args {
        total *= num("*", arg)?;
    }
    Ok(Value::Number(total))
}

/// `/` is reciprocal with one argument; with more, the first argument is
/// divided by the product of the rest.
fn div(args: Vec<Value>) -> EvalResult<Value> {
    match args.len() {
        0 => Err(Raise::arity("/", 1, 0).into()),
        1 => {
            let value = num("/", &args[0])?;
            if value == 0.0 {
                return Err(Raise::zero_division().into());
            }
            Ok(Value::Number(1.0 / value))
        }
        _ => {
            let numerator = num("/", &args[0])?;
            let mut denominator = 1.0;
            for arg in &args[1..] {
                denominator *= num("/", arg)?;
            }
            if denominator == 0.0 {
                return Err(Raise::zero_division().into());
            }
            Ok(Value::Number(numerator / denominator))
        }
    }
}

/// Floored modulo: the result takes the sign of the divisor.
fn modulo(args: Vec<Value>) -> EvalResult<Value> {
    let [a, b] = take("mod", args)?;
    let (a, b) = (num("mod", &a)?, num("mod", &b)?);
    if b == 0.0 {
        return Err(Raise::zero_division().into());
    }
    Ok(Value::Number(a - b * (a / b).floor()))
}

fn extremum(args: Vec<Value>, identity: f64, keep: Ordering) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::Number(identity));
    }
    let mut best = args[0].clone();
    for arg in &args[1..] {
        if compare(arg, &best)? == keep {
            best = arg.clone();
        }
    }
    Ok(best)
}

fn unary_math(name: &str, args: Vec<Value>, f: fn(f64) -> f64) -> EvalResult<Value> {
    let [v] = take(name, args)?;
    Ok(Value::Number(f(num(name, &v)?)))
}

/// Half-away-from-zero rounding, with an optional digit count.
fn round(args: Vec<Value>) -> EvalResult<Value> {
    match args.len() {
        1 => Ok(Value::Number(num("round", &args[0])?.round())),
        2 => {
            let value = num("round", &args[0])?;
            let digits = num("round", &args[1])?;
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Number((value * factor).round() / factor))
        }
        n => Err(Raise::arity("round", 1, n).into()),
    }
}

fn append(args: Vec<Value>) -> EvalResult<Value> {
    let [lst, item] = take("append", args)?;
    match lst {
        Value::List(items) => {
            let mut out = items.as_ref().clone();
            out.push(item);
            Ok(Value::list(out))
        }
        _ => Ok(Value::list(vec![item])),
    }
}

fn prepend(args: Vec<Value>) -> EvalResult<Value> {
    let [item, lst] = take("prepend", args)?;
    match lst {
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len() + 1);
            out.push(item);
            out.extend(items.iter().cloned());
            Ok(Value::list(out))
        }
        _ => Ok(Value::list(vec![item])),
    }
}

fn concat(args: Vec<Value>) -> EvalResult<Value> {
    let mut out = Vec::new();
    for arg in args {
        if let Value::List(items) = arg {
            out.extend(items.iter().cloned());
        }
    }
    Ok(Value::list(out))
}

fn first(args: Vec<Value>) -> EvalResult<Value> {
    let [lst] = take("first", args)?;
    Ok(seq("first", &lst)?.first().cloned().unwrap_or(Value::Null))
}

fn rest(args: Vec<Value>) -> EvalResult<Value> {
    let [lst] = take("rest", args)?;
    let items = seq("rest", &lst)?;
    if items.len() > 1 {
        Ok(Value::list(items[1..].to_vec()))
    } else {
        Ok(Value::list(vec![]))
    }
}

fn nth(args: Vec<Value>) -> EvalResult<Value> {
    let [lst, idx] = take("nth", args)?;
    let items = seq("nth", &lst)?;
    let idx = num("nth", &idx)?;
    if idx >= 0.0 && (idx as usize) < items.len() {
        Ok(items[idx as usize].clone())
    } else {
        Ok(Value::Null)
    }
}

fn length(args: Vec<Value>) -> EvalResult<Value> {
    let [v] = take("length", args)?;
    let len = match &v {
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(Raise::type_error(format!("length expects a collection, got {}", other.kind_name())).into());
        }
    };
    Ok(Value::Number(len as f64))
}

fn is_empty(args: Vec<Value>) -> EvalResult<Value> {
    let [v] = take("empty?", args)?;
    let empty = match &v {
        Value::List(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => true,
    };
    Ok(Value::Bool(empty))
}

fn clamp_index(len: usize, idx: f64) -> usize {
    if idx < 0.0 {
        let back = (-idx) as usize;
        len.saturating_sub(back)
    } else {
        (idx as usize).min(len)
    }
}

fn slice(args: Vec<Value>) -> EvalResult<Value> {
    if args.len() < 2 || args.len() > 3 {
        return Err(Raise::arity("slice", 2, args.len()).into());
    }
    let start = num("slice", &args[1])?;
    let end = args.get(2).map(|v| num("slice", v)).transpose()?;
    match &args[0] {
        Value::List(items) => {
            let from = clamp_index(items.len(), start);
            let to = end.map_or(items.len(), |e| clamp_index(items.len(), e)).max(from);
            Ok(Value::list(items[from..to].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let from = clamp_index(chars.len(), start);
            let to = end.map_or(chars.len(), |e| clamp_index(chars.len(), e)).max(from);
            Ok(Value::string(chars[from..to].iter().collect::<String>()))
        }
        _ => Ok(Value::list(vec![])),
    }
}

fn reverse(args: Vec<Value>) -> EvalResult<Value> {
    let [v] = take("reverse", args)?;
    match &v {
        Value::List(items) => {
            let mut out = items.as_ref().clone();
            out.reverse();
            Ok(Value::list(out))
        }
        Value::String(s) => Ok(Value::string(s.chars().rev().collect::<String>())),
        _ => Ok(v),
    }
}

fn contains(args: Vec<Value>) -> EvalResult<Value> {
    let [coll, item] = take("contains?", args)?;
    let found = match &coll {
        Value::List(items) => items.iter().any(|v| *v == item),
        Value::String(s) => item.as_str().is_some_and(|needle| s.contains(needle)),
        Value::Map(entries) => item.as_str().is_some_and(|key| entries.contains_key(key)),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn index(args: Vec<Value>) -> EvalResult<Value> {
    let [coll, item] = take("index", args)?;
    let position = match &coll {
        Value::List(items) => items.iter().position(|v| *v == item),
        Value::String(s) => item
            .as_str()
            .and_then(|needle| s.find(needle).map(|byte| s[..byte].chars().count())),
        _ => None,
    };
    Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
}

fn get(args: Vec<Value>) -> EvalResult<Value> {
    if args.len() < 2 || args.len() > 3 {
        return Err(Raise::arity("get", 2, args.len()).into());
    }
    let default = args.get(2).cloned().unwrap_or(Value::Null);
    match (&args[0], &args[1]) {
        (Value::Map(entries), Value::String(key)) => Ok(entries.get(key).cloned().unwrap_or(default)),
        _ => Ok(default),
    }
}

fn set(args: Vec<Value>) -> EvalResult<Value> {
    let [d, k, v] = take("set", args)?;
    let key = text("set", &k)?;
    match &d {
        Value::Map(entries) => {
            let mut out = entries.as_ref().clone();
            out.insert(key.to_owned(), v);
            Ok(Value::map(out))
        }
        _ => Ok(Value::map(IndexMap::new())),
    }
}

fn keys(args: Vec<Value>) -> EvalResult<Value> {
    let [d] = take("keys", args)?;
    match &d {
        Value::Map(entries) => Ok(Value::list(entries.keys().map(|k| Value::string(k.as_str())).collect())),
        _ => Ok(Value::list(vec![])),
    }
}

fn values(args: Vec<Value>) -> EvalResult<Value> {
    let [d] = take("values", args)?;
    match &d {
        Value::Map(entries) => Ok(Value::list(entries.values().cloned().collect())),
        _ => Ok(Value::list(vec![])),
    }
}

fn merge(args: Vec<Value>) -> EvalResult<Value> {
    let mut out = IndexMap::new();
    for arg in args {
        if let Value::Map(entries) = arg {
            for (k, v) in entries.iter() {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(Value::map(out))
}

fn has_key(args: Vec<Value>) -> EvalResult<Value> {
    let [d, k] = take("has-key?", args)?;
    let found = match (&d, &k) {
        (Value::Map(entries), Value::String(key)) => entries.contains_key(key),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn pluck(args: Vec<Value>) -> EvalResult<Value> {
    let [lst, key] = take("pluck", args)?;
    let key = text("pluck", &key)?;
    let items = seq("pluck", &lst)?;
    let out = items
        .iter()
        .map(|item| {
            item.as_map()
                .and_then(|entries| entries.get(key).cloned())
                .unwrap_or(Value::Null)
        })
        .collect();
    Ok(Value::list(out))
}

fn index_by(args: Vec<Value>) -> EvalResult<Value> {
    let [lst, key] = take("index-by", args)?;
    let key = text("index-by", &key)?;
    let mut out = IndexMap::new();
    for item in seq("index-by", &lst)? {
        if let Some(entries) = item.as_map()
            && let Some(value) = entries.get(key)
        {
            out.insert(value.to_display_string(), item.clone());
        }
    }
    Ok(Value::map(out))
}

fn group_by<H: HostDispatcher>(rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
    let [lst, key] = take("group-by", args)?;
    let items = seq("group-by", &lst)?.to_vec();
    let mut groups: IndexMap<String, Vec<Value>> = IndexMap::new();
    for item in items {
        let group = match &key {
            Value::String(field) => item
                .as_map()
                .and_then(|entries| entries.get(field.as_str()))
                .map(Value::to_display_string),
            Value::Closure(_) | Value::Builtin(_) => {
                Some(rt.apply_value(&key, vec![item.clone()])?.to_display_string())
            }
            other => {
                return Err(Raise::type_error(format!(
                    "group-by expects a key name or function, got {}",
                    other.kind_name()
                ))
                .into());
            }
        };
        if let Some(group) = group {
            groups.entry(group).or_default().push(item);
        }
    }
    Ok(Value::map(groups.into_iter().map(|(k, v)| (k, Value::list(v))).collect()))
}

fn get_path(args: Vec<Value>) -> EvalResult<Value> {
    let [root, path] = take("get-path", args)?;
    let path = text("get-path", &path)?;
    let mut current = root;
    for segment in path.split('.') {
        current = match &current {
            Value::Map(entries) => entries.get(segment).cloned().unwrap_or(Value::Null),
            Value::List(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    Ok(current)
}

fn str_concat(args: Vec<Value>) -> EvalResult<Value> {
    let mut out = String::new();
    for arg in &args {
        out.push_str(&arg.to_display_string());
    }
    Ok(Value::String(out))
}

fn str_split(args: Vec<Value>) -> EvalResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(Raise::arity("str-split", 1, args.len()).into());
    }
    let Some(s) = args[0].as_str() else {
        return Ok(Value::list(vec![]));
    };
    let sep = match args.get(1) {
        Some(sep) => text("str-split", sep)?,
        None => " ",
    };
    Ok(Value::list(s.split(sep).map(Value::string).collect()))
}

fn str_join(args: Vec<Value>) -> EvalResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(Raise::arity("str-join", 1, args.len()).into());
    }
    let items = seq("str-join", &args[0])?;
    let sep = match args.get(1) {
        Some(sep) => text("str-join", sep)?,
        None => "",
    };
    let joined = items
        .iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(sep);
    Ok(Value::String(joined))
}

fn str_length(args: Vec<Value>) -> EvalResult<Value> {
    let [v] = take("str-length", args)?;
    match &v {
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        _ => Ok(Value::Number(0.0)),
    }
}

fn str_case(name: &str, args: Vec<Value>, f: fn(&str) -> String) -> EvalResult<Value> {
    let [v] = take(name, args)?;
    match &v {
        Value::String(s) => Ok(Value::String(f(s))),
        _ => Ok(v),
    }
}

fn matches(args: Vec<Value>) -> EvalResult<Value> {
    let [v, pattern] = take("matches", args)?;
    let pattern = text("matches", &pattern)?;
    let regex = regex::Regex::new(pattern)
        .map_err(|e| Raise::type_error(format!("invalid regular expression: {e}")))?;
    let matched = v.as_str().is_some_and(|s| regex.is_match(s));
    Ok(Value::Bool(matched))
}

fn predicate(name: &str, args: Vec<Value>, f: fn(&Value) -> bool) -> EvalResult<Value> {
    let [v] = take(name, args)?;
    Ok(Value::Bool(f(&v)))
}

fn map_fn<H: HostDispatcher>(rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
    let [f, lst] = take("map", args)?;
    let Value::List(items) = lst else {
        return Ok(Value::list(vec![]));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items.iter() {
        out.push(rt.apply_value(&f, vec![item.clone()])?);
    }
    Ok(Value::list(out))
}

fn filter_fn<H: HostDispatcher>(rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
    let [f, lst] = take("filter", args)?;
    let Value::List(items) = lst else {
        return Ok(Value::list(vec![]));
    };
    let mut out = Vec::new();
    for item in items.iter() {
        if rt.apply_value(&f, vec![item.clone()])?.is_truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::list(out))
}

fn reduce_fn<H: HostDispatcher>(rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
    if args.len() < 2 || args.len() > 3 {
        return Err(Raise::arity("reduce", 2, args.len()).into());
    }
    let init = args.get(2).cloned();
    let items = seq("reduce", &args[1])?.to_vec();
    let f = args.into_iter().next().expect("reduce has a function argument");

    let (mut acc, rest) = match init {
        Some(init) => (init, &items[..]),
        None => match items.split_first() {
            Some((head, tail)) => (head.clone(), tail),
            None => return Ok(Value::Null),
        },
    };
    for item in rest {
        acc = rt.apply_value(&f, vec![acc, item.clone()])?;
    }
    Ok(acc)
}

fn apply_fn<H: HostDispatcher>(rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
    let [f, call_args] = take("apply", args)?;
    let call_args = seq("apply", &call_args)?.to_vec();
    rt.apply_value(&f, call_args)
}

fn to_number(args: Vec<Value>) -> EvalResult<Value> {
    let [v] = take("to-number", args)?;
    let n = match &v {
        Value::Number(n) => *n,
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(Value::Number(n))
}

fn print_fn<H: HostDispatcher>(rt: &mut Runtime<H>, args: Vec<Value>) -> EvalResult<Value> {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            rt.sink.push(' ');
        }
        rt.sink.write(&arg.to_display_string());
    }
    rt.sink.push('\n');
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_roundtrip_through_strings() {
        use std::str::FromStr;
        for builtin in BuiltinFn::iter() {
            let name = builtin.to_string();
            assert_eq!(BuiltinFn::from_str(&name).unwrap(), builtin, "name {name}");
        }
    }

    #[test]
    fn quote_alias_is_not_a_builtin() {
        use std::str::FromStr;
        assert!(BuiltinFn::from_str("@").is_err());
        assert!(BuiltinFn::from_str("quote").is_err());
    }

    #[test]
    fn prelude_id_is_stable() {
        let mut a = EnvArena::new();
        let mut b = EnvArena::new();
        let (_, info_a) = install_prelude(&mut a);
        let (_, info_b) = install_prelude(&mut b);
        assert_eq!(info_a, info_b);
        assert_eq!(info_a.version, PRELUDE_VERSION);
        assert_eq!(info_a.id.len(), 64);
    }
}
