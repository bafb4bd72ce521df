use std::str::FromStr;

use crate::{
    error::{Error, EvalResult},
    prelude::BuiltinFn,
    value::Json,
};

/// Marker preceding an embedded special form in the wire encoding.
pub const SPECIAL_MARKER: &str = "__special__";
/// Operator applying a computed function value beneath its arguments.
pub const APPLY_OP: &str = "__apply__";
/// Operator building a dict from `2k` key/value stack entries.
pub const DICT_OP: &str = "__dict__";
/// Zero-arity operator pushing the empty list.
pub const EMPTY_LIST_OP: &str = "__empty_list__";

/// One stack-machine instruction.
///
/// The wire form is a flat JSON array: `Call` spreads into an arity
/// element followed by an operator element, and `Special` into the
/// marker string followed by the source form. Everything else is a single
/// array element.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push a literal (number, bool, null, or a verbatim array/object).
    Const(Json),
    /// Push a string literal (the text after the `@` marker).
    Str(String),
    /// Push the value bound to a symbol.
    Load(String),
    /// Pop `arity` values and apply `op`.
    Call { arity: usize, op: String },
    /// Evaluate an embedded special form with the sub-evaluator.
    Special(Json),
}

/// Whether `name` is recognized as an operator when decoding a wire
/// instruction array: the structural markers plus the prelude builtins.
///
/// A flat JSON array cannot distinguish "push integer, load symbol" from
/// an arity/operator pair for arbitrary names, so wire decoding only
/// recognizes this fixed set. The typed [`Instr`] form has no such
/// ambiguity.
#[must_use]
fn is_operator_name(name: &str) -> bool {
    name == APPLY_OP || name == DICT_OP || name == EMPTY_LIST_OP || BuiltinFn::from_str(name).is_ok()
}

/// Encodes instructions as the flat JSON array wire form.
#[must_use]
pub fn encode_instructions(instructions: &[Instr]) -> Json {
    let mut out = Vec::with_capacity(instructions.len());
    for instr in instructions {
        match instr {
            Instr::Const(v) => out.push(v.clone()),
            Instr::Str(s) => out.push(Json::String(format!("@{s}"))),
            Instr::Load(s) => out.push(Json::String(s.clone())),
            Instr::Call { arity, op } => {
                out.push(Json::Number((*arity as u64).into()));
                out.push(Json::String(op.clone()));
            }
            Instr::Special(form) => {
                out.push(Json::String(SPECIAL_MARKER.to_owned()));
                out.push(form.clone());
            }
        }
    }
    Json::Array(out)
}

/// Decodes a wire instruction array into typed instructions.
pub fn decode_instructions(doc: &Json) -> EvalResult<Vec<Instr>> {
    let items = doc
        .as_array()
        .ok_or_else(|| Error::Decode("instruction document must be a JSON array".to_owned()))?;
    let mut out = Vec::with_capacity(items.len());
    let mut i = 0;
    while i < items.len() {
        match &items[i] {
            Json::String(s) if s == SPECIAL_MARKER => {
                let form = items
                    .get(i + 1)
                    .ok_or_else(|| Error::Decode("special form marker without a form".to_owned()))?;
                out.push(Instr::Special(form.clone()));
                i += 2;
            }
            Json::Number(n) => {
                let arity = n.as_u64();
                let op = items.get(i + 1).and_then(Json::as_str);
                match (arity, op) {
                    (Some(arity), Some(op)) if is_operator_name(op) => {
                        out.push(Instr::Call {
                            arity: arity as usize,
                            op: op.to_owned(),
                        });
                        i += 2;
                    }
                    _ => {
                        out.push(Instr::Const(items[i].clone()));
                        i += 1;
                    }
                }
            }
            Json::String(s) => {
                match s.strip_prefix('@') {
                    Some(literal) => out.push(Instr::Str(literal.to_owned())),
                    None => out.push(Instr::Load(s.clone())),
                }
                i += 1;
            }
            other => {
                out.push(Instr::Const(other.clone()));
                i += 1;
            }
        }
    }
    Ok(out)
}
