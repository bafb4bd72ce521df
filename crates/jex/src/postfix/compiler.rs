//! Compiler between the source AST and the postfix instruction sequence.
//!
//! Arguments compile in source order, so the machine observes the same
//! left-to-right evaluation order as the tree evaluator. The arity always
//! precedes the operator, even for zero or one argument.

use crate::{
    ast,
    error::{Error, EvalResult},
    value::Json,
};

use super::instr::{APPLY_OP, DICT_OP, EMPTY_LIST_OP, Instr};

/// Compiles a source expression to postfix instructions.
#[must_use]
pub fn compile(expr: &Json) -> Vec<Instr> {
    let mut out = Vec::new();
    compile_into(expr, &mut out);
    out
}

fn compile_into(expr: &Json, out: &mut Vec<Instr>) {
    match expr {
        Json::Null | Json::Bool(_) | Json::Number(_) => out.push(Instr::Const(expr.clone())),
        Json::String(s) => match ast::string_literal(s) {
            Some(literal) => out.push(Instr::Str(literal.to_owned())),
            None => out.push(Instr::Load(s.clone())),
        },
        Json::Array(items) if items.is_empty() => out.push(Instr::Call {
            arity: 0,
            op: EMPTY_LIST_OP.to_owned(),
        }),
        Json::Array(items) => {
            if ast::special_form(expr).is_some() {
                out.push(Instr::Special(expr.clone()));
                return;
            }
            let (head, args) = items.split_first().expect("non-empty array");
            match head {
                Json::String(op) => {
                    for arg in args {
                        compile_into(arg, out);
                    }
                    out.push(Instr::Call {
                        arity: args.len(),
                        op: op.clone(),
                    });
                }
                computed => {
                    compile_into(computed, out);
                    for arg in args {
                        compile_into(arg, out);
                    }
                    out.push(Instr::Call {
                        arity: args.len(),
                        op: APPLY_OP.to_owned(),
                    });
                }
            }
        }
        Json::Object(entries) => {
            for (key, value) in entries {
                compile_into(&Json::String(key.clone()), out);
                compile_into(value, out);
            }
            out.push(Instr::Call {
                arity: entries.len() * 2,
                op: DICT_OP.to_owned(),
            });
        }
    }
}

/// Reconstructs a source expression from postfix instructions.
///
/// Inverse of [`compile`] for expressions without special forms; embedded
/// special forms are returned in place unchanged.
pub fn decompile(instructions: &[Instr]) -> EvalResult<Json> {
    let mut stack: Vec<Json> = Vec::new();
    for instr in instructions {
        match instr {
            Instr::Const(v) => stack.push(v.clone()),
            Instr::Str(s) => stack.push(Json::String(format!("@{s}"))),
            Instr::Load(s) => stack.push(Json::String(s.clone())),
            Instr::Special(form) => stack.push(form.clone()),
            Instr::Call { arity, op } => {
                if op == EMPTY_LIST_OP && *arity == 0 {
                    stack.push(Json::Array(vec![]));
                    continue;
                }
                let needs = if op == APPLY_OP { arity + 1 } else { *arity };
                if stack.len() < needs {
                    return Err(Error::InvalidProgram(format!(
                        "stack underflow: {op} needs {needs} operands, have {}",
                        stack.len()
                    )));
                }
                let args = stack.split_off(stack.len() - arity);
                if op == APPLY_OP {
                    let f = stack.pop().expect("operand checked above");
                    let mut call = Vec::with_capacity(args.len() + 1);
                    call.push(f);
                    call.extend(args);
                    stack.push(Json::Array(call));
                } else if op == DICT_OP {
                    if args.len() % 2 != 0 {
                        return Err(Error::InvalidProgram(
                            "dict construction needs an even operand count".to_owned(),
                        ));
                    }
                    let mut entries = serde_json::Map::with_capacity(args.len() / 2);
                    for pair in args.chunks(2) {
                        let Json::String(key) = &pair[0] else {
                            return Err(Error::InvalidProgram("dict keys must be strings".to_owned()));
                        };
                        entries.insert(key.clone(), pair[1].clone());
                    }
                    stack.push(Json::Object(entries));
                } else {
                    let mut call = Vec::with_capacity(args.len() + 1);
                    call.push(Json::String(op.clone()));
                    call.extend(args);
                    stack.push(Json::Array(call));
                }
            }
        }
    }
    if stack.len() != 1 {
        return Err(Error::InvalidProgram(format!(
            "expected a single expression after decompilation, found {} stack entries",
            stack.len()
        )));
    }
    Ok(stack.pop().expect("length checked above"))
}
