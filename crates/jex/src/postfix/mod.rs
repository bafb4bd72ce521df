//! Postfix compilation and the stack machine.
//!
//! The compiled form of an expression is a linear instruction sequence:
//! literals push themselves, symbols push their binding, and an arity
//! followed by an operator pops that many values and applies the
//! operator. Special forms cannot be flattened this way and ride along as
//! tagged source expressions that a sub-evaluator handles in place.
//!
//! The sequence is itself a JSON document, so compiled programs travel
//! the same wire as everything else — and because the machine's entire
//! state is a value stack, a program counter, the instructions, and an
//! environment handle, execution can stop between any two instructions
//! and resume on another machine.

pub use compiler::{compile, decompile};
pub use instr::{Instr, decode_instructions, encode_instructions};
pub use vm::{Progress, StackState};

mod compiler;
mod instr;
mod vm;
