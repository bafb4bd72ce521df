#![doc = include_str!("../../../README.md")]

mod ast;
mod env;
mod error;
mod forms;
mod host;
mod io;
mod postfix;
mod prelude;
mod resource;
mod runtime;
mod serialize;
mod tree;
mod value;

pub use crate::{
    ast::{SpecialForm, free_variables, string_literal},
    env::{EnvArena, EnvId},
    error::{Error, ErrorKind, EvalResult, Raise},
    host::{
        Capability, CapabilitySet, HOST_ERROR_KEY, HostDispatcher, HostErrorKind, NullHost, TableHost, error_envelope,
        process_request,
    },
    io::{CollectSink, NullSink, PrintSink, StdSink},
    postfix::{Instr, Progress, StackState, compile, decode_instructions, decompile, encode_instructions},
    prelude::{BuiltinFn, PRELUDE_VERSION, PreludeInfo},
    resource::{Budget, BudgetCheckpoint, HostGasPolicy, ResourceError, ResourceLimits},
    runtime::Runtime,
    value::{Closure, Json, Value},
};
