use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{resource::ResourceError, value::Json};

/// Kinds of runtime errors that interpreted code can observe and catch
/// with `try`.
///
/// The kind name (e.g. `"TypeError"`) is what a `try` handler sees in the
/// `type` field of its error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Structurally malformed expression (wrong shape for a special form,
    /// non-string parameter name, and so on).
    SyntaxError,
    /// A symbol that resolves nowhere in the environment chain.
    UndefinedSymbol,
    /// Parameter/argument count mismatch when applying a closure or builtin.
    ArityError,
    /// Wrong kind of value for an operation, including a non-callable in
    /// operator position.
    TypeError,
    /// Division or modulo with a zero divisor.
    ZeroDivision,
    /// An error envelope returned by the host dispatcher.
    HostError,
    /// Raised by the `error` builtin from interpreted code.
    UserError,
}

/// A catchable runtime error.
///
/// `try` converts a raise into a `{type, message}` map (plus `details` when
/// present) and applies the handler to it. Anything that is not a `Raise`
/// (resource exhaustion, broken stack invariants) is not catchable.
#[derive(Debug, Clone, PartialEq)]
pub struct Raise {
    pub kind: ErrorKind,
    pub message: String,
    /// Extra structured payload; used by host errors to carry the
    /// dispatcher's error kind and details.
    pub details: Option<Json>,
}

impl Raise {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    pub fn undefined(name: &str) -> Self {
        Self::new(ErrorKind::UndefinedSymbol, format!("unbound symbol: {name}"))
    }

    pub fn arity(what: &str, expected: usize, got: usize) -> Self {
        Self::new(
            ErrorKind::ArityError,
            format!("arity mismatch: {what} expects {expected} arguments, got {got}"),
        )
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn zero_division() -> Self {
        Self::new(ErrorKind::ZeroDivision, "division by zero")
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserError, message)
    }

    pub fn host(host_kind: &str, message: impl Into<String>, details: Json) -> Self {
        Self {
            kind: ErrorKind::HostError,
            message: message.into(),
            details: Some(serde_json::json!({ "type": host_kind, "details": details })),
        }
    }
}

impl fmt::Display for Raise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Top-level error type for every fallible operation in the crate.
///
/// The arms split into two families:
/// - `Raise` is catchable by `try` inside interpreted code.
/// - Everything else surfaces to the embedding caller: resource exhaustion,
///   broken stack-machine invariants, serialization failures, and prelude
///   incompatibility.
#[derive(Debug, Clone)]
pub enum Error {
    /// Catchable runtime error (see [`Raise`]).
    Raise(Raise),
    /// Uncatchable resource exhaustion (gas, memory, time, stack depth,
    /// collection/string caps).
    Resource(ResourceError),
    /// The stack machine detected a broken invariant: underflow, leftover
    /// values at end of program, malformed instruction stream.
    InvalidProgram(String),
    /// A document declared a prelude ID that does not match the local
    /// prelude.
    PreludeMismatch { expected: String, found: String },
    /// A value could not be encoded to JSON (builtin in user bindings,
    /// or a non-serializable payload).
    Encode(String),
    /// A document could not be decoded (malformed markers, unresolved
    /// references, wrong field types).
    Decode(String),
}

impl Error {
    /// The stable kind name for this error, matching what `try` handlers
    /// and callers key on.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Raise(r) => r.kind.into(),
            Self::Resource(r) => r.kind_name(),
            Self::InvalidProgram(_) => "InvalidProgram",
            Self::PreludeMismatch { .. } => "PreludeMismatch",
            Self::Encode(_) => "EncodeError",
            Self::Decode(_) => "DecodeError",
        }
    }

    /// Returns `true` when a `try` form may hand this error to its handler.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Raise(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raise(r) => write!(f, "{}: {}", r.kind, r.message),
            Self::Resource(r) => write!(f, "{r}"),
            Self::InvalidProgram(msg) => write!(f, "invalid program: {msg}"),
            Self::PreludeMismatch { expected, found } => {
                write!(f, "prelude mismatch: document declares {expected}, local prelude is {found}")
            }
            Self::Encode(msg) => write!(f, "encode error: {msg}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Raise> for Error {
    fn from(raise: Raise) -> Self {
        Self::Raise(raise)
    }
}

impl From<ResourceError> for Error {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

pub type EvalResult<T> = Result<T, Error>;
