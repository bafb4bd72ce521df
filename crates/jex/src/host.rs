//! The host dispatcher boundary.
//!
//! `host` is the only way interpreted code produces a side effect. The
//! evaluator reduces a `host` form to a pure-JSON payload and hands it to
//! a [`HostDispatcher`]; the dispatcher answers with pure JSON — either a
//! result value or a distinguished error envelope. Interpreted code can
//! never construct a host capability: the set of recognized commands is
//! entirely the receiver's choice, and an allowlist narrows it further.

use std::fmt;

use ahash::{AHashMap, AHashSet};
use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Json;

/// Key marking a host error envelope: `{"$jsl_host_error": {...}}`.
pub const HOST_ERROR_KEY: &str = "$jsl_host_error";

/// Error kinds a dispatcher may return in an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum HostErrorKind {
    CommandNotFound,
    InvalidArgumentCount,
    InvalidArgumentType,
    PermissionDenied,
    IOError,
    UnhandledHostError,
    InvalidRequestFormat,
}

/// Builds a host error envelope.
#[must_use]
pub fn error_envelope(kind: HostErrorKind, message: impl Into<String>, details: Json) -> Json {
    serde_json::json!({
        HOST_ERROR_KEY: {
            "type": kind.to_string(),
            "message": message.into(),
            "details": details,
        }
    })
}

/// Splits a response into `(kind, message, details)` when it is an error
/// envelope.
#[must_use]
pub(crate) fn parse_error_envelope(response: &Json) -> Option<(String, String, Json)> {
    let envelope = response.as_object()?.get(HOST_ERROR_KEY)?;
    let kind = envelope
        .get("type")
        .and_then(Json::as_str)
        .unwrap_or("UnhandledHostError")
        .to_owned();
    let message = envelope
        .get("message")
        .and_then(Json::as_str)
        .unwrap_or("an unspecified error occurred on the host")
        .to_owned();
    let details = envelope.get("details").cloned().unwrap_or(Json::Null);
    Some((kind, message, details))
}

/// Boundary for reified effects.
///
/// `dispatch` receives the evaluated command ID and pure-JSON arguments
/// and must return pure JSON: a result value on success, an error
/// envelope (see [`error_envelope`]) on failure. Implementations must not
/// panic; anything unexpected should come back as an
/// `UnhandledHostError` envelope.
pub trait HostDispatcher {
    fn dispatch(&mut self, command: &str, args: &[Json]) -> Json;
}

/// Dispatcher that recognizes no commands at all.
///
/// The most restrictive profile: the language core stays pure and every
/// `host` form raises a catchable `CommandNotFound` host error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostDispatcher for NullHost {
    fn dispatch(&mut self, command: &str, _args: &[Json]) -> Json {
        error_envelope(
            HostErrorKind::CommandNotFound,
            format!("host command '{command}' is not recognized"),
            serde_json::json!({ "command_id": command }),
        )
    }
}

/// A single permission grant for host commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Permission to invoke one specific command ID.
    Command(String),
    /// Permission to invoke any registered command.
    AnyCommand,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(name) => write!(f, "host:{name}"),
            Self::AnyCommand => f.write_str("host:*"),
        }
    }
}

/// An immutable set of granted host capabilities.
///
/// Capabilities cannot be escalated during execution; an empty set denies
/// every command, making the sandbox a pure computation environment.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    capabilities: Vec<Capability>,
}

impl CapabilitySet {
    #[must_use]
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }

    /// Denies everything.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Allows every registered command.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            capabilities: vec![Capability::AnyCommand],
        }
    }

    #[must_use]
    pub fn allows(&self, command: &str) -> bool {
        self.capabilities.iter().any(|cap| match cap {
            Capability::AnyCommand => true,
            Capability::Command(name) => name == command,
        })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Capability] {
        &self.capabilities
    }
}

type HostHandler = Box<dyn FnMut(&[Json]) -> Json>;

/// Table-driven dispatcher with capability gating.
///
/// Commands are registered as closures returning pure JSON. At dispatch
/// time the capability set is checked first (denial is a
/// `PermissionDenied` envelope), then the registry (`CommandNotFound`).
pub struct TableHost {
    handlers: AHashMap<String, HostHandler>,
    capabilities: CapabilitySet,
}

impl TableHost {
    /// An empty table allowing any command that gets registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: AHashMap::new(),
            capabilities: CapabilitySet::unrestricted(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Registers a handler for `command`.
    pub fn register(&mut self, command: impl Into<String>, handler: impl FnMut(&[Json]) -> Json + 'static) {
        self.handlers.insert(command.into(), Box::new(handler));
    }

    #[must_use]
    pub fn commands(&self) -> AHashSet<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Default for TableHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TableHost")
            .field("commands", &names)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl HostDispatcher for TableHost {
    fn dispatch(&mut self, command: &str, args: &[Json]) -> Json {
        if !self.capabilities.allows(command) {
            return error_envelope(
                HostErrorKind::PermissionDenied,
                format!("host command '{command}' is not permitted"),
                serde_json::json!({ "command_id": command, "required": format!("host:{command}") }),
            );
        }
        match self.handlers.get_mut(command) {
            Some(handler) => handler(args),
            None => error_envelope(
                HostErrorKind::CommandNotFound,
                format!("host command '{command}' is not recognized"),
                serde_json::json!({ "command_id": command }),
            ),
        }
    }
}

/// Processes a raw wire request of the form `["host", commandId, args...]`.
///
/// Malformed requests come back as `InvalidRequestFormat` envelopes
/// rather than errors: the dispatcher boundary always answers with data.
pub fn process_request<H: HostDispatcher>(host: &mut H, request: &Json) -> Json {
    let Some(items) = request.as_array() else {
        return invalid_request(request);
    };
    if items.len() < 2 || items[0].as_str() != Some("host") {
        return invalid_request(request);
    }
    let Some(command) = items[1].as_str() else {
        return invalid_request(request);
    };
    host.dispatch(command, &items[2..])
}

fn invalid_request(request: &Json) -> Json {
    let preview: String = request.to_string().chars().take(100).collect();
    error_envelope(
        HostErrorKind::InvalidRequestFormat,
        "request does not conform to the host protocol structure",
        serde_json::json!({ "request_preview": preview }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_host_answers_command_not_found() {
        let mut host = NullHost;
        let response = host.dispatch("file/read", &[]);
        let (kind, _, _) = parse_error_envelope(&response).unwrap();
        assert_eq!(kind, "CommandNotFound");
    }

    #[test]
    fn table_host_routes_registered_commands() {
        let mut host = TableHost::new();
        host.register("math/add", |args| {
            let sum: f64 = args.iter().filter_map(Json::as_f64).sum();
            serde_json::json!(sum)
        });
        let response = host.dispatch("math/add", &[serde_json::json!(1), serde_json::json!(2)]);
        assert_eq!(response, serde_json::json!(3.0));
    }

    #[test]
    fn capability_set_gates_commands() {
        let mut host = TableHost::new()
            .with_capabilities(CapabilitySet::new(vec![Capability::Command("echo".into())]));
        host.register("echo", |args| Json::Array(args.to_vec()));
        host.register("secret", |_| Json::Null);

        assert!(parse_error_envelope(&host.dispatch("echo", &[])).is_none());
        let (kind, _, _) = parse_error_envelope(&host.dispatch("secret", &[])).unwrap();
        assert_eq!(kind, "PermissionDenied");
    }

    #[test]
    fn process_request_validates_the_wire_shape() {
        let mut host = NullHost;
        let response = process_request(&mut host, &serde_json::json!(["not-host", "x"]));
        let (kind, _, _) = parse_error_envelope(&response).unwrap();
        assert_eq!(kind, "InvalidRequestFormat");

        let response = process_request(&mut host, &serde_json::json!(["host", "anything"]));
        let (kind, _, _) = parse_error_envelope(&response).unwrap();
        assert_eq!(kind, "CommandNotFound");
    }
}
