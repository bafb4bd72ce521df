//! The host dispatcher boundary: reified effects, error envelopes,
//! capability gating, effect ordering, and host gas accounting.

use std::{cell::RefCell, rc::Rc};

use jex::{
    Capability, CapabilitySet, Error, ErrorKind, HostErrorKind, ResourceLimits, Runtime, TableHost, compile,
    error_envelope,
};
use serde_json::json;

fn echo_host() -> TableHost {
    let mut host = TableHost::new();
    host.register("util/echo", |args| json!(args));
    host.register("math/add", |args| {
        let sum: f64 = args.iter().filter_map(serde_json::Value::as_f64).sum();
        json!(sum)
    });
    host.register("util/fail", |_| {
        error_envelope(HostErrorKind::IOError, "disk on fire", json!({"device": "sda"}))
    });
    host
}

// === Dispatch ===

#[test]
fn host_forms_evaluate_command_and_arguments() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let value = rt
        .eval(&json!(["host", "@math/add", ["+", 1, 2], 4]))
        .unwrap();
    assert_eq!(value.as_number(), Some(7.0));
}

#[test]
fn host_command_id_may_be_computed() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let value = rt
        .eval(&json!(["host", ["str-concat", "@math/", "@add"], 2, 3]))
        .unwrap();
    assert_eq!(value.as_number(), Some(5.0));
}

#[test]
fn host_command_id_must_be_a_string() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    match rt.eval(&json!(["host", 42])) {
        Err(Error::Raise(raise)) => assert_eq!(raise.kind, ErrorKind::TypeError),
        other => panic!("expected a type error, got {other:?}"),
    }
}

#[test]
fn host_arguments_must_be_pure_data() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    match rt.eval(&json!(["host", "@util/echo", ["lambda", ["x"], "x"]])) {
        Err(Error::Raise(raise)) => assert_eq!(raise.kind, ErrorKind::TypeError),
        other => panic!("expected a type error, got {other:?}"),
    }
}

// === Error envelopes ===

#[test]
fn error_envelopes_become_catchable_host_errors() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let program = json!(["try",
        ["host", "@util/fail"],
        ["lambda", ["e"], ["get", "e", "@type"]]]);
    assert_eq!(rt.eval(&program).unwrap().as_str(), Some("HostError"));
}

#[test]
fn unknown_commands_raise_command_not_found() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let program = json!(["try",
        ["host", "@no/such/command"],
        ["lambda", ["e"], ["get-path", "e", "@details.type"]]]);
    assert_eq!(rt.eval(&program).unwrap().as_str(), Some("CommandNotFound"));
}

#[test]
fn uncaught_host_errors_surface_to_the_caller() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    match rt.eval(&json!(["host", "@util/fail"])) {
        Err(Error::Raise(raise)) => {
            assert_eq!(raise.kind, ErrorKind::HostError);
            assert!(raise.message.contains("disk on fire"));
        }
        other => panic!("expected a host error, got {other:?}"),
    }
}

// === Capabilities ===

#[test]
fn capability_denials_are_permission_errors() {
    let host = echo_host().with_capabilities(CapabilitySet::new(vec![Capability::Command(
        "math/add".to_owned(),
    )]));
    let mut rt = Runtime::with_host(ResourceLimits::default(), host);
    assert_eq!(
        rt.eval(&json!(["host", "@math/add", 1, 2])).unwrap().as_number(),
        Some(3.0)
    );
    let program = json!(["try",
        ["host", "@util/echo", 1],
        ["lambda", ["e"], ["get-path", "e", "@details.type"]]]);
    assert_eq!(rt.eval(&program).unwrap().as_str(), Some("PermissionDenied"));
}

// === Effect ordering ===

/// Host dispatcher that records the order of dispatched commands.
#[derive(Debug, Default)]
struct RecordingHost {
    seen: Rc<RefCell<Vec<String>>>,
}

impl jex::HostDispatcher for RecordingHost {
    fn dispatch(&mut self, command: &str, _args: &[serde_json::Value]) -> serde_json::Value {
        self.seen.borrow_mut().push(command.to_owned());
        json!(null)
    }
}

#[test]
fn do_sequences_observe_host_effects_in_order() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let host = RecordingHost { seen: Rc::clone(&seen) };
    let mut rt = Runtime::with_host(ResourceLimits::default(), host);
    rt.eval(&json!(["do",
        ["host", "@a"],
        ["host", "@b"],
        ["host", "@c"]]))
        .unwrap();
    assert_eq!(*seen.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn the_stack_machine_observes_the_same_order() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let host = RecordingHost { seen: Rc::clone(&seen) };
    let mut rt = Runtime::with_host(ResourceLimits::default(), host);
    let instructions = compile(&json!(["do", ["host", "@a"], ["host", "@b"]]));
    rt.exec(&instructions).unwrap();
    assert_eq!(*seen.borrow(), vec!["a", "b"]);
}

// === Host gas ===

#[test]
fn host_calls_charge_by_the_policy_tree() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let before = rt.budget().gas_used();
    rt.eval(&json!(["host", "@math/add", 1, 2])).unwrap();
    let charged = rt.budget().gas_used() - before;
    // default policy prices the math namespace at 10, plus the cost of
    // evaluating the form's operands
    assert!(charged >= 10, "expected at least the namespace cost, got {charged}");
    assert!(charged < 100, "expected less than the global default, got {charged}");
}

#[test]
fn expensive_host_namespaces_exhaust_small_budgets() {
    let mut rt = Runtime::with_host(ResourceLimits::default().max_gas(500), echo_host());
    match rt.eval(&json!(["host", "@crypto/sign", "@payload"])) {
        Err(Error::Resource(err)) => assert_eq!(err.kind_name(), "GasExhausted"),
        other => panic!("expected gas exhaustion, got {other:?}"),
    }
}

// === Value responses ===

#[test]
fn host_responses_become_plain_values() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let value = rt.eval(&json!(["host", "@util/echo", 1, "@two", [3]])).unwrap();
    let items = value.as_list().unwrap();
    assert_eq!(items[0].as_number(), Some(1.0));
    assert_eq!(items[1].as_str(), Some("two"));
    assert_eq!(items[2].as_list().unwrap()[0].as_number(), Some(3.0));
}

#[test]
fn host_error_details_reach_the_handler() {
    let mut rt = Runtime::with_host(ResourceLimits::default(), echo_host());
    let program = json!(["try",
        ["host", "@util/fail"],
        ["lambda", ["e"], ["get-path", "e", "@details.details.device"]]]);
    assert_eq!(rt.eval(&program).unwrap().as_str(), Some("sda"));
}

#[test]
fn null_host_rejects_everything() {
    let mut rt = Runtime::new();
    let program = json!(["try",
        ["host", "@anything"],
        ["lambda", ["e"], ["get-path", "e", "@details.type"]]]);
    assert_eq!(rt.eval(&program).unwrap().as_str(), Some("CommandNotFound"));
}
