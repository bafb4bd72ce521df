//! Resource metering: gas, wall-clock, stack depth, collection and
//! string caps, and the host gas policy.

use jex::{Error, Runtime, ResourceLimits, compile};
use serde_json::json;

fn resource_kind(result: Result<jex::Value, Error>) -> &'static str {
    match result {
        Err(Error::Resource(err)) => err.kind_name(),
        other => panic!("expected a resource error, got {other:?}"),
    }
}

// === Gas ===

#[test]
fn unlimited_runtimes_still_meter_gas() {
    let mut rt = Runtime::new();
    rt.eval(&json!(["+", 1, 2])).unwrap();
    // two literals plus one binary arithmetic op
    assert_eq!(rt.budget().gas_used(), 5);
}

#[test]
fn gas_limits_stop_runaway_evaluation() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_gas(50));
    let program = json!(["do",
        ["def", "loop", ["lambda", ["n"], ["loop", ["+", "n", 1]]]],
        ["loop", 0]]);
    assert_eq!(resource_kind(rt.eval(&program)), "GasExhausted");
}

#[test]
fn gas_costs_are_deterministic() {
    let program = json!(["let", [["x", 2]], ["*", "x", ["+", "x", 3]]]);
    let mut a = Runtime::new();
    let mut b = Runtime::new();
    a.eval(&program).unwrap();
    b.eval(&program).unwrap();
    assert_eq!(a.budget().gas_used(), b.budget().gas_used());
}

// === Stack depth ===

#[test]
fn deep_recursion_overflows_the_call_stack() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_stack_depth(32));
    let program = json!(["do",
        ["def", "down", ["lambda", ["n"],
            ["if", ["<=", "n", 0], 0, ["down", ["-", "n", 1]]]]],
        ["down", 1000]]);
    assert_eq!(resource_kind(rt.eval(&program)), "StackOverflow");
}

#[test]
fn recursion_within_the_limit_succeeds() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_stack_depth(64));
    let program = json!(["do",
        ["def", "down", ["lambda", ["n"],
            ["if", ["<=", "n", 0], 0, ["down", ["-", "n", 1]]]]],
        ["down", 20]]);
    assert_eq!(rt.eval(&program).unwrap().as_number(), Some(0.0));
}

// === Collection and string caps ===

#[test]
fn collection_size_limits_apply_to_created_lists() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_collection_size(3));
    assert_eq!(
        resource_kind(rt.eval(&json!(["list", 1, 2, 3, 4]))),
        "MemoryExhausted"
    );
    let mut ok = Runtime::with_limits(ResourceLimits::default().max_collection_size(3));
    assert!(ok.eval(&json!(["list", 1, 2, 3])).is_ok());
}

#[test]
fn string_length_limits_apply_to_created_strings() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_string_length(8));
    assert_eq!(
        resource_kind(rt.eval(&json!(["str-concat", "@aaaa", "@bbbb", "@c"]))),
        "MemoryExhausted"
    );
}

#[test]
fn memory_limits_account_for_produced_collections() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_memory(64));
    let program = json!(["do",
        ["def", "xs", ["list", 1, 2, 3, 4, 5, 6, 7, 8]],
        ["concat", "xs", "xs", "xs", "xs"]]);
    assert_eq!(resource_kind(rt.eval(&program)), "MemoryExhausted");
}

// === Wall clock ===

#[test]
fn time_limits_trip_at_an_instruction_boundary() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_time_ms(0));
    std::thread::sleep(std::time::Duration::from_millis(5));
    let instructions = compile(&json!(["+", 1, 2]));
    let err = rt.exec(&instructions).unwrap_err();
    assert_eq!(err.kind_name(), "TimeExhausted");
}

// === Checkpoints ===

#[test]
fn checkpoints_capture_and_restore_cumulative_usage() {
    let mut rt = Runtime::new();
    rt.eval(&json!(["+", 1, 2, 3])).unwrap();
    let gas_before = rt.budget().gas_used();
    let snapshot = rt.budget().checkpoint();
    assert_eq!(snapshot.gas_used, gas_before);
    assert_eq!(snapshot.stack_depth, 0);
}
