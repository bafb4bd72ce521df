//! Step-bounded execution and suspended-state handling: suspension
//! between instructions, state JSON roundtrips, resumption on a fresh
//! runtime, and budget continuity across the boundary.

use jex::{Progress, ResourceLimits, Runtime, StackState, compile, decode_instructions, encode_instructions};
use serde_json::json;

fn nested_arithmetic() -> serde_json::Value {
    json!(["*", ["+", 10, 20], ["-", 100, 50]])
}

// === Step-bounded execution ===

#[test]
fn two_steps_at_a_time_reaches_the_same_result() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());

    let mut progress = rt.exec_partial(&instructions, 2).unwrap();
    let mut rounds = 1;
    let value = loop {
        match progress {
            Progress::Complete(value) => break value,
            Progress::Suspended(state) => {
                assert!(rounds < 20, "execution did not converge");
                rounds += 1;
                progress = rt.resume(state, 2).unwrap();
            }
        }
    };
    assert_eq!(value.as_number(), Some(1500.0));
    assert!(rounds > 1, "expected at least one suspension");
}

#[test]
fn a_generous_step_budget_completes_in_one_slice() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());
    let progress = rt.exec_partial(&instructions, 1000).unwrap();
    assert_eq!(progress.into_complete().unwrap().as_number(), Some(1500.0));
}

#[test]
fn suspension_preserves_the_partial_stack() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());
    let state = rt.exec_partial(&instructions, 2).unwrap().into_suspended().unwrap();
    assert_eq!(state.pc, 2);
    assert_eq!(state.stack.len(), 2);
    assert_eq!(state.stack[0].as_number(), Some(10.0));
    assert_eq!(state.stack[1].as_number(), Some(20.0));
}

#[test]
fn special_forms_run_inside_a_single_step() {
    let mut rt = Runtime::new();
    let instructions = compile(&json!(["if", ["<", 1, 2], ["+", 1, 2], 0]));
    // one special-form instruction: completes in one step
    let progress = rt.exec_partial(&instructions, 1).unwrap();
    assert_eq!(progress.into_complete().unwrap().as_number(), Some(3.0));
}

// === State serialization ===

#[test]
fn suspended_state_roundtrips_through_json_on_a_fresh_runtime() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());
    let mut progress = rt.exec_partial(&instructions, 2).unwrap();

    // after every suspension, ship the state through JSON to a brand-new
    // runtime and continue there
    let value = loop {
        match progress {
            Progress::Complete(value) => break value,
            Progress::Suspended(state) => {
                let doc = rt.encode_state(&state).unwrap();
                let doc: serde_json::Value =
                    serde_json::from_str(&serde_json::to_string(&doc).unwrap()).unwrap();
                rt = Runtime::new();
                let restored = rt.decode_state_verified(&doc).unwrap();
                progress = rt.resume(restored, 2).unwrap();
            }
        }
    };
    assert_eq!(value.as_number(), Some(1500.0));
}

#[test]
fn state_documents_carry_the_machine_fields() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());
    let state = rt.exec_partial(&instructions, 3).unwrap().into_suspended().unwrap();
    let doc = rt.encode_state(&state).unwrap();

    assert!(doc.get("stack").is_some());
    assert_eq!(doc["pc"], json!(3));
    assert_eq!(doc["instructions"], encode_instructions(&state.instructions));
    assert!(doc.get("env").is_some());
    assert!(doc.get("budget_checkpoint").is_some());
    assert!(doc.get("prelude_hash").is_some());
}

#[test]
fn resuming_a_state_with_environment_bindings_works_across_runtimes() {
    let mut rt = Runtime::new();
    rt.eval(&json!(["def", "base", 100])).unwrap();
    let instructions = compile(&json!(["+", "base", ["*", 2, 3]]));

    let state = rt.exec_partial(&instructions, 1).unwrap().into_suspended().unwrap();
    let doc = rt.encode_state(&state).unwrap();

    let mut other = Runtime::new();
    let restored = other.decode_state(&doc).unwrap();
    let mut progress = other.resume(restored, 2).unwrap();
    let value = loop {
        match progress {
            Progress::Complete(value) => break value,
            Progress::Suspended(state) => progress = other.resume(state, 2).unwrap(),
        }
    };
    assert_eq!(value.as_number(), Some(106.0));
}

// === Budget continuity ===

#[test]
fn gas_usage_accumulates_across_suspensions() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());
    let mut last_gas = 0;
    let mut progress = rt.exec_partial(&instructions, 2).unwrap();
    loop {
        match progress {
            Progress::Complete(_) => break,
            Progress::Suspended(state) => {
                assert!(state.checkpoint.gas_used >= last_gas, "gas went backwards");
                last_gas = state.checkpoint.gas_used;
                progress = rt.resume(state, 2).unwrap();
            }
        }
    }
    // total must match a straight run of the same program
    let mut straight = Runtime::new();
    straight.exec(&instructions).unwrap();
    assert_eq!(rt.budget().gas_used(), straight.budget().gas_used());
}

#[test]
fn gas_exhaustion_under_a_step_budget_suspends_instead_of_failing() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_gas(5));
    let instructions = compile(&nested_arithmetic());
    let mut progress = rt.exec_partial(&instructions, 100).unwrap();
    // the budget trips mid-program; the machine hands back a resumable
    // state rather than an error
    let state: StackState = match progress {
        Progress::Suspended(state) => state,
        Progress::Complete(_) => panic!("expected suspension from gas exhaustion"),
    };
    assert!(state.pc < state.instructions.len());

    // a runtime with a bigger budget finishes the job
    let doc = rt.encode_state(&state).unwrap();
    let mut bigger = Runtime::with_limits(ResourceLimits::default().max_gas(1_000));
    let restored = bigger.decode_state(&doc).unwrap();
    progress = bigger.resume(restored, 100).unwrap();
    assert_eq!(progress.into_complete().unwrap().as_number(), Some(1500.0));
}

#[test]
fn unbounded_execution_propagates_gas_exhaustion() {
    let mut rt = Runtime::with_limits(ResourceLimits::default().max_gas(5));
    let instructions = compile(&nested_arithmetic());
    let err = rt.exec(&instructions).unwrap_err();
    assert_eq!(err.kind_name(), "GasExhausted");
}

// === Wire instruction documents ===

#[test]
fn compiled_documents_execute_after_a_wire_roundtrip() {
    let mut rt = Runtime::new();
    let instructions = compile(&nested_arithmetic());
    let wire = encode_instructions(&instructions);
    let decoded = decode_instructions(&wire).unwrap();
    assert_eq!(decoded, instructions);
    assert_eq!(rt.exec(&decoded).unwrap().as_number(), Some(1500.0));
}
