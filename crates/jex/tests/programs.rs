//! Program documents, the module-merge contract, and print output.

use jex::{CollectSink, Runtime, Value};
use serde_json::json;

// === Program documents ===

#[test]
fn a_list_of_forms_returns_the_last_value() {
    let mut rt = Runtime::new();
    let doc = json!([
        ["def", "x", 10],
        ["def", "y", 20],
        ["+", "x", "y"]
    ]);
    assert_eq!(rt.run_program(&doc).unwrap().as_number(), Some(30.0));
}

#[test]
fn forms_objects_honor_the_entrypoint() {
    let mut rt = Runtime::new();
    let doc = json!({
        "forms": [
            ["def", "double", ["lambda", ["n"], ["*", "n", 2]]],
            ["def", "ignored", 1]
        ],
        "entrypoint": ["double", 21]
    });
    assert_eq!(rt.run_program(&doc).unwrap().as_number(), Some(42.0));
}

#[test]
fn forms_objects_without_an_entrypoint_return_the_last_form() {
    let mut rt = Runtime::new();
    let doc = json!({"forms": [["def", "x", 1], ["+", "x", 1]]});
    assert_eq!(rt.run_program(&doc).unwrap().as_number(), Some(2.0));
}

#[test]
fn empty_programs_are_null() {
    let mut rt = Runtime::new();
    assert_eq!(rt.run_program(&json!([])).unwrap(), Value::Null);
    assert_eq!(rt.run_program(&json!({"forms": []})).unwrap(), Value::Null);
}

#[test]
fn a_single_expression_is_a_program_too() {
    let mut rt = Runtime::new();
    assert_eq!(rt.run_program(&json!(["+", 1, 2])).unwrap().as_number(), Some(3.0));
}

#[test]
fn definitions_persist_across_program_runs() {
    let mut rt = Runtime::new();
    rt.run_program(&json!([["def", "base", 7]])).unwrap();
    assert_eq!(rt.run_program(&json!(["+", "base", 1])).unwrap().as_number(), Some(8.0));
}

// === Module merge contract ===

#[test]
fn merged_bindings_are_visible_to_programs() {
    let mut rt = Runtime::new();
    rt.merge_bindings([
        ("tau".to_owned(), Value::Number(6.283_185_307_179_586)),
        ("greeting".to_owned(), Value::string("hello")),
    ]);
    assert_eq!(
        rt.eval(&json!(["round", ["*", "tau", 100]])).unwrap().as_number(),
        Some(628.0)
    );
    assert_eq!(rt.eval(&json!("greeting")).unwrap().as_str(), Some("hello"));
}

#[test]
fn merged_closures_keep_working() {
    let mut source = Runtime::new();
    let f = source
        .eval(&json!(["lambda", ["x"], ["+", "x", 1]]))
        .unwrap();
    let doc = source.encode_value(&f).unwrap();

    let mut rt = Runtime::new();
    let f = rt.decode_value(&doc).unwrap();
    rt.merge_bindings([("inc".to_owned(), f)]);
    assert_eq!(rt.eval(&json!(["inc", 41])).unwrap().as_number(), Some(42.0));
}

// === Print output ===

#[test]
fn print_writes_space_separated_arguments_and_a_newline() {
    let sink = CollectSink::new();
    let mut rt = Runtime::new().with_sink(sink.clone());
    rt.eval(&json!(["print", "@hello", "@world", 42])).unwrap();
    assert_eq!(sink.output(), "hello world 42\n");
}

#[test]
fn print_renders_collections_as_json() {
    let sink = CollectSink::new();
    let mut rt = Runtime::new().with_sink(sink.clone());
    rt.eval(&json!(["print", ["list", 1, "@a"], ["@", {"k": 1}]])).unwrap();
    assert_eq!(sink.output(), "[1, \"a\"] {\"k\": 1}\n");
}

#[test]
fn print_returns_null() {
    let sink = CollectSink::new();
    let mut rt = Runtime::new().with_sink(sink.clone());
    assert_eq!(rt.eval(&json!(["print", "@x"])).unwrap(), Value::Null);
}
