//! Prelude builtin coverage: list/map/string operations, predicates,
//! and conversions.

use jex::{Runtime, Value};
use serde_json::json;

fn eval(expr: serde_json::Value) -> Value {
    Runtime::new().eval(&expr).unwrap()
}

fn eval_str(expr: serde_json::Value) -> String {
    eval(expr).as_str().unwrap().to_owned()
}

fn eval_num(expr: serde_json::Value) -> f64 {
    eval(expr).as_number().unwrap()
}

fn eval_bool(expr: serde_json::Value) -> bool {
    eval(expr).as_bool().unwrap()
}

// === List operations ===

#[test]
fn list_construction_and_access() {
    assert_eq!(eval(json!(["list", 1, 2, 3])).as_list().unwrap().len(), 3);
    assert_eq!(eval_num(json!(["first", ["list", 7, 8]])), 7.0);
    assert_eq!(eval(json!(["first", ["list"]])), Value::Null);
    assert_eq!(eval_num(json!(["nth", ["list", 1, 2, 3], 1])), 2.0);
    assert_eq!(eval(json!(["nth", ["list", 1], 9])), Value::Null);
    assert_eq!(eval_num(json!(["length", ["list", 1, 2, 3]])), 3.0);
    assert_eq!(eval_num(json!(["length", "@abc"])), 3.0);
}

#[test]
fn rest_drops_the_head() {
    let value = eval(json!(["rest", ["list", 1, 2, 3]]));
    let items: Vec<f64> = value.as_list().unwrap().iter().filter_map(Value::as_number).collect();
    assert_eq!(items, vec![2.0, 3.0]);
    assert_eq!(eval(json!(["rest", ["list", 1]])).as_list().unwrap().len(), 0);
}

#[test]
fn append_prepend_concat() {
    let value = eval(json!(["append", ["list", 1, 2], 3]));
    assert_eq!(value.as_list().unwrap().len(), 3);
    let value = eval(json!(["prepend", 0, ["list", 1, 2]]));
    assert_eq!(value.as_list().unwrap()[0].as_number(), Some(0.0));
    let value = eval(json!(["concat", ["list", 1], ["list", 2, 3], ["list"]]));
    assert_eq!(value.as_list().unwrap().len(), 3);
}

#[test]
fn slice_and_reverse() {
    let value = eval(json!(["slice", ["list", 1, 2, 3, 4, 5], 1, 3]));
    let items: Vec<f64> = value.as_list().unwrap().iter().filter_map(Value::as_number).collect();
    assert_eq!(items, vec![2.0, 3.0]);
    assert_eq!(eval_str(json!(["slice", "@hello", 1, 3])), "el");
    assert_eq!(eval_str(json!(["reverse", "@abc"])), "cba");
    let value = eval(json!(["reverse", ["list", 1, 2]]));
    assert_eq!(value.as_list().unwrap()[0].as_number(), Some(2.0));
}

#[test]
fn negative_slice_indices_count_from_the_end() {
    let value = eval(json!(["slice", ["list", 1, 2, 3, 4], -2]));
    assert_eq!(value.as_list().unwrap().len(), 2);
}

#[test]
fn contains_and_index() {
    assert!(eval_bool(json!(["contains?", ["list", 1, 2], 2])));
    assert!(!eval_bool(json!(["contains?", ["list", 1, 2], 9])));
    assert!(eval_bool(json!(["contains?", "@hello", "@ell"])));
    assert_eq!(eval_num(json!(["index", ["list", "@a", "@b"], "@b"])), 1.0);
    assert_eq!(eval_num(json!(["index", ["list", 1], 9])), -1.0);
}

#[test]
fn empty_predicate() {
    assert!(eval_bool(json!(["empty?", ["list"]])));
    assert!(!eval_bool(json!(["empty?", ["list", 1]])));
    assert!(eval_bool(json!(["empty?", "@"])));
}

// === Map operations ===

#[test]
fn get_set_keys_values() {
    let base = json!(["@", {"a": 1, "b": 2}]);
    assert_eq!(eval_num(json!(["get", base.clone(), "@a"])), 1.0);
    assert_eq!(eval(json!(["get", base.clone(), "@z"])), Value::Null);
    assert_eq!(eval_num(json!(["get", base.clone(), "@z", 9])), 9.0);

    let updated = eval(json!(["set", base.clone(), "@c", 3]));
    assert_eq!(updated.as_map().unwrap().len(), 3);
    // the original is untouched: values are immutable
    assert_eq!(eval(base.clone()).as_map().unwrap().len(), 2);

    let keys = eval(json!(["keys", base.clone()]));
    let keys: Vec<&str> = keys.as_list().unwrap().iter().filter_map(Value::as_str).collect();
    assert_eq!(keys, vec!["a", "b"]);

    let values = eval(json!(["values", base]));
    assert_eq!(values.as_list().unwrap().len(), 2);
}

#[test]
fn merge_is_left_to_right() {
    let value = eval(json!(["merge", ["@", {"a": 1, "b": 1}], ["@", {"b": 2}]]));
    let map = value.as_map().unwrap();
    assert_eq!(map.get("a").and_then(Value::as_number), Some(1.0));
    assert_eq!(map.get("b").and_then(Value::as_number), Some(2.0));
}

#[test]
fn has_key_checks_direct_keys() {
    assert!(eval_bool(json!(["has-key?", ["@", {"a": 1}], "@a"])));
    assert!(!eval_bool(json!(["has-key?", ["@", {"a": 1}], "@b"])));
}

#[test]
fn index_by_keys_records_by_field() {
    let value = eval(json!(["index-by",
        ["@", [{"id": "a", "n": 1}, {"id": "b", "n": 2}]],
        "@id"]));
    let map = value.as_map().unwrap();
    assert_eq!(
        map.get("b").unwrap().as_map().unwrap().get("n").and_then(Value::as_number),
        Some(2.0)
    );
}

#[test]
fn get_path_walks_maps_and_lists() {
    let base = json!(["@", {"user": {"tags": ["x", "y"], "vip": true}}]);
    assert!(eval_bool(json!(["get-path", base.clone(), "@user.vip"])));
    assert_eq!(eval_str(json!(["get-path", base.clone(), "@user.tags.1"])), "y");
    assert_eq!(eval(json!(["get-path", base, "@user.missing.deep"])), Value::Null);
}

// === String operations ===

#[test]
fn string_operations() {
    assert_eq!(eval_str(json!(["str-concat", "@a", 1, "@b"])), "a1b");
    assert_eq!(eval_str(json!(["str-upper", "@abc"])), "ABC");
    assert_eq!(eval_str(json!(["str-lower", "@ABC"])), "abc");
    assert_eq!(eval_num(json!(["str-length", "@héllo"])), 5.0);
    assert_eq!(eval_str(json!(["str-join", ["list", "@a", "@b"], "@-"])), "a-b");
}

#[test]
fn str_split_defaults_to_a_space_separator() {
    let value = eval(json!(["str-split", "@a b c"]));
    assert_eq!(value.as_list().unwrap().len(), 3);
    let value = eval(json!(["str-split", "@a,b", "@,"]));
    let parts: Vec<&str> = value.as_list().unwrap().iter().filter_map(Value::as_str).collect();
    assert_eq!(parts, vec!["a", "b"]);
}

#[test]
fn matches_applies_a_regular_expression() {
    assert!(eval_bool(json!(["matches", "@Alice", "@^[AB]"])));
    assert!(!eval_bool(json!(["matches", "@Carol", "@^[AB]"])));
}

// === Predicates and conversion ===

#[test]
fn type_predicates() {
    assert!(eval_bool(json!(["null?", null])));
    assert!(eval_bool(json!(["bool?", true])));
    assert!(eval_bool(json!(["number?", 1.5])));
    assert!(eval_bool(json!(["string?", "@s"])));
    assert!(eval_bool(json!(["list?", ["list"]])));
    assert!(eval_bool(json!(["dict?", {}])));
    assert!(eval_bool(json!(["callable?", ["lambda", ["x"], "x"]])));
    assert!(!eval_bool(json!(["callable?", 1])));
}

#[test]
fn conversions() {
    assert_eq!(eval_str(json!(["to-string", 42])), "42");
    assert_eq!(eval_str(json!(["to-string", 2.5])), "2.5");
    assert_eq!(eval_str(json!(["to-string", "@x"])), "x");
    assert_eq!(eval_num(json!(["to-number", "@3.5"])), 3.5);
    assert_eq!(eval_num(json!(["to-number", "@junk"])), 0.0);
    assert_eq!(eval_str(json!(["type-of", ["list"]])), "list");
    assert_eq!(eval_str(json!(["type-of", null])), "null");
}

#[test]
fn rounding_is_half_away_from_zero() {
    assert_eq!(eval_num(json!(["round", 2.5])), 3.0);
    assert_eq!(eval_num(json!(["round", -2.5])), -3.0);
    assert_eq!(eval_num(json!(["round", 2.344, 2])), 2.34);
}

#[test]
fn math_functions() {
    assert_eq!(eval_num(json!(["abs", -3])), 3.0);
    assert_eq!(eval_num(json!(["sqrt", 9])), 3.0);
    assert_eq!(eval_num(json!(["pow", 2, 10])), 1024.0);
    assert_eq!(eval_num(json!(["min", 3, 1, 2])), 1.0);
    assert_eq!(eval_num(json!(["max", 3, 1, 2])), 3.0);
}

#[test]
fn error_builtin_raises_a_user_error() {
    let program = json!(["try", ["error", "@boom"], ["lambda", ["e"], ["get", "e", "@type"]]]);
    assert_eq!(eval_str(program), "UserError");
}
