//! Source-form helpers: special-form keywords, literal/symbol
//! classification, and free-variable analysis.
//!
//! The source form of a program is plain JSON. Strings beginning with `@`
//! are string literals; every other string is a symbol. A non-empty array
//! whose head is one of the keywords below is a special form; any other
//! non-empty array is a function application.

use ahash::AHashSet;
use std::str::FromStr;

use strum::{Display, EnumString};

use crate::value::Json;

/// Keywords with non-standard evaluation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SpecialForm {
    #[strum(serialize = "@", serialize = "quote")]
    Quote,
    If,
    Do,
    Def,
    Lambda,
    Let,
    Try,
    Host,
    Where,
    Transform,
}

/// Returns the string-literal payload of `s` (the text after `@`), or
/// `None` when `s` is a symbol.
#[must_use]
pub fn string_literal(s: &str) -> Option<&str> {
    s.strip_prefix('@')
}

/// Classifies `expr` as a special form, returning the keyword and its
/// operand slice.
#[must_use]
pub(crate) fn special_form(expr: &Json) -> Option<(SpecialForm, &[Json])> {
    let items = expr.as_array()?;
    let head = items.first()?.as_str()?;
    let form = SpecialForm::from_str(head).ok()?;
    Some((form, &items[1..]))
}

/// Computes the set of free variables in an expression.
///
/// Respects the binding structure of `lambda` (parameters), `def` (the
/// defined name is bound inside its own value expression, enabling
/// recursion), `do` (a `def` binds the name for subsequent siblings), and
/// `let` (binding names are visible in the body but not in the binding
/// value expressions). `quote` bodies are data and contribute nothing.
///
/// The result may include names that only resolve in the prelude; the
/// serializer filters those out when pruning captured environments.
#[must_use]
pub fn free_variables(expr: &Json) -> AHashSet<String> {
    let mut free = AHashSet::new();
    collect(expr, &AHashSet::new(), &mut free);
    free
}

/// Free variables of a closure body, with the parameters bound.
#[must_use]
pub(crate) fn free_in_closure(params: &[String], body: &Json) -> AHashSet<String> {
    let mut free = AHashSet::new();
    let bound: AHashSet<String> = params.iter().cloned().collect();
    collect(body, &bound, &mut free);
    free
}

fn collect(expr: &Json, bound: &AHashSet<String>, free: &mut AHashSet<String>) {
    match expr {
        Json::String(s) => {
            if string_literal(s).is_none() && !bound.contains(s.as_str()) {
                free.insert(s.clone());
            }
        }
        Json::Array(items) => {
            if let Some((form, tail)) = special_form(expr) {
                collect_special(form, tail, bound, free);
            } else {
                for item in items {
                    collect(item, bound, free);
                }
            }
        }
        Json::Object(entries) => {
            for (key, value) in entries {
                if string_literal(key).is_none() && !bound.contains(key.as_str()) {
                    free.insert(key.clone());
                }
                collect(value, bound, free);
            }
        }
        _ => {}
    }
}

fn collect_special(form: SpecialForm, tail: &[Json], bound: &AHashSet<String>, free: &mut AHashSet<String>) {
    match form {
        SpecialForm::Quote => {}
        SpecialForm::Lambda => {
            if tail.len() >= 2 {
                let mut inner = bound.clone();
                if let Some(params) = tail[0].as_array() {
                    inner.extend(params.iter().filter_map(Json::as_str).map(str::to_owned));
                }
                collect(&tail[1], &inner, free);
            }
        }
        SpecialForm::Def => {
            if tail.len() >= 2 {
                let mut inner = bound.clone();
                if let Some(name) = tail[0].as_str() {
                    inner.insert(name.to_owned());
                }
                collect(&tail[1], &inner, free);
            }
        }
        SpecialForm::Do => {
            let mut scope = bound.clone();
            for sub in tail {
                if let Some(name) = def_name(sub) {
                    collect(sub, &scope, free);
                    scope.insert(name.to_owned());
                } else {
                    collect(sub, &scope, free);
                }
            }
        }
        SpecialForm::Let => {
            if tail.len() >= 2 {
                let mut inner = bound.clone();
                if let Some(bindings) = tail[0].as_array() {
                    for binding in bindings {
                        if let Some(pair) = binding.as_array()
                            && pair.len() == 2
                        {
                            collect(&pair[1], bound, free);
                            if let Some(name) = pair[0].as_str() {
                                inner.insert(name.to_owned());
                            }
                        }
                    }
                }
                collect(&tail[1], &inner, free);
            }
        }
        SpecialForm::If
        | SpecialForm::Try
        | SpecialForm::Host
        | SpecialForm::Where
        | SpecialForm::Transform => {
            for sub in tail {
                collect(sub, bound, free);
            }
        }
    }
}

fn def_name(expr: &Json) -> Option<&str> {
    let items = expr.as_array()?;
    if items.len() == 3 && items[0].as_str() == Some("def") {
        items[1].as_str()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn free(expr: Json) -> AHashSet<String> {
        free_variables(&expr)
    }

    #[test]
    fn lambda_parameters_are_bound() {
        let vars = free(json!(["lambda", ["x"], ["+", "x", "y"]]));
        assert!(vars.contains("y"));
        assert!(!vars.contains("x"));
        assert!(vars.contains("+"));
    }

    #[test]
    fn def_binds_its_own_name_for_recursion() {
        let vars = free(json!(["def", "fact", ["lambda", ["n"], ["fact", "n"]]]));
        assert!(!vars.contains("fact"));
        assert!(!vars.contains("n"));
    }

    #[test]
    fn do_defs_bind_for_subsequent_siblings() {
        let vars = free(json!(["do", ["def", "a", 1], ["+", "a", "b"]]));
        assert!(!vars.contains("a"));
        assert!(vars.contains("b"));
    }

    #[test]
    fn let_values_see_the_outer_scope() {
        let vars = free(json!(["let", [["x", "y"]], ["+", "x", "z"]]));
        assert!(vars.contains("y"));
        assert!(vars.contains("z"));
        assert!(!vars.contains("x"));
    }

    #[test]
    fn quoted_expressions_are_data() {
        let vars = free(json!(["quote", ["+", "a", "b"]]));
        assert!(vars.is_empty());
    }

    #[test]
    fn string_literals_are_not_symbols() {
        let vars = free(json!(["str-concat", "@hello", "name"]));
        assert!(vars.contains("name"));
        assert!(!vars.contains("@hello"));
        assert!(!vars.contains("hello"));
    }
}
