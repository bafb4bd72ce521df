//! Special-form evaluation, shared by both evaluators.
//!
//! Each form receives its operand expressions unevaluated plus a
//! sub-evaluation function: the tree evaluator passes its own recursion,
//! the stack machine passes compile-then-execute. Keeping one
//! implementation here is what makes the two evaluators observably
//! equivalent on every special form.

use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    ast::{SpecialForm, string_literal},
    env::EnvId,
    error::{Error, EvalResult, Raise},
    host::{HostDispatcher, parse_error_envelope},
    resource::gas,
    runtime::Runtime,
    value::{Closure, Json, Value},
};

/// Sub-evaluation hook: how this evaluator reduces an operand expression.
pub(crate) type SubEval<H> = fn(&mut Runtime<H>, &Json, EnvId) -> EvalResult<Value>;

fn form_cost(form: SpecialForm) -> u64 {
    match form {
        SpecialForm::Quote => gas::QUOTE,
        SpecialForm::If => gas::IF,
        SpecialForm::Do => gas::DO,
        SpecialForm::Def => gas::DEF,
        SpecialForm::Lambda => gas::LAMBDA_CREATE,
        SpecialForm::Let => gas::LET,
        SpecialForm::Try => gas::TRY,
        // host gas is charged separately from the policy tree
        SpecialForm::Host => gas::LITERAL,
        SpecialForm::Where | SpecialForm::Transform => gas::QUERY,
    }
}

pub(crate) fn eval_special<H: HostDispatcher>(
    rt: &mut Runtime<H>,
    form: SpecialForm,
    tail: &[Json],
    env: EnvId,
    eval: SubEval<H>,
) -> EvalResult<Value> {
    rt.budget.consume_gas(form_cost(form))?;
    match form {
        SpecialForm::Quote => eval_quote(rt, tail),
        SpecialForm::If => eval_if(rt, tail, env, eval),
        SpecialForm::Do => eval_do(rt, tail, env, eval),
        SpecialForm::Def => eval_def(rt, tail, env, eval),
        SpecialForm::Lambda => eval_lambda(rt, tail, env),
        SpecialForm::Let => eval_let(rt, tail, env, eval),
        SpecialForm::Try => eval_try(rt, tail, env, eval),
        SpecialForm::Host => eval_host(rt, tail, env, eval),
        SpecialForm::Where => eval_where(rt, tail, env, eval),
        SpecialForm::Transform => eval_transform(rt, tail, env, eval),
    }
}

fn eval_quote<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json]) -> EvalResult<Value> {
    let [quoted] = expect_operands("quote", tail)?;
    let value = Value::from_json(quoted);
    rt.budget.charge_value(&value)?;
    Ok(value)
}

fn eval_if<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    let [test, then_expr, else_expr] = expect_operands("if", tail)?;
    let branch = if eval(rt, test, env)?.is_truthy() {
        then_expr
    } else {
        else_expr
    };
    eval(rt, branch, env)
}

fn eval_do<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    let mut result = Value::Null;
    for expr in tail {
        result = eval(rt, expr, env)?;
    }
    Ok(result)
}

/// `def` installs a placeholder binding before evaluating the value
/// expression in the same environment, which is what lets a definition
/// refer to itself.
fn eval_def<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    let [name_expr, value_expr] = expect_operands("def", tail)?;
    let name = symbol_operand("def name", name_expr)?;
    rt.envs.define(env, name, Value::Null);
    let value = eval(rt, value_expr, env)?;
    rt.envs.define(env, name, value.clone());
    Ok(value)
}

fn eval_lambda<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId) -> EvalResult<Value> {
    let [params_expr, body] = expect_operands("lambda", tail)?;
    let Some(params_json) = params_expr.as_array() else {
        return Err(Raise::syntax("lambda params must be a list of strings").into());
    };
    let mut params: SmallVec<[String; 4]> = SmallVec::with_capacity(params_json.len());
    for param in params_json {
        let name = symbol_operand("lambda param", param)?;
        if params.iter().any(|p| p == name) {
            return Err(Raise::syntax(format!("duplicate lambda param: {name}")).into());
        }
        params.push(name.to_owned());
    }
    Ok(Value::Closure(Rc::new(Closure {
        params,
        body: body.clone(),
        env,
    })))
}

/// `let` evaluates every binding value in the outer environment (no
/// mutual recursion), then evaluates the body in one extended child.
fn eval_let<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    let [bindings_expr, body] = expect_operands("let", tail)?;
    let Some(bindings) = bindings_expr.as_array() else {
        return Err(Raise::syntax("let bindings must be a list").into());
    };
    let mut values = IndexMap::with_capacity(bindings.len());
    for binding in bindings {
        let pair = binding.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
            Raise::syntax("each let binding must be a [name, value] pair")
        })?;
        let name = symbol_operand("let binding name", &pair[0])?;
        let value = eval(rt, &pair[1], env)?;
        values.insert(name.to_owned(), value);
    }
    let let_env = rt.envs.extend(env, values);
    eval(rt, body, let_env)
}

/// `try` evaluates the body; a catchable error becomes a `{type, message}`
/// map handed to the handler function.
fn eval_try<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    let [body, handler_expr] = expect_operands("try", tail)?;
    match eval(rt, body, env) {
        Ok(value) => Ok(value),
        Err(Error::Raise(raise)) => {
            let mut error_obj = IndexMap::new();
            error_obj.insert("type".to_owned(), Value::string(raise.kind.to_string()));
            error_obj.insert("message".to_owned(), Value::String(raise.message));
            if let Some(details) = raise.details {
                error_obj.insert("details".to_owned(), Value::from_json(&details));
            }
            let handler = eval(rt, handler_expr, env)?;
            rt.apply_value(&handler, vec![Value::map(error_obj)])
        }
        Err(other) => Err(other),
    }
}

/// `host` evaluates the command ID and arguments to pure values, hands
/// the payload to the dispatcher, and raises a catchable host error when
/// the response is an error envelope.
fn eval_host<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    if tail.is_empty() {
        return Err(Raise::syntax("host requires at least a command id").into());
    }
    let command = eval(rt, &tail[0], env)?;
    let Value::String(command) = command else {
        return Err(Raise::type_error(format!(
            "host command id must evaluate to a string, got {}",
            command.kind_name()
        ))
        .into());
    };
    let mut args = Vec::with_capacity(tail.len() - 1);
    for arg_expr in &tail[1..] {
        let value = eval(rt, arg_expr, env)?;
        let json = value.to_json().map_err(|_| {
            Raise::type_error("host command arguments must be pure JSON-serializable values")
        })?;
        args.push(json);
    }
    rt.budget.consume_host_gas(&command)?;
    let response = rt.host.dispatch(&command, &args);
    if let Some((kind, message, details)) = parse_error_envelope(&response) {
        return Err(Raise::host(&kind, message, details).into());
    }
    let value = Value::from_json(&response);
    rt.budget.charge_value(&value)?;
    Ok(value)
}

/// `where` filters a collection by a condition evaluated in a per-item
/// scope (the item's fields plus `$`). Items whose condition raises are
/// silently excluded; resource exhaustion still propagates.
fn eval_where<H: HostDispatcher>(rt: &mut Runtime<H>, tail: &[Json], env: EnvId, eval: SubEval<H>) -> EvalResult<Value> {
    let [collection_expr, condition] = expect_operands("where", tail)?;
    let collection = eval(rt, collection_expr, env)?;
    let items = iterable_items("where", &collection)?;

    let mut kept = Vec::new();
    for item in items {
        let scope = item_scope(rt, env, &item);
        match eval(rt, condition, scope) {
            Ok(test) if test.is_truthy() => kept.push(item),
            Ok(_) | Err(Error::Raise(_)) => {}
            Err(other) => return Err(other),
        }
    }
    let result = Value::list(kept);
    rt.budget.charge_value(&result)?;
    Ok(result)
}

/// `transform` applies record operations left-to-right to one record or
/// to each record of a list. Operation names are literal tags; operation
/// arguments evaluate in the per-item scope.
fn eval_transform<H: HostDispatcher>(
    rt: &mut Runtime<H>,
    tail: &[Json],
    env: EnvId,
    eval: SubEval<H>,
) -> EvalResult<Value> {
    if tail.len() < 2 {
        return Err(Raise::syntax("transform requires data and at least one operation").into());
    }
    let data = eval(rt, &tail[0], env)?;
    let is_collection = matches!(data, Value::List(_));
    let mut items: Vec<Value> = match &data {
        Value::List(list) => list.as_ref().clone(),
        other => vec![other.clone()],
    };

    for op_expr in &tail[1..] {
        let (op_name, op_args) = parse_operation(op_expr)?;
        let mut next = Vec::with_capacity(items.len());
        for item in items {
            let scope = item_scope(rt, env, &item);
            let record = apply_operation(rt, op_name, op_args, &item, scope, eval)?;
            rt.budget.charge_value(&record)?;
            next.push(record);
        }
        items = next;
    }

    if is_collection {
        let result = Value::list(items);
        rt.budget.charge_value(&result)?;
        Ok(result)
    } else {
        Ok(items.into_iter().next().unwrap_or(Value::Null))
    }
}

fn parse_operation(expr: &Json) -> EvalResult<(&str, &[Json])> {
    let items = expr
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| Raise::syntax("transform operations must be non-empty lists"))?;
    let name = items[0]
        .as_str()
        .ok_or_else(|| Raise::syntax("transform operation name must be a string"))?;
    Ok((name, &items[1..]))
}

fn apply_operation<H: HostDispatcher>(
    rt: &mut Runtime<H>,
    op_name: &str,
    op_args: &[Json],
    item: &Value,
    scope: EnvId,
    eval: SubEval<H>,
) -> EvalResult<Value> {
    let mut record = match item.as_map() {
        Some(entries) => entries.clone(),
        None => IndexMap::new(),
    };
    match op_name {
        "assign" => {
            let [key_expr, value_expr] = expect_operands("assign", op_args)?;
            let key = eval_key(rt, key_expr, scope, eval)?;
            let value = eval(rt, value_expr, scope)?;
            record.insert(key, value);
        }
        "pick" => {
            let mut keep = Vec::with_capacity(op_args.len());
            for key_expr in op_args {
                keep.push(eval_key(rt, key_expr, scope, eval)?);
            }
            record.retain(|key, _| keep.iter().any(|k| k == key));
        }
        "omit" => {
            for key_expr in op_args {
                let key = eval_key(rt, key_expr, scope, eval)?;
                record.shift_remove(&key);
            }
        }
        "rename" => {
            let [old_expr, new_expr] = expect_operands("rename", op_args)?;
            let old = eval_key(rt, old_expr, scope, eval)?;
            let new = eval_key(rt, new_expr, scope, eval)?;
            if let Some(value) = record.shift_remove(&old) {
                record.insert(new, value);
            }
        }
        "default" => {
            let [key_expr, value_expr] = expect_operands("default", op_args)?;
            let key = eval_key(rt, key_expr, scope, eval)?;
            if !record.contains_key(&key) {
                let value = eval(rt, value_expr, scope)?;
                record.insert(key, value);
            }
        }
        "apply" => {
            let [key_expr, fn_expr] = expect_operands("apply", op_args)?;
            let key = eval_key(rt, key_expr, scope, eval)?;
            if let Some(old) = record.get(&key).cloned() {
                let f = eval(rt, fn_expr, scope)?;
                let new = rt.apply_value(&f, vec![old])?;
                record.insert(key, new);
            }
        }
        other => {
            return Err(Raise::syntax(format!("unknown transform operation: {other}")).into());
        }
    }
    Ok(Value::map(record))
}

fn eval_key<H: HostDispatcher>(rt: &mut Runtime<H>, expr: &Json, env: EnvId, eval: SubEval<H>) -> EvalResult<String> {
    let value = eval(rt, expr, env)?;
    match value {
        Value::String(s) => Ok(s),
        other => Err(Raise::type_error(format!(
            "record keys must evaluate to strings, got {}",
            other.kind_name()
        ))
        .into()),
    }
}

/// The per-item scope: every field of a map item plus `$` bound to the
/// whole item.
fn item_scope<H: HostDispatcher>(rt: &mut Runtime<H>, env: EnvId, item: &Value) -> EnvId {
    let mut bindings = IndexMap::new();
    if let Some(entries) = item.as_map() {
        for (k, v) in entries.iter() {
            bindings.insert(k.clone(), v.clone());
        }
    }
    bindings.insert("$".to_owned(), item.clone());
    rt.envs.extend(env, bindings)
}

fn iterable_items(what: &str, collection: &Value) -> EvalResult<Vec<Value>> {
    match collection {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Map(entries) => Ok(entries.values().cloned().collect()),
        other => Err(Raise::type_error(format!(
            "{what} requires a list or dict, got {}",
            other.kind_name()
        ))
        .into()),
    }
}

fn expect_operands<'a, const N: usize>(what: &str, operands: &'a [Json]) -> EvalResult<&'a [Json; N]> {
    operands
        .try_into()
        .map_err(|_| Raise::syntax(format!("{what} expects exactly {N} operands, got {}", operands.len())).into())
}

fn symbol_operand<'a>(what: &str, expr: &'a Json) -> EvalResult<&'a str> {
    match expr.as_str() {
        Some(s) if string_literal(s).is_none() => Ok(s),
        _ => Err(Raise::syntax(format!("{what} must be a plain string")).into()),
    }
}
