//! Recursive tree evaluator over the source AST.
//!
//! Literals evaluate to themselves, `@`-strings are string literals, bare
//! strings resolve through the environment chain, objects evaluate their
//! keys and values, and non-empty arrays are special forms or
//! applications. Runs to completion or failure; only the stack machine
//! can suspend.

use indexmap::IndexMap;

use crate::{
    ast::{self, string_literal},
    env::EnvId,
    error::{EvalResult, Raise},
    forms,
    host::HostDispatcher,
    resource::gas,
    runtime::Runtime,
    value::{Json, Value},
};

impl<H: HostDispatcher> Runtime<H> {
    /// Evaluates an expression in the given environment.
    pub(crate) fn eval_in(&mut self, expr: &Json, env: EnvId) -> EvalResult<Value> {
        self.budget.check_time()?;
        match expr {
            Json::Null | Json::Bool(_) | Json::Number(_) => {
                self.budget.consume_gas(gas::LITERAL)?;
                Ok(Value::from_json(expr))
            }
            Json::String(s) => self.eval_string(s, env),
            Json::Object(entries) => self.eval_dict(entries, env),
            Json::Array(items) if items.is_empty() => {
                self.budget.consume_gas(gas::LIST_CREATE)?;
                Ok(Value::list(vec![]))
            }
            Json::Array(items) => {
                if let Some((form, tail)) = ast::special_form(expr) {
                    forms::eval_special(self, form, tail, env, tree_sub_eval)
                } else {
                    self.eval_application(items, env)
                }
            }
        }
    }

    fn eval_string(&mut self, s: &str, env: EnvId) -> EvalResult<Value> {
        if let Some(literal) = string_literal(s) {
            self.budget.consume_gas(gas::LITERAL)?;
            self.budget.check_string_length(literal.len())?;
            return Ok(Value::string(literal));
        }
        self.budget.consume_gas(gas::VARIABLE)?;
        match self.envs.lookup(env, s) {
            Some(value) => Ok(value.clone()),
            None => Err(Raise::undefined(s).into()),
        }
    }

    fn eval_dict(&mut self, entries: &serde_json::Map<String, Json>, env: EnvId) -> EvalResult<Value> {
        self.budget
            .consume_gas(gas::DICT_CREATE + entries.len() as u64 * gas::DICT_PER_ITEM)?;
        let mut out = IndexMap::with_capacity(entries.len());
        for (key_expr, value_expr) in entries {
            let key = self.eval_string(key_expr, env)?;
            let Value::String(key) = key else {
                return Err(Raise::type_error(format!(
                    "dict keys must evaluate to strings, got {}",
                    key.kind_name()
                ))
                .into());
            };
            let value = self.eval_in(value_expr, env)?;
            out.insert(key, value);
        }
        let result = Value::map(out);
        self.budget.charge_value(&result)?;
        Ok(result)
    }

    fn eval_application(&mut self, items: &[Json], env: EnvId) -> EvalResult<Value> {
        let head = &items[0];
        let f = match head {
            Json::String(s) if string_literal(s).is_none() => match self.envs.lookup(env, s) {
                Some(value) => value.clone(),
                None => return Err(Raise::undefined(s).into()),
            },
            other => self.eval_in(other, env)?,
        };
        let mut args = Vec::with_capacity(items.len() - 1);
        for arg in &items[1..] {
            args.push(self.eval_in(arg, env)?);
        }
        self.apply_value(&f, args)
    }
}

fn tree_sub_eval<H: HostDispatcher>(rt: &mut Runtime<H>, expr: &Json, env: EnvId) -> EvalResult<Value> {
    rt.eval_in(expr, env)
}
