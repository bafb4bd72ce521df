use std::rc::Rc;

use crate::{
    env::{EnvArena, EnvId},
    error::{EvalResult, Raise},
    host::{HostDispatcher, NullHost},
    io::{PrintSink, StdSink},
    prelude::{GasClass, PreludeInfo, install_prelude},
    resource::{Budget, HostGasPolicy, ResourceLimits, gas},
    value::{Json, Value},
};

/// Primary interface for evaluating code.
///
/// A `Runtime` owns the environment arena, the resource budget, the host
/// dispatcher, and the print sink, and exposes both evaluation strategies:
///
/// - **Tree evaluation**: [`Runtime::eval`] walks the source AST
///   recursively and runs to completion or failure.
/// - **Stack evaluation**: [`Runtime::exec`] runs a compiled instruction
///   sequence; [`Runtime::exec_partial`] and [`Runtime::resume`] run it
///   under a step budget, yielding a serializable suspended state between
///   instructions.
///
/// A runtime is single-threaded and not safe for concurrent use; run
/// independent computations on independent runtimes.
///
/// # Example
/// ```
/// use jex::Runtime;
/// use serde_json::json;
///
/// let mut rt = Runtime::new();
/// let value = rt.eval(&json!(["+", 1, 2, 3, 4])).unwrap();
/// assert_eq!(value.as_number(), Some(10.0));
/// ```
#[derive(Debug)]
pub struct Runtime<H: HostDispatcher = NullHost> {
    pub(crate) envs: EnvArena,
    pub(crate) budget: Budget,
    pub(crate) host: H,
    pub(crate) sink: Box<dyn PrintSink>,
    pub(crate) prelude: EnvId,
    globals: EnvId,
    info: PreludeInfo,
}

impl Runtime<NullHost> {
    /// A runtime with no limits and no host commands.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::default())
    }

    /// A pure runtime with the given resource limits.
    #[must_use]
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self::with_host(limits, NullHost)
    }
}

impl Default for Runtime<NullHost> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostDispatcher> Runtime<H> {
    /// A runtime with the given limits and host dispatcher.
    #[must_use]
    pub fn with_host(limits: ResourceLimits, host: H) -> Self {
        let mut envs = EnvArena::new();
        let (prelude, info) = install_prelude(&mut envs);
        let globals = envs.extend(prelude, indexmap::IndexMap::new());
        Self {
            envs,
            budget: Budget::new(limits),
            host,
            sink: Box::new(StdSink),
            prelude,
            globals,
            info,
        }
    }

    /// Replaces the print sink (stdout by default).
    #[must_use]
    pub fn with_sink(mut self, sink: impl PrintSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Replaces the host gas policy.
    pub fn set_host_gas_policy(&mut self, policy: HostGasPolicy) {
        self.budget.set_policy(policy);
    }

    /// Version and content-derived ID of the local prelude.
    #[must_use]
    pub fn prelude_info(&self) -> &PreludeInfo {
        &self.info
    }

    /// Checks a declared prelude ID against the local prelude.
    pub fn verify_prelude(&self, declared: &str) -> EvalResult<()> {
        if declared == self.info.id {
            Ok(())
        } else {
            Err(crate::error::Error::PreludeMismatch {
                expected: declared.to_owned(),
                found: self.info.id.clone(),
            })
        }
    }

    #[must_use]
    pub fn envs(&self) -> &EnvArena {
        &self.envs
    }

    #[must_use]
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// The global user environment (a child of the prelude).
    #[must_use]
    pub fn globals_env(&self) -> EnvId {
        self.globals
    }

    /// Tree-evaluates an expression document in the global environment.
    pub fn eval(&mut self, expr: &Json) -> EvalResult<Value> {
        self.eval_in(expr, self.globals)
    }

    /// Evaluates a program document.
    ///
    /// A program is either a JSON array of top-level forms, or an object
    /// `{"forms": [...], "entrypoint": expr?}`. Forms evaluate in order in
    /// the global environment; the result is the entrypoint's value when
    /// present, otherwise the last form's value, otherwise `null`.
    pub fn run_program(&mut self, doc: &Json) -> EvalResult<Value> {
        match doc {
            Json::Object(entries) if entries.contains_key("forms") => {
                let forms = entries["forms"]
                    .as_array()
                    .ok_or_else(|| Raise::syntax("program 'forms' must be an array"))?;
                let mut last = Value::Null;
                for form in forms {
                    last = self.eval(form)?;
                }
                match entries.get("entrypoint") {
                    Some(entry) => self.eval(entry),
                    None => Ok(last),
                }
            }
            Json::Array(items) if items.is_empty() => Ok(Value::Null),
            Json::Array(items) if items[0].is_array() => {
                let mut last = Value::Null;
                for form in items {
                    last = self.eval(form)?;
                }
                Ok(last)
            }
            expr => self.eval(expr),
        }
    }

    /// Merges a map of name→value bindings into the global environment.
    ///
    /// This is the in-memory module contract: a loaded module is just a
    /// map of exported names.
    pub fn merge_bindings(&mut self, bindings: impl IntoIterator<Item = (String, Value)>) {
        for (name, value) in bindings {
            self.envs.define(self.globals, name, value);
        }
    }

    /// Applies a callable value to already-evaluated arguments.
    ///
    /// Closures are arity-checked, their captured chain is reattached to
    /// the local prelude, and the body is evaluated in a child of the
    /// captured environment under stack-depth accounting.
    pub(crate) fn apply_value(&mut self, f: &Value, args: Vec<Value>) -> EvalResult<Value> {
        match f {
            Value::Closure(c) => {
                let c = Rc::clone(c);
                if args.len() != c.params.len() {
                    return Err(Raise::arity("closure", c.params.len(), args.len()).into());
                }
                self.budget.consume_gas(gas::FUNCTION_CALL)?;
                self.envs.reattach_prelude(c.env, self.prelude);
                self.budget.enter_call()?;
                let bindings = c.params.iter().cloned().zip(args).collect();
                let call_env = self.envs.extend(c.env, bindings);
                let result = self.eval_in(&c.body, call_env);
                self.budget.exit_call();
                let value = result?;
                self.budget.charge_value(&value)?;
                Ok(value)
            }
            Value::Builtin(b) => {
                self.budget.consume_gas(op_gas(b.gas_class(), args.len()))?;
                let value = b.call(self, args)?;
                self.budget.charge_value(&value)?;
                Ok(value)
            }
            other => Err(Raise::type_error(format!(
                "cannot call non-callable value of kind {}",
                other.kind_name()
            ))
            .into()),
        }
    }
}

/// Gas for dispatching an operator: binary applications pay the base
/// cost, other arities pay base plus one per argument.
pub(crate) fn op_gas(class: GasClass, arity: usize) -> u64 {
    let base = match class {
        GasClass::Arithmetic => gas::ARITHMETIC,
        GasClass::Comparison => gas::COMPARISON,
        GasClass::Logical => gas::LOGICAL,
        GasClass::Call => gas::FUNCTION_CALL,
    };
    if arity == 2 { base } else { base + arity as u64 }
}
