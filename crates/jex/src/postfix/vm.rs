//! The stack machine.
//!
//! Executes a postfix instruction sequence over a value stack and a
//! program counter. Under a step budget, execution can stop between any
//! two instructions and return a [`StackState`] that is self-contained
//! and JSON-serializable; a fresh runtime can pick it up and continue.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    ast,
    env::EnvId,
    error::{Error, EvalResult, Raise},
    forms,
    host::HostDispatcher,
    postfix::compiler::compile,
    resource::{BudgetCheckpoint, gas},
    runtime::{Runtime, op_gas},
    value::{Closure, Json, Value},
};

use super::instr::{APPLY_OP, DICT_OP, EMPTY_LIST_OP, Instr};

/// A paused stack-machine execution.
///
/// Holds everything needed to continue: the value stack, the program
/// counter, the instructions themselves, the environment handle, and a
/// budget checkpoint so the resumed run sees the same cumulative usage.
#[derive(Debug, Clone)]
pub struct StackState {
    pub stack: Vec<Value>,
    pub pc: usize,
    pub instructions: Vec<Instr>,
    pub env: EnvId,
    pub checkpoint: BudgetCheckpoint,
}

/// Result of one step-bounded execution slice.
#[derive(Debug)]
pub enum Progress {
    /// Execution finished with a value.
    Complete(Value),
    /// The step budget ran out (or a resource limit tripped at an
    /// instruction boundary); pass the state back to continue.
    Suspended(StackState),
}

impl Progress {
    #[must_use]
    pub fn into_complete(self) -> Option<Value> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Suspended(_) => None,
        }
    }

    #[must_use]
    pub fn into_suspended(self) -> Option<StackState> {
        match self {
            Self::Suspended(state) => Some(state),
            Self::Complete(_) => None,
        }
    }
}

impl<H: HostDispatcher> Runtime<H> {
    /// Executes compiled instructions to completion in the global
    /// environment.
    pub fn exec(&mut self, instructions: &[Instr]) -> EvalResult<Value> {
        self.exec_in(instructions, self.globals_env())
    }

    /// Executes compiled instructions to completion in `env`.
    pub(crate) fn exec_in(&mut self, instructions: &[Instr], env: EnvId) -> EvalResult<Value> {
        let mut stack = Vec::new();
        let mut pc = 0;
        match self.run_machine(&mut stack, &mut pc, instructions, env, None)? {
            Some(value) => Ok(value),
            None => unreachable!("unbounded execution cannot suspend"),
        }
    }

    /// Executes at most `max_steps` instructions, starting fresh.
    ///
    /// Returns [`Progress::Complete`] when the program finished within
    /// the budget, otherwise [`Progress::Suspended`] with a resumable
    /// state. Steps count top-level dispatched instructions; an embedded
    /// special form or a called closure body runs to completion inside
    /// one step.
    pub fn exec_partial(&mut self, instructions: &[Instr], max_steps: usize) -> EvalResult<Progress> {
        let env = self.globals_env();
        let mut stack = Vec::new();
        let mut pc = 0;
        let instructions = instructions.to_vec();
        match self.run_machine(&mut stack, &mut pc, &instructions, env, Some(max_steps))? {
            Some(value) => Ok(Progress::Complete(value)),
            None => Ok(Progress::Suspended(StackState {
                stack,
                pc,
                instructions,
                env,
                checkpoint: self.budget.checkpoint(),
            })),
        }
    }

    /// Continues a suspended execution for at most `max_steps` more
    /// instructions.
    ///
    /// The budget is restored from the state's checkpoint first, so
    /// cumulative usage carries across suspensions — including across
    /// serialization onto a different machine.
    pub fn resume(&mut self, state: StackState, max_steps: usize) -> EvalResult<Progress> {
        self.budget.restore(&state.checkpoint);
        let StackState {
            mut stack,
            mut pc,
            instructions,
            env,
            ..
        } = state;
        match self.run_machine(&mut stack, &mut pc, &instructions, env, Some(max_steps))? {
            Some(value) => Ok(Progress::Complete(value)),
            None => Ok(Progress::Suspended(StackState {
                stack,
                pc,
                instructions,
                env,
                checkpoint: self.budget.checkpoint(),
            })),
        }
    }

    /// Core dispatch loop. Returns `Ok(None)` only under a step budget.
    fn run_machine(
        &mut self,
        stack: &mut Vec<Value>,
        pc: &mut usize,
        instructions: &[Instr],
        env: EnvId,
        max_steps: Option<usize>,
    ) -> EvalResult<Option<Value>> {
        let bounded = max_steps.is_some();
        let mut steps = 0usize;
        let mut watermark = stack.len();

        while *pc < instructions.len() {
            if let Some(limit) = max_steps
                && steps >= limit
            {
                return Ok(None);
            }

            // budget checks at the instruction boundary; under a step
            // budget these yield a resumable state instead of an error
            if let Err(err) = self.budget.check_time() {
                if bounded {
                    return Ok(None);
                }
                return Err(err.into());
            }
            if stack.len() > watermark {
                let grown = (stack.len() - watermark) * 8;
                watermark = stack.len();
                if let Err(err) = self.budget.allocate_memory(grown as u64) {
                    if bounded {
                        return Ok(None);
                    }
                    return Err(err.into());
                }
            }

            let snapshot = if bounded { Some(stack.clone()) } else { None };
            match self.dispatch(&instructions[*pc], stack, env) {
                Ok(()) => {
                    *pc += 1;
                    steps += 1;
                }
                Err(Error::Resource(err)) => {
                    if let Some(snapshot) = snapshot {
                        *stack = snapshot;
                        return Ok(None);
                    }
                    return Err(Error::Resource(err));
                }
                Err(other) => return Err(other),
            }
        }

        if stack.len() == 1 {
            Ok(Some(stack.pop().expect("length checked above")))
        } else {
            Err(Error::InvalidProgram(format!(
                "stack holds {} values at end of program, expected exactly one",
                stack.len()
            )))
        }
    }

    fn dispatch(&mut self, instr: &Instr, stack: &mut Vec<Value>, env: EnvId) -> EvalResult<()> {
        match instr {
            Instr::Const(json) => {
                match json {
                    Json::Object(entries) => {
                        self.budget
                            .consume_gas(gas::DICT_CREATE + entries.len() as u64 * gas::DICT_PER_ITEM)?;
                        self.budget.check_collection_size(entries.len())?;
                    }
                    Json::Array(items) => {
                        self.budget
                            .consume_gas(gas::LIST_CREATE + items.len() as u64 * gas::LIST_PER_ITEM)?;
                        self.budget.check_collection_size(items.len())?;
                    }
                    _ => self.budget.consume_gas(gas::LITERAL)?,
                }
                stack.push(Value::from_json(json));
                Ok(())
            }
            Instr::Str(s) => {
                self.budget.consume_gas(gas::LITERAL)?;
                self.budget.check_string_length(s.len())?;
                stack.push(Value::string(s));
                Ok(())
            }
            Instr::Load(name) => {
                self.budget.consume_gas(gas::VARIABLE)?;
                match self.envs.lookup(env, name) {
                    Some(value) => {
                        stack.push(value.clone());
                        Ok(())
                    }
                    None => Err(Raise::undefined(name).into()),
                }
            }
            Instr::Special(form) => {
                let Some((special, tail)) = ast::special_form(form) else {
                    return Err(Raise::syntax("malformed embedded special form").into());
                };
                let value = forms::eval_special(self, special, tail, env, stack_sub_eval)?;
                stack.push(value);
                Ok(())
            }
            Instr::Call { arity, op } => self.dispatch_call(*arity, op, stack, env),
        }
    }

    fn dispatch_call(&mut self, arity: usize, op: &str, stack: &mut Vec<Value>, env: EnvId) -> EvalResult<()> {
        match op {
            EMPTY_LIST_OP => {
                if arity != 0 {
                    return Err(Error::InvalidProgram(format!(
                        "empty-list marker takes no operands, got arity {arity}"
                    )));
                }
                self.budget.consume_gas(gas::LIST_CREATE)?;
                stack.push(Value::list(vec![]));
                Ok(())
            }
            DICT_OP => {
                if arity % 2 != 0 {
                    return Err(Raise::syntax("dict construction needs an even number of operands").into());
                }
                let entries = pop_operands(stack, arity, op)?;
                self.budget
                    .consume_gas(gas::DICT_CREATE + (arity as u64 / 2) * gas::DICT_PER_ITEM)?;
                let mut out = IndexMap::with_capacity(arity / 2);
                for pair in entries.chunks(2) {
                    let Value::String(key) = &pair[0] else {
                        return Err(Raise::type_error(format!(
                            "dict keys must be strings, got {}",
                            pair[0].kind_name()
                        ))
                        .into());
                    };
                    out.insert(key.clone(), pair[1].clone());
                }
                let value = Value::map(out);
                self.budget.charge_value(&value)?;
                stack.push(value);
                Ok(())
            }
            APPLY_OP => {
                if stack.len() < arity + 1 {
                    return Err(Error::InvalidProgram(format!(
                        "stack underflow: apply needs a function and {arity} arguments, have {}",
                        stack.len()
                    )));
                }
                let args = stack.split_off(stack.len() - arity);
                let f = stack.pop().expect("operand checked above");
                let value = self.apply_operand(f, args)?;
                stack.push(value);
                Ok(())
            }
            name => {
                let Some(resolved) = self.envs.lookup(env, name).cloned() else {
                    if ast::string_literal(name).is_some() {
                        return Err(Raise::type_error(format!("cannot call string literal '{name}'")).into());
                    }
                    return Err(Raise::undefined(name).into());
                };
                let args = pop_operands(stack, arity, name)?;
                let value = self.apply_operand(resolved, args)?;
                stack.push(value);
                Ok(())
            }
        }
    }

    /// Applies a popped operand value. Closures execute their compiled
    /// body on this machine; builtins dispatch directly.
    fn apply_operand(&mut self, f: Value, args: Vec<Value>) -> EvalResult<Value> {
        match f {
            Value::Closure(c) => self.apply_compiled_closure(&c, args),
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

    /// Closure application in the stack machine: the body is compiled on
    /// demand and executed in a child of the captured environment.
    fn apply_compiled_closure(&mut self, c: &Rc<Closure>, args: Vec<Value>) -> EvalResult<Value> {
        if args.len() != c.params.len() {
            return Err(Raise::arity("closure", c.params.len(), args.len()).into());
        }
        self.budget.consume_gas(gas::FUNCTION_CALL)?;
        self.envs.reattach_prelude(c.env, self.prelude);
        self.budget.enter_call()?;
        let bindings = c.params.iter().cloned().zip(args).collect();
        let call_env = self.envs.extend(c.env, bindings);
        let body = compile(&c.body);
        let result = self.exec_in(&body, call_env);
        self.budget.exit_call();
        let value = result?;
        self.budget.charge_value(&value)?;
        Ok(value)
    }
}

fn pop_operands(stack: &mut Vec<Value>, arity: usize, op: &str) -> EvalResult<Vec<Value>> {
    if stack.len() < arity {
        return Err(Error::InvalidProgram(format!(
            "stack underflow: {op} needs {arity} operands, have {}",
            stack.len()
        )));
    }
    Ok(stack.split_off(stack.len() - arity))
}

fn stack_sub_eval<H: HostDispatcher>(rt: &mut Runtime<H>, expr: &Json, env: EnvId) -> EvalResult<Value> {
    let instructions = compile(expr);
    rt.exec_in(&instructions, env)
}
