//! JSON serialization of values, closures, environments, and suspended
//! stack states.
//!
//! Encoding conventions:
//!
//! - Primitives, lists, and maps encode as themselves (non-finite numbers
//!   become `{"$number": ...}` sentinels).
//! - A closure encodes as `{"__closure__": true, "params": [...],
//!   "body": <ast>, "env": <env encoding>}`; only the user bindings
//!   reachable from the body's free variables are emitted, flattened into
//!   a single environment with `parent_id: null` (meaning "attach the
//!   receiver's prelude here").
//! - An environment encodes as `{"__env__": true, "id": <content hash>,
//!   "bindings": {...}, "parent_id": <hash or null>}`; a chain carries
//!   its ancestors in a companion `registry` of id → encoding. Shared and
//!   cyclic structure is expressed with `{"$ref": <id>}` back to a
//!   previously emitted id.
//! - Builtins are never serialized; one inside user bindings is an
//!   encode error. The receiver reattaches builtins from its own prelude.
//! - A suspended state encodes as `{stack, pc, instructions, env,
//!   budget_checkpoint}` plus an advisory `prelude_hash`.

use ahash::{AHashMap, AHashSet};
use sha2::{Digest, Sha256};
use std::rc::Rc;

use crate::{
    ast,
    env::{EnvArena, EnvId},
    error::{Error, EvalResult},
    host::HostDispatcher,
    postfix::{StackState, decode_instructions, encode_instructions},
    resource::BudgetCheckpoint,
    runtime::Runtime,
    value::{Closure, Json, Value, number_to_json},
};

const CLOSURE_KEY: &str = "__closure__";
const ENV_KEY: &str = "__env__";
const REF_KEY: &str = "$ref";

struct Encoder<'a> {
    envs: &'a EnvArena,
    /// ids whose full encoding already appears in this document
    emitted: AHashSet<String>,
    /// ids currently being encoded; re-entry becomes a `$ref`
    active: AHashSet<String>,
    /// arena environments emitted as chain frames, by content id
    chain_ids: AHashMap<EnvId, String>,
}

impl<'a> Encoder<'a> {
    fn new(envs: &'a EnvArena) -> Self {
        Self {
            envs,
            emitted: AHashSet::new(),
            active: AHashSet::new(),
            chain_ids: AHashMap::new(),
        }
    }

    fn value(&mut self, value: &Value) -> EvalResult<Json> {
        match value {
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Number(n) => Ok(number_to_json(*n)),
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::List(items) => items.iter().map(|v| self.value(v)).collect::<EvalResult<Vec<_>>>().map(Json::Array),
            Value::Map(entries) => {
                let mut out = serde_json::Map::with_capacity(entries.len());
                for (k, v) in entries.iter() {
                    out.insert(k.clone(), self.value(v)?);
                }
                Ok(Json::Object(out))
            }
            Value::Closure(c) => self.closure(c),
            Value::Builtin(f) => Err(Error::Encode(format!(
                "builtin '{f}' cannot be serialized; builtins live only in the prelude"
            ))),
        }
    }

    fn closure(&mut self, c: &Rc<Closure>) -> EvalResult<Json> {
        let env_json = if let Some(id) = self.chain_ids.get(&c.env) {
            // captured env is part of an emitted chain: share it
            serde_json::json!({ REF_KEY: id })
        } else {
            self.pruned_env(c)?
        };
        Ok(serde_json::json!({
            CLOSURE_KEY: true,
            "params": c.params.iter().collect::<Vec<_>>(),
            "body": c.body.clone(),
            "env": env_json,
        }))
    }

    /// Emits the minimal environment a closure needs: its transitive free
    /// variables, resolved through the captured chain and flattened into
    /// one frame. Names that resolve into the prelude are omitted.
    fn pruned_env(&mut self, c: &Rc<Closure>) -> EvalResult<Json> {
        let bindings = self.pruned_bindings(c)?;
        let id = self.pruned_id(&bindings);
        if self.emitted.contains(&id) || self.active.contains(&id) {
            return Ok(serde_json::json!({ REF_KEY: id }));
        }
        self.active.insert(id.clone());
        let mut encoded = serde_json::Map::with_capacity(bindings.len());
        for (name, value) in &bindings {
            encoded.insert(name.clone(), self.value(value)?);
        }
        self.active.remove(&id);
        self.emitted.insert(id.clone());
        Ok(serde_json::json!({
            ENV_KEY: true,
            "id": id,
            "bindings": encoded,
            "parent_id": Json::Null,
        }))
    }

    fn pruned_bindings(&self, c: &Closure) -> EvalResult<Vec<(String, Value)>> {
        let mut names: Vec<String> = ast::free_in_closure(&c.params, &c.body).into_iter().collect();
        names.sort_unstable();
        let mut out = Vec::new();
        for name in names {
            match self.envs.lookup_with_origin(c.env, &name) {
                // unresolvable or prelude-provided names are not captured
                None | Some((_, true)) => {}
                Some((Value::Builtin(f), false)) => {
                    return Err(Error::Encode(format!(
                        "binding '{name}' holds builtin '{f}' and cannot be serialized"
                    )));
                }
                Some((value, false)) => out.push((name, value.clone())),
            }
        }
        Ok(out)
    }

    fn pruned_id(&self, bindings: &[(String, Value)]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"pruned-env");
        let mut active = AHashSet::new();
        for (name, value) in bindings {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            self.envs.hash_value(value, &mut hasher, &mut active);
        }
        hex(hasher)
    }

    /// Encodes a full environment chain (all user frames, target first in
    /// the result, ancestors in a companion registry).
    fn env_chain(&mut self, env: EnvId) -> EvalResult<Json> {
        let mut frames = Vec::new();
        let mut current = Some(env);
        while let Some(id) = current {
            if self.envs.is_prelude(id) {
                break;
            }
            frames.push(id);
            current = self.envs.parent(id);
        }
        if frames.is_empty() {
            return Err(Error::Encode(
                "the prelude environment is never serialized".to_owned(),
            ));
        }
        for &id in &frames {
            let content_id = self.envs.content_id(id);
            self.chain_ids.insert(id, content_id);
        }

        let target_id = self.chain_ids[&env].clone();
        let mut registry = serde_json::Map::new();
        let mut target_json: Option<Json> = None;
        for &id in frames.iter().rev() {
            let content_id = self.chain_ids[&id].clone();
            if self.emitted.contains(&content_id) {
                continue;
            }
            self.active.insert(content_id.clone());
            let parent_id = match self.envs.parent(id) {
                Some(p) if !self.envs.is_prelude(p) => Json::String(self.chain_ids[&p].clone()),
                _ => Json::Null,
            };
            let mut encoded = serde_json::Map::new();
            for (name, value) in &self.envs.get(id).bindings {
                if let Value::Builtin(f) = value {
                    return Err(Error::Encode(format!(
                        "binding '{name}' holds builtin '{f}' and cannot be serialized"
                    )));
                }
                encoded.insert(name.clone(), self.value(value)?);
            }
            self.active.remove(&content_id);
            self.emitted.insert(content_id.clone());
            let entry = serde_json::json!({
                ENV_KEY: true,
                "id": content_id,
                "bindings": encoded,
                "parent_id": parent_id,
            });
            if content_id == target_id && target_json.is_none() {
                target_json = Some(entry);
            } else {
                registry.insert(content_id, entry);
            }
        }

        let mut result = match target_json {
            Some(json) => json,
            // the target deduplicated onto an ancestor with identical
            // flattened content; promote that entry
            None => match registry.remove(&target_id) {
                Some(entry) => entry,
                None => serde_json::json!({ REF_KEY: target_id }),
            },
        };
        if !registry.is_empty()
            && let Json::Object(obj) = &mut result
        {
            obj.insert("registry".to_owned(), Json::Object(registry));
        }
        Ok(result)
    }
}

struct Decoder<'a> {
    envs: &'a mut EnvArena,
    prelude: EnvId,
    pending: AHashMap<String, Json>,
    resolved: AHashMap<String, EnvId>,
}

impl<'a> Decoder<'a> {
    fn new(envs: &'a mut EnvArena, prelude: EnvId) -> Self {
        Self {
            envs,
            prelude,
            pending: AHashMap::new(),
            resolved: AHashMap::new(),
        }
    }

    fn value(&mut self, json: &Json) -> EvalResult<Value> {
        match json {
            Json::Object(entries) => {
                if entries.get(CLOSURE_KEY).and_then(Json::as_bool) == Some(true) {
                    return self.closure(entries);
                }
                if entries.contains_key(REF_KEY) {
                    return Err(Error::Decode(
                        "environment reference found outside a closure env position".to_owned(),
                    ));
                }
                if entries.contains_key("$number") && entries.len() == 1 {
                    return Ok(Value::from_json(json));
                }
                let mut out = indexmap::IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    out.insert(k.clone(), self.value(v)?);
                }
                Ok(Value::map(out))
            }
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.value(item)?);
                }
                Ok(Value::list(out))
            }
            other => Ok(Value::from_json(other)),
        }
    }

    fn closure(&mut self, entries: &serde_json::Map<String, Json>) -> EvalResult<Value> {
        let params = entries
            .get("params")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::Decode("closure document is missing its params array".to_owned()))?;
        let params = params
            .iter()
            .map(|p| p.as_str().map(str::to_owned))
            .collect::<Option<smallvec::SmallVec<[String; 4]>>>()
            .ok_or_else(|| Error::Decode("closure params must be strings".to_owned()))?;
        let body = entries
            .get("body")
            .cloned()
            .ok_or_else(|| Error::Decode("closure document is missing its body".to_owned()))?;
        let env_json = entries
            .get("env")
            .ok_or_else(|| Error::Decode("closure document is missing its env".to_owned()))?;
        let env = self.env_encoding(env_json)?;
        Ok(Value::Closure(Rc::new(Closure { params, body, env })))
    }

    fn env_encoding(&mut self, json: &Json) -> EvalResult<EnvId> {
        let entries = json
            .as_object()
            .ok_or_else(|| Error::Decode("environment encoding must be an object".to_owned()))?;
        if let Some(registry) = entries.get("registry").and_then(Json::as_object) {
            for (id, entry) in registry {
                self.pending.insert(id.clone(), entry.clone());
            }
        }
        if let Some(id) = entries.get(REF_KEY).and_then(Json::as_str) {
            return self.resolve_id(id);
        }
        if entries.get(ENV_KEY).and_then(Json::as_bool) == Some(true) {
            return self.env_object(entries);
        }
        Err(Error::Decode("unrecognized environment encoding".to_owned()))
    }

    fn resolve_id(&mut self, id: &str) -> EvalResult<EnvId> {
        if let Some(env) = self.resolved.get(id) {
            return Ok(*env);
        }
        let entry = self
            .pending
            .remove(id)
            .ok_or_else(|| Error::Decode(format!("unresolved environment reference: {id}")))?;
        let entries = entry
            .as_object()
            .ok_or_else(|| Error::Decode("registry entries must be objects".to_owned()))?;
        self.env_object(entries)
    }

    /// Rebuilds one environment. The record is allocated and registered
    /// before its bindings decode, which is what lets a binding's closure
    /// refer back to this environment (`$ref` cycles).
    fn env_object(&mut self, entries: &serde_json::Map<String, Json>) -> EvalResult<EnvId> {
        let id = entries.get("id").and_then(Json::as_str).map(str::to_owned);
        if let Some(id) = &id
            && let Some(env) = self.resolved.get(id)
        {
            return Ok(*env);
        }
        let parent = match entries.get("parent_id") {
            None | Some(Json::Null) => self.prelude,
            Some(Json::String(parent_id)) => self.resolve_id(parent_id)?,
            Some(_) => return Err(Error::Decode("parent_id must be a string or null".to_owned())),
        };
        let env = self.envs.extend(parent, indexmap::IndexMap::new());
        if let Some(id) = id {
            self.resolved.insert(id, env);
        }
        if let Some(bindings) = entries.get("bindings").and_then(Json::as_object) {
            for (name, value_json) in bindings {
                let value = self.value(value_json)?;
                self.envs.define(env, name.clone(), value);
            }
        }
        Ok(env)
    }
}

fn hex(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl<H: HostDispatcher> Runtime<H> {
    /// Encodes a value (closures included) as a JSON document.
    pub fn encode_value(&self, value: &Value) -> EvalResult<Json> {
        Encoder::new(&self.envs).value(value)
    }

    /// Reconstructs a value document against this runtime's prelude.
    pub fn decode_value(&mut self, doc: &Json) -> EvalResult<Value> {
        let prelude = self.prelude;
        Decoder::new(&mut self.envs, prelude).value(doc)
    }

    /// Encodes a full environment chain as a JSON document.
    pub fn encode_env(&self, env: EnvId) -> EvalResult<Json> {
        Encoder::new(&self.envs).env_chain(env)
    }

    /// Reconstructs an environment document; the top of the rebuilt chain
    /// is attached to this runtime's prelude.
    pub fn decode_env(&mut self, doc: &Json) -> EvalResult<EnvId> {
        let prelude = self.prelude;
        Decoder::new(&mut self.envs, prelude).env_encoding(doc)
    }

    /// Encodes a suspended stack-machine state as a JSON document.
    ///
    /// The document carries an advisory `prelude_hash` so receivers can
    /// check compatibility before resuming.
    pub fn encode_state(&self, state: &StackState) -> EvalResult<Json> {
        let mut encoder = Encoder::new(&self.envs);
        let env_json = encoder.env_chain(state.env)?;
        let mut stack = Vec::with_capacity(state.stack.len());
        for value in &state.stack {
            stack.push(encoder.value(value)?);
        }
        Ok(serde_json::json!({
            "stack": stack,
            "pc": state.pc,
            "instructions": encode_instructions(&state.instructions),
            "env": env_json,
            "budget_checkpoint": serde_json::to_value(&state.checkpoint)
                .map_err(|e| Error::Encode(e.to_string()))?,
            "prelude_hash": self.prelude_info().id,
        }))
    }

    /// Reconstructs a suspended state document for [`Runtime::resume`].
    pub fn decode_state(&mut self, doc: &Json) -> EvalResult<StackState> {
        let entries = doc
            .as_object()
            .ok_or_else(|| Error::Decode("state document must be an object".to_owned()))?;
        let pc = entries
            .get("pc")
            .and_then(Json::as_u64)
            .ok_or_else(|| Error::Decode("state document is missing pc".to_owned()))? as usize;
        let instructions = decode_instructions(
            entries
                .get("instructions")
                .ok_or_else(|| Error::Decode("state document is missing instructions".to_owned()))?,
        )?;
        let checkpoint: BudgetCheckpoint = serde_json::from_value(
            entries
                .get("budget_checkpoint")
                .cloned()
                .ok_or_else(|| Error::Decode("state document is missing budget_checkpoint".to_owned()))?,
        )
        .map_err(|e| Error::Decode(e.to_string()))?;

        let prelude = self.prelude;
        let mut decoder = Decoder::new(&mut self.envs, prelude);
        let env = match entries.get("env") {
            Some(env_json) => decoder.env_encoding(env_json)?,
            None => return Err(Error::Decode("state document is missing env".to_owned())),
        };
        let stack_json = entries
            .get("stack")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::Decode("state document is missing its stack".to_owned()))?;
        let mut stack = Vec::with_capacity(stack_json.len());
        for value in stack_json {
            stack.push(decoder.value(value)?);
        }

        Ok(StackState {
            stack,
            pc,
            instructions,
            env,
            checkpoint,
        })
    }

    /// Like [`Runtime::decode_state`], but first verifies the document's
    /// declared `prelude_hash` (when present) against the local prelude.
    pub fn decode_state_verified(&mut self, doc: &Json) -> EvalResult<StackState> {
        if let Some(declared) = doc.get("prelude_hash").and_then(Json::as_str) {
            self.verify_prelude(declared)?;
        }
        self.decode_state(doc)
    }
}
