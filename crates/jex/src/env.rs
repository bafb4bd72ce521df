use ahash::AHashSet;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::value::Value;

/// Unique handle for an environment stored in the [`EnvArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(u32);

impl EnvId {
    fn new(index: usize) -> Self {
        Self(index.try_into().expect("environment arena overflow"))
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) struct EnvRecord {
    pub(crate) bindings: IndexMap<String, Value>,
    pub(crate) parent: Option<EnvId>,
    /// Set on the prelude environment only. Prelude bindings are never
    /// serialized and are skipped when flattening user scopes.
    pub(crate) prelude: bool,
}

/// Storage for all environments of a runtime.
///
/// Environments form a parent-chained graph that can contain cycles
/// through closure values (a recursive definition closes over the
/// environment that holds it). Instead of reference-counted links with
/// weak back-edges, every environment lives in this arena and is
/// addressed by [`EnvId`]; values hold handles, never pointers.
///
/// # Mutation discipline
///
/// Only the bindings map of an environment the current operation owns is
/// ever mutated (`def`, the recursion placeholder, `let` setup). Parents
/// are immutable from a child's view, with one exception: the topmost
/// ancestor of a deserialized chain may be reparented onto the local
/// prelude, which is idempotent and happens before first use.
#[derive(Debug, Default)]
pub struct EnvArena {
    records: Vec<EnvRecord>,
}

impl EnvArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, bindings: IndexMap<String, Value>, parent: Option<EnvId>, prelude: bool) -> EnvId {
        let id = EnvId::new(self.records.len());
        self.records.push(EnvRecord {
            bindings,
            parent,
            prelude,
        });
        id
    }

    pub(crate) fn get(&self, id: EnvId) -> &EnvRecord {
        &self.records[id.index()]
    }

    fn get_mut(&mut self, id: EnvId) -> &mut EnvRecord {
        &mut self.records[id.index()]
    }

    /// Creates a child environment with the given bindings.
    pub fn extend(&mut self, parent: EnvId, bindings: IndexMap<String, Value>) -> EnvId {
        self.alloc(bindings, Some(parent), false)
    }

    /// Installs or overwrites a binding directly on `env`.
    pub fn define(&mut self, env: EnvId, name: impl Into<String>, value: Value) {
        self.get_mut(env).bindings.insert(name.into(), value);
    }

    /// Resolves `name` by walking the parent chain; first hit wins.
    #[must_use]
    pub fn lookup(&self, env: EnvId, name: &str) -> Option<&Value> {
        let mut current = Some(env);
        while let Some(id) = current {
            let record = self.get(id);
            if let Some(value) = record.bindings.get(name) {
                return Some(value);
            }
            current = record.parent;
        }
        None
    }

    /// Resolves `name` and reports whether the defining frame is the
    /// prelude. Used by the serializer to decide what to emit.
    #[must_use]
    pub(crate) fn lookup_with_origin(&self, env: EnvId, name: &str) -> Option<(&Value, bool)> {
        let mut current = Some(env);
        while let Some(id) = current {
            let record = self.get(id);
            if let Some(value) = record.bindings.get(name) {
                return Some((value, record.prelude));
            }
            current = record.parent;
        }
        None
    }

    #[must_use]
    pub fn parent(&self, env: EnvId) -> Option<EnvId> {
        self.get(env).parent
    }

    #[must_use]
    pub fn is_prelude(&self, env: EnvId) -> bool {
        self.get(env).prelude
    }

    /// Reattaches a captured environment chain to `prelude`.
    ///
    /// Walks the chain from `env`; if `prelude` is already an ancestor this
    /// is a no-op, otherwise the topmost ancestor's parent is set to
    /// `prelude`. All user bindings are preserved and builtins resolve
    /// again through the chain. Idempotent.
    pub fn reattach_prelude(&mut self, env: EnvId, prelude: EnvId) {
        let mut topmost = env;
        let mut current = Some(env);
        while let Some(id) = current {
            if id == prelude {
                return;
            }
            topmost = id;
            current = self.get(id).parent;
        }
        if topmost != prelude {
            self.get_mut(topmost).parent = Some(prelude);
        }
    }

    /// Flattens the user-visible bindings of a chain into one map:
    /// parents first, children overriding. Prelude frames are skipped.
    #[must_use]
    pub fn flatten_user(&self, env: EnvId) -> IndexMap<String, Value> {
        let mut chain = Vec::new();
        let mut current = Some(env);
        while let Some(id) = current {
            let record = self.get(id);
            if !record.prelude {
                chain.push(id);
            }
            current = record.parent;
        }
        let mut flattened = IndexMap::new();
        for id in chain.into_iter().rev() {
            for (name, value) in &self.get(id).bindings {
                flattened.insert(name.clone(), value.clone());
            }
        }
        flattened
    }

    /// Content-derived identity: a SHA-256 hex digest over the flattened
    /// user bindings (sorted by name) plus whether the chain terminates at
    /// a prelude. Two environments with identical flattened content have
    /// identical IDs, which the serializer exploits for deduplication.
    #[must_use]
    pub fn content_id(&self, env: EnvId) -> String {
        let mut hasher = Sha256::new();
        let mut active = AHashSet::new();
        self.hash_env(env, &mut hasher, &mut active);
        hex_digest(hasher)
    }

    fn hash_env(&self, env: EnvId, hasher: &mut Sha256, active: &mut AHashSet<EnvId>) {
        if !active.insert(env) {
            hasher.update(b"$cycle");
            return;
        }
        let flattened = self.flatten_user(env);
        let mut names: Vec<&String> = flattened.keys().collect();
        names.sort_unstable();
        for name in names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            self.hash_value(&flattened[name.as_str()], hasher, active);
        }
        if self.chain_ends_at_prelude(env) {
            hasher.update(b"$prelude");
        }
        active.remove(&env);
    }

    pub(crate) fn hash_value(&self, value: &Value, hasher: &mut Sha256, active: &mut AHashSet<EnvId>) {
        match value {
            Value::Null => hasher.update(b"n"),
            Value::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
            Value::Number(n) => {
                hasher.update(b"d");
                hasher.update(n.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                hasher.update(b"s");
                hasher.update(s.as_bytes());
                hasher.update([0u8]);
            }
            Value::List(items) => {
                hasher.update(b"l");
                hasher.update((items.len() as u64).to_le_bytes());
                for item in items.iter() {
                    self.hash_value(item, hasher, active);
                }
            }
            Value::Map(entries) => {
                hasher.update(b"m");
                hasher.update((entries.len() as u64).to_le_bytes());
                for (k, v) in entries.iter() {
                    hasher.update(k.as_bytes());
                    hasher.update([0u8]);
                    self.hash_value(v, hasher, active);
                }
            }
            Value::Closure(c) => {
                hasher.update(b"c");
                for param in &c.params {
                    hasher.update(param.as_bytes());
                    hasher.update([0u8]);
                }
                hasher.update(c.body.to_string().as_bytes());
                self.hash_env(c.env, hasher, active);
            }
            Value::Builtin(f) => {
                hasher.update(b"b");
                hasher.update(f.to_string().as_bytes());
            }
        }
    }

    fn chain_ends_at_prelude(&self, env: EnvId) -> bool {
        let mut current = Some(env);
        while let Some(id) = current {
            let record = self.get(id);
            if record.prelude {
                return true;
            }
            current = record.parent;
        }
        false
    }

    /// Structural equality over flattened bindings and chains.
    #[must_use]
    pub fn env_structural_eq(&self, a: EnvId, b: EnvId) -> bool {
        let mut seen = AHashSet::new();
        self.env_eq_inner(a, b, &mut seen)
    }

    fn env_eq_inner(&self, a: EnvId, b: EnvId, seen: &mut AHashSet<(EnvId, EnvId)>) -> bool {
        if a == b {
            return true;
        }
        if !seen.insert((a, b)) {
            // re-entered the same pair: treat the cycle as matching
            return true;
        }
        let fa = self.flatten_user(a);
        let fb = self.flatten_user(b);
        if fa.len() != fb.len() {
            return false;
        }
        fa.iter().all(|(name, va)| {
            fb.get(name)
                .is_some_and(|vb| self.value_eq_inner(va, vb, seen))
        })
    }

    /// Deep structural equality for values, comparing closure environments
    /// by content rather than by handle.
    #[must_use]
    pub fn value_structural_eq(&self, a: &Value, b: &Value) -> bool {
        let mut seen = AHashSet::new();
        self.value_eq_inner(a, b, &mut seen)
    }

    fn value_eq_inner(&self, a: &Value, b: &Value, seen: &mut AHashSet<(EnvId, EnvId)>) -> bool {
        match (a, b) {
            (Value::List(xs), Value::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| self.value_eq_inner(x, y, seen))
            }
            (Value::Map(xs), Value::Map(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .all(|(k, x)| ys.get(k).is_some_and(|y| self.value_eq_inner(x, y, seen)))
            }
            (Value::Closure(x), Value::Closure(y)) => {
                x.params == y.params && x.body == y.body && self.env_eq_inner(x.env, y.env, seen)
            }
            _ => a == b,
        }
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
