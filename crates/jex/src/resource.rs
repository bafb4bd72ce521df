use std::{
    fmt,
    time::{Duration, Instant},
};

use ahash::AHashMap;

use crate::value::{Json, Value};

/// Gas costs per operation kind.
///
/// These are fixed so that metering is deterministic: the same program
/// consumes the same gas on every conforming runtime, which is what makes
/// budget checkpoints meaningful across machines.
pub(crate) mod gas {
    pub const LITERAL: u64 = 1;
    pub const VARIABLE: u64 = 2;
    pub const ARITHMETIC: u64 = 3;
    pub const COMPARISON: u64 = 3;
    pub const LOGICAL: u64 = 3;
    pub const IF: u64 = 5;
    pub const DO: u64 = 5;
    pub const QUOTE: u64 = 1;
    pub const TRY: u64 = 5;
    pub const LET: u64 = 10;
    pub const DEF: u64 = 10;
    pub const LAMBDA_CREATE: u64 = 20;
    pub const FUNCTION_CALL: u64 = 10;
    pub const LIST_CREATE: u64 = 5;
    pub const LIST_PER_ITEM: u64 = 1;
    pub const DICT_CREATE: u64 = 5;
    pub const DICT_PER_ITEM: u64 = 2;
    pub const QUERY: u64 = 10;
    pub const HOST_DEFAULT: u64 = 100;
}

/// Error returned when a resource limit is exceeded during execution.
///
/// These are never catchable by interpreted code: exhaustion surfaces to
/// the embedding caller (or, under a step budget on the stack machine,
/// becomes a resumable suspended state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Gas limit exceeded.
    Gas { limit: u64, used: u64 },
    /// Estimated memory limit exceeded.
    Memory { limit: u64, used: u64 },
    /// Wall-clock limit exceeded.
    Time { limit_ms: u64, elapsed_ms: u64 },
    /// Call-stack depth limit exceeded.
    StackDepth { limit: u32, depth: u32 },
    /// A created list or map is larger than allowed.
    CollectionSize { limit: usize, size: usize },
    /// A created string is longer than allowed.
    StringLength { limit: usize, len: usize },
}

impl ResourceError {
    /// Stable kind name for callers that match on error families.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Gas { .. } => "GasExhausted",
            Self::Memory { .. } | Self::CollectionSize { .. } | Self::StringLength { .. } => "MemoryExhausted",
            Self::Time { .. } => "TimeExhausted",
            Self::StackDepth { .. } => "StackOverflow",
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gas { limit, used } => write!(f, "gas limit exceeded: {used} > {limit}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Time { limit_ms, elapsed_ms } => {
                write!(f, "time limit exceeded: {elapsed_ms}ms > {limit_ms}ms")
            }
            Self::StackDepth { limit, depth } => {
                write!(f, "stack depth limit exceeded: {depth} > {limit}")
            }
            Self::CollectionSize { limit, size } => {
                write!(f, "collection size {size} exceeds limit {limit}")
            }
            Self::StringLength { limit, len } => {
                write!(f, "string length {len} exceeds limit {limit}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Configuration for resource limits.
///
/// All limits are optional; `None` disables that limit. `Default` is fully
/// unlimited; [`ResourceLimits::new`] applies conservative sandbox caps
/// for stack depth and collection/string sizes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum total gas for the evaluation.
    pub max_gas: Option<u64>,
    /// Maximum estimated memory in bytes.
    pub max_memory: Option<u64>,
    /// Maximum wall-clock time in milliseconds.
    pub max_time_ms: Option<u64>,
    /// Maximum closure-application depth.
    pub max_stack_depth: Option<u32>,
    /// Maximum size of any created list or map.
    pub max_collection_size: Option<usize>,
    /// Maximum length of any created string.
    pub max_string_length: Option<usize>,
}

impl ResourceLimits {
    /// Sandbox defaults: bounded stack depth and collection/string sizes,
    /// gas/memory/time left to the embedder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_stack_depth: Some(100),
            max_collection_size: Some(10_000),
            max_string_length: Some(100_000),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_gas(mut self, limit: u64) -> Self {
        self.max_gas = Some(limit);
        self
    }

    #[must_use]
    pub fn max_memory(mut self, limit: u64) -> Self {
        self.max_memory = Some(limit);
        self
    }

    #[must_use]
    pub fn max_time_ms(mut self, limit: u64) -> Self {
        self.max_time_ms = Some(limit);
        self
    }

    #[must_use]
    pub fn max_stack_depth(mut self, limit: u32) -> Self {
        self.max_stack_depth = Some(limit);
        self
    }

    #[must_use]
    pub fn max_collection_size(mut self, limit: usize) -> Self {
        self.max_collection_size = Some(limit);
        self
    }

    #[must_use]
    pub fn max_string_length(mut self, limit: usize) -> Self {
        self.max_string_length = Some(limit);
        self
    }
}

/// Hierarchical gas cost policy for host operations.
///
/// Commands are paths like `file/read` or `network/http/post`. Costs are
/// looked up by longest prefix; namespace nodes carry a default that
/// applies to any unlisted subcommand beneath them, and operations with no
/// matching entry at all fall back to the global default.
#[derive(Debug, Clone)]
pub struct HostGasPolicy {
    roots: AHashMap<String, CostNode>,
    default_cost: u64,
}

#[derive(Debug, Clone)]
enum CostNode {
    Cost(u64),
    Namespace {
        cost: Option<u64>,
        children: AHashMap<String, CostNode>,
    },
}

impl HostGasPolicy {
    /// An empty policy: every command costs `default_cost`.
    #[must_use]
    pub fn flat(default_cost: u64) -> Self {
        Self {
            roots: AHashMap::new(),
            default_cost,
        }
    }

    /// Parses a policy from a JSON table.
    ///
    /// Objects are namespaces, numbers are exact costs, and the `_cost`
    /// key inside an object sets that namespace's inherited default:
    ///
    /// ```json
    /// { "file": { "_cost": 500, "read": 200, "write": 1000 } }
    /// ```
    #[must_use]
    pub fn from_table(table: &Json, default_cost: u64) -> Self {
        let mut roots = AHashMap::new();
        if let Json::Object(entries) = table {
            for (name, node) in entries {
                if let Some(parsed) = parse_node(node) {
                    roots.insert(name.clone(), parsed);
                }
            }
        }
        Self { roots, default_cost }
    }

    /// Gas cost for a host operation path.
    #[must_use]
    pub fn cost(&self, operation: &str) -> u64 {
        let mut inherited = self.default_cost;
        let mut children = &self.roots;
        for part in operation.split('/') {
            match children.get(part) {
                Some(CostNode::Cost(cost)) => return *cost,
                Some(CostNode::Namespace { cost, children: next }) => {
                    if let Some(cost) = cost {
                        inherited = *cost;
                    }
                    children = next;
                }
                None => break,
            }
        }
        inherited
    }
}

fn parse_node(node: &Json) -> Option<CostNode> {
    match node {
        Json::Number(n) => n.as_u64().map(CostNode::Cost),
        Json::Object(entries) => {
            let mut cost = None;
            let mut children = AHashMap::new();
            for (name, child) in entries {
                if name == "_cost" {
                    cost = child.as_u64();
                } else if let Some(parsed) = parse_node(child) {
                    children.insert(name.clone(), parsed);
                }
            }
            Some(CostNode::Namespace { cost, children })
        }
        _ => None,
    }
}

impl Default for HostGasPolicy {
    /// Cost table for common host namespaces. Sleeping and system-level
    /// operations are priced steeply on purpose.
    fn default() -> Self {
        Self::from_table(
            &serde_json::json!({
                "file": { "_cost": 500, "read": 200, "write": 1000, "delete": 2000, "exists": 50, "size": 50, "list": 300 },
                "network": {
                    "_cost": 1000,
                    "http": { "_cost": 1000, "get": 500, "post": 1500, "put": 1500, "delete": 1000 },
                    "dns": 200,
                },
                "time": { "_cost": 20, "now": 10, "sleep": 10000, "format": 50 },
                "math": { "_cost": 10, "random": 20, "sqrt": 15, "pow": 20 },
                "crypto": { "_cost": 1000, "hash": 100, "hmac": 200, "sign": 2000, "verify": 2000, "random": 50 },
                "system": { "_cost": 5000, "env": 100, "arch": 50, "pid": 50 },
                "json": { "_cost": 100, "parse": 200, "stringify": 200 },
            }),
            gas::HOST_DEFAULT,
        )
    }
}

/// Serializable snapshot of budget counters.
///
/// Elapsed wall time is carried explicitly so that a restored budget
/// behaves as if no time was lost to the suspension itself.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BudgetCheckpoint {
    pub gas_used: u64,
    pub memory_used: u64,
    pub stack_depth: u32,
    pub object_count: u64,
    pub elapsed_ms: u64,
}

/// Resource tracking for one evaluation.
///
/// Counters are monotone non-decreasing within a single evaluation and
/// always maintained, whether or not the corresponding limit is set, so
/// checkpoints carry real usage across suspension boundaries.
#[derive(Debug)]
pub struct Budget {
    limits: ResourceLimits,
    policy: HostGasPolicy,
    gas_used: u64,
    memory_used: u64,
    stack_depth: u32,
    object_count: u64,
    start: Instant,
}

impl Budget {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            policy: HostGasPolicy::default(),
            gas_used: 0,
            memory_used: 0,
            stack_depth: 0,
            object_count: 0,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: HostGasPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: HostGasPolicy) {
        self.policy = policy;
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    #[must_use]
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    #[must_use]
    pub fn stack_depth(&self) -> u32 {
        self.stack_depth
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consumes `amount` gas, failing if the gas limit would be exceeded.
    pub fn consume_gas(&mut self, amount: u64) -> Result<(), ResourceError> {
        self.gas_used = self.gas_used.saturating_add(amount);
        if let Some(limit) = self.limits.max_gas
            && self.gas_used > limit
        {
            return Err(ResourceError::Gas {
                limit,
                used: self.gas_used,
            });
        }
        Ok(())
    }

    /// Consumes gas for a host operation according to the policy tree.
    pub fn consume_host_gas(&mut self, operation: &str) -> Result<(), ResourceError> {
        let cost = self.policy.cost(operation);
        self.consume_gas(cost)
    }

    /// Accounts for an estimated allocation.
    pub fn allocate_memory(&mut self, bytes: u64) -> Result<(), ResourceError> {
        self.memory_used = self.memory_used.saturating_add(bytes);
        if let Some(limit) = self.limits.max_memory
            && self.memory_used > limit
        {
            return Err(ResourceError::Memory {
                limit,
                used: self.memory_used,
            });
        }
        Ok(())
    }

    /// Checks the wall clock against the time limit.
    pub fn check_time(&self) -> Result<(), ResourceError> {
        if let Some(limit_ms) = self.limits.max_time_ms {
            let elapsed_ms = self.start.elapsed().as_millis() as u64;
            if elapsed_ms > limit_ms {
                return Err(ResourceError::Time { limit_ms, elapsed_ms });
            }
        }
        Ok(())
    }

    /// Enters a closure application frame.
    pub fn enter_call(&mut self) -> Result<(), ResourceError> {
        self.stack_depth += 1;
        if let Some(limit) = self.limits.max_stack_depth
            && self.stack_depth > limit
        {
            return Err(ResourceError::StackDepth {
                limit,
                depth: self.stack_depth,
            });
        }
        Ok(())
    }

    /// Leaves a closure application frame.
    pub fn exit_call(&mut self) {
        self.stack_depth = self.stack_depth.saturating_sub(1);
    }

    pub fn check_collection_size(&self, size: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_collection_size
            && size > limit
        {
            return Err(ResourceError::CollectionSize { limit, size });
        }
        Ok(())
    }

    pub fn check_string_length(&self, len: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_string_length
            && len > limit
        {
            return Err(ResourceError::StringLength { limit, len });
        }
        Ok(())
    }

    /// Size- and memory-checks a freshly produced value.
    pub fn charge_value(&mut self, value: &Value) -> Result<(), ResourceError> {
        match value {
            Value::List(items) => {
                self.check_collection_size(items.len())?;
                self.object_count += 1;
            }
            Value::Map(entries) => {
                self.check_collection_size(entries.len())?;
                self.object_count += 1;
            }
            Value::String(s) => self.check_string_length(s.len())?,
            _ => return Ok(()),
        }
        self.allocate_memory(value.estimate_size() as u64)
    }

    /// Captures the counters plus elapsed wall time.
    #[must_use]
    pub fn checkpoint(&self) -> BudgetCheckpoint {
        BudgetCheckpoint {
            gas_used: self.gas_used,
            memory_used: self.memory_used,
            stack_depth: self.stack_depth,
            object_count: self.object_count,
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        }
    }

    /// Restores counters from a checkpoint; the start time is re-based so
    /// that `check_time` behaves as if the captured elapsed time had been
    /// spent here.
    pub fn restore(&mut self, checkpoint: &BudgetCheckpoint) {
        self.gas_used = checkpoint.gas_used;
        self.memory_used = checkpoint.memory_used;
        self.stack_depth = checkpoint.stack_depth;
        self.object_count = checkpoint.object_count;
        self.start = Instant::now()
            .checked_sub(Duration::from_millis(checkpoint.elapsed_ms))
            .unwrap_or_else(Instant::now);
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_limit_trips_once_exceeded() {
        let mut budget = Budget::new(ResourceLimits::default().max_gas(10));
        assert!(budget.consume_gas(10).is_ok());
        let err = budget.consume_gas(1).unwrap_err();
        assert_eq!(err.kind_name(), "GasExhausted");
    }

    #[test]
    fn gas_counts_without_a_limit() {
        let mut budget = Budget::default();
        budget.consume_gas(7).unwrap();
        assert_eq!(budget.gas_used(), 7);
    }

    #[test]
    fn host_policy_uses_longest_prefix_with_namespace_defaults() {
        let policy = HostGasPolicy::default();
        assert_eq!(policy.cost("file/read"), 200);
        assert_eq!(policy.cost("file/chmod"), 500); // namespace default
        assert_eq!(policy.cost("network/http/post"), 1500);
        assert_eq!(policy.cost("network/http/options"), 1000);
        assert_eq!(policy.cost("network/dns"), 200);
        assert_eq!(policy.cost("unknown/op"), gas::HOST_DEFAULT);
    }

    #[test]
    fn checkpoint_restore_preserves_counters_and_elapsed_time() {
        let mut budget = Budget::new(ResourceLimits::default().max_gas(100));
        budget.consume_gas(42).unwrap();
        budget.enter_call().unwrap();
        let snapshot = budget.checkpoint();

        let mut restored = Budget::new(ResourceLimits::default().max_gas(100));
        restored.restore(&snapshot);
        assert_eq!(restored.gas_used(), 42);
        assert_eq!(restored.stack_depth(), 1);
        assert_eq!(restored.checkpoint().gas_used, snapshot.gas_used);
    }

    #[test]
    fn stack_depth_limit_reports_overflow() {
        let mut budget = Budget::new(ResourceLimits::default().max_stack_depth(2));
        budget.enter_call().unwrap();
        budget.enter_call().unwrap();
        let err = budget.enter_call().unwrap_err();
        assert_eq!(err.kind_name(), "StackOverflow");
        budget.exit_call();
    }
}
