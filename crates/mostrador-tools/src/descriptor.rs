//! Operation descriptors and policies

use mostrador_llm::LlmTool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// `(tool_id, op_name)`, displayed as `tool_id.op_name`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OpRef {
    pub tool_id: String,
    pub op_name: String,
}

impl OpRef {
    pub fn new(tool_id: impl Into<String>, op_name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            op_name: op_name.into(),
        }
    }

    /// Parse `tool_id.op_name`.
    pub fn parse(s: &str) -> Option<Self> {
        let (tool_id, op_name) = s.split_once('.')?;
        (!tool_id.is_empty() && !op_name.is_empty()).then(|| Self::new(tool_id, op_name))
    }
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tool_id, self.op_name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_s: u64,
}

impl CachePolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn ttl(ttl_s: u64) -> Self {
        Self { enabled: ttl_s > 0, ttl_s }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// Statuses worth retrying; transient errors without a status always are.
    pub retryable_status: Vec<u16>,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff_ms: 0,
            retryable_status: Vec::new(),
        }
    }

    pub fn gateway_errors(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff_ms: 200,
            retryable_status: vec![502, 503, 504],
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Declared shape and policies of one operation.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub op: OpRef,
    pub description: String,
    pub param_schema: Value,
    pub return_schema: Value,
    pub cache: CachePolicy,
    pub retry: RetryPolicy,
}

impl ToolDescriptor {
    pub fn new(tool_id: &str, op_name: &str, description: impl Into<String>, param_schema: Value) -> Self {
        Self {
            op: OpRef::new(tool_id, op_name),
            description: description.into(),
            param_schema,
            return_schema: serde_json::json!({"type": "string"}),
            cache: CachePolicy::disabled(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn returns(mut self, schema: Value) -> Self {
        self.return_schema = schema;
        self
    }

    pub fn cached(mut self, ttl_s: u64) -> Self {
        self.cache = CachePolicy::ttl(ttl_s);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Two registrations are compatible when their schemas match.
    pub fn same_schema(&self, other: &ToolDescriptor) -> bool {
        self.param_schema == other.param_schema && self.return_schema == other.return_schema
    }

    /// Model-facing definition; the tool name is the bare op name.
    pub fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.op.op_name.clone(),
            description: self.description.clone(),
            input_schema: self.param_schema.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ref_parse_and_display() {
        let op = OpRef::parse("catalog.product_by_sku").unwrap();
        assert_eq!(op.tool_id, "catalog");
        assert_eq!(op.to_string(), "catalog.product_by_sku");
        assert!(OpRef::parse("catalog").is_none());
        assert!(OpRef::parse(".x").is_none());
    }

    #[test]
    fn zero_ttl_disables_cache() {
        assert!(!CachePolicy::ttl(0).enabled);
        assert!(CachePolicy::ttl(300).enabled);
    }
}
