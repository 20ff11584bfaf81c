//! Per-execution records: what ran, in what order, with what outcome.
//!
//! Callers get the full block-by-block trace back with every execution
//! response, so a failing flow can be pinned to the block that threw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Interrupted,
}

/// Outcome of one block's statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One executed (or skipped) block.
///
/// `input` is the value the block consumed: the bound entry parameter for
/// a param op, the rendered prompt for an agent, the first defined
/// upstream binding otherwise. Literals and skipped blocks carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTrace {
    pub block_id: String,
    pub binding: String,
    pub op: String,
    pub status: BlockStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// The full record of one execution, as returned to callers and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub program: String,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub blocks: Vec<BlockTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects block traces while the interpreter runs.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    blocks: Vec<BlockTrace>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(
        &mut self,
        block_id: &str,
        binding: &str,
        op: &str,
        input: Option<serde_json::Value>,
        output: serde_json::Value,
        duration_ms: u64,
    ) {
        self.blocks.push(BlockTrace {
            block_id: block_id.to_string(),
            binding: binding.to_string(),
            op: op.to_string(),
            status: BlockStatus::Succeeded,
            input,
            output: Some(output),
            error: None,
            duration_ms,
        });
    }

    pub fn failed(
        &mut self,
        block_id: &str,
        binding: &str,
        op: &str,
        input: Option<serde_json::Value>,
        error: &str,
        duration_ms: u64,
    ) {
        self.blocks.push(BlockTrace {
            block_id: block_id.to_string(),
            binding: binding.to_string(),
            op: op.to_string(),
            status: BlockStatus::Failed,
            input,
            output: None,
            error: Some(error.to_string()),
            duration_ms,
        });
    }

    pub fn skipped(&mut self, block_id: &str, binding: &str, op: &str) {
        self.blocks.push(BlockTrace {
            block_id: block_id.to_string(),
            binding: binding.to_string(),
            op: op.to_string(),
            status: BlockStatus::Skipped,
            input: None,
            output: None,
            error: None,
            duration_ms: 0,
        });
    }

    pub fn into_blocks(self) -> Vec<BlockTrace> {
        self.blocks
    }
}
