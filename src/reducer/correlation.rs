//! Tool-call correlation: call id → block id, with a FIFO fallback
//!
//! The fallback pops the oldest block still `executing` when a result
//! arrives without an id. It is only right when tools resolve in
//! submission order, so every fallback match is logged and flagged on the
//! block as `Correlation::FifoFallback`.

use crate::message::Correlation;
use std::collections::{HashMap, VecDeque};

/// A tool result bound to its owning block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub block_id: String,
    pub correlation: Correlation,
}

/// Per-turn correlation state
#[derive(Debug, Clone, Default)]
pub struct ToolCallTable {
    by_call_id: HashMap<String, String>,
    executing: VecDeque<String>,
}

impl ToolCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a protocol call id with a block
    pub fn bind(&mut self, call_id: &str, block_id: &str) {
        self.by_call_id
            .insert(call_id.to_string(), block_id.to_string());
    }

    /// Forget a call entirely (block was removed)
    pub fn forget(&mut self, call_id: &str) {
        if let Some(block_id) = self.by_call_id.remove(call_id) {
            self.executing.retain(|id| *id != block_id);
        }
    }

    pub fn lookup(&self, call_id: &str) -> Option<&str> {
        self.by_call_id.get(call_id).map(String::as_str)
    }

    /// Queue a block as awaiting its result; no-op if already queued
    pub fn mark_executing(&mut self, block_id: &str) {
        if !self.executing.iter().any(|id| id == block_id) {
            self.executing.push_back(block_id.to_string());
        }
    }

    /// Find the block a result belongs to
    ///
    /// With an id only the primary map is consulted; an unknown id is
    /// unresolved. Without one the oldest executing block is taken.
    pub fn resolve(&mut self, call_id: Option<&str>) -> Option<Resolution> {
        match call_id {
            Some(call_id) => {
                let block_id = self.by_call_id.get(call_id)?.clone();
                self.executing.retain(|id| *id != block_id);
                Some(Resolution {
                    block_id,
                    correlation: Correlation::CallId,
                })
            }
            None => {
                let block_id = self.executing.pop_front()?;
                tracing::warn!(
                    block_id = %block_id,
                    remaining = self.executing.len(),
                    "Tool result without call id; bound to oldest executing block"
                );
                Some(Resolution {
                    block_id,
                    correlation: Correlation::FifoFallback,
                })
            }
        }
    }

    /// Blocks still awaiting a result
    pub fn pending(&self) -> usize {
        self.executing.len()
    }
}
