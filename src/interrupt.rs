//! Interrupt / resume protocol (C5).
//!
//! No teacher equivalent exists; the module is designed directly from the
//! spec using the teacher's general "small struct + plain functions" module
//! style (as in `context.rs`) for the HOW. IDs are deterministic so a resume
//! replays the same pause points: `v1:<origin>:<key>:<sha256-hex>`.

use crate::error::{AgentError, ToolError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// A named pause point raised by a tool or hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interrupt {
    pub id: String,
    pub name: String,
    pub reason: Option<String>,
    pub response: Option<serde_json::Value>,
}

/// `{interrupt_id, response}` item a caller submits to resume a paused agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptResponse {
    pub interrupt_id: String,
    pub response: serde_json::Value,
}

fn compute_id(origin: &str, key: &str, ordinal: u64, input: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin.as_bytes());
    hasher.update(key.as_bytes());
    hasher.update(ordinal.to_be_bytes());
    hasher.update(input.to_string().as_bytes());
    format!("v1:{origin}:{key}:{}", hex::encode(hasher.finalize()))
}

/// Owns the set of interrupts raised by the current (possibly paused)
/// invocation, plus a scratch `context` map for partial progress (tool
/// results collected before the pause, keyed by origin-key) that a resume
/// needs to re-use rather than re-execute.
#[derive(Default)]
pub struct InterruptState {
    inner: Mutex<InterruptStateInner>,
}

#[derive(Default, Clone, Serialize, Deserialize)]
struct InterruptStateInner {
    activated: bool,
    interrupts: HashMap<String, Interrupt>,
    context: HashMap<String, serde_json::Value>,
}

/// A deep-copy snapshot of `InterruptState`, safe to hand to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InterruptStateSnapshot {
    pub activated: bool,
    pub interrupts: HashMap<String, Interrupt>,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_activated(&self) -> bool {
        self.inner.lock().unwrap().activated
    }

    pub fn snapshot(&self) -> InterruptStateSnapshot {
        let inner = self.inner.lock().unwrap();
        InterruptStateSnapshot { activated: inner.activated, interrupts: inner.interrupts.clone() }
    }

    /// Raise (or idempotently replay) an interrupt for a given origin/key/
    /// ordinal. Returns `Ok(response)` if this exact pause point already has
    /// a recorded response (the resume path), or `Err(ToolError::Cancelled)`
    /// as the pause sentinel the loop catches on first encounter.
    pub fn raise(
        &self,
        origin: &str,
        key: &str,
        ordinal: u64,
        input: &serde_json::Value,
        name: &str,
        reason: Option<String>,
    ) -> Result<serde_json::Value, ToolError> {
        let id = compute_id(origin, key, ordinal, input);
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.interrupts.get(&id) {
            if let Some(response) = existing.response.clone() {
                return Ok(response);
            }
        }
        inner.activated = true;
        inner.interrupts.entry(id.clone()).or_insert_with(|| Interrupt {
            id: id.clone(),
            name: name.to_string(),
            reason,
            response: None,
        });
        Err(ToolError::Interrupted(id))
    }

    /// Stash partial progress (e.g. a completed tool result) keyed by
    /// origin-key, so a resume can re-use it instead of re-executing.
    pub fn save_context(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.lock().unwrap().context.insert(key.into(), value);
    }

    pub fn take_context(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().unwrap().context.get(key).cloned()
    }

    /// Drop one stashed context entry (e.g. once the cycle it belongs to has
    /// fully committed and no resume can reference it anymore).
    pub fn clear_context(&self, key: &str) {
        self.inner.lock().unwrap().context.remove(key);
    }

    /// Validate and apply a batch of resume responses. Fails loudly if any
    /// referenced ID is unknown.
    pub fn apply_resume(&self, responses: &[InterruptResponse]) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().unwrap();
        for r in responses {
            if !inner.interrupts.contains_key(&r.interrupt_id) {
                return Err(AgentError::UnknownInterrupt(r.interrupt_id.clone()));
            }
        }
        for r in responses {
            if let Some(interrupt) = inner.interrupts.get_mut(&r.interrupt_id) {
                interrupt.response = Some(r.response.clone());
            }
        }
        Ok(())
    }

    /// Clear all state after a fully successful resume.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.activated = false;
        inner.interrupts.clear();
        inner.context.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_is_deterministic_for_the_same_inputs() {
        let input = serde_json::json!({"a": 1});
        let id1 = compute_id("tool_call", "t1", 0, &input);
        let id2 = compute_id("tool_call", "t1", 0, &input);
        assert_eq!(id1, id2);
        assert!(id1.starts_with("v1:tool_call:t1:"));
    }

    #[test]
    fn first_raise_pauses_then_resume_replays_the_response() {
        let state = InterruptState::new();
        let input = serde_json::json!({"amount": 100});
        let err = state.raise("tool_call", "approve-payment", 0, &input, "approval", Some("needs ok".into())).unwrap_err();
        assert!(matches!(err, ToolError::Interrupted(_)));
        assert!(state.is_activated());

        let id = state.snapshot().interrupts.keys().next().unwrap().clone();
        state
            .apply_resume(&[InterruptResponse { interrupt_id: id, response: serde_json::json!(true) }])
            .unwrap();

        let response = state.raise("tool_call", "approve-payment", 0, &input, "approval", None).unwrap();
        assert_eq!(response, serde_json::json!(true));
    }

    #[test]
    fn resume_with_unknown_id_fails() {
        let state = InterruptState::new();
        let err = state
            .apply_resume(&[InterruptResponse { interrupt_id: "v1:tool_call:x:deadbeef".into(), response: serde_json::json!(1) }])
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownInterrupt(_)));
    }

    #[test]
    fn clear_resets_activation_and_interrupts() {
        let state = InterruptState::new();
        let _ = state.raise("tool_call", "k", 0, &serde_json::json!({}), "n", None);
        assert!(state.is_activated());
        state.clear();
        assert!(!state.is_activated());
        assert!(state.snapshot().interrupts.is_empty());
    }
}
