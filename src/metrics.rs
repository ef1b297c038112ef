//! Metrics collector (C6): in-memory aggregate plus an optional telemetry
//! sink, with scope-guard types that guarantee trace closure on every exit
//! path — including early `?` returns and panics unwinding through `Drop`.
//!
//! No teacher equivalent exists (the teacher has no metrics module); the
//! scope-guard-with-mandatory-close pattern is grounded on the teacher's
//! discipline of sending an event on every branch in `agent_loop.rs`
//! (`tx.send(...).ok()`), generalized into an explicit guard type per the
//! spec's "scoped acquisition, guaranteed release" design note.

use crate::types::Usage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Telemetry sink capability. No concrete OTLP/Prometheus exporter ships
/// with this crate; `NoopMeterProvider` is the default.
pub trait MeterProvider: Send + Sync {
    fn increment_counter(&self, name: &str, attributes: &[(&str, &str)]);
    fn record_histogram(&self, name: &str, value: f64, attributes: &[(&str, &str)]);
}

pub struct NoopMeterProvider;

impl MeterProvider for NoopMeterProvider {
    fn increment_counter(&self, _name: &str, _attributes: &[(&str, &str)]) {}
    fn record_histogram(&self, _name: &str, _value: f64, _attributes: &[(&str, &str)]) {}
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TraceRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A trace node with its children materialized, forming a tree rooted at
/// cycles. Built on demand from the flat `TraceRecord` list at snapshot time.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TraceNode {
    pub id: String,
    pub name: String,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub parent_id: Option<String>,
    pub children: Vec<TraceNode>,
    pub metadata: HashMap<String, serde_json::Value>,
}

fn build_tree(records: &[TraceRecord], parent_id: Option<&str>) -> Vec<TraceNode> {
    records
        .iter()
        .filter(|r| r.parent_id.as_deref() == parent_id)
        .map(|r| TraceNode {
            id: r.id.clone(),
            name: r.name.clone(),
            start_time_ms: r.start_ms,
            end_time_ms: r.end_ms,
            duration_ms: r.duration_ms,
            parent_id: r.parent_id.clone(),
            children: build_tree(records, Some(r.id.as_str())),
            metadata: r.metadata.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ToolStat {
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}

impl ToolStat {
    pub fn average_duration_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.calls as f64
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub cycle_count: u64,
    pub cycle_duration_total_ms: u64,
    pub model_invocation_count: u64,
    pub model_latency_total_ms: u64,
    pub usage_total: Usage,
    pub tool_stats: HashMap<String, ToolStat>,
    pub traces: Vec<TraceNode>,
}

#[derive(Default)]
struct MetricsState {
    cycle_count: u64,
    cycle_duration_total_ms: u64,
    model_invocation_count: u64,
    model_latency_total_ms: u64,
    usage_total: Usage,
    tool_stats: HashMap<String, ToolStat>,
    traces: Vec<TraceRecord>,
}

fn now_ms() -> u64 {
    crate::types::now_ms()
}

/// Aggregate metrics plus an optional telemetry sink. Cheap to clone (shares
/// the underlying state via `Arc`).
#[derive(Clone)]
pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
    meter: Arc<dyn MeterProvider>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Arc::new(NoopMeterProvider))
    }
}

impl MetricsCollector {
    pub fn new(meter: Arc<dyn MeterProvider>) -> Self {
        Self { state: Arc::new(Mutex::new(MetricsState::default())), meter }
    }

    fn push_trace(&self, name: &str, parent: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().unwrap();
        state.traces.push(TraceRecord {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent.map(str::to_string),
            start_ms: now_ms(),
            end_ms: None,
            duration_ms: None,
            metadata: HashMap::new(),
        });
        id
    }

    fn close_trace(&self, id: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let end = now_ms();
        if let Some(record) = state.traces.iter_mut().find(|r| r.id == id) {
            let duration = end.saturating_sub(record.start_ms);
            record.end_ms = Some(end);
            record.duration_ms = Some(duration);
            duration
        } else {
            0
        }
    }

    pub fn start_cycle(&self, name: &str, parent: Option<&str>) -> CycleScope {
        let id = self.push_trace(name, parent);
        CycleScope { id, collector: self.clone(), closed: false }
    }

    pub fn start_tool_execution(&self, tool_name: &str, parent: Option<&str>) -> ToolScope {
        let id = self.push_trace(tool_name, parent);
        ToolScope { id, tool_name: tool_name.to_string(), collector: self.clone(), success: false, closed: false }
    }

    pub fn record_model_invocation(&self, latency_ms: u64, usage: Usage, _time_to_first_byte_ms: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        state.model_invocation_count += 1;
        state.model_latency_total_ms += latency_ms;
        state.usage_total.add(&usage);
        drop(state);
        self.meter.increment_counter("model.invocation.count", &[]);
        self.meter.record_histogram("model.latency", latency_ms as f64, &[]);
        self.meter.record_histogram("model.input_tokens", usage.input_tokens as f64, &[]);
        self.meter.record_histogram("model.output_tokens", usage.output_tokens as f64, &[]);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        MetricsSnapshot {
            cycle_count: state.cycle_count,
            cycle_duration_total_ms: state.cycle_duration_total_ms,
            model_invocation_count: state.model_invocation_count,
            model_latency_total_ms: state.model_latency_total_ms,
            usage_total: state.usage_total,
            tool_stats: state.tool_stats.clone(),
            traces: build_tree(&state.traces, None),
        }
    }
}

/// Guard returned by `start_cycle`. `close()` is mandatory; a guard dropped
/// without an explicit close still closes itself, logging a warning rather
/// than panicking (mirrors the teacher's "send on every path" discipline
/// without crashing the process on a missed call site).
pub struct CycleScope {
    id: String,
    collector: MetricsCollector,
    closed: bool,
}

impl CycleScope {
    pub fn trace_id(&self) -> &str {
        &self.id
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let duration = self.collector.close_trace(&self.id);
        let mut state = self.collector.state.lock().unwrap();
        state.cycle_count += 1;
        state.cycle_duration_total_ms += duration;
        drop(state);
        self.collector.meter.increment_counter("cycle.count", &[]);
        self.collector.meter.record_histogram("cycle.duration", duration as f64, &[]);
        self.closed = true;
    }
}

impl Drop for CycleScope {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(trace_id = %self.id, "CycleScope dropped without explicit close()");
            self.close();
        }
    }
}

/// Guard returned by `start_tool_execution`. Default outcome is error;
/// `mark_success()` before `close()` flips it.
pub struct ToolScope {
    id: String,
    tool_name: String,
    collector: MetricsCollector,
    success: bool,
    closed: bool,
}

impl ToolScope {
    pub fn trace_id(&self) -> &str {
        &self.id
    }

    pub fn mark_success(&mut self) {
        self.success = true;
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let duration = self.collector.close_trace(&self.id);
        let mut state = self.collector.state.lock().unwrap();
        let stat = state.tool_stats.entry(self.tool_name.clone()).or_default();
        stat.calls += 1;
        stat.total_duration_ms += duration;
        if self.success {
            stat.successes += 1;
        } else {
            stat.errors += 1;
        }
        drop(state);
        let outcome = if self.success { "success" } else { "error" };
        self.collector.meter.increment_counter("tool.call.count", &[("tool_name", &self.tool_name)]);
        self.collector
            .meter
            .increment_counter(&format!("tool.{outcome}.count"), &[("tool_name", &self.tool_name)]);
        self.collector
            .meter
            .record_histogram("tool.duration", duration as f64, &[("tool_name", &self.tool_name)]);
        self.closed = true;
    }
}

impl Drop for ToolScope {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(trace_id = %self.id, tool_name = %self.tool_name, "ToolScope dropped without explicit close()");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_scope_records_count_and_duration() {
        let collector = MetricsCollector::default();
        let mut scope = collector.start_cycle("cycle", None);
        scope.close();
        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.cycle_count, 1);
        assert_eq!(snapshot.traces.len(), 1);
    }

    #[test]
    fn tool_scope_defaults_to_error_unless_marked_success() {
        let collector = MetricsCollector::default();
        let mut scope = collector.start_tool_execution("bash", None);
        scope.mark_success();
        scope.close();
        let snapshot = collector.get_metrics();
        let stat = snapshot.tool_stats.get("bash").unwrap();
        assert_eq!(stat.successes, 1);
        assert_eq!(stat.errors, 0);
    }

    #[test]
    fn tool_scope_dropped_without_close_still_records_as_error() {
        let collector = MetricsCollector::default();
        {
            let _scope = collector.start_tool_execution("bash", None);
        }
        let snapshot = collector.get_metrics();
        let stat = snapshot.tool_stats.get("bash").unwrap();
        assert_eq!(stat.errors, 1);
    }

    #[test]
    fn get_metrics_returns_a_deep_copy() {
        let collector = MetricsCollector::default();
        let mut snapshot = collector.get_metrics();
        snapshot.cycle_count = 999;
        assert_eq!(collector.get_metrics().cycle_count, 0);
    }

    #[test]
    fn nested_trace_builds_parent_child_tree() {
        let collector = MetricsCollector::default();
        let mut cycle = collector.start_cycle("cycle", None);
        let mut tool = collector.start_tool_execution("bash", Some(cycle.trace_id()));
        tool.mark_success();
        tool.close();
        cycle.close();
        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.traces.len(), 1);
        assert_eq!(snapshot.traces[0].children.len(), 1);
        assert_eq!(snapshot.traces[0].children[0].name, "bash");
    }
}
