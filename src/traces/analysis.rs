#![forbid(unsafe_code)]

// Span extraction and per-request latency breakdown

use std::collections::BTreeMap;

use serde_json::Value;

use super::types::{Component, Span, TraceRecord, REQUEST_SPAN_NAMES};
use crate::stats::AggregateStats;

/// Flattens `batches[].scopeSpans[].spans[]` of an OTLP-JSON trace.
pub fn extract_spans(trace: &Value) -> Vec<Span> {
    let batches = trace.get("batches").and_then(Value::as_array);
    batches
        .into_iter()
        .flatten()
        .filter_map(|batch| batch.get("scopeSpans").and_then(Value::as_array))
        .flatten()
        .filter_map(|scope| scope.get("spans").and_then(Value::as_array))
        .flatten()
        .map(|span| Span {
            name: span
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            start_ns: nanos(span.get("startTimeUnixNano")),
            end_ns: nanos(span.get("endTimeUnixNano")),
        })
        .collect()
}

/// Timestamps arrive as decimal strings, occasionally as plain numbers.
fn nanos(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

/// Builds a record from one trace's spans, or `None` if no span matched a
/// recognized name.
pub fn analyze_spans(trace_id: &str, step: u64, spans: &[Span]) -> Option<TraceRecord> {
    let mut matched = false;
    let mut request_duration_ms = 0.0;
    let mut tool_call_count = 0;
    let mut component_durations: BTreeMap<Component, Vec<f64>> = BTreeMap::new();

    for span in spans {
        let duration = span.duration_ms();

        if REQUEST_SPAN_NAMES.contains(&span.name.as_str()) {
            matched = true;
            if duration > 0.0 {
                request_duration_ms = duration;
            }
        }

        for component in Component::ALL {
            if !component.matches(&span.name) {
                continue;
            }
            matched = true;
            if component == Component::InvokeTool {
                tool_call_count += 1;
            }
            if duration > 0.0 {
                component_durations.entry(component).or_default().push(duration);
            }
        }
    }

    matched.then(|| TraceRecord {
        trace_id: trace_id.to_string(),
        step,
        request_duration_ms,
        tool_call_count,
        component_durations,
    })
}

/// Cross-request aggregates. Keys appear only when their input is non-empty.
pub fn aggregate(records: &[TraceRecord]) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    let durations: Vec<f64> = records
        .iter()
        .map(|r| r.request_duration_ms)
        .filter(|d| *d > 0.0)
        .collect();
    if let Some(stats) = AggregateStats::from_values(&durations) {
        insert(&mut metrics, "avg_total_request_duration_ms", stats.mean);
        insert(&mut metrics, "p50_total_request_duration_ms", stats.p50);
        insert(&mut metrics, "p95_total_request_duration_ms", stats.p95);
        insert(&mut metrics, "min_total_request_duration_ms", stats.min);
        insert(&mut metrics, "max_total_request_duration_ms", stats.max);
    }

    let tools: Vec<f64> = records
        .iter()
        .filter(|r| r.tool_call_count > 0)
        .map(|r| r.tool_call_count as f64)
        .collect();
    if let Some(stats) = AggregateStats::from_values(&tools) {
        insert(&mut metrics, "avg_tool_calls_per_request", stats.mean);
        insert(&mut metrics, "total_tool_calls", stats.sum);
    }

    let inference = flatten(records, Component::Inference);
    if let Some(stats) = AggregateStats::from_values(&inference) {
        insert(&mut metrics, "avg_inference_duration_ms", stats.mean);
        insert(&mut metrics, "p50_inference_duration_ms", stats.p50);
        insert(&mut metrics, "p95_inference_duration_ms", stats.p95);
    }

    let list_tools = flatten(records, Component::ListTools);
    if let Some(stats) = AggregateStats::from_values(&list_tools) {
        insert(&mut metrics, "avg_list_tools_duration_ms", stats.mean);
    }

    let invoke = flatten(records, Component::InvokeTool);
    if let Some(stats) = AggregateStats::from_values(&invoke) {
        insert(&mut metrics, "avg_invoke_tool_duration_ms", stats.mean);
        insert(&mut metrics, "p95_invoke_tool_duration_ms", stats.p95);
    }

    metrics
}

fn flatten(records: &[TraceRecord], component: Component) -> Vec<f64> {
    records
        .iter()
        .flat_map(|r| r.durations(component).iter().copied())
        .collect()
}

fn insert(metrics: &mut BTreeMap<String, f64>, name: &str, value: f64) {
    metrics.insert(format!("trace/{name}"), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Offsets are relative to t = 1 s, since a zero timestamp means "missing".
    fn span(name: &str, start_ms: u64, end_ms: u64) -> Span {
        Span {
            name: name.to_string(),
            start_ns: (start_ms + 1_000) * 1_000_000,
            end_ns: (end_ms + 1_000) * 1_000_000,
        }
    }

    #[test]
    fn test_extract_spans_from_batches() {
        let trace = json!({
            "batches": [
                {"scopeSpans": [
                    {"spans": [
                        {"name": "/v1/responses", "startTimeUnixNano": "1000000", "endTimeUnixNano": "5000000"},
                        {"name": "invoke_mcp_tool", "startTimeUnixNano": 2000000, "endTimeUnixNano": "3000000"}
                    ]}
                ]},
                {"scopeSpans": [{"spans": [{"name": "db.query"}]}]},
                {"resource": {}}
            ]
        });
        let spans = extract_spans(&trace);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].duration_ms(), 4.0);
        assert_eq!(spans[1].duration_ms(), 1.0);
        assert_eq!(spans[2].duration_ms(), 0.0);
    }

    #[test]
    fn test_extract_spans_from_empty_trace() {
        assert!(extract_spans(&json!({})).is_empty());
        assert!(extract_spans(&json!({"batches": "nope"})).is_empty());
    }

    #[test]
    fn test_analyze_request_breakdown() {
        let spans = vec![
            span("/v1/responses", 0, 900),
            span("InferenceRouter.openai_chat_completion", 10, 310),
            span("list_mcp_tools", 320, 340),
            span("invoke_mcp_tool", 350, 450),
            span("invoke_mcp_tool", 460, 460),
            span("chat_completion", 470, 870),
            span("unrelated", 0, 1),
        ];
        let record = analyze_spans("t1", 3, &spans).unwrap();
        assert_eq!(record.step, 3);
        assert_eq!(record.request_duration_ms, 900.0);
        assert_eq!(record.tool_call_count, 2);
        assert_eq!(record.durations(Component::Inference), &[300.0, 400.0]);
        assert_eq!(record.durations(Component::ListTools), &[20.0]);
        // zero-length invocation is counted but has no duration
        assert_eq!(record.durations(Component::InvokeTool), &[100.0]);
    }

    #[test]
    fn test_unmatched_trace_is_excluded() {
        let spans = vec![span("GET /health", 0, 5), span("db.query", 1, 2)];
        assert!(analyze_spans("t2", 0, &spans).is_none());
        assert!(analyze_spans("t3", 0, &[]).is_none());
    }

    #[test]
    fn test_aggregate_keys() {
        let records: Vec<TraceRecord> = (0..4)
            .map(|i| {
                analyze_spans(
                    &format!("t{i}"),
                    i,
                    &[
                        span("create_response", 0, 100 * (i + 1)),
                        span("invoke_tool", 0, 10),
                        span("chat_completion", 0, 50),
                    ],
                )
                .unwrap()
            })
            .collect();

        let agg = aggregate(&records);
        assert_eq!(agg["trace/avg_total_request_duration_ms"], 250.0);
        assert_eq!(agg["trace/min_total_request_duration_ms"], 100.0);
        assert_eq!(agg["trace/max_total_request_duration_ms"], 400.0);
        assert_eq!(agg["trace/p50_total_request_duration_ms"], 300.0);
        assert_eq!(agg["trace/p95_total_request_duration_ms"], 400.0);
        assert_eq!(agg["trace/avg_tool_calls_per_request"], 1.0);
        assert_eq!(agg["trace/total_tool_calls"], 4.0);
        assert_eq!(agg["trace/avg_inference_duration_ms"], 50.0);
        assert_eq!(agg["trace/avg_invoke_tool_duration_ms"], 10.0);
        assert!(!agg.contains_key("trace/avg_list_tools_duration_ms"));
    }

    #[test]
    fn test_zero_start_timestamp_has_no_request_duration() {
        let spans = vec![
            Span {
                name: "/v1/responses".to_string(),
                start_ns: 0,
                end_ns: 900_000_000,
            },
            span("chat_completion", 10, 60),
        ];
        assert_eq!(spans[0].duration_ms(), 0.0);

        let record = analyze_spans("t0", 0, &spans).unwrap();
        assert_eq!(record.request_duration_ms, 0.0);

        let agg = aggregate(&[record]);
        assert!(agg.keys().all(|k| !k.ends_with("_total_request_duration_ms")));
        assert_eq!(agg["trace/avg_inference_duration_ms"], 50.0);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(&[]).is_empty());
    }
}
