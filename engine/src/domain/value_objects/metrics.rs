use serde_json::Value;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::warn;

/// One aggregated metrics collection across all monitors, plus the
/// agent-supplied defaults.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub captured_at: SystemTime,
    pub values: BTreeMap<String, Value>,
}

impl MetricsSnapshot {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        MetricsSnapshot {
            captured_at: SystemTime::now(),
            values,
        }
    }
}

/// Drop entries that cannot cross the wire as JSON.
///
/// Monitors are plugin code; a monitor handing back a null (the typical
/// result of converting a NaN or infinite reading) must not poison the whole
/// snapshot for every consumer.
pub fn sanitize_metric_values(values: &mut BTreeMap<String, Value>) {
    values.retain(|key, value| {
        if value_is_transferable(value) {
            true
        } else {
            warn!(metric = %key, "dropping metric value that cannot be serialized");
            false
        }
    });
}

fn value_is_transferable(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => items.iter().all(value_is_transferable),
        Value::Object(map) => map.values().all(value_is_transferable),
        _ => true,
    }
}

/// Convert a raw floating-point reading into a transferable JSON value.
/// Non-finite readings have no JSON representation and yield `None`.
pub fn metric_number(value: f64) -> Option<Value> {
    serde_json::Number::from_f64(value).map(Value::Number)
}
