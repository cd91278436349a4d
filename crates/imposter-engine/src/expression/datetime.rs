//! `datetime.*`: the current time in a few fixed formats.

use super::{EvalContext, ExpressionEvaluator};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

pub struct DateTimeEvaluator;

impl ExpressionEvaluator for DateTimeEvaluator {
    fn evaluate(&self, expression: &str, _ctx: &EvalContext<'_>) -> Option<Value> {
        let now = Utc::now();
        let text = match expression.strip_prefix("datetime.")? {
            "now.iso8601_date" => now.format("%Y-%m-%d").to_string(),
            "now.iso8601_datetime" => now.to_rfc3339_opts(SecondsFormat::Millis, true),
            "now.millis" => now.timestamp_millis().to_string(),
            "now.nanos" => now.timestamp_nanos_opt()?.to_string(),
            _ => return None,
        };
        Some(Value::String(text))
    }
}
