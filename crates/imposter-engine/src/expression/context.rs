//! `context.*`: fields of the current request and response.

use super::{EvalContext, ExpressionEvaluator};
use crate::exchange::parse_query_string;
use crate::exchange::headers::HeaderMapExt;
use serde_json::Value;

pub struct ContextEvaluator;

impl ExpressionEvaluator for ContextEvaluator {
    fn evaluate(&self, expression: &str, ctx: &EvalContext<'_>) -> Option<Value> {
        let path = expression.strip_prefix("context.")?;
        let (section, rest) = path.split_once('.').unwrap_or((path, ""));
        let text = match section {
            "request" => request_field(rest, ctx),
            "response" => response_field(rest, ctx),
            "requestId" => Some(ctx.exchange.request_id().to_string()),
            _ => None,
        }?;
        Some(Value::String(text))
    }
}

fn request_field(path: &str, ctx: &EvalContext<'_>) -> Option<String> {
    let request = &ctx.exchange.request;
    let (field, name) = path.split_once('.').unwrap_or((path, ""));
    match (field, name) {
        ("method", "") => Some(request.method.to_string()),
        ("path", "") => Some(request.path.clone()),
        ("uri", "") => Some(request.uri()),
        ("body", "") => Some(request.body_text()),
        ("pathParams", name) => request.path_param(name).map(str::to_string),
        ("queryParams", name) => request.query_param(name).map(str::to_string),
        ("headers", name) => request.header(name).map(str::to_string),
        ("formParams", name) => parse_query_string(Some(&request.body_text()))
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v),
        _ => None,
    }
}

fn response_field(path: &str, ctx: &EvalContext<'_>) -> Option<String> {
    let response = ctx.response;
    let (field, name) = path.split_once('.').unwrap_or((path, ""));
    match (field, name) {
        ("statusCode", "") => Some(response.status.as_u16().to_string()),
        ("body", "") => Some(response.body_text()),
        ("headers", name) => response.headers.get_str(name).map(str::to_string),
        _ => None,
    }
}
