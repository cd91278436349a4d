//! Placeholder expressions: `${namespace.path}`.
//!
//! An expression is routed to the evaluator registered for its namespace
//! (`context`, `datetime`, `random`), or to the wildcard evaluator when no
//! namespace matches. Two optional suffixes are supported:
//!
//! - `${context.request.body:$.name}` applies a JSONPath to the resolved value
//! - `${context.request.queryParams.page:-1}` supplies a fallback when the
//!   expression does not resolve
//!
//! `remote.*` expressions used in remote step captures are rewritten to
//! `context.*` before evaluation.

pub mod body;
mod context;
mod datetime;
mod random;
mod stores;

pub use context::ContextEvaluator;
pub use datetime::DateTimeEvaluator;
pub use random::RandomEvaluator;
pub use stores::StoreEvaluator;

use crate::exchange::{ExchangeResponse, HttpExchange};
use crate::store::StoreRegistry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an evaluator may read.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub exchange: &'a HttpExchange,
    /// Response visible as `context.response`; the exchange response unless
    /// overridden (remote steps expose the remote response here).
    pub response: &'a ExchangeResponse,
    pub stores: &'a StoreRegistry,
}

impl<'a> EvalContext<'a> {
    pub fn new(exchange: &'a HttpExchange, stores: &'a StoreRegistry) -> Self {
        Self {
            exchange,
            response: &exchange.response,
            stores,
        }
    }

    pub fn with_response(mut self, response: &'a ExchangeResponse) -> Self {
        self.response = response;
        self
    }
}

/// Resolves the part of an expression after its namespace.
pub trait ExpressionEvaluator: Send + Sync {
    /// `expression` is the full expression (including namespace) without
    /// the surrounding `${}` and without suffixes.
    fn evaluate(&self, expression: &str, ctx: &EvalContext<'_>) -> Option<Value>;
}

/// Evaluators keyed by namespace.
#[derive(Clone)]
pub struct ExpressionRegistry {
    evaluators: HashMap<String, Arc<dyn ExpressionEvaluator>>,
    wildcard: Option<Arc<dyn ExpressionEvaluator>>,
}

impl Default for ExpressionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("context", Arc::new(ContextEvaluator));
        registry.register("datetime", Arc::new(DateTimeEvaluator));
        registry.register("random", Arc::new(RandomEvaluator));
        registry.set_wildcard(Arc::new(StoreEvaluator));
        registry
    }
}

impl ExpressionRegistry {
    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
            wildcard: None,
        }
    }

    pub fn register(&mut self, namespace: &str, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.evaluators.insert(namespace.to_string(), evaluator);
    }

    pub fn set_wildcard(&mut self, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.wildcard = Some(evaluator);
    }

    /// Evaluate the inside of one placeholder, e.g. `context.request.path`.
    pub fn evaluate(&self, placeholder: &str, ctx: &EvalContext<'_>) -> Option<Value> {
        let parsed = Placeholder::parse(placeholder);
        let namespace = parsed.expression.split('.').next().unwrap_or_default();

        let value = match self.evaluators.get(namespace) {
            Some(evaluator) => evaluator.evaluate(parsed.expression, ctx),
            None => self
                .wildcard
                .as_ref()
                .and_then(|w| w.evaluate(parsed.expression, ctx)),
        };

        let value = match (value, parsed.json_path) {
            (Some(value), Some(path)) => apply_json_path(value, path),
            (value, _) => value,
        };

        match value {
            Some(Value::Null) | None => parsed.fallback.map(|f| Value::String(f.to_string())),
            some => some,
        }
    }

    /// Evaluate a capture/key expression.
    ///
    /// An expression that is exactly one placeholder keeps the evaluated JSON
    /// value and yields `None` if it does not resolve. Anything else is
    /// treated as a template and always yields a string.
    pub fn evaluate_expression(&self, text: &str, ctx: &EvalContext<'_>) -> Option<Value> {
        if let Some(inner) = single_placeholder(text) {
            return self.evaluate(inner, ctx);
        }
        Some(Value::String(
            crate::template::substitute(text, self, ctx).into_owned(),
        ))
    }
}

/// A placeholder split into expression and optional suffixes.
#[derive(Debug, PartialEq, Eq)]
struct Placeholder<'a> {
    expression: &'a str,
    json_path: Option<&'a str>,
    fallback: Option<&'a str>,
}

impl<'a> Placeholder<'a> {
    fn parse(text: &'a str) -> Self {
        let (main, fallback) = match text.find(":-") {
            Some(idx) => (&text[..idx], Some(&text[idx + 2..])),
            None => (text, None),
        };
        let (expression, json_path) = match main.find(":$") {
            Some(idx) => (&main[..idx], Some(&main[idx + 1..])),
            None => (main, None),
        };
        Self {
            expression: expression.trim(),
            json_path,
            fallback,
        }
    }
}

fn apply_json_path(value: Value, path: &str) -> Option<Value> {
    let document = match value {
        Value::String(s) => serde_json::from_str(&s).ok()?,
        other => other,
    };
    body::json_path_query(&document, path)
}

/// The inner text if `text` consists of exactly one `${...}` placeholder.
fn single_placeholder(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("${")?.strip_suffix('}')?;
    match find_placeholder_end(inner) {
        None => Some(inner),
        Some(_) => None,
    }
}

/// Index of the `}` closing a placeholder whose body starts at `text[0]`,
/// honouring nested braces.
pub(crate) fn find_placeholder_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Rewrite `remote.*` placeholders to `context.*`.
pub fn rewrite_remote_namespace(text: &str) -> String {
    text.replace("${remote.", "${context.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_support::exchange_with_headers;
    use hyper::Method;
    use serde_json::json;

    #[test]
    fn test_placeholder_parse() {
        assert_eq!(
            Placeholder::parse("context.request.body:$.name"),
            Placeholder {
                expression: "context.request.body",
                json_path: Some("$.name"),
                fallback: None
            }
        );
        assert_eq!(
            Placeholder::parse("context.request.queryParams.page:-1"),
            Placeholder {
                expression: "context.request.queryParams.page",
                json_path: None,
                fallback: Some("1")
            }
        );
    }

    #[test]
    fn test_evaluate_with_suffixes() {
        let ex = exchange_with_headers(
            Method::POST,
            "/pets",
            &[("X-Tenant", "acme")],
            r#"{"name": "Fluffy"}"#,
        );
        let stores = StoreRegistry::new();
        let ctx = EvalContext::new(&ex, &stores);
        let registry = ExpressionRegistry::default();

        assert_eq!(
            registry.evaluate("context.request.body:$.name", &ctx),
            Some(json!("Fluffy"))
        );
        assert_eq!(
            registry.evaluate("context.request.queryParams.page:-1", &ctx),
            Some(json!("1"))
        );
        assert_eq!(
            registry.evaluate("context.request.headers.x-tenant", &ctx),
            Some(json!("acme"))
        );
        assert_eq!(registry.evaluate("unknown.thing", &ctx), None);
    }

    #[test]
    fn test_evaluate_expression_single_vs_template() {
        let ex = exchange_with_headers(Method::GET, "/pets/1", &[], "");
        let stores = StoreRegistry::new();
        let ctx = EvalContext::new(&ex, &stores);
        let registry = ExpressionRegistry::default();

        assert_eq!(
            registry.evaluate_expression("${context.request.queryParams.missing}", &ctx),
            None
        );
        assert_eq!(
            registry.evaluate_expression("path=${context.request.path}", &ctx),
            Some(json!("path=/pets/1"))
        );
    }

    #[test]
    fn test_single_placeholder() {
        assert_eq!(single_placeholder("${a.b}"), Some("a.b"));
        assert_eq!(single_placeholder("${a.b}-${c.d}"), None);
        assert_eq!(single_placeholder("x${a.b}"), None);
    }

    #[test]
    fn test_rewrite_remote_namespace() {
        assert_eq!(
            rewrite_remote_namespace("${remote.response.body}"),
            "${context.response.body}"
        );
    }
}
