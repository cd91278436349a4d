//! `stores.<store>.<key>`: items from named or request-scoped stores.

use super::{EvalContext, ExpressionEvaluator};
use crate::store::REQUEST_STORE_NAME;
use serde_json::Value;

/// Wildcard evaluator backed by the store registry. Reading never creates a
/// store.
pub struct StoreEvaluator;

impl ExpressionEvaluator for StoreEvaluator {
    fn evaluate(&self, expression: &str, ctx: &EvalContext<'_>) -> Option<Value> {
        let path = expression.strip_prefix("stores.")?;
        let (store_name, key) = path.split_once('.')?;
        let store = if store_name == REQUEST_STORE_NAME {
            ctx.stores
                .existing_request_store(ctx.exchange.request_id())?
        } else {
            ctx.stores.get(store_name)?
        };
        store.load(key)
    }
}
