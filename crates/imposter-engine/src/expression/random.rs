//! `random.*`: random identifiers and strings.
//!
//! `random.uuid()`, `random.alphabetic(length=8)`, `random.numeric(length=4)`
//! and `random.alphanumeric(length=12,uppercase=true)`.

use super::{EvalContext, ExpressionEvaluator};
use rand::Rng;
use serde_json::Value;

const ALPHABETIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMERIC: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const DEFAULT_LENGTH: usize = 1;

pub struct RandomEvaluator;

impl ExpressionEvaluator for RandomEvaluator {
    fn evaluate(&self, expression: &str, _ctx: &EvalContext<'_>) -> Option<Value> {
        let call = expression.strip_prefix("random.")?;
        let (name, args) = match call.split_once('(') {
            Some((name, rest)) => (name, rest.strip_suffix(')')?),
            None => (call, ""),
        };

        let mut length = DEFAULT_LENGTH;
        let mut uppercase = false;
        for arg in args.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            match arg.split_once('=') {
                Some(("length", v)) => length = v.trim().parse().ok()?,
                Some(("uppercase", v)) => uppercase = v.trim() == "true",
                _ => return None,
            }
        }

        let text = match name {
            "uuid" => uuid::Uuid::new_v4().to_string(),
            "alphabetic" => random_string(ALPHABETIC, length),
            "numeric" => random_string(NUMERIC, length),
            "alphanumeric" => random_string(ALPHANUMERIC, length),
            _ => return None,
        };
        Some(Value::String(if uppercase {
            text.to_uppercase()
        } else {
            text
        }))
    }
}

fn random_string(charset: &[u8], length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}
