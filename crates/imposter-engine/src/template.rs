//! Response templating.
//!
//! Replaces `${...}` placeholders in response bodies and header values using
//! the same expression evaluators as captures.
//!
//! # Example
//!
//! ```yaml
//! response:
//!   template: true
//!   content: '{"echo": "${context.request.queryParams.message}", "at": "${datetime.now.iso8601_date}"}'
//! ```
//!
//! Unresolved placeholders are replaced with an empty string. Text without
//! placeholders is returned borrowed and unchanged, so substitution is
//! idempotent once every placeholder has been resolved.

use crate::expression::body::value_to_string;
use crate::expression::{find_placeholder_end, EvalContext, ExpressionRegistry};
use std::borrow::Cow;

/// Substitute every placeholder in `template`.
pub fn substitute<'t>(
    template: &'t str,
    registry: &ExpressionRegistry,
    ctx: &EvalContext<'_>,
) -> Cow<'t, str> {
    if !has_placeholders(template) {
        return Cow::Borrowed(template);
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        match find_placeholder_end(body) {
            Some(end) => {
                if let Some(value) = registry.evaluate(&body[..end], ctx) {
                    output.push_str(&value_to_string(&value));
                }
                rest = &body[end + 1..];
            }
            None => {
                // Unterminated placeholder: keep the remainder verbatim
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);

    if output == template {
        Cow::Borrowed(template)
    } else {
        Cow::Owned(output)
    }
}

/// Substitute placeholders in a byte buffer. Non-UTF-8 buffers and buffers
/// without placeholders are returned unchanged.
pub fn substitute_bytes(
    body: &bytes::Bytes,
    registry: &ExpressionRegistry,
    ctx: &EvalContext<'_>,
) -> bytes::Bytes {
    let Ok(text) = std::str::from_utf8(body) else {
        return body.clone();
    };
    match substitute(text, registry, ctx) {
        Cow::Borrowed(_) => body.clone(),
        Cow::Owned(s) => bytes::Bytes::from(s),
    }
}

/// Check if a string contains a complete `${...}` placeholder.
pub fn has_placeholders(s: &str) -> bool {
    s.find("${")
        .is_some_and(|start| find_placeholder_end(&s[start + 2..]).is_some())
}
