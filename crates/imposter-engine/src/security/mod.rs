//! Security policy evaluation.
//!
//! The policy of the matched resource applies if it declares one, otherwise
//! the root resource's policy. With no conditions the default effect
//! applies. Otherwise each condition is evaluated independently: every
//! configured pair yields the condition's effect when its operator matches
//! and the inverse effect otherwise, and the condition permits only if all of
//! its pairs permit. Any denying condition denies the request.

use crate::config::{
    ResourceConfig, SecurityCondition, SecurityConfig, SecurityEffect, SecurityMatch,
    SecurityOperator,
};
use crate::error::EngineError;
use crate::exchange::{ExchangeRequest, HttpExchange};
use tracing::{debug, warn};

/// Evaluate the applicable security policy. On denial the exchange is marked
/// failed with [`EngineError::SecurityDenial`].
pub fn is_permitted(
    root: &ResourceConfig,
    matched: Option<&ResourceConfig>,
    exchange: &mut HttpExchange,
) -> bool {
    let policy = matched
        .and_then(|m| m.security.as_ref())
        .or(root.security.as_ref());

    let Some(policy) = policy else {
        return true;
    };

    let effect = evaluate(policy, &exchange.request);
    match effect {
        SecurityEffect::Permit => {
            debug!(
                "Request {} {} permitted by security policy",
                exchange.request.method, exchange.request.path
            );
            true
        }
        SecurityEffect::Deny => {
            warn!(
                "Request {} {} denied by security policy",
                exchange.request.method, exchange.request.path
            );
            exchange.fail(EngineError::SecurityDenial);
            false
        }
    }
}

/// The overall effect of a policy for a request.
pub fn evaluate(policy: &SecurityConfig, request: &ExchangeRequest) -> SecurityEffect {
    if policy.conditions.is_empty() {
        return policy.default;
    }

    let denied = policy
        .conditions
        .iter()
        .any(|condition| condition_effect(condition, request) == SecurityEffect::Deny);

    if denied {
        SecurityEffect::Deny
    } else {
        SecurityEffect::Permit
    }
}

fn condition_effect(condition: &SecurityCondition, request: &ExchangeRequest) -> SecurityEffect {
    let query_effects = condition
        .query_params
        .iter()
        .map(|(name, m)| pair_effect(condition.effect, m, request.query_param(name)));
    let header_effects = condition
        .request_headers
        .iter()
        .map(|(name, m)| pair_effect(condition.effect, m, request.header(name)));

    if query_effects
        .chain(header_effects)
        .all(|e| e == SecurityEffect::Permit)
    {
        SecurityEffect::Permit
    } else {
        SecurityEffect::Deny
    }
}

fn pair_effect(effect: SecurityEffect, expected: &SecurityMatch, actual: Option<&str>) -> SecurityEffect {
    let matched = match expected.operator() {
        SecurityOperator::EqualTo => actual == expected.value(),
        SecurityOperator::NotEqualTo => actual != expected.value(),
    };
    if matched {
        effect
    } else {
        effect.invert()
    }
}
