//! Security policy configuration.

use super::de;
use serde::Deserialize;

/// Outcome of a security condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SecurityEffect {
    Permit,
    Deny,
}

impl SecurityEffect {
    pub fn invert(self) -> Self {
        match self {
            SecurityEffect::Permit => SecurityEffect::Deny,
            SecurityEffect::Deny => SecurityEffect::Permit,
        }
    }
}

/// Comparison used by security conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SecurityOperator {
    #[default]
    EqualTo,
    NotEqualTo,
}

/// A single `name: value` expectation inside a condition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SecurityMatch {
    Simple(de::ScalarString),
    Detailed {
        #[serde(deserialize_with = "de::optional_scalar", default)]
        value: Option<String>,
        #[serde(default)]
        operator: SecurityOperator,
    },
}

impl SecurityMatch {
    pub fn value(&self) -> Option<&str> {
        match self {
            SecurityMatch::Simple(v) => Some(v.0.as_str()),
            SecurityMatch::Detailed { value, .. } => value.as_deref(),
        }
    }

    pub fn operator(&self) -> SecurityOperator {
        match self {
            SecurityMatch::Simple(_) => SecurityOperator::EqualTo,
            SecurityMatch::Detailed { operator, .. } => *operator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCondition {
    #[serde(default = "default_permit")]
    pub effect: SecurityEffect,
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub query_params: Vec<(String, SecurityMatch)>,
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub request_headers: Vec<(String, SecurityMatch)>,
}

fn default_permit() -> SecurityEffect {
    SecurityEffect::Permit
}

/// Default effect plus an ordered list of conditions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecurityConfig {
    pub default: SecurityEffect,
    #[serde(default)]
    pub conditions: Vec<SecurityCondition>,
}
