//! Compiled value conditions for params, headers and body values.

use crate::config::{MatchCondition, MatchOperator};
use crate::error::ConfigError;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct ValueMatcher {
    operator: MatchOperator,
    value: Option<String>,
    regex: Option<Regex>,
}

impl ValueMatcher {
    /// Compile an operator/value pair. A missing value turns `EqualTo` into
    /// an existence check and `NotEqualTo` into a non-existence check.
    pub fn new(operator: MatchOperator, value: Option<&str>) -> Result<Self, ConfigError> {
        let operator = match (operator, value) {
            (MatchOperator::EqualTo, None) => MatchOperator::Exists,
            (MatchOperator::NotEqualTo, None) => MatchOperator::NotExists,
            (op, _) => op,
        };
        let regex = match operator {
            MatchOperator::Matches | MatchOperator::NotMatches => {
                let pattern = value.unwrap_or_default();
                Some(
                    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                        pattern: pattern.to_string(),
                        source,
                    })?,
                )
            }
            _ => None,
        };
        Ok(Self {
            operator,
            value: value.map(str::to_string),
            regex,
        })
    }

    pub fn compile(condition: &MatchCondition) -> Result<Self, ConfigError> {
        Self::new(condition.operator(), condition.value())
    }

    /// Evaluate against the request value, `None` if absent.
    pub fn matches(&self, actual: Option<&str>) -> bool {
        let expected = self.value.as_deref().unwrap_or_default();
        match self.operator {
            MatchOperator::EqualTo => actual == Some(expected),
            MatchOperator::NotEqualTo => actual != Some(expected),
            MatchOperator::Exists => actual.is_some(),
            MatchOperator::NotExists => actual.is_none(),
            MatchOperator::Contains => actual.is_some_and(|a| a.contains(expected)),
            MatchOperator::NotContains => !actual.is_some_and(|a| a.contains(expected)),
            MatchOperator::Matches => actual.is_some_and(|a| self.is_regex_match(a)),
            MatchOperator::NotMatches => !actual.is_some_and(|a| self.is_regex_match(a)),
        }
    }

    fn is_regex_match(&self, actual: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(actual))
    }
}
