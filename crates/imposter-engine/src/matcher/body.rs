//! Request body predicates (JSONPath, XPath, raw text, allOf/anyOf).

use super::condition::ValueMatcher;
use crate::config::RequestBodyConfig;
use crate::error::ConfigError;
use crate::exchange::HttpExchange;
use crate::expression::body::{json_path_query, value_to_string, xpath_query};

#[derive(Debug, Clone)]
pub enum BodyMatcher {
    JsonPath {
        path: String,
        matcher: ValueMatcher,
    },
    XPath {
        path: String,
        namespaces: Vec<(String, String)>,
        matcher: ValueMatcher,
    },
    /// Compare the whole body as text
    Raw(ValueMatcher),
    AllOf(Vec<BodyMatcher>),
    AnyOf(Vec<BodyMatcher>),
}

impl BodyMatcher {
    /// Compile a body predicate. Returns `None` if nothing is configured.
    pub fn compile(config: &RequestBodyConfig) -> Result<Option<Self>, ConfigError> {
        let mut parts = Vec::new();
        let matcher = || ValueMatcher::new(config.operator, config.value.as_deref());

        if let Some(path) = &config.json_path {
            parts.push(BodyMatcher::JsonPath {
                path: path.clone(),
                matcher: matcher()?,
            });
        } else if let Some(path) = &config.x_path {
            parts.push(BodyMatcher::XPath {
                path: path.clone(),
                namespaces: config.xml_namespaces.clone(),
                matcher: matcher()?,
            });
        } else if config.value.is_some() {
            parts.push(BodyMatcher::Raw(matcher()?));
        }

        if !config.all_of.is_empty() {
            parts.push(BodyMatcher::AllOf(compile_children(
                &config.all_of,
                &config.xml_namespaces,
            )?));
        }
        if !config.any_of.is_empty() {
            parts.push(BodyMatcher::AnyOf(compile_children(
                &config.any_of,
                &config.xml_namespaces,
            )?));
        }

        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(BodyMatcher::AllOf(parts)),
        })
    }

    /// Evaluate against the exchange's (cached) request body.
    pub fn matches(&self, exchange: &HttpExchange) -> bool {
        match self {
            BodyMatcher::JsonPath { path, matcher } => {
                let value = exchange
                    .json_body()
                    .and_then(|body| json_path_query(body, path))
                    .map(|v| value_to_string(&v));
                matcher.matches(value.as_deref())
            }
            BodyMatcher::XPath {
                path,
                namespaces,
                matcher,
            } => {
                let value = exchange
                    .xml_body()
                    .and_then(|xml| xpath_query(&xml, path, namespaces));
                matcher.matches(value.as_deref())
            }
            BodyMatcher::Raw(matcher) => matcher.matches(Some(&exchange.request.body_text())),
            BodyMatcher::AllOf(children) => children.iter().all(|c| c.matches(exchange)),
            BodyMatcher::AnyOf(children) => children.iter().any(|c| c.matches(exchange)),
        }
    }
}

/// Children inherit the parent's namespaces unless they declare their own.
fn compile_children(
    children: &[RequestBodyConfig],
    namespaces: &[(String, String)],
) -> Result<Vec<BodyMatcher>, ConfigError> {
    children
        .iter()
        .filter_map(|child| {
            let mut child = child.clone();
            if child.xml_namespaces.is_empty() {
                child.xml_namespaces = namespaces.to_vec();
            }
            BodyMatcher::compile(&child).transpose()
        })
        .collect()
}
