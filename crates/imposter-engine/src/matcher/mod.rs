//! Resource matching with specificity tie-breaking.
//!
//! Every resource is compiled once into a [`ResolvedResource`]. A request
//! matches a candidate when the method, path, parameter/header predicates and
//! body predicate are all satisfied. A non-empty predicate map is satisfied
//! when **any** of its entries is satisfied; an empty map always matches.
//!
//! Among matching candidates, those declaring path params are preferred, then
//! those declaring query params, then those declaring headers. Each
//! narrowing pass is skipped if it would leave no candidates.

pub mod body;
pub mod condition;
pub mod path;

use crate::config::ResourceConfig;
use crate::error::ConfigError;
use crate::exchange::HttpExchange;
use body::BodyMatcher;
use condition::ValueMatcher;
use hyper::Method;
use path::PathMatcher;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A resource with its match predicates pre-compiled.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub config: Arc<ResourceConfig>,
    method: Option<Method>,
    path: Option<PathMatcher>,
    path_params: Vec<(String, ValueMatcher)>,
    query_params: Vec<(String, ValueMatcher)>,
    request_headers: Vec<(String, ValueMatcher)>,
    body: Option<BodyMatcher>,
}

impl ResolvedResource {
    pub fn compile(config: Arc<ResourceConfig>) -> Result<Self, ConfigError> {
        let method = config
            .method
            .as_deref()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(m.to_string()))
            })
            .transpose()?;

        let path = config.path.as_deref().map(PathMatcher::compile).transpose()?;

        let compile_map = |entries: &[(String, crate::config::MatchCondition)]| {
            entries
                .iter()
                .map(|(name, condition)| Ok((name.clone(), ValueMatcher::compile(condition)?)))
                .collect::<Result<Vec<_>, ConfigError>>()
        };

        let body = match &config.request_body {
            Some(body) => BodyMatcher::compile(body)?,
            None => None,
        };

        Ok(Self {
            method,
            path,
            path_params: compile_map(&config.path_params)?,
            query_params: compile_map(&config.query_params)?,
            request_headers: compile_map(&config.request_headers)?,
            body,
            config,
        })
    }

    pub fn has_path_params(&self) -> bool {
        !self.path_params.is_empty()
    }

    pub fn has_query_params(&self) -> bool {
        !self.query_params.is_empty()
    }

    pub fn has_request_headers(&self) -> bool {
        !self.request_headers.is_empty()
    }

    pub fn describe(&self) -> String {
        self.config.describe()
    }

    /// Whether the method and path match, ignoring other predicates.
    /// Returns the extracted path parameters.
    pub fn matches_route(&self, exchange: &HttpExchange) -> Option<HashMap<String, String>> {
        if let Some(method) = &self.method {
            if *method != exchange.request.method {
                return None;
            }
        }
        match &self.path {
            Some(path) => path.matches(&exchange.request.path),
            None => Some(HashMap::new()),
        }
    }

    /// Full match. Returns the extracted path parameters on success.
    pub fn matches(&self, exchange: &HttpExchange) -> Option<HashMap<String, String>> {
        let params = self.matches_route(exchange)?;
        let request = &exchange.request;

        let path_ok = any_of(&self.path_params, |name| {
            params
                .get(name)
                .map(String::as_str)
                .or_else(|| request.path_param(name))
        });
        let query_ok = any_of(&self.query_params, |name| request.query_param(name));
        let headers_ok = any_of(&self.request_headers, |name| request.header(name));

        if !(path_ok && query_ok && headers_ok) {
            return None;
        }

        // Only touch the body once everything cheaper has matched
        if let Some(body) = &self.body {
            if !body.matches(exchange) {
                return None;
            }
        }
        Some(params)
    }
}

fn any_of<'v>(
    entries: &[(String, ValueMatcher)],
    lookup: impl Fn(&str) -> Option<&'v str>,
) -> bool {
    entries.is_empty()
        || entries
            .iter()
            .any(|(name, matcher)| matcher.matches(lookup(name)))
}

/// Select the most specific matching resource.
///
/// Returns `None` when no candidate matches; the caller then falls back to
/// the plugin's root resource.
pub fn select<'a>(
    candidates: &'a [ResolvedResource],
    exchange: &HttpExchange,
) -> Option<(&'a ResolvedResource, HashMap<String, String>)> {
    let mut matched: Vec<(&ResolvedResource, HashMap<String, String>)> = candidates
        .iter()
        .filter_map(|candidate| candidate.matches(exchange).map(|p| (candidate, p)))
        .collect();

    narrow(&mut matched, ResolvedResource::has_path_params);
    narrow(&mut matched, ResolvedResource::has_query_params);
    narrow(&mut matched, ResolvedResource::has_request_headers);

    if matched.len() > 1 {
        let described: Vec<String> = matched.iter().map(|(r, _)| r.describe()).collect();
        warn!(
            "More than one resource matched {} {}: [{}]. Using the first; check the configuration for ambiguity",
            exchange.request.method,
            exchange.request.path,
            described.join(", ")
        );
    }

    let selected = matched.into_iter().next();
    if let Some((resource, _)) = &selected {
        debug!(
            "Matched {} {} to resource {}",
            exchange.request.method,
            exchange.request.path,
            resource.describe()
        );
    }
    selected
}

/// Keep only candidates satisfying `predicate`, unless that would leave none.
fn narrow<T>(candidates: &mut Vec<(&ResolvedResource, T)>, predicate: fn(&ResolvedResource) -> bool) {
    if candidates.iter().any(|(r, _)| predicate(r)) {
        candidates.retain(|(r, _)| predicate(r));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_support::{exchange, exchange_with_headers};

    fn resources(yaml: &str) -> Vec<ResolvedResource> {
        let configs: Vec<ResourceConfig> = serde_yaml::from_str(yaml).unwrap();
        configs
            .into_iter()
            .map(|c| ResolvedResource::compile(Arc::new(c)).unwrap())
            .collect()
    }

    fn selected_index(candidates: &[ResolvedResource], ex: &HttpExchange) -> Option<usize> {
        select(candidates, ex).map(|(r, _)| {
            candidates
                .iter()
                .position(|c| std::ptr::eq(c, r))
                .unwrap()
        })
    }

    #[test]
    fn test_method_and_path() {
        let candidates = resources(
            r#"
- method: GET
  path: /pets
- method: post
  path: /pets
- path: /any
"#,
        );
        assert_eq!(selected_index(&candidates, &exchange(Method::GET, "/pets", "")), Some(0));
        assert_eq!(selected_index(&candidates, &exchange(Method::POST, "/pets", "")), Some(1));
        assert_eq!(selected_index(&candidates, &exchange(Method::DELETE, "/any", "")), Some(2));
        assert_eq!(selected_index(&candidates, &exchange(Method::PUT, "/pets", "")), None);
    }

    #[test]
    fn test_query_param_specificity() {
        let candidates = resources(
            r#"
- method: GET
  path: /pets
- method: GET
  path: /pets
  queryParams:
    type: cat
"#,
        );
        assert_eq!(
            selected_index(&candidates, &exchange(Method::GET, "/pets?type=cat", "")),
            Some(1)
        );
        assert_eq!(
            selected_index(&candidates, &exchange(Method::GET, "/pets?type=dog", "")),
            Some(0)
        );
        assert_eq!(selected_index(&candidates, &exchange(Method::GET, "/pets", "")), Some(0));
    }

    #[test]
    fn test_path_params_beat_query_params() {
        let candidates = resources(
            r#"
- path: /pets/{id}
  queryParams:
    verbose: "true"
- path: /pets/{id}
  pathParams:
    id: "1"
"#,
        );
        let ex = exchange(Method::GET, "/pets/1?verbose=true", "");
        assert_eq!(selected_index(&candidates, &ex), Some(1));
        let (_, params) = select(&candidates, &ex).unwrap();
        assert_eq!(params["id"], "1");
    }

    #[test]
    fn test_headers_case_insensitive_keys() {
        let candidates = resources(
            r#"
- path: /pets
- path: /pets
  requestHeaders:
    X-Tenant: acme
"#,
        );
        let ex = exchange_with_headers(Method::GET, "/pets", &[("x-tenant", "acme")], "");
        assert_eq!(selected_index(&candidates, &ex), Some(1));

        let other_value = exchange_with_headers(Method::GET, "/pets", &[("X-TENANT", "ACME")], "");
        assert_eq!(selected_index(&candidates, &other_value), Some(0));
    }

    #[test]
    fn test_query_keys_case_sensitive() {
        let candidates = resources(
            r#"
- path: /pets
  queryParams:
    type: cat
"#,
        );
        assert_eq!(
            selected_index(&candidates, &exchange(Method::GET, "/pets?Type=cat", "")),
            None
        );
    }

    #[test]
    fn test_any_of_semantics() {
        let candidates = resources(
            r#"
- path: /pets
  queryParams:
    a: "1"
    b: "2"
"#,
        );
        assert_eq!(
            selected_index(&candidates, &exchange(Method::GET, "/pets?b=2", "")),
            Some(0)
        );
        assert_eq!(
            selected_index(&candidates, &exchange(Method::GET, "/pets?a=9&b=9", "")),
            None
        );
    }

    #[test]
    fn test_ambiguity_picks_first() {
        let candidates = resources(
            r#"
- path: /pets
  queryParams:
    a: "1"
- path: /pets
  queryParams:
    b: "2"
"#,
        );
        assert_eq!(
            selected_index(&candidates, &exchange(Method::GET, "/pets?a=1&b=2", "")),
            Some(0)
        );
    }

    #[test]
    fn test_body_predicate() {
        let candidates = resources(
            r#"
- method: POST
  path: /pets
- method: POST
  path: /pets
  requestBody:
    jsonPath: $.type
    value: cat
"#,
        );
        // Body predicates filter but do not add specificity
        let cat = exchange(Method::POST, "/pets", r#"{"type": "cat"}"#);
        assert_eq!(selected_index(&candidates, &cat), Some(0));

        let only_body = &candidates[1..];
        assert!(select(only_body, &cat).is_some());
        assert!(select(only_body, &exchange(Method::POST, "/pets", r#"{"type": "dog"}"#)).is_none());
    }
}
