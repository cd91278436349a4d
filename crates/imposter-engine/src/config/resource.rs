//! Resource configuration: how a request is matched and what is sent back.

use super::capture::ItemCaptureConfig;
use super::de;
use super::security::SecurityConfig;
use super::steps::StepConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// One configured mock endpoint.
///
/// The same shape is used for the plugin root, for entries of `resources`
/// and (flattened) for interceptors. Capabilities are expressed by which
/// optional fields are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// HTTP method; absent matches any method
    #[serde(default)]
    pub method: Option<String>,
    /// Path or path template (`/pets/{id}`, `/static/*`)
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub path_params: Vec<(String, MatchCondition)>,
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub query_params: Vec<(String, MatchCondition)>,
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub request_headers: Vec<(String, MatchCondition)>,
    #[serde(default)]
    pub request_body: Option<RequestBodyConfig>,
    #[serde(default)]
    pub response: Option<ResponseConfig>,
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub capture: Vec<(String, ItemCaptureConfig)>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Legacy single-script reference, run as an implicit script step
    #[serde(default)]
    pub script_file: Option<PathBuf>,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
    /// Name of an entry in the plugin's `upstreams`
    #[serde(default)]
    pub passthrough: Option<String>,
}

impl ResourceConfig {
    /// Human-readable identifier used in logs.
    pub fn describe(&self) -> String {
        format!(
            "{} {}",
            self.method.as_deref().unwrap_or("*"),
            self.path.as_deref().unwrap_or("<root>")
        )
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

    /// Static content directory, if this resource serves files from one.
    pub fn static_dir(&self) -> Option<&PathBuf> {
        self.response.as_ref().and_then(|r| r.dir.as_ref())
    }
}

/// Comparison applied to a request value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum MatchOperator {
    #[default]
    EqualTo,
    NotEqualTo,
    Exists,
    NotExists,
    Contains,
    NotContains,
    Matches,
    NotMatches,
}

/// A configured expectation for a single path param, query param or header.
///
/// Either a plain scalar (equality) or `{value, operator}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MatchCondition {
    Simple(de::ScalarString),
    Detailed {
        #[serde(default, deserialize_with = "de::optional_scalar")]
        value: Option<String>,
        #[serde(default)]
        operator: MatchOperator,
    },
}

impl MatchCondition {
    pub fn operator(&self) -> MatchOperator {
        match self {
            MatchCondition::Simple(_) => MatchOperator::EqualTo,
            MatchCondition::Detailed { operator, .. } => *operator,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            MatchCondition::Simple(v) => Some(v.0.as_str()),
            MatchCondition::Detailed { value, .. } => value.as_deref(),
        }
    }
}

/// Request body predicate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBodyConfig {
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default, rename = "xPath", alias = "xpath")]
    pub x_path: Option<String>,
    #[serde(default, deserialize_with = "de::optional_scalar")]
    pub value: Option<String>,
    #[serde(default)]
    pub operator: MatchOperator,
    #[serde(default, deserialize_with = "de::ordered_string_map")]
    pub xml_namespaces: Vec<(String, String)>,
    #[serde(default)]
    pub all_of: Vec<RequestBodyConfig>,
    #[serde(default)]
    pub any_of: Vec<RequestBodyConfig>,
}

/// Failure simulation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FailureType {
    #[serde(alias = "EMPTY_RESPONSE")]
    EmptyResponse,
    #[serde(alias = "CLOSE_CONNECTION")]
    CloseConnection,
}

impl FailureType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EmptyResponse" | "EMPTY_RESPONSE" => Some(FailureType::EmptyResponse),
            "CloseConnection" | "CLOSE_CONNECTION" => Some(FailureType::CloseConnection),
            _ => None,
        }
    }
}

/// Artificial latency: an exact delay, or a random delay in `[min, max)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    #[serde(default, alias = "exactDelayMs")]
    pub exact: Option<u64>,
    #[serde(default, alias = "minDelayMs")]
    pub min: Option<u64>,
    #[serde(default, alias = "maxDelayMs")]
    pub max: Option<u64>,
}

/// Response description for a resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default, deserialize_with = "de::ordered_string_map")]
    pub headers: Vec<(String, String)>,
    #[serde(default, deserialize_with = "de::content")]
    pub content: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Static content directory (requires a `/*` resource path)
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub template: bool,
    #[serde(default)]
    pub example_name: Option<String>,
    #[serde(default)]
    pub fail: Option<FailureType>,
    #[serde(default, alias = "performanceSimulation")]
    pub delay: Option<DelayConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource() {
        let yaml = r#"
method: POST
path: /pets/{petId}
pathParams:
  petId: 10
queryParams:
  page:
    value: "2"
    operator: NotEqualTo
requestHeaders:
  X-Tenant:
    operator: Exists
requestBody:
  jsonPath: $.name
  value: Fluffy
response:
  statusCode: 201
  headers:
    X-Second: b
    X-First: a
  content:
    id: 10
  delay:
    exact: 500
"#;
        let resource: ResourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(resource.method.as_deref(), Some("POST"));
        assert_eq!(resource.path_params[0].1.value(), Some("10"));
        assert_eq!(
            resource.query_params[0].1.operator(),
            MatchOperator::NotEqualTo
        );
        assert_eq!(
            resource.request_headers[0].1.operator(),
            MatchOperator::Exists
        );
        assert_eq!(resource.request_headers[0].1.value(), None);

        let body = resource.request_body.as_ref().unwrap();
        assert_eq!(body.json_path.as_deref(), Some("$.name"));

        let response = resource.response.as_ref().unwrap();
        assert_eq!(response.status_code, Some(201));
        assert_eq!(response.headers[0].0, "X-Second");
        assert_eq!(response.content.as_deref(), Some(r#"{"id":10}"#));
        assert_eq!(response.delay.unwrap().exact, Some(500));
    }

    #[test]
    fn test_failure_type_aliases() {
        let response: ResponseConfig = serde_yaml::from_str("fail: CLOSE_CONNECTION").unwrap();
        assert_eq!(response.fail, Some(FailureType::CloseConnection));
        assert_eq!(
            FailureType::parse("EmptyResponse"),
            Some(FailureType::EmptyResponse)
        );
        assert_eq!(FailureType::parse("nope"), None);
    }

    #[test]
    fn test_describe() {
        let resource = ResourceConfig {
            path: Some("/health".into()),
            ..Default::default()
        };
        assert_eq!(resource.describe(), "* /health");
    }
}
