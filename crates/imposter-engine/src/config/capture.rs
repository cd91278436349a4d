//! Capture configuration: which request/response values are written to stores.

use super::de;
use serde::Deserialize;

/// When a capture item runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CapturePhase {
    #[default]
    #[serde(alias = "REQUEST_RECEIVED")]
    RequestReceived,
    #[serde(alias = "RESPONSE_SENT")]
    ResponseSent,
}

/// Item key: a constant, or derived from the request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ItemKeyConfig {
    Const(de::ScalarString),
    #[serde(rename_all = "camelCase")]
    Dynamic {
        #[serde(default)]
        path_param: Option<String>,
        #[serde(default)]
        query_param: Option<String>,
        #[serde(default)]
        request_header: Option<String>,
        #[serde(default)]
        expression: Option<String>,
    },
}

/// One entry of a `capture` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCaptureConfig {
    /// Store name (may contain expressions); absent means the default store
    #[serde(default)]
    pub store: Option<String>,
    /// Item key; absent means the capture key
    #[serde(default)]
    pub key: Option<ItemKeyConfig>,
    #[serde(default)]
    pub path_param: Option<String>,
    #[serde(default)]
    pub query_param: Option<String>,
    #[serde(default)]
    pub request_header: Option<String>,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default, rename = "xPath", alias = "xpath")]
    pub x_path: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default, rename = "const", deserialize_with = "de::optional_scalar")]
    pub const_value: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub phase: CapturePhase,
    #[serde(default, deserialize_with = "de::ordered_string_map")]
    pub xml_namespaces: Vec<(String, String)>,
}

fn default_enabled() -> bool {
    true
}

/// The single value source of a capture item or dynamic key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Const(String),
    PathParam(String),
    QueryParam(String),
    RequestHeader(String),
    JsonPath(String),
    XPath(String),
    Expression(String),
}

impl ItemCaptureConfig {
    /// The configured value source. Exactly one must be present.
    pub fn source(&self) -> Result<CaptureSource, String> {
        let candidates = [
            self.const_value.clone().map(CaptureSource::Const),
            self.path_param.clone().map(CaptureSource::PathParam),
            self.query_param.clone().map(CaptureSource::QueryParam),
            self.request_header.clone().map(CaptureSource::RequestHeader),
            self.json_path.clone().map(CaptureSource::JsonPath),
            self.x_path.clone().map(CaptureSource::XPath),
            self.expression.clone().map(CaptureSource::Expression),
        ];
        exactly_one(candidates.into_iter().flatten())
    }
}

impl ItemKeyConfig {
    /// The configured key source; a constant key yields `CaptureSource::Const`.
    pub fn source(&self) -> Result<CaptureSource, String> {
        match self {
            ItemKeyConfig::Const(key) => Ok(CaptureSource::Const(key.0.clone())),
            ItemKeyConfig::Dynamic {
                path_param,
                query_param,
                request_header,
                expression,
            } => {
                let candidates = [
                    path_param.clone().map(CaptureSource::PathParam),
                    query_param.clone().map(CaptureSource::QueryParam),
                    request_header.clone().map(CaptureSource::RequestHeader),
                    expression.clone().map(CaptureSource::Expression),
                ];
                exactly_one(candidates.into_iter().flatten())
            }
        }
    }
}

fn exactly_one(mut sources: impl Iterator<Item = CaptureSource>) -> Result<CaptureSource, String> {
    match (sources.next(), sources.next()) {
        (Some(source), None) => Ok(source),
        (None, _) => Err("no value source configured".to_string()),
        (Some(_), Some(_)) => Err("more than one value source configured".to_string()),
    }
}
