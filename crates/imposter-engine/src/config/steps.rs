//! Step configuration for the response-resolution pipeline.

use super::capture::ItemCaptureConfig;
use super::de;
use serde::Deserialize;
use std::path::PathBuf;

/// A configured step, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepConfig {
    Script(ScriptStepConfig),
    Remote(RemoteStepConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStepConfig {
    /// Script file, relative to the configuration directory
    #[serde(default, alias = "scriptFile")]
    pub file: Option<PathBuf>,
    /// Inline script source
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStepConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, deserialize_with = "de::ordered_string_map")]
    pub headers: Vec<(String, String)>,
    #[serde(default, deserialize_with = "de::ordered_string_map")]
    pub query_params: Vec<(String, String)>,
    #[serde(default, deserialize_with = "de::ordered_string_map")]
    pub form_params: Vec<(String, String)>,
    /// Request body; may contain `${...}` placeholders
    #[serde(default, deserialize_with = "de::content")]
    pub content: Option<String>,
    /// Captures evaluated against the remote response
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub capture: Vec<(String, ItemCaptureConfig)>,
}

fn default_method() -> String {
    "GET".to_string()
}
