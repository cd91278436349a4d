//! Plugin configuration: loading, path rewriting and validation.
//!
//! A plugin configuration file describes a root resource (flattened into the
//! top level of the document), additional `resources`, `interceptors`,
//! passthrough `upstreams` and store preload data. Files are YAML or JSON.

mod capture;
pub(crate) mod de;
mod engine;
mod resource;
mod security;
mod steps;
mod upstream;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

pub use capture::{CapturePhase, CaptureSource, ItemCaptureConfig, ItemKeyConfig};
pub use engine::{DispatchMode, EngineSettings, DEFAULT_DEFERRED_QUEUE_CAPACITY};
pub use resource::{
    DelayConfig, FailureType, MatchCondition, MatchOperator, RequestBodyConfig, ResourceConfig,
    ResponseConfig,
};
pub use security::{
    SecurityCondition, SecurityConfig, SecurityEffect, SecurityMatch, SecurityOperator,
};
pub use steps::{RemoteStepConfig, ScriptStepConfig, StepConfig};
pub use upstream::UpstreamConfig;

/// Suffixes recognised when loading configuration from a directory.
const CONFIG_SUFFIXES: [&str; 3] = ["-config.yaml", "-config.yml", "-config.json"];

/// One loaded plugin configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Informational plugin name (e.g. `rest`)
    #[serde(default)]
    pub plugin: Option<String>,

    /// The root resource; its fields live at the top level of the document.
    #[serde(flatten)]
    pub root: ResourceConfig,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,

    #[serde(default)]
    pub interceptors: Vec<InterceptorConfig>,

    #[serde(default)]
    pub upstreams: HashMap<String, UpstreamConfig>,

    #[serde(default)]
    pub system: Option<SystemConfig>,

    /// Back-fill unset response fields of matched resources from the root
    /// resource's response.
    #[serde(default, alias = "defaultsFromRootResponse")]
    pub inherit_defaults: bool,

    /// Directory the configuration was loaded from
    #[serde(skip)]
    pub dir: PathBuf,
}

/// A resource that runs before the main resource.
#[derive(Debug, Clone, Deserialize)]
pub struct InterceptorConfig {
    #[serde(flatten)]
    pub resource: ResourceConfig,
    /// When false, the interceptor's response is sent and dispatch stops.
    #[serde(rename = "continue", default = "default_continue")]
    pub continue_to_next: bool,
}

fn default_continue() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemConfig {
    #[serde(default, deserialize_with = "de::ordered_map")]
    pub stores: Vec<(String, StorePreloadConfig)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePreloadConfig {
    #[serde(default)]
    pub preload_data: Option<serde_json::Map<String, serde_json::Value>>,
    /// JSON file containing an object of items
    #[serde(default)]
    pub preload_file: Option<PathBuf>,
}

impl PluginConfig {
    /// Parse a configuration document. JSON is used for `.json` files,
    /// YAML otherwise.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let parsed = if is_json {
            serde_json::from_str::<PluginConfig>(contents).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str::<PluginConfig>(contents).map_err(|e| e.to_string())
        };

        let mut config = parsed.map_err(|message| {
            if message.contains("duplicate field `security`") {
                ConfigError::DuplicateRootSecurity(path.to_path_buf())
            } else {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    message,
                }
            }
        })?;

        config.dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.rewrite_paths();
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a single configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    /// Resources other than the root, in declared order.
    pub fn all_resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.resources
            .iter()
            .chain(self.interceptors.iter().map(|i| &i.resource))
    }

    /// Resolve relative file references against the configuration directory.
    fn rewrite_paths(&mut self) {
        let dir = self.dir.clone();
        rewrite_resource_paths(&dir, &mut self.root);
        for resource in &mut self.resources {
            rewrite_resource_paths(&dir, resource);
        }
        for interceptor in &mut self.interceptors {
            rewrite_resource_paths(&dir, &mut interceptor.resource);
        }
        if let Some(system) = &mut self.system {
            for (_, store) in &mut system.stores {
                rewrite(&dir, &mut store.preload_file);
            }
        }
    }

    /// Structural validation that does not need compiled state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, upstream) in &self.upstreams {
            upstream
                .validate()
                .map_err(|_| ConfigError::InvalidUpstream {
                    name: name.clone(),
                    url: upstream.url.clone(),
                })?;
        }

        self.validate_resource(&self.root)?;
        for resource in self.all_resources() {
            if resource.path.is_none() {
                return Err(ConfigError::MissingPath {
                    method: resource.method.clone().unwrap_or_else(|| "*".into()),
                });
            }
            self.validate_resource(resource)?;
        }
        Ok(())
    }

    fn validate_resource(&self, resource: &ResourceConfig) -> Result<(), ConfigError> {
        if resource.static_dir().is_some() {
            let path = resource.path.clone().unwrap_or_default();
            if !path.ends_with("/*") {
                return Err(ConfigError::MalformedStaticResource { path });
            }
        }

        if let Some(upstream) = &resource.passthrough {
            if !self.upstreams.contains_key(upstream) {
                return Err(ConfigError::MissingUpstream {
                    resource: resource.describe(),
                    upstream: upstream.clone(),
                });
            }
        }

        let remote_captures = resource
            .steps
            .iter()
            .filter_map(|step| match step {
                StepConfig::Remote(remote) => Some(remote.capture.iter()),
                StepConfig::Script(_) => None,
            })
            .flatten();
        for (key, item) in resource.capture.iter().chain(remote_captures) {
            let invalid = |message: String| ConfigError::InvalidCapture {
                key: key.clone(),
                message,
            };
            item.source().map_err(invalid)?;
            if let Some(item_key) = &item.key {
                item_key.source().map_err(invalid)?;
            }
        }

        for step in &resource.steps {
            if let StepConfig::Script(script) = step {
                if script.file.is_none() && script.code.is_none() {
                    return Err(ConfigError::Script {
                        name: resource.describe(),
                        message: "script step needs either 'file' or 'code'".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn rewrite(dir: &Path, path: &mut Option<PathBuf>) {
    if let Some(p) = path {
        if p.is_relative() {
            *p = dir.join(&*p);
        }
    }
}

fn rewrite_resource_paths(dir: &Path, resource: &mut ResourceConfig) {
    if let Some(response) = &mut resource.response {
        rewrite(dir, &mut response.file);
        rewrite(dir, &mut response.dir);
    }
    rewrite(dir, &mut resource.script_file);
    for step in &mut resource.steps {
        if let StepConfig::Script(script) = step {
            rewrite(dir, &mut script.file);
        }
    }
}

/// Find configuration files at `path`: the file itself, or every
/// `*-config.{yaml,yml,json}` file in the directory, in lexical order.
pub fn config_files(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| CONFIG_SUFFIXES.iter().any(|s| n.ends_with(s)))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ConfigError::NoConfigFiles(path.to_path_buf()));
    }
    Ok(files)
}

/// Load every plugin configuration found at `path`.
pub fn load_plugin_configs(path: &Path) -> Result<Vec<PluginConfig>, ConfigError> {
    let files = config_files(path)?;
    let mut configs = Vec::with_capacity(files.len());
    for file in files {
        debug!("Loading configuration {}", file.display());
        let config = PluginConfig::from_file(&file)?;
        info!(
            "Loaded {} with {} resource(s) and {} interceptor(s)",
            file.display(),
            config.resources.len(),
            config.interceptors.len()
        );
        configs.push(config);
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(yaml: &str) -> Result<PluginConfig, ConfigError> {
        PluginConfig::parse(Path::new("/config/test-config.yaml"), yaml)
    }

    #[test]
    fn test_parse_plugin_config() {
        let yaml = r#"
plugin: rest
path: /
response:
  statusCode: 204
resources:
  - method: GET
    path: /pets/{id}
    response:
      file: pet.json
  - method: POST
    path: /pets
    capture:
      petName:
        store: pets
        jsonPath: $.name
interceptors:
  - path: /*
    continue: false
    response:
      statusCode: 400
upstreams:
  backend:
    url: http://localhost:9000
system:
  stores:
    preloaded:
      preloadData:
        foo: bar
"#;
        let config = parse(yaml).unwrap();
        assert_eq!(config.plugin.as_deref(), Some("rest"));
        assert_eq!(config.root.path.as_deref(), Some("/"));
        assert_eq!(config.resources.len(), 2);
        assert_eq!(
            config.resources[0].response.as_ref().unwrap().file,
            Some(PathBuf::from("/config/pet.json"))
        );
        assert!(!config.interceptors[0].continue_to_next);
        assert_eq!(config.upstreams["backend"].url, "http://localhost:9000");
        let stores = &config.system.as_ref().unwrap().stores;
        assert_eq!(stores[0].0, "preloaded");
        assert_eq!(
            stores[0].1.preload_data.as_ref().unwrap()["foo"],
            serde_json::json!("bar")
        );
    }

    #[test]
    fn test_json_config() {
        let json = r#"{"path": "/", "resources": [{"path": "/a", "response": {"content": "hi"}}]}"#;
        let config = PluginConfig::parse(Path::new("/c/a-config.json"), json).unwrap();
        assert_eq!(config.resources[0].path.as_deref(), Some("/a"));
    }

    #[test]
    fn test_duplicate_root_security() {
        let yaml = r#"
security:
  default: Deny
security:
  default: Permit
"#;
        assert!(matches!(
            parse(yaml),
            Err(ConfigError::DuplicateRootSecurity(_))
        ));
    }

    #[test]
    fn test_static_resource_must_be_wildcard() {
        let yaml = r#"
resources:
  - path: /www
    response:
      dir: www
"#;
        assert!(matches!(
            parse(yaml),
            Err(ConfigError::MalformedStaticResource { .. })
        ));
    }

    #[test]
    fn test_passthrough_to_missing_upstream() {
        let yaml = r#"
resources:
  - path: /proxy
    passthrough: backend
"#;
        assert!(matches!(
            parse(yaml),
            Err(ConfigError::MissingUpstream { .. })
        ));
    }

    #[test]
    fn test_invalid_upstream_and_missing_path() {
        let yaml = "upstreams:\n  bad:\n    url: localhost\n";
        assert!(matches!(
            parse(yaml),
            Err(ConfigError::InvalidUpstream { .. })
        ));

        let yaml = "resources:\n  - method: GET\n";
        assert!(matches!(parse(yaml), Err(ConfigError::MissingPath { .. })));
    }

    #[test]
    fn test_capture_without_source_is_rejected() {
        let yaml = r#"
resources:
  - path: /a
    capture:
      broken:
        store: s
"#;
        assert!(matches!(
            parse(yaml),
            Err(ConfigError::InvalidCapture { .. })
        ));
    }

    #[test]
    fn test_load_directory_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, path) in [("b-config.yaml", "/b"), ("a-config.yml", "/a")] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(f, "path: {path}").unwrap();
        }
        std::fs::write(dir.path().join("notes.yaml"), "path: /ignored").unwrap();

        let configs = load_plugin_configs(dir.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].root.path.as_deref(), Some("/a"));
        assert_eq!(configs[1].root.path.as_deref(), Some("/b"));
        assert_eq!(configs[0].dir, dir.path());
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_plugin_configs(dir.path()),
            Err(ConfigError::NoConfigFiles(_))
        ));
    }
}
