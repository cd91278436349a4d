//! Plugin configuration compiled for serving.
//!
//! Everything that can be decided once is decided here: matchers, captures
//! and steps are compiled, scripts are parsed and passthrough targets are
//! resolved, so a request only ever reads this structure.

use crate::capture::PreparedCapture;
use crate::config::{PluginConfig, ResourceConfig, ResponseConfig, UpstreamConfig};
use crate::error::ConfigError;
use crate::matcher::{self, ResolvedResource};
use crate::steps::{prepare_steps, PreparedStep, ScriptService};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A resource with everything it needs at request time.
#[derive(Debug, Clone)]
pub struct PreparedResource {
    pub matcher: ResolvedResource,
    pub captures: Arc<[PreparedCapture]>,
    pub steps: Vec<PreparedStep>,
}

impl PreparedResource {
    fn build(
        config: &ResourceConfig,
        plugin: &PluginConfig,
        scripts: &dyn ScriptService,
    ) -> Result<Self, ConfigError> {
        let config = Arc::new(config.clone());
        Ok(Self {
            captures: PreparedCapture::prepare_all(&config.capture)?.into(),
            steps: prepare_steps(&config, scripts, Some(&plugin.dir))?,
            matcher: ResolvedResource::compile(config)?,
        })
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.matcher.config
    }
}

#[derive(Debug, Clone)]
pub struct PreparedInterceptor {
    pub resource: PreparedResource,
    pub continue_to_next: bool,
}

#[derive(Debug, Clone)]
pub struct PreparedPlugin {
    pub name: String,
    pub root: PreparedResource,
    pub resources: Vec<PreparedResource>,
    matchers: Vec<ResolvedResource>,
    pub interceptors: Vec<PreparedInterceptor>,
    pub upstreams: HashMap<String, UpstreamConfig>,
    pub inherit_defaults: bool,
}

impl PreparedPlugin {
    pub fn build(config: &PluginConfig, scripts: &dyn ScriptService) -> Result<Self, ConfigError> {
        let root = PreparedResource::build(&config.root, config, scripts)?;
        let resources = config
            .resources
            .iter()
            .map(|resource| PreparedResource::build(resource, config, scripts))
            .collect::<Result<Vec<_>, _>>()?;
        let interceptors = config
            .interceptors
            .iter()
            .map(|interceptor| {
                Ok(PreparedInterceptor {
                    resource: PreparedResource::build(&interceptor.resource, config, scripts)?,
                    continue_to_next: interceptor.continue_to_next,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let name = config
            .plugin
            .clone()
            .unwrap_or_else(|| config.dir.display().to_string());
        debug!(
            "Prepared plugin {} with {} resources and {} interceptors",
            name,
            resources.len(),
            interceptors.len()
        );

        Ok(Self {
            name,
            matchers: resources.iter().map(|r| r.matcher.clone()).collect(),
            root,
            resources,
            interceptors,
            upstreams: config.upstreams.clone(),
            inherit_defaults: config.inherit_defaults,
        })
    }

    /// Most specific matching resource, with its extracted path parameters.
    pub fn select(
        &self,
        exchange: &crate::exchange::HttpExchange,
    ) -> Option<(&PreparedResource, HashMap<String, String>)> {
        let (matched, params) = matcher::select(&self.matchers, exchange)?;
        let idx = self
            .matchers
            .iter()
            .position(|candidate| std::ptr::eq(candidate, matched))?;
        Some((&self.resources[idx], params))
    }

    /// The root resource, when it can serve this request itself.
    pub fn root_fallback(
        &self,
        exchange: &crate::exchange::HttpExchange,
    ) -> Option<(&PreparedResource, HashMap<String, String>)> {
        self.root.config().path.as_ref()?;
        let params = self.root.matcher.matches(exchange)?;
        Some((&self.root, params))
    }

    /// Root response to back-fill from when serving `resource`.
    pub fn inherited_response(&self, resource: &PreparedResource) -> Option<&ResponseConfig> {
        if !self.inherit_defaults || std::ptr::eq(resource, &self.root) {
            return None;
        }
        self.root.config().response.as_ref()
    }

    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.get(name)
    }
}
