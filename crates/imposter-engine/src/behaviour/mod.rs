//! Resolved response behaviour.
//!
//! A [`ResponseBehaviour`] is the per-request description of what to send:
//! produced by the step pipeline (or the default factory) and consumed by
//! response delivery.

use crate::config::{DelayConfig, FailureType, ResourceConfig, ResponseConfig};
use crate::exchange::HttpExchange;
use std::path::PathBuf;

/// Where the response body comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContentSource {
    #[default]
    None,
    Inline(String),
    File(PathBuf),
}

impl ContentSource {
    pub fn is_none(&self) -> bool {
        matches!(self, ContentSource::None)
    }
}

/// Whether delivery should apply the resource's default response handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BehaviourType {
    /// Send exactly what the behaviour describes.
    ShortCircuit,
    /// Fill in from the resource configuration and fall back when empty.
    #[default]
    DefaultBehaviour,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseBehaviour {
    pub status_code: Option<u16>,
    /// Ordered; names are unique (case-sensitive)
    pub headers: Vec<(String, String)>,
    pub content: ContentSource,
    pub template: bool,
    pub example_name: Option<String>,
    pub failure_type: Option<FailureType>,
    pub performance: Option<DelayConfig>,
    pub behaviour_type: BehaviourType,
}

impl ResponseBehaviour {
    /// Insert or replace a header, keeping the position of an existing one.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Fill every unset field from a response description.
    pub fn backfill(&mut self, response: &ResponseConfig) {
        if self.status_code.is_none() {
            self.status_code = response.status_code;
        }
        for (name, value) in &response.headers {
            if !self.headers.iter().any(|(n, _)| n == name) {
                self.headers.push((name.clone(), value.clone()));
            }
        }
        if self.content.is_none() {
            self.content = content_from(response);
        }
        self.template |= response.template;
        if self.example_name.is_none() {
            self.example_name = response.example_name.clone();
        }
        if self.failure_type.is_none() {
            self.failure_type = response.fail;
        }
        if self.performance.is_none() {
            self.performance = response.delay;
        }
    }
}

fn content_from(response: &ResponseConfig) -> ContentSource {
    match (&response.file, &response.content) {
        (Some(file), _) => ContentSource::File(file.clone()),
        (None, Some(content)) => ContentSource::Inline(content.clone()),
        (None, None) => ContentSource::None,
    }
}

/// Chooses the status code when nothing else sets one.
pub trait StatusCodeCalculator: Send + Sync {
    fn calculate(&self, resource: &ResourceConfig, exchange: &HttpExchange) -> u16;
}

/// Configured status code, else 200.
#[derive(Debug, Default)]
pub struct DefaultStatusCodeCalculator;

impl StatusCodeCalculator for DefaultStatusCodeCalculator {
    fn calculate(&self, resource: &ResourceConfig, _exchange: &HttpExchange) -> u16 {
        resource
            .response
            .as_ref()
            .and_then(|r| r.status_code)
            .unwrap_or(200)
    }
}

/// Builds the behaviour used when no step produces one.
pub trait ResponseBehaviourFactory: Send + Sync {
    fn build(&self, status_code: u16, resource: &ResourceConfig) -> ResponseBehaviour;
}

/// Copies the resource's response description.
#[derive(Debug, Default)]
pub struct DefaultResponseBehaviourFactory;

impl ResponseBehaviourFactory for DefaultResponseBehaviourFactory {
    fn build(&self, status_code: u16, resource: &ResourceConfig) -> ResponseBehaviour {
        let mut behaviour = ResponseBehaviour {
            status_code: Some(status_code),
            ..Default::default()
        };
        if let Some(response) = &resource.response {
            behaviour.backfill(response);
        }
        behaviour
    }
}
