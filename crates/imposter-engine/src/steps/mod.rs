//! Step pipeline: resolves the [`ResponseBehaviour`] for a matched resource.
//!
//! Steps run strictly in configured order. Every step's side effects
//! (captures, store writes) are kept, but only the behaviour produced by the
//! last step is used. Remote steps produce no behaviour of their own.

mod remote;
mod script;

pub use remote::{RemoteStep, RemoteStepService};
pub use script::{PreparedScript, RhaiScriptService, ScriptContext, ScriptService};

use crate::behaviour::{
    BehaviourType, DefaultResponseBehaviourFactory, DefaultStatusCodeCalculator,
    ResponseBehaviour, ResponseBehaviourFactory, StatusCodeCalculator,
};
use crate::config::{ResourceConfig, ResponseConfig, StepConfig};
use crate::error::{ConfigError, EngineError};
use crate::exchange::HttpExchange;
use crate::store::StoreRegistry;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A step resolved once at configuration build time.
#[derive(Clone)]
pub enum PreparedStep {
    Script(Arc<dyn PreparedScript>),
    Remote(RemoteStep),
}

impl PreparedStep {
    pub fn describe(&self) -> String {
        match self {
            PreparedStep::Script(script) => format!("script {}", script.name()),
            PreparedStep::Remote(remote) => remote.describe(),
        }
    }
}

impl std::fmt::Debug for PreparedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Build the step list for a resource.
///
/// Explicit `steps` take precedence over the legacy `scriptFile`.
pub fn prepare_steps(
    resource: &ResourceConfig,
    scripts: &dyn ScriptService,
    base_dir: Option<&Path>,
) -> Result<Vec<PreparedStep>, ConfigError> {
    if !resource.steps.is_empty() {
        return resource
            .steps
            .iter()
            .enumerate()
            .map(|(idx, step)| match step {
                StepConfig::Script(script) => {
                    let prepared = match (&script.file, &script.code) {
                        (Some(file), _) => scripts.prepare_file(file, base_dir)?,
                        (None, Some(code)) => scripts.prepare(
                            &format!("{} step {}", resource.describe(), idx + 1),
                            code,
                            base_dir,
                        )?,
                        (None, None) => {
                            return Err(ConfigError::Script {
                                name: resource.describe(),
                                message: "script step requires 'file' or 'code'".into(),
                            })
                        }
                    };
                    Ok(PreparedStep::Script(prepared))
                }
                StepConfig::Remote(remote) => Ok(PreparedStep::Remote(RemoteStep::prepare(remote)?)),
            })
            .collect();
    }

    match &resource.script_file {
        Some(file) => Ok(vec![PreparedStep::Script(
            scripts.prepare_file(file, base_dir)?,
        )]),
        None => Ok(Vec::new()),
    }
}

/// Runs prepared steps and falls back to the default behaviour.
pub struct ResponseBehaviourResolver {
    remote: RemoteStepService,
    stores: Arc<StoreRegistry>,
    status_codes: Arc<dyn StatusCodeCalculator>,
    defaults: Arc<dyn ResponseBehaviourFactory>,
}

/// What the resolver needs to know about the resource being served.
pub struct ResolveRequest<'a> {
    pub resource: &'a ResourceConfig,
    pub steps: &'a [PreparedStep],
    /// Root response to back-fill from, when the plugin inherits defaults
    /// and the resource is not the root itself.
    pub inherited: Option<&'a ResponseConfig>,
}

impl ResponseBehaviourResolver {
    pub fn new(remote: RemoteStepService, stores: Arc<StoreRegistry>) -> Self {
        Self {
            remote,
            stores,
            status_codes: Arc::new(DefaultStatusCodeCalculator),
            defaults: Arc::new(DefaultResponseBehaviourFactory),
        }
    }

    pub fn with_status_code_calculator(mut self, calculator: Arc<dyn StatusCodeCalculator>) -> Self {
        self.status_codes = calculator;
        self
    }

    pub fn with_behaviour_factory(mut self, factory: Arc<dyn ResponseBehaviourFactory>) -> Self {
        self.defaults = factory;
        self
    }

    pub async fn resolve(
        &self,
        request: ResolveRequest<'_>,
        exchange: &HttpExchange,
    ) -> Result<ResponseBehaviour, EngineError> {
        let mut last = None;
        for step in request.steps {
            debug!("Running {} for {}", step.describe(), request.resource.describe());
            last = match step {
                PreparedStep::Script(script) => self.run_script(script.clone(), exchange).await?,
                PreparedStep::Remote(remote) => {
                    self.remote.execute(remote, exchange, &self.stores).await?;
                    None
                }
            };
        }

        let mut behaviour = match last {
            Some(mut scripted) => {
                if scripted.behaviour_type == BehaviourType::DefaultBehaviour {
                    if let Some(response) = &request.resource.response {
                        scripted.backfill(response);
                    }
                }
                scripted
            }
            None => {
                let status = self.status_codes.calculate(request.resource, exchange);
                self.defaults.build(status, request.resource)
            }
        };

        if let Some(root) = request.inherited {
            behaviour.backfill(root);
        }
        Ok(behaviour)
    }

    async fn run_script(
        &self,
        script: Arc<dyn PreparedScript>,
        exchange: &HttpExchange,
    ) -> Result<Option<ResponseBehaviour>, EngineError> {
        let context = ScriptContext::from_exchange(exchange);
        let stores = self.stores.clone();
        let name = script.name().to_string();
        tokio::task::spawn_blocking(move || script.execute(&context, stores))
            .await
            .map_err(|e| EngineError::StepExecution {
                step: name,
                message: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::ContentSource;
    use crate::capture::{CaptureService, DeferredQueue};
    use crate::exchange::test_support::exchange;
    use crate::expression::ExpressionRegistry;
    use hyper::Method;

    fn resolver(stores: Arc<StoreRegistry>) -> ResponseBehaviourResolver {
        let expressions = Arc::new(ExpressionRegistry::default());
        let captures = Arc::new(CaptureService::new(
            stores.clone(),
            expressions.clone(),
            DeferredQueue::start(8),
        ));
        ResponseBehaviourResolver::new(RemoteStepService::new(expressions, captures), stores)
    }

    fn resource(yaml: &str) -> ResourceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_no_steps_uses_defaults() {
        let stores = Arc::new(StoreRegistry::new());
        let config = resource("path: /pets\nresponse:\n  statusCode: 202\n  content: hi");
        let behaviour = resolver(stores)
            .resolve(
                ResolveRequest {
                    resource: &config,
                    steps: &[],
                    inherited: None,
                },
                &exchange(Method::GET, "/pets", ""),
            )
            .await
            .unwrap();
        assert_eq!(behaviour.status_code, Some(202));
        assert_eq!(behaviour.content, ContentSource::Inline("hi".into()));
    }

    #[tokio::test]
    async fn test_last_step_wins_and_side_effects_kept() {
        let stores = Arc::new(StoreRegistry::new());
        let config = resource(
            r#"
path: /pets
response:
  content: default body
  headers:
    X-Default: "1"
steps:
  - type: script
    code: |
      stores.open("s").save("first", true);
      respond().withStatusCode(500)
  - type: script
    code: respond().withStatusCode(201)
"#,
        );
        let steps = prepare_steps(&config, &RhaiScriptService::new(), None).unwrap();
        let behaviour = resolver(stores.clone())
            .resolve(
                ResolveRequest {
                    resource: &config,
                    steps: &steps,
                    inherited: None,
                },
                &exchange(Method::GET, "/pets", ""),
            )
            .await
            .unwrap();

        assert_eq!(behaviour.status_code, Some(201));
        // Merged over the resource response
        assert_eq!(behaviour.content, ContentSource::Inline("default body".into()));
        assert_eq!(behaviour.headers, vec![("X-Default".into(), "1".into())]);
        assert_eq!(stores.open("s").load("first"), Some(serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_resource_defaults() {
        let stores = Arc::new(StoreRegistry::new());
        let config = resource(
            r#"
path: /pets
response:
  content: default body
steps:
  - type: script
    code: respond().withStatusCode(204).skipDefaultBehaviour()
"#,
        );
        let steps = prepare_steps(&config, &RhaiScriptService::new(), None).unwrap();
        let behaviour = resolver(stores)
            .resolve(
                ResolveRequest {
                    resource: &config,
                    steps: &steps,
                    inherited: None,
                },
                &exchange(Method::GET, "/pets", ""),
            )
            .await
            .unwrap();
        assert_eq!(behaviour.status_code, Some(204));
        assert!(behaviour.content.is_none());
    }

    #[tokio::test]
    async fn test_inherited_root_defaults() {
        let stores = Arc::new(StoreRegistry::new());
        let root: ResponseConfig =
            serde_yaml::from_str("headers:\n  X-Root: yes\ncontent: root body").unwrap();
        let config = resource("path: /pets\nresponse:\n  statusCode: 201");
        let behaviour = resolver(stores)
            .resolve(
                ResolveRequest {
                    resource: &config,
                    steps: &[],
                    inherited: Some(&root),
                },
                &exchange(Method::GET, "/pets", ""),
            )
            .await
            .unwrap();
        assert_eq!(behaviour.status_code, Some(201));
        assert_eq!(behaviour.headers, vec![("X-Root".into(), "yes".into())]);
        assert_eq!(behaviour.content, ContentSource::Inline("root body".into()));
    }

    #[tokio::test]
    async fn test_script_error_fails_resolution() {
        let stores = Arc::new(StoreRegistry::new());
        let config = resource("path: /pets\nsteps:\n  - type: script\n    code: 'throw \"bad\"'");
        let steps = prepare_steps(&config, &RhaiScriptService::new(), None).unwrap();
        let result = resolver(stores)
            .resolve(
                ResolveRequest {
                    resource: &config,
                    steps: &steps,
                    inherited: None,
                },
                &exchange(Method::GET, "/pets", ""),
            )
            .await;
        assert!(matches!(result, Err(EngineError::StepExecution { .. })));
    }

    #[test]
    fn test_prepare_steps_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("legacy.rhai");
        std::fs::write(&script, "respond()").unwrap();

        let mut config = resource("path: /pets\nsteps:\n  - type: script\n    code: respond()");
        config.script_file = Some(script.clone());
        let steps = prepare_steps(&config, &RhaiScriptService::new(), None).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].describe().contains("step 1"));

        config.steps.clear();
        let steps = prepare_steps(&config, &RhaiScriptService::new(), None).unwrap();
        assert!(steps[0].describe().contains("legacy.rhai"));

        config.script_file = None;
        assert!(prepare_steps(&config, &RhaiScriptService::new(), None)
            .unwrap()
            .is_empty());
    }
}
