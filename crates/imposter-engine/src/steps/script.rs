//! Script steps backed by the Rhai engine.
//!
//! A script runs with two values in scope:
//!
//! - `context`: `#{ request: #{ method, path, uri, body, headers, queryParams,
//!   pathParams }, requestId }`
//! - `stores`: `stores.open("name")` returns a handle with `load`, `save`,
//!   `has_item`, `delete`, `load_all` and `count`
//!
//! The script's final expression decides the outcome. A `respond()` builder
//! yields a behaviour; anything else (usually unit) means "use the resource
//! defaults".
//!
//! ```rhai
//! if context.request.queryParams["type"] == "cat" {
//!     respond().withStatusCode(201).withHeader("X-Kind", "cat")
//! }
//! ```

use crate::behaviour::{BehaviourType, ContentSource, ResponseBehaviour};
use crate::config::{DelayConfig, FailureType};
use crate::error::{ConfigError, EngineError};
use crate::exchange::HttpExchange;
use crate::store::{Store, StoreRegistry, REQUEST_STORE_NAME};
use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Owned snapshot of the request handed to a script.
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub uri: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
}

impl ScriptContext {
    pub fn from_exchange(exchange: &HttpExchange) -> Self {
        let request = &exchange.request;
        let headers = request
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        // First value wins, matching query_param lookups
        let mut query_params = HashMap::new();
        for (key, value) in &request.query {
            query_params
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Self {
            request_id: exchange.request_id().to_string(),
            method: request.method.to_string(),
            path: request.path.clone(),
            uri: request.uri(),
            body: request.body_text(),
            headers,
            query_params,
            path_params: request.path_params.clone(),
        }
    }

    fn to_map(&self) -> Map {
        fn string_map(entries: &HashMap<String, String>) -> Dynamic {
            let map: Map = entries
                .iter()
                .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
                .collect();
            Dynamic::from(map)
        }

        let mut request = Map::new();
        request.insert("method".into(), Dynamic::from(self.method.clone()));
        request.insert("path".into(), Dynamic::from(self.path.clone()));
        request.insert("uri".into(), Dynamic::from(self.uri.clone()));
        request.insert("body".into(), Dynamic::from(self.body.clone()));
        request.insert("headers".into(), string_map(&self.headers));
        request.insert("queryParams".into(), string_map(&self.query_params));
        request.insert("pathParams".into(), string_map(&self.path_params));

        let mut context = Map::new();
        context.insert("request".into(), Dynamic::from(request));
        context.insert("requestId".into(), Dynamic::from(self.request_id.clone()));
        context
    }
}

/// A compiled script ready to run.
pub trait PreparedScript: Send + Sync {
    fn name(&self) -> &str;

    /// Run the script. Blocking; callers move it off the async executor.
    fn execute(
        &self,
        context: &ScriptContext,
        stores: Arc<StoreRegistry>,
    ) -> Result<Option<ResponseBehaviour>, EngineError>;
}

/// Compiles scripts at configuration build time.
pub trait ScriptService: Send + Sync {
    /// `base_dir` resolves relative `withFile` paths.
    fn prepare(
        &self,
        name: &str,
        source: &str,
        base_dir: Option<&Path>,
    ) -> Result<Arc<dyn PreparedScript>, ConfigError>;

    fn prepare_file(
        &self,
        path: &Path,
        base_dir: Option<&Path>,
    ) -> Result<Arc<dyn PreparedScript>, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Script {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.prepare(&path.display().to_string(), &source, base_dir)
    }
}

/// Script service using one shared Rhai engine.
#[derive(Clone)]
pub struct RhaiScriptService {
    engine: Arc<Engine>,
}

impl Default for RhaiScriptService {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiScriptService {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(create_engine()),
        }
    }
}

impl ScriptService for RhaiScriptService {
    fn prepare(
        &self,
        name: &str,
        source: &str,
        base_dir: Option<&Path>,
    ) -> Result<Arc<dyn PreparedScript>, ConfigError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ConfigError::Script {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        debug!("Compiled script {}", name);
        Ok(Arc::new(RhaiScript {
            name: name.to_string(),
            engine: self.engine.clone(),
            ast: Arc::new(ast),
            base_dir: base_dir.map(Path::to_path_buf),
        }))
    }
}

struct RhaiScript {
    name: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    base_dir: Option<PathBuf>,
}

impl PreparedScript for RhaiScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        context: &ScriptContext,
        stores: Arc<StoreRegistry>,
    ) -> Result<Option<ResponseBehaviour>, EngineError> {
        let mut scope = Scope::new();
        scope.push_constant("context", context.to_map());
        scope.push(
            "stores",
            ScriptStores {
                registry: stores,
                request_id: context.request_id.clone(),
            },
        );

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, self.ast.as_ref())
            .map_err(|e| EngineError::StepExecution {
                step: self.name.clone(),
                message: e.to_string(),
            })?;

        let Some(builder) = result.try_cast::<ResponseBuilder>() else {
            return Ok(None);
        };
        let mut behaviour = builder.behaviour;
        if let (ContentSource::File(file), Some(base)) = (&behaviour.content, &self.base_dir) {
            if file.is_relative() {
                behaviour.content = ContentSource::File(base.join(file));
            }
        }
        Ok(Some(behaviour))
    }
}

/// `stores` handle exposed to scripts.
#[derive(Clone)]
struct ScriptStores {
    registry: Arc<StoreRegistry>,
    request_id: String,
}

impl ScriptStores {
    fn open(&mut self, name: &str) -> ScriptStore {
        let store = if name == REQUEST_STORE_NAME {
            self.registry.request_store(&self.request_id)
        } else {
            self.registry.open(name)
        };
        ScriptStore { store }
    }
}

#[derive(Clone)]
struct ScriptStore {
    store: Arc<dyn Store>,
}

impl ScriptStore {
    fn load(&mut self, key: &str) -> Dynamic {
        self.store
            .load(key)
            .map(json_to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    }

    fn save(&mut self, key: &str, value: Dynamic) {
        self.store.save(key, dynamic_to_json(value));
    }

    fn has_item(&mut self, key: &str) -> bool {
        self.store.has_item(key)
    }

    fn delete(&mut self, key: &str) -> bool {
        self.store.delete(key)
    }

    fn load_all(&mut self) -> Dynamic {
        json_to_dynamic(Value::Object(self.store.load_all()))
    }

    fn count(&mut self) -> i64 {
        self.store.count() as i64
    }
}

/// `respond()` builder exposed to scripts.
#[derive(Debug, Clone, Default)]
struct ResponseBuilder {
    behaviour: ResponseBehaviour,
}

impl ResponseBuilder {
    fn with_status_code(&mut self, code: i64) -> Self {
        self.behaviour.status_code = u16::try_from(code).ok();
        self.clone()
    }

    fn with_content(&mut self, content: &str) -> Self {
        self.behaviour.content = ContentSource::Inline(content.to_string());
        self.clone()
    }

    fn with_file(&mut self, file: &str) -> Self {
        self.behaviour.content = ContentSource::File(PathBuf::from(file));
        self.clone()
    }

    fn with_header(&mut self, name: &str, value: &str) -> Self {
        self.behaviour.set_header(name, value);
        self.clone()
    }

    fn template(&mut self) -> Self {
        self.behaviour.template = true;
        self.clone()
    }

    fn with_failure(&mut self, failure: &str) -> Self {
        self.behaviour.failure_type = FailureType::parse(failure);
        self.clone()
    }

    fn with_delay(&mut self, ms: i64) -> Self {
        self.behaviour.performance = Some(DelayConfig {
            exact: Some(ms.max(0) as u64),
            ..Default::default()
        });
        self.clone()
    }

    fn with_delay_range(&mut self, min: i64, max: i64) -> Self {
        self.behaviour.performance = Some(DelayConfig {
            exact: None,
            min: Some(min.max(0) as u64),
            max: Some(max.max(0) as u64),
        });
        self.clone()
    }

    fn with_example_name(&mut self, name: &str) -> Self {
        self.behaviour.example_name = Some(name.to_string());
        self.clone()
    }

    fn skip_default_behaviour(&mut self) -> Self {
        self.behaviour.behaviour_type = BehaviourType::ShortCircuit;
        self.clone()
    }

    fn using_default_behaviour(&mut self) -> Self {
        self.behaviour.behaviour_type = BehaviourType::DefaultBehaviour;
        self.clone()
    }
}

fn create_engine() -> Engine {
    let mut engine = Engine::new();

    engine.on_print(|text| info!(target: "imposter::script", "{}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: "imposter::script", "{} {:?} {}", pos, source, text)
    });

    engine
        .register_type_with_name::<ScriptStores>("Stores")
        .register_fn("open", ScriptStores::open);

    engine
        .register_type_with_name::<ScriptStore>("Store")
        .register_fn("load", ScriptStore::load)
        .register_fn("save", ScriptStore::save)
        .register_fn("has_item", ScriptStore::has_item)
        .register_fn("delete", ScriptStore::delete)
        .register_fn("load_all", ScriptStore::load_all)
        .register_fn("count", ScriptStore::count);

    engine
        .register_type_with_name::<ResponseBuilder>("ResponseBuilder")
        .register_fn("respond", ResponseBuilder::default)
        .register_fn("withStatusCode", ResponseBuilder::with_status_code)
        .register_fn("withContent", ResponseBuilder::with_content)
        .register_fn("withFile", ResponseBuilder::with_file)
        .register_fn("withHeader", ResponseBuilder::with_header)
        .register_fn("template", ResponseBuilder::template)
        .register_fn("withFailure", ResponseBuilder::with_failure)
        .register_fn("withDelay", ResponseBuilder::with_delay)
        .register_fn("withDelayRange", ResponseBuilder::with_delay_range)
        .register_fn("withExampleName", ResponseBuilder::with_example_name)
        .register_fn("skipDefaultBehaviour", ResponseBuilder::skip_default_behaviour)
        .register_fn("usingDefaultBehaviour", ResponseBuilder::using_default_behaviour);

    engine
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Dynamic::from(i),
            (None, Some(f)) => Dynamic::from(f),
            (None, None) => Dynamic::UNIT,
        },
        Value::String(s) => Dynamic::from(s),
        Value::Array(items) => {
            Dynamic::from(items.into_iter().map(json_to_dynamic).collect::<Vec<_>>())
        }
        Value::Object(obj) => {
            let map: Map = obj
                .into_iter()
                .map(|(k, v)| (k.into(), json_to_dynamic(v)))
                .collect();
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if value.is_string() {
        Value::String(value.into_string().unwrap_or_default())
    } else if value.is_array() {
        let items = value.into_array().unwrap_or_default();
        Value::Array(items.into_iter().map(dynamic_to_json).collect())
    } else if value.is_map() {
        let map = value.cast::<Map>();
        Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                .collect(),
        )
    } else {
        Value::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_support::exchange_with_headers;
    use hyper::Method;
    use serde_json::json;

    fn run(source: &str, ex: &HttpExchange, stores: Arc<StoreRegistry>) -> Option<ResponseBehaviour> {
        let service = RhaiScriptService::new();
        let script = service.prepare("test", source, None).unwrap();
        script
            .execute(&ScriptContext::from_exchange(ex), stores)
            .unwrap()
    }

    fn request() -> HttpExchange {
        exchange_with_headers(
            Method::GET,
            "/pets?type=cat",
            &[("X-Tenant", "acme")],
            r#"{"name": "Fluffy"}"#,
        )
    }

    #[test]
    fn test_builder_methods() {
        let behaviour = run(
            r#"
            respond()
                .withStatusCode(201)
                .withContent("hello")
                .withHeader("X-Kind", context.request.queryParams["type"])
                .template()
                .withDelayRange(10, 20)
                .withExampleName("cat")
                .skipDefaultBehaviour()
            "#,
            &request(),
            Arc::new(StoreRegistry::new()),
        )
        .unwrap();

        assert_eq!(behaviour.status_code, Some(201));
        assert_eq!(behaviour.content, ContentSource::Inline("hello".into()));
        assert_eq!(behaviour.headers, vec![("X-Kind".into(), "cat".into())]);
        assert!(behaviour.template);
        assert_eq!(
            behaviour.performance,
            Some(DelayConfig {
                exact: None,
                min: Some(10),
                max: Some(20)
            })
        );
        assert_eq!(behaviour.example_name.as_deref(), Some("cat"));
        assert_eq!(behaviour.behaviour_type, BehaviourType::ShortCircuit);
    }

    #[test]
    fn test_unit_result_uses_defaults() {
        let result = run(
            r#"if context.request.method == "POST" { respond().withStatusCode(500) }"#,
            &request(),
            Arc::new(StoreRegistry::new()),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_failure_and_headers() {
        let behaviour = run(
            r#"respond().withFailure("CloseConnection").withHeader("a", context.request.headers["x-tenant"])"#,
            &request(),
            Arc::new(StoreRegistry::new()),
        )
        .unwrap();
        assert_eq!(behaviour.failure_type, Some(FailureType::CloseConnection));
        assert_eq!(behaviour.headers[0].1, "acme");
    }

    #[test]
    fn test_store_access() {
        let stores = Arc::new(StoreRegistry::new());
        stores.open("pets").save("count", json!(2));
        run(
            r#"
            let pets = stores.open("pets");
            pets.save("count", pets.load("count") + 1);
            pets.save("last", #{ name: "Rex", tags: ["a", "b"] });
            stores.open("request").save("seen", true);
            pets.delete("missing");
            "#,
            &request(),
            stores.clone(),
        );
        let pets = stores.open("pets");
        assert_eq!(pets.load("count"), Some(json!(3)));
        assert_eq!(pets.load("last"), Some(json!({"name": "Rex", "tags": ["a", "b"]})));
    }

    #[test]
    fn test_relative_file_uses_base_dir() {
        let service = RhaiScriptService::new();
        let script = service
            .prepare("test", r#"respond().withFile("pets.json")"#, Some(Path::new("/config")))
            .unwrap();
        let behaviour = script
            .execute(
                &ScriptContext::from_exchange(&request()),
                Arc::new(StoreRegistry::new()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            behaviour.content,
            ContentSource::File(PathBuf::from("/config/pets.json"))
        );
    }

    #[test]
    fn test_compile_and_runtime_errors() {
        let service = RhaiScriptService::new();
        assert!(matches!(
            service.prepare("broken", "respond(", None),
            Err(ConfigError::Script { .. })
        ));

        let script = service.prepare("throws", r#"throw "boom""#, None).unwrap();
        let result = script.execute(
            &ScriptContext::from_exchange(&request()),
            Arc::new(StoreRegistry::new()),
        );
        assert!(matches!(result, Err(EngineError::StepExecution { .. })));
    }
}
