//! In-memory host and scripted evaluator shared by the runner suites
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use mink_mocker::{JsError, JsObject, JsResult, MockRegistry, MockType, Mocker, Value};
use mink_runner::normalize::dirname;
use mink_runner::{
    ExternalLoader, FetchResult, ModuleContext, ModuleEvaluator, ModuleHost, ModuleRunner,
    RunnerBuilder, RunnerConfig, RunnerError, RunnerResult,
};
use parking_lot::Mutex;

/// Module body: receives the context and the namespace to populate
pub type Body = Arc<dyn Fn(ModuleContext, JsObject) -> BoxFuture<'static, JsResult<()>> + Send + Sync>;

/// Host serving code from a map; code starting with `externalize:` asks for
/// an external load of the rest
#[derive(Clone, Default)]
pub struct MemoryHost {
    files: Arc<Mutex<HashMap<String, String>>>,
    fetches: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryHost {
    pub fn file(&self, path: &str, code: &str) -> &Self {
        self.files.lock().insert(path.to_string(), code.to_string());
        self
    }

    pub fn fetches(&self, path: &str) -> usize {
        self.fetches.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModuleHost for MemoryHost {
    async fn resolve_id(&self, id: &str, importer: Option<&str>) -> Option<String> {
        let path = match id.strip_prefix("./") {
            Some(relative) => format!("{}/{}", dirname(importer?).trim_end_matches('/'), relative),
            None => id.to_string(),
        };
        let files = self.files.lock();
        [path.clone(), format!("{}.js", path)]
            .into_iter()
            .find(|candidate| files.contains_key(candidate))
    }

    async fn fetch_module(&self, id: &str) -> RunnerResult<Option<FetchResult>> {
        *self.fetches.lock().entry(id.to_string()).or_default() += 1;
        let files = self.files.lock();
        Ok(files.get(id).map(|code| match code.strip_prefix("externalize:") {
            Some(path) => FetchResult::externalize(path),
            None => FetchResult::code(code.clone()),
        }))
    }
}

/// Evaluator running registered Rust closures keyed by module filename.
///
/// Automocked code is recognized by its `mockObject(` call: the original body
/// fills a scratch namespace which is then mocked and re-exported, as the
/// generated code would.
#[derive(Clone, Default)]
pub struct Scripted {
    bodies: Arc<Mutex<HashMap<String, Body>>>,
    runs: Arc<Mutex<HashMap<String, usize>>>,
    codes: Arc<Mutex<HashMap<String, String>>>,
}

impl Scripted {
    pub fn module<F, Fut>(&self, path: &str, body: F) -> &Self
    where
        F: Fn(ModuleContext, JsObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JsResult<()>> + Send + 'static,
    {
        let body: Body = Arc::new(move |ctx, exports| body(ctx, exports).boxed());
        self.bodies.lock().insert(path.to_string(), body);
        self
    }

    pub fn runs(&self, path: &str) -> usize {
        self.runs.lock().get(path).copied().unwrap_or(0)
    }

    pub fn code(&self, path: &str) -> Option<String> {
        self.codes.lock().get(path).cloned()
    }
}

#[async_trait]
impl ModuleEvaluator for Scripted {
    async fn run_module(&self, context: ModuleContext, code: &str) -> JsResult<()> {
        let path = context.filename().to_string();
        *self.runs.lock().entry(path.clone()).or_default() += 1;
        self.codes.lock().insert(path.clone(), code.to_string());

        let body = self
            .bodies
            .lock()
            .get(&path)
            .cloned()
            .ok_or_else(|| JsError::type_error(format!("no body registered for {}", path)))?;

        if !code.contains(".mockObject(") {
            let exports = context.exports().clone();
            return body(context, exports).await;
        }

        let current = JsObject::module_namespace();
        body(context.clone(), current.clone()).await?;
        let kind = if code.contains("\"autospy\")") {
            MockType::Autospy
        } else {
            MockType::Automock
        };
        let mocked = context.mocker().mock_object(&Value::Object(current), kind);
        let keys = mocked.property_holder().map(JsObject::keys).unwrap_or_default();
        for key in keys {
            context.exports().set(key.as_str(), mocked.get(key.as_str()));
        }
        Ok(())
    }
}

/// External loader answering from a map and counting imports
#[derive(Clone, Default)]
pub struct MapLoader {
    modules: Arc<Mutex<HashMap<String, Value>>>,
    imports: Arc<Mutex<Vec<String>>>,
}

impl MapLoader {
    pub fn module(&self, id: &str, value: Value) -> &Self {
        self.modules.lock().insert(id.to_string(), value);
        self
    }

    pub fn imports(&self) -> Vec<String> {
        self.imports.lock().clone()
    }
}

#[async_trait]
impl ExternalLoader for MapLoader {
    async fn import(&self, id: &str) -> RunnerResult<Value> {
        self.imports.lock().push(id.to_string());
        self.modules
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::external(id, "unknown module"))
    }
}

pub fn builder(host: &MemoryHost, evaluator: &Scripted) -> RunnerBuilder {
    ModuleRunner::builder(host.clone(), evaluator.clone())
        .config(RunnerConfig::with_root("/project"))
        .mocker(Mocker::new(MockRegistry::new()))
}

pub fn runner(host: &MemoryHost, evaluator: &Scripted) -> ModuleRunner {
    builder(host, evaluator).build().unwrap()
}

/// Import `dep` from a module body, surfacing loader errors to the caller
pub async fn import(ctx: &ModuleContext, dep: &str) -> JsResult<JsObject> {
    Ok(ctx.import(dep).await?)
}
