//! Module execution engine
//!
//! Every request follows the same path:
//!
//! 1. normalize the id and map it to a canonical path
//! 2. pick a plan: mock directive, external load or normal evaluation
//! 3. look the cache key up, returning in-progress exports on cycles and
//!    joining an in-flight evaluation when there is one
//! 4. otherwise spawn the evaluation and share its future through the cache
//!
//! Evaluations run as spawned tasks, so an importer that stops waiting does
//! not cancel a module that already started.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use mink_automock::{AutomockOptions, MockKind, OxcParser};
use mink_mocker::{JsObject, MockType, Mocker, Value};
use tracing::{debug, warn};

use crate::cache::{CacheLookup, EvaluationFuture, ModuleCache};
use crate::config::{AutomockStrategy, ExternalMatcher, RunnerConfig};
use crate::context::ModuleContext;
use crate::error::{RunnerError, RunnerResult};
use crate::host::{ExternalLoader, ModuleEvaluator, ModuleHost, NoExternals};
use crate::interop;
use crate::mocks::{FactoryContext, MockDirective, MockFactory, ModuleMocker};
use crate::normalize::{
    VALID_ID_PREFIX, clean_url, is_internal_request, mock_key, normalize_module_id,
    normalize_request_id, slash, strip_shebang, to_file_path,
};

/// Where a request is stored and what it loads
#[derive(Debug, Clone)]
pub(crate) struct Target {
    /// Cache key: the path, or `mock:<path>` for mocks
    pub(crate) key: String,
    /// Id handed to the host
    pub(crate) id: String,
    /// Canonical path
    pub(crate) path: String,
}

impl Target {
    fn module(id: String, path: String) -> Self {
        Self {
            key: path.clone(),
            id,
            path,
        }
    }

    fn mocked(id: String, path: String) -> Self {
        Self {
            key: mock_key(&path),
            id,
            path,
        }
    }
}

/// How a target produces its exports
#[derive(Clone)]
enum Plan {
    Module,
    External,
    Automock(MockType),
    Factory(MockFactory),
}

struct RunnerInner {
    config: RunnerConfig,
    root: String,
    externals: ExternalMatcher,
    cache: Arc<ModuleCache>,
    host: Arc<dyn ModuleHost>,
    evaluator: Arc<dyn ModuleEvaluator>,
    external_loader: Arc<dyn ExternalLoader>,
    mocks: ModuleMocker,
    mocker: Mocker,
    stubs: HashMap<String, JsObject>,
}

/// Loads and evaluates modules on demand.
///
/// Cloning is cheap; clones share the cache, the mock directives and the
/// collaborators.
#[derive(Clone)]
pub struct ModuleRunner {
    inner: Arc<RunnerInner>,
}

impl ModuleRunner {
    /// Start building a runner over `host` and `evaluator`
    pub fn builder(
        host: impl ModuleHost + 'static,
        evaluator: impl ModuleEvaluator + 'static,
    ) -> RunnerBuilder {
        RunnerBuilder::new(host, evaluator)
    }

    /// Active configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Module cache
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.inner.cache
    }

    /// Registered module mocks
    pub fn mocks(&self) -> &ModuleMocker {
        &self.inner.mocks
    }

    /// Object mocker handed to module bodies and factories
    pub fn mocker(&self) -> &Mocker {
        &self.inner.mocker
    }

    /// Load and evaluate the module `id`
    pub async fn execute_id(&self, id: &str) -> RunnerResult<JsObject> {
        self.request(id, Vec::new()).await
    }

    /// Load and evaluate the module at `file`
    pub async fn execute_file(&self, file: impl AsRef<Path>) -> RunnerResult<JsObject> {
        let id = slash(&file.as_ref().to_string_lossy());
        self.execute_id(&id).await
    }

    /// Request `id` on behalf of the last module in `callstack`
    pub fn request(&self, id: &str, callstack: Vec<String>) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let runner = self.clone();
        let id = id.to_string();
        async move {
            let importer = callstack.last().cloned();
            let (id, path) = runner.resolve_url(&id, importer.as_deref()).await?;
            runner.dependency_request(id, path, callstack).await
        }
        .boxed()
    }

    /// Normalize `id` and map it to `(id, canonical path)`
    pub async fn resolve_url(&self, id: &str, importer: Option<&str>) -> RunnerResult<(String, String)> {
        if is_internal_request(id) {
            return Ok((id.to_string(), id.to_string()));
        }
        let importer = if id.starts_with(VALID_ID_PREFIX) { None } else { importer };

        let dep = normalize_request_id(id, Some(&self.inner.config.base));
        if self.inner.stubs.contains_key(&dep) {
            return Ok((dep.clone(), dep));
        }
        if is_internal_request(&dep) || self.inner.externals.is_external(&dep) {
            return Ok((dep.clone(), normalize_module_id(&dep)));
        }

        let file = to_file_path(&dep, &self.inner.root);
        if file.exists {
            return Ok((dep, normalize_module_id(&file.path)));
        }

        match self.inner.host.resolve_id(&dep, importer).await {
            Some(resolved) => {
                let resolved = normalize_request_id(&resolved, Some(&self.inner.config.base));
                let path = normalize_module_id(&resolved);
                Ok((resolved, path))
            }
            None => {
                let path = normalize_module_id(&file.path);
                if self.inner.mocks.contains(&path) {
                    debug!(module = %path, "resolved virtual mock");
                    return Ok((dep, path));
                }
                Err(RunnerError::not_found(id, importer))
            }
        }
    }

    /// Register a mock directive for `id`, returning the path it applies to.
    ///
    /// Ids that resolve to nothing are mocked as virtual modules. Cached
    /// records of the path and of its mock are dropped.
    pub async fn mock(
        &self,
        id: &str,
        importer: Option<&str>,
        directive: MockDirective,
    ) -> RunnerResult<String> {
        let path = self.mock_path(id, importer).await?;
        let directive = match directive {
            MockDirective::Redirect(target) => {
                let (_, target) = self.resolve_url(&target, importer).await?;
                MockDirective::Redirect(target)
            }
            other => other,
        };
        debug!(module = %path, kind = directive.kind(), "registered module mock");
        self.inner.mocks.set(&path, directive);
        self.forget(&path);
        Ok(path)
    }

    /// Remove the mock directive for `id`
    pub async fn unmock(&self, id: &str, importer: Option<&str>) -> RunnerResult<bool> {
        let path = self.mock_path(id, importer).await?;
        let removed = self.inner.mocks.remove(&path).is_some();
        self.forget(&path);
        Ok(removed)
    }

    /// Remove every mock directive
    pub fn unmock_all(&self) {
        for path in self.inner.mocks.clear() {
            self.forget(&path);
        }
    }

    /// Reset `id` so it evaluates again on next request
    pub fn invalidate(&self, id: &str) {
        self.inner.cache.invalidate(id);
    }

    /// Drop `ids` and everything that transitively imports them
    pub fn invalidate_dep_tree<I, S>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.cache.invalidate_dep_tree(ids).into_iter().collect()
    }

    /// Drop `ids` and everything they transitively import
    pub fn invalidate_sub_dep_tree<I, S>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.cache.invalidate_sub_dep_tree(ids).into_iter().collect()
    }

    async fn mock_path(&self, id: &str, importer: Option<&str>) -> RunnerResult<String> {
        match self.resolve_url(id, importer).await {
            Ok((_, path)) => Ok(path),
            Err(RunnerError::ModuleNotFound { .. }) => Ok(normalize_module_id(&normalize_request_id(
                id,
                Some(&self.inner.config.base),
            ))),
            Err(e) => Err(e),
        }
    }

    fn forget(&self, path: &str) {
        self.inner.cache.delete(path);
        self.inner.cache.delete(&mock_key(path));
    }

    /// Request a resolved module, applying mocks
    pub(crate) fn dependency_request(
        &self,
        id: String,
        path: String,
        callstack: Vec<String>,
    ) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let (target, plan) = self.route(id, path, &callstack);
        let request = self.cached_request(target.clone(), plan, callstack.clone());

        match self.inner.config.slow_module_threshold_ms {
            Some(ms) => warn_if_slow(request, Duration::from_millis(ms), target.key, callstack).boxed(),
            None => request,
        }
    }

    /// Request the unmocked module behind `path`
    pub(crate) fn original_request(
        &self,
        id: String,
        path: String,
        callstack: Vec<String>,
    ) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let plan = self.original_plan(&id);
        self.cached_request(Target::module(id, path), plan, callstack)
    }

    fn original_plan(&self, id: &str) -> Plan {
        if self.inner.externals.is_external(id) {
            Plan::External
        } else {
            Plan::Module
        }
    }

    fn route(&self, id: String, path: String, callstack: &[String]) -> (Target, Plan) {
        // A module already being evaluated is never swapped for its mock.
        let directive = if callstack.contains(&path) {
            None
        } else {
            self.inner.mocks.get(&path)
        };

        match directive {
            Some(MockDirective::Factory(factory)) => (Target::mocked(id, path), Plan::Factory(factory)),
            Some(MockDirective::Automock) => {
                (Target::mocked(id, path), Plan::Automock(MockType::Automock))
            }
            Some(MockDirective::Autospy) => {
                (Target::mocked(id, path), Plan::Automock(MockType::Autospy))
            }
            Some(MockDirective::Redirect(redirect)) if !callstack.contains(&redirect) => {
                debug!(module = %path, redirect = %redirect, "redirected mocked module");
                let plan = self.original_plan(&redirect);
                (Target::module(redirect.clone(), redirect), plan)
            }
            _ => {
                let plan = self.original_plan(&id);
                (Target::module(id, path), plan)
            }
        }
    }

    fn cached_request(
        &self,
        target: Target,
        plan: Plan,
        callstack: Vec<String>,
    ) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let runner = self.clone();
        async move {
            let cache = &runner.inner.cache;
            if callstack.contains(&target.key) && cache.exports(&target.key).is_none() {
                return Err(RunnerError::circular(&callstack, &target.key));
            }

            let key = target.key.clone();
            let lookup = cache.lookup_or_start(&key, &callstack, |evaluation| {
                runner.spawn_evaluation(target, plan, callstack.clone(), evaluation)
            });
            match lookup {
                CacheLookup::Exports(exports) => Ok(exports),
                CacheLookup::Pending(promise) => promise.await,
            }
        }
        .boxed()
    }

    fn spawn_evaluation(
        &self,
        target: Target,
        plan: Plan,
        callstack: Vec<String>,
        evaluation: u64,
    ) -> EvaluationFuture {
        let runner = self.clone();
        let cache = self.inner.cache.clone();
        let key = target.key.clone();

        let task = tokio::spawn(async move {
            let key = target.key.clone();
            let result = runner.direct_request(target, plan, callstack, evaluation).await;
            runner.inner.cache.settle(&key, evaluation, &result);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let error = RunnerError::internal(format!("evaluation of {} did not finish: {}", key, e));
                    let result = Err(error);
                    cache.settle(&key, evaluation, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }

    fn direct_request(
        &self,
        target: Target,
        plan: Plan,
        mut callstack: Vec<String>,
        evaluation: u64,
    ) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let runner = self.clone();
        async move {
            callstack.push(target.key.clone());
            match plan {
                Plan::External => runner.interoped_import(&target.id).await,
                Plan::Module => runner.evaluate(&target, &callstack, evaluation, None).await,
                Plan::Automock(mock_type) => {
                    let transform = runner.inner.config.automock_strategy == AutomockStrategy::Transform
                        && !runner.inner.externals.is_external(&target.id);
                    if transform {
                        return runner
                            .evaluate(&target, &callstack, evaluation, Some(mock_type))
                            .await;
                    }
                    let original = runner
                        .original_request(target.id.clone(), target.path.clone(), callstack)
                        .await?;
                    debug!(module = %target.path, mock_type = %mock_type, "mocked module exports");
                    Ok(runner.mock_namespace(&original, mock_type))
                }
                Plan::Factory(factory) => runner.call_factory(&target, factory, callstack).await,
            }
        }
        .boxed()
    }

    async fn evaluate(
        &self,
        target: &Target,
        callstack: &[String],
        evaluation: u64,
        automock: Option<MockType>,
    ) -> RunnerResult<JsObject> {
        if let Some(stub) = self.inner.stubs.get(&target.id) {
            debug!(module = %target.id, "serving request stub");
            return Ok(stub.clone());
        }

        let importer = callstack.iter().rev().nth(1).map(String::as_str);
        let Some(fetched) = self.inner.host.fetch_module(&target.id).await? else {
            return Err(RunnerError::not_found(&target.id, importer));
        };

        if let Some(external) = fetched.externalize {
            debug!(module = %target.id, external = %external, "externalized module");
            let exports = self.interoped_import(&external).await?;
            return Ok(match automock {
                Some(mock_type) => self.mock_namespace(&exports, mock_type),
                None => exports,
            });
        }

        let Some(mut code) = fetched.code else {
            return Err(RunnerError::not_found(&target.id, importer));
        };

        if let Some(mock_type) = automock {
            let options = AutomockOptions {
                global_accessor: self.inner.config.global_accessor.clone(),
                mock_kind: match mock_type {
                    MockType::Automock => MockKind::Automock,
                    MockType::Autospy => MockKind::Autospy,
                },
            };
            let parser = OxcParser::for_path(clean_url(&target.path));
            code = mink_automock::automock(&code, &parser, &options)?;
            debug!(module = %target.path, mock_type = %mock_type, "automocked module");
        }

        let exports = JsObject::module_namespace();
        self.inner.cache.begin(&target.key, evaluation, &exports, Some(&code));

        let context = ModuleContext::new(self.clone(), target.clone(), callstack.to_vec(), exports.clone());
        let code = strip_shebang(&code);
        debug!(module = %target.path, "executing module");
        self.inner
            .evaluator
            .run_module(context, &code)
            .await
            .map_err(|e| RunnerError::from_evaluation(&target.path, e))?;

        Ok(exports)
    }

    async fn call_factory(
        &self,
        target: &Target,
        factory: MockFactory,
        callstack: Vec<String>,
    ) -> RunnerResult<JsObject> {
        debug!(module = %target.path, "running mock factory");
        let context = FactoryContext::new(self.clone(), target.clone(), callstack);

        let value = match factory(context).await {
            Ok(value) => value,
            Err(error) => {
                if let Some(inner) = error.downcast_host::<RunnerError>() {
                    return Err(inner.clone());
                }
                warn!(module = %target.path, error = %error, "mock factory failed");
                return Err(RunnerError::MockFactory {
                    id: target.path.clone(),
                    message: error.to_string(),
                });
            }
        };

        match value {
            Value::Object(exports) => Ok(exports),
            other => Err(RunnerError::NonObjectFactory {
                id: target.path.clone(),
                kind: other.type_name().to_string(),
            }),
        }
    }

    async fn interoped_import(&self, id: &str) -> RunnerResult<JsObject> {
        debug!(module = id, "importing external module");
        let module = self.inner.external_loader.import(id).await?;
        Ok(interop::interop_module(id, module, self.inner.config.interop_default))
    }

    fn mock_namespace(&self, original: &JsObject, mock_type: MockType) -> JsObject {
        match self.inner.mocker.mock_object(&Value::Object(original.clone()), mock_type) {
            Value::Object(mocked) => mocked,
            _ => JsObject::module_namespace(),
        }
    }
}

impl std::fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRunner")
            .field("config", &self.inner.config)
            .field("cached", &self.inner.cache.len())
            .field("mocks", &self.inner.mocks.len())
            .finish()
    }
}

async fn warn_if_slow(
    mut request: BoxFuture<'static, RunnerResult<JsObject>>,
    threshold: Duration,
    key: String,
    callstack: Vec<String>,
) -> RunnerResult<JsObject> {
    tokio::select! {
        result = &mut request => result,
        _ = tokio::time::sleep(threshold) => {
            warn!(
                module = %key,
                threshold_ms = threshold.as_millis() as u64,
                stack = %render_stack(&callstack, &key),
                "module is taking long to load"
            );
            request.await
        }
    }
}

/// Import stack, innermost first
fn render_stack(callstack: &[String], id: &str) -> String {
    callstack
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(id))
        .rev()
        .map(|entry| format!("  - {}", entry))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builder for [`ModuleRunner`]
pub struct RunnerBuilder {
    config: RunnerConfig,
    host: Arc<dyn ModuleHost>,
    evaluator: Arc<dyn ModuleEvaluator>,
    external_loader: Arc<dyn ExternalLoader>,
    cache: Option<Arc<ModuleCache>>,
    mocker: Option<Mocker>,
    stubs: HashMap<String, JsObject>,
}

impl RunnerBuilder {
    /// Builder with default configuration and no external loader
    pub fn new(host: impl ModuleHost + 'static, evaluator: impl ModuleEvaluator + 'static) -> Self {
        let stubs = ["/@vite/client", "@vite/client"]
            .into_iter()
            .map(|id| (id.to_string(), JsObject::module_namespace()))
            .collect();
        Self {
            config: RunnerConfig::default(),
            host: Arc::new(host),
            evaluator: Arc::new(evaluator),
            external_loader: Arc::new(NoExternals),
            cache: None,
            mocker: None,
            stubs,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the loader for builtins and externalized modules
    pub fn external_loader(mut self, loader: impl ExternalLoader + 'static) -> Self {
        self.external_loader = Arc::new(loader);
        self
    }

    /// Share an existing module cache
    pub fn cache(mut self, cache: Arc<ModuleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Object mocker for automocks and module bodies.
    ///
    /// Defaults to a mocker bound to the process-wide registry.
    pub fn mocker(mut self, mocker: Mocker) -> Self {
        self.mocker = Some(mocker);
        self
    }

    /// Answer `id` with `exports` without asking the host
    pub fn request_stub(mut self, id: impl Into<String>, exports: JsObject) -> Self {
        self.stubs.insert(id.into(), exports);
        self
    }

    /// Build the runner
    pub fn build(self) -> RunnerResult<ModuleRunner> {
        let externals = ExternalMatcher::new(&self.config.external)?;
        let root = self.config.root_str();
        Ok(ModuleRunner {
            inner: Arc::new(RunnerInner {
                root,
                externals,
                cache: self.cache.unwrap_or_default(),
                host: self.host,
                evaluator: self.evaluator,
                external_loader: self.external_loader,
                mocks: ModuleMocker::new(),
                mocker: self.mocker.unwrap_or_else(Mocker::global),
                stubs: self.stubs,
                config: self.config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_stack() {
        let stack = vec!["/main.js".to_string(), "/a.js".to_string()];
        assert_eq!(
            render_stack(&stack, "/b.js"),
            "  - /b.js\n  - /a.js\n  - /main.js"
        );
    }

    #[test]
    fn test_targets() {
        let target = Target::mocked("./a".into(), "/src/a.js".into());
        assert_eq!(target.key, "mock:/src/a.js");
        assert_eq!(Target::module("./a".into(), "/src/a.js".into()).key, "/src/a.js");
    }
}
