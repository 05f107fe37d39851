//! Module mock directives
//!
//! A directive replaces what importing a path yields: a factory result, an
//! automocked or autospied copy of the real module, or another module
//! entirely.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use mink_mocker::{JsObject, JsResult, Mocker, Value};

use crate::error::RunnerResult;
use crate::runner::{ModuleRunner, Target};

/// Produces the exports of a mocked module
pub type MockFactory = Arc<dyn Fn(FactoryContext) -> BoxFuture<'static, JsResult<Value>> + Send + Sync>;

/// Wrap an async closure as a [`MockFactory`]
pub fn mock_factory<F, Fut>(f: F) -> MockFactory
where
    F: Fn(FactoryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JsResult<Value>> + Send + 'static,
{
    Arc::new(move |context| f(context).boxed())
}

/// What importing a mocked path yields
#[derive(Clone)]
pub enum MockDirective {
    /// The object returned by a factory
    Factory(MockFactory),
    /// The real module with every export replaced by a no-op mock
    Automock,
    /// The real module with every function wrapped in a spy
    Autospy,
    /// Another module, by path
    Redirect(String),
}

impl MockDirective {
    /// Factory directive from an async closure
    pub fn factory<F, Fut>(f: F) -> Self
    where
        F: Fn(FactoryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JsResult<Value>> + Send + 'static,
    {
        Self::Factory(mock_factory(f))
    }

    /// Short name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Factory(_) => "factory",
            Self::Automock => "automock",
            Self::Autospy => "autospy",
            Self::Redirect(_) => "redirect",
        }
    }
}

impl std::fmt::Debug for MockDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redirect(path) => f.debug_tuple("Redirect").field(path).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Directives keyed by normalized module path.
///
/// Registration goes through [`ModuleRunner::mock`] so the affected cache
/// entries are dropped at the same time.
#[derive(Debug, Clone, Default)]
pub struct ModuleMocker {
    directives: Arc<DashMap<String, MockDirective>>,
}

impl ModuleMocker {
    /// Create an empty directive table
    pub fn new() -> Self {
        Self::default()
    }

    /// Directive registered for `path`
    pub fn get(&self, path: &str) -> Option<MockDirective> {
        self.directives.get(path).map(|entry| entry.value().clone())
    }

    /// Whether `path` is mocked
    pub fn contains(&self, path: &str) -> bool {
        self.directives.contains_key(path)
    }

    /// Mocked paths
    pub fn paths(&self) -> Vec<String> {
        self.directives.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of directives
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Whether no module is mocked
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub(crate) fn set(&self, path: &str, directive: MockDirective) -> Option<MockDirective> {
        self.directives.insert(path.to_string(), directive)
    }

    pub(crate) fn remove(&self, path: &str) -> Option<MockDirective> {
        self.directives.remove(path).map(|(_, directive)| directive)
    }

    pub(crate) fn clear(&self) -> Vec<String> {
        let paths = self.paths();
        self.directives.clear();
        paths
    }
}

/// What a mock factory can reach while it runs
#[derive(Clone)]
pub struct FactoryContext {
    runner: ModuleRunner,
    target: Target,
    callstack: Vec<String>,
}

impl FactoryContext {
    pub(crate) fn new(runner: ModuleRunner, target: Target, callstack: Vec<String>) -> Self {
        Self {
            runner,
            target,
            callstack,
        }
    }

    /// Path of the mocked module
    pub fn id(&self) -> &str {
        &self.target.path
    }

    /// Import `dep` relative to the mocked module, mocks applied
    pub fn import(&self, dep: &str) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let runner = self.runner.clone();
        let importer = self.target.path.clone();
        let callstack = self.callstack.clone();
        let dep = dep.to_string();

        async move {
            let (id, path) = runner.resolve_url(&dep, Some(&importer)).await?;
            runner.dependency_request(id, path, callstack).await
        }
        .boxed()
    }

    /// The real module behind the mock
    pub fn import_original(&self) -> BoxFuture<'static, RunnerResult<JsObject>> {
        self.runner
            .original_request(self.target.id.clone(), self.target.path.clone(), self.callstack.clone())
    }

    /// Object mocker, for building partial mocks
    pub fn mocker(&self) -> &Mocker {
        self.runner.mocker()
    }
}

impl std::fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext")
            .field("id", &self.target.path)
            .field("callstack", &self.callstack)
            .finish()
    }
}
