//! Collaborators the runner is driven by
//!
//! The runner owns caching and evaluation order; resolving ids, producing
//! transformed code, running module bodies and loading externals are
//! delegated to these traits.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mink_mocker::{JsResult, Value};
use oxc_resolver::{ResolveOptions, Resolver};
use tracing::trace;

use crate::context::ModuleContext;
use crate::error::{RunnerError, RunnerResult};
use crate::normalize::{clean_url, dirname, slash};

/// Transformed module as returned by the host
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// Evaluable module code
    pub code: Option<String>,
    /// Source map for `code`
    pub map: Option<String>,
    /// Load this path through the external loader instead
    pub externalize: Option<String>,
}

impl FetchResult {
    /// Result carrying module code
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Result asking for the module to be loaded externally
    pub fn externalize(path: impl Into<String>) -> Self {
        Self {
            externalize: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Resolution and transform pipeline
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Resolve an id the runner could not map to a file
    async fn resolve_id(&self, _id: &str, _importer: Option<&str>) -> Option<String> {
        None
    }

    /// Transformed code for a resolved id, `None` when there is none
    async fn fetch_module(&self, id: &str) -> RunnerResult<Option<FetchResult>>;
}

/// Runs a module body
#[async_trait]
pub trait ModuleEvaluator: Send + Sync {
    /// Evaluate `code` with `context` as its module scope
    async fn run_module(&self, context: ModuleContext, code: &str) -> JsResult<()>;
}

/// Loads modules that bypass the transform pipeline
#[async_trait]
pub trait ExternalLoader: Send + Sync {
    /// Import `id` natively
    async fn import(&self, id: &str) -> RunnerResult<Value>;
}

/// External loader that refuses every request
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternals;

#[async_trait]
impl ExternalLoader for NoExternals {
    async fn import(&self, id: &str) -> RunnerResult<Value> {
        Err(RunnerError::external(id, "no external loader configured"))
    }
}

/// Host serving untransformed files from disk.
///
/// Specifiers are resolved against the importer's directory with
/// `oxc_resolver`: relative and absolute paths, `extensions`, `index.*`
/// files and `node_modules` packages through `package.json`. Anything under
/// `node_modules` is externalized.
#[derive(Clone)]
pub struct FsModuleHost {
    resolver: Arc<Resolver>,
    base_dir: PathBuf,
}

impl FsModuleHost {
    /// Host with the default extension list
    pub fn new() -> Self {
        Self::with_extensions(
            [".js", ".mjs", ".cjs", ".ts", ".mts", ".jsx", ".tsx", ".json"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    /// Host trying `extensions` for extensionless specifiers
    pub fn with_extensions(extensions: Vec<String>) -> Self {
        let options = ResolveOptions {
            extensions,
            main_fields: vec!["main".to_string(), "module".to_string()],
            condition_names: vec![
                "import".to_string(),
                "module".to_string(),
                "node".to_string(),
                "default".to_string(),
            ],
            ..Default::default()
        };
        Self {
            resolver: Arc::new(Resolver::new(options)),
            base_dir: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Directory specifiers without an importer are resolved from
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }
}

impl Default for FsModuleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FsModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsModuleHost")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModuleHost for FsModuleHost {
    async fn resolve_id(&self, id: &str, importer: Option<&str>) -> Option<String> {
        let base_dir = importer
            .map(|importer| PathBuf::from(dirname(clean_url(importer))))
            .unwrap_or_else(|| self.base_dir.clone());

        match self.resolver.resolve(&base_dir, id) {
            Ok(resolution) => {
                let resolved = slash(&resolution.full_path().to_string_lossy());
                trace!(id, resolved = %resolved, "resolved module");
                Some(resolved)
            }
            Err(e) => {
                trace!(id, base_dir = %base_dir.display(), error = %e, "unresolved module");
                None
            }
        }
    }

    async fn fetch_module(&self, id: &str) -> RunnerResult<Option<FetchResult>> {
        let path = clean_url(id);
        if path.contains("/node_modules/") {
            return Ok(Some(FetchResult::externalize(path)));
        }
        match tokio::fs::read_to_string(path).await {
            Ok(code) => Ok(Some(FetchResult::code(code))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RunnerError::internal(format!("failed to read {}: {}", path, e))),
        }
    }
}
