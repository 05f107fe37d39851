//! Per-module execution context

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use mink_mocker::{JsObject, Mocker, Value};

use crate::error::RunnerResult;
use crate::interop;
use crate::normalize::{clean_url, dirname, file_url};
use crate::runner::{ModuleRunner, Target};

/// `import.meta` of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMeta {
    /// `file://` URL of the module
    pub url: String,
    /// Absolute path of the module
    pub filename: String,
    /// Directory containing the module
    pub dirname: String,
}

impl ImportMeta {
    fn for_path(path: &str) -> Self {
        let filename = clean_url(path).to_string();
        Self {
            url: file_url(&filename),
            dirname: dirname(&filename),
            filename,
        }
    }
}

/// Everything a module body sees of the runner: its own exports, nested
/// imports routed back through the cache, and the object mocker.
#[derive(Clone)]
pub struct ModuleContext {
    runner: ModuleRunner,
    target: Target,
    callstack: Vec<String>,
    exports: JsObject,
    meta: ImportMeta,
}

impl ModuleContext {
    pub(crate) fn new(
        runner: ModuleRunner,
        target: Target,
        callstack: Vec<String>,
        exports: JsObject,
    ) -> Self {
        let meta = ImportMeta::for_path(&target.path);
        Self {
            runner,
            target,
            callstack,
            exports,
            meta,
        }
    }

    /// Cache key of the module being evaluated
    pub fn id(&self) -> &str {
        &self.target.key
    }

    /// Absolute path of the module
    pub fn filename(&self) -> &str {
        &self.meta.filename
    }

    /// Directory of the module
    pub fn dirname(&self) -> &str {
        &self.meta.dirname
    }

    /// `import.meta`
    pub fn import_meta(&self) -> &ImportMeta {
        &self.meta
    }

    /// The module's namespace object
    pub fn exports(&self) -> &JsObject {
        &self.exports
    }

    /// Ids currently being evaluated on this branch, this module last
    pub fn callstack(&self) -> &[String] {
        &self.callstack
    }

    /// Import `dep` relative to this module. The future does not borrow the
    /// context.
    pub fn import(&self, dep: &str) -> BoxFuture<'static, RunnerResult<JsObject>> {
        let runner = self.runner.clone();
        let importer = self.target.path.clone();
        let key = self.target.key.clone();
        let callstack = self.callstack.clone();
        let dep = dep.to_string();

        async move {
            let (id, path) = runner.resolve_url(&dep, Some(&importer)).await?;
            runner.cache().link(&key, &path);
            runner.dependency_request(id, path, callstack).await
        }
        .boxed()
    }

    /// `import(dep)` from inside the body
    pub fn dynamic_import(&self, dep: &str) -> BoxFuture<'static, RunnerResult<JsObject>> {
        self.import(dep)
    }

    /// `export * from source`
    pub fn export_all(&self, source: &Value) {
        interop::export_all(&self.exports, source);
    }

    /// CommonJS `module.exports = value`: named keys become live bindings and
    /// `default` is the value itself
    pub fn set_module_exports(&self, value: Value) {
        interop::export_all(&self.exports, &value);
        self.exports.set("default", value);
    }

    /// Object mocker used by automocked code
    pub fn mocker(&self) -> &Mocker {
        self.runner.mocker()
    }

    /// The runner evaluating this module
    pub fn runner(&self) -> &ModuleRunner {
        &self.runner
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("id", &self.target.key)
            .field("meta", &self.meta)
            .field("callstack", &self.callstack)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_meta() {
        let meta = ImportMeta::for_path("/project/src/a.ts?raw");
        assert_eq!(meta.filename, "/project/src/a.ts");
        assert_eq!(meta.dirname, "/project/src");
        assert_eq!(meta.url, "file:///project/src/a.ts");
    }
}
