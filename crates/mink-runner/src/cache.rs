//! Module cache
//!
//! One [`ModuleRecord`] per normalized id. Records are created on first
//! request and hold the exports object, the dependency edges and the shared
//! in-flight evaluation.

use std::collections::HashSet;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use indexmap::IndexSet;
use mink_mocker::JsObject;
use tracing::trace;

use crate::error::RunnerResult;

/// Shared handle to a running evaluation
pub type EvaluationFuture = Shared<BoxFuture<'static, RunnerResult<JsObject>>>;

/// Evaluation state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleState {
    /// Not evaluated yet, or evaluation in progress
    #[default]
    Pending,
    /// Evaluated successfully
    Resolved,
    /// Last evaluation failed
    Errored,
}

/// Cached state of one module
#[derive(Clone, Default)]
pub struct ModuleRecord {
    /// Evaluation state
    pub state: ModuleState,
    /// Exports object, present from the moment evaluation starts
    pub exports: Option<JsObject>,
    /// Dependencies requested during evaluation, in request order
    pub imports: IndexSet<String>,
    /// Modules that requested this one
    pub importers: HashSet<String>,
    /// In-flight or settled evaluation
    pub promise: Option<EvaluationFuture>,
    /// Code that was evaluated
    pub code: Option<String>,
    evaluation: u64,
}

impl ModuleRecord {
    /// Whether evaluation finished successfully
    pub fn is_evaluated(&self) -> bool {
        self.state == ModuleState::Resolved
    }

    fn reset(&mut self) {
        self.state = ModuleState::Pending;
        self.exports = None;
        self.imports.clear();
        self.importers.clear();
        self.promise = None;
        self.code = None;
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("state", &self.state)
            .field("has_exports", &self.exports.is_some())
            .field("imports", &self.imports)
            .field("importers", &self.importers)
            .field("in_flight", &self.promise.is_some())
            .finish()
    }
}

/// What a request found in the cache
pub(crate) enum CacheLookup {
    /// Exports to hand out directly
    Exports(JsObject),
    /// Evaluation to wait on
    Pending(EvaluationFuture),
}

/// Concurrent map of module records
#[derive(Debug, Default)]
pub struct ModuleCache {
    records: DashMap<String, ModuleRecord>,
}

impl ModuleCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a record
    pub fn get(&self, id: &str) -> Option<ModuleRecord> {
        self.records.get(id).map(|record| record.clone())
    }

    /// Exports of a record, if it has any
    pub fn exports(&self, id: &str) -> Option<JsObject> {
        self.records.get(id).and_then(|record| record.exports.clone())
    }

    /// Whether a record exists for `id`
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every cached id
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Store a fully evaluated module
    pub fn set_exports(&self, id: &str, exports: JsObject) {
        let mut record = self.records.entry(id.to_string()).or_default();
        record.exports = Some(exports);
        record.state = ModuleState::Resolved;
    }

    /// Mutate a record, creating it first when missing
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut ModuleRecord) -> R) -> R {
        let mut record = self.records.entry(id.to_string()).or_default();
        f(&mut record)
    }

    /// Remove a record
    pub fn delete(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Record the edge `importer -> dependency`
    pub(crate) fn link(&self, importer: &str, dependency: &str) {
        self.update(dependency, |record| {
            record.importers.insert(importer.to_string());
        });
        self.update(importer, |record| {
            record.imports.insert(dependency.to_string());
        });
    }

    /// Find exports or an evaluation to wait on for `id`, starting one with
    /// `start` when neither exists.
    ///
    /// Exports are returned directly when `id` is already on `callstack`, its
    /// imports intersect its importers, or its imports lead back to a module
    /// on `callstack`: each means a cycle whose other half is still running.
    pub(crate) fn lookup_or_start(
        &self,
        id: &str,
        callstack: &[String],
        start: impl FnOnce(u64) -> EvaluationFuture,
    ) -> CacheLookup {
        // Walked before taking the entry: the walk reads other records, which
        // may share its shard.
        let reaches_callstack = self.imports_reach(id, callstack);

        let mut record = self.records.entry(id.to_string()).or_default();
        if let Some(importer) = callstack.last() {
            record.importers.insert(importer.clone());
        }

        let circular = reaches_callstack
            || callstack.iter().any(|entry| entry == id)
            || record.imports.iter().any(|dep| record.importers.contains(dep));
        if circular && let Some(exports) = &record.exports {
            trace!(module = id, "returning in-progress exports");
            return CacheLookup::Exports(exports.clone());
        }

        if let Some(promise) = &record.promise {
            trace!(module = id, "cache hit");
            return CacheLookup::Pending(promise.clone());
        }

        record.evaluation += 1;
        record.state = ModuleState::Pending;
        let promise = start(record.evaluation);
        record.promise = Some(promise.clone());
        CacheLookup::Pending(promise)
    }

    /// Whether following `imports` edges from `id` reaches any of `targets`
    fn imports_reach(&self, id: &str, targets: &[String]) -> bool {
        if targets.is_empty() {
            return false;
        }
        let mut seen = HashSet::new();
        let mut queue = vec![id.to_string()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(record) = self.records.get(&current) else {
                continue;
            };
            for dep in &record.imports {
                if targets.contains(dep) {
                    return true;
                }
                queue.push(dep.clone());
            }
        }
        false
    }

    /// Expose the exports object of an evaluation that just started
    pub(crate) fn begin(&self, id: &str, evaluation: u64, exports: &JsObject, code: Option<&str>) {
        self.update(id, |record| {
            if record.evaluation == evaluation {
                record.exports = Some(exports.clone());
                record.code = code.map(str::to_string);
            }
        });
    }

    /// Record the outcome of evaluation number `evaluation` of `id`.
    ///
    /// Failures clear the in-flight handle and the exports so the next
    /// request evaluates again. Outcomes of superseded evaluations are
    /// ignored.
    pub(crate) fn settle(&self, id: &str, evaluation: u64, result: &RunnerResult<JsObject>) {
        let Some(mut record) = self.records.get_mut(id) else {
            return;
        };
        if record.evaluation != evaluation {
            return;
        }
        match result {
            Ok(exports) => {
                record.exports = Some(exports.clone());
                record.state = ModuleState::Resolved;
            }
            Err(_) => {
                record.exports = None;
                record.promise = None;
                record.state = ModuleState::Errored;
            }
        }
    }

    /// Reset a record so the module evaluates again on next request
    pub fn invalidate(&self, id: &str) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.evaluation += 1;
            record.reset();
        }
    }

    /// Delete `ids` and every module that transitively imports them
    pub fn invalidate_dep_tree<I, S>(&self, ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut invalidated = HashSet::new();
        self.walk(ids, &mut invalidated, |record| record.importers.iter().cloned().collect());
        invalidated
    }

    /// Delete `ids` and every module they transitively import
    pub fn invalidate_sub_dep_tree<I, S>(&self, ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut invalidated = HashSet::new();
        self.walk(ids, &mut invalidated, |record| record.imports.iter().cloned().collect());
        invalidated
    }

    fn walk<I, S>(
        &self,
        ids: I,
        invalidated: &mut HashSet<String>,
        edges: fn(&ModuleRecord) -> Vec<String>,
    ) where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut queue: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        while let Some(id) = queue.pop() {
            if !invalidated.insert(id.clone()) {
                continue;
            }
            if let Some((_, record)) = self.records.remove(&id) {
                queue.extend(edges(&record));
            }
        }
    }
}
