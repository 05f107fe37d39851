//! Mock call logs and implementation overrides.
//!
//! Every mock keeps an append-only log of its invocations. A mock may be
//! linked to a parent mock (an instance method linked to the prototype method
//! it shadows): each invocation is then recorded on both levels with the same
//! invocation order, and when the instance has no override of its own the
//! parent's implementation runs.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::JsResult;
use crate::function::{NativeFn, native_fn};
use crate::object::{JsObject, Property};
use crate::registry::MockRegistry;
use crate::value::{PropertyKey, Value};

/// Outcome of one recorded invocation
#[derive(Debug, Clone, PartialEq)]
pub enum MockResult {
    /// The call returned a value
    Return(Value),
    /// The call threw
    Throw(Value),
    /// The call has not finished yet (re-entrant inspection)
    Incomplete,
}

#[derive(Default)]
struct MockLog {
    calls: Vec<Vec<Value>>,
    contexts: Vec<Value>,
    instances: Vec<Value>,
    invocation_call_order: Vec<u64>,
    results: Vec<MockResult>,
    /// Bumped on every clear so in-flight calls don't write into a fresh log
    generation: u64,
}

#[derive(Default)]
struct Implementations {
    /// Persistent override
    implementation: Option<NativeFn>,
    /// Overrides consumed one call at a time, before `implementation`
    once: VecDeque<NativeFn>,
    /// What the mock does with no override installed
    base: Option<NativeFn>,
    /// Behaviour of the mocked original, if there was one
    original: Option<NativeFn>,
}

/// Where a mock was installed, so restoring can put the original back
#[derive(Clone)]
pub(crate) struct RestoreTarget {
    pub container: JsObject,
    pub key: PropertyKey,
    pub original: Value,
    pub enumerable: bool,
}

pub(crate) struct MockState {
    name: RwLock<String>,
    log: Mutex<MockLog>,
    implementations: Mutex<Implementations>,
    parent: Option<MockInstance>,
    restore: Mutex<Option<RestoreTarget>>,
    registry: MockRegistry,
}

/// Parameters for a new mock
pub(crate) struct MockSpec {
    pub name: String,
    pub base: Option<NativeFn>,
    pub original: Option<NativeFn>,
    pub parent: Option<MockInstance>,
}

/// Handle to a mock's call log and implementation state
#[derive(Clone)]
pub struct MockInstance(Arc<MockState>);

impl MockInstance {
    pub(crate) fn new(registry: &MockRegistry, spec: MockSpec) -> Self {
        let mock = Self(Arc::new(MockState {
            name: RwLock::new(spec.name),
            log: Mutex::new(MockLog::default()),
            implementations: Mutex::new(Implementations {
                base: spec.base,
                original: spec.original,
                ..Implementations::default()
            }),
            parent: spec.parent,
            restore: Mutex::new(None),
            registry: registry.clone(),
        }));
        registry.register(&mock);
        mock
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<MockState> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn from_state(state: Arc<MockState>) -> Self {
        Self(state)
    }

    pub(crate) fn set_restore_target(&self, target: RestoreTarget) {
        *self.0.restore.lock() = Some(target);
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &MockInstance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Mock this one delegates to and also records into
    pub fn parent(&self) -> Option<&MockInstance> {
        self.0.parent.as_ref()
    }

    /// Display name
    pub fn get_mock_name(&self) -> String {
        self.0.name.read().clone()
    }

    /// Rename the mock
    pub fn mock_name(&self, name: &str) -> &Self {
        *self.0.name.write() = name.to_string();
        self
    }

    /// Arguments of every call, in order
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.0.log.lock().calls.clone()
    }

    /// Number of recorded calls
    pub fn call_count(&self) -> usize {
        self.0.log.lock().calls.len()
    }

    /// Arguments of the most recent call
    pub fn last_call(&self) -> Option<Vec<Value>> {
        self.0.log.lock().calls.last().cloned()
    }

    /// `this` of every call
    pub fn contexts(&self) -> Vec<Value> {
        self.0.log.lock().contexts.clone()
    }

    /// Instances created by calling the mock with `new`
    pub fn instances(&self) -> Vec<Value> {
        self.0.log.lock().instances.clone()
    }

    /// Global invocation order of every call
    pub fn invocation_call_order(&self) -> Vec<u64> {
        self.0.log.lock().invocation_call_order.clone()
    }

    /// Outcome of every call
    pub fn results(&self) -> Vec<MockResult> {
        self.0.log.lock().results.clone()
    }

    /// Replace the implementation until reset
    pub fn mock_implementation<F>(&self, f: F) -> &Self
    where
        F: Fn(&Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
    {
        self.0.implementations.lock().implementation = Some(native_fn(f));
        self
    }

    /// Use an implementation for the next call only
    pub fn mock_implementation_once<F>(&self, f: F) -> &Self
    where
        F: Fn(&Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
    {
        self.0.implementations.lock().once.push_back(native_fn(f));
        self
    }

    /// Always return `value`
    pub fn mock_return_value(&self, value: Value) -> &Self {
        self.mock_implementation(move |_, _| Ok(value.clone()))
    }

    /// Return `value` from the next call only
    pub fn mock_return_value_once(&self, value: Value) -> &Self {
        self.mock_implementation_once(move |_, _| Ok(value.clone()))
    }

    /// Clear the call log
    pub fn mock_clear(&self) -> &Self {
        let mut log = self.0.log.lock();
        let generation = log.generation + 1;
        *log = MockLog {
            generation,
            ..MockLog::default()
        };
        self
    }

    /// Clear the call log and drop implementation overrides
    pub fn mock_reset(&self) -> &Self {
        self.mock_clear();
        let mut implementations = self.0.implementations.lock();
        implementations.implementation = None;
        implementations.once.clear();
        self
    }

    /// Reset, then reinstate the original implementation where one exists.
    ///
    /// A mock installed on a container is replaced there by the original value.
    pub fn mock_restore(&self) -> &Self {
        self.mock_reset();
        {
            let mut implementations = self.0.implementations.lock();
            if let Some(original) = implementations.original.clone() {
                implementations.base = Some(original);
            }
        }
        if let Some(target) = self.0.restore.lock().take() {
            target.container.define(
                target.key,
                Property::Data(target.original),
                target.enumerable,
            );
        }
        self
    }

    /// Record and run one invocation
    pub(crate) fn invoke(&self, this: &Value, args: &[Value], construct: bool) -> JsResult<Value> {
        let order = self.0.registry.next_invocation_order();
        let slot = self.begin(this, args, construct, order);
        let parent_slot = self
            .0
            .parent
            .as_ref()
            .map(|parent| (parent, parent.begin(this, args, construct, order)));

        let outcome = self.run(this, args);

        self.finish(slot, &outcome);
        if let Some((parent, slot)) = parent_slot {
            parent.finish(slot, &outcome);
        }
        outcome
    }

    /// Pick and run an implementation without recording
    fn run(&self, this: &Value, args: &[Value]) -> JsResult<Value> {
        let (chosen, base) = {
            let mut implementations = self.0.implementations.lock();
            let chosen = implementations
                .once
                .pop_front()
                .or_else(|| implementations.implementation.clone());
            (chosen, implementations.base.clone())
        };
        if let Some(f) = chosen {
            return f(this, args);
        }
        // Two-level lookup: the instance level had no override, fall back to the shared level.
        if let Some(parent) = &self.0.parent {
            return parent.run(this, args);
        }
        match base {
            Some(f) => f(this, args),
            None => Ok(Value::Undefined),
        }
    }

    fn begin(&self, this: &Value, args: &[Value], construct: bool, order: u64) -> (u64, usize) {
        let mut log = self.0.log.lock();
        log.calls.push(args.to_vec());
        log.contexts.push(this.clone());
        if construct {
            log.instances.push(this.clone());
        }
        log.invocation_call_order.push(order);
        log.results.push(MockResult::Incomplete);
        (log.generation, log.results.len() - 1)
    }

    fn finish(&self, (generation, index): (u64, usize), outcome: &JsResult<Value>) {
        let mut log = self.0.log.lock();
        if log.generation != generation {
            return;
        }
        if let Some(result) = log.results.get_mut(index) {
            *result = match outcome {
                Ok(value) => MockResult::Return(value.clone()),
                Err(err) => MockResult::Throw(err.value()),
            };
        }
    }
}

impl std::fmt::Debug for MockInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInstance")
            .field("name", &self.get_mock_name())
            .field("calls", &self.call_count())
            .finish()
    }
}
