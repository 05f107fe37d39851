//! Object mocking routine.
//!
//! [`Mocker::mock_object`] produces a deep copy of a value in which every
//! function is replaced by a registered mock. In [`MockType::Automock`] mode the
//! mocks do nothing and return `undefined`; in [`MockType::Autospy`] mode they
//! delegate to the original while still recording calls.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::{JsError, JsResult};
use crate::function::{JsFunction, NativeFn, native_fn};
use crate::mock::{MockInstance, MockSpec, RestoreTarget};
use crate::object::{JsArray, JsObject, Property};
use crate::registry::MockRegistry;
use crate::value::{PropertyKey, Value};

/// How functions are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockType {
    /// No-op mocks, arrays emptied
    Automock,
    /// Recording mocks that call through to the original
    Autospy,
}

impl MockType {
    /// Parse the mode name used by generated code
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automock" => Some(Self::Automock),
            "autospy" => Some(Self::Autospy),
            _ => None,
        }
    }

    /// Mode name used by generated code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automock => "automock",
            Self::Autospy => "autospy",
        }
    }
}

impl std::fmt::Display for MockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Already mocked references, keyed by identity
#[derive(Default)]
struct RefTracker {
    refs: HashMap<usize, Value>,
}

impl RefTracker {
    fn get(&self, value: &Value) -> Option<Value> {
        value.identity().and_then(|id| self.refs.get(&id).cloned())
    }

    fn track(&mut self, original: &Value, mocked: Value) {
        if let Some(id) = original.identity() {
            self.refs.insert(id, mocked);
        }
    }
}

/// Creates mocks and registers them with a [`MockRegistry`]
#[derive(Debug, Clone)]
pub struct Mocker {
    registry: MockRegistry,
}

impl Mocker {
    /// Create a mocker registering into `registry`
    pub fn new(registry: MockRegistry) -> Self {
        Self { registry }
    }

    /// Mocker bound to the process-wide registry
    pub fn global() -> Self {
        Self::new(MockRegistry::global().clone())
    }

    /// Registry the mocks are recorded in
    pub fn registry(&self) -> &MockRegistry {
        &self.registry
    }

    /// Standalone mock function, optionally with a default implementation
    pub fn fn_mock(&self, implementation: Option<NativeFn>) -> JsFunction {
        let mock = MockInstance::new(
            &self.registry,
            MockSpec {
                name: "spy".to_string(),
                base: implementation.clone(),
                original: implementation,
                parent: None,
            },
        );
        JsFunction::mock_function("spy", mock)
    }

    /// Replace `object[key]` with a spy calling through to the original
    pub fn spy_on(&self, object: &JsObject, key: impl Into<PropertyKey>) -> JsResult<JsFunction> {
        let key = key.into();
        let original = object.get(&key);
        let Some(func) = original.as_function() else {
            return Err(JsError::type_error(format!(
                "Cannot spy on {} because it is not a function (got {})",
                key,
                original.type_name()
            )));
        };
        if func.is_mock() {
            return Ok(func.clone());
        }

        let native = func.as_native();
        let name = key.to_string();
        let mock = MockInstance::new(
            &self.registry,
            MockSpec {
                name: name.clone(),
                base: Some(native.clone()),
                original: Some(native),
                parent: None,
            },
        );
        let enumerable = object
            .get_own_property(&key)
            .map(|(_, enumerable)| enumerable)
            .unwrap_or(true);
        let spy = JsFunction::mock_function(&name, mock.clone());
        object.define(key.clone(), Property::Data(Value::Function(spy.clone())), enumerable);
        mock.set_restore_target(RestoreTarget {
            container: object.clone(),
            key,
            original,
            enumerable,
        });
        Ok(spy)
    }

    /// Deep-copy `value`, replacing functions and classes with mocks
    pub fn mock_object(&self, value: &Value, mock_type: MockType) -> Value {
        debug!(mock_type = %mock_type, kind = value.type_name(), "mocking object");
        let mut tracker = RefTracker::default();
        self.mock_value(value, mock_type, &mut tracker)
    }

    /// `mock_clear` every registered mock
    pub fn clear_all(&self) {
        self.registry.clear_all();
    }

    /// `mock_reset` every registered mock
    pub fn reset_all(&self) {
        self.registry.reset_all();
    }

    /// `mock_restore` every registered mock
    pub fn restore_all(&self) {
        self.registry.restore_all();
    }

    fn mock_value(&self, value: &Value, mock_type: MockType, tracker: &mut RefTracker) -> Value {
        if value.is_primitive() {
            return value.clone();
        }
        if let Some(mocked) = tracker.get(value) {
            trace!(kind = value.type_name(), "reusing mocked reference");
            return mocked;
        }
        match value {
            Value::Function(func) if func.is_mock() => value.clone(),
            Value::Function(func) if func.is_class() => self.mock_class(func, mock_type, tracker),
            Value::Function(func) => self.mock_function(func, mock_type, tracker),
            Value::Array(array) => {
                let mocked = JsArray::new(Vec::new());
                tracker.track(value, Value::Array(mocked.clone()));
                if mock_type == MockType::Autospy {
                    for element in array.to_vec() {
                        mocked.push(self.mock_value(&element, mock_type, tracker));
                    }
                }
                Value::Array(mocked)
            }
            Value::Object(obj) => {
                let mocked = JsObject::new();
                tracker.track(value, Value::Object(mocked.clone()));
                self.mock_properties(obj, &mocked, mock_type, tracker);
                Value::Object(mocked)
            }
            _ => value.clone(),
        }
    }

    fn mock_function(&self, func: &JsFunction, mock_type: MockType, tracker: &mut RefTracker) -> Value {
        let native = func.as_native();
        let base = match mock_type {
            MockType::Automock => None,
            MockType::Autospy => Some(native.clone()),
        };
        let mock = MockInstance::new(
            &self.registry,
            MockSpec {
                name: func.name().to_string(),
                base,
                original: Some(native),
                parent: None,
            },
        );
        let mocked = JsFunction::mock_function(func.name(), mock);
        tracker.track(&Value::Function(func.clone()), Value::Function(mocked.clone()));
        self.mock_properties(func.properties(), mocked.properties(), mock_type, tracker);
        Value::Function(mocked)
    }

    fn mock_class(&self, class: &JsFunction, mock_type: MockType, tracker: &mut RefTracker) -> Value {
        let prototype = JsObject::with_prototype(class.prototype().cloned());
        let mut methods: Vec<(PropertyKey, MockInstance)> = Vec::new();
        let mut seen = HashSet::new();
        let mut current = class.prototype().cloned();
        while let Some(proto) = current {
            for (key, property, _) in proto.own_properties() {
                if key.as_str() == Some("constructor") || !seen.insert(key.clone()) {
                    continue;
                }
                let original = property.value();
                let Some(method) = original.as_function() else {
                    continue;
                };
                if method.is_mock() || method.is_class() {
                    continue;
                }
                let native = method.as_native();
                let base = match mock_type {
                    MockType::Automock => None,
                    MockType::Autospy => Some(native.clone()),
                };
                let name = key.to_string();
                let mock = MockInstance::new(
                    &self.registry,
                    MockSpec {
                        name: name.clone(),
                        base,
                        original: Some(native),
                        parent: None,
                    },
                );
                let mocked = JsFunction::mock_function(&name, mock.clone());
                prototype.define(key.clone(), Property::Data(Value::Function(mocked)), false);
                mock.set_restore_target(RestoreTarget {
                    container: prototype.clone(),
                    key: key.clone(),
                    original,
                    enumerable: false,
                });
                methods.push((key, mock));
            }
            current = proto.prototype();
        }

        let constructor = class_constructor(class, mock_type, &self.registry, methods);
        let mock = MockInstance::new(
            &self.registry,
            MockSpec {
                name: class.name().to_string(),
                base: Some(constructor),
                original: Some(class.as_native()),
                parent: None,
            },
        );
        let mocked = JsFunction::mock_class(class.name(), prototype, class, mock);
        tracker.track(&Value::Function(class.clone()), Value::Function(mocked.clone()));
        self.mock_properties(class.properties(), mocked.properties(), mock_type, tracker);
        Value::Function(mocked)
    }

    /// Mock every own property of `source` plus the properties it inherits,
    /// flattened onto `target`
    fn mock_properties(
        &self,
        source: &JsObject,
        target: &JsObject,
        mock_type: MockType,
        tracker: &mut RefTracker,
    ) {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (key, property, enumerable) in source.own_properties() {
            seen.insert(key.clone());
            entries.push((key, property, enumerable));
        }
        let mut current = source.prototype();
        while let Some(proto) = current {
            for (key, property, enumerable) in proto.own_properties() {
                if key.as_str() == Some("constructor") || !seen.insert(key.clone()) {
                    continue;
                }
                entries.push((key, property, enumerable));
            }
            current = proto.prototype();
        }

        for (key, property, enumerable) in entries {
            // Live bindings are read once; the mock holds a snapshot.
            let original = property.value();
            let mocked = self.mock_value(&original, mock_type, tracker);
            target.define(key.clone(), Property::Data(mocked.clone()), enumerable);
            if let (Some(func), Some(mock)) = (original.as_function(), mocked.mock())
                && !func.is_mock()
            {
                mock.set_restore_target(RestoreTarget {
                    container: target.clone(),
                    key,
                    original,
                    enumerable,
                });
            }
        }
    }
}

impl Default for Mocker {
    fn default() -> Self {
        Self::global()
    }
}

/// Constructor of a mocked class: gives each instance its own method mocks
/// linked to the shared prototype mocks.
fn class_constructor(
    class: &JsFunction,
    mock_type: MockType,
    registry: &MockRegistry,
    methods: Vec<(PropertyKey, MockInstance)>,
) -> NativeFn {
    let original = class.clone();
    let registry = registry.clone();
    native_fn(move |this, args| {
        if mock_type == MockType::Autospy {
            original.initialize(this, args)?;
        }
        if let Some(instance) = this.as_object() {
            for (key, prototype_mock) in &methods {
                let name = prototype_mock.get_mock_name();
                let mock = MockInstance::new(
                    &registry,
                    MockSpec {
                        name: name.clone(),
                        base: None,
                        original: None,
                        parent: Some(prototype_mock.clone()),
                    },
                );
                instance.define(
                    key.clone(),
                    Property::Data(Value::Function(JsFunction::mock_function(&name, mock))),
                    false,
                );
            }
        }
        Ok(Value::Undefined)
    })
}
