//! Objects, arrays and live bindings

use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::map::Entry;
use parking_lot::RwLock;

use crate::error::{JsError, JsResult};
use crate::function::JsFunction;
use crate::value::{PropertyKey, Symbol, Value};

/// An explicit getter/setter indirection to another object's property.
///
/// Reading a live binding always reads the current value of `source[key]`, so
/// later mutations in the source are observed by every holder of the binding.
#[derive(Clone, Debug)]
pub struct LiveBinding {
    source: JsObject,
    key: PropertyKey,
}

impl LiveBinding {
    /// Bind to `source[key]`
    pub fn new(source: JsObject, key: impl Into<PropertyKey>) -> Self {
        Self {
            source,
            key: key.into(),
        }
    }

    /// Current value of the bound property
    pub fn get(&self) -> Value {
        self.source.get(&self.key)
    }

    /// Write through to the bound property
    pub fn set(&self, value: Value) {
        self.source.set(self.key.clone(), value);
    }

    /// Object the binding reads from
    pub fn source(&self) -> &JsObject {
        &self.source
    }
}

/// Property value
#[derive(Clone, Debug)]
pub enum Property {
    /// Plain data property
    Data(Value),
    /// Accessor backed by another object's property
    Live(LiveBinding),
}

impl Property {
    /// Current value of the property
    pub fn value(&self) -> Value {
        match self {
            Self::Data(value) => value.clone(),
            Self::Live(binding) => binding.get(),
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    property: Property,
    enumerable: bool,
}

struct ObjectData {
    properties: RwLock<IndexMap<PropertyKey, Slot>>,
    prototype: RwLock<Option<JsObject>>,
}

/// Shared handle to an object
#[derive(Clone)]
pub struct JsObject(Arc<ObjectData>);

impl JsObject {
    /// Create an empty object with no prototype
    pub fn new() -> Self {
        Self::with_prototype(None)
    }

    /// Create an empty object with the given prototype
    pub fn with_prototype(prototype: Option<JsObject>) -> Self {
        Self(Arc::new(ObjectData {
            properties: RwLock::new(IndexMap::new()),
            prototype: RwLock::new(prototype),
        }))
    }

    /// Create an empty module namespace (`Symbol.toStringTag === "Module"`)
    pub fn module_namespace() -> Self {
        let ns = Self::new();
        ns.mark_module();
        ns
    }

    /// Tag this object as a module namespace
    pub fn mark_module(&self) {
        self.define(
            Symbol::to_string_tag(),
            Property::Data(Value::string("Module")),
            false,
        );
    }

    /// Whether this object is tagged as a module namespace
    pub fn is_module(&self) -> bool {
        self.get_own(&PropertyKey::Symbol(Symbol::to_string_tag()))
            .and_then(|v| v.as_str().map(|s| s == "Module"))
            .unwrap_or(false)
    }

    /// Build an object from `(key, value)` pairs
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let obj = Self::new();
        for (key, value) in entries {
            obj.set(key, value.into());
        }
        obj
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &JsObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Prototype of this object
    pub fn prototype(&self) -> Option<JsObject> {
        self.0.prototype.read().clone()
    }

    /// Replace the prototype of this object
    pub fn set_prototype(&self, prototype: Option<JsObject>) {
        *self.0.prototype.write() = prototype;
    }

    /// Own property, if present
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<(Property, bool)> {
        self.0
            .properties
            .read()
            .get(key)
            .map(|slot| (slot.property.clone(), slot.enumerable))
    }

    /// Own property value, if present
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        // Release the lock before following a live binding.
        let property = self.get_own_property(key)?.0;
        Some(property.value())
    }

    /// Property lookup: own properties first, then the prototype chain
    pub fn get(&self, key: &PropertyKey) -> Value {
        if let Some(value) = self.get_own(key) {
            return value;
        }
        let mut current = self.prototype();
        while let Some(proto) = current {
            if let Some(value) = proto.get_own(key) {
                return value;
            }
            current = proto.prototype();
        }
        Value::Undefined
    }

    /// Whether the object has an own property with this key
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.0.properties.read().contains_key(key)
    }

    /// Whether the key is found on the object or its prototype chain
    pub fn has(&self, key: &PropertyKey) -> bool {
        if self.has_own(key) {
            return true;
        }
        let mut current = self.prototype();
        while let Some(proto) = current {
            if proto.has_own(key) {
                return true;
            }
            current = proto.prototype();
        }
        false
    }

    /// Assign a property.
    ///
    /// Assigning to a live binding writes through to its source; otherwise an
    /// own enumerable data property is created or replaced.
    pub fn set(&self, key: impl Into<PropertyKey>, value: Value) {
        let key = key.into();
        let binding = {
            let mut properties = self.0.properties.write();
            match properties.entry(key) {
                Entry::Occupied(mut entry) => match &entry.get().property {
                    Property::Live(binding) => binding.clone(),
                    Property::Data(_) => {
                        entry.get_mut().property = Property::Data(value);
                        return;
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(Slot {
                        property: Property::Data(value),
                        enumerable: true,
                    });
                    return;
                }
            }
        };
        binding.set(value);
    }

    /// Define (or redefine) an own property
    pub fn define(&self, key: impl Into<PropertyKey>, property: Property, enumerable: bool) {
        self.0.properties.write().insert(
            key.into(),
            Slot {
                property,
                enumerable,
            },
        );
    }

    /// Remove an own property
    pub fn delete(&self, key: &PropertyKey) -> bool {
        self.0.properties.write().shift_remove(key).is_some()
    }

    /// Own keys in insertion order
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.0.properties.read().keys().cloned().collect()
    }

    /// Own enumerable string keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.0
            .properties
            .read()
            .iter()
            .filter(|(_, slot)| slot.enumerable)
            .filter_map(|(key, _)| key.as_str().map(str::to_string))
            .collect()
    }

    /// Own properties with their enumerability, in insertion order
    pub fn own_properties(&self) -> Vec<(PropertyKey, Property, bool)> {
        self.0
            .properties
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.property.clone(), slot.enumerable))
            .collect()
    }

    /// Number of own properties
    pub fn len(&self) -> usize {
        self.0.properties.read().len()
    }

    /// Whether the object has no own properties
    pub fn is_empty(&self) -> bool {
        self.0.properties.read().is_empty()
    }

    /// Call the method stored under `key` with this object as receiver
    pub fn call_method(&self, key: impl Into<PropertyKey>, args: &[Value]) -> JsResult<Value> {
        let key = key.into();
        match self.get(&key) {
            Value::Function(func) => func.call(Value::Object(self.clone()), args),
            other => Err(JsError::type_error(format!(
                "{} is not a function (got {})",
                key,
                other.type_name()
            ))),
        }
    }

    /// `this instanceof class`
    pub fn instance_of(&self, class: &JsFunction) -> bool {
        let Some(target) = class.prototype() else {
            return false;
        };
        let mut current = self.prototype();
        while let Some(proto) = current {
            if proto.ptr_eq(target) {
                return true;
            }
            current = proto.prototype();
        }
        false
    }
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys only: values may be cyclic.
        f.debug_struct("JsObject")
            .field("keys", &self.own_keys())
            .finish()
    }
}

/// Shared handle to an array
#[derive(Clone)]
pub struct JsArray(Arc<RwLock<Vec<Value>>>);

impl JsArray {
    /// Create an array from values
    pub fn new(values: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(values)))
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &JsArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Element at `index` (`undefined` when out of range)
    pub fn get(&self, index: usize) -> Value {
        self.0.read().get(index).cloned().unwrap_or_default()
    }

    /// Append an element
    pub fn push(&self, value: Value) {
        self.0.write().push(value);
    }

    /// Snapshot of the elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.read().clone()
    }
}

impl std::fmt::Debug for JsArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsArray(len = {})", self.len())
    }
}
