//! Functions and classes

use std::sync::Arc;

use crate::error::{JsError, JsResult};
use crate::mock::MockInstance;
use crate::object::JsObject;
use crate::value::{PropertyKey, Value};

/// Native function behaviour: `(this, args) -> result`
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> JsResult<Value> + Send + Sync>;

/// Wrap a closure as a [`NativeFn`]
pub fn native_fn<F>(f: F) -> NativeFn
where
    F: Fn(&Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

enum Behavior {
    Native(NativeFn),
    Mock(MockInstance),
}

struct ClassData {
    prototype: JsObject,
    parent: Option<JsFunction>,
}

struct FunctionData {
    name: String,
    behavior: Behavior,
    /// Own (static) properties
    properties: JsObject,
    class: Option<ClassData>,
}

/// Shared handle to a function or class
#[derive(Clone)]
pub struct JsFunction(Arc<FunctionData>);

impl JsFunction {
    /// Create a plain function
    pub fn native<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
    {
        Self::from_native(name, native_fn(f))
    }

    /// Create a plain function from an existing behaviour
    pub fn from_native(name: &str, behavior: NativeFn) -> Self {
        Self(Arc::new(FunctionData {
            name: name.to_string(),
            behavior: Behavior::Native(behavior),
            properties: JsObject::new(),
            class: None,
        }))
    }

    /// Create a class.
    ///
    /// The prototype inherits from the parent's prototype and statics inherit
    /// from the parent's statics. Without an explicit constructor the parent
    /// constructor runs (or nothing, for a base class).
    pub fn class(name: &str, parent: Option<&JsFunction>, constructor: Option<NativeFn>) -> Self {
        let constructor = constructor.unwrap_or_else(|| {
            let parent = parent.cloned();
            native_fn(move |this, args| match &parent {
                Some(parent) => parent.initialize(this, args),
                None => Ok(Value::Undefined),
            })
        });
        Self::class_with_behavior(name, parent, Behavior::Native(constructor))
    }

    /// Create a mock function
    pub(crate) fn mock_function(name: &str, mock: MockInstance) -> Self {
        Self(Arc::new(FunctionData {
            name: name.to_string(),
            behavior: Behavior::Mock(mock),
            properties: JsObject::new(),
            class: None,
        }))
    }

    /// Create a mock class with a prepared prototype
    pub(crate) fn mock_class(
        name: &str,
        prototype: JsObject,
        parent: &JsFunction,
        mock: MockInstance,
    ) -> Self {
        Self(Arc::new(FunctionData {
            name: name.to_string(),
            behavior: Behavior::Mock(mock),
            properties: JsObject::with_prototype(Some(parent.properties().clone())),
            class: Some(ClassData {
                prototype,
                parent: Some(parent.clone()),
            }),
        }))
    }

    fn class_with_behavior(name: &str, parent: Option<&JsFunction>, behavior: Behavior) -> Self {
        let prototype = JsObject::with_prototype(parent.and_then(|p| p.prototype().cloned()));
        let properties = JsObject::with_prototype(parent.map(|p| p.properties().clone()));
        Self(Arc::new(FunctionData {
            name: name.to_string(),
            behavior,
            properties,
            class: Some(ClassData {
                prototype,
                parent: parent.cloned(),
            }),
        }))
    }

    /// Add a prototype method (classes only)
    pub fn define_method<F>(&self, name: &str, f: F) -> &Self
    where
        F: Fn(&Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
    {
        if let Some(prototype) = self.prototype() {
            prototype.set(name, Value::Function(JsFunction::native(name, f)));
        }
        self
    }

    /// Add a static member
    pub fn define_static(&self, name: &str, value: Value) -> &Self {
        self.0.properties.set(name, value);
        self
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether this function is a class
    pub fn is_class(&self) -> bool {
        self.0.class.is_some()
    }

    /// Prototype object handed to instances (classes only)
    pub fn prototype(&self) -> Option<&JsObject> {
        self.0.class.as_ref().map(|c| &c.prototype)
    }

    /// Parent class, if this class extends another
    pub fn parent(&self) -> Option<&JsFunction> {
        self.0.class.as_ref().and_then(|c| c.parent.as_ref())
    }

    /// Static properties
    pub fn properties(&self) -> &JsObject {
        &self.0.properties
    }

    /// Read a static property
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        self.0.properties.get(&key.into())
    }

    /// Mock state, if this function is a mock
    pub fn mock(&self) -> Option<&MockInstance> {
        match &self.0.behavior {
            Behavior::Mock(mock) => Some(mock),
            Behavior::Native(_) => None,
        }
    }

    /// Whether this function is a mock
    pub fn is_mock(&self) -> bool {
        self.mock().is_some()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &JsFunction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Call the function.
    ///
    /// Calling a class without `new` is a `TypeError`, except for mocked
    /// classes which record the call like any other mock.
    pub fn call(&self, this: Value, args: &[Value]) -> JsResult<Value> {
        match &self.0.behavior {
            Behavior::Mock(mock) => mock.invoke(&this, args, false),
            Behavior::Native(_) if self.is_class() => Err(JsError::type_error(format!(
                "Class constructor {} cannot be invoked without 'new'",
                self.name()
            ))),
            Behavior::Native(f) => f(&this, args),
        }
    }

    /// `new F(...args)`
    pub fn construct(&self, args: &[Value]) -> JsResult<Value> {
        let Some(class) = &self.0.class else {
            return Err(JsError::type_error(format!(
                "{} is not a constructor",
                self.name()
            )));
        };
        let instance = Value::Object(JsObject::with_prototype(Some(class.prototype.clone())));
        let result = match &self.0.behavior {
            Behavior::Mock(mock) => mock.invoke(&instance, args, true)?,
            Behavior::Native(f) => f(&instance, args)?,
        };
        Ok(if result.is_object_like() { result } else { instance })
    }

    /// Run the constructor body against an existing `this` (`super(...args)`)
    pub fn initialize(&self, this: &Value, args: &[Value]) -> JsResult<Value> {
        match &self.0.behavior {
            Behavior::Mock(mock) => mock.invoke(this, args, true),
            Behavior::Native(f) => f(this, args),
        }
    }

    /// Behaviour of the unmocked function, used by spies to delegate
    pub(crate) fn as_native(&self) -> NativeFn {
        let this_fn = self.clone();
        native_fn(move |this, args| {
            if this_fn.is_class() {
                this_fn.initialize(this, args)
            } else {
                this_fn.call(this.clone(), args)
            }
        })
    }
}

impl std::fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsFunction")
            .field("name", &self.0.name)
            .field("class", &self.is_class())
            .field("mock", &self.is_mock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_class() -> JsFunction {
        let point = JsFunction::class(
            "Point",
            None,
            Some(native_fn(|this, args| {
                if let Some(obj) = this.as_object() {
                    obj.set("x", args.first().cloned().unwrap_or_default());
                }
                Ok(Value::Undefined)
            })),
        );
        point.define_method("getX", |this, _| Ok(this.get("x")));
        point
    }

    #[test]
    fn test_construct_and_call_method() {
        let point = point_class();
        let p = point.construct(&[Value::from(3)]).unwrap();
        let obj = p.as_object().unwrap();

        assert!(obj.instance_of(&point));
        assert_eq!(obj.call_method("getX", &[]).unwrap(), Value::from(3));
    }

    #[test]
    fn test_subclass_inherits_methods_and_constructor() {
        let point = point_class();
        let point3 = JsFunction::class("Point3", Some(&point), None);
        let p = point3.construct(&[Value::from(9)]).unwrap();
        let obj = p.as_object().unwrap();

        assert!(obj.instance_of(&point));
        assert!(obj.instance_of(&point3));
        assert_eq!(obj.call_method("getX", &[]).unwrap(), Value::from(9));
    }

    #[test]
    fn test_class_requires_new() {
        let point = point_class();
        let err = point.call(Value::Undefined, &[]).unwrap_err();
        assert!(err.to_string().contains("without 'new'"));
    }

    #[test]
    fn test_plain_function_is_not_constructor() {
        let f = JsFunction::native("f", |_, _| Ok(Value::Undefined));
        assert!(f.construct(&[]).is_err());
    }
}
