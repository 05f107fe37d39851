//! Dynamic values shared between module namespaces and mocks.
//!
//! Objects, arrays and functions are reference handles: cloning a [`Value`]
//! clones the handle, never the underlying data. Equality on reference values
//! is identity, matching `===` semantics.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::function::JsFunction;
use crate::mock::MockInstance;
use crate::object::{JsArray, JsObject};

/// First id handed out to user symbols; lower ids are reserved for well-known ones.
const FIRST_USER_SYMBOL: u64 = 16;

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(FIRST_USER_SYMBOL);

/// A unique symbol value
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Symbol {
    id: u64,
    description: Option<Arc<str>>,
}

impl Symbol {
    /// Create a fresh symbol, distinct from every other symbol
    pub fn new(description: Option<&str>) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: description.map(Arc::from),
        }
    }

    /// `Symbol.toStringTag`
    pub fn to_string_tag() -> Self {
        Self {
            id: 1,
            description: Some(Arc::from("Symbol.toStringTag")),
        }
    }

    /// Symbol description, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Property key (string or symbol)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String key
    String(Arc<str>),
    /// Symbol key
    Symbol(Symbol),
}

impl PropertyKey {
    /// Create a string key
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// String form of the key, `None` for symbols
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Symbol(_) => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Symbol(sym) => write!(f, "Symbol({})", sym.description().unwrap_or("")),
        }
    }
}

/// A JavaScript-like value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(Arc<str>),
    /// Symbol
    Symbol(Symbol),
    /// Plain object, class instance or module namespace
    Object(JsObject),
    /// Array
    Array(JsArray),
    /// Function or class
    Function(JsFunction),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    /// Create a number value
    pub fn number(n: impl Into<f64>) -> Self {
        Self::Number(n.into())
    }

    /// `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Anything that is not an object, array or function
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Object(_) | Self::Array(_) | Self::Function(_))
    }

    /// Object, array or function
    pub fn is_object_like(&self) -> bool {
        !self.is_primitive()
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&JsObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&JsArray> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as function
    pub fn as_function(&self) -> Option<&JsFunction> {
        match self {
            Self::Function(func) => Some(func),
            _ => None,
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Mock state if this value is a mock function
    pub fn mock(&self) -> Option<&MockInstance> {
        self.as_function().and_then(JsFunction::mock)
    }

    /// The object that holds this value's properties.
    ///
    /// Plain objects hold their own properties; functions keep statics on a
    /// side object.
    pub fn property_holder(&self) -> Option<&JsObject> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::Function(func) => Some(func.properties()),
            _ => None,
        }
    }

    /// Read a property (`undefined` for primitives and missing keys)
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        match self.property_holder() {
            Some(holder) => holder.get(&key.into()),
            None => Value::Undefined,
        }
    }

    /// Value type as reported in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(obj) if obj.is_module() => "module",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Function(f) if f.is_class() => "class",
            Self::Function(_) => "function",
        }
    }

    /// `===` comparison
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Address used to track reference identity, `None` for primitives
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Self::Object(obj) => Some(obj.addr()),
            Self::Array(arr) => Some(arr.addr()),
            Self::Function(func) => Some(func.addr()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<JsObject> for Value {
    fn from(obj: JsObject) -> Self {
        Self::Object(obj)
    }
}

impl From<JsArray> for Value {
    fn from(arr: JsArray) -> Self {
        Self::Array(arr)
    }
}

impl From<JsFunction> for Value {
    fn from(func: JsFunction) -> Self {
        Self::Function(func)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Symbol(sym) => write!(f, "Symbol({})", sym.description().unwrap_or("")),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e21 => {
                write!(f, "{}", *n as i64)
            }
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
            Self::Symbol(sym) => write!(f, "Symbol({})", sym.description().unwrap_or("")),
            Self::Object(obj) if obj.is_module() => f.write_str("[object Module]"),
            Self::Object(_) => f.write_str("[object Object]"),
            Self::Array(arr) => write!(f, "[Array({})]", arr.len()),
            Self::Function(func) if func.is_class() => write!(f, "[class {}]", func.name()),
            Self::Function(func) => write!(f, "[Function: {}]", func.name()),
        }
    }
}
