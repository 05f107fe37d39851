//! # Mink Mocker
//!
//! Dynamic value model and object mocking for the Mink test runner:
//! - Values, objects, arrays, functions and classes as shared handles
//! - Live bindings for re-exported module members
//! - Mock functions with call logs and implementation overrides
//! - Automock/autospy copies of whole objects, classes included
//! - A registry to clear, reset or restore every mock at once

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod function;
pub mod mock;
pub mod mocker;
pub mod object;
pub mod registry;
pub mod value;

pub use error::{JsError, JsResult};
pub use function::{JsFunction, NativeFn, native_fn};
pub use mock::{MockInstance, MockResult};
pub use mocker::{MockType, Mocker};
pub use object::{JsArray, JsObject, LiveBinding, Property};
pub use registry::MockRegistry;
pub use value::{PropertyKey, Symbol, Value};
