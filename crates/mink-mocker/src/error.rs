//! Error types for mink-mocker

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// An exception raised by a function, constructor or mock
#[derive(Debug, Clone, Error)]
pub enum JsError {
    /// A value thrown by user code
    #[error("Uncaught {0}")]
    Thrown(Value),

    /// Type error raised by the object model itself
    #[error("TypeError: {0}")]
    Type(String),

    /// Error raised by the embedder, passed through user code unchanged
    #[error("{0}")]
    Host(Arc<dyn StdError + Send + Sync>),
}

impl JsError {
    /// Throw an arbitrary value
    pub fn throw(value: impl Into<Value>) -> Self {
        Self::Thrown(value.into())
    }

    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Wrap an embedder error
    pub fn host(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::Host(Arc::new(error))
    }

    /// The embedder error, when this is a [`JsError::Host`] of type `E`
    pub fn downcast_host<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Host(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// The thrown value as user code would observe it
    pub fn value(&self) -> Value {
        match self {
            Self::Thrown(value) => value.clone(),
            Self::Type(message) => Value::string(format!("TypeError: {}", message)),
            Self::Host(error) => Value::string(error.to_string()),
        }
    }
}

/// Result type using JsError
pub type JsResult<T> = Result<T, JsError>;
