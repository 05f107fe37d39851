//! Error types for mink-runner

use mink_automock::AutomockError;
use mink_mocker::JsError;
use thiserror::Error;

/// Runner error type
///
/// Cloneable so one failed evaluation can be handed to every importer waiting
/// on it.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    /// The id resolved to nothing, or the host had no code for it
    #[error("Cannot find module '{id}'{}", importer_suffix(importer))]
    ModuleNotFound {
        /// Requested id
        id: String,
        /// Module that asked for it
        importer: Option<String>,
    },

    /// A module required itself before it had an exports object
    #[error("Circular dependency detected: {}", render_chain(chain))]
    CircularDependency {
        /// Ids from the first occurrence to the repeated one
        chain: Vec<String>,
    },

    /// A mock factory produced something other than an object
    #[error(
        "[mink] mock(\"{id}\", factory?) is not returning an object (got {kind}). Did you mean to return an object with a \"default\" key?"
    )]
    NonObjectFactory {
        /// Mocked id
        id: String,
        /// Type of the returned value
        kind: String,
    },

    /// A mock factory threw
    #[error(
        "[mink] There was an error when mocking \"{id}\". If you are using a mock factory, make sure it does not reference variables initialized later in the test file: {message}"
    )]
    MockFactory {
        /// Mocked id
        id: String,
        /// What the factory threw
        message: String,
    },

    /// The module body threw
    #[error("Error evaluating {id}: {error}")]
    Evaluation {
        /// Module that failed
        id: String,
        /// The exception
        error: JsError,
    },

    /// An external module could not be loaded
    #[error("Failed to load external module {id}: {message}")]
    External {
        /// External id
        id: String,
        /// Loader message
        message: String,
    },

    /// The automock transform rejected the module
    #[error("Automock error: {0}")]
    Automock(#[from] AutomockError),

    /// Invalid runner configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RunnerError {
    /// Create a module-not-found error
    pub fn not_found(id: impl Into<String>, importer: Option<&str>) -> Self {
        Self::ModuleNotFound {
            id: id.into(),
            importer: importer.map(str::to_string),
        }
    }

    /// Create an external loading error
    pub fn external(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Cycle error for `id` re-entered while `callstack` is active
    pub(crate) fn circular(callstack: &[String], id: &str) -> Self {
        let start = callstack.iter().position(|entry| entry == id).unwrap_or(0);
        let mut chain: Vec<String> = callstack[start..].to_vec();
        chain.push(id.to_string());
        Self::CircularDependency { chain }
    }

    /// Error for a module body that failed.
    ///
    /// Loader errors raised by nested imports travel through user code as
    /// [`JsError::Host`] and come out unchanged.
    pub(crate) fn from_evaluation(id: &str, error: JsError) -> Self {
        match error.downcast_host::<RunnerError>() {
            Some(inner) => inner.clone(),
            None => Self::Evaluation {
                id: id.to_string(),
                error,
            },
        }
    }
}

impl From<RunnerError> for JsError {
    fn from(error: RunnerError) -> Self {
        JsError::host(error)
    }
}

fn importer_suffix(importer: &Option<String>) -> String {
    match importer {
        Some(importer) => format!(" imported from '{}'", importer),
        None => String::new(),
    }
}

/// `a -> b -> c ==> a`
fn render_chain(chain: &[String]) -> String {
    match chain.split_last() {
        Some((last, rest)) if !rest.is_empty() => {
            format!("{} ==> {}", rest.join(" -> "), last)
        }
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}

/// Result type using RunnerError
pub type RunnerResult<T> = Result<T, RunnerError>;
