//! # Mink Runner
//!
//! Module execution engine for the Mink test runner:
//! - Request id normalization and mapping onto the project root
//! - A shared module cache with at most one evaluation per module in flight
//! - Circular imports resolved to in-progress exports, unbounded ones reported
//! - External modules loaded natively with default-export interop
//! - Module mocks: factories, automock, autospy and redirects
//!
//! Resolution, transformation and evaluation of module bodies are supplied by
//! the embedder through [`ModuleHost`], [`ModuleEvaluator`] and
//! [`ExternalLoader`].

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod interop;
pub mod mocks;
pub mod normalize;
pub mod runner;

pub use cache::{ModuleCache, ModuleRecord, ModuleState};
pub use config::{AutomockStrategy, RunnerConfig};
pub use context::{ImportMeta, ModuleContext};
pub use error::{RunnerError, RunnerResult};
pub use host::{ExternalLoader, FetchResult, FsModuleHost, ModuleEvaluator, ModuleHost, NoExternals};
pub use mocks::{FactoryContext, MockDirective, MockFactory, ModuleMocker, mock_factory};
pub use runner::{ModuleRunner, RunnerBuilder};

pub use mink_mocker::{JsError, JsObject, JsResult, Mocker, Value};
