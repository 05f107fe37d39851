//! # Mink Automock
//!
//! Static rewriting of a module's export surface into a mocked namespace.
//!
//! ```text
//! export function add(a, b) { return a + b }
//! export default 42
//! ```
//!
//! becomes a module that declares the same bindings, hands a namespace built
//! from them to the runtime mocker and re-exports the mocked fields under the
//! original names.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod ast;
pub mod error;
pub mod parser;
pub mod splice;
pub mod transform;

pub use ast::ModuleAst;
pub use error::{AutomockError, AutomockResult, UnsupportedPattern};
pub use parser::{ModuleParser, OxcParser};
pub use splice::{SegmentMapping, SourceEdits};
pub use transform::{
    AutomockOptions, AutomockOutput, DEFAULT_BINDING, DEFAULT_GLOBAL_ACCESSOR, ExportDescriptor,
    MockKind, automock, transform,
};
