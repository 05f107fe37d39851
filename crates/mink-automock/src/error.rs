//! Automocking errors

use thiserror::Error;

/// Export shapes the transformer refuses to rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedPattern {
    /// `export * from "source"`
    ExportAll {
        /// Module the names would come from
        source: String,
    },
    /// `export const { a = 1 } = ...` and similar defaults in a binding pattern
    AssignmentPattern,
    /// A member expression used as an export binding target
    MemberExpression,
}

impl std::fmt::Display for UnsupportedPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExportAll { source } => write!(
                f,
                "`export * from \"{}\"` cannot be automocked, its names are only known after evaluating the source module",
                source
            ),
            Self::AssignmentPattern => {
                f.write_str("AssignmentPattern is not supported in an exported declaration")
            }
            Self::MemberExpression => {
                f.write_str("MemberExpression is not supported in an exported declaration")
            }
        }
    }
}

/// Automocking errors
#[derive(Debug, Clone, Error)]
pub enum AutomockError {
    /// The parser rejected the source
    #[error("Parse error: {0}")]
    Parse(String),

    /// An export the transformer cannot express
    #[error("Unsupported export pattern: {0}")]
    UnsupportedExportPattern(UnsupportedPattern),

    /// Two edits touch the same bytes
    #[error("Edit {start}..{end} overlaps existing edit {existing_start}..{existing_end}")]
    EditOverlap {
        /// Start of the rejected edit
        start: usize,
        /// End of the rejected edit
        end: usize,
        /// Start of the edit already recorded
        existing_start: usize,
        /// End of the edit already recorded
        existing_end: usize,
    },

    /// Edit range outside the source or not on a character boundary
    #[error("Edit {start}..{end} is out of bounds for source of length {len}")]
    EditOutOfBounds {
        /// Start of the rejected edit
        start: usize,
        /// End of the rejected edit
        end: usize,
        /// Source length in bytes
        len: usize,
    },
}

impl AutomockError {
    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an unsupported-pattern error
    pub fn unsupported(pattern: UnsupportedPattern) -> Self {
        Self::UnsupportedExportPattern(pattern)
    }
}

/// Result type for automocking
pub type AutomockResult<T> = Result<T, AutomockError>;
