//! Runner configuration

use std::path::PathBuf;

use mink_automock::DEFAULT_GLOBAL_ACCESSOR;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};
use crate::normalize::{is_builtin, is_data_url};

/// How automock/autospy directives produce the mocked namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomockStrategy {
    /// Rewrite the module source with the automock transform and evaluate it
    #[default]
    Transform,
    /// Evaluate the original module and mock its exports object
    Evaluate,
}

/// Module runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Project root that `/`-anchored ids resolve against
    pub root: PathBuf,

    /// Public base path stripped from request ids
    pub base: String,

    /// Extra patterns for ids loaded through the external loader
    pub external: Vec<String>,

    /// Apply default-export interop to external modules
    pub interop_default: bool,

    /// How automocked modules are produced
    pub automock_strategy: AutomockStrategy,

    /// `globalThis` property automocked code reads the mocker from
    pub global_accessor: String,

    /// Warn when a module takes longer than this to load
    pub slow_module_threshold_ms: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_default(),
            base: "/".into(),
            external: Vec::new(),
            interop_default: true,
            automock_strategy: AutomockStrategy::Transform,
            global_accessor: DEFAULT_GLOBAL_ACCESSOR.into(),
            slow_module_threshold_ms: None,
        }
    }
}

impl RunnerConfig {
    /// Configuration rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Root as a forward-slash string without a trailing slash
    pub(crate) fn root_str(&self) -> String {
        let root = crate::normalize::slash(&self.root.to_string_lossy());
        match root.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
            _ => root,
        }
    }
}

/// Compiled external predicate
#[derive(Debug, Clone, Default)]
pub(crate) struct ExternalMatcher {
    patterns: Vec<Regex>,
}

impl ExternalMatcher {
    pub(crate) fn new(patterns: &[String]) -> RunnerResult<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    RunnerError::Config(format!("invalid external pattern {:?}: {}", pattern, e))
                })
            })
            .collect::<RunnerResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Builtins, `data:` URLs and configured patterns
    pub(crate) fn is_external(&self, id: &str) -> bool {
        is_builtin(id) || is_data_url(id) || self.patterns.iter().any(|re| re.is_match(id))
    }
}
