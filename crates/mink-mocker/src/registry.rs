//! Registry of live mocks.
//!
//! Mocks register themselves on creation. The registry only holds weak
//! references, so dropping every handle to a mock removes it here as well.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::mock::{MockInstance, MockState};

struct RegistryInner {
    mocks: Mutex<Vec<Weak<MockState>>>,
    /// Last invocation order handed out; orders start at 1
    order: AtomicU64,
}

/// Shared mock registry with a global invocation counter
#[derive(Clone)]
pub struct MockRegistry(Arc<RegistryInner>);

static GLOBAL: OnceLock<MockRegistry> = OnceLock::new();

impl MockRegistry {
    /// Create an isolated registry
    pub fn new() -> Self {
        Self(Arc::new(RegistryInner {
            mocks: Mutex::new(Vec::new()),
            order: AtomicU64::new(0),
        }))
    }

    /// Process-wide registry
    pub fn global() -> &'static MockRegistry {
        GLOBAL.get_or_init(MockRegistry::new)
    }

    pub(crate) fn register(&self, mock: &MockInstance) {
        self.0.mocks.lock().push(mock.downgrade());
    }

    /// Next value of the global invocation counter
    pub(crate) fn next_invocation_order(&self) -> u64 {
        self.0.order.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Every mock still alive, in creation order
    pub fn mocks(&self) -> Vec<MockInstance> {
        let mut mocks = self.0.mocks.lock();
        mocks.retain(|weak| weak.strong_count() > 0);
        mocks
            .iter()
            .filter_map(Weak::upgrade)
            .map(MockInstance::from_state)
            .collect()
    }

    /// Number of live mocks
    pub fn len(&self) -> usize {
        self.mocks().len()
    }

    /// Whether no mock is alive
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `mock_clear` every mock
    pub fn clear_all(&self) {
        let mocks = self.mocks();
        debug!(count = mocks.len(), "clearing mocks");
        for mock in mocks {
            mock.mock_clear();
        }
    }

    /// `mock_reset` every mock
    pub fn reset_all(&self) {
        let mocks = self.mocks();
        debug!(count = mocks.len(), "resetting mocks");
        for mock in mocks {
            mock.mock_reset();
        }
    }

    /// `mock_restore` every mock
    pub fn restore_all(&self) {
        let mocks = self.mocks();
        debug!(count = mocks.len(), "restoring mocks");
        for mock in mocks {
            mock.mock_restore();
        }
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRegistry")
            .field("mocks", &self.0.mocks.lock().len())
            .field("order", &self.0.order.load(Ordering::SeqCst))
            .finish()
    }
}
