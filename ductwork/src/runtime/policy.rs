use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::Error;

/// First-failure latch shared by every worker in one run. The first
/// non-success cause sticks; later writes are ignored, and readers observe
/// a stable cause once any write has landed.
pub(crate) struct FailureLatch {
    cause: OnceCell<Error>,
}

impl FailureLatch {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self {
            cause: OnceCell::new(),
        })
    }

    pub(crate) fn set(&self, cause: Error) {
        let _ = self.cause.set(cause);
    }

    pub(crate) fn get(&self) -> Option<Error> {
        self.cause.get().cloned()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.cause.get().is_some()
    }
}
