//! Per-call context carried from the method surface down to dispatch

use tokio_util::sync::CancellationToken;

/// Caller-owned context for a single call.
///
/// Cancelling the token makes the dispatcher stop waiting on the backend
/// and return [`crate::Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancellation: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
