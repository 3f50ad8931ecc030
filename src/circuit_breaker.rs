//! The trip switch (spec section 7, glossary).
//!
//! Unlike a recovering three-state circuit breaker, the trip switch this
//! spec describes is one-way: once a fatal error actuates it, every
//! subsequent non-exempt request fails fast with `ServiceUnavailable` until
//! the process restarts, or the service shuts itself down. Which of the two
//! behaviors applies is an open question the spec defers to deployment
//! configuration (`TripAction`), fixed once at construction time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// What happens once the switch trips. The spec leaves this as an explicit
/// deployment choice rather than a guess; `FailFast` is the default because
/// it keeps the process alive for operators to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripAction {
    /// Reject all non-exempt requests with `ServiceUnavailable`.
    FailFast,
    /// Request process shutdown; `should_shutdown()` becomes true.
    Shutdown,
}

impl Default for TripAction {
    fn default() -> Self {
        TripAction::FailFast
    }
}

#[derive(Debug)]
struct Inner {
    tripped: AtomicBool,
    shutdown_requested: AtomicBool,
    action: TripAction,
}

/// A single process-lifetime trip switch, owned by the service that hosts
/// it (never a global/static, per the spec's redesign notes on eliminating
/// singletons).
#[derive(Debug, Clone)]
pub struct TripSwitch {
    inner: Arc<Inner>,
}

impl TripSwitch {
    pub fn new(action: TripAction) -> Self {
        Self {
            inner: Arc::new(Inner {
                tripped: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                action,
            }),
        }
    }

    /// Actuates the switch. Idempotent: tripping an already-tripped switch
    /// is a no-op beyond logging.
    pub fn trip(&self, reason: &str) {
        let was_tripped = self.inner.tripped.swap(true, Ordering::SeqCst);
        if !was_tripped {
            error!(reason, action = ?self.inner.action, "circuit breaker tripped");
            if self.inner.action == TripAction::Shutdown {
                self.inner.shutdown_requested.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    pub fn should_shutdown(&self) -> bool {
        self.inner.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Checkpoint for non-exempt request paths: returns an error once
    /// tripped, otherwise `Ok(())`.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_tripped() {
            Err(crate::error::AccessGraphError::ServiceUnavailable(
                "circuit breaker is open".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for TripSwitch {
    fn default() -> Self {
        Self::new(TripAction::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let switch = TripSwitch::default();
        assert!(!switch.is_tripped());
        assert!(switch.check().is_ok());
    }

    #[test]
    fn trip_fails_fast() {
        let switch = TripSwitch::new(TripAction::FailFast);
        switch.trip("persister append failure");
        assert!(switch.is_tripped());
        assert!(switch.check().is_err());
        assert!(!switch.should_shutdown());
    }

    #[test]
    fn trip_requests_shutdown_when_configured() {
        let switch = TripSwitch::new(TripAction::Shutdown);
        switch.trip("split protocol violation");
        assert!(switch.should_shutdown());
    }

    #[test]
    fn trip_is_idempotent() {
        let switch = TripSwitch::default();
        switch.trip("first");
        switch.trip("second");
        assert!(switch.is_tripped());
    }
}
