use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use vitrine_contracts::error::{StudioError, StudioResult};

use crate::retry::CancelHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    Building,
    InFlight,
    Succeeded,
    Failed,
    Cancelled,
}

impl GenerationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPhase::Idle => "idle",
            GenerationPhase::Building => "building",
            GenerationPhase::InFlight => "in_flight",
            GenerationPhase::Succeeded => "succeeded",
            GenerationPhase::Failed => "failed",
            GenerationPhase::Cancelled => "cancelled",
        }
    }
}

/// Process-wide single-flight guard shared by both modes.
#[derive(Debug)]
pub struct GenerationSession {
    generating: AtomicBool,
    cancel: Mutex<Option<CancelHandle>>,
    phase: Mutex<GenerationPhase>,
    last_terminal: Mutex<Option<GenerationPhase>>,
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self {
            generating: AtomicBool::new(false),
            cancel: Mutex::new(None),
            phase: Mutex::new(GenerationPhase::Idle),
            last_terminal: Mutex::new(None),
        }
    }
}

impl GenerationSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> GenerationPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Terminal state of the most recent call, if any finished.
    pub fn last_terminal(&self) -> Option<GenerationPhase> {
        *self
            .last_terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the session for one call. Fails without side effects while
    /// another call holds it.
    pub fn try_begin(self: &Arc<Self>) -> StudioResult<FlightGuard> {
        if self
            .generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StudioError::GenerationInFlight);
        }
        let cancel = CancelHandle::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        self.set_phase(GenerationPhase::Building);
        Ok(FlightGuard {
            session: Arc::clone(self),
            cancel,
        })
    }

    /// Signals the in-flight call, if there is one. Returns whether a call
    /// was signalled.
    pub fn cancel_current(&self) -> bool {
        match self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn set_phase(&self, phase: GenerationPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }
}

/// Held for the duration of one call; dropping it returns the session to
/// `Idle` on every exit path.
#[derive(Debug)]
pub struct FlightGuard {
    session: Arc<GenerationSession>,
    cancel: CancelHandle,
}

impl FlightGuard {
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn set_phase(&self, phase: GenerationPhase) {
        self.session.set_phase(phase);
    }

    pub fn finish(&self, terminal: GenerationPhase) {
        self.session.set_phase(terminal);
        *self
            .session
            .last_terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(terminal);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        *self
            .session
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.session.set_phase(GenerationPhase::Idle);
        self.session.generating.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use vitrine_contracts::error::StudioError;

    use super::{GenerationPhase, GenerationSession};

    #[test]
    fn second_claim_is_rejected_until_guard_drops() {
        let session = GenerationSession::new();
        let guard = session.try_begin().unwrap();
        assert_eq!(session.phase(), GenerationPhase::Building);
        assert_eq!(
            session.try_begin().unwrap_err(),
            StudioError::GenerationInFlight
        );
        drop(guard);
        assert_eq!(session.phase(), GenerationPhase::Idle);
        assert!(!session.is_generating());
        assert!(session.try_begin().is_ok());
    }

    #[test]
    fn cancel_reaches_guard_from_another_thread() {
        let session = GenerationSession::new();
        let guard = session.try_begin().unwrap();
        let remote = session.clone();
        let signalled = thread::spawn(move || remote.cancel_current())
            .join()
            .unwrap();
        assert!(signalled);
        assert!(guard.is_cancelled());
        guard.finish(GenerationPhase::Cancelled);
        drop(guard);
        assert_eq!(session.last_terminal(), Some(GenerationPhase::Cancelled));
        assert!(!session.cancel_current());
    }
}
