//! Audio session handshake tracking
//!
//! The authority activates one process-wide audio session before media may
//! flow. [`AudioSessionCoordinator`] remembers which call is waiting for that
//! activation and decides whether activation/deactivation signals are worth
//! publishing.

use tracing::debug;

use crate::call::CallId;

/// Where the handshake stands
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AudioSessionState {
    /// Nothing expected, session not active
    #[default]
    Idle,
    /// A call went active and is waiting for the authority to activate audio
    Pending { call_id: CallId },
    /// The authority activated the session
    Activated { call_id: Option<CallId> },
}

/// What the translator should publish after a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSignal {
    Activated { call_id: Option<CallId> },
    Deactivated,
    /// Nothing to publish
    Silent,
}

#[derive(Debug, Default)]
pub struct AudioSessionCoordinator {
    state: AudioSessionState,
}

impl AudioSessionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AudioSessionState {
        &self.state
    }

    /// The call currently waiting for activation
    pub fn pending_call(&self) -> Option<&CallId> {
        match &self.state {
            AudioSessionState::Pending { call_id } => Some(call_id),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_call().is_some()
    }

    /// A call entered `Active` for the first time.
    ///
    /// Returns `true` if an expectation was recorded. At most one expectation
    /// exists, and none is recorded while the session is already active.
    pub fn expect_activation(&mut self, call_id: &CallId) -> bool {
        match &self.state {
            AudioSessionState::Idle => {
                debug!(call_id = %call_id, "Expecting audio session activation");
                self.state = AudioSessionState::Pending {
                    call_id: call_id.clone(),
                };
                true
            }
            AudioSessionState::Pending { call_id: waiting } => {
                debug!(call_id = %call_id, waiting = %waiting, "Audio activation already pending");
                false
            }
            AudioSessionState::Activated { .. } => false,
        }
    }

    /// The authority activated the audio session
    pub fn activated(&mut self) -> AudioSignal {
        let call_id = match std::mem::take(&mut self.state) {
            AudioSessionState::Pending { call_id } => Some(call_id),
            AudioSessionState::Activated { call_id } => call_id,
            AudioSessionState::Idle => None,
        };
        self.state = AudioSessionState::Activated {
            call_id: call_id.clone(),
        };
        AudioSignal::Activated { call_id }
    }

    /// The authority deactivated the audio session.
    ///
    /// Only a session that was actually activated produces a signal; an
    /// outstanding expectation is cleared silently.
    pub fn deactivated(&mut self) -> AudioSignal {
        match std::mem::take(&mut self.state) {
            AudioSessionState::Activated { .. } => AudioSignal::Deactivated,
            AudioSessionState::Pending { call_id } => {
                debug!(call_id = %call_id, "Audio deactivated before activation");
                AudioSignal::Silent
            }
            AudioSessionState::Idle => AudioSignal::Silent,
        }
    }

    /// A call ended; drop its expectation if it was the one waiting
    pub fn call_ended(&mut self, call_id: &CallId) {
        if self.pending_call() == Some(call_id) {
            debug!(call_id = %call_id, "Cleared audio expectation of ended call");
            self.state = AudioSessionState::Idle;
        }
    }

    pub fn reset(&mut self) {
        self.state = AudioSessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> CallId {
        CallId::parse(raw).unwrap()
    }

    #[test]
    fn test_single_expectation() {
        let mut audio = AudioSessionCoordinator::new();
        assert!(audio.expect_activation(&id("c1")));
        assert!(!audio.expect_activation(&id("c2")));
        assert_eq!(audio.pending_call(), Some(&id("c1")));
    }

    #[test]
    fn test_activation_clears_expectation() {
        let mut audio = AudioSessionCoordinator::new();
        audio.expect_activation(&id("c1"));
        assert_eq!(
            audio.activated(),
            AudioSignal::Activated { call_id: Some(id("c1")) }
        );
        assert!(!audio.is_pending());
        // Already active: no new expectation
        assert!(!audio.expect_activation(&id("c2")));
        assert_eq!(audio.deactivated(), AudioSignal::Deactivated);
    }

    #[test]
    fn test_deactivation_before_activation_is_silent() {
        let mut audio = AudioSessionCoordinator::new();
        audio.expect_activation(&id("c1"));
        assert_eq!(audio.deactivated(), AudioSignal::Silent);
        assert_eq!(audio.state(), &AudioSessionState::Idle);
    }

    #[test]
    fn test_call_end_clears_only_its_own_expectation() {
        let mut audio = AudioSessionCoordinator::new();
        audio.expect_activation(&id("c1"));
        audio.call_ended(&id("c2"));
        assert!(audio.is_pending());
        audio.call_ended(&id("c1"));
        assert!(!audio.is_pending());
        assert_eq!(audio.deactivated(), AudioSignal::Silent);
    }
}
