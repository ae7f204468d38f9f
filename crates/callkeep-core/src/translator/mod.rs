//! The Action Translator
//!
//! Converts application commands into authority requests ([`outbound`]) and
//! authority callbacks into registry transitions and events ([`inbound`]).
//! Both directions go through one coordinator-wide critical section
//! ([`CoordinatorState`] behind a mutex) so that no two mutations race.
//!
//! The lock is never held across an authority round-trip. Outbound commands
//! apply their transition and publish its event under the lock, release it,
//! await the authority, and re-lock to reconcile the reply:
//!
//! ```text
//!   lock ── transition ── publish ── unlock ── await authority ── lock ─┬─ ok: nothing left to do
//!                                                                      └─ rejected: undo own change,
//!                                                                         publish ActionRejected
//! ```
//!
//! Each record carries a generation, so a reply that arrives after the call
//! ended (or after its identifier was reused) is recognized as stale and
//! discarded. Each aspect of a record also remembers which transition last
//! wrote it, so undoing a rejected command never erases a later one.

pub mod inbound;
pub mod outbound;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::audio::AudioSessionCoordinator;
use crate::authority::CallAuthority;
use crate::call::{CallId, CallInfo};
use crate::config::ProviderConfig;
use crate::error::{CallKeepError, CallKeepResult};
use crate::publisher::EventPublisher;
use crate::registry::CallRegistry;

/// Everything guarded by the coordinator-wide critical section
#[derive(Debug, Default)]
pub struct CoordinatorState {
    pub registry: CallRegistry,
    pub audio: AudioSessionCoordinator,
    /// Set by a successful `setup`
    pub config: Option<ProviderConfig>,
    /// DTMF sent by the application and not yet answered by the authority.
    /// The authority echoes these back as inbound actions.
    pub dtmf_in_flight: Vec<(CallId, String)>,
}

impl CoordinatorState {
    pub fn ensure_configured(&self) -> CallKeepResult<&ProviderConfig> {
        self.config.as_ref().ok_or(CallKeepError::NotConfigured)
    }

    /// Consume a matching in-flight DTMF entry
    fn take_dtmf_echo(&mut self, call_id: &CallId, digits: &str) -> bool {
        match self
            .dtmf_in_flight
            .iter()
            .position(|(id, sent)| id == call_id && sent == digits)
        {
            Some(index) => {
                self.dtmf_in_flight.remove(index);
                true
            }
            None => false,
        }
    }

    fn forget_call(&mut self, call_id: &CallId) {
        self.audio.call_ended(call_id);
        self.dtmf_in_flight.retain(|(id, _)| id != call_id);
    }
}

/// Serializes every call-state mutation and mediates the authority boundary
pub struct ActionTranslator {
    state: Mutex<CoordinatorState>,
    authority: Arc<dyn CallAuthority>,
    publisher: Arc<EventPublisher>,
}

impl std::fmt::Debug for ActionTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTranslator")
            .field("state", &*self.state.lock())
            .field("publisher", &self.publisher)
            .finish()
    }
}

impl ActionTranslator {
    pub fn new(authority: Arc<dyn CallAuthority>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            authority,
            publisher,
        }
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Enter the critical section.
    ///
    /// The guard is not `Send`, so it cannot be held across an `.await` in a
    /// spawned task.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock()
    }

    // ===== Queries =====

    pub fn call(&self, call_id: &CallId) -> CallKeepResult<CallInfo> {
        self.lock().registry.get(call_id)
    }

    pub fn calls(&self) -> Vec<CallInfo> {
        self.lock().registry.calls()
    }

    pub fn is_configured(&self) -> bool {
        self.lock().config.is_some()
    }

    pub fn config(&self) -> Option<ProviderConfig> {
        self.lock().config.clone()
    }

    pub fn pending_audio_call(&self) -> Option<CallId> {
        self.lock().audio.pending_call().cloned()
    }
}
