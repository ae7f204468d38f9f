//! The call state coordinator
//!
//! [`CallKeeper`] wires the registry, the audio session coordinator, the
//! event publisher and the action translator together and exposes the
//! public command surface. Commands take caller-supplied identifiers as
//! strings and validate them before anything else happens.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use rvoip_callkeep_core::{CallKeeperBuilder, ProviderConfig, SimulatedAuthority};
//! # use rvoip_callkeep_core::authority::{ActionAck, ProviderAction};
//! # use rvoip_callkeep_core::call::HandleType;
//! # use rvoip_callkeep_core::coordinator::IncomingCall;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keeper = CallKeeperBuilder::new()
//!     .authority(SimulatedAuthority::new())
//!     .provider_config(ProviderConfig::new("Softphone"))
//!     .build()
//!     .await?;
//! keeper.start().await?;
//!
//! // Application side: events arrive in sequence order
//! let mut events = keeper.subscribe();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         tracing::info!(sequence = event.sequence, kind = ?event.kind(), "call event");
//!     }
//! });
//!
//! // Report a call, then let the platform glue deliver the user's answer
//! keeper
//!     .report_new_incoming_call(
//!         IncomingCall::new("c1", "+15551234").with_handle_type(HandleType::PhoneNumber),
//!     )
//!     .await?;
//! let provider = keeper.provider_handle();
//! let outcome = provider
//!     .post(ProviderAction::Answer { call_id: "c1".parse()? })?
//!     .await?;
//! # let _ = outcome;
//! assert!(keeper.is_call_active("c1"));
//! # Ok(())
//! # }
//! ```

mod builder;
mod calls;
mod controls;

pub use builder::CallKeeperBuilder;
pub use calls::{IncomingCall, OutgoingCall};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::authority::{ActionAck, ActionOutcome, CallAuthority, ProviderAction};
use crate::call::{CallId, CallInfo, CallState};
use crate::config::ProviderConfig;
use crate::error::{CallKeepError, CallKeepResult};
use crate::events::{EventFilter, PublishedEvent};
use crate::publisher::{EventPublisher, EventSubscription};
use crate::translator::ActionTranslator;

type ActionMessage = (ProviderAction, ActionAck);

/// Cloneable handle the platform glue uses to deliver authority callbacks
#[derive(Clone, Debug)]
pub struct ProviderHandle {
    tx: mpsc::UnboundedSender<ActionMessage>,
    running: Arc<AtomicBool>,
}

impl ProviderHandle {
    /// Queue `action` for the translator loop.
    ///
    /// Returns the receiver that resolves once the action has been
    /// acknowledged. Fails with `NotRunning` while the coordinator is
    /// stopped.
    pub fn post(&self, action: ProviderAction) -> CallKeepResult<oneshot::Receiver<ActionOutcome>> {
        let (ack, rx) = ActionAck::new();
        self.send(action, ack)?;
        Ok(rx)
    }

    /// Queue `action` with an acknowledgment handle created by the caller
    pub fn send(&self, action: ProviderAction, ack: ActionAck) -> CallKeepResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(CallKeepError::NotRunning);
        }
        // A rejected send drops the ack, which reports failure
        self.tx
            .send((action, ack))
            .map_err(|_| CallKeepError::NotRunning)
    }
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallKeeperStats {
    pub is_running: bool,
    pub is_configured: bool,
    pub calls_by_state: HashMap<CallState, usize>,
    pub total_calls: usize,
    /// Call waiting for audio session activation
    pub pending_audio_call: Option<CallId>,
    pub backlog_len: usize,
    pub subscriber_count: usize,
    pub last_sequence: u64,
}

/// Composition root of the call state coordinator
pub struct CallKeeper {
    translator: Arc<ActionTranslator>,
    publisher: Arc<EventPublisher>,
    actions_tx: mpsc::UnboundedSender<ActionMessage>,
    /// Parked here while the translator loop is not running
    actions_rx: Mutex<Option<mpsc::UnboundedReceiver<ActionMessage>>>,
    worker: Mutex<Option<(oneshot::Sender<()>, JoinHandle<mpsc::UnboundedReceiver<ActionMessage>>)>>,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for CallKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallKeeper")
            .field("translator", &self.translator)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl CallKeeper {
    pub fn new(authority: Arc<dyn CallAuthority>) -> Self {
        let publisher = Arc::new(EventPublisher::new());
        let translator = Arc::new(ActionTranslator::new(authority, publisher.clone()));
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        Self {
            translator,
            publisher,
            actions_tx,
            actions_rx: Mutex::new(Some(actions_rx)),
            worker: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ===== Lifecycle =====

    /// Configure the provider. Required before any call command; calling it
    /// again reconfigures.
    pub async fn setup(&self, config: ProviderConfig) -> CallKeepResult<()> {
        self.translator.configure(config).await
    }

    /// Spawn the loop that drains provider actions in arrival order
    pub async fn start(&self) -> CallKeepResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("Call keeper already running");
            return Ok(());
        }
        let mut rx = self
            .actions_rx
            .lock()
            .take()
            .ok_or_else(|| CallKeepError::internal("provider action receiver missing"))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let translator = self.translator.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    message = rx.recv() => match message {
                        Some((action, ack)) => translator.handle_action(action, ack),
                        None => break,
                    },
                }
            }
            rx
        });

        *worker = Some((shutdown_tx, handle));
        self.running.store(true, Ordering::Release);
        info!("Call keeper started");
        Ok(())
    }

    /// Stop the translator loop. Actions already queued stay queued until
    /// the next `start`.
    pub async fn stop(&self) -> CallKeepResult<()> {
        let Some((shutdown_tx, handle)) = self.worker.lock().take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        let _ = shutdown_tx.send(());

        let rx = handle
            .await
            .map_err(|e| CallKeepError::internal(format!("translator loop failed: {}", e)))?;
        *self.actions_rx.lock() = Some(rx);
        info!("Call keeper stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Handle for delivering authority callbacks to the translator loop
    pub fn provider_handle(&self) -> ProviderHandle {
        ProviderHandle {
            tx: self.actions_tx.clone(),
            running: self.running.clone(),
        }
    }

    /// Process one authority callback inline, bypassing the loop.
    ///
    /// For hosts that already serialize callbacks on their own context.
    pub fn handle_provider_action(&self, action: ProviderAction, ack: ActionAck) {
        self.translator.handle_action(action, ack);
    }

    // ===== Events =====

    pub fn subscribe(&self) -> EventSubscription {
        self.publisher.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscription {
        self.publisher.subscribe_filtered(filter)
    }

    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        self.publisher.unsubscribe(subscription_id)
    }

    /// Events published before any subscriber attached
    pub fn initial_events(&self) -> Vec<PublishedEvent> {
        self.publisher.initial_events()
    }

    pub fn clear_initial_events(&self) {
        self.publisher.clear_initial_events();
    }

    // ===== Queries =====

    /// Whether the call is connected (`Active` or `Held`). Unknown or
    /// malformed identifiers are not active.
    pub fn is_call_active(&self, call_id: &str) -> bool {
        CallId::parse(call_id)
            .and_then(|id| self.translator.call(&id))
            .is_ok_and(|call| call.state.is_connected())
    }

    pub fn get_call(&self, call_id: &str) -> CallKeepResult<CallInfo> {
        let call_id = CallId::parse(call_id)?;
        self.translator.call(&call_id)
    }

    /// Every call in the registry, oldest first
    pub fn get_calls(&self) -> Vec<CallInfo> {
        self.translator.calls()
    }

    pub fn config(&self) -> Option<ProviderConfig> {
        self.translator.config()
    }

    pub fn stats(&self) -> CallKeeperStats {
        let calls = self.translator.calls();
        let mut calls_by_state = HashMap::new();
        for call in &calls {
            *calls_by_state.entry(call.state).or_insert(0) += 1;
        }
        CallKeeperStats {
            is_running: self.is_running(),
            is_configured: self.translator.is_configured(),
            calls_by_state,
            total_calls: calls.len(),
            pending_audio_call: self.translator.pending_audio_call(),
            backlog_len: self.publisher.backlog_len(),
            subscriber_count: self.publisher.subscriber_count(),
            last_sequence: self.publisher.last_sequence(),
        }
    }
}
