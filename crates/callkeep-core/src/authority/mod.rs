//! The boundary to the operating system's call authority
//!
//! Traffic crosses this boundary as messages in both directions:
//!
//! ```text
//!             AuthorityRequest                    (ProviderAction, ActionAck)
//!  translator ───────────────► CallAuthority ───────────────────────────────► translator
//!             ◄─────────────── Result<(), AuthorityError>      ◄── ActionOutcome
//! ```
//!
//! Platform glue implements [`CallAuthority`] for outbound requests and
//! posts every provider callback as a [`ProviderAction`] together with an
//! [`ActionAck`] through a [`ProviderHandle`](crate::coordinator::ProviderHandle).

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::call::{CallCapabilities, CallId, EndReason, HandleType};
use crate::config::ProviderConfig;
use crate::error::AuthorityError;

pub use simulated::SimulatedAuthority;

/// A request from the application side to the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthorityRequest {
    #[serde(rename_all = "camelCase")]
    ReportIncomingCall {
        call_id: CallId,
        handle: String,
        handle_type: HandleType,
        localized_caller_name: Option<String>,
        capabilities: CallCapabilities,
    },
    #[serde(rename_all = "camelCase")]
    StartCall {
        call_id: CallId,
        handle: String,
        handle_type: HandleType,
        contact_identifier: Option<String>,
        has_video: bool,
    },
    #[serde(rename_all = "camelCase")]
    ReportOutgoingConnecting { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    ReportOutgoingConnected { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    AnswerCall { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    EndCall {
        call_id: CallId,
        reason: Option<EndReason>,
    },
    #[serde(rename_all = "camelCase")]
    SetHeld { call_id: CallId, held: bool },
    #[serde(rename_all = "camelCase")]
    SetMuted { call_id: CallId, muted: bool },
    #[serde(rename_all = "camelCase")]
    PlayDtmf { call_id: CallId, digits: String },
    #[serde(rename_all = "camelCase")]
    SetGroup {
        call_id: CallId,
        group_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateCall {
        call_id: CallId,
        display_name: Option<String>,
        handle: Option<String>,
    },
    SetReachable,
}

impl AuthorityRequest {
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            AuthorityRequest::ReportIncomingCall { call_id, .. }
            | AuthorityRequest::StartCall { call_id, .. }
            | AuthorityRequest::ReportOutgoingConnecting { call_id }
            | AuthorityRequest::ReportOutgoingConnected { call_id }
            | AuthorityRequest::AnswerCall { call_id }
            | AuthorityRequest::EndCall { call_id, .. }
            | AuthorityRequest::SetHeld { call_id, .. }
            | AuthorityRequest::SetMuted { call_id, .. }
            | AuthorityRequest::PlayDtmf { call_id, .. }
            | AuthorityRequest::SetGroup { call_id, .. }
            | AuthorityRequest::UpdateCall { call_id, .. } => Some(call_id),
            AuthorityRequest::SetReachable => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthorityRequest::ReportIncomingCall { .. } => "report_incoming_call",
            AuthorityRequest::StartCall { .. } => "start_call",
            AuthorityRequest::ReportOutgoingConnecting { .. } => "report_outgoing_connecting",
            AuthorityRequest::ReportOutgoingConnected { .. } => "report_outgoing_connected",
            AuthorityRequest::AnswerCall { .. } => "answer_call",
            AuthorityRequest::EndCall { .. } => "end_call",
            AuthorityRequest::SetHeld { .. } => "set_held",
            AuthorityRequest::SetMuted { .. } => "set_muted",
            AuthorityRequest::PlayDtmf { .. } => "play_dtmf",
            AuthorityRequest::SetGroup { .. } => "set_group",
            AuthorityRequest::UpdateCall { .. } => "update_call",
            AuthorityRequest::SetReachable => "set_reachable",
        }
    }
}

/// Outbound side of the call authority
///
/// Implementations forward requests to the platform and resolve once the
/// platform has accepted or declined them. The coordinator imposes no
/// timeout of its own; the platform is expected to resolve every request.
#[async_trait]
pub trait CallAuthority: Send + Sync {
    /// Apply provider configuration (`setup` options)
    async fn configure(&self, config: &ProviderConfig) -> Result<(), AuthorityError>;

    async fn request(&self, request: AuthorityRequest) -> Result<(), AuthorityError>;
}

/// A callback from the authority, delivered as a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProviderAction {
    #[serde(rename_all = "camelCase")]
    Answer { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    End { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    SetHeld { call_id: CallId, held: bool },
    #[serde(rename_all = "camelCase")]
    SetMuted { call_id: CallId, muted: bool },
    #[serde(rename_all = "camelCase")]
    PlayDtmf { call_id: CallId, digits: String },
    #[serde(rename_all = "camelCase")]
    SetGroup {
        call_id: CallId,
        group_id: Option<String>,
    },
    /// The authority started an outgoing call (e.g. redial from recents)
    #[serde(rename_all = "camelCase")]
    StartCall {
        call_id: CallId,
        handle: String,
        handle_type: HandleType,
        name: Option<String>,
        has_video: bool,
    },
    AudioSessionActivated,
    AudioSessionDeactivated,
    #[serde(rename_all = "camelCase")]
    AudioRouteChanged { output: String, reason: Option<u32> },
    CheckReachability,
    /// The authority discarded all call state
    Reset,
}

impl ProviderAction {
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            ProviderAction::Answer { call_id }
            | ProviderAction::End { call_id }
            | ProviderAction::SetHeld { call_id, .. }
            | ProviderAction::SetMuted { call_id, .. }
            | ProviderAction::PlayDtmf { call_id, .. }
            | ProviderAction::SetGroup { call_id, .. }
            | ProviderAction::StartCall { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderAction::Answer { .. } => "answer",
            ProviderAction::End { .. } => "end",
            ProviderAction::SetHeld { .. } => "set_held",
            ProviderAction::SetMuted { .. } => "set_muted",
            ProviderAction::PlayDtmf { .. } => "play_dtmf",
            ProviderAction::SetGroup { .. } => "set_group",
            ProviderAction::StartCall { .. } => "start_call",
            ProviderAction::AudioSessionActivated => "audio_session_activated",
            ProviderAction::AudioSessionDeactivated => "audio_session_deactivated",
            ProviderAction::AudioRouteChanged { .. } => "audio_route_changed",
            ProviderAction::CheckReachability => "check_reachability",
            ProviderAction::Reset => "reset",
        }
    }
}

/// How an inbound action was acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Fulfilled,
    Failed,
}

/// Completion handle for one inbound action
///
/// Consumed by [`fulfill`](ActionAck::fulfill) or [`fail`](ActionAck::fail),
/// so it can be answered at most once. Dropping it unanswered reports
/// [`ActionOutcome::Failed`], so it is answered exactly once.
#[derive(Debug)]
pub struct ActionAck {
    tx: Option<oneshot::Sender<ActionOutcome>>,
}

impl ActionAck {
    /// Create an acknowledgment handle and the receiver the platform glue
    /// waits on.
    pub fn new() -> (Self, oneshot::Receiver<ActionOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Handle for callbacks whose completion nobody observes
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn fulfill(mut self) {
        self.complete(ActionOutcome::Fulfilled);
    }

    pub fn fail(mut self) {
        self.complete(ActionOutcome::Failed);
    }

    fn complete(&mut self, outcome: ActionOutcome) {
        if let Some(tx) = self.tx.take() {
            // The platform may have stopped waiting
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for ActionAck {
    fn drop(&mut self) {
        self.complete(ActionOutcome::Failed);
    }
}
