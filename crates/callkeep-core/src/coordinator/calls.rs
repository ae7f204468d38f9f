//! Call lifecycle commands for the call keeper
//!
//! Reporting incoming calls, starting outgoing calls, answering, rejecting
//! and ending. Every command validates its identifier first.

use crate::call::{CallCapabilities, CallId, CallInfo, EndReason, HandleType, NewCall};
use crate::error::CallKeepResult;

use super::CallKeeper;

/// Parameters of `report_new_incoming_call`
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    pub call_id: String,
    pub handle: String,
    pub handle_type: HandleType,
    pub localized_caller_name: Option<String>,
    pub capabilities: CallCapabilities,
    /// Delivered through a background wake (push)
    pub from_push: bool,
    /// Opaque push payload echoed in `DidDisplayIncomingCall`
    pub payload: Option<serde_json::Value>,
}

impl IncomingCall {
    pub fn new(call_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            handle: handle.into(),
            handle_type: HandleType::Generic,
            localized_caller_name: None,
            capabilities: CallCapabilities::default(),
            from_push: false,
            payload: None,
        }
    }

    pub fn with_handle_type(mut self, handle_type: HandleType) -> Self {
        self.handle_type = handle_type;
        self
    }

    pub fn with_caller_name(mut self, name: impl Into<String>) -> Self {
        self.localized_caller_name = Some(name.into());
        self
    }

    pub fn with_video(mut self, has_video: bool) -> Self {
        self.capabilities.has_video = has_video;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CallCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn from_push(mut self, payload: Option<serde_json::Value>) -> Self {
        self.from_push = true;
        self.payload = payload;
        self
    }
}

/// Parameters of `start_call`
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingCall {
    pub call_id: String,
    pub handle: String,
    pub handle_type: HandleType,
    /// Contact name shown by the system UI
    pub contact_identifier: Option<String>,
    pub capabilities: CallCapabilities,
}

impl OutgoingCall {
    pub fn new(call_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            handle: handle.into(),
            handle_type: HandleType::Generic,
            contact_identifier: None,
            capabilities: CallCapabilities::default(),
        }
    }

    pub fn with_handle_type(mut self, handle_type: HandleType) -> Self {
        self.handle_type = handle_type;
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact_identifier = Some(contact.into());
        self
    }

    pub fn with_video(mut self, has_video: bool) -> Self {
        self.capabilities.has_video = has_video;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CallCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Call lifecycle operations
impl CallKeeper {
    /// Report a new incoming call to the authority.
    ///
    /// The call is created as `Ringing`. `DidDisplayIncomingCall` reports
    /// whether the authority showed it; a refused call is removed again and
    /// the command fails with `ActionRejected`.
    pub async fn report_new_incoming_call(&self, call: IncomingCall) -> CallKeepResult<CallInfo> {
        let call_id = CallId::parse(&call.call_id)?;
        let new_call = NewCall::incoming(call_id, call.handle)
            .with_handle_type(call.handle_type)
            .with_display_name(call.localized_caller_name)
            .with_capabilities(call.capabilities)
            .with_from_push(call.from_push);
        self.translator.report_incoming(new_call, call.payload).await
    }

    /// Start an outgoing call (`Initiating`)
    pub async fn start_call(&self, call: OutgoingCall) -> CallKeepResult<CallInfo> {
        let call_id = CallId::parse(&call.call_id)?;
        let new_call = NewCall::outgoing(call_id, call.handle)
            .with_handle_type(call.handle_type)
            .with_display_name(call.contact_identifier)
            .with_capabilities(call.capabilities);
        self.translator.start_outgoing(new_call).await
    }

    /// Answer a ringing incoming call from the application
    pub async fn answer_incoming_call(&self, call_id: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.answer(&call_id).await
    }

    /// Decline a ringing incoming call
    pub async fn reject_call(&self, call_id: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.reject_call(&call_id).await
    }

    /// End a call from any non-terminal state.
    ///
    /// Ending a call that already ended or never existed fails with
    /// `NotFound`; nothing else happens.
    pub async fn end_call(&self, call_id: &str, reason: Option<EndReason>) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.end_call(&call_id, reason).await
    }

    /// End every live call; returns how many were ended
    pub async fn end_all_calls(&self) -> CallKeepResult<usize> {
        self.translator.end_all_calls().await
    }

    /// Tell the authority an outgoing call started connecting
    pub async fn report_connecting_outgoing_call(&self, call_id: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.report_connecting(&call_id).await
    }

    /// Confirm an outgoing call connected (`Initiating -> Active`)
    pub async fn report_connected_outgoing_call(&self, call_id: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.report_connected(&call_id).await
    }
}
