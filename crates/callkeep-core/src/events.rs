//! Events published to the application
//!
//! Every state change the coordinator performs is reported as a [`CallEvent`]
//! wrapped in a [`PublishedEvent`] envelope that carries the process-wide
//! sequence number. Subscribers may narrow what they receive with an
//! [`EventFilter`].
//!
//! ```rust
//! use rvoip_callkeep_core::events::{CallEvent, EventFilter, EventKind};
//! use rvoip_callkeep_core::CallId;
//!
//! let filter = EventFilter::kinds([EventKind::AnswerCall, EventKind::EndCall]);
//! let event = CallEvent::AnswerCall { call_id: CallId::parse("c1").unwrap() };
//! assert!(filter.matches(&event));
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallId, EndReason, HandleType};
use crate::error::AuthorityError;

/// An event delivered to application subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "camelCase")]
pub enum CallEvent {
    /// The authority started an outgoing call on the user's behalf
    #[serde(rename_all = "camelCase")]
    DidReceiveStartCallAction {
        call_id: CallId,
        handle: String,
        handle_type: HandleType,
        name: Option<String>,
        has_video: bool,
    },

    #[serde(rename_all = "camelCase")]
    AnswerCall { call_id: CallId },

    #[serde(rename_all = "camelCase")]
    EndCall {
        call_id: CallId,
        reason: Option<EndReason>,
    },

    #[serde(rename_all = "camelCase")]
    DidActivateAudioSession { call_id: Option<CallId> },

    DidDeactivateAudioSession,

    /// Outcome of reporting an incoming call; `error` is set when the
    /// authority refused to display it.
    #[serde(rename_all = "camelCase")]
    DidDisplayIncomingCall {
        call_id: CallId,
        handle: String,
        localized_caller_name: Option<String>,
        has_video: bool,
        from_push: bool,
        payload: Option<serde_json::Value>,
        error: Option<AuthorityError>,
    },

    #[serde(rename_all = "camelCase")]
    DidPerformSetMutedCallAction { call_id: CallId, muted: bool },

    #[serde(rename_all = "camelCase")]
    DidToggleHoldAction { call_id: CallId, hold: bool },

    #[serde(rename_all = "camelCase")]
    DidPerformDTMFAction { call_id: CallId, digits: String },

    #[serde(rename_all = "camelCase")]
    DidPerformGroupCallAction {
        call_id: CallId,
        group_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    DidChangeAudioRoute {
        output: String,
        reason: Option<u32>,
    },

    ProviderReset,

    CheckReachability,

    /// An outbound request was declined and the call rolled back
    #[serde(rename_all = "camelCase")]
    ActionRejected {
        call_id: CallId,
        action: String,
        reason: AuthorityError,
    },
}

/// Discriminant of [`CallEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    DidReceiveStartCallAction,
    AnswerCall,
    EndCall,
    DidActivateAudioSession,
    DidDeactivateAudioSession,
    DidDisplayIncomingCall,
    DidPerformSetMutedCallAction,
    DidToggleHoldAction,
    DidPerformDTMFAction,
    DidPerformGroupCallAction,
    DidChangeAudioRoute,
    ProviderReset,
    CheckReachability,
    ActionRejected,
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CallEvent::DidReceiveStartCallAction { .. } => EventKind::DidReceiveStartCallAction,
            CallEvent::AnswerCall { .. } => EventKind::AnswerCall,
            CallEvent::EndCall { .. } => EventKind::EndCall,
            CallEvent::DidActivateAudioSession { .. } => EventKind::DidActivateAudioSession,
            CallEvent::DidDeactivateAudioSession => EventKind::DidDeactivateAudioSession,
            CallEvent::DidDisplayIncomingCall { .. } => EventKind::DidDisplayIncomingCall,
            CallEvent::DidPerformSetMutedCallAction { .. } => EventKind::DidPerformSetMutedCallAction,
            CallEvent::DidToggleHoldAction { .. } => EventKind::DidToggleHoldAction,
            CallEvent::DidPerformDTMFAction { .. } => EventKind::DidPerformDTMFAction,
            CallEvent::DidPerformGroupCallAction { .. } => EventKind::DidPerformGroupCallAction,
            CallEvent::DidChangeAudioRoute { .. } => EventKind::DidChangeAudioRoute,
            CallEvent::ProviderReset => EventKind::ProviderReset,
            CallEvent::CheckReachability => EventKind::CheckReachability,
            CallEvent::ActionRejected { .. } => EventKind::ActionRejected,
        }
    }

    /// The call this event concerns, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            CallEvent::DidReceiveStartCallAction { call_id, .. }
            | CallEvent::AnswerCall { call_id }
            | CallEvent::EndCall { call_id, .. }
            | CallEvent::DidDisplayIncomingCall { call_id, .. }
            | CallEvent::DidPerformSetMutedCallAction { call_id, .. }
            | CallEvent::DidToggleHoldAction { call_id, .. }
            | CallEvent::DidPerformDTMFAction { call_id, .. }
            | CallEvent::DidPerformGroupCallAction { call_id, .. }
            | CallEvent::ActionRejected { call_id, .. } => Some(call_id),
            CallEvent::DidActivateAudioSession { call_id } => call_id.as_ref(),
            CallEvent::DidDeactivateAudioSession
            | CallEvent::DidChangeAudioRoute { .. }
            | CallEvent::ProviderReset
            | CallEvent::CheckReachability => None,
        }
    }
}

/// A published event with its delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Strictly increasing across the process
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: CallEvent,
}

impl PublishedEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.event.call_id()
    }
}

/// Restricts which events a subscription receives
///
/// `None` fields match everything. Events that concern no particular call
/// never pass a `call_ids` restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub kinds: Option<HashSet<EventKind>>,
    pub call_ids: Option<HashSet<CallId>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            call_ids: None,
        }
    }

    pub fn call(call_id: CallId) -> Self {
        Self {
            kinds: None,
            call_ids: Some(HashSet::from([call_id])),
        }
    }

    pub fn matches(&self, event: &CallEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(call_ids) = &self.call_ids {
            match event.call_id() {
                Some(call_id) if call_ids.contains(call_id) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> CallId {
        CallId::parse(raw).unwrap()
    }

    #[test]
    fn test_call_filter_excludes_global_events() {
        let filter = EventFilter::call(id("c1"));
        assert!(filter.matches(&CallEvent::AnswerCall { call_id: id("c1") }));
        assert!(!filter.matches(&CallEvent::AnswerCall { call_id: id("c2") }));
        assert!(!filter.matches(&CallEvent::ProviderReset));
    }

    #[test]
    fn test_envelope_serializes_name_and_data() {
        let published = PublishedEvent {
            sequence: 7,
            timestamp: Utc::now(),
            event: CallEvent::DidToggleHoldAction {
                call_id: id("c1"),
                hold: true,
            },
        };
        let json = serde_json::to_value(&published).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["name"], "didToggleHoldAction");
        assert_eq!(json["data"]["callId"], "c1");
        assert_eq!(json["data"]["hold"], true);

        let back: PublishedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, published);
    }

    #[test]
    fn test_unit_events_serialize_without_data() {
        let json = serde_json::to_value(CallEvent::ProviderReset).unwrap();
        assert_eq!(json["name"], "providerReset");
    }
}
