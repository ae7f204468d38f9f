//! Call records and the per-call state machine
//!
//! This module defines the identifier, classification and state types that
//! describe one call, plus the [`CallAction`] vocabulary the registry uses to
//! move a call between states.
//!
//! ```text
//!   Initiating ──connect──┐
//!                         ▼
//!   Ringing ────answer──► Active ◄──hold(false)── Held
//!                         │  └──────hold(true)───►  │
//!                         ▼                         ▼
//!                       Ended ◄──── end (from any non-terminal state)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CallKeepError, CallKeepResult};

/// Longest identifier accepted by [`CallId::parse`], in bytes.
pub const MAX_CALL_ID_LEN: usize = 128;

/// Process-unique identifier of one call for its entire lifetime
///
/// Identifiers are opaque strings supplied by the caller. Identifiers that
/// parse as UUIDs are normalized to lowercase hyphenated form so the same
/// call reported with different casing resolves to one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Validate and normalize a caller-supplied identifier.
    pub fn parse(raw: impl AsRef<str>) -> CallKeepResult<Self> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Err(CallKeepError::invalid_identifier(raw, "identifier is empty"));
        }
        if raw.len() > MAX_CALL_ID_LEN {
            return Err(CallKeepError::invalid_identifier(
                raw,
                format!("identifier exceeds {} bytes", MAX_CALL_ID_LEN),
            ));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CallKeepError::invalid_identifier(
                raw,
                "identifier contains whitespace or control characters",
            ));
        }

        match uuid::Uuid::parse_str(raw) {
            Ok(uuid) => Ok(Self(uuid.hyphenated().to_string())),
            Err(_) => Ok(Self(raw.to_string())),
        }
    }

    /// Generate a fresh random identifier
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CallId {
    type Err = CallKeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Direction of a call (from the application's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallDirection {
    /// Reported to the authority as a new incoming call
    Incoming,
    /// Started by the application or by the authority on the user's behalf
    Outgoing,
}

/// Classification of the remote handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleType {
    #[default]
    Generic,
    #[serde(alias = "number")]
    PhoneNumber,
    #[serde(alias = "email")]
    EmailAddress,
    Username,
}

impl HandleType {
    pub const ALL: [HandleType; 4] = [
        HandleType::Generic,
        HandleType::PhoneNumber,
        HandleType::EmailAddress,
        HandleType::Username,
    ];
}

impl FromStr for HandleType {
    type Err = CallKeepError;

    /// Host runtimes send `"generic"`, `"number"`, `"email"` or `"username"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(HandleType::Generic),
            "number" | "phonenumber" | "phone_number" => Ok(HandleType::PhoneNumber),
            "email" | "emailaddress" | "email_address" => Ok(HandleType::EmailAddress),
            "username" => Ok(HandleType::Username),
            other => Err(CallKeepError::InvalidConfiguration {
                field: "handle_type".to_string(),
                reason: format!("unknown handle type '{}'", other),
            }),
        }
    }
}

/// Features the authority should offer for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallCapabilities {
    pub supports_holding: bool,
    pub supports_dtmf: bool,
    pub supports_grouping: bool,
    pub supports_ungrouping: bool,
    pub has_video: bool,
}

impl Default for CallCapabilities {
    fn default() -> Self {
        Self {
            supports_holding: true,
            supports_dtmf: true,
            supports_grouping: false,
            supports_ungrouping: false,
            has_video: false,
        }
    }
}

impl CallCapabilities {
    pub fn with_video(mut self, has_video: bool) -> Self {
        self.has_video = has_video;
        self
    }

    pub fn with_grouping(mut self, grouping: bool, ungrouping: bool) -> Self {
        self.supports_grouping = grouping;
        self.supports_ungrouping = ungrouping;
        self
    }
}

/// Current state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Outgoing, not yet connected
    Initiating,
    /// Incoming, not yet answered
    Ringing,
    /// Connected, audio may flow
    Active,
    /// Connected but on hold
    Held,
    /// Terminal
    Ended,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Connected and not ended
    pub fn is_connected(&self) -> bool {
        matches!(self, CallState::Active | CallState::Held)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a call ended, as reported to the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Failed,
    RemoteEnded,
    Unanswered,
    AnsweredElsewhere,
    DeclinedElsewhere,
    Missed,
}

impl EndReason {
    /// Map the numeric reason codes used by host runtimes (1..=6).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EndReason::Failed),
            2 => Some(EndReason::RemoteEnded),
            3 => Some(EndReason::Unanswered),
            4 => Some(EndReason::AnsweredElsewhere),
            5 => Some(EndReason::DeclinedElsewhere),
            6 => Some(EndReason::Missed),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            EndReason::Failed => 1,
            EndReason::RemoteEnded => 2,
            EndReason::Unanswered => 3,
            EndReason::AnsweredElsewhere => 4,
            EndReason::DeclinedElsewhere => 5,
            EndReason::Missed => 6,
        }
    }
}

/// A mutation requested of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    /// Answer a ringing incoming call
    Answer,
    /// Application-confirmed connect of an outgoing call
    Connect,
    /// Place on hold (`true`) or resume (`false`)
    Hold(bool),
    Mute(bool),
    /// Play DTMF digits; only legal while active
    Dtmf(String),
    /// Join the group (`Some`) or leave the current group (`None`)
    Group(Option<String>),
    End(Option<EndReason>),
}

impl CallAction {
    pub fn name(&self) -> &'static str {
        match self {
            CallAction::Answer => "answer",
            CallAction::Connect => "connect",
            CallAction::Hold(_) => "hold",
            CallAction::Mute(_) => "mute",
            CallAction::Dtmf(_) => "dtmf",
            CallAction::Group(Some(_)) => "group",
            CallAction::Group(None) => "ungroup",
            CallAction::End(_) => "end",
        }
    }
}

/// The registry's record of one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInfo {
    pub call_id: CallId,
    pub direction: CallDirection,
    /// Remote party address
    pub handle: String,
    pub handle_type: HandleType,
    pub display_name: Option<String>,
    pub capabilities: CallCapabilities,
    pub state: CallState,
    pub is_held: bool,
    pub is_muted: bool,
    pub group_id: Option<String>,
    /// Arrived through a background wake mechanism (push)
    pub from_push: bool,
    /// Whether the call has ever been `Active`
    pub has_connected: bool,
    /// Registry-assigned incarnation; distinguishes a call from an earlier
    /// call that used the same identifier.
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Registry bookkeeping for undoing rejected commands
    #[serde(skip)]
    pub revisions: Revisions,
}

/// Stamp of the transition that last wrote each mutable aspect of a call.
///
/// A rejected command may only undo its own write, so the registry compares
/// these stamps with the one its transition was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revisions {
    pub state: u64,
    pub muted: u64,
    pub group: u64,
    pub display: u64,
}

/// Everything needed to create a registry record
#[derive(Debug, Clone, PartialEq)]
pub struct NewCall {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub handle: String,
    pub handle_type: HandleType,
    pub display_name: Option<String>,
    pub capabilities: CallCapabilities,
    pub from_push: bool,
}

impl NewCall {
    pub fn incoming(call_id: CallId, handle: impl Into<String>) -> Self {
        Self {
            call_id,
            direction: CallDirection::Incoming,
            handle: handle.into(),
            handle_type: HandleType::Generic,
            display_name: None,
            capabilities: CallCapabilities::default(),
            from_push: false,
        }
    }

    pub fn outgoing(call_id: CallId, handle: impl Into<String>) -> Self {
        Self {
            direction: CallDirection::Outgoing,
            ..Self::incoming(call_id, handle)
        }
    }

    pub fn with_handle_type(mut self, handle_type: HandleType) -> Self {
        self.handle_type = handle_type;
        self
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CallCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_from_push(mut self, from_push: bool) -> Self {
        self.from_push = from_push;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_identifiers_are_kept_verbatim() {
        let id = CallId::parse("c1").unwrap();
        assert_eq!(id.as_str(), "c1");
    }

    #[test]
    fn test_uuid_identifiers_are_lowercased() {
        let id = CallId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        assert_eq!(id.as_str(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
        assert_eq!(id, CallId::parse("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap());
    }

    #[test]
    fn test_invalid_identifiers_are_rejected() {
        assert!(CallId::parse("").is_err());
        assert!(CallId::parse("has space").is_err());
        assert!(CallId::parse("tab\tid").is_err());
        assert!(CallId::parse("x".repeat(MAX_CALL_ID_LEN + 1)).is_err());
        assert!(CallId::parse("x".repeat(MAX_CALL_ID_LEN)).is_ok());
    }

    #[test]
    fn test_end_reason_codes() {
        for code in 1..=6 {
            let reason = EndReason::from_code(code).unwrap();
            assert_eq!(reason.code(), code);
        }
        assert_eq!(EndReason::from_code(0), None);
        assert_eq!(EndReason::from_code(7), None);
    }

    #[test]
    fn test_handle_type_from_host_strings() {
        assert_eq!("number".parse::<HandleType>().unwrap(), HandleType::PhoneNumber);
        assert_eq!("email".parse::<HandleType>().unwrap(), HandleType::EmailAddress);
        assert_eq!("generic".parse::<HandleType>().unwrap(), HandleType::Generic);
        assert!("fax".parse::<HandleType>().is_err());
    }
}
