//! Error types for the call state coordinator
//!
//! Nothing in this crate is fatal to the process. Errors are grouped so the
//! host application can decide how to react:
//!
//! - **Registry errors** - `DuplicateIdentifier`, `NotFound`,
//!   `InvalidTransition`, `NotTerminal`, `TooManyCalls`
//! - **Authority errors** - `ActionRejected`, raised after the local state was
//!   rolled back, and `AuthorityFailure` for requests without a call
//! - **Usage errors** - `InvalidIdentifier`, `NotConfigured`,
//!   `InvalidConfiguration`, `NotRunning`
//!
//! ```rust,no_run
//! # use rvoip_callkeep_core::{CallKeeper, CallKeepError};
//! # async fn example(keeper: &CallKeeper) {
//! match keeper.send_dtmf("c1", "1").await {
//!     Ok(()) => {}
//!     Err(CallKeepError::InvalidTransition { current_state, .. }) => {
//!         // e.g. the call is held; resume first
//!         tracing::debug!(?current_state, "dtmf not possible right now");
//!     }
//!     Err(e) if e.is_recoverable() => tracing::warn!(error = %e, "retry later"),
//!     Err(e) => tracing::error!(error = %e, category = e.category(), "dtmf failed"),
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::call::{CallId, CallState};

/// Result type alias for coordinator operations
pub type CallKeepResult<T> = Result<T, CallKeepError>;

/// Errors surfaced by the call state coordinator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallKeepError {
    #[error("Call already exists: {call_id}")]
    DuplicateIdentifier { call_id: CallId },

    #[error("Call not found: {call_id}")]
    NotFound { call_id: CallId },

    #[error("Invalid transition for call {call_id}: cannot {action} while {current_state}")]
    InvalidTransition {
        call_id: CallId,
        current_state: CallState,
        action: String,
    },

    #[error("Authority rejected {action} for call {call_id}: {reason}")]
    ActionRejected {
        call_id: CallId,
        action: String,
        reason: AuthorityError,
    },

    /// The authority declined a request that concerns no particular call
    #[error("Authority failed {operation}: {reason}")]
    AuthorityFailure {
        operation: String,
        reason: AuthorityError,
    },

    #[error("Call {call_id} cannot be removed while {current_state}")]
    NotTerminal {
        call_id: CallId,
        current_state: CallState,
    },

    #[error("Invalid call identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Too many calls: limit is {limit}")]
    TooManyCalls { limit: usize },

    #[error("Coordinator is not configured. Call setup() first")]
    NotConfigured,

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Coordinator is not running")]
    NotRunning,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CallKeepError {
    pub fn not_found(call_id: &CallId) -> Self {
        Self::NotFound { call_id: call_id.clone() }
    }

    pub fn invalid_identifier(identifier: &str, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if retrying the same command later can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallKeepError::ActionRejected { reason, .. }
            | CallKeepError::AuthorityFailure { reason, .. } => reason.is_transient(),
            CallKeepError::TooManyCalls { .. } | CallKeepError::NotRunning => true,
            _ => false,
        }
    }

    /// The call this error concerns, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            CallKeepError::DuplicateIdentifier { call_id }
            | CallKeepError::NotFound { call_id }
            | CallKeepError::InvalidTransition { call_id, .. }
            | CallKeepError::ActionRejected { call_id, .. }
            | CallKeepError::NotTerminal { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallKeepError::DuplicateIdentifier { .. }
            | CallKeepError::NotFound { .. }
            | CallKeepError::InvalidTransition { .. }
            | CallKeepError::NotTerminal { .. }
            | CallKeepError::TooManyCalls { .. } => "registry",

            CallKeepError::ActionRejected { .. } | CallKeepError::AuthorityFailure { .. } => {
                "authority"
            }

            CallKeepError::InvalidIdentifier { .. }
            | CallKeepError::NotConfigured
            | CallKeepError::InvalidConfiguration { .. }
            | CallKeepError::NotRunning => "usage",

            CallKeepError::Internal { .. } => "system",
        }
    }
}

/// Why the external call authority declined a request
///
/// The first four variants mirror the reasons the platform gives when it
/// refuses to display an incoming call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "reason", rename_all = "camelCase")]
pub enum AuthorityError {
    #[error("application is not entitled to report calls")]
    Unentitled,

    #[error("a call with this identifier already exists")]
    CallIdAlreadyExists,

    #[error("filtered by do-not-disturb")]
    FilteredByDoNotDisturb,

    #[error("filtered by block list")]
    FilteredByBlockList,

    #[error("authority unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Rejected(String),
}

impl AuthorityError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AuthorityError::Unavailable(_))
    }
}
