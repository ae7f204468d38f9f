//! The authoritative call registry
//!
//! [`CallRegistry`] maps call identifiers to [`CallInfo`] records and owns
//! every mutation of call state. It is a plain synchronous structure; the
//! translator keeps it behind the coordinator-wide lock.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::call::{CallAction, CallDirection, CallId, CallInfo, CallState, NewCall, Revisions};
use crate::error::{CallKeepError, CallKeepResult};

/// Result of a successful [`CallRegistry::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous_state: CallState,
    pub new_state: CallState,
    /// The call entered `Active` for the first time
    pub first_connect: bool,
    /// Written into the record's [`Revisions`] for every aspect this
    /// transition touched
    pub stamp: u64,
}

impl Transition {
    pub fn changed_state(&self) -> bool {
        self.previous_state != self.new_state
    }
}

/// Result of undoing a rejected command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revert {
    /// The call ended or its identifier now names another call
    Stale,
    /// A later write replaced the change; it is left alone
    Superseded,
    Reverted {
        /// The undone change was the call's first connect
        undid_connect: bool,
    },
}

/// Call storage keyed by identifier
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: HashMap<CallId, CallInfo>,
    next_generation: u64,
    next_stamp: u64,
    max_calls: Option<usize>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that refuses to hold more than `max_calls` live calls
    pub fn with_limit(max_calls: usize) -> Self {
        Self {
            max_calls: Some(max_calls),
            ..Self::default()
        }
    }

    pub fn set_limit(&mut self, max_calls: Option<usize>) {
        self.max_calls = max_calls;
    }

    /// Create a call in its initial state (`Ringing` for incoming,
    /// `Initiating` for outgoing).
    ///
    /// Fails with `DuplicateIdentifier` while any record with the same
    /// identifier exists, including an `Ended` record not yet removed.
    pub fn create(&mut self, new_call: NewCall) -> CallKeepResult<CallInfo> {
        if self.calls.contains_key(&new_call.call_id) {
            return Err(CallKeepError::DuplicateIdentifier {
                call_id: new_call.call_id,
            });
        }
        if let Some(limit) = self.max_calls {
            if self.live_count() >= limit {
                return Err(CallKeepError::TooManyCalls { limit });
            }
        }

        self.next_generation += 1;
        let state = match new_call.direction {
            CallDirection::Incoming => CallState::Ringing,
            CallDirection::Outgoing => CallState::Initiating,
        };
        let info = CallInfo {
            call_id: new_call.call_id.clone(),
            direction: new_call.direction,
            handle: new_call.handle,
            handle_type: new_call.handle_type,
            display_name: new_call.display_name,
            capabilities: new_call.capabilities,
            state,
            is_held: false,
            is_muted: false,
            group_id: None,
            from_push: new_call.from_push,
            has_connected: false,
            generation: self.next_generation,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            revisions: Revisions::default(),
        };

        info!(call_id = %info.call_id, direction = ?info.direction, state = %state, "Created call");
        self.calls.insert(new_call.call_id, info.clone());
        Ok(info)
    }

    pub fn get(&self, call_id: &CallId) -> CallKeepResult<CallInfo> {
        self.calls
            .get(call_id)
            .cloned()
            .ok_or_else(|| CallKeepError::not_found(call_id))
    }

    pub fn find(&self, call_id: &CallId) -> Option<&CallInfo> {
        self.calls.get(call_id)
    }

    /// Apply `action` to the call, or fail without mutating anything.
    pub fn transition(&mut self, call_id: &CallId, action: &CallAction) -> CallKeepResult<Transition> {
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallKeepError::not_found(call_id))?;

        let previous_state = call.state;
        let new_state = next_state(call, action)?;
        let first_connect = new_state == CallState::Active && !call.has_connected;

        self.next_stamp += 1;
        let stamp = self.next_stamp;
        match action {
            CallAction::Mute(muted) => {
                call.is_muted = *muted;
                call.revisions.muted = stamp;
            }
            CallAction::Group(group) => {
                call.group_id = group.clone();
                call.revisions.group = stamp;
            }
            CallAction::Dtmf(_) => {}
            CallAction::Answer | CallAction::Connect | CallAction::Hold(_) | CallAction::End(_) => {
                call.revisions.state = stamp;
            }
        }
        call.state = new_state;
        call.is_held = new_state == CallState::Held;
        if first_connect {
            call.has_connected = true;
            call.connected_at = Some(Utc::now());
        }
        if new_state == CallState::Ended && call.ended_at.is_none() {
            call.ended_at = Some(Utc::now());
        }

        debug!(
            call_id = %call_id,
            action = action.name(),
            from = %previous_state,
            to = %new_state,
            "Call transition"
        );

        Ok(Transition {
            previous_state,
            new_state,
            first_connect,
            stamp,
        })
    }

    /// Update the presentation fields of a live call.
    pub fn update_display(
        &mut self,
        call_id: &CallId,
        display_name: Option<String>,
        handle: Option<String>,
    ) -> CallKeepResult<CallInfo> {
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallKeepError::not_found(call_id))?;
        if call.state.is_terminal() {
            return Err(CallKeepError::InvalidTransition {
                call_id: call_id.clone(),
                current_state: call.state,
                action: "update".to_string(),
            });
        }
        if display_name.is_some() {
            call.display_name = display_name;
        }
        if let Some(handle) = handle {
            call.handle = handle;
        }
        self.next_stamp += 1;
        call.revisions.display = self.next_stamp;
        Ok(call.clone())
    }

    /// Remove an `Ended` call
    pub fn remove(&mut self, call_id: &CallId) -> CallKeepResult<CallInfo> {
        let state = self
            .calls
            .get(call_id)
            .map(|call| call.state)
            .ok_or_else(|| CallKeepError::not_found(call_id))?;
        if !state.is_terminal() {
            return Err(CallKeepError::NotTerminal {
                call_id: call_id.clone(),
                current_state: state,
            });
        }
        let removed = self
            .calls
            .remove(call_id)
            .ok_or_else(|| CallKeepError::not_found(call_id))?;
        debug!(call_id = %call_id, "Removed call");
        Ok(removed)
    }

    /// Undo what `action` did to the call, as recorded in `applied`.
    ///
    /// Only the aspect the action wrote is touched, and only while no later
    /// transition has written it again. `snapshot` is the record as it was
    /// before the action.
    pub fn revert(&mut self, snapshot: &CallInfo, action: &CallAction, applied: &Transition) -> Revert {
        let Some(call) = self.live_mut(snapshot) else {
            return Revert::Stale;
        };

        let mut undid_connect = false;
        match action {
            CallAction::Mute(_) => {
                if call.revisions.muted != applied.stamp {
                    return Revert::Superseded;
                }
                call.is_muted = snapshot.is_muted;
            }
            CallAction::Group(_) => {
                if call.revisions.group != applied.stamp {
                    return Revert::Superseded;
                }
                call.group_id = snapshot.group_id.clone();
            }
            CallAction::Dtmf(_) => {}
            CallAction::Answer | CallAction::Connect | CallAction::Hold(_) | CallAction::End(_) => {
                if call.revisions.state != applied.stamp {
                    return Revert::Superseded;
                }
                call.state = applied.previous_state;
                call.is_held = call.state == CallState::Held;
                if applied.first_connect {
                    call.has_connected = false;
                    call.connected_at = None;
                    undid_connect = true;
                }
            }
        }

        debug!(
            call_id = %call.call_id,
            action = action.name(),
            state = %call.state,
            "Reverted rejected change"
        );
        Revert::Reverted { undid_connect }
    }

    /// Undo a rejected display update, unless a later update replaced it
    pub fn revert_display(&mut self, snapshot: &CallInfo, applied: &CallInfo) -> Revert {
        let Some(call) = self.live_mut(snapshot) else {
            return Revert::Stale;
        };
        if call.revisions.display != applied.revisions.display {
            return Revert::Superseded;
        }
        call.display_name = snapshot.display_name.clone();
        call.handle = snapshot.handle.clone();
        Revert::Reverted {
            undid_connect: false,
        }
    }

    fn live_mut(&mut self, snapshot: &CallInfo) -> Option<&mut CallInfo> {
        self.calls
            .get_mut(&snapshot.call_id)
            .filter(|call| call.generation == snapshot.generation && !call.state.is_terminal())
    }

    /// Drop a record created optimistically, if it is still that incarnation
    pub fn discard(&mut self, call_id: &CallId, generation: u64) -> Option<CallInfo> {
        if self.is_current(call_id, generation) {
            self.calls.remove(call_id)
        } else {
            None
        }
    }

    /// Whether `call_id` still names the incarnation `generation`
    pub fn is_current(&self, call_id: &CallId, generation: u64) -> bool {
        self.calls
            .get(call_id)
            .is_some_and(|call| call.generation == generation)
    }

    /// Whether `call_id` names the incarnation `generation` and has not ended
    pub fn is_live(&self, call_id: &CallId, generation: u64) -> bool {
        self.calls
            .get(call_id)
            .is_some_and(|call| call.generation == generation && !call.state.is_terminal())
    }

    /// Remove every record, oldest first. Generations keep counting up, so
    /// snapshots taken before the drain never match a later call.
    pub fn drain(&mut self) -> Vec<CallInfo> {
        let mut calls: Vec<CallInfo> = self.calls.drain().map(|(_, call)| call).collect();
        calls.sort_by_key(|call| call.generation);
        calls
    }

    /// Snapshot of every record, oldest first
    pub fn calls(&self) -> Vec<CallInfo> {
        let mut calls: Vec<CallInfo> = self.calls.values().cloned().collect();
        calls.sort_by_key(|call| call.generation);
        calls
    }

    pub fn ids(&self) -> Vec<CallId> {
        self.calls().into_iter().map(|call| call.call_id).collect()
    }

    pub fn count_in_state(&self, state: CallState) -> usize {
        self.calls.values().filter(|call| call.state == state).count()
    }

    /// Number of calls that have not ended
    pub fn live_count(&self) -> usize {
        self.calls.values().filter(|call| !call.state.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Decide the state `action` leads to, without touching the record
fn next_state(call: &CallInfo, action: &CallAction) -> CallKeepResult<CallState> {
    let invalid = || CallKeepError::InvalidTransition {
        call_id: call.call_id.clone(),
        current_state: call.state,
        action: action.name().to_string(),
    };
    let caps = &call.capabilities;

    match (call.state, action) {
        (CallState::Ended, CallAction::End(_)) => Err(CallKeepError::not_found(&call.call_id)),
        (CallState::Ended, _) => Err(invalid()),
        (_, CallAction::End(_)) => Ok(CallState::Ended),

        (CallState::Ringing, CallAction::Answer) => Ok(CallState::Active),
        (CallState::Initiating, CallAction::Connect) => Ok(CallState::Active),

        (CallState::Active, CallAction::Hold(true)) if caps.supports_holding => Ok(CallState::Held),
        (CallState::Held, CallAction::Hold(false)) => Ok(CallState::Active),

        (CallState::Initiating | CallState::Active, CallAction::Mute(_)) => Ok(call.state),

        (CallState::Active, CallAction::Dtmf(digits)) if caps.supports_dtmf && !digits.is_empty() => {
            Ok(CallState::Active)
        }

        (CallState::Active | CallState::Held, CallAction::Group(Some(_))) if caps.supports_grouping => {
            Ok(call.state)
        }
        (CallState::Active | CallState::Held, CallAction::Group(None))
            if caps.supports_ungrouping && call.group_id.is_some() =>
        {
            Ok(call.state)
        }

        _ => Err(invalid()),
    }
}
