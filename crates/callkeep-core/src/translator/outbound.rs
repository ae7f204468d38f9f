//! Application to authority
//!
//! Every command is validated against the registry first. Commands that
//! change state apply optimistically and publish right away; when the
//! authority declines, the change that command made is undone and an
//! [`CallEvent::ActionRejected`] follows. Only the aspect the command wrote
//! (state, mute flag, group, display) is put back, and only if no later
//! transition has written it since. `end_call` is the exception: the call
//! ends locally whatever the authority answers.

use tracing::{debug, info, warn};

use super::{ActionTranslator, CoordinatorState};
use crate::authority::AuthorityRequest;
use crate::call::{CallAction, CallDirection, CallId, CallInfo, CallState, EndReason, NewCall};
use crate::config::ProviderConfig;
use crate::error::{AuthorityError, CallKeepError, CallKeepResult};
use crate::events::CallEvent;
use crate::registry::Revert;

impl ActionTranslator {
    /// Validate `config`, hand it to the authority and mark the coordinator
    /// configured. Calling it again reconfigures.
    pub async fn configure(&self, config: ProviderConfig) -> CallKeepResult<()> {
        config.validate()?;
        self.authority
            .configure(&config)
            .await
            .map_err(|reason| {
                warn!(error = %reason, "Authority refused provider configuration");
                CallKeepError::AuthorityFailure {
                    operation: "setup".to_string(),
                    reason,
                }
            })?;

        let mut state = self.lock();
        state.registry.set_limit(Some(config.max_calls()));
        info!(app_name = %config.app_name, max_calls = config.max_calls(), "Provider configured");
        state.config = Some(config);
        Ok(())
    }

    /// Register a new incoming call with the authority.
    ///
    /// The record exists (as `Ringing`) while the authority decides. A
    /// declined report discards it and publishes `DidDisplayIncomingCall`
    /// with the error set.
    pub async fn report_incoming(
        &self,
        new_call: NewCall,
        payload: Option<serde_json::Value>,
    ) -> CallKeepResult<CallInfo> {
        let info = {
            let mut state = self.lock();
            state.ensure_configured()?;
            state.registry.create(new_call)?
        };

        let request = AuthorityRequest::ReportIncomingCall {
            call_id: info.call_id.clone(),
            handle: info.handle.clone(),
            handle_type: info.handle_type,
            localized_caller_name: info.display_name.clone(),
            capabilities: info.capabilities,
        };
        let reply = self.authority.request(request).await;

        let mut state = self.lock();
        let displayed = |error: Option<AuthorityError>| CallEvent::DidDisplayIncomingCall {
            call_id: info.call_id.clone(),
            handle: info.handle.clone(),
            localized_caller_name: info.display_name.clone(),
            has_video: info.capabilities.has_video,
            from_push: info.from_push,
            payload: payload.clone(),
            error,
        };

        match reply {
            Ok(()) => {
                if state.registry.is_live(&info.call_id, info.generation) {
                    self.publisher.publish(displayed(None));
                } else {
                    debug!(call_id = %info.call_id, "Call ended before the authority displayed it");
                }
                Ok(info)
            }
            Err(reason) => {
                warn!(call_id = %info.call_id, error = %reason, "Authority refused incoming call");
                state.registry.discard(&info.call_id, info.generation);
                state.forget_call(&info.call_id);
                self.publisher.publish(displayed(Some(reason.clone())));
                Err(CallKeepError::ActionRejected {
                    call_id: info.call_id,
                    action: "report_incoming_call".to_string(),
                    reason,
                })
            }
        }
    }

    /// Ask the authority to start an outgoing call (`Initiating`)
    pub async fn start_outgoing(&self, new_call: NewCall) -> CallKeepResult<CallInfo> {
        let info = {
            let mut state = self.lock();
            state.ensure_configured()?;
            state.registry.create(new_call)?
        };

        let request = AuthorityRequest::StartCall {
            call_id: info.call_id.clone(),
            handle: info.handle.clone(),
            handle_type: info.handle_type,
            contact_identifier: info.display_name.clone(),
            has_video: info.capabilities.has_video,
        };
        let reply = self.authority.request(request).await;

        let mut state = self.lock();
        match reply {
            Ok(()) => Ok(info),
            Err(reason) => {
                warn!(call_id = %info.call_id, error = %reason, "Authority refused outgoing call");
                if state.registry.discard(&info.call_id, info.generation).is_some() {
                    self.publisher.publish(CallEvent::ActionRejected {
                        call_id: info.call_id.clone(),
                        action: "start_call".to_string(),
                        reason: reason.clone(),
                    });
                }
                Err(CallKeepError::ActionRejected {
                    call_id: info.call_id,
                    action: "start_call".to_string(),
                    reason,
                })
            }
        }
    }

    /// Forward the "connecting" notification of an `Initiating` call
    pub async fn report_connecting(&self, call_id: &CallId) -> CallKeepResult<()> {
        let generation = {
            let state = self.lock();
            state.ensure_configured()?;
            let call = state.registry.get(call_id)?;
            if call.direction != CallDirection::Outgoing || call.state != CallState::Initiating {
                return Err(CallKeepError::InvalidTransition {
                    call_id: call_id.clone(),
                    current_state: call.state,
                    action: "connecting".to_string(),
                });
            }
            call.generation
        };

        let request = AuthorityRequest::ReportOutgoingConnecting {
            call_id: call_id.clone(),
        };
        match self.authority.request(request).await {
            Ok(()) => Ok(()),
            Err(reason) => {
                warn!(call_id = %call_id, error = %reason, "Authority refused connecting report");
                if self.lock().registry.is_live(call_id, generation) {
                    self.publisher.publish(CallEvent::ActionRejected {
                        call_id: call_id.clone(),
                        action: "connecting".to_string(),
                        reason: reason.clone(),
                    });
                }
                Err(CallKeepError::ActionRejected {
                    call_id: call_id.clone(),
                    action: "connecting".to_string(),
                    reason,
                })
            }
        }
    }

    /// `Initiating -> Active`, confirmed by the application
    pub async fn report_connected(&self, call_id: &CallId) -> CallKeepResult<()> {
        let request = AuthorityRequest::ReportOutgoingConnected {
            call_id: call_id.clone(),
        };
        self.perform(call_id, CallAction::Connect, request, None).await
    }

    /// Application-initiated answer of a `Ringing` call
    pub async fn answer(&self, call_id: &CallId) -> CallKeepResult<()> {
        let request = AuthorityRequest::AnswerCall {
            call_id: call_id.clone(),
        };
        let event = CallEvent::AnswerCall {
            call_id: call_id.clone(),
        };
        self.perform(call_id, CallAction::Answer, request, Some(event)).await
    }

    pub async fn set_held(&self, call_id: &CallId, held: bool) -> CallKeepResult<()> {
        let request = AuthorityRequest::SetHeld {
            call_id: call_id.clone(),
            held,
        };
        let event = CallEvent::DidToggleHoldAction {
            call_id: call_id.clone(),
            hold: held,
        };
        self.perform(call_id, CallAction::Hold(held), request, Some(event)).await
    }

    pub async fn set_muted(&self, call_id: &CallId, muted: bool) -> CallKeepResult<()> {
        let request = AuthorityRequest::SetMuted {
            call_id: call_id.clone(),
            muted,
        };
        let event = CallEvent::DidPerformSetMutedCallAction {
            call_id: call_id.clone(),
            muted,
        };
        self.perform(call_id, CallAction::Mute(muted), request, Some(event)).await
    }

    pub async fn send_dtmf(&self, call_id: &CallId, digits: &str) -> CallKeepResult<()> {
        let request = AuthorityRequest::PlayDtmf {
            call_id: call_id.clone(),
            digits: digits.to_string(),
        };
        let event = CallEvent::DidPerformDTMFAction {
            call_id: call_id.clone(),
            digits: digits.to_string(),
        };
        let result = self
            .perform(call_id, CallAction::Dtmf(digits.to_string()), request, Some(event))
            .await;

        // The authority has answered; a later echo is not expected
        self.lock().take_dtmf_echo(call_id, digits);
        result
    }

    /// Join (`Some`) or leave (`None`) a call group
    pub async fn set_group(&self, call_id: &CallId, group_id: Option<String>) -> CallKeepResult<()> {
        let request = AuthorityRequest::SetGroup {
            call_id: call_id.clone(),
            group_id: group_id.clone(),
        };
        let event = CallEvent::DidPerformGroupCallAction {
            call_id: call_id.clone(),
            group_id: group_id.clone(),
        };
        self.perform(call_id, CallAction::Group(group_id), request, Some(event))
            .await
    }

    /// Change what the system UI shows for a live call
    pub async fn update_display(
        &self,
        call_id: &CallId,
        display_name: Option<String>,
        handle: Option<String>,
    ) -> CallKeepResult<()> {
        let (snapshot, applied) = {
            let mut state = self.lock();
            state.ensure_configured()?;
            let snapshot = state.registry.get(call_id)?;
            let applied = state
                .registry
                .update_display(call_id, display_name.clone(), handle.clone())?;
            (snapshot, applied)
        };

        let request = AuthorityRequest::UpdateCall {
            call_id: call_id.clone(),
            display_name,
            handle,
        };
        let reply = self.authority.request(request).await;
        self.reconcile(&snapshot, "update", reply, |state| {
            state.registry.revert_display(&snapshot, &applied)
        })
    }

    /// End a call locally and tell the authority.
    ///
    /// Publishes `EndCall` immediately. The `Ended` record stays in the
    /// registry until the authority answers, so its echo of the end is
    /// recognized; then it is removed.
    pub async fn end_call(&self, call_id: &CallId, reason: Option<EndReason>) -> CallKeepResult<()> {
        self.end_call_checked(call_id, reason, |_| Ok(())).await
    }

    /// Decline a `Ringing` incoming call
    pub async fn reject_call(&self, call_id: &CallId) -> CallKeepResult<()> {
        self.end_call_checked(call_id, None, |call| {
            if call.direction == CallDirection::Incoming && call.state == CallState::Ringing {
                Ok(())
            } else {
                Err(CallKeepError::InvalidTransition {
                    call_id: call.call_id.clone(),
                    current_state: call.state,
                    action: "reject".to_string(),
                })
            }
        })
        .await
    }

    /// End every live call. Returns how many calls were ended.
    pub async fn end_all_calls(&self) -> CallKeepResult<usize> {
        let live: Vec<CallId> = {
            let state = self.lock();
            state.ensure_configured()?;
            state
                .registry
                .calls()
                .into_iter()
                .filter(|call| !call.state.is_terminal())
                .map(|call| call.call_id)
                .collect()
        };

        let mut ended = 0;
        for call_id in live {
            match self.end_call(&call_id, None).await {
                // Rejected ends still end locally
                Ok(()) | Err(CallKeepError::ActionRejected { .. }) => ended += 1,
                Err(CallKeepError::NotFound { .. }) => {
                    debug!(call_id = %call_id, "Call ended concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        info!(ended, "Ended all calls");
        Ok(ended)
    }

    /// Reply to a reachability check
    pub async fn set_reachable(&self) -> CallKeepResult<()> {
        self.lock().ensure_configured()?;
        self.authority
            .request(AuthorityRequest::SetReachable)
            .await
            .map_err(|reason| {
                warn!(error = %reason, "Authority refused reachability reply");
                CallKeepError::AuthorityFailure {
                    operation: "set_reachable".to_string(),
                    reason,
                }
            })
    }

    async fn end_call_checked(
        &self,
        call_id: &CallId,
        reason: Option<EndReason>,
        check: impl FnOnce(&CallInfo) -> CallKeepResult<()>,
    ) -> CallKeepResult<()> {
        let generation = {
            let mut state = self.lock();
            state.ensure_configured()?;
            let call = state.registry.get(call_id)?;
            check(&call)?;
            state.registry.transition(call_id, &CallAction::End(reason))?;
            state.forget_call(call_id);
            self.publisher.publish(CallEvent::EndCall {
                call_id: call_id.clone(),
                reason,
            });
            call.generation
        };

        let request = AuthorityRequest::EndCall {
            call_id: call_id.clone(),
            reason,
        };
        let reply = self.authority.request(request).await;

        {
            let mut state = self.lock();
            if state.registry.is_current(call_id, generation) {
                if let Err(e) = state.registry.remove(call_id) {
                    debug!(call_id = %call_id, error = %e, "Ended call already gone");
                }
            }
        }

        reply.map_err(|reason| {
            warn!(call_id = %call_id, error = %reason, "Authority refused end, call ended locally");
            CallKeepError::ActionRejected {
                call_id: call_id.clone(),
                action: "end".to_string(),
                reason,
            }
        })
    }

    /// Apply `action`, publish `event`, then confirm with the authority
    async fn perform(
        &self,
        call_id: &CallId,
        action: CallAction,
        request: AuthorityRequest,
        event: Option<CallEvent>,
    ) -> CallKeepResult<()> {
        let (snapshot, applied) = {
            let mut state = self.lock();
            state.ensure_configured()?;
            let snapshot = state.registry.get(call_id)?;
            let applied = state.registry.transition(call_id, &action)?;
            if applied.first_connect {
                state.audio.expect_activation(call_id);
            }
            if let CallAction::Dtmf(digits) = &action {
                state.dtmf_in_flight.push((call_id.clone(), digits.clone()));
            }
            if let Some(event) = event {
                self.publisher.publish(event);
            }
            (snapshot, applied)
        };

        let reply = self.authority.request(request).await;
        self.reconcile(&snapshot, action.name(), reply, |state| {
            state.registry.revert(&snapshot, &action, &applied)
        })
    }

    /// Settle an authority reply against the record it was issued for.
    ///
    /// `undo` takes back the rejected change inside the critical section.
    fn reconcile(
        &self,
        snapshot: &CallInfo,
        action: &str,
        reply: Result<(), AuthorityError>,
        undo: impl FnOnce(&mut CoordinatorState) -> Revert,
    ) -> CallKeepResult<()> {
        let call_id = &snapshot.call_id;
        let Err(reason) = reply else {
            return Ok(());
        };
        let rejected = CallKeepError::ActionRejected {
            call_id: call_id.clone(),
            action: action.to_string(),
            reason: reason.clone(),
        };

        let mut state = self.lock();
        match undo(&mut *state) {
            Revert::Stale => {
                debug!(call_id = %call_id, action, error = %reason, "Discarding stale authority rejection");
                return Err(rejected);
            }
            Revert::Superseded => {
                warn!(call_id = %call_id, action, error = %reason, "Authority rejected request already overtaken by a later change");
            }
            Revert::Reverted { undid_connect } => {
                warn!(call_id = %call_id, action, error = %reason, "Authority rejected request, rolling back");
                if undid_connect {
                    state.audio.call_ended(call_id);
                }
            }
        }
        self.publisher.publish(CallEvent::ActionRejected {
            call_id: call_id.clone(),
            action: action.to_string(),
            reason,
        });
        Err(rejected)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authority::SimulatedAuthority;
    use crate::events::EventKind;
    use crate::publisher::EventPublisher;

    async fn translator() -> (ActionTranslator, SimulatedAuthority) {
        let authority = SimulatedAuthority::new();
        let translator =
            ActionTranslator::new(Arc::new(authority.clone()), Arc::new(EventPublisher::new()));
        translator
            .configure(ProviderConfig::new("test"))
            .await
            .unwrap();
        (translator, authority)
    }

    fn id(raw: &str) -> CallId {
        CallId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_commands_require_configuration() {
        let translator = ActionTranslator::new(
            Arc::new(SimulatedAuthority::new()),
            Arc::new(EventPublisher::new()),
        );
        let result = translator
            .report_incoming(NewCall::incoming(id("c1"), "+15551234"), None)
            .await;
        assert_eq!(result.unwrap_err(), CallKeepError::NotConfigured);
    }

    #[tokio::test]
    async fn test_rejected_hold_rolls_back() {
        let (translator, authority) = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "+15551234"), None)
            .await
            .unwrap();
        translator.answer(&id("c1")).await.unwrap();

        authority.reject("set_held", AuthorityError::rejected("no"));
        let err = translator.set_held(&id("c1"), true).await.unwrap_err();
        assert!(matches!(err, CallKeepError::ActionRejected { .. }));
        assert_eq!(translator.call(&id("c1")).unwrap().state, CallState::Active);

        let kinds: Vec<EventKind> = translator
            .publisher()
            .initial_events()
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::DidDisplayIncomingCall,
                EventKind::AnswerCall,
                EventKind::DidToggleHoldAction,
                EventKind::ActionRejected,
            ]
        );
    }

    async fn answered(translator: &ActionTranslator, raw: &str) {
        let caps = crate::call::CallCapabilities::default().with_grouping(true, true);
        translator
            .report_incoming(NewCall::incoming(id(raw), "x").with_capabilities(caps), None)
            .await
            .unwrap();
        translator.answer(&id(raw)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_mute_and_group_restore_their_fields() {
        let (translator, authority) = translator().await;
        answered(&translator, "c1").await;
        translator
            .set_group(&id("c1"), Some("g1".to_string()))
            .await
            .unwrap();

        authority.reject("set_muted", AuthorityError::rejected("no"));
        authority.reject("set_group", AuthorityError::rejected("no"));
        assert!(translator.set_muted(&id("c1"), true).await.is_err());
        assert!(translator.set_group(&id("c1"), None).await.is_err());

        let call = translator.call(&id("c1")).unwrap();
        assert_eq!(call.state, CallState::Active);
        assert!(!call.is_muted);
        assert_eq!(call.group_id.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn test_rejected_dtmf_publishes_rejection() {
        let (translator, authority) = translator().await;
        answered(&translator, "c1").await;
        authority.reject("play_dtmf", AuthorityError::rejected("no"));

        assert!(translator.send_dtmf(&id("c1"), "5").await.is_err());
        assert_eq!(translator.call(&id("c1")).unwrap().state, CallState::Active);
        assert!(translator.lock().dtmf_in_flight.is_empty());
        let kinds: Vec<EventKind> = translator
            .publisher()
            .initial_events()
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            &kinds[kinds.len() - 2..],
            &[EventKind::DidPerformDTMFAction, EventKind::ActionRejected]
        );
    }

    #[tokio::test]
    async fn test_rejected_answer_returns_to_ringing() {
        let (translator, authority) = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap();
        authority.reject("answer_call", AuthorityError::rejected("no"));

        assert!(translator.answer(&id("c1")).await.is_err());
        let call = translator.call(&id("c1")).unwrap();
        assert_eq!(call.state, CallState::Ringing);
        assert!(!call.has_connected);
        assert_eq!(translator.pending_audio_call(), None);
    }

    #[tokio::test]
    async fn test_rejected_connect_returns_to_initiating() {
        let (translator, authority) = translator().await;
        translator
            .start_outgoing(NewCall::outgoing(id("out"), "bob"))
            .await
            .unwrap();
        authority.reject("report_outgoing_connected", AuthorityError::rejected("no"));

        assert!(translator.report_connected(&id("out")).await.is_err());
        assert_eq!(
            translator.call(&id("out")).unwrap().state,
            CallState::Initiating
        );
        assert_eq!(translator.pending_audio_call(), None);
    }

    #[tokio::test]
    async fn test_rejected_mute_keeps_hold_accepted_meanwhile() {
        let (translator, authority) = translator().await;
        answered(&translator, "c1").await;
        let translator = Arc::new(translator);

        authority.gate("set_muted");
        authority.reject("set_muted", AuthorityError::rejected("no"));
        let pending = {
            let translator = translator.clone();
            tokio::spawn(async move { translator.set_muted(&id("c1"), true).await })
        };
        while !authority.request_names().contains(&"set_muted") {
            tokio::task::yield_now().await;
        }

        translator.set_held(&id("c1"), true).await.unwrap();
        authority.release();
        assert!(pending.await.unwrap().is_err());

        let call = translator.call(&id("c1")).unwrap();
        assert_eq!(call.state, CallState::Held);
        assert!(call.is_held);
        assert!(!call.is_muted);
    }

    #[tokio::test]
    async fn test_rejected_end_still_ends_locally() {
        let (translator, authority) = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap();
        authority.set_offline("simulator");

        let err = translator.end_call(&id("c1"), None).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            translator.call(&id("c1")),
            Err(CallKeepError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_refused_incoming_report_discards_record() {
        let (translator, authority) = translator().await;
        authority.reject("report_incoming_call", AuthorityError::FilteredByBlockList);

        let err = translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CallKeepError::ActionRejected { .. }));
        assert!(translator.calls().is_empty());

        let events = translator.publisher().initial_events();
        assert_eq!(events.len(), 1);
        match &events[0].event {
            CallEvent::DidDisplayIncomingCall { error, .. } => {
                assert_eq!(error, &Some(AuthorityError::FilteredByBlockList));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reject_call_only_while_ringing() {
        let (translator, _authority) = translator().await;
        translator
            .start_outgoing(NewCall::outgoing(id("out"), "bob"))
            .await
            .unwrap();
        assert!(matches!(
            translator.reject_call(&id("out")).await,
            Err(CallKeepError::InvalidTransition { current_state: CallState::Initiating, .. })
        ));

        translator
            .report_incoming(NewCall::incoming(id("in"), "alice"), None)
            .await
            .unwrap();
        translator.reject_call(&id("in")).await.unwrap();
        assert!(translator.call(&id("in")).is_err());
    }

    #[tokio::test]
    async fn test_connecting_requires_initiating_outgoing() {
        let (translator, authority) = translator().await;
        translator
            .start_outgoing(NewCall::outgoing(id("out"), "bob"))
            .await
            .unwrap();
        translator.report_connecting(&id("out")).await.unwrap();
        translator.report_connected(&id("out")).await.unwrap();
        assert!(translator.report_connecting(&id("out")).await.is_err());
        assert_eq!(translator.pending_audio_call(), Some(id("out")));
        assert_eq!(
            authority.request_names(),
            vec!["start_call", "report_outgoing_connecting", "report_outgoing_connected"]
        );
    }
}
