//! Authority to application
//!
//! Each [`ProviderAction`] is handled entirely inside the critical section
//! in a fixed order: registry mutation, then acknowledgment, then publish.
//! The authority never waits on subscribers.
//!
//! Actions the authority sends back for requests the application made
//! itself (an answer for a call already `Active`, a hold for a call already
//! held, ...) find their target state already in place. They are
//! acknowledged as fulfilled and publish nothing.

use tracing::{debug, info, warn};

use super::{ActionTranslator, CoordinatorState};
use crate::audio::AudioSignal;
use crate::authority::{ActionAck, ProviderAction};
use crate::call::{CallAction, CallCapabilities, CallDirection, CallId, CallState, HandleType, NewCall};
use crate::events::CallEvent;

/// What handling an action decided, before the ack is sent
enum Handled {
    /// Fulfill and publish these events in order
    Fulfilled(Vec<CallEvent>),
    Failed,
}

impl ActionTranslator {
    /// Handle one authority callback and answer its acknowledgment
    pub fn handle_action(&self, action: ProviderAction, ack: ActionAck) {
        let action_name = action.name();
        let mut state = self.lock();

        let handled = match action {
            ProviderAction::Answer { call_id } => answer(&mut state, &call_id),
            ProviderAction::End { call_id } => end(&mut state, &call_id),
            ProviderAction::SetHeld { call_id, held } => set_held(&mut state, &call_id, held),
            ProviderAction::SetMuted { call_id, muted } => set_muted(&mut state, &call_id, muted),
            ProviderAction::PlayDtmf { call_id, digits } => play_dtmf(&mut state, &call_id, digits),
            ProviderAction::SetGroup { call_id, group_id } => {
                set_group(&mut state, &call_id, group_id)
            }
            ProviderAction::StartCall {
                call_id,
                handle,
                handle_type,
                name,
                has_video,
            } => start_call(&mut state, call_id, handle, handle_type, name, has_video),
            ProviderAction::AudioSessionActivated => match state.audio.activated() {
                AudioSignal::Activated { call_id } => {
                    Handled::Fulfilled(vec![CallEvent::DidActivateAudioSession { call_id }])
                }
                _ => Handled::Fulfilled(Vec::new()),
            },
            ProviderAction::AudioSessionDeactivated => match state.audio.deactivated() {
                AudioSignal::Deactivated => {
                    Handled::Fulfilled(vec![CallEvent::DidDeactivateAudioSession])
                }
                _ => Handled::Fulfilled(Vec::new()),
            },
            ProviderAction::AudioRouteChanged { output, reason } => {
                Handled::Fulfilled(vec![CallEvent::DidChangeAudioRoute { output, reason }])
            }
            ProviderAction::CheckReachability => {
                Handled::Fulfilled(vec![CallEvent::CheckReachability])
            }
            ProviderAction::Reset => reset(&mut state),
        };

        match handled {
            Handled::Fulfilled(events) => {
                ack.fulfill();
                for event in events {
                    self.publisher.publish(event);
                }
            }
            Handled::Failed => {
                debug!(action = action_name, "Failing provider action");
                ack.fail();
            }
        }
    }
}

/// Look up the call an action refers to; unknown identifiers are tolerated
fn known(state: &CoordinatorState, call_id: &CallId, action: &str) -> Option<CallState> {
    match state.registry.find(call_id) {
        Some(call) => Some(call.state),
        None => {
            warn!(call_id = %call_id, action, "Provider action for unknown call, dropping");
            None
        }
    }
}

/// Run a transition; an illegal one fails the action without mutating
fn apply(state: &mut CoordinatorState, call_id: &CallId, action: CallAction) -> bool {
    match state.registry.transition(call_id, &action) {
        Ok(transition) => {
            if transition.first_connect {
                state.audio.expect_activation(call_id);
            }
            true
        }
        Err(e) => {
            warn!(call_id = %call_id, error = %e, "Provider action not applicable");
            false
        }
    }
}

fn answer(state: &mut CoordinatorState, call_id: &CallId) -> Handled {
    match known(state, call_id, "answer") {
        None => Handled::Failed,
        Some(current) if current.is_connected() => Handled::Fulfilled(Vec::new()),
        Some(_) => match apply(state, call_id, CallAction::Answer) {
            true => Handled::Fulfilled(vec![CallEvent::AnswerCall {
                call_id: call_id.clone(),
            }]),
            false => Handled::Failed,
        },
    }
}

fn end(state: &mut CoordinatorState, call_id: &CallId) -> Handled {
    match known(state, call_id, "end") {
        None => Handled::Failed,
        // Echo of an application end still waiting for its reply
        Some(CallState::Ended) => Handled::Fulfilled(Vec::new()),
        Some(_) => {
            if !apply(state, call_id, CallAction::End(None)) {
                return Handled::Failed;
            }
            state.forget_call(call_id);
            if let Err(e) = state.registry.remove(call_id) {
                debug!(call_id = %call_id, error = %e, "Could not remove ended call");
            }
            Handled::Fulfilled(vec![CallEvent::EndCall {
                call_id: call_id.clone(),
                reason: None,
            }])
        }
    }
}

fn set_held(state: &mut CoordinatorState, call_id: &CallId, held: bool) -> Handled {
    let Some(current) = known(state, call_id, "set_held") else {
        return Handled::Failed;
    };
    let already = if held {
        current == CallState::Held
    } else {
        current == CallState::Active
    };
    if already {
        return Handled::Fulfilled(Vec::new());
    }
    match apply(state, call_id, CallAction::Hold(held)) {
        true => Handled::Fulfilled(vec![CallEvent::DidToggleHoldAction {
            call_id: call_id.clone(),
            hold: held,
        }]),
        false => Handled::Failed,
    }
}

fn set_muted(state: &mut CoordinatorState, call_id: &CallId, muted: bool) -> Handled {
    let Some(call) = state.registry.find(call_id) else {
        warn!(call_id = %call_id, action = "set_muted", "Provider action for unknown call, dropping");
        return Handled::Failed;
    };
    if !call.state.is_terminal() && call.is_muted == muted {
        return Handled::Fulfilled(Vec::new());
    }
    match apply(state, call_id, CallAction::Mute(muted)) {
        true => Handled::Fulfilled(vec![CallEvent::DidPerformSetMutedCallAction {
            call_id: call_id.clone(),
            muted,
        }]),
        false => Handled::Failed,
    }
}

fn play_dtmf(state: &mut CoordinatorState, call_id: &CallId, digits: String) -> Handled {
    if known(state, call_id, "play_dtmf").is_none() {
        return Handled::Failed;
    }
    if state.take_dtmf_echo(call_id, &digits) {
        return Handled::Fulfilled(Vec::new());
    }
    match apply(state, call_id, CallAction::Dtmf(digits.clone())) {
        true => Handled::Fulfilled(vec![CallEvent::DidPerformDTMFAction {
            call_id: call_id.clone(),
            digits,
        }]),
        false => Handled::Failed,
    }
}

fn set_group(state: &mut CoordinatorState, call_id: &CallId, group_id: Option<String>) -> Handled {
    let Some(call) = state.registry.find(call_id) else {
        warn!(call_id = %call_id, action = "set_group", "Provider action for unknown call, dropping");
        return Handled::Failed;
    };
    if call.state.is_connected() && call.group_id == group_id {
        return Handled::Fulfilled(Vec::new());
    }
    match apply(state, call_id, CallAction::Group(group_id.clone())) {
        true => Handled::Fulfilled(vec![CallEvent::DidPerformGroupCallAction {
            call_id: call_id.clone(),
            group_id,
        }]),
        false => Handled::Failed,
    }
}

fn start_call(
    state: &mut CoordinatorState,
    call_id: CallId,
    handle: String,
    handle_type: HandleType,
    name: Option<String>,
    has_video: bool,
) -> Handled {
    if let Some(call) = state.registry.find(&call_id) {
        return if call.direction == CallDirection::Outgoing && call.state == CallState::Initiating {
            Handled::Fulfilled(Vec::new())
        } else {
            warn!(call_id = %call_id, state = %call.state, "Start action for existing call");
            Handled::Failed
        };
    }

    let new_call = NewCall::outgoing(call_id.clone(), handle.clone())
        .with_handle_type(handle_type)
        .with_display_name(name.clone())
        .with_capabilities(CallCapabilities::default().with_video(has_video));
    match state.registry.create(new_call) {
        Ok(_) => Handled::Fulfilled(vec![CallEvent::DidReceiveStartCallAction {
            call_id,
            handle,
            handle_type,
            name,
            has_video,
        }]),
        Err(e) => {
            warn!(call_id = %call_id, error = %e, "Cannot start call requested by authority");
            Handled::Failed
        }
    }
}

/// The authority dropped all of its state: end everything locally
fn reset(state: &mut CoordinatorState) -> Handled {
    let cleared = state.registry.drain();
    state.audio.reset();
    state.dtmf_in_flight.clear();
    info!(calls = cleared.len(), "Provider reset, clearing all calls");

    let mut events = Vec::with_capacity(cleared.len() + 1);
    events.push(CallEvent::ProviderReset);
    events.extend(
        cleared
            .into_iter()
            .filter(|call| !call.state.is_terminal())
            .map(|call| CallEvent::EndCall {
                call_id: call.call_id,
                reason: None,
            }),
    );
    Handled::Fulfilled(events)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::authority::{ActionOutcome, SimulatedAuthority};
    use crate::config::ProviderConfig;
    use crate::events::EventKind;
    use crate::publisher::EventPublisher;

    async fn translator() -> ActionTranslator {
        let translator = ActionTranslator::new(
            Arc::new(SimulatedAuthority::new()),
            Arc::new(EventPublisher::new()),
        );
        translator
            .configure(ProviderConfig::new("test"))
            .await
            .unwrap();
        translator
    }

    fn id(raw: &str) -> CallId {
        CallId::parse(raw).unwrap()
    }

    fn post(translator: &ActionTranslator, action: ProviderAction) -> ActionOutcome {
        let (ack, mut rx) = ActionAck::new();
        translator.handle_action(action, ack);
        rx.try_recv().unwrap()
    }

    fn kinds(translator: &ActionTranslator) -> Vec<EventKind> {
        translator
            .publisher()
            .initial_events()
            .iter()
            .map(|e| e.kind())
            .collect()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_call_is_logged_and_dropped() {
        let translator = translator().await;
        let outcome = post(&translator, ProviderAction::Answer { call_id: id("ghost") });
        assert_eq!(outcome, ActionOutcome::Failed);
        assert!(translator.publisher().initial_events().is_empty());
        assert!(logs_contain("Provider action for unknown call"));
    }

    #[tokio::test]
    async fn test_answer_ack_precedes_event() {
        let translator = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "+15551234"), None)
            .await
            .unwrap();
        let mut events = translator.publisher().subscribe();
        events.drain();

        let (ack, mut rx) = ActionAck::new();
        translator.handle_action(ProviderAction::Answer { call_id: id("c1") }, ack);
        assert_eq!(rx.try_recv().unwrap(), ActionOutcome::Fulfilled);
        assert_eq!(events.drain()[0].kind(), EventKind::AnswerCall);
        assert_eq!(translator.call(&id("c1")).unwrap().state, CallState::Active);
    }

    #[tokio::test]
    async fn test_echoed_hold_publishes_nothing() {
        let translator = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap();
        translator.answer(&id("c1")).await.unwrap();
        translator.set_held(&id("c1"), true).await.unwrap();
        let before = kinds(&translator).len();

        let outcome = post(
            &translator,
            ProviderAction::SetHeld {
                call_id: id("c1"),
                held: true,
            },
        );
        assert_eq!(outcome, ActionOutcome::Fulfilled);
        assert_eq!(kinds(&translator).len(), before);
    }

    #[tokio::test]
    async fn test_illegal_inbound_action_fails_without_mutation() {
        let translator = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap();
        let outcome = post(
            &translator,
            ProviderAction::PlayDtmf {
                call_id: id("c1"),
                digits: "1".to_string(),
            },
        );
        assert_eq!(outcome, ActionOutcome::Failed);
        assert_eq!(translator.call(&id("c1")).unwrap().state, CallState::Ringing);
    }

    #[tokio::test]
    async fn test_authority_start_creates_outgoing_call() {
        let translator = translator().await;
        let start = ProviderAction::StartCall {
            call_id: id("redial"),
            handle: "+15550000".to_string(),
            handle_type: HandleType::PhoneNumber,
            name: None,
            has_video: false,
        };
        assert_eq!(post(&translator, start.clone()), ActionOutcome::Fulfilled);
        assert_eq!(
            translator.call(&id("redial")).unwrap().state,
            CallState::Initiating
        );
        // Repeated start for the same Initiating call is an echo
        assert_eq!(post(&translator, start), ActionOutcome::Fulfilled);
        assert_eq!(kinds(&translator), vec![EventKind::DidReceiveStartCallAction]);
    }

    #[tokio::test]
    async fn test_audio_activation_after_answer() {
        let translator = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap();
        post(&translator, ProviderAction::Answer { call_id: id("c1") });
        assert_eq!(translator.pending_audio_call(), Some(id("c1")));

        post(&translator, ProviderAction::AudioSessionActivated);
        assert_eq!(translator.pending_audio_call(), None);
        let last = translator.publisher().initial_events().pop().unwrap();
        assert_eq!(
            last.event,
            CallEvent::DidActivateAudioSession {
                call_id: Some(id("c1"))
            }
        );
    }

    #[tokio::test]
    async fn test_deactivation_before_activation_is_silent() {
        let translator = translator().await;
        translator
            .report_incoming(NewCall::incoming(id("c1"), "x"), None)
            .await
            .unwrap();
        post(&translator, ProviderAction::Answer { call_id: id("c1") });
        post(&translator, ProviderAction::End { call_id: id("c1") });
        post(&translator, ProviderAction::AudioSessionDeactivated);

        assert_eq!(
            kinds(&translator),
            vec![
                EventKind::DidDisplayIncomingCall,
                EventKind::AnswerCall,
                EventKind::EndCall
            ]
        );
    }
}
