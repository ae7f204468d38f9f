//! Late authority replies, echoes and the translator loop

mod common;

use std::time::Duration;

use common::*;
use rvoip_callkeep_core::{
    ActionOutcome, AuthorityError, CallKeepError, CallState, EventKind, OutgoingCall,
    ProviderAction, SimulatedAuthority,
};
use tokio::time::timeout;

async fn wait_for_request(authority: &SimulatedAuthority, name: &'static str) {
    timeout(Duration::from_secs(5), async {
        while !authority.request_names().contains(&name) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("request never reached the authority");
}

#[tokio::test]
async fn test_late_reply_after_end_does_not_resurrect() {
    let (keeper, authority) = keeper().await;
    ring(&keeper, "c1").await;
    provider(&keeper, answer("c1"));
    let mut events = keeper.subscribe();
    events.drain();

    authority.gate("set_held");
    let pending = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.set_held("c1", true).await })
    };
    wait_for_request(&authority, "set_held").await;

    keeper.end_call("c1", None).await.unwrap();
    authority.release();
    assert!(pending.await.unwrap().is_ok());

    assert!(matches!(
        keeper.get_call("c1"),
        Err(CallKeepError::NotFound { .. })
    ));
    assert_eq!(
        drain_kinds(&mut events),
        vec![EventKind::DidToggleHoldAction, EventKind::EndCall]
    );
}

#[tokio::test]
async fn test_late_rejection_leaves_new_call_alone() {
    let (keeper, authority) = keeper().await;
    ring(&keeper, "c1").await;
    provider(&keeper, answer("c1"));

    authority.gate("set_muted");
    authority.reject("set_muted", AuthorityError::rejected("too late"));
    let pending = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.set_muted("c1", true).await })
    };
    wait_for_request(&authority, "set_muted").await;

    // The identifier is ended and reused while the mute is outstanding
    keeper.end_call("c1", None).await.unwrap();
    ring(&keeper, "c1").await;
    let mut events = keeper.subscribe();
    events.drain();

    authority.release();
    assert!(matches!(
        pending.await.unwrap(),
        Err(CallKeepError::ActionRejected { .. })
    ));

    let call = keeper.get_call("c1").unwrap();
    assert_eq!(call.state, CallState::Ringing);
    assert!(!call.is_muted);
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn test_rejected_mute_does_not_undo_accepted_hold() {
    let (keeper, authority) = keeper().await;
    ring(&keeper, "c1").await;
    provider(&keeper, answer("c1"));
    let mut events = keeper.subscribe();
    events.drain();

    authority.gate("set_muted");
    authority.reject("set_muted", AuthorityError::rejected("denied"));
    let pending = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.set_muted("c1", true).await })
    };
    wait_for_request(&authority, "set_muted").await;

    keeper.set_held("c1", true).await.unwrap();
    authority.release();
    assert!(matches!(
        pending.await.unwrap(),
        Err(CallKeepError::ActionRejected { .. })
    ));

    let call = keeper.get_call("c1").unwrap();
    assert_eq!(call.state, CallState::Held);
    assert!(call.is_held);
    assert!(!call.is_muted);
    assert_eq!(
        authority.request_names(),
        vec!["report_incoming_call", "set_muted", "set_held"]
    );
    assert_eq!(
        drain_kinds(&mut events),
        vec![
            EventKind::DidPerformSetMutedCallAction,
            EventKind::DidToggleHoldAction,
            EventKind::ActionRejected,
        ]
    );
}

#[tokio::test]
async fn test_rejected_mute_does_not_undo_connect() {
    let (keeper, authority) = keeper().await;
    keeper
        .start_call(OutgoingCall::new("o1", "bob"))
        .await
        .unwrap();

    authority.gate("set_muted");
    authority.reject("set_muted", AuthorityError::rejected("denied"));
    let pending = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.set_muted("o1", true).await })
    };
    wait_for_request(&authority, "set_muted").await;

    keeper.report_connected_outgoing_call("o1").await.unwrap();
    authority.release();
    assert!(pending.await.unwrap().is_err());

    let call = keeper.get_call("o1").unwrap();
    assert_eq!(call.state, CallState::Active);
    assert!(call.has_connected);
    assert!(!call.is_muted);
    assert!(keeper.is_call_active("o1"));
    assert_eq!(
        keeper.stats().pending_audio_call,
        Some("o1".parse().unwrap())
    );
}

#[tokio::test]
async fn test_rejected_hold_overtaken_by_resume_stays_resumed() {
    let (keeper, authority) = keeper().await;
    ring(&keeper, "c1").await;
    provider(&keeper, answer("c1"));

    authority.gate("set_held");
    let hold = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.set_held("c1", true).await })
    };
    wait_for_request(&authority, "set_held").await;
    assert_eq!(keeper.get_call("c1").unwrap().state, CallState::Held);

    // The authority resumes the call itself while the hold is outstanding
    provider(
        &keeper,
        ProviderAction::SetHeld {
            call_id: "c1".parse().unwrap(),
            held: false,
        },
    );
    authority.reject("set_held", AuthorityError::rejected("denied"));
    authority.release();
    assert!(hold.await.unwrap().is_err());
    assert_eq!(keeper.get_call("c1").unwrap().state, CallState::Active);
}

#[tokio::test]
async fn test_echo_of_pending_end_is_fulfilled() {
    let (keeper, authority) = keeper().await;
    ring(&keeper, "c1").await;

    authority.gate("end_call");
    let pending = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.end_call("c1", None).await })
    };
    wait_for_request(&authority, "end_call").await;

    let mut events = keeper.subscribe();
    events.drain();
    let outcome = provider(
        &keeper,
        ProviderAction::End {
            call_id: "c1".parse().unwrap(),
        },
    );
    assert_eq!(outcome, ActionOutcome::Fulfilled);
    assert!(events.drain().is_empty());

    authority.release();
    pending.await.unwrap().unwrap();
    assert!(keeper.get_calls().is_empty());
}

#[tokio::test]
async fn test_echoed_dtmf_is_not_published_twice() {
    let (keeper, authority) = keeper().await;
    ring(&keeper, "c1").await;
    provider(&keeper, answer("c1"));
    let mut events = keeper.subscribe();
    events.drain();

    authority.gate("play_dtmf");
    let pending = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.send_dtmf("c1", "42").await })
    };
    wait_for_request(&authority, "play_dtmf").await;

    let outcome = provider(
        &keeper,
        ProviderAction::PlayDtmf {
            call_id: "c1".parse().unwrap(),
            digits: "42".to_string(),
        },
    );
    assert_eq!(outcome, ActionOutcome::Fulfilled);
    authority.release();
    pending.await.unwrap().unwrap();

    assert_eq!(drain_kinds(&mut events), vec![EventKind::DidPerformDTMFAction]);
}

#[tokio::test]
async fn test_translator_loop_processes_posted_actions() {
    let (keeper, _authority) = keeper().await;
    let handle = keeper.provider_handle();
    assert!(matches!(
        handle.post(ProviderAction::CheckReachability),
        Err(CallKeepError::NotRunning)
    ));

    keeper.start().await.unwrap();
    assert!(keeper.is_running());
    ring(&keeper, "c1").await;

    let outcome = timeout(Duration::from_secs(5), handle.post(answer("c1")).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ActionOutcome::Fulfilled);
    assert!(keeper.is_call_active("c1"));

    keeper.stop().await.unwrap();
    assert!(!keeper.stats().is_running);
    assert!(matches!(
        handle.post(ProviderAction::CheckReachability),
        Err(CallKeepError::NotRunning)
    ));

    // Restarting reuses the same channel, so old handles keep working
    keeper.start().await.unwrap();
    let outcome = timeout(
        Duration::from_secs(5),
        handle.post(ProviderAction::End { call_id: "c1".parse().unwrap() }).unwrap(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(outcome, ActionOutcome::Fulfilled);
    assert!(!keeper.is_call_active("c1"));
    keeper.stop().await.unwrap();
}

#[tokio::test]
async fn test_setup_forwards_configuration() {
    let (keeper, authority) = keeper().await;
    let config = authority.last_config().unwrap();
    assert_eq!(config.app_name, "TestPhone");
    assert_eq!(keeper.config(), Some(config));

    authority.set_offline("no call service");
    let err = keeper
        .setup(rvoip_callkeep_core::ProviderConfig::new("Other"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallKeepError::AuthorityFailure { .. }));
    assert_eq!(keeper.config().unwrap().app_name, "TestPhone");
}
