//! Shared helpers for call keeper integration tests

#![allow(dead_code)]

use std::sync::Arc;

use rvoip_callkeep_core::{
    ActionAck, ActionOutcome, CallKeeper, CallKeeperBuilder, EventKind, EventSubscription,
    IncomingCall, ProviderAction, ProviderConfig, PublishedEvent, SimulatedAuthority,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rvoip_callkeep_core=debug")
        .with_test_writer()
        .try_init();
}

/// A configured keeper over a simulated authority (translator loop not started)
pub async fn keeper() -> (Arc<CallKeeper>, SimulatedAuthority) {
    keeper_with_config(ProviderConfig::new("TestPhone")).await
}

pub async fn keeper_with_config(config: ProviderConfig) -> (Arc<CallKeeper>, SimulatedAuthority) {
    init_tracing();
    let authority = SimulatedAuthority::new();
    let keeper = CallKeeperBuilder::new()
        .authority(authority.clone())
        .provider_config(config)
        .build()
        .await
        .expect("Failed to build call keeper");
    (keeper, authority)
}

pub async fn ring(keeper: &CallKeeper, call_id: &str) {
    keeper
        .report_new_incoming_call(IncomingCall::new(call_id, "+15551234"))
        .await
        .expect("Failed to report incoming call");
}

/// Deliver an authority callback inline and return its acknowledgment
pub fn provider(keeper: &CallKeeper, action: ProviderAction) -> ActionOutcome {
    let (ack, mut rx) = ActionAck::new();
    keeper.handle_provider_action(action, ack);
    rx.try_recv().expect("Action was not acknowledged")
}

pub fn answer(call_id: &str) -> ProviderAction {
    ProviderAction::Answer {
        call_id: call_id.parse().expect("valid call id"),
    }
}

pub fn kinds(events: &[PublishedEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind()).collect()
}

pub fn drain_kinds(subscription: &mut EventSubscription) -> Vec<EventKind> {
    kinds(&subscription.drain())
}
