//! In-process call authority for simulator and test environments
//!
//! Accepts everything by default and records each request. Individual
//! request kinds can be scripted to fail, the whole authority can be taken
//! offline, and replies can be held back until released to reproduce late
//! acknowledgments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{AuthorityRequest, CallAuthority};
use crate::config::ProviderConfig;
use crate::error::AuthorityError;

#[derive(Default)]
struct SimulatedState {
    requests: Vec<AuthorityRequest>,
    configured: Vec<ProviderConfig>,
    /// Request name -> error returned for the next matching requests
    failures: HashMap<&'static str, AuthorityError>,
    offline: Option<String>,
    /// Request names whose replies wait for `release`
    gated: Vec<&'static str>,
}

/// A [`CallAuthority`] that lives entirely in memory
#[derive(Clone, Default)]
pub struct SimulatedAuthority {
    state: Arc<Mutex<SimulatedState>>,
    gate: Arc<Notify>,
}

impl std::fmt::Debug for SimulatedAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedAuthority")
            .field("requests", &state.requests.len())
            .field("offline", &state.offline)
            .finish()
    }
}

impl SimulatedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request named `request` (see [`AuthorityRequest::name`])
    /// with `error` until [`accept`](Self::accept) is called.
    pub fn reject(&self, request: &'static str, error: AuthorityError) {
        self.state.lock().failures.insert(request, error);
    }

    pub fn accept(&self, request: &'static str) {
        self.state.lock().failures.remove(request);
    }

    /// Fail every request as unreachable
    pub fn set_offline(&self, reason: impl Into<String>) {
        self.state.lock().offline = Some(reason.into());
    }

    pub fn set_online(&self) {
        self.state.lock().offline = None;
    }

    /// Hold replies to requests named `request` until [`release`](Self::release)
    pub fn gate(&self, request: &'static str) {
        self.state.lock().gated.push(request);
    }

    /// Let held replies to requests named `request` through
    pub fn open(&self, request: &'static str) {
        self.state.lock().gated.retain(|name| *name != request);
        self.gate.notify_waiters();
    }

    /// Let every held reply through
    pub fn release(&self) {
        self.state.lock().gated.clear();
        self.gate.notify_waiters();
    }

    pub fn requests(&self) -> Vec<AuthorityRequest> {
        self.state.lock().requests.clone()
    }

    /// Names of the recorded requests, in order
    pub fn request_names(&self) -> Vec<&'static str> {
        self.state.lock().requests.iter().map(|r| r.name()).collect()
    }

    pub fn last_config(&self) -> Option<ProviderConfig> {
        self.state.lock().configured.last().cloned()
    }

    fn outcome(&self, name: &'static str) -> Result<(), AuthorityError> {
        let state = self.state.lock();
        if let Some(reason) = &state.offline {
            return Err(AuthorityError::Unavailable(reason.clone()));
        }
        match state.failures.get(name) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn wait_for_gate(&self, name: &'static str) {
        loop {
            let notified = self.gate.notified();
            if !self.state.lock().gated.contains(&name) {
                return;
            }
            debug!(request = name, "Holding simulated reply");
            notified.await;
        }
    }
}

#[async_trait]
impl CallAuthority for SimulatedAuthority {
    async fn configure(&self, config: &ProviderConfig) -> Result<(), AuthorityError> {
        if let Some(reason) = &self.state.lock().offline {
            return Err(AuthorityError::Unavailable(reason.clone()));
        }
        self.state.lock().configured.push(config.clone());
        Ok(())
    }

    async fn request(&self, request: AuthorityRequest) -> Result<(), AuthorityError> {
        let name = request.name();
        debug!(request = name, call_id = ?request.call_id(), "Simulated authority request");
        self.state.lock().requests.push(request);
        self.wait_for_gate(name).await;
        self.outcome(name)
    }
}
