//! Builder for the call keeper

use std::sync::Arc;

use crate::authority::CallAuthority;
use crate::config::ProviderConfig;
use crate::error::{CallKeepError, CallKeepResult};

use super::CallKeeper;

/// Builder for creating a [`CallKeeper`]
#[derive(Default)]
pub struct CallKeeperBuilder {
    authority: Option<Arc<dyn CallAuthority>>,
    config: Option<ProviderConfig>,
    auto_start: bool,
}

impl CallKeeperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call authority requests are sent to
    pub fn authority(mut self, authority: impl CallAuthority + 'static) -> Self {
        self.authority = Some(Arc::new(authority));
        self
    }

    /// Use an authority that is already shared elsewhere
    pub fn shared_authority(mut self, authority: Arc<dyn CallAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Run `setup` with this configuration during `build`
    pub fn provider_config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Start the translator loop during `build`
    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    /// Build the call keeper
    pub async fn build(self) -> CallKeepResult<Arc<CallKeeper>> {
        let authority = self.authority.ok_or_else(|| {
            CallKeepError::invalid_configuration("authority", "an authority is required")
        })?;
        let keeper = Arc::new(CallKeeper::new(authority));

        if let Some(config) = self.config {
            keeper.setup(config).await?;
        }
        if self.auto_start {
            keeper.start().await?;
        }
        Ok(keeper)
    }
}
