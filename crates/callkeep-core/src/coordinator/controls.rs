//! In-call controls for the call keeper
//!
//! Hold, mute, DTMF, grouping and display updates. Each is applied locally,
//! published, and rolled back if the authority declines.

use crate::call::CallId;
use crate::error::CallKeepResult;

use super::CallKeeper;

impl CallKeeper {
    /// Put a call on hold (`true`) or resume it (`false`)
    pub async fn set_held(&self, call_id: &str, held: bool) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.set_held(&call_id, held).await
    }

    /// Mute or unmute. Rejected while the call is held.
    pub async fn set_muted(&self, call_id: &str, muted: bool) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.set_muted(&call_id, muted).await
    }

    /// Play DTMF digits on an active call. Empty digits are rejected.
    pub async fn send_dtmf(&self, call_id: &str, digits: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.send_dtmf(&call_id, digits).await
    }

    /// Merge the call into `group_id`
    pub async fn set_grouped(&self, call_id: &str, group_id: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        let group_id = CallId::parse(group_id)?;
        self.translator
            .set_group(&call_id, Some(group_id.to_string()))
            .await
    }

    /// Split the call out of its group
    pub async fn set_ungrouped(&self, call_id: &str) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator.set_group(&call_id, None).await
    }

    /// Change the caller name and/or handle the system UI shows
    pub async fn update_display(
        &self,
        call_id: &str,
        display_name: Option<String>,
        handle: Option<String>,
    ) -> CallKeepResult<()> {
        let call_id = CallId::parse(call_id)?;
        self.translator
            .update_display(&call_id, display_name, handle)
            .await
    }

    /// Answer a `CheckReachability` event
    pub async fn set_reachable(&self) -> CallKeepResult<()> {
        self.translator.set_reachable().await
    }
}
