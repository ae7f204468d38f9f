//! Provider configuration
//!
//! [`ProviderConfig`] carries the options an application passes to
//! `setup`. It can be built in code with the `with_*` methods or loaded from
//! TOML:
//!
//! ```toml
//! app_name = "Softphone"
//! ringtone_sound = "ring.caf"
//! supports_video = true
//! maximum_call_groups = 1
//! maximum_calls_per_group = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::call::HandleType;
use crate::error::{CallKeepError, CallKeepResult};

/// Options handed to the call authority on `setup`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Name shown by the system call UI
    pub app_name: String,
    /// Template image for the system call UI
    pub image_name: Option<String>,
    pub ringtone_sound: Option<String>,
    pub supports_video: bool,
    pub maximum_call_groups: usize,
    pub maximum_calls_per_group: usize,
    pub includes_calls_in_recents: bool,
    pub supported_handle_types: Vec<HandleType>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            image_name: None,
            ringtone_sound: None,
            supports_video: false,
            maximum_call_groups: 2,
            maximum_calls_per_group: 5,
            includes_calls_in_recents: true,
            supported_handle_types: HandleType::ALL.to_vec(),
        }
    }
}

impl ProviderConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    pub fn with_image_name(mut self, image_name: impl Into<String>) -> Self {
        self.image_name = Some(image_name.into());
        self
    }

    pub fn with_ringtone_sound(mut self, sound: impl Into<String>) -> Self {
        self.ringtone_sound = Some(sound.into());
        self
    }

    pub fn with_video(mut self, supports_video: bool) -> Self {
        self.supports_video = supports_video;
        self
    }

    pub fn with_call_groups(mut self, groups: usize, calls_per_group: usize) -> Self {
        self.maximum_call_groups = groups;
        self.maximum_calls_per_group = calls_per_group;
        self
    }

    pub fn with_calls_in_recents(mut self, include: bool) -> Self {
        self.includes_calls_in_recents = include;
        self
    }

    pub fn with_handle_types(mut self, handle_types: Vec<HandleType>) -> Self {
        self.supported_handle_types = handle_types;
        self
    }

    /// Upper bound on calls that may be live at once
    pub fn max_calls(&self) -> usize {
        self.maximum_call_groups
            .saturating_mul(self.maximum_calls_per_group)
    }

    pub fn validate(&self) -> CallKeepResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(CallKeepError::invalid_configuration(
                "app_name",
                "must not be empty",
            ));
        }
        if self.maximum_call_groups == 0 {
            return Err(CallKeepError::invalid_configuration(
                "maximum_call_groups",
                "must be at least 1",
            ));
        }
        if self.maximum_calls_per_group == 0 {
            return Err(CallKeepError::invalid_configuration(
                "maximum_calls_per_group",
                "must be at least 1",
            ));
        }
        if self.supported_handle_types.is_empty() {
            return Err(CallKeepError::invalid_configuration(
                "supported_handle_types",
                "at least one handle type is required",
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> CallKeepResult<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| CallKeepError::invalid_configuration("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> CallKeepResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CallKeepError::invalid_configuration(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&contents)
    }
}
