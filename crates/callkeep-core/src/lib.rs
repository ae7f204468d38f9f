//! # RVOIP CallKeep Core
//!
//! Call state coordinator that bridges an application to the operating
//! system's native call-management authority.
//!
//! The coordinator keeps the registry of calls, runs each call through its
//! state machine, reconciles authority-initiated actions with
//! application-initiated ones, tracks the audio session handshake and
//! republishes everything as ordered, typed events.
//!
//! ```text
//!  application ──commands──► CallKeeper ──► ActionTranslator ──requests──► CallAuthority
//!       ▲                                     │       ▲                          │
//!       │                                     ▼       └──(ProviderAction, ack)───┘
//!       └──────── EventSubscription ◄── EventPublisher ◄── CallRegistry / AudioSessionCoordinator
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rvoip_callkeep_core::{CallKeeperBuilder, EndReason, ProviderConfig, SimulatedAuthority};
//! use rvoip_callkeep_core::coordinator::OutgoingCall;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keeper = CallKeeperBuilder::new()
//!     .authority(SimulatedAuthority::new())
//!     .provider_config(ProviderConfig::new("Softphone").with_call_groups(1, 2))
//!     .auto_start()
//!     .build()
//!     .await?;
//!
//! keeper.start_call(OutgoingCall::new("c2", "bob@example.com")).await?;
//! keeper.report_connected_outgoing_call("c2").await?;
//! keeper.set_muted("c2", true).await?;
//! keeper.end_call("c2", Some(EndReason::RemoteEnded)).await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod authority;
pub mod call;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod publisher;
pub mod registry;
pub mod translator;

// Public API exports
pub use audio::{AudioSessionCoordinator, AudioSessionState};
pub use authority::{
    ActionAck, ActionOutcome, AuthorityRequest, CallAuthority, ProviderAction, SimulatedAuthority,
};
pub use call::{
    CallCapabilities, CallDirection, CallId, CallInfo, CallState, EndReason, HandleType,
};
pub use config::ProviderConfig;
pub use coordinator::{
    CallKeeper, CallKeeperBuilder, CallKeeperStats, IncomingCall, OutgoingCall, ProviderHandle,
};
pub use error::{AuthorityError, CallKeepError, CallKeepResult};
pub use events::{CallEvent, EventFilter, EventKind, PublishedEvent};
pub use logging::{setup_logging, LoggingConfig};
pub use publisher::{EventPublisher, EventSubscription};
pub use registry::{CallRegistry, Revert};

/// CallKeep-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
