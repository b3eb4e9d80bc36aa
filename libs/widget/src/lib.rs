//! Browser-side protocol engine for the support chat widget.
//!
//! The lifecycle itself is a deterministic state machine ([`lifecycle`]);
//! [`runner`] drives it over a real WebSocket with tokio timers.

pub mod lifecycle;
pub mod runner;

pub use lifecycle::{ChatLifecycle, Effect, Event, LifecycleState, TranscriptOrigin};
pub use runner::{Runner, TranscriptEntry, WidgetCommand, WidgetError};

use relay_common::id::{prefix, prefixed_ulid};

/// Generate a fresh browser client id. The caller is responsible for
/// persisting it (the browser build keeps it in local storage) so it
/// survives reconnects and page reloads.
pub fn generate_client_id() -> String {
    prefixed_ulid(prefix::CLIENT)
}
