//! SSE Hub component (spec.md §4.D).

pub mod hub;
pub mod subscriber;

pub use hub::SseHub;
pub use subscriber::{SubscriberFilter, SubscriberId};

use std::time::Duration;

use crate::store::GatewayEvent;

/// Heartbeat interval for idle SSE connections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Frames `event` as a single SSE message: `event: gateway_event\ndata: <json>\n\n`.
#[must_use]
pub fn frame_event(event: &GatewayEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: gateway_event\ndata: {json}\n\n")
}

/// The welcome frame sent immediately on subscriber attach.
pub const WELCOME_FRAME: &str = ": connected\n\n";

/// The heartbeat frame sent every [`HEARTBEAT_INTERVAL`] with no other traffic.
pub const HEARTBEAT_FRAME: &str = ": ping\n\n";
