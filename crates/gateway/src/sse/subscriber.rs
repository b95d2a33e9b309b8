//! SseSubscriber: one connected `/events/stream` client.

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::store::{EventKind, GatewayEvent};

/// Recommended outbound buffer depth per subscriber (spec.md §4.D).
pub const DEFAULT_BUFFER: usize = 256;

/// What a subscriber wants to see. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    pub kinds: HashSet<EventKind>,
    pub client_ids: HashSet<String>,
}

impl SubscriberFilter {
    /// A subscriber matches `event` iff (`kinds` empty OR contains the
    /// event's kind) AND (`client_ids` empty OR contains the event's
    /// `client_id`).
    #[must_use]
    pub fn matches(&self, event: &GatewayEvent) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&event.event_kind);
        let client_ok = self.client_ids.is_empty() || self.client_ids.contains(&event.client_id);
        kind_ok && client_ok
    }
}

/// Opaque handle returned to an HTTP handler; used only to detach. Breaks
/// the cyclic subscriber-holds-a-back-reference-to-the-hub shape in the
/// source by identifying subscribers with an integer id owned solely by
/// the hub, per spec.md §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// A live subscriber registration. The sender half of the channel is the
/// subscriber's outbound buffer; the hub owns it, the HTTP handler reads
/// from the matching receiver.
pub struct Subscriber {
    pub id: SubscriberId,
    pub filter: SubscriberFilter,
    pub sender: mpsc::Sender<GatewayEvent>,
}

/// Creates a subscriber's channel pair and its registration record.
#[must_use]
pub fn new_subscriber(id: SubscriberId, filter: SubscriberFilter) -> (Subscriber, mpsc::Receiver<GatewayEvent>) {
    let (tx, rx) = mpsc::channel(DEFAULT_BUFFER);
    (
        Subscriber {
            id,
            filter,
            sender: tx,
        },
        rx,
    )
}
