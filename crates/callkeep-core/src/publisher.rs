//! Ordered event delivery with a pre-subscription backlog
//!
//! [`EventPublisher`] stamps every event with the next sequence number and
//! hands it to each attached subscriber over an unbounded channel, so a slow
//! subscriber never blocks the publishing side. Events published while
//! nobody is attached wait in a backlog; the first subscriber to attach
//! receives the whole backlog, in order, before any later event.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::events::{CallEvent, EventFilter, PublishedEvent};

struct Subscriber {
    id: Uuid,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<PublishedEvent>,
}

#[derive(Default)]
struct PublisherInner {
    next_sequence: u64,
    backlog: VecDeque<PublishedEvent>,
    subscribers: Vec<Subscriber>,
}

/// Fan-out of [`CallEvent`]s to subscribers
#[derive(Default)]
pub struct EventPublisher {
    inner: Mutex<PublisherInner>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventPublisher")
            .field("next_sequence", &inner.next_sequence)
            .field("backlog", &inner.backlog.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event and return its sequence number.
    ///
    /// Never blocks on subscribers.
    pub fn publish(&self, event: CallEvent) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let published = PublishedEvent {
            sequence: inner.next_sequence,
            timestamp: Utc::now(),
            event,
        };
        debug!(sequence = published.sequence, kind = ?published.kind(), "Publishing event");

        inner.subscribers.retain(|s| !s.tx.is_closed());
        if inner.subscribers.is_empty() {
            trace!(sequence = published.sequence, "No subscribers, buffering event");
            inner.backlog.push_back(published.clone());
            return published.sequence;
        }

        let sequence = published.sequence;
        inner.subscribers.retain(|subscriber| {
            if !subscriber.filter.matches(&published.event) {
                return true;
            }
            subscriber.tx.send(published.clone()).is_ok()
        });
        if inner.subscribers.is_empty() {
            inner.backlog.push_back(published);
        }
        sequence
    }

    /// Attach a subscriber receiving every event
    pub fn subscribe(&self) -> EventSubscription {
        self.subscribe_filtered(EventFilter::all())
    }

    /// Attach a subscriber receiving the events that match `filter`.
    ///
    /// A backlog left from before any subscriber attached is replayed to this
    /// subscriber first and then discarded.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut inner = self.inner.lock();
        let replayed = inner.backlog.len();
        for published in inner.backlog.drain(..) {
            if filter.matches(&published.event) {
                // The receiver is still in scope
                let _ = tx.send(published);
            }
        }
        inner.subscribers.push(Subscriber { id, filter, tx });
        debug!(subscription = %id, replayed, "Subscriber attached");

        EventSubscription { id, rx }
    }

    /// Detach a subscriber. Dropping the [`EventSubscription`] has the same
    /// effect on the next publish.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        inner.subscribers.len() != before
    }

    /// Events waiting for the first subscriber
    pub fn initial_events(&self) -> Vec<PublishedEvent> {
        self.inner.lock().backlog.iter().cloned().collect()
    }

    pub fn clear_initial_events(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.backlog.len();
        inner.backlog.clear();
        debug!(dropped, "Cleared initial events");
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    /// Sequence number of the most recent event, 0 before the first
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().next_sequence
    }
}

/// Receiving side of a subscription
#[derive(Debug)]
pub struct EventSubscription {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<PublishedEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. Returns `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<PublishedEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<PublishedEvent> {
        self.rx.try_recv().ok()
    }

    /// Every event queued right now
    pub fn drain(&mut self) -> Vec<PublishedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
