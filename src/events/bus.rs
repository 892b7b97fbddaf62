//! Event Bus
//!
//! Topic-based publish/subscribe with a single global FIFO queue.
//!
//! ## Delivery
//!
//! `publish` enqueues and returns immediately. One dispatch task, spawned on
//! the Tokio runtime when the bus is created, drains the queue in enqueue
//! order (across all topics) and runs the callbacks of each event in
//! subscription order.
//!
//! A callback that returns an error or panics is reported on the
//! `error_occurred` topic; the remaining callbacks for the event still run.
//! Failures of `error_occurred` subscribers themselves are only logged.
//!
//! Unsubscribing takes effect immediately: a removed callback is skipped for
//! every event it has not been handed yet, including the one currently being
//! dispatched.

use super::event::{topics, Event};
use crate::error::Result;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Subscriber callback
pub type EventCallback = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: String,
}

impl SubscriptionHandle {
    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Bus-unique subscription id
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: EventCallback,
}

type SubscriberMap = HashMap<String, Vec<Subscriber>>;

enum Envelope {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

/// Publish/subscribe event bus
///
/// Construct one per process (or one per test) and share it by `Arc`.
pub struct EventBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus and spawn its dispatch task.
    ///
    /// Must be called from within a Tokio runtime. The dispatch task exits
    /// once the bus is dropped and the queue is drained.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers = Arc::new(RwLock::new(SubscriberMap::new()));
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(Self::dispatch_loop(
            rx,
            tx.downgrade(),
            Arc::clone(&subscribers),
            Arc::clone(&pending),
        ));

        info!("EventBus created");

        Arc::new(Self {
            subscribers,
            tx,
            pending,
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe a callback to a topic
    ///
    /// Callbacks on the same topic run in the order they subscribed.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            id,
            active: Arc::new(AtomicBool::new(true)),
            callback: Arc::new(callback),
        };

        let mut map = write_map(&self.subscribers);
        let list = map.entry(topic.to_string()).or_default();
        list.push(subscriber);

        debug!(
            "Subscriber {} added to '{}' ({} total)",
            id,
            topic,
            list.len()
        );

        SubscriptionHandle {
            id,
            topic: topic.to_string(),
        }
    }

    /// Remove a subscription
    ///
    /// Returns `false` if the handle was already removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut map = write_map(&self.subscribers);

        let Some(list) = map.get_mut(&handle.topic) else {
            return false;
        };
        let Some(pos) = list.iter().position(|s| s.id == handle.id) else {
            return false;
        };

        let removed = list.remove(pos);
        removed.active.store(false, Ordering::Release);
        if list.is_empty() {
            map.remove(&handle.topic);
        }

        debug!("Subscriber {} removed from '{}'", handle.id, handle.topic);
        true
    }

    /// Publish a payload on a topic
    pub fn publish(&self, topic: &str, payload: Value) {
        self.publish_event(Event::new(topic, payload));
    }

    /// Publish a prebuilt event. Never waits on subscribers.
    pub fn publish_event(&self, event: Event) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::error::SendError(envelope)) = self.tx.send(Envelope::Event(event)) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            if let Envelope::Event(event) = envelope {
                warn!(
                    "Dispatch loop is gone, event '{}' not delivered",
                    event.topic
                );
            }
        }
    }

    /// Wait until every event enqueued before this call has been dispatched
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Number of events enqueued but not yet dispatched
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of active subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        read_map(&self.subscribers)
            .get(topic)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Topics with at least one subscriber
    pub fn topics(&self) -> Vec<String> {
        read_map(&self.subscribers).keys().cloned().collect()
    }

    /// Drop every subscriber of a topic; returns how many were removed
    pub fn clear_topic(&self, topic: &str) -> usize {
        let removed = write_map(&self.subscribers)
            .remove(topic)
            .unwrap_or_default();
        for subscriber in &removed {
            subscriber.active.store(false, Ordering::Release);
        }
        if !removed.is_empty() {
            info!("Removed {} subscribers from '{}'", removed.len(), topic);
        }
        removed.len()
    }

    /// Drop every subscriber on every topic; returns how many were removed
    pub fn clear_all(&self) -> usize {
        let removed: Vec<Subscriber> = write_map(&self.subscribers)
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        for subscriber in &removed {
            subscriber.active.store(false, Ordering::Release);
        }
        info!("Removed all {} subscribers", removed.len());
        removed.len()
    }

    async fn dispatch_loop(
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        requeue: mpsc::WeakUnboundedSender<Envelope>,
        subscribers: Arc<RwLock<SubscriberMap>>,
        pending: Arc<AtomicUsize>,
    ) {
        debug!("EventBus dispatch loop started");

        while let Some(envelope) = rx.recv().await {
            let event = match envelope {
                Envelope::Event(event) => event,
                Envelope::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
            };

            let failures = Self::dispatch(&subscribers, &event);
            pending.fetch_sub(1, Ordering::AcqRel);

            for message in failures {
                if event.is_topic(topics::ERROR_OCCURRED) {
                    error!("error_occurred subscriber failed: {}", message);
                    continue;
                }

                warn!("{}", message);
                let report = Event::error_occurred(event.device_id(), message);
                match requeue.upgrade() {
                    Some(tx) => {
                        pending.fetch_add(1, Ordering::AcqRel);
                        if tx.send(Envelope::Event(report)).is_err() {
                            pending.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                    None => error!("EventBus dropped, cannot report: {}", report.payload),
                }
            }
        }

        debug!("EventBus dispatch loop stopped");
    }

    /// Run one event through its topic's subscribers; returns failure messages
    fn dispatch(subscribers: &RwLock<SubscriberMap>, event: &Event) -> Vec<String> {
        let snapshot: Vec<Subscriber> = read_map(subscribers)
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();

        let mut failures = Vec::new();

        for subscriber in snapshot {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(format!(
                    "Subscriber {} of '{}' failed: {}",
                    subscriber.id, event.topic, e
                )),
                Err(panic) => failures.push(format!(
                    "Subscriber {} of '{}' panicked: {}",
                    subscriber.id,
                    event.topic,
                    panic_message(panic.as_ref())
                )),
            }
        }

        failures
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn read_map(lock: &RwLock<SubscriberMap>) -> std::sync::RwLockReadGuard<'_, SubscriberMap> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_map(lock: &RwLock<SubscriberMap>) -> std::sync::RwLockWriteGuard<'_, SubscriberMap> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = read_map(&self.subscribers);
        f.debug_struct("EventBus")
            .field("topics", &map.len())
            .field("subscribers", &map.values().map(|l| l.len()).sum::<usize>())
            .field("pending", &self.pending())
            .finish()
    }
}
