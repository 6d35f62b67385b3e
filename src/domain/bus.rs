//! Telemetry Bus
//!
//! Typed publish/subscribe for session events.
//!
//! Every subscriber owns a bounded queue drained by its own Tokio task, so
//! `publish` never waits on a handler. A handler that errors or panics is
//! logged and skipped; other subscribers still receive the event.

use crate::domain::models::{EventKind, SessionEvent};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub type EventHandler = Arc<dyn Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

thread_local! {
    // Subscription whose handler is running on this thread, if any.
    static DISPATCHING: Cell<Option<u64>> = const { Cell::new(None) };
}

struct Slot {
    id: u64,
    filter: Option<EventKind>,
    handler: EventHandler,
    active: AtomicBool,
    // Held for the duration of every handler call.
    invoke_lock: Mutex<()>,
}

struct Subscriber {
    slot: Arc<Slot>,
    queue: mpsc::Sender<SessionEvent>,
}

struct BusInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

#[derive(Clone)]
pub struct TelemetryBus {
    inner: Arc<BusInner>,
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl TelemetryBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a handler for one event kind.
    ///
    /// Must be called from within a Tokio runtime: the subscriber's
    /// delivery task is spawned here.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, filter: Option<EventKind>, handler: EventHandler) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::channel(self.inner.queue_capacity);
        let slot = Arc::new(Slot {
            id,
            filter,
            handler,
            active: AtomicBool::new(true),
            invoke_lock: Mutex::new(()),
        });

        self.inner.subscribers.write().insert(
            id,
            Subscriber {
                slot: slot.clone(),
                queue,
            },
        );
        tokio::spawn(deliver(slot, rx));

        debug!("Subscription {} registered for {:?}", id, filter);
        SubscriptionHandle(id)
    }

    /// Remove a subscription.
    ///
    /// No invocation of the handler starts after this returns. Called from
    /// outside any handler, it also waits for a running call to finish.
    /// Called from inside a handler (its own or another's) it returns at
    /// once, so handlers removing each other cannot deadlock.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.inner.subscribers.write().remove(&handle.0);
        let Some(subscriber) = removed else {
            return false;
        };
        let slot = subscriber.slot;
        slot.active.store(false, Ordering::Release);

        let inside_handler = DISPATCHING.with(|current| current.get().is_some());
        if !inside_handler {
            drop(slot.invoke_lock.lock());
        }
        debug!("Subscription {} removed", slot.id);
        true
    }

    /// Queue an event for every matching subscriber. Never blocks.
    pub fn publish(&self, event: SessionEvent) {
        let kind = event.kind();
        let subscribers = self.inner.subscribers.read();
        for subscriber in subscribers.values() {
            if subscriber.slot.filter.is_some_and(|filter| filter != kind) {
                continue;
            }
            match subscriber.queue.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber {} is lagging, dropped {:?} event",
                        subscriber.slot.id, kind
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Subscriber {} queue closed", subscriber.slot.id);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

async fn deliver(slot: Arc<Slot>, mut rx: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let _guard = slot.invoke_lock.lock();
        if !slot.active.load(Ordering::Acquire) {
            break;
        }

        DISPATCHING.with(|current| current.set(Some(slot.id)));
        let outcome = catch_unwind(AssertUnwindSafe(|| (slot.handler)(&event)));
        DISPATCHING.with(|current| current.set(None));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "Subscriber {} failed to handle {:?}: {}",
                slot.id,
                event.kind(),
                e
            ),
            Err(_) => error!(
                "Subscriber {} panicked while handling {:?}",
                slot.id,
                event.kind()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConnectionState, RadioPowerState};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_only_its_kind() {
        let bus = TelemetryBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(EventKind::Disconnected, move |event| {
            tx.send(event.clone())?;
            Ok(())
        });

        bus.publish(SessionEvent::StateChanged(ConnectionState::Ready));
        bus.publish(SessionEvent::Disconnected);

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(SessionEvent::Disconnected));
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = TelemetryBus::default();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.subscribe_all(|_| anyhow::bail!("handler error"));
        bus.subscribe_all(|_| panic!("handler panic"));
        let counter = delivered.clone();
        bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(SessionEvent::Disconnected);
        bus.publish(SessionEvent::RadioStateChanged(RadioPowerState::PoweredOn));
        settle().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count(), 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_inside_own_handler_stops_delivery() {
        let bus = TelemetryBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle_cell: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let handler_bus = bus.clone();
        let handler_calls = calls.clone();
        let handler_cell = handle_cell.clone();
        let handle = bus.subscribe_all(move |_| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = *handler_cell.lock() {
                handler_bus.unsubscribe(handle);
            }
            Ok(())
        });
        *handle_cell.lock() = Some(handle);

        for _ in 0..5 {
            bus.publish(SessionEvent::Disconnected);
        }
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handlers_unsubscribing_each_other_do_not_deadlock() {
        let bus = TelemetryBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let handles: Arc<Mutex<Vec<SubscriptionHandle>>> = Arc::new(Mutex::new(Vec::new()));

        for index in 0..2usize {
            let handler_bus = bus.clone();
            let calls = calls.clone();
            let running = running.clone();
            let handler_handles = handles.clone();
            let handle = bus.subscribe_all(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                // Hold both handlers inside dispatch at the same time.
                running.fetch_add(1, Ordering::SeqCst);
                let deadline = std::time::Instant::now() + Duration::from_secs(1);
                while running.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
                    std::thread::yield_now();
                }
                let other = handler_handles.lock().get(1 - index).copied();
                if let Some(other) = other {
                    handler_bus.unsubscribe(other);
                }
                Ok(())
            });
            handles.lock().push(handle);
        }

        bus.publish(SessionEvent::Disconnected);
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let seen = calls.load(Ordering::SeqCst);
        bus.publish(SessionEvent::Disconnected);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let bus = TelemetryBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(SessionEvent::Disconnected);
        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        bus.publish(SessionEvent::Disconnected);
        settle().await;

        // The queued event may or may not have run before removal, never after.
        assert!(calls.load(Ordering::SeqCst) <= 1);
        let seen = calls.load(Ordering::SeqCst);
        bus.publish(SessionEvent::Disconnected);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_publish() {
        let bus = TelemetryBus::new(2);
        let fast_calls = Arc::new(AtomicUsize::new(0));

        // Never drained while the test publishes: the handler blocks on a channel.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        bus.subscribe_all(move |_| {
            let _ = release_rx.lock().recv_timeout(Duration::from_millis(50));
            Ok(())
        });
        let counter = fast_calls.clone();
        bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for _ in 0..10 {
            bus.publish(SessionEvent::Disconnected);
        }
        drop(release_tx);
        settle().await;
        assert!(fast_calls.load(Ordering::SeqCst) >= 1);
    }
}
