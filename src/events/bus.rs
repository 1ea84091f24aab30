//! In-process publish/subscribe bus
//!
//! # Consistency
//!
//! Delivery has no acknowledgement, retry or persistence. A crash between a
//! durable write and `emit`, or between `emit` and a listener finishing, leaves
//! the read model stale for that entity until its next mutation event or the
//! next full rebuild. TTL expiry on projection entries bounds how long that
//! staleness is served.
//!
//! Handlers for a topic run in registration order. Each runs inside a guard
//! that turns an error or a panic into a warning, so one failing listener
//! never stops the others and never reaches the emitter.
//!
//! Detached deliveries go through one worker task per bus and complete in
//! emit order. Listeners must not `request()` from inside a detached
//! delivery: the response would queue behind them.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

use super::{DomainEvent, EventHandler, Topic};

struct Waiter {
    topic: Topic,
    tx: oneshot::Sender<DomainEvent>,
}

struct Delivery {
    event: DomainEvent,
    handlers: Vec<Arc<dyn EventHandler>>,
}

#[derive(Default)]
struct Progress {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Progress {
    fn finish(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct Inner {
    handlers: RwLock<HashMap<Topic, Vec<Arc<dyn EventHandler>>>>,
    waiters: Mutex<HashMap<Uuid, Waiter>>,
    await_listeners: bool,
    progress: Arc<Progress>,
    // Started on first detached emit, so construction needs no runtime
    queue: OnceLock<mpsc::UnboundedSender<Delivery>>,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// `await_listeners = false` detaches delivery onto the bus worker task
    pub fn new(await_listeners: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                waiters: Mutex::new(HashMap::new()),
                await_listeners,
                progress: Arc::new(Progress::default()),
                queue: OnceLock::new(),
            }),
        }
    }

    pub fn awaits_listeners(&self) -> bool {
        self.inner.await_listeners
    }

    /// Subscribe a handler to a topic
    pub fn on(&self, topic: Topic, handler: Arc<dyn EventHandler>) {
        tracing::debug!("Subscribing {} to {}", handler.name(), topic);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, topic: Topic) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Publish an event to every handler of its topic
    pub async fn emit(&self, event: DomainEvent) {
        let topic = event.topic();
        metrics::counter!("events_emitted_total", "topic" => topic.as_str()).increment(1);

        self.resolve_waiter(&event);

        // Copy the table out so handlers may subscribe or emit while running
        let handlers = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!("No listeners for {}", topic);
            return;
        }

        if self.inner.await_listeners {
            deliver(&event, &handlers).await;
            return;
        }

        self.inner.progress.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.queue().send(Delivery { event, handlers }).is_err() {
            tracing::warn!("Event worker stopped, dropping {}", topic);
            self.inner.progress.finish();
        }
    }

    fn queue(&self) -> &mpsc::UnboundedSender<Delivery> {
        self.inner.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(drain(rx, self.inner.progress.clone()));
            tx
        })
    }

    /// Detached deliveries not yet finished
    pub fn in_flight(&self) -> usize {
        self.inner.progress.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every detached delivery, including ones they triggered, is done
    pub async fn settle(&self) {
        loop {
            let idle = self.inner.progress.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Emit a correlated request and wait for the matching event on
    /// `response_topic`. `None` on timeout.
    pub async fn request(
        &self,
        event: DomainEvent,
        response_topic: Topic,
        timeout: Duration,
    ) -> Option<DomainEvent> {
        let Some(correlation_id) = event.correlation_id() else {
            tracing::warn!("Request on {} has no correlation id", event.topic());
            return None;
        };

        let (tx, rx) = oneshot::channel();
        self.waiters().insert(correlation_id, Waiter { topic: response_topic, tx });

        self.emit(event).await;
        let response = tokio::time::timeout(timeout, rx).await;
        self.waiters().remove(&correlation_id);

        match response {
            Ok(Ok(event)) => Some(event),
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!("No {} for {} within {:?}", response_topic, correlation_id, timeout);
                None
            }
        }
    }

    fn waiters(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Waiter>> {
        self.inner.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_waiter(&self, event: &DomainEvent) {
        let Some(correlation_id) = event.correlation_id() else {
            return;
        };
        let mut waiters = self.waiters();
        let matches = waiters
            .get(&correlation_id)
            .is_some_and(|w| w.topic == event.topic());
        if matches {
            if let Some(waiter) = waiters.remove(&correlation_id) {
                let _ = waiter.tx.send(event.clone());
            }
        }
    }
}

/// Bus worker: runs queued deliveries one at a time until the bus is dropped
async fn drain(mut rx: mpsc::UnboundedReceiver<Delivery>, progress: Arc<Progress>) {
    while let Some(delivery) = rx.recv().await {
        deliver(&delivery.event, &delivery.handlers).await;
        progress.finish();
    }
}

async fn deliver(event: &DomainEvent, handlers: &[Arc<dyn EventHandler>]) {
    let topic = event.topic();
    for handler in handlers {
        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::counter!("event_listener_failures_total", "topic" => topic.as_str()).increment(1);
                tracing::warn!("Listener {} failed on {}: {}", handler.name(), topic, e);
            }
            Err(_) => {
                metrics::counter!("event_listener_failures_total", "topic" => topic.as_str()).increment(1);
                tracing::warn!("Listener {} panicked on {}", handler.name(), topic);
            }
        }
    }
}
