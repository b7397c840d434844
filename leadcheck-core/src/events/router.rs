use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::error::Result;

use super::types::{DomainEvent, EventEnvelope, EventId, EventName};

/// Consumer registered for one event name.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Label used in logs.
    fn label(&self) -> &str;

    /// Must be idempotent: the same envelope may be delivered more than once.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Sees every event before delivery; used to fire cancellation predicates.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn observe(&self, envelope: &EventEnvelope);
}

/// Publishing half of the router, handed to workflows.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<EventId>;

    async fn publish(&self, event: DomainEvent) -> Result<EventId> {
        self.publish_envelope(EventEnvelope::new(event)).await
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Total delivery attempts per handler when it fails transiently.
    pub delivery_attempts: u32,
    pub redelivery_delay_ms: u64,
    /// Capacity of the broadcast tap.
    pub tap_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            delivery_attempts: 3,
            redelivery_delay_ms: 1_000,
            tap_capacity: 1024,
        }
    }
}

/// At-least-once in-process router.
///
/// Each subscribed handler gets its own delivery task, so no ordering holds
/// between handlers or between events. A handler that fails transiently is
/// redelivered the same envelope.
pub struct InProcEventRouter {
    config: RouterConfig,
    handlers: RwLock<HashMap<EventName, Vec<Arc<dyn EventHandler>>>>,
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
    tap: broadcast::Sender<EventEnvelope>,
    deliveries: TaskTracker,
}

impl fmt::Debug for InProcEventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventRouter")
            .field("config", &self.config)
            .field("tap_subscribers", &self.tap.receiver_count())
            .field("in_flight", &self.deliveries.len())
            .finish()
    }
}

impl InProcEventRouter {
    pub fn new(config: RouterConfig) -> Self {
        let (tap, _) = broadcast::channel(config.tap_capacity.max(1));
        Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            tap,
            deliveries: TaskTracker::new(),
        }
    }

    pub async fn subscribe(&self, name: EventName, handler: Arc<dyn EventHandler>) {
        debug!(event = %name, handler = handler.label(), "subscribing handler");
        self.handlers
            .write()
            .await
            .entry(name)
            .or_default()
            .push(handler);
    }

    pub async fn observe(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Stream of every published envelope.
    pub fn tap(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tap.subscribe()
    }

    /// Number of deliveries still running.
    pub fn in_flight(&self) -> usize {
        self.deliveries.len()
    }

    /// Waits for in-flight deliveries to finish. Publishing after this is
    /// still accepted but the deliveries are not awaited.
    pub async fn drain(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    async fn deliver(
        config: RouterConfig,
        handler: Arc<dyn EventHandler>,
        envelope: Arc<EventEnvelope>,
    ) {
        let attempts = config.delivery_attempts.max(1);
        for attempt in 1..=attempts {
            match handler.handle(&envelope).await {
                Ok(()) => return,
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        attempt,
                        error = %err,
                        "handler failed; redelivering"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        config.redelivery_delay_ms,
                    ))
                    .await;
                }
                Err(err) => {
                    error!(attempt, error = %err, "event delivery failed");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl EventPublisher for InProcEventRouter {
    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<EventId> {
        let id = envelope.id;
        let name = envelope.name();

        for observer in self.observers.read().await.iter() {
            observer.observe(&envelope).await;
        }

        let handlers = self
            .handlers
            .read()
            .await
            .get(&name)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(event = %name, event_id = %id, "no handlers subscribed");
        }

        let _ = self.tap.send(envelope.clone());

        let envelope = Arc::new(envelope);
        for handler in handlers {
            let span = info_span!(
                "deliver",
                event = %name,
                event_id = %id,
                handler = handler.label()
            );
            self.deliveries.spawn(
                Self::deliver(self.config, handler, Arc::clone(&envelope))
                    .instrument(span),
            );
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LeadError;
    use leadcheck_model::RunId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::events::types::RunRef;

    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        fn label(&self) -> &str {
            "flaky"
        }

        async fn handle(&self, _envelope: &EventEnvelope) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(LeadError::Persistence("connection reset".into()));
            }
            Ok(())
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventObserver for Counting {
        async fn observe(&self, _envelope: &EventEnvelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn router() -> InProcEventRouter {
        InProcEventRouter::new(RouterConfig {
            delivery_attempts: 3,
            redelivery_delay_ms: 0,
            tap_capacity: 16,
        })
    }

    #[tokio::test]
    async fn redelivers_after_transient_failures() {
        let router = router();
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        router
            .subscribe(EventName::RunCancelled, handler.clone())
            .await;

        router
            .publish(DomainEvent::RunCancelled(RunRef {
                run_id: RunId::new(),
            }))
            .await
            .expect("publish");
        router.drain().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let router = router();
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
        });
        router
            .subscribe(EventName::RunCancelled, handler.clone())
            .await;

        router
            .publish(DomainEvent::RunCancelled(RunRef {
                run_id: RunId::new(),
            }))
            .await
            .expect("publish");
        router.drain().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn observers_and_tap_see_unrouted_events() {
        let router = router();
        let observer = Arc::new(Counting(AtomicUsize::new(0)));
        router.observe(observer.clone()).await;
        let mut tap = router.tap();

        let id = router
            .publish(DomainEvent::RunQueued(crate::events::RunQueued {
                run_id: RunId::new(),
                ignore_cache: true,
            }))
            .await
            .expect("publish");

        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
        let seen = tap.recv().await.expect("tap");
        assert_eq!(seen.id, id);
    }
}
