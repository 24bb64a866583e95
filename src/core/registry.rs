//! # Registry: deployed instances by id.
//!
//! The registry plays the host's role: it deploys trackers, requesters and
//! failure listeners from their configs, shares one store, signal bus, event bus
//! and clock between them, and forwards lifecycle events to subscribers.
//!
//! ## Architecture
//! ```text
//! RegistryBuilder::build()
//!   ├─► Bus ──► subscriber listener ──► SubscriberSet ──► LogWriter / custom
//!   └─► Registry { instances: RwLock<HashMap<id, Instance>> }
//!          ├─ deploy_tracker(cfg)        → stop previous `id` → TrackerBuilder::spawn
//!          ├─ deploy_requester(cfg)      → stop previous `id` → RequesterBuilder::spawn
//!          ├─ deploy_fail_listener(cfg)  → stop previous `id` → FailListener::new
//!          ├─ flows_started()            → store.reconcile_scopes(tracker scopes)
//!          └─ shutdown_all()             → stop instances → flush and stop subscribers
//! ```
//!
//! ## Rules
//! - Deploying an id that is already deployed replaces it (reconfiguration).
//! - `flows_started` must run after every tracker of the flow has been deployed;
//!   scopes of trackers that are not deployed (or not persistent) are deleted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{ClockRef, SystemClock};
use crate::config::{FailListenerConfig, RequesterConfig, RuntimeConfig, TrackerConfig};
use crate::core::tracker::{Outputs, TrackerBuilder, TrackerHandle};
use crate::error::RegistryError;
use crate::eval::{EvaluatorRef, PropertyEvaluator};
use crate::events::{Bus, Event, EventKind};
use crate::message::Message;
use crate::request::{FailListener, RequesterBuilder, RequesterHandle};
use crate::signals::{AckClear, SignalBus};
use crate::store::{FsStore, StoreRef};
use crate::subscribers::{Subscribe, SubscriberSet};

enum Instance {
    Tracker {
        config: TrackerConfig,
        handle: TrackerHandle,
    },
    Requester(RequesterHandle),
    FailListener(FailListener),
}

impl Instance {
    async fn stop(self) {
        match self {
            Instance::Tracker { handle, .. } => handle.shutdown().await,
            Instance::Requester(handle) => handle.shutdown().await,
            Instance::FailListener(listener) => drop(listener),
        }
    }
}

/// Deployed instances sharing one store, signal bus and event bus.
pub struct Registry {
    runtime: RuntimeConfig,
    store: StoreRef,
    signals: SignalBus,
    bus: Bus,
    clock: ClockRef,
    evaluator: EvaluatorRef,
    instances: RwLock<HashMap<String, Instance>>,
    listener: Mutex<Option<Listener>>,
}

/// Task forwarding bus events to the subscriber set.
struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Registry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Deploys (or redeploys) a tracker; returns its outputs.
    pub async fn deploy_tracker(&self, config: TrackerConfig) -> Outputs {
        let mut instances = self.instances.write().await;
        if let Some(prev) = instances.remove(&config.id) {
            prev.stop().await;
        }
        let (handle, outputs) = TrackerBuilder::new(config.clone())
            .with_runtime(self.runtime.clone())
            .with_store(self.store.clone())
            .with_signals(self.signals.clone())
            .with_bus(self.bus.clone())
            .with_clock(self.clock.clone())
            .with_evaluator(self.evaluator.clone())
            .spawn();
        instances.insert(config.id.clone(), Instance::Tracker { config, handle });
        outputs
    }

    /// Deploys (or redeploys) a requester; returns its forwarded requests.
    pub async fn deploy_requester(
        &self,
        config: RequesterConfig,
    ) -> mpsc::UnboundedReceiver<Message> {
        let mut instances = self.instances.write().await;
        if let Some(prev) = instances.remove(&config.id) {
            prev.stop().await;
        }
        let id = config.id.clone();
        let (handle, forwarded) = RequesterBuilder::new(config)
            .with_signals(self.signals.clone())
            .with_bus(self.bus.clone())
            .with_evaluator(self.evaluator.clone())
            .spawn();
        instances.insert(id, Instance::Requester(handle));
        forwarded
    }

    /// Deploys (or redeploys) a failure listener; returns its re-injected requests.
    pub async fn deploy_fail_listener(
        &self,
        config: FailListenerConfig,
    ) -> mpsc::UnboundedReceiver<Message> {
        let mut instances = self.instances.write().await;
        if let Some(prev) = instances.remove(&config.id) {
            prev.stop().await;
        }
        let (listener, failures) = FailListener::new(&config, &self.signals);
        instances.insert(config.id, Instance::FailListener(listener));
        failures
    }

    /// Acknowledger publishing on this registry's signal bus.
    pub fn ack_clear(&self, id: impl Into<String>) -> AckClear {
        AckClear::new(id, self.signals.clone())
    }

    /// Handle of a deployed tracker.
    pub async fn tracker(&self, id: &str) -> Option<TrackerHandle> {
        match self.instances.read().await.get(id) {
            Some(Instance::Tracker { handle, .. }) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Handle of a deployed requester.
    pub async fn requester(&self, id: &str) -> Option<RequesterHandle> {
        match self.instances.read().await.get(id) {
            Some(Instance::Requester(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Stops and forgets an instance. Persisted records of a tracker stay until
    /// the next [`flows_started`](Self::flows_started).
    pub async fn remove(&self, id: &str) -> Result<(), RegistryError> {
        let prev = self.instances.write().await.remove(id);
        match prev {
            Some(instance) => {
                instance.stop().await;
                Ok(())
            }
            None => Err(RegistryError::NotFound { id: id.to_string() }),
        }
    }

    /// Sorted ids of deployed instances.
    pub async fn list(&self) -> Vec<String> {
        let instances = self.instances.read().await;
        let mut ids: Vec<String> = instances.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Host hook run once all instances are deployed: deletes every stored scope
    /// without a deployed persistent tracker. Returns the removed scopes.
    pub async fn flows_started(&self) -> Result<Vec<String>, RegistryError> {
        let live: Vec<String> = self
            .instances
            .read()
            .await
            .values()
            .filter_map(|instance| match instance {
                Instance::Tracker { config, .. } if config.persist => Some(config.scope_id()),
                _ => None,
            })
            .collect();

        let removed = self.store.reconcile_scopes(&live).await?;
        for scope in &removed {
            self.bus
                .publish(Event::new(EventKind::ScopeReconciled).with_tracker(scope.as_str()));
        }
        Ok(removed)
    }

    /// Stops every instance, then delivers the events already published and
    /// stops the subscriber workers.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Instance> = {
            let mut instances = self.instances.write().await;
            instances.drain().map(|(_, instance)| instance).collect()
        };
        for instance in drained {
            instance.stop().await;
        }

        let listener = self.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
            let _ = listener.handle.await;
        }
    }

    /// Lifecycle event bus shared by all instances.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Signal bus shared by all instances.
    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    runtime: RuntimeConfig,
    store: Option<StoreRef>,
    signals: Option<SignalBus>,
    clock: Option<ClockRef>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            store: None,
            signals: None,
            clock: None,
            subscribers: Vec::new(),
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Store shared by all trackers (default: [`FsStore`] at the runtime cache root).
    pub fn with_store(mut self, store: StoreRef) -> Self {
        self.store = Some(store);
        self
    }

    /// Signal bus (default: the process-wide one).
    pub fn with_signals(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive lifecycle events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the registry and starts the subscriber listener. Must be called within a tokio runtime.
    pub fn build(self) -> Arc<Registry> {
        let bus = Bus::new(self.runtime.bus_capacity_clamped());
        let clock: ClockRef = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let store: StoreRef = match self.store {
            Some(store) => store,
            None => Arc::new(FsStore::from_config(&self.runtime)),
        };

        let listener = if self.subscribers.is_empty() {
            None
        } else {
            Some(subscriber_listener(
                &bus,
                SubscriberSet::new(self.subscribers, bus.clone()),
            ))
        };

        Arc::new(Registry {
            runtime: self.runtime,
            store,
            signals: self
                .signals
                .unwrap_or_else(|| SignalBus::global().clone()),
            bus,
            evaluator: Arc::new(PropertyEvaluator::new(clock.clone())),
            clock,
            instances: RwLock::new(HashMap::new()),
            listener: Mutex::new(listener),
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
        }
    }
}

/// Forwards bus events to the subscriber set until cancelled.
///
/// The set publishes its own health events on the same bus, so the bus never
/// closes while the set is alive; cancellation is the only way out.
fn subscriber_listener(bus: &Bus, set: SubscriberSet) -> Listener {
    let mut rx = bus.subscribe();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                res = rx.recv() => match res {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(_)) => {
                        set.emit(&Event::subscriber_overflow("registry", "listener lagged"));
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        // flush what was published before cancellation
        loop {
            match rx.try_recv() {
                Ok(ev) => set.emit(&ev),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        set.shutdown().await;
    });

    Listener { cancel, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::Units;
    use crate::core::tracker::Port;
    use crate::store::{MemoryStore, RecordStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, e: &Event) {
            self.seen.lock().unwrap().push(e.kind);
        }
    }

    fn registry(store: &MemoryStore) -> Arc<Registry> {
        Registry::builder()
            .with_store(Arc::new(store.clone()))
            .with_signals(SignalBus::new())
            .with_clock(Arc::new(TokioClock::new()))
            .build()
    }

    fn tracker(id: &str) -> TrackerConfig {
        TrackerConfig::new(id)
            .with_ttl(200, Units::Milliseconds)
            .with_key("orderId")
            .with_link("clear1")
            .persistent(true)
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_removes_only_orphaned_scopes() {
        let store = MemoryStore::new();
        for scope in ["A", "B", "C"] {
            store.ensure_scope(scope).await.unwrap();
        }
        let reg = registry(&store);
        let mut events = reg.bus().subscribe();
        let _a = reg.deploy_tracker(tracker("A")).await;
        let _c = reg.deploy_tracker(tracker("C")).await;

        let removed = reg.flows_started().await.unwrap();
        assert_eq!(removed, vec!["B".to_string()]);
        let mut left = store.scopes().await.unwrap();
        left.sort();
        assert_eq!(left, vec!["A".to_string(), "C".to_string()]);

        let reconciled: Vec<Event> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.kind == EventKind::ScopeReconciled)
            .collect();
        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].tracker.as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_signal_reaches_deployed_tracker() {
        let store = MemoryStore::new();
        let reg = registry(&store);
        let mut outputs = reg.deploy_tracker(tracker("n1")).await;
        let clear = reg.ack_clear("clear1");

        let handle = reg.tracker("n1").await.unwrap();
        handle
            .submit(Message::new().with("orderId", "X1"))
            .await
            .unwrap();
        assert_eq!(outputs.recv().await.unwrap().port, Port::Accepted);

        tokio::time::sleep(Duration::from_millis(50)).await;
        clear.send(Message::new().with("orderId", "X1"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!store.contains("n1", "X1"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(outputs.try_recv().is_err());
        reg.shutdown_all().await;
        assert!(reg.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn redeploy_replaces_and_reconfigures() {
        let store = MemoryStore::new();
        let reg = registry(&store);
        let _first = reg.deploy_tracker(tracker("n1")).await;
        let handle = reg.tracker("n1").await.unwrap();
        handle
            .submit(Message::new().with("orderId", "X1"))
            .await
            .unwrap();
        assert!(store.contains("n1", "X1"));

        let _second = reg.deploy_tracker(tracker("n1").persistent(false)).await;
        assert!(handle.is_closed());
        let fresh = reg.tracker("n1").await.unwrap();
        fresh
            .submit(Message::new().with("orderId", "X2"))
            .await
            .unwrap();
        assert_eq!(store.len("n1"), 0);
        assert_eq!(reg.list().await, vec!["n1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_unknown_is_not_found() {
        let reg = registry(&MemoryStore::new());
        let err = reg.remove("ghost").await.unwrap_err();
        assert_eq!(err.as_label(), "registry_not_found");

        let _f = reg
            .deploy_fail_listener(FailListenerConfig {
                id: "f1".into(),
                links: vec!["req1".into()],
            })
            .await;
        assert!(reg.signals().has_channel("fail:req1"));
        reg.remove("f1").await.unwrap();
        assert!(!reg.signals().has_channel("fail:req1"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_flows_to_listener() {
        let reg = registry(&MemoryStore::new());
        let mut failures = reg
            .deploy_fail_listener(FailListenerConfig {
                id: "f1".into(),
                links: vec!["req1".into()],
            })
            .await;
        let mut forwarded = reg
            .deploy_requester(
                RequesterConfig::new("req1")
                    .with_ttl(100, Units::Milliseconds)
                    .with_key("requestId"),
            )
            .await;

        let req = reg.requester("req1").await.unwrap();
        req.send(Message::new().with("requestId", "r1")).await.unwrap();
        let sent = forwarded.recv().await.unwrap();
        assert_eq!(failures.recv().await.unwrap(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_receive_lifecycle_events() {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let reg = Registry::builder()
            .with_store(Arc::new(store.clone()))
            .with_signals(SignalBus::new())
            .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
            .build();

        let mut outputs = reg.deploy_tracker(tracker("n1")).await;
        reg.tracker("n1")
            .await
            .unwrap()
            .submit(Message::new().with("orderId", "X1"))
            .await
            .unwrap();
        assert_eq!(outputs.recv().await.unwrap().port, Port::Accepted);
        assert_eq!(outputs.recv().await.unwrap().port, Port::TimedOut);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert!(seen.contains(&EventKind::TrackerStarted));
        assert!(seen.contains(&EventKind::EntryAccepted));
        assert!(seen.contains(&EventKind::EntryTimedOut));
    }

    #[tokio::test]
    async fn shutdown_flushes_and_releases_subscribers() {
        let recorder = Arc::new(Recorder::default());
        let reg = Registry::builder()
            .with_store(Arc::new(MemoryStore::new()))
            .with_signals(SignalBus::new())
            .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
            .build();
        let _outputs = reg.deploy_tracker(tracker("n1")).await;

        reg.shutdown_all().await;
        assert_eq!(Arc::strong_count(&recorder), 1, "worker still holds subscriber");
        assert!(
            recorder
                .seen
                .lock()
                .unwrap()
                .contains(&EventKind::TrackerStopped)
        );

        // idempotent
        reg.shutdown_all().await;
        drop(reg);
    }
}
