//! # Tracker: per-message deadline tracking with durable recovery.
//!
//! A tracker (`ack-start`) arms a deadline for every submitted message and
//! reports what happened to it on three outputs:
//!
//! | port        | when                                                        |
//! |-------------|-------------------------------------------------------------|
//! | `accepted`  | fresh submission (and duplicates of an armed id)            |
//! | `timed-out` | deadline passed without acknowledgment                      |
//! | `restored`  | entry reloaded from the store at startup                    |
//!
//! ## Architecture
//! ```text
//! TrackerHandle ──Submit/Acknowledge/Shutdown──┐
//! SignalBus "node:<link>" ──Signal(msg)────────┼──► mailbox ──► Tracker loop ──► Outputs
//! Scheduler timers ──Fire(expiry, msg)─────────┘                    │
//!                                                                    ├─► RecordStore (scope)
//!                                                                    └─► Bus (lifecycle events)
//! ```
//!
//! ## Rules
//! - One loop per tracker: submissions, timer firings and signals never run concurrently.
//! - Exactly one of {acknowledged, timed-out} is terminal per arming (see [`Scheduler::claim`]).
//! - A duplicate submission emits on `accepted` only; the deadline is not reset.
//! - Store failures are reported as [`EventKind::PersistFailed`]; the entry continues in memory.
//! - Startup: the scope is ensured (persistent) or dropped (non-persistent); cached
//!   records are resubmitted as restored after `restore_grace`, before any queued command runs.
//! - Shutdown cancels every timer and unbinds every link; records of unfired entries stay.
//! - Dropping every [`TrackerHandle`] shuts the tracker down.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use ackvisor::{Message, MemoryStore, Port, SignalBus, TrackerBuilder, TrackerConfig, Units};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let cfg = TrackerConfig::new("n1")
//!         .with_ttl(20, Units::Milliseconds)
//!         .with_key("orderId");
//!     let (tracker, mut outputs) = TrackerBuilder::new(cfg)
//!         .with_store(Arc::new(MemoryStore::new()))
//!         .with_signals(SignalBus::new())
//!         .spawn();
//!
//!     tracker.submit(Message::new().with("orderId", "X1")).await.unwrap();
//!     assert_eq!(outputs.recv().await.unwrap().port, Port::Accepted);
//!     assert_eq!(outputs.recv().await.unwrap().port, Port::TimedOut);
//!     tracker.shutdown().await;
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::clock::{ClockRef, SystemClock};
use crate::config::{RuntimeConfig, TrackerConfig};
use crate::core::resolve::Resolver;
use crate::core::scheduler::{Expiry, Scheduler};
use crate::error::{Rejection, TrackerError};
use crate::eval::{EvaluatorRef, KeySelector, PropertyEvaluator, SelectorRef};
use crate::events::{Bus, Event, EventKind};
use crate::message::Message;
use crate::signals::{Binding, SignalBus, node_channel};
use crate::store::{FsStore, PersistedRecord, StoreRef};

/// Output port of a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    Accepted,
    TimedOut,
    Restored,
}

impl Port {
    /// Position of the port on the host node (0, 1, 2).
    pub fn index(self) -> usize {
        match self {
            Port::Accepted => 0,
            Port::TimedOut => 1,
            Port::Restored => 2,
        }
    }

    /// Port name as wired in flows.
    pub fn as_str(self) -> &'static str {
        match self {
            Port::Accepted => "accepted",
            Port::TimedOut => "timed-out",
            Port::Restored => "restored",
        }
    }
}

/// A message delivered on one port.
#[derive(Clone, Debug, PartialEq)]
pub struct Output {
    pub port: Port,
    pub message: Message,
}

/// Receiving end of a tracker's outputs.
pub type Outputs = mpsc::UnboundedReceiver<Output>;

/// What a successful submission did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Fresh entry armed (or timed out at once for a non-positive TTL).
    Accepted { id: String },
    /// The id was already armed; nothing was re-armed.
    Duplicate { id: String },
    /// Cached entry re-armed with its remaining deadline.
    Restored { id: String },
}

impl Outcome {
    /// The resolved id.
    pub fn id(&self) -> &str {
        match self {
            Outcome::Accepted { id } | Outcome::Duplicate { id } | Outcome::Restored { id } => id,
        }
    }
}

enum Command {
    Submit {
        msg: Message,
        reply: oneshot::Sender<Result<Outcome, Rejection>>,
    },
    Acknowledge {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Signal(Message),
    Fire {
        expiry: Expiry,
        message: Message,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    id: Arc<str>,
    tx: mpsc::UnboundedSender<Command>,
}

impl TrackerHandle {
    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Submits a message.
    ///
    /// Rejections hand the message back. If the loop died without answering, the
    /// rejection carries an empty message.
    pub async fn submit(&self, msg: Message) -> Result<Outcome, Rejection> {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Submit { msg, reply }) {
            let msg = match cmd {
                Command::Submit { msg, .. } => msg,
                _ => Message::default(),
            };
            return Err(Rejection::new(TrackerError::Closed, msg));
        }
        rx.await
            .unwrap_or_else(|_| Err(Rejection::new(TrackerError::Closed, Message::default())))
    }

    /// Clears `id`: deletes its record and cancels its timer.
    ///
    /// Returns true if an armed entry was cleared. Idempotent.
    pub async fn acknowledge(&self, id: impl Into<String>) -> Result<bool, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Acknowledge {
                id: id.into(),
                reply,
            })
            .map_err(|_| TrackerError::Closed)?;
        rx.await.map_err(|_| TrackerError::Closed)
    }

    /// Stops the tracker and waits until its timers are cancelled and links unbound.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// True once the loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for TrackerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerHandle").field("id", &self.id).finish()
    }
}

/// Builder for a tracker instance.
///
/// Unset collaborators default to: [`FsStore`] at the runtime cache root, the
/// global [`SignalBus`], a private [`Bus`], [`SystemClock`], [`PropertyEvaluator`]
/// and a [`KeySelector`] over the configured key.
pub struct TrackerBuilder {
    config: TrackerConfig,
    runtime: RuntimeConfig,
    store: Option<StoreRef>,
    signals: Option<SignalBus>,
    bus: Option<Bus>,
    clock: Option<ClockRef>,
    evaluator: Option<EvaluatorRef>,
    selector: Option<SelectorRef>,
}

impl TrackerBuilder {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            runtime: RuntimeConfig::default(),
            store: None,
            signals: None,
            bus: None,
            clock: None,
            evaluator: None,
            selector: None,
        }
    }

    /// Process-wide settings (cache root, restore grace).
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_store(mut self, store: StoreRef) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_signals(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Bus lifecycle events are published on.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_evaluator(mut self, evaluator: EvaluatorRef) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Overrides id selection (e.g. [`MessageIdSelector`](crate::MessageIdSelector)).
    pub fn with_selector(mut self, selector: SelectorRef) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Binds the links and spawns the tracker loop. Must be called within a tokio runtime.
    pub fn spawn(self) -> (TrackerHandle, Outputs) {
        let clock: ClockRef = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let evaluator: EvaluatorRef = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(PropertyEvaluator::new(clock.clone())),
        };
        let selector: SelectorRef = match self.selector {
            Some(selector) => selector,
            None => Arc::new(KeySelector::from_settings(
                &self.config.deadline,
                evaluator.clone(),
            )),
        };
        let store: StoreRef = match self.store {
            Some(store) => store,
            None => Arc::new(FsStore::from_config(&self.runtime)),
        };
        let signals = self
            .signals
            .unwrap_or_else(|| SignalBus::global().clone());
        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(self.runtime.bus_capacity_clamped()));

        let (tx, rx) = mpsc::unbounded_channel();
        let (out, outputs) = mpsc::unbounded_channel();
        let id: Arc<str> = Arc::from(self.config.id.as_str());

        let bindings = self
            .config
            .links
            .iter()
            .map(|link| {
                let mailbox = tx.downgrade();
                signals.bind(&node_channel(link), move |msg: &Message| {
                    if let Some(tx) = mailbox.upgrade() {
                        let _ = tx.send(Command::Signal(msg.clone()));
                    }
                })
            })
            .collect();

        let tracker = Tracker {
            id: id.clone(),
            scope: self.config.scope_id(),
            persist: self.config.persist,
            restore_grace: self.runtime.restore_grace,
            resolver: Resolver::new(self.config.deadline, evaluator, selector),
            scheduler: Scheduler::new(),
            store,
            bus,
            clock,
            out,
            mailbox: tx.downgrade(),
            bindings,
        };
        tokio::spawn(tracker.run(rx));

        (TrackerHandle { id, tx }, outputs)
    }
}

struct Tracker {
    id: Arc<str>,
    scope: String,
    persist: bool,
    restore_grace: Duration,
    resolver: Resolver,
    scheduler: Scheduler,
    store: StoreRef,
    bus: Bus,
    clock: ClockRef,
    out: mpsc::UnboundedSender<Output>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    bindings: Vec<Binding>,
}

impl Tracker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        self.prepare_scope().await;
        let restored = self.restore().await;
        self.bus.publish(
            self.event(EventKind::TrackerStarted)
                .with_reason(format!("restored={restored}")),
        );

        let mut stop_reply = None;
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Submit { msg, reply } => {
                    let res = self.submit(msg).await;
                    let _ = reply.send(res);
                }
                Command::Acknowledge { id, reply } => {
                    let cleared = self.clear(&id).await;
                    let _ = reply.send(cleared);
                }
                Command::Signal(msg) => self.on_signal(msg).await,
                Command::Fire { expiry, message } => self.on_fire(expiry, message).await,
                Command::Shutdown { reply } => {
                    stop_reply = Some(reply);
                    break;
                }
            }
        }

        self.stop(&mut rx);
        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }

    /// Persistent trackers get their scope created; others lose any stale one.
    async fn prepare_scope(&self) {
        let res = if self.persist {
            self.store.ensure_scope(&self.scope).await
        } else {
            self.store.drop_scope(&self.scope).await
        };
        if let Err(e) = res {
            self.bus.publish(
                self.event(EventKind::PersistFailed)
                    .with_reason(e.to_string()),
            );
        }
    }

    /// Resubmits every cached record as restored; returns how many were read.
    async fn restore(&mut self) -> usize {
        if !self.persist {
            return 0;
        }
        let load = match self.store.load_all(&self.scope).await {
            Ok(load) => load,
            Err(e) => {
                self.bus.publish(
                    self.event(EventKind::RestoreFailed)
                        .with_reason(e.to_string()),
                );
                return 0;
            }
        };
        for (key, err) in &load.failures {
            self.bus.publish(
                self.event(EventKind::RestoreFailed)
                    .with_entry(key.as_str())
                    .with_reason(err.to_string()),
            );
        }
        if load.records.is_empty() {
            return 0;
        }

        if !self.restore_grace.is_zero() {
            tokio::time::sleep(self.restore_grace).await;
        }
        let n = load.records.len();
        for record in load.records {
            // Rejections are already published as events.
            let _ = self.submit(record.into_restored_message()).await;
        }
        n
    }

    async fn submit(&mut self, msg: Message) -> Result<Outcome, Rejection> {
        let id = match self.resolver.id(&msg) {
            Ok(id) => id,
            Err(error) => return Err(self.reject(None, error, msg)),
        };
        let ttl_ms = match self.resolver.ttl_ms(&msg) {
            Ok(ttl) => ttl,
            Err(error) => return Err(self.reject(Some(&id), error, msg)),
        };

        if self.scheduler.is_armed(&id) {
            self.bus
                .publish(self.event(EventKind::EntryDuplicate).with_entry(id.as_str()));
            self.emit(Port::Accepted, msg);
            return Ok(Outcome::Duplicate { id });
        }

        let now = self.clock.now_millis();
        let (outcome, delay) = match msg.restored_deadline() {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(now);
                self.bus.publish(
                    self.event(EventKind::EntryRestored)
                        .with_entry(id.as_str())
                        .with_delay_ms(remaining),
                );
                self.emit(Port::Restored, msg.clone());
                (Outcome::Restored { id: id.clone() }, remaining)
            }
            None => {
                if self.persist && ttl_ms > 0 {
                    let record = PersistedRecord::new(&id, now.saturating_add(ttl_ms), msg.clone());
                    if let Err(e) = self.store.put(&self.scope, &record).await {
                        self.persist_failed(&id, e.to_string());
                    }
                }
                self.bus.publish(
                    self.event(EventKind::EntryAccepted)
                        .with_entry(id.as_str())
                        .with_delay_ms(ttl_ms),
                );
                self.emit(Port::Accepted, msg.clone());
                (Outcome::Accepted { id: id.clone() }, ttl_ms)
            }
        };

        if delay > 0 {
            self.arm(&id, delay, msg);
        } else {
            self.expire(&id, msg).await;
        }
        Ok(outcome)
    }

    fn arm(&mut self, id: &str, delay_ms: i64, message: Message) {
        let mailbox = self.mailbox.clone();
        self.scheduler.arm(id, delay_ms, move |expiry| {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Command::Fire { expiry, message });
            }
        });
    }

    async fn on_fire(&mut self, expiry: Expiry, message: Message) {
        if self.scheduler.claim(&expiry) {
            self.expire(expiry.id(), message).await;
        }
    }

    async fn expire(&mut self, id: &str, msg: Message) {
        self.forget(id).await;
        self.bus
            .publish(self.event(EventKind::EntryTimedOut).with_entry(id));
        self.emit(Port::TimedOut, msg);
    }

    /// Deletes the record and cancels the timer; true if an entry was armed.
    async fn clear(&mut self, id: &str) -> bool {
        self.forget(id).await;
        let cancelled = self.scheduler.cancel(id);
        if cancelled {
            self.bus
                .publish(self.event(EventKind::EntryAcknowledged).with_entry(id));
        }
        cancelled
    }

    async fn on_signal(&mut self, msg: Message) {
        match self.resolver.id(&msg) {
            Ok(id) => {
                self.clear(&id).await;
            }
            Err(error) => {
                self.bus.publish(
                    self.event(EventKind::SubmissionRejected)
                        .with_reason(error.to_string()),
                );
            }
        }
    }

    async fn forget(&self, id: &str) {
        if !self.persist {
            return;
        }
        if let Err(e) = self.store.delete(&self.scope, id).await {
            self.persist_failed(id, e.to_string());
        }
    }

    fn stop(&mut self, rx: &mut mpsc::UnboundedReceiver<Command>) {
        let cancelled = self.scheduler.cancel_all();
        self.bindings.clear();

        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Submit { msg, reply } => {
                    let _ = reply.send(Err(Rejection::new(TrackerError::Closed, msg)));
                }
                Command::Acknowledge { reply, .. } => {
                    let _ = reply.send(false);
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(());
                }
                Command::Signal(_) | Command::Fire { .. } => {}
            }
        }

        self.bus.publish(
            self.event(EventKind::TrackerStopped)
                .with_reason(format!("cancelled={cancelled}")),
        );
    }

    fn reject(&self, id: Option<&str>, error: TrackerError, msg: Message) -> Rejection {
        let mut ev = self
            .event(EventKind::SubmissionRejected)
            .with_reason(error.to_string());
        if let Some(id) = id {
            ev = ev.with_entry(id);
        }
        self.bus.publish(ev);
        Rejection::new(error, msg)
    }

    fn persist_failed(&self, id: &str, reason: String) {
        self.bus.publish(
            self.event(EventKind::PersistFailed)
                .with_entry(id)
                .with_reason(reason),
        );
    }

    fn emit(&self, port: Port, message: Message) {
        let _ = self.out.send(Output { port, message });
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_tracker(self.id.clone())
    }
}
