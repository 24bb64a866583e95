//! # Requester: correlated request/response deadlines (`ack-req`).
//!
//! A requester forwards each request downstream immediately and arms a deadline
//! keyed by the request id. An acknowledgment on a linked `node:<id>` channel
//! cancels it; if the deadline passes first, the original request is published
//! on the requester's own `fail:<id>` channel for [`FailListener`](crate::FailListener)s
//! to pick up.
//!
//! Nothing is persisted. Re-sending an id that is still pending re-arms its deadline.
//!
//! ```text
//! send(msg) ──► loop ──► forwarded (Receiver<Message>)
//!                 │
//!                 └─► Scheduler.arm(id, ttl) ── elapsed ──► SignalBus "fail:<id>"
//! SignalBus "node:<link>" ──► loop ──► Scheduler.cancel(id)
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::clock::SystemClock;
use crate::config::RequesterConfig;
use crate::core::{Expiry, Resolver, Scheduler};
use crate::error::{Rejection, TrackerError};
use crate::eval::{EvaluatorRef, KeySelector, PropertyEvaluator, SelectorRef};
use crate::events::{Bus, Event, EventKind};
use crate::message::Message;
use crate::signals::{Binding, SignalBus, fail_channel, node_channel};

enum Command {
    Send {
        msg: Message,
        reply: oneshot::Sender<Result<String, Rejection>>,
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

/// Handle to a running requester.
#[derive(Clone)]
pub struct RequesterHandle {
    id: Arc<str>,
    tx: mpsc::UnboundedSender<Command>,
}

impl RequesterHandle {
    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Forwards a request and arms its deadline; returns the request id.
    pub async fn send(&self, msg: Message) -> Result<String, Rejection> {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Send { msg, reply }) {
            let msg = match cmd {
                Command::Send { msg, .. } => msg,
                _ => Message::default(),
            };
            return Err(Rejection::new(TrackerError::Closed, msg));
        }
        rx.await
            .unwrap_or_else(|_| Err(Rejection::new(TrackerError::Closed, Message::default())))
    }

    /// Cancels pending deadlines, unbinds links and stops the loop.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Builder for a requester instance.
pub struct RequesterBuilder {
    config: RequesterConfig,
    signals: Option<SignalBus>,
    bus: Option<Bus>,
    evaluator: Option<EvaluatorRef>,
    selector: Option<SelectorRef>,
}

impl RequesterBuilder {
    pub fn new(config: RequesterConfig) -> Self {
        Self {
            config,
            signals: None,
            bus: None,
            evaluator: None,
            selector: None,
        }
    }

    pub fn with_signals(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_evaluator(mut self, evaluator: EvaluatorRef) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_selector(mut self, selector: SelectorRef) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Binds the links and spawns the loop; returns the handle and the forwarded requests.
    pub fn spawn(self) -> (RequesterHandle, mpsc::UnboundedReceiver<Message>) {
        let evaluator: EvaluatorRef = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(PropertyEvaluator::new(Arc::new(SystemClock))),
        };
        let selector: SelectorRef = match self.selector {
            Some(selector) => selector,
            None => Arc::new(KeySelector::from_settings(
                &self.config.deadline,
                evaluator.clone(),
            )),
        };
        let signals = self
            .signals
            .unwrap_or_else(|| SignalBus::global().clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let (out, forwarded) = mpsc::unbounded_channel();
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

        let requester = Requester {
            id: id.clone(),
            fail_channel: fail_channel(&self.config.id),
            resolver: Resolver::new(self.config.deadline, evaluator, selector),
            scheduler: Scheduler::new(),
            signals,
            bus: self.bus.unwrap_or_default(),
            out,
            mailbox: tx.downgrade(),
            bindings,
        };
        tokio::spawn(requester.run(rx));

        (RequesterHandle { id, tx }, forwarded)
    }
}

struct Requester {
    id: Arc<str>,
    fail_channel: String,
    resolver: Resolver,
    scheduler: Scheduler,
    signals: SignalBus,
    bus: Bus,
    out: mpsc::UnboundedSender<Message>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    bindings: Vec<Binding>,
}

impl Requester {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        self.bus.publish(self.event(EventKind::TrackerStarted));

        let mut stop_reply = None;
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Send { msg, reply } => {
                    let _ = reply.send(self.send(msg));
                }
                Command::Signal(msg) => self.on_signal(&msg),
                Command::Fire { expiry, message } => self.on_fire(&expiry, message),
                Command::Shutdown { reply } => {
                    stop_reply = Some(reply);
                    break;
                }
            }
        }

        let cancelled = self.scheduler.cancel_all();
        self.bindings.clear();
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Send { msg, reply } => {
                    let _ = reply.send(Err(Rejection::new(TrackerError::Closed, msg)));
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
        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }

    fn send(&mut self, msg: Message) -> Result<String, Rejection> {
        let resolved = self
            .resolver
            .id(&msg)
            .and_then(|id| Ok((self.resolver.ttl_ms(&msg)?, id)));
        let (ttl_ms, id) = match resolved {
            Ok(v) => v,
            Err(error) => {
                self.bus.publish(
                    self.event(EventKind::SubmissionRejected)
                        .with_reason(error.to_string()),
                );
                return Err(Rejection::new(error, msg));
            }
        };

        self.bus.publish(
            self.event(EventKind::RequestSent)
                .with_entry(id.as_str())
                .with_delay_ms(ttl_ms),
        );
        let _ = self.out.send(msg.clone());

        let mailbox = self.mailbox.clone();
        self.scheduler.arm(&id, ttl_ms, move |expiry| {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Command::Fire { expiry, message: msg });
            }
        });
        Ok(id)
    }

    fn on_signal(&mut self, msg: &Message) {
        let Ok(id) = self.resolver.id(msg) else {
            return;
        };
        if self.scheduler.cancel(&id) {
            self.bus
                .publish(self.event(EventKind::RequestAcked).with_entry(id.as_str()));
        }
    }

    fn on_fire(&mut self, expiry: &Expiry, message: Message) {
        if !self.scheduler.claim(expiry) {
            return;
        }
        self.bus
            .publish(self.event(EventKind::RequestFailed).with_entry(expiry.id()));
        self.signals.publish(&self.fail_channel, &message);
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_tracker(self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Units;
    use crate::request::FailListener;
    use crate::signals::AckClear;
    use crate::FailListenerConfig;
    use std::time::Duration;

    fn config(ttl_ms: i64) -> RequesterConfig {
        RequesterConfig::new("req1")
            .with_ttl(ttl_ms, Units::Milliseconds)
            .with_key("requestId")
            .with_link("resp1")
    }

    fn request(id: &str) -> Message {
        Message::new().with("requestId", id)
    }

    fn listener(signals: &SignalBus) -> (FailListener, mpsc::UnboundedReceiver<Message>) {
        let cfg = FailListenerConfig {
            id: "f1".into(),
            links: vec!["req1".into()],
        };
        FailListener::new(&cfg, signals)
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_is_reinjected_by_fail_listener() {
        let signals = SignalBus::new();
        let (_fail, mut failures) = listener(&signals);
        let (req, mut forwarded) = RequesterBuilder::new(config(100))
            .with_signals(signals.clone())
            .spawn();

        assert_eq!(req.send(request("r1")).await.unwrap(), "r1");
        let out = forwarded.recv().await.unwrap();
        assert_eq!(out.get("requestId"), request("r1").get("requestId"));

        let failed = failures.recv().await.unwrap();
        assert_eq!(failed, out);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_request_does_not_fail() {
        let signals = SignalBus::new();
        let bus = Bus::new(64);
        let mut events = bus.subscribe();
        let (_fail, mut failures) = listener(&signals);
        let (req, _forwarded) = RequesterBuilder::new(config(100))
            .with_signals(signals.clone())
            .with_bus(bus)
            .spawn();
        let resp = AckClear::new("resp1", signals.clone());

        req.send(request("r1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(resp.send(request("r1")), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(failures.try_recv().is_err());
        let acked = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| e.kind == EventKind::RequestAcked);
        assert!(acked);
    }

    #[tokio::test(start_paused = true)]
    async fn resending_pending_request_rearms_deadline() {
        let signals = SignalBus::new();
        let (_fail, mut failures) = listener(&signals);
        let (req, _forwarded) = RequesterBuilder::new(config(100))
            .with_signals(signals.clone())
            .spawn();

        req.send(request("r1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        req.send(request("r1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(failures.try_recv().is_err(), "failed before the re-armed deadline");

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(failures.recv().await.is_some());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(failures.try_recv().is_err(), "first arming must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_ttl_fails_at_once() {
        let signals = SignalBus::new();
        let (_fail, mut failures) = listener(&signals);
        let (req, mut forwarded) = RequesterBuilder::new(config(0))
            .with_signals(signals.clone())
            .spawn();

        req.send(request("r2")).await.unwrap();
        assert!(forwarded.recv().await.is_some());
        assert!(failures.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_and_unbinds() {
        let signals = SignalBus::new();
        let (_fail, mut failures) = listener(&signals);
        let (req, _forwarded) = RequesterBuilder::new(config(100))
            .with_signals(signals.clone())
            .spawn();
        assert!(signals.has_channel("node:resp1"));

        req.send(request("r1")).await.unwrap();
        req.shutdown().await;
        assert!(!signals.has_channel("node:resp1"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(failures.try_recv().is_err());
        let rejected = req.send(request("r2")).await.unwrap_err();
        assert_eq!(rejected.error.as_label(), "tracker_closed");
    }
}
