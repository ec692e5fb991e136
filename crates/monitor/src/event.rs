//! Event types and delivery for monitored executions

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// What happened to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Execution (or task) started
    Start,
    /// A streamed text fragment arrived
    Stream,
    /// A structural change without its own kind: message end, step progress
    Update,
    /// A tool call was opened or closed
    Tool,
    /// Execution (or task) reached a terminal state
    Finish,
}

/// Event delivered to subscribers, carrying a full snapshot of the record
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent<R> {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Step the event concerns, for task monitors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// The fragment just appended, for stream events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
    pub record: R,
}

impl<R> MonitorEvent<R> {
    pub fn new(kind: EventKind, record: R) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            step_id: None,
            fragment: None,
            record,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }
}

/// Observer of monitor events.
///
/// Called synchronously while the monitor is locked, so implementations
/// must not call back into the same monitor.
pub trait Subscriber<R>: Send + Sync {
    fn on_event(&self, event: &MonitorEvent<R>) -> anyhow::Result<()>;
}

impl<R, F> Subscriber<R> for F
where
    F: Fn(&MonitorEvent<R>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &MonitorEvent<R>) -> anyhow::Result<()> {
        self(event)
    }
}

/// Forwards events into a bounded channel, dropping them when it is full
pub struct ChannelSubscriber<R> {
    tx: mpsc::Sender<MonitorEvent<R>>,
}

impl<R: Clone + Send + 'static> ChannelSubscriber<R> {
    /// Create the subscriber together with the stream it feeds
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<MonitorEvent<R>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }
}

impl<R: Clone + Send + Sync + 'static> Subscriber<R> for ChannelSubscriber<R> {
    fn on_event(&self, event: &MonitorEvent<R>) -> anyhow::Result<()> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                debug!("Event channel full, dropping {:?} event", event.kind);
                Ok(())
            }
            // Receiver gone; nothing left to deliver to.
            Err(TrySendError::Closed(_)) => Ok(()),
        }
    }
}

/// Fan-out of events to every registered subscriber
pub struct EventChannel<R> {
    subscribers: Vec<Arc<dyn Subscriber<R>>>,
}

impl<R> Default for EventChannel<R> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<R> EventChannel<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber<R>>) {
        self.subscribers.push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver an event to all subscribers in registration order. A failing
    /// or panicking subscriber is logged and skipped.
    pub fn emit(&self, event: &MonitorEvent<R>) {
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Subscriber {} failed on {:?} event: {:#}", index, event.kind, e);
                }
                Err(_) => {
                    warn!("Subscriber {} panicked on {:?} event", index, event.kind);
                }
            }
        }
    }
}
