//! Remote subscribe capability.
//!
//! The transport lives outside this crate. A [`RemoteSource`] opens a live
//! subscription and pushes what it receives into an [`EventSink`]; the
//! manager drains the sink on its own task.

use crate::types::{RecordEvent, Selector};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::error;

/// Failure reported by the remote transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Something that can open live subscriptions on a remote entity.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Open a subscription for `selector` on `entity`.
    ///
    /// Resolves once the remote has acknowledged the subscription. Events and
    /// stream failures are reported through `sink` for as long as the
    /// returned handle is alive.
    async fn subscribe(
        &self,
        entity: &str,
        selector: &Selector,
        sink: EventSink,
    ) -> Result<Box<dyn RemoteSubscription>, RemoteError>;
}

/// Handle to an open remote subscription.
#[async_trait]
pub trait RemoteSubscription: Send {
    /// Tear the remote subscription down.
    async fn unsubscribe(self: Box<Self>) -> Result<(), RemoteError>;
}

/// What the transport delivers into a sink.
#[derive(Debug, Clone)]
pub(crate) enum StreamMessage {
    Events(Vec<RecordEvent>),
    Error(String),
}

/// Delivery side of a subscription's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<StreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a batch; the batch is applied to the local store atomically.
    ///
    /// Returns false once the subscription has been torn down.
    pub fn send(&self, events: Vec<RecordEvent>) -> bool {
        if events.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(StreamMessage::Events(events)).is_ok()
    }

    /// Deliver a single event.
    pub fn send_event(&self, event: RecordEvent) -> bool {
        self.send(vec![event])
    }

    /// Decode a wire payload (one event object or an array of them) and
    /// deliver it. Undecodable payloads are logged and dropped.
    pub fn deliver_json(&self, payload: &str) -> bool {
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Dropping undecodable event payload");
                return !self.tx.is_closed();
            }
        };

        let decoded = match value {
            serde_json::Value::Array(_) => serde_json::from_value::<Vec<RecordEvent>>(value),
            other => serde_json::from_value::<RecordEvent>(other).map(|e| vec![e]),
        };

        match decoded {
            Ok(events) => self.send(events),
            Err(e) => {
                error!(error = %e, "Dropping malformed event payload");
                !self.tx.is_closed()
            }
        }
    }

    /// Report that the stream failed. Triggers reconnection.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.tx.send(StreamMessage::Error(message.into())).is_ok()
    }

    /// Whether the manager has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
