//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use collection_sync::{
    EventSink, Record, RemoteError, RemoteSource, RemoteSubscription, Selector, SubscriptionKey,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn record(value: Value) -> Record {
    Record::from_value(value).unwrap()
}

#[derive(Default)]
struct MockState {
    calls: Vec<(SubscriptionKey, Instant)>,
    fail_next: u32,
    fail_always: bool,
    fail_unsubscribe: bool,
    sinks: Vec<(SubscriptionKey, EventSink)>,
    unsubscribed: Vec<SubscriptionKey>,
}

/// Scripted remote: records every call and hands out the sinks so tests can
/// push events and stream failures.
#[derive(Default)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
    handshake_delay: Duration,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every subscribe takes `delay` before it is acknowledged.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            handshake_delay: delay,
        })
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    pub fn fail_always(&self, fail: bool) {
        self.state.lock().fail_always = fail;
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.state.lock().fail_unsubscribe = fail;
    }

    pub fn subscribe_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.state.lock().calls.iter().map(|(_, at)| *at).collect()
    }

    pub fn calls(&self) -> Vec<SubscriptionKey> {
        self.state.lock().calls.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Sink of the most recent successful subscription for `entity`.
    pub fn latest_sink(&self, entity: &str) -> EventSink {
        self.state
            .lock()
            .sinks
            .iter()
            .rev()
            .find(|(key, _)| key.entity == entity)
            .map(|(_, sink)| sink.clone())
            .expect("no subscription for entity")
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionKey> {
        self.state.lock().unsubscribed.clone()
    }
}

struct MockSubscription {
    key: SubscriptionKey,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl RemoteSubscription for MockSubscription {
    async fn unsubscribe(self: Box<Self>) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.unsubscribed.push(self.key.clone());
        if state.fail_unsubscribe {
            return Err(RemoteError::new("socket already closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn subscribe(
        &self,
        entity: &str,
        selector: &Selector,
        sink: EventSink,
    ) -> Result<Box<dyn RemoteSubscription>, RemoteError> {
        if !self.handshake_delay.is_zero() {
            tokio::time::sleep(self.handshake_delay).await;
        }

        let key = SubscriptionKey::new(entity, selector.clone());
        let mut state = self.state.lock();
        state.calls.push((key.clone(), Instant::now()));

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RemoteError::new("connection refused"));
        }
        if state.fail_always {
            return Err(RemoteError::new("connection refused"));
        }

        state.sinks.push((key.clone(), sink));
        Ok(Box::new(MockSubscription {
            key,
            state: Arc::clone(&self.state),
        }))
    }
}
