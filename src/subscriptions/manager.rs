//! Subscription manager keeping remote subscriptions and local stores in step.

use crate::collection::{LocalCollection, WriteBatch, WriteOp};
use crate::error::{Result, SyncError};
use crate::remote::{EventSink, RemoteSource, RemoteSubscription, StreamMessage};
use crate::types::{EventAction, RecordEvent, Selector, SubscriptionKey};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{SubscriptionConfig, SubscriptionStatus};

/// Shared handle on an in-flight establishment. Every caller that joins
/// the same key awaits a clone of it.
type Establishment = Shared<BoxFuture<'static, Result<()>>>;

/// A live remote subscription plus the task applying its events.
struct ActiveSubscription {
    remote: Box<dyn RemoteSubscription>,
    pump: CancellationToken,
}

impl ActiveSubscription {
    /// Stop applying events now; tear the remote side down in the background.
    fn teardown(self, key: &SubscriptionKey) {
        let ActiveSubscription { remote, pump } = self;
        pump.cancel();

        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = remote.unsubscribe().await {
                warn!(%key, error = %e, "Failed to tear down remote subscription");
            }
        });
    }
}

/// Internal subscription state, one per key.
struct SubscriptionState {
    /// Distinguishes this state from earlier/later ones for the same key.
    generation: u64,
    store: Arc<dyn LocalCollection>,
    /// None while pending or reconnecting.
    active: Option<ActiveSubscription>,
    reconnect_attempts: u32,
    /// Present while a reconnection loop is in flight (single-flight guard).
    reconnect_task: Option<JoinHandle<()>>,
    /// Cancels the reconnection loop.
    cancel: CancellationToken,
}

impl SubscriptionState {
    fn new(generation: u64, store: Arc<dyn LocalCollection>) -> Self {
        Self {
            generation,
            store,
            active: None,
            reconnect_attempts: 0,
            reconnect_task: None,
            cancel: CancellationToken::new(),
        }
    }

    fn status(&self) -> SubscriptionStatus {
        if self.reconnect_task.is_some() {
            SubscriptionStatus::Reconnecting {
                attempts: self.reconnect_attempts,
            }
        } else if self.active.is_some() {
            SubscriptionStatus::Established
        } else {
            SubscriptionStatus::Pending
        }
    }

    /// Release everything this state owns. Must be called outside the lock.
    fn dispose(self, key: &SubscriptionKey) {
        self.cancel.cancel();
        if let Some(active) = self.active {
            active.teardown(key);
        }
    }
}

struct PendingEstablishment {
    generation: u64,
    future: Establishment,
}

#[derive(Default)]
struct ManagerState {
    subscriptions: HashMap<SubscriptionKey, SubscriptionState>,
    pending: HashMap<SubscriptionKey, PendingEstablishment>,
    subscriber_counts: HashMap<String, usize>,
    cleanup_timers: HashMap<String, CancellationToken>,
    next_generation: u64,
}

impl ManagerState {
    fn is_current(&self, key: &SubscriptionKey, generation: u64) -> bool {
        matches!(self.subscriptions.get(key), Some(s) if s.generation == generation)
    }

    /// Remove every key of `entity`, returning the states to dispose.
    fn take_entity(&mut self, entity: &str) -> Vec<(SubscriptionKey, SubscriptionState)> {
        self.pending.retain(|key, _| key.entity != entity);
        let keys: Vec<SubscriptionKey> = self
            .subscriptions
            .keys()
            .filter(|key| key.entity == entity)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.subscriptions.remove(&key).map(|s| (key, s)))
            .collect()
    }
}

struct Inner {
    remote: Arc<dyn RemoteSource>,
    config: SubscriptionConfig,
    /// Never held across an `.await`.
    state: Mutex<ManagerState>,
}

impl Inner {
    /// Open the remote subscription and start draining its events.
    async fn connect(
        self: &Arc<Self>,
        key: &SubscriptionKey,
        store: &Arc<dyn LocalCollection>,
        generation: u64,
    ) -> Result<ActiveSubscription> {
        let (sink, rx) = EventSink::channel();
        let remote = self
            .remote
            .subscribe(&key.entity, &key.selector, sink)
            .await
            .map_err(|e| SyncError::Connection {
                key: key.clone(),
                message: e.message,
            })?;

        let pump = CancellationToken::new();
        tokio::spawn(run_pump(
            Arc::downgrade(self),
            key.clone(),
            generation,
            Arc::clone(store),
            rx,
            pump.clone(),
        ));

        Ok(ActiveSubscription { remote, pump })
    }

    /// First establishment for a freshly created state.
    async fn establish(
        self: Arc<Self>,
        key: SubscriptionKey,
        store: Arc<dyn LocalCollection>,
        generation: u64,
    ) -> Result<()> {
        let outcome = self.connect(&key, &store, generation).await;

        let mut state = self.state.lock();
        if matches!(state.pending.get(&key), Some(p) if p.generation == generation) {
            state.pending.remove(&key);
        }

        if !state.is_current(&key, generation) {
            drop(state);
            // Unsubscribed (or replaced) while the handshake was in flight.
            if let Ok(active) = outcome {
                debug!(%key, "Discarding superseded subscription");
                active.teardown(&key);
            }
            return Ok(());
        }

        match outcome {
            Ok(active) => {
                let old = state.subscriptions.get_mut(&key).and_then(|sub| {
                    sub.reconnect_attempts = 0;
                    sub.active.replace(active)
                });
                drop(state);
                info!(%key, "Subscription established");
                if let Some(old) = old {
                    old.teardown(&key);
                }
                Ok(())
            }
            Err(e) => {
                warn!(%key, error = %e, "Initial subscription failed, retrying in background");
                let old = self.start_reconnect_locked(&mut state, &key, generation);
                drop(state);
                if let Some(old) = old {
                    old.teardown(&key);
                }
                Err(e)
            }
        }
    }

    fn start_reconnect(self: &Arc<Self>, key: &SubscriptionKey, generation: u64) {
        let old = {
            let mut state = self.state.lock();
            self.start_reconnect_locked(&mut state, key, generation)
        };
        if let Some(old) = old {
            old.teardown(key);
        }
    }

    /// Spawn the reconnection loop unless one is already running for `key`.
    ///
    /// Returns the failed subscription, which the caller tears down once the
    /// lock is released.
    fn start_reconnect_locked(
        self: &Arc<Self>,
        state: &mut ManagerState,
        key: &SubscriptionKey,
        generation: u64,
    ) -> Option<ActiveSubscription> {
        let sub = match state.subscriptions.get_mut(key) {
            Some(sub) if sub.generation == generation => sub,
            _ => return None,
        };
        if sub.reconnect_task.is_some() {
            debug!(%key, "Reconnection already in flight");
            return None;
        }

        let inner = Arc::clone(self);
        let task_key = key.clone();
        let cancel = sub.cancel.clone();
        sub.reconnect_task = Some(tokio::spawn(async move {
            inner.reconnect_loop(task_key, generation, cancel).await;
        }));
        sub.active.take()
    }

    async fn reconnect_loop(
        self: Arc<Self>,
        key: SubscriptionKey,
        generation: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let (attempt, store) = {
                let state = self.state.lock();
                match state.subscriptions.get(&key) {
                    Some(sub) if sub.generation == generation => {
                        (sub.reconnect_attempts, Arc::clone(&sub.store))
                    }
                    _ => return,
                }
            };

            let delay = self.config.backoff_delay(attempt);
            debug!(%key, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Scheduling reconnection");
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%key, "Reconnection cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = self.connect(&key, &store, generation).await;

            let mut state = self.state.lock();
            if !state.is_current(&key, generation) {
                drop(state);
                if let Ok(active) = outcome {
                    active.teardown(&key);
                }
                return;
            }
            let Some(sub) = state.subscriptions.get_mut(&key) else {
                return;
            };

            match outcome {
                Ok(active) => {
                    sub.reconnect_attempts = 0;
                    sub.reconnect_task = None;
                    let old = sub.active.replace(active);
                    drop(state);
                    info!(%key, "Subscription re-established");
                    if let Some(old) = old {
                        old.teardown(&key);
                    }
                    return;
                }
                Err(e) => {
                    sub.reconnect_attempts += 1;
                    let attempts = sub.reconnect_attempts;
                    if attempts >= self.config.max_attempts {
                        let removed = state.subscriptions.remove(&key);
                        drop(state);
                        let exhausted = SyncError::ReconnectionExhausted {
                            key: key.clone(),
                            attempts,
                        };
                        error!(%key, attempts, last_error = %e, "{}", exhausted);
                        if let Some(removed) = removed {
                            removed.dispose(&key);
                        }
                        return;
                    }
                    warn!(%key, attempt = attempts, error = %e, "Reconnection attempt failed");
                }
            }
        }
    }

    /// Fired by a cleanup timer that was not cancelled.
    fn run_cleanup(&self, entity: &str, token: &CancellationToken) {
        let removed = {
            let mut state = self.state.lock();
            // Cancellation happens under this lock, so this check is exact.
            if token.is_cancelled() {
                return;
            }
            state.cleanup_timers.remove(entity);
            if state.subscriber_counts.get(entity).copied().unwrap_or(0) > 0 {
                return;
            }
            state.subscriber_counts.remove(entity);
            state.take_entity(entity)
        };

        info!(entity, subscriptions = removed.len(), "No subscribers left, unsubscribing");
        for (key, sub) in removed {
            sub.dispose(&key);
        }
    }
}

/// Drain one subscription's events into its local store, in delivery order.
async fn run_pump(
    inner: Weak<Inner>,
    key: SubscriptionKey,
    generation: u64,
    store: Arc<dyn LocalCollection>,
    mut rx: UnboundedReceiver<StreamMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(StreamMessage::Events(events)) => {
                    apply_events(&key, store.as_ref(), events);
                }
                Some(StreamMessage::Error(message)) => {
                    warn!(%key, %message, "Subscription stream failed");
                    if let Some(inner) = inner.upgrade() {
                        inner.start_reconnect(&key, generation);
                    }
                    break;
                }
                None => {
                    debug!(%key, "Event stream closed");
                    break;
                }
            },
        }
    }
}

/// Apply one delivered batch within a single commit.
///
/// Events without a record id are logged and dropped; the rest of the batch
/// still applies. If the store rejects the batch, its writes are retried one
/// at a time so a single stale write cannot take the others down with it.
/// Returns the number of writes committed.
pub(crate) fn apply_events(
    key: &SubscriptionKey,
    store: &dyn LocalCollection,
    events: Vec<RecordEvent>,
) -> usize {
    let mut batch = WriteBatch::new();

    for event in events {
        let Some(id) = event.record.id() else {
            let err = SyncError::MalformedEvent(format!("{} event without record id", event.action));
            error!(%key, action = %event.action, "{}", err);
            continue;
        };
        match event.action {
            EventAction::Create => batch.insert(id, event.record),
            EventAction::Update => batch.upsert(id, event.record),
            EventAction::Delete => batch.delete(id),
        }
    }

    if batch.is_empty() {
        return 0;
    }

    let writes = batch.len();
    let ops = batch.ops().to_vec();
    match store.commit(batch) {
        Ok(()) => {
            debug!(%key, writes, "Applied event batch");
            writes
        }
        Err(e) => {
            warn!(%key, error = %e, writes, "Event batch rejected, applying writes one at a time");
            apply_each(key, store, ops)
        }
    }
}

/// Commit writes individually. A create for a record already present
/// replaces it; a delete for a record already absent is skipped.
fn apply_each(key: &SubscriptionKey, store: &dyn LocalCollection, ops: Vec<WriteOp>) -> usize {
    let mut applied = 0;

    for op in ops {
        let id = op.id().to_string();
        let replacement = match &op {
            WriteOp::Insert { record, .. } => Some(record.clone()),
            _ => None,
        };

        match (store.commit(WriteBatch::from(op)), replacement) {
            (Ok(()), _) => applied += 1,
            (Err(SyncError::DuplicateRecord(_)), Some(record)) => {
                debug!(%key, %id, "Create for existing record, replacing");
                let mut batch = WriteBatch::new();
                batch.upsert(id.clone(), record);
                match store.commit(batch) {
                    Ok(()) => applied += 1,
                    Err(e) => error!(%key, %id, error = %e, "Failed to apply write"),
                }
            }
            (Err(SyncError::RecordNotFound(_)), None) => {
                debug!(%key, %id, "Delete for absent record, skipping");
            }
            (Err(e), _) => error!(%key, %id, error = %e, "Failed to apply write"),
        }
    }

    applied
}

/// Manages remote subscriptions and mirrors their events into local stores.
///
/// Cheap to clone; clones share state. Every method that starts background
/// work spawns onto the current Tokio runtime.
///
/// # Panics
///
/// `subscribe`, `unsubscribe`, `unsubscribe_all`, `add_subscriber`,
/// `remove_subscriber` and `shutdown` panic if called outside a Tokio runtime.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Create a manager with the default configuration.
    pub fn new(remote: Arc<dyn RemoteSource>) -> Self {
        Self::with_config(remote, SubscriptionConfig::default())
    }

    pub fn with_config(remote: Arc<dyn RemoteSource>, config: SubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                config,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.inner.config
    }

    /// Subscribe `store` to `selector` on `entity`.
    ///
    /// Concurrent calls for the same key share one remote subscription and
    /// settle together. If the first attempt fails, its error is returned
    /// here while reconnection continues in the background.
    pub async fn subscribe(
        &self,
        entity: &str,
        store: Arc<dyn LocalCollection>,
        selector: Selector,
    ) -> Result<()> {
        if entity.is_empty() {
            return Err(SyncError::InvalidEntity(entity.to_string()));
        }
        match self.begin(SubscriptionKey::new(entity, selector), store) {
            Some(establishment) => establishment.await,
            None => Ok(()),
        }
    }

    /// Install the placeholder state and spawn the establishment, or join
    /// the one already in flight. None if already established.
    fn begin(&self, key: SubscriptionKey, store: Arc<dyn LocalCollection>) -> Option<Establishment> {
        let mut state = self.inner.state.lock();

        if let Some(pending) = state.pending.get(&key) {
            debug!(%key, "Joining in-flight subscription");
            return Some(pending.future.clone());
        }
        if state.subscriptions.contains_key(&key) {
            debug!(%key, "Already subscribed");
            return None;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state
            .subscriptions
            .insert(key.clone(), SubscriptionState::new(generation, Arc::clone(&store)));

        let task = tokio::spawn(Arc::clone(&self.inner).establish(key.clone(), store, generation));
        let task_key = key.clone();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::TaskFailed {
                    key: task_key,
                    message: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        state.pending.insert(
            key,
            PendingEstablishment {
                generation,
                future: future.clone(),
            },
        );
        Some(future)
    }

    /// Drop the subscription for one key. Takes effect immediately even
    /// though the remote teardown completes in the background.
    pub fn unsubscribe(&self, entity: &str, selector: &Selector) {
        let key = SubscriptionKey::new(entity, selector.clone());
        let removed = {
            let mut state = self.inner.state.lock();
            state.pending.remove(&key);
            state.subscriptions.remove(&key)
        };

        match removed {
            Some(sub) => {
                debug!(%key, "Unsubscribed");
                sub.dispose(&key);
            }
            None => debug!(%key, "Unsubscribe for unknown subscription"),
        }
    }

    /// Drop every selector's subscription for `entity`.
    pub fn unsubscribe_all(&self, entity: &str) {
        let removed = self.inner.state.lock().take_entity(entity);
        for (key, sub) in removed {
            debug!(%key, "Unsubscribed");
            sub.dispose(&key);
        }
    }

    /// True while a subscription exists for the key, including while the
    /// handshake or a reconnection is in flight.
    pub fn is_subscribed(&self, entity: &str, selector: &Selector) -> bool {
        let key = SubscriptionKey::new(entity, selector.clone());
        self.inner.state.lock().subscriptions.contains_key(&key)
    }

    pub fn subscription_status(
        &self,
        entity: &str,
        selector: &Selector,
    ) -> Option<SubscriptionStatus> {
        let key = SubscriptionKey::new(entity, selector.clone());
        self.inner
            .state
            .lock()
            .subscriptions
            .get(&key)
            .map(SubscriptionState::status)
    }

    /// Wait for the in-flight establishment using the configured timeout.
    pub async fn wait_for_subscription(&self, entity: &str, selector: &Selector) -> Result<()> {
        self.wait_for_subscription_timeout(entity, selector, self.inner.config.wait_timeout())
            .await
    }

    /// Wait for the in-flight establishment of a key to settle.
    ///
    /// Returns immediately when nothing is pending. A timeout here does not
    /// affect the manager's own retries.
    pub async fn wait_for_subscription_timeout(
        &self,
        entity: &str,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<()> {
        let key = SubscriptionKey::new(entity, selector.clone());
        let pending = self
            .inner
            .state
            .lock()
            .pending
            .get(&key)
            .map(|p| p.future.clone());

        let Some(establishment) = pending else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, establishment).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::SubscriptionTimeout {
                key,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Register interest in `entity`. The first subscriber cancels any
    /// pending cleanup and subscribes to the whole entity.
    pub fn add_subscriber(&self, entity: &str, store: Arc<dyn LocalCollection>) -> Result<()> {
        if entity.is_empty() {
            return Err(SyncError::InvalidEntity(entity.to_string()));
        }

        let first = {
            let mut state = self.inner.state.lock();
            let count = state.subscriber_counts.entry(entity.to_string()).or_insert(0);
            *count += 1;
            let first = *count == 1;
            if first {
                if let Some(timer) = state.cleanup_timers.remove(entity) {
                    timer.cancel();
                    debug!(entity, "Cancelled pending cleanup");
                }
            }
            first
        };

        if first {
            // Failures are logged by the establishment task.
            let _ = self.begin(SubscriptionKey::new(entity, Selector::All), store);
        }
        Ok(())
    }

    /// Drop interest in `entity`. When the last subscriber leaves, the
    /// entity is unsubscribed after the cleanup delay unless someone
    /// returns first.
    pub fn remove_subscriber(&self, entity: &str) {
        let mut state = self.inner.state.lock();
        let count = match state.subscriber_counts.get_mut(entity) {
            Some(count) if *count > 0 => count,
            _ => {
                warn!(entity, "remove_subscriber without matching add_subscriber");
                return;
            }
        };
        *count -= 1;
        if *count > 0 {
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = state.cleanup_timers.insert(entity.to_string(), token.clone()) {
            previous.cancel();
        }
        drop(state);

        let delay = self.inner.config.cleanup_delay();
        let inner = Arc::downgrade(&self.inner);
        let entity = entity.to_string();
        debug!(entity = %entity, delay_ms = delay.as_millis() as u64, "Armed cleanup timer");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(entity = %entity, "Cleanup cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.run_cleanup(&entity, &token);
                    }
                }
            }
        });
    }

    pub fn subscriber_count(&self, entity: &str) -> usize {
        self.inner
            .state
            .lock()
            .subscriber_counts
            .get(entity)
            .copied()
            .unwrap_or(0)
    }

    /// All keys with a subscription state, sorted.
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> =
            self.inner.state.lock().subscriptions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every subscription, counter and cleanup timer.
    pub fn shutdown(&self) {
        let removed: Vec<(SubscriptionKey, SubscriptionState)> = {
            let mut state = self.inner.state.lock();
            state.pending.clear();
            state.subscriber_counts.clear();
            for (_, timer) in state.cleanup_timers.drain() {
                timer.cancel();
            }
            state.subscriptions.drain().collect()
        };

        info!(subscriptions = removed.len(), "Shutting down subscription manager");
        for (key, sub) in removed {
            sub.dispose(&key);
        }
    }
}
