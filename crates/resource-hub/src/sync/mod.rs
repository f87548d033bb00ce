//! Live change-feed subscriptions that keep scoped stores fresh.
//!
//! Events are treated as opaque invalidations: any matching event triggers a full refetch of the
//! bound store. Bursts that arrive while a refetch is running collapse into a single follow-up
//! refetch, and a reconnected feed always forces one resync read since events may have been missed
//! while it was down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{ChangeEvent, ChangeFeed, Entity, EntityKind, FeedFilter, ScopedStore, StoreError};
use crate::tenant::TenantScope;

/// Reconnect schedule for dropped change feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let mut backoff = self.initial_backoff_ms as f64;
        for _ in 1..attempt {
            backoff *= self.backoff_multiplier;
            if backoff >= self.max_backoff_ms as f64 {
                break;
            }
        }
        let ms = backoff.min(self.max_backoff_ms as f64).round().max(0.0) as u64;
        Duration::from_millis(ms)
    }
}

/// Connection state of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
    /// Retries exhausted; the bound store is no longer kept fresh.
    Lost { reason: String },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("a subscription for {kind} in {scope} is already active")]
    DuplicateSubscription { kind: EntityKind, scope: TenantScope },
    #[error("no subscription for {kind} in {scope}")]
    NotSubscribed { kind: EntityKind, scope: TenantScope },
    #[error("live sync has been unmounted")]
    Unmounted,
}

/// Receiver of change notifications for one `(entity, scope)` pair.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, event: &ChangeEvent);

    /// Called when the owner unmounts; nothing may be applied afterwards.
    fn detach(&self) {}
}

#[async_trait]
impl<E: Entity> ChangeHandler for ScopedStore<E> {
    async fn on_change(&self, event: &ChangeEvent) {
        match self.refetch().await {
            Ok(snapshot) => {
                debug!(kind = %event.kind, change = ?event.change, items = snapshot.len(), "store refreshed from change feed");
            }
            Err(StoreError::Detached { .. }) => {}
            Err(err) => {
                warn!(kind = %event.kind, error = %err, "refetch after change event failed");
            }
        }
    }

    fn detach(&self) {
        ScopedStore::detach(self);
    }
}

struct Subscription {
    handler: Arc<dyn ChangeHandler>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owner of a set of change-feed subscriptions, at most one per `(entity, scope)`.
///
/// Mirrors the lifetime of the surface that displays the bound stores: [`unmount`](Self::unmount)
/// closes every subscription and detaches every handler, and dropping the owner aborts whatever is
/// still running.
pub struct LiveSync {
    feed: Arc<dyn ChangeFeed>,
    retry: RetryPolicy,
    subscriptions: Mutex<HashMap<FeedFilter, Subscription>>,
    unmounted: AtomicBool,
}

impl LiveSync {
    pub fn new(feed: Arc<dyn ChangeFeed>, retry: RetryPolicy) -> Self {
        Self {
            feed,
            retry,
            subscriptions: Mutex::new(HashMap::new()),
            unmounted: AtomicBool::new(false),
        }
    }

    /// Opens a subscription that calls `handler` on every matching event.
    pub fn subscribe(
        &self,
        kind: EntityKind,
        scope: TenantScope,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<watch::Receiver<SyncState>, SyncError> {
        if self.unmounted.load(Ordering::SeqCst) {
            return Err(SyncError::Unmounted);
        }

        let filter = FeedFilter::new(kind, scope);
        let mut subscriptions = self.subscriptions();
        if subscriptions.contains_key(&filter) {
            return Err(SyncError::DuplicateSubscription {
                kind: filter.kind,
                scope: filter.scope,
            });
        }

        let (state_tx, state_rx) = watch::channel(SyncState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_feed(
            self.feed.clone(),
            filter.clone(),
            handler.clone(),
            self.retry.clone(),
            state_tx,
            shutdown_rx,
        ));

        info!(kind = %filter.kind, scope = %filter.scope, "change feed subscription opened");
        subscriptions.insert(
            filter,
            Subscription {
                handler,
                shutdown,
                task,
            },
        );
        Ok(state_rx)
    }

    /// Subscribes `store` to changes of its own entity kind and scope.
    pub fn bind<E: Entity>(
        &self,
        store: Arc<ScopedStore<E>>,
    ) -> Result<watch::Receiver<SyncState>, SyncError> {
        let scope = store.scope().clone();
        self.subscribe(E::KIND, scope, store)
    }

    /// Closes one subscription and waits for its task to finish.
    pub async fn unsubscribe(&self, kind: EntityKind, scope: &TenantScope) -> Result<(), SyncError> {
        let filter = FeedFilter::new(kind, scope.clone());
        let subscription = self
            .subscriptions()
            .remove(&filter)
            .ok_or_else(|| SyncError::NotSubscribed {
                kind,
                scope: scope.clone(),
            })?;

        let _ = subscription.shutdown.send(true);
        if let Err(err) = subscription.task.await {
            warn!(kind = %kind, scope = %scope, error = %err, "change feed task ended abnormally");
        }
        info!(kind = %kind, scope = %scope, "change feed subscription closed");
        Ok(())
    }

    /// Detaches every handler and closes every subscription. Further subscribes are refused.
    pub async fn unmount(&self) {
        self.unmounted.store(true, Ordering::SeqCst);
        let drained: Vec<(FeedFilter, Subscription)> = self.subscriptions().drain().collect();

        for (_, subscription) in &drained {
            subscription.handler.detach();
            let _ = subscription.shutdown.send(true);
            subscription.task.abort();
        }
        for (filter, subscription) in drained {
            match subscription.task.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    warn!(kind = %filter.kind, scope = %filter.scope, error = %err, "change feed task ended abnormally");
                }
            }
        }
        info!("live sync unmounted");
    }

    pub fn active(&self) -> usize {
        self.subscriptions().len()
    }

    pub fn is_subscribed(&self, kind: EntityKind, scope: &TenantScope) -> bool {
        self.subscriptions()
            .contains_key(&FeedFilter::new(kind, scope.clone()))
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<FeedFilter, Subscription>> {
        // Entries are only inserted and removed whole, so a poisoned map is still consistent.
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, subscription) in subscriptions.drain() {
            subscription.handler.detach();
            subscription.task.abort();
        }
    }
}

async fn run_feed(
    feed: Arc<dyn ChangeFeed>,
    filter: FeedFilter,
    handler: Arc<dyn ChangeHandler>,
    retry: RetryPolicy,
    state: watch::Sender<SyncState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut connected_before = false;

    'connect: loop {
        if attempt > 0 {
            if attempt > retry.max_retries {
                warn!(kind = %filter.kind, scope = %filter.scope, attempts = attempt - 1, "change feed lost");
                let reason = format!("change feed unavailable after {} retries", retry.max_retries);
                let _ = state.send(SyncState::Lost { reason });
                return;
            }
            let _ = state.send(SyncState::Reconnecting { attempt });
            tokio::select! {
                _ = shutdown.changed() => break 'connect,
                _ = tokio::time::sleep(retry.backoff(attempt)) => {}
            }
        }

        let subscribed = tokio::select! {
            _ = shutdown.changed() => break 'connect,
            subscribed = feed.subscribe(&filter) => subscribed,
        };
        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(err) => {
                attempt += 1;
                warn!(kind = %filter.kind, scope = %filter.scope, attempt, error = %err, "change feed subscribe failed");
                continue;
            }
        };

        let _ = state.send(SyncState::Live);
        info!(kind = %filter.kind, scope = %filter.scope, resync = connected_before, "change feed live");
        if connected_before {
            handler
                .on_change(&ChangeEvent::resync(filter.kind, &filter.scope))
                .await;
        }
        connected_before = true;

        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => break 'connect,
                next = stream.next() => next,
            };
            let Some(event) = next else {
                warn!(kind = %filter.kind, scope = %filter.scope, "change feed dropped");
                attempt = 1;
                continue 'connect;
            };
            if !filter.matches(&event) {
                continue;
            }

            let mut coalesced = 0usize;
            while stream.try_next().is_some() {
                coalesced += 1;
            }
            if coalesced > 0 {
                debug!(kind = %filter.kind, scope = %filter.scope, coalesced, "coalesced change events");
            }
            handler.on_change(&event).await;
        }
    }

    let _ = state.send(SyncState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(9), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn retry_policy_fills_missing_fields_with_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{ "max_retries": 2 }"#).expect("policy decodes");
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_backoff_ms, 1_000);
        assert_eq!(policy.max_backoff_ms, 30_000);
    }

    #[test]
    fn sync_state_serializes_with_a_tag() {
        let value = serde_json::to_value(SyncState::Reconnecting { attempt: 2 }).expect("encode");
        assert_eq!(value, serde_json::json!({ "state": "reconnecting", "attempt": 2 }));
    }
}
