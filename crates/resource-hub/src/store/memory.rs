use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};

use crate::tenant::{TenantKey, TenantScope};

use super::backend::{
    ChangeEvent, ChangeFeed, ChangeKind, ChangeStream, CollectionQuery, FeedFilter, RemoteBackend,
};
use super::entity::{EntityKind, Order, RecordId, ID_FIELD, TENANT_FIELD};
use super::error::RemoteError;

type Tables = HashMap<EntityKind, BTreeMap<RecordId, Value>>;

/// In-process stand-in for the remote data service, including its change feed.
///
/// Used by the development server, the CLI demo, and tests. Clones share state.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryState>,
}

struct MemoryState {
    tables: Mutex<Tables>,
    sequence: AtomicU64,
    available: AtomicBool,
    events: broadcast::Sender<ChangeEvent>,
    feed_epoch: watch::Sender<u64>,
    active_feeds: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (feed_epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryState {
                tables: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(1),
                available: AtomicBool::new(true),
                events,
                feed_epoch,
                active_feeds: AtomicUsize::new(0),
            }),
        }
    }

    /// Simulates an outage: every call fails with `Unavailable` until restored.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Drops every open change-feed subscription, as a remote disconnect would.
    pub fn sever_feeds(&self) {
        self.inner.feed_epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Number of change-feed subscriptions currently open.
    pub fn active_feeds(&self) -> usize {
        self.inner.active_feeds.load(Ordering::SeqCst)
    }

    /// Raw stored row, for inspection.
    pub fn row(&self, kind: EntityKind, id: &RecordId) -> Option<Value> {
        self.tables()
            .ok()
            .and_then(|tables| tables.get(&kind).and_then(|rows| rows.get(id)).cloned())
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RemoteError> {
        self.inner
            .tables
            .lock()
            .map_err(|_| RemoteError::Unavailable("memory backend lock poisoned".to_string()))
    }

    fn ensure_available(&self) -> Result<(), RemoteError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("memory backend offline".to_string()))
        }
    }

    fn next_id(&self, kind: EntityKind) -> RecordId {
        let id = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        RecordId(format!("{}-{id:06}", kind.id_prefix()))
    }

    fn publish(&self, kind: EntityKind, row: &Value, change: ChangeKind, id: &RecordId) {
        let event = ChangeEvent {
            kind,
            tenant: row_tenant(row),
            change,
            record_id: Some(id.clone()),
            at: Utc::now(),
        };
        // No receivers just means nobody is subscribed.
        let _ = self.inner.events.send(event);
    }
}

fn row_tenant(row: &Value) -> Option<TenantKey> {
    row.get(TENANT_FIELD)
        .and_then(Value::as_str)
        .and_then(|value| TenantKey::new(value).ok())
}

fn now_value() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn compare_rows(a: &Value, b: &Value, order: &Order) -> CmpOrdering {
    let left = a.get(order.field);
    let right = b.get(order.field);
    let ordering = match (left, right) {
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(_), None) => CmpOrdering::Greater,
        (None, Some(_)) => CmpOrdering::Less,
        _ => CmpOrdering::Equal,
    };
    if order.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn select(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError> {
        self.ensure_available()?;
        let tables = self.tables()?;
        let mut rows: Vec<Value> = tables
            .get(&query.kind)
            .map(|rows| {
                rows.values()
                    .filter(|row| query.scope.admits(row_tenant(row).as_ref()))
                    .filter(|row| query.filters.iter().all(|filter| filter.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| compare_rows(a, b, order));
        }
        Ok(rows)
    }

    async fn fetch(&self, kind: EntityKind, id: &RecordId) -> Result<Option<Value>, RemoteError> {
        self.ensure_available()?;
        let tables = self.tables()?;
        Ok(tables.get(&kind).and_then(|rows| rows.get(id)).cloned())
    }

    async fn insert(&self, kind: EntityKind, record: Value) -> Result<Value, RemoteError> {
        self.ensure_available()?;
        let Value::Object(mut fields) = record else {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "insert body must be an object".to_string(),
            });
        };

        let id = self.next_id(kind);
        let now = now_value();
        fields.insert(ID_FIELD.to_string(), Value::String(id.0.clone()));
        fields
            .entry("created_at".to_string())
            .or_insert_with(|| now.clone());
        fields.entry("updated_at".to_string()).or_insert(now);
        let row = Value::Object(fields);

        self.tables()?
            .entry(kind)
            .or_default()
            .insert(id.clone(), row.clone());
        self.publish(kind, &row, ChangeKind::Insert, &id);
        Ok(row)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        scope: &TenantScope,
        patch: Value,
    ) -> Result<Value, RemoteError> {
        self.ensure_available()?;
        let Value::Object(changes) = patch else {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "update body must be an object".to_string(),
            });
        };

        let row = {
            let mut tables = self.tables()?;
            let row = tables
                .get_mut(&kind)
                .and_then(|rows| rows.get_mut(id))
                .filter(|row| scope.admits(row_tenant(row).as_ref()))
                .ok_or_else(|| RemoteError::NotFound {
                    kind,
                    id: id.clone(),
                })?;

            if let Value::Object(fields) = row {
                for (key, value) in changes {
                    fields.insert(key, value);
                }
                fields.insert("updated_at".to_string(), now_value());
            }
            row.clone()
        };

        self.publish(kind, &row, ChangeKind::Update, id);
        Ok(row)
    }

    async fn delete(
        &self,
        kind: EntityKind,
        id: &RecordId,
        scope: &TenantScope,
    ) -> Result<(), RemoteError> {
        self.ensure_available()?;
        let removed = {
            let mut tables = self.tables()?;
            let rows = tables.get_mut(&kind).ok_or_else(|| RemoteError::NotFound {
                kind,
                id: id.clone(),
            })?;
            let admitted = rows
                .get(id)
                .is_some_and(|row| scope.admits(row_tenant(row).as_ref()));
            if admitted {
                rows.remove(id)
            } else {
                None
            }
        };

        let row = removed.ok_or_else(|| RemoteError::NotFound {
            kind,
            id: id.clone(),
        })?;
        self.publish(kind, &row, ChangeKind::Delete, id);
        Ok(())
    }
}

/// Keeps [`MemoryBackend::active_feeds`] accurate for the lifetime of a forwarding task.
struct ActiveFeed(Arc<MemoryState>);

impl ActiveFeed {
    fn open(state: Arc<MemoryState>) -> Self {
        state.active_feeds.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for ActiveFeed {
    fn drop(&mut self) {
        self.0.active_feeds.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, filter: &FeedFilter) -> Result<ChangeStream, RemoteError> {
        self.ensure_available()?;

        let (sender, receiver) = mpsc::channel(64);
        let mut events = self.inner.events.subscribe();
        let mut epoch = self.inner.feed_epoch.subscribe();
        let filter = filter.clone();
        let active = ActiveFeed::open(self.inner.clone());

        tokio::spawn(async move {
            let _active = active;
            loop {
                tokio::select! {
                    _ = epoch.changed() => break,
                    _ = sender.closed() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if filter.matches(&event) && sender.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(ChangeStream::new(receiver))
    }
}
