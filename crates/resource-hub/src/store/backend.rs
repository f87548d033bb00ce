use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::tenant::{TenantKey, TenantScope};

use super::entity::{EntityKind, Order, RecordId};
use super::error::RemoteError;

/// Equality filter applied on top of the tenant scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.field) == Some(&self.value)
    }
}

/// A scoped collection read.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub kind: EntityKind,
    pub scope: TenantScope,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

/// Storage seam over the remote data service. Payloads stay JSON here; typing happens in the
/// store so every entity shares one transport.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn select(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError>;

    async fn fetch(&self, kind: EntityKind, id: &RecordId) -> Result<Option<Value>, RemoteError>;

    async fn insert(&self, kind: EntityKind, record: Value) -> Result<Value, RemoteError>;

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        scope: &TenantScope,
        patch: Value,
    ) -> Result<Value, RemoteError>;

    async fn delete(
        &self,
        kind: EntityKind,
        id: &RecordId,
        scope: &TenantScope,
    ) -> Result<(), RemoteError>;
}

/// What happened to a row. The store never looks past this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Synthetic event emitted after a feed reconnects.
    Resync,
}

/// Notification delivered by a change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    #[serde(default)]
    pub tenant: Option<TenantKey>,
    pub change: ChangeKind,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn resync(kind: EntityKind, scope: &TenantScope) -> Self {
        Self {
            kind,
            tenant: scope.key().cloned(),
            change: ChangeKind::Resync,
            record_id: None,
            at: Utc::now(),
        }
    }
}

/// Subscription filter; the feed always delivers every event kind (`*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedFilter {
    pub kind: EntityKind,
    pub scope: TenantScope,
}

impl FeedFilter {
    pub fn new(kind: EntityKind, scope: TenantScope) -> Self {
        Self { kind, scope }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.kind == self.kind && self.scope.admits(event.tenant.as_ref())
    }

    pub const fn event_selector(&self) -> &'static str {
        "*"
    }
}

/// Receiving half of an open change-feed subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeStream {
    receiver: mpsc::Receiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(receiver: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the remote side dropped the subscription.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: &FeedFilter) -> Result<ChangeStream, RemoteError>;
}
