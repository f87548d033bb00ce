use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::tenant::{RequestContext, TenantKey, TenantResolver, TenantScope};

use super::backend::{CollectionQuery, Filter, RemoteBackend};
use super::entity::{Entity, RecordId, Scoping, TransitionMode, ID_FIELD, TENANT_FIELD};
use super::error::{RemoteError, StoreError, ValidationError};

/// In-memory materialization of a store's last successful read.
#[derive(Debug, Clone)]
pub struct Snapshot<E> {
    pub items: Arc<Vec<E>>,
    pub loading: bool,
    pub error: Option<String>,
    /// Read generation that last touched this snapshot.
    pub generation: u64,
    /// Set on every successful read; `None` until the first one lands.
    pub loaded_at: Option<DateTime<Utc>>,
}

impl<E> Default for Snapshot<E> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            loading: false,
            error: None,
            generation: 0,
            loaded_at: None,
        }
    }
}

impl<E> Snapshot<E> {
    pub fn is_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Tenant-scoped facade over one remote table.
///
/// Reads are tagged with a generation token when issued; a result is committed only while it is
/// still the most recently issued read, so an older response arriving late can never replace a
/// newer one. Once [`detach`](Self::detach)ed the store commits nothing further.
pub struct ScopedStore<E: Entity> {
    backend: Arc<dyn RemoteBackend>,
    scope: TenantScope,
    filters: Vec<Filter>,
    transitions: TransitionMode,
    snapshot: watch::Sender<Snapshot<E>>,
    issued: AtomicU64,
    detached: AtomicBool,
}

impl<E: Entity> ScopedStore<E> {
    /// Global entities are always read through [`TenantScope::Global`], whatever `scope` says.
    pub fn new(backend: Arc<dyn RemoteBackend>, scope: TenantScope) -> Result<Self, StoreError> {
        let scope = match E::SCOPING {
            Scoping::Tenant if scope.key().is_none() => {
                return Err(StoreError::Unscoped { kind: E::KIND });
            }
            Scoping::Tenant => scope,
            Scoping::Global => {
                if scope != TenantScope::Global {
                    debug!(kind = %E::KIND, requested = %scope, "global entity; widening store scope");
                }
                TenantScope::Global
            }
        };

        let (snapshot, _) = watch::channel(Snapshot::default());
        Ok(Self {
            backend,
            scope,
            filters: Vec::new(),
            transitions: TransitionMode::default(),
            snapshot,
            issued: AtomicU64::new(0),
            detached: AtomicBool::new(false),
        })
    }

    /// Store scoped to whichever tenant `context` resolves to.
    pub fn for_request(
        backend: Arc<dyn RemoteBackend>,
        resolver: &TenantResolver,
        context: &RequestContext,
    ) -> Result<Self, StoreError> {
        Self::new(backend, resolver.resolve(context))
    }

    /// Narrows every read with additional equality filters.
    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_transitions(mut self, mode: TransitionMode) -> Self {
        self.transitions = mode;
        self
    }

    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    pub fn snapshot(&self) -> Snapshot<E> {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<E>> {
        self.snapshot.subscribe()
    }

    pub fn get(&self, id: &RecordId) -> Option<E> {
        self.snapshot
            .borrow()
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub fn detach(&self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            debug!(kind = %E::KIND, scope = %self.scope, "store detached");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Reads the scoped collection and commits it as the visible snapshot.
    ///
    /// A failed read leaves the previous items in place and records the error. A read overtaken
    /// by a newer one returns the current snapshot untouched.
    pub async fn list(&self) -> Result<Snapshot<E>, StoreError> {
        self.ensure_attached()?;
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.snapshot.send_modify(|snapshot| snapshot.loading = true);
        let _pending = PendingRead {
            store: self,
            generation,
        };

        let result = self.read().await;
        self.commit(generation, result)
    }

    pub async fn refetch(&self) -> Result<Snapshot<E>, StoreError> {
        self.list().await
    }

    pub async fn insert(&self, draft: E::Draft) -> Result<E, StoreError> {
        self.ensure_attached()?;
        E::validate_draft(&draft)?;

        let mut payload = to_object(&draft)?;
        if let Some(key) = self.tenant_key() {
            payload.insert(TENANT_FIELD.to_string(), Value::String(key.to_string()));
        }

        let stored = self.backend.insert(E::KIND, Value::Object(payload)).await?;
        let record = self.decode(stored)?;
        self.ensure_in_scope(&record)?;
        info!(kind = %E::KIND, scope = %self.scope, id = %record.id(), "record inserted");

        self.refresh_after_mutation().await;
        Ok(record)
    }

    pub async fn update(&self, id: &RecordId, patch: E::Patch) -> Result<E, StoreError> {
        self.ensure_attached()?;
        E::validate_patch(&patch)?;

        let current = self.owned_record(id).await?;
        E::validate_update(&current, &patch)?;
        if self.transitions == TransitionMode::Enforced {
            E::check_transition(&current, &patch)?;
        }

        let payload = to_object(&patch)?;
        if payload.contains_key(TENANT_FIELD) {
            return Err(ValidationError::InvalidField {
                field: TENANT_FIELD,
                reason: "records cannot move between tenants".to_string(),
            }
            .into());
        }
        if payload.contains_key(ID_FIELD) {
            return Err(ValidationError::InvalidField {
                field: ID_FIELD,
                reason: "record ids are assigned on insert".to_string(),
            }
            .into());
        }

        let updated = self
            .backend
            .update(E::KIND, id, &self.scope, Value::Object(payload))
            .await?;
        let record = self.decode(updated)?;
        self.ensure_in_scope(&record)?;
        info!(kind = %E::KIND, scope = %self.scope, %id, "record updated");

        self.refresh_after_mutation().await;
        Ok(record)
    }

    pub async fn remove(&self, id: &RecordId) -> Result<(), StoreError> {
        self.ensure_attached()?;
        self.owned_record(id).await?;

        self.backend.delete(E::KIND, id, &self.scope).await?;
        info!(kind = %E::KIND, scope = %self.scope, %id, "record removed");

        self.refresh_after_mutation().await;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<E>, StoreError> {
        let query = CollectionQuery {
            kind: E::KIND,
            scope: self.scope.clone(),
            filters: self.filters.clone(),
            order: E::default_order(),
        };

        let rows = self.backend.select(&query).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let record = self.decode(row)?;
            self.ensure_in_scope(&record)?;
            items.push(record);
        }
        Ok(items)
    }

    fn commit(
        &self,
        generation: u64,
        result: Result<Vec<E>, StoreError>,
    ) -> Result<Snapshot<E>, StoreError> {
        match result {
            Ok(items) => {
                let count = items.len();
                let applied = self.snapshot.send_if_modified(|snapshot| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    snapshot.items = Arc::new(items);
                    snapshot.loading = false;
                    snapshot.error = None;
                    snapshot.generation = generation;
                    snapshot.loaded_at = Some(Utc::now());
                    true
                });

                if applied {
                    debug!(kind = %E::KIND, scope = %self.scope, generation, count, "snapshot committed");
                } else if self.is_detached() {
                    return Err(StoreError::Detached { kind: E::KIND });
                } else {
                    debug!(kind = %E::KIND, scope = %self.scope, generation, "discarding superseded read");
                }
                Ok(self.snapshot())
            }
            Err(err) => {
                let message = err.to_string();
                let applied = self.snapshot.send_if_modified(|snapshot| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    snapshot.loading = false;
                    snapshot.error = Some(message);
                    snapshot.generation = generation;
                    true
                });
                if applied {
                    warn!(kind = %E::KIND, scope = %self.scope, generation, error = %err, "read failed; keeping previous snapshot");
                }
                Err(err)
            }
        }
    }

    async fn owned_record(&self, id: &RecordId) -> Result<E, StoreError> {
        let row = self
            .backend
            .fetch(E::KIND, id)
            .await?
            .ok_or_else(|| RemoteError::NotFound {
                kind: E::KIND,
                id: id.clone(),
            })?;
        let record = self.decode(row)?;
        self.ensure_in_scope(&record)?;
        Ok(record)
    }

    async fn refresh_after_mutation(&self) {
        if let Err(err) = self.list().await {
            warn!(kind = %E::KIND, scope = %self.scope, error = %err, "refetch after mutation failed");
        }
    }

    fn ensure_in_scope(&self, record: &E) -> Result<(), StoreError> {
        if E::SCOPING == Scoping::Global || self.scope.admits(record.tenant()) {
            return Ok(());
        }
        warn!(kind = %E::KIND, scope = %self.scope, id = %record.id(), "record outside tenant scope");
        Err(StoreError::scope_violation(
            E::KIND,
            record.id().clone(),
            record.tenant(),
            &self.scope,
        ))
    }

    fn ensure_attached(&self) -> Result<(), StoreError> {
        if self.is_detached() {
            return Err(StoreError::Detached { kind: E::KIND });
        }
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_detached() && self.issued.load(Ordering::SeqCst) == generation
    }

    fn tenant_key(&self) -> Option<&TenantKey> {
        match E::SCOPING {
            Scoping::Tenant => self.scope.key(),
            Scoping::Global => None,
        }
    }

    fn decode(&self, row: Value) -> Result<E, StoreError> {
        serde_json::from_value(row).map_err(|err| {
            StoreError::Remote(RemoteError::Decode {
                kind: E::KIND,
                message: err.to_string(),
            })
        })
    }
}

/// Clears `loading` when a read future is dropped before it commits.
struct PendingRead<'a, E: Entity> {
    store: &'a ScopedStore<E>,
    generation: u64,
}

impl<E: Entity> Drop for PendingRead<'_, E> {
    fn drop(&mut self) {
        let store = self.store;
        let generation = self.generation;
        let cleared = store.snapshot.send_if_modified(|snapshot| {
            if !snapshot.loading || !store.is_current(generation) {
                return false;
            }
            snapshot.loading = false;
            true
        });
        if cleared {
            debug!(kind = %E::KIND, scope = %store.scope, generation, "read cancelled before commit");
        }
    }
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::NotAnObject.into()),
        Err(err) => Err(ValidationError::InvalidField {
            field: "payload",
            reason: err.to_string(),
        }
        .into()),
    }
}
