use crate::tenant::{TenantKey, TenantScope};

use super::entity::{EntityKind, RecordId};

/// Failure talking to the remote data service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote service unavailable: {0}")]
    Unavailable(String),
    #[error("remote service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("record {id} not found in {kind}")]
    NotFound { kind: EntityKind, id: RecordId },
    #[error("unable to decode {kind} payload: {message}")]
    Decode { kind: EntityKind, message: String },
}

/// Malformed insert or update payloads, caught before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("{field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("document '{name}' is not in the required document list")]
    UnknownDocument { name: String },
    #[error("status cannot move from {from} to {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("payload must serialize to a JSON object")]
    NotAnObject,
    #[error("{field} '{value}' is already registered")]
    Duplicate { field: &'static str, value: String },
}

/// Error surfaced by every [`ScopedStore`](super::ScopedStore) operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} record {id} belongs to {owner} and is outside {scope}")]
    ScopeViolation {
        kind: EntityKind,
        id: RecordId,
        owner: String,
        scope: TenantScope,
    },
    #[error("{kind} is tenant-scoped and cannot be accessed without a tenant")]
    Unscoped { kind: EntityKind },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("store for {kind} was detached from its owner")]
    Detached { kind: EntityKind },
}

impl StoreError {
    pub(crate) fn scope_violation(
        kind: EntityKind,
        id: RecordId,
        owner: Option<&TenantKey>,
        scope: &TenantScope,
    ) -> Self {
        StoreError::ScopeViolation {
            kind,
            id,
            owner: owner
                .map(|key| format!("tenant:{key}"))
                .unwrap_or_else(|| "no tenant".to_string()),
            scope: scope.clone(),
        }
    }

    pub fn is_scope_violation(&self) -> bool {
        matches!(self, StoreError::ScopeViolation { .. })
    }
}
