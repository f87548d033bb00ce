use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::tenant::TenantKey;

use super::error::ValidationError;

/// Remote tables reachable through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Applications,
    Documents,
    Resources,
    Programs,
    Notifications,
    Alerts,
    FinancialCalculations,
    Organizations,
}

impl EntityKind {
    pub const fn table(self) -> &'static str {
        match self {
            EntityKind::Applications => "applications",
            EntityKind::Documents => "documents",
            EntityKind::Resources => "resources",
            EntityKind::Programs => "programs",
            EntityKind::Notifications => "notifications",
            EntityKind::Alerts => "alerts",
            EntityKind::FinancialCalculations => "financial_calculations",
            EntityKind::Organizations => "organizations",
        }
    }

    /// Prefix used when an in-process backend generates identifiers.
    pub const fn id_prefix(self) -> &'static str {
        match self {
            EntityKind::Applications => "app",
            EntityKind::Documents => "doc",
            EntityKind::Resources => "res",
            EntityKind::Programs => "prg",
            EntityKind::Notifications => "ntf",
            EntityKind::Alerts => "alr",
            EntityKind::FinancialCalculations => "calc",
            EntityKind::Organizations => "org",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Identifier wrapper for stored rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether rows of a table belong to a tenant or are global by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoping {
    Tenant,
    Global,
}

/// Sort order requested from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: &'static str,
    pub descending: bool,
}

impl Order {
    pub const fn desc(field: &'static str) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    pub const fn asc(field: &'static str) -> Self {
        Self {
            field,
            descending: false,
        }
    }
}

/// Whether status writes are checked against the workflow ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionMode {
    /// Any status value may be written, matching staff override workflows.
    #[default]
    Permissive,
    /// Status may only stay put or advance to a later stage.
    Enforced,
}

impl TransitionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "permissive" | "off" => Some(Self::Permissive),
            "enforced" | "strict" | "on" => Some(Self::Enforced),
            _ => None,
        }
    }
}

/// Field name carrying the owning tenant on every tenant-scoped row.
pub const TENANT_FIELD: &str = "tenant_id";
pub const ID_FIELD: &str = "id";

/// Schema descriptor binding a Rust type to a remote table.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    const SCOPING: Scoping = Scoping::Tenant;

    /// Insert payload, without id or tenant.
    type Draft: Serialize + Send + Sync;
    /// Partial update payload.
    type Patch: Serialize + Send + Sync;

    fn id(&self) -> &RecordId;
    fn tenant(&self) -> Option<&TenantKey>;

    fn validate_draft(draft: &Self::Draft) -> Result<(), ValidationError>;

    fn validate_patch(_patch: &Self::Patch) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Checks a patch against the stored row it will be applied to.
    fn validate_update(_current: &Self, _patch: &Self::Patch) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Only consulted in [`TransitionMode::Enforced`].
    fn check_transition(_current: &Self, _patch: &Self::Patch) -> Result<(), ValidationError> {
        Ok(())
    }

    fn default_order() -> Option<Order> {
        None
    }
}
