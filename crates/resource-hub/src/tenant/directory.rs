use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{
    Entity, EntityKind, Filter, Order, RecordId, RemoteBackend, Scoping, ScopedStore, StoreError,
    ValidationError,
};

use super::{TenantKey, TenantScope};

/// Portal sections a tenant can switch on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalFeature {
    Applications,
    Documents,
    Calculators,
    Alerts,
    Contact,
}

impl PortalFeature {
    pub const ALL: [PortalFeature; 5] = [
        PortalFeature::Applications,
        PortalFeature::Documents,
        PortalFeature::Calculators,
        PortalFeature::Alerts,
        PortalFeature::Contact,
    ];
}

fn enabled() -> bool {
    true
}

/// Feature switches stored in a tenant's settings. Missing switches are on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "enabled")]
    pub applications: bool,
    #[serde(default = "enabled")]
    pub documents: bool,
    #[serde(default = "enabled")]
    pub calculators: bool,
    #[serde(default = "enabled")]
    pub alerts: bool,
    #[serde(default = "enabled")]
    pub contact: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            applications: true,
            documents: true,
            calculators: true,
            alerts: true,
            contact: true,
        }
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: PortalFeature) -> bool {
        match feature {
            PortalFeature::Applications => self.applications,
            PortalFeature::Documents => self.documents,
            PortalFeature::Calculators => self.calculators,
            PortalFeature::Alerts => self.alerts,
            PortalFeature::Contact => self.contact,
        }
    }

    pub fn enabled_features(&self) -> Vec<PortalFeature> {
        PortalFeature::ALL
            .into_iter()
            .filter(|feature| self.is_enabled(*feature))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default)]
    pub theme_colors: BTreeMap<String, String>,
    #[serde(default)]
    pub features_enabled: FeatureFlags,
}

/// Organization record from the global `organizations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: RecordId,
    pub slug: TenantKey,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub settings: TenantSettings,
    #[serde(default = "enabled")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantDraft {
    pub slug: TenantKey,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub settings: TenantSettings,
    pub is_active: bool,
}

impl TenantDraft {
    pub fn new(slug: TenantKey, name: impl Into<String>) -> Self {
        Self {
            slug,
            name: name.into(),
            domain: None,
            logo_url: None,
            settings: TenantSettings::default(),
            is_active: true,
        }
    }

    pub fn with_settings(mut self, settings: TenantSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TenantPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<TenantSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Entity for Tenant {
    const KIND: EntityKind = EntityKind::Organizations;
    const SCOPING: Scoping = Scoping::Global;

    type Draft = TenantDraft;
    type Patch = TenantPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn tenant(&self) -> Option<&TenantKey> {
        None
    }

    fn validate_draft(draft: &TenantDraft) -> Result<(), ValidationError> {
        if draft.name.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "name" });
        }
        Ok(())
    }

    fn validate_patch(patch: &TenantPatch) -> Result<(), ValidationError> {
        if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ValidationError::MissingField { field: "name" });
        }
        Ok(())
    }

    fn default_order() -> Option<Order> {
        Some(Order::asc("name"))
    }
}

/// Looks up organization records by slug through the global scope.
#[derive(Clone)]
pub struct TenantDirectory {
    backend: Arc<dyn RemoteBackend>,
}

impl TenantDirectory {
    pub fn new(backend: Arc<dyn RemoteBackend>) -> Self {
        Self { backend }
    }

    /// Active organization registered under `slug`, if any.
    pub async fn lookup(&self, slug: &TenantKey) -> Result<Option<Tenant>, StoreError> {
        let store = ScopedStore::<Tenant>::new(self.backend.clone(), TenantScope::Global)?
            .with_filters(vec![Filter::eq("slug", slug.as_str())]);
        let snapshot = store.list().await?;
        Ok(snapshot
            .items
            .iter()
            .find(|tenant| &tenant.slug == slug && tenant.is_active)
            .cloned())
    }

    /// Feature switches for `slug`; an unregistered tenant gets every feature.
    pub async fn features(&self, slug: &TenantKey) -> Result<FeatureFlags, StoreError> {
        Ok(self
            .lookup(slug)
            .await?
            .map(|tenant| tenant.settings.features_enabled)
            .unwrap_or_default())
    }

    /// Inserts a new organization. A slug already held by any record, active or not, is refused.
    pub async fn register(&self, draft: TenantDraft) -> Result<Tenant, StoreError> {
        let store = ScopedStore::<Tenant>::new(self.backend.clone(), TenantScope::Global)?
            .with_filters(vec![Filter::eq("slug", draft.slug.as_str())]);
        let existing = store.list().await?;
        if existing.items.iter().any(|tenant| tenant.slug == draft.slug) {
            return Err(ValidationError::Duplicate {
                field: "slug",
                value: draft.slug.to_string(),
            }
            .into());
        }
        store.insert(draft).await
    }
}
