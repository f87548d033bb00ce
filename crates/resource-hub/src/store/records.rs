use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::progress::stage_of;
use crate::tenant::TenantKey;

use super::entity::{Entity, EntityKind, Order, RecordId};
use super::error::ValidationError;

/// Documents every new housing application asks for unless the caller overrides them.
pub const STANDARD_REQUIRED_DOCUMENTS: [&str; 6] = [
    "Photo ID",
    "Proof of Income",
    "Social Security Card",
    "Birth Certificates",
    "Landlord References",
    "Bank Statements",
];

/// Review status of a housing-assistance application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Submitted,
    UnderReview,
    Approved,
    Denied,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Denied => "denied",
        }
    }

    pub const fn is_decided(self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Denied)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: RecordId,
    pub tenant_id: TenantKey,
    pub applicant_name: String,
    #[serde(default)]
    pub applicant_email: Option<String>,
    #[serde(default)]
    pub applicant_phone: Option<String>,
    pub application_type: String,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub completed_documents: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationDraft {
    pub applicant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_phone: Option<String>,
    pub application_type: String,
    pub status: ApplicationStatus,
    pub required_documents: Vec<String>,
    pub completed_documents: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ApplicationDraft {
    /// New submission asking for the standard document list.
    pub fn new(applicant_name: impl Into<String>, application_type: impl Into<String>) -> Self {
        Self {
            applicant_name: applicant_name.into(),
            applicant_email: None,
            applicant_phone: None,
            application_type: application_type.into(),
            status: ApplicationStatus::Submitted,
            required_documents: STANDARD_REQUIRED_DOCUMENTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            completed_documents: BTreeSet::new(),
            notes: None,
        }
    }

    pub fn with_required_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_documents = documents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_contact(mut self, email: Option<String>, phone: Option<String>) -> Self {
        self.applicant_email = email;
        self.applicant_phone = phone;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_documents: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_phone: Option<String>,
}

impl ApplicationPatch {
    pub fn status(status: ApplicationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            completed_documents: Some(documents.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl Entity for Application {
    const KIND: EntityKind = EntityKind::Applications;

    type Draft = ApplicationDraft;
    type Patch = ApplicationPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn tenant(&self) -> Option<&TenantKey> {
        Some(&self.tenant_id)
    }

    fn validate_draft(draft: &ApplicationDraft) -> Result<(), ValidationError> {
        if draft.applicant_name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "applicant_name",
            });
        }
        if draft.application_type.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "application_type",
            });
        }

        let mut seen = HashSet::new();
        for name in &draft.required_documents {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "required_documents",
                    reason: "document names must not be blank".to_string(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ValidationError::InvalidField {
                    field: "required_documents",
                    reason: format!("'{name}' is listed more than once"),
                });
            }
        }

        if let Some(name) = draft
            .completed_documents
            .iter()
            .find(|name| !seen.contains(name.as_str()))
        {
            return Err(ValidationError::UnknownDocument { name: name.clone() });
        }

        Ok(())
    }

    fn validate_update(current: &Self, patch: &ApplicationPatch) -> Result<(), ValidationError> {
        if let Some(completed) = &patch.completed_documents {
            if let Some(name) = completed
                .iter()
                .find(|name| !current.required_documents.contains(name))
            {
                return Err(ValidationError::UnknownDocument { name: name.clone() });
            }
        }
        Ok(())
    }

    fn check_transition(current: &Self, patch: &ApplicationPatch) -> Result<(), ValidationError> {
        let Some(next) = patch.status else {
            return Ok(());
        };
        if next == current.status || stage_of(next) > stage_of(current.status) {
            return Ok(());
        }
        Err(ValidationError::IllegalTransition {
            from: current.status.label(),
            to: next.label(),
        })
    }

    fn default_order() -> Option<Order> {
        Some(Order::desc("created_at"))
    }
}

/// Supporting document owned by an application.
///
/// `is_uploaded` and `uploaded_at` move together; [`DocumentPatch`] only offers constructors that
/// keep them consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: RecordId,
    pub tenant_id: TenantKey,
    pub application_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_uploaded: bool,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn is_consistent(&self) -> bool {
        self.is_uploaded == self.uploaded_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentDraft {
    pub application_id: RecordId,
    pub name: String,
    pub description: String,
    pub is_uploaded: bool,
}

impl DocumentDraft {
    pub fn new(
        application_id: RecordId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            application_id,
            name: name.into(),
            description: description.into(),
            is_uploaded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentPatch {
    is_uploaded: bool,
    uploaded_at: Option<DateTime<Utc>>,
    original_filename: Option<String>,
    file_size: Option<u64>,
    mime_type: Option<String>,
}

impl DocumentPatch {
    pub fn uploaded(
        original_filename: impl Into<String>,
        file_size: u64,
        mime_type: Option<String>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            is_uploaded: true,
            uploaded_at: Some(uploaded_at),
            original_filename: Some(original_filename.into()),
            file_size: Some(file_size),
            mime_type,
        }
    }

    pub fn cleared() -> Self {
        Self {
            is_uploaded: false,
            uploaded_at: None,
            original_filename: None,
            file_size: None,
            mime_type: None,
        }
    }
}

impl Entity for Document {
    const KIND: EntityKind = EntityKind::Documents;

    type Draft = DocumentDraft;
    type Patch = DocumentPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn tenant(&self) -> Option<&TenantKey> {
        Some(&self.tenant_id)
    }

    fn validate_draft(draft: &DocumentDraft) -> Result<(), ValidationError> {
        if draft.application_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "application_id",
            });
        }
        if draft.name.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "name" });
        }
        if draft.is_uploaded {
            return Err(ValidationError::InvalidField {
                field: "is_uploaded",
                reason: "new documents start out missing".to_string(),
            });
        }
        Ok(())
    }

    fn validate_patch(patch: &DocumentPatch) -> Result<(), ValidationError> {
        if patch.is_uploaded != patch.uploaded_at.is_some() {
            return Err(ValidationError::InvalidField {
                field: "uploaded_at",
                reason: "must be set exactly when the document is uploaded".to_string(),
            });
        }
        if patch.is_uploaded
            && patch
                .original_filename
                .as_deref()
                .map_or(true, |name| name.trim().is_empty())
        {
            return Err(ValidationError::MissingField {
                field: "original_filename",
            });
        }
        Ok(())
    }
}

/// Marker naming the table behind a [`ContentRecord`].
pub trait ContentKind: fmt::Debug + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
}

macro_rules! content_kind {
    ($marker:ident, $kind:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $marker;

        impl ContentKind for $marker {
            const KIND: EntityKind = $kind;
        }
    };
}

content_kind!(ResourceKind, EntityKind::Resources);
content_kind!(ProgramKind, EntityKind::Programs);
content_kind!(NotificationKind, EntityKind::Notifications);
content_kind!(AlertKind, EntityKind::Alerts);

/// Tenant-scoped display content: resources, programs, notifications, and alerts all share this
/// shape and differ only in the table they live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ContentRecord<K: ContentKind> {
    pub id: RecordId,
    pub tenant_id: TenantKey,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    kind: PhantomData<K>,
}

fn default_active() -> bool {
    true
}

pub type Resource = ContentRecord<ResourceKind>;
pub type Program = ContentRecord<ProgramKind>;
pub type Notification = ContentRecord<NotificationKind>;
pub type Alert = ContentRecord<AlertKind>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentDraft {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub details: Map<String, Value>,
    pub is_active: bool,
}

impl ContentDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            category: None,
            details: Map::new(),
            is_active: true,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl<K: ContentKind> Entity for ContentRecord<K> {
    const KIND: EntityKind = K::KIND;

    type Draft = ContentDraft;
    type Patch = ContentPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn tenant(&self) -> Option<&TenantKey> {
        Some(&self.tenant_id)
    }

    fn validate_draft(draft: &ContentDraft) -> Result<(), ValidationError> {
        if draft.title.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "title" });
        }
        Ok(())
    }

    fn validate_patch(patch: &ContentPatch) -> Result<(), ValidationError> {
        if patch
            .title
            .as_deref()
            .is_some_and(|title| title.trim().is_empty())
        {
            return Err(ValidationError::MissingField { field: "title" });
        }
        Ok(())
    }

    fn default_order() -> Option<Order> {
        Some(Order::desc("created_at"))
    }
}

/// Which calculator produced a [`FinancialCalculation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    Loan,
    Income,
    Utility,
}

/// Per-tenant history of calculator runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialCalculation {
    pub id: RecordId,
    pub tenant_id: TenantKey,
    pub calculation_type: CalculationType,
    pub input_data: Value,
    pub result_data: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialCalculationDraft {
    pub calculation_type: CalculationType,
    pub input_data: Value,
    pub result_data: Value,
}

impl FinancialCalculationDraft {
    pub fn from_run<I: Serialize, R: Serialize>(
        calculation_type: CalculationType,
        input: &I,
        result: &R,
    ) -> Result<Self, ValidationError> {
        let encode = |value: Result<Value, serde_json::Error>, field: &'static str| {
            value.map_err(|err| ValidationError::InvalidField {
                field,
                reason: err.to_string(),
            })
        };
        Ok(Self {
            calculation_type,
            input_data: encode(serde_json::to_value(input), "input_data")?,
            result_data: encode(serde_json::to_value(result), "result_data")?,
        })
    }
}

impl Entity for FinancialCalculation {
    const KIND: EntityKind = EntityKind::FinancialCalculations;

    type Draft = FinancialCalculationDraft;
    type Patch = Map<String, Value>;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn tenant(&self) -> Option<&TenantKey> {
        Some(&self.tenant_id)
    }

    fn validate_draft(draft: &FinancialCalculationDraft) -> Result<(), ValidationError> {
        if !draft.input_data.is_object() {
            return Err(ValidationError::InvalidField {
                field: "input_data",
                reason: "expected an object".to_string(),
            });
        }
        Ok(())
    }

    fn default_order() -> Option<Order> {
        Some(Order::desc("created_at"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application(status: ApplicationStatus) -> Application {
        let now = Utc::now();
        Application {
            id: RecordId::new("app-000001"),
            tenant_id: TenantKey::new("dndc").expect("valid"),
            applicant_name: "Rosa Diaz".to_string(),
            applicant_email: None,
            applicant_phone: None,
            application_type: "mission_180".to_string(),
            status,
            required_documents: vec!["Photo ID".to_string(), "Proof of Income".to_string()],
            completed_documents: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            notes: None,
        }
    }

    #[test]
    fn draft_defaults_to_standard_documents() {
        let draft = ApplicationDraft::new("Rosa Diaz", "mission_180");
        assert_eq!(draft.required_documents.len(), 6);
        assert_eq!(draft.status, ApplicationStatus::Submitted);
        assert!(Application::validate_draft(&draft).is_ok());
    }

    #[test]
    fn draft_rejects_duplicate_documents() {
        let draft = ApplicationDraft::new("Rosa Diaz", "mission_180")
            .with_required_documents(["Photo ID", "Photo ID"]);
        assert!(matches!(
            Application::validate_draft(&draft),
            Err(ValidationError::InvalidField {
                field: "required_documents",
                ..
            })
        ));
    }

    #[test]
    fn completed_documents_must_be_required() {
        let current = application(ApplicationStatus::Submitted);
        let patch = ApplicationPatch::completed_documents(["Lease"]);
        assert_eq!(
            Application::validate_update(&current, &patch),
            Err(ValidationError::UnknownDocument {
                name: "Lease".to_string()
            })
        );
    }

    #[test]
    fn transitions_only_move_forward() {
        let review = application(ApplicationStatus::UnderReview);
        assert!(Application::check_transition(
            &review,
            &ApplicationPatch::status(ApplicationStatus::Approved)
        )
        .is_ok());
        assert!(Application::check_transition(
            &review,
            &ApplicationPatch::status(ApplicationStatus::UnderReview)
        )
        .is_ok());
        assert_eq!(
            Application::check_transition(
                &review,
                &ApplicationPatch::status(ApplicationStatus::Submitted)
            ),
            Err(ValidationError::IllegalTransition {
                from: "under_review",
                to: "submitted"
            })
        );

        let approved = application(ApplicationStatus::Approved);
        assert!(Application::check_transition(
            &approved,
            &ApplicationPatch::status(ApplicationStatus::Denied)
        )
        .is_err());
    }

    #[test]
    fn document_patches_keep_upload_fields_consistent() {
        let uploaded = DocumentPatch::uploaded("id.pdf", 2048, None, Utc::now());
        assert!(Document::validate_patch(&uploaded).is_ok());
        assert!(Document::validate_patch(&DocumentPatch::cleared()).is_ok());

        let blank_name = DocumentPatch::uploaded(" ", 10, None, Utc::now());
        assert_eq!(
            Document::validate_patch(&blank_name),
            Err(ValidationError::MissingField {
                field: "original_filename"
            })
        );
    }

    #[test]
    fn content_records_share_one_shape_across_tables() {
        assert_eq!(Resource::KIND, EntityKind::Resources);
        assert_eq!(Alert::KIND, EntityKind::Alerts);

        let row = serde_json::json!({
            "id": "res-000001",
            "tenant_id": "dndc",
            "title": "Food pantry",
            "details": { "hours": "Mon-Fri" },
            "created_at": "2025-01-02T03:04:05Z",
            "updated_at": "2025-01-02T03:04:05Z"
        });
        let resource: Resource = serde_json::from_value(row).expect("decodes");
        assert!(resource.is_active);
        assert_eq!(resource.details["hours"], "Mon-Fri");
    }
}
