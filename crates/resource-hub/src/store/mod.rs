//! Typed, tenant-scoped access to the remote data service.

mod backend;
mod entity;
mod error;
mod http;
mod memory;
mod records;
mod scoped;

pub use backend::{
    ChangeEvent, ChangeFeed, ChangeKind, ChangeStream, CollectionQuery, FeedFilter, Filter,
    RemoteBackend,
};
pub use entity::{
    EntityKind, Entity, Order, RecordId, Scoping, TransitionMode, ID_FIELD, TENANT_FIELD,
};
pub use error::{RemoteError, StoreError, ValidationError};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use records::{
    Alert, AlertKind, Application, ApplicationDraft, ApplicationPatch, ApplicationStatus,
    CalculationType, ContentDraft, ContentKind, ContentPatch, ContentRecord, Document,
    DocumentDraft, DocumentPatch, FinancialCalculation, FinancialCalculationDraft, Notification,
    NotificationKind, Program, ProgramKind, Resource, ResourceKind, STANDARD_REQUIRED_DOCUMENTS,
};
pub use scoped::{ScopedStore, Snapshot};
