use crate::config::ConfigError;
use crate::eligibility::{EligibilityError, ReferenceDataError};
use crate::store::{RemoteError, StoreError, ValidationError};
use crate::sync::SyncError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Store(StoreError),
    Sync(SyncError),
    Eligibility(EligibilityError),
    ReferenceData(ReferenceDataError),
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Store(StoreError::ScopeViolation { .. }) => StatusCode::FORBIDDEN,
            AppError::Store(StoreError::Validation(ValidationError::Duplicate { .. })) => {
                StatusCode::CONFLICT
            }
            AppError::Store(StoreError::Validation(_)) | AppError::Eligibility(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Store(StoreError::Remote(RemoteError::NotFound { .. })) => {
                StatusCode::NOT_FOUND
            }
            AppError::Store(StoreError::Remote(_)) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_)
            | AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Sync(_)
            | AppError::ReferenceData(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Store(err) => write!(f, "{}", err),
            AppError::Sync(err) => write!(f, "sync error: {}", err),
            AppError::Eligibility(err) => write!(f, "{}", err),
            AppError::ReferenceData(err) => write!(f, "reference data error: {}", err),
            AppError::BadRequest(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Sync(err) => Some(err),
            AppError::Eligibility(err) => Some(err),
            AppError::ReferenceData(err) => Some(err),
            AppError::BadRequest(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl From<EligibilityError> for AppError {
    fn from(value: EligibilityError) -> Self {
        Self::Eligibility(value)
    }
}

impl From<ReferenceDataError> for AppError {
    fn from(value: ReferenceDataError) -> Self {
        Self::ReferenceData(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityKind, RecordId, ValidationError};
    use crate::tenant::{TenantKey, TenantScope};

    #[test]
    fn store_errors_map_to_distinct_statuses() {
        let violation = AppError::from(StoreError::ScopeViolation {
            kind: EntityKind::Applications,
            id: RecordId::new("app-000001"),
            owner: "west".to_string(),
            scope: TenantScope::Tenant(TenantKey::new("east").expect("valid")),
        });
        assert_eq!(violation.status(), StatusCode::FORBIDDEN);

        let invalid = AppError::from(StoreError::from(ValidationError::MissingField {
            field: "applicant_name",
        }));
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let taken = AppError::from(StoreError::from(ValidationError::Duplicate {
            field: "slug",
            value: "dndc".to_string(),
        }));
        assert_eq!(taken.status(), StatusCode::CONFLICT);

        let missing = AppError::from(StoreError::from(RemoteError::NotFound {
            kind: EntityKind::Documents,
            id: RecordId::new("doc-000009"),
        }));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let offline = AppError::from(StoreError::from(RemoteError::Unavailable(
            "connection refused".to_string(),
        )));
        assert_eq!(offline.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn calculator_errors_are_unprocessable() {
        let err = AppError::from(EligibilityError::EmptyHousehold);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.to_string(), "household size must be at least 1");
    }
}
