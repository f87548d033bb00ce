use crate::infra::{AppState, PortalState};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use resource_hub::eligibility::{
    income_qualification, loan_payment, utility_assistance, IncomeInput, IncomeQualification,
    LoanInput, LoanQuote, UtilityAssistance, UtilityInput,
};
use resource_hub::error::AppError;
use resource_hub::progress::{dashboard_summary, ApplicationProgress, DashboardSummary};
use resource_hub::store::{
    Alert, Application, CalculationType, Document, FinancialCalculation,
    FinancialCalculationDraft, StoreError, ValidationError,
};
use resource_hub::tenant::{
    PortalFeature, RequestContext, ResolutionSource, Tenant, TenantKey, TenantScope,
};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

/// Original browser path of the portal page, forwarded by the frontend.
pub(crate) const PORTAL_PATH_HEADER: &str = "x-portal-path";

#[derive(Debug, Serialize)]
pub(crate) struct TenantResponse {
    pub(crate) tenant: TenantKey,
    pub(crate) source: ResolutionSource,
    pub(crate) organization: Option<Tenant>,
    pub(crate) features: Vec<PortalFeature>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApplicationsResponse {
    pub(crate) tenant: TenantKey,
    pub(crate) applications: Vec<ApplicationProgress>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DashboardResponse {
    pub(crate) tenant: TenantKey,
    #[serde(flatten)]
    pub(crate) summary: DashboardSummary,
}

pub(crate) fn with_portal_routes(state: PortalState) -> Router {
    portal_router(state)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) fn portal_router(state: PortalState) -> Router {
    Router::new()
        .route("/api/v1/tenant", get(tenant_endpoint))
        .route("/api/v1/calculate/loan", post(loan_endpoint))
        .route(
            "/api/v1/calculate/income-qualification",
            post(income_endpoint),
        )
        .route(
            "/api/v1/calculate/utility-assistance",
            post(utility_endpoint),
        )
        .route("/api/v1/applications", get(applications_endpoint))
        .route("/api/v1/dashboard", get(dashboard_endpoint))
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn resolve_tenant(
    state: &PortalState,
    headers: &HeaderMap,
) -> Result<(TenantKey, ResolutionSource), AppError> {
    let context = RequestContext::new(
        header_value(headers, header::HOST.as_str()),
        header_value(headers, PORTAL_PATH_HEADER),
    );
    let (scope, source) = state.resolver.resolve_with_source(&context);
    match scope {
        TenantScope::Tenant(key) => Ok((key, source)),
        TenantScope::Global => Err(AppError::BadRequest(
            "request did not resolve to a tenant".to_string(),
        )),
    }
}

pub(crate) async fn tenant_endpoint(
    State(state): State<PortalState>,
    headers: HeaderMap,
) -> Result<Json<TenantResponse>, AppError> {
    let (tenant, source) = resolve_tenant(&state, &headers)?;
    let organization = state.directory.lookup(&tenant).await?;
    let features = organization
        .as_ref()
        .map(|organization| organization.settings.features_enabled.clone())
        .unwrap_or_default()
        .enabled_features();

    Ok(Json(TenantResponse {
        tenant,
        source,
        organization,
        features,
    }))
}

pub(crate) async fn loan_endpoint(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(input): Json<LoanInput>,
) -> Result<Json<LoanQuote>, AppError> {
    let (tenant, _) = resolve_tenant(&state, &headers)?;
    let quote = loan_payment(&input)?;
    let draft = FinancialCalculationDraft::from_run(CalculationType::Loan, &input, &quote);
    record_calculation(&state, tenant, draft).await;
    Ok(Json(quote))
}

pub(crate) async fn income_endpoint(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(input): Json<IncomeInput>,
) -> Result<Json<IncomeQualification>, AppError> {
    let (tenant, _) = resolve_tenant(&state, &headers)?;
    let result = income_qualification(&input, &state.reference.ami, state.income_threshold)?;
    let draft = FinancialCalculationDraft::from_run(CalculationType::Income, &input, &result);
    record_calculation(&state, tenant, draft).await;
    Ok(Json(result))
}

pub(crate) async fn utility_endpoint(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(input): Json<UtilityInput>,
) -> Result<Json<UtilityAssistance>, AppError> {
    let (tenant, _) = resolve_tenant(&state, &headers)?;
    let result = utility_assistance(&input, &state.reference.fpl, &state.reference.tiers)?;
    let draft = FinancialCalculationDraft::from_run(CalculationType::Utility, &input, &result);
    record_calculation(&state, tenant, draft).await;
    Ok(Json(result))
}

/// History is best effort: a failed write is logged and the calculation still returned.
async fn record_calculation(
    state: &PortalState,
    tenant: TenantKey,
    draft: Result<FinancialCalculationDraft, ValidationError>,
) {
    let scope = TenantScope::tenant(tenant);
    if let Err(err) = save_calculation(state, &scope, draft).await {
        warn!(%scope, error = %err, "unable to record calculation history");
    }
}

async fn save_calculation(
    state: &PortalState,
    scope: &TenantScope,
    draft: Result<FinancialCalculationDraft, ValidationError>,
) -> Result<FinancialCalculation, StoreError> {
    let draft = draft?;
    state
        .store::<FinancialCalculation>(scope.clone())?
        .insert(draft)
        .await
}

pub(crate) async fn applications_endpoint(
    State(state): State<PortalState>,
    headers: HeaderMap,
) -> Result<Json<ApplicationsResponse>, AppError> {
    let (tenant, _) = resolve_tenant(&state, &headers)?;
    let store = state.store::<Application>(TenantScope::tenant(tenant.clone()))?;
    let snapshot = store.list().await?;

    Ok(Json(ApplicationsResponse {
        tenant,
        applications: snapshot
            .items
            .iter()
            .map(ApplicationProgress::from_application)
            .collect(),
    }))
}

pub(crate) async fn dashboard_endpoint(
    State(state): State<PortalState>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>, AppError> {
    let (tenant, _) = resolve_tenant(&state, &headers)?;
    let scope = TenantScope::tenant(tenant.clone());
    let applications = state.store::<Application>(scope.clone())?;
    let documents = state.store::<Document>(scope.clone())?;
    let alerts = state.store::<Alert>(scope)?;

    let (applications, documents, alerts) =
        tokio::try_join!(applications.list(), documents.list(), alerts.list())?;

    Ok(Json(DashboardResponse {
        tenant,
        summary: dashboard_summary(&applications.items, &documents.items, &alerts.items),
    }))
}
