use crate::cli::ServeArgs;
use crate::infra::{connect_backend, load_reference_data, AppState, PortalState};
use crate::routes::with_portal_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use resource_hub::config::AppConfig;
use resource_hub::error::AppError;
use resource_hub::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let reference = load_reference_data(&config.eligibility)?;
    let backend = connect_backend(&config.backend, &config.tenancy.default_tenant).await?;
    let portal = PortalState::new(backend, &config, reference);

    let app = with_portal_routes(portal)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        default_tenant = %config.tenancy.default_tenant,
        transitions = ?config.store.transitions,
        "community resource hub ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
