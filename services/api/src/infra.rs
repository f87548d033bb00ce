use metrics_exporter_prometheus::PrometheusHandle;
use resource_hub::config::{AppConfig, BackendConfig, EligibilityConfig};
use resource_hub::eligibility::{AmiTable, AssistanceTiers, FplTable, IncomeThreshold, ReferenceData};
use resource_hub::error::AppError;
use resource_hub::store::{
    Alert, Application, ApplicationDraft, ApplicationPatch, ApplicationStatus, ContentDraft,
    Document, DocumentDraft, DocumentPatch, Entity, HttpBackend, MemoryBackend, RemoteBackend,
    ScopedStore, StoreError, TransitionMode,
};
use resource_hub::tenant::{
    TenantDirectory, TenantDraft, TenantKey, TenantResolver, TenantScope, TenantSettings,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

const BUNDLED_AMI: &str = include_str!("../data/ami.csv");
const BUNDLED_FPL: &str = include_str!("../data/fpl.csv");
const BUNDLED_UTILITY_TIERS: &str = include_str!("../data/utility_tiers.csv");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Everything a portal request needs; cloned into each handler.
#[derive(Clone)]
pub(crate) struct PortalState {
    pub(crate) backend: Arc<dyn RemoteBackend>,
    pub(crate) resolver: TenantResolver,
    pub(crate) directory: TenantDirectory,
    pub(crate) reference: Arc<ReferenceData>,
    pub(crate) income_threshold: IncomeThreshold,
    pub(crate) transitions: TransitionMode,
}

impl PortalState {
    pub(crate) fn new(
        backend: Arc<dyn RemoteBackend>,
        config: &AppConfig,
        reference: ReferenceData,
    ) -> Self {
        Self {
            directory: TenantDirectory::new(backend.clone()),
            backend,
            resolver: config.tenancy.resolver(),
            reference: Arc::new(reference),
            income_threshold: config.eligibility.income_threshold,
            transitions: config.store.transitions,
        }
    }

    pub(crate) fn store<E: Entity>(
        &self,
        scope: TenantScope,
    ) -> Result<ScopedStore<E>, StoreError> {
        Ok(ScopedStore::new(self.backend.clone(), scope)?.with_transitions(self.transitions))
    }
}

/// Remote data service when a URL is configured, otherwise a seeded in-process backend.
pub(crate) async fn connect_backend(
    backend: &BackendConfig,
    default_tenant: &TenantKey,
) -> Result<Arc<dyn RemoteBackend>, AppError> {
    match &backend.base_url {
        Some(url) => {
            let http: Arc<dyn RemoteBackend> = Arc::new(
                HttpBackend::new(
                    url.clone(),
                    backend.api_key.clone(),
                    backend.connect_timeout,
                    backend.request_timeout,
                )
                .map_err(StoreError::from)?,
            );
            info!(%url, "using remote data service");
            Ok(http)
        }
        None => {
            let memory = MemoryBackend::new();
            seed_sample_portal(&memory, default_tenant).await?;
            info!(tenant = %default_tenant, "no backend url configured; serving seeded in-memory data");
            Ok(Arc::new(memory))
        }
    }
}

/// Configured tables where a path is given, bundled sample tables otherwise.
pub(crate) fn load_reference_data(config: &EligibilityConfig) -> Result<ReferenceData, AppError> {
    let ami = match config.ami_table.as_deref() {
        Some(path) => AmiTable::load(path)?,
        None => AmiTable::from_reader(BUNDLED_AMI.as_bytes())?,
    };
    let fpl = match config.fpl_table.as_deref() {
        Some(path) => FplTable::load(path)?,
        None => FplTable::from_reader(BUNDLED_FPL.as_bytes())?,
    };
    let tiers = match config.utility_tiers.as_deref() {
        Some(path) => AssistanceTiers::load(path)?,
        None => AssistanceTiers::from_reader(BUNDLED_UTILITY_TIERS.as_bytes())?,
    };
    if [&config.ami_table, &config.fpl_table, &config.utility_tiers]
        .iter()
        .any(|path| path.is_none())
    {
        info!("using bundled sample reference data for unset eligibility tables");
    }
    Ok(ReferenceData { ami, fpl, tiers })
}

pub(crate) fn bundled_reference_data() -> Result<ReferenceData, AppError> {
    load_reference_data(&EligibilityConfig {
        income_threshold: IncomeThreshold::default(),
        ami_table: None,
        fpl_table: None,
        utility_tiers: None,
    })
}

pub(crate) fn reference_path_label(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_else(|| "bundled sample".to_string())
}

/// A small portal: one organization, three applications at different stages, their documents,
/// and one active alert.
pub(crate) async fn seed_sample_portal(
    memory: &MemoryBackend,
    tenant: &TenantKey,
) -> Result<(), StoreError> {
    let backend: Arc<dyn RemoteBackend> = Arc::new(memory.clone());
    let scope = TenantScope::tenant(tenant.clone());

    let mut settings = TenantSettings::default();
    settings
        .theme_colors
        .insert("primary".to_string(), "#1f6feb".to_string());
    TenantDirectory::new(backend.clone())
        .register(
            TenantDraft::new(tenant.clone(), "Downtown Neighborhood Development Corp")
                .with_settings(settings),
        )
        .await?;

    let applications = ScopedStore::<Application>::new(backend.clone(), scope.clone())?;
    let documents = ScopedStore::<Document>::new(backend.clone(), scope.clone())?;

    let samples = [
        ("Ana Ruiz", "mission_180", ApplicationStatus::Submitted, 1usize),
        ("Ben Cho", "rental_assistance", ApplicationStatus::UnderReview, 4),
        ("Cara Diaz", "home_repair", ApplicationStatus::Approved, 6),
    ];
    for (applicant, program, status, uploaded) in samples {
        let application = applications
            .insert(ApplicationDraft::new(applicant, program))
            .await?;
        let completed: Vec<String> = application
            .required_documents
            .iter()
            .take(uploaded)
            .cloned()
            .collect();

        for name in &application.required_documents {
            let document = documents
                .insert(DocumentDraft::new(
                    application.id.clone(),
                    name.clone(),
                    format!("{name} for {applicant}"),
                ))
                .await?;
            if completed.contains(name) {
                documents
                    .update(
                        &document.id,
                        DocumentPatch::uploaded(
                            format!("{}.pdf", name.to_ascii_lowercase().replace(' ', "_")),
                            120_000,
                            Some("application/pdf".to_string()),
                            chrono::Utc::now(),
                        ),
                    )
                    .await?;
            }
        }

        let mut patch = ApplicationPatch::completed_documents(completed);
        patch.status = Some(status);
        applications.update(&application.id, patch).await?;
    }

    ScopedStore::<Alert>::new(backend, scope)?
        .insert(
            ContentDraft::new(
                "Rental assistance deadline",
                "Applications for the spring cycle close at the end of the month.",
            )
            .with_category("deadline"),
        )
        .await?;

    Ok(())
}
