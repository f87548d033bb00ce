use crate::infra::{load_reference_data, reference_path_label, seed_sample_portal};
use clap::Args;
use resource_hub::config::AppConfig;
use resource_hub::eligibility::{
    income_qualification, loan_payment, utility_assistance, IncomeInput, IncomeQualification,
    IncomeThreshold, LoanInput, LoanQuote, UtilityAssistance, UtilityInput, UtilityType,
};
use resource_hub::error::AppError;
use resource_hub::progress::{dashboard_summary, ApplicationProgress, StepState};
use resource_hub::store::{
    Alert, Application, ApplicationDraft, Document, MemoryBackend, ScopedStore,
};
use resource_hub::sync::{LiveSync, RetryPolicy, SyncState};
use resource_hub::tenant::{RequestContext, TenantKey, TenantResolver, TenantScope};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const LIVE_WAIT: Duration = Duration::from_secs(2);

#[derive(Args, Debug)]
pub(crate) struct LoanArgs {
    /// Amount borrowed, in dollars
    #[arg(long)]
    pub(crate) principal: f64,
    /// Annual interest rate in percent (4.5 means 4.5%)
    #[arg(long)]
    pub(crate) rate: f64,
    /// Loan term in years
    #[arg(long)]
    pub(crate) years: u32,
}

#[derive(Args, Debug)]
pub(crate) struct IncomeArgs {
    #[arg(long)]
    pub(crate) household_size: u8,
    /// Annual household income, in dollars
    #[arg(long)]
    pub(crate) annual_income: f64,
    /// Override the configured percentage of area median income
    #[arg(long)]
    pub(crate) threshold: Option<f64>,
    /// Override the configured AMI table (CSV)
    #[arg(long)]
    pub(crate) ami_table: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct UtilityArgs {
    #[arg(long)]
    pub(crate) household_size: u8,
    /// Monthly household income, in dollars
    #[arg(long)]
    pub(crate) monthly_income: f64,
    /// Monthly utility bill, in dollars
    #[arg(long)]
    pub(crate) monthly_cost: f64,
    /// electric, gas, water, or combined
    #[arg(long, default_value = "combined")]
    pub(crate) utility_type: UtilityType,
    /// Override the configured FPL table (CSV)
    #[arg(long)]
    pub(crate) fpl_table: Option<PathBuf>,
    /// Override the configured assistance tiers (CSV)
    #[arg(long)]
    pub(crate) tiers: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ResolveArgs {
    /// Request host, e.g. dndc.portal.org
    #[arg(long, default_value = "localhost")]
    pub(crate) host: String,
    /// Request path, e.g. /dndc/programs
    #[arg(long, default_value = "/")]
    pub(crate) path: String,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Tenant slug to seed and browse
    #[arg(long, default_value = "dndc")]
    pub(crate) tenant: String,
    /// Skip the calculator portion of the demo
    #[arg(long)]
    pub(crate) skip_calculators: bool,
}

pub(crate) fn run_loan(args: LoanArgs) -> Result<(), AppError> {
    let quote = loan_payment(&LoanInput {
        principal: args.principal,
        interest_rate: args.rate,
        loan_term_years: args.years,
    })?;
    println!("{}", describe_loan(&quote));
    Ok(())
}

pub(crate) fn run_income(args: IncomeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(path) = args.ami_table {
        config.eligibility.ami_table = Some(path);
    }
    let threshold = match args.threshold {
        Some(percent) => IncomeThreshold::from_percent(percent)?,
        None => config.eligibility.income_threshold,
    };

    let reference = load_reference_data(&config.eligibility)?;
    let result = income_qualification(
        &IncomeInput {
            household_size: args.household_size,
            annual_income: args.annual_income,
        },
        &reference.ami,
        threshold,
    )?;

    println!(
        "AMI table: {}",
        reference_path_label(config.eligibility.ami_table.as_deref())
    );
    println!("{}", describe_income(&result));
    Ok(())
}

pub(crate) fn run_utility(args: UtilityArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(path) = args.fpl_table {
        config.eligibility.fpl_table = Some(path);
    }
    if let Some(path) = args.tiers {
        config.eligibility.utility_tiers = Some(path);
    }

    let reference = load_reference_data(&config.eligibility)?;
    let result = utility_assistance(
        &UtilityInput {
            household_size: args.household_size,
            monthly_income: args.monthly_income,
            monthly_utility_cost: args.monthly_cost,
            utility_type: args.utility_type,
        },
        &reference.fpl,
        &reference.tiers,
    )?;

    println!(
        "FPL table: {} | tiers: {}",
        reference_path_label(config.eligibility.fpl_table.as_deref()),
        reference_path_label(config.eligibility.utility_tiers.as_deref())
    );
    println!("{}", describe_utility(&result));
    Ok(())
}

pub(crate) fn run_resolve(args: ResolveArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let resolver = config.tenancy.resolver();
    println!("{}", describe_resolution(&resolver, &args.host, &args.path));
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let tenant = TenantKey::new(&args.tenant)
        .map_err(|err| AppError::BadRequest(format!("invalid tenant '{}': {err}", args.tenant)))?;
    let resolver = TenantResolver::new(tenant.clone(), "www");
    let scope = TenantScope::tenant(tenant.clone());

    println!("Community resource hub demo");
    let host = format!("{tenant}.portal.example.org");
    println!("{}", describe_resolution(&resolver, &host, "/"));
    println!(
        "{}",
        describe_resolution(&resolver, "www.portal.example.org", "/westside/programs")
    );

    let memory = MemoryBackend::new();
    seed_sample_portal(&memory, &tenant).await?;

    let applications = Arc::new(ScopedStore::<Application>::new(
        Arc::new(memory.clone()),
        scope.clone(),
    )?);
    let sync = LiveSync::new(Arc::new(memory.clone()), RetryPolicy::default());
    let mut sync_state = sync.bind(applications.clone())?;
    let live = tokio::time::timeout(
        LIVE_WAIT,
        sync_state.wait_for(|state| *state == SyncState::Live),
    )
    .await
    .map(|result| result.is_ok())
    .unwrap_or(false);
    println!(
        "\nLive sync for applications in {scope}: {}",
        if live { "connected" } else { "not connected" }
    );

    let snapshot = applications.list().await?;
    println!("\nApplications ({})", snapshot.len());
    for application in snapshot.items.iter() {
        println!("{}", describe_application(&ApplicationProgress::from_application(application)));
    }

    let before = snapshot.len();
    let mut snapshots = applications.watch();
    let other_client = ScopedStore::<Application>::new(Arc::new(memory.clone()), scope.clone())?;
    let submitted = other_client
        .insert(ApplicationDraft::new("Dev Patel", "mission_180"))
        .await?;
    let refreshed = tokio::time::timeout(
        LIVE_WAIT,
        snapshots.wait_for(|snapshot| snapshot.len() > before),
    )
    .await
    .map(|result| result.is_ok())
    .unwrap_or(false);
    if refreshed {
        println!(
            "\nAnother client submitted {} ({}); the live snapshot now holds {} applications",
            submitted.applicant_name,
            submitted.id,
            applications.snapshot().len()
        );
    } else {
        println!("\nNew submission was not observed through the change feed");
    }

    let documents = ScopedStore::<Document>::new(Arc::new(memory.clone()), scope.clone())?
        .list()
        .await?;
    let alerts = ScopedStore::<Alert>::new(Arc::new(memory.clone()), scope.clone())?
        .list()
        .await?;
    let summary = dashboard_summary(
        &applications.snapshot().items,
        &documents.items,
        &alerts.items,
    );
    println!("\nDashboard");
    println!(
        "- {} applications | {}% decided",
        summary.total_applications, summary.completion_rate
    );
    for (status, count) in &summary.applications_by_status {
        println!("  - {status}: {count}");
    }
    println!(
        "- {}/{} documents uploaded ({}%)",
        summary.uploaded_documents, summary.total_documents, summary.upload_rate
    );
    println!("- {} active alerts", summary.active_alerts);

    sync.unmount().await;

    if !args.skip_calculators {
        let reference = crate::infra::bundled_reference_data()?;
        println!("\nCalculators (bundled sample tables)");
        let quote = loan_payment(&LoanInput {
            principal: 150_000.0,
            interest_rate: 4.5,
            loan_term_years: 30,
        })?;
        println!("{}", describe_loan(&quote));
        let income = income_qualification(
            &IncomeInput {
                household_size: 4,
                annual_income: 60_000.0,
            },
            &reference.ami,
            IncomeThreshold::default(),
        )?;
        println!("{}", describe_income(&income));
        let utility = utility_assistance(
            &UtilityInput {
                household_size: 3,
                monthly_income: 1_500.0,
                monthly_utility_cost: 200.0,
                utility_type: UtilityType::Electric,
            },
            &reference.fpl,
            &reference.tiers,
        )?;
        println!("{}", describe_utility(&utility));
    }

    Ok(())
}

fn describe_resolution(resolver: &TenantResolver, host: &str, path: &str) -> String {
    let (scope, source) = resolver.resolve_with_source(&RequestContext::new(host, path));
    format!(
        "host '{host}' path '{path}' -> {scope} (via {})",
        source.label()
    )
}

fn describe_application(progress: &ApplicationProgress) -> String {
    let steps = progress
        .steps
        .iter()
        .map(|step| {
            let marker = match step.state {
                StepState::Completed => "x",
                StepState::Current => ">",
                StepState::Upcoming => " ",
            };
            format!("[{marker}] {}", step.label)
        })
        .collect::<Vec<_>>()
        .join("  ");
    let mut line = format!(
        "- {} ({}) {} | documents {}% | {steps}",
        progress.applicant_name,
        progress.application_type,
        progress.status,
        progress.progress_percentage
    );
    if !progress.outstanding_documents.is_empty() {
        line.push_str(&format!(
            "\n  outstanding: {}",
            progress.outstanding_documents.join(", ")
        ));
    }
    line
}

fn describe_loan(quote: &LoanQuote) -> String {
    format!(
        "Loan: ${:.2}/month over {} months | total interest ${:.2} | total cost ${:.2}",
        quote.monthly_payment, quote.term_months, quote.total_interest, quote.total_cost
    )
}

fn describe_income(result: &IncomeQualification) -> String {
    format!(
        "Income: household of {} earning {} vs limit {} ({}% of AMI {}) -> {} ({}% of limit)",
        result.household_size,
        result.annual_income,
        result.max_income_limit,
        result.threshold_percent,
        result.area_median_income,
        if result.qualifies {
            "qualifies"
        } else {
            "does not qualify"
        },
        result.qualification_percentage
    )
}

fn describe_utility(result: &UtilityAssistance) -> String {
    format!(
        "Utility ({}): {:.1}% of FPL {} -> {}% tier | {} covered of {} | {} remaining",
        result.utility_type,
        result.fpl_percentage,
        result.poverty_guideline,
        result.assistance_percentage,
        result.assistance_amount,
        result.monthly_utility_cost,
        result.cost_after_assistance
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::bundled_reference_data;

    #[test]
    fn resolution_names_the_source() {
        let resolver = TenantResolver::new(TenantKey::new("dndc").expect("valid"), "www");
        assert_eq!(
            describe_resolution(&resolver, "eastside.portal.org", "/"),
            "host 'eastside.portal.org' path '/' -> tenant:eastside (via subdomain)"
        );
        assert!(describe_resolution(&resolver, "localhost", "/").ends_with("(via default)"));
    }

    #[test]
    fn utility_summary_reports_tier_and_amounts() {
        let reference = bundled_reference_data().expect("reference data");
        let result = utility_assistance(
            &UtilityInput {
                household_size: 3,
                monthly_income: 1_500.0,
                monthly_utility_cost: 200.0,
                utility_type: UtilityType::Electric,
            },
            &reference.fpl,
            &reference.tiers,
        )
        .expect("valid input");

        let line = describe_utility(&result);
        assert!(line.contains("75% tier"));
        assert!(line.contains("$150.00 covered of $200.00"));
    }

    #[tokio::test]
    async fn demo_runs_against_the_seeded_portal() {
        run_demo(DemoArgs {
            tenant: "dndc".to_string(),
            skip_calculators: false,
        })
        .await
        .expect("demo completes");
    }
}
