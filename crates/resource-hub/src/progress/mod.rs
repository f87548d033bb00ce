//! Pure progress derivations over application, document, and alert snapshots.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::store::{Alert, Application, ApplicationStatus, Document, RecordId};

/// Labels of the three-step stepper, indexed by stage.
pub const STEP_LABELS: [&str; 3] = ["Submitted", "Under Review", "Decision"];

/// Integer percentage of `part` over `whole`, rounded half up. Zero when `whole` is zero.
pub fn percent(part: usize, whole: usize) -> u8 {
    if whole == 0 {
        return 0;
    }
    let part = part.min(whole) as u64;
    let whole = whole as u64;
    ((200 * part + whole) / (2 * whole)) as u8
}

/// Share of required documents marked complete.
///
/// Only names that are actually required count toward progress, so the value never exceeds 100.
pub fn progress_percentage(application: &Application) -> u8 {
    let required = &application.required_documents;
    let completed = required
        .iter()
        .filter(|name| application.completed_documents.contains(name.as_str()))
        .count();
    percent(completed, required.len())
}

/// Position of a status in the review workflow.
pub const fn stage_of(status: ApplicationStatus) -> u8 {
    match status {
        ApplicationStatus::Submitted => 0,
        ApplicationStatus::UnderReview => 1,
        ApplicationStatus::Approved | ApplicationStatus::Denied => 2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Completed,
    Current,
    Upcoming,
}

pub fn step_state(application: &Application, step_index: usize) -> StepState {
    let stage = stage_of(application.status) as usize;
    if step_index < stage {
        StepState::Completed
    } else if step_index == stage {
        StepState::Current
    } else {
        StepState::Upcoming
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub label: &'static str,
    pub state: StepState,
}

pub fn stepper(application: &Application) -> Vec<StepView> {
    STEP_LABELS
        .iter()
        .enumerate()
        .map(|(index, label)| StepView {
            label: *label,
            state: step_state(application, index),
        })
        .collect()
}

/// Everything a status card shows for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationProgress {
    pub id: RecordId,
    pub applicant_name: String,
    pub application_type: String,
    pub status: ApplicationStatus,
    pub stage: u8,
    pub progress_percentage: u8,
    pub outstanding_documents: Vec<String>,
    pub steps: Vec<StepView>,
}

impl ApplicationProgress {
    pub fn from_application(application: &Application) -> Self {
        let outstanding_documents = application
            .required_documents
            .iter()
            .filter(|name| !application.completed_documents.contains(name.as_str()))
            .cloned()
            .collect();

        Self {
            id: application.id.clone(),
            applicant_name: application.applicant_name.clone(),
            application_type: application.application_type.clone(),
            status: application.status,
            stage: stage_of(application.status),
            progress_percentage: progress_percentage(application),
            outstanding_documents,
            steps: stepper(application),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentProgress {
    pub uploaded: usize,
    pub total: usize,
    pub percentage: u8,
}

/// Upload progress over one application's document rows.
pub fn document_progress(documents: &[Document]) -> DocumentProgress {
    let uploaded = documents.iter().filter(|doc| doc.is_uploaded).count();
    DocumentProgress {
        uploaded,
        total: documents.len(),
        percentage: percent(uploaded, documents.len()),
    }
}

/// Staff dashboard figures for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub total_applications: usize,
    pub decided_applications: usize,
    pub completion_rate: u8,
    pub applications_by_status: BTreeMap<&'static str, usize>,
    pub total_documents: usize,
    pub uploaded_documents: usize,
    pub upload_rate: u8,
    pub active_alerts: usize,
}

pub fn dashboard_summary(
    applications: &[Application],
    documents: &[Document],
    alerts: &[Alert],
) -> DashboardSummary {
    let mut applications_by_status = BTreeMap::new();
    for status in [
        ApplicationStatus::Submitted,
        ApplicationStatus::UnderReview,
        ApplicationStatus::Approved,
        ApplicationStatus::Denied,
    ] {
        applications_by_status.insert(status.label(), 0);
    }
    for application in applications {
        *applications_by_status
            .entry(application.status.label())
            .or_default() += 1;
    }

    let decided_applications = applications
        .iter()
        .filter(|application| application.status.is_decided())
        .count();
    let uploads = document_progress(documents);

    DashboardSummary {
        total_applications: applications.len(),
        decided_applications,
        completion_rate: percent(decided_applications, applications.len()),
        applications_by_status,
        total_documents: uploads.total,
        uploaded_documents: uploads.uploaded,
        upload_rate: uploads.percentage,
        active_alerts: alerts.iter().filter(|alert| alert.is_active).count(),
    }
}
