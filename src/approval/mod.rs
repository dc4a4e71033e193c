//! Document approval workflows.
//!
//! A workflow is an ordered list of approval steps. Exactly one step is
//! `pending` while the workflow awaits approval; steps after it are
//! `waiting`. Signing the pending step either hands over to the next step,
//! completes the workflow, or rejects it outright.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::{datetime, format_description};

use crate::core::User;
use crate::store::kv::{self, KvStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("ワークフローが見つかりません: {0}")]
    NotFound(String),
    #[error("ワークフロー {workflow_id} は既に完了しています（{status}）")]
    Closed {
        workflow_id: String,
        status: WorkflowStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    PendingApproval,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::PendingApproval => "pending_approval",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" | "pending_approval" => Ok(WorkflowStatus::PendingApproval),
            "approved" => Ok(WorkflowStatus::Approved),
            "rejected" => Ok(WorkflowStatus::Rejected),
            _ => Err(format!(
                "ワークフロー状態が不正です: {s}（pending|approved|rejected を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Approved,
    Rejected,
    Pending,
    Waiting,
}

impl StepStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            StepStatus::Approved => "approved",
            StepStatus::Rejected => "rejected",
            StepStatus::Pending => "pending",
            StepStatus::Waiting => "waiting",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    const fn step_status(self) -> StepStatus {
        match self {
            Decision::Approved => StepStatus::Approved,
            Decision::Rejected => StepStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approved),
            "reject" | "rejected" => Ok(Decision::Rejected),
            _ => Err(format!(
                "判定が不正です: {s}（approve|reject を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_id: u32,
    pub role: String,
    pub approver: String,
    pub status: StepStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub signed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub signature: Option<String>,
    /// Name of the logged-in user who signed; `approver` is only the
    /// designated signatory.
    #[serde(default)]
    pub signed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub size: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub title: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub priority: Priority,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub deadline: OffsetDateTime,
    pub creator: String,
    pub description: String,
    pub steps: Vec<ApprovalStep>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Workflow {
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.status == StepStatus::Pending)
    }

    /// Role awaiting signature, or `Completed` / `Rejected` once closed.
    pub fn current_approver(&self) -> &str {
        match self.status {
            WorkflowStatus::Approved => "Completed",
            WorkflowStatus::Rejected => "Rejected",
            WorkflowStatus::PendingApproval => self
                .current_step()
                .map_or("Completed", |step| step.role.as_str()),
        }
    }

    pub fn involves(&self, name: &str) -> bool {
        self.creator == name || self.steps.iter().any(|s| s.approver == name)
    }

    fn sign_pending(
        &mut self,
        decision: Decision,
        comments: &str,
        signer: &User,
        now: OffsetDateTime,
    ) -> Result<(), ApprovalError> {
        let closed = || ApprovalError::Closed {
            workflow_id: self.workflow_id.clone(),
            status: self.status,
        };
        if self.status != WorkflowStatus::PendingApproval {
            return Err(closed());
        }
        let Some(idx) = self
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Pending)
        else {
            return Err(closed());
        };

        let step = &mut self.steps[idx];
        step.status = decision.step_status();
        step.signed_at = Some(now);
        step.comments = comments.trim().to_string();
        step.signature = Some(signature(&signer.name, now));
        step.signed_by = Some(signer.name.clone());

        match decision {
            Decision::Approved => match self.steps.get_mut(idx + 1) {
                Some(next) => next.status = StepStatus::Pending,
                None => self.status = WorkflowStatus::Approved,
            },
            Decision::Rejected => self.status = WorkflowStatus::Rejected,
        }
        Ok(())
    }
}

/// Signer initials followed by the UTC signing time, e.g. `SJ_20240929_143022`.
pub fn signature(name: &str, at: OffsetDateTime) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_default();
    format!("{initials}_{stamp}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    /// Workflows created by, or routed through, this user name.
    pub involving: Option<String>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        if let Some(status) = self.status {
            if workflow.status != status {
                return false;
            }
        }
        if let Some(name) = self.involving.as_deref() {
            if !workflow.involves(name) {
                return false;
            }
        }
        true
    }
}

pub struct ApprovalStore<S: KvStore> {
    kv: S,
    workflows: Vec<Workflow>,
}

impl<S: KvStore> ApprovalStore<S> {
    /// Loads persisted workflows, or the demo workflows when none are stored.
    pub fn open(kv: S) -> Self {
        let workflows = match kv::load_json::<Vec<Workflow>>(&kv, kv::WORKFLOWS_KEY) {
            Ok(Some(workflows)) => workflows,
            Ok(None) => seed_workflows(),
            Err(err) => {
                tracing::warn!("ワークフローを読み込めないためデモデータを使用します: {err:#}");
                seed_workflows()
            }
        };
        Self { kv, workflows }
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn list(&self, filter: &WorkflowFilter) -> Vec<&Workflow> {
        self.workflows.iter().filter(|w| filter.matches(w)).collect()
    }

    pub fn get(&self, workflow_id: &str) -> Result<&Workflow, ApprovalError> {
        self.workflows
            .iter()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| ApprovalError::NotFound(workflow_id.to_string()))
    }

    /// Signs the pending step of a workflow and persists the result.
    pub fn sign(
        &mut self,
        workflow_id: &str,
        decision: Decision,
        comments: &str,
        signer: &User,
        now: OffsetDateTime,
    ) -> Result<Workflow, ApprovalError> {
        let workflow = self
            .workflows
            .iter_mut()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| ApprovalError::NotFound(workflow_id.to_string()))?;
        workflow.sign_pending(decision, comments, signer, now)?;
        let signed = workflow.clone();
        tracing::info!(
            workflow_id,
            user_id = %signer.user_id,
            status = %signed.status,
            "workflow signed"
        );
        self.persist();
        Ok(signed)
    }

    fn persist(&mut self) {
        if let Err(err) = kv::save_json(&mut self.kv, kv::WORKFLOWS_KEY, &self.workflows) {
            tracing::error!("ワークフローを保存できませんでした: {err:#}");
        }
    }
}

fn step(
    step_id: u32,
    role: &str,
    approver: &str,
    status: StepStatus,
    signed_at: Option<OffsetDateTime>,
    comments: &str,
    signature: Option<&str>,
) -> ApprovalStep {
    ApprovalStep {
        step_id,
        role: role.to_string(),
        approver: approver.to_string(),
        status,
        signed_at,
        comments: comments.to_string(),
        signature: signature.map(str::to_string),
        signed_by: signed_at.map(|_| approver.to_string()),
    }
}

fn document(name: &str, size: &str, kind: &str) -> Document {
    Document {
        name: name.to_string(),
        size: size.to_string(),
        kind: kind.to_string(),
    }
}

pub fn seed_workflows() -> Vec<Workflow> {
    vec![
        Workflow {
            workflow_id: "1".to_string(),
            title: "Manufacturing Process Risk Assessment - Line 3".to_string(),
            workflow_type: "Risk Assessment".to_string(),
            status: WorkflowStatus::PendingApproval,
            priority: Priority::High,
            created_at: datetime!(2024-09-28 0:00 UTC),
            deadline: datetime!(2024-10-05 0:00 UTC),
            creator: "John Smith".to_string(),
            description: "Comprehensive risk assessment for manufacturing line 3 following equipment upgrade and process modifications.".to_string(),
            steps: vec![
                step(
                    1,
                    "Quality Assurance Lead",
                    "Sarah Johnson",
                    StepStatus::Approved,
                    Some(datetime!(2024-09-29 14:30:22 UTC)),
                    "Risk assessment methodology is sound. Approved for next level review.",
                    Some("SJ_20240929_143022"),
                ),
                step(2, "Quality Manager", "Michael Chen", StepStatus::Pending, None, "", None),
                step(3, "Site Manager", "Lisa Rodriguez", StepStatus::Waiting, None, "", None),
            ],
            documents: vec![
                document("Risk_Assessment_Line3_v2.1.pdf", "2.4 MB", "PDF"),
                document("FMEA_Analysis_Line3.xlsx", "1.8 MB", "Excel"),
            ],
        },
        Workflow {
            workflow_id: "2".to_string(),
            title: "Supplier Qualification - API Vendor".to_string(),
            workflow_type: "Supplier Assessment".to_string(),
            status: WorkflowStatus::Approved,
            priority: Priority::Medium,
            created_at: datetime!(2024-09-25 0:00 UTC),
            deadline: datetime!(2024-10-02 0:00 UTC),
            creator: "Emma Wilson".to_string(),
            description: "Qualification assessment for new API supplier including quality system evaluation and risk analysis.".to_string(),
            steps: vec![
                step(
                    1,
                    "Procurement Lead",
                    "David Kim",
                    StepStatus::Approved,
                    Some(datetime!(2024-09-26 9:15:34 UTC)),
                    "Supplier documentation complete and satisfactory.",
                    Some("DK_20240926_091534"),
                ),
                step(
                    2,
                    "Quality Manager",
                    "Michael Chen",
                    StepStatus::Approved,
                    Some(datetime!(2024-09-27 15:44:12 UTC)),
                    "Quality systems audit results acceptable. Approved for qualification.",
                    Some("MC_20240927_154412"),
                ),
            ],
            documents: vec![
                document("Supplier_Audit_Report.pdf", "3.1 MB", "PDF"),
                document("Quality_Agreement.pdf", "1.2 MB", "PDF"),
            ],
        },
        Workflow {
            workflow_id: "3".to_string(),
            title: "Change Control - Temperature Monitoring System".to_string(),
            workflow_type: "Change Control".to_string(),
            status: WorkflowStatus::Rejected,
            priority: Priority::High,
            created_at: datetime!(2024-09-20 0:00 UTC),
            deadline: datetime!(2024-09-30 0:00 UTC),
            creator: "Robert Taylor".to_string(),
            description: "Implementation of upgraded temperature monitoring system for cold storage areas.".to_string(),
            steps: vec![
                step(
                    1,
                    "Engineering Lead",
                    "Amanda Foster",
                    StepStatus::Approved,
                    Some(datetime!(2024-09-22 10:30:45 UTC)),
                    "Technical specifications reviewed and approved.",
                    Some("AF_20240922_103045"),
                ),
                step(
                    2,
                    "Validation Manager",
                    "James Wilson",
                    StepStatus::Rejected,
                    Some(datetime!(2024-09-24 16:12:30 UTC)),
                    "Insufficient validation protocol. Additional testing requirements needed before implementation.",
                    Some("JW_20240924_161230"),
                ),
            ],
            documents: vec![
                document("Change_Control_Form_CC2024-089.pdf", "1.5 MB", "PDF"),
                document("Technical_Specifications.docx", "890 KB", "Word"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::store::kv::MemoryKvStore;

    const NOW: OffsetDateTime = datetime!(2024-10-01 9:05:07 UTC);

    fn assessor() -> User {
        User {
            user_id: "2".to_string(),
            username: "assessor".to_string(),
            name: "Risk Assessor".to_string(),
            role: Role::Assessor,
        }
    }

    fn statuses(w: &Workflow) -> Vec<StepStatus> {
        w.steps.iter().map(|s| s.status).collect()
    }

    #[test]
    fn seed_has_one_workflow_per_status() {
        let store = ApprovalStore::open(MemoryKvStore::new());
        for status in [
            WorkflowStatus::PendingApproval,
            WorkflowStatus::Approved,
            WorkflowStatus::Rejected,
        ] {
            let filter = WorkflowFilter {
                status: Some(status),
                ..WorkflowFilter::default()
            };
            assert_eq!(store.list(&filter).len(), 1, "{status}");
        }
        let pending = store.get("1").expect("seeded");
        assert_eq!(pending.current_approver(), "Quality Manager");
        assert_eq!(store.get("2").unwrap().current_approver(), "Completed");
        assert_eq!(store.get("3").unwrap().current_approver(), "Rejected");
    }

    #[test]
    fn approving_a_middle_step_hands_over_to_the_next() {
        let mut store = ApprovalStore::open(MemoryKvStore::new());
        let signed = store
            .sign("1", Decision::Approved, " looks good ", &assessor(), NOW)
            .expect("sign");

        assert_eq!(signed.status, WorkflowStatus::PendingApproval);
        assert_eq!(
            statuses(&signed),
            vec![StepStatus::Approved, StepStatus::Approved, StepStatus::Pending]
        );
        let step = &signed.steps[1];
        assert_eq!(step.signature.as_deref(), Some("RA_20241001_090507"));
        assert_eq!(step.signed_at, Some(NOW));
        assert_eq!(step.comments, "looks good");
        assert_eq!(step.signed_by.as_deref(), Some("Risk Assessor"));
        assert_eq!(signed.current_approver(), "Site Manager");
    }

    #[test]
    fn approving_the_last_step_approves_the_workflow() {
        let mut store = ApprovalStore::open(MemoryKvStore::new());
        store
            .sign("1", Decision::Approved, "", &assessor(), NOW)
            .unwrap();
        let signed = store
            .sign("1", Decision::Approved, "", &assessor(), NOW)
            .expect("final sign");
        assert_eq!(signed.status, WorkflowStatus::Approved);
        assert!(signed.current_step().is_none());
        assert_eq!(signed.current_approver(), "Completed");
    }

    #[test]
    fn rejecting_closes_the_workflow_and_leaves_later_steps_waiting() {
        let mut store = ApprovalStore::open(MemoryKvStore::new());
        let signed = store
            .sign("1", Decision::Rejected, "missing data", &assessor(), NOW)
            .expect("sign");
        assert_eq!(signed.status, WorkflowStatus::Rejected);
        assert_eq!(
            statuses(&signed),
            vec![StepStatus::Approved, StepStatus::Rejected, StepStatus::Waiting]
        );
    }

    #[test]
    fn closed_or_unknown_workflows_cannot_be_signed() {
        let mut store = ApprovalStore::open(MemoryKvStore::new());
        assert_eq!(
            store
                .sign("2", Decision::Approved, "", &assessor(), NOW)
                .unwrap_err(),
            ApprovalError::Closed {
                workflow_id: "2".to_string(),
                status: WorkflowStatus::Approved,
            }
        );
        assert!(matches!(
            store.sign("3", Decision::Rejected, "", &assessor(), NOW),
            Err(ApprovalError::Closed { .. })
        ));
        assert_eq!(
            store
                .sign("42", Decision::Approved, "", &assessor(), NOW)
                .unwrap_err(),
            ApprovalError::NotFound("42".to_string())
        );
    }

    #[test]
    fn signatures_persist_across_reopen() {
        let mut store = ApprovalStore::open(MemoryKvStore::new());
        store
            .sign("1", Decision::Rejected, "", &assessor(), NOW)
            .unwrap();
        let kv = store.kv;
        let reopened = ApprovalStore::open(kv);
        assert_eq!(reopened.get("1").unwrap().status, WorkflowStatus::Rejected);
    }

    #[test]
    fn involving_filter_matches_creator_or_approver() {
        let store = ApprovalStore::open(MemoryKvStore::new());
        let ids = |name: &str| -> Vec<String> {
            store
                .list(&WorkflowFilter {
                    involving: Some(name.to_string()),
                    ..WorkflowFilter::default()
                })
                .iter()
                .map(|w| w.workflow_id.clone())
                .collect()
        };
        assert_eq!(ids("Michael Chen"), vec!["1", "2"]);
        assert_eq!(ids("Robert Taylor"), vec!["3"]);
        assert!(ids("Risk Assessor").is_empty());
    }

    #[test]
    fn decision_and_status_parse_loosely() {
        assert_eq!("Approve".parse::<Decision>(), Ok(Decision::Approved));
        assert_eq!("rejected".parse::<Decision>(), Ok(Decision::Rejected));
        assert!("maybe".parse::<Decision>().is_err());
        assert_eq!(
            "pending".parse::<WorkflowStatus>(),
            Ok(WorkflowStatus::PendingApproval)
        );
        assert_eq!(
            serde_json::to_value(WorkflowStatus::PendingApproval).unwrap(),
            "pending_approval"
        );
    }

    #[test]
    fn signature_uses_initials_and_utc_time() {
        let at = datetime!(2024-09-29 23:30:22 +9);
        assert_eq!(signature("sarah johnson", at), "SJ_20240929_143022");
    }
}
