//! Approval queue domain model.
//!
//! Decisions that must not auto-execute. Agents submit them; a human (or,
//! for repos in full autonomy, the threshold policy) resolves them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of decision being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    IssueCreation,
    SpecApproval,
    MergeApproval,
    DeployApproval,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueCreation => "issue_creation",
            Self::SpecApproval => "spec_approval",
            Self::MergeApproval => "merge_approval",
            Self::DeployApproval => "deploy_approval",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "issue_creation" => Some(Self::IssueCreation),
            "spec_approval" => Some(Self::SpecApproval),
            "merge_approval" => Some(Self::MergeApproval),
            "deploy_approval" => Some(Self::DeployApproval),
            _ => None,
        }
    }
}

/// Review state of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl Default for ApprovalStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A pending or resolved decision gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub repo_id: Option<String>,
    pub approval_type: ApprovalType,
    pub title: String,
    pub description: String,
    /// Context for the reviewer: agent scores, coverage numbers, links.
    pub context: serde_json::Value,
    pub submitted_by: String,
    pub status: ApprovalStatus,
    pub reviewer_notes: Option<String>,
    /// Forge issue/MR reference this decision concerns.
    pub forge_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Approval {
    pub fn new(
        approval_type: ApprovalType,
        title: impl Into<String>,
        description: impl Into<String>,
        submitted_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repo_id: None,
            approval_type,
            title: title.into(),
            description: description.into(),
            context: serde_json::Value::Object(serde_json::Map::new()),
            submitted_by: submitted_by.into(),
            status: ApprovalStatus::Pending,
            reviewer_notes: None,
            forge_ref: None,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_forge_ref(mut self, forge_ref: impl Into<String>) -> Self {
        self.forge_ref = Some(forge_ref.into());
        self
    }

    /// Numeric field from the submission context, for threshold policy.
    pub fn context_number(&self, key: &str) -> Option<f64> {
        self.context.get(key).and_then(|v| v.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_approval_is_pending() {
        let approval = Approval::new(ApprovalType::SpecApproval, "OAuth spec", "Spec for OAuth", "architect");
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert!(!approval.status.is_terminal());
        assert!(approval.reviewed_at.is_none());
    }

    #[test]
    fn test_context_number() {
        let approval = Approval::new(ApprovalType::MergeApproval, "MR !12", "", "reviewer")
            .with_context(json!({"review_score": 9, "test_coverage": 85.5}));
        assert!((approval.context_number("review_score").unwrap() - 9.0).abs() < f64::EPSILON);
        assert!((approval.context_number("test_coverage").unwrap() - 85.5).abs() < f64::EPSILON);
        assert!(approval.context_number("missing").is_none());
    }

    #[test]
    fn test_type_round_trip() {
        for t in [
            ApprovalType::IssueCreation,
            ApprovalType::SpecApproval,
            ApprovalType::MergeApproval,
            ApprovalType::DeployApproval,
        ] {
            assert_eq!(ApprovalType::from_str(t.as_str()), Some(t));
        }
    }
}
