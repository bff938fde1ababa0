use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalStepId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: ApprovalStepId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub step_order: u32,
    pub status: StepStatus,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalStep {
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self.status, next),
            (StepStatus::Queued, StepStatus::Pending)
                | (StepStatus::Pending, StepStatus::Approved)
                | (StepStatus::Pending, StepStatus::Rejected)
        )
    }

    pub fn transition_to(&mut self, next: StepStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStepTransition { from: self.status, to: next })
    }

    pub fn decide(
        &mut self,
        approve: bool,
        comment: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let next = if approve { StepStatus::Approved } else { StepStatus::Rejected };
        self.transition_to(next)?;
        self.comment = comment;
        self.decided_at = Some(decided_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ApprovalStep, ApprovalStepId, StepStatus};
    use crate::domain::expense::ExpenseId;
    use crate::domain::user::UserId;
    use crate::errors::DomainError;

    fn step(status: StepStatus) -> ApprovalStep {
        ApprovalStep {
            id: ApprovalStepId("STEP-1".to_string()),
            expense_id: ExpenseId("EXP-1".to_string()),
            approver_id: UserId("U-mgr".to_string()),
            step_order: 1,
            status,
            comment: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pending_step_records_decision_details() {
        let mut step = step(StepStatus::Pending);
        let now = Utc::now();
        step.decide(false, Some("missing receipt".to_string()), now).expect("pending -> rejected");

        assert_eq!(step.status, StepStatus::Rejected);
        assert_eq!(step.comment.as_deref(), Some("missing receipt"));
        assert_eq!(step.decided_at, Some(now));
    }

    #[test]
    fn queued_step_cannot_be_decided_out_of_turn() {
        let mut step = step(StepStatus::Queued);
        let error = step.decide(true, None, Utc::now()).expect_err("queued step is not active");

        assert!(matches!(error, DomainError::InvalidStepTransition { .. }));
        assert_eq!(step.status, StepStatus::Queued);
        assert!(step.decided_at.is_none());
    }

    #[test]
    fn decided_step_never_returns_to_queue_or_pending() {
        for decided in [StepStatus::Approved, StepStatus::Rejected] {
            let mut step = step(decided);
            assert!(step.transition_to(StepStatus::Pending).is_err());
            assert!(step.transition_to(StepStatus::Queued).is_err());
            assert!(step.decide(true, None, Utc::now()).is_err());
        }
    }
}
