use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
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

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub employee_id: UserId,
    pub company_id: CompanyId,
    pub amount: Decimal,
    pub currency: String,
    /// Amount in the company currency, fixed at submission.
    pub normalized_amount: Decimal,
    pub category: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub status: ExpenseStatus,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self.status, next),
            (ExpenseStatus::Pending, ExpenseStatus::Approved)
                | (ExpenseStatus::Pending, ExpenseStatus::Rejected)
        )
    }

    pub fn transition_to(&mut self, next: ExpenseStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidExpenseTransition { from: self.status, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Expense, ExpenseId, ExpenseStatus};
    use crate::domain::company::CompanyId;
    use crate::domain::user::UserId;
    use crate::errors::DomainError;

    fn expense(status: ExpenseStatus) -> Expense {
        let now = Utc::now();
        Expense {
            id: ExpenseId("EXP-1".to_string()),
            employee_id: UserId("U-1".to_string()),
            company_id: CompanyId("C-1".to_string()),
            amount: Decimal::new(4200, 2),
            currency: "USD".to_string(),
            normalized_amount: Decimal::new(4200, 2),
            category: "travel".to_string(),
            description: "taxi".to_string(),
            date: now,
            status,
            state_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pending_expense_can_be_approved_or_rejected() {
        let mut approved = expense(ExpenseStatus::Pending);
        approved.transition_to(ExpenseStatus::Approved).expect("pending -> approved");
        assert_eq!(approved.status, ExpenseStatus::Approved);

        let mut rejected = expense(ExpenseStatus::Pending);
        rejected.transition_to(ExpenseStatus::Rejected).expect("pending -> rejected");
        assert_eq!(rejected.status, ExpenseStatus::Rejected);
    }

    #[test]
    fn terminal_status_never_reverts() {
        for terminal in [ExpenseStatus::Approved, ExpenseStatus::Rejected] {
            for next in [ExpenseStatus::Pending, ExpenseStatus::Approved, ExpenseStatus::Rejected] {
                let mut expense = expense(terminal);
                let error = expense.transition_to(next).expect_err("terminal status is final");
                assert!(matches!(error, DomainError::InvalidExpenseTransition { .. }));
                assert_eq!(expense.status, terminal);
            }
        }
    }
}
