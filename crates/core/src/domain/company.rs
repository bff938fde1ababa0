use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub country: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// One slot of a company's approval chain template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverAssignment {
    pub company_id: CompanyId,
    pub approver_id: UserId,
    pub step_order: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub company_id: CompanyId,
    pub percentage_threshold: Option<u8>,
    pub specific_approver_id: Option<UserId>,
    pub hybrid: bool,
}

impl ApprovalRule {
    pub fn empty(company_id: CompanyId) -> Self {
        Self { company_id, percentage_threshold: None, specific_approver_id: None, hybrid: false }
    }
}
