use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Manager,
    Employee,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Employee => "employee",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "employee" => Some(Self::Employee),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub company_id: Option<CompanyId>,
    pub manager_id: Option<UserId>,
    pub is_manager_approver: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The manager who reviews this user's expenses before the company chain, if any.
    pub fn approving_manager(&self) -> Option<&UserId> {
        if self.is_manager_approver {
            self.manager_id.as_ref()
        } else {
            None
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn belongs_to(&self, company_id: &CompanyId) -> bool {
        self.company_id.as_ref() == Some(company_id)
    }
}
