//! Typed inputs for every engine operation, validated before any store access.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::normalize_code;
use crate::domain::company::CompanyId;
use crate::domain::expense::ExpenseId;
use crate::domain::user::{UserId, UserRole};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitExpense {
    pub employee_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub date: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedSubmission {
    pub employee_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub date: Option<DateTime<Utc>>,
}

impl SubmitExpense {
    pub fn validate(self) -> Result<ValidatedSubmission, ApplicationError> {
        if self.amount <= Decimal::ZERO {
            return Err(ApplicationError::Validation("amount must be greater than zero".into()));
        }

        let currency = normalize_code(&self.currency);
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(ApplicationError::Validation(format!(
                "currency `{}` must be a three-letter ISO code",
                self.currency
            )));
        }

        let category = required_text("category", &self.category)?;
        let description = required_text("description", &self.description)?;
        let date = self.date.as_deref().map(parse_expense_date).transpose()?;

        Ok(ValidatedSubmission {
            employee_id: self.employee_id,
            amount: self.amount,
            currency,
            category,
            description,
            date,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDecision {
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub approve: bool,
    pub comment: Option<String>,
}

impl RecordDecision {
    pub fn normalized_comment(&self) -> Option<String> {
        optional_text(self.comment.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentInput {
    pub approver_id: UserId,
    pub step_order: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureApproverChain {
    pub company_id: CompanyId,
    pub assignments: Vec<AssignmentInput>,
}

impl ConfigureApproverChain {
    /// Returns the assignments sorted by step order after checking orders are positive and unique.
    pub fn validated_assignments(&self) -> Result<Vec<AssignmentInput>, ApplicationError> {
        let mut seen = HashSet::new();
        for assignment in &self.assignments {
            if assignment.step_order == 0 {
                return Err(ApplicationError::Validation(format!(
                    "step_order for approver `{}` must be at least 1",
                    assignment.approver_id.0
                )));
            }
            if !seen.insert(assignment.step_order) {
                return Err(ApplicationError::Validation(format!(
                    "step_order {} is assigned more than once",
                    assignment.step_order
                )));
            }
        }

        let mut sorted = self.assignments.clone();
        sorted.sort_by_key(|assignment| assignment.step_order);
        Ok(sorted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureApprovalRule {
    pub company_id: CompanyId,
    pub percentage_threshold: Option<u32>,
    pub specific_approver_id: Option<UserId>,
    pub hybrid: Option<bool>,
}

impl ConfigureApprovalRule {
    pub fn validated_threshold(&self) -> Result<Option<u8>, ApplicationError> {
        match self.percentage_threshold {
            None => Ok(None),
            Some(threshold) if threshold <= 100 => Ok(Some(threshold as u8)),
            Some(threshold) => Err(ApplicationError::Validation(format!(
                "percentage_threshold {threshold} must be between 0 and 100"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUser {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCompany {
    pub owner_id: UserId,
    pub name: String,
    pub country: String,
    pub currency: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub manager_id: Option<UserId>,
    pub is_manager_approver: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManager {
    pub user_id: UserId,
    pub manager_id: Option<UserId>,
    pub is_manager_approver: Option<bool>,
}

pub(crate) fn required_text(field: &str, value: &str) -> Result<String, ApplicationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApplicationError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

pub(crate) fn validated_email(value: &str) -> Result<String, ApplicationError> {
    let email = required_text("email", value)?.to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApplicationError::Validation(format!("email `{value}` is not a valid address"))),
    }
}

fn parse_expense_date(raw: &str) -> Result<DateTime<Utc>, ApplicationError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(parsed.and_utc());
    }
    if let Some(midnight) =
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(ApplicationError::Validation(format!(
        "date `{raw}` must be RFC3339 or YYYY-MM-DD"
    )))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};
    use rust_decimal::Decimal;

    use super::{
        validated_email, AssignmentInput, ConfigureApprovalRule, ConfigureApproverChain,
        SubmitExpense,
    };
    use crate::domain::company::CompanyId;
    use crate::domain::user::UserId;
    use crate::errors::ApplicationError;

    fn submission() -> SubmitExpense {
        SubmitExpense {
            employee_id: UserId("u-1".to_string()),
            amount: Decimal::new(12_50, 2),
            currency: " eur ".to_string(),
            category: " meals ".to_string(),
            description: "team lunch".to_string(),
            date: None,
        }
    }

    #[test]
    fn submission_is_trimmed_and_upper_cased() {
        let validated = submission().validate().expect("valid submission");

        assert_eq!(validated.currency, "EUR");
        assert_eq!(validated.category, "meals");
        assert!(validated.date.is_none());
    }

    #[test]
    fn submission_rejects_non_positive_amount_and_bad_currency() {
        let mut zero = submission();
        zero.amount = Decimal::ZERO;
        assert!(matches!(zero.validate(), Err(ApplicationError::Validation(_))));

        let mut bad_currency = submission();
        bad_currency.currency = "EURO".to_string();
        assert!(matches!(bad_currency.validate(), Err(ApplicationError::Validation(_))));

        let mut blank = submission();
        blank.description = "   ".to_string();
        assert!(matches!(blank.validate(), Err(ApplicationError::Validation(_))));
    }

    #[test]
    fn submission_accepts_plain_and_rfc3339_dates() {
        let mut plain = submission();
        plain.date = Some("2026-03-14".to_string());
        let date = plain.validate().expect("plain date").date.expect("date set");
        assert_eq!((date.year(), date.month(), date.day(), date.hour()), (2026, 3, 14, 0));

        let mut zoned = submission();
        zoned.date = Some("2026-03-14T10:30:00+02:00".to_string());
        let date = zoned.validate().expect("rfc3339 date").date.expect("date set");
        assert_eq!(date.hour(), 8);

        let mut garbage = submission();
        garbage.date = Some("14/03/2026".to_string());
        assert!(matches!(garbage.validate(), Err(ApplicationError::Validation(_))));
    }

    #[test]
    fn chain_configuration_requires_unique_positive_orders() {
        let chain = |orders: &[u32]| ConfigureApproverChain {
            company_id: CompanyId("c-1".to_string()),
            assignments: orders
                .iter()
                .map(|order| AssignmentInput {
                    approver_id: UserId(format!("u-{order}")),
                    step_order: *order,
                })
                .collect(),
        };

        let sorted = chain(&[3, 1, 2]).validated_assignments().expect("valid orders");
        assert_eq!(sorted.iter().map(|a| a.step_order).collect::<Vec<_>>(), vec![1, 2, 3]);

        assert!(chain(&[1, 1]).validated_assignments().is_err());
        assert!(chain(&[0, 1]).validated_assignments().is_err());
        assert!(chain(&[]).validated_assignments().expect("empty is allowed").is_empty());
    }

    #[test]
    fn rule_threshold_must_be_a_percentage() {
        let rule = |threshold| ConfigureApprovalRule {
            company_id: CompanyId("c-1".to_string()),
            percentage_threshold: threshold,
            specific_approver_id: None,
            hybrid: None,
        };

        assert_eq!(rule(Some(60)).validated_threshold(), Ok(Some(60)));
        assert_eq!(rule(Some(0)).validated_threshold(), Ok(Some(0)));
        assert_eq!(rule(None).validated_threshold(), Ok(None));
        assert!(rule(Some(101)).validated_threshold().is_err());
    }

    #[test]
    fn email_is_lower_cased_and_checked() {
        assert_eq!(validated_email(" Ana@Example.COM "), Ok("ana@example.com".to_string()));
        assert!(validated_email("not-an-email").is_err());
        assert!(validated_email("@example.com").is_err());
    }
}
