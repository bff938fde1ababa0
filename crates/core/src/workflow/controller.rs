use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::approvals::{ApprovalChainBuilder, EvaluationReason, RuleEvaluator};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::currency::{CurrencyNormalizer, ExchangeRateProvider};
use crate::domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
use crate::domain::company::{ApprovalRule, ApproverAssignment, Company, CompanyId};
use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use crate::domain::user::UserId;
use crate::errors::{ApplicationError, DomainError};
use crate::workflow::commands::{
    ConfigureApprovalRule, ConfigureApproverChain, RecordDecision, SubmitExpense,
};
use crate::workflow::store::{DecisionPlan, WorkflowStore};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpenseDetail {
    pub expense: Expense,
    pub steps: Vec<ApprovalStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub expense_id: ExpenseId,
    pub expense_status: ExpenseStatus,
    pub decided_step: ApprovalStep,
    pub activated_step: Option<ApprovalStepId>,
    pub reason: EvaluationReason,
}

/// Orchestrates submission and decision recording over an injected store.
///
/// Every mutating call reads what it needs, computes the full outcome in memory and hands it
/// to the store as a single atomic write. No state is kept between calls.
pub struct WorkflowController<S, R, A> {
    store: S,
    normalizer: CurrencyNormalizer<R>,
    audit: A,
}

impl<S, R, A> WorkflowController<S, R, A>
where
    S: WorkflowStore,
    R: ExchangeRateProvider,
    A: AuditSink,
{
    pub fn new(store: S, rates: R, audit: A) -> Self {
        Self { store, normalizer: CurrencyNormalizer::new(rates), audit }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn submit_expense(
        &self,
        command: SubmitExpense,
        context: &AuditContext,
    ) -> Result<Expense, ApplicationError> {
        let submission = command.validate()?;

        let employee = self
            .store
            .find_user(&submission.employee_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", &submission.employee_id.0))?;
        let company_id = employee.company_id.clone().ok_or_else(|| {
            ApplicationError::Validation("user is not linked to a company".to_string())
        })?;
        let company = self.company(&company_id).await?;

        // Rates are resolved before anything is written.
        let conversion = self
            .normalizer
            .normalize(submission.amount, &submission.currency, &company.currency)
            .await?;
        let assignments = self.store.list_assignments(&company.id).await?;

        let now = Utc::now();
        let expense = Expense {
            id: ExpenseId(format!("EXP-{}", Uuid::new_v4())),
            employee_id: employee.id.clone(),
            company_id: company.id.clone(),
            amount: submission.amount,
            currency: submission.currency,
            normalized_amount: conversion.normalized_amount,
            category: submission.category,
            description: submission.description,
            date: submission.date.unwrap_or(now),
            status: ExpenseStatus::Pending,
            state_version: 0,
            created_at: now,
            updated_at: now,
        };
        let steps = ApprovalChainBuilder::build_steps(&employee, &assignments, &expense.id, now);

        self.store.create_expense(&expense, &steps).await?;

        info!(
            event_name = "workflow.expense.submitted",
            correlation_id = %context.correlation_id,
            expense_id = %expense.id.0,
            employee_id = %employee.id.0,
            step_count = steps.len(),
            "expense submitted"
        );
        self.audit.emit(
            AuditEvent::new(
                context,
                "expense.submitted",
                AuditCategory::Submission,
                AuditOutcome::Success,
            )
            .for_expense(&expense.id)
            .for_company(&company.id)
            .with_metadata("step_count", steps.len().to_string())
            .with_metadata("rate", conversion.rate.to_string())
            .with_metadata("rate_fallback", conversion.fallback_used.to_string())
            .with_metadata("normalized_amount", expense.normalized_amount.to_string()),
        );

        Ok(expense)
    }

    pub async fn record_decision(
        &self,
        command: RecordDecision,
        context: &AuditContext,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let expense = self
            .store
            .find_expense(&command.expense_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("expense", &command.expense_id.0))?;
        let no_pending_step = || ApplicationError::NoPendingStep {
            expense_id: command.expense_id.0.clone(),
            approver_id: command.approver_id.0.clone(),
        };
        if expense.status.is_terminal() {
            return Err(no_pending_step());
        }

        let mut steps = self.store.list_steps(&expense.id).await?;
        ensure_single_active_step(&expense.id, &steps)?;
        let index = steps
            .iter()
            .position(|step| {
                step.approver_id == command.approver_id && step.status == StepStatus::Pending
            })
            .ok_or_else(no_pending_step)?;

        let decided_at = Utc::now();
        steps[index].decide(command.approve, command.normalized_comment(), decided_at)?;
        let decided_step = steps[index].clone();

        let rule = self.store.find_rule(&expense.company_id).await?;
        let evaluation = RuleEvaluator::evaluate(&steps, rule.as_ref());
        debug!(
            event_name = "workflow.rules.evaluated",
            correlation_id = %context.correlation_id,
            expense_id = %expense.id.0,
            approved_count = evaluation.approved_count,
            total = evaluation.total,
            percentage_ok = evaluation.percentage_ok,
            specific_approved = evaluation.specific_approved,
            reason = ?evaluation.reason,
            "approval rules evaluated"
        );

        let mut next = expense.clone();
        if evaluation.expense_status != ExpenseStatus::Pending {
            next.transition_to(evaluation.expense_status)?;
        }

        let plan = DecisionPlan {
            expense_id: expense.id.clone(),
            expected_version: expense.state_version,
            expense_status: next.status,
            decided_step: decided_step.clone(),
            activate_step: evaluation.activate_step.clone(),
            decided_at,
        };

        if let Err(error) = self.store.commit_decision(&plan).await {
            self.audit.emit(
                AuditEvent::new(
                    context,
                    "approval.decision_failed",
                    AuditCategory::Decision,
                    AuditOutcome::Failed,
                )
                .for_expense(&expense.id)
                .with_metadata("error", error.to_string()),
            );
            return Err(error);
        }

        self.emit_decision_events(context, &expense, &plan, evaluation.reason);

        Ok(DecisionOutcome {
            expense_id: expense.id,
            expense_status: plan.expense_status,
            decided_step,
            activated_step: plan.activate_step,
            reason: evaluation.reason,
        })
    }

    pub async fn list_pending_approvals_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError> {
        self.store.list_pending_steps_for(approver_id).await
    }

    pub async fn expense_detail(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<ExpenseDetail, ApplicationError> {
        let expense = self
            .store
            .find_expense(expense_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("expense", &expense_id.0))?;
        let steps = self.store.list_steps(expense_id).await?;
        Ok(ExpenseDetail { expense, steps })
    }

    pub async fn list_expenses_for(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, ApplicationError> {
        self.store.list_expenses_for_employee(employee_id).await
    }

    pub async fn configure_approver_chain(
        &self,
        command: ConfigureApproverChain,
        context: &AuditContext,
    ) -> Result<Vec<ApproverAssignment>, ApplicationError> {
        let inputs = command.validated_assignments()?;
        let company = self.company(&command.company_id).await?;

        for input in &inputs {
            self.ensure_company_member(&company.id, &input.approver_id, "approver").await?;
        }

        let assignments: Vec<ApproverAssignment> = inputs
            .into_iter()
            .map(|input| ApproverAssignment {
                company_id: company.id.clone(),
                approver_id: input.approver_id,
                step_order: input.step_order,
            })
            .collect();
        self.store.replace_assignments(&company.id, &assignments).await?;

        let chain = assignments
            .iter()
            .map(|assignment| format!("{}:{}", assignment.step_order, assignment.approver_id.0))
            .collect::<Vec<_>>()
            .join(",");
        self.audit.emit(
            AuditEvent::new(
                context,
                "approval.chain_configured",
                AuditCategory::Configuration,
                AuditOutcome::Success,
            )
            .for_company(&company.id)
            .with_metadata("assignments", chain),
        );

        Ok(assignments)
    }

    pub async fn list_approver_chain(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApproverAssignment>, ApplicationError> {
        self.store.list_assignments(company_id).await
    }

    pub async fn configure_approval_rule(
        &self,
        command: ConfigureApprovalRule,
        context: &AuditContext,
    ) -> Result<ApprovalRule, ApplicationError> {
        let threshold = command.validated_threshold()?;
        let company = self.company(&command.company_id).await?;
        if let Some(approver_id) = &command.specific_approver_id {
            self.ensure_company_member(&company.id, approver_id, "specific approver").await?;
        }

        let mut rule = self
            .store
            .find_rule(&company.id)
            .await?
            .unwrap_or_else(|| ApprovalRule::empty(company.id.clone()));
        if threshold.is_some() {
            rule.percentage_threshold = threshold;
        }
        if let Some(approver_id) = command.specific_approver_id {
            rule.specific_approver_id = Some(approver_id);
        }
        if let Some(hybrid) = command.hybrid {
            rule.hybrid = hybrid;
        }
        self.store.save_rule(&rule).await?;

        self.audit.emit(
            AuditEvent::new(
                context,
                "approval.rule_configured",
                AuditCategory::Configuration,
                AuditOutcome::Success,
            )
            .for_company(&company.id)
            .with_metadata(
                "percentage_threshold",
                rule.percentage_threshold.map(|value| value.to_string()).unwrap_or_default(),
            )
            .with_metadata(
                "specific_approver_id",
                rule.specific_approver_id.as_ref().map(|id| id.0.clone()).unwrap_or_default(),
            )
            .with_metadata("hybrid", rule.hybrid.to_string()),
        );

        Ok(rule)
    }

    pub async fn approval_rule(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalRule>, ApplicationError> {
        self.store.find_rule(company_id).await
    }

    async fn company(&self, company_id: &CompanyId) -> Result<Company, ApplicationError> {
        self.store
            .find_company(company_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("company", &company_id.0))
    }

    async fn ensure_company_member(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
        label: &str,
    ) -> Result<(), ApplicationError> {
        match self.store.find_user(user_id).await? {
            Some(user) if user.belongs_to(company_id) => Ok(()),
            Some(_) => Err(ApplicationError::Validation(format!(
                "{label} `{}` does not belong to company `{}`",
                user_id.0, company_id.0
            ))),
            None => {
                Err(ApplicationError::Validation(format!("{label} `{}` does not exist", user_id.0)))
            }
        }
    }

    fn emit_decision_events(
        &self,
        context: &AuditContext,
        expense: &Expense,
        plan: &DecisionPlan,
        reason: EvaluationReason,
    ) {
        let decision = plan.decided_step.status.as_str();
        info!(
            event_name = "workflow.decision.recorded",
            correlation_id = %context.correlation_id,
            expense_id = %expense.id.0,
            approver_id = %plan.decided_step.approver_id.0,
            step_order = plan.decided_step.step_order,
            decision,
            expense_status = plan.expense_status.as_str(),
            "approval decision recorded"
        );
        self.audit.emit(
            AuditEvent::new(
                context,
                "approval.decision_recorded",
                AuditCategory::Decision,
                AuditOutcome::Success,
            )
            .for_expense(&expense.id)
            .for_company(&expense.company_id)
            .with_metadata("decision", decision)
            .with_metadata("step_order", plan.decided_step.step_order.to_string()),
        );

        match plan.expense_status {
            ExpenseStatus::Approved | ExpenseStatus::Rejected => {
                let (event_type, outcome) = if plan.expense_status == ExpenseStatus::Approved {
                    ("expense.approved", AuditOutcome::Success)
                } else {
                    ("expense.rejected", AuditOutcome::Rejected)
                };
                self.audit.emit(
                    AuditEvent::new(context, event_type, AuditCategory::Evaluation, outcome)
                        .for_expense(&expense.id)
                        .for_company(&expense.company_id)
                        .with_metadata("reason", format!("{reason:?}")),
                );
            }
            ExpenseStatus::Pending => {
                if let Some(step_id) = &plan.activate_step {
                    self.audit.emit(
                        AuditEvent::new(
                            context,
                            "approval.step_activated",
                            AuditCategory::Evaluation,
                            AuditOutcome::Success,
                        )
                        .for_expense(&expense.id)
                        .with_metadata("step_id", step_id.0.clone()),
                    );
                }
            }
        }
    }
}

fn ensure_single_active_step(
    expense_id: &ExpenseId,
    steps: &[ApprovalStep],
) -> Result<(), DomainError> {
    let active = steps.iter().filter(|step| step.status == StepStatus::Pending).count();
    if active > 1 {
        return Err(DomainError::InvariantViolation(format!(
            "expense `{}` has {active} pending approval steps",
            expense_id.0
        )));
    }
    Ok(())
}
