pub mod approvals;
pub mod audit;
pub mod config;
pub mod currency;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use approvals::{ApprovalChainBuilder, EvaluationReason, RuleEvaluation, RuleEvaluator};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use currency::{
    Conversion, CountryCurrencies, CountryDirectory, CurrencyNormalizer, ExchangeRateProvider,
    FixedCountryDirectory, FixedRateProvider, UnavailableCountryDirectory, UnavailableRateProvider,
};
pub use domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
pub use domain::company::{ApprovalRule, ApproverAssignment, Company, CompanyId};
pub use domain::expense::{Expense, ExpenseId, ExpenseStatus};
pub use domain::user::{User, UserId, UserRole};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflow::{
    DecisionOutcome, DecisionPlan, DirectoryService, DirectoryStore, ExpenseDetail,
    WorkflowController, WorkflowStore,
};
