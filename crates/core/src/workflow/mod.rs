pub mod commands;
pub mod controller;
pub mod directory;
pub mod store;

pub use commands::{
    AssignmentInput, ConfigureApprovalRule, ConfigureApproverChain, CreateCompany, CreateUser,
    RecordDecision, RegisterUser, SubmitExpense, UpdateManager,
};
pub use controller::{DecisionOutcome, ExpenseDetail, WorkflowController};
pub use directory::{AdminScope, DirectoryService, DEFAULT_COMPANY_CURRENCY};
pub use store::{DecisionPlan, DirectoryStore, WorkflowStore};
