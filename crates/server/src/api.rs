//! JSON routes over the workflow controller and directory service.
//!
//! The caller is identified by the `x-user-id` header, which an upstream gateway is trusted
//! to set. An optional `x-correlation-id` header is threaded through audit events and error
//! bodies; one is generated when absent.
//!
//! - `GET  /utils/countries`                         countries and their currency codes
//! - `POST /users`                                   register a standalone user
//! - `POST /companies`                               create a company owned by the caller
//! - `GET|POST /admin/users`                         list or create users in the admin's company
//! - `PUT  /admin/users/{user_id}/manager`           relink a manager
//! - `PUT  /admin/users/{user_id}/role`              change a role
//! - `GET|PUT /admin/approver-assignments`           read or replace the approver chain
//! - `GET|PUT /admin/approval-rule`                  read or upsert the company rule
//! - `POST /expenses`                                submit an expense
//! - `GET  /expenses/me`                             the caller's expenses, newest first
//! - `GET  /expenses/{expense_id}`                   one expense with its chain
//! - `GET  /expenses/approvals/pending`              steps awaiting the caller
//! - `POST /expenses/approvals/{expense_id}/decide`  approve or reject the caller's step

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use receiptpath_core::audit::{AuditContext, AuditSink};
use receiptpath_core::currency::{
    currency_for_country, CountryCurrencies, CountryDirectory, ExchangeRateProvider,
};
use receiptpath_core::domain::approval::ApprovalStep;
use receiptpath_core::domain::company::{ApprovalRule, ApproverAssignment, Company};
use receiptpath_core::domain::expense::{Expense, ExpenseId};
use receiptpath_core::domain::user::{User, UserId, UserRole};
use receiptpath_core::errors::{ApplicationError, InterfaceError};
use receiptpath_core::workflow::{
    AdminScope, AssignmentInput, ConfigureApprovalRule, ConfigureApproverChain, CreateCompany,
    CreateUser, DecisionOutcome, DirectoryService, ExpenseDetail, RecordDecision, RegisterUser,
    SubmitExpense, UpdateManager, WorkflowController, WorkflowStore,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub type SharedRates = Arc<dyn ExchangeRateProvider>;
pub type SharedAudit = Arc<dyn AuditSink>;
pub type SharedCountries = Arc<dyn CountryDirectory>;

pub struct AppState<S> {
    pub controller: Arc<WorkflowController<S, SharedRates, SharedAudit>>,
    pub directory: Arc<DirectoryService<S, SharedAudit>>,
    pub countries: SharedCountries,
}

impl<S> AppState<S>
where
    S: WorkflowStore + Clone,
{
    pub fn new(
        store: S,
        rates: SharedRates,
        countries: SharedCountries,
        audit: SharedAudit,
    ) -> Self {
        Self {
            controller: Arc::new(WorkflowController::new(store.clone(), rates, audit.clone())),
            directory: Arc::new(DirectoryService::new(store, audit)),
            countries,
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            directory: Arc::clone(&self.directory),
            countries: Arc::clone(&self.countries),
        }
    }
}

pub fn router<S>(state: AppState<S>) -> Router
where
    S: WorkflowStore + Clone + 'static,
{
    Router::new()
        .route("/utils/countries", get(countries::<S>))
        .route("/users", post(register_user::<S>))
        .route("/companies", post(create_company::<S>))
        .route("/admin/users", get(list_users::<S>).post(create_user::<S>))
        .route("/admin/users/{user_id}/manager", put(update_manager::<S>))
        .route("/admin/users/{user_id}/role", put(update_role::<S>))
        .route(
            "/admin/approver-assignments",
            get(list_assignments::<S>).put(replace_assignments::<S>),
        )
        .route("/admin/approval-rule", get(approval_rule::<S>).put(configure_rule::<S>))
        .route("/expenses", post(submit_expense::<S>))
        .route("/expenses/me", get(my_expenses::<S>))
        .route("/expenses/approvals/pending", get(pending_approvals::<S>))
        .route("/expenses/approvals/{expense_id}/decide", post(decide::<S>))
        .route("/expenses/{expense_id}", get(expense_detail::<S>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request context and errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub correlation_id: String,
    pub actor: Option<UserId>,
}

impl RequestContext {
    fn audit(&self) -> Result<AuditContext, ApiError> {
        match &self.actor {
            Some(actor) => Ok(AuditContext::new(self.correlation_id.clone(), actor.clone())),
            None => Err(self.fail(ApplicationError::Forbidden(format!(
                "the {USER_ID_HEADER} header is required"
            )))),
        }
    }

    fn fail(&self, error: ApplicationError) -> ApiError {
        ApiError(error.into_interface(self.correlation_id.clone()))
    }
}

impl<St> FromRequestParts<St> for RequestContext
where
    St: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            correlation_id: header(CORRELATION_ID_HEADER)
                .unwrap_or_else(|| format!("req-{}", Uuid::new_v4())),
            actor: header(USER_ID_HEADER).map(UserId),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = match &error {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Server-side details stay in the log; callers get the safe message.
        let message = if status.is_server_error() {
            error!(
                event_name = "api.request_failed",
                correlation_id = %error.correlation_id(),
                kind = error.kind(),
                error = %error.message(),
                "request failed"
            );
            error.user_message().to_string()
        } else {
            warn!(
                event_name = "api.request_rejected",
                correlation_id = %error.correlation_id(),
                kind = error.kind(),
                error = %error.message(),
                "request rejected"
            );
            error.message().to_string()
        };

        let body = ErrorBody {
            error: error.kind(),
            message,
            correlation_id: error.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn admin_scope<S>(
    state: &AppState<S>,
    context: &RequestContext,
) -> ApiResult<(AdminScope, AuditContext)>
where
    S: WorkflowStore,
{
    let audit = context.audit()?;
    let scope = state.directory.require_admin(&audit.actor).await.map_err(|e| context.fail(e))?;
    Ok((scope, audit))
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

async fn countries<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
) -> ApiResult<Json<Vec<CountryCurrencies>>>
where
    S: WorkflowStore + Clone + 'static,
{
    let countries = state.countries.countries().await.map_err(|e| context.fail(e))?;
    Ok(Json(countries))
}

async fn register_user<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Json(body): Json<RegisterUser>,
) -> ApiResult<(StatusCode, Json<User>)>
where
    S: WorkflowStore + Clone + 'static,
{
    let user = state
        .directory
        .register_user(body, &context.correlation_id)
        .await
        .map_err(|e| context.fail(e))?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyBody {
    pub name: String,
    pub country: String,
    pub currency: Option<String>,
}

async fn create_company<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Json(body): Json<CreateCompanyBody>,
) -> ApiResult<(StatusCode, Json<Company>)>
where
    S: WorkflowStore + Clone + 'static,
{
    let audit = context.audit()?;
    let currency = match body.currency {
        Some(currency) => Some(currency),
        None => country_currency(&state, &context, &body.country).await,
    };
    let command = CreateCompany {
        owner_id: audit.actor.clone(),
        name: body.name,
        country: body.country,
        currency,
    };
    let company =
        state.directory.create_company(command, &audit).await.map_err(|e| context.fail(e))?;
    Ok((StatusCode::CREATED, Json(company)))
}

/// Currency of `country` from the country directory. Lookup failures leave the
/// directory service's default in place.
async fn country_currency<S>(
    state: &AppState<S>,
    context: &RequestContext,
    country: &str,
) -> Option<String> {
    match state.countries.countries().await {
        Ok(countries) => currency_for_country(&countries, country),
        Err(error) => {
            warn!(
                event_name = "directory.country_lookup_failed",
                correlation_id = %context.correlation_id,
                country = %country,
                error = %error,
                "country lookup failed; using the default company currency"
            );
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub name: String,
    pub email: String,
    pub role: Option<UserRole>,
    pub manager_id: Option<UserId>,
    #[serde(default)]
    pub is_manager_approver: bool,
}

async fn create_user<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Json(body): Json<CreateUserBody>,
) -> ApiResult<(StatusCode, Json<User>)>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, audit) = admin_scope(&state, &context).await?;
    let command = CreateUser {
        name: body.name,
        email: body.email,
        role: body.role.unwrap_or(UserRole::Employee),
        manager_id: body.manager_id,
        is_manager_approver: body.is_manager_approver,
    };
    let user =
        state.directory.create_user(&scope, command, &audit).await.map_err(|e| context.fail(e))?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_users<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
) -> ApiResult<Json<Vec<User>>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, _) = admin_scope(&state, &context).await?;
    let users = state.directory.list_users(&scope).await.map_err(|e| context.fail(e))?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct UpdateManagerBody {
    pub manager_id: Option<UserId>,
    pub is_manager_approver: Option<bool>,
}

async fn update_manager<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateManagerBody>,
) -> ApiResult<Json<User>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, audit) = admin_scope(&state, &context).await?;
    let command = UpdateManager {
        user_id: UserId(user_id),
        manager_id: body.manager_id,
        is_manager_approver: body.is_manager_approver,
    };
    let user = state
        .directory
        .update_manager(&scope, command, &audit)
        .await
        .map_err(|e| context.fail(e))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleBody {
    pub role: UserRole,
}

async fn update_role<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateRoleBody>,
) -> ApiResult<Json<User>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, audit) = admin_scope(&state, &context).await?;
    let user = state
        .directory
        .update_role(&scope, &UserId(user_id), body.role, &audit)
        .await
        .map_err(|e| context.fail(e))?;
    Ok(Json(user))
}

// ---------------------------------------------------------------------------
// Approval policy
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AssignmentsBody {
    pub assignments: Vec<AssignmentInput>,
}

async fn list_assignments<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
) -> ApiResult<Json<Vec<ApproverAssignment>>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, _) = admin_scope(&state, &context).await?;
    let chain = state
        .controller
        .list_approver_chain(&scope.company_id)
        .await
        .map_err(|e| context.fail(e))?;
    Ok(Json(chain))
}

async fn replace_assignments<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Json(body): Json<AssignmentsBody>,
) -> ApiResult<Json<Vec<ApproverAssignment>>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, audit) = admin_scope(&state, &context).await?;
    let command =
        ConfigureApproverChain { company_id: scope.company_id, assignments: body.assignments };
    let chain = state
        .controller
        .configure_approver_chain(command, &audit)
        .await
        .map_err(|e| context.fail(e))?;
    Ok(Json(chain))
}

async fn approval_rule<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
) -> ApiResult<Json<ApprovalRule>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, _) = admin_scope(&state, &context).await?;
    let rule = state
        .controller
        .approval_rule(&scope.company_id)
        .await
        .map_err(|e| context.fail(e))?
        .unwrap_or_else(|| ApprovalRule::empty(scope.company_id));
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRuleBody {
    pub percentage_threshold: Option<u32>,
    pub specific_approver_id: Option<UserId>,
    pub hybrid: Option<bool>,
}

async fn configure_rule<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Json(body): Json<ApprovalRuleBody>,
) -> ApiResult<Json<ApprovalRule>>
where
    S: WorkflowStore + Clone + 'static,
{
    let (scope, audit) = admin_scope(&state, &context).await?;
    let command = ConfigureApprovalRule {
        company_id: scope.company_id,
        percentage_threshold: body.percentage_threshold,
        specific_approver_id: body.specific_approver_id,
        hybrid: body.hybrid,
    };
    let rule = state
        .controller
        .configure_approval_rule(command, &audit)
        .await
        .map_err(|e| context.fail(e))?;
    Ok(Json(rule))
}

// ---------------------------------------------------------------------------
// Expenses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitExpenseBody {
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub date: Option<String>,
}

async fn submit_expense<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Json(body): Json<SubmitExpenseBody>,
) -> ApiResult<(StatusCode, Json<Expense>)>
where
    S: WorkflowStore + Clone + 'static,
{
    let audit = context.audit()?;
    let command = SubmitExpense {
        employee_id: audit.actor.clone(),
        amount: body.amount,
        currency: body.currency,
        category: body.category,
        description: body.description,
        date: body.date,
    };
    let expense =
        state.controller.submit_expense(command, &audit).await.map_err(|e| context.fail(e))?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn my_expenses<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
) -> ApiResult<Json<Vec<Expense>>>
where
    S: WorkflowStore + Clone + 'static,
{
    let audit = context.audit()?;
    let expenses =
        state.controller.list_expenses_for(&audit.actor).await.map_err(|e| context.fail(e))?;
    Ok(Json(expenses))
}

/// Visible to the submitter, anyone on the chain, and admins of the expense's company.
async fn expense_detail<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Path(expense_id): Path<String>,
) -> ApiResult<Json<ExpenseDetail>>
where
    S: WorkflowStore + Clone + 'static,
{
    let audit = context.audit()?;
    let viewer = state.directory.user(&audit.actor).await.map_err(|e| context.fail(e))?;
    let detail = state
        .controller
        .expense_detail(&ExpenseId(expense_id))
        .await
        .map_err(|e| context.fail(e))?;

    let allowed = detail.expense.employee_id == viewer.id
        || detail.steps.iter().any(|step| step.approver_id == viewer.id)
        || (viewer.is_admin() && viewer.belongs_to(&detail.expense.company_id));
    if !allowed {
        return Err(context.fail(ApplicationError::Forbidden(format!(
            "user `{}` cannot view expense `{}`",
            viewer.id.0, detail.expense.id.0
        ))));
    }
    Ok(Json(detail))
}

async fn pending_approvals<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
) -> ApiResult<Json<Vec<ApprovalStep>>>
where
    S: WorkflowStore + Clone + 'static,
{
    let audit = context.audit()?;
    let steps = state
        .controller
        .list_pending_approvals_for(&audit.actor)
        .await
        .map_err(|e| context.fail(e))?;
    Ok(Json(steps))
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub approve: bool,
    pub comment: Option<String>,
}

async fn decide<S>(
    State(state): State<AppState<S>>,
    context: RequestContext,
    Path(expense_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<DecisionOutcome>>
where
    S: WorkflowStore + Clone + 'static,
{
    let audit = context.audit()?;
    let command = RecordDecision {
        expense_id: ExpenseId(expense_id),
        approver_id: audit.actor.clone(),
        approve: body.approve,
        comment: body.comment,
    };
    let outcome =
        state.controller.record_decision(command, &audit).await.map_err(|e| context.fail(e))?;
    Ok(Json(outcome))
}
