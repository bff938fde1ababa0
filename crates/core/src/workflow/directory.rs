use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::currency::normalize_code;
use crate::domain::company::{Company, CompanyId};
use crate::domain::user::{User, UserId, UserRole};
use crate::errors::ApplicationError;
use crate::workflow::commands::{
    required_text, validated_email, CreateCompany, CreateUser, RegisterUser, UpdateManager,
};
use crate::workflow::store::DirectoryStore;

pub const DEFAULT_COMPANY_CURRENCY: &str = "USD";

/// An admin resolved from the acting identity, together with the company it administers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminScope {
    pub admin: User,
    pub company_id: CompanyId,
}

/// Users, companies and the manager relation that feeds chain building.
pub struct DirectoryService<S, A> {
    store: S,
    audit: A,
}

impl<S, A> DirectoryService<S, A>
where
    S: DirectoryStore,
    A: AuditSink,
{
    pub fn new(store: S, audit: A) -> Self {
        Self { store, audit }
    }

    pub async fn user(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", &user_id.0))
    }

    pub async fn company(&self, company_id: &CompanyId) -> Result<Company, ApplicationError> {
        self.store
            .find_company(company_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("company", &company_id.0))
    }

    /// Signs up a standalone employee; it joins a company by creating one.
    pub async fn register_user(
        &self,
        command: RegisterUser,
        correlation_id: &str,
    ) -> Result<User, ApplicationError> {
        let name = required_text("name", &command.name)?;
        let email = self.unused_email(&command.email).await?;

        let user = User {
            id: UserId(format!("USR-{}", Uuid::new_v4())),
            name,
            email,
            role: UserRole::Employee,
            company_id: None,
            manager_id: None,
            is_manager_approver: false,
            created_at: Utc::now(),
        };
        self.store.save_user(&user).await?;

        let context = AuditContext::new(correlation_id, user.id.clone());
        self.audit.emit(AuditEvent::new(
            &context,
            "directory.user_registered",
            AuditCategory::Directory,
            AuditOutcome::Success,
        ));

        Ok(user)
    }

    /// Creates a company and promotes its owner to admin of it.
    pub async fn create_company(
        &self,
        command: CreateCompany,
        context: &AuditContext,
    ) -> Result<Company, ApplicationError> {
        let name = required_text("name", &command.name)?;
        let country = required_text("country", &command.country)?;
        let currency = command
            .currency
            .as_deref()
            .map(normalize_code)
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| DEFAULT_COMPANY_CURRENCY.to_string());
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(ApplicationError::Validation(format!(
                "currency `{currency}` must be a three-letter ISO code"
            )));
        }

        let mut owner = self.user(&command.owner_id).await?;
        if owner.company_id.is_some() {
            return Err(ApplicationError::Conflict(format!(
                "user `{}` already belongs to a company",
                owner.id.0
            )));
        }

        let company = Company {
            id: CompanyId(format!("CMP-{}", Uuid::new_v4())),
            name,
            country,
            currency,
            created_at: Utc::now(),
        };
        owner.company_id = Some(company.id.clone());
        owner.role = UserRole::Admin;
        self.store.create_company(&company, &owner).await?;

        info!(
            event_name = "directory.company.created",
            correlation_id = %context.correlation_id,
            company_id = %company.id.0,
            owner_id = %owner.id.0,
            currency = %company.currency,
            "company created"
        );
        self.audit.emit(
            AuditEvent::new(
                context,
                "directory.company_created",
                AuditCategory::Directory,
                AuditOutcome::Success,
            )
            .for_company(&company.id)
            .with_metadata("currency", company.currency.clone()),
        );

        Ok(company)
    }

    /// Resolves `actor` to an admin linked to a company, or fails with `Forbidden`.
    pub async fn require_admin(&self, actor: &UserId) -> Result<AdminScope, ApplicationError> {
        let admin = self.user(actor).await?;
        if !admin.is_admin() {
            return Err(ApplicationError::Forbidden(format!(
                "user `{}` is not an admin",
                admin.id.0
            )));
        }
        let company_id = admin.company_id.clone().ok_or_else(|| {
            ApplicationError::Forbidden(format!("admin `{}` is not linked to a company", admin.id.0))
        })?;
        Ok(AdminScope { admin, company_id })
    }

    pub async fn create_user(
        &self,
        scope: &AdminScope,
        command: CreateUser,
        context: &AuditContext,
    ) -> Result<User, ApplicationError> {
        let name = required_text("name", &command.name)?;
        let email = self.unused_email(&command.email).await?;
        if let Some(manager_id) = &command.manager_id {
            self.company_member(&scope.company_id, manager_id, "manager").await?;
        }

        let user = User {
            id: UserId(format!("USR-{}", Uuid::new_v4())),
            name,
            email,
            role: command.role,
            company_id: Some(scope.company_id.clone()),
            manager_id: command.manager_id,
            is_manager_approver: command.is_manager_approver,
            created_at: Utc::now(),
        };
        self.store.save_user(&user).await?;

        self.audit.emit(
            AuditEvent::new(
                context,
                "directory.user_created",
                AuditCategory::Directory,
                AuditOutcome::Success,
            )
            .for_company(&scope.company_id)
            .with_metadata("user_id", user.id.0.clone())
            .with_metadata("role", user.role.as_str()),
        );

        Ok(user)
    }

    pub async fn update_manager(
        &self,
        scope: &AdminScope,
        command: UpdateManager,
        context: &AuditContext,
    ) -> Result<User, ApplicationError> {
        let mut user = self.company_member(&scope.company_id, &command.user_id, "user").await?;
        if let Some(manager_id) = &command.manager_id {
            if manager_id == &user.id {
                return Err(ApplicationError::Validation(format!(
                    "user `{}` cannot manage themselves",
                    user.id.0
                )));
            }
            self.company_member(&scope.company_id, manager_id, "manager").await?;
        }

        user.manager_id = command.manager_id;
        if let Some(flag) = command.is_manager_approver {
            user.is_manager_approver = flag;
        }
        self.store.save_user(&user).await?;

        self.audit.emit(
            AuditEvent::new(
                context,
                "directory.manager_updated",
                AuditCategory::Directory,
                AuditOutcome::Success,
            )
            .for_company(&scope.company_id)
            .with_metadata("user_id", user.id.0.clone())
            .with_metadata(
                "manager_id",
                user.manager_id.as_ref().map(|id| id.0.clone()).unwrap_or_default(),
            )
            .with_metadata("is_manager_approver", user.is_manager_approver.to_string()),
        );

        Ok(user)
    }

    pub async fn update_role(
        &self,
        scope: &AdminScope,
        user_id: &UserId,
        role: UserRole,
        context: &AuditContext,
    ) -> Result<User, ApplicationError> {
        let mut user = self.company_member(&scope.company_id, user_id, "user").await?;
        user.role = role;
        self.store.save_user(&user).await?;

        self.audit.emit(
            AuditEvent::new(
                context,
                "directory.role_updated",
                AuditCategory::Directory,
                AuditOutcome::Success,
            )
            .for_company(&scope.company_id)
            .with_metadata("user_id", user.id.0.clone())
            .with_metadata("role", role.as_str()),
        );

        Ok(user)
    }

    pub async fn list_users(&self, scope: &AdminScope) -> Result<Vec<User>, ApplicationError> {
        self.store.list_company_users(&scope.company_id).await
    }

    async fn unused_email(&self, raw: &str) -> Result<String, ApplicationError> {
        let email = validated_email(raw)?;
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ApplicationError::Conflict(format!("email `{email}` is already registered")));
        }
        Ok(email)
    }

    async fn company_member(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
        label: &str,
    ) -> Result<User, ApplicationError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", &user_id.0))?;
        if !user.belongs_to(company_id) {
            return Err(ApplicationError::Validation(format!(
                "{label} `{}` does not belong to company `{}`",
                user_id.0, company_id.0
            )));
        }
        Ok(user)
    }
}
