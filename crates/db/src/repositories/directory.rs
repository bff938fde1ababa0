use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use receiptpath_core::domain::company::{Company, CompanyId};
use receiptpath_core::domain::user::{User, UserId, UserRole};
use receiptpath_core::errors::ApplicationError;
use receiptpath_core::workflow::store::DirectoryStore;

use super::{column, parse_timestamp, timestamp, RepositoryError, SqlWorkflowStore};

const USER_COLUMNS: &str =
    "id, name, email, role, company_id, manager_id, is_manager_approver, created_at";

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let role: String = column(row, "role")?;
    let created_at: String = column(row, "created_at")?;
    let company_id: Option<String> = column(row, "company_id")?;
    let manager_id: Option<String> = column(row, "manager_id")?;
    let is_manager_approver: i64 = column(row, "is_manager_approver")?;

    Ok(User {
        id: UserId(column(row, "id")?),
        name: column(row, "name")?,
        email: column(row, "email")?,
        role: UserRole::parse(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown user role `{role}`")))?,
        company_id: company_id.map(CompanyId),
        manager_id: manager_id.map(UserId),
        is_manager_approver: is_manager_approver != 0,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn row_to_company(row: &SqliteRow) -> Result<Company, RepositoryError> {
    let created_at: String = column(row, "created_at")?;
    Ok(Company {
        id: CompanyId(column(row, "id")?),
        name: column(row, "name")?,
        country: column(row, "country")?,
        currency: column(row, "currency")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

const UPSERT_USER: &str = "INSERT INTO app_user (id, name, email, role, company_id, manager_id,
                                      is_manager_approver, created_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(id) DO UPDATE SET
         name = excluded.name,
         email = excluded.email,
         role = excluded.role,
         company_id = excluded.company_id,
         manager_id = excluded.manager_id,
         is_manager_approver = excluded.is_manager_approver";

impl SqlWorkflowStore {
    async fn fetch_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE email = ?"))
            .bind(email)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn fetch_company_users(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE company_id = ? ORDER BY created_at, id"
        ))
        .bind(&company_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn upsert_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(UPSERT_USER)
            .bind(&user.id.0)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.role.as_str())
            .bind(user.company_id.as_ref().map(|id| id.0.as_str()))
            .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
            .bind(i64::from(user.is_manager_approver))
            .bind(timestamp(&user.created_at))
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn fetch_company(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, country, currency, created_at FROM company WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_company).transpose()
    }

    async fn insert_company(&self, company: &Company, owner: &User) -> Result<(), RepositoryError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO company (id, name, country, currency, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&company.id.0)
        .bind(&company.name)
        .bind(&company.country)
        .bind(&company.currency)
        .bind(timestamp(&company.created_at))
        .execute(&mut *tx)
        .await?;

        let linked = sqlx::query(
            "UPDATE app_user SET company_id = ?, role = ? WHERE id = ? AND company_id IS NULL",
        )
        .bind(&company.id.0)
        .bind(owner.role.as_str())
        .bind(&owner.id.0)
        .execute(&mut *tx)
        .await?;
        if linked.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "user `{}` is already linked to a company",
                owner.id.0
            )));
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for SqlWorkflowStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, ApplicationError> {
        Ok(self.fetch_user(id).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ApplicationError> {
        Ok(self.fetch_user_by_email(email).await?)
    }

    async fn list_company_users(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, ApplicationError> {
        Ok(self.fetch_company_users(company_id).await?)
    }

    async fn save_user(&self, user: &User) -> Result<(), ApplicationError> {
        Ok(self.upsert_user(user).await?)
    }

    async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, ApplicationError> {
        Ok(self.fetch_company(id).await?)
    }

    async fn create_company(&self, company: &Company, owner: &User) -> Result<(), ApplicationError> {
        Ok(self.insert_company(company, owner).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use receiptpath_core::domain::company::{Company, CompanyId};
    use receiptpath_core::domain::user::{User, UserId, UserRole};
    use receiptpath_core::errors::ApplicationError;
    use receiptpath_core::workflow::store::DirectoryStore;

    use crate::repositories::SqlWorkflowStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlWorkflowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlWorkflowStore::new(pool)
    }

    fn user(id: &str, email: &str) -> User {
        User {
            id: UserId(id.to_string()),
            name: id.to_string(),
            email: email.to_string(),
            role: UserRole::Employee,
            company_id: None,
            manager_id: None,
            is_manager_approver: false,
            created_at: Utc::now(),
        }
    }

    fn company(id: &str) -> Company {
        Company {
            id: CompanyId(id.to_string()),
            name: "Acme".to_string(),
            country: "India".to_string(),
            currency: "INR".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn users_round_trip_and_update_in_place() {
        let store = setup().await;
        let mut ana = user("u-ana", "ana@acme.test");
        store.save_user(&ana).await.expect("save user");

        ana.name = "Ana Maria".to_string();
        ana.is_manager_approver = true;
        store.save_user(&ana).await.expect("update user");

        let found = store.find_user(&ana.id).await.expect("find").expect("present");
        assert_eq!(found.name, "Ana Maria");
        assert!(found.is_manager_approver);
        assert_eq!(
            store.find_user_by_email("ana@acme.test").await.expect("by email").map(|u| u.id),
            Some(ana.id)
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = setup().await;
        store.save_user(&user("u-1", "dup@acme.test")).await.expect("first");

        let second = store.save_user(&user("u-2", "dup@acme.test")).await;

        assert!(matches!(second, Err(ApplicationError::Conflict(_))));
    }

    #[tokio::test]
    async fn company_creation_links_owner_once() {
        let store = setup().await;
        let mut owner = user("u-owner", "owner@acme.test");
        store.save_user(&owner).await.expect("save owner");
        owner.role = UserRole::Admin;

        store.create_company(&company("c-1"), &owner).await.expect("create company");
        let linked = store.find_user(&owner.id).await.expect("find").expect("present");
        assert_eq!(linked.company_id, Some(CompanyId("c-1".to_string())));
        assert_eq!(linked.role, UserRole::Admin);

        let again = store.create_company(&company("c-2"), &owner).await;
        assert!(matches!(again, Err(ApplicationError::Conflict(_))));
        assert!(store.find_company(&CompanyId("c-2".to_string())).await.expect("find").is_none());

        let members =
            store.list_company_users(&CompanyId("c-1".to_string())).await.expect("list");
        assert_eq!(members.len(), 1);
    }
}
