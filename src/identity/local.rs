//! SQLite-backed identity provider and profile store.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::{BackendError, IdentityProvider, ProfileStore};
use crate::config::AuthConfig;
use crate::db::{
    Account, AccountRow, AccountUpdate, AuditLog, Ban, DbPool, NewAccount, NewProfile, Profile,
    ProfileRow, ProfileStatus, Role, RoleAssignment, RoleAssignmentRow, SessionGrant, SessionRow,
};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

pub struct LocalBackend {
    pool: DbPool,
    session_ttl: chrono::Duration,
    require_email_confirmation: bool,
}

impl LocalBackend {
    pub fn new(pool: DbPool, auth: &AuthConfig) -> Self {
        Self {
            pool,
            session_ttl: chrono::Duration::hours(auth.session_ttl_hours),
            require_email_confirmation: auth.require_email_confirmation,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn find_account(&self, id: &str) -> Result<Option<AccountRow>, BackendError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<AccountRow>, BackendError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Account, BackendError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        let email = normalize_email(&account.email);
        let password_hash = hash_password(&account.password)
            .map_err(|e| BackendError::Internal(format!("Failed to hash password: {}", e)))?;
        let metadata = match &account.full_name {
            Some(name) => serde_json::json!({ "full_name": name }),
            None => serde_json::json!({}),
        };
        let confirmed_at = account.email_confirmed.then(|| now.clone());

        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, phone, password_hash, metadata,
                                  email_confirmed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&email)
        .bind(&account.phone)
        .bind(&password_hash)
        .bind(metadata.to_string())
        .bind(&confirmed_at)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BackendError::Conflict(
                    "A user with this email address has already been registered".to_string(),
                )
            } else {
                BackendError::Database(e)
            }
        })?;

        let row = self
            .find_account(&id)
            .await?
            .ok_or_else(|| BackendError::Internal("Account vanished after insert".to_string()))?;
        Ok(row.into())
    }
}

#[async_trait]
impl IdentityProvider for LocalBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionGrant, BackendError> {
        let row = self
            .find_account_by_email(email)
            .await?
            .ok_or(BackendError::InvalidCredentials)?;

        if !verify_password(password, &row.password_hash) {
            return Err(BackendError::InvalidCredentials);
        }

        let account = Account::from(row);
        if account.is_banned_at(chrono::Utc::now()) {
            return Err(BackendError::Banned);
        }
        if self.require_email_confirmation && !account.email_confirmed() {
            return Err(BackendError::Validation("Email not confirmed".to_string()));
        }

        let token = generate_token();
        let now = chrono::Utc::now();
        let expires_at = (now + self.session_ttl).to_rfc3339();

        sqlx::query(
            "INSERT INTO sessions (id, account_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&account.id)
        .bind(hash_token(&token))
        .bind(&expires_at)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE accounts SET last_sign_in_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&account.id)
            .execute(&self.pool)
            .await?;

        let user = self
            .find_account(&account.id)
            .await?
            .map(Account::from)
            .unwrap_or(account);

        Ok(SessionGrant {
            access_token: token,
            expires_at,
            user,
        })
    }

    async fn sign_up(&self, account: NewAccount) -> Result<Account, BackendError> {
        self.insert_account(account).await
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Live sessions outlast a ban; the ban only stops new sign-ins.
    async fn get_user(&self, token: &str) -> Result<Account, BackendError> {
        let session: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
                .bind(hash_token(token))
                .bind(now())
                .fetch_optional(&self.pool)
                .await?;

        let session = session.ok_or(BackendError::InvalidToken)?;
        let account = self
            .find_account(&session.account_id)
            .await?
            .ok_or(BackendError::InvalidToken)?;
        Ok(account.into())
    }

    async fn create_user(&self, account: NewAccount) -> Result<Account, BackendError> {
        self.insert_account(account).await
    }

    async fn update_user(
        &self,
        id: &str,
        update: AccountUpdate,
    ) -> Result<Account, BackendError> {
        let existing = self
            .find_account(id)
            .await?
            .ok_or_else(|| BackendError::NotFound("User not found".to_string()))?;

        let now = chrono::Utc::now();
        let email = update.email.as_deref().map(normalize_email);
        let password_hash = match &update.password {
            Some(password) => Some(hash_password(password).map_err(|e| {
                BackendError::Internal(format!("Failed to hash password: {}", e))
            })?),
            None => None,
        };
        let confirmed_at = if update.email_confirm {
            Some(now.to_rfc3339())
        } else {
            existing.email_confirmed_at.clone()
        };
        let banned_until = match update.ban {
            Some(Ban::For(duration)) => Some((now + duration).to_rfc3339()),
            Some(Ban::Lift) => None,
            None => existing.banned_until.clone(),
        };

        sqlx::query(
            r#"
            UPDATE accounts SET
                email = COALESCE(?, email),
                password_hash = COALESCE(?, password_hash),
                email_confirmed_at = ?,
                banned_until = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&email)
        .bind(&password_hash)
        .bind(&confirmed_at)
        .bind(&banned_until)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BackendError::Conflict(
                    "A user with this email address has already been registered".to_string(),
                )
            } else {
                BackendError::Database(e)
            }
        })?;

        let row = self
            .find_account(id)
            .await?
            .ok_or_else(|| BackendError::NotFound("User not found".to_string()))?;
        Ok(row.into())
    }

    async fn list_users(&self) -> Result<Vec<Account>, BackendError> {
        let rows = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn delete_user(&self, id: &str) -> Result<(), BackendError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound("User not found".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for LocalBackend {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM user_profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Profile::try_from)
            .transpose()
            .map_err(BackendError::Internal)
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError> {
        let rows = sqlx::query_as::<_, ProfileRow>("SELECT * FROM user_profiles")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Profile::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::Internal)
    }

    async fn upsert_profile(&self, profile: &NewProfile) -> Result<(), BackendError> {
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO user_profiles (id, status, full_name, email, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                full_name = COALESCE(excluded.full_name, user_profiles.full_name),
                email = COALESCE(excluded.email, user_profiles.email),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.id)
        .bind(profile.status.as_str())
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, user_id: &str, status: ProfileStatus) -> Result<(), BackendError> {
        sqlx::query("UPDATE user_profiles SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_email(&self, user_id: &str, email: &str) -> Result<(), BackendError> {
        sqlx::query("UPDATE user_profiles SET email = ?, updated_at = ? WHERE id = ?")
            .bind(normalize_email(email))
            .bind(now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn roles_for(&self, user_id: &str) -> Result<Vec<Role>, BackendError> {
        let rows = sqlx::query_as::<_, RoleAssignmentRow>(
            "SELECT user_id, role FROM user_roles WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(RoleAssignmentRow::into_assignment)
            .map(|a| a.role)
            .collect())
    }

    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool, BackendError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT role FROM user_roles WHERE user_id = ? AND role = ?")
                .bind(user_id)
                .bind(role.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn assign_role(&self, user_id: &str, role: Role) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (id, user_id, role, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, role) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(role.as_str())
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_role_assignments(
        &self,
        roles: &[Role],
    ) -> Result<Vec<RoleAssignment>, BackendError> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; roles.len()].join(", ");
        let sql = format!(
            "SELECT user_id, role FROM user_roles WHERE role IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, RoleAssignmentRow>(&sql);
        for role in roles {
            query = query.bind(role.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(RoleAssignmentRow::into_assignment)
            .collect())
    }

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, resource_type, resource_id, actor_id, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.actor_id)
        .bind(&entry.details)
        .bind(&entry.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            action = %entry.action,
            resource_type = %entry.resource_type,
            resource_id = ?entry.resource_id,
            "Audit log recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> LocalBackend {
        let pool = crate::db::init_in_memory().await.unwrap();
        LocalBackend::new(pool, &AuthConfig::default())
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password: "correct-horse".to_string(),
            phone: None,
            full_name: Some("Test User".to_string()),
            email_confirmed: false,
        }
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("other", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-hash"));
    }

    #[test]
    fn test_token_hash_is_stable_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[tokio::test]
    async fn test_sign_in_and_get_user() {
        let backend = backend().await;
        let account = backend.sign_up(new_account("Ama@Example.com")).await.unwrap();
        assert_eq!(account.email.as_deref(), Some("ama@example.com"));

        let grant = backend
            .sign_in("ama@example.com", "correct-horse")
            .await
            .unwrap();
        let user = backend.get_user(&grant.access_token).await.unwrap();
        assert_eq!(user.id, account.id);
        assert!(user.last_sign_in_at.is_some());

        backend.sign_out(&grant.access_token).await.unwrap();
        assert!(matches!(
            backend.get_user(&grant.access_token).await,
            Err(BackendError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let backend = backend().await;
        backend.sign_up(new_account("kofi@example.com")).await.unwrap();

        assert!(matches!(
            backend.sign_in("kofi@example.com", "nope").await,
            Err(BackendError::InvalidCredentials)
        ));
        assert!(matches!(
            backend.sign_in("missing@example.com", "correct-horse").await,
            Err(BackendError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let backend = backend().await;
        backend.sign_up(new_account("dup@example.com")).await.unwrap();
        assert!(matches!(
            backend.create_user(new_account("DUP@example.com")).await,
            Err(BackendError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_ban_blocks_sign_in_but_keeps_sessions() {
        let backend = backend().await;
        let account = backend.sign_up(new_account("ban@example.com")).await.unwrap();
        let grant = backend
            .sign_in("ban@example.com", "correct-horse")
            .await
            .unwrap();

        backend
            .update_user(
                &account.id,
                AccountUpdate {
                    ban: Some(Ban::long()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let user = backend.get_user(&grant.access_token).await.unwrap();
        assert!(user.is_banned_at(chrono::Utc::now()));
        assert!(matches!(
            backend.sign_in("ban@example.com", "correct-horse").await,
            Err(BackendError::Banned)
        ));

        backend
            .update_user(
                &account.id,
                AccountUpdate {
                    ban: Some(Ban::Lift),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(backend.sign_in("ban@example.com", "correct-horse").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_email_and_password() {
        let backend = backend().await;
        let account = backend.sign_up(new_account("old@example.com")).await.unwrap();

        let updated = backend
            .update_user(
                &account.id,
                AccountUpdate {
                    email: Some("new@example.com".to_string()),
                    password: Some("brand-new-pass".to_string()),
                    email_confirm: true,
                    ban: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.email.as_deref(), Some("new@example.com"));
        assert!(updated.email_confirmed());
        assert!(backend.sign_in("new@example.com", "brand-new-pass").await.is_ok());
        assert!(backend.sign_in("old@example.com", "correct-horse").await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_user() {
        let backend = backend().await;
        assert!(matches!(
            backend.update_user("missing", AccountUpdate::default()).await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            backend.delete_user("missing").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_email_confirmation_requirement() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let auth = AuthConfig {
            require_email_confirmation: true,
            ..AuthConfig::default()
        };
        let backend = LocalBackend::new(pool, &auth);
        backend.sign_up(new_account("unconfirmed@example.com")).await.unwrap();

        assert!(matches!(
            backend.sign_in("unconfirmed@example.com", "correct-horse").await,
            Err(BackendError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_profiles_and_roles() {
        let backend = backend().await;
        let account = backend.sign_up(new_account("staff@example.com")).await.unwrap();

        assert!(backend.get_profile(&account.id).await.unwrap().is_none());

        backend
            .upsert_profile(&NewProfile {
                id: account.id.clone(),
                status: ProfileStatus::Pending,
                full_name: Some("Staff".to_string()),
                email: account.email.clone(),
            })
            .await
            .unwrap();
        backend
            .set_status(&account.id, ProfileStatus::Active)
            .await
            .unwrap();

        let profile = backend.get_profile(&account.id).await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Active);
        assert_eq!(profile.full_name.as_deref(), Some("Staff"));

        backend.assign_role(&account.id, Role::Employee).await.unwrap();
        backend.assign_role(&account.id, Role::Employee).await.unwrap();
        assert_eq!(backend.roles_for(&account.id).await.unwrap(), vec![Role::Employee]);
        assert!(backend.has_role(&account.id, Role::Employee).await.unwrap());
        assert!(!backend.has_role(&account.id, Role::SuperAdmin).await.unwrap());

        let staff = backend
            .list_role_assignments(&Role::ADMIN_TIER)
            .await
            .unwrap();
        assert_eq!(staff.len(), 1);
        assert!(backend.list_role_assignments(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_profile_and_roles() {
        let backend = backend().await;
        let account = backend.sign_up(new_account("gone@example.com")).await.unwrap();
        backend
            .upsert_profile(&NewProfile {
                id: account.id.clone(),
                status: ProfileStatus::Active,
                full_name: None,
                email: None,
            })
            .await
            .unwrap();
        backend.assign_role(&account.id, Role::Admin).await.unwrap();

        backend.delete_user(&account.id).await.unwrap();

        assert!(backend.get_profile(&account.id).await.unwrap().is_none());
        assert!(backend.roles_for(&account.id).await.unwrap().is_empty());
        assert!(backend.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_audit() {
        let backend = backend().await;
        let entry = AuditLog::new(
            "customer.suspend",
            "customer",
            Some("c1"),
            Some("admin1"),
            Some(serde_json::json!({"reason": "test"})),
        );
        backend.record_audit(&entry).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
