//! Seams to the identity provider and the profile & role store.
//!
//! Access decisions and privileged actions only ever talk to these two
//! traits. Two backends implement both of them:
//! - [`LocalBackend`]: SQLite-backed, self-contained
//! - [`HostedBackend`]: a hosted auth admin API plus a REST table API

mod hosted;
mod local;

pub use hosted::HostedBackend;
pub use local::LocalBackend;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::db::{
    Account, AccountUpdate, AuditLog, NewAccount, NewProfile, Profile, ProfileStatus,
    RoleAssignment, Role, SessionGrant,
};

/// Errors reported by either collaborator
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Invalid or expired session token")]
    InvalidToken,

    #[error("User is banned")]
    Banned,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl BackendError {
    /// Whether the error means the presented credential cannot be trusted
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            BackendError::InvalidCredentials
                | BackendError::InvalidToken
                | BackendError::Banned
                | BackendError::NotFound(_)
        )
    }
}

/// Issues and validates sessions and stores account records.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionGrant, BackendError>;

    async fn sign_up(&self, account: NewAccount) -> Result<Account, BackendError>;

    async fn sign_out(&self, token: &str) -> Result<(), BackendError>;

    /// Exchange a session token for the account it is bound to
    async fn get_user(&self, token: &str) -> Result<Account, BackendError>;

    /// Provision an account with administrator privileges
    async fn create_user(&self, account: NewAccount) -> Result<Account, BackendError>;

    async fn update_user(&self, id: &str, update: AccountUpdate)
        -> Result<Account, BackendError>;

    async fn list_users(&self) -> Result<Vec<Account>, BackendError>;

    async fn delete_user(&self, id: &str) -> Result<(), BackendError>;
}

/// Holds `user_profiles`, `user_roles` and the audit log.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError>;

    async fn upsert_profile(&self, profile: &NewProfile) -> Result<(), BackendError>;

    /// Set the status of an existing profile. A missing profile is a no-op.
    async fn set_status(&self, user_id: &str, status: ProfileStatus) -> Result<(), BackendError>;

    async fn set_email(&self, user_id: &str, email: &str) -> Result<(), BackendError>;

    async fn roles_for(&self, user_id: &str) -> Result<Vec<Role>, BackendError>;

    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool, BackendError>;

    /// Grant a role; granting a role the account already holds is a no-op
    async fn assign_role(&self, user_id: &str, role: Role) -> Result<(), BackendError>;

    /// Every assignment of any of the given roles
    async fn list_role_assignments(
        &self,
        roles: &[Role],
    ) -> Result<Vec<RoleAssignment>, BackendError>;

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), BackendError>;
}

/// Both collaborators, as used by the application state
pub struct Backends {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn ProfileStore>,
}

/// Build the configured backend
pub async fn connect(config: &Config) -> Result<Backends> {
    match config.backend.kind {
        BackendKind::Local => {
            let pool = crate::db::init(&config.server.data_dir)
                .await
                .context("Failed to initialize local database")?;
            let backend = Arc::new(LocalBackend::new(pool, &config.auth));
            Ok(Backends {
                identity: backend.clone(),
                store: backend,
            })
        }
        BackendKind::Hosted => {
            let backend = Arc::new(
                HostedBackend::new(&config.backend).context("Failed to configure hosted backend")?,
            );
            Ok(Backends {
                identity: backend.clone(),
                store: backend,
            })
        }
    }
}
