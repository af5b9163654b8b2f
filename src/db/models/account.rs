//! Account and session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Identity record held by the identity provider.
///
/// Field names follow the hosted auth API's user object so the same type
/// deserializes straight from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub banned_until: Option<String>,
    #[serde(default)]
    pub last_sign_in_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Account {
    /// Name stored in the account metadata at sign-up or provisioning
    pub fn full_name(&self) -> Option<&str> {
        self.user_metadata
            .get("full_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn email_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }

    /// Check whether a ban is in effect at the given time
    pub fn is_banned_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match &self.banned_until {
            Some(until) => match chrono::DateTime::parse_from_rfc3339(until) {
                Ok(until) => until > now,
                // An unreadable ban timestamp still counts as banned
                Err(_) => true,
            },
            None => false,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref().filter(|p| !p.is_empty())
    }
}

/// A row of `accounts` in the local backend
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub metadata: String,
    pub email_confirmed_at: Option<String>,
    pub banned_until: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            email: Some(row.email),
            phone: row.phone,
            user_metadata: serde_json::from_str(&row.metadata)
                .unwrap_or_else(|_| serde_json::json!({})),
            email_confirmed_at: row.email_confirmed_at,
            banned_until: row.banned_until,
            last_sign_in_at: row.last_sign_in_at,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub account_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

/// A freshly issued session
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub access_token: String,
    pub expires_at: String,
    pub user: Account,
}

/// Account to provision, either by sign-up or by an administrator
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub email_confirmed: bool,
}

/// Ban applied to or lifted from an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ban {
    For(chrono::Duration),
    Lift,
}

impl Ban {
    /// The long ban applied to suspended customers (100 years)
    pub fn long() -> Self {
        Ban::For(chrono::Duration::hours(876_000))
    }
}

/// Partial update of an account; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub email_confirm: bool,
    pub ban: Option<Ban>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub email_confirmed: bool,
}

impl From<Account> for UserResponse {
    fn from(account: Account) -> Self {
        Self {
            full_name: account.full_name().map(str::to_string),
            email_confirmed: account.email_confirmed(),
            id: account.id,
            email: account.email,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}
