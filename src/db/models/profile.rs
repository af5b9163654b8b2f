//! User profile models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::role::ProfileStatus;

/// A row of `user_profiles`, as stored.
///
/// The hosted table API returns the same shape as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Local record tracking onboarding/suspension status for an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub status: ProfileStatus,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = String;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            id: row.id,
            full_name: row.full_name,
            email: row.email,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Profile to create or overwrite.
///
/// Absent names and emails are left out of the body so an upsert keeps the
/// stored values.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub status: ProfileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
