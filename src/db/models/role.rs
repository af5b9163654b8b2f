//! Role assignments and profile status.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Administrative roles an account can hold.
///
/// An account without any role assignment is a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access, including account management
    SuperAdmin,
    /// Manages a single branch
    AdminBranch,
    /// Store staff
    Employee,
    /// Legacy role granted by admin approval
    Admin,
}

impl Role {
    /// Roles that mark an account as staff rather than a customer
    pub const ADMIN_TIER: [Role; 3] = [Role::SuperAdmin, Role::AdminBranch, Role::Employee];

    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::AdminBranch, Role::Employee, Role::Admin];

    /// Permission level (higher = more permissions)
    pub fn rank(&self) -> u8 {
        match self {
            Role::SuperAdmin => 3,
            Role::AdminBranch | Role::Admin => 2,
            Role::Employee => 1,
        }
    }

    /// Check if this role meets the given requirement
    pub fn satisfies(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn is_admin_tier(&self) -> bool {
        match self {
            Role::SuperAdmin | Role::AdminBranch | Role::Employee => true,
            Role::Admin => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::AdminBranch => "admin_branch",
            Role::Employee => "employee",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "super_admin" => Ok(Role::SuperAdmin),
            "admin_branch" => Ok(Role::AdminBranch),
            "employee" => Ok(Role::Employee),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Pick the single role an auth snapshot exposes for an account.
///
/// Highest rank wins; `admin_branch` beats the legacy `admin` on ties.
pub fn effective_role(roles: &[Role]) -> Option<Role> {
    roles
        .iter()
        .copied()
        .max_by_key(|r| (r.rank(), r.is_admin_tier()))
}

/// Onboarding and suspension state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Pending,
    Active,
    Suspended,
    Rejected,
}

impl ProfileStatus {
    /// Suspended and rejected accounts only ever see the blocked notice
    pub fn is_blocked(&self) -> bool {
        matches!(self, ProfileStatus::Suspended | ProfileStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Pending => "pending",
            ProfileStatus::Active => "active",
            ProfileStatus::Suspended => "suspended",
            ProfileStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProfileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ProfileStatus::Pending),
            "active" => Ok(ProfileStatus::Active),
            "suspended" => Ok(ProfileStatus::Suspended),
            "rejected" => Ok(ProfileStatus::Rejected),
            _ => Err(format!("Unknown profile status: {}", s)),
        }
    }
}

/// A row of `user_roles`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoleAssignmentRow {
    pub user_id: String,
    pub role: String,
}

/// Grant of an administrative role to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleAssignment {
    pub user_id: String,
    pub role: Role,
}

impl RoleAssignmentRow {
    /// Parse the stored role, skipping values this build doesn't know
    pub fn into_assignment(self) -> Option<RoleAssignment> {
        let role = self.role.parse().ok()?;
        Some(RoleAssignment {
            user_id: self.user_id,
            role,
        })
    }
}
