//! Access decisions for protected pages.
//!
//! [`decide`] is a pure function of the caller's auth snapshot and the role a
//! page requires. It never touches a backend; [`resolve_snapshot`] is the one
//! place that turns a session token into a snapshot.

pub mod guard;

use serde::Serialize;

use crate::db::{effective_role, ProfileStatus, Role};
use crate::identity::{BackendError, IdentityProvider, ProfileStore};

/// The signed-in account, as seen by the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub email: Option<String>,
}

/// The reactive auth tuple the dashboard's guards consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSnapshot {
    pub session: Option<SessionInfo>,
    pub status: Option<ProfileStatus>,
    pub role: Option<Role>,
    pub is_loading: bool,
}

impl AuthSnapshot {
    pub fn anonymous() -> Self {
        Self {
            session: None,
            status: None,
            role: None,
            is_loading: false,
        }
    }

    /// A session whose account is banned
    pub fn banned() -> Self {
        Self {
            session: Some(SessionInfo {
                user_id: String::new(),
                email: None,
            }),
            status: Some(ProfileStatus::Suspended),
            ..Self::anonymous()
        }
    }

    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::anonymous()
        }
    }
}

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccessDecision {
    /// Auth state not known yet; render a loading indicator
    Loading,
    Allow,
    /// No session; `from` is where to return after sign-in
    Login { from: String },
    AwaitingApproval,
    Blocked { status: ProfileStatus },
    InsufficientRole { required: Role },
}

/// Where redirects land
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPaths {
    pub login: String,
    pub pending: String,
    pub dashboard: String,
}

impl Default for AccessPaths {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            pending: "/pending-approval".to_string(),
            dashboard: "/dashboard".to_string(),
        }
    }
}

/// A redirect target plus the state handed to the target page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redirect {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl Redirect {
    /// Render as a `Location` value, with the state as a query string
    pub fn location(&self) -> String {
        let Some(serde_json::Value::Object(state)) = &self.state else {
            return self.path.clone();
        };

        let query: Vec<String> = state
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(&value))
            })
            .collect();

        if query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, query.join("&"))
        }
    }
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    /// Where to send the caller, if anywhere
    pub fn redirect(&self, paths: &AccessPaths) -> Option<Redirect> {
        match self {
            AccessDecision::Loading | AccessDecision::Allow => None,
            AccessDecision::Login { from } => Some(Redirect {
                path: paths.login.clone(),
                state: Some(serde_json::json!({ "from": from })),
            }),
            AccessDecision::AwaitingApproval => Some(Redirect {
                path: paths.pending.clone(),
                state: None,
            }),
            AccessDecision::Blocked { status } => Some(Redirect {
                path: paths.login.clone(),
                state: Some(serde_json::json!({ "blocked": true, "status": status })),
            }),
            AccessDecision::InsufficientRole { .. } => Some(Redirect {
                path: paths.dashboard.clone(),
                state: None,
            }),
        }
    }
}

/// Decide whether a caller may see a page.
///
/// Checks run in a fixed order and the first match wins: loading, no
/// session, pending, suspended/rejected, then the required role. Status is
/// always checked before role, so a suspended super admin is blocked.
pub fn decide(snapshot: &AuthSnapshot, required: Option<Role>, from: &str) -> AccessDecision {
    if snapshot.is_loading {
        return AccessDecision::Loading;
    }

    if snapshot.session.is_none() {
        return AccessDecision::Login {
            from: from.to_string(),
        };
    }

    match snapshot.status {
        Some(ProfileStatus::Pending) => return AccessDecision::AwaitingApproval,
        Some(status) if status.is_blocked() => return AccessDecision::Blocked { status },
        _ => {}
    }

    if let Some(required) = required {
        let satisfied = snapshot
            .role
            .map(|role| role.satisfies(required))
            .unwrap_or(false);
        if !satisfied {
            return AccessDecision::InsufficientRole { required };
        }
    }

    AccessDecision::Allow
}

/// Build the auth snapshot for a session token.
///
/// A missing, invalid or expired credential yields the anonymous snapshot.
/// A banned account keeps its session and is reported as suspended unless
/// its profile already says it is blocked. Other backend failures propagate.
pub async fn resolve_snapshot(
    identity: &dyn IdentityProvider,
    store: &dyn ProfileStore,
    token: Option<&str>,
) -> Result<AuthSnapshot, BackendError> {
    let Some(token) = token else {
        return Ok(AuthSnapshot::anonymous());
    };

    let account = match identity.get_user(token).await {
        Ok(account) => account,
        // The provider refused the session outright, so the account id is unknown
        Err(BackendError::Banned) => return Ok(AuthSnapshot::banned()),
        Err(e) if e.is_auth_failure() => return Ok(AuthSnapshot::anonymous()),
        Err(e) => return Err(e),
    };

    let profile = store.get_profile(&account.id).await?;
    let roles = store.roles_for(&account.id).await?;

    let mut status = profile.map(|p| p.status);
    if account.is_banned_at(chrono::Utc::now()) && !status.is_some_and(|s| s.is_blocked()) {
        status = Some(ProfileStatus::Suspended);
    }

    Ok(AuthSnapshot {
        session: Some(SessionInfo {
            user_id: account.id,
            email: account.email,
        }),
        status,
        role: effective_role(&roles),
        is_loading: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in(status: Option<ProfileStatus>, role: Option<Role>) -> AuthSnapshot {
        AuthSnapshot {
            session: Some(SessionInfo {
                user_id: "u1".to_string(),
                email: Some("u1@example.com".to_string()),
            }),
            status,
            role,
            is_loading: false,
        }
    }

    const STATUSES: [ProfileStatus; 4] = [
        ProfileStatus::Pending,
        ProfileStatus::Active,
        ProfileStatus::Suspended,
        ProfileStatus::Rejected,
    ];

    fn roles() -> Vec<Option<Role>> {
        std::iter::once(None).chain(Role::ALL.into_iter().map(Some)).collect()
    }

    fn required_roles() -> Vec<Option<Role>> {
        roles()
    }

    #[test]
    fn test_loading_wins_over_everything() {
        let mut snapshot = signed_in(Some(ProfileStatus::Suspended), None);
        snapshot.is_loading = true;
        assert_eq!(
            decide(&snapshot, Some(Role::SuperAdmin), "/customers"),
            AccessDecision::Loading
        );
        assert_eq!(
            decide(&AuthSnapshot::loading(), None, "/"),
            AccessDecision::Loading
        );
    }

    #[test]
    fn test_no_session_redirects_to_login_with_origin() {
        let decision = decide(&AuthSnapshot::anonymous(), None, "/inventory/42");
        assert_eq!(
            decision,
            AccessDecision::Login {
                from: "/inventory/42".to_string()
            }
        );

        let redirect = decision.redirect(&AccessPaths::default()).unwrap();
        assert_eq!(redirect.path, "/login");
        assert_eq!(redirect.location(), "/login?from=%2Finventory%2F42");
    }

    #[test]
    fn test_pending_never_allowed() {
        for role in roles() {
            for required in required_roles() {
                let decision = decide(&signed_in(Some(ProfileStatus::Pending), role), required, "/x");
                assert_eq!(decision, AccessDecision::AwaitingApproval);
            }
        }
    }

    #[test]
    fn test_blocked_statuses_always_blocked() {
        for status in [ProfileStatus::Suspended, ProfileStatus::Rejected] {
            for role in roles() {
                for required in required_roles() {
                    let decision = decide(&signed_in(Some(status), role), required, "/x");
                    assert_eq!(decision, AccessDecision::Blocked { status });
                }
            }
        }
    }

    #[test]
    fn test_banned_snapshot_is_blocked() {
        assert_eq!(
            decide(&AuthSnapshot::banned(), None, "/dashboard"),
            AccessDecision::Blocked {
                status: ProfileStatus::Suspended
            }
        );
    }

    #[test]
    fn test_blocked_redirect_carries_status() {
        let decision = AccessDecision::Blocked {
            status: ProfileStatus::Suspended,
        };
        let redirect = decision.redirect(&AccessPaths::default()).unwrap();
        assert_eq!(redirect.path, "/login");
        assert_eq!(
            redirect.state,
            Some(serde_json::json!({"blocked": true, "status": "suspended"}))
        );
        assert_eq!(redirect.location(), "/login?blocked=true&status=suspended");
    }

    #[test]
    fn test_legacy_admin_denied_super_admin_route() {
        let decision = decide(
            &signed_in(Some(ProfileStatus::Active), Some(Role::Admin)),
            Some(Role::SuperAdmin),
            "/customers",
        );
        assert_eq!(
            decision,
            AccessDecision::InsufficientRole {
                required: Role::SuperAdmin
            }
        );

        let redirect = decision.redirect(&AccessPaths::default()).unwrap();
        assert_eq!(redirect.path, "/dashboard");
        assert_eq!(redirect.state, None);
        assert_eq!(redirect.location(), "/dashboard");
    }

    #[test]
    fn test_role_rank_satisfies_lower_requirements() {
        let active = |role| signed_in(Some(ProfileStatus::Active), Some(role));

        assert!(decide(&active(Role::SuperAdmin), Some(Role::Employee), "/").is_allowed());
        assert!(decide(&active(Role::AdminBranch), Some(Role::Employee), "/").is_allowed());
        assert!(decide(&active(Role::Employee), Some(Role::Employee), "/").is_allowed());
        assert!(!decide(&active(Role::Employee), Some(Role::AdminBranch), "/").is_allowed());
        assert!(!decide(&active(Role::AdminBranch), Some(Role::SuperAdmin), "/").is_allowed());
    }

    #[test]
    fn test_customer_never_satisfies_required_role() {
        for required in Role::ALL {
            let decision = decide(&signed_in(Some(ProfileStatus::Active), None), Some(required), "/");
            assert_eq!(decision, AccessDecision::InsufficientRole { required });
        }
        assert!(decide(&signed_in(Some(ProfileStatus::Active), None), None, "/").is_allowed());
    }

    #[test]
    fn test_only_active_or_missing_status_can_be_allowed() {
        for status in STATUSES {
            for role in roles() {
                let decision = decide(&signed_in(Some(status), role), None, "/");
                assert_eq!(decision.is_allowed(), status == ProfileStatus::Active);
            }
        }
        assert!(decide(&signed_in(None, Some(Role::Employee)), Some(Role::Employee), "/").is_allowed());
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_value(AccessDecision::InsufficientRole {
            required: Role::SuperAdmin,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"outcome": "insufficient_role", "required": "super_admin"})
        );
        assert_eq!(
            serde_json::to_value(AccessDecision::Allow).unwrap(),
            serde_json::json!({"outcome": "allow"})
        );
    }

    #[tokio::test]
    async fn test_resolve_snapshot_against_local_backend() {
        use crate::db::{NewAccount, NewProfile};
        use crate::identity::LocalBackend;

        let pool = crate::db::init_in_memory().await.unwrap();
        let backend = LocalBackend::new(pool, &crate::config::AuthConfig::default());

        let anonymous = resolve_snapshot(&backend, &backend, None).await.unwrap();
        assert_eq!(anonymous, AuthSnapshot::anonymous());
        let bogus = resolve_snapshot(&backend, &backend, Some("nope")).await.unwrap();
        assert_eq!(bogus, AuthSnapshot::anonymous());

        let account = backend
            .sign_up(NewAccount {
                email: "staff@example.com".to_string(),
                password: "password123".to_string(),
                phone: None,
                full_name: None,
                email_confirmed: true,
            })
            .await
            .unwrap();
        backend
            .upsert_profile(&NewProfile {
                id: account.id.clone(),
                status: ProfileStatus::Active,
                full_name: None,
                email: account.email.clone(),
            })
            .await
            .unwrap();
        backend.assign_role(&account.id, Role::Employee).await.unwrap();
        backend.assign_role(&account.id, Role::AdminBranch).await.unwrap();

        let grant = backend
            .sign_in("staff@example.com", "password123")
            .await
            .unwrap();
        let snapshot = resolve_snapshot(&backend, &backend, Some(&grant.access_token))
            .await
            .unwrap();

        assert_eq!(snapshot.session.unwrap().user_id, account.id);
        assert_eq!(snapshot.status, Some(ProfileStatus::Active));
        assert_eq!(snapshot.role, Some(Role::AdminBranch));
        assert!(!snapshot.is_loading);
    }
}
