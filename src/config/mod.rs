use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::access::AccessPaths;
use crate::db::Role;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Built dashboard assets, served as the SPA fallback
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static/dist")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of sessions issued by the local backend
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Mark the session cookie `Secure` (enable behind HTTPS)
    #[serde(default)]
    pub secure_cookies: bool,
    /// Refuse local sign-in until the email has been confirmed
    #[serde(default)]
    pub require_email_confirmation: bool,
    /// Super admin ensured on startup
    pub bootstrap_email: Option<String>,
    pub bootstrap_password: Option<String>,
    #[serde(default = "default_bootstrap_name")]
    pub bootstrap_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            cookie_name: default_cookie_name(),
            secure_cookies: false,
            require_email_confirmation: false,
            bootstrap_email: None,
            bootstrap_password: None,
            bootstrap_name: default_bootstrap_name(),
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

fn default_cookie_name() -> String {
    "ivalora_session".to_string()
}

fn default_bootstrap_name() -> String {
    "Super Admin".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Hosted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,
    /// Base URL of the hosted project (e.g. https://xyz.example.co)
    pub url: Option<String>,
    /// Service-role key used for admin calls (or IVALORA_SERVICE_ROLE_KEY)
    pub service_role_key: Option<String>,
    /// Public key sent as `apikey` on user-scoped calls (or IVALORA_ANON_KEY)
    pub anon_key: Option<String>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            url: None,
            service_role_key: None,
            anon_key: None,
            timeout_seconds: default_backend_timeout(),
        }
    }
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Local
}

fn default_backend_timeout() -> u64 {
    15
}

/// A page prefix protected by the route guard
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectedRoute {
    pub prefix: String,
    /// Role required beyond an active session (none = any signed-in account)
    #[serde(default)]
    pub required_role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_pending_path")]
    pub pending_path: String,
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,
    #[serde(default = "default_protected_routes")]
    pub routes: Vec<ProtectedRoute>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            pending_path: default_pending_path(),
            dashboard_path: default_dashboard_path(),
            routes: default_protected_routes(),
        }
    }
}

impl AccessConfig {
    pub fn paths(&self) -> AccessPaths {
        AccessPaths {
            login: self.login_path.clone(),
            pending: self.pending_path.clone(),
            dashboard: self.dashboard_path.clone(),
        }
    }

    /// Find the most specific protected route covering a path
    pub fn route_for(&self, path: &str) -> Option<&ProtectedRoute> {
        self.routes
            .iter()
            .filter(|r| prefix_matches(&r.prefix, path))
            .max_by_key(|r| r.prefix.len())
    }
}

/// `/customers` covers `/customers` and `/customers/42` but not `/customersx`
fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_pending_path() -> String {
    "/pending-approval".to_string()
}

fn default_dashboard_path() -> String {
    "/dashboard".to_string()
}

fn default_protected_routes() -> Vec<ProtectedRoute> {
    vec![
        ProtectedRoute {
            prefix: "/dashboard".to_string(),
            required_role: Some(Role::Employee),
        },
        ProtectedRoute {
            prefix: "/inventory".to_string(),
            required_role: Some(Role::Employee),
        },
        ProtectedRoute {
            prefix: "/customers".to_string(),
            required_role: Some(Role::SuperAdmin),
        },
        ProtectedRoute {
            prefix: "/admin-management".to_string(),
            required_role: Some(Role::SuperAdmin),
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for the function endpoints
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests per window for login and sign-up
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_requests() -> u32 {
    120
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Fill secrets from the environment when the file leaves them out
    fn apply_env(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if self.backend.url.is_none() {
            self.backend.url = env("IVALORA_BACKEND_URL");
        }
        if self.backend.service_role_key.is_none() {
            self.backend.service_role_key = env("IVALORA_SERVICE_ROLE_KEY");
        }
        if self.backend.anon_key.is_none() {
            self.backend.anon_key = env("IVALORA_ANON_KEY");
        }
        if self.auth.bootstrap_password.is_none() {
            self.auth.bootstrap_password = env("IVALORA_BOOTSTRAP_PASSWORD");
        }
    }

    /// Check settings that serde defaults cannot catch
    pub fn validate(&self) -> Result<()> {
        if self.backend.kind == BackendKind::Hosted {
            if self.backend.url.is_none() {
                bail!("backend.url is required for the hosted backend");
            }
            if self.backend.service_role_key.is_none() {
                bail!("backend.service_role_key (or IVALORA_SERVICE_ROLE_KEY) is required for the hosted backend");
            }
        }
        if self.auth.session_ttl_hours <= 0 {
            bail!("auth.session_ttl_hours must be positive");
        }
        if self.auth.bootstrap_email.is_some() != self.auth.bootstrap_password.is_some() {
            bail!("auth.bootstrap_email and auth.bootstrap_password must be set together");
        }
        for route in &self.access.routes {
            if !route.prefix.starts_with('/') {
                bail!("access route prefix '{}' must start with '/'", route.prefix);
            }
            if prefix_matches(&route.prefix, &self.access.login_path)
                || prefix_matches(&route.prefix, &self.access.pending_path)
            {
                bail!(
                    "access route prefix '{}' would guard the login or pending page",
                    route.prefix
                );
            }
        }
        Ok(())
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            backend: BackendConfig::default(),
            access: AccessConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
