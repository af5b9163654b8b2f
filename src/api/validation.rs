//! Input validation for API requests.
//!
//! Each validator returns `Err(message)` with the text shown to the caller.
//! To report several fields at once, feed the results into
//! `ValidationErrorBuilder::check` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::Role;

/// Minimum password length accepted for any account
pub const MIN_PASSWORD_LENGTH: usize = 8;

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_FULL_NAME_LENGTH: usize = 120;

lazy_static! {
    /// Pragmatic email check: local part, `@`, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    ).unwrap();
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(format!(
            "Email is too long (max {} characters)",
            MAX_EMAIL_LENGTH
        ));
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }

    Ok(())
}

pub fn validate_full_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Full name is required".to_string());
    }

    if name.chars().count() > MAX_FULL_NAME_LENGTH {
        return Err(format!(
            "Full name is too long (max {} characters)",
            MAX_FULL_NAME_LENGTH
        ));
    }

    Ok(())
}

/// Target account ids are only checked for presence; an unknown id is
/// reported by the identity provider.
pub fn validate_user_id(user_id: &str) -> Result<(), String> {
    if user_id.trim().is_empty() {
        return Err("user_id is required".to_string());
    }
    Ok(())
}

/// Roles an administrator may be provisioned with
pub fn validate_admin_role(role: &str) -> Result<Role, String> {
    match role.parse::<Role>() {
        Ok(role) if role.is_admin_tier() => Ok(role),
        _ => Err(format!(
            "Invalid role. Must be one of: {}",
            Role::ADMIN_TIER.map(|r| r.as_str()).join(", ")
        )),
    }
}
