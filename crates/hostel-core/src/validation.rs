//! Local input checks applied before credentials or sign-up details leave the
//! client. They mirror the rules the auth backend enforces so that obviously
//! bad input fails fast with a precise message.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{HostelError, Result};
use crate::models::UserRole;

const MIN_PASSWORD_LEN: usize = 8;
const FULL_NAME_LEN: std::ops::RangeInclusive<usize> = 2..=100;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
    })
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{10}$").expect("phone regex is valid"))
}

/// Details submitted to `/api/auth/signup`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

impl SignupRequest {
    /// A request with the default `warden` role and no optional fields.
    pub fn new(email: impl Into<String>, password: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            full_name: full_name.into(),
            role: UserRole::Warden,
            phone: None,
            organization: None,
            justification: None,
        }
    }

    /// Check every field, reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if let Err(e) = validate_email(&self.email) {
            problems.push(e);
        }
        if let Err(e) = validate_password(&self.password) {
            problems.push(e);
        }
        let name_len = self.full_name.trim().chars().count();
        if !FULL_NAME_LEN.contains(&name_len) {
            problems.push(format!(
                "full name must be {}-{} characters",
                FULL_NAME_LEN.start(),
                FULL_NAME_LEN.end()
            ));
        }
        if let Some(phone) = &self.phone {
            if !phone_regex().is_match(phone) {
                problems.push("phone must be exactly 10 digits".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HostelError::Validation(problems.join("; ")))
        }
    }
}

/// Validate email and password for a login attempt.
pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(HostelError::Validation(
            "Email and password are required".to_string(),
        ));
    }
    validate_email(email).map_err(HostelError::Validation)
}

fn validate_email(email: &str) -> std::result::Result<(), String> {
    if email_regex().is_match(email.trim()) {
        Ok(())
    } else {
        Err(format!("\"{email}\" is not a valid email address"))
    }
}

fn validate_password(password: &str) -> std::result::Result<(), String> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_require_both_fields() {
        let err = validate_credentials("", "secret").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: Email and password are required"
        );
        assert!(validate_credentials("warden@hostel.edu", "").is_err());
    }

    #[test]
    fn test_credentials_reject_malformed_email() {
        assert!(validate_credentials("not-an-email", "password1").is_err());
        assert!(validate_credentials("warden@hostel.edu", "x").is_ok());
    }

    #[test]
    fn test_signup_valid_request_passes() {
        let mut req = SignupRequest::new("warden@hostel.edu", "longenough", "Ravi Kumar");
        req.phone = Some("9876543210".to_string());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_signup_reports_every_problem() {
        let mut req = SignupRequest::new("bad", "short", "R");
        req.phone = Some("12-34".to_string());
        let msg = req.validate().unwrap_err().to_string();
        assert!(msg.contains("valid email"));
        assert!(msg.contains("at least 8"));
        assert!(msg.contains("full name"));
        assert!(msg.contains("10 digits"));
    }

    #[test]
    fn test_signup_serialises_camel_case() {
        let req = SignupRequest::new("a@b.co", "longenough", "Ravi Kumar");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["fullName"], "Ravi Kumar");
        assert_eq!(value["role"], "warden");
        assert!(value.get("phone").is_none());
    }
}
