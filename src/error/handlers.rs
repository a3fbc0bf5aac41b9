//! Standardized mapping from registry HTTP failures to verification errors

use crate::error::MigratorError;
use reqwest::StatusCode;
use std::time::Duration;

/// Standard error handler for HTTP responses from the target registry
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle token endpoint failures
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> MigratorError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Invalid credentials provided".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            _ => format!("Authentication failed (status {}): {}", status, error_text),
        };

        MigratorError::Verification(error_msg)
    }

    /// Handle manifest lookup failures
    pub fn handle_manifest_error(status: StatusCode, error_text: &str, image: &str) -> MigratorError {
        let error_msg = match status.as_u16() {
            401 => format!("Unauthorized to read manifest of {}: {}", image, error_text),
            403 => format!("Forbidden: cannot read manifest of {}: {}", image, error_text),
            404 => format!("Manifest not found for {}", image),
            429 => format!("Rate limited while reading manifest of {}", image),
            500 => format!("Registry server error for {}: {}", image, error_text),
            502 | 503 => format!("Registry unavailable for {}: {}", image, error_text),
            _ => format!("Manifest query for {} failed (status {}): {}", image, status, error_text),
        };

        MigratorError::Verification(error_msg)
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize a reqwest failure seen during verification
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> MigratorError {
        if error.is_timeout() {
            MigratorError::Verification(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            MigratorError::Verification(format!("Connection error during {}: {}", context, error))
        } else if error.is_decode() {
            MigratorError::Verification(format!("Malformed response during {}: {}", context, error))
        } else {
            MigratorError::Verification(format!("{} network error: {}", context, error))
        }
    }

    /// Deadline expiry for a whole verification call
    pub fn deadline_exceeded(context: &str, deadline: Duration) -> MigratorError {
        MigratorError::Verification(format!(
            "{} did not complete within {}s",
            context,
            deadline.as_secs_f64()
        ))
    }
}
