use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier regex"));

/// Policy command verbs accepted by `CREATE POLICY ... FOR <verb>`.
pub const POLICY_COMMANDS: [&str; 5] = ["ALL", "SELECT", "INSERT", "UPDATE", "DELETE"];

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn require_valid_id(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must be a valid ID")));
    }
    Ok(())
}

pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

/// Reject any identifier that is not made only of ASCII letters, digits and
/// underscores. Everything interpolated into generated SQL goes through here.
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), AppError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Invalid {kind} name {value:?}: only letters, digits and underscore are allowed"
        )))
    }
}

/// Normalize a policy command verb, failing on anything outside [`POLICY_COMMANDS`].
pub fn validate_policy_command(command: &str) -> Result<&'static str, AppError> {
    let upper = command.trim().to_ascii_uppercase();
    POLICY_COMMANDS
        .iter()
        .find(|c| **c == upper)
        .copied()
        .ok_or_else(|| AppError::Validation(format!("Invalid policy command {command:?}")))
}

/// Double-quote an identifier that has already passed [`validate_identifier`].
pub fn quote_ident(value: &str) -> String {
    format!("\"{value}\"")
}
