//! Allow-list validation for free-text fields.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::VaultError;

/// Letters, digits, spaces and underscores, with at least one letter or digit.
pub const ALLOWED_TEXT_PATTERN: &str = r"^[A-Za-z0-9 _]*[A-Za-z0-9][A-Za-z0-9 _]*$";

fn allowed_text() -> Result<&'static Regex, VaultError> {
    static PATTERN: OnceLock<Result<Regex, regex_lite::Error>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(ALLOWED_TEXT_PATTERN)).as_ref().map_err(|err| {
        VaultError::InvalidInput {
            field: "pattern".to_string(),
            reason: format!("allow-list pattern failed to compile: {err}"),
        }
    })
}

/// Validate `text` as an anonymous input field.
///
/// # Errors
/// Returns [`VaultError::InvalidInput`] when the text is outside the allow-list.
pub fn validate(text: &str) -> Result<&str, VaultError> {
    validate_field("input", text)
}

/// Validate `text` for the named field, returning it unchanged on success.
///
/// # Errors
/// Returns [`VaultError::InvalidInput`] naming `field` when the text contains a
/// character outside `[A-Za-z0-9 _]` or has no letter or digit at all.
pub fn validate_field<'a>(field: &str, text: &'a str) -> Result<&'a str, VaultError> {
    if allowed_text()?.is_match(text) {
        return Ok(text);
    }

    let reason = match text.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == ' ' || *c == '_'))
    {
        Some(c) => format!("character {c:?} is not allowed; use letters, digits, spaces, underscores"),
        None => "must contain at least one letter or digit".to_string(),
    };
    tracing::debug!(field, %reason, "rejected input");
    Err(VaultError::InvalidInput { field: field.to_string(), reason })
}
