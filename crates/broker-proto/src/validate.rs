//! Field validation.
//!
//! Keys and caller identifiers sit in the middle of a line, so they must not
//! contain anything that splits fields. Values and tokens are the last field
//! and may contain spaces, but never a line terminator.

use crate::{
    KV_SEPARATOR, PAIR_SEPARATOR,
    errors::{CodecError, Result},
};

/// Validate a key for `GET`/`SET`.
///
/// Rejects empty keys, whitespace, control characters, and the LIST
/// separators (`=` and `,`).
pub fn validate_key(key: &str) -> Result<()> {
    validate_word("key", key)
}

/// Validate a caller identifier for `AUTH`.
///
/// Same rules as [`validate_key`].
pub fn validate_caller_id(caller_id: &str) -> Result<()> {
    validate_word("caller_id", caller_id)
}

/// Validate a value for `SET`.
///
/// Spaces are allowed. Line terminators, NUL, and the LIST pair separator are
/// not, and the value must be non-empty because an empty `GET` reply means
/// "not found".
pub fn validate_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CodecError::invalid("value", "must not be empty"));
    }

    if let Some(c) = value.chars().find(|&c| matches!(c, '\n' | '\r' | '\0')) {
        return Err(CodecError::invalid("value", format!("contains forbidden character {c:?}")));
    }

    if value.contains(PAIR_SEPARATOR) {
        return Err(CodecError::invalid(
            "value",
            format!("contains list separator {PAIR_SEPARATOR:?}"),
        ));
    }

    Ok(())
}

/// Validate an attestation token for `AUTH`.
pub fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(CodecError::invalid("token", "must not be empty"));
    }

    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CodecError::invalid("token", "contains whitespace or control characters"));
    }

    Ok(())
}

fn validate_word(field: &'static str, word: &str) -> Result<()> {
    if word.is_empty() {
        return Err(CodecError::invalid(field, "must not be empty"));
    }

    if let Some(c) = word
        .chars()
        .find(|&c| c.is_whitespace() || c.is_control() || c == KV_SEPARATOR || c == PAIR_SEPARATOR)
    {
        return Err(CodecError::invalid(field, format!("contains forbidden character {c:?}")));
    }

    Ok(())
}
