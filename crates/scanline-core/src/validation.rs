//! # Validation Module
//!
//! Code normalization and length checks.
//!
//! Decoders return whatever text the symbol encodes: dashes, spaces, check
//! prefixes. Inventory labels are purely numeric, so everything that is not
//! an ASCII digit is stripped before the length is checked.
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use scanline_core::validation::{normalize_code, validate_code_length};
//!
//! let allowed: BTreeSet<usize> = [6, 9].into_iter().collect();
//! assert_eq!(normalize_code("12-34-56"), "123456");
//! assert!(validate_code_length("123456", &allowed).is_ok());
//! assert!(validate_code_length("123", &allowed).is_err());
//! ```

use std::collections::BTreeSet;

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Strips every character that is not an ASCII digit.
pub fn normalize_code(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Checks that a normalized code has one of the accepted lengths.
pub fn validate_code_length(code: &str, allowed: &BTreeSet<usize>) -> ValidationResult<()> {
    if code.is_empty() {
        return Err(ValidationError::Empty);
    }

    let length = code.len();
    if !allowed.contains(&length) {
        return Err(ValidationError::InvalidLength {
            code: code.to_string(),
            length,
            allowed: allowed.iter().copied().collect(),
        });
    }

    Ok(())
}

/// Normalizes and validates in one step, returning the clean code.
pub fn normalize_and_validate(raw: &str, allowed: &BTreeSet<usize>) -> ValidationResult<String> {
    let code = normalize_code(raw);
    validate_code_length(&code, allowed)?;
    Ok(code)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn default_lengths() -> BTreeSet<usize> {
        [6, 9].into_iter().collect()
    }

    #[test]
    fn test_normalize_strips_non_digits() {
        assert_eq!(normalize_code("12-34-56"), "123456");
        assert_eq!(normalize_code(" 123 456 789\n"), "123456789");
        assert_eq!(normalize_code("ABC123"), "123");
        assert_eq!(normalize_code("no digits"), "");
    }

    #[test]
    fn test_normalize_ignores_non_ascii_digits() {
        // Arabic-Indic digits are not label digits.
        assert_eq!(normalize_code("١٢٣456"), "456");
    }

    #[test]
    fn test_accepted_lengths() {
        let allowed = default_lengths();
        assert!(validate_code_length("123456", &allowed).is_ok());
        assert!(validate_code_length("123456789", &allowed).is_ok());
        assert!(validate_code_length("1234567", &allowed).is_err());
        assert!(validate_code_length("12345678", &allowed).is_err());
    }

    #[test]
    fn test_empty_code_rejected() {
        let allowed = default_lengths();
        assert_eq!(
            validate_code_length("", &allowed),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn test_normalize_and_validate() {
        let allowed = default_lengths();
        assert_eq!(
            normalize_and_validate("12-34-56", &allowed).unwrap(),
            "123456"
        );
        assert!(matches!(
            normalize_and_validate("ABC123", &allowed),
            Err(ValidationError::InvalidLength { length: 3, .. })
        ));
    }
}
