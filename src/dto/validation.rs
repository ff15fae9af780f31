//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 32;

/// Trim a display name and check it holds 1 to [`MAX_DISPLAY_NAME_CHARS`] characters.
///
/// # Examples
///
/// ```ignore
/// normalize_display_name("  Ada ")     // Ok("Ada")
/// normalize_display_name("   ")        // Err - empty
/// ```
pub fn normalize_display_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    let count = trimmed.chars().count();
    if count == 0 {
        let mut err = ValidationError::new("display_name_empty");
        err.message = Some("Display name must not be empty".into());
        return Err(err);
    }
    if count > MAX_DISPLAY_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters (got {count})")
                .into(),
        );
        return Err(err);
    }
    Ok(trimmed.to_string())
}

/// `validator` adapter for [`normalize_display_name`].
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    normalize_display_name(name).map(|_| ())
}

/// Extract the single non-whitespace character a move inserts.
pub fn single_character(input: &str) -> Result<char, ValidationError> {
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(character), None) if !character.is_whitespace() => Ok(character),
        (Some(character), None) if character.is_whitespace() => {
            let mut err = ValidationError::new("character_whitespace");
            err.message = Some("Character must not be whitespace".into());
            Err(err)
        }
        _ => {
            let mut err = ValidationError::new("character_length");
            err.message = Some(
                format!(
                    "Exactly one character is required (got {})",
                    input.chars().count()
                )
                .into(),
            );
            Err(err)
        }
    }
}

/// `validator` adapter for [`single_character`].
pub fn validate_single_character(input: &str) -> Result<(), ValidationError> {
    single_character(input).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_are_trimmed() {
        assert_eq!(normalize_display_name("  Ada ").unwrap(), "Ada");
        assert_eq!(normalize_display_name("小明").unwrap(), "小明");
    }

    #[test]
    fn display_names_outside_bounds_are_rejected() {
        assert!(normalize_display_name("").is_err());
        assert!(normalize_display_name(" \t ").is_err());
        assert!(normalize_display_name(&"字".repeat(32)).is_ok());
        assert!(normalize_display_name(&"字".repeat(33)).is_err());
    }

    #[test]
    fn moves_carry_exactly_one_visible_character() {
        assert_eq!(single_character("好").unwrap(), '好');
        assert_eq!(single_character("a").unwrap(), 'a');
        assert!(single_character("").is_err()); // empty
        assert!(single_character("ab").is_err()); // two characters
        assert!(single_character(" ").is_err()); // whitespace
        assert!(single_character("\u{3000}").is_err()); // ideographic space
    }
}
