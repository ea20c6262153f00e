//! core::naming
//!
//! Volume group naming rules.
//!
//! # Rules
//!
//! - Between 1 and 127 characters
//! - Only `a-z`, `A-Z`, `0-9`, `.`, `_`, `+` and `-`
//! - Cannot start with `-`
//! - Cannot be `.` or `..`
//!
//! The `#` character is reserved for internal pseudo-groups and lock
//! resources, and is rejected here.

use super::types::MAX_VG_NAME_LEN;

/// Validate a volume group name, returning a description of the first
/// violated rule.
///
/// # Example
///
/// ```
/// use vgcache::core::naming::validate_vg_name;
///
/// assert!(validate_vg_name("vg0").is_ok());
/// assert!(validate_vg_name("-vg0").is_err());
/// ```
pub fn validate_vg_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".into());
    }

    if name.len() > MAX_VG_NAME_LEN {
        return Err(format!(
            "name cannot be longer than {} characters",
            MAX_VG_NAME_LEN
        ));
    }

    if name == "." || name == ".." {
        return Err(format!("'{}' is reserved", name));
    }

    if name.starts_with('-') {
        return Err("name cannot start with '-'".into());
    }

    if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(format!("name cannot contain '{}'", c));
    }

    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_characters() {
        assert!(validate_vg_name("Vg.0_+-").is_ok());
    }

    #[test]
    fn reports_first_bad_character() {
        let err = validate_vg_name("vg:0").unwrap_err();
        assert!(err.contains(':'));
    }

    #[test]
    fn rejects_reserved_dots() {
        assert!(validate_vg_name(".").is_err());
        assert!(validate_vg_name("..").is_err());
        assert!(validate_vg_name("...").is_ok());
    }
}
