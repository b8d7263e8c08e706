use crate::utils::error::{DeployError, Result};
use std::collections::HashSet;
use std::time::Duration;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DeployError::invalid_value(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(DeployError::invalid_value(
            field_name,
            value,
            format!("Value must be at least {}", min_value),
        ));
    }
    Ok(())
}

pub fn validate_non_zero_duration(field_name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(DeployError::invalid_value(
            field_name,
            format!("{:?}", value),
            "Duration must be greater than zero",
        ));
    }
    Ok(())
}

/// Rejects the first repeated name. Duplicates are never silently merged.
pub fn validate_unique_names<'a, I>(field_name: &str, names: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(DeployError::invalid_value(
                field_name,
                name,
                "Name is used more than once",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_non_empty_string() {
        assert!(validate_non_empty_string("group.name", "Foundation").is_ok());
        assert!(validate_non_empty_string("group.name", "   ").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("consecutive_successes", 2, 1).is_ok());
        assert!(validate_positive_number("consecutive_successes", 0, 1).is_err());
    }

    #[test]
    fn test_validate_unique_names() {
        assert!(validate_unique_names("services", ["a", "b", "c"]).is_ok());

        let err = validate_unique_names("services", ["a", "b", "a"]).unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }
}
