use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout is reasonable
    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 86_400 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 86400"
            )));
        }
        Ok(())
    }

    /// Validate that a count is reasonable
    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 10000 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 10000"
            )));
        }
        Ok(())
    }

    /// Validate that a URL has a valid format
    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;

        if !url.contains("://") {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a valid URL with protocol"
            )));
        }

        Ok(())
    }

    /// Validate that a ratio lies in [0.0, 1.0)
    pub fn validate_ratio(value: f64, field_name: &str) -> ConfigResult<()> {
        if !(0.0..1.0).contains(&value) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be in [0.0, 1.0)"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("x", "f").is_ok());
        assert!(ValidationUtils::validate_not_empty("  ", "f").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(1, "f").is_ok());
        assert!(ValidationUtils::validate_count(0, "f").is_err());
        assert!(ValidationUtils::validate_count(10001, "f").is_err());
    }

    #[test]
    fn test_validate_ratio() {
        assert!(ValidationUtils::validate_ratio(0.0, "f").is_ok());
        assert!(ValidationUtils::validate_ratio(0.2, "f").is_ok());
        assert!(ValidationUtils::validate_ratio(1.0, "f").is_err());
        assert!(ValidationUtils::validate_ratio(-0.1, "f").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(ValidationUtils::validate_url("http://a", "f").is_ok());
        assert!(ValidationUtils::validate_url("a", "f").is_err());
    }
}
