//! Configuration validation for docchat services.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    AssemblerConfig, AuthConfig, Config, HistoryConfig, ObservabilityConfig, ServerConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.server.validate(),
            self.auth.validate(),
            self.history.validate(),
            self.assembler.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load (with environment overrides) and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        if self.host.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "server.host".into(),
                reason: format!("not an IP address: {}", self.host),
            });
        }
        Ok(())
    }
}

impl Validate for AuthConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "auth.client_id".into(),
            });
        }

        for (field, value) in [
            ("auth.tokeninfo_url", &self.tokeninfo_url),
            ("auth.jwks_url", &self.jwks_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: e.to_string(),
                });
            }
        }

        if self.issuers.is_empty() {
            return Err(ValidationError::MissingField {
                field: "auth.issuers".into(),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "auth.request_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for HistoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.flush_interval_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "history.flush_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_resident_sessions == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "history.max_resident_sessions".into(),
                reason: "must be greater than 0 when set".into(),
            });
        }

        Ok(())
    }
}

impl Validate for AssemblerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "assembler.model".into(),
            });
        }
        if self.max_context_tokens == 0 {
            return Err(ValidationError::InvalidValue {
                field: "assembler.max_context_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.client_id = "test-client.apps.googleusercontent.com".into();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_default_config_requires_client_id() {
        let result = Config::default().validate();
        match result {
            Err(ValidationError::MissingField { field }) => assert_eq!(field, "auth.client_id"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.observability.log_level = "invalid".into();
        let result = config.validate();
        assert!(result.is_err());
        if let Err(ValidationError::InvalidValue { field, .. }) = result {
            assert_eq!(field, "observability.log_level");
        }
    }

    #[test]
    fn test_zero_flush_interval() {
        let mut config = valid_config();
        config.history.flush_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_resident_cap() {
        let mut config = valid_config();
        config.history.max_resident_sessions = Some(0);
        assert!(config.validate().is_err());

        config.history.max_resident_sessions = Some(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_jwks_url() {
        let mut config = valid_config();
        config.auth.jwks_url = "not a url".into();
        match config.validate() {
            Err(ValidationError::InvalidValue { field, .. }) => assert_eq!(field, "auth.jwks_url"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = Config::default();
        config.server.port = 0;
        config.assembler.max_context_tokens = 0;
        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
