//! Configuration validation utilities

use super::env::ENV_VAR_PATTERN;
use super::error::{ValidationError, ValidationErrorKind};
use super::schema::ChatFeedConfig;
use crate::conversation::RESERVED_REQUEST_KEYS;
use url::Url;

/// Configuration validator with additional validation rules
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Accept plain `http` endpoints
    allow_insecure: bool,
}

impl ConfigValidator {
    /// Create a new validator that only accepts `https` endpoints
    pub fn new() -> Self {
        Self::default()
    }

    /// Also accept `http` endpoints (local development)
    pub fn allow_insecure(mut self) -> Self {
        self.allow_insecure = true;
        self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &ChatFeedConfig) -> Result<(), ValidationError> {
        // First run the built-in validation
        config.validate()?;

        self.validate_endpoint(config)?;
        self.validate_default_context(config)?;

        Ok(())
    }

    /// The endpoint must be an absolute web URL with no unresolved placeholders
    fn validate_endpoint(&self, config: &ChatFeedConfig) -> Result<(), ValidationError> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(());
        };

        if ENV_VAR_PATTERN.is_match(endpoint) {
            return Err(ValidationError::invalid_format(
                "endpoint",
                "contains an unresolved environment variable",
            ));
        }

        let url = Url::parse(endpoint).map_err(|e| {
            ValidationError::new(
                "endpoint",
                ValidationErrorKind::InvalidUrl {
                    message: e.to_string(),
                },
            )
        })?;

        match url.scheme() {
            "https" => Ok(()),
            "http" if self.allow_insecure => Ok(()),
            scheme => Err(ValidationError::new(
                "endpoint",
                ValidationErrorKind::InvalidUrl {
                    message: format!("unsupported scheme '{}'", scheme),
                },
            )
            .with_context(endpoint.clone())),
        }
    }

    /// Default context may not shadow fields the request sets itself
    fn validate_default_context(&self, config: &ChatFeedConfig) -> Result<(), ValidationError> {
        for key in config.request.default_context.keys() {
            if RESERVED_REQUEST_KEYS.contains(&key.as_str()) {
                return Err(ValidationError::new(
                    format!("request.default_context.{}", key),
                    ValidationErrorKind::ReservedKey { key: key.clone() },
                ));
            }
        }
        Ok(())
    }
}
