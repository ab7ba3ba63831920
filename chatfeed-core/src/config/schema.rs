//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use crate::reducer::{DEFAULT_ERROR_TEMPLATE, ERROR_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema version understood by this crate
pub const SUPPORTED_VERSION: &str = "0.1";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatFeedConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Where the collaborator sends requests (supports environment variable interpolation).
    ///
    /// This crate never opens connections. The value is validated at load
    /// time and passed through untouched for whoever owns the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Request defaults
    #[serde(default)]
    pub request: RequestConfig,

    /// User-visible message texts
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Update channel settings
    #[serde(default)]
    pub updates: UpdatesConfig,
}

impl Default for ChatFeedConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION.to_string(),
            endpoint: None,
            request: RequestConfig::default(),
            messages: MessagesConfig::default(),
            updates: UpdatesConfig::default(),
        }
    }
}

/// Defaults applied to every outgoing request
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RequestConfig {
    /// Context fields sent with every request unless the request overrides them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_context: BTreeMap<String, Value>,
}

/// Texts shown to the user when an exchange fails
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MessagesConfig {
    /// Rendering of `error` events; `{error}` is replaced by the description
    #[serde(default = "default_error_template")]
    pub error_template: String,

    /// Description used when the transport fails without a structured error
    #[serde(default = "default_transport_error")]
    pub transport_error: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            error_template: default_error_template(),
            transport_error: default_transport_error(),
        }
    }
}

/// Settings for the broadcast channel carrying snapshots and session tokens
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatesConfig {
    /// Number of updates a slow subscriber may lag behind
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_error_template() -> String {
    DEFAULT_ERROR_TEMPLATE.to_string()
}

fn default_transport_error() -> String {
    "The connection to the chat service was interrupted.".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

impl ChatFeedConfig {
    /// Built-in validation of field values
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }
        if self.version != SUPPORTED_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SUPPORTED_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        if !self.messages.error_template.contains(ERROR_PLACEHOLDER) {
            return Err(ValidationError::invalid_format(
                "messages.error_template",
                format!("must contain the {} placeholder", ERROR_PLACEHOLDER),
            ));
        }

        if self.messages.transport_error.trim().is_empty() {
            return Err(ValidationError::required("messages.transport_error"));
        }

        if self.updates.channel_capacity == 0 {
            return Err(ValidationError::out_of_range(
                "updates.channel_capacity",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ChatFeedConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.messages.error_template, "Error: {error}");
        assert_eq!(config.updates.channel_capacity, 64);
    }

    #[test]
    fn test_template_without_placeholder_is_rejected() {
        let mut config = ChatFeedConfig::default();
        config.messages.error_template = "Something failed".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_path, "messages.error_template");
    }

    #[test]
    fn test_unsupported_version() {
        let config = ChatFeedConfig {
            version: "2.0".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::InvalidVersion { .. }));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut config = ChatFeedConfig::default();
        config.updates.channel_capacity = 0;
        assert!(config.validate().is_err());
    }
}
