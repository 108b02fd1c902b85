//! Error taxonomy for the Anvil pipeline
//!
//! Every failure that crosses a stage boundary is a [`ClassifiedError`]:
//! a fixed [`ErrorKind`] with structured context, a stable machine code,
//! a retryability flag and (optionally) the originating cause.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const GENERATION_ERROR: &str = "GENERATION_ERROR";
pub const GENERATION_TIMEOUT: &str = "GENERATION_TIMEOUT";
pub const GENERATION_CANCELED: &str = "GENERATION_CANCELED";
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
pub const AUTH_ERROR: &str = "AUTH_ERROR";
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// The category of a failure, with the context relevant to that category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Network {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    Validation {
        #[serde(default)]
        field: Option<String>,
    },
    Generation {
        #[serde(default)]
        stage: Option<String>,
    },
    Storage {
        #[serde(default)]
        operation: Option<String>,
    },
    Auth,
    Unknown,
}

impl ErrorKind {
    /// Short lowercase label ("network", "validation", ...)
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network { .. } => "network",
            ErrorKind::Validation { .. } => "validation",
            ErrorKind::Generation { .. } => "generation",
            ErrorKind::Storage { .. } => "storage",
            ErrorKind::Auth => "auth",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Retryability when nothing more specific is known.
    ///
    /// Network errors retry without a status code, on 5xx, and on 429.
    pub fn default_retryable(&self) -> bool {
        match self {
            ErrorKind::Network { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            ErrorKind::Generation { .. } | ErrorKind::Storage { .. } => true,
            ErrorKind::Validation { .. } | ErrorKind::Auth | ErrorKind::Unknown => false,
        }
    }

    fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Network {
                status_code: Some(429),
                ..
            } => RATE_LIMITED,
            ErrorKind::Network { .. } => NETWORK_ERROR,
            ErrorKind::Validation { .. } => VALIDATION_ERROR,
            ErrorKind::Generation { .. } => GENERATION_ERROR,
            ErrorKind::Storage { .. } => STORAGE_ERROR,
            ErrorKind::Auth => AUTH_ERROR,
            ErrorKind::Unknown => UNKNOWN_ERROR,
        }
    }

    /// Fixed, category-keyed message for presentation layers
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network { .. } => {
                "Network error. Please check your internet connection and try again."
            }
            ErrorKind::Validation { .. } => "Invalid input. Please check your request and try again.",
            ErrorKind::Generation { .. } => {
                "Asset generation failed. Please try again or adjust your prompt."
            }
            ErrorKind::Storage { .. } => "Failed to save the asset. Please try again.",
            ErrorKind::Auth => "Authentication failed. Please check your API credentials.",
            ErrorKind::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The normalized error shape used across every component boundary
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    retryable: bool,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ClassifiedError {
    /// Build an error of the given kind with default code and retryability
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.default_code(),
            retryable: kind.default_retryable(),
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn network(
        message: impl Into<String>,
        status_code: Option<u16>,
        endpoint: Option<&str>,
    ) -> Self {
        Self::new(
            ErrorKind::Network {
                status_code,
                endpoint: endpoint.map(str::to_string),
            },
            message,
        )
    }

    pub fn validation(field: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Validation {
                field: field.map(str::to_string),
            },
            message,
        )
    }

    pub fn generation(stage: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Generation {
                stage: stage.map(str::to_string),
            },
            message,
        )
    }

    pub fn storage(operation: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Storage {
                operation: operation.map(str::to_string),
            },
            message,
        )
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attach the originating cause
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub(crate) fn with_shared_source(mut self, source: Arc<dyn StdError + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Fill in the stage of a generation error that does not name one yet
    pub fn in_stage(mut self, stage: &str) -> Self {
        if let ErrorKind::Generation { stage: slot @ None } = &mut self.kind {
            *slot = Some(stage.to_string());
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Stage name carried by a generation error
    pub fn stage(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Generation { stage } => stage.as_deref(),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    /// Process exit code for command-line surfaces
    pub fn exit_code(&self) -> u8 {
        match self.kind {
            ErrorKind::Validation { .. } => 2,
            ErrorKind::Auth => 3,
            ErrorKind::Network { .. } | ErrorKind::Generation { .. } | ErrorKind::Storage { .. } => 4,
            ErrorKind::Unknown => 1,
        }
    }
}

impl PartialEq for ClassifiedError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.code == other.code
            && self.message == other.message
            && self.retryable == other.retryable
    }
}

impl From<std::io::Error> for ClassifiedError {
    fn from(err: std::io::Error) -> Self {
        crate::classify::classify_owned(err)
    }
}

impl From<serde_json::Error> for ClassifiedError {
    fn from(err: serde_json::Error) -> Self {
        crate::classify::classify_owned(err)
    }
}

impl From<toml::de::Error> for ClassifiedError {
    fn from(err: toml::de::Error) -> Self {
        crate::classify::classify_owned(err)
    }
}

impl From<toml::ser::Error> for ClassifiedError {
    fn from(err: toml::ser::Error) -> Self {
        crate::classify::classify_owned(err)
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ClassifiedError>;
