//! Error types for the CSM Operator
//!
//! Provides structured error types for every stage of a reconcile pass:
//! prechecks, template rendering, manifest decoding, object apply/delete
//! and status aggregation.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("{driver} {version} not supported")]
    UnsupportedVersion { driver: String, version: String },

    #[error("{value} is an invalid value for {name}: {reason}")]
    InvalidEnvValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("failed to find secret {name}")]
    SecretNotFound { name: String },

    #[error("value for key \"{key}\" is empty")]
    EmptyImageValue { key: String },

    #[error("Version parse error: {0}")]
    VersionParse(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Forbidden: {kind}/{name}: {reason}")]
    Forbidden {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Invalid: {kind}/{name}: {reason}")]
    Invalid {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Finalizer error: {0}")]
    Finalizer(String),

    // =========================================================================
    // Manifest Errors
    // =========================================================================
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Status Errors
    // =========================================================================
    #[error("{0}")]
    Status(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Io(_) | Error::Status(_) => ErrorAction::RequeueWithBackoff,

            // Object removed between get and write
            Error::ResourceNotFound { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Configuration/validation errors - don't retry automatically
            e if e.is_invalid_config() => ErrorAction::NoRequeue,
            Error::Manifest(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error comes from the CR or the config tree rather than
    /// the API server. Only these mark a CR `InvalidConfig`.
    pub fn is_invalid_config(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::UnsupportedVersion { .. }
                | Error::InvalidEnvValue { .. }
                | Error::EmptyImageValue { .. }
                | Error::VersionParse(_)
                | Error::SecretNotFound { .. }
                | Error::YamlParse(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error means the object was created concurrently
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::ResourceExists { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Check if the API server refused the write as forbidden or invalid
    pub fn is_forbidden_or_invalid(&self) -> bool {
        match self {
            Error::Forbidden { .. } | Error::Invalid { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 403 || ae.code == 422,
            _ => false,
        }
    }

    /// Translate a raw API error into the typed variant for `kind/name`
    pub fn from_api(err: kube::Error, kind: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(ae) => match ae.code {
                404 => Error::ResourceNotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 if ae.reason == "AlreadyExists" => Error::ResourceExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                403 => Error::Forbidden {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    reason: ae.message.clone(),
                },
                422 => Error::Invalid {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    reason: ae.message.clone(),
                },
                _ => Error::Kube(err),
            },
            _ => Error::Kube(err),
        }
    }

    /// Short label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::UnsupportedVersion { .. }
            | Error::InvalidEnvValue { .. }
            | Error::EmptyImageValue { .. }
            | Error::VersionParse(_)
            | Error::Configuration(_) => "invalid_config",
            Error::SecretNotFound { .. } | Error::ResourceNotFound { .. } => "not_found",
            Error::Manifest(_) | Error::YamlParse(_) | Error::JsonParse(_) => "manifest",
            Error::Kube(_)
            | Error::ResourceExists { .. }
            | Error::Forbidden { .. }
            | Error::Invalid { .. } => "kube",
            Error::Status(_) => "status",
            _ => "internal",
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
