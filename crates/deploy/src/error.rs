//! Domain errors raised by the orchestrator.
//!
//! Functions in this crate return [`anyhow::Result`]. Failures that callers may want to
//! match on are raised as a [`DeployError`] and can be recovered with
//! `err.downcast_ref::<DeployError>()`. Errors coming from the stack, crypto and store
//! adapters are propagated unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Errors detected by the orchestrator itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// The environment specification is malformed or references unknown layers.
    #[error("Invalid environment specification {path:?}: {reason}")]
    ConfigFormat { path: PathBuf, reason: String },

    /// A secret operation was attempted on an environment without a vault layer.
    #[error("Environment '{environment}' has no vault layer; secrets are unavailable")]
    VaultRequired { environment: String },

    /// A layer does not expose an output the orchestrator needs.
    #[error("Layer '{layer}' has no output named '{key}'")]
    MissingOutput { layer: String, key: String },

    /// No secret is stored under the requested key.
    #[error("Secret '{key}' not found in table '{table}'")]
    SecretNotFound { table: String, key: String },

    /// The declared dependencies form a cycle.
    #[error("Circular dependency detected between layers: {layers:?}")]
    CircularDependency { layers: Vec<String> },

    /// A layer directory does not contain a stack template.
    #[error("No template found for layer '{layer}' in {dir:?}")]
    MissingTemplate { layer: String, dir: PathBuf },
}

impl DeployError {
    pub(crate) fn config_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
