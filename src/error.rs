use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CkanError {
    #[error("CKAN {action} failed: {message}")]
    CatalogRequest { action: String, message: String },

    #[error("no related dataset for resource: {resource}")]
    NoRelatedDataset { resource: String },

    #[error("expected JSON in response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid datapackage descriptor: {0}")]
    Descriptor(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read parameters file at {0}")]
    ParametersRead(PathBuf),

    #[error("failed to parse JSON parameters: {0}")]
    ParametersParse(String),
}

impl CkanError {
    pub fn catalog(action: &str, message: impl Into<String>) -> Self {
        CkanError::CatalogRequest {
            action: action.to_string(),
            message: message.into(),
        }
    }

    /// Failures that may be captured in the publication log instead of
    /// aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CkanError::CatalogRequest { .. } | CkanError::NoRelatedDataset { .. }
        )
    }
}
