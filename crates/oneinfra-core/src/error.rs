// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for oneinfra model and PKI operations
#[derive(Error, Debug, Diagnostic)]
pub enum OneinfraError {
    /// A certificate authority referenced by the cluster has not been created yet
    #[error("Certificate authority '{authority}' is not initialized")]
    #[diagnostic(
        code(oneinfra::core::ca_not_initialized),
        help("Initialize the cluster certificate authorities before reconciling its components")
    )]
    CertificateAuthorityNotInitialized {
        #[allow(unused)]
        authority: String,
    },

    /// Certificate generation, signing or parsing failed
    #[error("Certificate error: {message}")]
    #[diagnostic(
        code(oneinfra::core::certificate_error),
        help("Check that the certificate authority PEM material is valid")
    )]
    CertificateError {
        #[allow(unused)]
        message: String,
    },

    /// No image bundle is known for the requested Kubernetes version
    #[error("Unknown Kubernetes version: {version}")]
    #[diagnostic(
        code(oneinfra::core::unknown_kubernetes_version),
        help("Run `oneinfra versions` to list the supported Kubernetes versions")
    )]
    UnknownKubernetesVersion {
        #[allow(unused)]
        version: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(oneinfra::core::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(oneinfra::core::serialization_error),
        help("Ensure the document is valid YAML and matches the expected schema")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(oneinfra::core::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, OneinfraError>;

impl OneinfraError {
    pub fn ca_not_initialized(authority: impl Into<String>) -> Self {
        Self::CertificateAuthorityNotInitialized {
            authority: authority.into(),
        }
    }

    pub fn certificate_error(message: impl Into<String>) -> Self {
        Self::CertificateError {
            message: message.into(),
        }
    }

    pub fn unknown_kubernetes_version(version: impl Into<String>) -> Self {
        Self::UnknownKubernetesVersion {
            version: version.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl From<rcgen::Error> for OneinfraError {
    fn from(e: rcgen::Error) -> Self {
        Self::certificate_error(e.to_string())
    }
}
