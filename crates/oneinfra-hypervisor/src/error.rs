// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by a hypervisor gateway
#[derive(Error, Debug, Diagnostic)]
pub enum HypervisorError {
    /// Creating, updating or deleting a pod failed
    #[error("Pod operation failed for '{pod}' on {hypervisor}: {message}")]
    #[diagnostic(
        code(oneinfra::hypervisor::pod_operation_failed),
        help("Check the container runtime on the hypervisor and the pod specification")
    )]
    PodOperationFailed {
        #[allow(unused)]
        hypervisor: String,
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        message: String,
    },

    /// A one-shot job pod terminated unsuccessfully
    #[error("Job pod '{pod}' exited with code {exit_code}")]
    #[diagnostic(
        code(oneinfra::hypervisor::job_failed),
        help("Inspect the job container logs on the hypervisor")
    )]
    JobFailed {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        exit_code: i32,
    },

    /// Image could not be made present on the hypervisor
    #[error("Failed to pull image '{image}': {message}")]
    #[diagnostic(
        code(oneinfra::hypervisor::image_pull_failed),
        help("Verify the image reference and that the hypervisor can reach the registry")
    )]
    ImagePullFailed {
        #[allow(unused)]
        image: String,
        #[allow(unused)]
        message: String,
    },

    /// Writing a file on the hypervisor failed
    #[error("Failed to upload '{path}': {message}")]
    #[diagnostic(
        code(oneinfra::hypervisor::file_upload_failed),
        help("Check disk space and permissions on the hypervisor")
    )]
    FileUploadFailed {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// No free host port left on a hypervisor
    #[error("No free host port on hypervisor {hypervisor} in range {range}")]
    #[diagnostic(
        code(oneinfra::hypervisor::port_range_exhausted),
        help("Widen the host port range or delete components placed on this hypervisor")
    )]
    PortRangeExhausted {
        #[allow(unused)]
        hypervisor: String,
        #[allow(unused)]
        range: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(oneinfra::hypervisor::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] oneinfra_core::OneinfraError),

    /// Storage error
    #[error(transparent)]
    #[diagnostic(transparent)]
    StorageError(#[from] oneinfra_storage::StorageError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(oneinfra::hypervisor::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, HypervisorError>;

impl HypervisorError {
    pub fn pod_operation_failed(
        hypervisor: impl Into<String>,
        pod: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PodOperationFailed {
            hypervisor: hypervisor.into(),
            pod: pod.into(),
            message: message.into(),
        }
    }

    pub fn job_failed(pod: impl Into<String>, exit_code: i32) -> Self {
        Self::JobFailed {
            pod: pod.into(),
            exit_code,
        }
    }

    pub fn image_pull_failed(image: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            message: message.into(),
        }
    }

    pub fn file_upload_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileUploadFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
