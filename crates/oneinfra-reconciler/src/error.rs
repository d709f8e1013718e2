// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Reconciliation error type
#[derive(Error, Debug, Diagnostic)]
pub enum ReconcileError {
    /// Component has not been placed on a hypervisor yet
    #[error("Component {component} has no hypervisor assigned")]
    #[diagnostic(
        code(oneinfra::reconciler::no_hypervisor),
        help("Wait for placement to assign a hypervisor; the component is retried on the next cycle")
    )]
    NoHypervisor {
        #[allow(unused)]
        component: String,
    },

    /// Siblings of a role are not placed or have not published their ports
    #[error("Component {component} is waiting for {role} siblings: {pending}")]
    #[diagnostic(
        code(oneinfra::reconciler::siblings_not_placed),
        help("Siblings must be assigned a hypervisor and have their host ports allocated first")
    )]
    SiblingsNotPlaced {
        #[allow(unused)]
        component: String,
        #[allow(unused)]
        role: String,
        #[allow(unused)]
        pending: String,
    },

    /// Observed control-plane replicas differ from the declared count
    #[error("Component {component} expects {expected} control-plane replicas, observed {observed}")]
    #[diagnostic(
        code(oneinfra::reconciler::replica_count_mismatch),
        help("The ingress is reconciled once every declared control-plane replica exists")
    )]
    ReplicaCountMismatch {
        #[allow(unused)]
        component: String,
        #[allow(unused)]
        expected: u32,
        #[allow(unused)]
        observed: usize,
    },

    /// The member list cannot be read, but siblings already run etcd
    #[error("Component {component} cannot read the etcd member list while {running} already run etcd")]
    #[diagnostic(
        code(oneinfra::reconciler::membership_unknown),
        help("The member joins through a learner-add once the running members answer; it is retried on the next cycle")
    )]
    MembershipUnknown {
        #[allow(unused)]
        component: String,
        #[allow(unused)]
        running: String,
    },

    /// A bounded membership retry loop ran out of attempts
    #[error("etcd {operation} for member {member} did not complete after {attempts} attempts")]
    #[diagnostic(
        code(oneinfra::reconciler::membership_exhausted),
        help("Check that the etcd members are reachable; the operation is retried on the next cycle")
    )]
    MembershipExhausted {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        member: String,
        #[allow(unused)]
        attempts: u32,
    },

    /// A membership call hit its deadline
    #[error("etcd {operation} for member {member} exceeded its deadline")]
    #[diagnostic(
        code(oneinfra::reconciler::deadline_exceeded),
        help("The etcd cluster may have lost quorum or be overloaded")
    )]
    DeadlineExceeded {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        member: String,
    },

    /// etcd client error outside a retry loop
    #[error("etcd error: {message}")]
    #[diagnostic(
        code(oneinfra::reconciler::etcd_error),
        help("Check connectivity to the etcd client endpoints")
    )]
    Etcd {
        #[allow(unused)]
        message: String,
    },

    /// Hypervisor gateway error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Hypervisor(#[from] oneinfra_hypervisor::HypervisorError),

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] oneinfra_core::OneinfraError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(oneinfra::reconciler::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for reconciliation
pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    pub fn no_hypervisor(component: impl ToString) -> Self {
        Self::NoHypervisor {
            component: component.to_string(),
        }
    }

    pub fn siblings_not_placed(
        component: impl ToString,
        role: impl ToString,
        pending: &[String],
    ) -> Self {
        Self::SiblingsNotPlaced {
            component: component.to_string(),
            role: role.to_string(),
            pending: pending.join(", "),
        }
    }

    pub fn replica_count_mismatch(component: impl ToString, expected: u32, observed: usize) -> Self {
        Self::ReplicaCountMismatch {
            component: component.to_string(),
            expected,
            observed,
        }
    }

    pub fn membership_unknown(component: impl ToString, running: &[&str]) -> Self {
        Self::MembershipUnknown {
            component: component.to_string(),
            running: running.join(", "),
        }
    }

    pub fn membership_exhausted(
        operation: impl Into<String>,
        member: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self::MembershipExhausted {
            operation: operation.into(),
            member: member.into(),
            attempts,
        }
    }

    pub fn deadline_exceeded(operation: impl Into<String>, member: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            member: member.into(),
        }
    }

    pub fn etcd(message: impl Into<String>) -> Self {
        Self::Etcd {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the error only means "not yet": the component should be
    /// retried on a later cycle
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoHypervisor { .. }
                | Self::SiblingsNotPlaced { .. }
                | Self::ReplicaCountMismatch { .. }
                | Self::MembershipUnknown { .. }
        )
    }

    /// Whether the error came from host-port bookkeeping
    pub fn is_port_error(&self) -> bool {
        matches!(
            self,
            Self::Hypervisor(
                oneinfra_hypervisor::HypervisorError::PortRangeExhausted { .. }
                    | oneinfra_hypervisor::HypervisorError::StorageError(_)
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(ReconcileError::no_hypervisor("ns/c1/cp-1").is_precondition());
        assert!(ReconcileError::replica_count_mismatch("ns/c1/ingress", 3, 2).is_precondition());
        assert!(ReconcileError::membership_unknown("ns/c1/cp-4", &["cp-1"]).is_precondition());
        assert!(!ReconcileError::membership_exhausted("promotion", "ns/c1/cp-1", 60).is_precondition());
        assert!(!ReconcileError::deadline_exceeded("removal", "ns/c1/cp-1").is_precondition());
    }

    #[test]
    fn test_messages_name_the_member() {
        let err = ReconcileError::membership_exhausted("learner-add", "ns/c1/cp-4", 10);
        assert_eq!(
            err.to_string(),
            "etcd learner-add for member ns/c1/cp-4 did not complete after 10 attempts"
        );

        let err = ReconcileError::siblings_not_placed(
            "ns/c1/cp-1",
            "control-plane-ingress",
            &["ingress".to_string()],
        );
        assert!(err.to_string().contains("ingress"));
    }
}
