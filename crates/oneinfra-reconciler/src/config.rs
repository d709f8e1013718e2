use crate::retry::RetryPolicy;
use std::time::Duration;

/// etcd client and membership loop settings
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    /// Timeout for establishing a client connection
    pub dial_timeout: Duration,
    /// Timeout applied by the client to each request
    pub request_timeout: Duration,
    pub learner_add: RetryPolicy,
    pub promotion: RetryPolicy,
    pub removal: RetryPolicy,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            learner_add: RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5)),
            promotion: RetryPolicy::new(60, Duration::from_secs(2), Duration::from_secs(5)),
            removal: RetryPolicy::new(20, Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

/// Configuration for the component reconcilers and the driver
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub etcd: EtcdConfig,
    /// How many times the driver runs PreReconcile when port allocation fails
    pub pre_reconcile_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            etcd: EtcdConfig::default(),
            pre_reconcile_attempts: 3,
        }
    }
}
