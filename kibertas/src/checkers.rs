//! The add-on checks the binary can run.
pub mod cert_manager;
pub mod cluster_autoscaler;
pub mod datadog_agent;
pub mod fluent;
pub mod ingress;

use std::time::Duration;

/// Readiness cadence of the workloads created by the checks.
pub(crate) const DEPLOYMENT_WAIT_INTERVAL: Duration = Duration::from_secs(5);
