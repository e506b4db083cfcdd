//! Generates container logs and waits for the log shipper to deliver them to the bucket.
use super::DEPLOYMENT_WAIT_INTERVAL;
use crate::aws::s3::ObjectStore;
use crate::checker::run_context::RunContext;
use crate::checker::{CheckError, Checker};
use crate::config::{ConfigError, Env, RunSettings, WaitSettings};
#[cfg_attr(test, mockall_double::double)]
use crate::k8s::client::SyncK8sClient;
use crate::k8s::objects::log_generator_deployment;
use crate::lifecycle::ResourceLifecycle;
use crate::lifecycle::resource::{Readiness, ResourceSpec};
use crate::poller::{Probe, poll_until};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const NAME: &str = "fluent";
pub const NAMESPACE_PREFIX: &str = "fluent-test";

const LOG_WAIT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FluentSettings {
    pub resource_name: String,
    pub log_bucket_name: String,
    pub env: String,
    pub log_path: String,
    pub deployment_wait: WaitSettings,
    pub log_wait: WaitSettings,
}

impl FluentSettings {
    pub fn from_env(env: &Env, run: &RunSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            resource_name: env.get_or("RESOURCE_NAME", "burst-log-generator"),
            log_bucket_name: env.get_or("LOG_BUCKET_NAME", "cwtest-kubernetes-logs"),
            env: env.get_or("ENV", "cwtest"),
            log_path: env.get_or("LOG_PATH", "fluentd"),
            deployment_wait: WaitSettings::new(DEPLOYMENT_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "DEPLOYMENT_WAIT_TIMEOUT")?,
            log_wait: WaitSettings::new(LOG_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "LOG_WAIT_TIMEOUT")?,
        })
    }

    /// Key prefix the shipper writes the workspace logs of `day` under.
    pub fn log_prefix(&self, namespace: &str, day: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{namespace}/dt={}",
            self.log_path,
            self.env,
            day.format("%Y%m%d")
        )
    }
}

/// Half of the nodes rounded up, never less than one.
pub fn generator_replicas(nodes: usize) -> i32 {
    i32::try_from(nodes.div_ceil(2)).unwrap_or(i32::MAX).max(1)
}

pub struct Fluent {
    settings: FluentSettings,
    k8s_client: Arc<SyncK8sClient>,
    object_store: Box<dyn ObjectStore>,
}

impl Fluent {
    pub fn new(
        settings: FluentSettings,
        k8s_client: Arc<SyncK8sClient>,
        object_store: Box<dyn ObjectStore>,
    ) -> Self {
        Self {
            settings,
            k8s_client,
            object_store,
        }
    }
}

impl Checker for Fluent {
    fn name(&self) -> &str {
        NAME
    }

    fn create_resources(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        let nodes = self
            .k8s_client
            .list_nodes("")
            .map_err(|err| CheckError::k8s("Error List Nodes", err))?;
        let replicas = generator_replicas(nodes.len());
        ctx.notify(format!("Nodes: {}", nodes.len()));

        lifecycle.create_namespace(ctx.cancellation())?;

        ctx.notify(format!(
            "Create Deployment {} with desire replicas {replicas}",
            self.settings.resource_name
        ));
        let spec = ResourceSpec::from_typed(&log_generator_deployment(
            &self.settings.resource_name,
            replicas,
        ))?
        .with_readiness(Readiness::DeploymentReady {
            wait: self.settings.deployment_wait,
        });
        lifecycle.create(spec, ctx.cancellation())?;
        Ok(())
    }

    /// Waits for an object written after the run started, older ones come from other runs.
    fn converge(
        &mut self,
        ctx: &RunContext,
        _lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        let bucket = &self.settings.log_bucket_name;
        let prefix = self.settings.log_prefix(ctx.workspace(), Utc::now());
        let started_at = ctx.started_at();
        ctx.notify(format!("Wait for logs in s3://{bucket}/{prefix}"));

        poll_until(&self.settings.log_wait, true, ctx.cancellation(), || {
            info!("Wait fluentd output to s3://{bucket}/{prefix} ...");
            match self.object_store.list_objects(bucket, &prefix) {
                Ok(objects) => match objects
                    .iter()
                    .find(|obj| obj.last_modified.is_some_and(|t| t > started_at))
                {
                    Some(obj) => {
                        info!(key = %obj.key, last_modified = ?obj.last_modified, size = obj.size, "Found log object");
                        Probe::Converged
                    }
                    None => Probe::Pending,
                },
                Err(err) if err.is_unauthorized() => Probe::Fatal(err.to_string()),
                Err(err) => {
                    warn!("{err}");
                    Probe::Pending
                }
            }
        })
        .map_err(|err| CheckError::wait("error waiting for log objects", err))?;

        ctx.notify(format!("Logs are available in s3://{bucket}/{prefix}"));
        Ok(())
    }
}
