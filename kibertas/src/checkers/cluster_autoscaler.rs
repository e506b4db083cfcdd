//! Forces a scale out by asking for one more pod than there are matching nodes.
use super::DEPLOYMENT_WAIT_INTERVAL;
use crate::checker::run_context::RunContext;
use crate::checker::{CheckError, Checker};
use crate::config::{ConfigError, Env, RunSettings, WaitSettings};
#[cfg_attr(test, mockall_double::double)]
use crate::k8s::client::SyncK8sClient;
use crate::k8s::objects::nginx_deployment;
use crate::lifecycle::ResourceLifecycle;
use crate::lifecycle::resource::{Readiness, ResourceSpec};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodAffinityTerm, PodAntiAffinity,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::sync::Arc;

pub const NAME: &str = "cluster-autoscaler";
pub const NAMESPACE_PREFIX: &str = "cluster-autoscaler-test";

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAutoscalerSettings {
    pub resource_name: String,
    pub node_label_key: String,
    pub node_label_value: String,
    pub deployment_wait: WaitSettings,
}

impl ClusterAutoscalerSettings {
    pub fn from_env(env: &Env, run: &RunSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            resource_name: env.get_or("RESOURCE_NAME", "sample-for-scale"),
            node_label_key: env.get_or("NODE_LABEL_KEY", "eks.amazonaws.com/capacityType"),
            node_label_value: env.get_or("NODE_LABEL_VALUE", "SPOT"),
            deployment_wait: WaitSettings::new(DEPLOYMENT_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "DEPLOYMENT_WAIT_TIMEOUT")?,
        })
    }

    fn label_selector(&self) -> String {
        format!("{}={}", self.node_label_key, self.node_label_value)
    }
}

pub struct ClusterAutoscaler {
    settings: ClusterAutoscalerSettings,
    k8s_client: Arc<SyncK8sClient>,
    replicas: i32,
}

impl ClusterAutoscaler {
    pub fn new(settings: ClusterAutoscalerSettings, k8s_client: Arc<SyncK8sClient>) -> Self {
        Self {
            settings,
            k8s_client,
            replicas: 0,
        }
    }

    /// One pod per matching node at most, so the last replica needs a new node.
    fn deployment(&self) -> Deployment {
        let name = &self.settings.resource_name;
        let mut deployment = nginx_deployment(name, self.replicas, 80);
        let affinity = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: self.settings.node_label_key.clone(),
                            operator: "In".to_string(),
                            values: Some(vec![self.settings.node_label_value.clone()]),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            pod_anti_affinity: Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                    topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                    label_selector: Some(LabelSelector {
                        match_expressions: Some(vec![LabelSelectorRequirement {
                            key: "app".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec![name.clone()]),
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Some(pod_spec) = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
        {
            pod_spec.affinity = Some(affinity);
        }
        deployment
    }
}

impl Checker for ClusterAutoscaler {
    fn name(&self) -> &str {
        NAME
    }

    fn create_resources(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        let selector = self.settings.label_selector();
        let nodes = self
            .k8s_client
            .list_nodes(&selector)
            .map_err(|err| CheckError::k8s("Error List Nodes", err))?;
        ctx.notify(format!("Nodes(have label: {selector}): {}", nodes.len()));
        self.replicas = i32::try_from(nodes.len())
            .unwrap_or(i32::MAX)
            .saturating_add(1);

        lifecycle.create_namespace(ctx.cancellation())?;
        Ok(())
    }

    fn converge(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        ctx.notify(format!(
            "Create Deployment with desire replicas {}",
            self.replicas
        ));
        let spec = ResourceSpec::from_typed(&self.deployment())?.with_readiness(
            Readiness::DeploymentReady {
                wait: self.settings.deployment_wait,
            },
        );
        lifecycle.create(spec, ctx.cancellation())?;
        ctx.notify(format!("All {} Pods are ready", self.replicas));
        Ok(())
    }
}
