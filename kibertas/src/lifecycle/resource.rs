use super::error::LifecycleError;
use crate::config::WaitSettings;
use crate::k8s::error::K8sError;
use crate::k8s::objects::to_dynamic_object;
use kube::core::{DynamicObject, TypeMeta};
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Handle to an object created during a check, everything needed to delete it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResource {
    pub type_meta: TypeMeta,
    pub name: String,
    pub namespace: String,
}

impl Display for ManagedResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.type_meta.kind, self.namespace, self.name)
    }
}

/// Condition an object must reach before its creation is considered done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Accepted by the api-server.
    Created,
    /// Ready replicas match the desired ones.
    DeploymentReady { wait: WaitSettings },
    /// The ingress status reports a load balancer hostname.
    LoadBalancerHostname { wait: WaitSettings },
    /// The named secret exists in the object namespace.
    Secret { name: String, wait: WaitSettings },
}

impl Readiness {
    /// Whether the first evaluation happens right away or after one interval.
    pub fn immediate(&self) -> bool {
        matches!(self, Readiness::Secret { .. })
    }
}

/// Object to create plus the condition to wait for.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub object: DynamicObject,
    pub readiness: Readiness,
}

impl ResourceSpec {
    pub fn new(object: DynamicObject) -> Self {
        Self {
            object,
            readiness: Readiness::Created,
        }
    }

    pub fn from_typed<K: Serialize>(obj: &K) -> Result<Self, LifecycleError> {
        Ok(Self::new(
            to_dynamic_object(obj).map_err(LifecycleError::InvalidObject)?,
        ))
    }

    pub fn with_readiness(self, readiness: Readiness) -> Self {
        Self { readiness, ..self }
    }

    /// Handle for the object, placing it in `default_namespace` when it has none.
    pub(super) fn managed_resource(
        &mut self,
        default_namespace: &str,
    ) -> Result<ManagedResource, LifecycleError> {
        let type_meta = self
            .object
            .types
            .clone()
            .ok_or(LifecycleError::InvalidObject(K8sError::MissingKind()))?;
        let name = self
            .object
            .metadata
            .name
            .clone()
            .ok_or(LifecycleError::InvalidObject(K8sError::MissingName()))?;
        let namespace = self
            .object
            .metadata
            .namespace
            .get_or_insert_with(|| default_namespace.to_string())
            .clone();

        Ok(ManagedResource {
            type_meta,
            name,
            namespace,
        })
    }
}
