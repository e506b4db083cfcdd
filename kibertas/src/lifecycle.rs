//! Creation, readiness and teardown of the objects a check works with.
//!
//! Every object is registered before the create request is sent, so an interrupted check
//! still knows about everything it may have left behind in the cluster.
pub mod error;
pub mod resource;

use crate::event::cancellation::CancellationToken;
use crate::k8s::client::{CreateOutcome, DeleteOutcome};
#[cfg_attr(test, mockall_double::double)]
use crate::k8s::client::SyncK8sClient;
use crate::k8s::error::K8sError;
use crate::k8s::objects::{namespace, namespace_type_meta};
use crate::poller::{Probe, poll_until};
use error::{AggregatedError, DeleteError, LifecycleError};
use resource::{ManagedResource, Readiness, ResourceSpec};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Registry {
    workspace: Option<ManagedResource>,
    resources: Vec<ManagedResource>,
}

/// Owns the teardown of every object created in a check workspace.
///
/// It is shared between the check and the cancellation watcher, whichever tears down first
/// drains the registry so the other one finds nothing left to delete.
pub struct ResourceLifecycle {
    k8s_client: Arc<SyncK8sClient>,
    namespace: String,
    debug: bool,
    registry: Mutex<Registry>,
}

impl ResourceLifecycle {
    pub fn new(k8s_client: Arc<SyncK8sClient>, namespace: String, debug: bool) -> Self {
        Self {
            k8s_client,
            namespace,
            debug,
            registry: Mutex::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Creates the workspace namespace. It is deleted after every other resource.
    pub fn create_namespace(&self, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        let mut spec = ResourceSpec::from_typed(&namespace(&self.namespace))?;
        spec.object.metadata.namespace = None;
        let handle = ManagedResource {
            type_meta: namespace_type_meta(),
            name: self.namespace.clone(),
            namespace: String::new(),
        };
        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled(handle));
        }
        self.lock().workspace = Some(handle.clone());

        info!(namespace = %self.namespace, "Creating Namespace");
        self.send_create(&handle, &spec)
    }

    /// Creates the object and waits for its readiness condition.
    ///
    /// An object that already exists counts as created. Nothing is sent once `cancel` is
    /// triggered, the teardown may already be over.
    pub fn create(
        &self,
        mut spec: ResourceSpec,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let handle = spec.managed_resource(&self.namespace)?;
        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled(handle));
        }
        self.lock().resources.push(handle.clone());

        info!(resource = %handle, "Creating resource");
        self.send_create(&handle, &spec)?;
        self.await_readiness(&handle, &spec.readiness, cancel)
    }

    /// Creates all the objects in order, stopping at the first failure.
    pub fn create_all(
        &self,
        specs: Vec<ResourceSpec>,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        specs
            .into_iter()
            .try_for_each(|spec| self.create(spec, cancel))
    }

    /// Snapshot of the registered resources in creation order, the workspace namespace excluded.
    pub fn managed(&self) -> Vec<ManagedResource> {
        self.lock().resources.clone()
    }

    pub fn is_empty(&self) -> bool {
        let registry = self.lock();
        registry.workspace.is_none() && registry.resources.is_empty()
    }

    /// Deletes every registered resource in reverse creation order and the workspace last.
    ///
    /// Objects that are already gone count as deleted. The rest of the failures do not stop the
    /// teardown, they are collected in the order they happened. In debug mode nothing is deleted.
    pub fn delete_all(&self) -> Result<(), AggregatedError> {
        if self.debug {
            info!(namespace = %self.namespace, "Skip Delete Resources");
            return Ok(());
        }

        let pending = {
            let mut registry = self.lock();
            let mut pending: Vec<_> = registry.resources.drain(..).rev().collect();
            pending.extend(registry.workspace.take());
            pending
        };

        let mut errors = AggregatedError::default();
        for resource in pending {
            info!(%resource, "Deleting resource");
            match self.k8s_client.delete_dynamic_object(
                &resource.type_meta,
                &resource.name,
                &resource.namespace,
            ) {
                Ok(DeleteOutcome::Deleted) => info!(%resource, "Deleted resource"),
                Ok(DeleteOutcome::NotFound) => debug!(%resource, "Resource already deleted"),
                Err(err) => {
                    error!(%resource, "Error deleting resource: {err}");
                    errors.push(DeleteError { resource, err });
                }
            }
        }
        errors.into_result()
    }

    fn send_create(
        &self,
        handle: &ManagedResource,
        spec: &ResourceSpec,
    ) -> Result<(), LifecycleError> {
        match self.k8s_client.create_dynamic_object(&spec.object) {
            Ok(CreateOutcome::Created) => {
                info!(resource = %handle, "Created resource");
                Ok(())
            }
            Ok(CreateOutcome::AlreadyExists) => {
                warn!(resource = %handle, "Resource already exists, reusing it");
                Ok(())
            }
            Err(err) => Err(LifecycleError::Create {
                resource: handle.clone(),
                err,
            }),
        }
    }

    fn await_readiness(
        &self,
        handle: &ManagedResource,
        readiness: &Readiness,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let wait = match readiness {
            Readiness::Created => return Ok(()),
            Readiness::DeploymentReady { wait }
            | Readiness::LoadBalancerHostname { wait }
            | Readiness::Secret { wait, .. } => wait,
        };

        poll_until(wait, readiness.immediate(), cancel, || {
            self.probe(handle, readiness)
        })
        .map_err(|err| LifecycleError::NotReady {
            resource: handle.clone(),
            err,
        })
    }

    fn probe(&self, handle: &ManagedResource, readiness: &Readiness) -> Probe {
        match readiness {
            Readiness::Created => Probe::Converged,
            Readiness::DeploymentReady { .. } => {
                match self.k8s_client.get_deployment(&handle.name, &handle.namespace) {
                    Ok(Some(deployment)) => {
                        let desired = deployment
                            .spec
                            .and_then(|spec| spec.replicas)
                            .unwrap_or(1);
                        let ready = deployment
                            .status
                            .and_then(|status| status.ready_replicas)
                            .unwrap_or(0);
                        if ready == desired {
                            info!(resource = %handle, "All Pods are ready: {ready}/{desired}");
                            Probe::Converged
                        } else {
                            info!(resource = %handle, "Waiting for Pods to be ready: {ready}/{desired}");
                            Probe::Pending
                        }
                    }
                    Ok(None) => {
                        info!(resource = %handle, "Waiting for Deployment to be created");
                        Probe::Pending
                    }
                    Err(err) => probe_error(handle, err),
                }
            }
            Readiness::LoadBalancerHostname { .. } => {
                match self.k8s_client.get_ingress(&handle.name, &handle.namespace) {
                    Ok(ingress) => {
                        let hostname = ingress
                            .and_then(|ingress| ingress.status)
                            .and_then(|status| status.load_balancer)
                            .and_then(|lb| lb.ingress)
                            .and_then(|ingresses| {
                                ingresses
                                    .into_iter()
                                    .find_map(|ingress| ingress.hostname.filter(|h| !h.is_empty()))
                            });
                        match hostname {
                            Some(hostname) => {
                                info!(resource = %handle, "Ingress is now available at {hostname}");
                                Probe::Converged
                            }
                            None => {
                                info!(resource = %handle, "Waiting for Ingress to be ready");
                                Probe::Pending
                            }
                        }
                    }
                    Err(err) => probe_error(handle, err),
                }
            }
            Readiness::Secret { name, .. } => {
                match self.k8s_client.get_secret(name, &handle.namespace) {
                    Ok(Some(secret)) => {
                        info!(resource = %handle, secret = %name, created = ?secret.metadata.creation_timestamp, "Secret is created");
                        Probe::Converged
                    }
                    Ok(None) => {
                        info!(resource = %handle, "Waiting for secret {name} to be ready");
                        Probe::Pending
                    }
                    Err(err) => probe_error(handle, err),
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transient api errors keep the wait going, auth errors end it.
pub fn probe_error(handle: &ManagedResource, err: K8sError) -> Probe {
    if err.is_unauthorized() {
        return Probe::Fatal(err.to_string());
    }
    warn!(resource = %handle, "Error while waiting for resource: {err}");
    Probe::Pending
}

/// Fast waits for tests.
#[cfg(test)]
pub(crate) fn test_wait() -> crate::config::WaitSettings {
    crate::config::WaitSettings::new(
        std::time::Duration::from_millis(1),
        std::time::Duration::from_millis(200),
    )
}
