use super::error::K8sError;
use either::Either;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::discovery::Scope;
use kube::{
    Api, Client, Config,
    api::{DeleteParams, ListParams, PostParams},
    config::KubeConfigOptions,
    core::{DynamicObject, GroupVersion, TypeMeta},
};
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// An object with the same name was already there, it is kept as is.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Provides a _sync_ implementation of [AsyncK8sClient].
///
/// It offers a sync version of each async method implemented in the [AsyncK8sClient]. To do so,
/// it essentially calls to `runtime.block_on(self.async_client.future)` using the held runtime reference.
///
/// Checks are plain sequential code, so this keeps the runtime out of them while the actual
/// requests still go through [kube].
pub struct SyncK8sClient {
    async_client: AsyncK8sClient,
    runtime: Arc<Runtime>,
}

impl Debug for SyncK8sClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncK8sClient")
            .field("async_client", &"AsyncK8sClient implementation")
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
impl SyncK8sClient {
    pub fn try_new(runtime: Arc<Runtime>) -> Result<Self, K8sError> {
        Ok(Self {
            async_client: runtime.block_on(AsyncK8sClient::try_new())?,
            runtime,
        })
    }

    pub fn create_dynamic_object(&self, obj: &DynamicObject) -> Result<CreateOutcome, K8sError> {
        self.runtime
            .block_on(self.async_client.create_dynamic_object(obj))
    }

    pub fn delete_dynamic_object(
        &self,
        tm: &TypeMeta,
        name: &str,
        namespace: &str,
    ) -> Result<DeleteOutcome, K8sError> {
        self.runtime
            .block_on(self.async_client.delete_dynamic_object(tm, name, namespace))
    }

    pub fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, K8sError> {
        self.runtime
            .block_on(self.async_client.get_namespaced::<Deployment>(name, namespace))
    }

    pub fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, K8sError> {
        self.runtime
            .block_on(self.async_client.get_namespaced::<Secret>(name, namespace))
    }

    pub fn get_ingress(&self, name: &str, namespace: &str) -> Result<Option<Ingress>, K8sError> {
        self.runtime
            .block_on(self.async_client.get_namespaced::<Ingress>(name, namespace))
    }

    /// Lists the nodes matching the `label_selector`, all of them if it is empty.
    pub fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, K8sError> {
        self.runtime
            .block_on(self.async_client.list_nodes(label_selector))
    }
}

pub struct AsyncK8sClient {
    client: Client,
}

impl AsyncK8sClient {
    /// Constructs a new Kubernetes client.
    ///
    /// If loading from the inCluster config fail we fall back to kube-config
    /// This will respect the `$KUBECONFIG` envvar, but otherwise default to `~/.kube/config`.
    /// Not leveraging infer() to check inClusterConfig first
    pub async fn try_new() -> Result<Self, K8sError> {
        debug!("trying inClusterConfig for k8s client");

        let config = match Config::incluster() {
            Ok(c) => c,
            Err(e) => {
                debug!("inClusterConfig {}, trying kubeconfig for k8s client", e);
                let c = KubeConfigOptions::default();
                Config::from_kubeconfig(&c).await?
            }
        };

        let client = Client::try_from(config)?;

        debug!("k8s client initialization succeeded");
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn create_dynamic_object(
        &self,
        obj: &DynamicObject,
    ) -> Result<CreateOutcome, K8sError> {
        let tm = obj.types.as_ref().ok_or(K8sError::MissingKind())?;
        let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();
        let api = self.dynamic_api(tm, namespace).await?;

        match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the object with foreground propagation, so dependants go away before the owner.
    pub async fn delete_dynamic_object(
        &self,
        tm: &TypeMeta,
        name: &str,
        namespace: &str,
    ) -> Result<DeleteOutcome, K8sError> {
        let api = self.dynamic_api(tm, namespace).await?;

        match api.delete(name, &DeleteParams::foreground()).await {
            // Object marked for deletion.
            Ok(Either::Left(obj)) => {
                debug!("Deleting object: {:?}", obj.metadata.name);
                Ok(DeleteOutcome::Deleted)
            }
            // Object already deleted.
            Ok(Either::Right(status)) => {
                debug!("Deleted object: status={:?}", status);
                Ok(DeleteOutcome::Deleted)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_namespaced<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, K8sError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    pub async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, K8sError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list_params = ListParams::default().labels(label_selector);
        Ok(api.list(&list_params).await?.items)
    }

    async fn dynamic_api(
        &self,
        tm: &TypeMeta,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, K8sError> {
        let gvk = GroupVersion::from_str(tm.api_version.as_str())?.with_kind(tm.kind.as_str());
        let (ar, caps) = kube::discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| {
                debug!("the gvk '{:?}' cannot be used: {}", gvk, e);
                K8sError::MissingAPIResource(tm.api_version.clone(), tm.kind.clone())
            })?;

        Ok(match caps.scope {
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &ar),
            Scope::Cluster => Api::all_with(self.client.clone(), &ar),
        })
    }
}
