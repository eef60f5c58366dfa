//! Typed access to the objects a PravegaCluster owns
//!
//! The reconciler never talks to `kube::Api` directly. Everything goes
//! through [`ClusterClient`] so the control loop can be driven against a mock
//! or an in-memory cluster in tests.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use pravega_common::crd::{PravegaCluster, PravegaClusterStatus};
use pravega_common::{Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes operations for a PravegaCluster and its children
///
/// Reads return `Ok(None)` for objects that do not exist. Deletes of objects
/// that are already gone succeed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get a ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Create a ConfigMap
    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<(), Error>;

    /// Replace a ConfigMap; `cm` must carry the live resourceVersion
    async fn replace_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<(), Error>;

    /// Get a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// List Services matching a label selector
    async fn list_services(&self, namespace: &str, selector: &str)
        -> Result<Vec<Service>, Error>;

    /// Create a Service
    async fn create_service(&self, namespace: &str, svc: &Service) -> Result<(), Error>;

    /// Delete a Service
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a PodDisruptionBudget
    async fn get_pdb(&self, namespace: &str, name: &str)
        -> Result<Option<PodDisruptionBudget>, Error>;

    /// Create a PodDisruptionBudget
    async fn create_pdb(&self, namespace: &str, pdb: &PodDisruptionBudget) -> Result<(), Error>;

    /// Get a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(&self, namespace: &str, deploy: &Deployment) -> Result<(), Error>;

    /// Replace a Deployment; `deploy` must carry the live resourceVersion
    async fn replace_deployment(&self, namespace: &str, deploy: &Deployment)
        -> Result<(), Error>;

    /// Get a StatefulSet
    async fn get_stateful_set(&self, namespace: &str, name: &str)
        -> Result<Option<StatefulSet>, Error>;

    /// Create a StatefulSet
    async fn create_stateful_set(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error>;

    /// Replace a StatefulSet; `sts` must carry the live resourceVersion
    async fn replace_stateful_set(&self, namespace: &str, sts: &StatefulSet)
        -> Result<(), Error>;

    /// Delete a StatefulSet
    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List PersistentVolumeClaims matching a label selector
    async fn list_pvcs(&self, namespace: &str, selector: &str)
        -> Result<Vec<PersistentVolumeClaim>, Error>;

    /// Delete a PersistentVolumeClaim
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a Pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// List Pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Delete a Pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Replace the cluster object (spec and metadata)
    ///
    /// # Returns
    ///
    /// The object as stored, carrying its new resourceVersion
    async fn replace_cluster(&self, cluster: &PravegaCluster) -> Result<PravegaCluster, Error>;

    /// Write the status subresource
    ///
    /// # Arguments
    ///
    /// * `namespace` - Namespace of the cluster
    /// * `name` - Name of the cluster
    /// * `resource_version` - Version the status was computed from; a stale
    ///   value is rejected with 409 Conflict
    /// * `status` - Status to write
    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &PravegaClusterStatus,
    ) -> Result<(), Error>;
}

/// [`ClusterClient`] over the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K>(&self, namespace: &str, selector: &str) -> Result<Vec<K>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let params = ListParams::default().labels(selector);
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K>(&self, namespace: &str, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .create(&post_params(), obj)
            .await?;
        Ok(())
    }

    async fn replace<K>(&self, namespace: &str, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = obj
            .meta()
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("client", "object has no name"))?;
        self.api::<K>(namespace)
            .replace(name, &post_params(), obj)
            .await?;
        Ok(())
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// JSON merge patch body of a status write
///
/// The resourceVersion turns the merge patch into a compare-and-swap. Fields
/// left out of the serialized status keep their stored value.
pub(crate) fn status_patch(
    resource_version: Option<String>,
    status: &PravegaClusterStatus,
) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status
    })
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        self.get(namespace, name).await
    }

    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<(), Error> {
        self.create(namespace, cm).await
    }

    async fn replace_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<(), Error> {
        self.replace(namespace, cm).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        self.get(namespace, name).await
    }

    async fn list_services(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Service>, Error> {
        self.list(namespace, selector).await
    }

    async fn create_service(&self, namespace: &str, svc: &Service) -> Result<(), Error> {
        self.create(namespace, svc).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Service>(namespace, name).await
    }

    async fn get_pdb(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, Error> {
        self.get(namespace, name).await
    }

    async fn create_pdb(&self, namespace: &str, pdb: &PodDisruptionBudget) -> Result<(), Error> {
        self.create(namespace, pdb).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get(namespace, name).await
    }

    async fn create_deployment(&self, namespace: &str, deploy: &Deployment) -> Result<(), Error> {
        self.create(namespace, deploy).await
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<(), Error> {
        self.replace(namespace, deploy).await
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        self.get(namespace, name).await
    }

    async fn create_stateful_set(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error> {
        self.create(namespace, sts).await
    }

    async fn replace_stateful_set(
        &self,
        namespace: &str,
        sts: &StatefulSet,
    ) -> Result<(), Error> {
        self.replace(namespace, sts).await
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<StatefulSet>(namespace, name).await
    }

    async fn list_pvcs(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, Error> {
        self.list(namespace, selector).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<PersistentVolumeClaim>(namespace, name).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        self.get(namespace, name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        self.list(namespace, selector).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Pod>(namespace, name).await
    }

    async fn replace_cluster(&self, cluster: &PravegaCluster) -> Result<PravegaCluster, Error> {
        let api: Api<PravegaCluster> = self.api(cluster.cluster_namespace());
        Ok(api
            .replace(cluster.cluster_name(), &post_params(), cluster)
            .await?)
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &PravegaClusterStatus,
    ) -> Result<(), Error> {
        let api: Api<PravegaCluster> = self.api(namespace);

        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&status_patch(resource_version, status)),
        )
        .await?;

        Ok(())
    }
}
