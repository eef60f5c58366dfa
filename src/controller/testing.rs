//! In-memory cluster for multi-pass controller tests
//!
//! [`FakeCluster`] stores objects the way the API server would (resource
//! versions, `AlreadyExists` and `NotFound` answers, compare-and-swap status
//! writes) and can play the part of the workload controllers through
//! [`FakeCluster::settle`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateWaiting, ContainerStatus, ObjectReference,
    PersistentVolumeClaim, Pod, PodCondition, PodStatus, PodTemplateSpec, Service,
};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use kube::error::ErrorResponse;
use kube::runtime::events::EventType;

use pravega_common::crd::{PravegaCluster, PravegaClusterStatus, VERSION_ANNOTATION};
use pravega_common::events::EventPublisher;
use pravega_common::Error;

use super::client::{status_patch, ClusterClient};

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .filter_map(|term| term.split_once('='))
        .all(|(k, v)| labels.and_then(|l| l.get(k)).map(String::as_str) == Some(v))
}

fn template_version(template: &PodTemplateSpec) -> String {
    template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(VERSION_ANNOTATION))
        .cloned()
        .unwrap_or_default()
}

fn pod_version(pod: &Pod) -> Option<&str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(VERSION_ANNOTATION))
        .map(String::as_str)
}

fn ready_condition(ready: bool) -> PodStatus {
    PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// A pod with the given labels running `version`
pub fn ready_pod(name: &str, labels: &BTreeMap<String, String>, version: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            uid: Some(format!("{name}-uid")),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                VERSION_ANNOTATION.to_string(),
                version.to_string(),
            )])),
            ..Default::default()
        },
        status: Some(ready_condition(true)),
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    config_maps: BTreeMap<String, ConfigMap>,
    services: BTreeMap<String, Service>,
    pdbs: BTreeMap<String, PodDisruptionBudget>,
    deployments: BTreeMap<String, Deployment>,
    stateful_sets: BTreeMap<String, StatefulSet>,
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
    pods: BTreeMap<String, Pod>,
    cluster: Option<PravegaCluster>,
    revision: u64,
    uid_counter: u64,
    reject_status_writes: bool,
    recreate_deleted_pods: bool,
    deleted_pods: Vec<String>,
    status_writes: usize,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uid_counter += 1;
        format!("uid-{}", self.uid_counter)
    }

    fn pod_from_template(&mut self, name: String, template: &PodTemplateSpec) -> Pod {
        let meta = template.metadata.clone().unwrap_or_default();
        Pod {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some("ns".to_string()),
                uid: Some(self.next_uid()),
                labels: meta.labels,
                annotations: meta.annotations,
                ..Default::default()
            },
            spec: template.spec.clone(),
            status: Some(ready_condition(true)),
        }
    }

    fn pods_matching(&self, selector: &str) -> Vec<&Pod> {
        self.pods
            .values()
            .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
            .collect()
    }
}

/// True for `<prefix><ordinal>`, the pods a StatefulSet owns
fn owned_ordinal(pod_name: &str, prefix: &str) -> bool {
    pod_name
        .strip_prefix(prefix)
        .is_some_and(|ordinal| ordinal.parse::<u32>().is_ok())
}

fn name_of<K: Metadata<Ty = ObjectMeta>>(obj: &K) -> String {
    obj.metadata().name.clone().unwrap_or_default()
}

fn create_in<K: Metadata<Ty = ObjectMeta> + Clone>(
    map: &mut BTreeMap<String, K>,
    revision: String,
    obj: &K,
) -> Result<(), Error> {
    let name = name_of(obj);
    if map.contains_key(&name) {
        return Err(api_error(409, "AlreadyExists", format!("{name} already exists")));
    }
    let mut stored = obj.clone();
    stored.metadata_mut().resource_version = Some(revision);
    map.insert(name, stored);
    Ok(())
}

fn replace_in<K: Metadata<Ty = ObjectMeta> + Clone>(
    map: &mut BTreeMap<String, K>,
    revision: String,
    obj: &K,
) -> Result<(), Error> {
    let name = name_of(obj);
    if !map.contains_key(&name) {
        return Err(api_error(404, "NotFound", format!("{name} not found")));
    }
    let mut stored = obj.clone();
    stored.metadata_mut().resource_version = Some(revision);
    map.insert(name, stored);
    Ok(())
}

/// In-memory [`ClusterClient`] for a single namespace
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the PravegaCluster and return it as stored
    pub fn put_cluster(&self, mut cluster: PravegaCluster) -> PravegaCluster {
        let mut state = self.state.lock().unwrap();
        cluster.metadata.resource_version = Some(state.next_revision());
        state.cluster = Some(cluster.clone());
        cluster
    }

    /// The stored PravegaCluster
    pub fn cluster(&self) -> Option<PravegaCluster> {
        self.state.lock().unwrap().cluster.clone()
    }

    /// Answer every status write with 409 Conflict
    pub fn reject_status_writes(&self) {
        self.state.lock().unwrap().reject_status_writes = true;
    }

    /// Number of accepted status writes
    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    /// Replace deleted pods at once, like a workload controller would
    ///
    /// The replacement has a new uid and takes its annotations from the
    /// current template of the StatefulSet or Deployment it belongs to.
    pub fn recreate_deleted_pods(&self) {
        self.state.lock().unwrap().recreate_deleted_pods = true;
    }

    /// Names of deleted pods, in deletion order
    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_pods.clone()
    }

    /// Add a pod
    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.insert(name_of(&pod), pod);
    }

    /// Get a pod
    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(name).cloned()
    }

    /// Names of all pods
    pub fn pod_names(&self) -> Vec<String> {
        self.state.lock().unwrap().pods.keys().cloned().collect()
    }

    /// Flip a pod's Ready condition
    pub fn set_pod_ready(&self, name: &str, ready: bool) {
        if let Some(pod) = self.state.lock().unwrap().pods.get_mut(name) {
            pod.status = Some(ready_condition(ready));
        }
    }

    /// Leave a pod unready with `container` waiting for `reason`
    pub fn set_pod_waiting(&self, name: &str, container: &str, reason: &str) {
        if let Some(pod) = self.state.lock().unwrap().pods.get_mut(name) {
            let mut status = ready_condition(false);
            status.container_statuses = Some(vec![ContainerStatus {
                name: container.to_string(),
                ready: false,
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some(reason.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
            pod.status = Some(status);
        }
    }

    /// Add a claim
    pub fn add_pvc(&self, name: &str, labels: &BTreeMap<String, String>) {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state.lock().unwrap().pvcs.insert(name.to_string(), pvc);
    }

    /// Names of all claims
    pub fn pvc_names(&self) -> Vec<String> {
        self.state.lock().unwrap().pvcs.keys().cloned().collect()
    }

    /// Store a Service as-is
    pub fn put_service(&self, svc: Service) {
        self.state.lock().unwrap().services.insert(name_of(&svc), svc);
    }

    /// Get a Service
    pub fn service(&self, name: &str) -> Option<Service> {
        self.state.lock().unwrap().services.get(name).cloned()
    }

    /// Names of all Services
    pub fn service_names(&self) -> Vec<String> {
        self.state.lock().unwrap().services.keys().cloned().collect()
    }

    /// Get a ConfigMap
    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.state.lock().unwrap().config_maps.get(name).cloned()
    }

    /// Store a ConfigMap as-is
    pub fn put_config_map(&self, cm: ConfigMap) {
        self.state.lock().unwrap().config_maps.insert(name_of(&cm), cm);
    }

    /// Get a PodDisruptionBudget
    pub fn pdb(&self, name: &str) -> Option<PodDisruptionBudget> {
        self.state.lock().unwrap().pdbs.get(name).cloned()
    }

    /// Get a Deployment
    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.state.lock().unwrap().deployments.get(name).cloned()
    }

    /// Store a Deployment as-is
    pub fn put_deployment(&self, deploy: Deployment) {
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(name_of(&deploy), deploy);
    }

    /// Get a StatefulSet
    pub fn stateful_set(&self, name: &str) -> Option<StatefulSet> {
        self.state.lock().unwrap().stateful_sets.get(name).cloned()
    }

    /// Store a StatefulSet as-is
    pub fn put_stateful_set(&self, sts: StatefulSet) {
        self.state
            .lock()
            .unwrap()
            .stateful_sets
            .insert(name_of(&sts), sts);
    }

    /// Let the workload controllers catch up
    ///
    /// StatefulSets get one ready pod per missing ordinal at the template's
    /// version and lose pods beyond their replica count; existing pods keep
    /// their version (`OnDelete`). A StatefulSet only counts the
    /// `<name>-<ordinal>` pods it owns, even when selectors overlap. Deployments roll every pod to the
    /// template's version. Workload status is recomputed from the pods.
    pub fn settle(&self) {
        let mut state = self.state.lock().unwrap();

        let sets: Vec<StatefulSet> = state.stateful_sets.values().cloned().collect();
        for sts in sets {
            let name = name_of(&sts);
            let Some(spec) = sts.spec.as_ref() else {
                continue;
            };
            let replicas = spec.replicas.unwrap_or(1);
            for ordinal in 0..replicas {
                let pod_name = format!("{name}-{ordinal}");
                if !state.pods.contains_key(&pod_name) {
                    let pod = state.pod_from_template(pod_name.clone(), &spec.template);
                    state.pods.insert(pod_name, pod);
                }
            }
            state.pods.retain(|pod_name, _| {
                !pravega_common::kube_utils::is_orphan(pod_name, replicas)
                    || !pod_name.starts_with(&format!("{name}-"))
            });

            let version = template_version(&spec.template);
            let selector = pravega_common::kube_utils::label_selector(
                spec.selector.match_labels.as_ref().unwrap_or(&BTreeMap::new()),
            );
            let prefix = format!("{name}-");
            let pods: Vec<&Pod> = state
                .pods_matching(&selector)
                .into_iter()
                .filter(|p| owned_ordinal(&name_of(*p), &prefix))
                .collect();
            let ready = pods
                .iter()
                .filter(|p| pravega_common::kube_utils::is_pod_ready(p))
                .count() as i32;
            let updated = pods
                .iter()
                .filter(|p| pod_version(p) == Some(version.as_str()))
                .count() as i32;
            let current = pods.len() as i32;
            if let Some(stored) = state.stateful_sets.get_mut(&name) {
                stored.status = Some(StatefulSetStatus {
                    replicas: current,
                    ready_replicas: Some(ready),
                    updated_replicas: Some(updated),
                    ..Default::default()
                });
            }
        }

        let deployments: Vec<Deployment> = state.deployments.values().cloned().collect();
        for deploy in deployments {
            let name = name_of(&deploy);
            let Some(spec) = deploy.spec.as_ref() else {
                continue;
            };
            let replicas = spec.replicas.unwrap_or(1);
            let selector = pravega_common::kube_utils::label_selector(
                spec.selector.match_labels.as_ref().unwrap_or(&BTreeMap::new()),
            );
            let old: Vec<String> = state
                .pods_matching(&selector)
                .iter()
                .map(|p| name_of(*p))
                .collect();
            for pod_name in old {
                state.pods.remove(&pod_name);
            }
            for i in 0..replicas {
                let pod = state.pod_from_template(format!("{name}-{i}"), &spec.template);
                state.pods.insert(format!("{name}-{i}"), pod);
            }
            if let Some(stored) = state.deployments.get_mut(&name) {
                stored.status = Some(DeploymentStatus {
                    replicas: Some(replicas),
                    ready_replicas: Some(replicas),
                    updated_replicas: Some(replicas),
                    ..Default::default()
                });
            }
        }
    }

    fn recreate(&self, state: &mut State, deleted: &Pod) {
        let name = name_of(deleted);
        let labels = deleted.metadata.labels.as_ref();
        let owner_template = state
            .stateful_sets
            .values()
            .filter_map(|s| s.spec.as_ref())
            .map(|s| s.template.clone())
            .chain(
                state
                    .deployments
                    .values()
                    .filter_map(|d| d.spec.as_ref())
                    .map(|d| d.template.clone()),
            )
            .find(|t| {
                let template_labels = t.metadata.as_ref().and_then(|m| m.labels.as_ref());
                template_labels.is_some_and(|tl| {
                    tl.iter()
                        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
                })
            });
        if let Some(template) = owner_template {
            let pod = state.pod_from_template(name.clone(), &template);
            state.pods.insert(name, pod);
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_config_map(&self, _ns: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        Ok(self.config_map(name))
    }

    async fn create_config_map(&self, _ns: &str, cm: &ConfigMap) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        create_in(&mut state.config_maps, revision, cm)
    }

    async fn replace_config_map(&self, _ns: &str, cm: &ConfigMap) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        replace_in(&mut state.config_maps, revision, cm)
    }

    async fn get_service(&self, _ns: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.service(name))
    }

    async fn list_services(&self, _ns: &str, selector: &str) -> Result<Vec<Service>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .values()
            .filter(|s| matches_selector(s.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn create_service(&self, _ns: &str, svc: &Service) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        create_in(&mut state.services, revision, svc)
    }

    async fn delete_service(&self, _ns: &str, name: &str) -> Result<(), Error> {
        self.state.lock().unwrap().services.remove(name);
        Ok(())
    }

    async fn get_pdb(&self, _ns: &str, name: &str) -> Result<Option<PodDisruptionBudget>, Error> {
        Ok(self.pdb(name))
    }

    async fn create_pdb(&self, _ns: &str, pdb: &PodDisruptionBudget) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        create_in(&mut state.pdbs, revision, pdb)
    }

    async fn get_deployment(&self, _ns: &str, name: &str) -> Result<Option<Deployment>, Error> {
        Ok(self.deployment(name))
    }

    async fn create_deployment(&self, _ns: &str, deploy: &Deployment) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        create_in(&mut state.deployments, revision, deploy)
    }

    async fn replace_deployment(&self, _ns: &str, deploy: &Deployment) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        replace_in(&mut state.deployments, revision, deploy)
    }

    async fn get_stateful_set(&self, _ns: &str, name: &str) -> Result<Option<StatefulSet>, Error> {
        Ok(self.stateful_set(name))
    }

    async fn create_stateful_set(&self, _ns: &str, sts: &StatefulSet) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        create_in(&mut state.stateful_sets, revision, sts)
    }

    async fn replace_stateful_set(&self, _ns: &str, sts: &StatefulSet) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision();
        replace_in(&mut state.stateful_sets, revision, sts)
    }

    async fn delete_stateful_set(&self, _ns: &str, name: &str) -> Result<(), Error> {
        self.state.lock().unwrap().stateful_sets.remove(name);
        Ok(())
    }

    async fn list_pvcs(
        &self,
        _ns: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pvcs
            .values()
            .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn delete_pvc(&self, _ns: &str, name: &str) -> Result<(), Error> {
        self.state.lock().unwrap().pvcs.remove(name);
        Ok(())
    }

    async fn get_pod(&self, _ns: &str, name: &str) -> Result<Option<Pod>, Error> {
        Ok(self.pod(name))
    }

    async fn list_pods(&self, _ns: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods_matching(selector)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, _ns: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let Some(pod) = state.pods.remove(name) else {
            return Ok(());
        };
        state.deleted_pods.push(name.to_string());
        if state.recreate_deleted_pods {
            self.recreate(&mut state, &pod);
        }
        Ok(())
    }

    async fn replace_cluster(&self, cluster: &PravegaCluster) -> Result<PravegaCluster, Error> {
        let mut state = self.state.lock().unwrap();
        let mut stored = cluster.clone();
        stored.status = state.cluster.as_ref().and_then(|c| c.status.clone());
        stored.metadata.resource_version = Some(state.next_revision());
        state.cluster = Some(stored.clone());
        Ok(stored)
    }

    async fn patch_cluster_status(
        &self,
        _ns: &str,
        name: &str,
        resource_version: Option<String>,
        status: &PravegaClusterStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let stale = state.reject_status_writes
            || state.cluster.as_ref().is_some_and(|c| {
                resource_version.is_some() && c.metadata.resource_version != resource_version
            });
        if stale {
            return Err(api_error(
                409,
                "Conflict",
                format!("the object has been modified; please apply your changes to the latest version and try again: {name}"),
            ));
        }
        let revision = state.next_revision();
        let Some(cluster) = state.cluster.as_mut() else {
            return Err(api_error(404, "NotFound", format!("{name} not found")));
        };
        // Merge the body the API server would receive, not the status itself
        let mut stored = serde_json::to_value(&*cluster).unwrap();
        json_patch::merge(&mut stored, &status_patch(resource_version, status));
        *cluster = serde_json::from_value(stored).unwrap();
        cluster.metadata.resource_version = Some(revision);
        state.status_writes += 1;
        Ok(())
    }
}

/// Event sink remembering what was published
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventType, String, Option<String>)>>,
}

impl RecordingEvents {
    /// Reasons of published events, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    /// Note of the first event with `reason`
    pub fn note(&self, reason: &str) -> Option<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(_, r, _)| r == reason)
            .and_then(|(_, _, note)| note.clone())
    }

    /// True if the first event with `reason` is a warning
    pub fn is_warning(&self, reason: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(_, r, _)| r == reason)
            .is_some_and(|(t, _, _)| matches!(t, EventType::Warning))
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .unwrap()
            .push((type_, reason.to_string(), note));
    }
}
