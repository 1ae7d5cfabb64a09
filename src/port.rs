//! Reads needed to build an overview, and their kube-rs implementation.

use crate::metrics::{METRICS_API_VERSION, NodeMetrics, PodMetrics};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::api::{Api, ListParams};
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{debug, instrument};

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Failed to reach the control plane")]
    Unreachable {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Request rejected by the control plane ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Failed to decode the response of the control plane")]
    Malformed { source: serde_json::Error },
}

impl From<kube::Error> for ReadError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ReadError::Rejected {
                code: response.code,
                message: response.message,
            },
            kube::Error::SerdeError(source) => ReadError::Malformed { source },
            other => ReadError::Unreachable {
                source: Box::new(other),
            },
        }
    }
}

/// Source of the cluster state.
///
/// Implementations apply their own timeouts; a timed out read is an `Err`.
pub trait ClusterReadPort {
    fn list_nodes(&self) -> impl Future<Output = Result<Vec<Node>, ReadError>> + Send;

    /// pods of every namespace
    fn list_pods(&self) -> impl Future<Output = Result<Vec<Pod>, ReadError>> + Send;

    fn list_namespaces(&self) -> impl Future<Output = Result<Vec<Namespace>, ReadError>> + Send;

    fn list_deployments(&self) -> impl Future<Output = Result<Vec<Deployment>, ReadError>> + Send;

    fn list_statefulsets(&self)
    -> impl Future<Output = Result<Vec<StatefulSet>, ReadError>> + Send;

    fn list_events(&self) -> impl Future<Output = Result<Vec<Event>, ReadError>> + Send;

    /// `Ok(true)` when the metrics API is served and ready.
    fn probe_metrics(&self) -> impl Future<Output = Result<bool, ReadError>> + Send;

    fn list_node_metrics(&self) -> impl Future<Output = Result<Vec<NodeMetrics>, ReadError>> + Send;

    fn list_pod_metrics(&self) -> impl Future<Output = Result<Vec<PodMetrics>, ReadError>> + Send;
}

/// Reads the answer to the discovery of the metrics API group.
fn metrics_served(answer: Result<APIResourceList, kube::Error>) -> Result<bool, ReadError> {
    match answer {
        Ok(list) => Ok(["nodes", "pods"]
            .iter()
            .all(|name| list.resources.iter().any(|r| r.name == *name))),
        // not registered (404) or registered but its backend is not ready (503)
        Err(kube::Error::Api(response)) if response.code == 404 || response.code == 503 => {
            debug!(code = response.code, message = %response.message, "metrics API not served");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Clone)]
pub struct KubeReadPort {
    client: kube::Client,
}

impl KubeReadPort {
    pub fn new(client: kube::Client) -> Self {
        KubeReadPort { client }
    }

    async fn list_all<K>(&self) -> Result<Vec<K>, ReadError>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

impl ClusterReadPort for KubeReadPort {
    #[instrument(skip(self))]
    async fn list_nodes(&self) -> Result<Vec<Node>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn list_pods(&self) -> Result<Vec<Pod>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn list_deployments(&self) -> Result<Vec<Deployment>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn list_statefulsets(&self) -> Result<Vec<StatefulSet>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn list_events(&self) -> Result<Vec<Event>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn probe_metrics(&self) -> Result<bool, ReadError> {
        metrics_served(self.client.list_api_group_resources(METRICS_API_VERSION).await)
    }

    #[instrument(skip(self))]
    async fn list_node_metrics(&self) -> Result<Vec<NodeMetrics>, ReadError> {
        self.list_all().await
    }

    #[instrument(skip(self))]
    async fn list_pod_metrics(&self) -> Result<Vec<PodMetrics>, ReadError> {
        self.list_all().await
    }
}
