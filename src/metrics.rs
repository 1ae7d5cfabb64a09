use crate::aggregate::ResourceFigure;
use crate::port::ReadError;
use crate::qty::{Dimension, Quantity};
use serde::{Deserialize, Serialize};
use tracing::warn;
// kubectl get --raw /apis/metrics.k8s.io/v1beta1/pods | jq .
// kubectl get --raw /apis/metrics.k8s.io/v1beta1/nodes | jq .

pub const METRICS_API_VERSION: &str = "metrics.k8s.io/v1beta1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub cpu: String,
    pub memory: String,
}

impl Usage {
    pub fn quantity(&self, dimension: Dimension) -> Quantity {
        match dimension {
            Dimension::Cpu => Quantity::parse(&self.cpu, dimension),
            Dimension::Memory => Quantity::parse(&self.memory, dimension),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub metadata: kube::api::ObjectMeta,
    pub containers: Vec<Container>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub window: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub metadata: kube::api::ObjectMeta,
    pub usage: Usage,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub window: String,
}

// custom impl since metrics API doesn't exist on kube-rs
impl k8s_openapi::Resource for PodMetrics {
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "PodMetrics";
    const VERSION: &'static str = "v1beta1";
    const API_VERSION: &'static str = METRICS_API_VERSION;
    const URL_PATH_SEGMENT: &'static str = "pods";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for PodMetrics {
    type Ty = kube::api::ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

impl k8s_openapi::Resource for NodeMetrics {
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "NodeMetrics";
    const VERSION: &'static str = "v1beta1";
    const API_VERSION: &'static str = METRICS_API_VERSION;
    const URL_PATH_SEGMENT: &'static str = "nodes";
    type Scope = k8s_openapi::ClusterResourceScope;
}

impl k8s_openapi::Metadata for NodeMetrics {
    type Ty = kube::api::ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

/// Whether usage figures exist for this overview.
///
/// Decided once per overview from the metrics API probe. When unavailable every
/// `used` figure at every scope is absent, nothing is estimated in its place.
/// When available, an entity without a sample (not scraped yet) counts as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsAvailability {
    Available,
    Unavailable,
}

impl MetricsAvailability {
    pub fn from_probe(probe: &Result<bool, ReadError>) -> Self {
        match probe {
            Ok(true) => Self::Available,
            Ok(false) => {
                warn!("metrics API not served (metrics-server missing or not ready), usage is absent");
                Self::Unavailable
            }
            Err(err) => {
                warn!(?err, "metrics API probe failed, usage is absent");
                Self::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        *self == Self::Available
    }

    pub fn degraded_figure(&self, nominal: ResourceFigure) -> ResourceFigure {
        match self {
            Self::Available => nominal,
            Self::Unavailable => ResourceFigure {
                used: None,
                ..nominal
            },
        }
    }

    /// `sampled` is the sum of the samples found in a scope, `None` if there was none.
    pub fn resolve_used(&self, sampled: Option<Quantity>, dimension: Dimension) -> Option<Quantity> {
        match self {
            Self::Available => Some(sampled.unwrap_or_else(|| Quantity::zero(dimension))),
            Self::Unavailable => None,
        }
    }
}
