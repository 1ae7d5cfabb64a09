use crate::metrics::{MetricsAvailability, NodeMetrics, PodMetrics};
use crate::qty::{Dimension, Quantity, percentage};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub node_name: Option<String>,
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceQualifier {
    Capacity,
    Requested,
    Limit,
    /// sampled by the metrics API for a whole node
    NodeUsage,
    /// sampled by the metrics API for the containers of a pod
    PodUsage,
}

/// One figure read from the control plane, before aggregation.
#[derive(Debug, Clone)]
pub struct Resource {
    pub quantity: Quantity,
    pub location: Location,
    pub qualifier: ResourceQualifier,
}

/// Rollup of one dimension over a scope.
///
/// `used` is `None` when nothing measured it, which is not the same as a
/// measured zero. `total` is zero for scopes without capacity (namespaces).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceFigure {
    pub used: Option<Quantity>,
    pub total: Quantity,
    pub requested: Quantity,
    pub limited: Quantity,
}

impl ResourceFigure {
    pub fn zero(dimension: Dimension) -> Self {
        ResourceFigure {
            used: None,
            total: Quantity::zero(dimension),
            requested: Quantity::zero(dimension),
            limited: Quantity::zero(dimension),
        }
    }

    /// `used` in percent of `total`, `None` when usage is absent.
    pub fn utilization(&self) -> Option<f64> {
        self.used.as_ref().map(|used| percentage(used, &self.total))
    }

    pub fn requested_ratio(&self) -> f64 {
        percentage(&self.requested, &self.total)
    }

    pub fn limited_ratio(&self) -> f64 {
        percentage(&self.limited, &self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Node,
    Namespace,
    Cluster,
}

impl Scope {
    fn accepts(&self, qualifier: ResourceQualifier) -> bool {
        use ResourceQualifier::*;
        match (self, qualifier) {
            (_, Requested | Limit) => true,
            // namespaces have no capacity, and their usage is the one of their pods
            (Scope::Namespace, PodUsage) => true,
            (Scope::Namespace, Capacity | NodeUsage) => false,
            (Scope::Node | Scope::Cluster, Capacity | NodeUsage) => true,
            (Scope::Node | Scope::Cluster, PodUsage) => false,
        }
    }
}

fn add(lhs: Option<Quantity>, rhs: &Quantity) -> Option<Quantity> {
    lhs.map(|l| &l + rhs).or(Some(*rhs))
}

/// Sums `resources` (already restricted to the entities of the scope) into a
/// [`ResourceFigure`] of `dimension`. The order of `resources` does not matter.
pub fn aggregate(
    scope: Scope,
    resources: &[&Resource],
    dimension: Dimension,
    metrics: MetricsAvailability,
) -> ResourceFigure {
    let sum = resources
        .iter()
        .filter(|r| r.quantity.dimension() == dimension && scope.accepts(r.qualifier))
        .fold(ResourceFigure::zero(dimension), |mut acc, r| {
            match r.qualifier {
                ResourceQualifier::Capacity => acc.total += &r.quantity,
                ResourceQualifier::Requested => acc.requested += &r.quantity,
                ResourceQualifier::Limit => acc.limited += &r.quantity,
                ResourceQualifier::NodeUsage | ResourceQualifier::PodUsage => {
                    acc.used = add(acc.used, &r.quantity)
                }
            };
            acc
        });
    ResourceFigure {
        used: metrics.resolve_used(sum.used, dimension),
        ..sum
    }
}

fn push_resources(
    resources: &mut Vec<Resource>,
    location: &Location,
    qualifier: ResourceQualifier,
    resource_list: &BTreeMap<String, KubeQuantity>,
) {
    for dimension in Dimension::ALL {
        if let Some(value) = resource_list.get(dimension.name()) {
            resources.push(Resource {
                quantity: Quantity::parse(&value.0, dimension),
                location: location.clone(),
                qualifier,
            });
        }
    }
}

pub fn extract_capacity_from_nodes(nodes: &[Node], resources: &mut Vec<Resource>) {
    for node in nodes {
        let location = Location {
            node_name: node.metadata.name.clone(),
            ..Location::default()
        };
        if let Some(capacity) = node.status.as_ref().and_then(|s| s.capacity.as_ref()) {
            push_resources(resources, &location, ResourceQualifier::Capacity, capacity);
        }
    }
}

/// Requests and limits declared by every container of every pod.
/// A container without declaration adds nothing, so it weighs zero.
pub fn extract_claims_from_pods(pods: &[Pod], resources: &mut Vec<Resource>) {
    for pod in pods {
        let spec = pod.spec.as_ref();
        let location = Location {
            node_name: spec.and_then(|s| s.node_name.clone()),
            namespace: pod.metadata.namespace.clone(),
            pod_name: pod.metadata.name.clone(),
        };
        for container in spec.map(|s| s.containers.as_slice()).unwrap_or_default() {
            if let Some(requirements) = &container.resources {
                if let Some(requests) = &requirements.requests {
                    push_resources(resources, &location, ResourceQualifier::Requested, requests);
                }
                if let Some(limits) = &requirements.limits {
                    push_resources(resources, &location, ResourceQualifier::Limit, limits);
                }
            }
        }
    }
}

pub fn extract_usage_from_node_metrics(samples: &[NodeMetrics], resources: &mut Vec<Resource>) {
    for sample in samples {
        let location = Location {
            node_name: sample.metadata.name.clone(),
            ..Location::default()
        };
        for dimension in Dimension::ALL {
            resources.push(Resource {
                quantity: sample.usage.quantity(dimension),
                location: location.clone(),
                qualifier: ResourceQualifier::NodeUsage,
            });
        }
    }
}

/// Location of each pod, by (namespace, name); metrics samples don't carry the node.
pub fn extract_locations(pods: &[Pod]) -> HashMap<(String, String), Location> {
    pods.iter()
        .filter_map(|pod| {
            let name = pod.metadata.name.clone()?;
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let location = Location {
                node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
                namespace: Some(namespace.clone()),
                pod_name: Some(name.clone()),
            };
            Some(((namespace, name), location))
        })
        .collect()
}

pub fn extract_usage_from_pod_metrics(
    samples: &[PodMetrics],
    pods: &[Pod],
    resources: &mut Vec<Resource>,
) {
    let locations = extract_locations(pods);
    for sample in samples {
        let metadata = &sample.metadata;
        let key = (
            metadata.namespace.clone().unwrap_or_default(),
            metadata.name.clone().unwrap_or_default(),
        );
        let location = locations.get(&key).cloned().unwrap_or_else(|| Location {
            namespace: metadata.namespace.clone(),
            pod_name: metadata.name.clone(),
            ..Location::default()
        });
        for dimension in Dimension::ALL {
            let usage = sample
                .containers
                .iter()
                .map(|c| c.usage.quantity(dimension))
                .collect::<Vec<_>>();
            resources.push(Resource {
                quantity: Quantity::sum(dimension, &usage),
                location: location.clone(),
                qualifier: ResourceQualifier::PodUsage,
            });
        }
    }
}
