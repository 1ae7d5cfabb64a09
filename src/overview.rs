use crate::Error;
use crate::aggregate::{self, Resource, ResourceFigure, Scope, aggregate};
use crate::metrics::{MetricsAvailability, NodeMetrics, PodMetrics};
use crate::port::{ClusterReadPort, ReadError};
use crate::qty::Dimension;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Max pods of a node that doesn't report `capacity.pods` (kubelet default).
pub const DEFAULT_POD_CAPACITY: u32 = 110;

/// Reasons of events counted as errors, whatever their type.
const ERROR_REASONS: &[&str] = &[
    "Failed",
    "FailedScheduling",
    "FailedMount",
    "FailedAttachVolume",
    "FailedCreate",
    "FailedCreatePodSandBox",
    "BackOff",
    "CrashLoopBackOff",
    "OOMKilling",
    "Evicted",
    "Unhealthy",
    "NodeNotReady",
];

#[derive(Debug, Clone)]
pub struct OverviewOptions {
    /// only events more recent than this are counted
    pub event_window: Duration,
    pub default_pod_capacity: u32,
}

impl Default for OverviewOptions {
    fn default() -> Self {
        OverviewOptions {
            event_window: Duration::hours(1),
            default_pod_capacity: DEFAULT_POD_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Figures {
    pub cpu: ResourceFigure,
    pub memory: ResourceFigure,
}

impl Figures {
    fn aggregate(scope: Scope, resources: &[&Resource], metrics: MetricsAvailability) -> Self {
        Figures {
            cpu: aggregate(scope, resources, Dimension::Cpu, metrics),
            memory: aggregate(scope, resources, Dimension::Memory, metrics),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub role: String,
    pub version: String,
    pub ready: bool,
    pub cpu: ResourceFigure,
    pub memory: ResourceFigure,
    pub pods: usize,
    pub pod_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceRollup {
    pub name: String,
    pub status: String,
    pub pods: usize,
    pub deployments: usize,
    pub statefulsets: usize,
    pub cpu: ResourceFigure,
    pub memory: ResourceFigure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PodPhaseCounts {
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub other: usize,
}

impl PodPhaseCounts {
    pub fn from_pods(pods: &[Pod]) -> Self {
        pods.iter().fold(PodPhaseCounts::default(), |mut acc, pod| {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            match phase {
                Some("Running") => acc.running += 1,
                Some("Pending") => acc.pending += 1,
                Some("Failed") => acc.failed += 1,
                _ => acc.other += 1,
            }
            acc
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub warnings: usize,
    pub errors: usize,
}

impl EventCounts {
    pub fn from_events(events: &[Event], since: DateTime<Utc>) -> Self {
        events
            .iter()
            .filter(|e| event_timestamp(e).is_some_and(|ts| ts >= since))
            .filter_map(classify_event)
            .fold(EventCounts::default(), |mut acc, severity| {
                match severity {
                    EventSeverity::Warning => acc.warnings += 1,
                    EventSeverity::Error => acc.errors += 1,
                }
                acc
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterHealth {
    pub ready_nodes: usize,
    pub pods: PodPhaseCounts,
    pub available_deployments: usize,
    pub events: EventCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterRollup {
    pub cpu: ResourceFigure,
    pub memory: ResourceFigure,
    pub nodes: usize,
    pub pods: usize,
    pub pod_capacity: u64,
    pub namespaces: usize,
    pub deployments: usize,
    pub health: ClusterHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterOverview {
    pub generated_at: DateTime<Utc>,
    pub metrics: MetricsAvailability,
    pub cluster: ClusterRollup,
    pub nodes: Vec<NodeSnapshot>,
    pub namespaces: Vec<NamespaceRollup>,
}

/// Everything read from the control plane for one overview.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub namespaces: Vec<Namespace>,
    pub deployments: Vec<Deployment>,
    pub statefulsets: Vec<StatefulSet>,
    pub events: Vec<Event>,
    pub metrics: MetricsAvailability,
    pub node_metrics: Vec<NodeMetrics>,
    pub pod_metrics: Vec<PodMetrics>,
}

fn required<T>(resource: &'static str, read: Result<T, ReadError>) -> Result<T, Error> {
    read.map_err(|source| Error::RequiredRead { resource, source })
}

/// Usage samples are only kept when the probe said yes and both reads succeeded.
fn settle_metrics(
    probe: Result<bool, ReadError>,
    node_metrics: Result<Vec<NodeMetrics>, ReadError>,
    pod_metrics: Result<Vec<PodMetrics>, ReadError>,
) -> (MetricsAvailability, Vec<NodeMetrics>, Vec<PodMetrics>) {
    let availability = MetricsAvailability::from_probe(&probe);
    if !availability.is_available() {
        return (availability, vec![], vec![]);
    }
    match (node_metrics, pod_metrics) {
        (Ok(node_metrics), Ok(pod_metrics)) => (availability, node_metrics, pod_metrics),
        (node_metrics, pod_metrics) => {
            let err = node_metrics.err().or(pod_metrics.err());
            warn!(?err, "failed to read metrics samples, usage is absent");
            (MetricsAvailability::Unavailable, vec![], vec![])
        }
    }
}

pub async fn build_overview<P>(port: &P, options: &OverviewOptions) -> Result<ClusterOverview, Error>
where
    P: ClusterReadPort + ?Sized,
{
    build_overview_at(port, options, Utc::now()).await
}

/// Reads everything concurrently, then aggregates.
///
/// Fails if nodes, pods, namespaces or deployments can't be read.
/// Statefulsets, events and metrics are optional: their failure only empties them.
#[instrument(skip(port, options))]
pub async fn build_overview_at<P>(
    port: &P,
    options: &OverviewOptions,
    now: DateTime<Utc>,
) -> Result<ClusterOverview, Error>
where
    P: ClusterReadPort + ?Sized,
{
    let (nodes, pods, namespaces, deployments, statefulsets, events, probe, node_metrics, pod_metrics) = futures::join!(
        port.list_nodes(),
        port.list_pods(),
        port.list_namespaces(),
        port.list_deployments(),
        port.list_statefulsets(),
        port.list_events(),
        port.probe_metrics(),
        port.list_node_metrics(),
        port.list_pod_metrics(),
    );
    let statefulsets = statefulsets.unwrap_or_else(|err| {
        warn!(?err, "failed to list statefulsets, counted as none");
        vec![]
    });
    let events = events.unwrap_or_else(|err| {
        warn!(?err, "failed to list events, no warning nor error counted");
        vec![]
    });
    let (metrics, node_metrics, pod_metrics) = settle_metrics(probe, node_metrics, pod_metrics);
    let snapshot = ClusterSnapshot {
        nodes: required("nodes", nodes)?,
        pods: required("pods", pods)?,
        namespaces: required("namespaces", namespaces)?,
        deployments: required("deployments", deployments)?,
        statefulsets,
        events,
        metrics,
        node_metrics,
        pod_metrics,
    };
    let overview = snapshot.summarize(options, now);
    info!(
        nodes = overview.nodes.len(),
        namespaces = overview.namespaces.len(),
        pods = overview.cluster.pods,
        metrics = ?overview.metrics,
        "overview built"
    );
    Ok(overview)
}

impl ClusterSnapshot {
    pub fn summarize(&self, options: &OverviewOptions, now: DateTime<Utc>) -> ClusterOverview {
        let mut resources: Vec<Resource> = vec![];
        aggregate::extract_capacity_from_nodes(&self.nodes, &mut resources);
        aggregate::extract_claims_from_pods(&self.pods, &mut resources);
        aggregate::extract_usage_from_node_metrics(&self.node_metrics, &mut resources);
        aggregate::extract_usage_from_pod_metrics(&self.pod_metrics, &self.pods, &mut resources);

        let by_node = resources
            .iter()
            .filter_map(|r| r.location.node_name.clone().map(|n| (n, r)))
            .into_group_map();
        let by_namespace = resources
            .iter()
            .filter_map(|r| r.location.namespace.clone().map(|n| (n, r)))
            .into_group_map();
        let all = resources.iter().collect::<Vec<_>>();

        let pods_by_node = self
            .pods
            .iter()
            .filter_map(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()))
            .counts();
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let name = node.metadata.name.clone().unwrap_or_default();
                let group = by_node.get(&name).map(Vec::as_slice).unwrap_or_default();
                let figures = Figures::aggregate(Scope::Node, group, self.metrics);
                NodeSnapshot {
                    role: node_role(node),
                    version: kubelet_version(node),
                    ready: is_ready(node),
                    cpu: figures.cpu,
                    memory: figures.memory,
                    pods: pods_by_node.get(name.as_str()).copied().unwrap_or(0),
                    pod_capacity: pod_capacity(node, options.default_pod_capacity),
                    name,
                }
            })
            .collect::<Vec<_>>();

        let pods_by_namespace = count_by_namespace(self.pods.iter().map(|p| &p.metadata));
        let deployments_by_namespace =
            count_by_namespace(self.deployments.iter().map(|d| &d.metadata));
        let statefulsets_by_namespace =
            count_by_namespace(self.statefulsets.iter().map(|s| &s.metadata));
        let namespaces = self
            .namespaces
            .iter()
            .map(|namespace| {
                let name = namespace.metadata.name.clone().unwrap_or_default();
                let group = by_namespace
                    .get(&name)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let figures = Figures::aggregate(Scope::Namespace, group, self.metrics);
                NamespaceRollup {
                    status: namespace
                        .status
                        .as_ref()
                        .and_then(|s| s.phase.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    pods: pods_by_namespace.get(name.as_str()).copied().unwrap_or(0),
                    deployments: deployments_by_namespace
                        .get(name.as_str())
                        .copied()
                        .unwrap_or(0),
                    statefulsets: statefulsets_by_namespace
                        .get(name.as_str())
                        .copied()
                        .unwrap_or(0),
                    cpu: figures.cpu,
                    memory: figures.memory,
                    name,
                }
            })
            .collect::<Vec<_>>();

        let figures = Figures::aggregate(Scope::Cluster, &all, self.metrics);
        let health = ClusterHealth {
            ready_nodes: nodes.iter().filter(|n| n.ready).count(),
            pods: PodPhaseCounts::from_pods(&self.pods),
            available_deployments: self.deployments.iter().filter(|d| is_available(d)).count(),
            events: EventCounts::from_events(
                &self.events,
                window_start(now, options.event_window),
            ),
        };
        let cluster = ClusterRollup {
            cpu: figures.cpu,
            memory: figures.memory,
            nodes: self.nodes.len(),
            pods: self.pods.len(),
            pod_capacity: nodes.iter().map(|n| u64::from(n.pod_capacity)).sum(),
            namespaces: self.namespaces.len(),
            deployments: self.deployments.len(),
            health,
        };

        ClusterOverview {
            generated_at: now,
            metrics: self.metrics,
            cluster,
            nodes,
            namespaces,
        }
    }
}

/// Start of the event window, the oldest representable instant if it underflows.
fn window_start(now: DateTime<Utc>, event_window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(event_window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn count_by_namespace<'a, I>(metadata: I) -> HashMap<&'a str, usize>
where
    I: Iterator<Item = &'a kube::api::ObjectMeta>,
{
    metadata.filter_map(|m| m.namespace.as_deref()).counts()
}

pub fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Roles as `kubectl get nodes` shows them.
pub fn node_role(node: &Node) -> String {
    let roles = node
        .metadata
        .labels
        .iter()
        .flatten()
        .filter_map(|(key, value)| {
            if let Some(role) = key.strip_prefix("node-role.kubernetes.io/") {
                Some(role.to_string())
            } else if key == "kubernetes.io/role" {
                Some(value.clone())
            } else {
                None
            }
        })
        .filter(|role| !role.is_empty())
        .sorted()
        .dedup()
        .join(",");
    if roles.is_empty() {
        "<none>".to_string()
    } else {
        roles
    }
}

fn kubelet_version(node: &Node) -> String {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.clone())
        .unwrap_or_default()
}

pub fn pod_capacity(node: &Node, default_pod_capacity: u32) -> u32 {
    node.status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|capacity| capacity.get("pods"))
        .and_then(|q| q.0.trim().parse::<u32>().ok())
        .unwrap_or(default_pod_capacity)
}

/// Available when every declared replica is ready, and at least one is declared.
pub fn is_available(deployment: &Deployment) -> bool {
    let declared = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    declared > 0 && ready == declared
}

pub fn classify_event(event: &Event) -> Option<EventSeverity> {
    let type_ = event.type_.as_deref().unwrap_or_default();
    let reason = event.reason.as_deref().unwrap_or_default();
    if type_ == "Error" || ERROR_REASONS.contains(&reason) {
        Some(EventSeverity::Error)
    } else if type_ == "Warning" {
        Some(EventSeverity::Warning)
    } else {
        None
    }
}

fn event_timestamp(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .and_then(to_utc)
        .or_else(|| event.event_time.as_ref().and_then(to_utc))
        .or_else(|| event.first_timestamp.as_ref().and_then(to_utc))
        .or_else(|| event.metadata.creation_timestamp.as_ref().and_then(to_utc))
}

/// `Time` and `MicroTime` go through their RFC 3339 wire form, whatever date
/// library k8s-openapi wraps.
fn to_utc<T: Serialize>(time: &T) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Container, Usage};
    use crate::qty::Quantity;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{
        Container as PodContainer, NamespaceStatus, NodeCondition, NodeStatus, NodeSystemInfo,
        PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
    use kube::api::ObjectMeta;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default)]
    struct FakePort {
        nodes: Vec<Node>,
        pods: Vec<Pod>,
        namespaces: Vec<Namespace>,
        deployments: Vec<Deployment>,
        statefulsets: Vec<StatefulSet>,
        events: Vec<Event>,
        metrics_served: bool,
        node_metrics: Vec<NodeMetrics>,
        pod_metrics: Vec<PodMetrics>,
        failing: Vec<&'static str>,
    }

    impl FakePort {
        fn read<T: Clone>(&self, what: &'static str, items: &[T]) -> Result<Vec<T>, ReadError> {
            if self.failing.contains(&what) {
                Err(ReadError::Unreachable {
                    source: format!("timed out reading {what}").into(),
                })
            } else {
                Ok(items.to_vec())
            }
        }

        fn failing(mut self, what: &'static str) -> Self {
            self.failing.push(what);
            self
        }
    }

    impl ClusterReadPort for FakePort {
        async fn list_nodes(&self) -> Result<Vec<Node>, ReadError> {
            self.read("nodes", &self.nodes)
        }

        async fn list_pods(&self) -> Result<Vec<Pod>, ReadError> {
            self.read("pods", &self.pods)
        }

        async fn list_namespaces(&self) -> Result<Vec<Namespace>, ReadError> {
            self.read("namespaces", &self.namespaces)
        }

        async fn list_deployments(&self) -> Result<Vec<Deployment>, ReadError> {
            self.read("deployments", &self.deployments)
        }

        async fn list_statefulsets(&self) -> Result<Vec<StatefulSet>, ReadError> {
            self.read("statefulsets", &self.statefulsets)
        }

        async fn list_events(&self) -> Result<Vec<Event>, ReadError> {
            self.read("events", &self.events)
        }

        async fn probe_metrics(&self) -> Result<bool, ReadError> {
            self.read("probe", &[self.metrics_served])
                .map(|v| v.first().copied().unwrap_or(false))
        }

        async fn list_node_metrics(&self) -> Result<Vec<NodeMetrics>, ReadError> {
            self.read("node_metrics", &self.node_metrics)
        }

        async fn list_pod_metrics(&self) -> Result<Vec<PodMetrics>, ReadError> {
            self.read("pod_metrics", &self.pod_metrics)
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            ..ObjectMeta::default()
        }
    }

    fn list(entries: &[(&str, &str)]) -> BTreeMap<String, KubeQuantity> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), KubeQuantity(v.to_string())))
            .collect()
    }

    fn node(name: &str, cpu: &str, memory: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([(
                    "node-role.kubernetes.io/worker".to_string(),
                    String::new(),
                )])),
                ..meta(None, name)
            },
            status: Some(NodeStatus {
                capacity: Some(list(&[("cpu", cpu), ("memory", memory)])),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..NodeCondition::default()
                }]),
                node_info: Some(NodeSystemInfo {
                    kubelet_version: "v1.31.2".to_string(),
                    ..NodeSystemInfo::default()
                }),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    fn pod(namespace: &str, name: &str, node: &str, phase: &str, cpu: &str, memory: &str) -> Pod {
        Pod {
            metadata: meta(Some(namespace), name),
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                containers: vec![PodContainer {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(list(&[("cpu", cpu), ("memory", memory)])),
                        limits: Some(list(&[("cpu", "1")])),
                        ..ResourceRequirements::default()
                    }),
                    ..PodContainer::default()
                }],
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..PodStatus::default()
            }),
        }
    }

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: meta(None, name),
            status: Some(NamespaceStatus {
                phase: Some("Active".to_string()),
                ..NamespaceStatus::default()
            }),
            ..Namespace::default()
        }
    }

    fn deployment(namespace: &str, name: &str, declared: Option<i32>, ready: Option<i32>) -> Deployment {
        Deployment {
            metadata: meta(Some(namespace), name),
            spec: Some(DeploymentSpec {
                replicas: declared,
                ..DeploymentSpec::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: ready,
                ..DeploymentStatus::default()
            }),
        }
    }

    fn node_sample(name: &str, cpu: &str, memory: &str) -> NodeMetrics {
        NodeMetrics {
            metadata: meta(None, name),
            usage: Usage {
                cpu: cpu.to_string(),
                memory: memory.to_string(),
            },
            timestamp: String::new(),
            window: "20s".to_string(),
        }
    }

    fn pod_sample(namespace: &str, name: &str, cpu: &str, memory: &str) -> PodMetrics {
        PodMetrics {
            metadata: meta(Some(namespace), name),
            containers: vec![Container {
                name: "main".to_string(),
                usage: Usage {
                    cpu: cpu.to_string(),
                    memory: memory.to_string(),
                },
            }],
            timestamp: String::new(),
            window: "20s".to_string(),
        }
    }

    fn event(type_: &str, reason: &str, minutes_ago: i64) -> Event {
        let last_timestamp = (now() - Duration::minutes(minutes_ago))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": format!("{reason}-{minutes_ago}"), "namespace": "default"},
            "involvedObject": {},
            "type": type_,
            "reason": reason,
            "lastTimestamp": last_timestamp,
        }))
        .expect("valid event")
    }

    /// 4 nodes of 2 cores / 4096000Ki, 2 namespaces, 3 pods, 2 deployments.
    fn cluster() -> FakePort {
        FakePort {
            nodes: (1..=4)
                .map(|i| node(&format!("node-{i}"), "2000000000n", "4096000Ki"))
                .collect(),
            pods: vec![
                pod("apps", "web-1", "node-1", "Running", "250m", "256Mi"),
                pod("apps", "web-2", "node-2", "Pending", "250m", "256Mi"),
                pod("kube-system", "dns", "node-1", "Running", "100m", "70Mi"),
            ],
            namespaces: vec![namespace("apps"), namespace("kube-system")],
            deployments: vec![
                deployment("apps", "web", Some(2), Some(1)),
                deployment("kube-system", "dns", Some(1), Some(1)),
            ],
            statefulsets: vec![StatefulSet {
                metadata: meta(Some("apps"), "db"),
                ..StatefulSet::default()
            }],
            events: vec![
                event("Warning", "FailedScheduling", 5),
                event("Warning", "ImagePullSlow", 10),
                event("Normal", "Scheduled", 10),
            ],
            metrics_served: true,
            node_metrics: vec![
                node_sample("node-1", "55000000n", "2068355Ki"),
                node_sample("node-2", "55000000n", "2068355Ki"),
                node_sample("node-3", "55000000n", "2068355Ki"),
                node_sample("node-4", "55000000n", "2068355Ki"),
            ],
            pod_metrics: vec![
                pod_sample("apps", "web-1", "20m", "100Mi"),
                pod_sample("kube-system", "dns", "3m", "20Mi"),
            ],
            failing: vec![],
        }
    }

    async fn build(port: &FakePort) -> Result<ClusterOverview, Error> {
        build_overview_at(port, &OverviewOptions::default(), now()).await
    }

    #[tokio::test]
    async fn test_end_to_end_cluster_rollup() -> anyhow::Result<()> {
        let overview = build(&cluster()).await?;
        let cpu = overview.cluster.cpu;
        assert_eq!(overview.metrics, MetricsAvailability::Available);
        assert_eq!(cpu.total.value(), 8_000_000_000.0);
        assert_eq!(cpu.used.map(|q| q.value()), Some(220_000_000.0));
        let utilization = cpu.utilization().unwrap_or_default();
        assert!((utilization - 2.75).abs() < 1e-9, "{utilization}");
        assert_eq!(cpu.requested, Quantity::parse("600m", Dimension::Cpu));
        assert_eq!(cpu.limited, Quantity::parse("3", Dimension::Cpu));

        let memory = overview.cluster.memory;
        assert_eq!(memory.total.value(), 4.0 * 4_096_000.0);
        assert_eq!(memory.used.map(|q| q.value()), Some(8_273_420.0));
        assert_eq!(memory.requested, Quantity::parse("582Mi", Dimension::Memory));

        assert_eq!(overview.cluster.nodes, 4);
        assert_eq!(overview.cluster.pods, 3);
        assert_eq!(overview.cluster.namespaces, 2);
        assert_eq!(overview.cluster.deployments, 2);
        assert_eq!(overview.cluster.pod_capacity, 4 * 110);
        assert_eq!(
            overview.cluster.health,
            ClusterHealth {
                ready_nodes: 4,
                pods: PodPhaseCounts {
                    running: 2,
                    pending: 1,
                    failed: 0,
                    other: 0,
                },
                available_deployments: 1,
                events: EventCounts {
                    warnings: 1,
                    errors: 1,
                },
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_node_snapshots() -> anyhow::Result<()> {
        let overview = build(&cluster()).await?;
        let node_1 = &overview.nodes[0];
        assert_eq!(node_1.name, "node-1");
        assert_eq!(node_1.role, "worker");
        assert_eq!(node_1.version, "v1.31.2");
        assert!(node_1.ready);
        assert_eq!(node_1.pods, 2);
        assert_eq!(node_1.pod_capacity, 110);
        assert_eq!(node_1.cpu.total, Quantity::parse("2", Dimension::Cpu));
        assert_eq!(node_1.cpu.used, Some(Quantity::parse("55m", Dimension::Cpu)));
        assert_eq!(node_1.cpu.requested, Quantity::parse("350m", Dimension::Cpu));
        assert_eq!(node_1.cpu.limited, Quantity::parse("2", Dimension::Cpu));
        let node_3 = &overview.nodes[2];
        assert_eq!(node_3.pods, 0);
        assert!(node_3.cpu.requested.is_zero());
        Ok(())
    }

    #[tokio::test]
    async fn test_namespace_rollups() -> anyhow::Result<()> {
        let overview = build(&cluster()).await?;
        let apps = &overview.namespaces[0];
        assert_eq!(apps.name, "apps");
        assert_eq!(apps.status, "Active");
        assert_eq!(apps.pods, 2);
        assert_eq!(apps.deployments, 1);
        assert_eq!(apps.statefulsets, 1);
        assert!(apps.cpu.total.is_zero());
        assert_eq!(apps.cpu.requested, Quantity::parse("500m", Dimension::Cpu));
        assert_eq!(apps.cpu.used, Some(Quantity::parse("20m", Dimension::Cpu)));
        assert_eq!(
            apps.memory.used,
            Some(Quantity::parse("100Mi", Dimension::Memory))
        );
        let system = &overview.namespaces[1];
        assert_eq!(system.statefulsets, 0);
        assert_eq!(system.cpu.used, Some(Quantity::parse("3m", Dimension::Cpu)));
        Ok(())
    }

    #[tokio::test]
    async fn test_usage_absent_everywhere_without_metrics() -> anyhow::Result<()> {
        let port = FakePort {
            metrics_served: false,
            ..cluster()
        };
        let overview = build(&port).await?;
        assert_eq!(overview.metrics, MetricsAvailability::Unavailable);
        assert_eq!(overview.cluster.cpu.used, None);
        assert_eq!(overview.cluster.memory.used, None);
        for node in &overview.nodes {
            assert_eq!(node.cpu.used, None);
            assert_eq!(node.memory.used, None);
        }
        for namespace in &overview.namespaces {
            assert_eq!(namespace.cpu.used, None);
            assert_eq!(namespace.memory.used, None);
        }
        // capacity and claims are still there
        assert_eq!(overview.cluster.cpu.total.value(), 8_000_000_000.0);
        assert_eq!(overview.cluster.cpu.requested, Quantity::parse("600m", Dimension::Cpu));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_probe_or_sample_read_is_unavailable() -> anyhow::Result<()> {
        for failing in ["probe", "node_metrics", "pod_metrics"] {
            let overview = build(&cluster().failing(failing)).await?;
            assert_eq!(overview.metrics, MetricsAvailability::Unavailable, "{failing}");
            assert_eq!(overview.cluster.cpu.used, None, "{failing}");
            assert_eq!(overview.nodes[0].memory.used, None, "{failing}");
            assert_eq!(overview.namespaces[0].cpu.used, None, "{failing}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_entity_without_sample_counts_zero() -> anyhow::Result<()> {
        let mut port = cluster();
        port.node_metrics.retain(|m| m.metadata.name.as_deref() != Some("node-4"));
        port.node_metrics[0] = node_sample("node-1", "0", "0");
        port.pod_metrics.clear();
        let overview = build(&port).await?;
        assert_eq!(overview.nodes[0].cpu.used, Some(Quantity::zero(Dimension::Cpu)));
        assert_eq!(overview.nodes[3].cpu.used, Some(Quantity::zero(Dimension::Cpu)));
        assert_eq!(overview.namespaces[0].cpu.used, Some(Quantity::zero(Dimension::Cpu)));
        assert_eq!(
            overview.cluster.cpu.used,
            Some(Quantity::parse("110m", Dimension::Cpu))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_statefulsets_failure_is_not_fatal() -> anyhow::Result<()> {
        let overview = build(&cluster().failing("statefulsets")).await?;
        assert!(overview.namespaces.iter().all(|n| n.statefulsets == 0));
        assert_eq!(overview.cluster.pods, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_events_failure_is_not_fatal() -> anyhow::Result<()> {
        let reference = build(&cluster()).await?;
        let overview = build(&cluster().failing("events")).await?;
        assert_eq!(overview.cluster.health.events, EventCounts::default());
        assert_eq!(overview.cluster.cpu, reference.cluster.cpu);
        assert_eq!(overview.cluster.memory, reference.cluster.memory);
        assert_eq!(overview.nodes, reference.nodes);
        assert_eq!(overview.namespaces, reference.namespaces);
        assert_eq!(overview.cluster.health.pods, reference.cluster.health.pods);
        Ok(())
    }

    #[tokio::test]
    async fn test_required_read_failure_is_fatal() {
        for failing in ["nodes", "pods", "namespaces", "deployments"] {
            let result = build(&cluster().failing(failing)).await;
            match result {
                Err(Error::RequiredRead { resource, source }) => {
                    assert_eq!(resource, failing);
                    assert!(matches!(source, ReadError::Unreachable { .. }));
                }
                other => panic!("{failing} failure should abort the overview, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_event_window_and_classification() {
        let events = vec![
            event("Warning", "ImagePullSlow", 10),
            event("Warning", "BackOff", 20),
            event("Error", "Whatever", 59),
            event("Warning", "FailedMount", 61),
            event("Warning", "ImagePullSlow", 120),
            event("Normal", "Pulled", 1),
            Event {
                type_: Some("Warning".to_string()),
                ..Event::default()
            },
        ];
        let counts = EventCounts::from_events(&events, now() - Duration::hours(1));
        assert_eq!(
            counts,
            EventCounts {
                warnings: 1,
                errors: 2,
            }
        );
        assert_eq!(classify_event(&event("Normal", "Pulled", 0)), None);
        assert_eq!(
            classify_event(&event("Normal", "Evicted", 0)),
            Some(EventSeverity::Error)
        );
    }

    #[tokio::test]
    async fn test_unbounded_event_window_counts_everything() -> anyhow::Result<()> {
        let port = FakePort {
            events: vec![
                event("Warning", "ImagePullSlow", 10),
                event("Warning", "ImagePullSlow", 60 * 24 * 365 * 100),
            ],
            ..cluster()
        };
        for event_window in [Duration::MAX, Duration::minutes(1_000_000_000_000)] {
            let options = OverviewOptions {
                event_window,
                ..OverviewOptions::default()
            };
            let overview = build_overview_at(&port, &options, now()).await?;
            assert_eq!(overview.cluster.health.events.warnings, 2);
        }
        assert_eq!(window_start(now(), Duration::MAX), DateTime::<Utc>::MIN_UTC);
        Ok(())
    }

    #[test]
    fn test_deployment_availability() {
        assert!(is_available(&deployment("a", "d", Some(3), Some(3))));
        assert!(!is_available(&deployment("a", "d", Some(3), Some(2))));
        assert!(!is_available(&deployment("a", "d", Some(0), Some(0))));
        assert!(!is_available(&deployment("a", "d", None, None)));
        assert!(!is_available(&deployment("a", "d", Some(1), None)));
    }

    #[test]
    fn test_pod_capacity_fallback() {
        let mut small = node("small", "1", "1Gi");
        if let Some(capacity) = small.status.as_mut().and_then(|s| s.capacity.as_mut()) {
            capacity.insert("pods".to_string(), KubeQuantity("50".to_string()));
        }
        assert_eq!(pod_capacity(&small, DEFAULT_POD_CAPACITY), 50);
        assert_eq!(pod_capacity(&node("big", "1", "1Gi"), DEFAULT_POD_CAPACITY), 110);
        assert_eq!(pod_capacity(&Node::default(), 64), 64);
    }

    #[test]
    fn test_node_role_and_readiness() {
        let mut control = node("cp", "1", "1Gi");
        control.metadata.labels = Some(BTreeMap::from([
            ("node-role.kubernetes.io/control-plane".to_string(), String::new()),
            ("node-role.kubernetes.io/master".to_string(), String::new()),
            ("kubernetes.io/hostname".to_string(), "cp".to_string()),
        ]));
        assert_eq!(node_role(&control), "control-plane,master");
        control.metadata.labels = None;
        assert_eq!(node_role(&control), "<none>");
        assert!(is_ready(&control));
        assert!(!is_ready(&Node::default()));
    }

    #[test]
    fn test_pod_phase_counts() {
        let pods = vec![
            pod("a", "1", "n", "Running", "1", "1"),
            pod("a", "2", "n", "Failed", "1", "1"),
            pod("a", "3", "n", "Succeeded", "1", "1"),
            pod("a", "4", "n", "Unknown", "1", "1"),
            Pod::default(),
        ];
        assert_eq!(
            PodPhaseCounts::from_pods(&pods),
            PodPhaseCounts {
                running: 1,
                pending: 0,
                failed: 1,
                other: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_absent_usage_is_explicit_in_json() -> anyhow::Result<()> {
        let port = FakePort {
            metrics_served: false,
            ..cluster()
        };
        let overview = build(&port).await?;
        let json = serde_json::to_value(&overview)?;
        assert_eq!(json["metrics"], "unavailable");
        assert_eq!(json["cluster"]["cpu"]["used"], serde_json::Value::Null);
        assert!(json["cluster"]["cpu"].as_object().is_some_and(|o| o.contains_key("used")));
        assert_eq!(json["cluster"]["cpu"]["total"]["dimension"], "cpu");
        assert_eq!(json["cluster"]["cpu"]["total"]["value"], 8_000_000_000.0);
        Ok(())
    }
}
