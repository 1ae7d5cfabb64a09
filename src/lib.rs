pub mod aggregate;
pub mod human_format;
pub mod metrics;
pub mod overview;
pub mod port;
pub mod qty;

use aggregate::ResourceFigure;
use clap::{Parser, ValueEnum};
use human_format::format_percentage;
use overview::{ClusterOverview, OverviewOptions, build_overview};
use port::KubeReadPort;
#[cfg(feature = "prettytable")]
use prettytable::{Cell, Row, Table, format, row};
use qty::{Quantity, percentage};
use tracing::{info, instrument, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to read {resource} from the control plane")]
    RequiredRead {
        resource: &'static str,
        source: port::ReadError,
    },

    #[error("Failed to {context}")]
    KubeError {
        context: String,
        source: kube::Error,
    },

    #[error("Failed to {context}")]
    KubeConfigError {
        context: String,
        source: kube::config::KubeconfigError,
    },

    #[error("Failed to {context}")]
    KubeInferConfigError {
        context: String,
        source: kube::config::InferConfigError,
    },

    #[error("Failed to render the overview as json")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Debug, Eq, PartialEq, ValueEnum, Clone)]
#[allow(non_camel_case_types)]
pub enum Output {
    table,
    json,
}

#[derive(Debug, Eq, PartialEq, ValueEnum, Clone)]
#[allow(non_camel_case_types)]
pub enum LogFormat {
    text,
    bunyan,
}

#[derive(Parser, Debug)]
#[command(
    version, about,
    after_help(env!("CARGO_PKG_DESCRIPTION")),
    propagate_version = true
)]
pub struct CliOpts {
    /// The name of the kubeconfig context to use
    #[arg(long, value_parser)]
    pub context: Option<String>,

    /// Output format
    #[arg(
        short,
        long,
        value_enum,
        ignore_case = true,
        default_value = "table",
        value_parser
    )]
    pub output: Output,

    /// Timeout (in seconds) of each request to the control plane
    #[arg(long, default_value_t = 10, value_parser)]
    pub request_timeout: u64,

    /// Count warning and error events of the last N minutes
    #[arg(long, default_value_t = 60, value_parser)]
    pub event_window: i64,

    /// Max pods of a node that doesn't report it
    #[arg(long, default_value_t = overview::DEFAULT_POD_CAPACITY, value_parser)]
    pub default_pod_capacity: u32,

    /// Format of the logs (written to stderr, filtered by RUST_LOG)
    #[arg(long, value_enum, ignore_case = true, default_value = "text", value_parser)]
    pub log_format: LogFormat,
}

impl From<&CliOpts> for OverviewOptions {
    fn from(cli_opts: &CliOpts) -> Self {
        OverviewOptions {
            event_window: chrono::TimeDelta::try_minutes(cli_opts.event_window.max(0))
                .unwrap_or(chrono::TimeDelta::MAX),
            default_pod_capacity: cli_opts.default_pod_capacity,
        }
    }
}

pub async fn new_client(cli_opts: &CliOpts) -> Result<kube::Client, Error> {
    let mut client_config = match cli_opts.context {
        Some(ref context) => kube::Config::from_kubeconfig(&kube::config::KubeConfigOptions {
            context: Some(context.clone()),
            ..Default::default()
        })
        .await
        .map_err(|source| Error::KubeConfigError {
            context: "create the kube client config".to_string(),
            source,
        })?,
        None => kube::Config::infer()
            .await
            .map_err(|source| Error::KubeInferConfigError {
                context: "create the kube client config".to_string(),
                source,
            })?,
    };
    let timeout = std::time::Duration::from_secs(cli_opts.request_timeout);
    client_config.connect_timeout = Some(timeout);
    client_config.read_timeout = Some(timeout);
    info!(cluster_url = client_config.cluster_url.to_string().as_str());
    kube::Client::try_from(client_config).map_err(|source| Error::KubeError {
        context: "create the kube client".to_string(),
        source,
    })
}

#[instrument]
pub async fn do_main(cli_opts: &CliOpts) -> Result<(), Error> {
    let client = new_client(cli_opts).await?;
    let port = KubeReadPort::new(client);
    let overview = build_overview(&port, &OverviewOptions::from(cli_opts)).await?;
    match &cli_opts.output {
        Output::table => display_with_prettytable(&overview),
        Output::json => display_as_json(&overview)?,
    }
    Ok(())
}

pub fn display_as_json(overview: &ClusterOverview) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(overview)?);
    Ok(())
}

/// `__` when usage was not measured, `(x%) value` otherwise.
pub fn used_cell(figure: &ResourceFigure) -> String {
    match figure.used {
        None => "__".to_string(),
        Some(ref used) => claim_cell(used, &figure.total),
    }
}

/// Percentage is only shown for scopes with a capacity.
pub fn claim_cell(qty: &Quantity, total: &Quantity) -> String {
    if total.is_zero() {
        format!("{}", qty)
    } else {
        format!("({}) {}", format_percentage(percentage(qty, total)), qty)
    }
}

#[cfg(not(feature = "prettytable"))]
pub fn display_with_prettytable(_overview: &ClusterOverview) {
    warn!("feature 'prettytable' not enabled");
}

#[cfg(feature = "prettytable")]
fn new_table() -> Table {
    let mut table = Table::new();
    let format = format::FormatBuilder::new()
        .separators(&[], format::LineSeparator::new('-', '+', '+', '+'))
        .padding(1, 1)
        .build();
    table.set_format(format);
    table
}

#[cfg(feature = "prettytable")]
fn figure_cells(figure: &ResourceFigure, style: &str) -> Vec<Cell> {
    vec![
        Cell::new(&used_cell(figure)).style_spec(style),
        Cell::new(&claim_cell(&figure.requested, &figure.total)).style_spec(style),
        Cell::new(&claim_cell(&figure.limited, &figure.total)).style_spec(style),
        Cell::new(&format!("{}", figure.total)).style_spec(style),
    ]
}

#[cfg(feature = "prettytable")]
fn figure_style(figure: &ResourceFigure) -> &'static str {
    if figure.requested > figure.limited && !figure.limited.is_zero()
        || figure.utilization().is_some_and(|u| u > 100.0)
    {
        "rFy"
    } else {
        "r"
    }
}

#[cfg(feature = "prettytable")]
pub fn display_with_prettytable(overview: &ClusterOverview) {
    let cluster = &overview.cluster;
    if !overview.metrics.is_available() {
        warn!("usage not available, require metrics-server https://github.com/kubernetes-sigs/metrics-server");
    }

    let mut table = new_table();
    table.set_titles(row![bl->"Resource", br->"Used", br->"Requested", br->"Limit", br->"Capacity"]);
    for (name, figure) in [("cpu", &cluster.cpu), ("memory", &cluster.memory)] {
        let mut cells = vec![Cell::new(name)];
        cells.extend(figure_cells(figure, figure_style(figure)));
        table.add_row(Row::new(cells));
    }
    table.add_row(row![
        "pods",
        r-> &format!("{}", cluster.pods),
        r-> "",
        r-> "",
        r-> &format!("{}", cluster.pod_capacity),
    ]);
    table.printstd();

    let health = &cluster.health;
    println!(
        "nodes: {}/{} ready, pods: {} running / {} pending / {} failed / {} other, deployments: {}/{} available, namespaces: {}, recent events: {} warnings / {} errors",
        health.ready_nodes,
        cluster.nodes,
        health.pods.running,
        health.pods.pending,
        health.pods.failed,
        health.pods.other,
        health.available_deployments,
        cluster.deployments,
        cluster.namespaces,
        health.events.warnings,
        health.events.errors,
    );

    let mut table = new_table();
    table.set_titles(row![
        bl->"Node", bl->"Role", bl->"Version", bl->"Ready",
        br->"CPU used", br->"CPU requested", br->"CPU limit", br->"CPU capacity",
        br->"Memory used", br->"Memory requested", br->"Memory limit", br->"Memory capacity",
        br->"Pods"
    ]);
    for node in &overview.nodes {
        let mut cells = vec![
            Cell::new(&node.name),
            Cell::new(&node.role),
            Cell::new(&node.version),
            Cell::new(if node.ready { "True" } else { "False" }),
        ];
        cells.extend(figure_cells(&node.cpu, figure_style(&node.cpu)));
        cells.extend(figure_cells(&node.memory, figure_style(&node.memory)));
        cells.push(Cell::new(&format!("{}/{}", node.pods, node.pod_capacity)).style_spec("r"));
        table.add_row(Row::new(cells));
    }
    table.printstd();

    let mut table = new_table();
    table.set_titles(row![
        bl->"Namespace", bl->"Status", br->"Pods", br->"Deployments", br->"StatefulSets",
        br->"CPU used", br->"CPU requested", br->"CPU limit",
        br->"Memory used", br->"Memory requested", br->"Memory limit"
    ]);
    for namespace in &overview.namespaces {
        let mut cells = vec![
            Cell::new(&namespace.name),
            Cell::new(&namespace.status),
            Cell::new(&format!("{}", namespace.pods)).style_spec("r"),
            Cell::new(&format!("{}", namespace.deployments)).style_spec("r"),
            Cell::new(&format!("{}", namespace.statefulsets)).style_spec("r"),
        ];
        for figure in [&namespace.cpu, &namespace.memory] {
            // no capacity column for namespaces
            let mut figure_cells = figure_cells(figure, figure_style(figure));
            figure_cells.pop();
            cells.extend(figure_cells);
        }
        table.add_row(Row::new(cells));
    }
    table.printstd();
}
