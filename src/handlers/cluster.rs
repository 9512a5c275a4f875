//! Cluster handler
//!
//! Clusters are matched by name. An existing cluster is first driven out of
//! any transient state, then edited with the full desired attribute set; a
//! missing one is created. Both paths wait for the cluster to come up and
//! read the server's view back before returning.

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode, WorkspaceClient};
use crate::databricks::paging::{fetch_all_pages, Paginated};
use crate::databricks::poll::{poll_until, PollConfig, PollOutcome};
use crate::error::{Error, Result};
use crate::models::{Cluster, ClusterIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

const LIST_PATH: &str = "2.1/clusters/list";
const CREATE_PATH: &str = "2.1/clusters/create";
const EDIT_PATH: &str = "2.1/clusters/edit";

fn get_path(cluster_id: &str) -> String {
    format!("2.1/clusters/get?cluster_id={}", encode(cluster_id))
}

/// Lifecycle state reported by the clusters API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Pending,
    Running,
    Restarting,
    Resizing,
    Terminating,
    Terminated,
    Error,
    Unknown,
}

impl ClusterState {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "RESTARTING" => Self::Restarting,
            "RESIZING" => Self::Resizing,
            "TERMINATING" => Self::Terminating,
            "TERMINATED" => Self::Terminated,
            "ERROR" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Restarting => "RESTARTING",
            Self::Resizing => "RESIZING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// States a cluster will not leave without intervention
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Error | Self::Unknown)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_state(state: &Option<String>) -> ClusterState {
    state
        .as_deref()
        .map(ClusterState::parse)
        .unwrap_or(ClusterState::Unknown)
}

/// What to do with an existing cluster before the edit call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreEdit {
    EditNow,
    WaitFor(ClusterState),
    EditDespite,
}

pub fn pre_edit_action(state: ClusterState) -> PreEdit {
    match state {
        ClusterState::Running | ClusterState::Terminated => PreEdit::EditNow,
        ClusterState::Pending | ClusterState::Resizing | ClusterState::Restarting => {
            PreEdit::WaitFor(ClusterState::Running)
        },
        ClusterState::Terminating => PreEdit::WaitFor(ClusterState::Terminated),
        ClusterState::Error | ClusterState::Unknown => PreEdit::EditDespite,
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClusterList {
    #[serde(default)]
    clusters: Vec<ClusterSummary>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl Paginated for ClusterList {
    type Item = ClusterSummary;

    fn into_page(self) -> (Vec<ClusterSummary>, Option<String>) {
        (self.clusters, self.next_page_token)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ClusterSummary {
    cluster_id: String,
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    state: Option<String>,
}

/// Subset of `clusters/get` the handler reads back
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterDetails {
    pub cluster_id: String,
    pub cluster_name: Option<String>,
    pub state: Option<String>,
    pub state_message: Option<String>,
    pub node_type_id: Option<String>,
    pub driver_node_type_id: Option<String>,
    pub single_user_name: Option<String>,
    pub policy_id: Option<String>,
    pub data_security_mode: Option<String>,
    pub runtime_engine: Option<String>,
}

impl ClusterDetails {
    pub fn state(&self) -> ClusterState {
        parse_state(&self.state)
    }
}

#[derive(Debug, Deserialize)]
struct CreateClusterResponse {
    cluster_id: String,
}

/// Create/edit payload
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    pub cluster_name: String,
    pub spark_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<WireAutoScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_node_type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_elastic_disk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_local_disk_encryption: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_attributes: Option<WireAzureAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autotermination_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_log_conf: Option<WireLogConf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_security_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spark_conf: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spark_env_vars: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WireAutoScale {
    pub min_workers: i32,
    pub max_workers: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireAzureAttributes {
    pub first_on_demand: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot_bid_max_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireLogConf {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbfs: Option<WireDestination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abfss: Option<WireDestination>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireDestination {
    pub destination: String,
}

fn non_empty_owned(value: &Option<String>) -> Option<String> {
    non_empty(value).map(str::to_string)
}

fn non_empty_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.clone())
}

/// Translate a desired cluster into the create/edit payload
///
/// Autoscale wins over a fixed worker count. Zero, empty and false values are
/// left out. The Azure block is only sent with a positive first-on-demand
/// count, and its spot price only when it parses as a number.
pub fn build_attributes(cluster: &Cluster) -> ClusterAttributes {
    let autoscale = cluster.autoscale.map(|a| WireAutoScale {
        min_workers: a.min_workers,
        max_workers: a.max_workers,
    });
    let num_workers = match autoscale {
        Some(_) => None,
        None => (cluster.num_workers > 0).then_some(cluster.num_workers),
    };

    let azure_attributes = cluster
        .azure_attributes
        .as_ref()
        .filter(|azure| azure.first_on_demand > 0)
        .map(|azure| WireAzureAttributes {
            first_on_demand: azure.first_on_demand,
            availability: non_empty_owned(&azure.availability),
            spot_bid_max_price: non_empty(&azure.spot_bid_max_price)
                .and_then(|price| price.trim().parse::<f64>().ok())
                .filter(|price| price.is_finite()),
        });

    let cluster_log_conf = cluster.cluster_log_conf.as_ref().and_then(|conf| {
        let destination = |d: &Option<crate::models::LogDestination>| {
            d.as_ref()
                .filter(|d| !d.destination.trim().is_empty())
                .map(|d| WireDestination {
                    destination: d.destination.clone(),
                })
        };
        let dbfs = destination(&conf.dbfs);
        let abfss = destination(&conf.abfss);
        (dbfs.is_some() || abfss.is_some()).then_some(WireLogConf { dbfs, abfss })
    });

    ClusterAttributes {
        cluster_id: None,
        cluster_name: cluster.cluster_name.clone(),
        spark_version: cluster.spark_version.clone(),
        num_workers,
        autoscale,
        node_type_id: non_empty_owned(&cluster.node_type_id),
        driver_node_type_id: non_empty_owned(&cluster.driver_node_type_id),
        enable_elastic_disk: cluster.enable_elastic_disk.then_some(true),
        enable_local_disk_encryption: cluster.enable_local_disk_encryption.then_some(true),
        azure_attributes,
        autotermination_minutes: (cluster.autotermination_minutes > 0)
            .then_some(cluster.autotermination_minutes),
        cluster_log_conf,
        data_security_mode: non_empty_owned(&cluster.data_security_mode),
        single_user_name: non_empty_owned(&cluster.single_user_name),
        runtime_engine: non_empty_owned(&cluster.runtime_engine),
        policy_id: non_empty_owned(&cluster.policy_id),
        spark_conf: non_empty_map(&cluster.spark_conf),
        spark_env_vars: non_empty_map(&cluster.spark_env_vars),
        custom_tags: non_empty_map(&cluster.custom_tags),
    }
}

fn validate(cluster: &Cluster) -> Result<()> {
    if cluster.cluster_name.trim().is_empty() {
        return Err(Error::validation("ClusterName is required"));
    }
    if cluster.spark_version.trim().is_empty() {
        return Err(Error::validation("SparkVersion is required"));
    }
    if cluster.num_workers < 0 {
        return Err(Error::validation("NumWorkers must not be negative"));
    }
    if let Some(autoscale) = cluster.autoscale {
        if autoscale.min_workers < 0 || autoscale.max_workers < autoscale.min_workers {
            return Err(Error::validation(format!(
                "Autoscale range is invalid: minWorkers {} maxWorkers {}",
                autoscale.min_workers, autoscale.max_workers
            )));
        }
    }
    Ok(())
}

/// Copy the server's authoritative fields onto the converged cluster
fn apply_details(cluster: &mut Cluster, details: ClusterDetails) {
    cluster.node_type_id = details.node_type_id.or(cluster.node_type_id.take());
    cluster.driver_node_type_id = details
        .driver_node_type_id
        .or(cluster.driver_node_type_id.take());
    cluster.single_user_name = details.single_user_name.or(cluster.single_user_name.take());
    cluster.policy_id = details.policy_id.or(cluster.policy_id.take());
    cluster.data_security_mode = details
        .data_security_mode
        .or(cluster.data_security_mode.take());
    cluster.runtime_engine = details.runtime_engine.or(cluster.runtime_engine.take());
    cluster.state = details.state;
}

pub struct ClusterHandler {
    ctx: HandlerContext,
    poll: PollConfig,
}

impl ClusterHandler {
    pub fn new(ctx: HandlerContext, poll: PollConfig) -> Self {
        Self { ctx, poll }
    }

    /// The unique cluster carrying `name`, if there is exactly one
    async fn find_cluster_by_name(
        &self,
        client: &dyn WorkspaceClient,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ClusterSummary>> {
        tracing::debug!("Searching for cluster named '{}'", name);
        let clusters = fetch_all_pages::<ClusterList>(client, LIST_PATH, "page_token", cancel).await?;
        let mut matches: Vec<ClusterSummary> = clusters
            .into_iter()
            .filter(|c| c.cluster_name == name)
            .collect();

        match matches.len() {
            0 => {
                tracing::info!("No cluster named '{}'", name);
                Ok(None)
            },
            1 => {
                let found = matches.pop();
                if let Some(found) = &found {
                    tracing::info!("Found cluster '{}' with id {}", name, found.cluster_id);
                }
                Ok(found)
            },
            count => {
                tracing::warn!(
                    match_count = count,
                    "Found {} clusters named '{}'; treating as not found and creating a new one",
                    count,
                    name
                );
                Ok(None)
            },
        }
    }

    /// Poll `clusters/get` until the cluster reaches `desired`
    ///
    /// ERROR and UNKNOWN end the wait immediately. A poll error is retried
    /// unless it happens on the final attempt.
    pub async fn wait_for_cluster_state(
        &self,
        client: &dyn WorkspaceClient,
        cluster_id: &str,
        desired: ClusterState,
        cancel: &CancellationToken,
    ) -> Result<ClusterDetails> {
        tracing::info!(
            "Waiting for cluster {} to reach {} (every {}s, at most {} polls)",
            cluster_id,
            desired,
            self.poll.interval.as_secs(),
            self.poll.max_attempts
        );
        let path = get_path(cluster_id);

        let outcome = poll_until(
            &self.poll,
            cancel,
            || client::get::<ClusterDetails>(client, &path, cancel),
            |details| details.state() == desired,
            |details| details.state().is_terminal_failure(),
        )
        .await?;

        match outcome {
            PollOutcome::Ready { value, attempts } => {
                tracing::info!(
                    "Cluster {} reached {} after {} poll(s)",
                    cluster_id,
                    desired,
                    attempts
                );
                Ok(value)
            },
            PollOutcome::Terminal { value, .. } => {
                tracing::error!(
                    "Cluster {} entered {} while waiting for {}: {}",
                    cluster_id,
                    value.state(),
                    desired,
                    value.state_message.as_deref().unwrap_or("no state message")
                );
                Err(Error::TerminalState {
                    cluster_id: cluster_id.to_string(),
                    desired_state: desired.to_string(),
                    state: value.state().to_string(),
                })
            },
            PollOutcome::Failed { error, attempts } => Err(Error::PollFailed {
                cluster_id: cluster_id.to_string(),
                desired_state: desired.to_string(),
                attempts,
                source: Box::new(error),
            }),
            PollOutcome::Exhausted { last, attempts } => {
                tracing::warn!(
                    "Cluster {} still {} after {} polls",
                    cluster_id,
                    last.map(|d| d.state()).unwrap_or(ClusterState::Unknown),
                    attempts
                );
                Err(Error::Timeout {
                    cluster_id: cluster_id.to_string(),
                    desired_state: desired.to_string(),
                    budget: self.poll.budget(),
                })
            },
        }
    }

    async fn update_existing(
        &self,
        client: &dyn WorkspaceClient,
        existing: ClusterSummary,
        cluster: &Cluster,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let cluster_id = existing.cluster_id;
        let mut state = parse_state(&existing.state);

        match pre_edit_action(state) {
            PreEdit::EditNow => {
                tracing::info!("Cluster {} is {}; editing now", cluster_id, state);
            },
            PreEdit::WaitFor(target) => {
                tracing::info!(
                    "Cluster {} is {}; waiting for {} before editing",
                    cluster_id,
                    state,
                    target
                );
                state = self
                    .wait_for_cluster_state(client, &cluster_id, target, cancel)
                    .await?
                    .state();
            },
            PreEdit::EditDespite => {
                tracing::warn!(
                    "Cluster {} is {}; attempting the edit anyway",
                    cluster_id,
                    state
                );
            },
        }

        let mut attributes = build_attributes(cluster);
        attributes.cluster_id = Some(cluster_id.clone());
        let _: Value = client::post(client, EDIT_PATH, &attributes, cancel).await?;
        tracing::info!("Edited cluster {}", cluster_id);

        // editing a live cluster restarts it
        if matches!(state, ClusterState::Running | ClusterState::Resizing) {
            self.wait_for_cluster_state(client, &cluster_id, ClusterState::Running, cancel)
                .await?;
        }

        Ok(cluster_id)
    }

    async fn create_new(
        &self,
        client: &dyn WorkspaceClient,
        cluster: &Cluster,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let attributes = build_attributes(cluster);
        let created: CreateClusterResponse =
            client::post(client, CREATE_PATH, &attributes, cancel).await?;
        tracing::info!(
            "Created cluster '{}' with id {}",
            cluster.cluster_name,
            created.cluster_id
        );

        self.wait_for_cluster_state(client, &created.cluster_id, ClusterState::Running, cancel)
            .await?;
        Ok(created.cluster_id)
    }

    async fn read_back(
        &self,
        client: &dyn WorkspaceClient,
        mut cluster: Cluster,
        cluster_id: String,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        match client::get::<ClusterDetails>(client, &get_path(&cluster_id), cancel).await {
            Ok(details) => apply_details(&mut cluster, details),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => tracing::warn!(
                "Could not read back cluster {}: {}; reporting desired values",
                cluster_id,
                e
            ),
        }
        cluster.cluster_id = Some(cluster_id);
        Ok(cluster)
    }
}

#[async_trait]
impl ResourceHandler for ClusterHandler {
    type Properties = Cluster;
    type Identifiers = ClusterIdentifiers;

    const RESOURCE_TYPE: &'static str = "Cluster";

    async fn create_or_update(
        &self,
        request: ResourceRequest<Cluster>,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        let cluster = request.properties;
        validate(&cluster)?;

        let client = self.ctx.client(&request.config, cancel).await?;
        let existing = self
            .find_cluster_by_name(client.as_ref(), &cluster.cluster_name, cancel)
            .await?;

        let cluster_id = match existing {
            Some(existing) => {
                self.update_existing(client.as_ref(), existing, &cluster, cancel)
                    .await?
            },
            None => self.create_new(client.as_ref(), &cluster, cancel).await?,
        };

        self.read_back(client.as_ref(), cluster, cluster_id, cancel)
            .await
    }

    fn identifiers(properties: &Cluster) -> ClusterIdentifiers {
        ClusterIdentifiers {
            cluster_id: properties.cluster_id.clone(),
        }
    }
}
