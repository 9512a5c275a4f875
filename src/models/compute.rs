use super::is_false;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier record of a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

/// Databricks all-purpose cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Server-assigned id (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    pub cluster_name: String,
    pub spark_version: String,
    #[serde(default)]
    pub num_workers: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<AutoScale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_node_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_elastic_disk: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_local_disk_encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_attributes: Option<AzureAttributes>,
    #[serde(default)]
    pub autotermination_minutes: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_log_conf: Option<StorageInfo>,
    /// NONE, SINGLE_USER, USER_ISOLATION, LEGACY_TABLE_ACL, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_security_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_user_name: Option<String>,
    /// STANDARD or PHOTON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_env_vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_tags: BTreeMap<String, String>,
    /// Lifecycle state reported after reconciliation (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScale {
    pub min_workers: i32,
    pub max_workers: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureAttributes {
    /// On-demand nodes placed before spot nodes
    #[serde(default)]
    pub first_on_demand: i32,
    /// ON_DEMAND_AZURE, SPOT_AZURE or SPOT_WITH_FALLBACK_AZURE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
    /// Max spot price, as a number in a string (-1 means on-demand price)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_bid_max_price: Option<String>,
}

/// Cluster log delivery target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbfs: Option<LogDestination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abfss: Option<LogDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDestination {
    pub destination: String,
}
