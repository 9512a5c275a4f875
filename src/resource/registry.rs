//! Resource Registry - Load resource type definitions from JSON
//!
//! This module loads the resource type metadata the host shows in plans
//! (API version, descriptions, property flags) from embedded JSON files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/compute.json"),
    include_str!("../resources/unity_catalog.json"),
    include_str!("../resources/workspace.json"),
];

/// Property definition from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Must be supplied by the caller
    #[serde(default)]
    pub required: bool,
    /// Reported by the service, ignored on input
    #[serde(default)]
    pub read_only: bool,
    /// Part of the resource's identifiers
    #[serde(default)]
    pub identifier: bool,
    /// Accepted on input, never reported back by the service
    #[serde(default)]
    pub write_only: bool,
}

/// Resource type definition from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    pub api_version: String,
    pub description: String,
    pub properties: BTreeMap<String, PropertyDef>,
}

impl ResourceDef {
    /// Names of the properties that identify a resource of this type
    pub fn identifier_properties(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.identifier)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig::default();

        for content in RESOURCE_FILES {
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource type definition by name
pub fn get_resource(resource_type: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(resource_type)
}

/// Get all resource type names, sorted
pub fn get_all_resource_types() -> Vec<&'static str> {
    get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect()
}
