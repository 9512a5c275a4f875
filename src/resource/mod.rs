//! Resource type metadata
//!
//! This module provides a data-driven description of the resource types the
//! extension serves. Definitions are loaded from JSON files at compile time.
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `compute.json` - Clusters
//! - `unity_catalog.json` - Catalogs, schemas, connections, storage credentials, external locations
//! - `workspace.json` - Directories, secrets, secret scopes, repos, git credentials
//!
//! # Example
//!
//! ```ignore
//! use databricks_extension::resource::get_resource;
//!
//! let cluster = get_resource("Cluster").unwrap();
//! assert_eq!(cluster.identifier_properties(), vec!["clusterId"]);
//! ```

mod registry;

pub use registry::*;
