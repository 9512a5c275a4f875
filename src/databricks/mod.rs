//! Databricks API interaction module
//!
//! This module provides the core functionality for talking to an Azure
//! Databricks workspace: token acquisition, the HTTP layer, workspace clients
//! and their factory, plus the polling and paging helpers the handlers share.
//!
//! # Module Structure
//!
//! - [`auth`] - Bearer tokens from the environment or the Azure credential chain
//! - [`http`] - HTTP utilities for REST API calls
//! - [`client`] - Workspace client trait and typed call helpers
//! - [`factory`] - Cached per-workspace client factory
//! - [`poll`] - Fixed-interval convergence polling
//! - [`paging`] - `next_page_token` list pagination
//!
//! # Example
//!
//! ```ignore
//! use databricks_extension::databricks::{client, factory::ClientFactory};
//!
//! async fn example(factory: &dyn ClientFactory) -> databricks_extension::Result<()> {
//!     let cancel = tokio_util::sync::CancellationToken::new();
//!     let ws = factory.client("https://adb-1.azuredatabricks.net", None, &cancel).await?;
//!     let clusters: serde_json::Value = client::get(ws.as_ref(), "2.1/clusters/list", &cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod factory;
pub mod http;
pub mod paging;
pub mod poll;
