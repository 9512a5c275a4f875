//! Bicep extension for Azure Databricks workspace resources
//!
//! Each resource kind has a handler that reconciles a desired state against
//! the workspace REST API and reports the converged actual state.

pub mod config;
pub mod databricks;
pub mod error;
pub mod handlers;
pub mod models;
pub mod resource;

pub use error::{Error, Result};
