//! Host-facing resource models
//!
//! Desired/actual state records exchanged with the Bicep host. Field names
//! are camelCase on the host side; the handlers translate them to the
//! snake_case wire payloads of the workspace API.
//!
//! - [`compute`] - clusters
//! - [`unity_catalog`] - catalogs, schemas, connections, storage credentials, external locations
//! - [`workspace`] - directories, secrets, secret scopes, repos, git credentials

pub mod compute;
pub mod unity_catalog;
pub mod workspace;

pub use compute::*;
pub use unity_catalog::*;
pub use workspace::*;

/// `skip_serializing_if` helper for flags that default to false
pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}
