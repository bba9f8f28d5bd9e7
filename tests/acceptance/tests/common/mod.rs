//! Common test setup

pub use file_storage_provider_acceptance::*;

/// Fixtures for the compartment in `compartment_id_for_create`
///
/// Workspace runs get a value from `.cargo/config.toml`; an explicitly
/// exported `TF_VAR_`/`OCI_` setting takes precedence.
pub fn fixtures() -> Result<Fixtures, HarnessError> {
    Fixtures::from_env()
}
