pub mod memory;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// Lifecycle state reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Creating,
    Active,
    Deleting,
    Deleted,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Creating => "CREATING",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Deleting => "DELETING",
            LifecycleState::Deleted => "DELETED",
            LifecycleState::Failed => "FAILED",
        }
    }

    /// States from which the resource will never become usable again
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Deleted | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATING" => Ok(LifecycleState::Creating),
            "ACTIVE" => Ok(LifecycleState::Active),
            "DELETING" => Ok(LifecycleState::Deleting),
            "DELETED" => Ok(LifecycleState::Deleted),
            "FAILED" => Ok(LifecycleState::Failed),
            other => Err(ProviderError::InvalidArgument(format!(
                "unknown lifecycle state {:?}",
                other
            ))),
        }
    }
}

/// A mount target: the network endpoint an export set hangs off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountTarget {
    pub id: String,
    pub compartment_id: String,
    pub availability_domain: String,
    pub subnet_id: String,
    pub display_name: String,
    pub hostname_label: Option<String>,
    pub ip_address: String,
    pub private_ip_ids: Vec<String>,
    /// Export set the control plane created alongside this mount target
    pub export_set_id: String,
    pub lifecycle_state: LifecycleState,
    pub time_created: DateTime<Utc>,
}

/// An export set: quota/policy container of a mount target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSet {
    pub id: String,
    pub mount_target_id: String,
    pub compartment_id: String,
    pub availability_domain: String,
    pub vcn_id: String,
    pub display_name: String,
    /// Ceiling reported for total bytes by NFS FSSTAT
    pub max_fs_stat_bytes: u64,
    /// Ceiling reported for total files by NFS FSSTAT
    pub max_fs_stat_files: u64,
    pub lifecycle_state: LifecycleState,
    pub time_created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateMountTargetDetails {
    pub compartment_id: String,
    pub availability_domain: String,
    pub subnet_id: String,
    pub display_name: Option<String>,
    pub hostname_label: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMountTargetDetails {
    pub display_name: Option<String>,
}

/// Partial update of an export set; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateExportSetDetails {
    pub display_name: Option<String>,
    pub max_fs_stat_bytes: Option<u64>,
    pub max_fs_stat_files: Option<u64>,
}

impl UpdateExportSetDetails {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.max_fs_stat_bytes.is_none()
            && self.max_fs_stat_files.is_none()
    }
}

/// Server-side filters of the export set listing
#[derive(Debug, Clone, Default)]
pub struct ListExportSetsRequest {
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: Option<String>,
    pub id: Option<String>,
    pub lifecycle_state: Option<LifecycleState>,
}

impl ListExportSetsRequest {
    pub fn matches(&self, export_set: &ExportSet) -> bool {
        export_set.compartment_id == self.compartment_id
            && export_set.availability_domain == self.availability_domain
            && self
                .display_name
                .as_ref()
                .map_or(true, |n| &export_set.display_name == n)
            && self.id.as_ref().map_or(true, |id| &export_set.id == id)
            && self
                .lifecycle_state
                .map_or(true, |s| export_set.lifecycle_state == s)
    }
}

/// Stream type for paginated export set listings
pub type ExportSetStream = Pin<Box<dyn Stream<Item = Result<ExportSet>> + Send>>;

/// Control-plane operations the provider needs
///
/// Export sets are never created or deleted directly: the control plane
/// creates one per mount target and removes it with the mount target.
#[async_trait]
pub trait FileStorageClient: Send + Sync {
    async fn create_mount_target(&self, details: CreateMountTargetDetails) -> Result<MountTarget>;

    async fn get_mount_target(&self, id: &str) -> Result<MountTarget>;

    async fn update_mount_target(
        &self,
        id: &str,
        details: UpdateMountTargetDetails,
    ) -> Result<MountTarget>;

    /// Delete a mount target together with its export set
    async fn delete_mount_target(&self, id: &str) -> Result<()>;

    async fn get_export_set(&self, id: &str) -> Result<ExportSet>;

    async fn update_export_set(
        &self,
        id: &str,
        details: UpdateExportSetDetails,
    ) -> Result<ExportSet>;

    /// List export sets matching the request, following pagination
    fn list_export_sets(&self, request: ListExportSetsRequest) -> ExportSetStream;

    /// Check whether a mount target still exists
    ///
    /// Default implementation uses get_mount_target(); a `DELETED` mount
    /// target counts as gone.
    async fn mount_target_exists(&self, id: &str) -> Result<bool> {
        match self.get_mount_target(id).await {
            Ok(mt) => Ok(mt.lifecycle_state != LifecycleState::Deleted),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
