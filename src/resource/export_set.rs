//! `file_storage_export_set` resource
//!
//! The control plane creates one export set per mount target and deletes it
//! along with the mount target. Creating this resource therefore adopts the
//! export set of the referenced mount target and applies the configured
//! optional attributes to it; deleting it only drops it from state. Pointing
//! the resource at another mount target yields another export set, which is
//! why `mount_target_id` forces replacement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::{
    ExportSet, FileStorageClient, LifecycleState, MountTarget, UpdateExportSetDetails,
};
use crate::config::{ExportSetConfig, TimeoutConfig};
use crate::error::{ProviderError, Result};
use crate::resource::{
    mount_target, parse_u64, required, wait_until, AttributeMode, AttributeSchema,
    DesiredResource, ResourceHandler,
};
use crate::state::{Address, Attributes};

pub const TYPE_NAME: &str = "file_storage_export_set";

static SCHEMA: [AttributeSchema; 9] = [
    AttributeSchema::new("mount_target_id", AttributeMode::Required, true),
    AttributeSchema::new("display_name", AttributeMode::OptionalComputed, false),
    AttributeSchema::new("max_fs_stat_bytes", AttributeMode::OptionalComputed, false),
    AttributeSchema::new("max_fs_stat_files", AttributeMode::OptionalComputed, false),
    AttributeSchema::new("availability_domain", AttributeMode::Computed, false),
    AttributeSchema::new("compartment_id", AttributeMode::Computed, false),
    AttributeSchema::new("vcn_id", AttributeMode::Computed, false),
    AttributeSchema::new("state", AttributeMode::Computed, false),
    AttributeSchema::new("time_created", AttributeMode::Computed, false),
];

pub fn address(name: &str) -> Address {
    Address::managed(TYPE_NAME, name)
}

/// Desired attributes of an export set declaration
pub fn desired(config: &ExportSetConfig) -> DesiredResource {
    DesiredResource::new(address(&config.name))
        .reference(
            "mount_target_id",
            mount_target::address(&config.mount_target),
            "id",
        )
        .optional("display_name", config.display_name.as_ref())
        .optional("max_fs_stat_bytes", config.max_fs_stat_bytes)
        .optional("max_fs_stat_files", config.max_fs_stat_files)
}

/// Flattened attributes of an export set, shared with the export sets query
pub fn flatten(es: &ExportSet) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("id".to_string(), es.id.clone());
    attrs.insert("mount_target_id".to_string(), es.mount_target_id.clone());
    attrs.insert("availability_domain".to_string(), es.availability_domain.clone());
    attrs.insert("compartment_id".to_string(), es.compartment_id.clone());
    attrs.insert("vcn_id".to_string(), es.vcn_id.clone());
    attrs.insert("display_name".to_string(), es.display_name.clone());
    attrs.insert("max_fs_stat_bytes".to_string(), es.max_fs_stat_bytes.to_string());
    attrs.insert("max_fs_stat_files".to_string(), es.max_fs_stat_files.to_string());
    attrs.insert("state".to_string(), es.lifecycle_state.to_string());
    attrs.insert("time_created".to_string(), es.time_created.to_rfc3339());
    attrs
}

/// Fields of `desired` that differ from `current`
fn changed_fields(current: &Attributes, desired: &Attributes) -> Result<UpdateExportSetDetails> {
    let differs = |name: &str| {
        desired
            .get(name)
            .filter(|v| current.get(name) != Some(*v))
            .is_some()
    };

    Ok(UpdateExportSetDetails {
        display_name: desired
            .get("display_name")
            .filter(|_| differs("display_name"))
            .cloned(),
        max_fs_stat_bytes: parse_u64(desired, "max_fs_stat_bytes")?
            .filter(|_| differs("max_fs_stat_bytes")),
        max_fs_stat_files: parse_u64(desired, "max_fs_stat_files")?
            .filter(|_| differs("max_fs_stat_files")),
    })
}

pub struct ExportSetResource {
    client: Arc<dyn FileStorageClient>,
    timeouts: TimeoutConfig,
}

impl ExportSetResource {
    pub fn new(client: Arc<dyn FileStorageClient>, timeouts: TimeoutConfig) -> Self {
        Self { client, timeouts }
    }

    async fn wait_for_active(&self, id: &str, limit: Duration) -> Result<ExportSet> {
        wait_until(
            &format!("export set {} to become ACTIVE", id),
            limit,
            self.timeouts.poll_interval,
            move || async move {
                let es = self.client.get_export_set(id).await?;
                match es.lifecycle_state {
                    LifecycleState::Active => Ok(Some(es)),
                    state if state.is_terminal() => Err(ProviderError::UnexpectedState {
                        id: id.to_string(),
                        state: state.to_string(),
                    }),
                    _ => Ok(None),
                }
            },
        )
        .await
    }

    /// The export set only becomes usable once its mount target is ACTIVE
    async fn wait_for_mount_target(&self, id: &str, limit: Duration) -> Result<MountTarget> {
        wait_until(
            &format!("mount target {} to become ACTIVE", id),
            limit,
            self.timeouts.poll_interval,
            move || async move {
                let mt = self.client.get_mount_target(id).await?;
                match mt.lifecycle_state {
                    LifecycleState::Active => Ok(Some(mt)),
                    state if state.is_terminal() => Err(ProviderError::UnexpectedState {
                        id: id.to_string(),
                        state: state.to_string(),
                    }),
                    _ => Ok(None),
                }
            },
        )
        .await
    }

    async fn apply_changes(
        &self,
        id: &str,
        details: UpdateExportSetDetails,
        limit: Duration,
    ) -> Result<Attributes> {
        if !details.is_empty() {
            self.client.update_export_set(id, details).await?;
        }
        let es = self.wait_for_active(id, limit).await?;
        Ok(flatten(&es))
    }
}

#[async_trait]
impl ResourceHandler for ExportSetResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> &'static [AttributeSchema] {
        &SCHEMA
    }

    fn rank(&self) -> u8 {
        1
    }

    async fn create(&self, desired: &Attributes) -> Result<Attributes> {
        let mount_target_id = required(TYPE_NAME, desired, "mount_target_id")?;
        let mt = self
            .wait_for_mount_target(mount_target_id, self.timeouts.create)
            .await?;

        info!(
            "Adopting export set {} of mount target {}",
            mt.export_set_id, mount_target_id
        );
        let current = self
            .wait_for_active(&mt.export_set_id, self.timeouts.create)
            .await?;
        let details = changed_fields(&flatten(&current), desired)?;
        self.apply_changes(&mt.export_set_id, details, self.timeouts.create)
            .await
    }

    async fn read(&self, id: &str) -> Result<Option<Attributes>> {
        match self.client.get_export_set(id).await {
            Ok(es) => Ok(Some(flatten(&es))),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        id: &str,
        current: &Attributes,
        desired: &Attributes,
    ) -> Result<Attributes> {
        let details = changed_fields(current, desired)?;
        debug!("Updating export set {} in place: {:?}", id, details);
        self.apply_changes(id, details, self.timeouts.update).await
    }

    async fn delete(&self, id: &str, _current: &Attributes) -> Result<()> {
        debug!(
            "Export set {} lives as long as its mount target, removing it from state only",
            id
        );
        Ok(())
    }
}
