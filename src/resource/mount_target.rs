//! `file_storage_mount_target` resource

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::{
    CreateMountTargetDetails, FileStorageClient, LifecycleState, MountTarget,
    UpdateMountTargetDetails,
};
use crate::config::{MountTargetConfig, TimeoutConfig};
use crate::error::{ProviderError, Result};
use crate::resource::{
    required, wait_until, AttributeMode, AttributeSchema, DesiredResource, ResourceHandler,
};
use crate::state::{flatten_values, Address, Attributes};

pub const TYPE_NAME: &str = "file_storage_mount_target";

static SCHEMA: [AttributeSchema; 10] = [
    AttributeSchema::new("availability_domain", AttributeMode::Required, true),
    AttributeSchema::new("compartment_id", AttributeMode::Required, true),
    AttributeSchema::new("subnet_id", AttributeMode::Required, true),
    AttributeSchema::new("display_name", AttributeMode::OptionalComputed, false),
    AttributeSchema::new("hostname_label", AttributeMode::Optional, true),
    AttributeSchema::new("ip_address", AttributeMode::OptionalComputed, true),
    AttributeSchema::new("export_set_id", AttributeMode::Computed, false),
    AttributeSchema::new("private_ip_ids", AttributeMode::Computed, false),
    AttributeSchema::new("state", AttributeMode::Computed, false),
    AttributeSchema::new("time_created", AttributeMode::Computed, false),
];

/// Address of a declared mount target
pub fn address(name: &str) -> Address {
    Address::managed(TYPE_NAME, name)
}

/// Desired attributes of a mount target declaration
pub fn desired(config: &MountTargetConfig) -> DesiredResource {
    DesiredResource::new(address(&config.name))
        .literal("availability_domain", &config.availability_domain)
        .literal("compartment_id", &config.compartment_id)
        .literal("subnet_id", &config.subnet_id)
        .optional("display_name", config.display_name.as_ref())
        .optional("hostname_label", config.hostname_label.as_ref())
        .optional("ip_address", config.ip_address.as_ref())
}

/// Flattened state attributes of a mount target
pub fn flatten(mt: &MountTarget) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("id".to_string(), mt.id.clone());
    attrs.insert("availability_domain".to_string(), mt.availability_domain.clone());
    attrs.insert("compartment_id".to_string(), mt.compartment_id.clone());
    attrs.insert("subnet_id".to_string(), mt.subnet_id.clone());
    attrs.insert("display_name".to_string(), mt.display_name.clone());
    if let Some(label) = &mt.hostname_label {
        attrs.insert("hostname_label".to_string(), label.clone());
    }
    attrs.insert("ip_address".to_string(), mt.ip_address.clone());
    attrs.insert("export_set_id".to_string(), mt.export_set_id.clone());
    flatten_values(&mut attrs, "private_ip_ids", &mt.private_ip_ids);
    attrs.insert("state".to_string(), mt.lifecycle_state.to_string());
    attrs.insert("time_created".to_string(), mt.time_created.to_rfc3339());
    attrs
}

pub struct MountTargetResource {
    client: Arc<dyn FileStorageClient>,
    timeouts: TimeoutConfig,
}

impl MountTargetResource {
    pub fn new(client: Arc<dyn FileStorageClient>, timeouts: TimeoutConfig) -> Self {
        Self { client, timeouts }
    }

    async fn wait_for_active(&self, id: &str, limit: std::time::Duration) -> Result<MountTarget> {
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
}

#[async_trait]
impl ResourceHandler for MountTargetResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> &'static [AttributeSchema] {
        &SCHEMA
    }

    fn rank(&self) -> u8 {
        0
    }

    async fn create(&self, desired: &Attributes) -> Result<Attributes> {
        let details = CreateMountTargetDetails {
            compartment_id: required(TYPE_NAME, desired, "compartment_id")?.to_string(),
            availability_domain: required(TYPE_NAME, desired, "availability_domain")?.to_string(),
            subnet_id: required(TYPE_NAME, desired, "subnet_id")?.to_string(),
            display_name: desired.get("display_name").cloned(),
            hostname_label: desired.get("hostname_label").cloned(),
            ip_address: desired.get("ip_address").cloned(),
        };

        let created = self.client.create_mount_target(details).await?;
        info!("Waiting for mount target {} to become ACTIVE", created.id);
        let mt = self.wait_for_active(&created.id, self.timeouts.create).await?;
        Ok(flatten(&mt))
    }

    async fn read(&self, id: &str) -> Result<Option<Attributes>> {
        match self.client.get_mount_target(id).await {
            Ok(mt) if mt.lifecycle_state == LifecycleState::Deleted => Ok(None),
            Ok(mt) => Ok(Some(flatten(&mt))),
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
        let display_name = desired
            .get("display_name")
            .filter(|name| current.get("display_name") != Some(*name))
            .cloned();

        if display_name.is_some() {
            self.client
                .update_mount_target(id, UpdateMountTargetDetails { display_name })
                .await?;
        } else {
            debug!("Mount target {} has nothing to update in place", id);
        }

        let mt = self.wait_for_active(id, self.timeouts.update).await?;
        Ok(flatten(&mt))
    }

    async fn delete(&self, id: &str, _current: &Attributes) -> Result<()> {
        match self.client.delete_mount_target(id).await {
            Ok(()) => {}
            Err(ProviderError::NotFound(_)) => {
                debug!("Mount target {} already gone", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        wait_until(
            &format!("mount target {} to be deleted", id),
            self.timeouts.delete,
            self.timeouts.poll_interval,
            move || async move {
                let exists = self.client.mount_target_exists(id).await?;
                Ok::<_, ProviderError>((!exists).then_some(()))
            },
        )
        .await
    }
}
