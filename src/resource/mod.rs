pub mod export_set;
pub mod mount_target;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use crate::client::FileStorageClient;
use crate::config::TimeoutConfig;
use crate::error::{ProviderError, Result};
use crate::state::{Address, Attributes};

/// How an attribute participates in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    /// Must be configured
    Required,
    /// May be configured; absent means absent
    Optional,
    /// May be configured; the server fills it in otherwise
    OptionalComputed,
    /// Set by the server only
    Computed,
}

/// Schema entry of one attribute
#[derive(Debug, Clone, Copy)]
pub struct AttributeSchema {
    pub name: &'static str,
    pub mode: AttributeMode,
    /// Changing the attribute destroys and recreates the resource
    pub force_new: bool,
}

impl AttributeSchema {
    pub const fn new(name: &'static str, mode: AttributeMode, force_new: bool) -> Self {
        Self {
            name,
            mode,
            force_new,
        }
    }

    pub fn is_configurable(&self) -> bool {
        self.mode != AttributeMode::Computed
    }
}

/// Value of a configured attribute before apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredValue {
    Literal(String),
    /// Attribute of another resource, known once that resource is applied
    Reference { address: Address, attribute: String },
}

/// Configured attributes of one managed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredResource {
    pub address: Address,
    pub attributes: BTreeMap<String, DesiredValue>,
}

impl DesiredResource {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            attributes: BTreeMap::new(),
        }
    }

    pub fn literal(mut self, name: &str, value: impl ToString) -> Self {
        self.attributes
            .insert(name.to_string(), DesiredValue::Literal(value.to_string()));
        self
    }

    pub fn optional(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.literal(name, v),
            None => self,
        }
    }

    pub fn reference(mut self, name: &str, address: Address, attribute: &str) -> Self {
        self.attributes.insert(
            name.to_string(),
            DesiredValue::Reference {
                address,
                attribute: attribute.to_string(),
            },
        );
        self
    }

    pub fn references(&self) -> impl Iterator<Item = &Address> {
        self.attributes.values().filter_map(|v| match v {
            DesiredValue::Reference { address, .. } => Some(address),
            DesiredValue::Literal(_) => None,
        })
    }
}

/// CRUD handler of one managed resource type
///
/// Handlers receive fully resolved attributes and return the complete
/// flattened attribute map of the remote object, `id` included.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> &'static [AttributeSchema];

    /// Creation order: lower ranks are created first and destroyed last
    fn rank(&self) -> u8;

    fn attribute(&self, name: &str) -> Option<&'static AttributeSchema> {
        self.schema().iter().find(|a| a.name == name)
    }

    async fn create(&self, desired: &Attributes) -> Result<Attributes>;

    /// Read the remote object; `None` when it no longer exists
    async fn read(&self, id: &str) -> Result<Option<Attributes>>;

    async fn update(&self, id: &str, current: &Attributes, desired: &Attributes)
        -> Result<Attributes>;

    async fn delete(&self, id: &str, current: &Attributes) -> Result<()>;
}

/// Handlers by resource type name
#[derive(Clone)]
pub struct ResourceRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn ResourceHandler>>,
}

impl ResourceRegistry {
    /// Registry with every resource type of the provider
    pub fn new(client: Arc<dyn FileStorageClient>, timeouts: TimeoutConfig) -> Self {
        let mut registry = Self {
            handlers: BTreeMap::new(),
        };
        registry.register(Arc::new(mount_target::MountTargetResource::new(
            client.clone(),
            timeouts,
        )));
        registry.register(Arc::new(export_set::ExportSetResource::new(client, timeouts)));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(handler.type_name(), handler);
    }

    pub fn get(&self, type_name: &str) -> Result<&Arc<dyn ResourceHandler>> {
        self.handlers
            .get(type_name)
            .ok_or_else(|| ProviderError::UnsupportedType(type_name.to_string()))
    }
}

/// Poll until `check` yields a value, failing after `limit`.
///
/// `check` returns `Ok(None)` to keep waiting and an error to give up early.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    limit: Duration,
    poll_interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let polled = timeout(limit, async {
        loop {
            if let Some(value) = check().await? {
                return Ok::<T, ProviderError>(value);
            }
            sleep(poll_interval).await;
        }
    })
    .await;

    match polled {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            what: what.to_string(),
            elapsed: limit,
        }),
    }
}

/// Fetch a required attribute from resolved desired attributes
pub(crate) fn required<'a>(
    type_name: &str,
    attributes: &'a Attributes,
    name: &str,
) -> Result<&'a str> {
    attributes
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ProviderError::MissingAttribute {
            address: type_name.to_string(),
            attribute: name.to_string(),
        })
}

/// Parse an optional unsigned integer attribute
pub(crate) fn parse_u64(attributes: &Attributes, name: &str) -> Result<Option<u64>> {
    attributes
        .get(name)
        .map(|v| {
            v.parse::<u64>().map_err(|_| {
                ProviderError::InvalidArgument(format!(
                    "{} must be an unsigned integer, got {:?}",
                    name, v
                ))
            })
        })
        .transpose()
}
