//! Apply plans against the control plane and keep state in step

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::FileStorageClient;
use crate::config::{Config, ExportSetsQueryConfig, IdRef, TimeoutConfig};
use crate::datasource::{self, ExportSetsDataSource, ResolvedFilter, ResolvedQuery};
use crate::error::{ProviderError, Result};
use crate::plan::{self, Action, Plan, PlannedChange};
use crate::resource::{export_set, mount_target, DesiredResource, DesiredValue, ResourceRegistry};
use crate::state::{Address, Attributes, ResourceState, State};

/// Counts of what an apply did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Apply complete! Resources: {} added, {} changed, {} destroyed.",
            self.added, self.changed, self.destroyed
        )
    }
}

/// Reconciles configurations against one control plane
pub struct Engine {
    client: Arc<dyn FileStorageClient>,
    registry: ResourceRegistry,
    export_sets: ExportSetsDataSource,
    state: Mutex<State>,
}

impl Engine {
    pub fn new(client: Arc<dyn FileStorageClient>, timeouts: TimeoutConfig) -> Self {
        Self {
            registry: ResourceRegistry::new(client.clone(), timeouts),
            export_sets: ExportSetsDataSource::new(client.clone()),
            client,
            state: Mutex::new(State::new()),
        }
    }

    /// Start from previously recorded state
    pub fn with_state(self, state: State) -> Self {
        *self.state.lock() = state;
        self
    }

    pub fn client(&self) -> Arc<dyn FileStorageClient> {
        self.client.clone()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> State {
        self.state.lock().clone()
    }

    pub fn plan(&self, config: &Config) -> Result<Plan> {
        let state = self.state.lock();
        plan::plan(config, &self.registry, &state)
    }

    /// Move the control plane and state to `config`
    pub async fn apply(&self, config: &Config) -> Result<ApplyReport> {
        let plan = self.plan(config)?;
        let mut report = ApplyReport::default();

        // Dependents go first
        for change in plan.changes.iter().rev().filter(|c| c.action.destroys()) {
            self.destroy_resource(&change.address).await?;
            report.destroyed += 1;
        }

        for change in plan.changes.iter() {
            match &change.action {
                Action::Create | Action::Replace { .. } => {
                    self.create_resource(change).await?;
                    report.added += 1;
                }
                Action::Update { changed } => {
                    debug!("Updating {} ({})", change.address, changed.join(", "));
                    self.update_resource(change).await?;
                    report.changed += 1;
                }
                Action::NoOp | Action::Delete => {}
            }
        }

        self.read_data_sources(config).await?;

        info!("{}", report);
        Ok(report)
    }

    /// Delete every managed resource and forget every data source
    pub async fn destroy(&self) -> Result<ApplyReport> {
        self.apply(&Config::default()).await
    }

    /// Re-read every managed resource, dropping the ones that vanished
    pub async fn refresh(&self) -> Result<()> {
        let managed: Vec<(Address, String)> = self
            .state
            .lock()
            .managed()
            .map(|(address, r)| (address.clone(), r.id.clone()))
            .collect();

        for (address, id) in managed {
            let handler = self.registry.get(&address.type_name)?;
            match handler.read(&id).await? {
                Some(attrs) => {
                    self.state.lock().set(address, ResourceState::new(id, attrs));
                }
                None => {
                    warn!("{} ({}) no longer exists, removing it from state", address, id);
                    self.state.lock().remove(&address);
                }
            }
        }
        Ok(())
    }

    /// Read an existing remote object into state under `address`
    pub async fn import(&self, address: &Address, id: &str) -> Result<ResourceState> {
        if !address.is_managed() {
            return Err(ProviderError::InvalidArgument(format!(
                "cannot import data source {}",
                address
            )));
        }
        let handler = self.registry.get(&address.type_name)?;
        let attrs = handler
            .read(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} with id {}", address, id)))?;

        let resource = ResourceState::new(id, attrs);
        self.state.lock().set(address.clone(), resource.clone());
        info!("Imported {} ({})", address, id);
        Ok(resource)
    }

    async fn create_resource(&self, change: &PlannedChange) -> Result<()> {
        let desired = planned_desired(change)?;
        let attrs = self.resolve(desired)?;
        let handler = self.registry.get(&change.address.type_name)?;

        info!("Creating {}", change.address);
        let created = handler.create(&attrs).await.map_err(|e| {
            error!("Failed to create {} (status {}): {}", change.address, e.status_code(), e);
            e
        })?;
        self.record(&change.address, created)
    }

    async fn update_resource(&self, change: &PlannedChange) -> Result<()> {
        let desired = planned_desired(change)?;
        let attrs = self.resolve(desired)?;
        let handler = self.registry.get(&change.address.type_name)?;
        let current = self
            .state
            .lock()
            .get(&change.address)
            .cloned()
            .ok_or_else(|| ProviderError::State(format!("{} is not in state", change.address)))?;

        info!("Updating {} ({}) in place", change.address, current.id);
        let updated = handler
            .update(&current.id, &current.attributes, &attrs)
            .await
            .map_err(|e| {
                error!("Failed to update {} (status {}): {}", change.address, e.status_code(), e);
                e
            })?;
        self.record(&change.address, updated)
    }

    async fn destroy_resource(&self, address: &Address) -> Result<()> {
        let Some(current) = self.state.lock().get(address).cloned() else {
            return Ok(());
        };
        let handler = self.registry.get(&address.type_name)?;

        info!("Destroying {} ({})", address, current.id);
        handler
            .delete(&current.id, &current.attributes)
            .await
            .map_err(|e| {
                error!("Failed to destroy {} (status {}): {}", address, e.status_code(), e);
                e
            })?;
        self.state.lock().remove(address);
        Ok(())
    }

    async fn read_data_sources(&self, config: &Config) -> Result<()> {
        let mut wanted = Vec::with_capacity(config.export_set_queries.len());
        for query in &config.export_set_queries {
            let address = datasource::address(&query.name);
            let resolved = self.resolve_query(query)?;
            let result = self.export_sets.read(&resolved).await?;
            debug!("Read {} ({})", address, result.id);
            self.state.lock().set(address.clone(), result);
            wanted.push(address);
        }

        let mut state = self.state.lock();
        let stale: Vec<Address> = state
            .data_sources()
            .map(|(address, _)| address.clone())
            .filter(|address| !wanted.contains(address))
            .collect();
        for address in stale {
            state.remove(&address);
        }
        Ok(())
    }

    fn record(&self, address: &Address, attrs: Attributes) -> Result<()> {
        let id = attrs
            .get("id")
            .cloned()
            .ok_or_else(|| ProviderError::State(format!("{} has no id after apply", address)))?;
        debug!("Recording {} ({})", address, id);
        self.state.lock().set(address.clone(), ResourceState::new(id, attrs));
        Ok(())
    }

    /// Replace references with the values recorded in state
    fn resolve(&self, desired: &DesiredResource) -> Result<Attributes> {
        let state = self.state.lock();
        desired
            .attributes
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    DesiredValue::Literal(v) => v.clone(),
                    DesiredValue::Reference { address, attribute } => state
                        .attribute(address, attribute)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ProviderError::UnknownReference(format!("{}.{}", address, attribute))
                        })?,
                };
                Ok::<_, ProviderError>((name.clone(), value))
            })
            .collect()
    }

    fn resolve_query(&self, query: &ExportSetsQueryConfig) -> Result<ResolvedQuery> {
        let state = self.state.lock();
        let id = query
            .id
            .as_ref()
            .map(|id| resolve_id(&state, id))
            .transpose()?;
        let filters = query
            .filters
            .iter()
            .map(|filter| {
                Ok::<_, ProviderError>(ResolvedFilter {
                    name: filter.name.clone(),
                    values: filter
                        .values
                        .iter()
                        .map(|v| resolve_id(&state, v))
                        .collect::<Result<Vec<_>>>()?,
                    regex: filter.regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedQuery {
            compartment_id: query.compartment_id.clone(),
            availability_domain: query.availability_domain.clone(),
            display_name: query.display_name.clone(),
            id,
            state: query.state,
            filters,
        })
    }
}

fn planned_desired(change: &PlannedChange) -> Result<&DesiredResource> {
    change
        .desired
        .as_ref()
        .ok_or_else(|| ProviderError::State(format!("no configuration for {}", change.address)))
}

fn resolve_id(state: &State, id: &IdRef) -> Result<String> {
    let (address, attribute) = match id {
        IdRef::Literal(value) => return Ok(value.clone()),
        IdRef::ExportSetOf { export_set_of } => {
            (mount_target::address(export_set_of), "export_set_id")
        }
        IdRef::ExportSet { export_set: name } => (export_set::address(name), "id"),
        IdRef::MountTarget { mount_target: name } => (mount_target::address(name), "id"),
    };
    state
        .attribute(&address, attribute)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::UnknownReference(format!("{}.{}", address, attribute)))
}
