//! `file_storage_export_sets` data source
//!
//! Lists export sets within a compartment and availability domain, narrows
//! them server-side by the optional request fields and then client-side by
//! generic `{name, values, regex}` filters over the flattened attributes.

use std::sync::Arc;

use futures::TryStreamExt;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::client::{FileStorageClient, ListExportSetsRequest, LifecycleState};
use crate::error::{ProviderError, Result};
use crate::resource::export_set;
use crate::state::{flatten_objects, flatten_values, Address, Attributes, ResourceState};

pub const DATA_TYPE_NAME: &str = "file_storage_export_sets";

pub fn address(name: &str) -> Address {
    Address::data(DATA_TYPE_NAME, name)
}

/// Filter with every reference already resolved to a concrete value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilter {
    pub name: String,
    pub values: Vec<String>,
    pub regex: bool,
}

impl ResolvedFilter {
    fn matches(&self, item: &Attributes) -> Result<bool> {
        let Some(actual) = item.get(&self.name) else {
            return Ok(false);
        };
        if !self.regex {
            return Ok(self.values.iter().any(|v| v == actual));
        }
        for pattern in &self.values {
            let re = Regex::new(pattern).map_err(|e| {
                ProviderError::InvalidArgument(format!(
                    "filter {} has invalid regex {:?}: {}",
                    self.name, pattern, e
                ))
            })?;
            if re.is_match(actual) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Query with references resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: Option<String>,
    pub id: Option<String>,
    pub state: Option<LifecycleState>,
    pub filters: Vec<ResolvedFilter>,
}

impl ResolvedQuery {
    fn request(&self) -> ListExportSetsRequest {
        ListExportSetsRequest {
            compartment_id: self.compartment_id.clone(),
            availability_domain: self.availability_domain.clone(),
            display_name: self.display_name.clone(),
            id: self.id.clone(),
            lifecycle_state: self.state,
        }
    }

    /// Stable id of the query, derived from its inputs
    fn state_id(&self) -> String {
        let key = format!("{:?}", self);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
    }
}

/// Keep items matching every filter
pub fn apply_filters(items: Vec<Attributes>, filters: &[ResolvedFilter]) -> Result<Vec<Attributes>> {
    let mut kept = Vec::with_capacity(items.len());
    'items: for item in items {
        for filter in filters {
            if !filter.matches(&item)? {
                continue 'items;
            }
        }
        kept.push(item);
    }
    Ok(kept)
}

pub struct ExportSetsDataSource {
    client: Arc<dyn FileStorageClient>,
}

impl ExportSetsDataSource {
    pub fn new(client: Arc<dyn FileStorageClient>) -> Self {
        Self { client }
    }

    /// Run the query and build its state entry
    pub async fn read(&self, query: &ResolvedQuery) -> Result<ResourceState> {
        let listed: Vec<_> = self
            .client
            .list_export_sets(query.request())
            .try_collect()
            .await?;
        let total = listed.len();
        let items = apply_filters(
            listed.iter().map(export_set::flatten).collect(),
            &query.filters,
        )?;
        debug!(
            "Export sets query in {} returned {} item(s), {} after filters",
            query.compartment_id,
            total,
            items.len()
        );

        let mut attrs = Attributes::new();
        attrs.insert("compartment_id".to_string(), query.compartment_id.clone());
        attrs.insert(
            "availability_domain".to_string(),
            query.availability_domain.clone(),
        );
        if let Some(name) = &query.display_name {
            attrs.insert("display_name".to_string(), name.clone());
        }
        if let Some(id) = &query.id {
            attrs.insert("id".to_string(), id.clone());
        }
        if let Some(state) = query.state {
            attrs.insert("state".to_string(), state.to_string());
        }
        attrs.insert("filter.#".to_string(), query.filters.len().to_string());
        for (i, filter) in query.filters.iter().enumerate() {
            attrs.insert(format!("filter.{}.name", i), filter.name.clone());
            attrs.insert(format!("filter.{}.regex", i), filter.regex.to_string());
            flatten_values(&mut attrs, &format!("filter.{}.values", i), &filter.values);
        }
        flatten_objects(&mut attrs, "export_sets", &items);

        Ok(ResourceState::new(query.state_id(), attrs))
    }
}
