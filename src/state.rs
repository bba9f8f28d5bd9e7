//! Persisted provider state
//!
//! Every managed resource and data source is recorded under its address with
//! a flat `key -> string` attribute map. Lists are flattened as `name.#`
//! (element count) followed by `name.N.field` or `name.N` entries, which is
//! the shape the acceptance assertions address attributes by.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, Result};

/// Flat attribute map of one resource
pub type Attributes = BTreeMap<String, String>;

/// Whether an address names a managed resource or a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Managed,
    Data,
}

/// `<type>.<name>` or `data.<type>.<name>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub mode: Mode,
    pub type_name: String,
    pub name: String,
}

impl Address {
    pub fn managed(type_name: &str, name: &str) -> Self {
        Self {
            mode: Mode::Managed,
            type_name: type_name.to_string(),
            name: name.to_string(),
        }
    }

    pub fn data(type_name: &str, name: &str) -> Self {
        Self {
            mode: Mode::Data,
            type_name: type_name.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_managed(&self) -> bool {
        self.mode == Mode::Managed
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::Managed => write!(f, "{}.{}", self.type_name, self.name),
            Mode::Data => write!(f, "data.{}.{}", self.type_name, self.name),
        }
    }
}

impl FromStr for Address {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["data", type_name, name] => Ok(Address::data(type_name, name)),
            [type_name, name] if *type_name != "data" => Ok(Address::managed(type_name, name)),
            _ => Err(ProviderError::InvalidArgument(format!(
                "invalid resource address {:?}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = ProviderError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Recorded state of one resource or data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// All recorded resources, keyed by address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Incremented on every mutation
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub resources: BTreeMap<Address, ResourceState>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    /// Look a resource up by its textual address
    pub fn resource(&self, address: &str) -> Option<&ResourceState> {
        let address: Address = address.parse().ok()?;
        self.resources.get(&address)
    }

    pub fn attribute(&self, address: &Address, key: &str) -> Option<&str> {
        self.get(address).and_then(|r| r.attribute(key))
    }

    pub fn set(&mut self, address: Address, resource: ResourceState) {
        self.serial += 1;
        self.resources.insert(address, resource);
    }

    pub fn remove(&mut self, address: &Address) -> Option<ResourceState> {
        let removed = self.resources.remove(address);
        if removed.is_some() {
            self.serial += 1;
        }
        removed
    }

    pub fn managed(&self) -> impl Iterator<Item = (&Address, &ResourceState)> {
        self.resources.iter().filter(|(a, _)| a.is_managed())
    }

    pub fn data_sources(&self) -> impl Iterator<Item = (&Address, &ResourceState)> {
        self.resources.iter().filter(|(a, _)| !a.is_managed())
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ProviderError::State(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| ProviderError::State(e.to_string()))
    }

    /// Load state from a file; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {:?}, starting empty", path);
                Ok(Self::new())
            }
            Err(e) => Err(ProviderError::Io(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        debug!("Saved state serial {} to {:?}", self.serial, path);
        Ok(())
    }
}

/// Flatten a list of plain values under `prefix`
pub fn flatten_values(attributes: &mut Attributes, prefix: &str, values: &[String]) {
    attributes.insert(format!("{}.#", prefix), values.len().to_string());
    for (i, value) in values.iter().enumerate() {
        attributes.insert(format!("{}.{}", prefix, i), value.clone());
    }
}

/// Flatten a list of nested attribute maps under `prefix`
pub fn flatten_objects(attributes: &mut Attributes, prefix: &str, objects: &[Attributes]) {
    attributes.insert(format!("{}.#", prefix), objects.len().to_string());
    for (i, object) in objects.iter().enumerate() {
        for (key, value) in object {
            attributes.insert(format!("{}.{}.{}", prefix, i, key), value.clone());
        }
    }
}
