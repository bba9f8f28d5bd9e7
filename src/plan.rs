//! Diff desired configuration against recorded state

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::config::Config;
use crate::datasource;
use crate::error::{ProviderError, Result};
use crate::resource::{
    export_set, mount_target, AttributeMode, DesiredResource, DesiredValue, ResourceRegistry,
};
use crate::state::{Address, State};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoOp,
    Create,
    /// In-place update of the listed attributes
    Update { changed: Vec<String> },
    /// Destroy and recreate because of the listed force-new attributes
    Replace { forced_by: Vec<String> },
    Delete,
}

impl Action {
    /// The resource gets a new identity when this action is applied
    pub fn creates(&self) -> bool {
        matches!(self, Action::Create | Action::Replace { .. })
    }

    pub fn destroys(&self) -> bool {
        matches!(self, Action::Delete | Action::Replace { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub address: Address,
    pub action: Action,
    pub rank: u8,
    /// Configured attributes; `None` for deletions
    pub desired: Option<DesiredResource>,
}

impl fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Action::NoOp => write!(f, "  {} (no changes)", self.address),
            Action::Create => write!(f, "  + {} (create)", self.address),
            Action::Update { changed } => {
                write!(f, "  ~ {} (update: {})", self.address, changed.join(", "))
            }
            Action::Replace { forced_by } => write!(
                f,
                "-/+ {} (replace, forced by {})",
                self.address,
                forced_by.join(", ")
            ),
            Action::Delete => write!(f, "  - {} (destroy)", self.address),
        }
    }
}

/// Actions for every managed address plus the data sources to read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Sorted by rank, then address
    pub changes: Vec<PlannedChange>,
    pub reads: Vec<Address>,
}

impl Plan {
    /// No managed resource would change; data source reads don't count
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|c| c.action == Action::NoOp)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.action != Action::NoOp)
    }

    pub fn get(&self, address: &Address) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| &c.address == address)
    }

    fn count(&self, f: impl Fn(&Action) -> bool) -> usize {
        self.changes.iter().filter(|c| f(&c.action)).count()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in self.pending() {
            writeln!(f, "{}", change)?;
        }
        for read in &self.reads {
            writeln!(f, " <= {} (read)", read)?;
        }
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.count(Action::creates),
            self.count(|a| matches!(a, Action::Update { .. })),
            self.count(Action::destroys),
        )
    }
}

/// Desired managed resources declared by a configuration
pub fn desired_resources(config: &Config) -> Vec<DesiredResource> {
    config
        .mount_targets
        .iter()
        .map(mount_target::desired)
        .chain(config.export_sets.iter().map(export_set::desired))
        .collect()
}

/// Compute the plan that moves `state` to `config`
pub fn plan(config: &Config, registry: &ResourceRegistry, state: &State) -> Result<Plan> {
    let mut desired = Vec::new();
    for resource in desired_resources(config) {
        let rank = registry.get(&resource.address.type_name)?.rank();
        desired.push((rank, resource));
    }
    desired.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.address.cmp(&b.address)));

    let declared: BTreeSet<Address> = desired.iter().map(|(_, r)| r.address.clone()).collect();
    for (_, resource) in &desired {
        if let Some(missing) = resource.references().find(|a| !declared.contains(*a)) {
            return Err(ProviderError::UnknownReference(format!(
                "{} references undeclared {}",
                resource.address, missing
            )));
        }
    }

    // Dependencies have lower ranks, so their actions are known by the time
    // a dependent is diffed.
    let mut actions: BTreeMap<Address, Action> = BTreeMap::new();
    let mut changes = Vec::new();
    for (rank, resource) in desired {
        let action = diff(&resource, registry, state, &actions)?;
        debug!("Planned {:?} for {}", action, resource.address);
        actions.insert(resource.address.clone(), action.clone());
        changes.push(PlannedChange {
            address: resource.address.clone(),
            action,
            rank,
            desired: Some(resource),
        });
    }

    for (address, _) in state.managed() {
        if declared.contains(address) {
            continue;
        }
        let rank = registry.get(&address.type_name)?.rank();
        changes.push(PlannedChange {
            address: address.clone(),
            action: Action::Delete,
            rank,
            desired: None,
        });
    }
    changes.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.address.cmp(&b.address)));

    let reads = config
        .export_set_queries
        .iter()
        .map(|q| datasource::address(&q.name))
        .collect();

    Ok(Plan { changes, reads })
}

fn diff(
    resource: &DesiredResource,
    registry: &ResourceRegistry,
    state: &State,
    planned: &BTreeMap<Address, Action>,
) -> Result<Action> {
    let handler = registry.get(&resource.address.type_name)?;

    for attr in handler.schema() {
        if attr.mode == AttributeMode::Required && !resource.attributes.contains_key(attr.name) {
            return Err(ProviderError::MissingAttribute {
                address: resource.address.to_string(),
                attribute: attr.name.to_string(),
            });
        }
    }

    let Some(current) = state.get(&resource.address) else {
        return Ok(Action::Create);
    };

    let mut changed = Vec::new();
    let mut forced_by = Vec::new();
    for attr in handler.schema().iter().filter(|a| a.is_configurable()) {
        let recorded = current.attribute(attr.name);
        let differs = match resource.attributes.get(attr.name) {
            Some(DesiredValue::Literal(value)) => recorded != Some(value.as_str()),
            Some(DesiredValue::Reference { address, attribute }) => {
                let unknown = planned.get(address).map_or(false, Action::creates);
                unknown || recorded.is_none() || state.attribute(address, attribute) != recorded
            }
            None => attr.mode == AttributeMode::Optional && recorded.is_some(),
        };
        if differs {
            changed.push(attr.name.to_string());
            if attr.force_new {
                forced_by.push(attr.name.to_string());
            }
        }
    }

    Ok(if !forced_by.is_empty() {
        Action::Replace { forced_by }
    } else if !changed.is_empty() {
        Action::Update { changed }
    } else {
        Action::NoOp
    })
}
