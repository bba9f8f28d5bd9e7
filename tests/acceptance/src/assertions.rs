//! State assertions for acceptance tests
//!
//! Checks are boxed closures over the state recorded after a step's apply,
//! so they can be built up front and composed into one step check.

use anyhow::{anyhow, bail, Result};
use file_storage_provider::state::{ResourceState, State};

/// A check over the state after a step
pub type Check = Box<dyn Fn(&State) -> Result<()> + Send + Sync>;

/// Wrap a closure as a check
pub fn check_fn<F>(f: F) -> Check
where
    F: Fn(&State) -> Result<()> + Send + Sync + 'static,
{
    Box::new(f)
}

fn lookup<'a>(state: &'a State, address: &str) -> Result<&'a ResourceState> {
    state
        .resource(address)
        .ok_or_else(|| anyhow!("Not found: {} in state", address))
}

/// Assert that an attribute has exactly the expected value
pub fn check_resource_attr(address: &str, key: &str, expected: impl Into<String>) -> Check {
    let address = address.to_string();
    let key = key.to_string();
    let expected = expected.into();
    check_fn(move |state| {
        let resource = lookup(state, &address)?;
        match resource.attribute(&key) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => bail!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                address,
                key,
                expected,
                actual
            ),
            None => bail!("{}: Attribute '{}' not found", address, key),
        }
    })
}

/// Assert that an attribute is present and non-empty
pub fn check_resource_attr_set(address: &str, key: &str) -> Check {
    let address = address.to_string();
    let key = key.to_string();
    check_fn(move |state| {
        let resource = lookup(state, &address)?;
        match resource.attribute(&key) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => bail!("{}: Attribute '{}' expected to be set", address, key),
        }
    })
}

/// Assert that nothing is recorded under an address
pub fn check_resource_absent(address: &str) -> Check {
    let address = address.to_string();
    check_fn(move |state| match state.resource(&address) {
        Some(resource) => bail!("{} still exists with id {}", address, resource.id),
        None => Ok(()),
    })
}

/// Assert that the object flattened under `prefix` on `address` carries
/// exactly the attributes of `other`, value for value
pub fn check_nested_object_matches(address: &str, prefix: &str, other: &str) -> Check {
    let address = address.to_string();
    let prefix = format!("{}.", prefix);
    let other = other.to_string();
    check_fn(move |state| {
        let nested = lookup(state, &address)?;
        let live = lookup(state, &other)?;

        let mut mismatches: Vec<String> = live
            .attributes
            .iter()
            .filter_map(|(key, expected)| {
                let actual = nested.attribute(&format!("{}{}", prefix, key));
                (actual != Some(expected.as_str())).then(|| {
                    format!("{}{}: expected {:?}, got {:?}", prefix, key, expected, actual)
                })
            })
            .collect();
        mismatches.extend(
            nested
                .attributes
                .keys()
                .filter_map(|key| key.strip_prefix(prefix.as_str()))
                .filter(|key| !live.attributes.contains_key(*key))
                .map(|key| format!("{}{}: not present on {}", prefix, key, other)),
        );

        if mismatches.is_empty() {
            Ok(())
        } else {
            bail!("{} does not match {}:\n{}", address, other, mismatches.join("\n"))
        }
    })
}

/// Run checks in order, stopping at the first failure
pub fn compose(checks: Vec<Check>) -> Check {
    check_fn(move |state| {
        for (i, check) in checks.iter().enumerate() {
            check(state).map_err(|e| anyhow!("Check {}/{} error: {}", i + 1, checks.len(), e))?;
        }
        Ok(())
    })
}

/// Run every check and report all failures together
pub fn compose_aggregate(checks: Vec<Check>) -> Check {
    check_fn(move |state| {
        let errors: Vec<String> = checks
            .iter()
            .enumerate()
            .filter_map(|(i, check)| {
                check(state)
                    .err()
                    .map(|e| format!("Check {}/{} error: {}", i + 1, checks.len(), e))
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(errors.join("\n")))
        }
    })
}

/// Read one attribute of a recorded resource
pub fn from_instance_state(state: &State, address: &str, key: &str) -> Result<String> {
    let resource = lookup(state, address)?;
    resource
        .attribute(key)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{}: Attribute '{}' not found", address, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use file_storage_provider::state::{Address, Attributes};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ADDRESS: &str = "file_storage_export_set.test_export_set";

    fn state() -> State {
        let mut attrs = Attributes::new();
        attrs.insert("id".to_string(), "es-1".to_string());
        attrs.insert("state".to_string(), "ACTIVE".to_string());
        attrs.insert("display_name".to_string(), String::new());
        let mut state = State::new();
        state.set(
            Address::managed("file_storage_export_set", "test_export_set"),
            ResourceState::new("es-1", attrs),
        );
        state
    }

    #[test]
    fn test_attr_checks() {
        let state = state();
        assert!(check_resource_attr(ADDRESS, "state", "ACTIVE")(&state).is_ok());
        assert!(check_resource_attr(ADDRESS, "state", "DELETED")(&state).is_err());
        assert!(check_resource_attr_set(ADDRESS, "id")(&state).is_ok());
        // Empty counts as unset
        assert!(check_resource_attr_set(ADDRESS, "display_name")(&state).is_err());
        assert!(check_resource_attr_set("file_storage_export_set.other", "id")(&state).is_err());
        assert!(check_resource_absent("file_storage_export_set.other")(&state).is_ok());
        assert!(check_resource_absent(ADDRESS)(&state).is_err());
    }

    #[test]
    fn test_compose_stops_at_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let check = compose(vec![
            check_resource_attr(ADDRESS, "state", "DELETED"),
            check_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ]);
        let err = check(&state()).unwrap_err();
        assert!(err.to_string().starts_with("Check 1/2 error"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_compose_aggregate_reports_every_failure() {
        let check = compose_aggregate(vec![
            check_resource_attr(ADDRESS, "state", "DELETED"),
            check_resource_attr_set(ADDRESS, "id"),
            check_resource_attr_set(ADDRESS, "time_created"),
        ]);
        let message = check(&state()).unwrap_err().to_string();
        assert!(message.contains("Check 1/3 error"));
        assert!(!message.contains("Check 2/3 error"));
        assert!(message.contains("Check 3/3 error"));
    }

    #[test]
    fn test_nested_object_matches() {
        let mut state = state();
        let mut listed = Attributes::new();
        listed.insert("export_sets.#".to_string(), "1".to_string());
        listed.insert("export_sets.0.id".to_string(), "es-1".to_string());
        listed.insert("export_sets.0.state".to_string(), "ACTIVE".to_string());
        listed.insert("export_sets.0.display_name".to_string(), String::new());
        let query = Address::data("file_storage_export_sets", "test_export_sets");
        state.set(query.clone(), ResourceState::new("q-1", listed.clone()));

        let check = check_nested_object_matches(
            "data.file_storage_export_sets.test_export_sets",
            "export_sets.0",
            ADDRESS,
        );
        assert!(check(&state).is_ok());

        listed.insert("export_sets.0.state".to_string(), "CREATING".to_string());
        listed.insert("export_sets.0.vcn_id".to_string(), "vcn-1".to_string());
        state.set(query, ResourceState::new("q-1", listed));
        let message = check(&state).unwrap_err().to_string();
        assert!(message.contains("export_sets.0.state"), "{}", message);
        assert!(message.contains("export_sets.0.vcn_id"), "{}", message);
        assert!(!message.contains("export_sets.0.id"), "{}", message);
    }

    #[test]
    fn test_from_instance_state() {
        let state = state();
        assert_eq!(from_instance_state(&state, ADDRESS, "id").unwrap(), "es-1");
        assert!(from_instance_state(&state, ADDRESS, "vcn_id").is_err());
    }
}
