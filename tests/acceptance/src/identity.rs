//! Resource identity captured across steps
//!
//! Each capture appends the id found in state to an ordered log; later
//! steps compare the current id with the most recent capture to tell an
//! in-place update from a recreation.

use std::sync::Arc;

use anyhow::{anyhow, bail};
use parking_lot::Mutex;

use crate::assertions::{check_fn, from_instance_state, Check};

pub const RECREATED_ON_UPDATE: &str = "Resource recreated when it was supposed to be updated.";
pub const NOT_RECREATED: &str = "Resource was expected to be recreated but it wasn't.";

#[derive(Debug, Clone, Default)]
pub struct IdentityLog {
    ids: Arc<Mutex<Vec<String>>>,
}

impl IdentityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every captured id, oldest first
    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.ids.lock().last().cloned()
    }

    /// Record the id of `address`
    pub fn capture(&self, address: &str) -> Check {
        let log = self.clone();
        let address = address.to_string();
        check_fn(move |state| {
            let id = from_instance_state(state, &address, "id")?;
            log.ids.lock().push(id);
            Ok(())
        })
    }

    /// Record the id of `address` and require it to equal the previous capture
    pub fn assert_unchanged(&self, address: &str) -> Check {
        self.compare(address, true)
    }

    /// Record the id of `address` and require it to differ from the previous capture
    pub fn assert_changed(&self, address: &str) -> Check {
        self.compare(address, false)
    }

    fn compare(&self, address: &str, expect_same: bool) -> Check {
        let log = self.clone();
        let address = address.to_string();
        check_fn(move |state| {
            let id = from_instance_state(state, &address, "id")?;
            let previous = log
                .last()
                .ok_or_else(|| anyhow!("no identity captured before checking {}", address))?;
            log.ids.lock().push(id.clone());

            match (expect_same, previous == id) {
                (true, false) => bail!(RECREATED_ON_UPDATE),
                (false, true) => bail!(NOT_RECREATED),
                _ => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use file_storage_provider::state::{Address, Attributes, ResourceState, State};

    const ADDRESS: &str = "file_storage_export_set.test_export_set";

    fn state_with_id(id: &str) -> State {
        let mut attrs = Attributes::new();
        attrs.insert("id".to_string(), id.to_string());
        let mut state = State::new();
        state.set(
            Address::managed("file_storage_export_set", "test_export_set"),
            ResourceState::new(id, attrs),
        );
        state
    }

    #[test]
    fn test_update_then_replace() {
        let log = IdentityLog::new();
        log.capture(ADDRESS)(&state_with_id("es-1")).unwrap();
        log.assert_unchanged(ADDRESS)(&state_with_id("es-1")).unwrap();
        log.assert_changed(ADDRESS)(&state_with_id("es-2")).unwrap();
        assert_eq!(log.ids(), vec!["es-1", "es-1", "es-2"]);
    }

    #[test]
    fn test_failure_messages() {
        let log = IdentityLog::new();
        log.capture(ADDRESS)(&state_with_id("es-1")).unwrap();

        let err = log.assert_unchanged(ADDRESS)(&state_with_id("es-2")).unwrap_err();
        assert_eq!(err.to_string(), RECREATED_ON_UPDATE);

        let err = log.assert_changed(ADDRESS)(&state_with_id("es-2")).unwrap_err();
        assert_eq!(err.to_string(), NOT_RECREATED);
    }

    #[test]
    fn test_compare_without_capture() {
        let log = IdentityLog::new();
        assert!(log.assert_changed(ADDRESS)(&state_with_id("es-1")).is_err());
        assert!(log.ids().is_empty());
    }
}
