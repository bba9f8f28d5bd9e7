//! In-process file-storage control plane
//!
//! Stands in for the remote API: mount targets start out `CREATING` and turn
//! `ACTIVE` after a configurable number of reads, every mount target owns
//! exactly one export set, and listings are paginated. The whole state can be
//! snapshotted to a YAML file so separate CLI invocations share one "cloud".

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::client::{
    CreateMountTargetDetails, ExportSet, ExportSetStream, FileStorageClient, LifecycleState,
    ListExportSetsRequest, MountTarget, UpdateExportSetDetails, UpdateMountTargetDetails,
};
use crate::error::{ProviderError, Result};

/// FSSTAT byte ceiling of a freshly created export set
pub const DEFAULT_MAX_FS_STAT_BYTES: u64 = i64::MAX as u64;
/// FSSTAT file ceiling of a freshly created export set
pub const DEFAULT_MAX_FS_STAT_FILES: u64 = i64::MAX as u64;

/// Deleted mount targets remembered for `DELETED` reads; older ones are
/// forgotten and read as not found.
pub const MAX_TOMBSTONES: usize = 64;

/// Host addresses handed out per subnet: 10.0.0.2 through 10.0.255.254
const HOST_ADDRESSES: u32 = 256 * 253;

static HOSTNAME_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,62}$").expect("valid pattern"));

/// In-memory control plane configuration
#[derive(Debug, Clone)]
pub struct MemoryFileStorageConfig {
    /// Reads of a new mount target before it reports `ACTIVE`
    pub activation_reads: u32,
    /// Maximum items per listing page
    pub page_size: usize,
    /// Region segment used in generated identifiers
    pub region: String,
}

impl Default for MemoryFileStorageConfig {
    fn default() -> Self {
        Self {
            activation_reads: 1,
            page_size: 100,
            region: "phx".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    mount_targets: Vec<MountTarget>,
    #[serde(default)]
    export_sets: Vec<ExportSet>,
    #[serde(default)]
    deleted_mount_targets: Vec<MountTarget>,
    #[serde(default)]
    next_host: u32,
}

struct Inner {
    config: MemoryFileStorageConfig,
    mount_targets: DashMap<String, MountTarget>,
    export_sets: DashMap<String, ExportSet>,
    /// Mount target id -> reads remaining before activation
    pending_reads: DashMap<String, u32>,
    /// Deleted mount targets keep answering gets with `DELETED`
    deleted: DashMap<String, MountTarget>,
    /// Tombstone ids, oldest first
    deleted_order: Mutex<VecDeque<String>>,
    next_host: AtomicU32,
}

/// In-memory implementation of [`FileStorageClient`]
#[derive(Clone)]
pub struct MemoryFileStorage {
    inner: Arc<Inner>,
}

impl MemoryFileStorage {
    pub fn new(config: MemoryFileStorageConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                mount_targets: DashMap::new(),
                export_sets: DashMap::new(),
                pending_reads: DashMap::new(),
                deleted: DashMap::new(),
                deleted_order: Mutex::new(VecDeque::new()),
                next_host: AtomicU32::new(0),
            }),
        }
    }

    /// Restore a control plane from a snapshot file; a missing file yields
    /// an empty control plane.
    pub fn load(path: &Path, config: MemoryFileStorageConfig) -> Result<Self> {
        let storage = Self::new(config);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No control plane snapshot at {:?}, starting empty", path);
                return Ok(storage);
            }
            Err(e) => return Err(ProviderError::Io(e)),
        };

        let snapshot: Snapshot = serde_yaml::from_str(&content)
            .map_err(|e| ProviderError::Backend(format!("corrupt snapshot {:?}: {}", path, e)))?;

        for mt in snapshot.mount_targets {
            storage.inner.mount_targets.insert(mt.id.clone(), mt);
        }
        for es in snapshot.export_sets {
            storage.inner.export_sets.insert(es.id.clone(), es);
        }
        for mt in snapshot.deleted_mount_targets {
            storage.remember_deleted(mt);
        }
        storage
            .inner
            .next_host
            .store(snapshot.next_host, Ordering::SeqCst);

        info!(
            "Loaded control plane snapshot from {:?} ({} mount targets)",
            path,
            storage.inner.mount_targets.len()
        );
        Ok(storage)
    }

    /// Write the control plane to a snapshot file
    ///
    /// Pending activations are not persisted: everything reloads `ACTIVE`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let activate = |state: LifecycleState| match state {
            LifecycleState::Creating => LifecycleState::Active,
            other => other,
        };

        let mut snapshot = Snapshot {
            next_host: self.inner.next_host.load(Ordering::SeqCst),
            ..Default::default()
        };
        for entry in self.inner.mount_targets.iter() {
            let mut mt = entry.value().clone();
            mt.lifecycle_state = activate(mt.lifecycle_state);
            snapshot.mount_targets.push(mt);
        }
        for entry in self.inner.export_sets.iter() {
            let mut es = entry.value().clone();
            es.lifecycle_state = activate(es.lifecycle_state);
            snapshot.export_sets.push(es);
        }
        snapshot.deleted_mount_targets = self
            .inner
            .deleted_order
            .lock()
            .iter()
            .filter_map(|id| self.inner.deleted.get(id).map(|e| e.value().clone()))
            .collect();

        snapshot.mount_targets.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.export_sets.sort_by(|a, b| a.id.cmp(&b.id));

        let content = serde_yaml::to_string(&snapshot)
            .map_err(|e| ProviderError::Backend(format!("cannot encode snapshot: {}", e)))?;
        std::fs::write(path, content)?;
        debug!("Saved control plane snapshot to {:?}", path);
        Ok(())
    }

    /// Number of live mount targets
    pub fn mount_target_count(&self) -> usize {
        self.inner.mount_targets.len()
    }

    fn generate_id(&self, kind: &str) -> String {
        format!(
            "ocid1.{}.oc1.{}.{}",
            kind,
            self.inner.config.region,
            Uuid::new_v4().simple()
        )
    }

    fn ip_in_use(&self, subnet_id: &str, ip: &str) -> bool {
        self.inner
            .mount_targets
            .iter()
            .any(|mt| mt.subnet_id == subnet_id && mt.ip_address == ip)
    }

    /// Next host address not already taken in `subnet_id`
    fn allocate_ip(&self, subnet_id: &str) -> Result<String> {
        for _ in 0..HOST_ADDRESSES {
            let n = self.inner.next_host.fetch_add(1, Ordering::SeqCst) % HOST_ADDRESSES;
            let ip = format!("10.0.{}.{}", n / 253, n % 253 + 2);
            if !self.ip_in_use(subnet_id, &ip) {
                return Ok(ip);
            }
            trace!("Skipping {} in subnet {}: already assigned", ip, subnet_id);
        }
        Err(ProviderError::Conflict(format!(
            "no free IP address left in subnet {}",
            subnet_id
        )))
    }

    fn remember_deleted(&self, mt: MountTarget) {
        let mut order = self.inner.deleted_order.lock();
        order.push_back(mt.id.clone());
        self.inner.deleted.insert(mt.id.clone(), mt);
        while order.len() > MAX_TOMBSTONES {
            if let Some(id) = order.pop_front() {
                self.inner.deleted.remove(&id);
            }
        }
    }

    /// Count one read against a creating mount target, activating it (and
    /// its export set) once the configured number of reads is reached.
    fn observe_read(&self, id: &str) {
        let activated = match self.inner.pending_reads.get_mut(id) {
            Some(mut remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => return,
        };
        if !activated {
            return;
        }

        self.inner.pending_reads.remove(id);
        let export_set_id = match self.inner.mount_targets.get_mut(id) {
            Some(mut mt) => {
                mt.lifecycle_state = LifecycleState::Active;
                mt.export_set_id.clone()
            }
            None => return,
        };
        if let Some(mut es) = self.inner.export_sets.get_mut(&export_set_id) {
            es.lifecycle_state = LifecycleState::Active;
        }
        debug!("Mount target {} is now ACTIVE", id);
    }

    fn list_page(&self, request: &ListExportSetsRequest, offset: usize) -> (Vec<ExportSet>, Option<usize>) {
        let mut matching: Vec<ExportSet> = self
            .inner
            .export_sets
            .iter()
            .filter(|e| request.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| {
            a.time_created
                .cmp(&b.time_created)
                .then_with(|| a.id.cmp(&b.id))
        });

        let page_size = self.inner.config.page_size.max(1);
        let page: Vec<ExportSet> = matching.iter().skip(offset).take(page_size).cloned().collect();
        let next = offset + page.len();
        let next = (next < matching.len()).then_some(next);
        (page, next)
    }
}

impl Default for MemoryFileStorage {
    fn default() -> Self {
        Self::new(MemoryFileStorageConfig::default())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProviderError::InvalidArgument(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn check_quota(field: &str, value: Option<u64>) -> Result<()> {
    match value {
        Some(v) if v > i64::MAX as u64 => Err(ProviderError::InvalidArgument(format!(
            "{} must not exceed {}",
            field,
            i64::MAX
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl FileStorageClient for MemoryFileStorage {
    async fn create_mount_target(&self, details: CreateMountTargetDetails) -> Result<MountTarget> {
        require("compartment_id", &details.compartment_id)?;
        require("availability_domain", &details.availability_domain)?;
        require("subnet_id", &details.subnet_id)?;

        if let Some(label) = &details.hostname_label {
            if !HOSTNAME_LABEL.is_match(label) {
                return Err(ProviderError::InvalidArgument(format!(
                    "invalid hostname_label {:?}",
                    label
                )));
            }
        }

        let ip_address = match &details.ip_address {
            Some(ip) => {
                if self.ip_in_use(&details.subnet_id, ip) {
                    return Err(ProviderError::Conflict(format!(
                        "IP address {} is already in use in subnet {}",
                        ip, details.subnet_id
                    )));
                }
                ip.clone()
            }
            None => self.allocate_ip(&details.subnet_id)?,
        };

        let now = Utc::now();
        let initial_state = if self.inner.config.activation_reads == 0 {
            LifecycleState::Active
        } else {
            LifecycleState::Creating
        };

        let mount_target_id = self.generate_id("mounttarget");
        let export_set_id = self.generate_id("exportset");
        let display_name = details
            .display_name
            .unwrap_or_else(|| format!("mounttarget{}", now.format("%Y%m%d%H%M%S")));

        let mount_target = MountTarget {
            id: mount_target_id.clone(),
            compartment_id: details.compartment_id.clone(),
            availability_domain: details.availability_domain.clone(),
            subnet_id: details.subnet_id.clone(),
            display_name: display_name.clone(),
            hostname_label: details.hostname_label,
            ip_address,
            private_ip_ids: vec![self.generate_id("privateip")],
            export_set_id: export_set_id.clone(),
            lifecycle_state: initial_state,
            time_created: now,
        };

        let export_set = ExportSet {
            id: export_set_id,
            mount_target_id: mount_target_id.clone(),
            compartment_id: details.compartment_id,
            availability_domain: details.availability_domain,
            vcn_id: format!(
                "ocid1.vcn.oc1.{}.{}",
                self.inner.config.region,
                Uuid::new_v5(&Uuid::NAMESPACE_OID, details.subnet_id.as_bytes()).simple()
            ),
            display_name: format!("{} - export set", display_name),
            max_fs_stat_bytes: DEFAULT_MAX_FS_STAT_BYTES,
            max_fs_stat_files: DEFAULT_MAX_FS_STAT_FILES,
            lifecycle_state: initial_state,
            time_created: now,
        };

        if initial_state == LifecycleState::Creating {
            self.inner
                .pending_reads
                .insert(mount_target_id.clone(), self.inner.config.activation_reads);
        }
        self.inner
            .export_sets
            .insert(export_set.id.clone(), export_set);
        self.inner
            .mount_targets
            .insert(mount_target_id.clone(), mount_target.clone());

        info!("Created mount target {}", mount_target_id);
        Ok(mount_target)
    }

    async fn get_mount_target(&self, id: &str) -> Result<MountTarget> {
        self.observe_read(id);
        if let Some(mt) = self.inner.mount_targets.get(id) {
            return Ok(mt.value().clone());
        }
        if let Some(mt) = self.inner.deleted.get(id) {
            return Ok(mt.value().clone());
        }
        Err(ProviderError::NotFound(format!("mount target {}", id)))
    }

    async fn update_mount_target(
        &self,
        id: &str,
        details: UpdateMountTargetDetails,
    ) -> Result<MountTarget> {
        let mut mt = self
            .inner
            .mount_targets
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("mount target {}", id)))?;

        if mt.lifecycle_state != LifecycleState::Active {
            return Err(ProviderError::Conflict(format!(
                "mount target {} is {}",
                id, mt.lifecycle_state
            )));
        }
        if let Some(name) = details.display_name {
            require("display_name", &name)?;
            mt.display_name = name;
        }

        debug!("Updated mount target {}", id);
        Ok(mt.value().clone())
    }

    async fn delete_mount_target(&self, id: &str) -> Result<()> {
        let (_, mut mt) = match self.inner.mount_targets.remove(id) {
            Some(entry) => entry,
            None if self.inner.deleted.contains_key(id) => return Ok(()),
            None => return Err(ProviderError::NotFound(format!("mount target {}", id))),
        };

        self.inner.pending_reads.remove(id);
        self.inner.export_sets.remove(&mt.export_set_id);
        mt.lifecycle_state = LifecycleState::Deleted;
        self.remember_deleted(mt);

        info!("Deleted mount target {}", id);
        Ok(())
    }

    async fn get_export_set(&self, id: &str) -> Result<ExportSet> {
        self.inner
            .export_sets
            .get(id)
            .map(|es| es.value().clone())
            .ok_or_else(|| ProviderError::NotFound(format!("export set {}", id)))
    }

    async fn update_export_set(
        &self,
        id: &str,
        details: UpdateExportSetDetails,
    ) -> Result<ExportSet> {
        check_quota("max_fs_stat_bytes", details.max_fs_stat_bytes)?;
        check_quota("max_fs_stat_files", details.max_fs_stat_files)?;
        if let Some(name) = &details.display_name {
            require("display_name", name)?;
        }

        let mut es = self
            .inner
            .export_sets
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("export set {}", id)))?;

        if es.lifecycle_state != LifecycleState::Active {
            return Err(ProviderError::Conflict(format!(
                "export set {} is {}",
                id, es.lifecycle_state
            )));
        }

        if let Some(name) = details.display_name {
            es.display_name = name;
        }
        if let Some(bytes) = details.max_fs_stat_bytes {
            es.max_fs_stat_bytes = bytes;
        }
        if let Some(files) = details.max_fs_stat_files {
            es.max_fs_stat_files = files;
        }

        debug!("Updated export set {}", id);
        Ok(es.value().clone())
    }

    fn list_export_sets(&self, request: ListExportSetsRequest) -> ExportSetStream {
        let storage = self.clone();
        Box::pin(stream! {
            let mut next_page = Some(0usize);
            while let Some(offset) = next_page {
                let (items, next) = storage.list_page(&request, offset);
                trace!("Listed export set page at offset {} ({} items)", offset, items.len());
                for item in items {
                    yield Ok::<ExportSet, ProviderError>(item);
                }
                next_page = next;
            }
        })
    }
}
