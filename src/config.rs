//! Configuration parsing and structures
//!
//! Desired state is declared in YAML. Mount targets and queries inherit their
//! compartment and availability domain from the top-level `defaults` section
//! when they do not set them; references between objects are explicit names
//! that must be declared in the same document.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::client::memory::MemoryFileStorageConfig;
use crate::client::LifecycleState;
use crate::env::substitute_env_vars;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid pattern"));

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Scope inherited by mount targets and queries
    #[serde(default)]
    pub defaults: ScopeDefaults,

    #[serde(default)]
    pub mount_targets: Vec<RawMountTargetConfig>,

    #[serde(default)]
    pub export_sets: Vec<ExportSetConfig>,

    /// Data source declarations
    #[serde(default)]
    pub data: RawDataConfig,
}

/// Top-level scope defaults
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScopeDefaults {
    pub compartment_id: Option<String>,
    pub availability_domain: Option<String>,
}

/// Mount target declaration before scope resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawMountTargetConfig {
    pub name: String,
    pub compartment_id: Option<String>,
    pub availability_domain: Option<String>,
    pub subnet_id: String,
    pub display_name: Option<String>,
    pub hostname_label: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDataConfig {
    #[serde(default)]
    pub export_sets: Vec<RawExportSetsQueryConfig>,
}

/// Export set query declaration before scope resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawExportSetsQueryConfig {
    pub name: String,
    pub compartment_id: Option<String>,
    pub availability_domain: Option<String>,
    pub display_name: Option<String>,
    pub id: Option<IdRef>,
    pub state: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub timeouts: TimeoutConfig,
    pub mount_targets: Vec<MountTargetConfig>,
    pub export_sets: Vec<ExportSetConfig>,
    pub export_set_queries: Vec<ExportSetsQueryConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Control plane the provider talks to
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process control plane, optionally persisted to a snapshot file
    Memory {
        activation_reads: Option<u32>,
        page_size: Option<usize>,
        snapshot: Option<PathBuf>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory {
            activation_reads: None,
            page_size: None,
            snapshot: None,
        }
    }
}

impl BackendConfig {
    pub fn memory_config(&self) -> MemoryFileStorageConfig {
        let defaults = MemoryFileStorageConfig::default();
        match self {
            BackendConfig::Memory {
                activation_reads,
                page_size,
                ..
            } => MemoryFileStorageConfig {
                activation_reads: activation_reads.unwrap_or(defaults.activation_reads),
                page_size: page_size.unwrap_or(defaults.page_size),
                ..defaults
            },
        }
    }

    pub fn snapshot(&self) -> Option<&Path> {
        match self {
            BackendConfig::Memory { snapshot, .. } => snapshot.as_deref(),
        }
    }
}

/// Lifecycle wait limits (e.g., "20m", "500ms")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub create: Duration,
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub update: Duration,
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub delete: Duration,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create: default_operation_timeout(),
            update: default_operation_timeout(),
            delete: default_operation_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Mount target declaration (resolved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTargetConfig {
    pub name: String,
    pub compartment_id: String,
    pub availability_domain: String,
    pub subnet_id: String,
    pub display_name: Option<String>,
    pub hostname_label: Option<String>,
    pub ip_address: Option<String>,
}

/// Export set declaration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportSetConfig {
    pub name: String,
    /// Name of the mount target this export set belongs to (force-new)
    pub mount_target: String,
    pub display_name: Option<String>,
    pub max_fs_stat_bytes: Option<u64>,
    pub max_fs_stat_files: Option<u64>,
}

/// Export set query declaration (resolved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSetsQueryConfig {
    pub name: String,
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: Option<String>,
    pub id: Option<IdRef>,
    pub state: Option<LifecycleState>,
    pub filters: Vec<FilterConfig>,
}

/// Client-side filter over flattened result attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Attribute name to test
    pub name: String,
    /// Accepted values; any may match
    pub values: Vec<IdRef>,
    /// Treat values as regular expressions
    #[serde(default)]
    pub regex: bool,
}

/// A literal identifier or a reference to one computed by another object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Literal(String),
    /// The export set the named mount target owns
    ExportSetOf { export_set_of: String },
    /// The id of the named export set resource
    ExportSet { export_set: String },
    /// The id of the named mount target resource
    MountTarget { mount_target: String },
}

impl IdRef {
    pub fn literal(value: impl Into<String>) -> Self {
        IdRef::Literal(value.into())
    }

    pub fn export_set_of(mount_target: impl Into<String>) -> Self {
        IdRef::ExportSetOf {
            export_set_of: mount_target.into(),
        }
    }

    /// Mount target name this reference depends on, if any
    fn mount_target_dependency(&self) -> Option<&str> {
        match self {
            IdRef::ExportSetOf { export_set_of } => Some(export_set_of),
            IdRef::MountTarget { mount_target } => Some(mount_target),
            _ => None,
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by applying scope defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            backend,
            timeouts,
            defaults,
            mount_targets,
            export_sets,
            data,
        } = self;

        let mount_targets = mount_targets
            .into_iter()
            .map(|raw| Self::resolve_mount_target(&defaults, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let export_set_queries = data
            .export_sets
            .into_iter()
            .map(|raw| Self::resolve_query(&defaults, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            logging,
            backend,
            timeouts,
            mount_targets,
            export_sets,
            export_set_queries,
        })
    }

    fn resolve_scope(
        defaults: &ScopeDefaults,
        what: &str,
        name: &str,
        compartment_id: Option<String>,
        availability_domain: Option<String>,
    ) -> Result<(String, String), ConfigError> {
        let compartment_id = compartment_id
            .or_else(|| defaults.compartment_id.clone())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "{} {:?} has no compartment_id (either on the {} or in defaults)",
                    what, name, what
                ))
            })?;
        let availability_domain = availability_domain
            .or_else(|| defaults.availability_domain.clone())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "{} {:?} has no availability_domain (either on the {} or in defaults)",
                    what, name, what
                ))
            })?;
        Ok((compartment_id, availability_domain))
    }

    fn resolve_mount_target(
        defaults: &ScopeDefaults,
        raw: RawMountTargetConfig,
    ) -> Result<MountTargetConfig, ConfigError> {
        let (compartment_id, availability_domain) = Self::resolve_scope(
            defaults,
            "mount target",
            &raw.name,
            raw.compartment_id,
            raw.availability_domain,
        )?;

        Ok(MountTargetConfig {
            name: raw.name,
            compartment_id,
            availability_domain,
            subnet_id: raw.subnet_id,
            display_name: raw.display_name,
            hostname_label: raw.hostname_label,
            ip_address: raw.ip_address,
        })
    }

    fn resolve_query(
        defaults: &ScopeDefaults,
        raw: RawExportSetsQueryConfig,
    ) -> Result<ExportSetsQueryConfig, ConfigError> {
        let (compartment_id, availability_domain) = Self::resolve_scope(
            defaults,
            "export set query",
            &raw.name,
            raw.compartment_id,
            raw.availability_domain,
        )?;

        let state = raw
            .state
            .map(|s| {
                s.parse::<LifecycleState>().map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "export set query {:?}: unknown state {:?}",
                        raw.name, s
                    ))
                })
            })
            .transpose()?;

        Ok(ExportSetsQueryConfig {
            name: raw.name,
            compartment_id,
            availability_domain,
            display_name: raw.display_name,
            id: raw.id,
            state,
            filters: raw.filters,
        })
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, substituting `${VAR}`
    /// references from the environment first
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    pub fn mount_target(&self, name: &str) -> Option<&MountTargetConfig> {
        self.mount_targets.iter().find(|mt| mt.name == name)
    }

    pub fn export_set(&self, name: &str) -> Option<&ExportSetConfig> {
        self.export_sets.iter().find(|es| es.name == name)
    }

    /// Validate names, references and values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for name in self.mount_targets.iter().map(|mt| &mt.name) {
            check_name("mount target", name, &mut names)?;
        }
        let mut names = HashSet::new();
        for name in self.export_sets.iter().map(|es| &es.name) {
            check_name("export set", name, &mut names)?;
        }
        let mut names = HashSet::new();
        for name in self.export_set_queries.iter().map(|q| &q.name) {
            check_name("export set query", name, &mut names)?;
        }

        for mt in &self.mount_targets {
            if mt.subnet_id.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Mount target {:?}: subnet_id cannot be empty",
                    mt.name
                )));
            }
            check_display_name("Mount target", &mt.name, mt.display_name.as_deref())?;
        }

        let mut owners: Vec<(&str, &str)> = Vec::new();
        for es in &self.export_sets {
            if self.mount_target(&es.mount_target).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Export set {:?} references undeclared mount target {:?}",
                    es.name, es.mount_target
                )));
            }
            if let Some((other, _)) = owners.iter().find(|(_, mt)| *mt == es.mount_target) {
                return Err(ConfigError::ValidationError(format!(
                    "Mount target {:?} has exactly one export set, already managed by {:?}",
                    es.mount_target, other
                )));
            }
            owners.push((&es.name, &es.mount_target));
            check_display_name("Export set", &es.name, es.display_name.as_deref())?;
        }

        for query in &self.export_set_queries {
            let refs = query
                .id
                .iter()
                .chain(query.filters.iter().flat_map(|f| f.values.iter()));
            for id_ref in refs {
                self.check_reference(&query.name, id_ref)?;
            }
            for filter in &query.filters {
                if filter.name.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "Export set query {:?}: filter name cannot be empty",
                        query.name
                    )));
                }
                if filter.regex {
                    for value in &filter.values {
                        if let IdRef::Literal(pattern) = value {
                            Regex::new(pattern).map_err(|e| {
                                ConfigError::ValidationError(format!(
                                    "Export set query {:?}: invalid filter regex {:?}: {}",
                                    query.name, pattern, e
                                ))
                            })?;
                        }
                    }
                }
            }
        }

        if self.timeouts.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeouts.poll_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    fn check_reference(&self, query: &str, id_ref: &IdRef) -> Result<(), ConfigError> {
        let declared = match id_ref {
            IdRef::Literal(_) => true,
            IdRef::ExportSet { export_set } => self.export_set(export_set).is_some(),
            other => other
                .mount_target_dependency()
                .map_or(true, |name| self.mount_target(name).is_some()),
        };
        if declared {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(format!(
                "Export set query {:?} references undeclared object in {:?}",
                query, id_ref
            )))
        }
    }
}

fn check_name<'a>(
    what: &str,
    name: &'a str,
    seen: &mut HashSet<&'a str>,
) -> Result<(), ConfigError> {
    if !NAME_PATTERN.is_match(name) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid {} name {:?}",
            what, name
        )));
    }
    if !seen.insert(name) {
        return Err(ConfigError::ValidationError(format!(
            "Duplicate {} name: {:?}",
            what, name
        )));
    }
    Ok(())
}

fn check_display_name(what: &str, name: &str, display_name: Option<&str>) -> Result<(), ConfigError> {
    match display_name {
        Some(d) if d.trim().is_empty() => Err(ConfigError::ValidationError(format!(
            "{} {:?}: display_name cannot be empty",
            what, name
        ))),
        _ => Ok(()),
    }
}

// =============================================================================
// Programmatic construction
// =============================================================================

/// Builder for composing configurations in code
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_target(mut self, mount_target: MountTargetConfig) -> Self {
        self.config.mount_targets.push(mount_target);
        self
    }

    pub fn export_set(mut self, export_set: ExportSetConfig) -> Self {
        self.config.export_sets.push(export_set);
        self
    }

    pub fn export_set_query(mut self, query: ExportSetsQueryConfig) -> Self {
        self.config.export_set_queries.push(query);
        self
    }

    /// Append every declaration of another configuration fragment
    pub fn merge(mut self, other: Config) -> Self {
        self.config.mount_targets.extend(other.mount_targets);
        self.config.export_sets.extend(other.export_sets);
        self.config.export_set_queries.extend(other.export_set_queries);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Required setting {name} is not set (tried {})", .tried.join(", "))]
    MissingSetting { name: String, tried: Vec<String> },
}
