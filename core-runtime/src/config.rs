//! # Sync Configuration Module
//!
//! Typed, validated configuration for the multi-site sync engine.
//!
//! ## Overview
//!
//! Configuration comes from two layers:
//!
//! - [`SyncSettings`] - studio-wide, per-project settings: whether sync is
//!   enabled, the default active/remote pair, retry and loop tuning, and the
//!   registered sites with their provider and root mapping.
//! - [`LocalSettings`] - per-machine overrides: this machine's local site id,
//!   and per-project active/remote choices and root paths.
//!
//! Both are loaded once (typically from JSON), validated with `validate()`,
//! and then passed by reference to the site registry.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ProjectSyncConfig, ProviderKind, SiteConfig, SyncSettings};
//!
//! let project = ProjectSyncConfig::builder()
//!     .active_site("studio")
//!     .remote_site("gdrive")
//!     .site("gdrive", SiteConfig::new(ProviderKind::GoogleDrive).with_root("work", "/VFX"))
//!     .build()?;
//!
//! let settings = SyncSettings::default().with_project("demo", project);
//! ```
//!
//! ## Error Handling
//!
//! Every failure is reported as [`Error::Config`] with an actionable message:
//!
//! ```should_panic
//! use core_runtime::config::ProjectSyncConfig;
//!
//! ProjectSyncConfig::builder()
//!     .retry_limit(0)
//!     .build()
//!     .expect("Should fail - retry limit must be positive");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Studio storage site registered for every enabled project.
pub const DEFAULT_SITE: &str = "studio";

/// Alias resolved to this machine's local site id.
pub const LOCAL_SITE_ALIAS: &str = "local";

/// Failed attempts before a file is reported as failed.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Seconds between two synchronization loops.
pub const DEFAULT_LOOP_DELAY_SECS: u64 = 60;

/// Representations handed to transfer workers per loop.
pub const DEFAULT_REPRESENTATION_LIMIT: usize = 100;

/// Storage backend behind a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Mounted filesystem (studio NAS, artist workstation)
    #[serde(rename = "local_drive")]
    LocalDrive,
    #[serde(rename = "gdrive")]
    GoogleDrive,
    #[serde(rename = "dropbox")]
    Dropbox,
    #[serde(rename = "sftp")]
    Sftp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::LocalDrive => "local_drive",
            ProviderKind::GoogleDrive => "gdrive",
            ProviderKind::Dropbox => "dropbox",
            ProviderKind::Sftp => "sftp",
        }
    }

    /// Whether synced copies live on a filesystem this process can delete from.
    pub fn is_local_drive(&self) -> bool {
        matches!(self, ProviderKind::LocalDrive)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system family, as used for root mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Darwin,
}

impl Platform {
    /// Platform this process runs on.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Darwin
        } else {
            Platform::Linux
        }
    }
}

/// Root path for one named root, either shared or per platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RootPath {
    Shared(String),
    PerPlatform {
        #[serde(default)]
        windows: Option<String>,
        #[serde(default)]
        linux: Option<String>,
        #[serde(default)]
        darwin: Option<String>,
    },
}

impl RootPath {
    pub fn for_platform(&self, platform: Platform) -> Option<&str> {
        match self {
            RootPath::Shared(path) => Some(path.as_str()),
            RootPath::PerPlatform {
                windows,
                linux,
                darwin,
            } => match platform {
                Platform::Windows => windows.as_deref(),
                Platform::Linux => linux.as_deref(),
                Platform::Darwin => darwin.as_deref(),
            },
        }
    }
}

/// One registered site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub provider: ProviderKind,
    /// Root name (`work`, `publish`, ...) to path
    #[serde(default, alias = "root")]
    pub roots: BTreeMap<String, RootPath>,
}

impl SiteConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            roots: BTreeMap::new(),
        }
    }

    pub fn local_drive() -> Self {
        Self::new(ProviderKind::LocalDrive)
    }

    /// Add a root shared by every platform
    pub fn with_root(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.roots.insert(name.into(), RootPath::Shared(path.into()));
        self
    }

    /// Add a root with a path for one platform, keeping other platforms' paths
    pub fn with_platform_root(
        mut self,
        name: impl Into<String>,
        platform: Platform,
        path: impl Into<String>,
    ) -> Self {
        let entry = self
            .roots
            .entry(name.into())
            .or_insert(RootPath::PerPlatform {
                windows: None,
                linux: None,
                darwin: None,
            });

        if let RootPath::Shared(shared) = entry {
            let shared = shared.clone();
            *entry = RootPath::PerPlatform {
                windows: Some(shared.clone()),
                linux: Some(shared.clone()),
                darwin: Some(shared),
            };
        }

        if let RootPath::PerPlatform {
            windows,
            linux,
            darwin,
        } = entry
        {
            let slot = match platform {
                Platform::Windows => windows,
                Platform::Linux => linux,
                Platform::Darwin => darwin,
            };
            *slot = Some(path.into());
        }
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_site() -> String {
    DEFAULT_SITE.to_string()
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

fn default_loop_delay() -> u64 {
    DEFAULT_LOOP_DELAY_SECS
}

fn default_representation_limit() -> usize {
    DEFAULT_REPRESENTATION_LIMIT
}

/// Sync settings for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Site owned by this process, may be the `local` alias
    #[serde(default = "default_site")]
    pub active_site: String,
    /// Counterpart site, may be the `local` alias
    #[serde(default = "default_site")]
    pub remote_site: String,
    /// Failed attempts before a file is given up on
    #[serde(default = "default_retry_limit", alias = "retry_cnt")]
    pub retry_limit: u32,
    #[serde(default = "default_loop_delay", alias = "loop_delay")]
    pub loop_delay_secs: u64,
    /// Representations planned per loop, `0` for no limit
    #[serde(default = "default_representation_limit")]
    pub representation_limit: usize,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,
}

impl Default for ProjectSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            active_site: default_site(),
            remote_site: default_site(),
            retry_limit: DEFAULT_RETRY_LIMIT,
            loop_delay_secs: DEFAULT_LOOP_DELAY_SECS,
            representation_limit: DEFAULT_REPRESENTATION_LIMIT,
            sites: BTreeMap::new(),
        }
    }
}

impl ProjectSyncConfig {
    /// Creates a new builder for constructing a `ProjectSyncConfig`.
    pub fn builder() -> ProjectSyncConfigBuilder {
        ProjectSyncConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Active and remote site names are not empty
    /// - Retry limit is positive
    /// - Active and remote sites are registered (or implicit defaults)
    /// - Site names are not empty
    pub fn validate(&self) -> Result<()> {
        if self.active_site.trim().is_empty() {
            return Err(Error::Config("Active site cannot be empty".to_string()));
        }

        if self.remote_site.trim().is_empty() {
            return Err(Error::Config("Remote site cannot be empty".to_string()));
        }

        if self.retry_limit == 0 {
            return Err(Error::Config(
                "Retry limit must be greater than 0".to_string(),
            ));
        }

        if let Some(name) = self.sites.keys().find(|name| name.trim().is_empty()) {
            return Err(Error::Config(format!(
                "Site name cannot be empty (found {:?})",
                name
            )));
        }

        for (role, site) in [("Active", &self.active_site), ("Remote", &self.remote_site)] {
            if !self.is_known_site(site) {
                return Err(Error::Config(format!(
                    "{} site '{}' is not registered. Add it under 'sites' or use '{}'/'{}'.",
                    role, site, DEFAULT_SITE, LOCAL_SITE_ALIAS
                )));
            }
        }

        Ok(())
    }

    fn is_known_site(&self, site: &str) -> bool {
        site == DEFAULT_SITE || site == LOCAL_SITE_ALIAS || self.sites.contains_key(site)
    }
}

/// Builder for constructing [`ProjectSyncConfig`] instances.
#[derive(Debug, Default)]
pub struct ProjectSyncConfigBuilder {
    enabled: Option<bool>,
    active_site: Option<String>,
    remote_site: Option<String>,
    retry_limit: Option<u32>,
    loop_delay_secs: Option<u64>,
    representation_limit: Option<usize>,
    sites: BTreeMap<String, SiteConfig>,
}

impl ProjectSyncConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn active_site(mut self, site: impl Into<String>) -> Self {
        self.active_site = Some(site.into());
        self
    }

    pub fn remote_site(mut self, site: impl Into<String>) -> Self {
        self.remote_site = Some(site.into());
        self
    }

    /// Default: 3
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    /// Default: 60 seconds
    pub fn loop_delay_secs(mut self, secs: u64) -> Self {
        self.loop_delay_secs = Some(secs);
        self
    }

    /// Default: 100
    pub fn representation_limit(mut self, limit: usize) -> Self {
        self.representation_limit = Some(limit);
        self
    }

    /// Registers a site, replacing any earlier config with the same name.
    pub fn site(mut self, name: impl Into<String>, config: SiteConfig) -> Self {
        self.sites.insert(name.into(), config);
        self
    }

    /// Builds and validates the final `ProjectSyncConfig`.
    pub fn build(self) -> Result<ProjectSyncConfig> {
        let config = ProjectSyncConfig {
            enabled: self.enabled.unwrap_or(true),
            active_site: self.active_site.unwrap_or_else(default_site),
            remote_site: self.remote_site.unwrap_or_else(default_site),
            retry_limit: self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
            loop_delay_secs: self.loop_delay_secs.unwrap_or(DEFAULT_LOOP_DELAY_SECS),
            representation_limit: self
                .representation_limit
                .unwrap_or(DEFAULT_REPRESENTATION_LIMIT),
            sites: self.sites,
        };

        config.validate()?;

        Ok(config)
    }
}

/// Studio-wide sync settings, keyed by project name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectSyncConfig>,
}

impl SyncSettings {
    pub fn with_project(mut self, name: impl Into<String>, config: ProjectSyncConfig) -> Self {
        self.projects.insert(name.into(), config);
        self
    }

    /// Parse and validate settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: SyncSettings = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid sync settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read sync settings from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// Validates every project, prefixing errors with the project name.
    pub fn validate(&self) -> Result<()> {
        for (name, project) in &self.projects {
            if name.trim().is_empty() {
                return Err(Error::Config("Project name cannot be empty".to_string()));
            }
            project.validate().map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("Project '{}': {}", name, msg)),
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn project(&self, name: &str) -> Option<&ProjectSyncConfig> {
        self.projects.get(name)
    }

    /// Names of projects with sync enabled, in name order.
    pub fn enabled_projects(&self) -> impl Iterator<Item = &str> {
        self.projects
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(name, _)| name.as_str())
    }
}

/// Per-machine overrides for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProjectOverrides {
    #[serde(default)]
    pub active_site: Option<String>,
    #[serde(default)]
    pub remote_site: Option<String>,
    /// Site name to root name to path on this machine
    #[serde(default)]
    pub roots: BTreeMap<String, BTreeMap<String, String>>,
}

/// Per-machine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Site id of this machine, target of the `local` alias
    pub local_site_id: String,
    #[serde(default)]
    pub projects: BTreeMap<String, LocalProjectOverrides>,
}

impl LocalSettings {
    pub fn new(local_site_id: impl Into<String>) -> Self {
        Self {
            local_site_id: local_site_id.into(),
            projects: BTreeMap::new(),
        }
    }

    pub fn with_project(mut self, name: impl Into<String>, overrides: LocalProjectOverrides) -> Self {
        self.projects.insert(name.into(), overrides);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: LocalSettings = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid local settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_site_id.trim().is_empty() {
            return Err(Error::Config("Local site id cannot be empty".to_string()));
        }
        if self.local_site_id == LOCAL_SITE_ALIAS {
            return Err(Error::Config(format!(
                "Local site id cannot be the '{}' alias",
                LOCAL_SITE_ALIAS
            )));
        }
        Ok(())
    }

    pub fn project(&self, name: &str) -> Option<&LocalProjectOverrides> {
        self.projects.get(name)
    }
}
