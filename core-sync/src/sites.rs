//! # Site Registry
//!
//! Resolves which sites exist for a project, which provider backs each, the
//! active/remote pair this process compares, and where a site's files live
//! on this machine.
//!
//! ## Overview
//!
//! Sites are configuration, not runtime state. The registry is built once
//! from [`SyncSettings`] and [`LocalSettings`] and only read afterwards;
//! changing the active/remote pair never touches stored records.
//!
//! Every enabled project implicitly registers two `local_drive` sites unless
//! configured explicitly: the studio storage (`studio`) and this machine's
//! local site id. The `local` alias resolves to the latter wherever a site
//! name is accepted.
//!
//! ## Path Resolution
//!
//! File paths are stored as templates such as
//! `{root[work]}/demo/hero/publish/model/modelMain/v003/hero_v003.ma`.
//! [`SiteRegistry::resolve_local_path`] substitutes each root placeholder
//! with the site's root for the current platform, or this machine's override:
//!
//! ```ignore
//! let path = registry.resolve_local_path("demo", "studio", "{root[work]}/hero.ma")?;
//! assert_eq!(path, PathBuf::from("/mnt/projects/hero.ma"));
//! ```

use crate::{Result, SyncError};
use core_runtime::config::{
    LocalSettings, Platform, ProjectSyncConfig, ProviderKind, SiteConfig, SyncSettings,
    DEFAULT_SITE, LOCAL_SITE_ALIAS,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Root name used for a bare `{root}` placeholder when several roots exist
const DEFAULT_ROOT: &str = "work";

/// Read-only view over studio and machine sync configuration
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    settings: SyncSettings,
    local: LocalSettings,
    platform: Platform,
}

impl SiteRegistry {
    /// Validates both settings layers and builds the registry for the
    /// current platform.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if either layer is invalid
    pub fn new(settings: SyncSettings, local: LocalSettings) -> Result<Self> {
        settings.validate()?;
        local.validate()?;
        Ok(Self {
            settings,
            local,
            platform: Platform::current(),
        })
    }

    /// Resolve roots for another platform (render farm path previews)
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn local_site_id(&self) -> &str {
        &self.local.local_site_id
    }

    /// Settings of an enabled project
    ///
    /// # Errors
    ///
    /// Returns `ProjectNotConfigured` if the project is missing or disabled
    pub fn project(&self, project: &str) -> Result<&ProjectSyncConfig> {
        self.settings
            .project(project)
            .filter(|config| config.enabled)
            .ok_or_else(|| SyncError::ProjectNotConfigured {
                project: project.to_string(),
            })
    }

    pub fn is_enabled(&self, project: &str) -> bool {
        self.project(project).is_ok()
    }

    pub fn enabled_projects(&self) -> Vec<String> {
        self.settings
            .enabled_projects()
            .map(str::to_string)
            .collect()
    }

    /// Maps the `local` alias to this machine's site id
    pub fn resolve_alias(&self, site: &str) -> String {
        if site == LOCAL_SITE_ALIAS {
            self.local.local_site_id.clone()
        } else {
            site.to_string()
        }
    }

    /// Site this process owns for `project`
    pub fn get_active_site(&self, project: &str) -> Result<String> {
        let config = self.project(project)?;
        let site = self
            .local
            .project(project)
            .and_then(|overrides| overrides.active_site.as_deref())
            .unwrap_or(&config.active_site);
        Ok(self.resolve_alias(site))
    }

    /// Counterpart site for `project`
    pub fn get_remote_site(&self, project: &str) -> Result<String> {
        let config = self.project(project)?;
        let site = self
            .local
            .project(project)
            .and_then(|overrides| overrides.remote_site.as_deref())
            .unwrap_or(&config.remote_site);
        Ok(self.resolve_alias(site))
    }

    /// All registered site names, sorted
    pub fn sites(&self, project: &str) -> Result<Vec<String>> {
        let config = self.project(project)?;
        let mut sites: BTreeSet<String> = config.sites.keys().cloned().collect();
        sites.insert(DEFAULT_SITE.to_string());
        sites.insert(self.local.local_site_id.clone());
        Ok(sites.into_iter().collect())
    }

    pub fn is_registered(&self, project: &str, site: &str) -> Result<bool> {
        Ok(self.sites(project)?.contains(&self.resolve_alias(site)))
    }

    /// Configuration of a registered site, implicit sites included
    pub fn site_config(&self, project: &str, site: &str) -> Result<SiteConfig> {
        let config = self.project(project)?;
        let site = self.resolve_alias(site);

        if let Some(site_config) = config.sites.get(&site) {
            return Ok(site_config.clone());
        }
        if site == DEFAULT_SITE || site == self.local.local_site_id {
            return Ok(SiteConfig::local_drive());
        }

        Err(SyncError::UnknownSite {
            project: project.to_string(),
            site,
        })
    }

    pub fn get_provider_for_site(&self, project: &str, site: &str) -> Result<ProviderKind> {
        Ok(self.site_config(project, site)?.provider)
    }

    pub fn retry_limit(&self, project: &str) -> Result<u32> {
        Ok(self.project(project)?.retry_limit)
    }

    pub fn loop_delay(&self, project: &str) -> Result<Duration> {
        Ok(Duration::from_secs(self.project(project)?.loop_delay_secs))
    }

    pub fn representation_limit(&self, project: &str) -> Result<usize> {
        Ok(self.project(project)?.representation_limit)
    }

    fn root_path(&self, project: &str, site: &str, root: &str) -> Result<String> {
        let site_config = self.site_config(project, site)?;
        let site = self.resolve_alias(site);

        let overridden = self
            .local
            .project(project)
            .and_then(|overrides| overrides.roots.get(&site))
            .and_then(|roots| roots.get(root))
            .cloned();

        overridden
            .or_else(|| {
                site_config
                    .roots
                    .get(root)
                    .and_then(|path| path.for_platform(self.platform))
                    .map(str::to_string)
            })
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| SyncError::RootNotConfigured {
                site,
                root: root.to_string(),
            })
    }

    /// Root name a bare `{root}` refers to
    fn default_root_name(&self, project: &str, site: &str) -> Result<String> {
        let site_config = self.site_config(project, site)?;
        let site = self.resolve_alias(site);

        let mut names: BTreeSet<String> = site_config.roots.keys().cloned().collect();
        if let Some(roots) = self
            .local
            .project(project)
            .and_then(|overrides| overrides.roots.get(&site))
        {
            names.extend(roots.keys().cloned());
        }

        if names.len() == 1 {
            if let Some(name) = names.into_iter().next() {
                return Ok(name);
            }
        } else if names.contains(DEFAULT_ROOT) {
            return Ok(DEFAULT_ROOT.to_string());
        }

        Err(SyncError::RootNotConfigured {
            site,
            root: DEFAULT_ROOT.to_string(),
        })
    }

    /// Absolute path of a file template on `site` for this machine.
    ///
    /// # Errors
    ///
    /// - `UnknownSite` if the site is not registered
    /// - `RootNotConfigured` if a referenced root has no mapping here
    /// - `InvalidPath` if the template has an unterminated placeholder
    pub fn resolve_local_path(
        &self,
        project: &str,
        site: &str,
        relative_path: &str,
    ) -> Result<PathBuf> {
        let mut resolved = String::with_capacity(relative_path.len());
        let mut rest = relative_path;
        let mut substituted = false;

        while let Some(start) = rest.find("{root") {
            resolved.push_str(&rest[..start]);
            let tail = &rest[start..];
            let end = tail
                .find('}')
                .ok_or_else(|| SyncError::InvalidPath(relative_path.to_string()))?;
            let placeholder = &tail[..=end];

            let root_name = match placeholder {
                "{root}" => self.default_root_name(project, site)?,
                _ => placeholder
                    .strip_prefix("{root[")
                    .and_then(|p| p.strip_suffix("]}"))
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| SyncError::InvalidPath(relative_path.to_string()))?,
            };

            let root = self.root_path(project, site, &root_name)?;
            resolved.push_str(root.trim_end_matches(['/', '\\']));
            substituted = true;
            rest = &tail[end + 1..];
        }
        resolved.push_str(rest);

        if !substituted {
            let root = self.root_path(project, site, &self.default_root_name(project, site)?)?;
            let root = root.trim_end_matches(['/', '\\']);
            let relative = resolved.trim_start_matches(['/', '\\']);
            return Ok(PathBuf::from(format!("{}/{}", root, relative)));
        }

        Ok(PathBuf::from(resolved))
    }
}
