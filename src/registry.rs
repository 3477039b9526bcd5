//! Service lifecycle operations over the configuration document
//!
//! Every operation is a single load→mutate→save cycle against the
//! `ConfigStore`: either the document reflects the completed change and was
//! durably saved, or it reflects no change and an error is returned. The
//! list mutations and validation live in pure helpers over `Configuration`
//! values so the invariants are testable without a filesystem.
//!
//! There is no cross-process locking over the document; two concurrent
//! invocations race on load/save with last-write-wins.

use crate::config::{is_contained, ConfigStore, Configuration, Service, Subservice};
use crate::error::{Result, VbitError};
use crate::fetcher::Fetcher;
use crate::systemd::PipelineControl;
use crate::types::ServiceType;
use serde_json::Map;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything needed to install one service.
///
/// The caller resolves names and paths up front (catalog lookup, duplicate
/// suffixing, custom_services placement); the registry validates and
/// executes.
#[derive(Debug, Clone)]
pub struct InstallSpec {
    pub name: String,
    pub service_type: ServiceType,
    /// Absolute target path; must lie under the managed root unless `dir`
    pub path: PathBuf,
    /// Required for git/svn
    pub url: Option<String>,
    pub subservices: Vec<SubserviceSpec>,
}

/// A subservice listed in an install spec.
#[derive(Debug, Clone)]
pub struct SubserviceSpec {
    pub name: String,
    pub service_type: ServiceType,
    /// Relative to the parent service path
    pub path: PathBuf,
    pub url: String,
    pub required: bool,
    /// Optional subservice explicitly chosen for this install
    pub selected: bool,
}

impl SubserviceSpec {
    fn wanted(&self) -> bool {
        self.required || self.selected
    }
}

/// Outcome of one node of an update walk.
#[derive(Debug)]
pub struct UpdateReport {
    pub name: String,
    /// None on success
    pub error: Option<String>,
}

impl UpdateReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Resolve `settings.selected` against the installed list.
///
/// A dangling reference is reported, never silently repaired.
pub fn resolve_selected_service(config: &Configuration) -> Result<&Service> {
    let selected = config
        .settings
        .selected
        .as_deref()
        .ok_or(VbitError::NoSelection)?;
    config
        .service(selected)
        .ok_or_else(|| VbitError::SelectionNotFound(selected.to_string()))
}

/// Validate an install spec against the current configuration.
///
/// No state is mutated on failure.
fn validate_spec(config: &Configuration, spec: &InstallSpec, root: &Path) -> Result<()> {
    if spec.name.is_empty() {
        return Err(VbitError::invalid_spec("service spec has no name"));
    }
    if spec.path.as_os_str().is_empty() {
        return Err(VbitError::invalid_spec("service spec has no path"));
    }
    if config.has_service(&spec.name) {
        return Err(VbitError::NameInUse(spec.name.clone()));
    }

    match spec.service_type {
        ServiceType::Dir => {
            // adopted directory must already exist; nothing is fetched
            if !spec.path.is_dir() {
                return Err(VbitError::DirectoryNotFound(
                    spec.path.display().to_string(),
                ));
            }
        }
        ServiceType::Git | ServiceType::Svn => {
            if spec.url.as_deref().unwrap_or("").is_empty() {
                return Err(VbitError::invalid_spec(format!(
                    "service '{}' has no repository url",
                    spec.name
                )));
            }
            if !is_contained(root, &spec.path) {
                return Err(VbitError::invalid_spec(
                    "tried to install outside the managed services root",
                ));
            }
        }
    }

    for sub in spec.subservices.iter().filter(|s| s.wanted()) {
        if sub.name.is_empty() || sub.path.as_os_str().is_empty() || sub.url.is_empty() {
            return Err(VbitError::invalid_spec(format!(
                "subservice of '{}' is missing name, path, or url",
                spec.name
            )));
        }
        if !sub.service_type.is_vcs() {
            return Err(VbitError::invalid_spec(format!(
                "subservice '{}' must be git or svn",
                sub.name
            )));
        }
        if !is_contained(&spec.path, &spec.path.join(&sub.path)) {
            return Err(VbitError::invalid_spec(format!(
                "subservice '{}' escapes the service directory",
                sub.name
            )));
        }
    }

    Ok(())
}

/// Build the persisted record for a validated, fully fetched spec.
///
/// Subservice paths are stored resolved to absolute; the install-time-only
/// `selected` flag is dropped.
fn build_service_record(spec: &InstallSpec) -> Service {
    Service {
        name: spec.name.clone(),
        service_type: spec.service_type,
        path: spec.path.clone(),
        url: spec.url.clone(),
        subservices: spec
            .subservices
            .iter()
            .filter(|s| s.wanted())
            .map(|s| Subservice {
                name: s.name.clone(),
                service_type: s.service_type,
                path: spec.path.join(&s.path),
                url: Some(s.url.clone()),
                required: s.required,
            })
            .collect(),
        extra: Map::new(),
    }
}

/// Install / uninstall / select / update lifecycle over installed services.
pub struct ServiceRegistry {
    store: ConfigStore,
    fetcher: Box<dyn Fetcher>,
    control: Box<dyn PipelineControl>,
}

impl ServiceRegistry {
    pub fn new(
        store: ConfigStore,
        fetcher: Box<dyn Fetcher>,
        control: Box<dyn PipelineControl>,
    ) -> Self {
        Self {
            store,
            fetcher,
            control,
        }
    }

    /// The backing configuration store.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// The current installed list, sorted by name.
    pub fn list(&self) -> Vec<Service> {
        self.store.load().installed
    }

    /// The selected service plus the current settings, for the runner.
    pub fn resolve_selected(&self) -> Result<(Service, crate::config::Settings)> {
        let config = self.store.load();
        let service = resolve_selected_service(&config)?.clone();
        Ok((service, config.settings))
    }

    /// Mark a service as selected and restart the pipeline if one is
    /// running, so the new selection takes effect.
    pub fn select(&self, name: &str) -> Result<()> {
        let mut config = self.store.load();
        if !config.has_service(name) {
            return Err(VbitError::UnknownService(name.to_string()));
        }
        config.settings.selected = Some(name.to_string());
        self.store.save(&config)?;

        if self.control.is_active() {
            if let Err(e) = self.control.restart() {
                warn!("could not restart pipeline for new selection: {}", e);
            }
        }
        Ok(())
    }

    /// Install a service, fetching the primary resource and every wanted
    /// subservice.
    ///
    /// Atomic: a fetch or save failure removes the entire target path tree
    /// (when it lies under the managed root) and leaves the document
    /// untouched, so no partially installed service is ever recorded.
    pub fn install(&self, spec: &InstallSpec) -> Result<Service> {
        let mut config = self.store.load();
        validate_spec(&config, spec, self.store.root())?;

        if spec.service_type.is_vcs() {
            if let Err(e) = self.fetch_tree(spec) {
                self.rollback(&spec.path);
                return Err(e);
            }
        }

        let service = build_service_record(spec);
        config.installed.push(service.clone());
        config.sort_installed();

        // the first installed service becomes the selection
        if config.settings.selected.is_none() {
            config.settings.selected = Some(spec.name.clone());
        }

        if let Err(e) = self.store.save(&config) {
            if spec.service_type.is_vcs() {
                self.rollback(&spec.path);
            }
            return Err(e);
        }

        info!("installed service '{}'", spec.name);
        Ok(service)
    }

    /// Remove a service.
    ///
    /// Stops the pipeline and clears the selection when removing the
    /// selected service. The path tree is deleted only for non-dir types
    /// verified to lie under the managed root; adopted directories are
    /// never touched.
    pub fn uninstall(&self, name: &str) -> Result<()> {
        let mut config = self.store.load();
        let index = config
            .installed
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| VbitError::UnknownService(name.to_string()))?;

        if config.settings.selected.as_deref() == Some(name) {
            // stop the pipeline before deleting an active service
            if self.control.is_active() {
                if let Err(e) = self.control.stop() {
                    warn!("could not stop pipeline: {}", e);
                }
            }
            config.settings.selected = None;
        }

        let service = &config.installed[index];
        if service.service_type != ServiceType::Dir
            && is_contained(self.store.root(), &service.path)
        {
            if let Err(e) = fs::remove_dir_all(&service.path) {
                warn!("could not delete {}: {}", service.path.display(), e);
            }
        }

        config.installed.remove(index);
        self.store.save(&config)?;
        info!("uninstalled service '{}'", name);
        Ok(())
    }

    /// Pull the latest revision of a service and its subservice tree.
    ///
    /// Best-effort per node: a failing pull is recorded in the report and
    /// the walk continues with the remaining nodes.
    pub fn update(&self, name: Option<&str>) -> Result<Vec<UpdateReport>> {
        let config = self.store.load();
        let service = match name {
            Some(n) => config
                .service(n)
                .ok_or_else(|| VbitError::UnknownService(n.to_string()))?,
            None => resolve_selected_service(&config)?,
        };

        let mut reports = Vec::new();
        self.update_node(&service.name, service.service_type, &service.path, &mut reports);
        for sub in &service.subservices {
            self.update_node(&sub.name, sub.service_type, &sub.path, &mut reports);
        }
        Ok(reports)
    }

    fn update_node(
        &self,
        name: &str,
        service_type: ServiceType,
        path: &Path,
        reports: &mut Vec<UpdateReport>,
    ) {
        if service_type == ServiceType::Dir {
            return;
        }
        let error = self.fetcher.pull(service_type, path).err();
        if let Some(e) = &error {
            warn!("update of '{}' failed: {}", name, e);
        }
        reports.push(UpdateReport {
            name: name.to_string(),
            error: error.map(|e| e.to_string()),
        });
    }

    fn fetch_tree(&self, spec: &InstallSpec) -> Result<()> {
        let url = spec
            .url
            .as_deref()
            .ok_or_else(|| VbitError::invalid_spec("service spec has no url"))?;
        self.fetcher.fetch(spec.service_type, &spec.path, url)?;

        for sub in spec.subservices.iter().filter(|s| s.wanted()) {
            self.fetcher
                .fetch(sub.service_type, &spec.path.join(&sub.path), &sub.url)?;
        }
        Ok(())
    }

    /// Remove a partially installed tree, but only inside the managed root.
    fn rollback(&self, path: &Path) {
        if is_contained(self.store.root(), path) && path.exists() {
            if let Err(e) = fs::remove_dir_all(path) {
                warn!("rollback could not delete {}: {}", path.display(), e);
            }
        }
    }
}
