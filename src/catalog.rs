//! Known-services catalog
//!
//! The catalog (`known_services.json`) is a read-only document listing the
//! services a user can install by name. Entries are either concrete
//! installable services or `group` entries holding a nested `services` list
//! used purely for presentation grouping.

use crate::error::{Result, VbitError};
use crate::types::ServiceType;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// One catalog entry; `entry_type` is `git`, `svn`, `dir`, or `group`.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub entry_type: String,
    /// Install path relative to the managed root (concrete entries)
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub subservices: Vec<CatalogSubservice>,
    /// Nested entries (group entries only)
    #[serde(default)]
    pub services: Vec<CatalogEntry>,
}

/// An ancillary resource listed under a catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSubservice {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Relative to the parent service path
    pub path: String,
    pub url: String,
    #[serde(default)]
    pub required: bool,
}

impl CatalogEntry {
    /// Group entries exist for menu nesting only.
    pub fn is_group(&self) -> bool {
        self.entry_type == "group"
    }

    /// The service type of a concrete entry.
    pub fn service_type(&self) -> Result<ServiceType> {
        ServiceType::from_str(&self.entry_type).map_err(|_| {
            VbitError::invalid_spec(format!(
                "catalog entry '{}' has unknown type '{}'",
                self.name, self.entry_type
            ))
        })
    }
}

/// The parsed catalog document.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub services: Vec<CatalogEntry>,
}

impl Catalog {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&content)?;
        validate_entries(&catalog.services)?;
        Ok(catalog)
    }

    /// All concrete installable entries, with groups flattened out.
    pub fn flattened(&self) -> Vec<&CatalogEntry> {
        let mut out = Vec::new();
        flatten_into(&self.services, &mut out);
        out
    }

    /// Find a concrete entry by name, searching through groups.
    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        self.flattened().into_iter().find(|e| e.name == name)
    }
}

fn flatten_into<'a>(entries: &'a [CatalogEntry], out: &mut Vec<&'a CatalogEntry>) {
    for entry in entries {
        if entry.is_group() {
            flatten_into(&entry.services, out);
        } else {
            out.push(entry);
        }
    }
}

fn validate_entries(entries: &[CatalogEntry]) -> Result<()> {
    for entry in entries {
        if entry.name.is_empty() || entry.entry_type.is_empty() {
            return Err(VbitError::invalid_spec(format!(
                "catalog entry missing name or type: {:?}",
                entry.name
            )));
        }
        if entry.is_group() {
            validate_entries(&entry.services)?;
        }
    }
    Ok(())
}

/// Pick the first unused name: `base`, then `base-2`, `base-3`, …
///
/// Used when a catalog entry is installed again; both the entry name and
/// its install path get the same suffix.
pub fn disambiguate(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
