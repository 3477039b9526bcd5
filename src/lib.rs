//! vbit-config library
//!
//! Manages installable teletext services under `~/.teletext-services` and
//! runs the vbit2 transmission pipeline for the selected service.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod registry;
pub mod runner;
pub mod systemd;
pub mod types;

// Re-export main types for convenience
pub use catalog::{Catalog, CatalogEntry, CatalogSubservice};
pub use config::{ConfigStore, Configuration, Service, Settings, Subservice};
pub use error::{Result, VbitError};
pub use fetcher::{Fetcher, VcsFetcher};
pub use registry::{InstallSpec, ServiceRegistry, SubserviceSpec, UpdateReport};
pub use runner::PipelineRunner;
pub use systemd::{PipelineControl, SystemdControl};
pub use types::{OutputMode, ServiceType};
