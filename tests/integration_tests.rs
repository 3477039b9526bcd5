//! End-to-end tests over the real filesystem: configuration persistence,
//! install/uninstall lifecycle, catalog-driven installs, and the pipeline
//! runner in its standalone output mode.

use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use vbit_config::catalog::Catalog;
use vbit_config::config::{ConfigStore, Settings};
use vbit_config::error::Result;
use vbit_config::registry::{InstallSpec, ServiceRegistry, SubserviceSpec};
use vbit_config::runner::PipelineRunner;
use vbit_config::systemd::NullControl;
use vbit_config::types::{OutputMode, ServiceType};
use vbit_config::{Fetcher, VbitError};

/// Fetcher that materializes checkouts as plain directories.
struct StubFetcher;

impl Fetcher for StubFetcher {
    fn fetch(&self, _ty: ServiceType, target: &Path, _url: &str) -> Result<()> {
        fs::create_dir_all(target)?;
        fs::write(target.join("checkout.marker"), "stub")?;
        Ok(())
    }

    fn pull(&self, _ty: ServiceType, _path: &Path) -> Result<()> {
        Ok(())
    }
}

fn registry(dir: &TempDir) -> ServiceRegistry {
    ServiceRegistry::new(
        ConfigStore::new(dir.path().join("services")),
        Box::new(StubFetcher),
        Box::new(NullControl),
    )
}

fn git_spec(registry: &ServiceRegistry, name: &str) -> InstallSpec {
    InstallSpec {
        name: name.to_string(),
        service_type: ServiceType::Git,
        path: registry.store().root().join(name),
        url: Some(format!("https://example.com/{}.git", name)),
        subservices: Vec::new(),
    }
}

#[test]
fn test_install_persists_expected_json_shape() {
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let mut spec = git_spec(&registry, "teefax");
    spec.subservices = vec![SubserviceSpec {
        name: "extras".to_string(),
        service_type: ServiceType::Svn,
        path: "extras".into(),
        url: "https://example.com/extras".to_string(),
        required: true,
        selected: false,
    }];
    registry.install(&spec).unwrap();

    // a fresh store over the same root sees the same document
    let reloaded = ConfigStore::new(registry.store().root()).load();
    assert_eq!(reloaded.installed.len(), 1);
    assert_eq!(reloaded.settings.selected.as_deref(), Some("teefax"));

    // and the on-disk JSON uses the documented key names
    let raw: Value =
        serde_json::from_str(&fs::read_to_string(registry.store().config_path()).unwrap())
            .unwrap();
    assert_eq!(raw["installed"][0]["type"], "git");
    assert_eq!(raw["installed"][0]["name"], "teefax");
    assert_eq!(raw["installed"][0]["subservices"][0]["required"], true);
    assert_eq!(raw["settings"]["selected"], "teefax");

    // managed root carries the marker file and custom_services dir
    assert!(registry.store().root().join("IMPORTANT").exists());
    assert!(registry.store().root().join("custom_services").is_dir());
}

#[test]
fn test_full_lifecycle() {
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    registry.install(&git_spec(&registry, "zebra")).unwrap();
    registry.install(&git_spec(&registry, "alpha")).unwrap();

    let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["alpha", "zebra"]);

    // zebra was installed first and auto-selected
    let (selected, _) = registry.resolve_selected().unwrap();
    assert_eq!(selected.name, "zebra");

    registry.select("alpha").unwrap();
    let (selected, _) = registry.resolve_selected().unwrap();
    assert_eq!(selected.name, "alpha");

    let alpha_path = registry.store().root().join("alpha");
    assert!(alpha_path.join("checkout.marker").exists());

    registry.uninstall("alpha").unwrap();
    assert!(!alpha_path.exists());
    assert!(matches!(
        registry.resolve_selected().unwrap_err(),
        VbitError::NoSelection
    ));

    registry.uninstall("zebra").unwrap();
    assert!(registry.list().is_empty());
}

#[test]
fn test_corrupt_config_recovers_to_working_state() {
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    registry.store().ensure_root().unwrap();
    fs::write(registry.store().config_path(), "{{{ nonsense").unwrap();

    assert!(registry.list().is_empty());
    registry.install(&git_spec(&registry, "teefax")).unwrap();
    assert_eq!(registry.list().len(), 1);
}

#[test]
fn test_catalog_driven_install() {
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let catalog_path = dir.path().join("known_services.json");
    fs::write(
        &catalog_path,
        r#"{"services": [
            {"name": "Ceefax", "type": "git", "path": "ceefax",
             "url": "https://example.com/ceefax.git",
             "subservices": [
                {"name": "weather", "type": "git", "path": "weather",
                 "url": "https://example.com/weather.git", "required": true}
             ]}
        ]}"#,
    )
    .unwrap();

    let catalog = Catalog::load(&catalog_path).unwrap();
    let entry = catalog.find("Ceefax").unwrap();

    let spec = InstallSpec {
        name: entry.name.clone(),
        service_type: entry.service_type().unwrap(),
        path: registry.store().root().join(entry.path.clone().unwrap()),
        url: entry.url.clone(),
        subservices: entry
            .subservices
            .iter()
            .map(|s| SubserviceSpec {
                name: s.name.clone(),
                service_type: s.service_type,
                path: s.path.clone().into(),
                url: s.url.clone(),
                required: s.required,
                selected: false,
            })
            .collect(),
    };

    let service = registry.install(&spec).unwrap();
    assert_eq!(service.subservices.len(), 1);
    let sub_path = &service.subservices[0].path;
    assert_eq!(*sub_path, registry.store().root().join("ceefax/weather"));
    assert!(sub_path.join("checkout.marker").exists());
}

#[test]
fn test_runner_standalone_mode_end_to_end() {
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir);

    let pages = dir.path().join("pages");
    fs::create_dir(&pages).unwrap();
    registry
        .install(&InstallSpec {
            name: "local".to_string(),
            service_type: ServiceType::Dir,
            path: pages,
            url: None,
            subservices: Vec::new(),
        })
        .unwrap();

    let mut config = registry.store().load();
    config.settings.output = OutputMode::None;
    registry.store().save(&config).unwrap();

    let (service, settings): (_, Settings) = registry.resolve_selected().unwrap();
    assert_eq!(settings.output, OutputMode::None);

    let runner = PipelineRunner::with_binaries("/bin/true", "/bin/false", "/bin/false");
    runner.run(&service, &settings).unwrap();
}
