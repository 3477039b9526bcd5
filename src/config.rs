//! Configuration document handling for vbit-config
//!
//! The configuration is a single JSON document (`config.json` in the managed
//! services root) holding the installed service list and the runtime
//! settings. Every registry operation performs one load→mutate→save cycle;
//! nothing holds the document in memory between operations.
//!
//! Unrecognized keys in the document are preserved across a load/save cycle
//! via flattened maps, so hand-edited or forward-version fields survive.

use crate::error::{Result, VbitError};
use crate::types::{OutputMode, ServiceType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Name of the persisted configuration document within the managed root.
const CONFIG_FILE: &str = "config.json";

/// Subdirectory for custom (user-entered URL) service checkouts.
const CUSTOM_SERVICES_DIR: &str = "custom_services";

/// Marker file explaining the managed root to anyone browsing it.
const MARKER_FILE: &str = "IMPORTANT";
const MARKER_TEXT: &str = "IMPORTANT:\nThese directories were created by vbit-config.\nIf a service is uninstalled the directory will be deleted.";

/// An installed teletext service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique name within the installed list
    pub name: String,
    /// How the content is obtained
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Absolute path of the service directory
    pub path: PathBuf,
    /// Repository URL; present for git/svn, absent for dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Ancillary resources fetched into subdirectories of `path`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subservices: Vec<Subservice>,
    /// Unknown keys, preserved across load/save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An ancillary resource installed alongside a parent service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subservice {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Stored resolved to an absolute path under the parent service
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Name of the selected service, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    /// Output mode for the pipeline
    #[serde(default)]
    pub output: OutputMode,
    /// Enable the vbit2 TCP packet server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_server: Option<bool>,
    /// Port for the packet server; the flag is only passed when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_server_port: Option<u16>,
    /// Enable the vbit2 control interface server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_server: Option<bool>,
    /// Unknown keys, preserved across load/save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Packet server is enabled and has a usable port.
    pub fn packet_server_enabled(&self) -> bool {
        self.packet_server == Some(true) && self.packet_server_port.is_some()
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub installed: Vec<Service>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Configuration {
    /// Look up an installed service by name.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.installed.iter().find(|s| s.name == name)
    }

    /// True if a service with this name is installed.
    pub fn has_service(&self, name: &str) -> bool {
        self.service(name).is_some()
    }

    /// Restore the by-name ordering invariant after a mutation.
    pub fn sort_installed(&mut self) {
        self.installed.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// Loads and saves the configuration document and owns the managed root.
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    /// Create a store over an explicit managed root (used by tests).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store over `$HOME/.teletext-services`.
    pub fn open_default() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| VbitError::persistence("cannot determine home directory"))?;
        Ok(Self::new(home.join(".teletext-services")))
    }

    /// The managed services root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the persisted configuration document.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Target path for a custom (URL-entered) service checkout.
    pub fn custom_service_path(&self, name: &str) -> PathBuf {
        self.root.join(CUSTOM_SERVICES_DIR).join(name)
    }

    /// Create the managed root and its custom_services subdirectory,
    /// writing the explanatory marker file the first time the root appears.
    pub fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            fs::write(self.root.join(MARKER_FILE), MARKER_TEXT)?;
        }
        let custom = self.root.join(CUSTOM_SERVICES_DIR);
        if !custom.exists() {
            fs::create_dir_all(&custom)?;
        }
        Ok(())
    }

    /// Load the configuration document.
    ///
    /// A missing or unparseable file yields a fresh default configuration;
    /// corruption is deliberately treated as "start fresh" rather than an
    /// error, matching the historical behaviour of vbit-config.
    pub fn load(&self) -> Configuration {
        if let Err(e) = self.ensure_root() {
            warn!("could not prepare services directory: {}", e);
        }

        match fs::read_to_string(self.config_path()) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("config.json is not valid, starting fresh: {}", e);
                    Configuration::default()
                }
            },
            Err(_) => Configuration::default(),
        }
    }

    /// Persist the configuration document.
    ///
    /// Writes to a temporary file in the same directory and renames it over
    /// config.json so a failed write can never leave a truncated document.
    pub fn save(&self, config: &Configuration) -> Result<()> {
        self.ensure_root()
            .map_err(|e| VbitError::persistence(e.to_string()))?;

        let json = serde_json::to_string_pretty(config)
            .map_err(|e| VbitError::persistence(e.to_string()))?;

        let tmp = self.root.join(format!("{}.tmp", CONFIG_FILE));
        fs::write(&tmp, json).map_err(|e| VbitError::persistence(e.to_string()))?;
        fs::rename(&tmp, self.config_path())
            .map_err(|e| VbitError::persistence(e.to_string()))?;
        Ok(())
    }
}

/// Remove the characters `. / \ " '` from a user-supplied service name and
/// strip the surrounding whitespace that remains.
///
/// Filtering happens before the trim so that dropping an illegal character
/// can never expose new leading or trailing whitespace; sanitizing an
/// already-sanitized name is a no-op.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '.' | '/' | '\\' | '"' | '\''))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Lexically normalize a path, resolving `.` and `..` components without
/// touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// True when `path` lies within `root` (or is `root` itself), judged
/// lexically. Guards deletions against a corrupted or maliciously edited
/// config pointing outside the managed tree.
pub fn is_contained(root: &Path, path: &Path) -> bool {
    normalize(path).starts_with(normalize(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("services"));
        (dir, store)
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let (_dir, store) = store();
        let config = store.load();
        assert!(config.installed.is_empty());
        assert!(config.settings.selected.is_none());
        assert_eq!(config.settings.output, OutputMode::RaspiTeletext);
    }

    #[test]
    fn test_load_corrupt_file_returns_defaults() {
        let (_dir, store) = store();
        store.ensure_root().unwrap();
        fs::write(store.config_path(), "{ not json").unwrap();
        let config = store.load();
        assert!(config.installed.is_empty());
    }

    #[test]
    fn test_first_use_creates_marker_and_custom_dir() {
        let (_dir, store) = store();
        store.load();
        assert!(store.root().join("IMPORTANT").exists());
        assert!(store.root().join("custom_services").is_dir());

        // Marker is only written once; it must survive with its content
        let marker = fs::read_to_string(store.root().join("IMPORTANT")).unwrap();
        fs::write(store.root().join("IMPORTANT"), "edited").unwrap();
        store.load();
        let edited = fs::read_to_string(store.root().join("IMPORTANT")).unwrap();
        assert_eq!(edited, "edited");
        assert!(marker.contains("vbit-config"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (_dir, store) = store();
        let mut config = Configuration::default();
        config.installed.push(Service {
            name: "teefax".to_string(),
            service_type: ServiceType::Git,
            path: store.root().join("teefax"),
            url: Some("https://example.com/teefax.git".to_string()),
            subservices: vec![Subservice {
                name: "extras".to_string(),
                service_type: ServiceType::Svn,
                path: store.root().join("teefax/extras"),
                url: Some("https://example.com/extras".to_string()),
                required: true,
            }],
            extra: Map::new(),
        });
        config.settings.selected = Some("teefax".to_string());
        config.settings.packet_server = Some(true);
        config.settings.packet_server_port = Some(19761);
        store.save(&config).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.installed.len(), 1);
        let svc = &loaded.installed[0];
        assert_eq!(svc.name, "teefax");
        assert_eq!(svc.service_type, ServiceType::Git);
        assert_eq!(svc.subservices.len(), 1);
        assert!(svc.subservices[0].required);
        assert_eq!(loaded.settings.selected.as_deref(), Some("teefax"));
        assert!(loaded.settings.packet_server_enabled());
    }

    #[test]
    fn test_save_of_loaded_document_is_stable() {
        let (_dir, store) = store();
        let mut config = Configuration::default();
        config.settings.selected = Some("a".to_string());
        store.save(&config).unwrap();

        let first = store.load();
        store.save(&first).unwrap();
        let second = store.load();

        let a = serde_json::to_value(&first).unwrap();
        let b = serde_json::to_value(&second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_keys_survive_roundtrip() {
        let (_dir, store) = store();
        store.ensure_root().unwrap();
        let doc = r#"{
            "installed": [
                {"name": "a", "type": "dir", "path": "/srv/pages", "comment": "hand edited"}
            ],
            "settings": {"output": "none", "futureKnob": 7},
            "topLevelExtra": [1, 2, 3]
        }"#;
        fs::write(store.config_path(), doc).unwrap();

        let config = store.load();
        store.save(&config).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.config_path()).unwrap()).unwrap();
        assert_eq!(raw["installed"][0]["comment"], "hand edited");
        assert_eq!(raw["settings"]["futureKnob"], 7);
        assert_eq!(raw["topLevelExtra"][2], 3);
    }

    #[test]
    fn test_settings_use_camel_case_keys() {
        let mut settings = Settings::default();
        settings.packet_server = Some(false);
        settings.packet_server_port = Some(2000);
        settings.interface_server = Some(true);
        let v = serde_json::to_value(&settings).unwrap();
        assert_eq!(v["packetServer"], false);
        assert_eq!(v["packetServerPort"], 2000);
        assert_eq!(v["interfaceServer"], true);
    }

    #[test]
    fn test_packet_server_needs_port() {
        let mut settings = Settings::default();
        settings.packet_server = Some(true);
        assert!(!settings.packet_server_enabled());
        settings.packet_server_port = Some(19761);
        assert!(settings.packet_server_enabled());
    }

    #[test]
    fn test_sort_installed() {
        let mut config = Configuration::default();
        for name in ["zebra", "Alpha", "alpha", "mid"] {
            config.installed.push(Service {
                name: name.to_string(),
                service_type: ServiceType::Dir,
                path: PathBuf::from("/tmp"),
                url: None,
                subservices: Vec::new(),
                extra: Map::new(),
            });
        }
        config.sort_installed();
        let names: Vec<&str> = config.installed.iter().map(|s| s.name.as_str()).collect();
        // case-sensitive ascending: uppercase sorts before lowercase
        assert_eq!(names, vec!["Alpha", "alpha", "mid", "zebra"]);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  my service  "), "my service");
        assert_eq!(sanitize_name("../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("na\"me'with.dots"), "namewithdots");
    }

    #[test]
    fn test_sanitize_name_is_idempotent() {
        // dropping an illegal character must not leave fresh edge whitespace
        assert_eq!(sanitize_name(". a"), "a");
        assert_eq!(sanitize_name("' \tb'"), "b");
        for input in [". a", "  x. ", "'\t'", "plain name"] {
            let once = sanitize_name(input);
            assert_eq!(sanitize_name(&once), once);
        }
    }

    #[test]
    fn test_is_contained() {
        let root = Path::new("/home/pi/.teletext-services");
        assert!(is_contained(root, root));
        assert!(is_contained(root, &root.join("teefax")));
        assert!(is_contained(root, &root.join("custom_services/x")));
        assert!(!is_contained(root, Path::new("/home/pi/other")));
        assert!(!is_contained(root, Path::new("/home/pi")));
        // lexical traversal escapes are caught
        assert!(!is_contained(root, &root.join("../../../etc")));
    }
}
