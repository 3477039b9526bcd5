//! vbit-config - command line entry point

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use vbit_config::catalog::{disambiguate, Catalog, CatalogEntry};
use vbit_config::cli::{Cli, Commands, Toggle};
use vbit_config::config::{sanitize_name, ConfigStore, Settings};
use vbit_config::error::{Result, VbitError};
use vbit_config::fetcher::VcsFetcher;
use vbit_config::registry::{InstallSpec, ServiceRegistry, SubserviceSpec};
use vbit_config::runner::PipelineRunner;
use vbit_config::systemd::{SystemdControl, PIPELINE_UNIT, UPDATE_TIMER};
use vbit_config::types::ServiceType;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse_args();
    if let Err(e) = dispatch(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let store = ConfigStore::open_default()?;
    let catalog_path = cli
        .catalog
        .unwrap_or_else(|| store.root().join("known_services.json"));
    let registry = ServiceRegistry::new(store, Box::new(VcsFetcher), Box::new(SystemdControl));

    let outcome: Result<()> = match cli.command {
        Commands::List => cmd_list(&registry),
        Commands::Catalog => cmd_catalog(&catalog_path),
        Commands::Install {
            service,
            git,
            svn,
            dir,
            name,
            with,
        } => cmd_install(&registry, &catalog_path, service, git, svn, dir, name, with),
        Commands::Uninstall { service } => {
            registry.uninstall(&service)?;
            println!("uninstalled {}", service);
            Ok(())
        }
        Commands::Select { service } => {
            registry.select(&service)?;
            println!("selected {}", service);
            Ok(())
        }
        Commands::Update { service } => cmd_update(&registry, service.as_deref()),
        Commands::Run => cmd_run(&registry),
        Commands::Start => {
            SystemdControl.start()?;
            println!("pipeline started");
            Ok(())
        }
        Commands::Stop => {
            use vbit_config::systemd::PipelineControl;
            SystemdControl.stop()?;
            println!("pipeline stopped");
            Ok(())
        }
        Commands::Options {
            output,
            boot,
            auto_update,
            packet_server,
            packet_server_port,
            interface_server,
        } => cmd_options(
            &registry,
            output,
            boot,
            auto_update,
            packet_server,
            packet_server_port,
            interface_server,
        ),
    };
    Ok(outcome?)
}

fn cmd_list(registry: &ServiceRegistry) -> Result<()> {
    let (installed, selected) = {
        let config = registry.store().load();
        (config.installed, config.settings.selected)
    };
    if installed.is_empty() {
        println!("no services installed");
        return Ok(());
    }
    for service in installed {
        let marker = if selected.as_deref() == Some(service.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {} ({}) {}",
            marker,
            service.name,
            service.service_type,
            service.path.display()
        );
    }
    Ok(())
}

fn cmd_catalog(catalog_path: &PathBuf) -> Result<()> {
    let catalog = Catalog::load(catalog_path)?;
    for entry in catalog.flattened() {
        let url = entry.url.as_deref().unwrap_or("");
        println!("{} ({}) {}", entry.name, entry.entry_type, url);
        for sub in &entry.subservices {
            let kind = if sub.required { "required" } else { "optional" };
            println!("    {} ({})", sub.name, kind);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_install(
    registry: &ServiceRegistry,
    catalog_path: &PathBuf,
    service: Option<String>,
    git: Option<String>,
    svn: Option<String>,
    dir: Option<PathBuf>,
    name: Option<String>,
    with: Vec<String>,
) -> Result<()> {
    registry.store().ensure_root()?;

    let spec = if let Some(url) = git {
        custom_spec(registry, ServiceType::Git, Some(url), None, name)?
    } else if let Some(url) = svn {
        custom_spec(registry, ServiceType::Svn, Some(url), None, name)?
    } else if let Some(path) = dir {
        custom_spec(registry, ServiceType::Dir, None, Some(path), name)?
    } else if let Some(entry_name) = service {
        catalog_spec(registry, catalog_path, &entry_name, name, &with)?
    } else {
        return Err(VbitError::invalid_spec(
            "nothing to install: give a catalog entry name or one of --git, --svn, --dir",
        ));
    };

    let installed = registry.install(&spec)?;
    println!("installed {}", installed.name);
    Ok(())
}

/// Build an install spec for a user-entered URL or adopted directory.
fn custom_spec(
    registry: &ServiceRegistry,
    service_type: ServiceType,
    url: Option<String>,
    dir: Option<PathBuf>,
    name: Option<String>,
) -> Result<InstallSpec> {
    let name = sanitize_name(&name.ok_or_else(|| {
        VbitError::invalid_spec("custom installs need --name")
    })?);
    if name.is_empty() {
        return Err(VbitError::invalid_spec("--name is empty after sanitizing"));
    }

    let path = match &dir {
        Some(path) => fs::canonicalize(path)
            .map_err(|_| VbitError::DirectoryNotFound(path.display().to_string()))?,
        None => registry.store().custom_service_path(&name),
    };

    Ok(InstallSpec {
        name,
        service_type,
        path,
        url,
        subservices: Vec::new(),
    })
}

/// Build an install spec from a catalog entry, suffixing the name and path
/// when the entry is already installed.
fn catalog_spec(
    registry: &ServiceRegistry,
    catalog_path: &PathBuf,
    entry_name: &str,
    name_override: Option<String>,
    with: &[String],
) -> Result<InstallSpec> {
    let catalog = Catalog::load(catalog_path)?;
    let entry = catalog
        .find(entry_name)
        .ok_or_else(|| VbitError::UnknownService(entry_name.to_string()))?;
    let service_type = entry.service_type()?;

    for wanted in with {
        if !entry.subservices.iter().any(|s| &s.name == wanted) {
            return Err(VbitError::invalid_spec(format!(
                "'{}' has no subservice named '{}'",
                entry.name, wanted
            )));
        }
    }

    let installed: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    let taken = |candidate: &str| installed.iter().any(|n| n == candidate);

    let base = match name_override {
        Some(name) => sanitize_name(&name),
        None => entry.name.clone(),
    };
    let name = disambiguate(&base, taken);

    // the install path carries the same suffix as the disambiguated name
    let relative = relative_install_path(entry, &name);
    let path = registry.store().root().join(relative);

    let subservices = entry
        .subservices
        .iter()
        .map(|s| SubserviceSpec {
            name: s.name.clone(),
            service_type: s.service_type,
            path: PathBuf::from(&s.path),
            url: s.url.clone(),
            required: s.required,
            selected: with.contains(&s.name),
        })
        .collect();

    Ok(InstallSpec {
        name,
        service_type,
        path,
        url: entry.url.clone(),
        subservices,
    })
}

fn relative_install_path(entry: &CatalogEntry, final_name: &str) -> String {
    let base = entry
        .path
        .clone()
        .unwrap_or_else(|| sanitize_name(&entry.name));
    match final_name.strip_prefix(entry.name.as_str()) {
        Some(suffix) if !suffix.is_empty() => format!("{}{}", base, suffix),
        _ => base,
    }
}

fn cmd_update(registry: &ServiceRegistry, service: Option<&str>) -> Result<()> {
    let reports = registry.update(service)?;
    if reports.is_empty() {
        println!("nothing to update");
        return Ok(());
    }
    let mut failures = 0;
    for report in &reports {
        match &report.error {
            None => println!("updated {}", report.name),
            Some(e) => {
                failures += 1;
                println!("failed to update {}: {}", report.name, e);
            }
        }
    }
    if failures == reports.len() {
        return Err(VbitError::subprocess("every update failed"));
    }
    Ok(())
}

fn cmd_run(registry: &ServiceRegistry) -> Result<()> {
    let (service, settings) = registry.resolve_selected()?;
    info!("running pipeline for '{}'", service.name);
    let runner = PipelineRunner::new()?;
    runner.run(&service, &settings)
}

fn cmd_options(
    registry: &ServiceRegistry,
    output: Option<vbit_config::types::OutputMode>,
    boot: Option<Toggle>,
    auto_update: Option<Toggle>,
    packet_server: Option<Toggle>,
    packet_server_port: Option<u16>,
    interface_server: Option<Toggle>,
) -> Result<()> {
    let control = SystemdControl;
    let changed = output.is_some()
        || packet_server.is_some()
        || packet_server_port.is_some()
        || interface_server.is_some();

    if changed {
        let mut config = registry.store().load();
        if let Some(mode) = output {
            config.settings.output = mode;
        }
        if let Some(toggle) = packet_server {
            config.settings.packet_server = Some(toggle.enabled());
        }
        if let Some(port) = packet_server_port {
            config.settings.packet_server_port = Some(port);
        }
        if let Some(toggle) = interface_server {
            config.settings.interface_server = Some(toggle.enabled());
        }
        registry.store().save(&config)?;
        debug!("settings saved");

        use vbit_config::systemd::PipelineControl;
        if control.is_active() {
            if let Err(e) = control.restart() {
                tracing::warn!("could not restart pipeline with new settings: {}", e);
            }
        }
    }

    if let Some(toggle) = boot {
        control.set_boot(toggle.enabled())?;
    }
    if let Some(toggle) = auto_update {
        control.set_auto_update(toggle.enabled())?;
    }

    print_state(registry, &control);
    Ok(())
}

fn print_state(registry: &ServiceRegistry, control: &SystemdControl) {
    let settings: Settings = registry.store().load().settings;
    println!(
        "selected:         {}",
        settings.selected.as_deref().unwrap_or("(none)")
    );
    println!("output:           {}", settings.output);
    println!(
        "run at boot:      {}",
        on_off(control.is_enabled(PIPELINE_UNIT))
    );
    println!(
        "auto update:      {}",
        on_off(control.is_enabled(UPDATE_TIMER))
    );
    println!(
        "packet server:    {}",
        on_off(settings.packet_server.unwrap_or(false))
    );
    match settings.packet_server_port {
        Some(port) => println!("packet port:      {}", port),
        None => println!("packet port:      (unset)"),
    }
    println!(
        "interface server: {}",
        on_off(settings.interface_server.unwrap_or(false))
    );
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
