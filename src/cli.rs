use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::types::OutputMode;

/// vbit-config - manage teletext services and the vbit2 pipeline
#[derive(Parser)]
#[command(name = "vbit-config")]
#[command(about = "Install, select, and run teletext services for vbit2")]
#[command(version)]
pub struct Cli {
    /// Path to the known-services catalog file.
    ///
    /// Defaults to known_services.json inside the managed services
    /// directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List installed services
    List,
    /// List services available to install from the catalog
    Catalog,
    /// Install a service from the catalog, a repository URL, or a directory
    Install {
        /// Name of a catalog entry to install
        service: Option<String>,

        /// Clone a git repository as a custom service (requires --name)
        #[arg(long, value_name = "URL", conflicts_with_all = ["svn", "dir", "service"])]
        git: Option<String>,

        /// Check out a subversion repository as a custom service (requires --name)
        #[arg(long, value_name = "URL", conflicts_with_all = ["dir", "service"])]
        svn: Option<String>,

        /// Adopt an existing directory of pages as a service (requires --name)
        #[arg(long, value_name = "PATH", conflicts_with = "service")]
        dir: Option<PathBuf>,

        /// Service name; required for --git/--svn/--dir, overrides the
        /// catalog name otherwise
        #[arg(long)]
        name: Option<String>,

        /// Also install this optional subservice (repeatable)
        #[arg(long = "with", value_name = "SUBSERVICE")]
        with: Vec<String>,
    },
    /// Uninstall a service, deleting its fetched files
    Uninstall {
        /// Name of the installed service
        service: String,
    },
    /// Select the service the pipeline transmits
    Select {
        /// Name of the installed service
        service: String,
    },
    /// Pull the latest content for a service and its subservices
    Update {
        /// Service to update; defaults to the selected service
        service: Option<String>,
    },
    /// Run the transmission pipeline in the foreground
    Run,
    /// Start the pipeline as a background systemd service
    Start,
    /// Stop the background pipeline service
    Stop,
    /// Show or change settings and systemd unit state
    Options {
        /// Output mode for the pipeline (raspi-teletext, none)
        #[arg(long)]
        output: Option<OutputMode>,

        /// Start the pipeline at boot
        #[arg(long, value_name = "ON|OFF")]
        boot: Option<Toggle>,

        /// Periodically update the selected service
        #[arg(long, value_name = "ON|OFF")]
        auto_update: Option<Toggle>,

        /// Serve raw teletext packets over TCP
        #[arg(long, value_name = "ON|OFF")]
        packet_server: Option<Toggle>,

        /// Port for the packet server
        #[arg(long, value_name = "PORT")]
        packet_server_port: Option<u16>,

        /// Enable the vbit2 control interface server
        #[arg(long, value_name = "ON|OFF")]
        interface_server: Option<Toggle>,
    },
}

/// on/off argument for settings toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
