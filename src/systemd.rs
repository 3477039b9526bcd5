//! systemd user-unit passthroughs
//!
//! The pipeline runs under `vbit2.service` and the auto-update job under
//! `teletext-update.timer`, both user units. The registry only needs the
//! small `PipelineControl` surface (stop before deleting the selected
//! service, restart after re-selection); the enable/disable toggles are
//! used directly by the CLI options command.

use crate::error::{Result, VbitError};
use std::process::{Command, Stdio};
use tracing::debug;

/// The user unit running the transmission pipeline.
pub const PIPELINE_UNIT: &str = "vbit2.service";

/// The user timer driving periodic service updates.
pub const UPDATE_TIMER: &str = "teletext-update.timer";

/// Control over the running pipeline instance, as needed by the registry.
pub trait PipelineControl {
    /// Whether a pipeline instance is currently active.
    fn is_active(&self) -> bool;
    /// Stop the running pipeline.
    fn stop(&self) -> Result<()>;
    /// Restart the running pipeline to pick up a new selection.
    fn restart(&self) -> Result<()>;
}

/// `systemctl --user` implementation of the unit passthroughs.
pub struct SystemdControl;

impl SystemdControl {
    fn systemctl(args: &[&str]) -> Result<()> {
        debug!("systemctl --user {:?}", args);
        let status = Command::new("systemctl")
            .arg("--user")
            .args(args)
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(VbitError::subprocess(format!(
                "systemctl --user {} failed",
                args.join(" ")
            )))
        }
    }

    fn query(args: &[&str], expect: &str) -> bool {
        Command::new("systemctl")
            .arg("--user")
            .args(args)
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).trim() == expect)
            .unwrap_or(false)
    }

    /// Start the pipeline unit.
    pub fn start(&self) -> Result<()> {
        Self::systemctl(&["start", PIPELINE_UNIT])
    }

    /// Whether the given unit is enabled.
    pub fn is_enabled(&self, unit: &str) -> bool {
        Self::query(&["is-enabled", unit], "enabled")
    }

    /// Enable or disable running the pipeline at boot.
    pub fn set_boot(&self, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        Self::systemctl(&[action, PIPELINE_UNIT])
    }

    /// Enable or disable the periodic update timer, applying immediately.
    pub fn set_auto_update(&self, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        Self::systemctl(&[action, UPDATE_TIMER, "--now"])
    }
}

impl PipelineControl for SystemdControl {
    fn is_active(&self) -> bool {
        Self::query(&["is-active", PIPELINE_UNIT], "active")
    }

    fn stop(&self) -> Result<()> {
        Self::systemctl(&["stop", PIPELINE_UNIT])
    }

    fn restart(&self) -> Result<()> {
        Self::systemctl(&["restart", PIPELINE_UNIT])
    }
}

/// Inert control for contexts with no running pipeline (tests, builds
/// without systemd).
pub struct NullControl;

impl PipelineControl for NullControl {
    fn is_active(&self) -> bool {
        false
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        Ok(())
    }
}
