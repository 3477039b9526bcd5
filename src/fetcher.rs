//! External fetch commands for service installation and update
//!
//! All version-control work goes through external `git`/`svn` commands run
//! non-interactively with captured output. The `Fetcher` trait is the seam
//! the registry uses, so tests can substitute a recording fake.
//!
//! Rollback is not this module's job: a failed fetch leaves whatever the
//! tool created in place and the registry removes the tree.

use crate::error::{Result, VbitError};
use crate::types::ServiceType;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Fetches a resource into a target path, or pulls the latest revision of
/// an already-fetched one.
pub trait Fetcher {
    /// Create `target` and check the repository at `url` out into it.
    ///
    /// Fails if `target` already exists; the caller must guarantee a fresh
    /// path. On a tool failure the created directory is left in place for
    /// the caller to clean up.
    fn fetch(&self, service_type: ServiceType, target: &Path, url: &str) -> Result<()>;

    /// Pull the latest revision into an existing checkout. No-op for `dir`.
    fn pull(&self, service_type: ServiceType, path: &Path) -> Result<()>;
}

/// Production fetcher shelling out to git and svn.
pub struct VcsFetcher;

impl VcsFetcher {
    /// Run a VCS command to completion with combined captured output,
    /// mapping nonzero exit to a fetch error.
    fn run_tool(tool: &str, args: &[&str]) -> Result<()> {
        if which::which(tool).is_err() {
            return Err(VbitError::Fetch {
                tool: tool.to_string(),
                code: -1,
                output: format!("{} not found in PATH", tool),
            });
        }

        debug!("running {} {:?}", tool, args);
        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(VbitError::Fetch {
                tool: tool.to_string(),
                code: output.status.code().unwrap_or(-1),
                output: combined.trim().to_string(),
            })
        }
    }
}

impl Fetcher for VcsFetcher {
    fn fetch(&self, service_type: ServiceType, target: &Path, url: &str) -> Result<()> {
        // fails if the path already exists
        fs::create_dir(target)?;

        let target_str = target.to_string_lossy();
        info!("fetching {} into {}", url, target_str);
        match service_type {
            ServiceType::Git => Self::run_tool(
                "git",
                &["clone", "--quiet", "--depth", "1", url, &target_str],
            ),
            ServiceType::Svn => Self::run_tool(
                "svn",
                &["checkout", "--quiet", "--non-interactive", url, &target_str],
            ),
            ServiceType::Dir => Err(VbitError::invalid_spec(
                "dir services are adopted, not fetched",
            )),
        }
    }

    fn pull(&self, service_type: ServiceType, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        match service_type {
            ServiceType::Git => Self::run_tool("git", &["-C", &path_str, "pull"]),
            ServiceType::Svn => {
                // cleanup recovers from stale working-copy locks; run it
                // even when the update itself failed
                let update = Self::run_tool("svn", &["up", "--non-interactive", &path_str]);
                let cleanup = Self::run_tool("svn", &["cleanup", &path_str]);
                update.and(cleanup)
            }
            ServiceType::Dir => Ok(()),
        }
    }
}
