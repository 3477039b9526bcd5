//! Transmission pipeline process management
//!
//! Runs the vbit2 generator for the selected service and, for the
//! raspi-teletext output mode, pipes its packet stream into the `teletext`
//! output process with a field line mask derived from the service's
//! lines_per_field setting. SIGINT/SIGTERM are forwarded to the generator
//! only; the output process drains the pipe and exits on EOF, so teardown
//! is ordered without tracking it.

use crate::config::{Service, Settings};
use crate::error::{Result, VbitError};
use crate::types::OutputMode;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// vbit2's own default when no config file overrides it.
pub const DEFAULT_LINES_PER_FIELD: u32 = 16;

/// Checked in order; a value in the later file overrides the earlier one.
const CONF_FILES: [&str; 2] = ["vbit.conf", "vbit.conf.override"];

const LPF_KEY: &str = "lines_per_field=";

/// Read the effective lines_per_field for a service directory.
///
/// Scans `vbit.conf` then `vbit.conf.override`; the last valid assignment
/// wins. Invalid values (unparseable, or below 1) are logged and skipped
/// without disturbing the value collected so far.
pub fn lines_per_field(service_dir: &Path) -> u32 {
    let mut lpf = DEFAULT_LINES_PER_FIELD;
    for name in CONF_FILES {
        let Ok(file) = File::open(service_dir.join(name)) else {
            continue;
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else {
                break;
            };
            if let Some(value) = line.strip_prefix(LPF_KEY) {
                match value.trim().parse::<u32>() {
                    Ok(v) if v >= 1 => lpf = v,
                    _ => warn!("invalid lines_per_field in {}", name),
                }
            }
        }
    }
    lpf
}

/// Mask of VBI lines the output process may use, with the lowest
/// `lines_per_field` bits cleared for the generator's lines.
pub fn field_line_mask(lines_per_field: u32) -> u16 {
    (0xffffu32.checked_shl(lines_per_field).unwrap_or(0) & 0xffff) as u16
}

/// Build the generator argument list for a service and settings.
pub fn generator_args(service_dir: &Path, settings: &Settings) -> Vec<String> {
    let mut args = vec!["--dir".to_string(), service_dir.display().to_string()];
    if settings.output == OutputMode::None {
        args.push("--format".to_string());
        args.push("none".to_string());
    }
    if settings.packet_server_enabled() {
        if let Some(port) = settings.packet_server_port {
            args.push("--packetserver".to_string());
            args.push(port.to_string());
        }
    }
    args
}

/// Spawns and supervises the generator→output pipeline.
pub struct PipelineRunner {
    generator: PathBuf,
    output_bin: PathBuf,
    tvctl: PathBuf,
}

impl PipelineRunner {
    /// Runner over the conventional install locations under `$HOME`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| VbitError::subprocess("cannot determine home directory"))?;
        Ok(Self {
            generator: home.join(".local/bin/vbit2"),
            output_bin: home.join("raspi-teletext/teletext"),
            tvctl: home.join("raspi-teletext/tvctl"),
        })
    }

    /// Runner over explicit binaries (used by tests).
    pub fn with_binaries(
        generator: impl Into<PathBuf>,
        output_bin: impl Into<PathBuf>,
        tvctl: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generator: generator.into(),
            output_bin: output_bin.into(),
            tvctl: tvctl.into(),
        }
    }

    /// Run the pipeline for a service until the generator exits.
    ///
    /// Blocks for the lifetime of the transmission. Returns Ok on a clean
    /// exit, including one caused by a forwarded SIGINT/SIGTERM.
    pub fn run(&self, service: &Service, settings: &Settings) -> Result<()> {
        let args = generator_args(&service.path, settings);
        match settings.output {
            OutputMode::None => self.supervise(&args, None),
            OutputMode::RaspiTeletext => {
                let lpf = lines_per_field(&service.path);
                if lpf > 16 {
                    return Err(VbitError::unsupported_mode(
                        "full field operation is not supported by raspi-teletext",
                    ));
                }
                self.supervise(&args, Some(field_line_mask(lpf)))
            }
        }
    }

    /// Toggle the raspi-teletext VBI output hardware.
    ///
    /// tvctl needs root; failure is reported to the caller so the pre-run
    /// toggle can be logged and the transmission still attempted.
    fn tvctl(&self, state: &str) -> Result<()> {
        debug!("tvctl {}", state);
        let status = Command::new("sudo").arg(&self.tvctl).arg(state).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(VbitError::subprocess(format!(
                "{} {} failed",
                self.tvctl.display(),
                state
            )))
        }
    }

    /// Spawn the generator (piping into the output process when `mask` is
    /// set) and block until it exits, forwarding termination signals.
    fn supervise(&self, args: &[String], mask: Option<u16>) -> Result<()> {
        if mask.is_some() {
            if let Err(e) = self.tvctl("on") {
                warn!("could not enable VBI output: {}", e);
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let generator_pid = Arc::new(AtomicI32::new(0));
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let signals_handle = signals.handle();
        {
            let shutdown = shutdown.clone();
            let generator_pid = generator_pid.clone();
            std::thread::spawn(move || {
                for _ in signals.forever() {
                    shutdown.store(true, Ordering::SeqCst);
                    let pid = generator_pid.load(Ordering::SeqCst);
                    if pid > 0 {
                        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
                    }
                }
            });
        }

        info!("starting {} {}", self.generator.display(), args.join(" "));
        let mut generator = Command::new(&self.generator)
            .args(args)
            .stdout(if mask.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .spawn()
            .map_err(|e| {
                VbitError::subprocess(format!(
                    "could not start {}: {}",
                    self.generator.display(),
                    e
                ))
            })?;

        generator_pid.store(generator.id() as i32, Ordering::SeqCst);
        // a signal delivered before the pid was published is not lost
        if shutdown.load(Ordering::SeqCst) {
            let _ = kill(Pid::from_raw(generator.id() as i32), Signal::SIGTERM);
        }

        let mut output_child = None;
        if let Some(mask) = mask {
            let stdout = generator
                .stdout
                .take()
                .ok_or_else(|| VbitError::subprocess("generator stdout was not captured"))?;
            match Command::new(&self.output_bin)
                .args(["-m", &format!("0x{:04x}", mask), "-"])
                .stdin(Stdio::from(stdout))
                .spawn()
            {
                Ok(child) => output_child = Some(child),
                Err(e) => {
                    let _ = kill(Pid::from_raw(generator.id() as i32), Signal::SIGTERM);
                    let _ = generator.wait();
                    signals_handle.close();
                    if let Err(e) = self.tvctl("off") {
                        warn!("could not disable VBI output: {}", e);
                    }
                    return Err(VbitError::subprocess(format!(
                        "could not start {}: {}",
                        self.output_bin.display(),
                        e
                    )));
                }
            }
        }

        // teardown runs even when the wait itself errors
        let wait_result = generator.wait();
        generator_pid.store(0, Ordering::SeqCst);
        if let Some(mut child) = output_child {
            // EOF on the pipe ends the output process
            let _ = child.wait();
        }
        signals_handle.close();

        if mask.is_some() {
            if let Err(e) = self.tvctl("off") {
                warn!("could not disable VBI output: {}", e);
            }
        }

        let status = wait_result?;
        if status.success() || shutdown.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VbitError::subprocess(format!(
                "generator exited with code {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}
