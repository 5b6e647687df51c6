//! Interactive device session management
//!
//! A session is a detached terminal-multiplexer (`screen`) session attached to
//! the device's serial console, with its output logged to a file. Starting and
//! locating the device is delegated to per-device helper scripts whose only
//! contract is their exit status and two banner markers:
//!
//! ```text
//!  > USB: /media/pi/CIRCUITPY
//!  > Serial tty: /dev/ttyACM0
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::bootstrap::BootstrapOrchestrator;
use crate::clock::{Clock, TokioClock};
use crate::log_tail::LogTailReader;
use crate::runner::{SystemToolRunner, ToolInvocation, ToolOutput, ToolRunner};
use fwdemon_core::prelude::*;
use fwdemon_core::{DeviceSession, SessionCommand, SessionTransition};

/// Time the device gets to re-enumerate on USB after a reset
pub const DEFAULT_REENUMERATE_SETTLE: Duration = Duration::from_secs(30);

static USB_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*USB:\s*(\S.*?)\s*$").expect("Invalid banner marker regex"));

static SERIAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*Serial tty:\s*(\S.*?)\s*$").expect("Invalid banner marker regex"));

/// Where the helper scripts live and which tools drive the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Directory holding `<session>.sh`, `<session>_boot.sh` and `<session>.log`
    pub scripts_dir: PathBuf,
    /// Shell used to run the helper scripts
    pub shell: String,
    /// Terminal multiplexer that owns the session
    pub session_tool: String,
    pub reenumerate_settle: Duration,
}

impl SessionConfig {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            shell: "bash".to_string(),
            session_tool: "screen".to_string(),
            reenumerate_settle: DEFAULT_REENUMERATE_SETTLE,
        }
    }

    pub fn start_script(&self, session_name: &str) -> PathBuf {
        self.scripts_dir.join(format!("{}.sh", session_name))
    }

    pub fn boot_script(&self, session_name: &str) -> PathBuf {
        self.scripts_dir.join(format!("{}_boot.sh", session_name))
    }

    pub fn log_path(&self, session_name: &str) -> PathBuf {
        self.scripts_dir.join(format!("{}.log", session_name))
    }
}

/// Markers found in a helper's startup text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BannerMarkers {
    pub mount_path: Option<PathBuf>,
    pub serial_address: Option<String>,
}

/// Extract the mount path and serial address markers from helper output.
///
/// When a marker appears more than once the last occurrence wins.
pub fn parse_banner(text: &str) -> BannerMarkers {
    let mut markers = BannerMarkers::default();
    for line in text.lines() {
        if let Some(caps) = USB_MARKER.captures(line) {
            markers.mount_path = Some(PathBuf::from(&caps[1]));
        } else if let Some(caps) = SERIAL_MARKER.captures(line) {
            markers.serial_address = Some(caps[1].to_string());
        }
    }
    markers
}

/// Owns the interactive session to one device
#[derive(Debug)]
pub struct SessionController<R = SystemToolRunner, C = TokioClock> {
    config: SessionConfig,
    runner: R,
    clock: C,
    session: DeviceSession,
    log: LogTailReader<C>,
}

impl<R: ToolRunner, C: Clock + Clone> SessionController<R, C> {
    /// Create a controller for `session_name` without starting the session.
    ///
    /// The session log is followed from its current end.
    pub async fn new(
        session_name: impl Into<String>,
        config: SessionConfig,
        runner: R,
        clock: C,
    ) -> Result<Self> {
        let session_name = session_name.into();
        let log_path = config.log_path(&session_name);
        let log = LogTailReader::open(&log_path, clock.clone()).await?;
        Ok(Self {
            session: DeviceSession::new(session_name, log_path),
            config,
            runner,
            clock,
            log,
        })
    }

    /// Create a controller and start its session
    pub async fn connect(
        session_name: impl Into<String>,
        config: SessionConfig,
        runner: R,
        clock: C,
    ) -> Result<Self> {
        let mut controller = Self::new(session_name, config, runner, clock).await?;
        controller.start().await?;
        Ok(controller)
    }

    /// The current session state
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn log(&self) -> &LogTailReader<C> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut LogTailReader<C> {
        &mut self.log
    }

    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    fn transition(&mut self, transition: SessionTransition) {
        self.session = self.session.apply(transition);
        debug!("Session is now: {}", self.session);
    }

    /// Launch the interactive session and confirm the prompt responds.
    ///
    /// When the launch fails, a bootloader probe runs to tell an unreachable
    /// device apart from one that is already in bootloader mode; either way
    /// a [`Error::DeviceCommunication`] with the helper's output is returned.
    pub async fn start(&mut self) -> Result<&DeviceSession> {
        let script = self.config.start_script(self.session.name());
        let invocation = ToolInvocation::new(&self.config.shell)
            .arg(script.display().to_string())
            .arg(self.session.log_path().display().to_string());

        info!("Starting session '{}'", self.session.name());
        let failure = match self.runner.run(&invocation).await {
            Ok(output) if output.success() => {
                let markers = parse_banner(&output.combined());
                debug!("Session banner markers: {:?}", markers);

                // make sure we're at an input line
                let nudge = self.send(SessionCommand::stuff(""), &[]).await?;
                if !nudge.success() {
                    warn!(
                        "Session prompt did not acknowledge input: {}",
                        nudge.combined().trim_end()
                    );
                }

                self.transition(SessionTransition::Started {
                    mount_path: markers.mount_path,
                    serial_address: markers.serial_address,
                });
                return Ok(&self.session);
            }
            Ok(output) => output.combined(),
            Err(e) => e.to_string(),
        };

        error!("Session '{}' failed to start", self.session.name());
        let message = match self.discover_boot_mount().await {
            Ok(mount) => format!(
                "starting the screen session (the device is in bootloader mode at {})",
                mount.display()
            ),
            Err(probe) => {
                debug!("Bootloader probe after failed start: {}", probe);
                "starting the screen session".to_string()
            }
        };
        Err(Error::device_command(
            message,
            invocation.command_line(),
            failure,
        ))
    }

    /// Locate the device's bootloader drive and mark the session as in boot mode
    pub async fn discover_boot_mount(&mut self) -> Result<PathBuf> {
        let script = self.config.boot_script(self.session.name());
        let invocation = ToolInvocation::new(&self.config.shell).arg(script.display().to_string());

        let output = self.runner.run(&invocation).await.map_err(|e| {
            Error::device_command(
                "locating the bootloader drive",
                invocation.command_line(),
                e.to_string(),
            )
        })?;
        if !output.success() {
            return Err(Error::device_command(
                "locating the bootloader drive",
                invocation.command_line(),
                output.combined(),
            ));
        }

        let mount_path = parse_banner(&output.combined())
            .mount_path
            .ok_or_else(|| {
                Error::device_command(
                    "locating the bootloader drive (no mount path reported)",
                    invocation.command_line(),
                    output.combined(),
                )
            })?;

        info!("Bootloader drive found at {}", mount_path.display());
        self.transition(SessionTransition::BootMountDiscovered {
            mount_path: mount_path.clone(),
        });
        Ok(mount_path)
    }

    /// Forward a command to the session.
    ///
    /// Blocked commands are rejected before anything runs. The result is
    /// returned as-is; callers decide what a nonzero status means.
    pub async fn send(
        &self,
        command: impl Into<SessionCommand>,
        extra_args: &[&str],
    ) -> Result<ToolOutput> {
        let command = command.into();
        command.validate()?;

        let invocation = ToolInvocation::new(&self.config.session_tool)
            .args(["-S", self.session.name(), "-X"])
            .args(extra_args.iter().copied())
            .args(command.terminated_tokens());

        trace!("Session command: {}", invocation);
        self.runner.run(&invocation).await.map_err(|e| {
            Error::device_command(
                "sending commands to the session",
                invocation.command_line(),
                e.to_string(),
            )
        })
    }

    /// Reboot the device into its bootloader; see [`BootstrapOrchestrator`]
    pub async fn reset_to_boot(&mut self) -> Result<bool> {
        BootstrapOrchestrator::new(self).reset_to_bootloader().await
    }

    pub(crate) async fn settle(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }

    pub fn mount_path(&self) -> Option<&Path> {
        self.session.mount_path()
    }
}
