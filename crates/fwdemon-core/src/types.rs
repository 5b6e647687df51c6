//! Domain types for device sessions, session commands and firmware builds

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Device Session
// ─────────────────────────────────────────────────────────────────

/// Snapshot of one interactive device session.
///
/// A session is never mutated in place. The controller that owns it replaces
/// it with the value returned by [`DeviceSession::apply`], so every state the
/// session passes through is an explicit transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    name: String,
    log_path: PathBuf,
    mount_path: Option<PathBuf>,
    serial_address: Option<String>,
    boot_mode: bool,
}

/// A state change reported by the device helpers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// The normal interactive session came up. Markers that were missing from
    /// the startup banner keep their previous value.
    Started {
        mount_path: Option<PathBuf>,
        serial_address: Option<String>,
    },
    /// The bootloader helper found the device's bootloader drive.
    BootMountDiscovered { mount_path: PathBuf },
}

impl DeviceSession {
    /// Create a session that has not been started yet
    pub fn new(name: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            log_path: log_path.into(),
            mount_path: None,
            serial_address: None,
            boot_mode: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn mount_path(&self) -> Option<&Path> {
        self.mount_path.as_deref()
    }

    pub fn serial_address(&self) -> Option<&str> {
        self.serial_address.as_deref()
    }

    /// Whether the last discovery found the device in bootloader mode
    pub fn boot_mode(&self) -> bool {
        self.boot_mode
    }

    /// Compute the next session state
    pub fn apply(&self, transition: SessionTransition) -> DeviceSession {
        match transition {
            SessionTransition::Started {
                mount_path,
                serial_address,
            } => DeviceSession {
                name: self.name.clone(),
                log_path: self.log_path.clone(),
                mount_path: mount_path.or_else(|| self.mount_path.clone()),
                serial_address: serial_address.or_else(|| self.serial_address.clone()),
                boot_mode: false,
            },
            SessionTransition::BootMountDiscovered { mount_path } => DeviceSession {
                name: self.name.clone(),
                log_path: self.log_path.clone(),
                mount_path: Some(mount_path),
                serial_address: self.serial_address.clone(),
                boot_mode: true,
            },
        }
    }
}

impl fmt::Display for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount = self
            .mount_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "Session Name: {}, Boot Mode: {}, USB Mountpoint: {}, Serial Device Address: {}",
            self.name,
            self.boot_mode,
            mount,
            self.serial_address.as_deref().unwrap_or("-")
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Commands
// ─────────────────────────────────────────────────────────────────

/// Session commands that would kill or reconfigure the session itself
pub const BLOCKED_SESSION_COMMANDS: &[&str] = &["at", "deflogin", "defshell", "exec"];

/// Line ending appended to the last token of every session command
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// A command forwarded verbatim to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// A command without arguments (e.g. `kill`)
    Bare(String),
    /// A command with arguments (e.g. `stuff "import os"`)
    Tokens(Vec<String>),
}

impl SessionCommand {
    /// Type `text` into the session as if entered on the keyboard
    pub fn stuff(text: impl Into<String>) -> Self {
        SessionCommand::Tokens(vec!["stuff".to_string(), text.into()])
    }

    pub fn tokens(&self) -> &[String] {
        match self {
            SessionCommand::Bare(token) => std::slice::from_ref(token),
            SessionCommand::Tokens(tokens) => tokens,
        }
    }

    /// Reject commands from [`BLOCKED_SESSION_COMMANDS`] and empty commands
    pub fn validate(&self) -> Result<()> {
        if self.tokens().is_empty() {
            return Err(Error::argument("session command must not be empty"));
        }
        if let Some(blocked) = self
            .tokens()
            .iter()
            .find(|token| BLOCKED_SESSION_COMMANDS.contains(&token.as_str()))
        {
            return Err(Error::argument(format!(
                "'{}' command is not allowed",
                blocked
            )));
        }
        Ok(())
    }

    /// Tokens as sent, with [`COMMAND_TERMINATOR`] on the final one
    pub fn terminated_tokens(&self) -> Vec<String> {
        let mut tokens = self.tokens().to_vec();
        if let Some(last) = tokens.last_mut() {
            last.push_str(COMMAND_TERMINATOR);
        }
        tokens
    }
}

impl From<&str> for SessionCommand {
    fn from(token: &str) -> Self {
        SessionCommand::Bare(token.to_string())
    }
}

impl From<String> for SessionCommand {
    fn from(token: String) -> Self {
        SessionCommand::Bare(token)
    }
}

impl From<Vec<String>> for SessionCommand {
    fn from(tokens: Vec<String>) -> Self {
        SessionCommand::Tokens(tokens)
    }
}

impl From<Vec<&str>> for SessionCommand {
    fn from(tokens: Vec<&str>) -> Self {
        SessionCommand::Tokens(tokens.into_iter().map(str::to_string).collect())
    }
}

// ─────────────────────────────────────────────────────────────────
// Log Search
// ─────────────────────────────────────────────────────────────────

/// How a log line is compared against a search pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchType {
    /// Whole-line equality
    #[default]
    Exact,
    Prefix,
    Suffix,
    Substring,
}

impl SearchType {
    pub const VALID_NAMES: &'static [&'static str] = &["exact", "prefix", "suffix", "substring"];

    pub fn matches(&self, line: &str, pattern: &str) -> bool {
        match self {
            SearchType::Exact => line == pattern,
            SearchType::Prefix => line.starts_with(pattern),
            SearchType::Suffix => line.ends_with(pattern),
            SearchType::Substring => line.contains(pattern),
        }
    }
}

impl FromStr for SearchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(SearchType::Exact),
            "prefix" | "startswith" => Ok(SearchType::Prefix),
            "suffix" | "endswith" => Ok(SearchType::Suffix),
            "substring" | "in" => Ok(SearchType::Substring),
            other => Err(Error::argument(format!(
                "'{}' not a valid search type. Valid types are: {}",
                other,
                Self::VALID_NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchType::Exact => write!(f, "exact"),
            SearchType::Prefix => write!(f, "prefix"),
            SearchType::Suffix => write!(f, "suffix"),
            SearchType::Substring => write!(f, "substring"),
        }
    }
}

/// Convert a user-supplied number of seconds into a timeout.
///
/// Negative, non-finite and out-of-range values are rejected.
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() {
        return Err(Error::argument("'timeout' must be a finite number of seconds"));
    }
    if secs < 0.0 {
        return Err(Error::argument("'timeout' must be zero or greater"));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::argument(format!("'timeout' of {} seconds: {}", secs, e)))
}

// ─────────────────────────────────────────────────────────────────
// Firmware Builds
// ─────────────────────────────────────────────────────────────────

/// Number of revision characters used for the build cache directory
pub const REVISION_PREFIX_LEN: usize = 5;

/// The short revision prefix that keys the build cache
pub fn revision_prefix(revision: &str) -> &str {
    match revision.char_indices().nth(REVISION_PREFIX_LEN) {
        Some((idx, _)) => &revision[..idx],
        None => revision,
    }
}

/// Lifecycle of a build artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Output directory chosen, toolchain not finished
    Pending,
    /// Toolchain succeeded
    Built,
}

/// Firmware produced for one board at one revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub board_id: String,
    pub revision: String,
    pub output_dir: PathBuf,
    pub status: BuildStatus,
    /// Toolchain output lines reporting the image size
    pub size_summary: Vec<String>,
}

impl BuildArtifact {
    pub fn pending(
        board_id: impl Into<String>,
        revision: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            board_id: board_id.into(),
            revision: revision.into(),
            output_dir: output_dir.into(),
            status: BuildStatus::Pending,
            size_summary: Vec::new(),
        }
    }

    /// Mark the artifact as built (builder pattern)
    pub fn built(mut self, size_summary: Vec<String>) -> Self {
        self.status = BuildStatus::Built;
        self.size_summary = size_summary;
        self
    }

    pub fn is_built(&self) -> bool {
        self.status == BuildStatus::Built
    }
}
