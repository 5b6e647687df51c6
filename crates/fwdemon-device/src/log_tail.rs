//! Append-only session log tailing
//!
//! The session helper writes everything the device prints into a plain text
//! log. [`LogTailReader`] follows that file like `tail -f`: each read returns
//! only the complete lines appended since the previous read, and
//! [`LogTailReader::wait_for`] polls until a line of interest shows up.
//!
//! Change detection polls the file's modification time at a fixed interval.
//! The interval is part of the wait semantics, so the clock is injected and
//! no filesystem notification mechanism is used.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

use crate::clock::{Clock, TokioClock};
use fwdemon_core::logging::DEVICE_OUTPUT_TARGET;
use fwdemon_core::prelude::*;
use fwdemon_core::SearchType;

/// Interval between modification-time checks of a blocking tail
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Blocking window of each tail issued by [`LogTailReader::wait_for`]
pub const WAIT_POLL_WINDOW: Duration = Duration::from_secs(1);

/// Lines containing this marker (case-insensitive) report a device-side exception
pub const EXCEPTION_MARKER: &str = "exception:";

/// Read progress through one log file.
///
/// `last_read_line_count` counts every line delivered so far and never
/// decreases, even when the log is cleared and the byte offset rewinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    log_path: PathBuf,
    last_read_line_count: usize,
    last_read_offset: u64,
    last_read_timestamp: Option<SystemTime>,
}

impl LogCursor {
    /// A cursor that has read nothing yet
    pub fn at_start(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            last_read_line_count: 0,
            last_read_offset: 0,
            last_read_timestamp: None,
        }
    }

    /// A cursor positioned after the last complete line already in the log.
    ///
    /// Existing content counts as read, so only output produced after the
    /// session starts is delivered.
    pub async fn at_end(log_path: impl Into<PathBuf>) -> Result<Self> {
        let log_path = log_path.into();
        let cursor = Self::at_start(&log_path);
        let bytes = match tokio::fs::read(&log_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cursor),
            Err(e) => return Err(e.into()),
        };
        let (lines, consumed) = split_complete_lines(&bytes);
        Ok(cursor.advanced(consumed, lines.len(), None))
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn last_read_line_count(&self) -> usize {
        self.last_read_line_count
    }

    pub fn last_read_offset(&self) -> u64 {
        self.last_read_offset
    }

    pub fn last_read_timestamp(&self) -> Option<SystemTime> {
        self.last_read_timestamp
    }

    fn advanced(&self, consumed: u64, lines: usize, modified: Option<SystemTime>) -> LogCursor {
        LogCursor {
            log_path: self.log_path.clone(),
            last_read_line_count: self.last_read_line_count + lines,
            last_read_offset: self.last_read_offset + consumed,
            last_read_timestamp: modified.or(self.last_read_timestamp),
        }
    }

    fn rewound(&self, modified: Option<SystemTime>) -> LogCursor {
        LogCursor {
            log_path: self.log_path.clone(),
            last_read_line_count: self.last_read_line_count,
            last_read_offset: 0,
            last_read_timestamp: modified,
        }
    }
}

impl fmt::Display for LogCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_read = self
            .last_read_timestamp
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        write!(
            f,
            "({}, {}, {})",
            self.log_path.display(),
            last_read,
            self.last_read_line_count
        )
    }
}

/// Options for [`LogTailReader::wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub search_type: SearchType,
    /// Overall bound on the wait, measured from the call. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Stop at the first line carrying [`EXCEPTION_MARKER`]
    pub auto_exception: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            search_type: SearchType::Exact,
            timeout: None,
            auto_exception: true,
        }
    }
}

impl WaitOptions {
    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_auto_exception(mut self, auto_exception: bool) -> Self {
        self.auto_exception = auto_exception;
        self
    }
}

/// Check whether a log line reports an exception on the device
pub fn is_exception_line(line: &str) -> bool {
    line.to_lowercase().contains(EXCEPTION_MARKER)
}

/// Pick the line a wait should return from one batch of new lines.
///
/// With `auto_exception`, an exception line wins over any pattern match in the
/// same batch, wherever it appears.
pub fn scan_lines(lines: &[String], pattern: &str, options: &WaitOptions) -> Option<String> {
    if options.auto_exception {
        if let Some(line) = lines.iter().find(|line| is_exception_line(line)) {
            return Some(line.clone());
        }
    }
    lines
        .iter()
        .find(|line| options.search_type.matches(line, pattern))
        .cloned()
}

/// Split off every newline-terminated line, returning the lines (without
/// their terminators) and the number of bytes they occupied.
fn split_complete_lines(bytes: &[u8]) -> (Vec<String>, u64) {
    let Some(last_newline) = bytes.iter().rposition(|b| *b == b'\n') else {
        return (Vec::new(), 0);
    };
    let complete = &bytes[..=last_newline];
    let lines = complete[..last_newline]
        .split(|b| *b == b'\n')
        .map(|raw| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            String::from_utf8_lossy(raw).into_owned()
        })
        .collect();
    (lines, complete.len() as u64)
}

fn cursor_log_name(cursor: &LogCursor) -> String {
    cursor
        .log_path()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| cursor.log_path().display().to_string())
}

/// Follows a session log through a [`LogCursor`]
#[derive(Debug)]
pub struct LogTailReader<C = TokioClock> {
    cursor: LogCursor,
    clock: C,
}

impl<C: Clock> LogTailReader<C> {
    /// Follow `log_path`, skipping whatever it already contains
    pub async fn open(log_path: impl Into<PathBuf>, clock: C) -> Result<Self> {
        let cursor = LogCursor::at_end(log_path).await?;
        debug!("Following session log {}", cursor);
        Ok(Self { cursor, clock })
    }

    pub fn from_cursor(cursor: LogCursor, clock: C) -> Self {
        Self { cursor, clock }
    }

    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    pub fn log_path(&self) -> &Path {
        self.cursor.log_path()
    }

    async fn modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(self.cursor.log_path())
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
    }

    async fn log_updated(&self) -> bool {
        match (self.modified().await, self.cursor.last_read_timestamp()) {
            (Some(modified), Some(last_read)) => modified > last_read,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Return the lines appended since the last successful read.
    ///
    /// With `blocking`, first polls every [`POLL_INTERVAL`] until the log's
    /// modification time changes or `timeout` elapses, then reads once. A
    /// timeout too large to represent as a deadline blocks until the log
    /// changes. A missing log reads as no new lines.
    pub async fn tail(&mut self, blocking: bool, timeout: Duration) -> Result<Vec<String>> {
        if blocking {
            let deadline = self.clock.now().checked_add(timeout);
            while !self.log_updated().await {
                if deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
                    trace!("No log update within {:?}", timeout);
                    break;
                }
                self.clock.sleep(POLL_INTERVAL).await;
            }
        }
        self.read_new_lines().await
    }

    async fn read_new_lines(&mut self) -> Result<Vec<String>> {
        // Stat before reading so a write racing the read still looks like an update.
        let modified = self.modified().await;
        let bytes = match tokio::fs::read(self.cursor.log_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut cursor = self.cursor.clone();
        if (bytes.len() as u64) < cursor.last_read_offset() {
            warn!(
                "Log {} shrank below the read position, reading from the start",
                cursor.log_path().display()
            );
            cursor = cursor.rewound(None);
        }

        let start = cursor.last_read_offset() as usize;
        let (lines, consumed) = split_complete_lines(&bytes[start..]);
        self.cursor = cursor.advanced(consumed, lines.len(), modified);

        let log = cursor_log_name(&self.cursor);
        for line in &lines {
            debug!(target: DEVICE_OUTPUT_TARGET, session = %log, "{}", line);
        }
        Ok(lines)
    }

    /// Poll the log until a line matches `pattern`.
    ///
    /// Returns the matching line, the first exception line when
    /// `auto_exception` is set, or an empty string once `options.timeout` has
    /// elapsed. The timeout is measured from this call; each inner tail
    /// blocks for at most [`WAIT_POLL_WINDOW`], so a wait can overrun its
    /// timeout by up to one window. A timeout too large to represent as a
    /// deadline waits forever.
    ///
    /// Only newline-terminated lines are scanned. A prompt the device prints
    /// without a trailing newline (such as `">>> "`) is not seen until more
    /// output completes its line.
    pub async fn wait_for(&mut self, pattern: &str, options: WaitOptions) -> Result<String> {
        debug!(
            "Waiting for {} match of {:?} (timeout: {:?})",
            options.search_type, pattern, options.timeout
        );
        let deadline = options
            .timeout
            .and_then(|timeout| self.clock.now().checked_add(timeout));

        loop {
            let lines = self.tail(true, WAIT_POLL_WINDOW).await?;
            if let Some(found) = scan_lines(&lines, pattern, &options) {
                if options.auto_exception && is_exception_line(&found) {
                    warn!("Device reported an exception: {}", found);
                }
                return Ok(found);
            }

            if let Some(deadline) = deadline {
                if self.clock.now() >= deadline {
                    debug!("Timed out waiting for {:?}", pattern);
                    return Ok(String::new());
                }
            }
        }
    }

    /// Truncate the log and rewind the cursor to its start
    pub async fn clear(&mut self) -> Result<()> {
        let path = self.cursor.log_path().to_path_buf();
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, b"").await?;
        }
        let modified = self.modified().await;
        self.cursor = self.cursor.rewound(modified);
        info!("Cleared session log {}", path.display());
        Ok(())
    }
}
