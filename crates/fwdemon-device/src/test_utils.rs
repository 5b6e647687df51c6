//! Test utilities for device types
//!
//! Provides a virtual clock and scripted fakes for the tool runner and the
//! firmware transport, so session and deploy logic can be exercised without
//! hardware, helper scripts or real sleeps.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::runner::{ToolInvocation, ToolOutput, ToolRunner};
use crate::transport::FirmwareTransport;
use fwdemon_core::prelude::*;

// ─────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────

/// A clock that only moves when something sleeps on it
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Virtual time passed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

// ─────────────────────────────────────────────────────────────────
// Tool Runner
// ─────────────────────────────────────────────────────────────────

type Responder = dyn Fn(&ToolInvocation) -> ToolOutput + Send + Sync;

/// Records every invocation and answers from a closure
#[derive(Clone)]
pub struct FakeRunner {
    calls: Arc<Mutex<Vec<ToolInvocation>>>,
    responder: Arc<Responder>,
}

impl FakeRunner {
    /// Every invocation succeeds with empty output
    pub fn succeeding() -> Self {
        Self::with_responder(|_| ok_output(""))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&ToolInvocation) -> ToolOutput + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of one program, in order
    pub fn calls_to(&self, program: &str) -> Vec<ToolInvocation> {
        self.calls()
            .into_iter()
            .filter(|call| call.program == program)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Command lines of every invocation, for readable assertions
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToolInvocation::command_line).collect()
    }
}

impl fmt::Debug for FakeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeRunner")
            .field("calls", &self.call_count())
            .finish()
    }
}

impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok((self.responder)(invocation))
    }
}

/// A successful invocation with the given stdout
pub fn ok_output(stdout: &str) -> ToolOutput {
    ToolOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// A failed invocation with the given exit code and stdout
pub fn failed_output(code: i32, stdout: &str) -> ToolOutput {
    ToolOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Startup text of a session helper reporting both markers
pub fn session_banner(mount: &str, tty: &str) -> String {
    format!(
        "Starting session...\n > USB: {}\n > Serial tty: {}\nSession started.\n",
        mount, tty
    )
}

/// Output of the bootloader helper reporting the boot drive
pub fn boot_banner(mount: &str) -> String {
    format!("Searching for bootloader...\n > USB: {}\n", mount)
}

// ─────────────────────────────────────────────────────────────────
// Firmware Transport
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TransportState {
    in_bootloader: bool,
    banner: String,
    fail_upload: bool,
    uploads: Vec<(PathBuf, PathBuf)>,
}

/// Scripted firmware transport that records uploads
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    /// A device in bootloader mode reporting `banner`
    pub fn bootloader(banner: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                in_bootloader: true,
                banner: banner.to_string(),
                ..Default::default()
            })),
        }
    }

    /// A drive that is not a bootloader
    pub fn not_in_bootloader() -> Self {
        Self::default()
    }

    /// A bootloader whose uploads fail
    pub fn failing_upload(banner: &str) -> Self {
        let transport = Self::bootloader(banner);
        transport.state.lock().unwrap().fail_upload = true;
        transport
    }

    /// (mount path, image) of every successful upload
    pub fn uploads(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().unwrap().uploads.clone()
    }
}

impl FirmwareTransport for FakeTransport {
    async fn is_in_bootloader(&self, _mount_path: &Path) -> bool {
        self.state.lock().unwrap().in_bootloader
    }

    async fn read_banner(&self, _mount_path: &Path) -> Result<String> {
        Ok(self.state.lock().unwrap().banner.clone())
    }

    async fn upload(&self, mount_path: &Path, image: &Path) -> Result<u64> {
        let bytes = tokio::fs::metadata(image)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        let mut state = self.state.lock().unwrap();
        if state.fail_upload {
            return Err(Error::device_command(
                "copying new firmware",
                format!("cp {} {}", image.display(), mount_path.display()),
                "No space left on device",
            ));
        }
        state
            .uploads
            .push((mount_path.to_path_buf(), image.to_path_buf()));
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let start = Clock::now(&clock);
        Clock::sleep(&clock, Duration::from_secs(30)).await;
        assert_eq!(Clock::now(&clock) - start, Duration::from_secs(30));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
    }

    #[tokio::test]
    async fn test_fake_runner_records_calls() {
        let runner = FakeRunner::with_responder(|inv| {
            if inv.program == "git" {
                failed_output(128, "fatal")
            } else {
                ok_output("ok")
            }
        });
        let out = ToolRunner::run(&runner, &ToolInvocation::new("git").arg("fetch"))
            .await
            .unwrap();
        assert_eq!(out.code, Some(128));
        let out = ToolRunner::run(&runner, &ToolInvocation::new("make")).await.unwrap();
        assert!(out.success());

        assert_eq!(runner.call_count(), 2);
        assert_eq!(runner.calls_to("git").len(), 1);
        assert_eq!(runner.command_lines(), vec!["git fetch", "make"]);
    }

    #[test]
    fn test_banners_carry_markers() {
        let text = session_banner("/media/pi/CIRCUITPY", "/dev/ttyACM0");
        assert!(text.contains("> USB: /media/pi/CIRCUITPY"));
        assert!(text.contains("> Serial tty: /dev/ttyACM0"));
        assert!(boot_banner("/media/pi/METROBOOT").contains("> USB: /media/pi/METROBOOT"));
    }
}
