//! Firmware builds from a shared source clone
//!
//! One local clone of the firmware source is reused for every build: it is
//! moved to the requested revision, the board's port is built with `make`
//! into the build cache, and the clone is forced back to the baseline
//! revision afterwards whatever happened. Every tool call carries its own
//! working directory; the process working directory is never touched.

use std::path::{Path, PathBuf};

use fwdemon_core::prelude::*;
use fwdemon_core::{revision_prefix, BuildArtifact};
use fwdemon_device::{SystemToolRunner, ToolInvocation, ToolOutput, ToolRunner};

use crate::config::BuildSettings;

/// Environment override applied to every toolchain phase
pub const TOOLCHAIN_ENV: (&str, &str) = ("BASH_ENV", "/etc/profile");

/// Script run by the shell for each toolchain phase; arguments follow as `$@`
pub const MAKE_SCRIPT: &str = r#"exec make "$@" 2>&1"#;

/// Permissions of a freshly created output directory
pub const OUTPUT_DIR_MODE: u32 = 0o774;

/// Extension of flashable images
pub const FIRMWARE_EXTENSION: &str = "uf2";

/// Marker of the toolchain's image size report lines
const SIZE_MARKER: &str = "bytes";

/// One `make` run against a port directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainPhase {
    /// `make clean`; failures are ignored
    Clean,
    /// The firmware build itself; failures abort
    Build,
}

impl ToolchainPhase {
    pub fn make_args(&self, board_id: &str, output_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if *self == ToolchainPhase::Clean {
            args.push("clean".to_string());
        }
        args.push(format!("BOARD={}", board_id));
        args.push(format!("BUILD={}", output_dir.display()));
        args
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolchainPhase::Build)
    }

    /// `<shell> -c 'exec make "$@" 2>&1' make <args>` in `port_dir`
    pub fn invocation(
        &self,
        shell: &str,
        port_dir: &Path,
        board_id: &str,
        output_dir: &Path,
    ) -> ToolInvocation {
        ToolInvocation::new(shell)
            .args(["-c", MAKE_SCRIPT, "make"])
            .args(self.make_args(board_id, output_dir))
            .current_dir(port_dir)
            .env(TOOLCHAIN_ENV.0, TOOLCHAIN_ENV.1)
    }
}

impl std::fmt::Display for ToolchainPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolchainPhase::Clean => write!(f, "clean"),
            ToolchainPhase::Build => write!(f, "build"),
        }
    }
}

/// Resolved build settings
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    pub source_dir: PathBuf,
    pub remote: String,
    pub baseline_revision: String,
    pub ports: Vec<String>,
    pub cache_dir: PathBuf,
    pub shell: String,
}

impl BuildConfig {
    pub fn from_settings(settings: &BuildSettings) -> Result<Self> {
        Ok(Self {
            source_dir: settings.source_dir()?,
            remote: settings.remote.clone(),
            baseline_revision: settings.baseline_revision.clone(),
            ports: settings.ports.clone(),
            cache_dir: settings.cache_dir()?,
            shell: settings.shell.clone(),
        })
    }
}

/// Builds firmware images for one board at a time
#[derive(Debug)]
pub struct FirmwareBuildPipeline<R = SystemToolRunner> {
    config: BuildConfig,
    runner: R,
}

impl<R: ToolRunner> FirmwareBuildPipeline<R> {
    pub fn new(config: BuildConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Port directory whose `boards/` contains `board_id`, first port wins
    pub fn locate_board(&self, board_id: &str) -> Option<PathBuf> {
        let ports_dir = self.config.source_dir.join("ports");
        self.config
            .ports
            .iter()
            .map(|port| ports_dir.join(port))
            .find(|port_dir| port_dir.join("boards").join(board_id).is_dir())
    }

    /// `<cache_dir>/<revision prefix>/<board_id>`
    pub fn output_dir(&self, board_id: &str, revision: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(revision_prefix(revision))
            .join(board_id)
    }

    /// Shallow-clone the source when the source directory is not a clone yet.
    ///
    /// Returns whether a clone was made.
    pub async fn ensure_source_clone(&self) -> Result<bool> {
        let source_dir = &self.config.source_dir;
        if source_dir.join(".git").exists() {
            debug!("Source clone present at {}", source_dir.display());
            return Ok(false);
        }

        info!("Cloning {} into {}", self.config.remote, source_dir.display());
        if let Some(parent) = source_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let clone = ToolInvocation::new("git")
            .args(["clone", "--depth", "1", &self.config.remote])
            .arg(source_dir.display().to_string());
        self.run_checked(&clone, "cloning the source").await?;
        Ok(true)
    }

    /// Build `board_id` at `revision` into the build cache.
    ///
    /// The clone is returned to the baseline revision exactly once on the
    /// way out, whether the build succeeded or not.
    pub async fn build(&self, board_id: &str, revision: &str) -> Result<BuildArtifact> {
        let port_dir = self.locate_board(board_id).ok_or_else(|| {
            Error::build(format!(
                "'{}' board not available to test. Can't build firmware.",
                board_id
            ))
        })?;
        info!("Board source found: {}", port_dir.display());

        let artifact = BuildArtifact::pending(board_id, revision, self.output_dir(board_id, revision));
        let result = self.build_at_revision(&port_dir, &artifact).await;
        self.rollback().await;

        let size_summary = result?;
        info!("Firmware built in {}", artifact.output_dir.display());
        Ok(artifact.built(size_summary))
    }

    async fn build_at_revision(&self, port_dir: &Path, artifact: &BuildArtifact) -> Result<Vec<String>> {
        self.synchronize(&artifact.revision).await?;

        let clean = self
            .run_phase(ToolchainPhase::Clean, port_dir, artifact)
            .await;
        match clean {
            Ok(output) if !output.success() => {
                debug!("Build clean failed: {}", output.combined().trim_end())
            }
            Err(e) => debug!("Build clean failed: {}", e),
            Ok(_) => {}
        }

        create_output_dir(&artifact.output_dir).await?;

        let build = ToolchainPhase::Build.invocation(
            &self.config.shell,
            port_dir,
            &artifact.board_id,
            &artifact.output_dir,
        );
        let output = self.run_checked(&build, "running the toolchain").await?;

        let size_summary: Vec<String> = output
            .combined()
            .lines()
            .filter(|line| line.contains(SIZE_MARKER))
            .map(str::to_string)
            .collect();
        for line in &size_summary {
            info!(" - {}", line);
        }
        Ok(size_summary)
    }

    /// Move the clone to `revision`
    async fn synchronize(&self, revision: &str) -> Result<()> {
        let steps: [(&str, Vec<&str>); 4] = [
            ("fetching", vec!["fetch", "--depth", "1", "origin", revision]),
            ("checking out", vec!["checkout", revision]),
            ("syncing submodules", vec!["submodule", "sync"]),
            (
                "updating submodules",
                vec!["submodule", "update", "--init", "--depth", "1"],
            ),
        ];
        for (what, args) in steps {
            info!("{} {}...", what, revision);
            self.run_checked(&self.git(args), what).await?;
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        phase: ToolchainPhase,
        port_dir: &Path,
        artifact: &BuildArtifact,
    ) -> Result<ToolOutput> {
        info!("Running build {}...", phase);
        let invocation = phase.invocation(
            &self.config.shell,
            port_dir,
            &artifact.board_id,
            &artifact.output_dir,
        );
        self.runner.run(&invocation).await
    }

    /// Force the clone back to the baseline revision
    async fn rollback(&self) {
        let checkout = self.git(["checkout", "-f", self.config.baseline_revision.as_str()]);
        match self.runner.run(&checkout).await {
            Ok(output) if output.success() => {
                debug!("Source reset to {}", self.config.baseline_revision)
            }
            Ok(output) => error!(
                "Failed to reset source to {}: {}",
                self.config.baseline_revision,
                output.combined().trim_end()
            ),
            Err(e) => error!(
                "Failed to reset source to {}: {}",
                self.config.baseline_revision, e
            ),
        }
    }

    fn git<I, S>(&self, args: I) -> ToolInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolInvocation::new("git")
            .args(args)
            .current_dir(&self.config.source_dir)
    }

    /// Run `invocation`, turning a nonzero exit into a build error
    async fn run_checked(&self, invocation: &ToolInvocation, what: &str) -> Result<ToolOutput> {
        let output = self.runner.run(invocation).await.map_err(|e| {
            Error::build_command(what, invocation.command_line(), e.to_string())
        })?;
        if !output.success() {
            warn!("Firmware build failed while {}", what);
            return Err(Error::build_command(
                what,
                invocation.command_line(),
                output.combined(),
            ));
        }
        Ok(output)
    }
}

async fn create_output_dir(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(OUTPUT_DIR_MODE);
    builder.create(dir).await?;
    Ok(())
}

/// The `.uf2` image in a build output directory
pub async fn find_firmware_image(output_dir: &Path) -> Result<PathBuf> {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::resource_not_found(output_dir))
        }
        Err(e) => return Err(e.into()),
    };

    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == FIRMWARE_EXTENSION) && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    images
        .into_iter()
        .next()
        .ok_or_else(|| Error::resource_not_found(output_dir.join(format!("firmware.{}", FIRMWARE_EXTENSION))))
}
