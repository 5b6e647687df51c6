//! End-to-end run: connect, optionally build, deploy
//!
//! Mirrors what an operator does by hand at the test rig: open the board's
//! session, get a firmware image (built from a revision or supplied
//! directly), flash it, and come back to a live session ready for tests.

use std::fmt;
use std::path::{Path, PathBuf};

use fwdemon_core::prelude::*;
use fwdemon_core::{BuildArtifact, DeviceSession};
use fwdemon_device::{
    Clock, FirmwareTransport, SessionController, SystemToolRunner, TokioClock, ToolRunner,
    Uf2MassStorage,
};

use crate::build_pipeline::{find_firmware_image, BuildConfig, FirmwareBuildPipeline};
use crate::config::Settings;
use crate::deploy::{DeployReport, FirmwareDeployer};

/// Kind of tests the run prepares the board for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestKind {
    Unit,
    #[default]
    Physical,
}

impl TestKind {
    /// Pick the test kind from the two mutually exclusive CLI flags
    pub fn from_flags(unit: bool, physical: bool) -> Result<Self> {
        match (unit, physical) {
            (true, true) => Err(Error::argument(
                "Cannot run more than one test type per instance.",
            )),
            (true, false) => Ok(TestKind::Unit),
            _ => Ok(TestKind::Physical),
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKind::Unit => write!(f, "unit"),
            TestKind::Physical => write!(f, "physical"),
        }
    }
}

/// Where the firmware for this run comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    /// Leave the board's firmware alone
    Keep,
    /// Build the given revision first
    Revision(String),
    /// Flash an existing image
    Image(PathBuf),
}

/// What to do in one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Board identifier, also the session name
    pub board: String,
    pub test_kind: TestKind,
    pub firmware: FirmwareSource,
}

impl RunPlan {
    pub fn new(board: &str, test_kind: TestKind, firmware: FirmwareSource) -> Self {
        Self {
            board: board.to_lowercase(),
            test_kind,
            firmware,
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session: DeviceSession,
    pub artifact: Option<BuildArtifact>,
    pub deploy: Option<DeployReport>,
}

/// Runs a [`RunPlan`] against real or substituted collaborators
#[derive(Debug)]
pub struct RunOrchestrator<R = SystemToolRunner, T = Uf2MassStorage, C = TokioClock> {
    settings: Settings,
    config_dir: PathBuf,
    runner: R,
    transport: T,
    clock: C,
}

impl RunOrchestrator {
    /// Orchestrator driving real tools, the UF2 drive and wall-clock time
    pub fn system(settings: Settings, config_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            settings,
            config_dir,
            SystemToolRunner,
            Uf2MassStorage,
            TokioClock,
        )
    }
}

impl<R, T, C> RunOrchestrator<R, T, C>
where
    R: ToolRunner + Clone,
    T: FirmwareTransport + Clone,
    C: Clock + Clone,
{
    pub fn new(
        settings: Settings,
        config_dir: impl Into<PathBuf>,
        runner: R,
        transport: T,
        clock: C,
    ) -> Self {
        Self {
            settings,
            config_dir: config_dir.into(),
            runner,
            transport,
            clock,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub async fn run(&self, plan: &RunPlan) -> Result<RunSummary> {
        let session_config = self.settings.session.to_session_config(&self.config_dir)?;
        let reboot_settle = self.settings.deploy.reboot_settle()?;

        let mut controller = SessionController::new(
            plan.board.clone(),
            session_config,
            self.runner.clone(),
            self.clock.clone(),
        )
        .await?;
        self.connect(&mut controller).await?;
        info!("{}", controller.session());

        let (artifact, image) = match &plan.firmware {
            FirmwareSource::Keep => (None, None),
            FirmwareSource::Image(path) => (None, Some(path.clone())),
            FirmwareSource::Revision(revision) => {
                let artifact = self.build(&plan.board, revision).await?;
                let image = find_firmware_image(&artifact.output_dir).await?;
                (Some(artifact), Some(image))
            }
        };

        let deploy = match image {
            Some(image) => {
                let deployer = FirmwareDeployer::new(self.transport.clone(), self.clock.clone())
                    .with_reboot_settle(reboot_settle);
                Some(deployer.deploy(&mut controller, &plan.board, &image).await?)
            }
            None => None,
        };

        Ok(RunSummary {
            session: controller.session().clone(),
            artifact,
            deploy,
        })
    }

    /// Start the session; a board already sitting in its bootloader is fine
    async fn connect(&self, controller: &mut SessionController<R, C>) -> Result<()> {
        match controller.start().await.map(|_| ()) {
            Ok(()) => Ok(()),
            Err(e) if controller.session().boot_mode() => {
                warn!("{}", e);
                info!("Board is already in bootloader mode");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn build(&self, board: &str, revision: &str) -> Result<BuildArtifact> {
        let config = BuildConfig::from_settings(&self.settings.build)?;
        let pipeline = FirmwareBuildPipeline::new(config, self.runner.clone());
        pipeline.ensure_source_clone().await?;
        pipeline.build(board, revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildSettings;
    use fwdemon_device::test_utils::{
        boot_banner, failed_output, ok_output, session_banner, FakeRunner, FakeTransport,
        ManualClock,
    };

    #[test]
    fn test_kind_from_flags() {
        assert_eq!(TestKind::from_flags(true, false).unwrap(), TestKind::Unit);
        assert_eq!(TestKind::from_flags(false, true).unwrap(), TestKind::Physical);
        assert_eq!(TestKind::from_flags(false, false).unwrap(), TestKind::Physical);
        assert!(TestKind::from_flags(true, true).unwrap_err().is_argument_error());
    }

    #[test]
    fn test_plan_lowercases_board() {
        let plan = RunPlan::new("Metro_M4_Express", TestKind::Unit, FirmwareSource::Keep);
        assert_eq!(plan.board, "metro_m4_express");
    }

    fn settings(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.session.scripts_dir = Some(root.join("devices"));
        settings.build = BuildSettings {
            source_dir: Some(root.join("circuitpython")),
            cache_dir: Some(root.join("cache")),
            ..Default::default()
        };
        settings
    }

    #[tokio::test]
    async fn test_run_without_firmware_only_connects() {
        let root = tempfile::tempdir().unwrap();
        let runner = FakeRunner::with_responder(|inv| {
            if inv.program == "bash" {
                ok_output(&session_banner("/media/pi/CIRCUITPY", "/dev/ttyACM0"))
            } else {
                ok_output("")
            }
        });
        let orchestrator = RunOrchestrator::new(
            settings(root.path()),
            root.path(),
            runner.clone(),
            FakeTransport::bootloader("UF2 Bootloader v3.6.0"),
            ManualClock::new(),
        );

        let plan = RunPlan::new("metro_m4_express", TestKind::Unit, FirmwareSource::Keep);
        let summary = orchestrator.run(&plan).await.unwrap();

        assert!(summary.deploy.is_none());
        assert!(summary.artifact.is_none());
        assert_eq!(summary.session.serial_address(), Some("/dev/ttyACM0"));
        assert!(runner.calls_to("git").is_empty());
    }

    #[tokio::test]
    async fn test_run_with_board_already_in_bootloader() {
        let root = tempfile::tempdir().unwrap();
        let image = root.path().join("firmware.uf2");
        std::fs::write(&image, b"UF2\n").unwrap();
        let runner = FakeRunner::with_responder(|inv| match inv.args.first() {
            Some(script) if script.ends_with("_boot.sh") => {
                ok_output(&boot_banner("/media/pi/METROM4BOOT"))
            }
            Some(_) if inv.program == "bash" => failed_output(1, "no serial device"),
            _ => ok_output(""),
        });
        let transport = FakeTransport::bootloader("UF2 Bootloader v3.6.0");
        let orchestrator = RunOrchestrator::new(
            settings(root.path()),
            root.path(),
            runner.clone(),
            transport.clone(),
            ManualClock::new(),
        );

        let plan = RunPlan::new("metro_m4_express", TestKind::Physical, FirmwareSource::Image(image));
        let summary = orchestrator.run(&plan).await.unwrap();

        let report = summary.deploy.unwrap();
        assert!(!report.reconnected);
        assert_eq!(transport.uploads().len(), 1);
        // no reset sequence was needed
        assert!(runner.calls_to("sync").is_empty());
    }

    #[tokio::test]
    async fn test_run_fails_when_board_unreachable() {
        let root = tempfile::tempdir().unwrap();
        let runner = FakeRunner::with_responder(|_| failed_output(1, "no device"));
        let orchestrator = RunOrchestrator::new(
            settings(root.path()),
            root.path(),
            runner,
            FakeTransport::bootloader("UF2"),
            ManualClock::new(),
        );

        let plan = RunPlan::new("metro_m4_express", TestKind::Unit, FirmwareSource::Keep);
        let err = tokio_test::assert_err!(orchestrator.run(&plan).await);
        assert!(matches!(err, Error::DeviceCommunication { .. }));
    }

    #[tokio::test]
    async fn test_run_with_unknown_board_revision_fails_before_deploy() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("circuitpython/.git")).unwrap();
        let runner = FakeRunner::with_responder(|inv| {
            if inv.program == "bash" {
                ok_output(&session_banner("/media/pi/CIRCUITPY", "/dev/ttyACM0"))
            } else {
                ok_output("")
            }
        });
        let transport = FakeTransport::bootloader("UF2");
        let orchestrator = RunOrchestrator::new(
            settings(root.path()),
            root.path(),
            runner.clone(),
            transport.clone(),
            ManualClock::new(),
        );

        let plan = RunPlan::new(
            "metro_m4_express",
            TestKind::Unit,
            FirmwareSource::Revision("8.0.0".to_string()),
        );
        let err = orchestrator.run(&plan).await.unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
        assert!(runner.calls_to("git").is_empty());
        assert!(transport.uploads().is_empty());
    }
}
