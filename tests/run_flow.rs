//! End-to-end run tests against a simulated rig
//!
//! Helper scripts, git and make are answered by a scripted runner; the
//! bootloader drive is a real directory carrying `INFO_UF2.TXT`, so images
//! go through the UF2 mass-storage transport for real.

use std::path::{Path, PathBuf};

use fwdemon_app::config::BuildSettings;
use fwdemon_app::{FirmwareSource, RunOrchestrator, RunPlan, Settings, TestKind};
use fwdemon_core::Error;
use fwdemon_device::test_utils::{
    boot_banner, failed_output, ok_output, session_banner, FakeRunner, ManualClock,
};
use fwdemon_device::{ToolInvocation, ToolOutput, Uf2MassStorage, UF2_INFO_FILE};
use tempfile::TempDir;
use tokio_test::assert_ok;

const BOARD: &str = "metro_m4_express";
const IMAGE_BYTES: usize = 4096;

struct Rig {
    root: TempDir,
    boot_drive: PathBuf,
}

impl Rig {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("circuitpython");
        std::fs::create_dir_all(source.join(".git")).unwrap();
        std::fs::create_dir_all(source.join("ports/atmel-samd/boards").join(BOARD)).unwrap();

        let boot_drive = root.path().join("METROM4BOOT");
        std::fs::create_dir_all(&boot_drive).unwrap();
        std::fs::write(
            boot_drive.join(UF2_INFO_FILE),
            "UF2 Bootloader v3.6.0 SFHR\nModel: Metro M4 Express\n",
        )
        .unwrap();

        Self { root, boot_drive }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.session.scripts_dir = Some(self.path().join("devices"));
        settings.session.reenumerate_settle_secs = 0.5;
        settings.deploy.reboot_settle_secs = 0.5;
        settings.build = BuildSettings {
            source_dir: Some(self.path().join("circuitpython")),
            cache_dir: Some(self.path().join(".fw_builds")),
            baseline_revision: "rosiepi_test".to_string(),
            ..Default::default()
        };
        settings
    }

    /// Answers like a healthy board, and the build phase drops an image
    fn healthy_runner(&self) -> FakeRunner {
        let boot_drive = self.boot_drive.clone();
        FakeRunner::with_responder(move |inv| respond(inv, &boot_drive))
    }

    fn orchestrator(
        &self,
        runner: FakeRunner,
    ) -> RunOrchestrator<FakeRunner, Uf2MassStorage, ManualClock> {
        RunOrchestrator::new(
            self.settings(),
            self.path(),
            runner,
            Uf2MassStorage,
            ManualClock::new(),
        )
    }
}

fn build_dir(inv: &ToolInvocation) -> Option<PathBuf> {
    inv.args
        .iter()
        .find_map(|arg| arg.strip_prefix("BUILD="))
        .map(PathBuf::from)
}

fn respond(inv: &ToolInvocation, boot_drive: &Path) -> ToolOutput {
    match inv.program.as_str() {
        "bash" if inv.args[0].ends_with("_boot.sh") => {
            ok_output(&boot_banner(&boot_drive.display().to_string()))
        }
        "bash" if inv.args[0].ends_with(".sh") => {
            ok_output(&session_banner("/media/pi/CIRCUITPY", "/dev/ttyACM0"))
        }
        "bash" if !inv.args.iter().any(|a| a == "clean") => {
            let out = build_dir(inv).unwrap();
            std::fs::write(out.join("firmware.uf2"), vec![0x0Au8; IMAGE_BYTES]).unwrap();
            ok_output("251464 bytes used, 243744 bytes free in flash firmware space\n")
        }
        _ => ok_output(""),
    }
}

#[tokio::test]
async fn test_build_and_deploy_revision() {
    let rig = Rig::new();
    let runner = rig.healthy_runner();
    let orchestrator = rig.orchestrator(runner.clone());

    let plan = RunPlan::new(
        BOARD,
        TestKind::Unit,
        FirmwareSource::Revision("4.0.1".to_string()),
    );
    let summary = orchestrator.run(&plan).await.unwrap();

    let artifact = summary.artifact.unwrap();
    assert!(artifact.is_built());
    assert_eq!(artifact.output_dir, rig.path().join(".fw_builds/4.0.1").join(BOARD));
    assert_eq!(artifact.size_summary.len(), 1);

    let report = summary.deploy.unwrap();
    assert_eq!(report.bootloader_banner, "UF2 Bootloader v3.6.0 SFHR");
    assert_eq!(report.bytes_uploaded, IMAGE_BYTES as u64);
    assert!(report.reconnected);
    assert_eq!(
        std::fs::read(rig.boot_drive.join("firmware.uf2")).unwrap().len(),
        IMAGE_BYTES
    );

    assert!(!summary.session.boot_mode());
    assert_eq!(summary.session.serial_address(), Some("/dev/ttyACM0"));

    // the clone is back on its baseline before the board is touched
    let lines = runner.command_lines();
    let rollback = lines
        .iter()
        .position(|l| l == "git checkout -f rosiepi_test")
        .unwrap();
    let reset = lines.iter().position(|l| l == "sync").unwrap();
    assert!(rollback < reset);
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("git checkout -f")).count(),
        1
    );
}

#[tokio::test]
async fn test_deploy_existing_image() {
    let rig = Rig::new();
    let image = rig.path().join("adafruit-circuitpython-metro_m4_express-en_US-4.0.1.uf2");
    std::fs::write(&image, vec![0x55u8; 1000]).unwrap();
    let runner = rig.healthy_runner();

    let plan = RunPlan::new(BOARD, TestKind::Physical, FirmwareSource::Image(image));
    let summary = assert_ok!(rig.orchestrator(runner.clone()).run(&plan).await);

    assert!(summary.artifact.is_none());
    assert_eq!(summary.deploy.unwrap().bytes_uploaded, 1000);
    assert!(runner.calls_to("git").is_empty());
    assert!(runner.command_lines().iter().all(|l| !l.contains("make")));
}

#[tokio::test]
async fn test_missing_image_is_deployment_error() {
    let rig = Rig::new();
    let runner = rig.healthy_runner();
    let plan = RunPlan::new(
        BOARD,
        TestKind::Unit,
        FirmwareSource::Image(rig.path().join("missing.uf2")),
    );

    let err = rig.orchestrator(runner.clone()).run(&plan).await.unwrap_err();

    assert!(matches!(err, Error::Deployment { .. }));
    assert!(err.to_string().contains("missing.uf2"));
    // nothing beyond the initial connect reached the board
    assert!(runner.calls_to("sync").is_empty());
}

#[tokio::test]
async fn test_failed_build_never_touches_board() {
    let rig = Rig::new();
    let boot_drive = rig.boot_drive.clone();
    let runner = FakeRunner::with_responder(move |inv| {
        if inv.program == "git" && inv.args.first().is_some_and(|a| a == "fetch") {
            failed_output(128, "fatal: couldn't find remote ref 9.9.9")
        } else {
            respond(inv, &boot_drive)
        }
    });

    let plan = RunPlan::new(
        BOARD,
        TestKind::Unit,
        FirmwareSource::Revision("9.9.9".to_string()),
    );
    let err = rig.orchestrator(runner.clone()).run(&plan).await.unwrap_err();

    assert!(matches!(err, Error::Build { .. }));
    assert!(err.to_string().contains("couldn't find remote ref"));
    assert_eq!(
        runner.command_lines().last().map(String::as_str),
        Some("git checkout -f rosiepi_test")
    );
    assert!(runner.calls_to("sync").is_empty());
    assert!(!rig.boot_drive.join("firmware.uf2").exists());
}
