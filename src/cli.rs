//! Command-line interface
//!
//! Parses the board and run options, then hands a [`RunPlan`] to the
//! orchestrator.

use std::path::{Path, PathBuf};

use chrono::Local;
use clap::Parser;

use fwdemon_app::{
    load_settings, FirmwareSource, RunOrchestrator, RunPlan, RunSummary, Settings, TestKind,
};
use fwdemon_core::prelude::*;
use fwdemon_device::ToolAvailability;

/// fwdemon - build, flash and reconnect CircuitPython boards on a test rig
#[derive(Parser, Debug)]
#[command(name = "fwdemon")]
#[command(about = "Hardware-in-the-loop firmware build, flash and session controller", long_about = None)]
pub struct Args {
    /// Name of the board to run test(s) on
    #[arg(value_name = "BOARD")]
    pub board: String,

    /// Run unit tests on the board
    #[arg(long)]
    pub unit: bool,

    /// Run physical tests that need the test controller's GPIO harness
    #[arg(long)]
    pub physical: bool,

    /// Build firmware at this tag or commit and flash it
    #[arg(long, value_name = "REV", conflicts_with = "firmware")]
    pub revision: Option<String>,

    /// Flash an existing firmware image
    #[arg(long, value_name = "PATH")]
    pub firmware: Option<PathBuf>,

    /// Directory containing `.fwdemon/` (defaults to the current directory)
    #[arg(long, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// Validate the flags and turn them into a run plan
    pub fn plan(&self) -> Result<RunPlan> {
        let test_kind = TestKind::from_flags(self.unit, self.physical)?;
        let firmware = match (&self.revision, &self.firmware) {
            (Some(revision), _) => FirmwareSource::Revision(revision.clone()),
            (None, Some(image)) => FirmwareSource::Image(image.clone()),
            (None, None) => FirmwareSource::Keep,
        };
        Ok(RunPlan::new(&self.board, test_kind, firmware))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Opening lines printed before anything touches the board
pub fn run_banner(plan: &RunPlan) -> String {
    format!(
        "Starting fwdemon...\n > Date: {}\n > Board: {}\n > Test type: {}\n",
        Local::now().format("%d %b %Y, %H:%M:%S"),
        plan.board,
        plan.test_kind
    )
}

/// Fail early when a tool the plan needs is not installed
pub fn check_tools(settings: &Settings, plan: &RunPlan) -> Result<()> {
    let tools = ToolAvailability::check(&settings.session.session_tool, &settings.session.shell);
    tools.require_session_tools(&settings.session.session_tool, &settings.session.shell)?;
    if matches!(plan.firmware, FirmwareSource::Revision(_)) {
        if let Some(message) = tools.build_unavailable_message() {
            warn!("{}", message);
        }
        tools.require_build_tools()?;
    }
    Ok(())
}

/// Run the plan described by `args` against the real rig
pub async fn run(args: &Args) -> Result<RunSummary> {
    let plan = args.plan()?;
    let config_dir = args.config_dir();
    run_plan(&plan, &config_dir).await
}

async fn run_plan(plan: &RunPlan, config_dir: &Path) -> Result<RunSummary> {
    info!("Board: {} ({} tests)", plan.board, plan.test_kind);
    info!("Config directory: {}", config_dir.display());

    eprintln!("{}", run_banner(plan));

    let settings = load_settings(config_dir);
    check_tools(&settings, plan)?;

    let result = RunOrchestrator::system(settings, config_dir).run(plan).await;
    if let Err(ref e) = result {
        error!("Run failed: {:?}", e);
    }

    info!("fwdemon exiting");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("fwdemon").chain(args.iter().copied()))
    }

    #[test]
    fn test_board_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_default_plan() {
        let plan = parse(&["Metro_M4_Express"]).unwrap().plan().unwrap();
        assert_eq!(plan.board, "metro_m4_express");
        assert_eq!(plan.test_kind, TestKind::Physical);
        assert_eq!(plan.firmware, FirmwareSource::Keep);
    }

    #[test]
    fn test_unit_and_physical_conflict_after_parsing() {
        let args = parse(&["metro_m4_express", "--unit", "--physical"]).unwrap();
        let err = args.plan().unwrap_err();
        assert!(err.is_argument_error());
        assert!(err.to_string().contains("more than one test type"));
    }

    #[test]
    fn test_revision_plan() {
        let plan = parse(&["metro_m4_express", "--unit", "--revision", "8.0.0"])
            .unwrap()
            .plan()
            .unwrap();
        assert_eq!(plan.test_kind, TestKind::Unit);
        assert_eq!(plan.firmware, FirmwareSource::Revision("8.0.0".to_string()));
    }

    #[test]
    fn test_firmware_plan() {
        let plan = parse(&["metro_m4_express", "--firmware", "/tmp/firmware.uf2"])
            .unwrap()
            .plan()
            .unwrap();
        assert_eq!(
            plan.firmware,
            FirmwareSource::Image(PathBuf::from("/tmp/firmware.uf2"))
        );
    }

    #[test]
    fn test_revision_conflicts_with_firmware() {
        assert!(parse(&["m4", "--revision", "main", "--firmware", "f.uf2"]).is_err());
    }

    #[test]
    fn test_config_dir_override() {
        let args = parse(&["m4", "--config-dir", "/srv/rig"]).unwrap();
        assert_eq!(args.config_dir(), PathBuf::from("/srv/rig"));
    }

    #[test]
    fn test_run_banner() {
        let plan = RunPlan::new("metro_m4_express", TestKind::Unit, FirmwareSource::Keep);
        let banner = run_banner(&plan);
        assert!(banner.starts_with("Starting fwdemon...\n > Date: "));
        assert!(banner.contains(" > Board: metro_m4_express\n"));
        assert!(banner.ends_with(" > Test type: unit\n"));
    }
}
