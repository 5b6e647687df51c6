//! fwdemon - hardware-in-the-loop firmware controller
//!
//! This is the binary entry point. All logic lives in the library.

use clap::Parser;

use fwdemon::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    fwdemon_core::logging::init()?;

    let args = Args::parse();
    let result = fwdemon::run(&args).await;
    if result.is_err() {
        if let Ok(log_file) = fwdemon_core::logging::get_current_log_file() {
            eprintln!("Details were logged to {}", log_file.display());
        }
    }
    let summary = result?;

    println!("{}", summary.session);
    if let Some(artifact) = &summary.artifact {
        println!("Firmware built: {}", artifact.output_dir.display());
        for line in &artifact.size_summary {
            println!(" - {}", line);
        }
    }
    if let Some(report) = &summary.deploy {
        println!("{}", report);
    }
    Ok(())
}
