//! Build and flash commands

use std::path::Path;
use std::time::Duration;

use boardlink_core::profile::BoardProfile;
use boardlink_link::LinkManager;
use indicatif::{ProgressBar, ProgressStyle};

fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?)
}

fn spinner(msg: String) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(create_spinner_style()?);
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Compile a sketch for a board
pub async fn cmd_build(
    manager: &LinkManager,
    profile: &BoardProfile,
    firmware: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner(format!(
        "Building {} for {}",
        firmware.display(),
        profile.toolchain.fqbn
    ))?;
    let result = manager.build(profile, firmware).await;
    pb.finish_and_clear();

    let artifact = result?;
    println!(
        "Built {} for {} in {}",
        firmware.display(),
        profile.name,
        artifact.dir.display()
    );
    Ok(())
}

/// Compile a sketch and upload it to a board
pub async fn cmd_flash(
    manager: &LinkManager,
    profile: &BoardProfile,
    port: Option<&str>,
    firmware: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner(format!(
        "Building and flashing {} onto {}",
        firmware.display(),
        profile.name
    ))?;
    let result = manager.build_and_flash(profile, port, firmware).await;
    pb.finish_and_clear();

    let ack = result?;
    println!(
        "Flashed {} at {} ({:.1}s)",
        profile.name,
        ack.endpoint,
        ack.elapsed.as_secs_f64()
    );
    Ok(())
}
