//! List commands implementation

use boardlink_core::matcher::matching_profiles;
use boardlink_core::profile::{BoardProfile, ProfileDatabase};
use boardlink_link::LinkManager;

use crate::backends;

/// List all board profiles with their pins and operations
pub fn list_boards(db: &ProfileDatabase) {
    println!("Supported boards:");
    println!();
    println!("{:<14} {:<14} {:>12} {:<26}", "Id", "Name", "Serial", "FQBN");
    println!("{}", "-".repeat(70));

    for profile in db.iter() {
        println!(
            "{:<14} {:<14} {:>12} {:<26}",
            profile.id,
            profile.name,
            profile.serial.to_string(),
            profile.toolchain.upload_fqbn()
        );
        let digital: Vec<&str> = profile.pins.digital().map(|p| p.name.as_str()).collect();
        let analog: Vec<&str> = profile.pins.analog().map(|p| p.name.as_str()).collect();
        println!("    digital: {}", digital.join(" "));
        println!("    analog:  {}", analog.join(" "));
        for ext in &profile.extensions {
            println!(
                "    ext {:<18} ({} arg(s), {} reply) {}",
                ext.name,
                ext.args.len(),
                ext.reply,
                ext.description
            );
        }
    }
}

/// List compiled-in backends
pub fn list_backends() {
    println!("Available backends:");
    println!();
    for b in backends::available_backends() {
        println!("  {:8} - {}", b.name, b.description);
    }
}

/// List endpoints and the profiles matching each one
pub fn list_ports(
    db: &ProfileDatabase,
    manager: &LinkManager,
    only: Option<&BoardProfile>,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = manager.endpoints()?;
    if endpoints.is_empty() {
        println!("No serial endpoints found ({} backend)", manager.backend_name());
        return Ok(());
    }

    println!("{:<24} {:<20} {}", "Port", "Identity", "Boards");
    println!("{}", "-".repeat(70));
    for endpoint in &endpoints {
        let boards: Vec<&str> = matching_profiles(db.iter(), endpoint)
            .into_iter()
            .filter(|p| only.map_or(true, |o| o.id == p.id))
            .map(|p| p.id.as_str())
            .collect();
        if only.is_some() && boards.is_empty() {
            continue;
        }
        println!(
            "{:<24} {:<20} {}",
            endpoint.path,
            endpoint.identity.as_deref().unwrap_or("-"),
            if boards.is_empty() {
                "-".to_string()
            } else {
                boards.join(", ")
            }
        );
    }
    Ok(())
}
