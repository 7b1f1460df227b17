//! Man page generator for boardlink
//!
//! Writes `boardlink.1` plus one `boardlink-<command>.1` page per
//! subcommand into the output directory (default `./man`).

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: clap::Command, title: &str, dir: &Path) -> std::io::Result<PathBuf> {
    let man = clap_mangen::Man::new(cmd).title(title.to_uppercase());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;

    let path = dir.join(format!("{}.1", title));
    fs::write(&path, buffer)?;
    Ok(path)
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let mut pages = vec![render(cmd.clone(), "boardlink", &output_dir)?];
    for sub in cmd.get_subcommands() {
        let title = format!("boardlink-{}", sub.get_name());
        pages.push(render(sub.clone(), &title, &output_dir)?);
    }

    for page in &pages {
        println!("{}", page.display());
    }
    Ok(())
}
