//! Toolchain configuration

use std::path::PathBuf;

use serde::Deserialize;

/// Settings for the external toolchain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Program to run, looked up on `PATH` unless it is a path
    pub cli: PathBuf,
    /// Directory receiving build outputs, one fresh subdirectory per build
    pub build_dir: PathBuf,
    /// Largest number of toolchain processes running at once
    pub max_parallel_jobs: usize,
    /// Extra arguments passed to every compile
    pub extra_compile_args: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cli: PathBuf::from("arduino-cli"),
            build_dir: std::env::temp_dir().join("boardlink-build"),
            max_parallel_jobs: 2,
            extra_compile_args: Vec::new(),
        }
    }
}
