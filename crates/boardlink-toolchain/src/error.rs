//! Error types for the firmware pipeline

use std::fmt;
use std::path::PathBuf;
use std::process::Output;

use thiserror::Error;

/// A toolchain process that exited unsuccessfully
///
/// Output is kept verbatim so the user sees exactly what the tool said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure {
    /// Command line that was run
    pub command: String,
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ProcessFailure {
    pub(crate) fn from_output(command: String, output: &Output) -> Self {
        Self {
            command,
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "`{}` exited with status {}", self.command, code)?,
            None => write!(f, "`{}` was terminated by a signal", self.command)?,
        }
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            write!(f, "\n{}", stderr)?;
        } else {
            let stdout = self.stdout.trim_end();
            if !stdout.is_empty() {
                write!(f, "\n{}", stdout)?;
            }
        }
        Ok(())
    }
}

/// Firmware build failure
#[derive(Debug, Error)]
pub enum BuildError {
    /// The source directory does not exist
    #[error("Source directory {0} does not exist")]
    SourceMissing(PathBuf),

    /// The toolchain program could not be started
    #[error("Cannot run {program}: {source}")]
    ToolNotFound {
        /// Program that was looked up
        program: String,
        /// Spawn error
        #[source]
        source: std::io::Error,
    },

    /// The compiler reported an error
    #[error("Build failed: {0}")]
    Failed(ProcessFailure),

    /// Preparing the build directory failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Firmware upload failure
#[derive(Debug, Error)]
pub enum FlashError {
    /// The artifact was built for a different board
    #[error("Artifact for '{artifact}' cannot be flashed to a '{board}' board")]
    ArtifactMismatch {
        /// Board the artifact was built for
        artifact: String,
        /// Board being flashed
        board: String,
    },

    /// The artifact directory has gone
    #[error("Artifact directory {0} does not exist")]
    ArtifactMissing(PathBuf),

    /// The toolchain program could not be started
    #[error("Cannot run {program}: {source}")]
    ToolNotFound {
        /// Program that was looked up
        program: String,
        /// Spawn error
        #[source]
        source: std::io::Error,
    },

    /// The uploader reported an error
    #[error("Flash failed: {0}")]
    Failed(ProcessFailure),

    /// Running the uploader failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_shows_stderr_verbatim() {
        let failure = ProcessFailure {
            command: "arduino-cli compile".into(),
            status: Some(1),
            stdout: "Sketch uses 924 bytes".into(),
            stderr: "sketch.ino:3:1: error: 'foo' was not declared\n".into(),
        };
        let msg = BuildError::Failed(failure).to_string();
        assert_eq!(
            msg,
            "Build failed: `arduino-cli compile` exited with status 1\n\
             sketch.ino:3:1: error: 'foo' was not declared"
        );
    }

    #[test]
    fn test_failure_falls_back_to_stdout() {
        let failure = ProcessFailure {
            command: "arduino-cli upload".into(),
            status: None,
            stdout: "avrdude: stk500_recv(): programmer is not responding".into(),
            stderr: String::new(),
        };
        assert!(failure.to_string().ends_with("programmer is not responding"));
        assert!(failure.to_string().contains("terminated by a signal"));
    }
}
