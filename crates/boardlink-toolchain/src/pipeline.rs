//! Firmware pipeline interface

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use boardlink_core::profile::BoardProfile;

use crate::error::{BuildError, FlashError};

/// Output of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Profile the firmware was built for
    pub profile_id: String,
    /// FQBN used for the build
    pub fqbn: String,
    /// Directory holding the build outputs
    pub dir: PathBuf,
}

/// Acknowledgement of a successful flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashAck {
    /// Endpoint that was flashed
    pub endpoint: String,
    /// Time the upload took
    pub elapsed: Duration,
}

/// Builds firmware for a board and writes it to an endpoint
///
/// Both operations may take a long time. Implementations run them without
/// blocking the async runtime and never retry on failure.
#[async_trait]
pub trait FirmwarePipeline: Send + Sync {
    /// Short pipeline name
    fn name(&self) -> &'static str;

    /// Build the program in `source` for `profile`
    async fn build(&self, profile: &BoardProfile, source: &Path) -> Result<Artifact, BuildError>;

    /// Write `artifact` to the board at `endpoint`
    async fn flash(
        &self,
        profile: &BoardProfile,
        endpoint: &str,
        artifact: &Artifact,
    ) -> Result<FlashAck, FlashError>;
}
