//! Firmware pipeline for simulated boards

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use boardlink_core::profile::BoardProfile;
use boardlink_toolchain::{
    Artifact, BuildError, FirmwarePipeline, FlashAck, FlashError, ProcessFailure,
};

use crate::backend::DummyBackend;

/// Pipeline that installs compatible firmware on simulated boards
///
/// Flashing resets the board: it vanishes from enumeration and comes back
/// after the configured reset delay.
#[derive(Debug, Clone)]
pub struct DummyPipeline {
    backend: DummyBackend,
    reset_delay: Duration,
    builds: Arc<AtomicUsize>,
    build_failure: Arc<Mutex<Option<String>>>,
}

impl DummyPipeline {
    /// Create a pipeline flashing boards of `backend`
    pub fn new(backend: DummyBackend) -> Self {
        Self {
            backend,
            reset_delay: Duration::from_millis(50),
            builds: Arc::new(AtomicUsize::new(0)),
            build_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Set how long a flashed board stays away before reappearing
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// Make every following build fail with this compiler output
    pub fn fail_builds(&self, stderr: Option<&str>) {
        *self.build_failure.lock().unwrap_or_else(|e| e.into_inner()) = stderr.map(String::from);
    }

    /// Number of builds run so far
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FirmwarePipeline for DummyPipeline {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn build(&self, profile: &BoardProfile, source: &Path) -> Result<Artifact, BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .build_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(stderr) = failure {
            return Err(BuildError::Failed(ProcessFailure {
                command: format!("dummy compile {}", source.display()),
                status: Some(1),
                stdout: String::new(),
                stderr,
            }));
        }
        log::info!("dummy: built {} for {}", source.display(), profile.id);
        Ok(Artifact {
            profile_id: profile.id.clone(),
            fqbn: profile.toolchain.fqbn.clone(),
            dir: PathBuf::from("dummy-build").join(&profile.id),
        })
    }

    async fn flash(
        &self,
        profile: &BoardProfile,
        endpoint: &str,
        artifact: &Artifact,
    ) -> Result<FlashAck, FlashError> {
        if artifact.profile_id != profile.id {
            return Err(FlashError::ArtifactMismatch {
                artifact: artifact.profile_id.clone(),
                board: profile.id.clone(),
            });
        }
        let start = Instant::now();
        let device = self.backend.device(endpoint).ok_or_else(|| {
            FlashError::Failed(ProcessFailure {
                command: format!("dummy upload -p {}", endpoint),
                status: Some(1),
                stdout: String::new(),
                stderr: format!("no board at {}", endpoint),
            })
        })?;

        device.record_flash();
        device.unplug();
        let delay = self.reset_delay;
        let replug = device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            replug.replug();
        });

        log::info!("dummy: flashed {} on {}", profile.id, endpoint);
        Ok(FlashAck {
            endpoint: endpoint.to_string(),
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DummyDevice;
    use boardlink_core::matcher::Endpoint;
    use boardlink_core::profile::ProfileDatabase;
    use boardlink_core::protocol::PROTOCOL_VERSION;
    use boardlink_serial::SerialBackend;

    #[tokio::test]
    async fn test_flash_installs_firmware_and_resets() {
        let db = ProfileDatabase::builtin().unwrap();
        let uno = db.get("arduino-uno").unwrap();
        let dev = DummyDevice::new(uno);
        dev.set_firmware_version(None);
        let backend = DummyBackend::new();
        backend.add_device(Endpoint::usb("/dev/ttyACM0", 0x2341, 0x0043), dev.clone());

        let pipeline = DummyPipeline::new(backend.clone()).with_reset_delay(Duration::from_millis(10));
        let artifact = pipeline.build(uno, Path::new("sketch")).await.unwrap();
        pipeline.flash(uno, "/dev/ttyACM0", &artifact).await.unwrap();

        assert_eq!(dev.firmware_version(), Some(PROTOCOL_VERSION));
        assert_eq!(dev.flash_count(), 1);
        assert!(backend.enumerate().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.enumerate().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_is_verbatim() {
        let db = ProfileDatabase::builtin().unwrap();
        let uno = db.get("arduino-uno").unwrap();
        let pipeline = DummyPipeline::new(DummyBackend::new());
        pipeline.fail_builds(Some("sketch.ino:1: error: expected ';'"));
        let err = pipeline.build(uno, Path::new("sketch")).await.unwrap_err();
        assert!(err.to_string().contains("expected ';'"));
        assert_eq!(pipeline.build_count(), 1);
    }
}
