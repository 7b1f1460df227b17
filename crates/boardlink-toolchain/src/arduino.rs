//! `arduino-cli` pipeline

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use boardlink_core::profile::BoardProfile;
use tokio::process::Command;

use crate::config::ToolchainConfig;
use crate::error::{BuildError, FlashError, ProcessFailure};
use crate::pipeline::{Artifact, FirmwarePipeline, FlashAck};
use crate::pool::WorkerPool;

/// Builds and uploads sketches with `arduino-cli`
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    config: ToolchainConfig,
    pool: WorkerPool,
}

enum RunError {
    Spawn(std::io::Error),
    Failed(ProcessFailure),
}

impl ArduinoCli {
    /// Create a pipeline with its own worker pool
    pub fn new(config: ToolchainConfig) -> Self {
        let pool = WorkerPool::new(config.max_parallel_jobs);
        Self { config, pool }
    }

    /// Create a fresh output directory for one build of `profile`
    ///
    /// Every build gets its own directory so concurrent builds for the same
    /// profile never overwrite each other's artifacts. The directory is kept
    /// after the build; it is what [`Artifact::dir`] points at.
    pub fn create_output_dir(&self, profile: &BoardProfile) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.config.build_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", profile.id))
            .keep(true)
            .tempdir_in(&self.config.build_dir)?;
        Ok(dir.path().to_path_buf())
    }

    /// Arguments of the compile step
    pub fn compile_args(&self, profile: &BoardProfile, source: &Path, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "compile".into(),
            "--fqbn".into(),
            profile.toolchain.fqbn.clone().into(),
            "--output-dir".into(),
            out_dir.into(),
        ];
        args.extend(self.config.extra_compile_args.iter().map(OsString::from));
        args.push(source.into());
        args
    }

    /// Arguments of the upload step
    ///
    /// The profile's upload speed override becomes part of the FQBN.
    pub fn upload_args(&self, profile: &BoardProfile, endpoint: &str, artifact: &Artifact) -> Vec<OsString> {
        vec![
            "upload".into(),
            "--fqbn".into(),
            profile.toolchain.upload_fqbn().into(),
            "-p".into(),
            endpoint.into(),
            "--input-dir".into(),
            artifact.dir.clone().into(),
        ]
    }

    fn program(&self) -> String {
        self.config.cli.display().to_string()
    }

    fn command_line(&self, args: &[OsString]) -> String {
        let mut line = self.program();
        for a in args {
            line.push(' ');
            line.push_str(&a.to_string_lossy());
        }
        line
    }

    async fn run(&self, label: &str, args: Vec<OsString>) -> Result<(), RunError> {
        let line = self.command_line(&args);
        self.pool
            .run(label, async {
                log::debug!("Running {}", line);
                let output = Command::new(&self.config.cli)
                    .args(&args)
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .output()
                    .await
                    .map_err(RunError::Spawn)?;
                if output.status.success() {
                    log::trace!("{}", String::from_utf8_lossy(&output.stdout));
                    Ok(())
                } else {
                    Err(RunError::Failed(ProcessFailure::from_output(line.clone(), &output)))
                }
            })
            .await
    }
}

#[async_trait]
impl FirmwarePipeline for ArduinoCli {
    fn name(&self) -> &'static str {
        "arduino-cli"
    }

    async fn build(&self, profile: &BoardProfile, source: &Path) -> Result<Artifact, BuildError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(BuildError::SourceMissing(source.to_path_buf()));
        }
        let out_dir = self.create_output_dir(profile)?;

        log::info!(
            "Compiling {} for {} ({})",
            source.display(),
            profile.name,
            profile.toolchain.fqbn
        );
        let args = self.compile_args(profile, source, &out_dir);
        self.run(&format!("compile {}", profile.id), args)
            .await
            .map_err(|e| match e {
                RunError::Spawn(source) => BuildError::ToolNotFound {
                    program: self.program(),
                    source,
                },
                RunError::Failed(f) => BuildError::Failed(f),
            })?;

        Ok(Artifact {
            profile_id: profile.id.clone(),
            fqbn: profile.toolchain.fqbn.clone(),
            dir: out_dir,
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
        if !tokio::fs::try_exists(&artifact.dir).await.unwrap_or(false) {
            return Err(FlashError::ArtifactMissing(artifact.dir.clone()));
        }

        log::info!("Flashing {} on {}", profile.name, endpoint);
        let start = Instant::now();
        let args = self.upload_args(profile, endpoint, artifact);
        self.run(&format!("upload {}", endpoint), args)
            .await
            .map_err(|e| match e {
                RunError::Spawn(source) => FlashError::ToolNotFound {
                    program: self.program(),
                    source,
                },
                RunError::Failed(f) => FlashError::Failed(f),
            })?;

        let elapsed = start.elapsed();
        log::info!("Flashed {} in {:.1}s", endpoint, elapsed.as_secs_f32());
        Ok(FlashAck {
            endpoint: endpoint.to_string(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_core::profile::ProfileDatabase;

    fn profile(id: &str) -> BoardProfile {
        ProfileDatabase::builtin().unwrap().get(id).unwrap().clone()
    }

    fn cli(program: &str, build_dir: &Path) -> ArduinoCli {
        ArduinoCli::new(ToolchainConfig {
            cli: program.into(),
            build_dir: build_dir.to_path_buf(),
            max_parallel_jobs: 1,
            extra_compile_args: vec!["--warnings".into(), "all".into()],
        })
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_compile_args() {
        let tool = cli("arduino-cli", Path::new("/tmp/out"));
        let p = profile("zqrobot201");
        let out = Path::new("/tmp/out/zqrobot201-1");
        let args = strings(tool.compile_args(&p, Path::new("/src/sketch"), out));
        assert_eq!(
            args,
            vec![
                "compile",
                "--fqbn",
                "ZQrobot:avr:atmega328pb",
                "--output-dir",
                "/tmp/out/zqrobot201-1",
                "--warnings",
                "all",
                "/src/sketch",
            ]
        );
    }

    #[test]
    fn test_upload_args_carry_speed_override() {
        let tool = cli("arduino-cli", Path::new("/tmp/out"));
        let p = profile("zqrobot202");
        let artifact = Artifact {
            profile_id: p.id.clone(),
            fqbn: p.toolchain.fqbn.clone(),
            dir: "/tmp/out/zqrobot202".into(),
        };
        let args = strings(tool.upload_args(&p, "/dev/ttyUSB0", &artifact));
        assert_eq!(
            args,
            vec![
                "upload",
                "--fqbn",
                "esp32:esp32:esp32:UploadSpeed=921600",
                "-p",
                "/dev/ttyUSB0",
                "--input-dir",
                "/tmp/out/zqrobot202",
            ]
        );
    }

    #[tokio::test]
    async fn test_build_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let tool = cli("arduino-cli", dir.path());
        let err = tool
            .build(&profile("arduino-uno"), &dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_build_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = cli("boardlink-no-such-cli", dir.path());
        let err = tool
            .build(&profile("arduino-uno"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tool = cli("false", dir.path());
        let err = tool
            .build(&profile("arduino-uno"), dir.path())
            .await
            .unwrap_err();
        match err {
            BuildError::Failed(f) => {
                assert_eq!(f.status, Some(1));
                assert!(f.command.starts_with("false compile --fqbn arduino:avr:uno"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_and_flash_success() {
        let dir = tempfile::tempdir().unwrap();
        let tool = cli("true", dir.path());
        let p = profile("arduino-uno");
        let artifact = tool.build(&p, dir.path()).await.unwrap();
        assert_eq!(artifact.dir.parent(), Some(dir.path()));
        assert!(artifact.dir.is_dir());
        assert_eq!(artifact.fqbn, "arduino:avr:uno");

        let ack = tool.flash(&p, "/dev/ttyACM0", &artifact).await.unwrap();
        assert_eq!(ack.endpoint, "/dev/ttyACM0");

        let err = tool
            .flash(&profile("zqrobot201"), "/dev/ttyACM0", &artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashError::ArtifactMismatch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_builds_use_separate_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let first = dir.path().join("blink");
        let second = dir.path().join("sweep");
        std::fs::create_dir(&first).unwrap();
        std::fs::create_dir(&second).unwrap();

        let mut tool = cli("true", &out);
        tool.pool = WorkerPool::new(2);
        let p = profile("arduino-uno");
        let (a, b) = tokio::join!(tool.build(&p, &first), tool.build(&p, &second));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.dir, b.dir);
        for artifact in [&a, &b] {
            assert_eq!(artifact.dir.parent(), Some(out.as_path()));
            let name = artifact.dir.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("arduino-uno-"), "{}", name);
        }
    }
}
