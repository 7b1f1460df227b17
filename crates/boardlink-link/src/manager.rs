//! Link manager
//!
//! Entry point for hosts: discovers boards, hands out connections and keeps
//! track of which endpoints are taken.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use boardlink_core::matcher::{match_endpoints, Endpoint};
use boardlink_core::profile::BoardProfile;
use boardlink_serial::SerialBackend;
use boardlink_toolchain::{Artifact, FirmwarePipeline, FlashAck};
use tokio::sync::broadcast;

use crate::board::Board;
use crate::config::LinkConfig;
use crate::connection::{ConnectOptions, Connection, LinkEvent};
use crate::error::LinkError;

const EVENT_CAPACITY: usize = 64;

/// Endpoints held by live connections
#[derive(Debug, Clone, Default)]
pub(crate) struct Claims {
    paths: Arc<Mutex<HashSet<String>>>,
}

impl Claims {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `path`; false if it is already held
    pub(crate) fn try_claim(&self, path: &str) -> bool {
        self.lock().insert(path.to_string())
    }

    pub(crate) fn release(&self, path: &str) {
        if self.lock().remove(path) {
            log::debug!("Released {}", path);
        }
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.lock().contains(path)
    }
}

/// Hands out board connections over one backend and firmware pipeline
pub struct LinkManager {
    backend: Arc<dyn SerialBackend>,
    pipeline: Arc<dyn FirmwarePipeline>,
    config: LinkConfig,
    claims: Claims,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkManager {
    /// Create a manager
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        pipeline: Arc<dyn FirmwarePipeline>,
        config: LinkConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            pipeline,
            config,
            claims: Claims::default(),
            events,
        }
    }

    /// Link configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Name of the serial backend
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Receive state changes of every connection made by this manager
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// All visible endpoints
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, LinkError> {
        Ok(self.backend.enumerate()?)
    }

    /// Endpoints matching `profile`, in enumeration order
    pub fn discover(&self, profile: &BoardProfile) -> Result<Vec<Endpoint>, LinkError> {
        let endpoints = self.endpoints()?;
        let found: Vec<Endpoint> = match_endpoints(profile, &endpoints)
            .into_iter()
            .cloned()
            .collect();
        log::debug!("{}: {} matching endpoint(s)", profile.name, found.len());
        Ok(found)
    }

    /// Whether a connection holds `path`
    pub fn is_claimed(&self, path: &str) -> bool {
        self.claims.contains(path)
    }

    /// Connect to a board of `profile`
    pub async fn connect(
        &self,
        profile: &BoardProfile,
        options: ConnectOptions,
    ) -> Result<Board, LinkError> {
        let connection = Connection::new(
            profile.clone(),
            self.config.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.pipeline),
            self.claims.clone(),
            self.events.clone(),
        );
        connection.establish(&options).await?;
        Ok(Board::new(connection))
    }

    /// Build the program in `source` for `profile`
    pub async fn build(&self, profile: &BoardProfile, source: &Path) -> Result<Artifact, LinkError> {
        Ok(self.pipeline.build(profile, source).await?)
    }

    /// Build and flash without connecting
    ///
    /// Flashes the first matching endpoint unless `path` is given. Endpoints
    /// held by a connection are refused; use [`Board::reflash`] for those.
    pub async fn build_and_flash(
        &self,
        profile: &BoardProfile,
        path: Option<&str>,
        source: &Path,
    ) -> Result<FlashAck, LinkError> {
        let endpoints = self.discover(profile)?;
        let endpoint = match path {
            Some(p) => endpoints.iter().find(|e| e.path == p),
            None => endpoints.first(),
        }
        .ok_or_else(|| LinkError::NoDevice {
            board: profile.name.clone(),
        })?;

        if !self.claims.try_claim(&endpoint.path) {
            return Err(LinkError::AlreadyConnected {
                path: endpoint.path.clone(),
            });
        }
        let result: Result<FlashAck, LinkError> = async {
            let artifact = self.pipeline.build(profile, source).await?;
            Ok(self
                .pipeline
                .flash(profile, &endpoint.path, &artifact)
                .await?)
        }
        .await;
        self.claims.release(&endpoint.path);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, FlashPolicy};
    use boardlink_core::profile::ProfileDatabase;
    use boardlink_core::protocol::{Level, PROTOCOL_VERSION};
    use boardlink_dummy::{DummyBackend, DummyDevice, DummyPipeline};
    use std::path::PathBuf;
    use std::time::Duration;

    const UNO: &str = "/dev/ttyACM0";

    struct Rig {
        manager: LinkManager,
        backend: DummyBackend,
        pipeline: DummyPipeline,
        uno: BoardProfile,
    }

    fn rig() -> Rig {
        let db = ProfileDatabase::builtin().unwrap();
        let uno = db.get("arduino-uno").unwrap().clone();
        let backend = DummyBackend::new();
        let pipeline = DummyPipeline::new(backend.clone());
        let manager = LinkManager::new(
            Arc::new(backend.clone()),
            Arc::new(pipeline.clone()),
            LinkConfig::default(),
        );
        Rig {
            manager,
            backend,
            pipeline,
            uno,
        }
    }

    fn add_uno(rig: &Rig, path: &str) -> DummyDevice {
        let dev = DummyDevice::new(&rig.uno);
        rig.backend
            .add_device(Endpoint::usb(path, 0x2341, 0x0043), dev.clone());
        dev
    }

    fn drain(rx: &mut broadcast::Receiver<LinkEvent>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(LinkEvent::State { state, .. }) = rx.try_recv() {
            states.push(state);
        }
        states
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_publishes_states() {
        let rig = rig();
        add_uno(&rig, UNO);
        let mut events = rig.manager.subscribe();

        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(board.path(), Some(UNO));
        assert_eq!(board.state(), ConnectionState::Connected);
        assert_eq!(
            drain(&mut events),
            vec![
                ConnectionState::Matching,
                ConnectionState::Connecting,
                ConnectionState::Connected
            ]
        );
        assert!(rig.manager.is_claimed(UNO));

        board.close();
        assert_eq!(board.state(), ConnectionState::Disconnected);
        assert!(!rig.manager.is_claimed(UNO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matching_endpoint() {
        let rig = rig();
        rig.backend.add_device(
            Endpoint::usb("/dev/ttyUSB0", 0x1A86, 0x7523),
            DummyDevice::new(&rig.uno),
        );
        let err = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NoDevice { .. }));
        assert!(!rig.manager.is_claimed("/dev/ttyUSB0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_is_claimed_once() {
        let rig = rig();
        add_uno(&rig, UNO);
        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();

        let err = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::AlreadyConnected { ref path } if path == UNO));
        assert!(matches!(
            rig.manager
                .build_and_flash(&rig.uno, None, Path::new("sketch"))
                .await,
            Err(LinkError::AlreadyConnected { .. })
        ));

        // Dropping the board frees the endpoint
        drop(board);
        assert!(!rig.manager.is_claimed(UNO));
        let again = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(again.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_releases_endpoint() {
        let rig = rig();
        add_uno(&rig, UNO);

        // Give up while the connection waits for the board to settle
        let attempt = tokio::time::timeout(
            Duration::from_millis(100),
            rig.manager.connect(&rig.uno, ConnectOptions::default()),
        )
        .await;
        assert!(attempt.is_err());
        assert!(!rig.manager.is_claimed(UNO));

        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(board.path(), Some(UNO));
        assert_eq!(board.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_board_uses_next_free_endpoint() {
        let rig = rig();
        add_uno(&rig, "/dev/ttyACM0");
        add_uno(&rig, "/dev/ttyACM1");
        let first = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        let second = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(first.path(), Some("/dev/ttyACM0"));
        assert_eq!(second.path(), Some("/dev/ttyACM1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_firmware_is_flashed() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        dev.set_firmware_version(None);
        let mut events = rig.manager.subscribe();

        let options = ConnectOptions {
            policy: FlashPolicy::IfStale,
            firmware: Some(PathBuf::from("sketch")),
            path: None,
        };
        let board = rig.manager.connect(&rig.uno, options).await.unwrap();
        assert_eq!(dev.flash_count(), 1);
        assert_eq!(dev.firmware_version(), Some(PROTOCOL_VERSION));
        assert_eq!(rig.pipeline.build_count(), 1);
        assert_eq!(
            drain(&mut events),
            vec![
                ConnectionState::Matching,
                ConnectionState::Connecting,
                ConnectionState::Flashing,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected
            ]
        );

        board.set_digital_output("D13", Level::High).await.unwrap();
        assert_eq!(dev.level(13), Some(Level::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_firmware_is_not_reflashed() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        let options = ConnectOptions {
            policy: FlashPolicy::IfStale,
            firmware: Some(PathBuf::from("sketch")),
            path: None,
        };
        rig.manager.connect(&rig.uno, options).await.unwrap();
        assert_eq!(dev.flash_count(), 0);
        assert_eq!(rig.pipeline.build_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_firmware_without_flashing() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        dev.set_firmware_version(Some(PROTOCOL_VERSION + 1));

        let err = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::IncompatibleFirmware { found: Some(v), .. } if v == PROTOCOL_VERSION + 1
        ));
        assert!(!rig.manager.is_claimed(UNO));

        let options = ConnectOptions {
            policy: FlashPolicy::IfStale,
            ..Default::default()
        };
        let err = rig.manager.connect(&rig.uno, options).await.unwrap_err();
        assert!(matches!(err, LinkError::FirmwareRequired { .. }));
        assert_eq!(dev.flash_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failure_is_not_retried() {
        let rig = rig();
        add_uno(&rig, UNO);
        rig.pipeline.fail_builds(Some("sketch.ino:3:1: error: 'foo' was not declared"));
        let options = ConnectOptions {
            policy: FlashPolicy::Always,
            firmware: Some(PathBuf::from("sketch")),
            path: None,
        };
        let err = rig.manager.connect(&rig.uno, options).await.unwrap_err();
        assert!(matches!(err, LinkError::Build(_)));
        assert!(err.to_string().contains("'foo' was not declared"));
        assert_eq!(rig.pipeline.build_count(), 1);
        assert!(!rig.manager.is_claimed(UNO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_and_flash() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        let ack = rig
            .manager
            .build_and_flash(&rig.uno, None, Path::new("sketch"))
            .await
            .unwrap();
        assert_eq!(ack.endpoint, UNO);
        assert_eq!(dev.flash_count(), 1);
        assert!(!rig.manager.is_claimed(UNO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_unplug() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        let mut state = board.subscribe_state();

        dev.unplug();
        state
            .wait_for(|s| *s == ConnectionState::Error)
            .await
            .unwrap();
        assert!(matches!(
            board.read_analog_pin("A0").await,
            Err(LinkError::NotConnected(ConnectionState::Error))
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        dev.replug();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        dev.set_analog(0x80, 321);
        assert_eq!(board.read_analog_pin("A0").await.unwrap(), 321);
        assert!(rig.manager.is_claimed(UNO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        let mut state = board.subscribe_state();

        dev.unplug();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(!rig.manager.is_claimed(UNO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_is_final() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        let mut state = board.subscribe_state();

        dev.inject(&[0x86, 0xEE, 0x02, 0x00, 0x02, 0x0A]);
        state
            .wait_for(|s| *s == ConnectionState::Error)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(board.state(), ConnectionState::Error);
        assert!(!rig.manager.is_claimed(UNO));
        assert_eq!(dev.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reflash_connected_board() {
        let rig = rig();
        let dev = add_uno(&rig, UNO);
        let board = rig
            .manager
            .connect(&rig.uno, ConnectOptions::default())
            .await
            .unwrap();
        let mut events = rig.manager.subscribe();

        board.reflash(Path::new("sketch")).await.unwrap();
        assert_eq!(dev.flash_count(), 1);
        assert_eq!(
            drain(&mut events),
            vec![
                ConnectionState::Flashing,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected
            ]
        );
        assert!(board.serial_available().await.is_ok());
        assert!(board.engine().unwrap().fault().is_none());
    }
}
