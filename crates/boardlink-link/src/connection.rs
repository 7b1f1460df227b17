//! Connection lifecycle
//!
//! A connection binds one board profile to one endpoint:
//!
//! ```text
//! Disconnected -> Matching -> [Flashing ->] Connecting -> Connected
//!                                                 |
//!                                                 +-> Error -> Connecting (reconnect)
//!                                                 +-> Disconnected (closed or gave up)
//! ```
//!
//! Once connected, a supervisor task watches the engine. Transport failures
//! are retried with bounded exponential backoff; protocol errors are final.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use boardlink_core::matcher::match_endpoints;
use boardlink_core::profile::BoardProfile;
use boardlink_core::protocol::{Command, Value, PROTOCOL_VERSION};
use boardlink_core::ConfigError;
use boardlink_serial::SerialBackend;
use boardlink_toolchain::FirmwarePipeline;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::engine::{Engine, EngineStatus};
use crate::error::{Fault, LinkError};
use crate::manager::Claims;
use crate::reconnect::ReconnectPolicy;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not bound to a live endpoint
    Disconnected,
    /// Looking for a matching endpoint
    Matching,
    /// Building and uploading firmware
    Flashing,
    /// Opening the endpoint and checking the firmware
    Connecting,
    /// Ready for commands
    Connected,
    /// The link failed
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Matching => "matching",
            Self::Flashing => "flashing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "in error",
        };
        f.write_str(s)
    }
}

/// Event published to link subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection changed state
    State {
        /// Profile id
        board: String,
        /// Endpoint, once one was picked
        path: Option<String>,
        /// New state
        state: ConnectionState,
    },
}

/// When to flash firmware while connecting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlashPolicy {
    /// Never flash; stale firmware is an error
    #[default]
    Never,
    /// Flash only when the firmware handshake fails
    IfStale,
    /// Always flash before connecting
    Always,
}

impl FromStr for FlashPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "if-stale" | "ifstale" | "stale" => Ok(Self::IfStale),
            "always" => Ok(Self::Always),
            _ => Err(ConfigError::InvalidArgument {
                what: "flash policy",
                value: s.into(),
            }),
        }
    }
}

/// Options for establishing a connection
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Flash policy
    pub policy: FlashPolicy,
    /// Firmware sketch directory used when flashing
    pub firmware: Option<PathBuf>,
    /// Use this endpoint instead of the first free match
    pub path: Option<String>,
}

enum Handshake {
    Ready(Engine),
    Stale { found: Option<u16> },
}

struct Shared {
    profile: BoardProfile,
    config: LinkConfig,
    backend: Arc<dyn SerialBackend>,
    pipeline: Arc<dyn FirmwarePipeline>,
    claims: Claims,
    events: broadcast::Sender<LinkEvent>,
    path: OnceLock<String>,
    state: watch::Sender<ConnectionState>,
    engine: Mutex<Option<Engine>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    claimed: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if !changed {
            return;
        }
        let path = self.path.get().cloned();
        log::info!(
            "{} ({}): {}",
            self.profile.name,
            path.as_deref().unwrap_or("no endpoint"),
            state
        );
        let _ = self.events.send(LinkEvent::State {
            board: self.profile.id.clone(),
            path,
            state,
        });
    }

    fn engine(&self) -> Option<Engine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take_engine(&self) -> Option<Engine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn stop_supervisor(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// Take the endpoint; true if this connection already holds it
    fn claim(&self, path: &str) -> bool {
        if self.claimed.load(Ordering::Acquire) {
            return true;
        }
        let claimed = self.claims.try_claim(path);
        self.claimed.store(claimed, Ordering::Release);
        claimed
    }

    fn release(&self) {
        if !self.claimed.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(path) = self.path.get() {
            self.claims.release(path);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open the endpoint and check that it runs compatible firmware
    async fn open_and_handshake(&self, path: &str) -> Result<Handshake, LinkError> {
        self.set_state(ConnectionState::Connecting);
        let opened = self.backend.open(path, &self.profile.serial)?;
        let engine = Engine::start(opened, self.config.reply_timeout());
        tokio::time::sleep(self.config.open_settle()).await;

        let attempts = self.config.handshake_attempts.max(1);
        for attempt in 1..=attempts {
            match engine.request(&Command::QueryVersion).await {
                Ok(Value::Number(PROTOCOL_VERSION)) => {
                    log::debug!("{}: firmware speaks protocol {}", path, PROTOCOL_VERSION);
                    return Ok(Handshake::Ready(engine));
                }
                Ok(other) => {
                    log::warn!("{}: firmware reports protocol {}", path, other);
                    engine.close();
                    return Ok(Handshake::Stale {
                        found: other.as_number(),
                    });
                }
                Err(LinkError::Timeout { .. }) => {
                    log::debug!(
                        "{}: no version reply (attempt {}/{})",
                        path,
                        attempt,
                        attempts
                    );
                }
                Err(LinkError::Protocol(msg)) => {
                    log::warn!("{}: foreign firmware ({})", path, msg);
                    engine.close();
                    return Ok(Handshake::Stale { found: None });
                }
                Err(e) => {
                    engine.close();
                    return Err(e);
                }
            }
        }
        engine.close();
        Ok(Handshake::Stale { found: None })
    }

    async fn connect_ready(&self, path: &str) -> Result<Engine, LinkError> {
        match self.open_and_handshake(path).await? {
            Handshake::Ready(engine) => Ok(engine),
            Handshake::Stale { found } => Err(LinkError::IncompatibleFirmware {
                path: path.to_string(),
                found,
            }),
        }
    }

    /// Build and upload firmware, then wait for the board to come back
    async fn flash(&self, path: &str, firmware: &Path) -> Result<(), LinkError> {
        self.set_state(ConnectionState::Flashing);
        let artifact = self.pipeline.build(&self.profile, firmware).await?;
        let ack = self.pipeline.flash(&self.profile, path, &artifact).await?;
        log::info!("Flashed {} in {:?}", ack.endpoint, ack.elapsed);
        self.set_state(ConnectionState::Disconnected);
        self.wait_reappear(path).await
    }

    async fn wait_reappear(&self, path: &str) -> Result<(), LinkError> {
        let poll = async {
            loop {
                tokio::time::sleep(self.config.reappear_poll()).await;
                match self.backend.enumerate() {
                    Ok(endpoints) if endpoints.iter().any(|e| e.path == path) => return,
                    Ok(_) => {}
                    Err(e) => log::debug!("enumeration failed while waiting for {}: {}", path, e),
                }
            }
        };
        tokio::time::timeout(self.config.reappear_timeout(), poll)
            .await
            .map_err(|_| {
                log::warn!(
                    "{} did not reappear within {:?}",
                    path,
                    self.config.reappear_timeout()
                );
                LinkError::NoDevice {
                    board: self.profile.name.clone(),
                }
            })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().ok().and_then(|h| h.take()) {
            handle.abort();
        }
        if let Some(engine) = self.engine.get_mut().ok().and_then(|e| e.take()) {
            engine.close();
        }
        self.release();
    }
}

fn install(shared: &Arc<Shared>, engine: Engine) {
    if shared.is_closed() {
        engine.close();
        return;
    }
    *shared.engine.lock().unwrap_or_else(|e| e.into_inner()) = Some(engine.clone());
    shared.set_state(ConnectionState::Connected);
}

fn spawn_supervisor(shared: &Arc<Shared>) {
    let Some(engine) = shared.engine() else {
        return;
    };
    let handle = tokio::spawn(supervise(Arc::downgrade(shared), engine));
    *shared.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
}

async fn wait_stopped(engine: &Engine) -> Fault {
    let mut status = engine.status();
    let stopped = status
        .wait_for(|s| matches!(s, EngineStatus::Stopped(_)))
        .await
        .map(|s| s.clone());
    match stopped {
        Ok(EngineStatus::Stopped(fault)) => fault,
        _ => Fault::Closed,
    }
}

/// Watch the engine and reconnect after transport failures
async fn supervise(weak: Weak<Shared>, mut engine: Engine) {
    loop {
        let fault = wait_stopped(&engine).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match fault {
            Fault::Closed => return,
            Fault::Protocol(_) => {
                shared.take_engine();
                shared.set_state(ConnectionState::Error);
                shared.release();
                return;
            }
            Fault::Transport(msg) => {
                shared.take_engine();
                shared.set_state(ConnectionState::Error);
                log::warn!("{}: link lost: {}", shared.profile.name, msg);
            }
        }

        let Some(path) = shared.path.get().cloned() else {
            return;
        };
        let mut policy = ReconnectPolicy::new(&shared.config.reconnect);
        drop(shared);

        let reconnected = loop {
            let Some(delay) = policy.next_backoff() else {
                break None;
            };
            log::info!(
                "Reconnecting to {} in {:?} (attempt {})",
                path,
                delay,
                policy.attempt_number()
            );
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.is_closed() {
                return;
            }
            match shared.connect_ready(&path).await {
                Ok(new_engine) => {
                    install(&shared, new_engine.clone());
                    break Some(new_engine);
                }
                Err(e) => {
                    log::warn!("Reconnect to {} failed: {}", path, e);
                    shared.set_state(ConnectionState::Error);
                }
            }
        };

        match reconnected {
            Some(new_engine) => engine = new_engine,
            None => {
                if let Some(shared) = weak.upgrade() {
                    log::error!("Giving up on {}", path);
                    shared.set_state(ConnectionState::Disconnected);
                    shared.release();
                }
                return;
            }
        }
    }
}

/// A board connection
///
/// Clones share the same connection. The endpoint is released when the
/// connection is closed or the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("board", &self.shared.profile.id)
            .field("path", &self.shared.path.get())
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        profile: BoardProfile,
        config: LinkConfig,
        backend: Arc<dyn SerialBackend>,
        pipeline: Arc<dyn FirmwarePipeline>,
        claims: Claims,
        events: broadcast::Sender<LinkEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                profile,
                config,
                backend,
                pipeline,
                claims,
                events,
                path: OnceLock::new(),
                state,
                engine: Mutex::new(None),
                supervisor: Mutex::new(None),
                claimed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Match, optionally flash, open and verify the board
    pub(crate) async fn establish(&self, options: &ConnectOptions) -> Result<(), LinkError> {
        match self.try_establish(options).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::debug!("Connecting {} failed: {}", self.shared.profile.name, e);
                if let Some(engine) = self.shared.take_engine() {
                    engine.close();
                }
                self.shared.release();
                let state = match e {
                    LinkError::NoDevice { .. } | LinkError::AlreadyConnected { .. } => {
                        ConnectionState::Disconnected
                    }
                    _ => ConnectionState::Error,
                };
                self.shared.set_state(state);
                Err(e)
            }
        }
    }

    async fn try_establish(&self, options: &ConnectOptions) -> Result<(), LinkError> {
        let shared = &self.shared;
        let profile = &shared.profile;
        shared.set_state(ConnectionState::Matching);

        let endpoints = shared.backend.enumerate()?;
        let candidates = match_endpoints(profile, &endpoints);
        let candidates: Vec<&str> = match &options.path {
            Some(p) => candidates
                .iter()
                .filter(|e| e.path == *p)
                .map(|e| e.path.as_str())
                .collect(),
            None => candidates.iter().map(|e| e.path.as_str()).collect(),
        };
        let first = *candidates.first().ok_or_else(|| LinkError::NoDevice {
            board: profile.name.clone(),
        })?;
        let path = candidates
            .iter()
            .find(|p| shared.claim(p))
            .ok_or_else(|| LinkError::AlreadyConnected {
                path: first.to_string(),
            })?;
        let _ = shared.path.set(path.to_string());
        log::debug!("{} matched at {}", profile.name, path);

        let engine = match options.policy {
            FlashPolicy::Always => {
                let firmware = self.firmware(options)?;
                shared.flash(path, firmware).await?;
                shared.connect_ready(path).await?
            }
            FlashPolicy::IfStale => match shared.open_and_handshake(path).await? {
                Handshake::Ready(engine) => engine,
                Handshake::Stale { found } => {
                    log::info!(
                        "{} runs stale firmware ({:?}), flashing",
                        path,
                        found
                    );
                    let firmware = self.firmware(options)?;
                    shared.flash(path, firmware).await?;
                    shared.connect_ready(path).await?
                }
            },
            FlashPolicy::Never => shared.connect_ready(path).await?,
        };

        install(shared, engine);
        if shared.is_closed() {
            return Err(LinkError::Closed);
        }
        spawn_supervisor(shared);
        Ok(())
    }

    fn firmware<'a>(&self, options: &'a ConnectOptions) -> Result<&'a Path, LinkError> {
        options
            .firmware
            .as_deref()
            .ok_or_else(|| LinkError::FirmwareRequired {
                board: self.shared.profile.name.clone(),
            })
    }

    /// Flash new firmware onto the connected board and reconnect
    pub async fn reflash(&self, firmware: &Path) -> Result<(), LinkError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(LinkError::Closed);
        }
        let path = shared
            .path
            .get()
            .cloned()
            .ok_or(LinkError::NotConnected(self.state()))?;

        if !shared.claim(&path) {
            return Err(LinkError::AlreadyConnected { path });
        }
        shared.stop_supervisor();
        if let Some(engine) = shared.take_engine() {
            engine.close();
        }

        let result = async {
            shared.flash(&path, firmware).await?;
            shared.connect_ready(&path).await
        }
        .await;
        match result {
            Ok(engine) => {
                install(shared, engine);
                spawn_supervisor(shared);
                Ok(())
            }
            Err(e) => {
                shared.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// The engine, if the connection is usable
    pub fn engine(&self) -> Result<Engine, LinkError> {
        if self.shared.is_closed() {
            return Err(LinkError::Closed);
        }
        self.shared
            .engine()
            .ok_or(LinkError::NotConnected(self.state()))
    }

    /// Profile of the connected board
    pub fn profile(&self) -> &BoardProfile {
        &self.shared.profile
    }

    /// Endpoint path, once matched
    pub fn path(&self) -> Option<&str> {
        self.shared.path.get().map(String::as_str)
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Close the connection
    ///
    /// Every pending and queued request fails with [`LinkError::Closed`].
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.stop_supervisor();
        if let Some(engine) = shared.take_engine() {
            engine.close();
        }
        shared.release();
        shared.set_state(ConnectionState::Disconnected);
    }
}
