//! Serial backend over simulated boards

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use boardlink_core::matcher::Endpoint;
use boardlink_core::profile::SerialParams;
use boardlink_serial::{Opened, Result, SerialBackend, SerialError, Transport};

use crate::device::DummyDevice;

/// Backend exposing simulated boards as serial endpoints
///
/// Cloning gives another handle to the same set of boards.
#[derive(Debug, Clone, Default)]
pub struct DummyBackend {
    devices: Arc<Mutex<Vec<(Endpoint, DummyDevice)>>>,
}

impl DummyBackend {
    /// Create a backend without boards
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a board visible at `endpoint`
    pub fn add_device(&self, endpoint: Endpoint, device: DummyDevice) {
        log::debug!("dummy: adding board at {}", endpoint.path);
        self.lock().push((endpoint, device));
    }

    /// The board at `path`
    pub fn device(&self, path: &str) -> Option<DummyDevice> {
        self.lock()
            .iter()
            .find(|(ep, _)| ep.path == path)
            .map(|(_, dev)| dev.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Endpoint, DummyDevice)>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SerialBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn enumerate(&self) -> Result<Vec<Endpoint>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, dev)| dev.lock().is_plugged())
            .map(|(ep, _)| ep.clone())
            .collect())
    }

    fn open(&self, path: &str, params: &SerialParams) -> Result<Opened> {
        let device = self
            .device(path)
            .ok_or_else(|| SerialError::NotFound(path.into()))?;

        let mut state = device.lock();
        if !state.is_plugged() {
            return Err(SerialError::NotFound(path.into()));
        }
        if state.is_open() {
            return Err(SerialError::Busy(path.into()));
        }
        if state.serial_params() != *params {
            log::warn!(
                "dummy: {} opened at {}, board expects {}",
                path,
                params,
                state.serial_params()
            );
        }
        let (session, reads) = state
            .attach()
            .ok_or_else(|| SerialError::Busy(path.into()))?;
        drop(state);

        log::info!("Opened dummy port {} at {}", path, params);
        Ok(Opened {
            transport: Arc::new(DummyTransport {
                path: path.into(),
                device,
                session,
                closed: AtomicBool::new(false),
            }),
            reads,
        })
    }
}

/// Open connection to a simulated board
pub struct DummyTransport {
    path: String,
    device: DummyDevice,
    session: u64,
    closed: AtomicBool,
}

impl Transport for DummyTransport {
    fn path(&self) -> &str {
        &self.path
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(SerialError::Closed);
        }
        let mut state = self.device.lock();
        if !state.is_live(self.session) {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        state.receive(bytes);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.device.lock().detach(self.session);
        log::info!("Closed dummy port {}", self.path);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for DummyTransport {
    fn drop(&mut self) {
        self.close();
    }
}
