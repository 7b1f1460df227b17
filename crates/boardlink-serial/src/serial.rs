//! Serial port backend using the `serialport` crate

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use boardlink_core::matcher::Endpoint;
use boardlink_core::profile::SerialParams;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tokio::sync::mpsc;

use crate::error::{Result, SerialError};
use crate::transport::{Opened, ReadEvent, SerialBackend, Transport};

/// How long a blocking read waits before checking for close
const READ_POLL: Duration = Duration::from_millis(50);

/// Write timeout of the port
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUF_SIZE: usize = 256;

fn data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(SerialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported data bits: {}", bits),
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(SerialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported stop bits: {}", bits),
        ))),
    }
}

/// Backend over the serial ports of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl SystemBackend {
    /// Create the system backend
    pub fn new() -> Self {
        Self
    }
}

impl SerialBackend for SystemBackend {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn enumerate(&self) -> Result<Vec<Endpoint>> {
        let ports =
            serialport::available_ports().map_err(|e| SerialError::Enumerate(e.to_string()))?;
        let endpoints = ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    let mut ep = Endpoint::usb(&p.port_name, usb.vid, usb.pid);
                    ep.description = usb.product.or(usb.manufacturer);
                    ep
                }
                _ => Endpoint::other(&p.port_name),
            })
            .collect();
        Ok(endpoints)
    }

    fn open(&self, path: &str, params: &SerialParams) -> Result<Opened> {
        let (transport, reads) = SerialTransport::open(path, params)?;
        Ok(Opened {
            transport: Arc::new(transport),
            reads,
        })
    }
}

/// An open serial port
///
/// Writes go straight to the port. A named reader thread owns a clone of the
/// port handle and forwards received bytes until the port is closed or fails.
pub struct SerialTransport {
    path: String,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    closed: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open `path` with the given line parameters and start the reader
    pub fn open(path: &str, params: &SerialParams) -> Result<(Self, mpsc::UnboundedReceiver<ReadEvent>)> {
        let port = serialport::new(path, params.baud_rate)
            .data_bits(data_bits(params.data_bits)?)
            .parity(Parity::None)
            .stop_bits(stop_bits(params.stop_bits)?)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| SerialError::from_open(path, e))?;

        let mut reader = port
            .try_clone()
            .map_err(|e| SerialError::from_open(path, e))?;
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let reader_closed = Arc::clone(&closed);
        let reader_path = path.to_string();
        thread::Builder::new()
            .name(format!("boardlink-read:{}", path))
            .spawn(move || {
                let mut buf = [0u8; READ_BUF_SIZE];
                while !reader_closed.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(0) => {}
                        Ok(n) => {
                            log::trace!("{}: read {} bytes", reader_path, n);
                            if tx.send(ReadEvent::Data(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            if !reader_closed.load(Ordering::Acquire) {
                                log::warn!("{}: read failed: {}", reader_path, e);
                                let _ = tx.send(ReadEvent::Failed(e.to_string()));
                            }
                            break;
                        }
                    }
                }
                log::debug!("{}: reader stopped", reader_path);
            })?;

        let mut port = port;
        port.set_timeout(WRITE_TIMEOUT)
            .map_err(|e| SerialError::from_open(path, e))?;

        log::info!("Opened serial port {} at {}", path, params);

        Ok((
            Self {
                path: path.to_string(),
                port: Mutex::new(Some(port)),
                closed,
            },
            rx,
        ))
    }
}

impl Transport for SerialTransport {
    fn path(&self) -> &str {
        &self.path
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.port.lock().unwrap_or_else(|e| e.into_inner());
        let port = guard.as_mut().ok_or(SerialError::Closed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let port = self.port.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(port);
        log::info!("Closed serial port {}", self.path);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
