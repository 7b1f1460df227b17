//! Transport abstraction
//!
//! A transport is a duplex byte stream without message framing. Writes are
//! synchronous and may come from any task; received bytes are pushed into a
//! channel as [`ReadEvent`]s.

use std::sync::Arc;

use boardlink_core::matcher::Endpoint;
use boardlink_core::profile::SerialParams;
use tokio::sync::mpsc;

use crate::error::Result;

/// Something that happened on the receive side of a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// Bytes as they arrived; chunking carries no meaning
    Data(Vec<u8>),
    /// The transport failed while reading; no further events follow
    Failed(String),
}

/// Receive side of an open transport
///
/// The stream ends (yields `None`) after [`ReadEvent::Failed`] or once the
/// transport has been closed.
pub type ReadStream = mpsc::UnboundedReceiver<ReadEvent>;

/// Send side of an open transport
pub trait Transport: Send + Sync {
    /// Path the transport was opened on
    fn path(&self) -> &str;

    /// Write all bytes
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Release the underlying handle
    ///
    /// Idempotent. The handle is released exactly once even if several
    /// callers race to close.
    fn close(&self);

    /// Whether [`Transport::close`] has run
    fn is_closed(&self) -> bool;
}

/// A freshly opened transport
pub struct Opened {
    /// Send side, shared with whoever needs to write or close
    pub transport: Arc<dyn Transport>,
    /// Receive side, consumed by exactly one reader
    pub reads: ReadStream,
}

impl std::fmt::Debug for Opened {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opened")
            .field("path", &self.transport.path())
            .finish_non_exhaustive()
    }
}

/// Source of endpoints and transports
pub trait SerialBackend: Send + Sync {
    /// Short backend name
    fn name(&self) -> &'static str;

    /// Endpoints currently visible, in enumeration order
    fn enumerate(&self) -> Result<Vec<Endpoint>>;

    /// Open an endpoint with the given line parameters
    fn open(&self, path: &str, params: &SerialParams) -> Result<Opened>;
}
