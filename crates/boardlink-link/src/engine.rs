//! Command protocol engine
//!
//! The engine owns one open transport. It encodes commands into frames,
//! correlates replies with the request that is waiting for them and
//! enforces reply deadlines.
//!
//! At most one reply-expecting request is in flight; later ones queue in
//! FIFO order on the reply turn. Write-only commands bypass the turn and
//! complete as soon as the transport accepted their bytes.
//!
//! A dedicated reader task consumes the transport's read stream. It resolves
//! the pending request, discards noise and late replies, and stops the
//! engine on protocol desync or transport failure.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use boardlink_core::protocol::{
    decode_value, opcodes, Command, Decoded, Frame, FrameDecoder, ReplyShape, Value, NO_REPLY_TAG,
};
use boardlink_serial::{Opened, ReadEvent, ReadStream, Transport};
use tokio::sync::{oneshot, watch};

use crate::error::{Fault, LinkError};

/// Number of recently expired tags whose late replies are tolerated
const EXPIRED_TAGS: usize = 16;

/// Lifecycle of an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// Accepting commands
    Running,
    /// Stopped for good
    Stopped(Fault),
}

struct Pending {
    tag: u8,
    opcode: u8,
    shape: ReplyShape,
    reply: oneshot::Sender<Result<Value, Fault>>,
}

#[derive(Default)]
struct Slots {
    pending: Option<Pending>,
    last_tag: u8,
    expired: VecDeque<u8>,
    synced: bool,
    fault: Option<Fault>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    reply_timeout: Duration,
    turn: tokio::sync::Mutex<()>,
    slots: Mutex<Slots>,
    status: watch::Sender<EngineStatus>,
}

/// Frees the pending slot if its request is abandoned (deadline or
/// cancellation) and remembers the tag so a late reply is recognised.
struct SlotGuard<'a> {
    inner: &'a Inner,
    tag: u8,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.inner.lock();
        if slots.pending.as_ref().is_some_and(|p| p.tag == self.tag) {
            slots.pending = None;
            if slots.expired.len() == EXPIRED_TAGS {
                slots.expired.pop_front();
            }
            slots.expired.push_back(self.tag);
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn path(&self) -> &str {
        self.transport.path()
    }

    fn fault(&self) -> Option<Fault> {
        self.lock().fault.clone()
    }

    /// Stop the engine, failing the pending request
    fn fail(&self, fault: Fault) {
        let pending = {
            let mut slots = self.lock();
            if slots.fault.is_some() {
                return;
            }
            slots.fault = Some(fault.clone());
            slots.pending.take()
        };
        if let Some(p) = pending {
            let _ = p.reply.send(Err(fault.clone()));
        }
        match &fault {
            Fault::Transport(msg) => log::warn!("{}: transport failed: {}", self.path(), msg),
            Fault::Protocol(msg) => log::error!("{}: protocol error: {}", self.path(), msg),
            Fault::Closed => log::debug!("{}: engine closed", self.path()),
        }
        self.transport.close();
        self.status.send_replace(EngineStatus::Stopped(fault));
    }

    fn write(&self, frame: &Frame) -> Result<(), LinkError> {
        let bytes = frame.encode();
        log::trace!("{} > {:02X?}", self.path(), bytes);
        if let Err(e) = self.transport.write(&bytes) {
            let fault = Fault::Transport(format!("write failed: {}", e));
            self.fail(fault.clone());
            return Err(self.fault().unwrap_or(fault).into());
        }
        Ok(())
    }

    fn handle(&self, decoded: Decoded) {
        match decoded {
            Decoded::Frame(frame) => self.dispatch(frame),
            Decoded::Malformed { opcode } => {
                if self.lock().synced {
                    self.fail(Fault::Protocol(format!(
                        "malformed {} frame",
                        opcodes::name(opcode)
                    )));
                } else {
                    log::debug!(
                        "{}: ignoring malformed {} frame before first reply",
                        self.path(),
                        opcodes::name(opcode)
                    );
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        let mut slots = self.lock();
        if slots.fault.is_some() {
            return;
        }
        slots.synced = true;

        match slots.pending.take() {
            Some(p) if p.tag == frame.tag && p.opcode == frame.opcode => {
                drop(slots);
                match decode_value(p.opcode, p.shape, &frame.payload) {
                    Ok(value) => {
                        log::trace!("{}: tag {} -> {:?}", self.path(), p.tag, value);
                        let _ = p.reply.send(Ok(value));
                    }
                    Err(e) => {
                        let fault = Fault::Protocol(format!("bad reply: {}", e));
                        let _ = p.reply.send(Err(fault.clone()));
                        self.fail(fault);
                    }
                }
            }
            pending => {
                if let Some(pos) = slots.expired.iter().position(|&t| t == frame.tag) {
                    slots.expired.remove(pos);
                    slots.pending = pending;
                    log::warn!(
                        "{}: discarding late {} reply (tag {})",
                        self.path(),
                        opcodes::name(frame.opcode),
                        frame.tag
                    );
                    return;
                }
                let msg = match &pending {
                    Some(p) => format!(
                        "{} reply with tag {} while waiting for {} tag {}",
                        opcodes::name(frame.opcode),
                        frame.tag,
                        opcodes::name(p.opcode),
                        p.tag
                    ),
                    None => format!(
                        "unsolicited {} reply with tag {}",
                        opcodes::name(frame.opcode),
                        frame.tag
                    ),
                };
                slots.pending = pending;
                drop(slots);
                self.fail(Fault::Protocol(msg));
            }
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut reads: ReadStream) {
    let mut decoder = FrameDecoder::new();
    while let Some(event) = reads.recv().await {
        match event {
            ReadEvent::Data(bytes) => {
                log::trace!("{} < {:02X?}", inner.path(), bytes);
                decoder.push(&bytes);
                while let Some(decoded) = decoder.next_frame() {
                    inner.handle(decoded);
                }
                let noise = decoder.take_discarded();
                if noise > 0 {
                    log::debug!("{}: discarded {} noise byte(s)", inner.path(), noise);
                }
            }
            ReadEvent::Failed(msg) => {
                inner.fail(Fault::Transport(msg));
                break;
            }
        }
        if inner.fault().is_some() {
            break;
        }
    }
    inner.fail(Fault::Transport("read stream ended".into()));
}

/// Handle to a running protocol engine
///
/// Clones share the same engine. Dropping the last clone closes it.
#[derive(Clone)]
pub struct Engine {
    owner: Arc<Owner>,
}

/// Held only by [`Engine`] handles, never by the reader task
struct Owner {
    inner: Arc<Inner>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.inner.fail(Fault::Closed);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.inner().path())
            .field("fault", &self.inner().fault())
            .finish()
    }
}

impl Engine {
    /// Start an engine over an opened transport
    ///
    /// Must be called within a tokio runtime; the reader task is spawned
    /// on it.
    pub fn start(opened: Opened, reply_timeout: Duration) -> Self {
        let (status, _) = watch::channel(EngineStatus::Running);
        let inner = Arc::new(Inner {
            transport: opened.transport,
            reply_timeout,
            turn: tokio::sync::Mutex::new(()),
            slots: Mutex::new(Slots::default()),
            status,
        });
        tokio::spawn(read_loop(Arc::clone(&inner), opened.reads));
        Self {
            owner: Arc::new(Owner { inner }),
        }
    }

    fn inner(&self) -> &Inner {
        &self.owner.inner
    }

    /// Path of the underlying transport
    pub fn path(&self) -> &str {
        self.inner().path()
    }

    /// Why the engine stopped, if it has
    pub fn fault(&self) -> Option<Fault> {
        self.inner().fault()
    }

    /// Whether the engine still accepts commands
    pub fn is_running(&self) -> bool {
        self.fault().is_none()
    }

    /// Watch the engine status
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.inner().status.subscribe()
    }

    /// Send a command and wait for its reply
    ///
    /// Write-only commands return [`Value::Unit`] once written.
    pub async fn request(&self, cmd: &Command) -> Result<Value, LinkError> {
        if let Some(fault) = self.fault() {
            return Err(fault.into());
        }
        if !cmd.reply_shape().expects_reply() {
            let frame = cmd.to_frame(NO_REPLY_TAG)?;
            self.inner().write(&frame)?;
            return Ok(Value::Unit);
        }

        let _turn = self.inner().turn.lock().await;
        let (frame, rx) = {
            let mut slots = self.inner().lock();
            if let Some(fault) = &slots.fault {
                return Err(fault.clone().into());
            }
            slots.last_tag = slots.last_tag.wrapping_add(1).max(1);
            let tag = slots.last_tag;
            let frame = cmd.to_frame(tag)?;
            let (tx, rx) = oneshot::channel();
            slots.expired.retain(|&t| t != tag);
            slots.pending = Some(Pending {
                tag,
                opcode: frame.opcode,
                shape: cmd.reply_shape(),
                reply: tx,
            });
            (frame, rx)
        };
        let _slot = SlotGuard {
            inner: self.inner(),
            tag: frame.tag,
        };
        self.inner().write(&frame)?;

        match tokio::time::timeout(self.inner().reply_timeout, rx).await {
            Ok(Ok(result)) => result.map_err(LinkError::from),
            Ok(Err(_)) => Err(self.fault().unwrap_or(Fault::Closed).into()),
            Err(_) => {
                log::warn!(
                    "{}: {} (tag {}) got no reply within {:?}",
                    self.path(),
                    opcodes::name(frame.opcode),
                    frame.tag,
                    self.inner().reply_timeout
                );
                Err(LinkError::Timeout {
                    operation: opcodes::name(frame.opcode),
                    after: self.inner().reply_timeout,
                })
            }
        }
    }

    /// Stop the engine because the board misbehaved
    pub(crate) fn protocol_fault(&self, msg: String) {
        self.inner().fail(Fault::Protocol(msg));
    }

    /// Close the transport and fail every pending and queued request
    pub fn close(&self) {
        self.inner().fail(Fault::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_core::matcher::Endpoint;
    use boardlink_core::profile::ProfileDatabase;
    use boardlink_core::protocol::{opcodes::ANALOG_READ, Level};
    use boardlink_dummy::{DummyBackend, DummyDevice};
    use boardlink_serial::SerialBackend;
    use std::time::Instant;

    const PATH: &str = "/dev/ttyACM0";

    fn setup(timeout: Duration) -> (Engine, DummyDevice) {
        let db = ProfileDatabase::builtin().unwrap();
        let profile = db.get("arduino-uno").unwrap();
        let dev = DummyDevice::new(profile);
        let backend = DummyBackend::new();
        backend.add_device(Endpoint::usb(PATH, 0x2341, 0x0043), dev.clone());
        let opened = backend.open(PATH, &profile.serial).unwrap();
        (Engine::start(opened, timeout), dev)
    }

    fn analog(pin: u8) -> Command {
        Command::AnalogRead { pin }
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_write_only_completes_without_reply() {
        let (engine, dev) = setup(Duration::from_secs(2));
        dev.mute(true);
        let cmd = Command::DigitalWrite {
            pin: 2,
            level: Level::High,
        };
        assert_eq!(engine.request(&cmd).await.unwrap(), Value::Unit);
        assert_eq!(dev.write_count(), 1);
        assert_eq!(dev.written_frames()[0].tag, NO_REPLY_TAG);
        assert_eq!(dev.level(2), Some(Level::High));
    }

    #[tokio::test]
    async fn test_reply_is_decoded() {
        let (engine, dev) = setup(Duration::from_secs(2));
        dev.set_analog(0x80, 512);
        assert_eq!(engine.request(&analog(0x80)).await.unwrap(), Value::Number(512));
    }

    #[tokio::test]
    async fn test_requests_queue_in_issue_order() {
        let (engine, dev) = setup(Duration::from_secs(5));
        for (i, pin) in [0x80u8, 0x81, 0x82].iter().enumerate() {
            dev.set_analog(*pin, 100 * (i as u16 + 1));
        }
        dev.hold_replies(true);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for pin in [0x80u8, 0x81, 0x82] {
            let engine = engine.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let v = engine.request(&analog(pin)).await.unwrap();
                order.lock().unwrap().push(pin);
                v
            }));
            settle().await;
        }

        // Only the first request is on the wire
        for expected_writes in 1..=3 {
            assert_eq!(dev.write_count(), expected_writes);
            assert_eq!(dev.held_count(), 1);
            dev.release_replies();
            settle().await;
        }

        let mut values = Vec::new();
        for h in handles {
            values.push(h.await.unwrap());
        }
        assert_eq!(
            values,
            vec![Value::Number(100), Value::Number(200), Value::Number(300)]
        );
        assert_eq!(*order.lock().unwrap(), vec![0x80, 0x81, 0x82]);
    }

    #[tokio::test]
    async fn test_tag_mismatch_is_fatal() {
        let (engine, dev) = setup(Duration::from_secs(5));
        dev.hold_replies(true);
        let mut status = engine.status();

        let e = engine.clone();
        let handle = tokio::spawn(async move { e.request(&analog(0x80)).await });
        settle().await;

        let sent = dev.written_frames()[0].clone();
        let wrong = Frame::new(ANALOG_READ, sent.tag.wrapping_add(1), &[0x00, 0x02]).unwrap();
        dev.inject(&wrong.encode());

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)), "got {err:?}");
        status.changed().await.unwrap();
        assert!(matches!(
            *status.borrow(),
            EngineStatus::Stopped(Fault::Protocol(_))
        ));

        // The held reply carries the right tag but must not resolve anything
        dev.release_replies();
        assert!(matches!(
            engine.request(&analog(0x80)).await,
            Err(LinkError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unsolicited_reply_is_fatal() {
        let (engine, dev) = setup(Duration::from_secs(2));
        dev.set_analog(0x80, 1);
        engine.request(&analog(0x80)).await.unwrap();
        dev.inject(&Frame::new(ANALOG_READ, 77, &[0, 0]).unwrap().encode());
        settle().await;
        assert!(matches!(engine.fault(), Some(Fault::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_slot() {
        let (engine, dev) = setup(Duration::from_secs(2));
        dev.mute(true);
        let err = engine.request(&analog(0x80)).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::Timeout {
                operation: "analog-read",
                ..
            }
        ));
        assert!(engine.is_running());

        dev.mute(false);
        dev.set_analog(0x81, 42);
        assert_eq!(engine.request(&analog(0x81)).await.unwrap(), Value::Number(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_discarded() {
        let (engine, dev) = setup(Duration::from_secs(2));
        dev.set_analog(0x80, 7);
        dev.hold_replies(true);
        assert!(matches!(
            engine.request(&analog(0x80)).await,
            Err(LinkError::Timeout { .. })
        ));

        // The late reply arrives, then a fresh request succeeds
        dev.hold_replies(false);
        dev.release_replies();
        settle().await;
        assert!(engine.is_running());
        dev.set_analog(0x81, 9);
        assert_eq!(engine.request(&analog(0x81)).await.unwrap(), Value::Number(9));
    }

    #[tokio::test]
    async fn test_close_fails_all_pending() {
        let (engine, dev) = setup(Duration::from_secs(30));
        dev.hold_replies(true);

        let mut handles = Vec::new();
        for pin in [0x80u8, 0x81, 0x82, 0x83] {
            let e = engine.clone();
            handles.push(tokio::spawn(async move { e.request(&analog(pin)).await }));
            settle().await;
        }
        assert_eq!(dev.write_count(), 1);

        let start = Instant::now();
        engine.close();
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(LinkError::Closed)));
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            engine.request(&Command::SerialAvailable).await,
            Err(LinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_transport() {
        let db = ProfileDatabase::builtin().unwrap();
        let profile = db.get("arduino-uno").unwrap();
        let backend = DummyBackend::new();
        backend.add_device(Endpoint::usb(PATH, 0x2341, 0x0043), DummyDevice::new(profile));

        let opened = backend.open(PATH, &profile.serial).unwrap();
        let engine = Engine::start(opened, Duration::from_secs(2));
        let status = engine.status();
        let clone = engine.clone();
        drop(engine);
        assert!(matches!(
            backend.open(PATH, &profile.serial),
            Err(boardlink_serial::SerialError::Busy(_))
        ));

        drop(clone);
        assert_eq!(*status.borrow(), EngineStatus::Stopped(Fault::Closed));
        assert!(backend.open(PATH, &profile.serial).is_ok());
    }

    #[tokio::test]
    async fn test_unplug_fails_pending_with_transport_error() {
        let (engine, dev) = setup(Duration::from_secs(30));
        dev.hold_replies(true);
        let e = engine.clone();
        let handle = tokio::spawn(async move { e.request(&analog(0x80)).await });
        settle().await;
        dev.unplug();
        assert!(matches!(
            handle.await.unwrap(),
            Err(LinkError::Transport(_))
        ));
        assert!(matches!(engine.fault(), Some(Fault::Transport(_))));
    }

    #[tokio::test]
    async fn test_noise_before_first_reply_is_ignored() {
        let (engine, dev) = setup(Duration::from_secs(2));
        // Banner text, then a known opcode with a broken terminator
        dev.inject(b"ESP-ROM:esp32-20220801\r\n");
        dev.inject(&[ANALOG_READ, 0x05, 0x00, 0x33]);
        dev.set_analog(0x80, 3);
        assert_eq!(engine.request(&analog(0x80)).await.unwrap(), Value::Number(3));
        assert!(engine.is_running());

        // The same garbage after the first good frame is fatal
        dev.inject(&[ANALOG_READ, 0x05, 0x00, 0x33]);
        settle().await;
        assert!(matches!(engine.fault(), Some(Fault::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_shaped_noise_does_not_block_replies() {
        let (engine, dev) = setup(Duration::from_secs(2));
        // Boot ROM garbage at the wrong baud rate: an extension opcode
        // followed by a length byte announcing a long frame
        dev.inject(&[b'x', 0xE0, 0x13, 0xF8, b'y']);
        dev.set_analog(0x80, 512);
        for _ in 0..4 {
            assert_eq!(engine.request(&analog(0x80)).await.unwrap(), Value::Number(512));
        }
        assert!(engine.is_running());
    }
}
