//! Simulated board firmware

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use boardlink_core::profile::BoardProfile;
use boardlink_core::protocol::{
    encode_value, Command, Decoded, Frame, FrameDecoder, Level, LineEnding, PinMode, ReplyShape,
    Value, PROTOCOL_VERSION,
};
use boardlink_serial::ReadEvent;
use tokio::sync::mpsc;

/// Configuration for a simulated board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Protocol version of the running firmware, `None` for foreign firmware
    /// that ignores every frame
    pub firmware_version: Option<u16>,
    /// Text printed by the bootloader when the port is opened
    pub banner: Vec<u8>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            firmware_version: Some(PROTOCOL_VERSION),
            banner: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Pins {
    modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, Level>,
    inputs: HashMap<u8, bool>,
    analog: HashMap<u8, u16>,
    pwm: HashMap<u8, u8>,
    servo: HashMap<u8, u8>,
}

#[derive(Debug)]
pub(crate) struct DeviceState {
    profile: BoardProfile,
    config: DummyConfig,
    pins: Pins,
    memory: Vec<u8>,
    serial_in: Vec<u8>,
    serial_out: String,
    ext_replies: HashMap<u8, Value>,
    decoder: FrameDecoder,
    written: Vec<Frame>,
    held: Vec<Frame>,
    hold: bool,
    mute: bool,
    plugged: bool,
    session: u64,
    reads: Option<mpsc::UnboundedSender<ReadEvent>>,
    flash_count: usize,
}

impl DeviceState {
    fn send(&mut self, bytes: Vec<u8>) {
        if let Some(tx) = &self.reads {
            let _ = tx.send(ReadEvent::Data(bytes));
        }
    }

    fn reply(&mut self, frame: Frame) {
        if self.mute {
            log::debug!("dummy: dropping reply 0x{:02X}/{}", frame.opcode, frame.tag);
        } else if self.hold {
            self.held.push(frame);
        } else {
            self.send(frame.encode());
        }
    }

    fn execute(&mut self, frame: &Frame) -> Option<Value> {
        self.config.firmware_version?;
        let cmd = match Command::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::warn!("dummy: bad command frame: {}", e);
                return None;
            }
        };
        let value = match cmd {
            Command::QueryVersion => Value::Number(self.config.firmware_version?),
            Command::PinMode { pin, mode } => {
                self.pins.modes.insert(pin, mode);
                Value::Unit
            }
            Command::DigitalWrite { pin, level } => {
                self.pins.levels.insert(pin, level);
                Value::Unit
            }
            Command::PwmWrite { pin, duty } => {
                self.pins.pwm.insert(pin, duty);
                Value::Unit
            }
            Command::ServoWrite { pin, angle } => {
                self.pins.servo.insert(pin, angle);
                Value::Unit
            }
            Command::DigitalRead { pin } => {
                let level = match self.pins.inputs.get(&pin) {
                    Some(v) => *v,
                    None => self.pins.levels.get(&pin) == Some(&Level::High),
                };
                Value::Bool(level)
            }
            Command::AnalogRead { pin } => {
                Value::Number(self.pins.analog.get(&pin).copied().unwrap_or(0))
            }
            Command::MemoryRead { address } => Value::Number(
                self.memory.get(address as usize).copied().unwrap_or(0xFF) as u16,
            ),
            Command::MemoryWrite { address, value } => {
                if let Some(cell) = self.memory.get_mut(address as usize) {
                    *cell = value;
                }
                Value::Unit
            }
            Command::SerialPrint { eol, text } => {
                self.serial_out.push_str(&String::from_utf8_lossy(&text));
                if eol == LineEnding::Newline {
                    self.serial_out.push('\n');
                }
                Value::Unit
            }
            Command::SerialAvailable => Value::Number(self.serial_in.len() as u16),
            Command::SerialRead => {
                let bytes = std::mem::take(&mut self.serial_in);
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            Command::Extension { opcode, .. } => {
                let op = self.profile.extension_by_opcode(opcode)?;
                match self.ext_replies.get(&opcode) {
                    Some(v) => v.clone(),
                    None => match op.reply {
                        ReplyShape::None => Value::Unit,
                        ReplyShape::Boolean => Value::Bool(false),
                        ReplyShape::Numeric => Value::Number(0),
                        ReplyShape::Text => Value::Text(String::new()),
                    },
                }
            }
        };
        Some(value)
    }

    pub(crate) fn receive(&mut self, bytes: &[u8]) {
        self.decoder.push(bytes);
        while let Some(decoded) = self.decoder.next_frame() {
            let Decoded::Frame(frame) = decoded else {
                continue;
            };
            log::trace!("dummy: received {:02X?}", frame.encode());
            self.written.push(frame.clone());
            match self.execute(&frame) {
                Some(Value::Unit) | None => {}
                Some(value) => {
                    // Only build frames that fit; oversized text is truncated
                    let mut payload = encode_value(&value);
                    payload.truncate(boardlink_core::protocol::MAX_PAYLOAD);
                    if let Ok(reply) = Frame::new(frame.opcode, frame.tag, &payload) {
                        self.reply(reply);
                    }
                }
            }
        }
        self.decoder.take_discarded();
    }

    pub(crate) fn attach(&mut self) -> Option<(u64, mpsc::UnboundedReceiver<ReadEvent>)> {
        if !self.plugged || self.reads.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.session += 1;
        self.reads = Some(tx);
        self.decoder.clear();
        self.decoder.take_discarded();
        if !self.config.banner.is_empty() {
            let banner = self.config.banner.clone();
            self.send(banner);
        }
        Some((self.session, rx))
    }

    pub(crate) fn detach(&mut self, session: u64) {
        if self.session == session {
            self.reads = None;
            self.held.clear();
        }
    }

    pub(crate) fn is_live(&self, session: u64) -> bool {
        self.plugged && self.session == session && self.reads.is_some()
    }

    pub(crate) fn is_plugged(&self) -> bool {
        self.plugged
    }

    pub(crate) fn is_open(&self) -> bool {
        self.reads.is_some()
    }

    pub(crate) fn serial_params(&self) -> boardlink_core::profile::SerialParams {
        self.profile.serial
    }
}

/// A simulated board
///
/// Cloning gives another handle to the same board.
#[derive(Debug, Clone)]
pub struct DummyDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl DummyDevice {
    /// Create a board of the given profile running compatible firmware
    pub fn new(profile: &BoardProfile) -> Self {
        Self::with_config(profile, DummyConfig::default())
    }

    /// Create a board with explicit configuration
    pub fn with_config(profile: &BoardProfile, config: DummyConfig) -> Self {
        let state = DeviceState {
            memory: vec![0xFF; profile.memory_size as usize],
            profile: profile.clone(),
            config,
            pins: Pins::default(),
            serial_in: Vec::new(),
            serial_out: String::new(),
            ext_replies: HashMap::new(),
            decoder: FrameDecoder::new(),
            written: Vec::new(),
            held: Vec::new(),
            hold: false,
            mute: false,
            plugged: true,
            session: 0,
            reads: None,
            flash_count: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Profile the board was created for
    pub fn profile(&self) -> BoardProfile {
        self.lock().profile.clone()
    }

    /// Set the level a digital read of `pin` returns
    pub fn set_digital_input(&self, pin: u8, high: bool) {
        self.lock().pins.inputs.insert(pin, high);
    }

    /// Set the value an analog read of `pin` returns
    pub fn set_analog(&self, pin: u8, value: u16) {
        self.lock().pins.analog.insert(pin, value);
    }

    /// Queue text as if it arrived on the board's serial port
    pub fn push_serial_input(&self, text: &str) {
        self.lock().serial_in.extend_from_slice(text.as_bytes());
    }

    /// Set the reply of an extension operation
    pub fn set_extension_reply(&self, opcode: u8, value: Value) {
        self.lock().ext_replies.insert(opcode, value);
    }

    /// Last level written to `pin`
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.lock().pins.levels.get(&pin).copied()
    }

    /// Last mode set on `pin`
    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.lock().pins.modes.get(&pin).copied()
    }

    /// Last PWM duty written to `pin`
    pub fn pwm(&self, pin: u8) -> Option<u8> {
        self.lock().pins.pwm.get(&pin).copied()
    }

    /// Last servo angle written to `pin`
    pub fn servo(&self, pin: u8) -> Option<u8> {
        self.lock().pins.servo.get(&pin).copied()
    }

    /// Byte stored at `address`
    pub fn memory(&self, address: u16) -> Option<u8> {
        self.lock().memory.get(address as usize).copied()
    }

    /// Text printed on the board's serial port so far
    pub fn printed(&self) -> String {
        self.lock().serial_out.clone()
    }

    /// Every frame the host has written
    pub fn written_frames(&self) -> Vec<Frame> {
        self.lock().written.clone()
    }

    /// Number of frames the host has written
    pub fn write_count(&self) -> usize {
        self.lock().written.len()
    }

    /// Queue replies instead of sending them
    pub fn hold_replies(&self, hold: bool) {
        self.lock().hold = hold;
    }

    /// Number of replies currently held back
    pub fn held_count(&self) -> usize {
        self.lock().held.len()
    }

    /// Send every held reply, in order
    pub fn release_replies(&self) {
        let mut state = self.lock();
        let held = std::mem::take(&mut state.held);
        for frame in held {
            state.send(frame.encode());
        }
    }

    /// Drop replies instead of sending them
    pub fn mute(&self, mute: bool) {
        self.lock().mute = mute;
    }

    /// Push raw bytes to the host as if the board sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().send(bytes.to_vec());
    }

    /// Disconnect the board: the open transport fails and the endpoint
    /// disappears until [`DummyDevice::replug`]
    pub fn unplug(&self) {
        let mut state = self.lock();
        state.plugged = false;
        state.held.clear();
        if let Some(tx) = state.reads.take() {
            let _ = tx.send(ReadEvent::Failed("device unplugged".into()));
        }
        log::debug!("dummy: {} unplugged", state.profile.id);
    }

    /// Reconnect the board
    pub fn replug(&self) {
        let mut state = self.lock();
        state.plugged = true;
        log::debug!("dummy: {} plugged in", state.profile.id);
    }

    /// Whether the board is currently plugged in
    pub fn is_plugged(&self) -> bool {
        self.lock().plugged
    }

    /// Replace the running firmware version
    pub fn set_firmware_version(&self, version: Option<u16>) {
        self.lock().config.firmware_version = version;
    }

    /// Protocol version of the running firmware
    pub fn firmware_version(&self) -> Option<u16> {
        self.lock().config.firmware_version
    }

    /// Number of times firmware was flashed onto the board
    pub fn flash_count(&self) -> usize {
        self.lock().flash_count
    }

    pub(crate) fn record_flash(&self) {
        let mut state = self.lock();
        state.flash_count += 1;
        state.config.firmware_version = Some(PROTOCOL_VERSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_core::profile::ProfileDatabase;
    use boardlink_core::protocol::opcodes;

    fn uno() -> BoardProfile {
        ProfileDatabase::builtin()
            .unwrap()
            .get("arduino-uno")
            .unwrap()
            .clone()
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<ReadEvent>) -> Frame {
        let mut dec = FrameDecoder::new();
        while let Ok(ev) = rx.try_recv() {
            if let ReadEvent::Data(bytes) = ev {
                dec.push(&bytes);
            }
        }
        match dec.next_frame() {
            Some(Decoded::Frame(f)) => f,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_answers_analog_read() {
        let dev = DummyDevice::new(&uno());
        dev.set_analog(0x80, 512);
        let (_, mut rx) = dev.lock().attach().unwrap();

        let req = Command::AnalogRead { pin: 0x80 }.to_frame(5).unwrap();
        dev.lock().receive(&req.encode());

        let reply = next_frame(&mut rx);
        assert_eq!(reply.opcode, opcodes::ANALOG_READ);
        assert_eq!(reply.tag, 5);
        assert_eq!(reply.payload.as_slice(), &[0x00, 0x02]);
    }

    #[test]
    fn test_write_only_commands_update_state() {
        let dev = DummyDevice::new(&uno());
        let (_, mut rx) = dev.lock().attach().unwrap();
        let mut bytes = Command::DigitalWrite {
            pin: 2,
            level: Level::High,
        }
        .to_frame(0)
        .unwrap()
        .encode();
        Command::MemoryWrite {
            address: 10,
            value: 42,
        }
        .to_frame(0)
        .unwrap()
        .encode_into(&mut bytes);
        dev.lock().receive(&bytes);

        assert_eq!(dev.level(2), Some(Level::High));
        assert_eq!(dev.memory(10), Some(42));
        assert_eq!(dev.write_count(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_foreign_firmware_ignores_frames() {
        let dev = DummyDevice::with_config(
            &uno(),
            DummyConfig {
                firmware_version: None,
                banner: b"hello\r\n".to_vec(),
            },
        );
        let (_, mut rx) = dev.lock().attach().unwrap();
        assert_eq!(rx.try_recv(), Ok(ReadEvent::Data(b"hello\r\n".to_vec())));

        dev.lock()
            .receive(&Command::QueryVersion.to_frame(1).unwrap().encode());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_hold_and_release() {
        let dev = DummyDevice::new(&uno());
        let (_, mut rx) = dev.lock().attach().unwrap();
        dev.hold_replies(true);
        dev.lock()
            .receive(&Command::QueryVersion.to_frame(3).unwrap().encode());
        assert_eq!(dev.held_count(), 1);
        assert!(rx.try_recv().is_err());

        dev.release_replies();
        let reply = next_frame(&mut rx);
        assert_eq!(reply.tag, 3);
        assert_eq!(reply.payload.as_slice(), &PROTOCOL_VERSION.to_le_bytes());
    }

    #[test]
    fn test_unplug_fails_reader() {
        let dev = DummyDevice::new(&uno());
        let (session, mut rx) = dev.lock().attach().unwrap();
        dev.unplug();
        assert!(matches!(rx.try_recv(), Ok(ReadEvent::Failed(_))));
        assert!(!dev.lock().is_live(session));
        assert!(dev.lock().attach().is_none());
        dev.replug();
        assert!(dev.lock().attach().is_some());
    }
}
