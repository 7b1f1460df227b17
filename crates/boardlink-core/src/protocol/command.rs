//! Typed commands and reply values

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use super::frame::{Frame, MAX_PAYLOAD, NO_REPLY_TAG};
use super::opcodes::{self, *};
use crate::error::{ConfigError, FrameError};

/// Protocol version reported by compatible firmware
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest text chunk carried by one serial-print frame
pub const SERIAL_PRINT_CHUNK: usize = MAX_PAYLOAD - 1;

/// What a command gets back from the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyShape {
    /// Write-only, no reply frame
    None,
    /// One byte, 0 or 1
    Boolean,
    /// Two bytes, little-endian
    Numeric,
    /// The payload as UTF-8 text
    Text,
}

impl ReplyShape {
    /// Whether the command waits for a reply frame
    pub fn expects_reply(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for ReplyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Boolean => "boolean",
            Self::Numeric => "numeric",
            Self::Text => "text",
        };
        f.write_str(s)
    }
}

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Completion of a write-only command
    Unit,
    /// Boolean reply
    Bool(bool),
    /// Numeric reply
    Number(u16),
    /// Text reply
    Text(String),
}

impl Value {
    /// The boolean, if this is a boolean reply
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number, if this is a numeric reply
    pub fn as_number(&self) -> Option<u16> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text, if this is a text reply
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("ok"),
            Self::Bool(true) => f.write_str("HIGH"),
            Self::Bool(false) => f.write_str("LOW"),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Digital output level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Level {
    /// Logic low
    Low = 0,
    /// Logic high
    High = 1,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" | "1" | "ON" => Ok(Self::High),
            "LOW" | "0" | "OFF" => Ok(Self::Low),
            _ => Err(ConfigError::InvalidArgument {
                what: "level",
                value: s.into(),
            }),
        }
    }
}

/// Pin mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PinMode {
    /// Floating input
    Input = 0,
    /// Push-pull output
    Output = 1,
    /// Input with the internal pull-up enabled
    InputPullup = 2,
}

impl PinMode {
    fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            2 => Some(Self::InputPullup),
            _ => None,
        }
    }
}

impl FromStr for PinMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "INPUT" => Ok(Self::Input),
            "OUTPUT" => Ok(Self::Output),
            "INPUT_PULLUP" | "PULLUP" => Ok(Self::InputPullup),
            _ => Err(ConfigError::InvalidArgument {
                what: "pin mode",
                value: s.into(),
            }),
        }
    }
}

/// Line ending appended by serial print
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LineEnding {
    /// Print the text as is
    #[default]
    None = 0,
    /// Follow the text with a newline
    Newline = 1,
}

impl FromStr for LineEnding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "nowarp" | "no" => Ok(Self::None),
            "newline" | "warp" | "yes" => Ok(Self::Newline),
            _ => Err(ConfigError::InvalidArgument {
                what: "line ending",
                value: s.into(),
            }),
        }
    }
}

/// A command with its pin arguments already resolved to wire bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the firmware protocol version
    QueryVersion,
    /// Set a pin mode
    PinMode {
        /// Pin wire byte
        pin: u8,
        /// Requested mode
        mode: PinMode,
    },
    /// Drive a digital output
    DigitalWrite {
        /// Pin wire byte
        pin: u8,
        /// Output level
        level: Level,
    },
    /// Set a PWM duty cycle
    PwmWrite {
        /// Pin wire byte
        pin: u8,
        /// Duty cycle (0-255)
        duty: u8,
    },
    /// Move a servo
    ServoWrite {
        /// Pin wire byte
        pin: u8,
        /// Angle in degrees
        angle: u8,
    },
    /// Read a digital input
    DigitalRead {
        /// Pin wire byte
        pin: u8,
    },
    /// Read an analog input
    AnalogRead {
        /// Pin wire byte
        pin: u8,
    },
    /// Read one byte of persistent memory
    MemoryRead {
        /// Byte address
        address: u16,
    },
    /// Write one byte of persistent memory
    MemoryWrite {
        /// Byte address
        address: u16,
        /// Value to store
        value: u8,
    },
    /// Print one chunk of text on the board's serial port
    SerialPrint {
        /// Line ending to append after this chunk
        eol: LineEnding,
        /// Text bytes, at most [`SERIAL_PRINT_CHUNK`]
        text: Vec<u8>,
    },
    /// Ask how many bytes are waiting on the board's serial port
    SerialAvailable,
    /// Read the bytes waiting on the board's serial port
    SerialRead,
    /// Board-specific operation
    Extension {
        /// Opcode in the extension range
        opcode: u8,
        /// Reply the operation produces
        reply: ReplyShape,
        /// Encoded arguments
        payload: Vec<u8>,
    },
}

impl Command {
    /// Wire opcode
    pub fn opcode(&self) -> u8 {
        match self {
            Self::QueryVersion => QUERY_VERSION,
            Self::PinMode { .. } => PIN_MODE,
            Self::DigitalWrite { .. } => DIGITAL_WRITE,
            Self::PwmWrite { .. } => PWM_WRITE,
            Self::ServoWrite { .. } => SERVO_WRITE,
            Self::DigitalRead { .. } => DIGITAL_READ,
            Self::AnalogRead { .. } => ANALOG_READ,
            Self::MemoryRead { .. } => MEMORY_READ,
            Self::MemoryWrite { .. } => MEMORY_WRITE,
            Self::SerialPrint { .. } => SERIAL_PRINT,
            Self::SerialAvailable => SERIAL_AVAILABLE,
            Self::SerialRead => SERIAL_READ,
            Self::Extension { opcode, .. } => *opcode,
        }
    }

    /// Shape of the reply this command produces
    pub fn reply_shape(&self) -> ReplyShape {
        match self {
            Self::QueryVersion
            | Self::AnalogRead { .. }
            | Self::MemoryRead { .. }
            | Self::SerialAvailable => ReplyShape::Numeric,
            Self::DigitalRead { .. } => ReplyShape::Boolean,
            Self::SerialRead => ReplyShape::Text,
            Self::PinMode { .. }
            | Self::DigitalWrite { .. }
            | Self::PwmWrite { .. }
            | Self::ServoWrite { .. }
            | Self::MemoryWrite { .. }
            | Self::SerialPrint { .. } => ReplyShape::None,
            Self::Extension { reply, .. } => *reply,
        }
    }

    /// Encode into a frame
    ///
    /// Write-only commands always carry [`NO_REPLY_TAG`], whatever `tag` is.
    pub fn to_frame(&self, tag: u8) -> Result<Frame, FrameError> {
        let tag = if self.reply_shape().expects_reply() {
            tag
        } else {
            NO_REPLY_TAG
        };
        let mut payload = Vec::new();
        match self {
            Self::QueryVersion | Self::SerialAvailable | Self::SerialRead => {}
            Self::PinMode { pin, mode } => payload.extend_from_slice(&[*pin, *mode as u8]),
            Self::DigitalWrite { pin, level } => payload.extend_from_slice(&[*pin, *level as u8]),
            Self::PwmWrite { pin, duty } => payload.extend_from_slice(&[*pin, *duty]),
            Self::ServoWrite { pin, angle } => payload.extend_from_slice(&[*pin, *angle]),
            Self::DigitalRead { pin } | Self::AnalogRead { pin } => payload.push(*pin),
            Self::MemoryRead { address } => payload.extend_from_slice(&address.to_le_bytes()),
            Self::MemoryWrite { address, value } => {
                payload.extend_from_slice(&address.to_le_bytes());
                payload.push(*value);
            }
            Self::SerialPrint { eol, text } => {
                payload.push(*eol as u8);
                payload.extend_from_slice(text);
            }
            Self::Extension { payload: p, .. } => payload.extend_from_slice(p),
        }
        Frame::new(self.opcode(), tag, &payload)
    }

    /// Decode a command frame as the firmware would
    ///
    /// Extension frames decode with [`ReplyShape::None`]; the board profile
    /// knows their real reply shape.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let p = frame.payload.as_slice();
        let op = frame.opcode;
        let expect = |n: usize, what: &'static str| {
            if p.len() == n {
                Ok(())
            } else {
                Err(FrameError::BadPayload {
                    opcode: op,
                    expected: what,
                    len: p.len(),
                })
            }
        };
        let cmd = match op {
            QUERY_VERSION => {
                expect(0, "empty payload")?;
                Self::QueryVersion
            }
            PIN_MODE => {
                expect(2, "[pin][mode]")?;
                let mode = PinMode::from_wire(p[1]).ok_or(FrameError::BadValue {
                    opcode: op,
                    value: p[1],
                })?;
                Self::PinMode { pin: p[0], mode }
            }
            DIGITAL_WRITE => {
                expect(2, "[pin][level]")?;
                let level = match p[1] {
                    0 => Level::Low,
                    1 => Level::High,
                    value => return Err(FrameError::BadValue { opcode: op, value }),
                };
                Self::DigitalWrite { pin: p[0], level }
            }
            PWM_WRITE => {
                expect(2, "[pin][duty]")?;
                Self::PwmWrite {
                    pin: p[0],
                    duty: p[1],
                }
            }
            SERVO_WRITE => {
                expect(2, "[pin][angle]")?;
                Self::ServoWrite {
                    pin: p[0],
                    angle: p[1],
                }
            }
            DIGITAL_READ => {
                expect(1, "[pin]")?;
                Self::DigitalRead { pin: p[0] }
            }
            ANALOG_READ => {
                expect(1, "[pin]")?;
                Self::AnalogRead { pin: p[0] }
            }
            MEMORY_READ => {
                expect(2, "[addr_lo][addr_hi]")?;
                Self::MemoryRead {
                    address: u16::from_le_bytes([p[0], p[1]]),
                }
            }
            MEMORY_WRITE => {
                expect(3, "[addr_lo][addr_hi][value]")?;
                Self::MemoryWrite {
                    address: u16::from_le_bytes([p[0], p[1]]),
                    value: p[2],
                }
            }
            SERIAL_PRINT => {
                let (&eol, text) = p.split_first().ok_or(FrameError::BadPayload {
                    opcode: op,
                    expected: "[eol][text...]",
                    len: 0,
                })?;
                let eol = match eol {
                    0 => LineEnding::None,
                    1 => LineEnding::Newline,
                    value => return Err(FrameError::BadValue { opcode: op, value }),
                };
                Self::SerialPrint {
                    eol,
                    text: text.to_vec(),
                }
            }
            SERIAL_AVAILABLE => {
                expect(0, "empty payload")?;
                Self::SerialAvailable
            }
            SERIAL_READ => {
                expect(0, "empty payload")?;
                Self::SerialRead
            }
            op if opcodes::is_extension(op) => Self::Extension {
                opcode: op,
                reply: ReplyShape::None,
                payload: p.to_vec(),
            },
            op => return Err(FrameError::UnknownOpcode(op)),
        };
        Ok(cmd)
    }

    /// Split text into serial-print commands
    ///
    /// Chunks break on character boundaries and only the last one carries
    /// the line ending. Empty text still produces one command.
    pub fn serial_print(text: &str, eol: LineEnding) -> Vec<Command> {
        let mut chunks = Vec::new();
        let mut rest = text;
        while rest.len() > SERIAL_PRINT_CHUNK {
            let mut cut = SERIAL_PRINT_CHUNK;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let (head, tail) = rest.split_at(cut);
            chunks.push(Self::SerialPrint {
                eol: LineEnding::None,
                text: head.as_bytes().to_vec(),
            });
            rest = tail;
        }
        chunks.push(Self::SerialPrint {
            eol,
            text: rest.as_bytes().to_vec(),
        });
        chunks
    }
}

/// Encode a reply value into a reply payload
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Unit => Vec::new(),
        Value::Bool(b) => alloc::vec![*b as u8],
        Value::Number(n) => n.to_le_bytes().to_vec(),
        Value::Text(s) => s.as_bytes().to_vec(),
    }
}

/// Decode a reply payload of the given shape
pub fn decode_value(opcode: u8, shape: ReplyShape, payload: &[u8]) -> Result<Value, FrameError> {
    let bad = |expected: &'static str| FrameError::BadPayload {
        opcode,
        expected,
        len: payload.len(),
    };
    match shape {
        ReplyShape::None if payload.is_empty() => Ok(Value::Unit),
        ReplyShape::None => Err(bad("empty payload")),
        ReplyShape::Boolean => match payload {
            [0] => Ok(Value::Bool(false)),
            [1] => Ok(Value::Bool(true)),
            [value] => Err(FrameError::BadValue {
                opcode,
                value: *value,
            }),
            _ => Err(bad("1 byte")),
        },
        ReplyShape::Numeric => match payload {
            [lo, hi] => Ok(Value::Number(u16::from_le_bytes([*lo, *hi]))),
            _ => Err(bad("2 bytes")),
        },
        ReplyShape::Text => Ok(Value::Text(
            String::from_utf8_lossy(payload).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Decoded, FrameDecoder};
    use alloc::vec;

    #[test]
    fn test_digital_write_round_trip() {
        // D2 on an Uno-like board is GPIO 2
        let cmd = Command::DigitalWrite {
            pin: 2,
            level: Level::High,
        };
        let bytes = cmd.to_frame(9).unwrap().encode();
        assert_eq!(bytes, vec![DIGITAL_WRITE, 0, 2, 2, 1, 0x0A]);

        let mut dec = FrameDecoder::new();
        dec.push(&bytes);
        let Some(Decoded::Frame(frame)) = dec.next_frame() else {
            panic!("no frame decoded");
        };
        assert_eq!(frame.opcode, DIGITAL_WRITE);
        assert_eq!(Command::from_frame(&frame).unwrap(), cmd);
    }

    #[test]
    fn test_read_keeps_tag() {
        let frame = Command::AnalogRead { pin: 0x80 }.to_frame(42).unwrap();
        assert_eq!(frame.tag, 42);
        assert_eq!(frame.payload.as_slice(), &[0x80]);
    }

    #[test]
    fn test_memory_payload() {
        let frame = Command::MemoryWrite {
            address: 0x0302,
            value: 7,
        }
        .to_frame(0)
        .unwrap();
        assert_eq!(frame.payload.as_slice(), &[0x02, 0x03, 7]);
    }

    #[test]
    fn test_from_frame_rejects_bad_payload() {
        let frame = Frame::new(DIGITAL_WRITE, 0, &[2]).unwrap();
        assert!(matches!(
            Command::from_frame(&frame),
            Err(FrameError::BadPayload { len: 1, .. })
        ));
        let frame = Frame::new(DIGITAL_WRITE, 0, &[2, 5]).unwrap();
        assert_eq!(
            Command::from_frame(&frame),
            Err(FrameError::BadValue {
                opcode: DIGITAL_WRITE,
                value: 5
            })
        );
        let frame = Frame::new(0x90, 0, &[]).unwrap();
        assert_eq!(
            Command::from_frame(&frame),
            Err(FrameError::UnknownOpcode(0x90))
        );
    }

    #[test]
    fn test_serial_print_chunking() {
        let text = "x".repeat(SERIAL_PRINT_CHUNK * 2 + 10);
        let chunks = Command::serial_print(&text, LineEnding::Newline);
        assert_eq!(chunks.len(), 3);
        let eols: Vec<_> = chunks
            .iter()
            .map(|c| match c {
                Command::SerialPrint { eol, .. } => *eol,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            eols,
            vec![LineEnding::None, LineEnding::None, LineEnding::Newline]
        );
        for c in &chunks {
            assert!(c.to_frame(0).is_ok());
        }

        let single = Command::serial_print("", LineEnding::None);
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_serial_print_splits_on_char_boundary() {
        let text = "é".repeat(SERIAL_PRINT_CHUNK);
        for c in Command::serial_print(&text, LineEnding::None) {
            let Command::SerialPrint { text, .. } = c else {
                unreachable!()
            };
            assert!(core::str::from_utf8(&text).is_ok());
            assert!(text.len() <= SERIAL_PRINT_CHUNK);
        }
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(
            decode_value(ANALOG_READ, ReplyShape::Numeric, &[0x00, 0x02]),
            Ok(Value::Number(512))
        );
        assert_eq!(
            decode_value(DIGITAL_READ, ReplyShape::Boolean, &[1]),
            Ok(Value::Bool(true))
        );
        assert!(decode_value(DIGITAL_READ, ReplyShape::Boolean, &[2]).is_err());
        assert!(decode_value(ANALOG_READ, ReplyShape::Numeric, &[1]).is_err());
        assert_eq!(
            decode_value(SERIAL_READ, ReplyShape::Text, b"hello"),
            Ok(Value::Text("hello".into()))
        );
        assert_eq!(
            decode_value(SERIAL_READ, ReplyShape::Text, &encode_value(&Value::Text("ok".into()))),
            Ok(Value::Text("ok".into()))
        );
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!("high".parse::<Level>(), Ok(Level::High));
        assert_eq!("0".parse::<Level>(), Ok(Level::Low));
        assert!("maybe".parse::<Level>().is_err());
        assert_eq!("INPUT_PULLUP".parse::<PinMode>(), Ok(PinMode::InputPullup));
        assert_eq!("output".parse::<PinMode>(), Ok(PinMode::Output));
        assert_eq!("warp".parse::<LineEnding>(), Ok(LineEnding::Newline));
        assert_eq!("noWarp".parse::<LineEnding>(), Ok(LineEnding::None));
    }
}
