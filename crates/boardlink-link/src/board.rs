//! Peripheral driver
//!
//! [`Board`] is the operation surface of one connected board. Pins are given
//! by logical name (`D2`, `A0`) or physical identifier (`2`), and every
//! argument is checked against the board profile before anything is sent.

use std::path::Path;

use boardlink_core::profile::{check_range, BoardProfile, Capability, Pin};
use boardlink_core::protocol::{opcodes, Command, Level, LineEnding, PinMode, Value};
use boardlink_core::ConfigError;
use tokio::sync::watch;

use crate::connection::{Connection, ConnectionState};
use crate::engine::Engine;
use crate::error::LinkError;

/// A connected board
#[derive(Debug, Clone)]
pub struct Board {
    connection: Connection,
}

impl Board {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Board profile
    pub fn profile(&self) -> &BoardProfile {
        self.connection.profile()
    }

    /// Endpoint path
    pub fn path(&self) -> Option<&str> {
        self.connection.path()
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// The protocol engine of the current link
    pub fn engine(&self) -> Result<Engine, LinkError> {
        self.connection.engine()
    }

    /// Close the connection
    pub fn close(&self) {
        self.connection.close();
    }

    /// Flash new firmware and reconnect
    pub async fn reflash(&self, firmware: &Path) -> Result<(), LinkError> {
        self.connection.reflash(firmware).await
    }

    fn pin(&self, pin: &str, capability: Capability) -> Result<&Pin, LinkError> {
        Ok(self.profile().pins.resolve(pin, capability)?)
    }

    fn address(&self, address: i64) -> Result<u16, LinkError> {
        let size = self.profile().memory_size;
        if address < 0 || address >= size as i64 {
            return Err(ConfigError::AddressOutOfRange {
                address: address.clamp(0, u32::MAX as i64) as u32,
                size,
            }
            .into());
        }
        Ok(address as u16)
    }

    async fn send(&self, cmd: Command) -> Result<Value, LinkError> {
        self.engine()?.request(&cmd).await
    }

    async fn number(&self, cmd: Command) -> Result<u16, LinkError> {
        let opcode = cmd.opcode();
        match self.send(cmd).await? {
            Value::Number(n) => Ok(n),
            other => Err(self.bad_reply(opcode, &other)),
        }
    }

    /// Stop the link over a reply the board should never have sent
    fn bad_reply(&self, opcode: u8, value: &Value) -> LinkError {
        let msg = format!("unexpected {} reply: {:?}", opcodes::name(opcode), value);
        if let Ok(engine) = self.engine() {
            engine.protocol_fault(msg.clone());
        }
        LinkError::Protocol(msg)
    }

    /// Protocol version of the running firmware
    pub async fn query_version(&self) -> Result<u16, LinkError> {
        self.number(Command::QueryVersion).await
    }

    /// Configure a digital pin
    pub async fn set_pin_mode(&self, pin: &str, mode: PinMode) -> Result<(), LinkError> {
        let pin = self.pin(pin, Capability::Digital)?.wire;
        self.send(Command::PinMode { pin, mode }).await?;
        Ok(())
    }

    /// Drive a digital pin
    pub async fn set_digital_output(&self, pin: &str, level: Level) -> Result<(), LinkError> {
        let pin = self.pin(pin, Capability::Digital)?.wire;
        self.send(Command::DigitalWrite { pin, level }).await?;
        Ok(())
    }

    /// Write a PWM duty cycle (0-255)
    pub async fn set_pwm_output(&self, pin: &str, duty: i64) -> Result<(), LinkError> {
        let pin = self.pin(pin, Capability::Pwm)?.wire;
        check_range("PWM duty", duty, 0, 255)?;
        self.send(Command::PwmWrite {
            pin,
            duty: duty as u8,
        })
        .await?;
        Ok(())
    }

    /// Move a servo (0 to the board's maximum angle)
    pub async fn set_servo_output(&self, pin: &str, angle: i64) -> Result<(), LinkError> {
        let pin = self.pin(pin, Capability::Servo)?.wire;
        check_range("servo angle", angle, 0, self.profile().servo_max_angle as i64)?;
        self.send(Command::ServoWrite {
            pin,
            angle: angle as u8,
        })
        .await?;
        Ok(())
    }

    /// Read a digital pin; `true` is HIGH
    pub async fn read_digital_pin(&self, pin: &str) -> Result<bool, LinkError> {
        let pin = self.pin(pin, Capability::Digital)?.wire;
        let cmd = Command::DigitalRead { pin };
        let opcode = cmd.opcode();
        match self.send(cmd).await? {
            Value::Bool(level) => Ok(level),
            other => Err(self.bad_reply(opcode, &other)),
        }
    }

    /// Read an analog pin
    ///
    /// Readings above the board's ADC range mean the link is out of sync and
    /// stop the connection.
    pub async fn read_analog_pin(&self, pin: &str) -> Result<u16, LinkError> {
        let pin = self.pin(pin, Capability::Analog)?.wire;
        let cmd = Command::AnalogRead { pin };
        let opcode = cmd.opcode();
        let value = self.number(cmd).await?;
        if value > self.profile().adc_max() {
            return Err(self.bad_reply(opcode, &Value::Number(value)));
        }
        Ok(value)
    }

    /// Read one byte of persistent memory
    pub async fn memory_read(&self, address: i64) -> Result<u8, LinkError> {
        let address = self.address(address)?;
        let cmd = Command::MemoryRead { address };
        let opcode = cmd.opcode();
        let value = self.number(cmd).await?;
        u8::try_from(value).map_err(|_| self.bad_reply(opcode, &Value::Number(value)))
    }

    /// Write one byte of persistent memory
    pub async fn memory_write(&self, address: i64, value: i64) -> Result<(), LinkError> {
        let address = self.address(address)?;
        check_range("memory value", value, 0, 255)?;
        self.send(Command::MemoryWrite {
            address,
            value: value as u8,
        })
        .await?;
        Ok(())
    }

    /// Print text on the board's serial port
    ///
    /// Long text is split across frames; the line ending follows the last one.
    pub async fn serial_print(&self, text: &str, eol: LineEnding) -> Result<(), LinkError> {
        let engine = self.engine()?;
        for cmd in Command::serial_print(text, eol) {
            engine.request(&cmd).await?;
        }
        Ok(())
    }

    /// Bytes waiting in the board's serial receive buffer
    pub async fn serial_available(&self) -> Result<u16, LinkError> {
        self.number(Command::SerialAvailable).await
    }

    /// Drain the board's serial receive buffer
    pub async fn serial_read(&self) -> Result<String, LinkError> {
        let cmd = Command::SerialRead;
        let opcode = cmd.opcode();
        match self.send(cmd).await? {
            Value::Text(text) => Ok(text),
            other => Err(self.bad_reply(opcode, &other)),
        }
    }

    /// Run a board-specific operation
    pub async fn call_extension(&self, name: &str, args: &[&str]) -> Result<Value, LinkError> {
        let profile = self.profile();
        let op = profile
            .extension(name)
            .ok_or_else(|| ConfigError::UnknownExtension { name: name.into() })?;
        let payload = op.encode_args(&profile.pins, args)?;
        log::debug!("{}: {} {:?}", profile.name, op.name, args);
        self.send(Command::Extension {
            opcode: op.opcode,
            reply: op.reply,
            payload,
        })
        .await
    }
}
