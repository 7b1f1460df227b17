//! Protocol opcodes

/// Query the firmware protocol version (numeric reply)
pub const QUERY_VERSION: u8 = 0x80;
/// Set the mode of a pin: `[pin][mode]`
pub const PIN_MODE: u8 = 0x81;
/// Drive a digital output: `[pin][level]`
pub const DIGITAL_WRITE: u8 = 0x82;
/// Set a PWM duty cycle: `[pin][duty]`
pub const PWM_WRITE: u8 = 0x83;
/// Move a servo: `[pin][angle]`
pub const SERVO_WRITE: u8 = 0x84;
/// Read a digital input: `[pin]` (boolean reply)
pub const DIGITAL_READ: u8 = 0x85;
/// Read an analog input: `[pin]` (numeric reply)
pub const ANALOG_READ: u8 = 0x86;
/// Read one byte of persistent memory: `[addr_lo][addr_hi]` (numeric reply)
pub const MEMORY_READ: u8 = 0x87;
/// Write one byte of persistent memory: `[addr_lo][addr_hi][value]`
pub const MEMORY_WRITE: u8 = 0x88;
/// Print text on the board's secondary serial port: `[eol][bytes...]`
pub const SERIAL_PRINT: u8 = 0x89;
/// Number of bytes waiting on the secondary serial port (numeric reply)
pub const SERIAL_AVAILABLE: u8 = 0x8A;
/// Read what is waiting on the secondary serial port (text reply)
pub const SERIAL_READ: u8 = 0x8B;

/// First opcode reserved for board-specific extensions
pub const EXT_FIRST: u8 = 0xC0;
/// Last opcode reserved for board-specific extensions
pub const EXT_LAST: u8 = 0xEF;

/// Whether `op` lies in the extension range
pub const fn is_extension(op: u8) -> bool {
    op >= EXT_FIRST && op <= EXT_LAST
}

/// Whether `op` can start a frame
pub const fn is_known(op: u8) -> bool {
    (op >= QUERY_VERSION && op <= SERIAL_READ) || is_extension(op)
}

/// Human readable opcode name for logs
pub fn name(op: u8) -> &'static str {
    match op {
        QUERY_VERSION => "query-version",
        PIN_MODE => "pin-mode",
        DIGITAL_WRITE => "digital-write",
        PWM_WRITE => "pwm-write",
        SERVO_WRITE => "servo-write",
        DIGITAL_READ => "digital-read",
        ANALOG_READ => "analog-read",
        MEMORY_READ => "memory-read",
        MEMORY_WRITE => "memory-write",
        SERIAL_PRINT => "serial-print",
        SERIAL_AVAILABLE => "serial-available",
        SERIAL_READ => "serial-read",
        op if is_extension(op) => "extension",
        _ => "unknown",
    }
}
