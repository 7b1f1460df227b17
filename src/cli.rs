//! CLI argument parsing

use boardlink_core::protocol::{Level, PinMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal number
fn parse_number(s: &str) -> Result<i64, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<i64>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "boardlink")]
#[command(author, version, about = "Talk to microcontroller boards over USB serial", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Link configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra board profiles (.ron file or directory)
    #[arg(long, global = true)]
    pub boards: Option<PathBuf>,

    /// Serial backend (see `boardlink backends`)
    #[arg(long, global = true, default_value = "serial")]
    pub backend: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Board selection shared by commands that connect
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Board profile id (see `boardlink boards`)
    #[arg(short, long)]
    pub board: String,

    /// Endpoint to use instead of the first matching one
    #[arg(short, long)]
    pub port: Option<String>,

    /// Firmware sketch directory; flashed when the board runs stale firmware
    #[arg(long)]
    pub firmware: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List supported boards
    Boards,

    /// List available serial backends
    Backends,

    /// List serial endpoints and the boards they match
    Ports {
        /// Only show endpoints matching this board
        #[arg(short, long)]
        board: Option<String>,
    },

    /// Build firmware without flashing
    Build {
        /// Board profile id
        #[arg(short, long)]
        board: String,

        /// Sketch directory
        #[arg(short, long)]
        firmware: PathBuf,
    },

    /// Build firmware and flash it onto a board
    Flash {
        /// Board profile id
        #[arg(short, long)]
        board: String,

        /// Sketch directory
        #[arg(short, long)]
        firmware: PathBuf,

        /// Endpoint to flash instead of the first matching one
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Pin operations
    #[command(subcommand)]
    Pin(PinCommands),

    /// Persistent memory operations
    #[command(subcommand)]
    Memory(MemoryCommands),

    /// Board serial port operations
    #[command(subcommand)]
    Serial(SerialCommands),

    /// Run a board-specific operation
    Ext {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Operation name (see `boardlink boards`)
        name: String,

        /// Operation arguments
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum PinCommands {
    /// Configure a pin as input, output or input-pullup
    Mode {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Pin name or identifier
        pin: String,
        /// input, output or input-pullup
        mode: PinMode,
    },

    /// Drive a digital pin high or low
    Write {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Pin name or identifier
        pin: String,
        /// high or low
        level: Level,
    },

    /// Write a PWM duty cycle (0-255)
    Pwm {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Pin name or identifier
        pin: String,
        /// Duty cycle
        #[arg(value_parser = parse_number, allow_hyphen_values = true)]
        duty: i64,
    },

    /// Move a servo
    Servo {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Pin name or identifier
        pin: String,
        /// Angle in degrees
        #[arg(value_parser = parse_number, allow_hyphen_values = true)]
        angle: i64,
    },

    /// Read a digital pin
    Read {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Pin name or identifier
        pin: String,
    },

    /// Read an analog pin
    Analog {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Pin name or identifier
        pin: String,
    },
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Read one byte
    Read {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Address (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_number, allow_hyphen_values = true)]
        address: i64,
    },

    /// Write one byte
    Write {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Address (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_number, allow_hyphen_values = true)]
        address: i64,
        /// Value (0-255)
        #[arg(value_parser = parse_number, allow_hyphen_values = true)]
        value: i64,
    },
}

#[derive(Subcommand)]
pub enum SerialCommands {
    /// Print text on the board's serial port
    Print {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Text to print
        text: String,
        /// End with a newline
        #[arg(short, long)]
        newline: bool,
    },

    /// Show how many bytes the board has received
    Available {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Read what the board has received
    Read {
        #[command(flatten)]
        connect: ConnectArgs,
    },
}
