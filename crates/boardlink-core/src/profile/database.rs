//! Profile database for runtime loading and lookup
//!
//! Board profiles are RON documents. The profiles shipped with boardlink are
//! compiled in; additional ones can be loaded from a directory at runtime.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use std::fs;
use std::io;
use std::path::Path;

use super::pins::{Capability, PinCaps, PinSpec};
use super::types::{ArgKind, BoardProfile, BoardType, ExtensionOp, SerialParams, ToolchainTarget};
use crate::error::ConfigError;
use crate::protocol::ReplyShape;

/// Profiles shipped with boardlink, as (origin, RON source)
const BUILTIN_PROFILES: &[(&str, &str)] = &[
    ("arduino-uno.ron", include_str!("../../boards/arduino-uno.ron")),
    ("zqrobot201.ron", include_str!("../../boards/zqrobot201.ron")),
    ("zqrobot202.ron", include_str!("../../boards/zqrobot202.ron")),
];

/// Error type for profile database operations
#[derive(Debug)]
pub enum ProfileDbError {
    /// I/O error reading files
    Io(io::Error),
    /// RON parsing error
    Parse {
        /// File or builtin name the document came from
        origin: String,
        /// Parser error
        error: ron::error::SpannedError,
    },
    /// The document parsed but describes an inconsistent board
    Invalid {
        /// File or builtin name the document came from
        origin: String,
        /// Validation failure
        error: ConfigError,
    },
}

impl From<io::Error> for ProfileDbError {
    fn from(e: io::Error) -> Self {
        ProfileDbError::Io(e)
    }
}

impl std::fmt::Display for ProfileDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileDbError::Io(e) => write!(f, "I/O error: {}", e),
            ProfileDbError::Parse { origin, error } => {
                write!(f, "Parse error in {}: {}", origin, error)
            }
            ProfileDbError::Invalid { origin, error } => write!(f, "{}: {}", origin, error),
        }
    }
}

impl std::error::Error for ProfileDbError {}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Serial line parameters (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
struct SerialDef {
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
}

impl Default for SerialDef {
    fn default() -> Self {
        let d = SerialParams::default();
        Self {
            baud_rate: d.baud_rate,
            data_bits: d.data_bits,
            stop_bits: d.stop_bits,
        }
    }
}

/// Toolchain family (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize, Default)]
enum BoardTypeDef {
    #[default]
    Arduino,
}

/// Toolchain target (RON format)
#[derive(Debug, Clone, serde::Deserialize)]
struct ToolchainDef {
    #[serde(default)]
    board_type: BoardTypeDef,
    fqbn: String,
    #[serde(default)]
    upload_speed: Option<u32>,
}

/// Capability names usable in extension arguments
#[derive(Debug, Clone, Copy, serde::Deserialize)]
enum CapabilityDef {
    Digital,
    Pwm,
    Servo,
    Analog,
}

impl From<CapabilityDef> for Capability {
    fn from(def: CapabilityDef) -> Self {
        match def {
            CapabilityDef::Digital => Capability::Digital,
            CapabilityDef::Pwm => Capability::Pwm,
            CapabilityDef::Servo => Capability::Servo,
            CapabilityDef::Analog => Capability::Analog,
        }
    }
}

/// Extension argument kind (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
enum ArgDef {
    Pin(CapabilityDef),
    Byte { min: u8, max: u8 },
    Signed { min: i8, max: i8 },
    Word,
}

impl From<ArgDef> for ArgKind {
    fn from(def: ArgDef) -> Self {
        match def {
            ArgDef::Pin(cap) => ArgKind::Pin(cap.into()),
            ArgDef::Byte { min, max } => ArgKind::Byte { min, max },
            ArgDef::Signed { min, max } => ArgKind::Signed { min, max },
            ArgDef::Word => ArgKind::Word,
        }
    }
}

/// Reply shape (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize, Default)]
enum ReplyDef {
    #[default]
    NoReply,
    Boolean,
    Numeric,
    Text,
}

impl From<ReplyDef> for ReplyShape {
    fn from(def: ReplyDef) -> Self {
        match def {
            ReplyDef::NoReply => ReplyShape::None,
            ReplyDef::Boolean => ReplyShape::Boolean,
            ReplyDef::Numeric => ReplyShape::Numeric,
            ReplyDef::Text => ReplyShape::Text,
        }
    }
}

/// Extension operation (RON format)
#[derive(Debug, Clone, serde::Deserialize)]
struct ExtensionDef {
    name: String,
    opcode: u8,
    #[serde(default)]
    reply: ReplyDef,
    #[serde(default)]
    args: Vec<ArgDef>,
    #[serde(default)]
    description: String,
}

/// Board definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct BoardDef {
    id: String,
    name: String,
    identities: Vec<String>,
    #[serde(default)]
    serial: SerialDef,
    toolchain: ToolchainDef,
    digital_pins: Vec<(String, String)>,
    #[serde(default)]
    analog_pins: Vec<(String, String)>,
    /// Restricts PWM to these digital pins; all digital pins when absent
    #[serde(default)]
    pwm_pins: Option<Vec<String>>,
    #[serde(default = "default_adc_bits")]
    adc_bits: u8,
    #[serde(default = "default_memory_size")]
    memory_size: u16,
    #[serde(default = "default_servo_max_angle")]
    servo_max_angle: u8,
    #[serde(default)]
    extensions: Vec<ExtensionDef>,
}

fn default_adc_bits() -> u8 {
    10
}

fn default_memory_size() -> u16 {
    1024
}

fn default_servo_max_angle() -> u8 {
    180
}

impl BoardDef {
    fn into_profile(self) -> Result<BoardProfile, ConfigError> {
        let mut pins = PinSpec::new();
        for (name, id) in &self.digital_pins {
            let pwm = match &self.pwm_pins {
                Some(list) => list.iter().any(|p| p == name),
                None => true,
            };
            let mut caps = PinCaps::DIGITAL | PinCaps::SERVO;
            if pwm {
                caps |= PinCaps::PWM;
            }
            pins.add(name, id, caps)?;
        }
        for (name, id) in &self.analog_pins {
            pins.add(name, id, PinCaps::ANALOG)?;
        }

        let profile = BoardProfile {
            id: self.id,
            name: self.name,
            identities: self.identities,
            serial: SerialParams {
                baud_rate: self.serial.baud_rate,
                data_bits: self.serial.data_bits,
                stop_bits: self.serial.stop_bits,
            },
            toolchain: ToolchainTarget {
                board_type: match self.toolchain.board_type {
                    BoardTypeDef::Arduino => BoardType::Arduino,
                },
                fqbn: self.toolchain.fqbn,
                upload_speed: self.toolchain.upload_speed,
            },
            pins,
            adc_bits: self.adc_bits,
            memory_size: self.memory_size,
            servo_max_angle: self.servo_max_angle,
            extensions: self
                .extensions
                .into_iter()
                .map(|e| ExtensionOp {
                    name: e.name,
                    opcode: e.opcode,
                    reply: e.reply.into(),
                    args: e.args.into_iter().map(Into::into).collect(),
                    description: e.description,
                })
                .collect(),
        };
        profile.validate()?;
        Ok(profile)
    }
}

// ============================================================================
// Profile database
// ============================================================================

/// Runtime profile database
///
/// Registering a profile whose id is already present replaces the earlier
/// one, so local files can override builtin boards.
#[derive(Debug, Clone, Default)]
pub struct ProfileDatabase {
    profiles: Vec<BoardProfile>,
}

impl ProfileDatabase {
    /// Create an empty profile database
    pub fn new() -> Self {
        Self {
            profiles: Vec::new(),
        }
    }

    /// Create a database holding the builtin profiles
    pub fn builtin() -> Result<Self, ProfileDbError> {
        let mut db = Self::new();
        for (origin, content) in BUILTIN_PROFILES {
            db.load_ron(content, origin)?;
        }
        Ok(db)
    }

    /// Load a profile from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<&BoardProfile, ProfileDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content, &path.display().to_string())
    }

    /// Load a profile from a RON string
    pub fn load_ron(&mut self, content: &str, origin: &str) -> Result<&BoardProfile, ProfileDbError> {
        let def: BoardDef = ron::from_str(content).map_err(|error| ProfileDbError::Parse {
            origin: origin.into(),
            error,
        })?;
        let profile = def.into_profile().map_err(|error| ProfileDbError::Invalid {
            origin: origin.into(),
            error,
        })?;
        Ok(self.add(profile))
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ProfileDbError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                self.load_file(&path)?;
                total += 1;
            }
        }

        Ok(total)
    }

    /// Register a profile, replacing any profile with the same id
    pub fn add(&mut self, profile: BoardProfile) -> &BoardProfile {
        let idx = match self.profiles.iter().position(|p| p.id == profile.id) {
            Some(idx) => {
                log::debug!("Replacing board profile '{}'", profile.id);
                self.profiles[idx] = profile;
                idx
            }
            None => {
                self.profiles.push(profile);
                self.profiles.len() - 1
            }
        };
        &self.profiles[idx]
    }

    /// Find a profile by id
    pub fn get(&self, id: &str) -> Option<&BoardProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Get the number of profiles in the database
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Iterate over all profiles
    pub fn iter(&self) -> impl Iterator<Item = &BoardProfile> {
        self.profiles.iter()
    }
}
