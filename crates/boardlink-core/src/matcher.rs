//! USB device matching
//!
//! Identities and patterns are compared in the normalised form
//! `VID_xxxx&PID_xxxx` (uppercase hex). A pattern matches an identity when
//! both are equal, or when the pattern is a prefix of the identity ending on
//! a component boundary. `VID_2341` therefore matches every Arduino SA
//! product while `VID_2341&PID_00` matches nothing.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::profile::BoardProfile;

/// A serial endpoint visible to the operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Path used to open the endpoint (e.g. "/dev/ttyUSB0" or "COM3")
    pub path: String,
    /// Normalised USB identity, `None` for non-USB ports
    pub identity: Option<String>,
    /// Product description reported by the OS, if any
    pub description: Option<String>,
}

impl Endpoint {
    /// A USB endpoint with the given vendor and product id
    pub fn usb(path: &str, vid: u16, pid: u16) -> Self {
        Self {
            path: path.into(),
            identity: Some(format!("VID_{:04X}&PID_{:04X}", vid, pid)),
            description: None,
        }
    }

    /// An endpoint described by an identity string in any accepted form
    pub fn with_identity(path: &str, identity: &str) -> Self {
        Self {
            path: path.into(),
            identity: Some(normalize_identity(identity)),
            description: None,
        }
    }

    /// An endpoint without USB identity (built-in UART, Bluetooth, ...)
    pub fn other(path: &str) -> Self {
        Self {
            path: path.into(),
            identity: None,
            description: None,
        }
    }
}

/// Normalise an identity or pattern for comparison
///
/// Uppercases, trims and strips a leading `USB\` as found in Windows device
/// instance ids.
pub fn normalize_identity(s: &str) -> String {
    let upper = s.trim().to_ascii_uppercase();
    match upper.strip_prefix("USB\\") {
        Some(rest) => rest.into(),
        None => upper,
    }
}

/// Whether `identity` matches `pattern`
pub fn identity_matches(pattern: &str, identity: &str) -> bool {
    let pattern = normalize_identity(pattern);
    let identity = normalize_identity(identity);
    if pattern.is_empty() {
        return false;
    }
    match identity.strip_prefix(pattern.as_str()) {
        Some("") => true,
        Some(rest) => rest.starts_with('&') || rest.starts_with('\\'),
        None => false,
    }
}

/// Endpoints whose identity matches any of the profile's patterns
///
/// Enumeration order is preserved. No match gives an empty list.
pub fn match_endpoints<'a>(profile: &BoardProfile, endpoints: &'a [Endpoint]) -> Vec<&'a Endpoint> {
    endpoints
        .iter()
        .filter(|ep| match &ep.identity {
            Some(id) => profile.identities.iter().any(|p| identity_matches(p, id)),
            None => false,
        })
        .collect()
}

/// Profiles, out of `profiles`, that accept this endpoint
pub fn matching_profiles<'a, I>(profiles: I, endpoint: &Endpoint) -> Vec<&'a BoardProfile>
where
    I: IntoIterator<Item = &'a BoardProfile>,
{
    let Some(id) = &endpoint.identity else {
        return Vec::new();
    };
    profiles
        .into_iter()
        .filter(|p| p.identities.iter().any(|pat| identity_matches(pat, id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BoardType, PinSpec, SerialParams, ToolchainTarget};
    use alloc::vec;

    fn profile(patterns: &[&str]) -> BoardProfile {
        BoardProfile {
            id: "test".into(),
            name: "Test".into(),
            identities: patterns.iter().map(|p| String::from(*p)).collect(),
            serial: SerialParams::default(),
            toolchain: ToolchainTarget {
                board_type: BoardType::Arduino,
                fqbn: "arduino:avr:uno".into(),
                upload_speed: None,
            },
            pins: PinSpec::new(),
            adc_bits: 10,
            memory_size: 1024,
            servo_max_angle: 180,
            extensions: vec![],
        }
    }

    #[test]
    fn test_clone_bridge_does_not_match() {
        let uno = profile(&["VID_2341&PID_0043"]);
        let ports = [Endpoint::usb("/dev/ttyUSB0", 0x1A86, 0x7523)];
        assert!(match_endpoints(&uno, &ports).is_empty());
    }

    #[test]
    fn test_listed_clone_matches() {
        let board = profile(&["VID_2341&PID_0043", "VID_1A86&PID_7523"]);
        let ports = [
            Endpoint::usb("/dev/ttyACM0", 0x2341, 0x0043),
            Endpoint::other("/dev/ttyS0"),
            Endpoint::usb("/dev/ttyUSB0", 0x1A86, 0x7523),
            Endpoint::usb("/dev/ttyUSB1", 0x10C4, 0xEA60),
        ];
        let found: Vec<_> = match_endpoints(&board, &ports)
            .iter()
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(found, vec!["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[test]
    fn test_prefix_on_component_boundary() {
        assert!(identity_matches("VID_2341", "VID_2341&PID_0043"));
        assert!(identity_matches("usb\\vid_2341&pid_0043", "VID_2341&PID_0043"));
        assert!(!identity_matches("VID_2341&PID_00", "VID_2341&PID_0043"));
        assert!(!identity_matches("VID_234", "VID_2341&PID_0043"));
        assert!(!identity_matches("", "VID_2341&PID_0043"));
    }

    #[test]
    fn test_with_identity_normalises() {
        let ep = Endpoint::with_identity("COM3", "USB\\VID_1a86&PID_7523\\5&1A2B");
        assert_eq!(ep.identity.as_deref(), Some("VID_1A86&PID_7523\\5&1A2B"));
        assert!(identity_matches("VID_1A86&PID_7523", ep.identity.as_deref().unwrap()));
    }

    #[test]
    fn test_matching_profiles() {
        let a = profile(&["VID_2341&PID_0043"]);
        let b = profile(&["VID_1A86&PID_7523"]);
        let ep = Endpoint::usb("/dev/ttyUSB0", 0x1A86, 0x7523);
        let found = matching_profiles([&a, &b], &ep);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identities[0], "VID_1A86&PID_7523");
    }
}
