//! Backend registration and dispatch
//!
//! A backend pairs the serial endpoints a board is reached through with the
//! firmware pipeline that flashes it.

use std::sync::Arc;

use boardlink_core::profile::ProfileDatabase;
use boardlink_link::LinkConfig;
use boardlink_serial::{SerialBackend, SystemBackend};
use boardlink_toolchain::{ArduinoCli, FirmwarePipeline};

/// Information about a backend
pub struct BackendInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Backends enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    backends.push(BackendInfo {
        name: "serial",
        aliases: &["system"],
        description: "Serial ports of this machine, flashed with arduino-cli",
    });

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy",
        aliases: &["sim"],
        description: "One simulated board per profile, no hardware needed",
    });

    backends
}

/// Short list of backend names for help output
pub fn backend_names_short() -> String {
    let names: Vec<&str> = available_backends().iter().map(|b| b.name).collect();
    names.join(", ")
}

/// Canonical name of a backend
pub fn find_backend(name: &str) -> Option<&'static str> {
    available_backends()
        .into_iter()
        .find(|b| b.name == name || b.aliases.contains(&name))
        .map(|b| b.name)
}

/// Serial backend and firmware pipeline
pub type BackendPair = (Arc<dyn SerialBackend>, Arc<dyn FirmwarePipeline>);

/// Open a backend by name
#[allow(unused_variables)]
pub fn open_backend(
    name: &str,
    db: &ProfileDatabase,
    config: &LinkConfig,
) -> Result<BackendPair, Box<dyn std::error::Error>> {
    let canonical = find_backend(name).ok_or_else(|| {
        format!(
            "Unknown backend: {} [available: {}]",
            name,
            backend_names_short()
        )
    })?;

    match canonical {
        "serial" => Ok((
            Arc::new(SystemBackend::new()),
            Arc::new(ArduinoCli::new(config.toolchain.clone())),
        )),
        #[cfg(feature = "dummy")]
        "dummy" => Ok(open_dummy(db)),
        _ => Err(format!("Backend {} is not compiled in", canonical).into()),
    }
}

#[cfg(feature = "dummy")]
fn open_dummy(db: &ProfileDatabase) -> BackendPair {
    use boardlink_core::matcher::Endpoint;
    use boardlink_dummy::{DummyBackend, DummyDevice, DummyPipeline};

    let backend = DummyBackend::new();
    for profile in db.iter() {
        let Some(identity) = profile.identities.first() else {
            continue;
        };
        let path = format!("dummy:{}", profile.id);
        backend.add_device(
            Endpoint::with_identity(&path, identity),
            DummyDevice::new(profile),
        );
    }
    let pipeline = DummyPipeline::new(backend.clone());
    (Arc::new(backend), Arc::new(pipeline))
}
