//! A physics bridge.
//!
//! The simulation runs inside an [`EngineHost`] on its own thread. The
//! application talks to it only through a [`PhysicsHost`], which sends
//! commands and reconciles the report buffers that come back, one set per
//! step. Shared types and the report layout live in [`protocol`].

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod registry;
pub mod transport;

pub use config::BridgeConfig;
pub use engine::EngineHost;
pub use error::{BridgeError, Result};
pub use host::entity::{Entity, EntityKind, Lifecycle};
pub use host::{BridgeEvent, PhysicsHost};
pub use meshi_physx_protocol as protocol;
pub use registry::EntityRegistry;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a stdout subscriber that logs `level` and above.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_logging(level: Level) -> bool {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

/// Start a bridge from a JSON configuration file, installing logging at the
/// file's level first.
pub fn start_from_file(path: impl AsRef<std::path::Path>) -> Result<PhysicsHost> {
    let config = BridgeConfig::load(path)?;
    init_logging(config.level()?);
    PhysicsHost::with_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_logging_install_is_ignored() {
        init_logging(Level::DEBUG);
        assert!(!init_logging(Level::INFO));
    }
}
