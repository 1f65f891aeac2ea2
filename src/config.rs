use std::fs;
use std::path::Path;
use std::str::FromStr;

use glam::Vec3;
use meshi_physx_protocol::report::HEADER_LEN;
use meshi_physx_protocol::WorldSettings;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{BridgeError, Result};

/// Bridge settings, loadable from JSON. Missing fields take their defaults.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub fixed_time_step: f32,
    pub gravity: [f32; 3],
    /// Report buffers grow in multiples of this many items.
    pub report_chunk_size: usize,
    /// Largest report buffer, in scalars. Unbounded when absent.
    pub max_report_scalars: Option<usize>,
    pub soft_bodies: bool,
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            fixed_time_step: 1.0 / 60.0,
            gravity: [0.0, -10.0, 0.0],
            report_chunk_size: 50,
            max_report_scalars: None,
            soft_bodies: true,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fixed_time_step > 0.0 && self.fixed_time_step.is_finite()) {
            return Err(BridgeError::Config(format!(
                "fixed_time_step must be positive, got {}",
                self.fixed_time_step
            )));
        }
        if self.report_chunk_size == 0 {
            return Err(BridgeError::Config(
                "report_chunk_size must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.max_report_scalars {
            if max < HEADER_LEN {
                return Err(BridgeError::Config(format!(
                    "max_report_scalars {} cannot hold a report header",
                    max
                )));
            }
        }
        self.level()?;
        Ok(())
    }

    pub fn level(&self) -> Result<Level> {
        Level::from_str(&self.log_level)
            .map_err(|_| BridgeError::Config(format!("unknown log level '{}'", self.log_level)))
    }

    pub fn world_settings(&self) -> WorldSettings {
        WorldSettings {
            gravity: Vec3::from_array(self.gravity),
            fixed_time_step: self.fixed_time_step,
            report_chunk_size: self.report_chunk_size,
            max_report_scalars: self.max_report_scalars,
            soft_bodies: self.soft_bodies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json_str(r#"{ "report_chunk_size": 8 }"#).unwrap();
        assert_eq!(config.report_chunk_size, 8);
        assert_eq!(config.gravity, [0.0, -10.0, 0.0]);
        assert_eq!(config.level().unwrap(), Level::INFO);
        assert_eq!(config.world_settings().report_chunk_size, 8);
    }

    #[test]
    fn rejects_nonsense() {
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{ "fixed_time_step": 0.0 }"#),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{ "log_level": "loud" }"#),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{ "max_report_scalars": 1 }"#),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json_str("{ not json"),
            Err(BridgeError::Json(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "gravity": [0.0, -9.8, 0.0], "soft_bodies": false, "log_level": "debug" }}"#
        )
        .unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.gravity[1], -9.8);
        assert!(!config.soft_bodies);
        assert_eq!(config.level().unwrap(), Level::DEBUG);

        let missing = file.path().with_extension("missing");
        assert!(matches!(BridgeConfig::load(missing), Err(BridgeError::Io(_))));
    }
}
