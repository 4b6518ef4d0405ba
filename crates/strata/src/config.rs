//! Runtime configuration with sensible defaults and JSON loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ecs::Eid;
use crate::error::{EcsError, Result};

/// Sizing and pacing knobs for a runtime.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config = RuntimeConfig::from_json(r#"{ "target_fps": 30 }"#)?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Lowest entity id handed out.
    pub eid_min: Eid,
    /// Highest entity id handed out (inclusive).
    pub eid_max: Eid,
    /// Initial slots per component column.
    pub initial_capacity: usize,
    /// Frame rate for [`FixedRateDriver`](crate::runtime::FixedRateDriver) (0 = unpaced).
    pub target_fps: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            eid_min: 0,
            eid_max: 100_000,
            initial_capacity: 1_000,
            target_fps: 60,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON document. The document must be an object.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(EcsError::InvalidConfig(
                "config must be a JSON object".to_string(),
            ));
        }
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(EcsError::InvalidConfig(format!(
                "reading {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eid_min > self.eid_max {
            return Err(EcsError::InvalidConfig(format!(
                "eid_min ({}) is greater than eid_max ({})",
                self.eid_min, self.eid_max
            )));
        }
        if self.initial_capacity == 0 {
            return Err(EcsError::InvalidConfig(
                "initial_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
