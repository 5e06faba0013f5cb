//! Access modes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ScriptoriumError;

/// Access-control level governing which tools may execute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Read-only.
    Chat,
    /// Read and write.
    Agent,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Chat, Mode::Agent];

    /// Parse one of the two accepted literals (`chat`, `agent`).
    pub fn parse(raw: &str) -> Result<Self, ScriptoriumError> {
        Mode::from_str(raw).map_err(|_| {
            ScriptoriumError::InvalidMode(format!(
                "expected \"chat\" or \"agent\", got {raw:?}"
            ))
        })
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Mode::Agent)
    }
}
