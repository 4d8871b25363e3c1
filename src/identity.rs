use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FacegateError, Result};

/// Independent identity namespaces, keyed by where the identity was enrolled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Enrolled through this server from averaged samples.
    Server,
    /// Enrolled on the capture device and uploaded as-is.
    Device,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Server, Partition::Device];

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Server => "server",
            Partition::Device => "device",
        }
    }

    pub fn snapshot_file(self) -> &'static str {
        match self {
            Partition::Server => "faces-server.bin",
            Partition::Device => "faces-device.bin",
        }
    }

    /// Canonical form of an identity name in this partition.
    ///
    /// Surrounding whitespace is stripped and blank names are rejected. The
    /// capture device names identities case-insensitively, so device names
    /// are also lowercased.
    pub fn canonical_name(self, raw: &str) -> Result<String> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(FacegateError::MissingIdentifier);
        }
        Ok(match self {
            Partition::Server => name.to_string(),
            Partition::Device => name.to_lowercase(),
        })
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Partition::Server),
            "device" | "esp32" => Ok(Partition::Device),
            other => Err(format!("unknown partition '{other}'")),
        }
    }
}
