//! Target platform identification
//!
//! A platform is an os/arch pair (e.g. `linux/amd64`). It tags every cache
//! entry and mount cache slot so builds for different architectures never
//! share outputs.

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A build target platform, written as `os/arch`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    /// Operating system (e.g. "linux")
    pub os: String,
    /// CPU architecture (e.g. "amd64", "arm64")
    pub arch: String,
}

impl Platform {
    /// Create a platform from os and arch components
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Filesystem- and key-safe form (`os-arch`), used to namespace the store
    pub fn slug(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// The platform this process is running on, in os/arch naming
    pub fn host() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self::new(std::env::consts::OS, arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = StrataError;

    fn from_str(s: &str) -> StrataResult<Self> {
        let mut parts = s.splitn(2, '/');
        let os = parts.next().unwrap_or_default();
        let arch = parts.next().unwrap_or_default();
        if os.is_empty() || arch.is_empty() || arch.contains('/') {
            return Err(StrataError::InvalidPlatform(s.to_string()));
        }
        Ok(Self::new(os, arch))
    }
}

impl TryFrom<String> for Platform {
    type Error = StrataError;

    fn try_from(s: String) -> StrataResult<Self> {
        s.parse()
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> String {
        p.to_string()
    }
}
