use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageSource {
    Debian,
    Flatpak,
}

impl PackageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Flatpak => "flatpak",
        }
    }

    /// Prefix used for `PackageRecord::id`.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Debian => "deb",
            Self::Flatpak => "flatpak",
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageSource {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debian" | "deb" | "apt" => Ok(Self::Debian),
            "flatpak" | "flathub" => Ok(Self::Flatpak),
            other => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("unknown package source '{other}'"),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PackageAction {
    Search,
    Details,
    InstalledState,
    ListSections,
    ListSection,
    Install,
    Remove,
    IndexBuild,
    CachePersist,
}
