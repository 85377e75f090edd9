//! Privilege and platform guard.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::PrecheckFailure;
use crate::settings::FALLBACK_SUITE;

/// Distribution IDs that use APT and `.deb` packages.
const DEBIAN_FAMILY: &[&str] = &[
    "debian", "ubuntu", "raspbian", "linuxmint", "pop", "elementary", "zorin", "kali",
    "parrot", "devuan", "deepin", "mx", "pureos", "tails",
];

/// The fields of `/etc/os-release` the installer cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub pretty_name: Option<String>,
    pub version_codename: Option<String>,
    pub ubuntu_codename: Option<String>,
    pub debian_codename: Option<String>,
}

impl OsRelease {
    pub fn parse(content: &str) -> Self {
        let fields: HashMap<&str, String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), unquote(value.trim())))
            .collect();

        let non_empty = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();

        OsRelease {
            id: non_empty("ID").unwrap_or_else(|| "linux".to_string()).to_lowercase(),
            id_like: fields
                .get("ID_LIKE")
                .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
                .unwrap_or_default(),
            pretty_name: non_empty("PRETTY_NAME"),
            version_codename: non_empty("VERSION_CODENAME"),
            ubuntu_codename: non_empty("UBUNTU_CODENAME"),
            debian_codename: non_empty("DEBIAN_CODENAME"),
        }
    }

    pub fn read(path: &Path) -> Result<Self, PrecheckFailure> {
        let content = fs::read_to_string(path).map_err(|source| PrecheckFailure::OsReleaseUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn display_name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_debian_family(&self) -> bool {
        std::iter::once(&self.id)
            .chain(self.id_like.iter())
            .any(|id| DEBIAN_FAMILY.contains(&id.as_str()))
    }

    /// The Tor Project repository suite matching this release.
    pub fn suite(&self) -> String {
        if let Some(codename) = self.ubuntu_codename.as_ref().or(self.debian_codename.as_ref()) {
            return codename.clone();
        }
        if matches!(self.id.as_str(), "debian" | "ubuntu" | "raspbian") {
            if let Some(codename) = &self.version_codename {
                return codename.clone();
            }
        }
        warn!(
            "No usable release codename for {}, falling back to {}",
            self.display_name(),
            FALLBACK_SUITE
        );
        FALLBACK_SUITE.to_string()
    }
}

fn unquote(value: &str) -> String {
    value.trim_matches(|c: char| c == '"' || c == '\'').to_string()
}

/// The host we are about to modify, checked once.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub os: OsRelease,
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Refuse to run unless we are root on a Debian-family system.
///
/// Nothing is modified here, so a failure leaves the host exactly as it was.
pub fn check(is_root: bool, os_release: &Path) -> Result<PlatformInfo, PrecheckFailure> {
    if !is_root {
        return Err(PrecheckFailure::NotRoot);
    }

    let os = OsRelease::read(os_release)?;
    if !os.is_debian_family() {
        return Err(PrecheckFailure::UnsupportedOs(os.display_name().to_string()));
    }

    info!("Platform check passed: {} (id={}, like={:?})", os.display_name(), os.id, os.id_like);
    Ok(PlatformInfo { os })
}
