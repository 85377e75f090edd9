use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Tor's default SOCKS port.
pub const TOR_SOCKS_PORT: u16 = 9050;

/// Fingerprint of the key the Tor Project signs its Debian packages with.
pub const TOR_KEY_FINGERPRINT: &str = "A3C4F0F979CAA22CDBA8F512EE8CBC9E886DDD89";

/// Suite used when the OS release metadata does not name one we can use.
pub const FALLBACK_SUITE: &str = "bookworm";

/// Everything the installer touches, in one place.
#[derive(Debug, Clone)]
pub struct Settings {
    pub proxychains_conf: PathBuf,
    pub sources_list: PathBuf,
    pub keyring: PathBuf,
    pub os_release: PathBuf,
    pub key_url: String,
    pub repo_url: String,
    pub install_packages: Vec<String>,
    pub purge_packages: Vec<String>,
    /// Directories left behind by earlier Tor/ProxyChains installs.
    pub leftover_dirs: Vec<PathBuf>,
    pub service: String,
    pub socks: SocketAddrV4,
    /// Overrides the suite derived from the OS release file.
    pub suite: Option<String>,
    /// Start the service once everything is configured.
    pub start_service: bool,
    /// How long to wait for the SOCKS port after starting the service.
    pub socks_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxychains_conf: PathBuf::from("/etc/proxychains4.conf"),
            sources_list: PathBuf::from("/etc/apt/sources.list.d/torproject.list"),
            keyring: PathBuf::from("/usr/share/keyrings/tor-archive-keyring.gpg"),
            os_release: PathBuf::from("/etc/os-release"),
            key_url: format!(
                "https://deb.torproject.org/torproject.org/{}.asc",
                TOR_KEY_FINGERPRINT
            ),
            repo_url: "https://deb.torproject.org/torproject.org".to_string(),
            install_packages: vec!["tor".to_string(), "proxychains4".to_string()],
            purge_packages: ["tor", "torbrowser-launcher", "proxychains4", "proxychains"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            leftover_dirs: ["/etc/tor", "/var/lib/tor", "/var/log/tor", "/root/.proxychains"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            service: "tor".to_string(),
            socks: SocketAddrV4::new(Ipv4Addr::LOCALHOST, TOR_SOCKS_PORT),
            suite: None,
            start_service: false,
            socks_wait: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// The APT source entry for the Tor Project repository.
    pub fn source_entry(&self, suite: &str) -> String {
        format!(
            "deb [signed-by={}] {} {} main\n",
            self.keyring.display(),
            self.repo_url,
            suite
        )
    }

    /// Proxy URL that also resolves hostnames through Tor.
    pub fn socks_proxy_url(&self) -> String {
        format!("socks5h://{}", self.socks)
    }
}
