//! Read-only checks: `toxy status` and `toxy verify`.

use std::fs;
use std::io::{self, Write};
use std::net::TcpStream;
use std::time::Duration;

use colored::*;
use log::{debug, info, warn};

use crate::error::InstallError;
use crate::proxychains::{self, ProxyEntry};
use crate::settings::Settings;
use crate::system::{self, CommandRunner};

const TOR_CHECK_URL: &str = "https://check.torproject.org/api/ip";

/// What `check.torproject.org` thinks of our exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorCheck {
    pub is_tor: bool,
    pub ip: Option<String>,
}

impl TorCheck {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, InstallError> {
        let is_tor = value
            .get("IsTor")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| InstallError::Verify(format!("unexpected response from {}: {}", TOR_CHECK_URL, value)))?;
        let ip = value.get("IP").and_then(|v| v.as_str()).map(|s| s.to_string());
        Ok(TorCheck { is_tor, ip })
    }
}

pub fn print_status(settings: &Settings, runner: &mut impl CommandRunner) {
    info!("Checking Tor and ProxyChains status");
    println!("{}", "\nTor / ProxyChains Status:".cyan().bold());

    for binary in ["tor", "proxychains4"] {
        if system::is_installed(runner, binary) {
            println!("{}", format!("  {}: installed", binary).green());
        } else {
            println!("{}", format!("  {}: not installed", binary).red());
        }
    }

    if system::is_service_active(runner, &settings.service) {
        println!("{}", format!("  {} service: running", settings.service).green());
    } else {
        println!("{}", format!("  {} service: not running", settings.service).yellow());
    }

    let path = &settings.proxychains_conf;
    match fs::read_to_string(path) {
        Ok(content) => {
            let active = proxychains::active_proxies(&content);
            let tor = ProxyEntry::tor(settings.socks);
            if active == [tor] {
                println!("{}", format!("  {}: routes through Tor only", path.display()).green());
            } else if active.is_empty() {
                println!("{}", format!("  {}: no active proxies", path.display()).yellow());
            } else {
                println!("{}", format!("  {}: active proxies:", path.display()).yellow());
                for entry in active {
                    println!("    {}", entry);
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            println!("{}", format!("  {}: not found", path.display()).red());
        }
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            println!("{}", format!("  {}: unreadable ({})", path.display(), e).red());
        }
    }
}

/// Make sure the SOCKS port is open and traffic through it exits via Tor.
pub async fn verify(settings: &Settings) -> Result<TorCheck, InstallError> {
    print!("{}", format!("Checking Tor SOCKS proxy at {}... ", settings.socks).cyan());
    let _ = io::stdout().flush();
    if TcpStream::connect_timeout(&settings.socks.into(), Duration::from_secs(3)).is_err() {
        println!("{}", "✗".red());
        return Err(InstallError::Verify(format!(
            "nothing is listening on {} (is the {} service running?)",
            settings.socks, settings.service
        )));
    }
    println!("{}", "✓".green());

    print!("{}", "Asking check.torproject.org where we come from... ".cyan());
    let _ = io::stdout().flush();
    let check = query_tor_check(settings).await.map_err(|e| {
        println!("{}", "✗".red());
        InstallError::Verify(format!("{:#}", e))
    })?;

    if check.is_tor {
        println!("{}", "✓".green());
        println!(
            "{}",
            format!("Traffic exits through Tor ({}).", check.ip.as_deref().unwrap_or("unknown IP")).green()
        );
        Ok(check)
    } else {
        println!("{}", "✗".red());
        Err(InstallError::Verify(format!(
            "request left from {} which is not a Tor exit",
            check.ip.as_deref().unwrap_or("an unknown address")
        )))
    }
}

async fn query_tor_check(settings: &Settings) -> anyhow::Result<TorCheck> {
    let proxy = reqwest::Proxy::all(settings.socks_proxy_url())?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(Duration::from_secs(60))
        .build()?;

    debug!("Querying {} through {}", TOR_CHECK_URL, settings.socks_proxy_url());
    let value = client
        .get(TOR_CHECK_URL)
        .send()
        .await?
        .error_for_status()?
        .json::<serde_json::Value>()
        .await?;
    Ok(TorCheck::from_json(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tor_exit_response() {
        let value = serde_json::json!({ "IsTor": true, "IP": "185.220.101.1" });
        let check = TorCheck::from_json(&value).unwrap();
        assert!(check.is_tor);
        assert_eq!(check.ip.as_deref(), Some("185.220.101.1"));
    }

    #[test]
    fn parses_direct_response() {
        let value = serde_json::json!({ "IsTor": false, "IP": "203.0.113.7" });
        assert!(!TorCheck::from_json(&value).unwrap().is_tor);
    }

    #[test]
    fn rejects_unexpected_response() {
        let value = serde_json::json!({ "error": "rate limited" });
        assert!(matches!(TorCheck::from_json(&value), Err(InstallError::Verify(_))));
    }
}
