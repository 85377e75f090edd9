//! Reading and rewriting the ProxyChains configuration.
//!
//! The config is a flat list of options followed by a `[ProxyList]` section
//! whose lines look like `type host port [user pass]`. After [`rewrite`] the
//! file has exactly one active entry, Tor's local SOCKS5 proxy, and every
//! other proxy line that was active, in any part of the file, is commented out
//! rather than deleted so the operator can restore it by hand.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddrV4;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::bail;
use log::{debug, info, warn};

use crate::error::InstallError;

const PROXY_LIST_HEADER: &str = "[ProxyList]";

/// Written when there is no config file at all.
const MINIMAL_CONFIG: &str = "strict_chain\nproxy_dns\ntcp_read_time_out 15000\ntcp_connect_time_out 8000\n\n[ProxyList]\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Socks4,
    Socks5,
    Http,
    Raw,
}

impl FromStr for ProxyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socks4" => Ok(ProxyKind::Socks4),
            "socks5" => Ok(ProxyKind::Socks5),
            "http" => Ok(ProxyKind::Http),
            "raw" => Ok(ProxyKind::Raw),
            other => bail!("unknown proxy type '{}'", other),
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Http => "http",
            ProxyKind::Raw => "raw",
        })
    }
}

/// One line of the `[ProxyList]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl ProxyEntry {
    /// Tor's SOCKS5 endpoint, without credentials.
    pub fn tor(socks: SocketAddrV4) -> Self {
        ProxyEntry {
            kind: ProxyKind::Socks5,
            host: socks.ip().to_string(),
            port: socks.port(),
            user: None,
            pass: None,
        }
    }
}

impl FromStr for ProxyEntry {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(kind), Some(host), Some(port)) = (fields.next(), fields.next(), fields.next()) else {
            bail!("expected 'type host port', got '{}'", line.trim());
        };
        let entry = ProxyEntry {
            kind: kind.parse()?,
            host: host.to_string(),
            port: port.parse()?,
            user: fields.next().map(str::to_string),
            pass: fields.next().map(str::to_string),
        };
        if fields.next().is_some() {
            bail!("trailing fields in '{}'", line.trim());
        }
        Ok(entry)
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.host, self.port)?;
        if let Some(user) = &self.user {
            write!(f, " {}", user)?;
        }
        if let Some(pass) = &self.pass {
            write!(f, " {}", pass)?;
        }
        Ok(())
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// proxychains finds its list with a substring match, so a trailing comment
/// after the header still counts.
fn is_list_header(line: &str) -> bool {
    !is_comment(line) && line.contains(PROXY_LIST_HEADER)
}

fn is_section_header(line: &str) -> bool {
    !is_comment(line) && line.trim_start().starts_with('[')
}

/// Whether an uncommented line is a proxy definition.
fn looks_like_proxy(line: &str) -> bool {
    !is_comment(line)
        && line
            .split_whitespace()
            .next()
            .is_some_and(|word| word.parse::<ProxyKind>().is_ok())
}

/// Every uncommented proxy entry in the file, in file order.
pub fn active_proxies(content: &str) -> Vec<ProxyEntry> {
    let mut entries = Vec::new();
    for line in content.lines().filter(|line| looks_like_proxy(line)) {
        match line.parse() {
            Ok(entry) => entries.push(entry),
            Err(e) => debug!("Ignoring malformed proxy line '{}': {}", line.trim(), e),
        }
    }
    entries
}

/// Where the first `[ProxyList]` section stands while scanning.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FirstList {
    NotSeen,
    Inside,
    Past,
}

/// Rewrite `content` so `target` is the only active proxy.
///
/// Proxy lines are commented out wherever they appear; the target goes at the
/// end of the first `[ProxyList]` section. Applying this to its own output
/// returns the same text.
pub fn rewrite(content: &str, target: &ProxyEntry) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut first = FirstList::NotSeen;
    // the target entry goes right after this line
    let mut insert_after: Option<usize> = None;

    for line in content.lines() {
        if is_list_header(line) || is_section_header(line) {
            lines.push(line.to_string());
            first = match first {
                FirstList::NotSeen if is_list_header(line) => {
                    insert_after = Some(lines.len() - 1);
                    FirstList::Inside
                }
                FirstList::Inside => FirstList::Past,
                other => other,
            };
            continue;
        }

        if looks_like_proxy(line) {
            if line.parse::<ProxyEntry>().is_ok_and(|entry| entry == *target) {
                continue;
            }
            lines.push(format!("# {}", line));
        } else {
            lines.push(line.to_string());
        }

        if first == FirstList::Inside && !line.trim().is_empty() {
            insert_after = Some(lines.len() - 1);
        }
    }

    let entry = target.to_string();
    match insert_after {
        Some(index) => lines.insert(index + 1, entry),
        None => {
            lines.push(String::new());
            lines.push(PROXY_LIST_HEADER.to_string());
            lines.push(entry);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// What [`configure`] did to the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOutcome {
    /// There was no config, a minimal one was written.
    Created,
    /// The file changed; its previous content is in `backup`.
    Updated { backup: PathBuf, disabled: usize },
    /// The file already routed through Tor only.
    Unchanged,
}

/// Make the config at `path` route everything through `socks`.
pub fn configure(path: &Path, socks: SocketAddrV4) -> Result<ConfigOutcome, InstallError> {
    let write_err = |source: io::Error| InstallError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };
    let target = ProxyEntry::tor(socks);

    let existing = match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(write_err(e)),
    };

    let Some(existing) = existing else {
        warn!("{} not found, writing a minimal configuration", path.display());
        write_atomic(path, &rewrite(MINIMAL_CONFIG, &target), 0o644).map_err(write_err)?;
        return Ok(ConfigOutcome::Created);
    };

    if !existing.lines().any(is_list_header) {
        warn!("No {} section in {}, appending one", PROXY_LIST_HEADER, path.display());
    }

    let updated = rewrite(&existing, &target);
    if updated == existing {
        info!("{} already points at {}", path.display(), target);
        return Ok(ConfigOutcome::Unchanged);
    }

    let disabled = active_proxies(&existing)
        .iter()
        .filter(|entry| **entry != target)
        .count();

    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(write_err)?;
    debug!("Backed up {} to {}", path.display(), backup.display());

    write_atomic(path, &updated, 0o644).map_err(write_err)?;
    info!("Rewrote {}: {} proxy entries disabled", path.display(), disabled);
    Ok(ConfigOutcome::Updated { backup, disabled })
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Replace `path` with `content` without ever leaving a half-written file.
pub fn write_atomic(path: &Path, content: &str, mode: u32) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn tor() -> ProxyEntry {
        ProxyEntry::tor(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9050))
    }

    // Tail of the proxychains4.conf Debian ships.
    const PACKAGED: &str = "strict_chain\nproxy_dns\n\n[ProxyList]\n# add proxy here ...\n# meanwile\n# defaults set to \"tor\"\nsocks4 \t127.0.0.1 9050\n";

    #[test]
    fn parses_entries_with_credentials() {
        let entry: ProxyEntry = "http  192.168.39.93 8080 justu hidden # office".parse().unwrap();
        assert_eq!(entry.kind, ProxyKind::Http);
        assert_eq!(entry.host, "192.168.39.93");
        assert_eq!(entry.port, 8080);
        assert_eq!(entry.user.as_deref(), Some("justu"));
        assert_eq!(entry.pass.as_deref(), Some("hidden"));
        assert_eq!(entry.to_string(), "http 192.168.39.93 8080 justu hidden");
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!("socks5 127.0.0.1".parse::<ProxyEntry>().is_err());
        assert!("socks5 127.0.0.1 nine".parse::<ProxyEntry>().is_err());
        assert!("ftp 127.0.0.1 21".parse::<ProxyEntry>().is_err());
    }

    #[test]
    fn packaged_config_gets_tor_socks5() {
        let out = rewrite(PACKAGED, &tor());
        assert_eq!(
            out,
            "strict_chain\nproxy_dns\n\n[ProxyList]\n# add proxy here ...\n# meanwile\n# defaults set to \"tor\"\n# socks4 \t127.0.0.1 9050\nsocks5 127.0.0.1 9050\n"
        );
        assert_eq!(active_proxies(&out), vec![tor()]);
    }

    #[test]
    fn foreign_socks4_is_commented_out() {
        let input = "dynamic_chain\n[ProxyList]\nsocks4 10.0.0.5 1080\n";
        let out = rewrite(input, &tor());
        assert!(out.contains("\n# socks4 10.0.0.5 1080\n"));
        assert!(out.lines().any(|l| l == "socks5 127.0.0.1 9050"));
        assert_eq!(active_proxies(&out), vec![tor()]);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let inputs = [
            PACKAGED,
            "",
            "strict_chain\n",
            "[ProxyList]\nsocks5 127.0.0.1 9050\nhttp 10.1.1.1 3128\n\n\n",
            "[ProxyList]\nsocks5  127.0.0.1   9050\nsocks5 127.0.0.1 9050\n[Other]\nkey value\n",
            "[ProxyList]\nsocks5 127.0.0.1 9050 user pass\nraw 10.0.0.1 80\n",
        ];
        for input in inputs {
            let once = rewrite(input, &tor());
            let twice = rewrite(&once, &tor());
            assert_eq!(once, twice, "input: {:?}", input);
            assert_eq!(active_proxies(&once), vec![tor()], "input: {:?}", input);
        }
    }

    #[test]
    fn duplicate_tor_entries_collapse_to_one() {
        let input = "[ProxyList]\nsocks5 127.0.0.1 9050\nsocks5\t127.0.0.1\t9050\n";
        let out = rewrite(input, &tor());
        assert_eq!(out, "[ProxyList]\nsocks5 127.0.0.1 9050\n");
    }

    #[test]
    fn missing_section_is_appended() {
        let out = rewrite("strict_chain\nproxy_dns\n", &tor());
        assert_eq!(out, "strict_chain\nproxy_dns\n\n[ProxyList]\nsocks5 127.0.0.1 9050\n");
    }

    #[test]
    fn entry_stays_in_first_list_section() {
        let input = "[ProxyList]\nhttp 10.0.0.1 8080\n\n[Other]\nsocks4 1.2.3.4 1080\n";
        let out = rewrite(input, &tor());
        assert_eq!(
            out,
            "[ProxyList]\n# http 10.0.0.1 8080\nsocks5 127.0.0.1 9050\n\n[Other]\n# socks4 1.2.3.4 1080\n"
        );
    }

    #[test]
    fn proxy_before_any_section_is_commented_out() {
        let out = rewrite("strict_chain\nsocks4 10.0.0.5 1080\n", &tor());
        assert_eq!(
            out,
            "strict_chain\n# socks4 10.0.0.5 1080\n\n[ProxyList]\nsocks5 127.0.0.1 9050\n"
        );
        assert_eq!(active_proxies(&out), vec![tor()]);
        assert_eq!(rewrite(&out, &tor()), out);
    }

    #[test]
    fn list_header_with_trailing_comment_is_reused() {
        let out = rewrite("[ProxyList] # mine\nsocks4 10.0.0.5 1080\n", &tor());
        assert_eq!(out, "[ProxyList] # mine\n# socks4 10.0.0.5 1080\nsocks5 127.0.0.1 9050\n");
        assert_eq!(out.matches(PROXY_LIST_HEADER).count(), 1);
        assert_eq!(active_proxies(&out), vec![tor()]);
        assert_eq!(rewrite(&out, &tor()), out);
    }

    #[test]
    fn commented_header_does_not_count() {
        let out = rewrite("# [ProxyList]\nsocks4 10.0.0.5 1080\n", &tor());
        assert_eq!(out, "# [ProxyList]\n# socks4 10.0.0.5 1080\n\n[ProxyList]\nsocks5 127.0.0.1 9050\n");
    }

    #[test]
    fn fresh_and_customised_configs_converge() {
        let fresh = rewrite(PACKAGED, &tor());
        let customised = rewrite(&rewrite(PACKAGED, &tor()), &tor());
        assert_eq!(fresh, customised);
    }

    #[test]
    fn configure_backs_up_then_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxychains4.conf");
        fs::write(&path, "[ProxyList]\nsocks4 10.0.0.5 1080\n").unwrap();
        let socks = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9050);

        let outcome = configure(&path, socks).unwrap();
        let backup = dir.path().join("proxychains4.conf.bak");
        assert_eq!(outcome, ConfigOutcome::Updated { backup: backup.clone(), disabled: 1 });
        assert_eq!(fs::read_to_string(&backup).unwrap(), "[ProxyList]\nsocks4 10.0.0.5 1080\n");

        let first = fs::read_to_string(&path).unwrap();
        assert_eq!(first, "[ProxyList]\n# socks4 10.0.0.5 1080\nsocks5 127.0.0.1 9050\n");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);

        assert_eq!(configure(&path, socks).unwrap(), ConfigOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn configure_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxychains4.conf");

        let outcome = configure(&path, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9050)).unwrap();
        assert_eq!(outcome, ConfigOutcome::Created);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("strict_chain\n"));
        assert_eq!(active_proxies(&content), vec![tor()]);
    }

    #[test]
    fn configure_reports_unwritable_directory() {
        let path = Path::new("/nonexistent-dir/proxychains4.conf");
        let err = configure(path, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9050)).unwrap_err();
        assert!(matches!(err, InstallError::ConfigWrite { .. }));
    }
}
