//! The installer stages, run in order by [`Installer::run`].

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use colored::*;
use log::{debug, error, info, warn};

use crate::error::{CleanupWarning, InstallError};
use crate::proxychains::{self, ConfigOutcome};
use crate::settings::Settings;
use crate::system::{command_line, CommandOutput, CommandRunner};

const PGP_KEY_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// Source of the armored repository signing key.
pub trait KeyFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

/// Downloads the key over HTTPS.
pub struct HttpKeyFetcher {
    client: reqwest::Client,
}

impl HttpKeyFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        debug!("Fetching signing key from {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

pub struct Installer<R, F> {
    settings: Settings,
    suite: String,
    runner: R,
    fetcher: F,
}

impl<R: CommandRunner, F: KeyFetcher> Installer<R, F> {
    pub fn new(settings: Settings, suite: String, runner: R, fetcher: F) -> Self {
        Self {
            settings,
            suite,
            runner,
            fetcher,
        }
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Cleanup, repository, packages, configuration.
    ///
    /// Stops at the first fatal stage; cleanup problems are only reported.
    pub async fn run(&mut self) -> Result<ConfigOutcome, InstallError> {
        println!("{}", "\n[Step 1] Cleaning up old Tor and ProxyChains installations...".cyan().bold());
        let warnings = self.cleanup();
        if warnings.is_empty() {
            println!("{}", "Cleanup complete.".green());
        } else {
            println!("{}", format!("Cleanup finished with {} warning(s).", warnings.len()).yellow());
        }

        println!("{}", "\n[Step 2] Adding the Tor Project repository...".cyan().bold());
        self.setup_repository().await?;
        println!("{}", "Repository ready.".green());

        println!("{}", "\n[Step 3] Installing Tor and ProxyChains...".cyan().bold());
        self.install_packages()?;
        println!("{}", "Packages installed.".green());

        println!("{}", "\n[Step 4] Configuring ProxyChains...".cyan().bold());
        let outcome = self.configure()?;

        if self.settings.start_service {
            println!("{}", "\n[Step 5] Starting the Tor service...".cyan().bold());
            self.start_service()?;
        }

        Ok(outcome)
    }

    /// Remove whatever an earlier install left behind. Never fails.
    pub fn cleanup(&mut self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        let service = self.settings.service.clone();

        self.tolerate("systemctl", &["stop", service.as_str()], &mut warnings);
        self.tolerate("systemctl", &["disable", service.as_str()], &mut warnings);

        let packages = self.settings.purge_packages.clone();
        for package in &packages {
            // one at a time so an unknown package name does not block the rest
            self.tolerate("apt-get", &["purge", "-y", package.as_str()], &mut warnings);
        }
        self.tolerate("apt-get", &["autoremove", "-y"], &mut warnings);

        for file in [self.settings.sources_list.clone(), self.settings.keyring.clone()] {
            if let Err(e) = remove_path(&file) {
                warnings.push(CleanupWarning {
                    action: format!("remove {}", file.display()),
                    detail: e.to_string(),
                });
            }
        }
        for dir in self.settings.leftover_dirs.clone() {
            if let Err(e) = remove_path(&dir) {
                warnings.push(CleanupWarning {
                    action: format!("remove {}", dir.display()),
                    detail: e.to_string(),
                });
            }
        }

        for warning in &warnings {
            warn!("Cleanup: {}", warning);
            println!("{}", format!("  ! {}", warning).yellow());
        }
        info!("Cleanup finished with {} warnings", warnings.len());
        warnings
    }

    /// Trust the Tor Project key, add its source entry and refresh the index.
    pub async fn setup_repository(&mut self) -> Result<(), InstallError> {
        println!("-> Downloading the Tor Project signing key...");
        let armored = self
            .fetcher
            .fetch(&self.settings.key_url)
            .await
            .map_err(|e| InstallError::Repository(format!("could not fetch {}: {:#}", self.settings.key_url, e)))?;
        if !armored.trim_start().starts_with(PGP_KEY_HEADER) {
            return Err(InstallError::Repository(format!(
                "{} did not return a PGP public key block",
                self.settings.key_url
            )));
        }

        let dearmored = self
            .exec("gpg", &["--dearmor"], Some(armored.as_bytes()))
            .map_err(InstallError::Repository)?;
        if dearmored.stdout.is_empty() {
            return Err(InstallError::Repository("gpg --dearmor produced no output".to_string()));
        }

        let keyring = self.settings.keyring.clone();
        write_file(&keyring, &dearmored.stdout, 0o644)
            .map_err(|e| InstallError::Repository(format!("could not write {}: {}", keyring.display(), e)))?;
        info!("Installed signing key at {}", keyring.display());

        println!("-> Adding the Tor repository for suite '{}'...", self.suite);
        let entry = self.settings.source_entry(&self.suite);
        let sources = self.settings.sources_list.clone();
        proxychains::write_atomic(&sources, &entry, 0o644)
            .map_err(|e| InstallError::Repository(format!("could not write {}: {}", sources.display(), e)))?;
        info!("Wrote {}: {}", sources.display(), entry.trim());

        println!("-> Refreshing package lists...");
        self.exec("apt-get", &["update"], None).map_err(InstallError::Repository)?;
        Ok(())
    }

    pub fn install_packages(&mut self) -> Result<(), InstallError> {
        let mut args = vec![
            "install",
            "-y",
            "-o",
            "Dpkg::Options::=--force-confdef",
            "-o",
            "Dpkg::Options::=--force-confnew",
        ];
        let packages = self.settings.install_packages.clone();
        args.extend(packages.iter().map(String::as_str));
        self.exec("apt-get", &args, None).map_err(InstallError::Install)?;
        info!("Installed packages: {}", packages.join(", "));
        Ok(())
    }

    pub fn configure(&mut self) -> Result<ConfigOutcome, InstallError> {
        let outcome = proxychains::configure(&self.settings.proxychains_conf, self.settings.socks)?;
        report_config_outcome(&self.settings.proxychains_conf, &outcome);
        Ok(outcome)
    }

    /// Enable and start the service, then wait for its SOCKS port.
    pub fn start_service(&mut self) -> Result<(), InstallError> {
        let service = self.settings.service.clone();
        self.exec("systemctl", &["enable", "--now", service.as_str()], None)
            .map_err(InstallError::Service)?;

        println!("-> Waiting for Tor to open {}...", self.settings.socks);
        if wait_for_port(self.settings.socks, self.settings.socks_wait) {
            println!("{}", format!("Tor SOCKS proxy is listening on {}", self.settings.socks).green());
        } else {
            warn!("{} did not open within {:?}", self.settings.socks, self.settings.socks_wait);
            println!(
                "{}",
                format!("Tor is running but {} is not accepting connections yet", self.settings.socks).yellow()
            );
        }
        Ok(())
    }

    /// Run a command that has to succeed; the error carries its stderr verbatim.
    fn exec(&mut self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput, String> {
        let line = command_line(program, args);
        println!("{}", format!("-> Running: {}", line).dimmed());
        info!("Running: {}", line);

        match self.runner.run(program, args, stdin) {
            Ok(output) if output.success => {
                debug!("{} succeeded", line);
                Ok(output)
            }
            Ok(output) => {
                let detail = output.describe();
                error!("{} failed: {}", line, detail);
                Err(format!("'{}' failed with {}", line, detail))
            }
            Err(e) => {
                error!("Could not run {}: {}", line, e);
                Err(format!("could not run '{}': {}", line, e))
            }
        }
    }

    /// Run a command whose failure only merits a warning.
    fn tolerate(&mut self, program: &str, args: &[&str], warnings: &mut Vec<CleanupWarning>) {
        if let Err(detail) = self.exec(program, args, None) {
            warnings.push(CleanupWarning {
                action: command_line(program, args),
                detail,
            });
        }
    }
}

pub fn report_config_outcome(path: &Path, outcome: &ConfigOutcome) {
    match outcome {
        ConfigOutcome::Created => {
            println!("{}", format!("Created {} routing through Tor.", path.display()).green())
        }
        ConfigOutcome::Updated { backup, disabled } => {
            println!("-> Backed up the previous configuration to {}", backup.display());
            if *disabled > 0 {
                println!("-> Disabled {} other proxy entr{}", disabled, if *disabled == 1 { "y" } else { "ies" });
            }
            println!("{}", format!("{} now routes through Tor.", path.display()).green());
        }
        ConfigOutcome::Unchanged => {
            println!("{}", format!("{} already routes through Tor.", path.display()).green())
        }
    }
}

/// Delete a file or directory tree; a missing path is not an error.
fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            info!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist, nothing to remove", path.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn write_file(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub fn wait_for_port(addr: std::net::SocketAddrV4, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if std::net::TcpStream::connect_timeout(&addr.into(), Duration::from_secs(1)).is_ok() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}
