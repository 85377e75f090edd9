use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use colored::*;
use env_logger::Builder;
use log::{error, info};

mod error;
mod installer;
mod platform;
mod proxychains;
mod report;
mod settings;
mod system;
mod verify;

use error::InstallError;
use installer::{HttpKeyFetcher, Installer};
use settings::Settings;
use system::SystemRunner;

/// Where log records end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogSink {
    /// `toxy.log` in the working directory, only once the guard has passed.
    File,
    /// stderr, warnings and up unless `TOXY_LOG` says otherwise.
    Stderr,
}

// Log records go to a file so they never interleave with operator output.
fn init_logger(sink: LogSink) {
    use env_logger::{Target, WriteStyle};
    use std::fs::OpenOptions;

    let (target, level) = match sink {
        LogSink::File => match OpenOptions::new().create(true).append(true).open("toxy.log") {
            Ok(file) => (Target::Pipe(Box::new(file)), log::LevelFilter::Info),
            Err(_) => (Target::Stderr, log::LevelFilter::Warn),
        },
        LogSink::Stderr => (Target::Stderr, log::LevelFilter::Warn),
    };

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_env("TOXY_LOG")
        .target(target)
        .write_style(WriteStyle::Never);

    builder.init();
    info!("Logger initialized for toxy");
}

#[derive(Parser)]
#[command(name = "toxy", version)]
#[command(about = "Install Tor and route applications through it with ProxyChains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Purge old installs, add the Tor repository, install and configure (default)
    Install(InstallArgs),
    /// Point the ProxyChains configuration at Tor's SOCKS proxy
    Configure {
        #[arg(long, value_name = "PATH")]
        proxychains_conf: Option<PathBuf>,
    },
    /// Print service management and usage instructions
    Instructions,
    /// Show what is installed and which proxies ProxyChains uses
    Status {
        #[arg(long, value_name = "PATH")]
        proxychains_conf: Option<PathBuf>,
    },
    /// Check that traffic through the SOCKS proxy leaves via Tor
    Verify,
}

#[derive(Args, Debug, Default)]
struct InstallArgs {
    /// Do not wait for confirmation before changing the system
    #[arg(short, long)]
    yes: bool,
    /// Enable and start the tor service once everything is configured
    #[arg(long)]
    start: bool,
    /// Tor repository suite such as bookworm or jammy (detected by default)
    #[arg(long)]
    suite: Option<String>,
    /// ProxyChains configuration to rewrite
    #[arg(long, value_name = "PATH")]
    proxychains_conf: Option<PathBuf>,
    /// OS release file used for the platform check
    #[arg(long, value_name = "PATH")]
    os_release: Option<PathBuf>,
}

impl InstallArgs {
    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        if let Some(path) = &self.proxychains_conf {
            settings.proxychains_conf = path.clone();
        }
        if let Some(path) = &self.os_release {
            settings.os_release = path.clone();
        }
        settings.suite = self.suite.clone();
        settings.start_service = self.start;
        settings
    }
}

fn settings_with_conf(proxychains_conf: &Option<PathBuf>) -> Settings {
    let mut settings = Settings::default();
    if let Some(path) = proxychains_conf {
        settings.proxychains_conf = path.clone();
    }
    settings
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // install opens its log file itself, after the guard
    let command = cli.command.unwrap_or_else(|| Commands::Install(InstallArgs::default()));
    if !matches!(command, Commands::Install(_)) {
        init_logger(LogSink::Stderr);
        info!("Starting toxy: {:?}", command);
    }

    match command {
        Commands::Install(args) => install(&args).await.context("install failed")?,
        Commands::Configure { proxychains_conf } => {
            let settings = settings_with_conf(&proxychains_conf);
            let outcome = proxychains::configure(&settings.proxychains_conf, settings.socks)
                .context("could not configure ProxyChains")?;
            installer::report_config_outcome(&settings.proxychains_conf, &outcome);
        }
        Commands::Instructions => println!("{}", report::instructions(&Settings::default())),
        Commands::Status { proxychains_conf } => {
            verify::print_status(&settings_with_conf(&proxychains_conf), &mut SystemRunner);
        }
        Commands::Verify => {
            verify::verify(&Settings::default()).await.context("Tor is not working")?;
        }
    }

    info!("toxy completed successfully");
    Ok(())
}

async fn install(args: &InstallArgs) -> Result<(), InstallError> {
    let settings = args.settings();
    print_banner();

    // nothing, not even the log file, is touched until the guard passes
    let platform = platform::check(platform::is_root(), &settings.os_release).inspect_err(|e| {
        println!("{}", format!("[ERROR] {}", e).red());
    })?;
    init_logger(LogSink::File);
    info!("Starting toxy install: {:?}", args);
    println!("{}", format!("Detected {}", platform.os.display_name()).magenta());

    println!("\nThis will perform the following steps:");
    println!("1. Remove any existing Tor and ProxyChains installation.");
    println!("2. Add the Tor Project package repository.");
    println!("3. Install the latest Tor and ProxyChains packages.");
    println!("4. Configure ProxyChains to route traffic through Tor.");
    if settings.start_service {
        println!("5. Enable and start the Tor service.");
    }

    if !args.yes {
        confirm()?;
    }

    let suite = settings.suite.clone().unwrap_or_else(|| platform.os.suite());
    info!("Using Tor repository suite {}", suite);

    let fetcher = HttpKeyFetcher::new().map_err(|e| InstallError::Repository(format!("{:#}", e)))?;
    let mut installer = Installer::new(settings.clone(), suite, SystemRunner, fetcher);
    installer.run().await.inspect_err(|e| {
        error!("Install aborted: {}", e);
        println!("{}", format!("\n[ERROR] {}", e).red());
    })?;

    report::print_instructions(&settings);
    println!("Thanks for using toxy!");
    Ok(())
}

fn print_banner() {
    println!("{}", "=".repeat(50).green());
    println!("{}", "      toxy - Tor + ProxyChains installer".green().bold());
    println!("{}", "=".repeat(50).green());
    println!("[{}]", get_system_info().magenta());
}

fn get_system_info() -> String {
    use sysinfo::System;

    let os_name = System::long_os_version().unwrap_or_else(|| "Unknown".to_string());
    let host_name = System::host_name().unwrap_or_else(|| "Unknown".to_string());
    let kernel_version = System::kernel_version().unwrap_or_else(|| "Unknown".to_string());

    format!("OS: {}, Host: {}, Kernel: {}", os_name, host_name, kernel_version)
}

fn confirm() -> Result<(), InstallError> {
    print!("{}", "\nPress Enter to continue (Ctrl+C to cancel)... ".cyan());
    let _ = io::stdout().flush();

    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) => Err(InstallError::Aborted("no confirmation on stdin (pass --yes for unattended runs)")),
        Ok(_) => Ok(()),
        Err(_) => Err(InstallError::Aborted("could not read confirmation from stdin")),
    }
}
