use colored::*;

use crate::settings::Settings;

/// Operator instructions printed at the end of an install.
pub fn instructions(settings: &Settings) -> String {
    let unit = &settings.service;
    format!(
        r#"### How to Manage the Tor Service
The service is not started for you. These commands need administrative privileges.

- Start Tor:
  sudo systemctl start {unit}
- Start Tor on every boot:
  sudo systemctl enable --now {unit}
- Stop Tor:
  sudo systemctl stop {unit}
- Restart Tor (to get a new circuit):
  sudo systemctl restart {unit}
- Check Tor's status:
  sudo systemctl status {unit}

### How to Run Applications with ProxyChains
ProxyChains sends traffic to Tor's SOCKS5 proxy at {socks}.
Prefix any command with `proxychains4` to route it through Tor.

- Check your IP address:
  proxychains4 curl https://check.torproject.org/api/ip
- Run Firefox through Tor:
  proxychains4 firefox-esr
- Confirm the setup end to end:
  toxy verify
"#,
        unit = unit,
        socks = settings.socks,
    )
}

pub fn print_instructions(settings: &Settings) {
    println!("{}", "\nAll done! Tor and ProxyChains are installed and configured.".green().bold());
    println!();
    println!("{}", instructions(settings));
}
