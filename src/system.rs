//! Running external programs (apt-get, systemctl, gpg).

use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use log::debug;

/// What a finished command left behind.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Exit status and stderr, for error messages.
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}\n{}", status, stderr)
        }
    }
}

/// Something that can run a program to completion.
pub trait CommandRunner {
    fn run(&mut self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> io::Result<CommandOutput>;
}

/// Runs programs on the host with APT kept non-interactive.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> io::Result<CommandOutput> {
        debug!("Spawning {} {:?}", program, args);
        let mut child = Command::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // fed from its own thread so a child that writes before it has read
        // everything cannot block on a full stdout pipe
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                Some(thread::spawn(move || pipe.write_all(&input)))
            }
            _ => None,
        };

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // the child exited without reading everything; its status says why
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(io::Error::new(io::ErrorKind::Other, "stdin writer panicked")),
            }
        }
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Render a command line the way an operator would type it.
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_installed(runner: &mut impl CommandRunner, binary: &str) -> bool {
    match runner.run("which", &[binary], None) {
        Ok(output) => output.success,
        Err(e) => {
            debug!("Could not check if {} is installed: {}", binary, e);
            false
        }
    }
}

pub fn is_service_active(runner: &mut impl CommandRunner, unit: &str) -> bool {
    match runner.run("systemctl", &["is-active", unit], None) {
        Ok(output) => output.success && String::from_utf8_lossy(&output.stdout).trim() == "active",
        Err(e) => {
            debug!("Could not check {} service status: {}", unit, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_includes_trimmed_stderr() {
        let output = CommandOutput {
            success: false,
            code: Some(100),
            stdout: Vec::new(),
            stderr: b"E: Unable to locate package tor\n".to_vec(),
        };
        assert_eq!(output.describe(), "exit code 100\nE: Unable to locate package tor");
    }

    #[test]
    fn describe_without_stderr() {
        let output = CommandOutput { code: None, ..Default::default() };
        assert_eq!(output.describe(), "terminated by signal");
    }

    #[test]
    fn command_line_joins_args() {
        assert_eq!(command_line("apt-get", &["install", "-y", "tor"]), "apt-get install -y tor");
    }

    #[test]
    fn system_runner_feeds_stdin() {
        let mut runner = SystemRunner;
        let output = runner.run("cat", &[], Some(b"hello")).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn system_runner_streams_large_stdin() {
        // well past the pipe buffer, cat echoes before it has read it all
        let input = vec![b'k'; 1 << 20];
        let mut runner = SystemRunner;
        let output = runner.run("cat", &[], Some(&input)).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.len(), input.len());
    }
}
