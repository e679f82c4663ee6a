//! Egress route configuration and Tor circuit rotation.
//!
//! Each worker is bound to one SOCKS port (its route) for its lifetime.
//! Identity rotation talks the Tor control protocol: AUTHENTICATE, then
//! SIGNAL NEWNYM, expecting a 250 reply for each.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

const CONTROL_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Egress settings shared by all routes of a deployment: where the SOCKS
/// proxies listen, how to reach the control port, and how many fetches a
/// worker performs before forcing a fresh circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Host the per-route SOCKS proxies listen on.
    #[serde(default = "default_socks_host")]
    pub socks_host: String,
    /// Tor control endpoint, e.g. `127.0.0.1:9051`.
    #[serde(default = "default_control_addr")]
    pub control_addr: String,
    /// Control port password (empty = no authentication configured).
    #[serde(default)]
    pub control_password: String,
    /// Fetches between forced identity rotations (0 disables rotation).
    #[serde(default = "default_rotate_after")]
    pub rotate_after: u32,
}

fn default_socks_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_addr() -> String {
    "127.0.0.1:9051".to_string()
}

fn default_rotate_after() -> u32 {
    20
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            socks_host: default_socks_host(),
            control_addr: default_control_addr(),
            control_password: String::new(),
            rotate_after: default_rotate_after(),
        }
    }
}

/// SOCKS proxy URL for one route. `socks5h` so hostname resolution happens
/// on the far side of the proxy (required for .onion addresses).
pub fn proxy_url(cfg: &EgressConfig, route: u16) -> String {
    format!("socks5h://{}:{}", cfg.socks_host, route)
}

/// Requests a fresh circuit from the Tor control port (SIGNAL NEWNYM).
/// Blocking; call from a blocking task when used from async code.
pub fn rotate_identity(cfg: &EgressConfig) -> Result<()> {
    let stream = TcpStream::connect(&cfg.control_addr)
        .with_context(|| format!("failed to connect control port: {}", cfg.control_addr))?;
    stream.set_read_timeout(Some(CONTROL_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(CONTROL_IO_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone().context("control stream clone failed")?);
    let mut writer = stream;

    send_command(
        &mut writer,
        &mut reader,
        &format!("AUTHENTICATE \"{}\"", cfg.control_password),
    )?;
    send_command(&mut writer, &mut reader, "SIGNAL NEWNYM")?;
    let _ = writer.write_all(b"QUIT\r\n");
    Ok(())
}

/// Sends one control command and checks for a 250 reply. Error messages name
/// only the command verb, never its arguments.
fn send_command(writer: &mut TcpStream, reader: &mut BufReader<TcpStream>, cmd: &str) -> Result<()> {
    let verb = cmd.split(' ').next().unwrap_or(cmd);
    writer
        .write_all(format!("{}\r\n", cmd).as_bytes())
        .with_context(|| format!("control write failed: {}", verb))?;

    let mut line = String::new();
    reader
        .read_line(&mut line)
        .with_context(|| format!("control read failed: {}", verb))?;
    if !line.starts_with("250") {
        anyhow::bail!("control port rejected {}: {}", verb, line.trim_end());
    }
    Ok(())
}
