// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host identity reported to the transit relay as `clientInfo`.

use std::net::{IpAddr, UdpSocket};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];
const SYSFS_NET: &str = "/sys/class/net";

/// Identity payload sent on connect and on `getClientInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostIdentity {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub mac: String,
    pub ip: String,
    pub ipv6: String,
    pub client_url: String,
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_version: String,
}

impl HostIdentity {
    /// Probe the running machine. `port` is the local listener port used
    /// to build `clientUrl`. Missing facts are reported as empty strings.
    pub fn collect(port: u16, plugin_version: &str) -> Self {
        let ip = primary_address("8.8.8.8:80")
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".into());
        let ipv6 = primary_address("[2001:4860:4860::8888]:80")
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let identity = Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            platform: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            mac: mac_address(Path::new(SYSFS_NET)).unwrap_or_default(),
            client_url: client_url(&ip, port),
            ip,
            ipv6,
            machine_id: machine_id(),
            plugin_version: plugin_version.to_owned(),
        };
        debug!(ip = %identity.ip, machine_id = %identity.machine_id, "host identity collected");
        identity
    }
}

pub fn client_url(ip: &str, port: u16) -> String {
    format!("http://{ip}:{port}")
}

/// Local address the OS would route `remote` through. Connecting a UDP
/// socket sends nothing.
fn primary_address(remote: &str) -> Option<IpAddr> {
    let bind = if remote.starts_with('[') { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(remote).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// First non-loopback interface with a non-zero hardware address.
fn mac_address(sysfs: &Path) -> Option<String> {
    let mut names: Vec<_> = std::fs::read_dir(sysfs)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .collect();
    names.sort();

    names.into_iter().find_map(|name| {
        let address = std::fs::read_to_string(sysfs.join(&name).join("address")).ok()?;
        let address = address.trim();
        let zero = address.chars().all(|c| c == '0' || c == ':');
        (!address.is_empty() && !zero).then(|| address.to_owned())
    })
}

/// SHA-256 of the OS machine id, falling back to the hostname.
fn machine_id() -> String {
    let source = MACHINE_ID_PATHS
        .iter()
        .find_map(|path| read_trimmed(Path::new(path)))
        .or_else(|| read_trimmed(Path::new("/etc/hostname")))
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_default();
    hash_id(&source)
}

fn read_trimmed(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn hash_id(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_url_uses_listener_port() {
        assert_eq!(client_url("192.168.1.20", 17521), "http://192.168.1.20:17521");
    }

    #[test]
    fn machine_id_is_hex_sha256() {
        let id = hash_id("abc");
        assert_eq!(
            id,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(machine_id().len(), 64);
    }

    #[test]
    fn mac_skips_loopback_and_zero_addresses() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        for (name, address) in [
            ("lo", "00:00:00:00:00:00"),
            ("dummy0", "00:00:00:00:00:00"),
            ("eth0", "52:54:00:12:34:56"),
        ] {
            std::fs::create_dir_all(dir.join(name)).unwrap();
            std::fs::write(dir.join(name).join("address"), format!("{address}\n")).unwrap();
        }
        assert_eq!(mac_address(dir).as_deref(), Some("52:54:00:12:34:56"));
    }

    #[test]
    fn collect_reports_platform_facts() {
        let identity = HostIdentity::collect(17521, "");
        assert_eq!(identity.platform, std::env::consts::OS);
        assert_eq!(identity.arch, std::env::consts::ARCH);
        assert!(identity.client_url.ends_with(":17521"));
        assert!(!identity.ip.is_empty());
    }
}
