// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LAN-IP detection and access-link aggregation for `GET /api/links`.
//!
//! Grounded on `original_source/backend/network_manager.py`'s
//! `get_lan_ips`/`generate_links`: the Python hits both `gethostbyname_ex`
//! and a UDP "connect" to a public address to learn the default-route IP.
//! Rust has no `gethostbyname_ex` equivalent without a DNS-heavy crate, so
//! this keeps only the default-route trick (`UdpSocket::connect` never
//! sends a packet, it just asks the kernel to pick a source address) and
//! adds `if_addrs`-free enumeration is skipped — a single best-effort IP is
//! enough for the dev-convenience surface this serves.

use std::net::UdpSocket;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Links {
    pub localhost: String,
    pub lan: Vec<String>,
    pub ngrok: Option<String>,
    pub cloudflare: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinksResponse {
    pub links: Links,
    pub lan_ips: Vec<String>,
}

/// Detect LAN IP addresses for this machine. Best-effort: returns an empty
/// vector rather than erroring if detection fails.
pub fn detect_lan_ips() -> Vec<String> {
    let mut ips = Vec::new();
    if let Some(ip) = default_route_ip() {
        ips.push(ip);
    }
    ips
}

fn default_route_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let addr = socket.local_addr().ok()?;
    let ip = addr.ip();
    if ip.is_loopback() {
        None
    } else {
        Some(ip.to_string())
    }
}

/// Build the access-links view for the configured port plus current tunnel
/// state. `lan_ip` is the operator-configured override (persistence field);
/// when absent, the auto-detected addresses in `lan_ips` are offered as-is.
pub fn generate_links(
    port: u16,
    lan_ip: Option<&str>,
    lan_enabled: bool,
    ngrok_enabled: bool,
    ngrok_url: Option<&str>,
    cloudflare_enabled: bool,
    cloudflare_url: Option<&str>,
) -> LinksResponse {
    let lan_ips = detect_lan_ips();

    let mut lan = Vec::new();
    if lan_enabled {
        if let Some(ip) = lan_ip.filter(|ip| !ip.trim().is_empty()) {
            lan.push(format!("http://{ip}:{port}"));
        } else {
            lan.extend(lan_ips.iter().map(|ip| format!("http://{ip}:{port}")));
        }
    }

    let links = Links {
        localhost: format!("http://localhost:{port}"),
        lan,
        ngrok: if ngrok_enabled { ngrok_url.map(str::to_owned) } else { None },
        cloudflare: if cloudflare_enabled { cloudflare_url.map(str::to_owned) } else { None },
    };

    LinksResponse { links, lan_ips }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_link_always_present() {
        let resp = generate_links(1338, None, false, false, None, false, None);
        assert_eq!(resp.links.localhost, "http://localhost:1338");
        assert!(resp.links.lan.is_empty());
    }

    #[test]
    fn lan_link_uses_configured_override_when_present() {
        let resp = generate_links(1338, Some("192.168.1.50"), true, false, None, false, None);
        assert_eq!(resp.links.lan, vec!["http://192.168.1.50:1338".to_owned()]);
    }

    #[test]
    fn ngrok_link_hidden_unless_enabled() {
        let resp = generate_links(1338, None, false, false, Some("https://abc.ngrok.io"), false, None);
        assert_eq!(resp.links.ngrok, None);

        let resp = generate_links(1338, None, false, true, Some("https://abc.ngrok.io"), false, None);
        assert_eq!(resp.links.ngrok, Some("https://abc.ngrok.io".to_owned()));
    }

    #[test]
    fn cloudflare_link_hidden_unless_enabled() {
        let resp = generate_links(1338, None, false, false, None, true, Some("https://x.trycloudflare.com"));
        assert_eq!(resp.links.cloudflare, Some("https://x.trycloudflare.com".to_owned()));
    }
}
