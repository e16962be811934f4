use log::debug;

use super::{unique_names, SELECT_GROUP};
use crate::models::{ProxyConfig, ProxyType, RankedEntry};

/// `obfs=` / `obfs-host=` / `obfs-uri=` for websocket transports.
fn push_ws_obfs(parts: &mut Vec<String>, config: &ProxyConfig, tls: bool) {
    parts.push(format!("obfs={}", if tls { "wss" } else { "ws" }));
    if let Some(host) = config.param("host_header") {
        parts.push(format!("obfs-host={}", host));
    }
    if let Some(path) = config.param("path") {
        parts.push(format!("obfs-uri={}", path));
    }
}

/// Transport and TLS options shared by VMess and VLESS.
fn push_v2_transport(parts: &mut Vec<String>, config: &ProxyConfig) {
    let tls = config.wants_tls();
    match config.param("network") {
        Some("ws") => push_ws_obfs(parts, config, tls),
        _ if tls => {
            parts.push("obfs=over-tls".to_string());
            parts.push(format!("obfs-host={}", config.tls_server_name()));
        }
        _ => {}
    }
}

fn push_cert_verify(parts: &mut Vec<String>, config: &ProxyConfig) {
    if config.param("insecure").is_some() {
        parts.push("tls-verification=false".to_string());
    }
}

/// One `[server_local]` line, `None` for protocols Quantumult X lacks.
pub fn proxy_to_quan_x_line(config: &ProxyConfig, name: &str) -> Option<String> {
    let p = |k: &str| config.param(k).unwrap_or_default();
    let address = config.address();

    let mut parts: Vec<String> = match config.proxy_type {
        ProxyType::Shadowsocks => {
            let mut parts = vec![
                format!("shadowsocks={}", address),
                format!("method={}", p("method")),
                format!("password={}", p("password")),
            ];
            if let Some(opts) = config.param("plugin_opts") {
                for item in opts.split(';') {
                    match item.trim().split_once('=') {
                        Some(("obfs", mode)) => parts.push(format!("obfs={}", mode)),
                        Some(("obfs-host", host)) => parts.push(format!("obfs-host={}", host)),
                        _ => {}
                    }
                }
            }
            parts
        }
        ProxyType::ShadowsocksR => {
            let mut parts = vec![
                format!("shadowsocks={}", address),
                format!("method={}", p("method")),
                format!("password={}", p("password")),
                format!("ssr-protocol={}", p("protocol")),
            ];
            if let Some(param) = config.param("protocol_param") {
                parts.push(format!("ssr-protocol-param={}", param));
            }
            parts.push(format!("obfs={}", p("obfs")));
            if let Some(param) = config.param("obfs_param") {
                parts.push(format!("obfs-host={}", param));
            }
            parts
        }
        ProxyType::VMess => {
            let method = match config.param("cipher") {
                Some("none") => "none",
                Some("aes-128-gcm") => "aes-128-gcm",
                _ => "chacha20-ietf-poly1305",
            };
            let mut parts = vec![
                format!("vmess={}", address),
                format!("method={}", method),
                format!("password={}", p("uuid")),
            ];
            if config.param("alter_id").is_none() {
                parts.push("aead=true".to_string());
            }
            push_v2_transport(&mut parts, config);
            parts
        }
        ProxyType::Vless => {
            if config.param("security") == Some("reality") {
                return None;
            }
            let mut parts = vec![
                format!("vless={}", address),
                "method=none".to_string(),
                format!("password={}", p("uuid")),
            ];
            push_v2_transport(&mut parts, config);
            parts
        }
        ProxyType::Trojan => {
            let mut parts = vec![format!("trojan={}", address), format!("password={}", p("password"))];
            if config.param("network") == Some("ws") {
                push_ws_obfs(&mut parts, config, true);
            } else {
                parts.push("over-tls=true".to_string());
                parts.push(format!("tls-host={}", config.tls_server_name()));
            }
            push_cert_verify(&mut parts, config);
            parts
        }
        ProxyType::Socks5 | ProxyType::HTTP | ProxyType::HTTPS => {
            let kind = if config.proxy_type == ProxyType::Socks5 {
                "socks5"
            } else {
                "http"
            };
            let mut parts = vec![format!("{}={}", kind, address)];
            if let Some(username) = config.param("username") {
                parts.push(format!("username={}", username));
                parts.push(format!("password={}", p("password")));
            }
            if config.proxy_type == ProxyType::HTTPS {
                parts.push("over-tls=true".to_string());
                push_cert_verify(&mut parts, config);
            }
            parts
        }
        ProxyType::Hysteria | ProxyType::Hysteria2 | ProxyType::Tuic => return None,
    };

    parts.push(format!("tag={}", name));
    Some(parts.join(", "))
}

/// Convert ranked entries to a Quantumult X configuration with a
/// `[server_local]` section and one static policy over every node.
pub fn proxy_to_quan_x(entries: &[RankedEntry]) -> String {
    let names = unique_names(entries);
    let mut out = String::from("[server_local]\n");
    let mut members = Vec::new();

    for (entry, name) in entries.iter().zip(names) {
        match proxy_to_quan_x_line(&entry.config, &name) {
            Some(line) => {
                out.push_str(&line);
                out.push('\n');
                members.push(name);
            }
            None => debug!(
                "Quantumult X has no {} server, skipping {}",
                entry.config.proxy_type, name
            ),
        }
    }

    out.push_str("\n[policy]\n");
    if members.is_empty() {
        out.push_str(&format!("static={}, direct\n", SELECT_GROUP));
    } else {
        out.push_str(&format!("static={}, {}\n", SELECT_GROUP, members.join(", ")));
    }
    out
}
