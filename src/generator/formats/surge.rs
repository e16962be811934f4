use log::debug;

use super::{unique_names, AUTO_GROUP, SELECT_GROUP, TEST_INTERVAL, TEST_URL};
use crate::models::{ProxyConfig, ProxyType, RankedEntry};

/// Surge plugin options use `obfs=http;obfs-host=x`, same as SIP003.
fn push_obfs(parts: &mut Vec<String>, config: &ProxyConfig) {
    let Some(opts) = config.param("plugin_opts") else {
        return;
    };
    for item in opts.split(';') {
        match item.trim().split_once('=') {
            Some(("obfs", mode)) => parts.push(format!("obfs={}", mode)),
            Some(("obfs-host", host)) => parts.push(format!("obfs-host={}", host)),
            _ => {}
        }
    }
}

fn push_tls(parts: &mut Vec<String>, config: &ProxyConfig) {
    if let Some(sni) = config.param("sni") {
        parts.push(format!("sni={}", sni));
    }
    if config.param("insecure").is_some() {
        parts.push("skip-cert-verify=true".to_string());
    }
}

fn push_ws(parts: &mut Vec<String>, config: &ProxyConfig) {
    if config.param("network") == Some("ws") {
        parts.push("ws=true".to_string());
        if let Some(path) = config.param("path") {
            parts.push(format!("ws-path={}", path));
        }
        if let Some(host) = config.param("host_header") {
            parts.push(format!("ws-headers=Host:{}", host));
        }
    }
}

/// One `[Proxy]` line, `None` for protocols Surge does not support.
pub fn proxy_to_surge_line(config: &ProxyConfig, name: &str) -> Option<String> {
    let p = |k: &str| config.param(k).unwrap_or_default();
    let server = config.hostname.as_str();
    let port = config.port;

    let parts: Vec<String> = match config.proxy_type {
        ProxyType::Shadowsocks => {
            if config.param("plugin").is_some_and(|plugin| !plugin.contains("obfs")) {
                return None;
            }
            let mut parts = vec![
                format!("ss, {}, {}", server, port),
                format!("encrypt-method={}", p("method")),
                format!("password={}", p("password")),
            ];
            push_obfs(&mut parts, config);
            parts
        }
        ProxyType::VMess => {
            let mut parts = vec![
                format!("vmess, {}, {}", server, port),
                format!("username={}", p("uuid")),
            ];
            if config.param("alter_id").is_none() {
                parts.push("vmess-aead=true".to_string());
            }
            push_ws(&mut parts, config);
            if config.wants_tls() {
                parts.push("tls=true".to_string());
                push_tls(&mut parts, config);
            }
            parts
        }
        ProxyType::Trojan => {
            let mut parts = vec![
                format!("trojan, {}, {}", server, port),
                format!("password={}", p("password")),
            ];
            push_ws(&mut parts, config);
            push_tls(&mut parts, config);
            parts
        }
        ProxyType::Hysteria2 => {
            let mut parts = vec![
                format!("hysteria2, {}, {}", server, port),
                format!("password={}", p("password")),
            ];
            push_tls(&mut parts, config);
            parts
        }
        ProxyType::Tuic => {
            let mut parts = vec![
                format!("tuic-v5, {}, {}", server, port),
                format!("password={}", p("password")),
                format!("uuid={}", p("uuid")),
            ];
            if let Some(alpn) = config.param("alpn") {
                parts.push(format!("alpn={}", alpn));
            }
            push_tls(&mut parts, config);
            parts
        }
        ProxyType::Socks5 | ProxyType::HTTP | ProxyType::HTTPS => {
            let kind = match config.proxy_type {
                ProxyType::Socks5 => "socks5",
                ProxyType::HTTPS => "https",
                _ => "http",
            };
            let mut parts = vec![format!("{}, {}, {}", kind, server, port)];
            if let Some(username) = config.param("username") {
                parts.push(username.to_string());
                parts.push(p("password").to_string());
            }
            if config.proxy_type == ProxyType::HTTPS {
                push_tls(&mut parts, config);
            }
            parts
        }
        ProxyType::ShadowsocksR | ProxyType::Vless | ProxyType::Hysteria => return None,
    };

    Some(format!("{} = {}", name, parts.join(", ")))
}

/// Convert ranked entries to a Surge configuration with a `[Proxy]`
/// section and `select`/`url-test` groups.
pub fn proxy_to_surge(entries: &[RankedEntry]) -> String {
    let names = unique_names(entries);
    let mut out = String::from("[Proxy]\n");
    let mut members = Vec::new();

    for (entry, name) in entries.iter().zip(names) {
        match proxy_to_surge_line(&entry.config, &name) {
            Some(line) => {
                out.push_str(&line);
                out.push('\n');
                members.push(name);
            }
            None => debug!(
                "Surge has no {} proxy, skipping {}",
                entry.config.proxy_type, name
            ),
        }
    }

    out.push_str("\n[Proxy Group]\n");
    if members.is_empty() {
        out.push_str(&format!("{} = select, DIRECT\n", SELECT_GROUP));
    } else {
        let joined = members.join(", ");
        out.push_str(&format!("{} = select, {}, {}\n", SELECT_GROUP, AUTO_GROUP, joined));
        out.push_str(&format!(
            "{} = url-test, {}, url={}, interval={}\n",
            AUTO_GROUP, joined, TEST_URL, TEST_INTERVAL
        ));
    }

    out.push_str(&format!("\n[Rule]\nFINAL,{}\n", SELECT_GROUP));
    out
}
