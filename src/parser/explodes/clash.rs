use serde_yaml::{Mapping, Value};

use super::normalize_uuid;
use crate::error::ParseError;
use crate::generator::formats::single::proxy_to_uri;
use crate::models::{ProxyConfig, ProxyType};

/// Entries found in a Clash `proxies:` list.
#[derive(Debug, Default)]
pub struct ClashProxies {
    pub parsed: Vec<Result<ProxyConfig, ParseError>>,
    /// Mappings of a type this crate does not handle (snell, wireguard, ...).
    pub ignored: usize,
}

/// Read a scalar as text; Clash configs mix quoted and bare numbers freely.
fn scalar(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn field(proxy: &Value, key: &str) -> String {
    scalar(proxy.get(key))
}

fn flag(proxy: &Value, key: &str) -> bool {
    match proxy.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        _ => false,
    }
}

fn nested(proxy: &Value, outer: &str, inner: &str) -> String {
    scalar(proxy.get(outer).and_then(|v| v.get(inner)))
}

/// `alpn` may be a list or a comma separated string.
fn list(proxy: &Value, key: &str) -> String {
    match proxy.get(key) {
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|v| scalar(Some(v)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        other => scalar(other),
    }
}

fn plugin_opts(opts: &Mapping) -> String {
    opts.iter()
        .filter_map(|(k, v)| {
            let key = scalar(Some(k));
            let value = scalar(Some(v));
            let key = match key.as_str() {
                "mode" => "obfs".to_string(),
                "host" => "obfs-host".to_string(),
                _ => key,
            };
            (!value.is_empty()).then(|| format!("{}={}", key, value))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a Clash YAML document.
///
/// Returns `None` when the text is not YAML or has no `proxies` list, so
/// the caller can fall back to scanning it as plain text.
pub fn explode_clash(content: &str) -> Option<ClashProxies> {
    let yaml: Value = serde_yaml::from_str(content).ok()?;
    let proxies = match yaml.get("proxies").or_else(|| yaml.get("Proxy")) {
        Some(Value::Sequence(seq)) => seq,
        _ => return None,
    };

    let mut result = ClashProxies::default();
    for proxy in proxies {
        match parse_clash_proxy(proxy) {
            Some(parsed) => result.parsed.push(parsed.map(|config| {
                let uri = proxy_to_uri(&config);
                config.with_raw(&uri)
            })),
            None => result.ignored += 1,
        }
    }
    Some(result)
}

/// `None` means the mapping's type is not one we handle.
fn parse_clash_proxy(proxy: &Value) -> Option<Result<ProxyConfig, ParseError>> {
    let type_name = field(proxy, "type").to_ascii_lowercase();
    let proxy_type = match type_name.as_str() {
        "ss" | "shadowsocks" => ProxyType::Shadowsocks,
        "ssr" | "shadowsocksr" => ProxyType::ShadowsocksR,
        "vmess" => ProxyType::VMess,
        "vless" => ProxyType::Vless,
        "trojan" => ProxyType::Trojan,
        "hysteria" => ProxyType::Hysteria,
        "hysteria2" | "hy2" => ProxyType::Hysteria2,
        "tuic" => ProxyType::Tuic,
        "socks5" | "socks" => ProxyType::Socks5,
        "http" if flag(proxy, "tls") => ProxyType::HTTPS,
        "http" => ProxyType::HTTP,
        _ => return None,
    };

    let name = field(proxy, "name");
    let server = field(proxy, "server");
    let snippet = format!("{}: {}", type_name, name);
    if server.is_empty() {
        return Some(Err(ParseError::new(&snippet, "missing server")));
    }
    let port = match field(proxy, "port").parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => return Some(Err(ParseError::new(&snippet, "invalid port"))),
    };

    let mut config = ProxyConfig::new(proxy_type, &server, port).with_remark(&name);
    let sni = {
        let sni = field(proxy, "sni");
        if sni.is_empty() {
            field(proxy, "servername")
        } else {
            sni
        }
    };
    config.set_param("sni", sni.to_ascii_lowercase());
    if flag(proxy, "skip-cert-verify") {
        config.set_param("insecure", "1");
    }

    match proxy_type {
        ProxyType::Shadowsocks => {
            config.set_param("method", field(proxy, "cipher").to_ascii_lowercase());
            config.set_param("password", field(proxy, "password"));
            config.set_param("plugin", field(proxy, "plugin"));
            if let Some(Value::Mapping(opts)) = proxy.get("plugin-opts") {
                config.set_param("plugin_opts", plugin_opts(opts));
            }
            if config.param("method").is_none() || config.param("password").is_none() {
                return Some(Err(ParseError::new(&snippet, "missing cipher or password")));
            }
        }
        ProxyType::ShadowsocksR => {
            config.set_param("method", field(proxy, "cipher").to_ascii_lowercase());
            config.set_param("password", field(proxy, "password"));
            config.set_param("protocol", field(proxy, "protocol"));
            config.set_param("obfs", field(proxy, "obfs"));
            config.set_param("obfs_param", field(proxy, "obfs-param"));
            config.set_param("protocol_param", field(proxy, "protocol-param"));
        }
        ProxyType::VMess | ProxyType::Vless => {
            let uuid = field(proxy, "uuid");
            if uuid.is_empty() {
                return Some(Err(ParseError::new(&snippet, "missing uuid")));
            }
            config.set_param("uuid", normalize_uuid(&uuid));
            let aid = field(proxy, "alterId");
            if aid != "0" {
                config.set_param("alter_id", aid);
            }
            let cipher = field(proxy, "cipher");
            if cipher != "auto" {
                config.set_param("cipher", cipher);
            }
            config.set_param("flow", field(proxy, "flow"));
            config.set_param("fingerprint", field(proxy, "client-fingerprint"));
            if proxy.get("reality-opts").is_some() {
                config.set_param("security", "reality");
                config.set_param("public_key", nested(proxy, "reality-opts", "public-key"));
                config.set_param("short_id", nested(proxy, "reality-opts", "short-id"));
            } else if flag(proxy, "tls") {
                config.set_param("security", "tls");
            }
            apply_transport(&mut config, proxy);
        }
        ProxyType::Trojan => {
            config.set_param("password", field(proxy, "password"));
            apply_transport(&mut config, proxy);
        }
        ProxyType::Hysteria => {
            let auth = field(proxy, "auth-str");
            config.set_param(
                "auth",
                if auth.is_empty() { field(proxy, "auth") } else { auth },
            );
            config.set_param("up_mbps", field(proxy, "up"));
            config.set_param("down_mbps", field(proxy, "down"));
            config.set_param("protocol", field(proxy, "protocol"));
            config.set_param("obfs", field(proxy, "obfs"));
            config.set_param("alpn", list(proxy, "alpn"));
        }
        ProxyType::Hysteria2 => {
            config.set_param("password", field(proxy, "password"));
            config.set_param("obfs", field(proxy, "obfs"));
            config.set_param("obfs_param", field(proxy, "obfs-password"));
            config.set_param("alpn", list(proxy, "alpn"));
        }
        ProxyType::Tuic => {
            config.set_param("uuid", normalize_uuid(&field(proxy, "uuid")));
            config.set_param("password", field(proxy, "password"));
            config.set_param("congestion_control", field(proxy, "congestion-controller"));
            config.set_param("udp_relay_mode", field(proxy, "udp-relay-mode"));
            config.set_param("alpn", list(proxy, "alpn"));
        }
        ProxyType::Socks5 | ProxyType::HTTP | ProxyType::HTTPS => {
            config.set_param("username", field(proxy, "username"));
            config.set_param("password", field(proxy, "password"));
        }
    }

    Some(Ok(config))
}

fn apply_transport(config: &mut ProxyConfig, proxy: &Value) {
    let network = field(proxy, "network").to_ascii_lowercase();
    match network.as_str() {
        "ws" | "httpupgrade" => {
            config.set_param("path", nested(proxy, "ws-opts", "path"));
            let host = proxy
                .get("ws-opts")
                .and_then(|o| o.get("headers"))
                .and_then(|h| h.get("Host"));
            config.set_param("host_header", scalar(host));
        }
        "grpc" => {
            config.set_param("service_name", nested(proxy, "grpc-opts", "grpc-service-name"));
        }
        "h2" => {
            config.set_param("path", nested(proxy, "h2-opts", "path"));
        }
        _ => {}
    }
    if network != "tcp" {
        config.set_param("network", network);
    }
}
