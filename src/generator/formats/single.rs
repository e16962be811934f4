use base64::{engine::general_purpose, Engine as _};
use serde_json::json;

use crate::models::{ProxyConfig, ProxyType};
use crate::utils::base64::url_safe_base64_encode;
use crate::utils::url::url_encode;

/// Render `key=value` pairs as a query string, skipping absent values.
fn query_string(pairs: &[(&str, Option<&str>)]) -> String {
    pairs
        .iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, url_encode(v))))
        .collect::<Vec<_>>()
        .join("&")
}

fn with_query(mut uri: String, query: &str) -> String {
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(query);
    }
    uri
}

fn with_remark(mut uri: String, remark: &str) -> String {
    if !remark.is_empty() {
        uri.push('#');
        uri.push_str(&url_encode(remark));
    }
    uri
}

/// The shared VLESS/Trojan transport parameters.
fn transport_pairs(config: &ProxyConfig) -> Vec<(&'static str, Option<&str>)> {
    vec![
        ("security", config.param("security")),
        ("sni", config.param("sni")),
        ("type", config.param("network")),
        ("path", config.param("path")),
        ("host", config.param("host_header")),
        ("serviceName", config.param("service_name")),
        ("headerType", config.param("header_type")),
        ("alpn", config.param("alpn")),
        ("fp", config.param("fingerprint")),
        ("pbk", config.param("public_key")),
        ("sid", config.param("short_id")),
        ("flow", config.param("flow")),
        ("allowInsecure", config.param("insecure").map(|_| "1")),
    ]
}

/// Userinfo of the form `user[:password]@`, empty when neither is set.
fn credentials(config: &ProxyConfig) -> String {
    match (config.param("username"), config.param("password")) {
        (None, None) => String::new(),
        (user, Some(password)) => format!(
            "{}:{}@",
            url_encode(user.unwrap_or_default()),
            url_encode(password)
        ),
        (Some(user), None) => format!("{}@", url_encode(user)),
    }
}

fn ssr_body(config: &ProxyConfig) -> String {
    let p = |key: &str| config.param(key).unwrap_or_default();
    let mut plain = format!(
        "{}:{}:{}:{}:{}:{}",
        config.hostname,
        config.port,
        p("protocol"),
        p("method"),
        p("obfs"),
        url_safe_base64_encode(p("password"))
    );

    let mut params = Vec::new();
    if let Some(obfs_param) = config.param("obfs_param") {
        params.push(format!("obfsparam={}", url_safe_base64_encode(obfs_param)));
    }
    if let Some(protocol_param) = config.param("protocol_param") {
        params.push(format!("protoparam={}", url_safe_base64_encode(protocol_param)));
    }
    if !config.remark.is_empty() {
        params.push(format!("remarks={}", url_safe_base64_encode(&config.remark)));
    }
    if !params.is_empty() {
        plain.push_str("/?");
        plain.push_str(&params.join("&"));
    }
    plain
}

/// v2rayN share JSON. Keys come out sorted, which keeps the URI stable.
fn vmess_json(config: &ProxyConfig) -> String {
    let p = |key: &str| config.param(key).unwrap_or_default().to_string();
    let or = |key: &str, default: &str| config.param(key).unwrap_or(default).to_string();
    json!({
        "v": "2",
        "ps": config.remark,
        "add": config.hostname,
        "port": config.port.to_string(),
        "id": p("uuid"),
        "aid": or("alter_id", "0"),
        "scy": or("cipher", "auto"),
        "net": or("network", "tcp"),
        "type": or("header_type", "none"),
        "host": p("host_header"),
        "path": p("path"),
        "tls": p("security"),
        "sni": p("sni"),
        "alpn": p("alpn"),
        "fp": p("fingerprint"),
    })
    .to_string()
}

/// Convert a proxy to its share-link URI
///
/// Every supported protocol has a URI form, and parsing the result yields
/// a config with the same identity.
pub fn proxy_to_uri(config: &ProxyConfig) -> String {
    let address = config.address();
    match config.proxy_type {
        ProxyType::Shadowsocks => {
            // ss://BASE64(method:password)@server:port/?plugin=plugin;opts#remark
            let user_info = format!(
                "{}:{}",
                config.param("method").unwrap_or_default(),
                config.param("password").unwrap_or_default()
            );
            let mut uri = format!("ss://{}@{}", url_safe_base64_encode(&user_info), address);
            if let Some(plugin) = config.param("plugin") {
                let plugin = match config.param("plugin_opts") {
                    Some(opts) => format!("{};{}", plugin, opts),
                    None => plugin.to_string(),
                };
                uri.push_str("/?plugin=");
                uri.push_str(&url_encode(&plugin));
            }
            with_remark(uri, &config.remark)
        }
        ProxyType::ShadowsocksR => format!("ssr://{}", url_safe_base64_encode(&ssr_body(config))),
        ProxyType::VMess => format!(
            "vmess://{}",
            general_purpose::STANDARD.encode(vmess_json(config))
        ),
        ProxyType::Vless => {
            let mut pairs = vec![("encryption", Some("none"))];
            pairs.extend(transport_pairs(config));
            let uri = format!(
                "vless://{}@{}",
                url_encode(config.param("uuid").unwrap_or_default()),
                address
            );
            with_remark(with_query(uri, &query_string(&pairs)), &config.remark)
        }
        ProxyType::Trojan => {
            let uri = format!(
                "trojan://{}@{}",
                url_encode(config.param("password").unwrap_or_default()),
                address
            );
            let query = query_string(&transport_pairs(config));
            with_remark(with_query(uri, &query), &config.remark)
        }
        ProxyType::Hysteria => {
            let query = query_string(&[
                ("protocol", config.param("protocol")),
                ("auth", config.param("auth")),
                ("peer", config.param("sni")),
                ("upmbps", config.param("up_mbps")),
                ("downmbps", config.param("down_mbps")),
                ("obfs", config.param("obfs")),
                ("alpn", config.param("alpn")),
                ("insecure", config.param("insecure").map(|_| "1")),
            ]);
            let uri = format!("hysteria://{}", address);
            with_remark(with_query(uri, &query), &config.remark)
        }
        ProxyType::Hysteria2 => {
            let query = query_string(&[
                ("sni", config.param("sni")),
                ("obfs", config.param("obfs")),
                ("obfs-password", config.param("obfs_param")),
                ("alpn", config.param("alpn")),
                ("pinSHA256", config.param("pin_sha256")),
                ("insecure", config.param("insecure").map(|_| "1")),
            ]);
            let uri = format!(
                "hysteria2://{}@{}/",
                url_encode(config.param("password").unwrap_or_default()),
                address
            );
            with_remark(with_query(uri, &query), &config.remark)
        }
        ProxyType::Tuic => {
            let user = match config.param("password") {
                Some(password) => format!(
                    "{}:{}",
                    url_encode(config.param("uuid").unwrap_or_default()),
                    url_encode(password)
                ),
                None => url_encode(config.param("uuid").unwrap_or_default()),
            };
            let query = query_string(&[
                ("congestion_control", config.param("congestion_control")),
                ("udp_relay_mode", config.param("udp_relay_mode")),
                ("alpn", config.param("alpn")),
                ("sni", config.param("sni")),
                ("allow_insecure", config.param("insecure").map(|_| "1")),
            ]);
            let uri = format!("tuic://{}@{}", user, address);
            with_remark(with_query(uri, &query), &config.remark)
        }
        ProxyType::Socks5 => with_remark(
            format!("socks5://{}{}", credentials(config), address),
            &config.remark,
        ),
        ProxyType::HTTP | ProxyType::HTTPS => with_remark(
            format!(
                "{}://{}{}",
                config.proxy_type.as_str(),
                credentials(config),
                address
            ),
            &config.remark,
        ),
    }
}

/// The line written to the raw list: the entry as it was found, or a
/// generated link when it came from a structured document without one.
pub fn entry_uri(config: &ProxyConfig) -> String {
    if config.raw_uri.is_empty() {
        proxy_to_uri(config)
    } else {
        config.raw_uri.clone()
    }
}

/// One URI per line, newline terminated.
pub fn proxy_to_single(configs: &[&ProxyConfig]) -> String {
    let mut out = String::new();
    for config in configs {
        out.push_str(&entry_uri(config));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn reparse(config: &ProxyConfig) -> ProxyConfig {
        let uri = proxy_to_uri(config);
        let report = parse(&uri);
        assert!(report.errors.is_empty(), "{} -> {:?}", uri, report.errors);
        assert_eq!(report.configs.len(), 1, "{}", uri);
        report.configs.into_iter().next().unwrap()
    }

    fn config(proxy_type: ProxyType, host: &str, port: u16, params: &[(&str, &str)]) -> ProxyConfig {
        let mut config = ProxyConfig::new(proxy_type, host, port).with_remark("Node A/1");
        for (k, v) in params {
            config.set_param(k, *v);
        }
        config
    }

    #[test]
    fn test_every_protocol_reparses_to_same_identity() {
        let configs = vec![
            config(
                ProxyType::Shadowsocks,
                "1.2.3.4",
                8388,
                &[
                    ("method", "aes-256-gcm"),
                    ("password", "p@ss:word"),
                    ("plugin", "obfs-local"),
                    ("plugin_opts", "obfs=http;obfs-host=a.example"),
                ],
            ),
            config(
                ProxyType::ShadowsocksR,
                "2001:db8::1",
                443,
                &[
                    ("method", "chacha20"),
                    ("password", "secret"),
                    ("protocol", "auth_aes128_md5"),
                    ("obfs", "tls1.2_ticket_auth"),
                    ("obfs_param", "cdn.example"),
                ],
            ),
            config(
                ProxyType::VMess,
                "v.example",
                443,
                &[
                    ("uuid", "b831381d-6324-4d53-ad4f-8cda48b30811"),
                    ("network", "ws"),
                    ("path", "/ray"),
                    ("security", "tls"),
                    ("sni", "v.example"),
                ],
            ),
            config(
                ProxyType::Vless,
                "vl.example",
                8443,
                &[
                    ("uuid", "b831381d-6324-4d53-ad4f-8cda48b30811"),
                    ("security", "reality"),
                    ("sni", "www.example.com"),
                    ("public_key", "abc"),
                    ("flow", "xtls-rprx-vision"),
                ],
            ),
            config(
                ProxyType::Trojan,
                "t.example",
                443,
                &[("password", "pa ss#1"), ("sni", "t.example"), ("network", "grpc")],
            ),
            config(
                ProxyType::Hysteria,
                "h.example",
                36712,
                &[("auth", "token"), ("sni", "h.example"), ("up_mbps", "50")],
            ),
            config(
                ProxyType::Hysteria2,
                "h2.example",
                443,
                &[("password", "a:b"), ("obfs", "salamander"), ("obfs_param", "x")],
            ),
            config(
                ProxyType::Tuic,
                "tu.example",
                443,
                &[
                    ("uuid", "b831381d-6324-4d53-ad4f-8cda48b30811"),
                    ("password", "pw"),
                    ("congestion_control", "bbr"),
                ],
            ),
            config(
                ProxyType::Socks5,
                "s.example",
                1080,
                &[("username", "user"), ("password", "pass")],
            ),
            config(ProxyType::HTTP, "p.example", 8080, &[]),
            config(
                ProxyType::HTTPS,
                "ps.example",
                8443,
                &[("username", "u"), ("password", "p")],
            ),
        ];

        for original in &configs {
            let parsed = reparse(original);
            assert_eq!(parsed.proxy_type, original.proxy_type);
            assert_eq!(
                parsed.canonical_identity(),
                original.canonical_identity(),
                "{}",
                proxy_to_uri(original)
            );
            assert_eq!(parsed.remark, original.remark);
        }
    }

    #[test]
    fn test_vmess_uri_keeps_descriptive_params() {
        let original = config(
            ProxyType::VMess,
            "v.example",
            80,
            &[
                ("uuid", "b831381d-6324-4d53-ad4f-8cda48b30811"),
                ("alter_id", "2"),
                ("network", "ws"),
                ("host_header", "cdn.example"),
            ],
        );
        let parsed = reparse(&original);
        assert_eq!(parsed.params, original.params);
    }

    #[test]
    fn test_entry_uri_prefers_raw() {
        let mut config = config(ProxyType::Socks5, "s.example", 1080, &[]);
        assert!(entry_uri(&config).starts_with("socks5://s.example:1080"));
        config.raw_uri = "socks5://original:1080".to_string();
        assert_eq!(entry_uri(&config), "socks5://original:1080");
        assert_eq!(proxy_to_single(&[&config, &config]), "socks5://original:1080\nsocks5://original:1080\n");
    }
}
