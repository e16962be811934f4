use log::debug;
use serde_json::{json, Value};

use super::{unique_names, AUTO_GROUP, SELECT_GROUP, TEST_URL};
use crate::error::OutputError;
use crate::models::{ProxyConfig, ProxyType, RankedEntry};

fn tls_object(config: &ProxyConfig) -> Value {
    let mut tls = json!({
        "enabled": true,
        "server_name": config.tls_server_name(),
        "insecure": config.param("insecure").is_some(),
    });
    if let Some(alpn) = config.param("alpn") {
        tls["alpn"] = json!(alpn.split(',').map(str::trim).collect::<Vec<_>>());
    }
    if let Some(fingerprint) = config.param("fingerprint") {
        tls["utls"] = json!({ "enabled": true, "fingerprint": fingerprint });
    }
    if config.param("security") == Some("reality") {
        tls["reality"] = json!({
            "enabled": true,
            "public_key": config.param("public_key").unwrap_or_default(),
            "short_id": config.param("short_id").unwrap_or_default(),
        });
    }
    tls
}

/// Build a transport object, `None` for plain TCP.
fn build_sing_box_transport(config: &ProxyConfig) -> Option<Value> {
    let transport = match config.param("network")? {
        "ws" => {
            let mut transport = json!({ "type": "ws" });
            if let Some(path) = config.param("path") {
                transport["path"] = json!(path);
            }
            if let Some(host) = config.param("host_header") {
                transport["headers"] = json!({ "Host": host });
            }
            transport
        }
        "httpupgrade" => {
            let mut transport = json!({ "type": "httpupgrade" });
            if let Some(path) = config.param("path") {
                transport["path"] = json!(path);
            }
            if let Some(host) = config.param("host_header") {
                transport["host"] = json!(host);
            }
            transport
        }
        "h2" | "http" => {
            let mut transport = json!({ "type": "http" });
            if let Some(path) = config.param("path") {
                transport["path"] = json!(path);
            }
            if let Some(host) = config.param("host_header") {
                transport["host"] = json!([host]);
            }
            transport
        }
        "grpc" => json!({
            "type": "grpc",
            "service_name": config.param("service_name").unwrap_or_default(),
        }),
        _ => return None,
    };
    Some(transport)
}

/// One sing-box outbound, `None` for protocols sing-box does not speak.
pub fn proxy_to_outbound(config: &ProxyConfig, tag: &str) -> Option<Value> {
    let p = |k: &str| config.param(k).unwrap_or_default();
    let mut outbound = match config.proxy_type {
        ProxyType::Shadowsocks => {
            let mut outbound = json!({
                "type": "shadowsocks",
                "method": p("method"),
                "password": p("password"),
            });
            if let Some(plugin) = config.param("plugin") {
                outbound["plugin"] = json!(plugin);
                outbound["plugin_opts"] = json!(p("plugin_opts"));
            }
            outbound
        }
        ProxyType::ShadowsocksR => return None,
        ProxyType::VMess => json!({
            "type": "vmess",
            "uuid": p("uuid"),
            "alter_id": config.param("alter_id").and_then(|a| a.parse::<u64>().ok()).unwrap_or(0),
            "security": config.param("cipher").unwrap_or("auto"),
        }),
        ProxyType::Vless => {
            let mut outbound = json!({ "type": "vless", "uuid": p("uuid") });
            if let Some(flow) = config.param("flow") {
                outbound["flow"] = json!(flow);
            }
            outbound
        }
        ProxyType::Trojan => json!({ "type": "trojan", "password": p("password") }),
        ProxyType::Hysteria => {
            let mut outbound = json!({ "type": "hysteria", "auth_str": p("auth") });
            for (param, field) in [("up_mbps", "up_mbps"), ("down_mbps", "down_mbps")] {
                if let Some(value) = config.param(param).and_then(|v| v.parse::<u64>().ok()) {
                    outbound[field] = json!(value);
                }
            }
            if let Some(obfs) = config.param("obfs") {
                outbound["obfs"] = json!(obfs);
            }
            outbound
        }
        ProxyType::Hysteria2 => {
            let mut outbound = json!({ "type": "hysteria2", "password": p("password") });
            if let Some(obfs) = config.param("obfs") {
                outbound["obfs"] = json!({ "type": obfs, "password": p("obfs_param") });
            }
            outbound
        }
        ProxyType::Tuic => {
            let mut outbound = json!({
                "type": "tuic",
                "uuid": p("uuid"),
                "password": p("password"),
            });
            if let Some(cc) = config.param("congestion_control") {
                outbound["congestion_control"] = json!(cc);
            }
            if let Some(mode) = config.param("udp_relay_mode") {
                outbound["udp_relay_mode"] = json!(mode);
            }
            outbound
        }
        ProxyType::Socks5 => json!({ "type": "socks", "version": "5" }),
        ProxyType::HTTP | ProxyType::HTTPS => json!({ "type": "http" }),
    };

    outbound["tag"] = json!(tag);
    outbound["server"] = json!(config.hostname);
    outbound["server_port"] = json!(config.port);

    if matches!(
        config.proxy_type,
        ProxyType::Socks5 | ProxyType::HTTP | ProxyType::HTTPS
    ) {
        if let Some(username) = config.param("username") {
            outbound["username"] = json!(username);
        }
        if let Some(password) = config.param("password") {
            outbound["password"] = json!(password);
        }
    }
    if config.wants_tls() {
        outbound["tls"] = tls_object(config);
    }
    if let Some(transport) = build_sing_box_transport(config) {
        outbound["transport"] = transport;
    }
    Some(outbound)
}

/// Convert ranked entries to a sing-box configuration with a selector and
/// an urltest outbound over every node.
pub fn proxy_to_sing_box(entries: &[RankedEntry]) -> Result<String, OutputError> {
    let names = unique_names(entries);
    let mut outbounds = Vec::with_capacity(entries.len() + 3);
    let mut tags = Vec::with_capacity(entries.len());

    for (entry, name) in entries.iter().zip(names) {
        match proxy_to_outbound(&entry.config, &name) {
            Some(outbound) => {
                outbounds.push(outbound);
                tags.push(name);
            }
            None => debug!(
                "sing-box has no {} outbound, skipping {}",
                entry.config.proxy_type, name
            ),
        }
    }

    let mut selector_members = vec![AUTO_GROUP.to_string()];
    selector_members.extend(tags.iter().cloned());
    selector_members.push("direct".to_string());
    let auto_members = if tags.is_empty() {
        vec!["direct".to_string()]
    } else {
        tags
    };

    outbounds.push(json!({
        "type": "selector",
        "tag": SELECT_GROUP,
        "outbounds": selector_members,
        "default": AUTO_GROUP,
    }));
    outbounds.push(json!({
        "type": "urltest",
        "tag": AUTO_GROUP,
        "outbounds": auto_members,
        "url": TEST_URL,
        "interval": "5m",
    }));
    outbounds.push(json!({ "type": "direct", "tag": "direct" }));

    let mut body = serde_json::to_string_pretty(&json!({ "outbounds": outbounds })).map_err(|e| {
        OutputError::Serialize {
            format: "singbox",
            message: e.to_string(),
        }
    })?;
    body.push('\n');
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestResult;
    use chrono::Utc;

    fn entry(config: ProxyConfig) -> RankedEntry {
        let result = TestResult::success(&config.identity(), 10, Utc::now());
        RankedEntry::new(config, result)
    }

    #[test]
    fn test_trojan_outbound_with_ws() {
        let mut config = ProxyConfig::new(ProxyType::Trojan, "t.example", 443).with_remark("T");
        config.set_param("password", "pw");
        config.set_param("network", "ws");
        config.set_param("path", "/ws");
        config.set_param("host_header", "cdn.example");

        let outbound = proxy_to_outbound(&config, "T").unwrap();
        assert_eq!(outbound["type"], "trojan");
        assert_eq!(outbound["server_port"], 443);
        assert_eq!(outbound["tls"]["server_name"], "t.example");
        assert_eq!(outbound["transport"]["type"], "ws");
        assert_eq!(outbound["transport"]["headers"]["Host"], "cdn.example");
    }

    #[test]
    fn test_ssr_is_skipped() {
        let mut ssr = ProxyConfig::new(ProxyType::ShadowsocksR, "r.example", 443);
        ssr.set_param("method", "aes-256-cfb");
        let socks = ProxyConfig::new(ProxyType::Socks5, "s.example", 1080).with_remark("S");

        let body = proxy_to_sing_box(&[entry(ssr), entry(socks)]).unwrap();
        let doc: Value = serde_json::from_str(&body).unwrap();
        let outbounds = doc["outbounds"].as_array().unwrap();
        assert_eq!(outbounds.len(), 4);
        assert_eq!(outbounds[0]["type"], "socks");
        assert_eq!(outbounds[1]["tag"], "Proxy");
        assert_eq!(outbounds[2]["outbounds"], json!(["S"]));
    }
}
