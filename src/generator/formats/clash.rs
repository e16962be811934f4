use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use super::{unique_names, AUTO_GROUP, SELECT_GROUP, TEST_INTERVAL, TEST_URL};
use crate::error::OutputError;
use crate::models::{ProxyConfig, ProxyType, RankedEntry};

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn string(value: &str) -> Value {
    Value::String(value.to_string())
}

fn insert_str(map: &mut Mapping, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        map.insert(key(name), string(value));
    }
}

fn insert_bool(map: &mut Mapping, name: &str, value: bool) {
    if value {
        map.insert(key(name), Value::Bool(true));
    }
}

fn string_list<S: AsRef<str>>(items: &[S]) -> Value {
    Value::Sequence(items.iter().map(|s| string(s.as_ref())).collect())
}

fn alpn(config: &ProxyConfig) -> Option<Value> {
    let alpn = config.param("alpn")?;
    let items: Vec<&str> = alpn.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    (!items.is_empty()).then(|| string_list(items.as_slice()))
}

fn insert_tls_common(map: &mut Mapping, config: &ProxyConfig, sni_key: &str) {
    insert_str(map, sni_key, config.param("sni"));
    if let Some(alpn) = alpn(config) {
        map.insert(key("alpn"), alpn);
    }
    insert_bool(map, "skip-cert-verify", config.param("insecure").is_some());
}

fn insert_transport(map: &mut Mapping, config: &ProxyConfig) {
    let Some(network) = config.param("network") else {
        return;
    };
    map.insert(key("network"), string(network));
    match network {
        "ws" | "httpupgrade" => {
            let mut opts = Mapping::new();
            insert_str(&mut opts, "path", config.param("path"));
            if let Some(host) = config.param("host_header") {
                let mut headers = Mapping::new();
                headers.insert(key("Host"), string(host));
                opts.insert(key("headers"), Value::Mapping(headers));
            }
            map.insert(key("ws-opts"), Value::Mapping(opts));
        }
        "grpc" => {
            let mut opts = Mapping::new();
            insert_str(&mut opts, "grpc-service-name", config.param("service_name"));
            map.insert(key("grpc-opts"), Value::Mapping(opts));
        }
        "h2" => {
            let mut opts = Mapping::new();
            insert_str(&mut opts, "path", config.param("path"));
            if let Some(host) = config.param("host_header") {
                opts.insert(key("host"), string_list(&[host]));
            }
            map.insert(key("h2-opts"), Value::Mapping(opts));
        }
        _ => {}
    }
}

/// `obfs=http;obfs-host=x` as a Clash `plugin-opts` mapping.
fn plugin_opts(opts: &str) -> Mapping {
    let mut map = Mapping::new();
    for item in opts.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('=') {
            Some((name, value)) => {
                let name = match name {
                    "obfs" => "mode",
                    "obfs-host" => "host",
                    other => other,
                };
                map.insert(key(name), string(value));
            }
            None => {
                map.insert(key(item), Value::Bool(true));
            }
        }
    }
    map
}

/// Convert one proxy to a Clash proxy mapping.
pub fn proxy_to_clash_map(config: &ProxyConfig, name: &str) -> Mapping {
    let p = |k: &str| config.param(k);
    let mut map = Mapping::new();
    map.insert(key("name"), string(name));

    let type_name = match config.proxy_type {
        ProxyType::Shadowsocks => "ss",
        ProxyType::ShadowsocksR => "ssr",
        ProxyType::VMess => "vmess",
        ProxyType::Vless => "vless",
        ProxyType::Trojan => "trojan",
        ProxyType::Hysteria => "hysteria",
        ProxyType::Hysteria2 => "hysteria2",
        ProxyType::Tuic => "tuic",
        ProxyType::Socks5 => "socks5",
        ProxyType::HTTP | ProxyType::HTTPS => "http",
    };
    map.insert(key("type"), string(type_name));
    map.insert(key("server"), string(&config.hostname));
    map.insert(key("port"), Value::Number(config.port.into()));

    match config.proxy_type {
        ProxyType::Shadowsocks => {
            insert_str(&mut map, "cipher", p("method"));
            insert_str(&mut map, "password", p("password"));
            if let Some(plugin) = p("plugin") {
                let plugin = match plugin {
                    "obfs-local" | "simple-obfs" => "obfs",
                    other => other,
                };
                map.insert(key("plugin"), string(plugin));
                if let Some(opts) = p("plugin_opts") {
                    map.insert(key("plugin-opts"), Value::Mapping(plugin_opts(opts)));
                }
            }
        }
        ProxyType::ShadowsocksR => {
            insert_str(&mut map, "cipher", p("method"));
            insert_str(&mut map, "password", p("password"));
            insert_str(&mut map, "protocol", p("protocol"));
            insert_str(&mut map, "obfs", p("obfs"));
            insert_str(&mut map, "protocol-param", p("protocol_param"));
            insert_str(&mut map, "obfs-param", p("obfs_param"));
        }
        ProxyType::VMess | ProxyType::Vless => {
            insert_str(&mut map, "uuid", p("uuid"));
            if config.proxy_type == ProxyType::VMess {
                let alter_id: u64 = p("alter_id").and_then(|a| a.parse().ok()).unwrap_or(0);
                map.insert(key("alterId"), Value::Number(alter_id.into()));
                map.insert(key("cipher"), string(p("cipher").unwrap_or("auto")));
            }
            insert_str(&mut map, "flow", p("flow"));
            insert_bool(&mut map, "tls", config.wants_tls());
            insert_tls_common(&mut map, config, "servername");
            insert_str(&mut map, "client-fingerprint", p("fingerprint"));
            if p("security") == Some("reality") {
                let mut reality = Mapping::new();
                insert_str(&mut reality, "public-key", p("public_key"));
                insert_str(&mut reality, "short-id", p("short_id"));
                map.insert(key("reality-opts"), Value::Mapping(reality));
            }
            insert_transport(&mut map, config);
        }
        ProxyType::Trojan => {
            insert_str(&mut map, "password", p("password"));
            insert_tls_common(&mut map, config, "sni");
            insert_str(&mut map, "client-fingerprint", p("fingerprint"));
            insert_transport(&mut map, config);
        }
        ProxyType::Hysteria => {
            insert_str(&mut map, "auth-str", p("auth"));
            insert_str(&mut map, "up", p("up_mbps"));
            insert_str(&mut map, "down", p("down_mbps"));
            insert_str(&mut map, "protocol", p("protocol"));
            insert_str(&mut map, "obfs", p("obfs"));
            insert_tls_common(&mut map, config, "sni");
        }
        ProxyType::Hysteria2 => {
            insert_str(&mut map, "password", p("password"));
            insert_str(&mut map, "obfs", p("obfs"));
            insert_str(&mut map, "obfs-password", p("obfs_param"));
            insert_tls_common(&mut map, config, "sni");
        }
        ProxyType::Tuic => {
            insert_str(&mut map, "uuid", p("uuid"));
            insert_str(&mut map, "password", p("password"));
            insert_str(&mut map, "congestion-controller", p("congestion_control"));
            insert_str(&mut map, "udp-relay-mode", p("udp_relay_mode"));
            insert_tls_common(&mut map, config, "sni");
        }
        ProxyType::Socks5 | ProxyType::HTTP | ProxyType::HTTPS => {
            insert_str(&mut map, "username", p("username"));
            insert_str(&mut map, "password", p("password"));
            if config.proxy_type == ProxyType::HTTPS {
                map.insert(key("tls"), Value::Bool(true));
                insert_tls_common(&mut map, config, "sni");
            }
        }
    }
    map
}

fn group(name: &str, kind: &str, members: Vec<String>) -> Value {
    let mut map = Mapping::new();
    map.insert(key("name"), string(name));
    map.insert(key("type"), string(kind));
    if kind == "url-test" {
        map.insert(key("url"), string(TEST_URL));
        map.insert(key("interval"), Value::Number(TEST_INTERVAL.into()));
    }
    let members = if members.is_empty() {
        vec!["DIRECT".to_string()]
    } else {
        members
    };
    map.insert(key("proxies"), string_list(members.as_slice()));
    Value::Mapping(map)
}

/// Convert ranked entries to a Clash configuration
///
/// Proxies keep their ranked order. A `select` group offers the automatic
/// `url-test` group, one `select` group per protocol and every node.
pub fn proxy_to_clash(entries: &[RankedEntry]) -> Result<String, OutputError> {
    let names = unique_names(entries);

    let mut by_protocol: BTreeMap<ProxyType, Vec<String>> = BTreeMap::new();
    let proxies: Vec<Value> = entries
        .iter()
        .zip(&names)
        .map(|(entry, name)| {
            by_protocol
                .entry(entry.config.proxy_type)
                .or_default()
                .push(name.clone());
            Value::Mapping(proxy_to_clash_map(&entry.config, name))
        })
        .collect();

    let mut select_members = vec![AUTO_GROUP.to_string()];
    select_members.extend(by_protocol.keys().map(|t| t.display_name().to_string()));
    select_members.extend(names.iter().cloned());

    let mut groups = vec![
        group(SELECT_GROUP, "select", select_members),
        group(AUTO_GROUP, "url-test", names.clone()),
    ];
    for (proxy_type, members) in by_protocol {
        groups.push(group(proxy_type.display_name(), "select", members));
    }

    let mut root = Mapping::new();
    root.insert(key("proxies"), Value::Sequence(proxies));
    root.insert(key("proxy-groups"), Value::Sequence(groups));
    root.insert(
        key("rules"),
        string_list(&[format!("MATCH,{}", SELECT_GROUP)]),
    );

    serde_yaml::to_string(&Value::Mapping(root)).map_err(|e| OutputError::Serialize {
        format: "clash",
        message: e.to_string(),
    })
}
