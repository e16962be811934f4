use serde_json::Value;

use super::{apply_transport_params, normalize_uuid, split_link};
use crate::error::ParseError;
use crate::models::{ProxyConfig, ProxyType};
use crate::utils::base64::base64_decode;

/// Read a v2rayN field that may be encoded as a string or a number.
fn json_field(json: &Value, key: &str) -> String {
    match &json[key] {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Parse a VMess link into a ProxyConfig
///
/// The common form is the v2rayN `vmess://BASE64(JSON)`; the Xray
/// `vmess://uuid@host:port?type=ws&security=tls#remark` form is accepted
/// as a fallback.
pub fn explode_vmess(vmess: &str) -> Result<ProxyConfig, ParseError> {
    let encoded = vmess
        .strip_prefix("vmess://")
        .ok_or_else(|| ParseError::new(vmess, "not a vmess link"))?;

    if encoded.contains('@') {
        return explode_vmess_url(vmess);
    }

    let decoded =
        base64_decode(encoded).ok_or_else(|| ParseError::new(vmess, "undecodable body"))?;
    let json: Value = serde_json::from_str(&decoded)
        .map_err(|e| ParseError::new(vmess, format!("invalid JSON: {}", e)))?;

    let add = json_field(&json, "add");
    let id = json_field(&json, "id");
    if add.is_empty() || id.is_empty() {
        return Err(ParseError::new(vmess, "missing address or id"));
    }
    let port = json_field(&json, "port")
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ParseError::new(vmess, "invalid port"))?;

    let mut config =
        ProxyConfig::new(ProxyType::VMess, &add, port).with_remark(&json_field(&json, "ps"));
    config.set_param("uuid", normalize_uuid(&id));

    let aid = json_field(&json, "aid");
    if !aid.is_empty() && aid != "0" {
        config.set_param("alter_id", aid);
    }
    let network = json_field(&json, "net").to_ascii_lowercase();
    if !network.is_empty() && network != "tcp" {
        config.set_param("network", network);
    }
    let header_type = json_field(&json, "type");
    if !header_type.is_empty() && header_type != "none" {
        config.set_param("header_type", header_type);
    }

    let mut host = json_field(&json, "host");
    let mut path = json_field(&json, "path");
    // version 1 packed "host;path" into the host field
    if json_field(&json, "v") != "2" {
        if let Some((h, p)) = host.clone().split_once(';') {
            host = h.to_string();
            path = p.to_string();
        }
    }
    config.set_param("host_header", host);
    config.set_param("path", path);

    let tls = json_field(&json, "tls").to_ascii_lowercase();
    if tls == "tls" || tls == "reality" {
        config.set_param("security", tls);
    }
    config.set_param("sni", json_field(&json, "sni").to_ascii_lowercase());
    config.set_param("alpn", json_field(&json, "alpn"));
    config.set_param("fingerprint", json_field(&json, "fp"));

    let cipher = json_field(&json, "scy");
    if !cipher.is_empty() && cipher != "auto" {
        config.set_param("cipher", cipher);
    }

    Ok(config)
}

fn explode_vmess_url(vmess: &str) -> Result<ProxyConfig, ParseError> {
    let parts = split_link(vmess)?;
    if parts.user.is_empty() {
        return Err(ParseError::new(vmess, "missing uuid"));
    }
    let port = parts.port_or(0, vmess)?;

    let mut config = ProxyConfig::new(ProxyType::VMess, &parts.host, port).with_remark(&parts.remark);
    config.set_param("uuid", normalize_uuid(&parts.user));
    if let Some(aid) = parts.first(&["alterId", "aid"]).filter(|a| *a != "0") {
        config.set_param("alter_id", aid);
    }
    if let Some(cipher) = parts.first(&["encryption", "scy"]).filter(|c| *c != "auto") {
        config.set_param("cipher", cipher);
    }
    apply_transport_params(&mut config, &parts);
    if config.param("security") == Some("none") {
        config.params.remove("security");
    }
    Ok(config)
}
