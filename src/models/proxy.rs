//! Proxy model definitions
//!
//! Contains the canonical endpoint description produced by the parser and
//! consumed by every later stage of the pipeline.

use std::collections::BTreeMap;
use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Represents the type of a proxy.
/// This is the closed set of protocols the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Shadowsocks,
    ShadowsocksR,
    VMess,
    Vless,
    Trojan,
    Hysteria,
    Hysteria2,
    Tuic,
    Socks5,
    HTTP,
    HTTPS,
}

impl ProxyType {
    pub const ALL: [ProxyType; 11] = [
        ProxyType::Shadowsocks,
        ProxyType::ShadowsocksR,
        ProxyType::VMess,
        ProxyType::Vless,
        ProxyType::Trojan,
        ProxyType::Hysteria,
        ProxyType::Hysteria2,
        ProxyType::Tuic,
        ProxyType::Socks5,
        ProxyType::HTTP,
        ProxyType::HTTPS,
    ];

    /// Short lowercase name, used in identities, filters and file output.
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyType::Shadowsocks => "ss",
            ProxyType::ShadowsocksR => "ssr",
            ProxyType::VMess => "vmess",
            ProxyType::Vless => "vless",
            ProxyType::Trojan => "trojan",
            ProxyType::Hysteria => "hysteria",
            ProxyType::Hysteria2 => "hysteria2",
            ProxyType::Tuic => "tuic",
            ProxyType::Socks5 => "socks5",
            ProxyType::HTTP => "http",
            ProxyType::HTTPS => "https",
        }
    }

    /// Human-readable name, used for group names in client configs.
    pub fn display_name(self) -> &'static str {
        match self {
            ProxyType::Shadowsocks => "SS",
            ProxyType::ShadowsocksR => "SSR",
            ProxyType::VMess => "VMess",
            ProxyType::Vless => "VLESS",
            ProxyType::Trojan => "Trojan",
            ProxyType::Hysteria => "Hysteria",
            ProxyType::Hysteria2 => "Hysteria2",
            ProxyType::Tuic => "TUIC",
            ProxyType::Socks5 => "SOCKS5",
            ProxyType::HTTP => "HTTP",
            ProxyType::HTTPS => "HTTPS",
        }
    }

    /// Resolve a user-supplied protocol name (case-insensitive, common aliases accepted).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ss" | "shadowsocks" => Some(ProxyType::Shadowsocks),
            "ssr" | "shadowsocksr" => Some(ProxyType::ShadowsocksR),
            "vmess" => Some(ProxyType::VMess),
            "vless" => Some(ProxyType::Vless),
            "trojan" => Some(ProxyType::Trojan),
            "hysteria" | "hy" => Some(ProxyType::Hysteria),
            "hysteria2" | "hy2" => Some(ProxyType::Hysteria2),
            "tuic" => Some(ProxyType::Tuic),
            "socks" | "socks5" => Some(ProxyType::Socks5),
            "http" => Some(ProxyType::HTTP),
            "https" => Some(ProxyType::HTTPS),
            _ => None,
        }
    }

    /// Parameters that take part in the endpoint identity.
    ///
    /// Everything else in `ProxyConfig::params` is descriptive: two entries
    /// differing only there are the same endpoint.
    pub fn identity_keys(self) -> &'static [&'static str] {
        match self {
            ProxyType::Shadowsocks => &["method", "password"],
            ProxyType::ShadowsocksR => &["method", "password", "protocol", "obfs"],
            ProxyType::VMess | ProxyType::Vless => &["uuid", "sni"],
            ProxyType::Trojan | ProxyType::Hysteria2 => &["password", "sni"],
            ProxyType::Hysteria => &["auth", "sni"],
            ProxyType::Tuic => &["uuid", "password", "sni"],
            ProxyType::Socks5 | ProxyType::HTTP | ProxyType::HTTPS => &["username", "password"],
        }
    }

    /// Whether the protocol always runs over TLS.
    pub fn implies_tls(self) -> bool {
        matches!(
            self,
            ProxyType::Trojan
                | ProxyType::Hysteria
                | ProxyType::Hysteria2
                | ProxyType::Tuic
                | ProxyType::HTTPS
        )
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonicalized endpoint description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_type: ProxyType,
    pub hostname: String,
    pub port: u16,
    /// Decoded protocol fields, keyed by a shared vocabulary
    /// (`uuid`, `password`, `method`, `sni`, `network`, `path`, ...).
    pub params: BTreeMap<String, String>,
    /// The entry exactly as it appeared in the source (after decoding a
    /// surrounding base64 blob, if any).
    pub raw_uri: String,
    pub remark: String,
}

impl ProxyConfig {
    pub fn new(proxy_type: ProxyType, hostname: &str, port: u16) -> Self {
        ProxyConfig {
            proxy_type,
            hostname: normalize_host(hostname),
            port,
            params: BTreeMap::new(),
            raw_uri: String::new(),
            remark: String::new(),
        }
    }

    /// Insert a parameter, ignoring empty values so that completeness
    /// counts only carry real information.
    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.params.insert(key.to_string(), value.to_string());
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn with_remark(mut self, remark: &str) -> Self {
        self.remark = remark.trim().to_string();
        self
    }

    pub fn with_raw(mut self, raw: &str) -> Self {
        self.raw_uri = raw.trim().to_string();
        self
    }

    /// The canonical identity string:
    /// `protocol|host|port|k1=v1&k2=v2` over the sorted identity params.
    pub fn canonical_identity(&self) -> String {
        let mut identity_params: Vec<(&str, &str)> = self
            .proxy_type
            .identity_keys()
            .iter()
            .filter_map(|key| self.param(key).map(|value| (*key, value)))
            .collect();
        identity_params.sort_unstable();

        let joined = identity_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "{}|{}|{}|{}",
            self.proxy_type.as_str(),
            self.hostname,
            self.port,
            joined
        )
    }

    /// Stable hex digest of the canonical identity, used as the history key.
    pub fn identity(&self) -> String {
        let digest = Md5::digest(self.canonical_identity().as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Number of non-empty parameters; higher means more complete.
    pub fn completeness(&self) -> usize {
        self.params.len()
    }

    /// Whether a probe should complete a TLS handshake for this entry.
    pub fn wants_tls(&self) -> bool {
        if self.proxy_type.implies_tls() {
            return true;
        }
        matches!(self.param("security"), Some("tls") | Some("reality"))
    }

    /// Server name to present during a TLS handshake.
    pub fn tls_server_name(&self) -> &str {
        self.param("sni").unwrap_or(&self.hostname)
    }

    /// `host:port` with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Remark, or `host:port` when the source gave none.
    pub fn display_remark(&self) -> String {
        if self.remark.is_empty() {
            self.address()
        } else {
            self.remark.clone()
        }
    }
}

/// Lowercase, strip IPv6 brackets and a trailing root dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trojan(host: &str, password: &str) -> ProxyConfig {
        let mut config = ProxyConfig::new(ProxyType::Trojan, host, 443);
        config.set_param("password", password);
        config
    }

    #[test]
    fn test_identity_ignores_remark_and_host_case() {
        let a = trojan("Example.COM", "secret").with_remark("first");
        let b = trojan("example.com.", "secret").with_remark("second");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_ignores_descriptive_params() {
        let a = trojan("example.com", "secret");
        let mut b = trojan("example.com", "secret");
        b.set_param("alpn", "h2");
        assert_eq!(a.identity(), b.identity());
        assert!(b.completeness() > a.completeness());
    }

    #[test]
    fn test_identity_distinguishes_credentials() {
        assert_ne!(
            trojan("example.com", "one").identity(),
            trojan("example.com", "two").identity()
        );
    }

    #[test]
    fn test_ipv6_host_is_normalized() {
        let config = ProxyConfig::new(ProxyType::Socks5, "[2001:DB8::1]", 1080);
        assert_eq!(config.hostname, "2001:db8::1");
        assert_eq!(config.address(), "[2001:db8::1]:1080");
    }

    #[test]
    fn test_empty_params_are_not_stored() {
        let mut config = ProxyConfig::new(ProxyType::VMess, "a.example", 80);
        config.set_param("path", "  ");
        assert!(config.params.is_empty());
    }

    #[test]
    fn test_from_name_aliases() {
        assert_eq!(ProxyType::from_name("HY2"), Some(ProxyType::Hysteria2));
        assert_eq!(ProxyType::from_name("shadowsocks"), Some(ProxyType::Shadowsocks));
        assert_eq!(ProxyType::from_name("wireguard"), None);
    }
}
