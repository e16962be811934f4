use super::{apply_transport_params, split_link};
use crate::error::ParseError;
use crate::models::{ProxyConfig, ProxyType};

/// Parse a Trojan link into a ProxyConfig
///
/// Format: `trojan://password@host:port?sni=..&type=ws&path=..#remark`,
/// port defaults to 443.
pub fn explode_trojan(trojan: &str) -> Result<ProxyConfig, ParseError> {
    let parts = split_link(trojan)?;
    if parts.user.is_empty() {
        return Err(ParseError::new(trojan, "missing password"));
    }
    let port = parts.port_or(443, trojan)?;

    let mut config = ProxyConfig::new(ProxyType::Trojan, &parts.host, port).with_remark(&parts.remark);
    // some generators put the whole secret in userinfo unescaped, `pass:word`
    let password = match &parts.password {
        Some(rest) => format!("{}:{}", parts.user, rest),
        None => parts.user.clone(),
    };
    config.set_param("password", password);
    apply_transport_params(&mut config, &parts);
    // legacy trojan-go websocket flag
    if parts.flag("ws") && config.param("network").is_none() {
        config.set_param("network", "ws");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trojan_defaults() {
        let config = explode_trojan("trojan://secret@example.com#HK").unwrap();
        assert_eq!(config.port, 443);
        assert_eq!(config.param("password"), Some("secret"));
        assert_eq!(config.remark, "HK");
        assert!(config.wants_tls());
    }

    #[test]
    fn test_trojan_peer_and_ws() {
        let config = explode_trojan(
            "trojan://p%40ss@1.2.3.4:8443?peer=Cdn.Example.com&ws=1&wspath=%2Fws&allowInsecure=1",
        )
        .unwrap();
        assert_eq!(config.param("password"), Some("p@ss"));
        assert_eq!(config.param("sni"), Some("cdn.example.com"));
        assert_eq!(config.param("network"), Some("ws"));
        assert_eq!(config.param("path"), Some("/ws"));
        assert_eq!(config.param("insecure"), Some("1"));
        assert_eq!(config.tls_server_name(), "cdn.example.com");
    }

    #[test]
    fn test_trojan_without_password() {
        assert!(explode_trojan("trojan://example.com:443").is_err());
    }
}
