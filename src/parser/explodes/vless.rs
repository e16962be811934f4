use super::{apply_transport_params, normalize_uuid, split_link};
use crate::error::ParseError;
use crate::models::{ProxyConfig, ProxyType};

/// Parse a VLESS link into a ProxyConfig
///
/// Format: `vless://uuid@host:port?encryption=none&security=reality&sni=..&pbk=..#remark`
pub fn explode_vless(vless: &str) -> Result<ProxyConfig, ParseError> {
    let parts = split_link(vless)?;
    if parts.user.is_empty() {
        return Err(ParseError::new(vless, "missing uuid"));
    }
    let port = parts.port_or(443, vless)?;

    let mut config = ProxyConfig::new(ProxyType::Vless, &parts.host, port).with_remark(&parts.remark);
    config.set_param("uuid", normalize_uuid(&parts.user));
    apply_transport_params(&mut config, &parts);
    if config.param("security") == Some("none") {
        config.params.remove("security");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reality_link() {
        let config = explode_vless(
            "vless://B831381D-6324-4D53-AD4F-8CDA48B30811@1.2.3.4:443?encryption=none&security=reality&sni=www.microsoft.com&fp=chrome&pbk=abc&sid=01&type=tcp&flow=xtls-rprx-vision#US%20reality",
        )
        .unwrap();
        assert_eq!(config.param("uuid"), Some("b831381d-6324-4d53-ad4f-8cda48b30811"));
        assert_eq!(config.param("security"), Some("reality"));
        assert_eq!(config.param("sni"), Some("www.microsoft.com"));
        assert_eq!(config.param("public_key"), Some("abc"));
        assert_eq!(config.param("flow"), Some("xtls-rprx-vision"));
        assert_eq!(config.remark, "US reality");
        assert!(config.wants_tls());
    }

    #[test]
    fn test_param_order_does_not_change_identity() {
        let a = explode_vless("vless://id@h.example:443?sni=s.example&type=ws&path=%2Fa").unwrap();
        let b = explode_vless("vless://id@H.example:443?path=%2Fa&type=ws&sni=s.example").unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_missing_uuid() {
        assert!(explode_vless("vless://h.example:443").is_err());
    }
}
