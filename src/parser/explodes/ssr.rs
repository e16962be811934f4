use crate::error::ParseError;
use crate::models::{ProxyConfig, ProxyType};
use crate::utils::base64::base64_decode;
use crate::utils::url::parse_query;

/// Parse a ShadowsocksR link into a ProxyConfig
///
/// Format: `ssr://BASE64(host:port:protocol:method:obfs:BASE64(password)/?obfsparam=..&protoparam=..&remarks=..)`
pub fn explode_ssr(ssr: &str) -> Result<ProxyConfig, ParseError> {
    let encoded = ssr
        .strip_prefix("ssr://")
        .ok_or_else(|| ParseError::new(ssr, "not an ssr link"))?;
    let decoded = base64_decode(encoded).ok_or_else(|| ParseError::new(ssr, "undecodable body"))?;

    let (main, query) = match decoded.split_once("/?") {
        Some((main, query)) => (main, Some(query)),
        None => match decoded.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (decoded.as_str(), None),
        },
    };

    // host may be an IPv6 literal, so split from the right
    let mut fields = main.trim_end_matches('/').rsplitn(6, ':');
    let password_b64 = fields.next().unwrap_or_default();
    let obfs = fields.next().unwrap_or_default();
    let method = fields.next().unwrap_or_default();
    let protocol = fields.next().unwrap_or_default();
    let port = fields.next().unwrap_or_default();
    let host = fields.next().unwrap_or_default();

    if host.is_empty() || method.is_empty() {
        return Err(ParseError::new(ssr, "missing fields"));
    }
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ParseError::new(ssr, "invalid port"))?;
    let password =
        base64_decode(password_b64).ok_or_else(|| ParseError::new(ssr, "undecodable password"))?;

    let mut config = ProxyConfig::new(ProxyType::ShadowsocksR, host, port);
    config.set_param("method", method.to_ascii_lowercase());
    config.set_param("password", password);
    config.set_param("protocol", protocol);
    config.set_param("obfs", obfs);

    if let Some(query) = query {
        let params = parse_query(query);
        let decode = |key: &str| {
            params
                .get(key)
                .and_then(|v| base64_decode(v))
                .unwrap_or_default()
        };
        config.set_param("obfs_param", decode("obfsparam"));
        config.set_param("protocol_param", decode("protoparam"));
        config.remark = decode("remarks").trim().to_string();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::base64::url_safe_base64_encode;

    #[test]
    fn test_ssr_link() {
        let body = format!(
            "example.com:8443:auth_aes128_md5:aes-256-cfb:tls1.2_ticket_auth:{}/?obfsparam={}&remarks={}",
            url_safe_base64_encode("pw"),
            url_safe_base64_encode("cdn.example.com"),
            url_safe_base64_encode("HK 01"),
        );
        let link = format!("ssr://{}", url_safe_base64_encode(&body));
        let config = explode_ssr(&link).unwrap();
        assert_eq!(config.hostname, "example.com");
        assert_eq!(config.port, 8443);
        assert_eq!(config.param("protocol"), Some("auth_aes128_md5"));
        assert_eq!(config.param("obfs"), Some("tls1.2_ticket_auth"));
        assert_eq!(config.param("password"), Some("pw"));
        assert_eq!(config.param("obfs_param"), Some("cdn.example.com"));
        assert_eq!(config.remark, "HK 01");
    }

    #[test]
    fn test_ssr_bad_port() {
        let body = format!("h:notaport:origin:aes-256-cfb:plain:{}", url_safe_base64_encode("pw"));
        assert!(explode_ssr(&format!("ssr://{}", url_safe_base64_encode(&body))).is_err());
    }
}
