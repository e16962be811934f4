use crate::error::ParseError;
use crate::models::{ProxyConfig, ProxyType};
use crate::utils::base64::base64_decode;
use crate::utils::url::{parse_query, split_fragment, split_host_port, url_decode};

/// Parse a Shadowsocks link into a ProxyConfig
///
/// Accepts SIP002 (`ss://BASE64(method:password)@host:port/?plugin=..#remark`),
/// the plain-userinfo variant used for 2022 ciphers
/// (`ss://method:password@host:port`), and the legacy fully encoded form
/// (`ss://BASE64(method:password@host:port)#remark`).
pub fn explode_ss(ss: &str) -> Result<ProxyConfig, ParseError> {
    let content = ss
        .strip_prefix("ss://")
        .ok_or_else(|| ParseError::new(ss, "not an ss link"))?;
    let content = content.replace("/?", "?");

    let (content, remark) = split_fragment(&content);

    let (main, query) = match content.split_once('?') {
        Some((main, query)) => (main, Some(query)),
        None => (content, None),
    };

    let (userinfo, server) = match main.rsplit_once('@') {
        Some((userinfo, server)) => {
            let userinfo = if userinfo.contains(':') {
                url_decode(userinfo)
            } else {
                base64_decode(&url_decode(userinfo))
                    .ok_or_else(|| ParseError::new(ss, "undecodable userinfo"))?
            };
            (userinfo, server.to_string())
        }
        None => {
            let decoded = base64_decode(&url_decode(main))
                .ok_or_else(|| ParseError::new(ss, "undecodable legacy body"))?;
            let (userinfo, server) = decoded
                .rsplit_once('@')
                .ok_or_else(|| ParseError::new(ss, "missing server in legacy body"))?;
            (userinfo.to_string(), server.to_string())
        }
    };

    let (method, password) = userinfo
        .split_once(':')
        .ok_or_else(|| ParseError::new(ss, "missing method:password"))?;
    if method.is_empty() || password.is_empty() {
        return Err(ParseError::new(ss, "empty method or password"));
    }

    let (host, port) =
        split_host_port(&server).ok_or_else(|| ParseError::new(ss, "invalid host:port"))?;

    let mut config = ProxyConfig::new(ProxyType::Shadowsocks, &host, port).with_remark(&remark);
    config.set_param("method", method.to_ascii_lowercase());
    config.set_param("password", password);

    if let Some(query) = query {
        let params = parse_query(query);
        if let Some(plugin) = params.get("plugin") {
            match plugin.split_once(';') {
                Some((name, opts)) => {
                    config.set_param("plugin", name);
                    config.set_param("plugin_opts", opts);
                }
                None => config.set_param("plugin", plugin.as_str()),
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::base64::{base64_encode, url_safe_base64_encode};

    #[test]
    fn test_sip002() {
        let link = format!(
            "ss://{}@1.2.3.4:8388/?plugin=obfs-local%3Bobfs%3Dhttp%3Bobfs-host%3Dexample.com#Node%201",
            url_safe_base64_encode("aes-256-gcm:secret")
        );
        let config = explode_ss(&link).unwrap();
        assert_eq!(config.hostname, "1.2.3.4");
        assert_eq!(config.port, 8388);
        assert_eq!(config.param("method"), Some("aes-256-gcm"));
        assert_eq!(config.param("password"), Some("secret"));
        assert_eq!(config.param("plugin"), Some("obfs-local"));
        assert_eq!(
            config.param("plugin_opts"),
            Some("obfs=http;obfs-host=example.com")
        );
        assert_eq!(config.remark, "Node 1");
    }

    #[test]
    fn test_legacy_and_sip002_share_identity() {
        let legacy = format!(
            "ss://{}#legacy",
            base64_encode("chacha20-ietf-poly1305:pw@example.com:443")
        );
        let sip002 = format!(
            "ss://{}@EXAMPLE.com:443#sip002",
            base64_encode("chacha20-ietf-poly1305:pw")
        );
        let a = explode_ss(&legacy).unwrap();
        let b = explode_ss(&sip002).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_plain_userinfo_2022() {
        let config =
            explode_ss("ss://2022-blake3-aes-128-gcm:YWJjZGVmZ2hpamtsbW5vcA%3D%3D@[::1]:443").unwrap();
        assert_eq!(config.hostname, "::1");
        assert_eq!(config.param("password"), Some("YWJjZGVmZ2hpamtsbW5vcA=="));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(explode_ss("ss://!!!@host:1").is_err());
        assert!(explode_ss(&format!("ss://{}@host", base64_encode("m:p"))).is_err());
    }
}
