//! URL encoding/decoding utilities

use std::collections::HashMap;

/// Encodes a string using URL encoding
///
/// # Examples
/// ```
/// use subharvest::utils::url::url_encode;
///
/// let encoded = url_encode("Hello World!");
/// assert_eq!(encoded, "Hello%20World%21");
/// ```
pub fn url_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Decodes a URL-encoded string
///
/// Returns the original string if decoding fails.
///
/// # Examples
/// ```
/// use subharvest::utils::url::url_decode;
///
/// let decoded = url_decode("Hello%20World%21");
/// assert_eq!(decoded, "Hello World!");
/// ```
pub fn url_decode(input: &str) -> String {
    urlencoding::decode(input)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

/// Parse a query string (without the leading `?`) into a map.
/// Later duplicates win; keys are kept verbatim.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Split `rest#fragment` and url-decode the fragment.
pub fn split_fragment(input: &str) -> (&str, String) {
    match input.split_once('#') {
        Some((rest, fragment)) => (rest, url_decode(fragment)),
        None => (input, String::new()),
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub fn split_host_port(input: &str) -> Option<(String, u16)> {
    let input = input.trim().trim_end_matches('/');
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        (host, after.strip_prefix(':')?)
    } else {
        input.rsplit_once(':')?
    };
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:443"),
            Some(("example.com".to_string(), 443))
        );
        assert_eq!(
            split_host_port("[2001:db8::1]:8388/"),
            Some(("2001:db8::1".to_string(), 8388))
        );
        assert_eq!(split_host_port("example.com"), None);
        assert_eq!(split_host_port("example.com:0"), None);
        assert_eq!(split_host_port(":80"), None);
    }

    #[test]
    fn test_split_fragment_decodes() {
        let (rest, remark) = split_fragment("host:1#Hello%20World");
        assert_eq!(rest, "host:1");
        assert_eq!(remark, "Hello World");
    }
}
