use base64::{engine::general_purpose, Engine as _};

/// Encodes a string to Base64 format.
pub fn base64_encode(input: &str) -> String {
    general_purpose::STANDARD.encode(input)
}

/// Decodes a Base64 string to its original form.
///
/// Accepts both the standard and the URL-safe alphabet, with or without
/// padding, and ignores embedded whitespace (feeds often wrap long blobs).
///
/// # Returns
/// The decoded text, or `None` if the input is not Base64 or does not
/// decode to UTF-8.
pub fn base64_decode(input: &str) -> Option<String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    let unpadded = compact.trim_end_matches('=');

    let bytes = if unpadded.contains('-') || unpadded.contains('_') {
        general_purpose::URL_SAFE_NO_PAD.decode(unpadded).ok()?
    } else {
        general_purpose::STANDARD_NO_PAD.decode(unpadded).ok()?
    };
    String::from_utf8(bytes).ok()
}

/// Whether the string consists solely of Base64 alphabet characters
/// (either alphabet) plus optional padding and whitespace.
pub fn looks_like_base64(input: &str) -> bool {
    let mut seen = 0usize;
    for c in input.chars() {
        if c.is_whitespace() || c == '=' {
            continue;
        }
        if !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '-' | '_')) {
            return false;
        }
        seen += 1;
    }
    seen > 0
}

/// Encodes a string to URL-safe Base64 format without padding.
pub fn url_safe_base64_encode(input: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_both_alphabets() {
        let text = "method:pa?ss>word";
        assert_eq!(base64_decode(&base64_encode(text)).as_deref(), Some(text));
        assert_eq!(
            base64_decode(&url_safe_base64_encode(text)).as_deref(),
            Some(text)
        );
    }

    #[test]
    fn test_decode_ignores_wrapping() {
        let encoded = base64_encode("ss://a\nss://b\n");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("{}\r\n{}\n", head, tail);
        assert_eq!(base64_decode(&wrapped).as_deref(), Some("ss://a\nss://b\n"));
    }

    #[test]
    fn test_decode_rejects_plain_text() {
        assert_eq!(base64_decode("vmess://not base64"), None);
        assert!(!looks_like_base64("hello world!"));
    }
}
