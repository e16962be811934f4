use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::explodes::{self, clash::explode_clash, scheme_to_type};
use crate::error::ParseError;
use crate::models::{ProxyConfig, ProxyType, RawEntry};
use crate::utils::base64::{base64_decode, looks_like_base64};

/// Levels of base64 nesting followed before giving up.
const MAX_NESTING: u8 = 2;

/// Shortest standalone token considered as a nested base64 blob.
const MIN_BLOB_LEN: usize = 16;

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(vmess|vless|ssr|ss|trojan|hysteria2|hysteria|hy2|tuic|socks5|socks|https|http)://[^\s<>"'`]+"#,
    )
    .unwrap()
});

static HTTP_PROXY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://([^/@\s#?]+@)?(\[[0-9a-f:.]+\]|[a-z0-9.\-]+):\d{1,5}/?(#.*)?$").unwrap()
});

/// Result of scanning one text.
#[derive(Debug, Default)]
pub struct ParseReport {
    /// Parsed entries in order of appearance.
    pub configs: Vec<ProxyConfig>,
    pub errors: Vec<ParseError>,
    /// Tokens that are neither entries nor recognizable-but-broken entries.
    pub ignored: usize,
}

impl ParseReport {
    fn push(&mut self, parsed: Result<ProxyConfig, ParseError>) {
        match parsed {
            Ok(config) => self.configs.push(config),
            Err(err) => {
                debug!("Dropping malformed entry: {}", err);
                self.errors.push(err);
            }
        }
    }

    /// Append another report, keeping order.
    pub fn merge(&mut self, other: ParseReport) {
        self.configs.extend(other.configs);
        self.errors.extend(other.errors);
        self.ignored += other.ignored;
    }
}

/// Scan `text` for endpoint entries.
///
/// A whole-text base64 blob is decoded first; a Clash YAML document is read
/// through its `proxies` list; anything else is scanned for share links.
pub fn parse(text: &str) -> ParseReport {
    let mut report = ParseReport::default();
    scan(text, 0, &mut report);
    report
}

/// Like [`parse`], but keeps errors interleaved with entries in order of
/// appearance. Ignored text is dropped.
pub fn parse_entries(text: &str) -> Vec<Result<ProxyConfig, ParseError>> {
    let mut entries = Vec::new();
    scan_with(text, 0, &mut |parsed| entries.push(parsed), &mut 0);
    entries
}

/// Parse fetched texts in source-list order.
pub fn parse_all(entries: &[RawEntry]) -> ParseReport {
    let mut ordered: Vec<&RawEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.source_index);

    let mut report = ParseReport::default();
    for entry in ordered {
        let parsed = parse(&entry.text);
        debug!(
            "Source '{}': {} entries, {} errors, {} ignored",
            entry.source,
            parsed.configs.len(),
            parsed.errors.len(),
            parsed.ignored
        );
        report.merge(parsed);
    }
    report
}

fn scan(text: &str, depth: u8, report: &mut ParseReport) {
    let mut ignored = 0;
    let mut entries = Vec::new();
    scan_with(text, depth, &mut |parsed| entries.push(parsed), &mut ignored);
    for parsed in entries {
        report.push(parsed);
    }
    report.ignored += ignored;
}

fn scan_with(
    text: &str,
    depth: u8,
    sink: &mut dyn FnMut(Result<ProxyConfig, ParseError>),
    ignored: &mut usize,
) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }

    if depth < MAX_NESTING && !trimmed.contains("://") && looks_like_base64(trimmed) {
        if let Some(decoded) = base64_decode(trimmed) {
            scan_with(&decoded, depth + 1, sink, ignored);
            return;
        }
    }

    if trimmed.contains("proxies:") || trimmed.contains("Proxy:") {
        if let Some(clash) = explode_clash(trimmed) {
            *ignored += clash.ignored;
            for parsed in clash.parsed {
                sink(parsed);
            }
            return;
        }
    }

    let mut pos = 0;
    while let Some(found) = SCHEME_RE.find_at(text, pos) {
        scan_gap(&text[pos..found.start()], depth, sink, ignored);

        let mut end = found.end();
        if found.as_str().contains('#') {
            end = extend_remark(text, end);
        }
        let token = text[found.start()..end].trim_end();
        pos = end;

        match classify(token) {
            Some((proxy_type, link)) => sink(explodes::explode(proxy_type, &link)),
            None => *ignored += 1,
        }
    }
    scan_gap(&text[pos..], depth, sink, ignored);
}

/// Remarks may contain spaces (`trojan://..#Hong Kong 01`). When a link
/// with a fragment is the only thing left on its line, the rest of the
/// line belongs to the remark.
fn extend_remark(text: &str, end: usize) -> usize {
    let line_end = text[end..].find('\n').map_or(text.len(), |i| end + i);
    let rest = &text[end..line_end];
    if rest.contains("://") || rest.contains(|c| matches!(c, '<' | '>' | '"' | '\'' | '`')) {
        end
    } else {
        line_end
    }
}

/// Decide which parser a scheme-prefixed token goes to, normalizing the
/// scheme to lowercase. `None` for ordinary web links.
fn classify(token: &str) -> Option<(ProxyType, String)> {
    let (scheme, rest) = token.split_once("://")?;
    let proxy_type = scheme_to_type(scheme)?;
    let token = token.replace("&amp;", "&");
    if matches!(proxy_type, ProxyType::HTTP | ProxyType::HTTPS) && !HTTP_PROXY_RE.is_match(&token) {
        return None;
    }
    let rest = rest.replace("&amp;", "&");
    Some((proxy_type, format!("{}://{}", scheme.to_ascii_lowercase(), rest)))
}

/// Text between links: standalone base64 tokens may hide another
/// subscription; everything else is ignored.
fn scan_gap(
    gap: &str,
    depth: u8,
    sink: &mut dyn FnMut(Result<ProxyConfig, ParseError>),
    ignored: &mut usize,
) {
    for token in gap.split_whitespace() {
        if depth < MAX_NESTING && token.len() >= MIN_BLOB_LEN && looks_like_base64(token) {
            if let Some(decoded) = base64_decode(token).filter(|d| d.contains("://")) {
                scan_with(&decoded, depth + 1, sink, ignored);
                continue;
            }
        }
        *ignored += 1;
    }
}
