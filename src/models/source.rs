use serde::{Deserialize, Serialize};

/// Where a source's text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Fetched over HTTP(S).
    Url,
    /// Text is scraped by an external collaborator and handed in.
    Channel,
}

/// A feed supplying raw endpoint text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// URL for `Url` sources, channel reference for `Channel` sources.
    pub location: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub disabled: bool,
}

impl Source {
    pub fn url(location: &str) -> Self {
        Source {
            location: location.trim().to_string(),
            kind: SourceKind::Url,
            consecutive_failures: 0,
            disabled: false,
        }
    }

    pub fn channel(reference: &str) -> Self {
        Source {
            location: reference.trim().to_string(),
            kind: SourceKind::Channel,
            consecutive_failures: 0,
            disabled: false,
        }
    }

    /// Parse one line of a source list. Returns `None` for blanks and comments.
    ///
    /// `channel:<ref>` and `tg:<ref>` denote channels, everything else is a URL.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        if let Some(reference) = line
            .strip_prefix("channel:")
            .or_else(|| line.strip_prefix("tg:"))
        {
            let reference = reference.trim();
            if reference.is_empty() {
                return None;
            }
            return Some(Source::channel(reference));
        }
        Some(Source::url(line))
    }
}

/// Raw text fetched from one source, handed from the fetcher to the parser.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub text: String,
    pub source: String,
    /// Position of the source in the source list; drives stable ordering.
    pub source_index: usize,
}
