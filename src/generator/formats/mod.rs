pub mod base64;
pub mod clash;
pub mod csv;
pub mod html;
pub mod quanx;
pub mod singbox;
pub mod single;
pub mod surge;

// Re-export all format converters
pub use self::base64::proxy_to_base64;
pub use clash::proxy_to_clash;
pub use csv::proxy_to_csv;
pub use html::proxy_to_html;
pub use quanx::proxy_to_quan_x;
pub use singbox::proxy_to_sing_box;
pub use single::{proxy_to_single, proxy_to_uri};
pub use surge::proxy_to_surge;

use std::collections::HashSet;

use crate::models::RankedEntry;

/// Group names used by the client config formats.
pub(crate) const SELECT_GROUP: &str = "Proxy";
pub(crate) const AUTO_GROUP: &str = "Auto";
pub(crate) const TEST_URL: &str = "http://www.gstatic.com/generate_204";
pub(crate) const TEST_INTERVAL: u32 = 300;

/// Node names for client configs, which require them to be unique.
///
/// Duplicates get a ` 2`, ` 3`, ... suffix in list order, so the mapping
/// depends only on the entries.
pub(crate) fn unique_names(entries: &[RankedEntry]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    entries
        .iter()
        .map(|entry| {
            let base = sanitize_name(&entry.config.display_remark());
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{} {}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

/// Strip characters that break the line-based formats.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            ',' | '=' | '\n' | '\r' => ' ',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "node".to_string()
    } else {
        cleaned.to_string()
    }
}
