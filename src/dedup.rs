//! Collapse entries describing the same endpoint.

use std::collections::HashMap;

use log::debug;

use crate::models::ProxyConfig;

/// Remove duplicate endpoints.
///
/// Entries are identical when their canonical identity matches (remarks
/// and descriptive parameters do not count). Of each group the entry with
/// the most parameters survives, the earliest one on ties. Output keeps
/// the position where each identity was first seen.
pub fn dedupe(configs: Vec<ProxyConfig>) -> Vec<ProxyConfig> {
    let total = configs.len();
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(total);
    let mut kept: Vec<ProxyConfig> = Vec::with_capacity(total);

    for config in configs {
        let identity = config.canonical_identity();
        match slots.get(&identity) {
            Some(&index) => {
                if config.completeness() > kept[index].completeness() {
                    kept[index] = config;
                }
            }
            None => {
                slots.insert(identity, kept.len());
                kept.push(config);
            }
        }
    }

    debug!("Deduplicated {} entries into {}", total, kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyType;

    fn trojan(host: &str, remark: &str) -> ProxyConfig {
        let mut config = ProxyConfig::new(ProxyType::Trojan, host, 443).with_remark(remark);
        config.set_param("password", "pw");
        config
    }

    #[test]
    fn test_keeps_most_complete_in_first_position() {
        let mut rich = trojan("a.example", "rich");
        rich.set_param("alpn", "h2");
        let configs = vec![
            trojan("A.example", "plain"),
            trojan("b.example", "other"),
            rich,
            trojan("a.example.", "late"),
        ];
        let deduped = dedupe(configs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].remark, "rich");
        assert_eq!(deduped[1].remark, "other");
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let deduped = dedupe(vec![trojan("a.example", "first"), trojan("a.example", "second")]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].remark, "first");
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let mut configs = Vec::new();
        for i in 0..20 {
            let mut config = trojan(&format!("h{}.example", i % 7), &format!("n{}", i));
            if i % 3 == 0 {
                config.set_param("sni", "sni.example");
            }
            if i % 4 == 0 {
                config.set_param("alpn", "h2");
            }
            configs.push(config);
        }
        let once = dedupe(configs);
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
    }
}
