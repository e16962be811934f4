use crate::generator::formats::single::entry_uri;
use crate::models::RankedEntry;

const HEADER: [&str; 13] = [
    "rank",
    "protocol",
    "host",
    "port",
    "remark",
    "country",
    "city",
    "asn",
    "reachable",
    "latency_ms",
    "error",
    "reliability",
    "uri",
];

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Tabular summary of the ranked entries, one row per entry in rank order.
pub fn proxy_to_csv(entries: &[RankedEntry]) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');

    for (rank, entry) in entries.iter().enumerate() {
        let config = &entry.config;
        let result = &entry.result;
        let row = [
            (rank + 1).to_string(),
            config.proxy_type.as_str().to_string(),
            config.hostname.clone(),
            config.port.to_string(),
            config.remark.clone(),
            result.country.clone().unwrap_or_default(),
            result.city.clone().unwrap_or_default(),
            result.asn.map(|a| a.to_string()).unwrap_or_default(),
            result.success.to_string(),
            result.latency_ms.map(|l| l.to_string()).unwrap_or_default(),
            result.error_kind.map(|k| k.to_string()).unwrap_or_default(),
            entry
                .reliability
                .map(|r| format!("{:.3}", r))
                .unwrap_or_default(),
            entry_uri(config),
        ];
        let line = row.iter().map(|f| escape(f)).collect::<Vec<_>>().join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
