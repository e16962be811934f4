use minijinja::{context, Environment};
use serde::Serialize;

use crate::error::OutputError;
use crate::models::{format_timestamp, OutputBundle};

const TEMPLATE_NAME: &str = "index.html";

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Proxy list</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; }
tr.down td { color: #999; }
</style>
</head>
<body>
<h1>Proxy list</h1>
<p>Generated {{ generated_at }}{% if partial %} (partial run){% endif %}.
{{ stats.total }} entries, {{ stats.reachable }} reachable{% if stats.avg_latency_ms is not none %}, average latency {{ stats.avg_latency_ms }} ms{% endif %}.</p>
<h2>By protocol</h2>
<ul>
{%- for name, count in stats.by_protocol|items %}
<li>{{ name }}: {{ count }}</li>
{%- endfor %}
</ul>
<table>
<thead>
<tr><th>#</th><th>Name</th><th>Protocol</th><th>Server</th><th>Country</th><th>Latency</th><th>Reliability</th></tr>
</thead>
<tbody>
{%- for row in rows %}
<tr{% if not row.reachable %} class="down"{% endif %}><td>{{ loop.index }}</td><td>{{ row.name }}</td><td>{{ row.protocol }}</td><td>{{ row.address }}</td><td>{{ row.country }}</td><td>{{ row.latency }}</td><td>{{ row.reliability }}</td></tr>
{%- endfor %}
</tbody>
</table>
</body>
</html>
"#;

#[derive(Serialize)]
struct Row {
    name: String,
    protocol: &'static str,
    address: String,
    country: String,
    latency: String,
    reliability: String,
    reachable: bool,
}

/// Render the HTML summary table.
pub fn proxy_to_html(bundle: &OutputBundle) -> Result<String, OutputError> {
    let to_error = |e: minijinja::Error| OutputError::Serialize {
        format: "html",
        message: e.to_string(),
    };

    let mut env = Environment::new();
    env.add_template(TEMPLATE_NAME, TEMPLATE).map_err(to_error)?;
    let template = env.get_template(TEMPLATE_NAME).map_err(to_error)?;

    let rows: Vec<Row> = bundle
        .entries
        .iter()
        .map(|entry| Row {
            name: entry.config.display_remark(),
            protocol: entry.config.proxy_type.display_name(),
            address: entry.config.address(),
            country: entry.result.country.clone().unwrap_or_else(|| "-".to_string()),
            latency: match (entry.result.success, entry.result.latency_ms) {
                (true, Some(latency)) => format!("{} ms", latency),
                _ => entry
                    .result
                    .error_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            },
            reliability: entry
                .reliability
                .map(|r| format!("{:.0}%", r * 100.0))
                .unwrap_or_else(|| "-".to_string()),
            reachable: entry.result.success,
        })
        .collect();

    template
        .render(context! {
            generated_at => format_timestamp(&bundle.generated_at),
            partial => bundle.partial,
            stats => &bundle.stats,
            rows => rows,
        })
        .map_err(to_error)
}
