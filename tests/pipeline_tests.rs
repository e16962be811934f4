use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use subharvest::error::ProbeError;
use subharvest::generator::OutputFormat;
use subharvest::parser::parse;
use subharvest::tester::{ProbeSuccess, Prober};
use subharvest::utils::base64::base64_encode;
use subharvest::{resume, Pipeline, ProxyConfig, Settings};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = "\
trojan://pw@a.example:443#A
socks5://b.example:1081#B
trojan://pw@A.EXAMPLE:443?alpn=h2#A-dup
ss://YWVzLTI1Ni1nY206c2VjcmV0@c.example:8388#C
vless://b831381d-6324-4d53-ad4f-8cda48b30811@d.example:8443?security=tls&sni=d.example#D
http://down.example:8080#Down
";

/// Refuses hosts starting with `down`, otherwise answers with a latency
/// derived from the port.
struct FixedProber;

impl Prober for FixedProber {
    fn probe(
        &self,
        config: &ProxyConfig,
    ) -> impl Future<Output = Result<ProbeSuccess, ProbeError>> + Send {
        let down = config.hostname.starts_with("down");
        let latency = Duration::from_millis(u64::from(config.port % 100));
        async move {
            if down {
                Err(ProbeError::Refused)
            } else {
                Ok(ProbeSuccess {
                    latency,
                    address: None,
                })
            }
        }
    }
}

/// Cancels the run when asked to probe `cancel_at`.
struct CancellingProber {
    cancel: CancellationToken,
    cancel_at: &'static str,
}

impl Prober for CancellingProber {
    fn probe(
        &self,
        config: &ProxyConfig,
    ) -> impl Future<Output = Result<ProbeSuccess, ProbeError>> + Send {
        if config.hostname == self.cancel_at {
            self.cancel.cancel();
        }
        async {
            Ok(ProbeSuccess {
                latency: Duration::from_millis(5),
                address: None,
            })
        }
    }
}

/// Answers `a` and `b` at once and never answers anything else.
struct StallingProber;

impl Prober for StallingProber {
    fn probe(
        &self,
        config: &ProxyConfig,
    ) -> impl Future<Output = Result<ProbeSuccess, ProbeError>> + Send {
        let stall = !matches!(config.hostname.as_str(), "a.example" | "b.example");
        async move {
            if stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ProbeSuccess {
                latency: Duration::from_millis(7),
                address: None,
            })
        }
    }
}

fn settings(dir: &Path) -> Settings {
    Settings {
        sources_file: dir.join("sources.txt"),
        state_dir: dir.join("state"),
        output_dir: dir.join("out"),
        only_reachable: false,
        batch_size: 2,
        test_concurrency: 2,
        probe_timeout_ms: 1000,
        ..Default::default()
    }
}

fn channel_feed() -> HashMap<String, String> {
    HashMap::from([("feed".to_string(), FEED.to_string())])
}

fn identities(configs: &[ProxyConfig]) -> BTreeSet<String> {
    configs.iter().map(ProxyConfig::identity).collect()
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_resume_without_live_sources_reproduces_deduplicated_set() {
    let dir = tempfile::tempdir().unwrap();
    let previous = dir.path().join("previous.txt");
    fs::write(&previous, FEED).unwrap();

    let mut settings = settings(dir.path());
    settings.resume_from = Some(previous);
    settings.formats = vec!["raw".to_string()];

    let summary = Pipeline::with_prober(settings, FixedProber)
        .run(&HashMap::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sources_attempted, 0);
    assert_eq!(summary.entries_resumed, 5);
    assert_eq!(summary.entries_unique, 5);
    assert!(!summary.interrupted);

    let written = fs::read_to_string(dir.path().join("out/proxies.txt")).unwrap();
    assert_eq!(identities(&parse(&written).configs), identities(&resume(FEED)));
}

#[tokio::test]
async fn test_identical_runs_produce_identical_files() {
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let mut dirs = Vec::new();
    for _ in 0..2 {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
        Pipeline::with_prober(settings(dir.path()), FixedProber)
            .generated_at(at)
            .run(&channel_feed(), &CancellationToken::new())
            .await
            .unwrap();
        dirs.push(dir);
    }

    let mut names: Vec<&str> = OutputFormat::ALL.iter().map(|f| f.file_name()).collect();
    names.extend(["proxies.json", "stats.json", "metadata.json"]);
    for name in names {
        let a = fs::read(dirs[0].path().join("out").join(name)).unwrap();
        let b = fs::read(dirs[1].path().join("out").join(name)).unwrap();
        assert_eq!(a, b, "{} differs between runs", name);
    }
    assert!(!dirs[0].path().join("out/checkpoint.jsonl").exists());
}

#[tokio::test]
async fn test_raw_and_base64_outputs_reparse_to_same_identities() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
    Pipeline::with_prober(settings(dir.path()), FixedProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();

    let out = dir.path().join("out");
    let proxies = read_json(&out.join("proxies.json"));
    let emitted: BTreeSet<String> = proxies
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["identity"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(emitted.len(), 5);

    let raw = fs::read_to_string(out.join("proxies.txt")).unwrap();
    let base64 = fs::read_to_string(out.join("proxies_base64.txt")).unwrap();
    assert_eq!(identities(&parse(&raw).configs), emitted);
    assert_eq!(identities(&parse(&base64).configs), emitted);
}

#[tokio::test]
async fn test_latency_ranking_puts_failures_last() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
    let summary = Pipeline::with_prober(settings(dir.path()), FixedProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.probes_attempted, 5);
    assert_eq!(summary.probes_succeeded, 4);

    let proxies = read_json(&dir.path().join("out/proxies.json"));
    let proxies = proxies.as_array().unwrap();
    let reachable: Vec<bool> = proxies
        .iter()
        .map(|p| p["reachable"].as_bool().unwrap())
        .collect();
    assert_eq!(reachable, vec![true, true, true, true, false]);
    let latencies: Vec<u64> = proxies[..4]
        .iter()
        .map(|p| p["latency_ms"].as_u64().unwrap())
        .collect();
    assert!(latencies.windows(2).all(|w| w[0] <= w[1]), "{:?}", latencies);
    assert_eq!(proxies[4]["error"], "refused");
}

#[tokio::test]
async fn test_only_reachable_drops_failures() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
    let mut settings = settings(dir.path());
    settings.only_reachable = true;
    settings.top_n = Some(2);
    let summary = Pipeline::with_prober(settings, FixedProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.entries_emitted, 2);

    let stats = read_json(&dir.path().join("out/stats.json"));
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["reachable"], 2);
}

#[tokio::test]
async fn test_interrupted_run_keeps_checkpoint_and_resume_reuses_it() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
    let mut first = settings(dir.path());
    first.test_concurrency = 1;

    // batches are [a, b], [c, d], [down]; cancelling while probing c
    // keeps the first batch and the probe already in flight
    let cancel = CancellationToken::new();
    let prober = CancellingProber {
        cancel: cancel.clone(),
        cancel_at: "c.example",
    };
    let summary = Pipeline::with_prober(first.clone(), prober)
        .run(&channel_feed(), &cancel)
        .await
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.probes_attempted, 3);
    assert_eq!(summary.entries_emitted, 3);

    let out = dir.path().join("out");
    let metadata = read_json(&out.join("metadata.json"));
    assert_eq!(metadata["partial"], true);
    assert!(out.join("checkpoint.jsonl").exists());

    let previous = dir.path().join("previous.txt");
    fs::write(&previous, FEED).unwrap();
    let mut second = first;
    second.resume_from = Some(previous);
    let summary = Pipeline::with_prober(second, FixedProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!summary.interrupted);
    assert_eq!(summary.results_reused, 3);
    assert_eq!(summary.probes_attempted, 2);
    assert_eq!(summary.entries_emitted, 5);
    assert!(!out.join("checkpoint.jsonl").exists());
}

#[tokio::test]
async fn test_interrupt_before_any_result_keeps_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
    Pipeline::with_prober(settings(dir.path()), FixedProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();
    let out = dir.path().join("out");
    let raw_before = fs::read_to_string(out.join("proxies.txt")).unwrap();
    let metadata_before = fs::read_to_string(out.join("metadata.json")).unwrap();
    assert!(!raw_before.is_empty());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = Pipeline::with_prober(settings(dir.path()), FixedProber)
        .run(&channel_feed(), &cancel)
        .await
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.probes_attempted, 0);
    assert_eq!(summary.entries_emitted, 0);
    assert!(summary.files_written.is_empty());
    assert_eq!(fs::read_to_string(out.join("proxies.txt")).unwrap(), raw_before);
    assert_eq!(
        fs::read_to_string(out.join("metadata.json")).unwrap(),
        metadata_before
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_drains_and_emits_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sources.txt"), "channel:feed\n").unwrap();
    let mut settings = settings(dir.path());
    settings.run_deadline_secs = 1;
    settings.probe_timeout_ms = 5000;

    // batch [a, b] completes; c and d are in flight at the deadline and
    // end at their own timeout; the last batch is never started
    let summary = Pipeline::with_prober(settings, StallingProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.probes_attempted, 4);
    assert_eq!(summary.probes_succeeded, 2);
    assert_eq!(summary.entries_emitted, 4);

    let out = dir.path().join("out");
    let metadata = read_json(&out.join("metadata.json"));
    assert_eq!(metadata["partial"], true);
    assert_eq!(metadata["entries"], 4);
    let proxies = read_json(&out.join("proxies.json"));
    assert_eq!(proxies[2]["error"], "timeout");
    assert!(out.join("checkpoint.jsonl").exists());
}

#[tokio::test]
async fn test_fetch_deadline_counts_hung_source_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let slow = format!("{}/slow", server.uri());
    fs::write(dir.path().join("sources.txt"), format!("{}\nchannel:feed\n", slow)).unwrap();
    let mut settings = settings(dir.path());
    settings.fetch_deadline_secs = 1;
    settings.fetch_retries = 0;

    let started = std::time::Instant::now();
    let summary = Pipeline::with_prober(settings, FixedProber)
        .run(&channel_feed(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!summary.interrupted);
    assert_eq!(summary.sources_attempted, 2);
    assert_eq!(summary.sources_succeeded, 1);
    assert_eq!(summary.entries_emitted, 5);

    let state = read_json(&dir.path().join("state/sources.state.json"));
    assert_eq!(state["failures"][slow.as_str()], 1);
}

#[tokio::test]
async fn test_http_sources_are_fetched_and_failures_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sub"))
        .respond_with(ResponseTemplate::new(200).set_body_string(base64_encode(FEED)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let gone = format!("{}/gone", server.uri());
    fs::write(
        dir.path().join("sources.txt"),
        format!("# feeds\n{}/sub\n{}\n", server.uri(), gone),
    )
    .unwrap();

    let summary = Pipeline::with_prober(settings(dir.path()), FixedProber)
        .run(&HashMap::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sources_attempted, 2);
    assert_eq!(summary.sources_succeeded, 1);
    assert_eq!(summary.sources_pruned, 0);
    assert_eq!(summary.entries_unique, 5);

    let state = fs::read_to_string(dir.path().join("state/sources.state.json")).unwrap();
    assert!(state.contains(&gone));
    assert!(dir.path().join("state/history.jsonl").exists());
    assert!(dir.path().join("state/reliability.json").exists());
}

#[tokio::test]
async fn test_invalid_settings_fail_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.include_protocols = vec!["wireguard".to_string()];

    let err = Pipeline::with_prober(settings, FixedProber)
        .run(&HashMap::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("wireguard"));
    assert!(!dir.path().join("out").exists());
}
