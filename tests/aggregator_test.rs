use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chorus::aggregator::{Aggregator, AggregatorConfig};
use chorus::error::ProviderError;
use chorus::provider::Provider;
use chorus::provider::mock::{EchoProvider, ScriptedProvider};
use chorus::resilience::{CircuitHealth, ResilienceConfig, RetryPolicy};
use chorus::types::Prompt;

fn prompt(text: &str) -> Prompt {
    Prompt::new(text).unwrap()
}

fn fast_retries() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryPolicy::fixed(3, Duration::ZERO),
        ..ResilienceConfig::default()
    }
}

struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    fn source(&self) -> &str {
        "Broken"
    }

    async fn call(&self, _prompt: &str) -> Result<String, ProviderError> {
        panic!("provider blew up");
    }
}

#[tokio::test(start_paused = true)]
async fn partial_failure_keeps_every_provider() {
    let c = Arc::new(ScriptedProvider::failing(
        "C",
        ProviderError::Transport("connection refused".into()),
    ));
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(ScriptedProvider::replying("A", "hello")),
        Arc::new(ScriptedProvider::replying("B", "world")),
        c.clone(),
    ];
    let aggregator = Aggregator::new(providers, &ResilienceConfig::default());

    let result = aggregator.merged_results(&prompt("hi")).await;

    assert_eq!(result.results.len(), 3);
    assert_eq!(result.get("A").and_then(|r| r.message()), Some("hello"));
    assert_eq!(result.get("B").and_then(|r| r.message()), Some("world"));
    assert!(matches!(
        result.get("C").and_then(|r| r.error()),
        Some(ProviderError::Transport(_))
    ));

    // Three attempts, all counted by C's own breaker and nobody else's.
    assert_eq!(c.calls(), 3);
    let circuits = aggregator.circuits();
    let (_, c_circuit) = circuits.iter().find(|(s, _)| s == "C").unwrap();
    assert_eq!(c_circuit.consecutive_failures, 3);
    assert_eq!(c_circuit.health, CircuitHealth::Closed);
    for (source, snapshot) in circuits.iter().filter(|(s, _)| s != "C") {
        assert_eq!(snapshot.consecutive_failures, 0, "{source}");
    }
}

#[tokio::test]
async fn every_provider_failing_still_yields_n_entries() {
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(ScriptedProvider::failing(
            "A",
            ProviderError::Status {
                code: 401,
                body: "bad key".into(),
            },
        )),
        Arc::new(ScriptedProvider::failing(
            "B",
            ProviderError::Serialization("no choices".into()),
        )),
        Arc::new(ScriptedProvider::failing(
            "C",
            ProviderError::Timeout("10s".into()),
        )),
        Arc::new(ScriptedProvider::replying("D", "ok")),
    ];
    let aggregator = Aggregator::new(providers, &fast_retries());

    let result = aggregator.merged_results(&prompt("hi")).await;
    assert_eq!(result.results.len(), 4);
    assert_eq!(result.failures().count(), 3);
    assert_eq!(result.successes().count(), 1);
}

#[tokio::test]
async fn panicking_provider_becomes_internal_error() {
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(PanickingProvider),
        Arc::new(ScriptedProvider::replying("A", "fine")),
    ];
    let aggregator = Aggregator::new(providers, &fast_retries());

    let result = aggregator.merged_results(&prompt("hi")).await;
    assert_eq!(result.results.len(), 2);
    assert!(matches!(
        result.get("Broken").and_then(|r| r.error()),
        Some(ProviderError::Internal(_))
    ));
    assert!(result.get("A").unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn deadline_turns_stragglers_into_timeouts() {
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(ScriptedProvider::replying("fast", "quick").with_delay(Duration::from_millis(10))),
        Arc::new(ScriptedProvider::replying("slow", "late").with_delay(Duration::from_secs(60))),
    ];
    let aggregator = Aggregator::with_config(
        providers,
        &fast_retries(),
        AggregatorConfig {
            deadline: Some(Duration::from_secs(1)),
        },
    );

    let start = tokio::time::Instant::now();
    let result = aggregator.merged_results(&prompt("hi")).await;

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.get("fast").and_then(|r| r.message()), Some("quick"));
    assert!(matches!(
        result.get("slow").and_then(|r| r.error()),
        Some(ProviderError::Timeout(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn without_deadline_waits_for_slowest() {
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(ScriptedProvider::replying("slow", "late").with_delay(Duration::from_secs(30))),
    ];
    let aggregator = Aggregator::new(providers, &fast_retries());

    let result = aggregator.merged_results(&prompt("hi")).await;
    assert_eq!(result.get("slow").and_then(|r| r.message()), Some("late"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_get_independent_results() {
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(EchoProvider::new("A", Duration::from_millis(5))),
        Arc::new(EchoProvider::new("B", Duration::from_millis(1))),
        Arc::new(EchoProvider::new("C", Duration::ZERO)),
    ];
    let aggregator = Arc::new(Aggregator::new(providers, &fast_retries()));

    let handles: Vec<_> = (0..25)
        .map(|i| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                let text = format!("prompt-{i}");
                let result = aggregator.merged_results(&prompt(&text)).await;
                (text, result)
            })
        })
        .collect();

    for handle in handles {
        let (text, result) = handle.await.unwrap();
        assert_eq!(result.results.len(), 3);
        for entry in &result.results {
            assert_eq!(
                entry.message(),
                Some(format!("{}:{}", entry.source, text).as_str())
            );
        }
    }
}

#[tokio::test]
async fn open_circuit_short_circuits_later_aggregations() {
    let c = Arc::new(ScriptedProvider::failing(
        "C",
        ProviderError::Status {
            code: 503,
            body: "unavailable".into(),
        },
    ));
    let providers: Vec<Arc<dyn Provider>> =
        vec![Arc::new(ScriptedProvider::replying("A", "hello")), c.clone()];
    let aggregator = Aggregator::new(providers, &fast_retries());

    // Two aggregations make six failed attempts, which trips the breaker.
    aggregator.merged_results(&prompt("hi")).await;
    aggregator.merged_results(&prompt("hi")).await;
    assert_eq!(c.calls(), 6);

    let result = aggregator.merged_results(&prompt("hi")).await;
    assert_eq!(c.calls(), 6, "open circuit must not reach the provider");
    assert!(matches!(
        result.get("C").and_then(|r| r.error()),
        Some(ProviderError::CircuitOpen(_))
    ));
    assert_eq!(result.get("A").and_then(|r| r.message()), Some("hello"));
}
