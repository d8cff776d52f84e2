//! End-to-end orchestration tests using scripted in-memory methods.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use article_unlock::{
    AttemptOptions, AttemptOutcome, DomainSeed, Method, MethodConfig, MethodCore,
    MethodRegistry, Orchestrator, UnlockConfig, UnlockError,
};

// ─────────────────────── helpers ───────────────────────

#[derive(Clone, Copy, Debug)]
enum Step {
    Succeed,
    Fail,
    Panic,
}

/// A method that plays back a script, repeating the last step forever.
struct Scripted {
    core: MethodCore,
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicUsize,
    cleanups: AtomicUsize,
}

impl Scripted {
    fn new(name: &str, priority: u8, script: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            core: MethodCore::new(name, MethodConfig::new(priority, Duration::from_secs(5))),
            script: Mutex::new(script.iter().copied().collect()),
            last: Mutex::new(*script.last().unwrap_or(&Step::Fail)),
            calls: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(step) => {
                *self.last.lock().unwrap() = step;
                step
            }
            None => *self.last.lock().unwrap(),
        }
    }
}

#[async_trait]
impl Method for Scripted {
    fn core(&self) -> &MethodCore {
        &self.core
    }

    async fn attempt(&self, url: &str, _options: &AttemptOptions) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Succeed => AttemptOutcome::ok(format!("body of {url}")).with_meta("source", self.name()),
            Step::Fail => AttemptOutcome::failed(format!("{} blocked", self.name())),
            Step::Panic => panic!("{} crashed", self.name()),
        }
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

const DOMAIN: &str = "news.example";

fn url(path: &str) -> String {
    format!("https://{DOMAIN}/{path}")
}

fn base_config() -> UnlockConfig {
    let mut config = UnlockConfig::default();
    config.paywalled_domains.push(DOMAIN.to_string());
    config.orchestrator.health_check_interval_secs = 0;
    config
}

fn orchestrator(methods: &[Arc<Scripted>], config: UnlockConfig) -> Orchestrator {
    let registry = Arc::new(MethodRegistry::new());
    for m in methods {
        registry.register(m.clone()).unwrap();
    }
    let orchestrator = Orchestrator::new(registry, config);
    orchestrator.initialize().unwrap();
    orchestrator
}

fn names(methods: &[Arc<dyn Method>]) -> Vec<String> {
    methods.iter().map(|m| m.name().to_string()).collect()
}

// ═══════════════════════ candidate ordering ═══════════════════════

#[tokio::test]
async fn test_seeded_strategy_orders_preferred_then_priority() {
    let a = Scripted::new("A", 5, &[Step::Succeed]);
    let b = Scripted::new("B", 5, &[Step::Succeed]);
    let c = Scripted::new("C", 9, &[Step::Succeed]);
    let d = Scripted::new("D", 7, &[Step::Succeed]);

    let mut config = base_config();
    config.domains.insert(
        "X".to_string(),
        DomainSeed {
            preferred_methods: vec!["A".into(), "B".into()],
            blacklisted_methods: vec!["C".into()],
        },
    );
    let orch = orchestrator(&[a, b, c, d], config);

    assert_eq!(names(&orch.get_methods_for_domain("X")), vec!["A", "B", "D"]);
}

#[tokio::test]
async fn test_seed_key_matches_request_domain_regardless_of_form() {
    let a = Scripted::new("A", 5, &[Step::Fail]);
    let c = Scripted::new("C", 9, &[Step::Succeed]);

    let mut config = base_config();
    config.domains.insert(
        "www.News.example".to_string(),
        DomainSeed {
            preferred_methods: vec!["A".into()],
            blacklisted_methods: vec!["C".into()],
        },
    );
    let orch = orchestrator(&[a.clone(), c.clone()], config);

    assert_eq!(names(&orch.get_methods_for_domain(DOMAIN)), vec!["A"]);

    let err = orch
        .bypass("https://www.news.example/a", &AttemptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UnlockError::AllMethodsFailed { ref attempted } if attempted == &["A"]));
    assert_eq!(c.calls(), 0);
    assert_eq!(a.calls(), 1);
    assert!(orch.domain_strategy(DOMAIN).unwrap().is_blacklisted("C"));
}

#[tokio::test]
async fn test_no_history_falls_back_to_priority() {
    let low = Scripted::new("low", 2, &[Step::Succeed]);
    let high = Scripted::new("high", 8, &[Step::Succeed]);
    let orch = orchestrator(&[low, high], base_config());

    assert_eq!(
        names(&orch.get_methods_for_domain("fresh.example")),
        vec!["high", "low"]
    );
}

// ═══════════════════════ execution ═══════════════════════

#[tokio::test]
async fn test_sequential_fallback_stops_at_first_success() {
    let first = Scripted::new("first", 9, &[Step::Fail]);
    let second = Scripted::new("second", 6, &[Step::Succeed]);
    let third = Scripted::new("third", 3, &[Step::Succeed]);
    let orch = orchestrator(&[first.clone(), second.clone(), third.clone()], base_config());

    let result = orch.bypass(&url("a"), &AttemptOptions::default()).await.unwrap();
    assert_eq!(result.method, "second");
    assert_eq!(result.content.as_deref(), Some("body of https://news.example/a"));
    assert_eq!(result.metadata["attempts"], 2);
    assert_eq!(result.metadata["source"], "second");
    assert!(!result.request_id.is_empty());
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
    assert_eq!(third.calls(), 0);
}

#[tokio::test]
async fn test_exhaustion_reports_attempted_methods_in_order() {
    let a = Scripted::new("a", 9, &[Step::Fail]);
    let b = Scripted::new("b", 4, &[Step::Fail]);
    let orch = orchestrator(&[a, b], base_config());

    match orch.bypass(&url("x"), &AttemptOptions::default()).await {
        Err(UnlockError::AllMethodsFailed { attempted }) => {
            assert_eq!(attempted, vec!["a", "b"]);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    let summary = orch.get_metrics().summary;
    assert_eq!(summary.total_attempts, 2);
    assert_eq!(summary.successful_attempts, 0);
}

#[tokio::test]
async fn test_panicking_method_is_recorded_and_skipped() {
    let crashy = Scripted::new("crashy", 9, &[Step::Panic]);
    let steady = Scripted::new("steady", 5, &[Step::Succeed]);
    let orch = orchestrator(&[crashy.clone(), steady], base_config());

    let result = orch.bypass(&url("p"), &AttemptOptions::default()).await.unwrap();
    assert_eq!(result.method, "steady");

    let crash_record = orch
        .recent_attempts(10)
        .into_iter()
        .find(|r| r.method == "crashy")
        .unwrap();
    assert!(!crash_record.success);
    assert_eq!(crash_record.response_time_ms, 0);
    assert!(crash_record.metadata["panic"].as_str().unwrap().contains("crashed"));
    assert_eq!(crashy.core().health().consecutive_failures, 1);
}

#[tokio::test]
async fn test_not_applicable_touches_nothing() {
    let m = Scripted::new("m", 5, &[Step::Succeed]);
    let orch = orchestrator(&[m.clone()], base_config());

    let err = orch
        .bypass("https://free.example/post", &AttemptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UnlockError::NotApplicable));
    assert_eq!(m.calls(), 0);
    assert_eq!(orch.get_metrics().rate_limit_keys, 0);
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let orch = orchestrator(&[Scripted::new("m", 5, &[Step::Succeed])], base_config());
    let err = orch
        .bypass("mailto:someone@news.example", &AttemptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UnlockError::InvalidUrl(_)));
}

#[tokio::test]
async fn test_no_available_methods() {
    let orch = orchestrator(&[], base_config());
    let err = orch
        .bypass(&url("a"), &AttemptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UnlockError::NoAvailableMethods));
}

#[tokio::test]
async fn test_fourth_request_in_a_minute_is_rate_limited() {
    let m = Scripted::new("m", 5, &[Step::Fail]);
    let orch = orchestrator(&[m.clone()], base_config());

    // Tracking parameters normalize away, so these share one key.
    let variants = [
        url("story"),
        format!("{}?utm_source=feed", url("story")),
        format!("{}#top", url("story")),
    ];
    for v in &variants {
        let err = orch.bypass(v, &AttemptOptions::default()).await.unwrap_err();
        assert!(matches!(err, UnlockError::AllMethodsFailed { .. }));
    }
    let err = orch
        .bypass(&url("story"), &AttemptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UnlockError::RateLimited));
    assert_eq!(err.to_string(), "rate limit exceeded");
    assert_eq!(m.calls(), 3);
}

// ═══════════════════════ learning ═══════════════════════

#[tokio::test]
async fn test_success_becomes_preferred_for_next_request() {
    let fast = Scripted::new("fast", 9, &[Step::Fail, Step::Fail, Step::Succeed]);
    let slow = Scripted::new("slow", 3, &[Step::Succeed]);
    let orch = orchestrator(&[fast.clone(), slow.clone()], base_config());

    let first = orch.bypass(&url("1"), &AttemptOptions::default()).await.unwrap();
    assert_eq!(first.method, "slow");

    let strategy = orch.domain_strategy(DOMAIN).unwrap();
    assert_eq!(strategy.preferred_methods, vec!["slow"]);
    assert_eq!(strategy.total_attempts, 2);
    assert_eq!(strategy.successful_attempts, 1);

    assert_eq!(names(&orch.get_methods_for_domain(DOMAIN)), vec!["slow", "fast"]);
    let second = orch.bypass(&url("2"), &AttemptOptions::default()).await.unwrap();
    assert_eq!(second.method, "slow");
    assert_eq!(fast.calls(), 1);
}

#[tokio::test]
async fn test_repeated_attempt_failures_open_the_circuit() {
    let broken = Scripted::new("broken", 9, &[Step::Fail]);
    let backup = Scripted::new("backup", 1, &[Step::Fail]);
    let mut config = base_config();
    config.orchestrator.rate_limit_per_minute = 100;
    let orch = orchestrator(&[broken.clone(), backup], config);

    for i in 0..3 {
        let _ = orch.bypass(&url(&i.to_string()), &AttemptOptions::default()).await;
    }
    assert!(!broken.is_available());
    assert_eq!(
        names(&orch.get_methods_for_domain(DOMAIN)),
        Vec::<String>::new()
    );

    let overview = orch.get_health_status();
    assert_eq!(overview.total_methods, 2);
    assert_eq!(overview.available_methods, 0);
}

#[tokio::test]
async fn test_forced_success_learns_paywalled_domain() {
    let m = Scripted::new("m", 5, &[Step::Succeed]);
    let orch = orchestrator(&[m], base_config());
    let target = "https://www.unlisted.example/article";

    assert!(matches!(
        orch.bypass(target, &AttemptOptions::default()).await,
        Err(UnlockError::NotApplicable)
    ));
    orch.bypass(target, &AttemptOptions::forced()).await.unwrap();
    assert!(orch.whitelist().contains("unlisted.example"));
    assert!(orch.bypass(target, &AttemptOptions::default()).await.is_ok());
}

#[tokio::test]
async fn test_process_urls_keeps_only_successes() {
    let m = Scripted::new("m", 5, &[Step::Succeed, Step::Fail, Step::Succeed]);
    let orch = orchestrator(&[m], base_config());

    let batch = vec![
        url("one"),
        "https://free.example/two".to_string(),
        url("three"),
        "not a url".to_string(),
        url("four"),
    ];
    let results = orch.process_urls(&batch).await;
    let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec![url("one"), url("four")]);
}

// ═══════════════════════ lifecycle ═══════════════════════

#[tokio::test]
async fn test_initialize_rejects_unusable_settings() {
    let registry = Arc::new(MethodRegistry::new());
    registry.register(Scripted::new("A", 5, &[Step::Succeed])).unwrap();

    let mut config = base_config();
    config.orchestrator.rate_limit_per_minute = 0;
    let orch = Orchestrator::new(registry, config);

    assert!(matches!(orch.initialize(), Err(UnlockError::Config(_))));
}

#[tokio::test]
async fn test_initialize_applies_method_overrides() {
    let m = Scripted::new("m", 5, &[Step::Succeed]);
    let mut config = base_config();
    config.methods.insert(
        "m".into(),
        article_unlock::MethodConfigPatch {
            priority: Some(9),
            enabled: Some(false),
            timeout_ms: Some(1234),
        },
    );
    config.methods.insert("ghost".into(), Default::default());
    let orch = orchestrator(&[m.clone()], config);

    let cfg = m.core().config();
    assert_eq!(cfg.priority, 9);
    assert!(!cfg.enabled);
    assert_eq!(cfg.timeout_ms, 1234);
    assert!(orch.get_methods_for_domain(DOMAIN).is_empty());
}

#[tokio::test]
async fn test_cleanup_twice_leaves_registry_empty() {
    let m = Scripted::new("m", 5, &[Step::Succeed]);
    let mut config = base_config();
    config.orchestrator.health_check_interval_secs = 3600;
    let orch = orchestrator(&[m.clone()], config);
    assert!(orch.get_health_status().health_checks_running);

    orch.cleanup().await;
    orch.cleanup().await;
    assert!(orch.registry().is_empty());
    assert!(!orch.get_health_status().health_checks_running);
    assert_eq!(m.cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_metrics_report_serializes() {
    let m = Scripted::new("m", 5, &[Step::Succeed]);
    let orch = orchestrator(&[m], base_config());
    orch.bypass(&url("a"), &AttemptOptions::default()).await.unwrap();

    let report = serde_json::to_value(orch.get_metrics()).unwrap();
    assert_eq!(report["summary"]["total_attempts"], 1);
    assert_eq!(report["methods"][0]["name"], "m");
    assert_eq!(report["strategies"][0]["domain"], DOMAIN);
    assert_eq!(report["paywalled_domains"], 1);
}
