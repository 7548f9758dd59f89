//! The fixed-window rate limit policy.
//!
//! A window opens with the first request of a key and lasts for the policy window. Every
//! request within it is counted, and once the count exceeds the limit the remaining requests
//! of the window are denied. Up to twice the limit can pass in a burst straddling two windows.

use std::{fmt, sync::Arc, time::Duration};

use config::PresetQuota;

use crate::{
    clock::{self, Clock},
    key::{self, KeyGenerator},
    request::RateLimitRequest,
    storage::{CounterStore, Storage},
};

type SkipPredicate = Arc<dyn Fn(&RateLimitRequest) -> bool + Send + Sync>;
type LimitObserver = Arc<dyn Fn(&Denial) + Send + Sync>;

/// The quota of a key after counting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    /// The store key the request was counted against.
    pub key: String,
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Epoch milliseconds at which the window resets.
    pub reset_at_ms: u64,
}

impl QuotaState {
    /// Requests left in the window. Never negative.
    pub fn remaining(&self) -> u64 {
        u64::from(self.limit).saturating_sub(self.count)
    }
}

/// A denied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Name of the policy that denied the request.
    pub policy: String,
    /// The quota after counting the denied request.
    pub state: QuotaState,
    /// The policy window.
    pub window: Duration,
    /// Seconds until the window resets, rounded up.
    pub retry_after_secs: u64,
    /// Message for the client.
    pub message: String,
}

impl Denial {
    /// The reset time as an ISO-8601 timestamp.
    pub fn reset_time(&self) -> String {
        clock::iso8601(self.state.reset_at_ms)
    }
}

/// Outcome of checking a request against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request was not counted: it was skipped, or the store failed.
    Exempt,
    /// The request was counted and is within the quota.
    Allow(QuotaState),
    /// The request exceeded the quota.
    Deny(Denial),
}

/// A rate limit policy: a window, a quota and the rules that decide what is counted.
///
/// Policies are built once and shared across requests.
#[derive(Clone)]
pub struct RateLimitPolicy {
    name: String,
    limit: u32,
    window: Duration,
    message: String,
    key_generator: KeyGenerator,
    skip: Option<SkipPredicate>,
    skip_system_endpoints: bool,
    skip_successful_requests: bool,
    skip_failed_requests: bool,
    standard_headers: bool,
    legacy_headers: bool,
    on_limit_reached: Option<LimitObserver>,
    store: Arc<Storage>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("key_generator", &self.key_generator)
            .field("skip_successful_requests", &self.skip_successful_requests)
            .field("skip_failed_requests", &self.skip_failed_requests)
            .finish_non_exhaustive()
    }
}

impl RateLimitPolicy {
    /// Start building a policy counting into the given store.
    pub fn builder(store: Arc<Storage>, clock: Arc<dyn Clock>) -> RateLimitPolicyBuilder {
        RateLimitPolicyBuilder::new(store, clock)
    }

    /// The policy name, used as the namespace of its store keys.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request and decide whether it may proceed.
    ///
    /// Store failures are logged and the request is let through uncounted.
    pub async fn check(&self, request: &RateLimitRequest) -> Decision {
        if self.skip_system_endpoints && key::skip_system_endpoints(&request.path) {
            return Decision::Exempt;
        }

        if self.skip.as_ref().is_some_and(|skip| skip(request)) {
            return Decision::Exempt;
        }

        let key = format!("{}:{}", self.name, self.key_generator.key(request));
        let now = self.clock.now_millis();
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);

        let record = match self.store.increment(&key, now.saturating_add(window_ms)).await {
            Ok(record) => record,
            Err(e) => {
                log::error!("Rate limit store failed for policy '{}', allowing request: {e}", self.name);
                return Decision::Exempt;
            }
        };

        let state = QuotaState {
            key,
            limit: self.limit,
            count: record.count,
            reset_at_ms: record.window_reset_ms,
        };

        if record.count <= u64::from(self.limit) {
            return Decision::Allow(state);
        }

        let denial = Denial {
            policy: self.name.clone(),
            retry_after_secs: record.window_reset_ms.saturating_sub(now).div_ceil(1000),
            window: self.window,
            message: self.message.clone(),
            state,
        };

        log::debug!(
            "Rate limit '{}' exceeded for {} ({} of {})",
            self.name,
            denial.state.key,
            denial.state.count,
            self.limit
        );

        if let Some(observer) = &self.on_limit_reached {
            observer(&denial);
        }

        Decision::Deny(denial)
    }

    /// The quota headers for an allowed request.
    pub fn headers(&self, state: &QuotaState) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(6);

        if self.standard_headers {
            headers.push(("ratelimit-limit", state.limit.to_string()));
            headers.push(("ratelimit-remaining", state.remaining().to_string()));
            headers.push(("ratelimit-reset", clock::iso8601(state.reset_at_ms)));
        }

        if self.legacy_headers {
            headers.push(("x-ratelimit-limit", state.limit.to_string()));
            headers.push(("x-ratelimit-remaining", state.remaining().to_string()));
            headers.push(("x-ratelimit-reset", state.reset_at_ms.div_ceil(1000).to_string()));
        }

        headers
    }

    /// Whether [`RateLimitPolicy::record_outcome`] needs to see the response status.
    pub fn tracks_outcome(&self) -> bool {
        self.skip_successful_requests || self.skip_failed_requests
    }

    /// Give the quota of an allowed request back when its response status is not counted.
    ///
    /// Statuses below 400 are successful. The correction is not atomic with the original
    /// increment, so concurrent requests for the same key can observe the higher count.
    pub async fn record_outcome(&self, state: &QuotaState, status: u16) {
        let uncounted = if status < 400 {
            self.skip_successful_requests
        } else {
            self.skip_failed_requests
        };

        if !uncounted {
            return;
        }

        if let Err(e) = self.undo(&state.key).await {
            log::error!("Failed to adjust rate limit count for policy '{}': {e}", self.name);
        }
    }

    async fn undo(&self, key: &str) -> Result<(), crate::storage::StorageError> {
        let Some(record) = self.store.get(key).await? else {
            return Ok(());
        };

        if record.count <= 1 {
            self.store.reset(key).await
        } else {
            self.store.set(key, record.count - 1, record.window_reset_ms).await
        }
    }
}

/// Builder for [`RateLimitPolicy`].
pub struct RateLimitPolicyBuilder {
    policy: RateLimitPolicy,
}

impl RateLimitPolicyBuilder {
    fn new(store: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy: RateLimitPolicy {
                name: "default".to_string(),
                limit: 100,
                window: Duration::from_secs(15 * 60),
                message: "Too many requests, please try again later.".to_string(),
                key_generator: KeyGenerator::default(),
                skip: None,
                skip_system_endpoints: false,
                skip_successful_requests: false,
                skip_failed_requests: false,
                standard_headers: true,
                legacy_headers: false,
                on_limit_reached: None,
                store,
                clock,
            },
        }
    }

    /// Take name, quota, window, message and skip flags from a preset.
    pub fn preset(mut self, quota: &PresetQuota) -> Self {
        self.policy.name = quota.name.to_string();
        self.policy.limit = quota.limit;
        self.policy.window = quota.window;
        self.policy.message = quota.message.clone();
        self.policy.skip_successful_requests = quota.skip_successful_requests;
        self.policy.skip_failed_requests = quota.skip_failed_requests;
        self
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.policy.name = name.into();
        self
    }

    /// Set the number of requests allowed per window.
    pub fn limit(mut self, limit: u32) -> Self {
        self.policy.limit = limit;
        self
    }

    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.policy.window = window;
        self
    }

    /// Set the message returned on denial.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.policy.message = message.into();
        self
    }

    /// Set the key generator.
    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.policy.key_generator = key_generator;
        self
    }

    /// Never count requests the predicate matches.
    pub fn skip(mut self, predicate: impl Fn(&RateLimitRequest) -> bool + Send + Sync + 'static) -> Self {
        self.policy.skip = Some(Arc::new(predicate));
        self
    }

    /// Never count health, version and metrics requests.
    pub fn skip_system_endpoints(mut self, skip: bool) -> Self {
        self.policy.skip_system_endpoints = skip;
        self
    }

    /// Give back the quota of requests answered with a status below 400.
    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.policy.skip_successful_requests = skip;
        self
    }

    /// Give back the quota of requests answered with a status of 400 or above.
    pub fn skip_failed_requests(mut self, skip: bool) -> Self {
        self.policy.skip_failed_requests = skip;
        self
    }

    /// Emit the `RateLimit-*` headers.
    pub fn standard_headers(mut self, enabled: bool) -> Self {
        self.policy.standard_headers = enabled;
        self
    }

    /// Emit the `X-RateLimit-*` headers.
    pub fn legacy_headers(mut self, enabled: bool) -> Self {
        self.policy.legacy_headers = enabled;
        self
    }

    /// Call the observer synchronously for every denied request.
    pub fn on_limit_reached(mut self, observer: impl Fn(&Denial) + Send + Sync + 'static) -> Self {
        self.policy.on_limit_reached = Some(Arc::new(observer));
        self
    }

    /// Build the policy.
    pub fn build(self) -> RateLimitPolicy {
        self.policy
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use config::{PresetName, PresetsConfig, RedisConfig};

    use super::*;
    use crate::{
        clock::ManualClock,
        storage::{InMemoryStorage, RedisStorage},
    };

    const START: u64 = 1_700_000_000_000;

    fn memory(clock: &ManualClock) -> Arc<Storage> {
        Arc::new(Storage::Memory(InMemoryStorage::new(Arc::new(clock.clone()))))
    }

    fn policy(clock: &ManualClock, limit: u32, window: Duration) -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder(memory(clock), Arc::new(clock.clone()))
            .name("test")
            .limit(limit)
            .window(window)
    }

    fn request(ip: &str) -> RateLimitRequest {
        RateLimitRequest::builder()
            .method("GET")
            .path("/api/workflows")
            .socket_address(ip.parse().unwrap())
            .build()
    }

    fn allowed(decision: Decision) -> QuotaState {
        match decision {
            Decision::Allow(state) => state,
            other => panic!("expected an allowed request, got {other:?}"),
        }
    }

    fn denied(decision: Decision) -> Denial {
        match decision {
            Decision::Deny(denial) => denial,
            other => panic!("expected a denied request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn limit_is_inclusive() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 5, Duration::from_secs(60)).build();

        for expected in 1..=5 {
            let state = allowed(policy.check(&request("10.0.0.1")).await);
            assert_eq!(state.count, expected);
        }

        let denial = denied(policy.check(&request("10.0.0.1")).await);
        assert_eq!(denial.state.count, 6);
        assert_eq!(denial.policy, "test");
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 1, Duration::from_secs(60)).build();

        allowed(policy.check(&request("10.0.0.1")).await);
        allowed(policy.check(&request("10.0.0.2")).await);
        denied(policy.check(&request("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn window_reset_starts_a_new_count() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 2, Duration::from_secs(60)).build();

        for _ in 0..4 {
            policy.check(&request("10.0.0.1")).await;
        }

        clock.advance(60_000);

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        assert_eq!(state.count, 1);
        assert_eq!(state.reset_at_ms, START + 120_000);
    }

    #[tokio::test]
    async fn window_is_anchored_to_the_first_request() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 10, Duration::from_secs(60)).build();

        policy.check(&request("10.0.0.1")).await;
        clock.advance(30_000);

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        assert_eq!(state.reset_at_ms, START + 60_000);
    }

    #[tokio::test]
    async fn remaining_never_goes_negative() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 1, Duration::from_secs(60)).build();

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        assert_eq!(state.remaining(), 0);

        for _ in 0..3 {
            let denial = denied(policy.check(&request("10.0.0.1")).await);
            assert_eq!(denial.state.remaining(), 0);
        }
    }

    #[tokio::test]
    async fn retry_after_rounds_up() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 1, Duration::from_secs(60)).build();

        policy.check(&request("10.0.0.1")).await;
        clock.advance(10_500);

        let denial = denied(policy.check(&request("10.0.0.1")).await);
        assert_eq!(denial.retry_after_secs, 50);

        clock.advance(49_000);

        let denial = denied(policy.check(&request("10.0.0.1")).await);
        assert_eq!(denial.retry_after_secs, 1);
    }

    #[tokio::test]
    async fn single_request_window() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 1, Duration::from_millis(60_000)).build();

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        let headers = policy.headers(&state);

        assert_eq!(
            headers,
            vec![
                ("ratelimit-limit", "1".to_string()),
                ("ratelimit-remaining", "0".to_string()),
                ("ratelimit-reset", "2023-11-14T22:14:20Z".to_string()),
            ]
        );

        let denial = denied(policy.check(&request("10.0.0.1")).await);
        assert_eq!(denial.retry_after_secs, 60);
        assert_eq!(denial.reset_time(), "2023-11-14T22:14:20Z");
    }

    #[tokio::test]
    async fn legacy_headers() {
        let clock = ManualClock::new(START + 1);
        let policy = policy(&clock, 3, Duration::from_secs(60))
            .standard_headers(false)
            .legacy_headers(true)
            .build();

        let state = allowed(policy.check(&request("10.0.0.1")).await);

        assert_eq!(
            policy.headers(&state),
            vec![
                ("x-ratelimit-limit", "3".to_string()),
                ("x-ratelimit-remaining", "2".to_string()),
                ("x-ratelimit-reset", "1700000061".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn skipped_requests_are_not_counted() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 1, Duration::from_secs(60))
            .skip(|request| request.method == "OPTIONS")
            .skip_system_endpoints(true)
            .build();

        let mut preflight = request("10.0.0.1");
        preflight.method = "OPTIONS".to_string();

        let mut health = request("10.0.0.1");
        health.path = "/health".to_string();

        for _ in 0..3 {
            assert_eq!(policy.check(&preflight).await, Decision::Exempt);
            assert_eq!(policy.check(&health).await, Decision::Exempt);
        }

        allowed(policy.check(&request("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn successful_requests_can_be_given_back() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 2, Duration::from_secs(60))
            .skip_successful_requests(true)
            .build();

        assert!(policy.tracks_outcome());

        for _ in 0..5 {
            let state = allowed(policy.check(&request("10.0.0.1")).await);
            policy.record_outcome(&state, 200).await;
        }

        let first = allowed(policy.check(&request("10.0.0.1")).await);
        policy.record_outcome(&first, 500).await;
        let second = allowed(policy.check(&request("10.0.0.1")).await);
        policy.record_outcome(&second, 404).await;

        denied(policy.check(&request("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn failed_requests_can_be_given_back() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 3, Duration::from_secs(60))
            .skip_failed_requests(true)
            .build();

        let first = allowed(policy.check(&request("10.0.0.1")).await);
        policy.record_outcome(&first, 401).await;

        let second = allowed(policy.check(&request("10.0.0.1")).await);
        assert_eq!(second.count, 1);
        policy.record_outcome(&second, 201).await;

        let third = allowed(policy.check(&request("10.0.0.1")).await);
        assert_eq!(third.count, 2);
    }

    #[tokio::test]
    async fn adjustment_keeps_the_window() {
        let clock = ManualClock::new(START);
        let store = memory(&clock);
        let policy = RateLimitPolicy::builder(store.clone(), Arc::new(clock.clone()))
            .name("test")
            .limit(10)
            .window(Duration::from_secs(60))
            .skip_failed_requests(true)
            .build();

        policy.check(&request("10.0.0.1")).await;
        clock.advance(5_000);

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        policy.record_outcome(&state, 503).await;

        let record = store.get("test:10.0.0.1").await.unwrap().unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_reset_ms, START + 60_000);
    }

    #[tokio::test]
    async fn counted_outcomes_are_kept() {
        let clock = ManualClock::new(START);
        let policy = policy(&clock, 1, Duration::from_secs(60)).build();

        assert!(!policy.tracks_outcome());

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        policy.record_outcome(&state, 200).await;

        denied(policy.check(&request("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn observer_sees_every_denial() {
        let clock = ManualClock::new(START);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = seen.clone();

        let policy = policy(&clock, 1, Duration::from_secs(60))
            .on_limit_reached(move |denial| observed.lock().unwrap().push(denial.state.count))
            .build();

        for _ in 0..3 {
            policy.check(&request("10.0.0.1")).await;
        }

        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn preset_configuration() {
        let clock = ManualClock::new(START);
        let quota = PresetsConfig::default().resolve(PresetName::AuditExport);

        let policy = RateLimitPolicy::builder(memory(&clock), Arc::new(clock.clone()))
            .preset(&quota)
            .build();

        assert_eq!(policy.name(), "audit_export");
        assert_eq!(policy.limit(), 20);
        assert_eq!(policy.window(), Duration::from_secs(3600));

        let state = allowed(policy.check(&request("10.0.0.1")).await);
        assert_eq!(state.key, "audit_export:10.0.0.1");
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let clock = ManualClock::new(START);

        let config = RedisConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            ..Default::default()
        };

        let store = RedisStorage::lazy(&config, Arc::new(clock.clone())).unwrap();

        let policy = RateLimitPolicy::builder(Arc::new(Storage::Redis(store)), Arc::new(clock))
            .limit(1)
            .build();

        for _ in 0..3 {
            assert_eq!(policy.check(&request("10.0.0.1")).await, Decision::Exempt);
        }
    }
}
