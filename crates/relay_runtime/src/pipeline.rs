//! Execution pipeline: the single entry point for tool invocations.
//!
//! ```text
//! dispatch(req)
//!   ├─ registry.lookup(adapter)          → AdapterNotFound
//!   ├─ adapter.tool(tool)                → ToolNotFound
//!   ├─ validate_parameters + build       → Validation
//!   ├─ circuit.acquire(adapter)          → CircuitOpen
//!   ├─ limiter.allow(caller, adapter)    → RateLimitExceeded
//!   ├─ credentials.inject(adapter, req)  → AuthenticationFailed
//!   ├─ upstream.call × retries           → Upstream | Timeout
//!   └─ audit.record(..)                  (always, best-effort)
//! ```

use crate::audit::{AuditLog, AuditRecord};
use crate::circuit::{CircuitBreaker, CircuitPermit, CircuitSnapshot};
use crate::error::{ExecutionError, ExecutionResult};
use crate::rate_limit::{Decision, RateLimiter};
use crate::registry::AdapterRegistry;
use crate::retry::RetryPolicy;
use crate::upstream::{HttpUpstream, Upstream};
use chrono::Utc;
use relay_adapter::{build_request, validate_parameters, AdapterError, FieldError, UpstreamResponse};
use relay_auth::CredentialStore;
use relay_config::GatewayConfig;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub adapter_name: String,
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub caller_id: String,
    /// Opaque; recorded in the audit trail only.
    pub metadata: Value,
}

impl ExecutionRequest {
    pub fn new(adapter: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter.into(),
            tool_name: tool.into(),
            parameters: Map::new(),
            caller_id: "anonymous".into(),
            metadata: Value::Null,
        }
    }

    /// Non-object values are treated as no parameters.
    pub fn with_parameters(mut self, params: Value) -> Self {
        self.parameters = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller_id = caller.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn snapshot(&self) -> Value {
        json!({
            "parameters": self.parameters,
            "metadata": self.metadata,
        })
    }
}

#[derive(Clone)]
pub struct ExecutionPipeline {
    registry: Arc<AdapterRegistry>,
    credentials: Arc<CredentialStore>,
    limiter: Arc<RateLimiter>,
    circuit: Arc<CircuitBreaker>,
    upstream: Arc<dyn Upstream>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
    upstream_timeout: Duration,
}

impl ExecutionPipeline {
    /// Wire a pipeline from gateway configuration with the HTTP upstream.
    pub fn from_config(
        cfg: &GatewayConfig,
        registry: Arc<AdapterRegistry>,
        credentials: Arc<CredentialStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            registry,
            credentials,
            limiter: Arc::new(RateLimiter::new(cfg.rate_limit).with_overrides(cfg.adapter_limits.clone())),
            circuit: Arc::new(CircuitBreaker::new(cfg.circuit)),
            upstream: Arc::new(HttpUpstream::default()),
            audit,
            retry: cfg.retry.into(),
            upstream_timeout: cfg.upstream_timeout,
        }
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitBreaker) -> Self {
        self.circuit = Arc::new(circuit);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn circuit_snapshot(&self, adapter: &str) -> CircuitSnapshot {
        self.circuit.snapshot(adapter)
    }

    /// Upper bound on one dispatch: every attempt at the deadline, the
    /// longest backoff between attempts, and the audit write.
    pub fn dispatch_budget(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        self.upstream_timeout * attempts + self.retry.max_delay * (attempts - 1) + self.audit.timeout()
    }

    /// Run one invocation to completion and record it.
    ///
    /// The work runs on its own task: dropping the returned future (a
    /// disconnected client, a request timeout) does not cancel the upstream
    /// call, the circuit outcome or the audit record.
    pub async fn dispatch(&self, req: ExecutionRequest) -> ExecutionResult {
        let pipeline = self.clone();
        let adapter = req.adapter_name.clone();
        let started = Instant::now();
        match tokio::spawn(async move { pipeline.dispatch_attached(req).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => ExecutionResult::Failure {
                error: ExecutionError::Upstream {
                    adapter,
                    status: None,
                    message: format!("dispatch cancelled: {e}"),
                    body: Value::Null,
                    attempts: 0,
                },
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            },
        }
    }

    async fn dispatch_attached(&self, req: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let outcome = self.run(&req).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let timestamp = Utc::now();

        let result = match outcome {
            Ok(resp) => ExecutionResult::Success {
                data: resp.body,
                status: resp.status,
                duration_ms,
                timestamp,
            },
            Err(error) => ExecutionResult::Failure {
                error,
                duration_ms,
                timestamp,
            },
        };

        let record = AuditRecord {
            adapter_name: req.adapter_name.clone(),
            tool_name: req.tool_name.clone(),
            caller_id: req.caller_id.clone(),
            request_snapshot: req.snapshot(),
            result_snapshot: result.snapshot(),
            status_code: result.status_code(),
            duration_ms,
            timestamp,
        };
        self.audit.record(&record).await;

        let code = result.code();
        metrics::counter!("relay_dispatch_total", "adapter" => req.adapter_name.clone(), "code" => code)
            .increment(1);
        metrics::histogram!("relay_dispatch_duration_ms", "adapter" => req.adapter_name.clone())
            .record(duration_ms as f64);
        info!(
            adapter = %req.adapter_name,
            tool = %req.tool_name,
            caller = %req.caller_id,
            code,
            duration_ms,
            "dispatch"
        );
        result
    }

    async fn run(&self, req: &ExecutionRequest) -> Result<UpstreamResponse, ExecutionError> {
        let adapter = self
            .registry
            .lookup(&req.adapter_name)
            .ok_or_else(|| ExecutionError::AdapterNotFound {
                adapter: req.adapter_name.clone(),
            })?;
        let tool = adapter
            .tool(&req.tool_name)
            .ok_or_else(|| ExecutionError::ToolNotFound {
                adapter: adapter.name.clone(),
                tool: req.tool_name.clone(),
            })?;

        validate_parameters(&tool.input_schema, &req.parameters)
            .map_err(|fields| ExecutionError::Validation { fields })?;
        let outgoing = build_request(
            &adapter,
            tool,
            &req.parameters,
            self.upstream_timeout.as_millis() as u64,
        )
        .map_err(|e| ExecutionError::Validation {
            fields: vec![FieldError {
                field: "path".into(),
                message: e.to_string(),
            }],
        })?;

        let permit = self
            .circuit
            .acquire(&adapter.name)
            .map_err(|wait| ExecutionError::CircuitOpen {
                adapter: adapter.name.clone(),
                retry_after_ms: wait.as_millis() as u64,
            })?;

        if let Decision::Denied { reset_at, limit } = self.limiter.allow(&req.caller_id, &adapter.name) {
            let remaining = reset_at.saturating_duration_since(Instant::now());
            let reset_at = Utc::now()
                + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
            return Err(ExecutionError::RateLimitExceeded {
                adapter: adapter.name.clone(),
                caller: req.caller_id.clone(),
                limit,
                reset_at,
            });
        }

        let outgoing = self
            .credentials
            .inject(&adapter, outgoing)
            .await
            .map_err(|e| ExecutionError::AuthenticationFailed {
                adapter: adapter.name.clone(),
                reason: e.to_string(),
            })?;

        self.call_with_retry(&adapter.name, &outgoing, permit).await
    }

    async fn call_with_retry(
        &self,
        adapter: &str,
        outgoing: &relay_adapter::OutgoingRequest,
        permit: CircuitPermit,
    ) -> Result<UpstreamResponse, ExecutionError> {
        let deadline = Duration::from_millis(outgoing.timeout_ms);
        // A half-open trial is a single probe of a provider known to be failing.
        let max_attempts = if permit.is_trial() {
            1
        } else {
            self.retry.max_attempts.max(1)
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let failure = match tokio::time::timeout(deadline, self.upstream.call(adapter, outgoing)).await {
                Ok(Ok(resp)) if resp.is_success() => {
                    permit.success();
                    return Ok(resp);
                }
                Ok(Ok(resp)) if !resp.is_transient() => {
                    // The provider answered; the caller's request was at fault.
                    permit.success();
                    if resp.status == 401 {
                        self.credentials.invalidate(adapter);
                    }
                    return Err(ExecutionError::Upstream {
                        adapter: adapter.to_string(),
                        status: Some(resp.status),
                        message: format!("upstream returned {}", resp.status),
                        body: resp.body,
                        attempts: attempt,
                    });
                }
                Ok(Ok(resp)) => ExecutionError::Upstream {
                    adapter: adapter.to_string(),
                    status: Some(resp.status),
                    message: format!("upstream returned {}", resp.status),
                    body: resp.body,
                    attempts: attempt,
                },
                Ok(Err(AdapterError::Timeout { .. })) | Err(_) => ExecutionError::Timeout {
                    adapter: adapter.to_string(),
                    timeout_ms: outgoing.timeout_ms,
                    attempts: attempt,
                },
                Ok(Err(e)) => ExecutionError::Upstream {
                    adapter: adapter.to_string(),
                    status: None,
                    message: e.to_string(),
                    body: Value::Null,
                    attempts: attempt,
                },
            };

            if attempt >= max_attempts {
                permit.failure();
                return Err(failure);
            }

            let delay = self.retry.delay_for(attempt - 1);
            metrics::counter!("relay_upstream_retries_total", "adapter" => adapter.to_string()).increment(1);
            debug!(adapter, attempt, ?delay, error = %failure, "transient upstream failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_adapter::{AdapterDescriptor, AuthType, OutgoingRequest, ParamType, ToolDescriptor};
    use relay_auth::{AccessToken, AuthStrategy, OAuth2Session, RefreshPolicy, TokenError, TokenSource};
    use relay_config::{CircuitConfig, RateLimitConfig};
    use relay_ledger::{Ledger, MemoryLedger};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone)]
    enum Reply {
        Status(u16, Value),
        Hang,
        Refused,
    }

    struct MockUpstream {
        calls: AtomicU32,
        script: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        last: Mutex<Option<OutgoingRequest>>,
    }

    impl MockUpstream {
        fn new(fallback: Reply) -> Arc<Self> {
            Self::scripted(vec![], fallback)
        }

        fn scripted(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into()),
                fallback,
                last: Mutex::new(None),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn call(&self, _adapter: &str, req: &OutgoingRequest) -> Result<UpstreamResponse, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(req.clone());
            let reply = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
            match reply {
                Reply::Status(status, body) => Ok(UpstreamResponse::json(status, body)),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(UpstreamResponse::json(200, Value::Null))
                }
                Reply::Refused => Err(AdapterError::Http("connection refused".into())),
            }
        }
    }

    fn ok() -> Reply {
        Reply::Status(200, json!({"status": true}))
    }

    fn registry() -> Arc<AdapterRegistry> {
        let reg = AdapterRegistry::new();
        reg.register(
            AdapterDescriptor::new("paystack-api", "https://api.paystack.co", AuthType::Bearer).with_tool(
                ToolDescriptor::new("verify_transaction", "Verify a transaction")
                    .param("reference", ParamType::String, true)
                    .route("GET", "/transaction/verify/{reference}"),
            ),
        )
        .unwrap();
        reg.register(
            AdapterDescriptor::new("stripe-api", "https://api.stripe.com/v1", AuthType::Bearer)
                .with_tool(ToolDescriptor::new("create_customer", "").param("email", ParamType::String, false)),
        )
        .unwrap();
        reg.register(
            AdapterDescriptor::new("acme-bank", "https://acme.example.com", AuthType::Basic)
                .with_tool(ToolDescriptor::new("balance", "")),
        )
        .unwrap();
        Arc::new(reg)
    }

    fn credentials() -> Arc<CredentialStore> {
        let mut store = CredentialStore::new();
        store.set("paystack-api", AuthStrategy::Bearer { token: "sk_paystack".into() });
        store.set("stripe-api", AuthStrategy::Bearer { token: "sk_stripe".into() });
        Arc::new(store)
    }

    struct Harness {
        pipeline: ExecutionPipeline,
        upstream: Arc<MockUpstream>,
        ledger: Arc<MemoryLedger>,
    }

    fn harness(upstream: Arc<MockUpstream>) -> Harness {
        harness_with(upstream, credentials())
    }

    fn harness_with(upstream: Arc<MockUpstream>, credentials: Arc<CredentialStore>) -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        let audit = Arc::new(AuditLog::new(ledger.clone(), Duration::from_secs(1)));
        let cfg = GatewayConfig {
            circuit: CircuitConfig {
                threshold: 3,
                window: Duration::from_secs(60),
                cooldown: Duration::from_secs(30),
                max_cooldown: Duration::from_secs(120),
            },
            upstream_timeout: Duration::from_millis(500),
            adapter_limits: HashMap::from([(
                "stripe-api".to_string(),
                RateLimitConfig::new(2, Duration::from_secs(60)),
            )]),
            ..GatewayConfig::default()
        };
        let pipeline = ExecutionPipeline::from_config(&cfg, registry(), credentials, audit)
            .with_upstream(upstream.clone())
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                jitter: 0.0,
            });
        Harness {
            pipeline,
            upstream,
            ledger,
        }
    }

    fn verify(reference: Option<&str>) -> ExecutionRequest {
        let params = match reference {
            Some(r) => json!({ "reference": r }),
            None => json!({}),
        };
        ExecutionRequest::new("paystack-api", "verify_transaction")
            .with_parameters(params)
            .with_caller("u1")
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_adapter_and_tool() {
        let h = harness(MockUpstream::new(ok()));
        let r = h.pipeline.dispatch(ExecutionRequest::new("nope-api", "x")).await;
        assert_eq!(r.error().unwrap().code(), "adapter_not_found");
        let r = h.pipeline.dispatch(ExecutionRequest::new("paystack-api", "refund")).await;
        assert_eq!(r.error().unwrap().code(), "tool_not_found");
        assert_eq!(h.upstream.calls(), 0);
        assert_eq!(h.ledger.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reference_is_validation_error() {
        let h = harness(MockUpstream::new(ok()));
        let r = h.pipeline.dispatch(verify(None)).await;
        match r.error() {
            Some(ExecutionError::Validation { fields }) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "reference");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(h.upstream.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_call_reaches_upstream_with_credentials() {
        let h = harness(MockUpstream::new(ok()));
        let r = h.pipeline.dispatch(verify(Some("T123"))).await;
        assert!(r.is_success(), "{r:?}");
        assert_eq!(h.upstream.calls(), 1);

        let sent = h.upstream.last.lock().clone().unwrap();
        assert_eq!(sent.url, "https://api.paystack.co/transaction/verify/T123");
        assert_eq!(sent.headers["Authorization"], "Bearer sk_paystack");

        let audit = h.ledger.entries().await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["statusCode"], 200);
        assert!(!audit[0].to_string().contains("sk_paystack"));
    }

    #[tokio::test(start_paused = true)]
    async fn stripe_two_per_minute() {
        let h = harness(MockUpstream::new(ok()));
        let call = || {
            ExecutionRequest::new("stripe-api", "create_customer")
                .with_caller("u1")
                .with_parameters(json!({"email": "a@b.co"}))
        };
        assert!(h.pipeline.dispatch(call()).await.is_success());
        assert!(h.pipeline.dispatch(call()).await.is_success());
        match h.pipeline.dispatch(call()).await.error() {
            Some(ExecutionError::RateLimitExceeded { reset_at, limit, .. }) => {
                assert_eq!(*limit, 2);
                assert!(*reset_at > Utc::now());
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert_eq!(h.upstream.calls(), 2);

        // another caller has its own window
        assert!(h.pipeline.dispatch(call().with_caller("u2")).await.is_success());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(h.pipeline.dispatch(call()).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let up = MockUpstream::scripted(
            vec![Reply::Status(502, json!("bad gateway")), Reply::Refused],
            ok(),
        );
        let h = harness(up);
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        assert!(r.is_success(), "{r:?}");
        assert_eq!(h.upstream.calls(), 3);
        assert_eq!(h.ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let h = harness(MockUpstream::new(Reply::Status(404, json!({"message": "not found"}))));
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        match r.error() {
            Some(ExecutionError::Upstream { status, attempts, body, .. }) => {
                assert_eq!(*status, Some(404));
                assert_eq!(*attempts, 1);
                assert_eq!(body["message"], "not found");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.upstream.calls(), 1);
        assert_eq!(h.pipeline.circuit_snapshot("paystack-api").state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_timeout() {
        let h = harness(MockUpstream::new(Reply::Hang));
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        match r.error() {
            Some(ExecutionError::Timeout { timeout_ms, attempts, .. }) => {
                assert_eq!(*timeout_ms, 500);
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_then_recovers_through_one_trial() {
        let up = MockUpstream::scripted(vec![Reply::Status(500, Value::Null); 9], ok());
        let h = harness(up);

        for _ in 0..3 {
            let r = h.pipeline.dispatch(verify(Some("T1"))).await;
            assert_eq!(r.error().unwrap().code(), "upstream_error");
        }
        assert_eq!(h.upstream.calls(), 9);

        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        assert_eq!(r.error().unwrap().code(), "circuit_open");
        assert_eq!(h.upstream.calls(), 9);

        tokio::time::advance(Duration::from_secs(30)).await;
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        assert!(r.is_success(), "{r:?}");
        assert_eq!(h.upstream.calls(), 10);
        assert_eq!(h.pipeline.circuit_snapshot("paystack-api").state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_circuit() {
        let h = harness(MockUpstream::new(Reply::Status(503, Value::Null)));
        for _ in 0..3 {
            h.pipeline.dispatch(verify(Some("T1"))).await;
        }
        assert_eq!(h.upstream.calls(), 9);
        tokio::time::advance(Duration::from_secs(30)).await;
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        match r.error() {
            Some(ExecutionError::Upstream { attempts, .. }) => assert_eq!(*attempts, 1),
            other => panic!("unexpected {other:?}"),
        }
        // the trial is not retried
        assert_eq!(h.upstream.calls(), 10);
        assert_eq!(h.pipeline.circuit_snapshot("paystack-api").state, CircuitState::Open);
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        assert_eq!(r.error().unwrap().code(), "circuit_open");
        assert_eq!(h.upstream.calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn last_attempt_decides_timeout_or_upstream() {
        let h = harness(MockUpstream::scripted(
            vec![Reply::Hang, Reply::Hang, Reply::Status(502, json!("bad gateway"))],
            ok(),
        ));
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        match r.error() {
            Some(ExecutionError::Upstream { status, attempts, .. }) => {
                assert_eq!(*status, Some(502));
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }

        let h = harness(MockUpstream::scripted(
            vec![Reply::Status(502, json!("bad gateway"))],
            Reply::Hang,
        ));
        let r = h.pipeline.dispatch(verify(Some("T1"))).await;
        assert_eq!(r.error().unwrap().code(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_still_settles_circuit_and_audit() {
        let h = harness(MockUpstream::new(Reply::Hang));
        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), h.pipeline.dispatch(verify(Some("T1")))).await;
        assert!(abandoned.is_err());
        assert!(h.ledger.is_empty());

        tokio::time::sleep(h.pipeline.dispatch_budget()).await;
        assert_eq!(h.ledger.len(), 1);
        assert_eq!(h.upstream.calls(), 3);
        assert_eq!(h.pipeline.circuit_snapshot("paystack-api").failure_count, 1);
        let records = h.pipeline.audit().records().await.unwrap();
        assert_eq!(records[0].status_code, 503);
    }

    #[test]
    fn dispatch_budget_covers_retries_and_audit() {
        let h = harness(MockUpstream::new(ok()));
        // 3 × 500ms + 2 × 50ms backoff + 1s audit
        assert_eq!(h.pipeline.dispatch_budget(), Duration::from_millis(2600));
    }

    struct Issuer {
        issued: AtomicU32,
    }

    #[async_trait]
    impl TokenSource for Issuer {
        async fn fetch(&self) -> Result<AccessToken, TokenError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::expiring_in(format!("tok-{n}"), Duration::from_secs(3600)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_401_forces_token_refresh() {
        let issuer = Arc::new(Issuer { issued: AtomicU32::new(0) });
        let mut store = CredentialStore::new();
        store.set(
            "insights-api",
            AuthStrategy::OAuth2(OAuth2Session::new("insights-api", issuer.clone(), RefreshPolicy::default())),
        );
        let h = harness_with(
            MockUpstream::scripted(vec![ok(), Reply::Status(401, json!({"error": "invalid_token"}))], ok()),
            Arc::new(store),
        );
        h.pipeline
            .registry()
            .register(
                AdapterDescriptor::new("insights-api", "https://insights.example.com", AuthType::OAuth2)
                    .with_tool(ToolDescriptor::new("report", "")),
            )
            .unwrap();
        let report = || ExecutionRequest::new("insights-api", "report").with_caller("u1");

        assert!(h.pipeline.dispatch(report()).await.is_success());
        let r = h.pipeline.dispatch(report()).await;
        match r.error() {
            Some(ExecutionError::Upstream { status, .. }) => assert_eq!(*status, Some(401)),
            other => panic!("unexpected {other:?}"),
        }
        // the cached token was reused until the provider rejected it
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);

        assert!(h.pipeline.dispatch(report()).await.is_success());
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 2);
        let sent = h.upstream.last.lock().clone().unwrap();
        assert_eq!(sent.headers["Authorization"], "Bearer tok-2");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_fail_authentication() {
        let h = harness(MockUpstream::new(ok()));
        let r = h.pipeline.dispatch(ExecutionRequest::new("acme-bank", "balance")).await;
        let err = r.error().unwrap();
        assert_eq!(err.code(), "authentication_failed");
        assert_eq!(err.status_code(), 401);
        assert_eq!(h.upstream.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_dispatch_writes_one_audit_record() {
        let h = harness(MockUpstream::new(ok()));
        let requests = vec![
            ExecutionRequest::new("nope-api", "x"),
            ExecutionRequest::new("paystack-api", "nope"),
            verify(None),
            verify(Some("T1")),
            ExecutionRequest::new("acme-bank", "balance"),
        ];
        let n = requests.len();
        for r in requests {
            h.pipeline.dispatch(r.with_metadata(json!({"trace": "abc"}))).await;
        }
        let records = h.pipeline.audit().records().await.unwrap();
        assert_eq!(records.len(), n);
        assert!(records.iter().all(|r| r.request_snapshot["metadata"]["trace"] == "abc"));
        assert_eq!(records[2].status_code, 422);
    }

    struct Failing;

    #[async_trait]
    impl Ledger for Failing {
        async fn append(&self, _entry: &Value) -> anyhow::Result<()> {
            anyhow::bail!("read-only filesystem")
        }
        async fn entries(&self) -> anyhow::Result<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn audit_failure_does_not_change_result() {
        let audit = Arc::new(AuditLog::new(Arc::new(Failing), Duration::from_secs(1)));
        let pipeline = ExecutionPipeline::from_config(&GatewayConfig::default(), registry(), credentials(), audit)
            .with_upstream(MockUpstream::new(ok()));
        assert!(pipeline.dispatch(verify(Some("T1"))).await.is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_respect_limit() {
        let h = harness(MockUpstream::new(ok()));
        let pipeline = Arc::new(h.pipeline);
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let p = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    p.dispatch(ExecutionRequest::new("stripe-api", "create_customer").with_caller("u1"))
                        .await
                })
            })
            .collect();
        let mut ok_count = 0;
        for t in tasks {
            if t.await.unwrap().is_success() {
                ok_count += 1;
            }
        }
        assert_eq!(ok_count, 2);
        assert_eq!(h.upstream.calls(), 2);
        assert_eq!(h.ledger.len(), 10);
    }
}
