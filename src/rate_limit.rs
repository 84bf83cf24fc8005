//! Fixed-window request-rate limiting.
//!
//! Each key holds a remaining-points counter and a window deadline. Counters
//! are created lazily on first consumption, reset when the window elapses,
//! and live in a pluggable backing store. Exceeding the budget is a normal
//! outcome reported with a retry hint, never an error; a failing store must
//! not block traffic (fail open).

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpResponse};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use serde::Serialize;

use crate::config::RateLimitSettings;
use crate::token;

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset_in_ms: u64 },
    Rejected { retry_after_ms: u64 },
}

#[derive(thiserror::Error, Debug)]
#[error("rate limit store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

/// Backing store seam. The default is pod-local; a shared implementation can
/// coordinate across instances, wrapped in [`FailOpenStore`] so its outages
/// degrade to the local counters instead of rejecting traffic.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Deduct `cost` from `key`'s budget of `points` per `window`.
    ///
    /// A deduction that would go negative is rejected and NOT committed;
    /// `cost == 0` probes current state without consuming.
    async fn consume(
        &self,
        key: &str,
        cost: u32,
        points: u32,
        window: Duration,
    ) -> Result<Decision, StoreUnavailable>;
}

struct Counter {
    remaining: u32,
    window_start: Instant,
}

/// In-process store. Does not survive restarts and does not coordinate
/// across instances; stale keys are reset in place on next touch.
#[derive(Default)]
pub struct InMemoryStore {
    counters: DashMap<String, Counter>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn consume(
        &self,
        key: &str,
        cost: u32,
        points: u32,
        window: Duration,
    ) -> Result<Decision, StoreUnavailable> {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert_with(|| Counter {
            remaining: points,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= window {
            entry.remaining = points;
            entry.window_start = now;
        }
        let reset_in = window
            .checked_sub(now.duration_since(entry.window_start))
            .unwrap_or(Duration::ZERO);
        if cost > entry.remaining {
            return Ok(Decision::Rejected {
                retry_after_ms: reset_in.as_millis() as u64,
            });
        }
        entry.remaining -= cost;
        Ok(Decision::Allowed {
            remaining: entry.remaining,
            reset_in_ms: reset_in.as_millis() as u64,
        })
    }
}

/// Wraps a shared primary store and degrades to a local fallback when the
/// primary errors. Store outages must never reject requests.
pub struct FailOpenStore {
    primary: Arc<dyn RateLimitStore>,
    fallback: InMemoryStore,
}

impl FailOpenStore {
    pub fn new(primary: Arc<dyn RateLimitStore>) -> Self {
        Self {
            primary,
            fallback: InMemoryStore::new(),
        }
    }
}

#[async_trait]
impl RateLimitStore for FailOpenStore {
    async fn consume(
        &self,
        key: &str,
        cost: u32,
        points: u32,
        window: Duration,
    ) -> Result<Decision, StoreUnavailable> {
        match self.primary.consume(key, cost, points, window).await {
            Ok(decision) => Ok(decision),
            Err(e) => {
                tracing::warn!(error = %e, "rate limit primary store failed, using local fallback");
                self.fallback.consume(key, cost, points, window).await
            }
        }
    }
}

/// High level limiter used by the middleware.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    pub settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    pub fn in_memory(settings: RateLimitSettings) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), settings)
    }

    /// Consume `cost` points for `key`. A store error allows the request.
    pub async fn consume(&self, key: &str, cost: u32) -> Decision {
        match self
            .store
            .consume(key, cost, self.settings.points, self.settings.window)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "rate limit store unavailable, allowing request");
                Decision::Allowed {
                    remaining: self.settings.points,
                    reset_in_ms: 0,
                }
            }
        }
    }

    /// Check whether `key` has budget left without consuming any.
    pub async fn probe(&self, key: &str) -> Decision {
        match self.consume(key, 0).await {
            Decision::Allowed { remaining: 0, reset_in_ms } => Decision::Rejected {
                retry_after_ms: reset_in_ms,
            },
            other => other,
        }
    }
}

#[derive(Serialize)]
struct RateLimitedBody<'a> {
    success: bool,
    error: &'a str,
    /// Whole seconds until the window resets, rounded up.
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

fn too_many_requests(retry_after_ms: u64) -> HttpResponse {
    let retry_after_secs = retry_after_ms.div_ceil(1000);
    HttpResponse::TooManyRequests()
        .insert_header(("Retry-After", retry_after_secs.to_string()))
        .json(RateLimitedBody {
            success: false,
            error: "too many requests, slow down",
            retry_after: retry_after_secs,
        })
}

/// Identity for budgeting: authenticated subject if the request carries a
/// valid token, else the caller address; scoped by method and path template
/// so endpoint families get independent budgets.
fn derive_key(req: &ServiceRequest, secret: &str) -> String {
    let ident = crate::auth::credential_from_request(req.request())
        .and_then(|t| token::verify(secret, &t, Utc::now().timestamp_millis()).ok())
        .map(|v| format!("user_{}", v.subject_id))
        .unwrap_or_else(|| {
            let ip = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();
            format!("ip_{ip}")
        });
    let path = req
        .match_pattern()
        .unwrap_or_else(|| req.path().to_string());
    format!("{}_{}_{}", ident, req.method(), path)
}

/// Rate limiting middleware. Wrap it around a scope; budgets are enforced
/// before handlers run (or after, when only penalizing failures).
#[derive(Clone)]
pub struct RateLimit {
    limiter: RateLimiter,
    secret: Arc<str>,
}

impl RateLimit {
    pub fn new(limiter: RateLimiter, token_secret: &str) -> Self {
        Self {
            limiter,
            secret: Arc::from(token_secret),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            secret: self.secret.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: RateLimiter,
    secret: Arc<str>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let limiter = self.limiter.clone();
        let secret = self.secret.clone();
        Box::pin(async move {
            if !limiter.settings.enabled {
                return svc.call(req).await.map(|res| res.map_into_left_body());
            }

            let key = derive_key(&req, &secret);
            let method = req.method().clone();
            let cost = if method == actix_web::http::Method::GET
                || method == actix_web::http::Method::HEAD
                || method == actix_web::http::Method::OPTIONS
            {
                1
            } else {
                limiter.settings.write_cost
            };

            if limiter.settings.penalize_failures_only {
                // Consumption is deferred until the response status is known;
                // an exhausted budget still rejects up front.
                if let Decision::Rejected { retry_after_ms } = limiter.probe(&key).await {
                    metrics::counter!("velo_rate_limited_total", 1);
                    let (req, _pl) = req.into_parts();
                    let resp = too_many_requests(retry_after_ms).map_into_right_body();
                    return Ok(ServiceResponse::new(req, resp));
                }
                let res = svc.call(req).await?;
                if res.status().as_u16() >= 400 {
                    limiter.consume(&key, cost).await;
                }
                return Ok(res.map_into_left_body());
            }

            match limiter.consume(&key, cost).await {
                Decision::Allowed { .. } => {
                    svc.call(req).await.map(|res| res.map_into_left_body())
                }
                Decision::Rejected { retry_after_ms } => {
                    metrics::counter!("velo_rate_limited_total", 1);
                    let (req, _pl) = req.into_parts();
                    let resp = too_many_requests(retry_after_ms).map_into_right_body();
                    Ok(ServiceResponse::new(req, resp))
                }
            }
        })
    }
}
