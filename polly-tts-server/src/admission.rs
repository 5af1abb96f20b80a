//! Admission gate for quota-limited routes.
//!
//! The gate resolves who a request belongs to, charges one unit of quota
//! against that identity and either lets the request through or answers 429
//! itself. Both outcomes carry the `RateLimit-*` headers.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, FromRef, FromRequestParts, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use polly_tts_common::error::Error;
use tracing::warn;

use crate::quota::{ClientIdentity, QuotaStore};

/// Configured request limit.
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");

/// Requests left in the current window.
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");

/// Seconds until the window resets.
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Limit and window as `{limit};w={seconds}`.
pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");

/// Forwarding header consulted when proxy headers are trusted.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Every quota header, for CORS exposure.
pub const QUOTA_HEADERS: [HeaderName; 5] = [
    RATELIMIT_LIMIT,
    RATELIMIT_REMAINING,
    RATELIMIT_RESET,
    RATELIMIT_POLICY,
    RETRY_AFTER,
];

/// How client identities are derived from requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityPolicy {
    /// Use the first `X-Forwarded-For` entry instead of the peer address
    pub trust_proxy_headers: bool,
}

impl IdentityPolicy {
    /// Resolve the identity of a request.
    ///
    /// With proxy headers trusted, a parseable first `X-Forwarded-For` entry
    /// wins. Otherwise the peer address is used, and without one every caller
    /// shares the `unknown` identity.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
        if self.trust_proxy_headers {
            if let Some(ip) = forwarded_for(headers) {
                return ClientIdentity::from(ip);
            }
        }

        peer.map(|addr| ClientIdentity::from(addr.ip()))
            .unwrap_or_else(ClientIdentity::unknown)
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(&X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    IdentityPolicy: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let policy = IdentityPolicy::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(policy.resolve(&parts.headers, peer))
    }
}

/// Round a duration up to whole seconds.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Write the `RateLimit-*` headers into `headers`.
pub fn insert_quota_headers(
    headers: &mut HeaderMap,
    limit: u32,
    remaining: u32,
    reset_after: Duration,
    window: Duration,
) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(reset_after)));
    if let Ok(policy) = HeaderValue::from_str(&format!("{};w={}", limit, window.as_secs())) {
        headers.insert(RATELIMIT_POLICY, policy);
    }
}

/// State for [`enforce`].
#[derive(Clone)]
pub struct AdmissionGate {
    quota: Arc<QuotaStore>,
    identity: IdentityPolicy,
}

impl AdmissionGate {
    /// Create a gate charging requests against `quota`.
    pub fn new(quota: Arc<QuotaStore>, identity: IdentityPolicy) -> Self {
        Self { quota, identity }
    }

    /// The quota store this gate charges.
    pub fn quota(&self) -> &Arc<QuotaStore> {
        &self.quota
    }

    /// The identity policy this gate applies.
    pub fn identity_policy(&self) -> IdentityPolicy {
        self.identity
    }
}

impl FromRef<AdmissionGate> for IdentityPolicy {
    fn from_ref(gate: &AdmissionGate) -> Self {
        gate.identity
    }
}

/// Middleware admitting requests that still have quota.
///
/// Rejected requests never reach the inner service and consume nothing.
/// Admitted requests are charged before the handler runs, whatever the
/// handler later returns.
pub async fn enforce(
    State(gate): State<AdmissionGate>,
    identity: ClientIdentity,
    request: Request,
    next: Next,
) -> Response {
    let decision = gate.quota.check_and_increment(&identity);
    let window = gate.quota.policy().window;

    if !decision.allowed {
        warn!(client = %identity, limit = decision.limit, "Rate limit exceeded");
        let mut response = Error::quota_exceeded(decision.limit).into_response();
        let headers = response.headers_mut();
        insert_quota_headers(headers, decision.limit, 0, decision.reset_after, window);
        headers.insert(RETRY_AFTER, HeaderValue::from(ceil_secs(decision.reset_after)));
        return response;
    }

    let mut response = next.run(request).await;
    insert_quota_headers(
        response.headers_mut(),
        decision.limit,
        decision.remaining,
        decision.reset_after,
        window,
    );
    response
}
