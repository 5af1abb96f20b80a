//! HTTP routes for the speech proxy.
//!
//! - `GET /health` liveness probe
//! - `GET /api/rate-limit-status` quota of the calling client, read-only
//! - `POST /api/speech` quota-gated synthesis, answered with streamed MP3

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{FromRef, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use polly_tts_common::config::Config;
use polly_tts_common::error::Error;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::admission::{self, AdmissionGate, IdentityPolicy, QUOTA_HEADERS, insert_quota_headers};
use crate::clock::{Clock, SystemClock};
use crate::handler::{SpeechParams, SynthesisProxy};
use crate::provider::SpeechProvider;
use crate::quota::{ClientIdentity, QuotaPolicy, QuotaStore};

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBody {
    /// Always `OK` while the process serves requests
    pub status: String,
    /// Human readable service description
    pub message: String,
}

impl HealthBody {
    fn ok() -> Self {
        Self {
            status: "OK".to_string(),
            message: "Polly TTS API is running".to_string(),
        }
    }
}

/// Body of `GET /api/rate-limit-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatusBody {
    /// Configured limit
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Seconds until the window resets
    pub reset_seconds: u64,
}

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    gate: AdmissionGate,
    proxy: SynthesisProxy,
}

impl AppState {
    /// Build the state for `config` on the system clock.
    pub fn new(config: &Config, provider: Arc<dyn SpeechProvider>) -> Self {
        Self::with_clock(config, provider, Arc::new(SystemClock))
    }

    /// Build the state reading quota time from `clock`.
    pub fn with_clock(
        config: &Config,
        provider: Arc<dyn SpeechProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = Arc::new(QuotaStore::with_clock(QuotaPolicy::from_config(config), clock));
        let identity = IdentityPolicy {
            trust_proxy_headers: config.trust_proxy_headers,
        };

        Self {
            gate: AdmissionGate::new(quota, identity),
            proxy: SynthesisProxy::new(provider, config.synthesis_timeout),
        }
    }

    /// The quota store shared by all routes.
    pub fn quota(&self) -> Arc<QuotaStore> {
        self.gate.quota().clone()
    }
}

impl FromRef<AppState> for IdentityPolicy {
    fn from_ref(state: &AppState) -> Self {
        state.gate.identity_policy()
    }
}

/// Build the router with CORS applied to every route.
pub fn router(state: AppState) -> Router {
    let speech = Router::new()
        .route("/api/speech", post(speech))
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            admission::enforce,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(QUOTA_HEADERS);

    Router::new()
        .route("/health", get(health))
        .route("/api/rate-limit-status", get(rate_limit_status))
        .merge(speech)
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody::ok())
}

async fn rate_limit_status(State(state): State<AppState>, identity: ClientIdentity) -> Response {
    let quota = state.gate.quota();
    let status = quota.status(&identity);
    debug!(client = %identity, remaining = status.remaining, "Quota status requested");

    let body = QuotaStatusBody {
        limit: status.limit,
        remaining: status.remaining,
        reset_seconds: admission::ceil_secs(status.reset_after),
    };

    let mut response = Json(body).into_response();
    insert_quota_headers(
        response.headers_mut(),
        status.limit,
        status.remaining,
        status.reset_after,
        quota.policy().window,
    );
    response
}

async fn speech(State(state): State<AppState>, body: Bytes) -> Result<Response, Error> {
    let request = SpeechParams::from_json(&body)?.validate()?;
    state.proxy.synthesize(request).await
}

/// Periodically drop quota records whose window has elapsed.
///
/// The first sweep runs one full `every` after startup.
pub fn spawn_quota_sweeper(quota: Arc<QuotaStore>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "Starting quota sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = quota.purge_expired();
            debug!(removed, tracked = quota.len(), "Quota sweep finished");
        }
    })
}
