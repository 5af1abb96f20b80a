//! Speech provider implementations.
//!
//! A provider turns a validated [`SynthesisRequest`] into a stream of MP3
//! bytes. The proxy only depends on the [`SpeechProvider`] trait; which
//! implementation is active is decided once at startup from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_polly::Client;
use aws_sdk_polly::config::Region;
use aws_sdk_polly::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_polly::types::{Engine, OutputFormat, VoiceId};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use polly_tts_common::config::{Config, ProviderConfig};
use polly_tts_common::error::Error;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::handler::SynthesisRequest;

/// MIME type of the audio every provider is asked for.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Output format requested from the provider.
pub const OUTPUT_FORMAT: &str = "mp3";

/// Voice engine requested from the provider.
pub const ENGINE: &str = "neural";

/// Audio produced by a provider, delivered chunk by chunk.
pub type AudioStream = BoxStream<'static, Result<Bytes, Error>>;

/// External text-to-speech capability.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Start synthesis and return the audio as it is produced.
    ///
    /// Errors returned here happen before any audio exists. Errors inside the
    /// stream happen after synthesis started.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioStream, Error>;
}

/// Build the provider selected by `config`.
pub async fn from_config(config: &Config) -> Arc<dyn SpeechProvider> {
    match &config.provider {
        ProviderConfig::Polly => Arc::new(PollySpeechProvider::from_config(config).await),
        ProviderConfig::Http { url } => Arc::new(HttpSpeechProvider::new(url.clone())),
    }
}

// =============================================================================
// AWS Polly
// =============================================================================

/// AWS Polly through the AWS SDK.
pub struct PollySpeechProvider {
    client: Client,
}

impl PollySpeechProvider {
    /// Provider name.
    pub const NAME: &'static str = "polly";

    /// Wrap an existing SDK client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a client for the configured region and profile.
    ///
    /// Credentials come from the default AWS chain (environment variables,
    /// profile files, container or instance metadata).
    pub async fn from_config(config: &Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(profile) = &config.aws_profile {
            loader = loader.profile_name(profile);
        }

        loader = loader.region(Region::new(config.aws_region.clone()));

        let sdk_config = loader.load().await;
        info!(region = %config.aws_region, "Polly client configured");

        Self::new(Client::new(&sdk_config))
    }
}

#[async_trait]
impl SpeechProvider for PollySpeechProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(level = "debug", name = "polly_synthesize", skip_all, fields(voice = %request.voice()))]
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioStream, Error> {
        let output = self
            .client
            .synthesize_speech()
            .text(request.text())
            .voice_id(VoiceId::from(request.voice()))
            .output_format(OutputFormat::Mp3)
            .engine(Engine::Neural)
            .send()
            .await
            .map_err(|e| {
                let message = e
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(&e).to_string());
                Error::provider(Self::NAME, message)
            })?;

        debug!(
            content_type = output.content_type().unwrap_or_default(),
            "Polly accepted synthesis request"
        );

        let audio = stream::try_unfold(output.audio_stream, |mut body| async move {
            match body.next().await {
                Some(Ok(chunk)) => Ok(Some((chunk, body))),
                Some(Err(e)) => Err(Error::provider(Self::NAME, e.to_string())),
                None => Ok(None),
            }
        });

        Ok(audio.boxed())
    }
}

// =============================================================================
// Generic HTTP endpoint
// =============================================================================

/// Body posted to an HTTP speech endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest<'a> {
    /// Text to synthesize
    pub text: &'a str,
    /// Requested audio format
    pub output_format: &'static str,
    /// Voice identifier
    pub voice_id: &'a str,
    /// Voice engine
    pub engine: &'static str,
}

impl<'a> From<&'a SynthesisRequest> for ProviderRequest<'a> {
    fn from(request: &'a SynthesisRequest) -> Self {
        Self {
            text: request.text(),
            output_format: OUTPUT_FORMAT,
            voice_id: request.voice(),
            engine: ENGINE,
        }
    }
}

/// Speech endpoint reached over plain HTTP.
///
/// The endpoint receives a [`ProviderRequest`] as JSON and answers with the
/// audio as the response body. Any non-2xx answer is a provider error whose
/// message is taken from the body.
pub struct HttpSpeechProvider {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSpeechProvider {
    /// Provider name.
    pub const NAME: &'static str = "http";

    /// Create a provider posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Create a provider with a preconfigured HTTP client.
    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

/// Pull a human readable message out of an error body.
///
/// JSON bodies with a `message` or `error` string field yield that field;
/// anything else is returned as is.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(level = "debug", name = "http_synthesize", skip_all, fields(endpoint = %self.endpoint, voice = %request.voice()))]
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioStream, Error> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ProviderRequest::from(request))
            .send()
            .await
            .map_err(|e| Error::provider(Self::NAME, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body);
            return Err(Error::provider(
                Self::NAME,
                if message.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    message
                },
            ));
        }

        debug!(status = status.as_u16(), "Speech endpoint accepted synthesis request");

        let audio = response
            .bytes_stream()
            .map_err(|e| Error::provider(Self::NAME, format!("Audio stream failed: {}", e)));

        Ok(audio.boxed())
    }
}
