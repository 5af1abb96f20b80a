//! Speech synthesis handler.
//!
//! This module validates incoming speech requests and forwards them to the
//! configured [`SpeechProvider`], streaming the resulting audio back to the
//! caller as it arrives.
//!
//! The first audio chunk is awaited before the response is committed, so a
//! provider that fails up front still produces a proper JSON error. Once
//! audio is flowing, a later failure can only end the body early.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use polly_tts_common::error::Error;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Sleep, sleep_until, timeout_at};
use tracing::{Span, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::provider::{AUDIO_CONTENT_TYPE, AudioStream, SpeechProvider};

/// Voice used when the request does not name one.
pub const DEFAULT_VOICE: &str = "Joanna";

/// Maximum text length, counted in characters.
pub const MAX_TEXT_CHARS: usize = 3000;

/// Returned when the text is missing or blank.
pub const TEXT_REQUIRED_MESSAGE: &str = "Text is required";

/// Returned when the text exceeds [`MAX_TEXT_CHARS`].
pub const TEXT_TOO_LONG_MESSAGE: &str = "Text too long. Maximum 3000 characters.";

/// Returned when the voice is not a plain alphanumeric identifier.
pub const INVALID_VOICE_MESSAGE: &str = "Invalid voice identifier";

/// Returned when the body is not a JSON object of the expected shape.
pub const INVALID_BODY_MESSAGE: &str = "Invalid request body";

/// Reported when a provider finishes without producing any audio.
pub const NO_AUDIO_MESSAGE: &str = "No audio content returned from provider";

/// Validation error details for speech requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: &'static str,
    /// Message returned to the caller.
    pub message: &'static str,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::validation(err.message)
    }
}

/// Body of `POST /api/speech`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SpeechParams {
    /// Text to synthesize into speech.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Provider voice identifier. Defaults to [`DEFAULT_VOICE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl SpeechParams {
    /// Parse a request body.
    ///
    /// An empty body is treated as an empty object so that it fails
    /// validation with the usual "text is required" message.
    pub fn from_json(body: &[u8]) -> Result<Self, Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| {
            debug!(error = %e, "Rejected malformed speech request body");
            Error::validation(INVALID_BODY_MESSAGE)
        })
    }

    /// Validate the parameters, reporting the first failure.
    pub fn validate(self) -> Result<SynthesisRequest, ValidationError> {
        let text = self.text.unwrap_or_default();
        SynthesisRequest::new(text, self.voice)
    }
}

/// A request that passed validation.
///
/// Text is forwarded exactly as received; trimming only decides whether it
/// counts as blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    text: String,
    voice: String,
}

impl SynthesisRequest {
    /// Validate `text` and `voice` into a request.
    ///
    /// Checks run in order: blank text, text length, voice format.
    pub fn new(text: impl Into<String>, voice: Option<String>) -> Result<Self, ValidationError> {
        let text = text.into();

        if is_blank(&text) {
            return Err(ValidationError {
                field: "text",
                message: TEXT_REQUIRED_MESSAGE,
            });
        }

        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(ValidationError {
                field: "text",
                message: TEXT_TOO_LONG_MESSAGE,
            });
        }

        let voice = match voice {
            None => DEFAULT_VOICE.to_string(),
            Some(voice) if is_voice_identifier(&voice) => voice,
            Some(_) => {
                return Err(ValidationError {
                    field: "voice",
                    message: INVALID_VOICE_MESSAGE,
                });
            }
        };

        Ok(Self { text, voice })
    }

    /// Text to synthesize.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice identifier.
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Length of the text in characters.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Whitespace-only text, with U+FEFF counted as whitespace.
fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace() || c == '\u{FEFF}')
}

fn is_voice_identifier(voice: &str) -> bool {
    !voice.is_empty() && voice.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Forwards validated requests to a speech provider under a deadline.
#[derive(Clone)]
pub struct SynthesisProxy {
    provider: Arc<dyn SpeechProvider>,
    timeout: Duration,
}

impl SynthesisProxy {
    /// Create a proxy for `provider` that gives up after `timeout`.
    ///
    /// The timeout covers the whole exchange, from the provider call to the
    /// last audio byte.
    pub fn new(provider: Arc<dyn SpeechProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Synthesize `request` and build the streaming audio response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails, returns no audio, or does not
    /// produce the first chunk before the deadline.
    #[instrument(
        level = "info",
        name = "synthesize_speech",
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            provider = self.provider.name(),
            voice = %request.voice(),
            chars = request.char_count(),
        )
    )]
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<Response, Error> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        info!("Synthesizing speech");

        let (first, rest) = self
            .start(&request, deadline)
            .await
            .inspect_err(|e| error!(error = %e, "Speech synthesis failed"))?;

        info!(
            first_chunk_ms = started.elapsed().as_millis() as u64,
            "Audio stream started"
        );

        let audio = AudioForwarder::new(first, rest, deadline, self.timeout, started);
        let headers = [
            (CONTENT_TYPE, AUDIO_CONTENT_TYPE),
            (CONTENT_DISPOSITION, "inline"),
        ];
        Ok((headers, Body::from_stream(audio)).into_response())
    }

    /// Call the provider and wait for the first non-empty chunk.
    async fn start(
        &self,
        request: &SynthesisRequest,
        deadline: Instant,
    ) -> Result<(Bytes, AudioStream), Error> {
        let timed_out = || Error::timeout(self.timeout.as_secs());

        let mut audio = timeout_at(deadline, self.provider.synthesize(request))
            .await
            .map_err(|_| timed_out())??;

        loop {
            match timeout_at(deadline, audio.next()).await {
                Err(_) => return Err(timed_out()),
                Ok(None) => return Err(Error::provider(self.provider.name(), NO_AUDIO_MESSAGE)),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Ok(Some(Ok(chunk))) => return Ok((chunk, audio)),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardState {
    Streaming,
    Completed,
    Failed,
}

/// Response body relaying provider audio to the caller.
///
/// Ends the body with an error if the provider fails or the deadline passes
/// mid-stream. Dropping it early, which is what happens when the client goes
/// away, drops the provider stream with it.
pub struct AudioForwarder {
    pending: Option<Bytes>,
    inner: AudioStream,
    deadline: Pin<Box<Sleep>>,
    timeout: Duration,
    started: Instant,
    state: ForwardState,
    bytes: usize,
    chunks: usize,
    span: Span,
}

impl AudioForwarder {
    fn new(
        first: Bytes,
        inner: AudioStream,
        deadline: Instant,
        timeout: Duration,
        started: Instant,
    ) -> Self {
        Self {
            pending: Some(first),
            inner,
            deadline: Box::pin(sleep_until(deadline)),
            timeout,
            started,
            state: ForwardState::Streaming,
            bytes: 0,
            chunks: 0,
            span: Span::current(),
        }
    }

    fn sent(&mut self, chunk: Bytes) -> Poll<Option<Result<Bytes, Error>>> {
        self.bytes += chunk.len();
        self.chunks += 1;
        Poll::Ready(Some(Ok(chunk)))
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes, Error>>> {
        self.state = ForwardState::Failed;
        let _enter = self.span.enter();
        error!(error = %err, bytes = self.bytes, "Audio stream failed after response started");
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for AudioForwarder {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.state != ForwardState::Streaming {
            return Poll::Ready(None);
        }

        if let Some(chunk) = this.pending.take() {
            return this.sent(chunk);
        }

        // Checked first so a provider that is always ready is still cut off.
        if this.deadline.as_mut().poll(cx).is_ready() {
            let err = Error::timeout(this.timeout.as_secs());
            return this.fail(err);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => this.sent(chunk),
            Poll::Ready(Some(Err(e))) => this.fail(e),
            Poll::Ready(None) => {
                this.state = ForwardState::Completed;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for AudioForwarder {
    fn drop(&mut self) {
        let _enter = self.span.enter();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match self.state {
            ForwardState::Completed => {
                info!(bytes = self.bytes, chunks = self.chunks, elapsed_ms, "Audio stream completed")
            }
            ForwardState::Streaming => warn!(
                bytes = self.bytes,
                chunks = self.chunks,
                elapsed_ms,
                "Client disconnected before audio stream completed"
            ),
            ForwardState::Failed => {}
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_length_limit_is_in_characters(
            ch in prop::sample::select(vec!['a', 'é', '語', '🎤']),
            extra in 0usize..3,
        ) {
            let ok = std::iter::repeat_n(ch, MAX_TEXT_CHARS).collect::<String>();
            prop_assert!(SynthesisRequest::new(ok, None).is_ok());

            let too_long = std::iter::repeat_n(ch, MAX_TEXT_CHARS + 1 + extra).collect::<String>();
            let err = SynthesisRequest::new(too_long, None).unwrap_err();
            prop_assert_eq!(err.message, TEXT_TOO_LONG_MESSAGE);
        }

        #[test]
        fn prop_alphanumeric_voices_accepted(voice in "[A-Za-z0-9]{1,20}") {
            let request = SynthesisRequest::new("Hello", Some(voice.clone())).unwrap();
            prop_assert_eq!(request.voice(), voice.as_str());
        }

        #[test]
        fn prop_voices_with_other_characters_rejected(
            prefix in "[A-Za-z]{0,5}",
            bad in "[^A-Za-z0-9]",
            suffix in "[A-Za-z]{0,5}",
        ) {
            let voice = format!("{prefix}{bad}{suffix}");
            let err = SynthesisRequest::new("Hello", Some(voice)).unwrap_err();
            prop_assert_eq!(err.message, INVALID_VOICE_MESSAGE);
        }

        #[test]
        fn prop_whitespace_only_text_is_required(ws in "[ \t\r\n]{0,50}") {
            let err = SynthesisRequest::new(ws, None).unwrap_err();
            prop_assert_eq!(err.message, TEXT_REQUIRED_MESSAGE);
        }
    }
}
