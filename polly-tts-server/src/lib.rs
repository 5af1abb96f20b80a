//! Polly TTS Proxy Server Library
//!
//! This library provides a rate-limited HTTP proxy in front of a
//! text-to-speech provider: per-client daily quotas, request validation and
//! streaming of the synthesized MP3 audio.

pub mod admission;
pub mod clock;
pub mod handler;
pub mod provider;
pub mod quota;
pub mod server;

pub use admission::{AdmissionGate, IdentityPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use handler::{SpeechParams, SynthesisProxy, SynthesisRequest};
pub use provider::{AudioStream, HttpSpeechProvider, PollySpeechProvider, SpeechProvider};
pub use quota::{ClientIdentity, QuotaDecision, QuotaPolicy, QuotaStatus, QuotaStore};
pub use server::{AppState, router, spawn_quota_sweeper};
