//! Property-based tests for the configuration module.
//!
//! These tests drive `Config::from_lookup` with in-memory maps, so no test
//! mutates the process environment.

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;

use crate::config::{
    Config, DEFAULT_AWS_REGION, DEFAULT_MAX_REQUESTS, DEFAULT_SYNTHESIS_TIMEOUT_SECS,
    DEFAULT_WINDOW_SECS, ProviderConfig,
};
use crate::error::ConfigError;

fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|name| map.get(name).cloned())
}

#[test]
fn empty_environment_uses_defaults() {
    let config = load(&[]).unwrap();

    assert_eq!(config.max_requests, DEFAULT_MAX_REQUESTS);
    assert_eq!(config.window, Duration::from_secs(DEFAULT_WINDOW_SECS));
    assert_eq!(
        config.synthesis_timeout,
        Duration::from_secs(DEFAULT_SYNTHESIS_TIMEOUT_SECS)
    );
    assert_eq!(config.provider, ProviderConfig::Polly);
    assert_eq!(config.aws_region, DEFAULT_AWS_REGION);
    assert!(config.aws_profile.is_none());
    assert!(!config.trust_proxy_headers);
}

#[test]
fn default_matches_empty_environment() {
    let loaded = load(&[]).unwrap();
    let default = Config::default();

    assert_eq!(loaded.max_requests, default.max_requests);
    assert_eq!(loaded.window, default.window);
    assert_eq!(loaded.sweep_interval, default.sweep_interval);
    assert_eq!(loaded.provider, default.provider);
}

#[test]
fn overrides_are_applied() {
    let config = load(&[
        ("RATE_LIMIT_MAX_REQUESTS", "10"),
        ("RATE_LIMIT_WINDOW_SECS", "3600"),
        ("QUOTA_SWEEP_INTERVAL_SECS", "120"),
        ("SYNTHESIS_TIMEOUT_SECS", "15"),
        ("AWS_REGION", "eu-west-1"),
        ("AWS_PROFILE", "tts"),
        ("TRUST_PROXY_HEADERS", "true"),
    ])
    .unwrap();

    assert_eq!(config.max_requests, 10);
    assert_eq!(config.window, Duration::from_secs(3600));
    assert_eq!(config.sweep_interval, Duration::from_secs(120));
    assert_eq!(config.synthesis_timeout, Duration::from_secs(15));
    assert_eq!(config.aws_region, "eu-west-1");
    assert_eq!(config.aws_profile.as_deref(), Some("tts"));
    assert!(config.trust_proxy_headers);
}

#[test]
fn blank_values_fall_back_to_defaults() {
    let config = load(&[("RATE_LIMIT_MAX_REQUESTS", "  "), ("AWS_REGION", "")]).unwrap();
    assert_eq!(config.max_requests, DEFAULT_MAX_REQUESTS);
    assert_eq!(config.aws_region, DEFAULT_AWS_REGION);
}

#[test]
fn zero_limit_is_rejected() {
    let err = load(&[("RATE_LIMIT_MAX_REQUESTS", "0")]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "RATE_LIMIT_MAX_REQUESTS"));
}

#[test]
fn non_numeric_window_is_rejected() {
    let err = load(&[("RATE_LIMIT_WINDOW_SECS", "a day")]).unwrap_err();
    assert!(err.to_string().contains("RATE_LIMIT_WINDOW_SECS"));
}

#[test]
fn http_provider_requires_url() {
    let err = load(&[("SPEECH_PROVIDER", "http")]).unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "SPEECH_PROVIDER_URL"));
}

#[test]
fn http_provider_rejects_non_http_url() {
    let err = load(&[
        ("SPEECH_PROVIDER", "http"),
        ("SPEECH_PROVIDER_URL", "ftp://tts.internal/synthesize"),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("SPEECH_PROVIDER_URL"));
}

#[test]
fn http_provider_with_url() {
    let config = load(&[
        ("SPEECH_PROVIDER", "HTTP"),
        ("SPEECH_PROVIDER_URL", "http://localhost:9000/v1/speech"),
    ])
    .unwrap();

    assert_eq!(
        config.provider,
        ProviderConfig::Http {
            url: "http://localhost:9000/v1/speech".to_string()
        }
    );
    assert_eq!(config.provider.to_string(), "http (http://localhost:9000/v1/speech)");
}

#[test]
fn unknown_provider_is_rejected() {
    let err = load(&[("SPEECH_PROVIDER", "espeak")]).unwrap_err();
    assert!(err.to_string().contains("espeak"));
}

#[test]
fn invalid_boolean_is_rejected() {
    let err = load(&[("TRUST_PROXY_HEADERS", "maybe")]).unwrap_err();
    assert!(err.to_string().contains("TRUST_PROXY_HEADERS"));
}

proptest! {
    /// Any positive limit and window round-trip through the loader.
    #[test]
    fn positive_limits_are_accepted(limit in 1u32..100_000, window in 1u64..10_000_000) {
        let limit_str = limit.to_string();
        let window_str = window.to_string();
        let config = load(&[
            ("RATE_LIMIT_MAX_REQUESTS", limit_str.as_str()),
            ("RATE_LIMIT_WINDOW_SECS", window_str.as_str()),
        ]).unwrap();

        prop_assert_eq!(config.max_requests, limit);
        prop_assert_eq!(config.window, Duration::from_secs(window));
    }

    /// Boolean spellings are parsed case-insensitively.
    #[test]
    fn boolean_spellings(value in prop_oneof![
        Just(("true", true)), Just(("TRUE", true)), Just(("1", true)), Just(("yes", true)), Just(("on", true)),
        Just(("false", false)), Just(("0", false)), Just(("No", false)), Just(("off", false)),
    ]) {
        let config = load(&[("TRUST_PROXY_HEADERS", value.0)]).unwrap();
        prop_assert_eq!(config.trust_proxy_headers, value.1);
    }
}
