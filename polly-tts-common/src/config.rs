//! Configuration module for loading environment variables and settings.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Default number of synthesis requests a client may make per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 12;

/// Default admission window (24 hours).
pub const DEFAULT_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Default period of the background sweep of expired quota records.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Default deadline for a provider call plus streaming its audio.
pub const DEFAULT_SYNTHESIS_TIMEOUT_SECS: u64 = 60;

/// Default AWS region for Polly.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Which speech provider backs the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProviderConfig {
    /// AWS Polly through the AWS SDK.
    #[default]
    Polly,
    /// A generic HTTP endpoint that accepts the synthesis contract as JSON
    /// and answers with an audio body.
    Http {
        /// Endpoint URL
        url: String,
    },
}

impl fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderConfig::Polly => write!(f, "polly"),
            ProviderConfig::Http { url } => write!(f, "http ({})", url),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Synthesis requests allowed per client per window
    pub max_requests: u32,
    /// Length of the admission window
    pub window: Duration,
    /// How often expired quota records are swept
    pub sweep_interval: Duration,
    /// Active speech provider
    pub provider: ProviderConfig,
    /// AWS region used by the Polly provider
    pub aws_region: String,
    /// Optional AWS named profile
    pub aws_profile: Option<String>,
    /// Deadline for a provider call plus the audio stream
    pub synthesis_timeout: Duration,
    /// Derive client identity from `X-Forwarded-For`
    pub trust_proxy_headers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            provider: ProviderConfig::Polly,
            aws_region: DEFAULT_AWS_REGION.to_string(),
            aws_profile: None,
            synthesis_timeout: Duration::from_secs(DEFAULT_SYNTHESIS_TIMEOUT_SECS),
            trust_proxy_headers: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for unparseable or out-of-range
    /// values, and `ConfigError::MissingEnvVar` if `SPEECH_PROVIDER=http` is
    /// set without `SPEECH_PROVIDER_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_requests = parse_number(&lookup, "RATE_LIMIT_MAX_REQUESTS", DEFAULT_MAX_REQUESTS)?;

        let window = Duration::from_secs(parse_number(
            &lookup,
            "RATE_LIMIT_WINDOW_SECS",
            DEFAULT_WINDOW_SECS,
        )?);

        let sweep_interval = Duration::from_secs(parse_number(
            &lookup,
            "QUOTA_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?);

        let synthesis_timeout = Duration::from_secs(parse_number(
            &lookup,
            "SYNTHESIS_TIMEOUT_SECS",
            DEFAULT_SYNTHESIS_TIMEOUT_SECS,
        )?);

        let provider = match non_empty(&lookup, "SPEECH_PROVIDER")
            .map(|p| p.to_lowercase())
            .as_deref()
        {
            None | Some("polly") => ProviderConfig::Polly,
            Some("http") => {
                let url = non_empty(&lookup, "SPEECH_PROVIDER_URL")
                    .ok_or_else(|| ConfigError::missing_env_var("SPEECH_PROVIDER_URL"))?;
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::invalid_value(
                        "SPEECH_PROVIDER_URL",
                        format!("'{}' is not an http(s) URL", url),
                    ));
                }
                ProviderConfig::Http { url }
            }
            Some(other) => {
                return Err(ConfigError::invalid_value(
                    "SPEECH_PROVIDER",
                    format!("'{}'. Valid options: polly, http", other),
                ));
            }
        };

        let aws_region =
            non_empty(&lookup, "AWS_REGION").unwrap_or_else(|| DEFAULT_AWS_REGION.to_string());

        let aws_profile = non_empty(&lookup, "AWS_PROFILE");

        let trust_proxy_headers = match non_empty(&lookup, "TRUST_PROXY_HEADERS") {
            None => false,
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::invalid_value(
                    "TRUST_PROXY_HEADERS",
                    format!("'{}' is not a boolean", value),
                )
            })?,
        };

        Ok(Self {
            max_requests,
            window,
            sweep_interval,
            provider,
            aws_region,
            aws_profile,
            synthesis_timeout,
            trust_proxy_headers,
        })
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a positive integer variable, falling back to `default` when unset.
fn parse_number<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let Some(raw) = non_empty(lookup, name) else {
        return Ok(default);
    };

    let value: T = raw
        .parse()
        .map_err(|_| ConfigError::invalid_value(name, format!("'{}' is not a number", raw)))?;

    if value < T::from(1) {
        return Err(ConfigError::invalid_value(name, "must be at least 1"));
    }

    Ok(value)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
