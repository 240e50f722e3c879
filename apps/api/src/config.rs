use std::time::Duration;

use anyhow::{Context, Result};

const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
const ARK_MODEL: &str = "doubao-seed-1-6-251015";
const SILICONFLOW_BASE_URL: &str = "https://api.siliconflow.cn/v1";
const SILICONFLOW_MODEL: &str = "Qwen/Qwen2.5-72B-Instruct";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;

/// One upstream provider's endpoint, credentials and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Single-shot (non-streaming) requests.
    pub request_timeout: Duration,
    /// Streaming requests; bounds each read and write, not the whole stream.
    pub stream_timeout: Duration,
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Reasoning-capable multimodal provider (Volcengine Ark).
    pub ark: ProviderConfig,
    /// Plain completion provider (SiliconFlow).
    pub siliconflow: ProviderConfig,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            s3_bucket: require("S3_BUCKET")?,
            s3_endpoint: require("S3_ENDPOINT")?,
            aws_access_key_id: require("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require("AWS_SECRET_ACCESS_KEY")?,
            ark: ProviderConfig::from_lookup(&lookup, "ARK", ARK_BASE_URL, ARK_MODEL)?,
            siliconflow: ProviderConfig::from_lookup(
                &lookup,
                "SILICONFLOW",
                SILICONFLOW_BASE_URL,
                SILICONFLOW_MODEL,
            )?,
            port: lookup("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

impl ProviderConfig {
    /// Reads `<PREFIX>_API_KEY` (required) plus optional `_BASE_URL`, `_MODEL`,
    /// `_REQUEST_TIMEOUT_SECS` and `_STREAM_TIMEOUT_SECS`.
    fn from_lookup(
        lookup: &impl Fn(&str) -> Option<String>,
        prefix: &str,
        default_base_url: &str,
        default_model: &str,
    ) -> Result<Self> {
        let key = format!("{prefix}_API_KEY");
        let api_key = lookup(&key)
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("Required environment variable '{key}' is not set"))?;

        Ok(ProviderConfig {
            base_url: lookup(&format!("{prefix}_BASE_URL"))
                .unwrap_or_else(|| default_base_url.to_string()),
            api_key,
            model: lookup(&format!("{prefix}_MODEL")).unwrap_or_else(|| default_model.to_string()),
            request_timeout: timeout_secs(
                lookup,
                &format!("{prefix}_REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            stream_timeout: timeout_secs(
                lookup,
                &format!("{prefix}_STREAM_TIMEOUT_SECS"),
                DEFAULT_STREAM_TIMEOUT_SECS,
            )?,
        })
    }
}

fn timeout_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration> {
    let secs = match lookup(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds"))?,
        None => default,
    };
    anyhow::ensure!(secs > 0, "{key} must be greater than zero");
    Ok(Duration::from_secs(secs))
}
