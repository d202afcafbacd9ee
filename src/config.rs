use std::env;
use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use crate::generation::BatchPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_image_model: String,
    pub gemini_text_model: String,
    pub gemini_safety_settings: String,
    pub gemini_max_retry_attempts: usize,
    pub gemini_retry_base_delay_ms: u64,
    pub http_timeout_seconds: u64,
    pub batch_policy: BatchPolicy,
    pub max_concurrent_units: Option<usize>,
    pub output_dir: PathBuf,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

pub(crate) fn parse_batch_policy(value: &str) -> BatchPolicy {
    match value.trim().to_lowercase().replace('-', "_").as_str() {
        "" | "all_or_nothing" | "strict" => BatchPolicy::AllOrNothing,
        "partial" | "partial_results" => BatchPolicy::Partial,
        other => {
            warn!(
                "Unknown BATCH_POLICY value '{}'; defaulting to all_or_nothing.",
                other
            );
            BatchPolicy::AllOrNothing
        }
    }
}

fn optional_limit(value: usize) -> Option<usize> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let gemini_api_key = env_string("GEMINI_API_KEY", "");
        if gemini_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("GEMINI_API_KEY is required"));
        }

        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key,
            gemini_base_url: env_string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            )
            .trim_end_matches('/')
            .to_string(),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image"),
            gemini_text_model: env_string("GEMINI_TEXT_MODEL", "gemini-2.5-flash"),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            gemini_max_retry_attempts: env_usize("GEMINI_MAX_RETRY_ATTEMPTS", 2).max(1),
            gemini_retry_base_delay_ms: env_u64("GEMINI_RETRY_BASE_DELAY_MS", 900),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 120),
            batch_policy: parse_batch_policy(&env_string("BATCH_POLICY", "all_or_nothing")),
            max_concurrent_units: optional_limit(env_usize("MAX_CONCURRENT_UNITS", 0)),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", "output")),
        })
    }
}
