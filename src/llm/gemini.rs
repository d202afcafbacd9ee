use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::capability::{CapabilityError, GenerativeCapability, ReferenceImage};
use crate::llm::media::ImagePayload;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    pub image_model: String,
    pub text_model: String,
    pub safety_settings: String,
    pub max_retry_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl GeminiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.clone(),
            image_model: config.gemini_image_model.clone(),
            text_model: config.gemini_text_model.clone(),
            safety_settings: config.gemini_safety_settings.clone(),
            max_retry_attempts: config.gemini_max_retry_attempts,
            retry_base_delay_ms: config.gemini_retry_base_delay_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

/// Rewrites a JSON schema into the OpenAPI subset Gemini accepts in
/// `responseSchema`: upper-case type names, everything else kept.
pub fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut converted = Map::new();
            for (key, value) in map {
                let value = match (key.as_str(), value) {
                    ("type", Value::String(kind)) => Value::String(kind.to_uppercase()),
                    ("properties", Value::Object(properties)) => Value::Object(
                        properties
                            .iter()
                            .map(|(name, property)| (name.clone(), to_gemini_schema(property)))
                            .collect(),
                    ),
                    ("items", items) => to_gemini_schema(items),
                    _ => value.clone(),
                };
                converted.insert(key.clone(), value);
            }
            Value::Object(converted)
        }
        other => other.clone(),
    }
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        let mut config = config.clone();
        if let Some(object) = config.as_object_mut() {
            if object.remove("responseSchema").is_some() {
                object.insert("responseSchema".to_string(), json!("<schema>"));
            }
        }
        summary.insert("generationConfig".to_string(), config);
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;
    let mut finish_reasons = Vec::new();

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(reason) = &candidate.finish_reason {
            finish_reasons.push(reason.clone());
        }
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            match part {
                GeminiPart::Text { text, .. } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
                GeminiPart::Other(_) => {}
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "finishReasons": finish_reasons,
        "blockReason": response.prompt_feedback.as_ref().and_then(|feedback| feedback.block_reason.clone()),
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn inline_image_part(image: &ImagePayload) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.to_base64()
        }
    })
}

fn build_image_parts(prompt: &str, references: &[&ImagePayload]) -> Vec<Value> {
    let mut parts = vec![json!({ "text": prompt })];
    parts.extend(references.iter().map(|image| inline_image_part(image)));
    parts
}

fn build_captioned_parts(prompt: &str, references: &[ReferenceImage<'_>]) -> Vec<Value> {
    let mut parts = vec![json!({ "text": prompt })];
    for reference in references {
        if !reference.caption.trim().is_empty() {
            parts.push(json!({ "text": reference.caption }));
        }
        parts.push(inline_image_part(reference.image));
    }
    parts
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default().into_iter().take(1) {
        for part in candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default()
        {
            if let GeminiPart::Text { text, thought } = part {
                if !thought && !text.trim().is_empty() {
                    text_parts.push(text);
                }
            }
        }
    }
    text_parts.join("")
}

fn extract_first_image(response: GeminiResponse) -> Result<Option<ImagePayload>, CapabilityError> {
    let first_inline = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .take(1)
        .flat_map(|candidate| {
            candidate
                .content
                .and_then(|content| content.parts)
                .unwrap_or_default()
        })
        .find_map(|part| match part {
            GeminiPart::InlineData { inline_data } if inline_data.mime_type.starts_with("image/") => {
                Some(inline_data)
            }
            _ => None,
        });

    let Some(inline_data) = first_inline else {
        return Ok(None);
    };
    ImagePayload::from_base64(&inline_data.mime_type, &inline_data.data)
        .map(Some)
        .map_err(|err| CapabilityError::Decode(format!("invalid inline image data: {err}")))
}

/// Gemini `generateContent` REST adapter.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    settings: GeminiSettings,
}

impl GeminiClient {
    pub fn new(http: Client, settings: GeminiSettings) -> Self {
        Self { http, settings }
    }

    fn redact(&self, text: &str) -> String {
        let key = self.settings.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn retry_delay(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1) as u64;
        Duration::from_millis(self.settings.retry_base_delay_ms.saturating_mul(attempt))
    }

    async fn call_gemini_api(
        &self,
        model: &str,
        payload: Value,
    ) -> Result<GeminiResponse, CapabilityError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            model
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let max_attempts = self.settings.max_retry_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.settings.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact(&err.to_string());
                    let should_retry = should_retry_error(&err) && attempt < max_attempts;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(self.retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(CapabilityError::Request(err_text));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let body = self.redact(&body);
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry = should_retry_status(status) && attempt < max_attempts;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(self.retry_delay(attempt)).await;
                    continue;
                }
                return Err(CapabilityError::Http {
                    status: status.as_u16(),
                    message: message.unwrap_or(body_summary),
                });
            }

            let value = response
                .json::<GeminiResponse>()
                .await
                .map_err(|err| CapabilityError::Decode(self.redact(&err.to_string())))?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let response_summary = summarize_gemini_response(&value);
                debug!(target: "llm.gemini", model = model, response = %response_summary);
            }
            return Ok(value);
        }
    }
}

#[async_trait]
impl GenerativeCapability for GeminiClient {
    async fn generate_image(
        &self,
        prompt: &str,
        references: &[&ImagePayload],
    ) -> Result<Option<ImagePayload>, CapabilityError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_image_parts(prompt, references) }],
            "generationConfig": { "responseModalities": ["IMAGE"] },
            "safetySettings": build_safety_settings(&self.settings.safety_settings),
        });

        let model = self.settings.image_model.as_str();
        let metadata = json!({ "references": references.len() });
        log_llm_timing("gemini", model, "generate_image", Some(metadata), || async {
            let response = self.call_gemini_api(model, payload).await?;
            let summary = summarize_gemini_response(&response);
            let image = extract_first_image(response)?;
            if image.is_none() {
                warn!(target: "llm.gemini", model = model, response = %summary, "Gemini returned no image");
            }
            Ok::<_, CapabilityError>(image)
        })
        .await
    }

    async fn generate_structured_text(
        &self,
        prompt: &str,
        references: &[ReferenceImage<'_>],
        schema: &Value,
    ) -> Result<String, CapabilityError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_captioned_parts(prompt, references) }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": to_gemini_schema(schema),
            },
            "safetySettings": build_safety_settings(&self.settings.safety_settings),
        });

        let model = self.settings.text_model.as_str();
        let metadata = json!({ "references": references.len() });
        log_llm_timing("gemini", model, "generate_structured_text", Some(metadata), || async {
            let response = self.call_gemini_api(model, payload).await?;
            Ok::<_, CapabilityError>(extract_text_from_response(response))
        })
        .await
    }
}
