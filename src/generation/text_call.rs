use serde_json::Value;
use tracing::warn;

use crate::generation::composer::VIDEO_DURATION;
use crate::generation::error::{GenerationError, Stage};
use crate::generation::types::{PromptSet, VariationSeed};
use crate::llm::capability::{GenerativeCapability, ReferenceImage};
use crate::llm::media::ImagePayload;

const PRODUCT_CAPTION: &str = "Product Image:";
const GENERATED_CAPTION: &str = "Generated Promotional Image with Person:";
const MAX_SCHEMA_ERRORS: usize = 3;

/// Writes the spoken description and the video prompt for an image that has
/// already been generated. Must run after the image call of the same seed.
pub async fn generate_prompt_set(
    capability: &dyn GenerativeCapability,
    seed: VariationSeed,
    prompt: &str,
    product_image: &ImagePayload,
    generated_image: &ImagePayload,
    schema: &Value,
) -> Result<PromptSet, GenerationError> {
    let references = [
        ReferenceImage {
            caption: PRODUCT_CAPTION,
            image: product_image,
        },
        ReferenceImage {
            caption: GENERATED_CAPTION,
            image: generated_image,
        },
    ];

    let raw = capability
        .generate_structured_text(prompt, &references, schema)
        .await
        .map_err(|source| GenerationError::Transport {
            seed,
            stage: Stage::Text,
            source,
        })?;

    parse_prompt_set(seed, &raw, schema)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn validate_against_schema(instance: &Value, schema: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|err| format!("invalid response schema: {err}"))?;
    if validator.is_valid(instance) {
        return Ok(());
    }
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .take(MAX_SCHEMA_ERRORS)
        .map(|err| format!("{} at {}", err, err.instance_path))
        .collect();
    Err(messages.join("; "))
}

fn is_spoken_noise(ch: char) -> bool {
    ch.is_ascii_punctuation() || matches!(ch, '“' | '”' | '‘' | '’' | '…' | '–' | '—' | '•')
}

/// Drops punctuation so the text-to-speech engine reads the description as
/// plain words.
pub fn sanitize_description(description: &str) -> String {
    description
        .chars()
        .map(|ch| if is_spoken_noise(ch) { ' ' } else { ch })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses and validates the raw answer of the text call.
pub fn parse_prompt_set(
    seed: VariationSeed,
    raw: &str,
    schema: &Value,
) -> Result<PromptSet, GenerationError> {
    let parse_failure = |detail: String| GenerationError::MetadataParse { seed, detail };

    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(parse_failure("empty response".to_string()));
    }
    let value: Value =
        serde_json::from_str(body).map_err(|err| parse_failure(format!("invalid JSON: {err}")))?;
    validate_against_schema(&value, schema).map_err(parse_failure)?;
    let mut prompt_set: PromptSet = serde_json::from_value(value)
        .map_err(|err| parse_failure(format!("unexpected shape: {err}")))?;

    let description = sanitize_description(&prompt_set.description);
    if description.is_empty() {
        return Err(parse_failure("description is empty".to_string()));
    }
    let words = description.split_whitespace().count();
    if !(15..=25).contains(&words) {
        warn!("Seed {} description has {} words (expected 15-25)", seed, words);
    }
    prompt_set.description = description;

    if prompt_set.animation_prompt.video_duration.trim() != VIDEO_DURATION {
        warn!(
            "Seed {} returned video duration {:?}; forcing {:?}",
            seed, prompt_set.animation_prompt.video_duration, VIDEO_DURATION
        );
        prompt_set.animation_prompt.video_duration = VIDEO_DURATION.to_string();
    }

    Ok(prompt_set)
}
