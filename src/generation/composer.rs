//! Prompt construction for one unit of work.
//!
//! Everything here is pure: the same request and seed always produce the same
//! strings. Variation between seeds comes only from the wording that names the
//! seed and asks the model for something different each time.

use serde_json::{json, Value};

use crate::generation::types::{GenerationRequest, VariationSeed};

pub const VIDEO_DURATION: &str = "8 seconds";

pub const DESCRIPTION_KEY: &str = "description";
pub const ANIMATION_PROMPT_KEY: &str = "animationPrompt";

pub const ANIMATION_PROMPT_KEYS: [&str; 7] = [
    "sceneDescription",
    "characterAction",
    "cameraMovement",
    "lighting",
    "facialExpression",
    "videoDuration",
    "audioDescription",
];

pub const CAMERA_MOVEMENT_STYLES: [&str; 5] = [
    "smooth panning shot",
    "dolly zoom in",
    "orbital shot around the character",
    "handheld follow shot",
    "crane shot revealing the scene",
];

/// The prompts and schema for one seed.
#[derive(Debug, Clone)]
pub struct UnitPrompts {
    pub seed: VariationSeed,
    pub image_prompt: String,
    pub text_prompt: String,
    pub schema: Value,
}

pub fn compose(request: &GenerationRequest, seed: VariationSeed) -> UnitPrompts {
    UnitPrompts {
        seed,
        image_prompt: compose_image_prompt(request, seed),
        text_prompt: compose_text_prompt(request, seed),
        schema: metadata_schema(),
    }
}

fn outfit_clause(hint: Option<&str>, seed: VariationSeed) -> String {
    match hint {
        Some(hint) => format!(
            "- **Outfit Suggestion**: The person should wear an outfit inspired by this suggestion: \"{hint}\"."
        ),
        None => format!(
            "- **Outfit**: The person must wear a stylish outfit that fits the context. CRITICAL: for this specific generation (seed {seed}), invent a COMPLETELY UNIQUE outfit that no other generation in this batch uses. Be bold with different clothing (e.g. blazer and jeans, summer dress, sportswear, elegant gown)."
        ),
    }
}

fn background_clause(hint: Option<&str>, seed: VariationSeed) -> String {
    match hint {
        Some(hint) => format!(
            "- **Background Suggestion**: The setting should be inspired by this suggestion: \"{hint}\"."
        ),
        None => format!(
            "- **Setting**: The background must be a dynamic, interesting location. CRITICAL: for this specific generation (seed {seed}), create a COMPLETELY UNIQUE background that no other generation in this batch uses. Explore settings such as a rooftop lounge at dusk, a busy European street market, a minimalist art gallery, a quiet Japanese garden or the inside of a futuristic vehicle. AVOID plain studio backdrops."
        ),
    }
}

pub fn compose_image_prompt(request: &GenerationRequest, seed: VariationSeed) -> String {
    let dimensions = request.aspect_ratio.dimensions_label();
    let ratio = request.aspect_ratio.label();
    let outfit = outfit_clause(request.outfit_hint(), seed);
    let background = background_clause(request.background_hint(), seed);

    format!(
        r#"THE MOST IMPORTANT, NON-NEGOTIABLE RULE: the final image MUST be EXACTLY {dimensions} pixels, a {ratio} aspect ratio. This rule overrides every other instruction.

Create a single high-resolution (1080p quality), photorealistic promotional image.
- **Person**: Feature the person from the first image. Their face and facial features must be preserved exactly, without alteration.
- **Product**: Feature the product from the second image. Its appearance, colors and branding must be preserved exactly, without alteration.
- **REALISTIC SCALE (CRITICAL)**: The product must have a realistic size relative to the person, exactly as it would in real life. DO NOT enlarge the product for emphasis; a lipstick must never look like a water bottle. Realism matters more than product visibility.
- **Interaction**: The person interacts with or presents the product in a natural, engaging way.
{outfit}
{background}
- **Style**: High-end and polished, suitable for a professional advertisement.
- **Composition**: A FULL-BODY shot of the person, showing the entire outfit and the product in context.
- **Variation**: Seed {seed} identifies this image. Variation between seeds is the top priority: the outfit and the background must be completely different from every other generated image. Also vary the pose, the lighting and the camera angle.
- **Final Reminder**: The output MUST be EXACTLY {dimensions} pixels ({ratio}). No exceptions."#
    )
}

fn product_info_clause(product_info: Option<&str>, seed: VariationSeed) -> String {
    match product_info {
        Some(info) => format!(
            "You MUST use this user-provided product information as the primary inspiration for the description: \"{info}\". For this generation (seed {seed}) write a UNIQUE, creative variation that has not been produced before by focusing on a different feature or angle of the product."
        ),
        None => "Study the product image to understand its key features and write an appealing, UNIQUE description.".to_string(),
    }
}

pub fn compose_text_prompt(request: &GenerationRequest, seed: VariationSeed) -> String {
    let product_info = product_info_clause(request.product_info(), seed);
    let speaker = request.voice.speaker();
    let accent = request.region.accent();
    let camera_styles = CAMERA_MOVEMENT_STYLES
        .iter()
        .map(|style| format!("'{style}'"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Using the provided product image, the generated promotional image and the user's product information, perform two tasks and return the result as a single JSON object with exactly two keys: "{DESCRIPTION_KEY}" and "{ANIMATION_PROMPT_KEY}".

IMPORTANT for seed {seed}: the answer must be COMPLETELY UNIQUE and DIFFERENT from every previous attempt in this batch. Come up with a fresh idea for both the description and the camera movement.

1. **{DESCRIPTION_KEY}**: Write a short promotional description in Vietnamese, between 15 and 25 words. This is a strict limit for an {VIDEO_DURATION} voiceover. CRITICAL RULE: the text MUST NOT contain hyphens (-), asterisks (*), quotation marks (", ') or any other punctuation or special characters. Use plain Vietnamese only, because a text-to-speech engine will read it aloud. {product_info}

2. **{ANIMATION_PROMPT_KEY}**: Build a detailed prompt for a video generation model as a structured JSON object describing a lively {VIDEO_DURATION} TikTok "Outfit Showcase" video with engaging camera work.
    - The object must contain the keys {keys}.
    - "cameraMovement" MUST be a unique, dynamic, cinematic movement such as {camera_styles}. NEVER use a static shot and NEVER repeat a camera movement from a previous seed.
    - "videoDuration" must be exactly "{VIDEO_DURATION}".
    - "audioDescription" must state that the person speaks the Vietnamese "{DESCRIPTION_KEY}" you wrote, voiced by {speaker} speaker with a {accent} accent.
    - Fill every other field with creative, detailed English descriptions based on the generated image."#,
        keys = ANIMATION_PROMPT_KEYS
            .iter()
            .map(|key| format!("\"{key}\""))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

/// JSON schema for the text call's answer.
pub fn metadata_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "description": string_property(
                "Promotional product description in Vietnamese for an 8-second voiceover (15-25 words), without special characters."
            ),
            "animationPrompt": {
                "type": "object",
                "description": "A detailed video generation prompt as a structured JSON object.",
                "properties": {
                    "sceneDescription": string_property("Description of the scene and background."),
                    "characterAction": string_property("Detailed movement of the character."),
                    "cameraMovement": string_property(
                        "How the camera moves. MUST be dynamic and lively, using cinematic terms like 'smooth panning shot', 'dolly zoom in', 'orbital shot around the character', 'handheld follow shot', 'crane shot revealing the scene'. AVOID static shots."
                    ),
                    "lighting": string_property("The style of lighting (e.g. golden hour, studio)."),
                    "facialExpression": string_property("The character's facial expression."),
                    "videoDuration": string_property("The exact duration of the video."),
                    "audioDescription": string_property("Description of the voiceover audio."),
                },
                "required": ANIMATION_PROMPT_KEYS,
            },
        },
        "required": [DESCRIPTION_KEY, ANIMATION_PROMPT_KEY],
    })
}
