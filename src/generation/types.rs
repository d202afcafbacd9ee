use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::generation::error::GenerationError;
use crate::llm::media::ImagePayload;

pub type VariationSeed = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Portrait => "9:16",
            Self::Landscape => "16:9",
        }
    }

    pub fn pixel_dimensions(&self) -> (u32, u32) {
        match self {
            Self::Portrait => (1080, 1920),
            Self::Landscape => (1920, 1080),
        }
    }

    /// Target size as written into prompts, e.g. `1080x1920`.
    pub fn dimensions_label(&self) -> String {
        let (width, height) = self.pixel_dimensions();
        format!("{width}x{height}")
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "9:16" | "portrait" => Ok(Self::Portrait),
            "16:9" | "landscape" => Ok(Self::Landscape),
            other => Err(format!("Unsupported aspect ratio: {other} (expected 9:16 or 16:9)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Male,
    Female,
}

impl Voice {
    pub fn speaker(&self) -> &'static str {
        match self {
            Self::Male => "a male",
            Self::Female => "a female",
        }
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "male" | "nam" => Ok(Self::Male),
            "female" | "nu" | "nữ" => Ok(Self::Female),
            other => Err(format!("Unsupported voice: {other} (expected male or female)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    South,
    North,
}

impl Region {
    pub fn accent(&self) -> &'static str {
        match self {
            Self::South => "Southern Vietnamese",
            Self::North => "Northern Vietnamese",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "south" | "mien-nam" => Ok(Self::South),
            "north" | "mien-bac" => Ok(Self::North),
            other => Err(format!("Unsupported region: {other} (expected south or north)")),
        }
    }
}

/// Everything one batch needs. Read-only once handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub person_image: ImagePayload,
    pub product_image: ImagePayload,
    pub aspect_ratio: AspectRatio,
    pub voice: Voice,
    pub region: Region,
    pub result_count: usize,
    pub outfit_hint: Option<String>,
    pub background_hint: Option<String>,
    pub product_info: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl GenerationRequest {
    pub fn new(person_image: ImagePayload, product_image: ImagePayload) -> Self {
        Self {
            person_image,
            product_image,
            aspect_ratio: AspectRatio::Portrait,
            voice: Voice::Female,
            region: Region::South,
            result_count: 1,
            outfit_hint: None,
            background_hint: None,
            product_info: None,
        }
    }

    pub fn outfit_hint(&self) -> Option<&str> {
        non_blank(&self.outfit_hint)
    }

    pub fn background_hint(&self) -> Option<&str> {
        non_blank(&self.background_hint)
    }

    pub fn product_info(&self) -> Option<&str> {
        non_blank(&self.product_info)
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.person_image.is_empty() || self.product_image.is_empty() {
            return Err(GenerationError::MissingImages);
        }
        if self.result_count == 0 {
            return Err(GenerationError::InvalidRequest(
                "result count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn seeds(&self) -> impl Iterator<Item = VariationSeed> {
        0..self.result_count as VariationSeed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationPrompt {
    pub scene_description: String,
    pub character_action: String,
    pub camera_movement: String,
    pub lighting: String,
    pub facial_expression: String,
    pub video_duration: String,
    pub audio_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSet {
    pub description: String,
    pub animation_prompt: AnimationPrompt,
}

#[derive(Debug, Clone)]
pub struct GeneratedResult {
    pub id: String,
    pub seed: VariationSeed,
    pub image_url: String,
    pub image: ImagePayload,
    pub prompt_sets: Vec<PromptSet>,
}

impl GeneratedResult {
    pub fn prompt_set(&self) -> Option<&PromptSet> {
        self.prompt_sets.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Any failed unit fails the whole batch.
    #[default]
    AllOrNothing,
    /// Every unit resolves; failures are reported per seed.
    Partial,
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllOrNothing => write!(f, "all_or_nothing"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// Per-seed outcomes of a batch run in partial mode, indexed by seed.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<Result<GeneratedResult, GenerationError>>,
}

impl BatchReport {
    pub fn successes(&self) -> impl Iterator<Item = &GeneratedResult> {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (VariationSeed, &GenerationError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(seed, outcome)| outcome.as_ref().err().map(|err| (seed as VariationSeed, err)))
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }
}

#[derive(Debug)]
pub enum BatchOutcome {
    Complete(Vec<GeneratedResult>),
    Partial(BatchReport),
}

impl BatchOutcome {
    pub fn results(&self) -> Vec<&GeneratedResult> {
        match self {
            Self::Complete(results) => results.iter().collect(),
            Self::Partial(report) => report.successes().collect(),
        }
    }
}
