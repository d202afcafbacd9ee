use std::fmt;

use thiserror::Error;

use crate::generation::types::VariationSeed;
use crate::llm::capability::CapabilityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Image,
    Text,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("seed {seed}: no image was returned ({detail})")]
    ImageGeneration { seed: VariationSeed, detail: String },
    #[error("seed {seed}: description and video prompt could not be parsed ({detail})")]
    MetadataParse { seed: VariationSeed, detail: String },
    #[error("seed {seed}: {stage} request failed: {source}")]
    Transport {
        seed: VariationSeed,
        stage: Stage,
        #[source]
        source: CapabilityError,
    },
    #[error("both the person image and the product image are required")]
    MissingImages,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("generation was cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ImageGeneration { .. } => Some(Stage::Image),
            Self::MetadataParse { .. } => Some(Stage::Text),
            Self::Transport { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn seed(&self) -> Option<VariationSeed> {
        match self {
            Self::ImageGeneration { seed, .. }
            | Self::MetadataParse { seed, .. }
            | Self::Transport { seed, .. } => Some(*seed),
            _ => None,
        }
    }

    /// The single message shown to the person who started the batch.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingImages => "Vui lòng tải lên cả ảnh người mẫu và ảnh sản phẩm.".to_string(),
            Self::ImageGeneration { .. } => "Đã xảy ra lỗi: Không thể tạo ảnh từ AI.".to_string(),
            other => format!("Đã xảy ra lỗi: {other}"),
        }
    }
}
