use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::llm::media::ImagePayload;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("unreadable response: {0}")]
    Decode(String),
}

/// A reference image sent alongside a text prompt, introduced by a caption.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceImage<'a> {
    pub caption: &'a str,
    pub image: &'a ImagePayload,
}

/// Access to a generative model that can either paint an image or answer
/// with schema-constrained JSON text.
#[async_trait]
pub trait GenerativeCapability: Send + Sync {
    /// Returns `Ok(None)` when the model answered without any image part.
    async fn generate_image(
        &self,
        prompt: &str,
        references: &[&ImagePayload],
    ) -> Result<Option<ImagePayload>, CapabilityError>;

    /// Returns the raw text of the answer. The caller validates it against
    /// `schema`; the capability only forwards the schema to the model.
    async fn generate_structured_text(
        &self,
        prompt: &str,
        references: &[ReferenceImage<'_>],
        schema: &Value,
    ) -> Result<String, CapabilityError>;
}
