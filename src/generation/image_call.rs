use tracing::{debug, warn};

use crate::generation::error::{GenerationError, Stage};
use crate::generation::types::{AspectRatio, VariationSeed};
use crate::llm::capability::GenerativeCapability;
use crate::llm::media::ImagePayload;

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub payload: ImagePayload,
    pub data_uri: String,
}

/// Asks the capability for one promotional image built from the person and
/// product references. The first image in the answer wins.
pub async fn generate_image(
    capability: &dyn GenerativeCapability,
    seed: VariationSeed,
    prompt: &str,
    person_image: &ImagePayload,
    product_image: &ImagePayload,
    aspect_ratio: AspectRatio,
) -> Result<GeneratedImage, GenerationError> {
    let payload = capability
        .generate_image(prompt, &[person_image, product_image])
        .await
        .map_err(|source| GenerationError::Transport {
            seed,
            stage: Stage::Image,
            source,
        })?
        .filter(|payload| !payload.is_empty())
        .ok_or_else(|| GenerationError::ImageGeneration {
            seed,
            detail: "the model answered without an image".to_string(),
        })?;

    let expected = aspect_ratio.pixel_dimensions();
    match payload.dimensions() {
        Some(actual) if actual != expected => warn!(
            "Seed {} image is {}x{} instead of the requested {}",
            seed,
            actual.0,
            actual.1,
            aspect_ratio.dimensions_label()
        ),
        Some(_) => {}
        None => debug!("Seed {} image dimensions could not be read", seed),
    }

    let data_uri = payload.to_data_uri();
    Ok(GeneratedImage { payload, data_uri })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::capability::{CapabilityError, ReferenceImage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct ScriptedImage {
        answer: Mutex<Option<Result<Option<ImagePayload>, CapabilityError>>>,
        references_seen: Mutex<usize>,
    }

    impl ScriptedImage {
        fn new(answer: Result<Option<ImagePayload>, CapabilityError>) -> Self {
            Self {
                answer: Mutex::new(Some(answer)),
                references_seen: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerativeCapability for ScriptedImage {
        async fn generate_image(
            &self,
            _prompt: &str,
            references: &[&ImagePayload],
        ) -> Result<Option<ImagePayload>, CapabilityError> {
            *self.references_seen.lock() = references.len();
            self.answer.lock().take().expect("single call")
        }

        async fn generate_structured_text(
            &self,
            _prompt: &str,
            _references: &[ReferenceImage<'_>],
            _schema: &Value,
        ) -> Result<String, CapabilityError> {
            unreachable!("image call never asks for text")
        }
    }

    fn refs() -> (ImagePayload, ImagePayload) {
        (
            ImagePayload::new("image/jpeg", vec![1]),
            ImagePayload::new("image/jpeg", vec![2]),
        )
    }

    #[tokio::test]
    async fn returns_payload_and_data_uri() {
        let (person, product) = refs();
        let capability = ScriptedImage::new(Ok(Some(ImagePayload::new("image/png", vec![1, 2, 3]))));
        let image = generate_image(&capability, 0, "p", &person, &product, AspectRatio::Portrait)
            .await
            .unwrap();
        assert_eq!(image.data_uri, "data:image/png;base64,AQID");
        assert_eq!(*capability.references_seen.lock(), 2);
    }

    #[tokio::test]
    async fn missing_image_is_an_image_stage_failure() {
        let (person, product) = refs();
        let capability = ScriptedImage::new(Ok(None));
        let err = generate_image(&capability, 2, "p", &person, &product, AspectRatio::Landscape)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ImageGeneration { seed: 2, .. }));
        assert_eq!(err.stage(), Some(Stage::Image));
    }

    #[tokio::test]
    async fn transport_errors_keep_their_source() {
        let (person, product) = refs();
        let capability = ScriptedImage::new(Err(CapabilityError::Http {
            status: 429,
            message: "quota".to_string(),
        }));
        let err = generate_image(&capability, 1, "p", &person, &product, AspectRatio::Portrait)
            .await
            .unwrap_err();
        match err {
            GenerationError::Transport { seed, stage, source } => {
                assert_eq!(seed, 1);
                assert_eq!(stage, Stage::Image);
                assert_eq!(source, CapabilityError::Http { status: 429, message: "quota".to_string() });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
