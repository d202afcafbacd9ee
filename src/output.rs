use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::generation::{
    AnimationPrompt, AspectRatio, BatchOutcome, BatchPolicy, GeneratedResult, VariationSeed,
};
use crate::llm::media::extension_for_mime;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultRecord<'a> {
    id: &'a str,
    seed: VariationSeed,
    image_file: String,
    mime_type: &'a str,
    description: &'a str,
    animation_prompt: &'a AnimationPrompt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureRecord {
    seed: Option<VariationSeed>,
    stage: Option<String>,
    message: String,
    detail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchManifest<'a> {
    created_at: String,
    policy: String,
    aspect_ratio: &'static str,
    dimensions: String,
    requested: usize,
    results: Vec<ResultRecord<'a>>,
    failures: Vec<FailureRecord>,
}

/// Name shown to the user for a result; seeds are zero based, downloads are not.
pub fn result_stem(seed: VariationSeed) -> String {
    format!("result-{}", seed + 1)
}

fn record_for(result: &GeneratedResult) -> ResultRecord<'_> {
    let (description, animation_prompt) = match result.prompt_set() {
        Some(set) => (set.description.as_str(), &set.animation_prompt),
        None => ("", &EMPTY_PROMPT),
    };
    ResultRecord {
        id: &result.id,
        seed: result.seed,
        image_file: format!(
            "{}.{}",
            result_stem(result.seed),
            extension_for_mime(&result.image.mime_type)
        ),
        mime_type: &result.image.mime_type,
        description,
        animation_prompt,
    }
}

static EMPTY_PROMPT: AnimationPrompt = AnimationPrompt {
    scene_description: String::new(),
    character_action: String::new(),
    camera_movement: String::new(),
    lighting: String::new(),
    facial_expression: String::new(),
    video_duration: String::new(),
    audio_description: String::new(),
};

fn failure_records(outcome: &BatchOutcome) -> Vec<FailureRecord> {
    match outcome {
        BatchOutcome::Complete(_) => Vec::new(),
        BatchOutcome::Partial(report) => report
            .failures()
            .map(|(seed, err)| FailureRecord {
                seed: Some(seed),
                stage: err.stage().map(|stage| stage.to_string()),
                message: err.user_message(),
                detail: err.to_string(),
            })
            .collect(),
    }
}

/// Writes every result image, its prompt set and a `batch.json` manifest into
/// `dir`. Returns the paths written, manifest last.
pub async fn write_outcome(
    dir: &Path,
    aspect_ratio: AspectRatio,
    requested: usize,
    policy: BatchPolicy,
    outcome: &BatchOutcome,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut written = Vec::new();
    let results = outcome.results();
    let mut records = Vec::with_capacity(results.len());

    for result in results {
        let record = record_for(result);

        let image_path = dir.join(&record.image_file);
        fs::write(&image_path, &result.image.data)
            .await
            .with_context(|| format!("Failed to write {}", image_path.display()))?;
        written.push(image_path);

        let prompt_path = dir.join(format!("{}.json", result_stem(result.seed)));
        let body = serde_json::to_string_pretty(&record)?;
        fs::write(&prompt_path, body)
            .await
            .with_context(|| format!("Failed to write {}", prompt_path.display()))?;
        written.push(prompt_path);

        records.push(record);
    }

    let manifest = BatchManifest {
        created_at: Utc::now().to_rfc3339(),
        policy: policy.to_string(),
        aspect_ratio: aspect_ratio.label(),
        dimensions: aspect_ratio.dimensions_label(),
        requested,
        results: records,
        failures: failure_records(outcome),
    };
    let manifest_path = dir.join("batch.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .await
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    written.push(manifest_path);

    info!("Wrote {} file(s) to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{BatchReport, GenerationError, PromptSet};
    use crate::llm::media::ImagePayload;

    fn result(seed: VariationSeed) -> GeneratedResult {
        let image = ImagePayload::new("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        GeneratedResult {
            id: format!("result-{seed}-test"),
            seed,
            image_url: image.to_data_uri(),
            image,
            prompt_sets: vec![PromptSet {
                description: "Son môi lì mịn màu đẹp".to_string(),
                animation_prompt: AnimationPrompt {
                    scene_description: "Studio".to_string(),
                    character_action: "Smiles".to_string(),
                    camera_movement: "Dolly-in".to_string(),
                    lighting: "Soft".to_string(),
                    facial_expression: "Happy".to_string(),
                    video_duration: "8 seconds".to_string(),
                    audio_description: "Female voice".to_string(),
                },
            }],
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("affiliate-shorts-{name}-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn stems_are_one_based() {
        assert_eq!(result_stem(0), "result-1");
        assert_eq!(result_stem(3), "result-4");
    }

    #[tokio::test]
    async fn writes_images_prompts_and_manifest() {
        let dir = scratch_dir("complete");
        let outcome = BatchOutcome::Complete(vec![result(0), result(1)]);

        let written = write_outcome(&dir, AspectRatio::Portrait, 2, BatchPolicy::AllOrNothing, &outcome)
            .await
            .unwrap();

        assert_eq!(written.len(), 5);
        assert!(dir.join("result-1.png").exists());
        let prompt: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.join("result-2.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(prompt["animationPrompt"]["videoDuration"], "8 seconds");
        assert_eq!(prompt["seed"], 1);

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("batch.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["results"].as_array().unwrap().len(), 2);
        assert_eq!(manifest["aspectRatio"], "9:16");
        assert!(manifest["failures"].as_array().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn partial_manifest_lists_failed_seeds() {
        let dir = scratch_dir("partial");
        let outcome = BatchOutcome::Partial(BatchReport {
            outcomes: vec![
                Ok(result(0)),
                Err(GenerationError::ImageGeneration {
                    seed: 1,
                    detail: "no image".to_string(),
                }),
            ],
        });

        write_outcome(&dir, AspectRatio::Portrait, 2, BatchPolicy::Partial, &outcome)
            .await
            .unwrap();

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("batch.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["results"].as_array().unwrap().len(), 1);
        assert_eq!(manifest["failures"][0]["seed"], 1);
        assert_eq!(manifest["failures"][0]["stage"], "image");
        assert!(!dir.join("result-2.png").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
