use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::generation::composer::compose;
use crate::generation::error::GenerationError;
use crate::generation::image_call::generate_image;
use crate::generation::text_call::generate_prompt_set;
use crate::generation::types::{
    BatchOutcome, BatchPolicy, BatchReport, GeneratedResult, GenerationRequest, PromptSet,
    VariationSeed,
};
use crate::llm::capability::GenerativeCapability;
use crate::llm::media::ImagePayload;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub policy: BatchPolicy,
    /// Upper bound on units in flight at once. `None` runs every unit at once.
    pub max_concurrency: Option<usize>,
}

/// What a unit of work yields before it is stamped with an id.
struct UnitOutput {
    seed: VariationSeed,
    image: ImagePayload,
    image_url: String,
    prompt_set: PromptSet,
}

pub struct Orchestrator {
    capability: Arc<dyn GenerativeCapability>,
    options: OrchestratorOptions,
    admission: Option<Arc<Semaphore>>,
}

impl Orchestrator {
    pub fn new(capability: Arc<dyn GenerativeCapability>, options: OrchestratorOptions) -> Self {
        let admission = options
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            capability,
            options,
            admission,
        }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.options.policy
    }

    /// Runs the batch under the configured policy.
    pub async fn run(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, GenerationError> {
        match self.options.policy {
            BatchPolicy::AllOrNothing => self
                .generate_all_content(request, cancel)
                .await
                .map(BatchOutcome::Complete),
            BatchPolicy::Partial => self
                .generate_batch(request, cancel)
                .await
                .map(BatchOutcome::Partial),
        }
    }

    /// Every seed must succeed; the first failure fails the batch and drops
    /// the units still in flight.
    pub async fn generate_all_content(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeneratedResult>, GenerationError> {
        request.validate()?;
        let request = Arc::new(request);
        info!(
            "Starting batch of {} unit(s) (policy=all_or_nothing, aspect={}, voice={:?}, region={:?})",
            request.result_count,
            request.aspect_ratio.label(),
            request.voice,
            request.region
        );

        let units = request
            .seeds()
            .map(|seed| self.run_unit(Arc::clone(&request), seed));

        let outputs = tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            outputs = try_join_all(units) => outputs,
        };

        match outputs {
            Ok(outputs) => Ok(outputs.into_iter().map(assemble).collect()),
            Err(err) => {
                warn!("Batch failed: {}", err);
                Err(err)
            }
        }
    }

    /// Every seed resolves on its own; failures are reported next to the
    /// successes at their seed index.
    pub async fn generate_batch(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, GenerationError> {
        request.validate()?;
        let request = Arc::new(request);
        info!(
            "Starting batch of {} unit(s) (policy=partial, aspect={})",
            request.result_count,
            request.aspect_ratio.label()
        );

        let units = request
            .seeds()
            .map(|seed| self.run_unit(Arc::clone(&request), seed));

        let outcomes = tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            outcomes = join_all(units) => outcomes,
        };

        let report = BatchReport {
            outcomes: outcomes
                .into_iter()
                .map(|outcome| outcome.map(assemble))
                .collect(),
        };
        for (seed, err) in report.failures() {
            warn!("Seed {} failed: {}", seed, err);
        }
        Ok(report)
    }

    async fn run_unit(
        &self,
        request: Arc<GenerationRequest>,
        seed: VariationSeed,
    ) -> Result<UnitOutput, GenerationError> {
        let _permit = match &self.admission {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| GenerationError::Cancelled)?,
            ),
            None => None,
        };

        let prompts = compose(&request, seed);
        let capability = self.capability.as_ref();

        let image = generate_image(
            capability,
            seed,
            &prompts.image_prompt,
            &request.person_image,
            &request.product_image,
            request.aspect_ratio,
        )
        .await?;

        let prompt_set = generate_prompt_set(
            capability,
            seed,
            &prompts.text_prompt,
            &request.product_image,
            &image.payload,
            &prompts.schema,
        )
        .await?;

        info!("Seed {} finished", seed);
        Ok(UnitOutput {
            seed,
            image: image.payload,
            image_url: image.data_uri,
            prompt_set,
        })
    }
}

fn assemble(output: UnitOutput) -> GeneratedResult {
    GeneratedResult {
        id: format!("result-{}-{}", output.seed, Uuid::new_v4()),
        seed: output.seed,
        image_url: output.image_url,
        image: output.image,
        prompt_sets: vec![output.prompt_set],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::error::Stage;
    use crate::llm::capability::{CapabilityError, ReferenceImage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn seed_in(prompt: &str) -> VariationSeed {
        let marker = "seed ";
        let lower = prompt.to_lowercase();
        let start = lower.find(marker).expect("seed mentioned") + marker.len();
        lower[start..]
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect::<String>()
            .parse()
            .expect("seed number")
    }

    fn answer_for(seed: VariationSeed) -> String {
        json!({
            "description": format!("mô tả số {seed} cho sản phẩm"),
            "animationPrompt": {
                "sceneDescription": "scene",
                "characterAction": "action",
                "cameraMovement": format!("orbital shot {seed}"),
                "lighting": "golden hour",
                "facialExpression": "smile",
                "videoDuration": "8 seconds",
                "audioDescription": "female Southern Vietnamese voice"
            }
        })
        .to_string()
    }

    /// Fake model: the generated image bytes encode the seed, and each text
    /// answer echoes the seed of the image it was shown.
    #[derive(Default)]
    struct FakeModel {
        fail_image_for: Option<VariationSeed>,
        no_image_for: Option<VariationSeed>,
        bad_json_for: Option<VariationSeed>,
        slower_for_low_seeds: bool,
        image_seeds: Mutex<Vec<VariationSeed>>,
        text_calls: Mutex<Vec<(VariationSeed, u8)>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        block_forever: bool,
    }

    #[async_trait]
    impl GenerativeCapability for FakeModel {
        async fn generate_image(
            &self,
            prompt: &str,
            references: &[&ImagePayload],
        ) -> Result<Option<ImagePayload>, CapabilityError> {
            assert_eq!(references.len(), 2);
            let seed = seed_in(prompt);
            self.image_seeds.lock().push(seed);

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.block_forever {
                futures::future::pending::<()>().await;
            }
            if self.slower_for_low_seeds {
                tokio::time::sleep(Duration::from_millis(40 - 10 * seed as u64)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_image_for == Some(seed) {
                return Err(CapabilityError::Http {
                    status: 500,
                    message: "backend exploded".to_string(),
                });
            }
            if self.no_image_for == Some(seed) {
                return Ok(None);
            }
            Ok(Some(ImagePayload::new("image/png", vec![seed as u8])))
        }

        async fn generate_structured_text(
            &self,
            prompt: &str,
            references: &[ReferenceImage<'_>],
            _schema: &Value,
        ) -> Result<String, CapabilityError> {
            let seed = seed_in(prompt);
            let generated = references
                .iter()
                .find(|reference| reference.caption.starts_with("Generated"))
                .map(|reference| reference.image.data[0])
                .expect("generated image is passed along");
            self.text_calls.lock().push((seed, generated));
            if self.bad_json_for == Some(seed) {
                return Ok("{\"description\": \"thiếu\"}".to_string());
            }
            Ok(answer_for(seed))
        }
    }

    fn request(count: usize) -> GenerationRequest {
        let mut request = GenerationRequest::new(
            ImagePayload::new("image/jpeg", vec![10]),
            ImagePayload::new("image/jpeg", vec![20]),
        );
        request.result_count = count;
        request
    }

    fn orchestrator(model: Arc<FakeModel>, options: OrchestratorOptions) -> Orchestrator {
        Orchestrator::new(model, options)
    }

    #[tokio::test]
    async fn results_are_index_aligned_with_seeds() {
        let model = Arc::new(FakeModel {
            slower_for_low_seeds: true,
            ..FakeModel::default()
        });
        let results = orchestrator(Arc::clone(&model), OrchestratorOptions::default())
            .generate_all_content(request(4), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        for (index, result) in results.iter().enumerate() {
            assert_eq!(result.seed, index as VariationSeed);
            assert_eq!(result.image.data, vec![index as u8]);
            assert_eq!(result.prompt_sets.len(), 1);
            assert!(result.prompt_sets[0]
                .animation_prompt
                .camera_movement
                .ends_with(&index.to_string()));
            assert_eq!(result.prompt_sets[0].animation_prompt.video_duration, "8 seconds");
        }
        let ids: HashSet<_> = results.iter().map(|result| result.id.clone()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn image_call_count_and_seeds_follow_result_count() {
        for count in [1usize, 4] {
            let model = Arc::new(FakeModel::default());
            orchestrator(Arc::clone(&model), OrchestratorOptions::default())
                .generate_all_content(request(count), &CancellationToken::new())
                .await
                .unwrap();

            let mut seeds = model.image_seeds.lock().clone();
            seeds.sort_unstable();
            let expected: Vec<VariationSeed> = (0..count as VariationSeed).collect();
            assert_eq!(seeds, expected);
        }
    }

    #[tokio::test]
    async fn text_call_sees_the_image_of_its_own_seed() {
        let model = Arc::new(FakeModel::default());
        orchestrator(Arc::clone(&model), OrchestratorOptions::default())
            .generate_all_content(request(3), &CancellationToken::new())
            .await
            .unwrap();

        let calls = model.text_calls.lock().clone();
        assert_eq!(calls.len(), 3);
        for (seed, image_marker) in calls {
            assert_eq!(seed as u8, image_marker);
        }
    }

    #[tokio::test]
    async fn one_failed_unit_fails_the_whole_batch() {
        let model = Arc::new(FakeModel {
            fail_image_for: Some(2),
            ..FakeModel::default()
        });
        let err = orchestrator(model, OrchestratorOptions::default())
            .generate_all_content(request(4), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.seed(), Some(2));
        assert_eq!(err.stage(), Some(Stage::Image));
        assert!(matches!(err, GenerationError::Transport { .. }));
    }

    #[tokio::test]
    async fn missing_image_stops_the_unit_before_its_text_call() {
        let model = Arc::new(FakeModel {
            no_image_for: Some(0),
            ..FakeModel::default()
        });
        let err = orchestrator(Arc::clone(&model), OrchestratorOptions::default())
            .generate_all_content(request(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::ImageGeneration { seed: 0, .. }));
        assert!(model.text_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn partial_mode_reports_failures_in_place() {
        let model = Arc::new(FakeModel {
            bad_json_for: Some(2),
            ..FakeModel::default()
        });
        let options = OrchestratorOptions {
            policy: BatchPolicy::Partial,
            max_concurrency: None,
        };
        let outcome = orchestrator(model, options)
            .run(request(4), &CancellationToken::new())
            .await
            .unwrap();

        let BatchOutcome::Partial(report) = outcome else {
            panic!("partial policy returns a report");
        };
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.successes().count(), 3);
        assert!(!report.is_complete());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 2);
        assert!(matches!(failures[0].1, GenerationError::MetadataParse { seed: 2, .. }));
        assert_eq!(report.outcomes[3].as_ref().unwrap().seed, 3);
    }

    #[tokio::test]
    async fn concurrency_limit_caps_units_in_flight() {
        let model = Arc::new(FakeModel::default());
        let options = OrchestratorOptions {
            policy: BatchPolicy::AllOrNothing,
            max_concurrency: Some(2),
        };
        let results = orchestrator(Arc::clone(&model), options)
            .generate_all_content(request(6), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 6);
        assert!(model.peak_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unbounded_mode_runs_every_unit_at_once() {
        let model = Arc::new(FakeModel::default());
        orchestrator(Arc::clone(&model), OrchestratorOptions::default())
            .generate_all_content(request(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(model.peak_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_units() {
        let model = Arc::new(FakeModel {
            block_forever: true,
            ..FakeModel::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orchestrator(model, OrchestratorOptions::default())
            .generate_all_content(request(3), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_model() {
        let model = Arc::new(FakeModel::default());
        let err = orchestrator(Arc::clone(&model), OrchestratorOptions::default())
            .generate_all_content(request(0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
        assert!(model.image_seeds.lock().is_empty());
    }
}
