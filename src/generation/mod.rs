pub mod composer;
pub mod error;
pub mod image_call;
pub mod orchestrator;
pub mod text_call;
pub mod types;

pub use error::{GenerationError, Stage};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use types::{
    AnimationPrompt, AspectRatio, BatchOutcome, BatchPolicy, BatchReport, GeneratedResult,
    GenerationRequest, PromptSet, Region, VariationSeed, Voice,
};
