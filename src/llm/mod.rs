pub mod capability;
pub mod gemini;
pub mod media;

pub use capability::{CapabilityError, GenerativeCapability, ReferenceImage};
pub use gemini::{GeminiClient, GeminiSettings};
pub use media::{load_image_file, ImagePayload};
