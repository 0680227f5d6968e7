#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod assets;
pub mod classify;
pub mod device;
pub mod encode;
pub mod loader;
pub mod response;
pub mod style;

mod sd;
mod util;

pub use assets::AssetStore;
pub use classify::Classifier;
pub use device::*;
pub use encode::{encode, EncodedImage};
use image::DynamicImage;
pub use loader::*;
pub use response::write_response;
pub use sd::{SdLoader, SdPipeline};
pub use style::{compose, ComposedPrompt, StyleTag};
pub(crate) use util::*;

use serde::{Deserialize, Serialize};

// Define the request type. One process handles exactly one of these.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub model: String,
    pub width: usize,
    pub height: usize,
    /// Zero or negative generates unseeded.
    pub seed: i64,
    pub num_images: usize,
}

/// One decoded image paired with the safety verdict for it.
pub struct GeneratedImage {
    pub image: DynamicImage,
    pub nsfw: bool,
}

pub trait ModelLike: Send + Sync {
    fn run(
        &mut self,
        request: &GenerationRequest,
        prompts: &ComposedPrompt,
    ) -> anyhow::Result<Vec<GeneratedImage>>;
}
