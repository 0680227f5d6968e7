use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{linear_no_bias, Linear, Module, VarBuilder};
use candle_transformers::models::clip::text_model::Activation;
use candle_transformers::models::clip::vision_model::{ClipVisionConfig, ClipVisionTransformer};
use image::{imageops::FilterType, DynamicImage};

const IMAGE_SIZE: usize = 224;
const NUM_CONCEPTS: usize = 17;
const NUM_SPECIAL_CARE: usize = 3;

// CLIP preprocessing statistics.
const PIXEL_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const PIXEL_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

// The checker runs a ViT-L/14 vision tower.
fn vision_config() -> ClipVisionConfig {
    ClipVisionConfig {
        embed_dim: 1024,
        activation: Activation::QuickGelu,
        intermediate_size: 4096,
        num_hidden_layers: 24,
        num_attention_heads: 16,
        projection_dim: 768,
        num_channels: 3,
        image_size: IMAGE_SIZE,
        patch_size: 14,
    }
}

/// Content-safety check over decoded images: CLIP image embeddings scored by
/// cosine similarity against the checkpoint's concept embeddings, with a
/// stricter margin once a special-care concept fires.
pub struct SafetyChecker {
    device: Device,
    dtype: DType,
    vision_model: ClipVisionTransformer,
    visual_projection: Linear,
    concept_embeds: Tensor,
    concept_weights: Tensor,
    special_care_embeds: Tensor,
    special_care_weights: Tensor,
}

impl SafetyChecker {
    pub fn new(weights: &Path, device: &Device, dtype: DType) -> Result<Self> {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], dtype, device)
                .context("failed to build safety checker var builder")?
        };
        let config = vision_config();
        let vision_model =
            ClipVisionTransformer::new(vb.pp("vision_model").pp("vision_model"), &config)
                .context("failed to load safety checker vision model")?;
        let visual_projection = linear_no_bias(
            config.embed_dim,
            config.projection_dim,
            vb.pp("visual_projection"),
        )
        .context("failed to load safety checker projection")?;
        let concept_embeds = vb
            .get((NUM_CONCEPTS, config.projection_dim), "concept_embeds")
            .context("failed to load concept embeddings")?;
        let concept_weights = vb
            .get(NUM_CONCEPTS, "concept_embeds_weights")
            .context("failed to load concept thresholds")?;
        let special_care_embeds = vb
            .get((NUM_SPECIAL_CARE, config.projection_dim), "special_care_embeds")
            .context("failed to load special-care embeddings")?;
        let special_care_weights = vb
            .get(NUM_SPECIAL_CARE, "special_care_embeds_weights")
            .context("failed to load special-care thresholds")?;
        Ok(Self {
            device: device.clone(),
            dtype,
            vision_model,
            visual_projection,
            concept_embeds,
            concept_weights,
            special_care_embeds,
            special_care_weights,
        })
    }

    pub fn is_nsfw(&self, image: &DynamicImage) -> Result<bool> {
        let pixel_values = self.preprocess(image)?;
        let pooled = self.vision_model.forward(&pixel_values)?;
        let image_embeds = self.visual_projection.forward(&pooled)?;

        let special_scores = self.scores(
            &image_embeds,
            &self.special_care_embeds,
            &self.special_care_weights,
            0.0,
        )?;
        // A special-care hit tightens every concept threshold.
        let adjustment = if special_scores.iter().any(|&s| s > 0.0) {
            0.01
        } else {
            0.0
        };
        let concept_scores = self.scores(
            &image_embeds,
            &self.concept_embeds,
            &self.concept_weights,
            adjustment,
        )?;
        Ok(concept_scores.iter().any(|&s| s > 0.0))
    }

    fn scores(
        &self,
        image_embeds: &Tensor,
        concepts: &Tensor,
        thresholds: &Tensor,
        adjustment: f64,
    ) -> Result<Vec<f32>> {
        let cos = cosine_similarity(image_embeds, concepts)?;
        let scores = (cos.broadcast_sub(thresholds)? + adjustment)?;
        Ok(scores.to_dtype(DType::F32)?.i(0)?.to_vec1::<f32>()?)
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        let resized = image
            .resize_exact(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::CatmullRom)
            .to_rgb8();
        let pixels = Tensor::from_vec(
            resized.into_raw(),
            (IMAGE_SIZE, IMAGE_SIZE, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?;
        let pixels = (pixels / 255f64)?;
        let mean = Tensor::new(&PIXEL_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&PIXEL_STD, &Device::Cpu)?.reshape((3, 1, 1))?;
        let pixels = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
        Ok(pixels
            .unsqueeze(0)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?)
    }
}

/// Row-wise cosine similarity between (1, d) and (n, d), giving (1, n).
fn cosine_similarity(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let a = a.broadcast_div(&a.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?)?;
    let b = b.broadcast_div(&b.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?)?;
    Ok(a.matmul(&b.t()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_unit_axes() {
        let a = Tensor::new(&[[1f32, 0., 0.]], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[1f32, 0., 0.], [0., 1., 0.], [-1., 0., 0.]], &Device::Cpu).unwrap();
        let sim = cosine_similarity(&a, &b)
            .unwrap()
            .i(0)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((sim[0] - 1.0).abs() < 1e-6);
        assert!(sim[1].abs() < 1e-6);
        assert!((sim[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_is_scale_invariant() {
        let a = Tensor::new(&[[0.5f32, 0.5]], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[10f32, 10.]], &Device::Cpu).unwrap();
        let sim = cosine_similarity(&a, &b)
            .unwrap()
            .i(0)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((sim[0] - 1.0).abs() < 1e-6);
    }
}
