use anyhow::{ensure, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Module, VarBuilder};
use candle_transformers::models::clip::text_model::{self, ClipTextTransformer};
use candle_transformers::models::stable_diffusion::euler_ancestral_discrete::EulerAncestralDiscreteSchedulerConfig;
use candle_transformers::models::stable_diffusion::schedulers::{Scheduler, SchedulerConfig};
use candle_transformers::models::stable_diffusion::unet_2d::UNet2DConditionModel;
use candle_transformers::models::stable_diffusion::vae::AutoEncoderKL;
use candle_transformers::models::stable_diffusion::StableDiffusionConfig;
use hf_hub::api::tokio::Api;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

mod embeddings;
mod safety;

use crate::{
    tensor_to_image, ComposedPrompt, GeneratedImage, GenerationRequest, Loader, ModelLike,
    ModelSpec,
};
use safety::SafetyChecker;

// Shared assets, fetched through the hub cache. Per-model weights come from
// the local checkpoint store instead.
const CLIP_TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";
const VAE_REPO: &str = "stabilityai/sd-vae-ft-mse";
const VAE_WEIGHTS: &str = "diffusion_pytorch_model.safetensors";
const SAFETY_REPO: &str = "CompVis/stable-diffusion-safety-checker";
const SAFETY_WEIGHTS: &str = "model.safetensors";

const INFERENCE_STEPS: usize = 20;
const GUIDANCE_SCALE: f64 = 7.0;
const VAE_SCALE: f64 = 0.18215;

pub struct SdPipeline {
    device: Device,
    dtype: DType,
    tokenizer: Tokenizer,
    pad_id: u32,
    token_window: usize,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    safety: SafetyChecker,
}

impl SdPipeline {
    fn encode_prompt(&self, text: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)
            .context("failed to tokenize prompt")?
            .get_ids()
            .to_vec();
        tokens.resize(self.token_window, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

impl ModelLike for SdPipeline {
    fn run(
        &mut self,
        request: &GenerationRequest,
        prompts: &ComposedPrompt,
    ) -> Result<Vec<GeneratedImage>> {
        ensure!(
            request.width % 8 == 0 && request.height % 8 == 0,
            "width and height must be multiples of 8, got {}x{}",
            request.width,
            request.height
        );
        if request.seed > 0 {
            self.device.set_seed(request.seed as u64)?;
        }

        // --- Compute the prompt embeddings, negative first for CFG ---
        let uncond_embeddings = self.encode_prompt(&prompts.negative)?;
        let cond_embeddings = self.encode_prompt(&prompts.positive)?;
        let text_embeddings = Tensor::cat(&[&uncond_embeddings, &cond_embeddings], 0)?;

        let mut images = Vec::with_capacity(request.num_images);
        for idx in 0..request.num_images {
            // --- Run the denoising schedule over fresh noise ---
            let mut scheduler =
                EulerAncestralDiscreteSchedulerConfig::default().build(INFERENCE_STEPS)?;
            let latents = Tensor::randn(
                0f32,
                1f32,
                (1, 4, request.height / 8, request.width / 8),
                &self.device,
            )?;
            let latents = (latents * scheduler.init_noise_sigma())?;
            let mut latents = latents.to_dtype(self.dtype)?;

            let timesteps = scheduler.timesteps().to_vec();
            for &timestep in &timesteps {
                let latent_model_input = Tensor::cat(&[&latents, &latents], 0)?;
                let latent_model_input =
                    scheduler.scale_model_input(latent_model_input, timestep)?;
                let noise_pred =
                    self.unet
                        .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
                let noise_pred = noise_pred.chunk(2, 0)?;
                let (noise_pred_uncond, noise_pred_text) = (&noise_pred[0], &noise_pred[1]);
                let noise_pred =
                    (noise_pred_uncond + ((noise_pred_text - noise_pred_uncond)? * GUIDANCE_SCALE)?)?;
                latents = scheduler.step(&noise_pred, timestep, &latents)?;
            }

            // --- Decode the latent image and check it ---
            let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
            let decoded = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
            let image = tensor_to_image(&decoded.i(0)?)?;
            let nsfw = self
                .safety
                .is_nsfw(&image)
                .context("failed to run safety check")?;
            info!(image = idx + 1, total = request.num_images, nsfw, "generated image");
            images.push(GeneratedImage { image, nsfw });
        }
        Ok(images)
    }
}

pub struct SdLoader;

impl Loader for SdLoader {
    type Model = SdPipeline;

    async fn load(spec: ModelSpec<'_>, api: &Api, device: &Device) -> Result<SdPipeline> {
        let dtype = device.bf16_default_to_f32();
        let checkpoint = spec.assets.checkpoint(spec.model)?;
        let sd_config = StableDiffusionConfig::v1_5(None, None, None);

        // --- Load the CLIP tokenizer ---
        let tokenizer_file = api
            .model(CLIP_TOKENIZER_REPO.to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let mut tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: sd_config.clip.max_position_embeddings,
                ..Default::default()
            }))
            .map_err(Error::msg)
            .context("failed to configure tokenizer truncation")?;
        let pad_id = match &sd_config.clip.pad_with {
            Some(padding) => tokenizer
                .token_to_id(padding)
                .with_context(|| format!("tokenizer has no padding token {padding:?}"))?,
            None => tokenizer
                .token_to_id("<|endoftext|>")
                .context("tokenizer has no end-of-text token")?,
        };

        // --- Load the text encoder, splicing in the style's embeddings ---
        info!(model = spec.model, style = %spec.style, "loading checkpoint");
        let clip_tensors = candle_core::safetensors::load(&checkpoint.text_encoder, device)
            .context("failed to load text encoder weights")?;
        let mut aux = Vec::new();
        for path in spec.assets.style_embeddings(spec.style)? {
            aux.push(embeddings::load_aux_embedding(&path, device)?);
        }
        let clip_tensors = embeddings::extend_token_embeddings(&mut tokenizer, clip_tensors, aux)?;
        let clip_config = text_model::ClipTextConfig {
            vocab_size: embeddings::vocab_size(&clip_tensors)?,
            projection_dim: 768,
            activation: text_model::Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: sd_config.clip.max_position_embeddings,
            pad_with: sd_config.clip.pad_with.clone(),
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let clip_vb = VarBuilder::from_tensors(clip_tensors, dtype, device);
        let text_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
            .context("failed to load text encoder")?;

        // --- Load the denoiser ---
        let unet = sd_config
            .build_unet(&checkpoint.unet, device, 4, false, dtype)
            .context("failed to load unet")?;

        // --- Load the shared autoencoder ---
        let vae_file = api
            .model(VAE_REPO.to_string())
            .get(VAE_WEIGHTS)
            .await
            .context("failed to get VAE weights")?;
        let vae = sd_config
            .build_vae(&vae_file, device, dtype)
            .context("failed to load VAE")?;

        // --- Load the safety checker ---
        let safety_file = api
            .model(SAFETY_REPO.to_string())
            .get(SAFETY_WEIGHTS)
            .await
            .context("failed to get safety checker weights")?;
        let safety = SafetyChecker::new(&safety_file, device, dtype)
            .context("failed to load safety checker")?;

        Ok(SdPipeline {
            device: device.clone(),
            dtype,
            tokenizer,
            pad_id,
            token_window: sd_config.clip.max_position_embeddings,
            text_model,
            unet,
            vae,
            safety,
        })
    }
}
