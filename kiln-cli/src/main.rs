use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hf_hub::api::tokio::Api;
use kiln_core::{
    compose, encode, select_best_device, write_response, AcceleratorGuard, AssetStore, Classifier,
    DeviceMap, GenerationRequest, Loader, ModelLike, ModelSpec, SdLoader,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Define command line arguments. The generation parameters are positional so
// a supervising process can pass them straight through, in order.
#[derive(Parser, Debug)]
#[command(author, version, about = "Kiln image generation worker")]
struct Args {
    /// Prompt text
    prompt: String,

    /// Negative prompt text
    negative_prompt: String,

    /// Checkpoint name, resolved against the model store
    model: String,

    /// Output width in pixels
    #[arg(value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    width: usize,

    /// Output height in pixels
    #[arg(value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    height: usize,

    /// Random seed; zero or negative generates unseeded
    #[arg(allow_negative_numbers = true)]
    seed: i64,

    /// Number of images to generate
    #[arg(value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    num_images: usize,

    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Root directory of the model store
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,
}

impl Args {
    fn request(&self) -> GenerationRequest {
        GenerationRequest {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            model: self.model.clone(),
            width: self.width,
            height: self.height,
            seed: self.seed,
            num_images: self.num_images,
        }
    }

    fn device_map(&self) -> DeviceMap {
        if self.cpu {
            DeviceMap::ForceCpu
        } else {
            DeviceMap::default()
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let request = args.request();
    let assets = AssetStore::new(&args.models_dir);

    let classifier = Classifier::new(assets.anime_models()?)?;
    let style = classifier.classify(&request.prompt, &request.model);
    info!(%style, model = %request.model, "classified prompt");
    let prompts = compose(style, &request.prompt, &request.negative_prompt);

    let device = select_best_device(args.device_map())?;
    let mut guard = AcceleratorGuard::new(device.clone());
    let result = {
        let api = Api::new().context("failed to create hub API")?;
        let spec = ModelSpec {
            model: &request.model,
            style,
            assets: &assets,
        };
        async {
            let mut model = SdLoader::load(spec, &api, &device).await?;
            model.run(&request, &prompts)
        }
        .await
    };
    // Reclaim the accelerator before touching the output channel, whether or
    // not generation succeeded.
    guard.release();

    let records: Vec<_> = result?.iter().map(encode).collect();
    write_response(std::io::stdout().lock(), &records)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // stdout carries the payload; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("generation failed: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("kiln").chain(args.iter().copied()))
    }

    #[test]
    fn positional_order_matches_the_invocation_contract() {
        let args = parse(&[
            "a photo of a person",
            "",
            "genericModel",
            "512",
            "512",
            "42",
            "2",
        ])
        .unwrap();
        assert_eq!(args.prompt, "a photo of a person");
        assert_eq!(args.negative_prompt, "");
        assert_eq!(args.model, "genericModel");
        assert_eq!((args.width, args.height), (512, 512));
        assert_eq!(args.seed, 42);
        assert_eq!(args.num_images, 2);
    }

    #[test]
    fn negative_seeds_are_accepted() {
        let args = parse(&["p", "n", "m", "512", "512", "-1", "1"]).unwrap();
        assert_eq!(args.seed, -1);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let err = parse(&["p", "n", "m", "0", "512", "1", "1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_image_count_is_rejected() {
        assert!(parse(&["p", "n", "m", "512", "512", "1", "0"]).is_err());
    }

    #[test]
    fn all_arguments_are_required() {
        let err = parse(&["p", "n", "m", "512", "512", "1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn cpu_flag_forces_the_cpu_device() {
        let args = parse(&["p", "n", "m", "512", "512", "1", "1", "--cpu"]).unwrap();
        assert_eq!(args.device_map(), DeviceMap::ForceCpu);
    }
}
