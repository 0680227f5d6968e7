use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};

use crate::StyleTag;

/// The weight files one checkpoint resolves to.
#[derive(Debug, Clone)]
pub struct CheckpointFiles {
    pub text_encoder: PathBuf,
    pub unet: PathBuf,
}

/// On-disk model store: a checkpoint directory per model name, an embedding
/// directory per style tag, and an optional deployable anime-model list.
///
/// ```text
/// <root>/checkpoints/<model>/{text_encoder,unet}.safetensors
/// <root>/embeddings/<style>/*.safetensors
/// <root>/anime_models.json
/// ```
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a model name to its weight files. A name with no matching
    /// checkpoint is a configuration error.
    pub fn checkpoint(&self, model: &str) -> Result<CheckpointFiles> {
        let dir = self.root.join("checkpoints").join(model);
        ensure!(
            dir.is_dir(),
            "no checkpoint named {model:?} under {}",
            self.root.display()
        );
        let files = CheckpointFiles {
            text_encoder: dir.join("text_encoder.safetensors"),
            unet: dir.join("unet.safetensors"),
        };
        for file in [&files.text_encoder, &files.unet] {
            ensure!(
                file.is_file(),
                "checkpoint {model:?} is missing {}",
                file.display()
            );
        }
        Ok(files)
    }

    /// Auxiliary embedding assets for a style, in sorted order so the token
    /// table extends identically across runs. A style with no directory (or
    /// an empty one) is a valid empty set, not an error.
    pub fn style_embeddings(&self, style: StyleTag) -> Result<Vec<PathBuf>> {
        let dir = self.root.join("embeddings").join(style.to_string());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
        {
            let path = entry
                .with_context(|| format!("failed to read {}", dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "safetensors") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Checkpoint names that force the anime style. Deployed alongside the
    /// weights; falls back to the built-in list when absent.
    pub fn anime_models(&self) -> Result<Vec<String>> {
        let path = self.root.join("anime_models.json");
        if !path.is_file() {
            return Ok(vec!["hassaku".to_string()]);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}
