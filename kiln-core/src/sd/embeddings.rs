use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use tokenizers::{AddedToken, Tokenizer};
use tracing::info;

const TOKEN_EMBEDDING_KEY: &str = "text_model.embeddings.token_embedding.weight";

/// A textual-inversion asset: a trigger token plus one or more embedding
/// vectors to splice into the text encoder's vocabulary.
pub struct AuxEmbedding {
    pub token: String,
    /// Shape (vectors, embed_dim).
    pub vectors: Tensor,
}

pub fn load_aux_embedding(path: &Path, device: &Device) -> Result<AuxEmbedding> {
    let token = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("embedding file {} has no usable name", path.display()))?
        .to_string();
    let tensors = candle_core::safetensors::load(path, device)
        .with_context(|| format!("failed to load embedding file {}", path.display()))?;
    let vectors = pick_embedding_tensor(tensors)
        .with_context(|| format!("malformed embedding file {}", path.display()))?;
    Ok(AuxEmbedding { token, vectors })
}

/// Accepts the common single-file layouts: an `emb_params` entry, or a file
/// holding exactly one tensor of rank 1 or 2.
fn pick_embedding_tensor(mut tensors: HashMap<String, Tensor>) -> Result<Tensor> {
    let tensor = match tensors.remove("emb_params") {
        Some(tensor) => tensor,
        None => {
            ensure!(
                tensors.len() == 1,
                "expected an `emb_params` entry or a single tensor, found {}",
                tensors.len()
            );
            tensors
                .into_values()
                .next()
                .context("embedding file holds no tensors")?
        }
    };
    match tensor.rank() {
        1 => Ok(tensor.unsqueeze(0)?),
        2 => Ok(tensor),
        rank => bail!("embedding tensor has rank {rank}, expected 1 or 2"),
    }
}

/// Rows in the text encoder's token-embedding table, which is also the
/// vocabulary size the text model must be built with.
pub fn vocab_size(clip_tensors: &HashMap<String, Tensor>) -> Result<usize> {
    let table = clip_tensors
        .get(TOKEN_EMBEDDING_KEY)
        .with_context(|| format!("text encoder is missing {TOKEN_EMBEDDING_KEY}"))?;
    Ok(table.dims2()?.0)
}

/// Appends the auxiliary vectors to the text encoder's token-embedding table
/// and registers matching tokenizer entries, so the trigger words resolve to
/// the new rows.
///
/// Multi-vector embeddings register `<token>`, `<token>_1`, `<token>_2`, ...
pub fn extend_token_embeddings(
    tokenizer: &mut Tokenizer,
    mut clip_tensors: HashMap<String, Tensor>,
    aux: Vec<AuxEmbedding>,
) -> Result<HashMap<String, Tensor>> {
    if aux.is_empty() {
        return Ok(clip_tensors);
    }
    let table = clip_tensors
        .remove(TOKEN_EMBEDDING_KEY)
        .with_context(|| format!("text encoder is missing {TOKEN_EMBEDDING_KEY}"))?;
    let (vocab, embed_dim) = table.dims2()?;
    let dtype = table.dtype();

    let mut rows = vec![table];
    let mut added = 0usize;
    for emb in aux {
        let (vectors, dim) = emb.vectors.dims2()?;
        ensure!(
            dim == embed_dim,
            "embedding {:?} has width {dim}, text encoder expects {embed_dim}",
            emb.token
        );
        for i in 0..vectors {
            let name = if i == 0 {
                emb.token.clone()
            } else {
                format!("{}_{i}", emb.token)
            };
            tokenizer.add_tokens(&[AddedToken::from(name.clone(), false)]);
            let id = tokenizer
                .token_to_id(&name)
                .with_context(|| format!("tokenizer rejected embedding token {name:?}"))?;
            ensure!(
                id as usize == vocab + added,
                "embedding token {name:?} landed at id {id}, expected {}",
                vocab + added
            );
            rows.push(emb.vectors.i(i)?.unsqueeze(0)?.to_dtype(dtype)?);
            added += 1;
        }
        info!(token = %emb.token, vectors, "registered auxiliary embedding");
    }

    let rows: Vec<&Tensor> = rows.iter().collect();
    clip_tensors.insert(TOKEN_EMBEDDING_KEY.to_string(), Tensor::cat(&rows, 0)?);
    Ok(clip_tensors)
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;

    fn tensor(shape: &[usize]) -> Tensor {
        Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn emb_params_entry_wins() {
        let mut map = HashMap::new();
        map.insert("emb_params".to_string(), tensor(&[2, 768]));
        map.insert("extra".to_string(), tensor(&[4]));
        let picked = pick_embedding_tensor(map).unwrap();
        assert_eq!(picked.dims(), [2, 768]);
    }

    #[test]
    fn single_unnamed_tensor_is_accepted() {
        let mut map = HashMap::new();
        map.insert("whatever".to_string(), tensor(&[768]));
        let picked = pick_embedding_tensor(map).unwrap();
        assert_eq!(picked.dims(), [1, 768]);
    }

    #[test]
    fn ambiguous_files_are_malformed() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), tensor(&[768]));
        map.insert("b".to_string(), tensor(&[768]));
        assert!(pick_embedding_tensor(map).is_err());
    }

    #[test]
    fn unexpected_rank_is_malformed() {
        let mut map = HashMap::new();
        map.insert("emb_params".to_string(), tensor(&[1, 2, 768]));
        assert!(pick_embedding_tensor(map).is_err());
    }
}
