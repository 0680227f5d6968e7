use std::future::Future;

use anyhow::Result;
use candle_core::Device;
use hf_hub::api::tokio::Api;

use crate::{AssetStore, ModelLike, StyleTag};

/// Everything needed to resolve one checkpoint plus its style assets.
pub struct ModelSpec<'a> {
    pub model: &'a str,
    pub style: StyleTag,
    pub assets: &'a AssetStore,
}

pub trait Loader {
    type Model: ModelLike;

    fn load(
        spec: ModelSpec<'_>,
        api: &Api,
        device: &Device,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
