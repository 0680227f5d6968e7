use anyhow::{ensure, Context, Result};
use candle_core::Tensor;
use image::DynamicImage;

/// Converts a (3, height, width) u8 tensor into an RGB image.
pub(crate) fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    ensure!(channels == 3, "expected a 3-channel image tensor, got {channels}");
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .context("image buffer does not match tensor dimensions")?;
    Ok(DynamicImage::ImageRgb8(buffer))
}
