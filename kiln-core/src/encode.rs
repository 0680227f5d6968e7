use serde::Serialize;

use crate::GeneratedImage;

/// One record of the output payload. Field names are part of the wire
/// contract with the supervising service.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EncodedImage {
    #[serde(rename = "Pixels")]
    pub pixels: Vec<u32>,
    #[serde(rename = "IsNSFW")]
    pub is_nsfw: bool,
}

/// Packs an image into one integer per pixel, row-major, with red in bits
/// 16-23, green in 8-15 and blue in 0-7. Alpha is dropped.
pub fn encode(generated: &GeneratedImage) -> EncodedImage {
    let rgb = generated.image.to_rgb8();
    let pixels = rgb
        .pixels()
        .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2]))
        .collect();
    EncodedImage {
        pixels,
        is_nsfw: generated.nsfw,
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    #[test]
    fn packs_row_major_with_rgb_lanes() {
        let width = 3u32;
        let height = 2u32;
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([x as u8 + 1, y as u8 + 1, (x + y) as u8])
        });
        let encoded = encode(&GeneratedImage {
            image: DynamicImage::ImageRgb8(image),
            nsfw: false,
        });

        assert_eq!(encoded.pixels.len(), (width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let expected = (u32::from(x as u8 + 1) << 16)
                    | (u32::from(y as u8 + 1) << 8)
                    | u32::from((x + y) as u8);
                assert_eq!(encoded.pixels[(y * width + x) as usize], expected);
            }
        }
    }

    #[test]
    fn alpha_channel_is_dropped() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([0x12, 0x34, 0x56, 0x00]));
        let encoded = encode(&GeneratedImage {
            image: DynamicImage::ImageRgba8(image),
            nsfw: true,
        });
        assert!(encoded.is_nsfw);
        assert_eq!(encoded.pixels, vec![0x123456; 4]);
    }

    #[test]
    fn packed_values_stay_within_24_bits() {
        let image = RgbImage::from_pixel(1, 1, Rgb([0xff, 0xff, 0xff]));
        let encoded = encode(&GeneratedImage {
            image: DynamicImage::ImageRgb8(image),
            nsfw: false,
        });
        assert_eq!(encoded.pixels, vec![0x00ff_ffff]);
    }
}
