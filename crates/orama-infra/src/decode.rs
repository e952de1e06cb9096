// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Texture decoding via the `image` crate.

use image::imageops::FilterType;
use orama_core::texture::discard;
use orama_core::texture::{RawImage, MAX_IMAGE_DIMENSION};
use orama_core::transport::TextureDecoder;
use orama_core::TextureError;

/// Decodes any container format the `image` crate understands and reduces
/// the result to the requested discard level on the CPU.
///
/// Dimension limits are enforced on the decoded full-resolution image before
/// any pixel work happens, so a hostile payload cannot make the resize
/// allocate unbounded memory.
#[derive(Debug, Default, Clone)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    /// Creates the decoder.
    pub fn new() -> Self {
        Self
    }
}

impl TextureDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8], discard_level: u8) -> Result<RawImage, TextureError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| TextureError::MalformedImage(err.to_string()))?;

        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
            return Err(TextureError::OversizedImage { width, height });
        }
        if width == 0
            || height == 0
            || !width.is_power_of_two()
            || !height.is_power_of_two()
        {
            return Err(TextureError::MalformedImage(format!(
                "non-power-of-two dimensions {width}x{height}"
            )));
        }

        let rgba = if discard_level == 0 {
            rgba
        } else {
            let (target_w, target_h) = discard::dimensions_at(width, height, discard_level);
            image::imageops::resize(&rgba, target_w, target_h, FilterType::Triangle)
        };

        let (out_w, out_h) = rgba.dimensions();
        RawImage::new(out_w, out_h, 4, rgba.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_at_full_resolution() {
        let decoder = ImageCrateDecoder::new();
        let image = decoder.decode(&png_bytes(64, 32), 0).unwrap();
        assert_eq!((image.width, image.height), (64, 32));
        assert_eq!(image.components, 4);
        assert_eq!(image.pixels[0..4], [10, 20, 30, 255]);
    }

    #[test]
    fn reduces_to_the_requested_discard() {
        let decoder = ImageCrateDecoder::new();
        let image = decoder.decode(&png_bytes(256, 256), 3).unwrap();
        assert_eq!((image.width, image.height), (32, 32));
    }

    #[test]
    fn rejects_non_power_of_two() {
        let decoder = ImageCrateDecoder::new();
        let result = decoder.decode(&png_bytes(100, 64), 0);
        assert!(matches!(result, Err(TextureError::MalformedImage(_))));
    }

    #[test]
    fn rejects_garbage_payloads() {
        let decoder = ImageCrateDecoder::new();
        let result = decoder.decode(b"definitely not an image", 0);
        assert!(matches!(result, Err(TextureError::MalformedImage(_))));
    }
}
