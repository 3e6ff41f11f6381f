//! Segment encoder
//!
//! Turns one horizontal band of a decoded surface into a compressed blob.

use crate::{Config, OutputFormat, SplitError};
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;

/// A full-width vertical window into the source surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileWindow {
    pub index: usize,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct EncodedTile {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SegmentEncoder {
    format: OutputFormat,
    quality: u8,
}

impl SegmentEncoder {
    pub fn new(format: OutputFormat, quality: u8) -> Self {
        Self {
            format,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.output_format, config.jpeg_quality)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn encode(
        &self,
        surface: &DynamicImage,
        window: TileWindow,
    ) -> Result<EncodedTile, SplitError> {
        let (surface_width, surface_height) = surface.dimensions();

        if window.width == 0 || window.height == 0 {
            return Err(SplitError::Encode {
                index: window.index,
                reason: format!("empty window {}x{}", window.width, window.height),
            });
        }

        let bottom = window.y as u64 + window.height as u64;
        if window.width > surface_width || bottom > surface_height as u64 {
            return Err(SplitError::Encode {
                index: window.index,
                reason: format!(
                    "window {}x{} at y={} exceeds surface {}x{}",
                    window.width, window.height, window.y, surface_width, surface_height
                ),
            });
        }

        let tile = surface.crop_imm(0, window.y, window.width, window.height);
        let mut data = Vec::new();

        let result = match self.format {
            OutputFormat::Jpeg => DynamicImage::ImageRgb8(tile.to_rgb8())
                .write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Jpeg(self.quality)),
            OutputFormat::Png => tile.write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png),
        };

        result.map_err(|e| SplitError::Encode {
            index: window.index,
            reason: e.to_string(),
        })?;

        Ok(EncodedTile {
            index: window.index,
            width: window.width,
            height: window.height,
            format: self.format,
            data,
        })
    }
}
