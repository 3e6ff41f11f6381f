//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the splitter: the
//! default segment height, encoder settings, pipeline tuning and export
//! options, plus the request and source-image types that flow into the worker.

use crate::SplitError;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Main configuration structure for the splitter
///
/// Controls segment height, how each segment is encoded, how progress is
/// weighted, and how exports are laid out.
///
/// # Examples
///
/// ```rust
/// use screenshot_splitter::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     target_segment_height: 800,
///     jpeg_quality: 80,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Height in pixels of each segment (default: 1200)
    ///
    /// The last segment is shorter when the source height is not an exact
    /// multiple of this value.
    pub target_segment_height: u32,

    /// Encoded format of each segment (default: JPEG)
    pub output_format: OutputFormat,

    /// JPEG quality, 1-100 (default: 90)
    pub jpeg_quality: u8,

    /// Share of the progress bar assigned to decoding, in percent (default: 25)
    ///
    /// Tiling fills the remaining share in proportion to finished tiles.
    pub decode_progress_weight: u8,

    /// Capacity of the worker-to-coordinator message channel (default: 32)
    pub channel_capacity: usize,

    /// Upper bound on memory the decoder may allocate, in bytes (default: 1GB)
    ///
    /// `None` disables the limit entirely.
    pub max_decode_bytes: Option<u64>,

    /// Export layout settings
    pub export: ExportSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_segment_height: 1200,
            output_format: OutputFormat::Jpeg,
            jpeg_quality: 90,
            decode_progress_weight: 25,
            channel_capacity: 32,
            max_decode_bytes: Some(1024 * 1024 * 1024), // 1GB
            export: ExportSettings::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.target_segment_height == 0 {
            return Err(SplitError::Configuration(
                "Target segment height must be greater than 0".to_string(),
            ));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(SplitError::Configuration(format!(
                "JPEG quality must be between 1 and 100 (got {})",
                self.jpeg_quality
            )));
        }

        if self.decode_progress_weight >= 100 {
            return Err(SplitError::Configuration(
                "Decode progress weight must be below 100".to_string(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(SplitError::Configuration(
                "Channel capacity must be greater than 0".to_string(),
            ));
        }

        let scale = self.export.pdf_points_per_pixel;
        if scale.is_nan() || scale <= 0.0 {
            return Err(SplitError::Configuration(
                "PDF points per pixel must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Export layout settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Default artifact format when none is given (default: ZIP)
    pub default_format: ExportFormat,

    /// Minimum digit count of the sequence number in archive entry names (default: 3)
    ///
    /// Grows automatically when the segment count needs more digits, so that
    /// lexical order of entry names always matches segment order.
    pub min_sequence_digits: usize,

    /// PDF points per image pixel (default: 0.75, i.e. 96 dpi on a 72 pt inch)
    pub pdf_points_per_pixel: f32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            default_format: ExportFormat::Zip,
            min_sequence_digits: 3,
            pdf_points_per_pixel: 0.75,
        }
    }
}

/// Encoded format of produced segments
///
/// - JPEG: lossy, small, the default for screenshots
/// - PNG: lossless, larger, keeps text edges crisp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Artifact produced by the export engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ExportFormat {
    Zip,
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "zip",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "application/zip",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

/// One split operation: the raw source bytes and the segment height.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub source_bytes: Vec<u8>,
    pub target_segment_height: u32,
}

impl SplitRequest {
    pub fn new(source_bytes: Vec<u8>, target_segment_height: u32) -> Result<Self, SplitError> {
        if target_segment_height == 0 {
            return Err(SplitError::InvalidTargetHeight(target_segment_height));
        }

        Ok(Self {
            source_bytes,
            target_segment_height,
        })
    }
}

/// Header-level facts about a source image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub byte_length: usize,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl SourceImage {
    /// Reads format and dimensions from the image header without decoding pixels.
    pub fn probe(bytes: &[u8]) -> Result<Self, SplitError> {
        let reader = image::io::Reader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| SplitError::Decode(e.to_string()))?;

        let format = reader
            .format()
            .ok_or_else(|| SplitError::Decode("unrecognized image format".to_string()))?;

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| SplitError::Decode(e.to_string()))?;

        Ok(Self {
            byte_length: bytes.len(),
            mime_type: mime_for(format),
            width,
            height,
        })
    }
}

fn mime_for(format: image::ImageFormat) -> &'static str {
    match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Bmp => "image/bmp",
        image::ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}
