//! Export engine
//!
//! Serializes the selected segments into a single ZIP archive or a
//! multi-page PDF and hands the finished artifact to a download sink. An
//! artifact is only ever delivered whole: any failure while building it
//! discards everything and nothing reaches the sink.

use crate::{
    metrics, sanitize_filename, Config, ExportFormat, ExportSettings, OutputFormat, Segment,
    SegmentStore, SplitError,
};
use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const FALLBACK_PREFIX: &str = "segments";

/// A finished, downloadable export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub filename: String,
    pub format: ExportFormat,
    pub entries: usize,
    pub data: Vec<u8>,
}

impl ExportArtifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Destination of finished artifacts, the native counterpart of a browser download.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn deliver(&self, artifact: &ExportArtifact) -> Result<(), SplitError>;
}

/// Writes artifacts into a directory. The file appears under its final name
/// only once it has been written completely.
#[derive(Debug, Clone)]
pub struct DirectoryDownloads {
    dir: PathBuf,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DownloadSink for DirectoryDownloads {
    async fn deliver(&self, artifact: &ExportArtifact) -> Result<(), SplitError> {
        fs::create_dir_all(&self.dir).await?;

        let target = self.dir.join(&artifact.filename);
        let partial = self.dir.join(format!("{}.part", artifact.filename));

        if let Err(e) = fs::write(&partial, &artifact.data).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        info!(
            "Saved {} ({} entries, {} bytes)",
            target.display(),
            artifact.entries,
            artifact.data.len()
        );
        Ok(())
    }
}

pub struct ExportEngine {
    settings: ExportSettings,
    jpeg_quality: u8,
}

impl ExportEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.export.clone(),
            jpeg_quality: config.jpeg_quality,
        }
    }

    pub async fn export(
        &self,
        format: ExportFormat,
        store: &SegmentStore,
        filename_prefix: &str,
        sink: &dyn DownloadSink,
    ) -> Result<ExportArtifact, SplitError> {
        match format {
            ExportFormat::Zip => {
                self.export_zip(store.segments(), store.selection(), filename_prefix, sink)
                    .await
            }
            ExportFormat::Pdf => {
                self.export_pdf(store.segments(), store.selection(), filename_prefix, sink)
                    .await
            }
        }
    }

    pub async fn export_zip(
        &self,
        segments: &[Segment],
        selection: &BTreeSet<usize>,
        filename_prefix: &str,
        sink: &dyn DownloadSink,
    ) -> Result<ExportArtifact, SplitError> {
        let artifact = self
            .build_zip(segments, selection, filename_prefix)
            .map_err(|e| {
                metrics::record_export_failed();
                e
            })?;
        self.deliver(artifact, sink).await
    }

    pub async fn export_pdf(
        &self,
        segments: &[Segment],
        selection: &BTreeSet<usize>,
        filename_prefix: &str,
        sink: &dyn DownloadSink,
    ) -> Result<ExportArtifact, SplitError> {
        let artifact = self
            .build_pdf(segments, selection, filename_prefix)
            .map_err(|e| {
                metrics::record_export_failed();
                e
            })?;
        self.deliver(artifact, sink).await
    }

    async fn deliver(
        &self,
        artifact: ExportArtifact,
        sink: &dyn DownloadSink,
    ) -> Result<ExportArtifact, SplitError> {
        if let Err(e) = sink.deliver(&artifact).await {
            warn!("Failed to deliver {}: {}", artifact.filename, e);
            metrics::record_export_failed();
            return Err(e);
        }

        metrics::record_export(artifact.format, artifact.entries, artifact.data.len());
        Ok(artifact)
    }

    pub fn build_zip(
        &self,
        segments: &[Segment],
        selection: &BTreeSet<usize>,
        filename_prefix: &str,
    ) -> Result<ExportArtifact, SplitError> {
        let selected = selected_segments(segments, selection)?;
        let prefix = normalize_prefix(filename_prefix);
        let digits = self.sequence_digits(segments.len());

        // Segment blobs are already compressed images.
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for segment in &selected {
            let name = entry_name(&prefix, segment, digits);
            debug!("Adding {} ({} bytes)", name, segment.data.len());

            writer.start_file(name, options)?;
            writer
                .write_all(&segment.data)
                .map_err(|e| SplitError::ExportSerialization(e.to_string()))?;
        }

        let data = writer.finish()?.into_inner();

        Ok(ExportArtifact {
            filename: format!("{prefix}.{}", ExportFormat::Zip.extension()),
            format: ExportFormat::Zip,
            entries: selected.len(),
            data,
        })
    }

    pub fn build_pdf(
        &self,
        segments: &[Segment],
        selection: &BTreeSet<usize>,
        filename_prefix: &str,
    ) -> Result<ExportArtifact, SplitError> {
        let selected = selected_segments(segments, selection)?;
        let prefix = normalize_prefix(filename_prefix);
        let scale = self.settings.pdf_points_per_pixel;

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(selected.len());

        for segment in &selected {
            let jpeg = self.jpeg_bytes(segment)?;
            let page_width = segment.width as f32 * scale;
            let page_height = segment.height as f32 * scale;

            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => segment.width as i64,
                    "Height" => segment.height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8_i64,
                    "Filter" => "DCTDecode"
                },
                jpeg.into_owned(),
            )
            .with_compression(false);
            let image_id = doc.add_object(image);

            // Scale the unit image square to the full page.
            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            Object::Real(page_width),
                            Object::Integer(0),
                            Object::Integer(0),
                            Object::Real(page_height),
                            Object::Integer(0),
                            Object::Integer(0),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let encoded = content
                .encode()
                .map_err(|e| SplitError::ExportSerialization(e.to_string()))?;
            let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(page_width),
                    Object::Real(page_height)
                ],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! {
                        "Im0" => image_id
                    }
                }
            });
            kids.push(page_id.into());

            debug!(
                "Added PDF page for segment {} ({:.1}x{:.1}pt)",
                segment.index, page_width, page_height
            );
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => selected.len() as i64
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id
        });
        doc.trailer.set("Root", catalog_id);

        let mut data = Vec::new();
        doc.save_to(&mut data)
            .map_err(|e| SplitError::ExportSerialization(e.to_string()))?;

        Ok(ExportArtifact {
            filename: format!("{prefix}.{}", ExportFormat::Pdf.extension()),
            format: ExportFormat::Pdf,
            entries: selected.len(),
            data,
        })
    }

    /// PDF pages embed JPEG directly; other segment formats are re-encoded.
    fn jpeg_bytes<'a>(&self, segment: &'a Segment) -> Result<Cow<'a, [u8]>, SplitError> {
        if segment.format == OutputFormat::Jpeg {
            return Ok(Cow::Borrowed(&segment.data));
        }

        let decoded = image::load_from_memory(&segment.data)
            .map_err(|e| SplitError::ExportSerialization(e.to_string()))?;

        let mut data = Vec::new();
        DynamicImage::ImageRgb8(decoded.to_rgb8())
            .write_to(
                &mut Cursor::new(&mut data),
                ImageOutputFormat::Jpeg(self.jpeg_quality),
            )
            .map_err(|e| SplitError::ExportSerialization(e.to_string()))?;

        Ok(Cow::Owned(data))
    }

    fn sequence_digits(&self, segment_count: usize) -> usize {
        self.settings
            .min_sequence_digits
            .max(segment_count.to_string().len())
    }
}

fn selected_segments<'a>(
    segments: &'a [Segment],
    selection: &BTreeSet<usize>,
) -> Result<Vec<&'a Segment>, SplitError> {
    // BTreeSet iterates in ascending order, which is the export order.
    let selected: Vec<&Segment> = selection
        .iter()
        .filter_map(|&index| segments.get(index).filter(|s| s.index == index))
        .collect();

    if selected.is_empty() {
        return Err(SplitError::NoSelection);
    }

    Ok(selected)
}

fn entry_name(prefix: &str, segment: &Segment, digits: usize) -> String {
    format!(
        "{prefix}_{:0width$}.{}",
        segment.index + 1,
        segment.format.extension(),
        width = digits
    )
}

fn normalize_prefix(prefix: &str) -> String {
    let sanitized = sanitize_filename(prefix);
    if sanitized.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        sanitized
    }
}
