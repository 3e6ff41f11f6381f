use crate::{
    default_filename_prefix, format_bytes, format_duration, parse_selection, Config,
    DirectoryDownloads, ExportEngine, ExportFormat, OutputFormat, ProcessingCoordinator,
    SessionEvent, SourceImage, TilePlan,
};
use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "screenshot-splitter")]
#[command(about = "Split long screenshots into fixed-height segments")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Segment height in pixels")]
    pub height: Option<u32>,

    #[arg(long, global = true, help = "JPEG quality (1-100)")]
    pub quality: Option<u8>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Print a Prometheus metrics snapshot on exit")]
    pub metrics: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split an image and export the selected segments
    Split {
        #[arg(short, long, help = "Source image file")]
        input: PathBuf,

        #[arg(short, long, help = "Directory receiving the export")]
        output: PathBuf,

        #[arg(short, long, help = "Export format (zip, pdf)")]
        format: Option<String>,

        #[arg(short, long, help = "Segments to export, 1-based (e.g. 1,3-5); default all")]
        select: Option<String>,

        #[arg(long, help = "File name prefix for the export")]
        prefix: Option<String>,

        #[arg(long, help = "Segment image format (jpeg, png)")]
        image_format: Option<String>,

        #[arg(long, help = "Export segments produced before a failure")]
        keep_partial: bool,
    },

    /// Show how an image would be split without encoding anything
    Plan {
        #[arg(short, long, help = "Source image file")]
        input: PathBuf,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: Option<String>,
    pub select: Option<String>,
    pub prefix: Option<String>,
    pub image_format: Option<String>,
    pub keep_partial: bool,
}

pub struct CliRunner {
    pub config: Config,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Split {
                input,
                output,
                format,
                select,
                prefix,
                image_format,
                keep_partial,
            } => {
                self.run_split(SplitOptions {
                    input,
                    output,
                    format,
                    select,
                    prefix,
                    image_format,
                    keep_partial,
                })
                .await
            }
            Commands::Plan { input } => self.run_plan(input).await,
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    pub async fn run_split(&self, options: SplitOptions) -> anyhow::Result<()> {
        let mut config = self.config.clone();
        if let Some(image_format) = options.image_format.as_deref() {
            config.output_format = parse_output_format(image_format)?;
        }
        let export_format = match options.format.as_deref() {
            Some(format) => parse_export_format(format)?,
            None => config.export.default_format,
        };

        let bytes = fs::read(&options.input)
            .await
            .with_context(|| format!("Failed to read {}", options.input.display()))?;
        let source = SourceImage::probe(&bytes)?;
        info!(
            "Loaded {} ({}, {}x{}, {})",
            options.input.display(),
            source.mime_type,
            source.width,
            source.height,
            format_bytes(source.byte_length)
        );

        let started = Instant::now();
        let mut coordinator = ProcessingCoordinator::new(config.clone());
        coordinator.start_split(bytes, config.target_segment_height)?;

        let mut failure = None;
        let mut last_reported = 0u8;
        while let Some(event) = coordinator.next_event().await {
            match event {
                SessionEvent::Progress(percent) => {
                    if percent >= last_reported.saturating_add(10) || percent == 100 {
                        info!("Progress: {}%", percent);
                        last_reported = percent;
                    }
                }
                SessionEvent::SegmentAdded(index) => {
                    debug!("Segment {} ready", index + 1);
                }
                SessionEvent::Completed { segments } => {
                    info!(
                        "Split into {} segments in {}",
                        segments,
                        format_duration(started.elapsed())
                    );
                }
                SessionEvent::Failed(e) => {
                    error!("Split failed: {} ({})", e.user_message(), e);
                    failure = Some(e);
                }
            }
        }

        if let Some(e) = &failure {
            let kept = coordinator.store().len();
            if !options.keep_partial || kept == 0 {
                return Err(anyhow!(e.clone()).context("Split did not complete"));
            }
            warn!("Exporting {} segments produced before the failure", kept);
        }

        let store = coordinator.store_mut();
        if let Some(select) = options.select.as_deref() {
            let selection = parse_selection(select, store.len()).map_err(|e| anyhow!(e))?;
            store.select_none();
            for index in selection {
                store.select(index);
            }
        }

        let prefix = options.prefix.unwrap_or_else(default_filename_prefix);
        let engine = ExportEngine::new(&config);
        let sink = DirectoryDownloads::new(&options.output);
        let artifact = engine
            .export(export_format, coordinator.store(), &prefix, &sink)
            .await?;

        println!("Export completed:");
        println!("  Source: {}x{}", source.width, source.height);
        println!("  Segments: {} of {}", artifact.entries, coordinator.store().len());
        println!("  Output: {}", options.output.join(&artifact.filename).display());
        println!("  Size: {}", format_bytes(artifact.data.len()));

        match failure {
            Some(e) => Err(anyhow!(e).context("Split did not complete; partial export written")),
            None => Ok(()),
        }
    }

    pub async fn run_plan(&self, input: PathBuf) -> anyhow::Result<()> {
        let bytes = fs::read(&input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let source = SourceImage::probe(&bytes)?;
        let plan = TilePlan::new(source.width, source.height, self.config.target_segment_height)?;

        println!("Source: {} ({})", input.display(), source.mime_type);
        println!("  Dimensions: {}x{}", source.width, source.height);
        println!("  Segment height: {}", plan.segment_height);
        println!("  Segments: {}", plan.segment_count());
        for window in plan.windows() {
            println!(
                "    #{:<4} y={:<7} {}x{}",
                window.index + 1,
                window.y,
                window.width,
                window.height
            );
        }

        Ok(())
    }

    pub async fn validate_config(&self, config_path: PathBuf) -> anyhow::Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let config_content = fs::read_to_string(&config_path).await?;
        let config: Config = serde_json::from_str(&config_content)?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Segment height: {}", config.target_segment_height);
        println!("  Output format: {:?}", config.output_format);
        println!("  JPEG quality: {}", config.jpeg_quality);
        println!("  Default export: {:?}", config.export.default_format);

        Ok(())
    }
}

pub fn parse_export_format(value: &str) -> anyhow::Result<ExportFormat> {
    match value.to_ascii_lowercase().as_str() {
        "zip" => Ok(ExportFormat::Zip),
        "pdf" => Ok(ExportFormat::Pdf),
        other => bail!("Unknown export format '{other}' (expected zip or pdf)"),
    }
}

pub fn parse_output_format(value: &str) -> anyhow::Result<OutputFormat> {
    match value.to_ascii_lowercase().as_str() {
        "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
        "png" => Ok(OutputFormat::Png),
        other => bail!("Unknown image format '{other}' (expected jpeg or png)"),
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::png_fixture;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("splitter-cli-{name}-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_parse_split_command() {
        let cli = Cli::try_parse_from([
            "screenshot-splitter",
            "--height",
            "800",
            "split",
            "--input",
            "page.png",
            "--output",
            "out",
            "--format",
            "pdf",
            "--select",
            "1,3-5",
            "--keep-partial",
        ])
        .unwrap();

        assert_eq!(cli.height, Some(800));
        match cli.command {
            Commands::Split {
                input,
                format,
                select,
                keep_partial,
                ..
            } => {
                assert_eq!(input, PathBuf::from("page.png"));
                assert_eq!(format.as_deref(), Some("pdf"));
                assert_eq!(select.as_deref(), Some("1,3-5"));
                assert!(keep_partial);
            }
            _ => panic!("expected split command"),
        }
    }

    #[test]
    fn test_format_parsers() {
        assert_eq!(parse_export_format("ZIP").unwrap(), ExportFormat::Zip);
        assert_eq!(parse_export_format("pdf").unwrap(), ExportFormat::Pdf);
        assert!(parse_export_format("tar").is_err());

        assert_eq!(parse_output_format("jpg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(parse_output_format("png").unwrap(), OutputFormat::Png);
        assert!(parse_output_format("gif").is_err());
    }

    #[tokio::test]
    async fn test_run_split_writes_selected_archive() {
        let dir = temp_dir("split");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("page.png");
        std::fs::write(&input, png_fixture(12, 1000)).unwrap();

        let runner = CliRunner::new(Config {
            target_segment_height: 300,
            ..Default::default()
        });
        runner
            .run_split(SplitOptions {
                input,
                output: dir.join("out"),
                format: Some("zip".to_string()),
                select: Some("2-3".to_string()),
                prefix: Some("page".to_string()),
                image_format: None,
                keep_partial: false,
            })
            .await
            .unwrap();

        let data = std::fs::read(dir.join("out").join("page.zip")).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["page_002.jpg", "page_003.jpg"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_run_split_rejects_corrupt_input() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("broken.png");
        std::fs::write(&input, b"not an image").unwrap();

        let runner = CliRunner::new(Config::default());
        let result = runner
            .run_split(SplitOptions {
                input,
                output: dir.join("out"),
                format: None,
                select: None,
                prefix: None,
                image_format: None,
                keep_partial: true,
            })
            .await;

        assert!(result.is_err());
        assert!(!dir.join("out").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_plan_and_validate() {
        let dir = temp_dir("plan");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("page.png");
        std::fs::write(&input, png_fixture(8, 50)).unwrap();

        let runner = CliRunner::new(Config::default());
        runner.run_plan(input).await.unwrap();

        let valid = dir.join("valid.json");
        std::fs::write(&valid, r#"{ "target_segment_height": 500 }"#).unwrap();
        runner.validate_config(valid).await.unwrap();

        let invalid = dir.join("invalid.json");
        std::fs::write(&invalid, r#"{ "jpeg_quality": 0 }"#).unwrap();
        assert!(runner.validate_config(invalid).await.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
