use anyhow::Context;
use clap::Parser;
use screenshot_splitter::{metrics::MetricsReporter, setup_logging, Cli, CliRunner, Config};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    info!("Starting screenshot-splitter v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await?;

    let reporter = if args.metrics {
        match MetricsReporter::install() {
            Ok(reporter) => Some(reporter),
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let cli_runner = CliRunner::new(config);

    // Dropping the runner's future on Ctrl-C terminates any running worker.
    let result = tokio::select! {
        result = cli_runner.run(args.command) => result,
        _ = signal::ctrl_c() => {
            info!("Received interrupt, stopping");
            Ok(())
        }
    };

    if let Some(reporter) = reporter {
        println!("{}", reporter.render());
    }

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("screenshot-splitter stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        // Load from file
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        serde_json::from_str(&config_content)?
    } else {
        // Use default configuration
        Config::default()
    };

    // Override with CLI arguments
    if let Some(height) = args.height {
        config.target_segment_height = height;
    }

    if let Some(quality) = args.quality {
        config.jpeg_quality = quality;
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Segment height: {}px", config.target_segment_height);
    info!(
        "Segment format: {:?} (quality {})",
        config.output_format, config.jpeg_quality
    );

    Ok(config)
}
