//! # Screenshot Splitter
//!
//! Splits a long screenshot into fixed-height segments and exports a chosen
//! subset of them as a ZIP archive or a multi-page PDF.
//!
//! ## Pipeline
//!
//! | Stage | Runs on | Output |
//! |-------|---------|--------|
//! | Decode | worker thread | pixel surface (never leaves the worker) |
//! | Tile | worker thread | full-width windows of at most `target_segment_height` rows |
//! | Encode | worker thread | one JPEG (or PNG) blob per window |
//! | Stream | channel | `Progress`, `Chunk`, `Done`, `Error` messages |
//! | Store | coordinator | ordered segments + selection + display handles |
//! | Export | coordinator | `.zip` or `.pdf` delivered to a download sink |
//!
//! Decoding counts for the first 25% of progress, tiles fill the rest. Only
//! one split runs at a time: starting a new one terminates the previous
//! worker and releases all of its segments first.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshot_splitter::{
//!     Config, DirectoryDownloads, ExportEngine, ExportFormat, ProcessingCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let mut coordinator = ProcessingCoordinator::new(config.clone());
//!
//!     let bytes = std::fs::read("long-page.png")?;
//!     coordinator.start_split(bytes, 1200)?;
//!     let segments = coordinator.run_to_completion().await?;
//!     println!("Produced {segments} segments");
//!
//!     let engine = ExportEngine::new(&config);
//!     let sink = DirectoryDownloads::new("out");
//!     engine
//!         .export(ExportFormat::Zip, coordinator.store(), "long-page", &sink)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! screenshot-splitter --height 1200 split --input long-page.png --output out/ --format pdf --select 1,3-5
//! screenshot-splitter plan --input long-page.png
//! ```

/// Configuration and settings for the splitter
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Segment encoder for a single window of the source surface
pub mod encoder;

/// Background split worker and its message protocol
pub mod worker;

/// Revocable display handles for segment previews
pub mod display;

/// Ordered segment storage and selection
pub mod store;

/// Session lifecycle and worker coordination
pub mod coordinator;

/// ZIP and PDF export
pub mod export;

/// Command-line interface implementation
pub mod cli;

/// Pipeline metrics
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use cli::*;
pub use config::*;
pub use coordinator::*;
pub use display::*;
pub use encoder::*;
pub use error::*;
pub use export::*;
pub use store::*;
pub use utils::*;
pub use worker::*;
