pub(crate) mod fixtures {
    use crate::metrics::MetricsReporter;
    use crate::{EncodedTile, OutputFormat, SegmentEncoder, SegmentStore, TileWindow};
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::OnceLock;

    /// Process-wide Prometheus recorder shared by every test that reads metrics.
    pub fn metrics_reporter() -> &'static MetricsReporter {
        static REPORTER: OnceLock<MetricsReporter> = OnceLock::new();
        REPORTER.get_or_init(|| MetricsReporter::install().unwrap())
    }

    /// PNG whose rows encode their own y coordinate in the red channel.
    pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(y % 256) as u8, (x % 256) as u8, 128])
        });

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    /// Store holding real JPEG segments of the given heights, all selected.
    pub fn store_with_segments(heights: &[u32]) -> SegmentStore {
        let total: u32 = heights.iter().sum();
        let surface = image::load_from_memory(&png_fixture(16, total)).unwrap();
        let encoder = SegmentEncoder::new(OutputFormat::Jpeg, 90);

        let mut store = SegmentStore::new();
        let mut y = 0;
        for (index, &height) in heights.iter().enumerate() {
            let tile: EncodedTile = encoder
                .encode(&surface, TileWindow { index, y, width: 16, height })
                .unwrap();
            store.add(tile).unwrap();
            y += height;
        }
        store
    }
}

#[cfg(test)]
mod integration_tests {
    use super::fixtures::{metrics_reporter, png_fixture};
    use crate::{
        Config, ErrorSeverity, ExportEngine, ExportFormat, ProcessingCoordinator, SessionEvent,
        SessionId, SourceImage, SplitError, WorkerMessage,
    };
    use std::io::Cursor;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.target_segment_height, 1200);
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.decode_progress_weight, 25);
        assert!(matches!(config.output_format, crate::OutputFormat::Jpeg));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "target_segment_height": 640, "export": { "min_sequence_digits": 4 } }"#)
                .unwrap();
        assert_eq!(config.target_segment_height, 640);
        assert_eq!(config.export.min_sequence_digits, 4);
        assert_eq!(config.export.pdf_points_per_pixel, 0.75);
        assert_eq!(config.jpeg_quality, 90);
    }

    #[test]
    fn test_config_validation() {
        let bad_height = Config { target_segment_height: 0, ..Default::default() };
        assert!(matches!(bad_height.validate(), Err(SplitError::Configuration(_))));

        let bad_quality = Config { jpeg_quality: 101, ..Default::default() };
        assert!(bad_quality.validate().is_err());

        let bad_weight = Config { decode_progress_weight: 100, ..Default::default() };
        assert!(bad_weight.validate().is_err());
    }

    #[test]
    fn test_error_classification() {
        assert!(SplitError::Decode("x".to_string()).is_session_fatal());
        assert!(SplitError::Encode { index: 0, reason: "x".to_string() }.is_session_fatal());
        assert!(!SplitError::NoSelection.is_session_fatal());
        assert!(!SplitError::Decode("x".to_string()).is_retryable());
        assert_eq!(SplitError::NoSelection.severity(), ErrorSeverity::Low);
        assert_eq!(
            SplitError::Decode("x".to_string()).user_message(),
            "unsupported or corrupt image"
        );
    }

    #[test]
    fn test_source_probe() {
        let source = SourceImage::probe(&png_fixture(30, 70)).unwrap();
        assert_eq!((source.width, source.height), (30, 70));
        assert_eq!(source.mime_type, "image/png");

        assert!(matches!(
            SourceImage::probe(b"garbage"),
            Err(SplitError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_split_covers_source_exactly() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        coordinator.start_split(png_fixture(24, 1000), 300).unwrap();
        assert!(coordinator.is_processing());

        let segments = coordinator.run_to_completion().await.unwrap();
        assert_eq!(segments, 4);
        assert!(!coordinator.is_processing());
        assert_eq!(coordinator.progress_percent(), 100);

        let store = coordinator.store();
        let heights: Vec<u32> = store.segments().iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![300, 300, 300, 100]);
        assert!(store.segments().iter().all(|s| s.width == 24));
        assert_eq!(store.total_height(), 1000);

        let indices: Vec<usize> = store.segments().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(store.selected_indices(), vec![0, 1, 2, 3]);
        assert_eq!(store.registry().live_count(), 4);
    }

    #[tokio::test]
    async fn test_exact_multiple_split() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        coordinator.start_split(png_fixture(10, 900), 300).unwrap();
        coordinator.run_to_completion().await.unwrap();

        assert!(coordinator.store().segments().iter().all(|s| s.height == 300));
        assert_eq!(coordinator.store().len(), 3);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_chunks_ordered() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        coordinator.start_split(png_fixture(8, 500), 64).unwrap();

        let mut percents = Vec::new();
        let mut added = Vec::new();
        while let Some(event) = coordinator.next_event().await {
            match event {
                SessionEvent::Progress(p) => percents.push(p),
                SessionEvent::SegmentAdded(i) => added.push(i),
                SessionEvent::Completed { .. } => break,
                SessionEvent::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }

        assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(added, (0..8).collect::<Vec<_>>());
        assert!(coordinator.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_source_leaves_store_empty() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        coordinator.start_split(b"\x89PNG not really".to_vec(), 300).unwrap();

        let err = coordinator.run_to_completion().await.unwrap_err();
        assert!(matches!(err, SplitError::Decode(_)));
        assert!(coordinator.store().is_empty());
        assert!(!coordinator.is_processing());
        assert_eq!(coordinator.last_error(), Some(&err));
    }

    #[tokio::test]
    async fn test_zero_height_is_rejected_without_teardown() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        coordinator.start_split(png_fixture(8, 40), 20).unwrap();
        coordinator.run_to_completion().await.unwrap();

        let err = coordinator.start_split(png_fixture(8, 40), 0).unwrap_err();
        assert_eq!(err, SplitError::InvalidTargetHeight(0));
        assert_eq!(coordinator.store().len(), 2);
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous_one() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        let first = coordinator.start_split(png_fixture(16, 4000), 100).unwrap();

        // Let part of the first session land in the store.
        let mut first_urls = Vec::new();
        while first_urls.len() < 2 {
            match coordinator.next_event().await {
                Some(SessionEvent::SegmentAdded(i)) => {
                    first_urls.push(coordinator.store().get(i).unwrap().display_url());
                }
                Some(SessionEvent::Failed(e)) => panic!("unexpected failure: {e}"),
                Some(_) => {}
                None => break,
            }
        }
        assert_eq!(first_urls.len(), 2);

        let second = coordinator.start_split(png_fixture(16, 250), 100).unwrap();
        assert_ne!(first, second);

        // Teardown happens before anything from the new session arrives.
        assert!(coordinator.store().is_empty());
        assert_eq!(coordinator.store().registry().live_count(), 0);
        assert!(first_urls.iter().all(|url| !coordinator.store().registry().is_live(url)));

        // Late output of the first worker is ignored.
        assert!(coordinator.apply_message(first, WorkerMessage::Done).is_none());

        assert_eq!(coordinator.run_to_completion().await.unwrap(), 3);
        let heights: Vec<u32> = coordinator.store().segments().iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_error_keeps_delivered_segments() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        let session = coordinator.start_split(png_fixture(8, 1000), 100).unwrap();

        // Drive the state machine by hand; the spawned worker's own messages
        // are never read.
        let tile = crate::EncodedTile {
            index: 0,
            width: 8,
            height: 100,
            format: crate::OutputFormat::Jpeg,
            data: vec![0xFF, 0xD8],
        };
        assert_eq!(
            coordinator.apply_message(session, WorkerMessage::Chunk(tile)),
            Some(SessionEvent::SegmentAdded(0))
        );

        let failure = SplitError::Encode { index: 1, reason: "boom".to_string() };
        assert_eq!(
            coordinator.apply_message(session, WorkerMessage::Error(failure.clone())),
            Some(SessionEvent::Failed(failure))
        );

        assert!(!coordinator.is_processing());
        assert_eq!(coordinator.store().len(), 1);
        assert!(coordinator.store().is_selected(0));
    }

    #[tokio::test]
    async fn test_stale_session_id_is_ignored() {
        let mut coordinator = ProcessingCoordinator::new(Config::default());
        coordinator.start_split(png_fixture(8, 100), 50).unwrap();

        let event = coordinator.apply_message(SessionId(999), WorkerMessage::Progress { percent: 80 });
        assert!(event.is_none());
        assert_eq!(coordinator.progress_percent(), 0);
    }

    #[tokio::test]
    async fn test_split_then_export_selected_zip() {
        let config = Config::default();
        let mut coordinator = ProcessingCoordinator::new(config.clone());
        coordinator.start_split(png_fixture(20, 1000), 300).unwrap();
        coordinator.run_to_completion().await.unwrap();

        let store = coordinator.store_mut();
        store.select_none();
        store.toggle(2);
        store.toggle(0);

        let artifact = ExportEngine::new(&config)
            .build_zip(store.segments(), store.selection(), "page")
            .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(&artifact.data)).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "page_001.jpg");
        assert_eq!(archive.by_index(1).unwrap().name(), "page_003.jpg");
        assert_eq!(artifact.format, ExportFormat::Zip);
    }

    #[tokio::test]
    async fn test_session_outcomes_are_recorded() {
        let reporter = metrics_reporter();
        let mut coordinator = ProcessingCoordinator::new(Config::default());

        let session = coordinator.start_split(png_fixture(8, 400), 100).unwrap();
        let tile = crate::EncodedTile {
            index: 3,
            width: 8,
            height: 100,
            format: crate::OutputFormat::Jpeg,
            data: vec![0xFF, 0xD8],
        };
        let event = coordinator.apply_message(session, WorkerMessage::Chunk(tile));
        assert!(matches!(
            event,
            Some(SessionEvent::Failed(SplitError::SegmentOrder { expected: 0, got: 3 }))
        ));
        assert!(!coordinator.is_processing());

        coordinator.start_split(png_fixture(8, 400), 100).unwrap();
        coordinator.start_split(png_fixture(8, 400), 100).unwrap();

        let rendered = reporter.render();
        assert!(rendered.contains(r#"split_sessions_failed_total{kind="segment_order"}"#));
        assert!(rendered.contains("split_sessions_superseded_total"));
    }
}
