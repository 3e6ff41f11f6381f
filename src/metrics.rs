use crate::{ExportFormat, SplitError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub fn record_session_started() {
    ::metrics::increment_counter!("split_sessions_started_total");
    ::metrics::gauge!("split_session_active", 1.0);
}

pub fn record_session_completed(segments: usize) {
    ::metrics::increment_counter!("split_sessions_completed_total");
    ::metrics::histogram!("split_segments_per_session", segments as f64);
    ::metrics::gauge!("split_session_active", 0.0);
}

pub fn record_session_superseded() {
    ::metrics::increment_counter!("split_sessions_superseded_total");
    ::metrics::gauge!("split_session_active", 0.0);
}

pub fn record_session_failed(error: &SplitError) {
    let kind = match error {
        SplitError::Decode(_) => "decode",
        SplitError::Encode { .. } => "encode",
        SplitError::SegmentOrder { .. } => "segment_order",
        SplitError::WorkerLost => "worker_lost",
        _ => "other",
    };
    ::metrics::increment_counter!("split_sessions_failed_total", "kind" => kind);
    ::metrics::gauge!("split_session_active", 0.0);
}

pub fn record_segment_encoded(duration: Duration, bytes: usize) {
    ::metrics::increment_counter!("split_segments_encoded_total");
    ::metrics::histogram!("split_segment_encode_seconds", duration.as_secs_f64());
    ::metrics::counter!("split_segment_bytes_total", bytes as u64);
}

pub fn record_export(format: ExportFormat, entries: usize, bytes: usize) {
    let format = format.extension();
    ::metrics::increment_counter!("split_exports_total", "format" => format);
    ::metrics::counter!("split_exported_segments_total", entries as u64, "format" => format);
    ::metrics::histogram!("split_export_bytes", bytes as f64);
}

pub fn record_export_failed() {
    ::metrics::increment_counter!("split_exports_failed_total");
}

/// Installs a Prometheus recorder so the counters above can be rendered as
/// a text snapshot at the end of a run.
pub struct MetricsReporter {
    handle: PrometheusHandle,
}

impl MetricsReporter {
    pub fn install() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
