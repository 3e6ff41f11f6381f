use crate::{
    metrics, Config, EncodedTile, SegmentEncoder, SplitError, SplitRequest, TileWindow,
};
use image::io::{Limits, Reader as ImageReader};
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identifies one split session; messages are only honored for the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages streamed from a split worker to its coordinator.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Progress { percent: u8 },
    Chunk(EncodedTile),
    Done,
    Error(SplitError),
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Done | WorkerMessage::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Decoding,
    Tiling { index: usize, total: usize },
    Completed,
    Errored,
}

/// Full-width tiling of a surface into bands of at most `segment_height` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePlan {
    pub width: u32,
    pub height: u32,
    pub segment_height: u32,
}

impl TilePlan {
    pub fn new(width: u32, height: u32, segment_height: u32) -> Result<Self, SplitError> {
        if segment_height == 0 {
            return Err(SplitError::InvalidTargetHeight(segment_height));
        }

        Ok(Self {
            width,
            height,
            segment_height,
        })
    }

    pub fn segment_count(&self) -> usize {
        (self.height as u64).div_ceil(self.segment_height as u64) as usize
    }

    pub fn window(&self, index: usize) -> Option<TileWindow> {
        if index >= self.segment_count() {
            return None;
        }

        let y = self.segment_height as u64 * index as u64;
        let height = (self.height as u64 - y).min(self.segment_height as u64);

        Some(TileWindow {
            index,
            y: y as u32,
            width: self.width,
            height: height as u32,
        })
    }

    pub fn windows(&self) -> impl Iterator<Item = TileWindow> + '_ {
        (0..self.segment_count()).filter_map(move |index| self.window(index))
    }
}

/// Progress weighting: decoding owns the first `decode_weight` percent and
/// tiles share the rest evenly.
#[derive(Debug, Clone, Copy)]
pub struct ProgressModel {
    decode_weight: u8,
}

impl ProgressModel {
    pub fn new(decode_weight: u8) -> Self {
        Self {
            decode_weight: decode_weight.min(99),
        }
    }

    pub fn after_decode(&self) -> u8 {
        self.decode_weight
    }

    pub fn after_tile(&self, tile_index: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }

        let tiling_share = 100 - self.decode_weight as usize;
        let done = (tile_index + 1).min(total);
        (self.decode_weight as usize + tiling_share * done / total) as u8
    }
}

/// Executes exactly one `SplitRequest` and reports over a channel.
pub struct SplitWorker {
    session: SessionId,
    config: Config,
    encoder: SegmentEncoder,
    progress: ProgressModel,
    cancelled: Arc<AtomicBool>,
    state: WorkerState,
}

impl SplitWorker {
    pub fn new(session: SessionId, config: Config, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            session,
            encoder: SegmentEncoder::from_config(&config),
            progress: ProgressModel::new(config.decode_progress_weight),
            config,
            cancelled,
            state: WorkerState::Idle,
        }
    }

    /// Starts a worker on the blocking pool and returns its handle together
    /// with the receiving end of its message stream.
    pub fn spawn(
        session: SessionId,
        config: Config,
        request: SplitRequest,
    ) -> (WorkerHandle, mpsc::Receiver<WorkerMessage>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut worker = SplitWorker::new(session, config, cancelled.clone());

        let join = tokio::task::spawn_blocking(move || {
            worker.run(request, &sender);
        });

        let handle = WorkerHandle {
            session,
            cancelled,
            join: Some(join),
        };

        (handle, receiver)
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs the request to completion, error or cancellation. Blocking.
    pub fn run(&mut self, request: SplitRequest, sender: &mpsc::Sender<WorkerMessage>) {
        if self.state != WorkerState::Idle {
            warn!("Worker {} already used, ignoring request", self.session);
            return;
        }

        let started = Instant::now();
        info!(
            "Worker {} splitting {} bytes into {}px segments",
            self.session,
            request.source_bytes.len(),
            request.target_segment_height
        );

        match self.split(request, sender) {
            Ok(true) => {
                self.transition(WorkerState::Completed);
                if self.emit(sender, WorkerMessage::Progress { percent: 100 })
                    && self.emit(sender, WorkerMessage::Done)
                {
                    info!(
                        "Worker {} completed in {:?}",
                        self.session,
                        started.elapsed()
                    );
                }
            }
            Ok(false) => {
                debug!("Worker {} stopped before completion", self.session);
            }
            Err(e) => {
                self.transition(WorkerState::Errored);
                error!("Worker {} failed: {}", self.session, e);
                self.emit(sender, WorkerMessage::Error(e));
            }
        }
    }

    /// Returns `Ok(false)` when the run was abandoned (cancelled or nobody is
    /// listening any more).
    fn split(
        &mut self,
        request: SplitRequest,
        sender: &mpsc::Sender<WorkerMessage>,
    ) -> Result<bool, SplitError> {
        self.transition(WorkerState::Decoding);
        let decode_started = Instant::now();
        let surface = self.decode(&request.source_bytes)?;
        drop(request.source_bytes);

        let (width, height) = surface.dimensions();
        debug!(
            "Worker {} decoded {}x{} surface in {:?}",
            self.session,
            width,
            height,
            decode_started.elapsed()
        );

        let plan = TilePlan::new(width, height, request.target_segment_height)?;
        let total = plan.segment_count();

        if self.is_cancelled()
            || !self.emit(sender, WorkerMessage::Progress { percent: self.progress.after_decode() })
        {
            return Ok(false);
        }

        for window in plan.windows() {
            if self.is_cancelled() {
                return Ok(false);
            }

            self.transition(WorkerState::Tiling {
                index: window.index,
                total,
            });

            let encode_started = Instant::now();
            let tile = self.encoder.encode(&surface, window)?;
            metrics::record_segment_encoded(encode_started.elapsed(), tile.data.len());

            if !self.emit(sender, WorkerMessage::Chunk(tile)) {
                return Ok(false);
            }

            let percent = self.progress.after_tile(window.index, total);
            if !self.emit(sender, WorkerMessage::Progress { percent }) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, SplitError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| SplitError::Decode(e.to_string()))?;

        if reader.format().is_none() {
            return Err(SplitError::Decode("unrecognized image format".to_string()));
        }

        let limits = match self.config.max_decode_bytes {
            Some(max_alloc) => {
                let mut limits = Limits::default();
                limits.max_alloc = Some(max_alloc);
                limits
            }
            // The decoder's own default cap would still apply otherwise.
            None => Limits::no_limits(),
        };
        reader.limits(limits);

        reader
            .decode()
            .map_err(|e| SplitError::Decode(e.to_string()))
    }

    fn emit(&self, sender: &mpsc::Sender<WorkerMessage>, message: WorkerMessage) -> bool {
        match sender.blocking_send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!("Worker {} has no listener, stopping", self.session);
                false
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn transition(&mut self, next: WorkerState) {
        debug!("Worker {} {:?} -> {:?}", self.session, self.state, next);
        self.state = next;
    }
}

/// Owner-side handle of a running worker. Dropping it terminates the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    session: SessionId,
    cancelled: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_terminated(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Signals the worker to stop at its next checkpoint. In-flight output is
    /// discarded without any further message.
    pub fn terminate(&mut self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            debug!("Terminating worker {}", self.session);
        }
        // The blocking thread cannot be aborted; it exits at the next tile
        // boundary or failed send.
        self.join.take();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
