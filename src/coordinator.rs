//! Processing coordinator
//!
//! Owns the split worker's lifecycle and folds its message stream into the
//! session state and the segment store. There is never more than one active
//! worker: starting a new split tears the previous session down first.

use crate::{
    metrics, Config, SegmentStore, SessionId, SplitError, SplitRequest, SplitWorker,
    WorkerHandle, WorkerMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Observable outcome of applying one worker message.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(u8),
    SegmentAdded(usize),
    Completed { segments: usize },
    Failed(SplitError),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Completed { .. } | SessionEvent::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub session: Option<SessionId>,
    pub progress_percent: u8,
    pub last_error: Option<SplitError>,
}

struct ActiveWorker {
    handle: WorkerHandle,
    messages: mpsc::Receiver<WorkerMessage>,
}

pub struct ProcessingCoordinator {
    config: Config,
    state: SessionState,
    store: SegmentStore,
    active: Option<ActiveWorker>,
    next_session: u64,
}

impl ProcessingCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: SessionState::default(),
            store: SegmentStore::new(),
            active: None,
            next_session: 1,
        }
    }

    /// Tears down any previous session, then spawns a worker for the new
    /// request. Must be called from within a tokio runtime.
    pub fn start_split(
        &mut self,
        source_bytes: Vec<u8>,
        target_height: u32,
    ) -> Result<SessionId, SplitError> {
        let request = SplitRequest::new(source_bytes, target_height)?;

        self.teardown();

        let session = SessionId(self.next_session);
        self.next_session += 1;

        let (handle, messages) = SplitWorker::spawn(session, self.config.clone(), request);
        self.active = Some(ActiveWorker { handle, messages });
        self.state = SessionState {
            session: Some(session),
            progress_percent: 0,
            last_error: None,
        };

        metrics::record_session_started();
        info!(
            "Started split session {} with {}px segments",
            session, target_height
        );

        Ok(session)
    }

    /// Terminates the active worker (if any) and releases every segment and
    /// display handle of the previous session.
    fn teardown(&mut self) {
        if let Some(mut previous) = self.active.take() {
            warn!(
                "Superseding split session {} still in progress",
                previous.handle.session()
            );
            previous.handle.terminate();
            previous.messages.close();
            metrics::record_session_superseded();
        }

        self.store.reset();
        self.state = SessionState::default();
    }

    /// Applies a message from the worker of `session`. Messages from any
    /// other session are dropped.
    pub fn apply_message(
        &mut self,
        session: SessionId,
        message: WorkerMessage,
    ) -> Option<SessionEvent> {
        let active_session = self.active.as_ref().map(|active| active.handle.session());
        if active_session != Some(session) {
            debug!(
                "Ignoring message from inactive session {} (active: {:?})",
                session, active_session
            );
            return None;
        }

        match message {
            WorkerMessage::Progress { percent } => {
                let percent = percent.min(100).max(self.state.progress_percent);
                self.state.progress_percent = percent;
                debug!("Session {} progress {}%", session, percent);
                Some(SessionEvent::Progress(percent))
            }
            WorkerMessage::Chunk(tile) => match self.store.add(tile) {
                Ok(index) => Some(SessionEvent::SegmentAdded(index)),
                Err(e) => Some(self.fail(e)),
            },
            WorkerMessage::Done => {
                self.state.progress_percent = 100;
                self.finish();
                let segments = self.store.len();
                info!(
                    "Split session {} completed with {} segments",
                    session, segments
                );
                metrics::record_session_completed(segments);
                Some(SessionEvent::Completed { segments })
            }
            WorkerMessage::Error(e) => Some(self.fail(e)),
        }
    }

    fn fail(&mut self, e: SplitError) -> SessionEvent {
        error!(
            "Split session {:?} failed: {} ({} segments kept)",
            self.state.session,
            e,
            self.store.len()
        );
        self.state.last_error = Some(e.clone());
        metrics::record_session_failed(&e);
        self.finish();
        SessionEvent::Failed(e)
    }

    fn finish(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.handle.terminate();
        }
    }

    /// Waits for the next message of the active session and applies it.
    /// Returns `None` when no session is processing.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let active = self.active.as_mut()?;
            let session = active.handle.session();

            let received = active.messages.recv().await;

            match received {
                Some(message) => {
                    if let Some(event) = self.apply_message(session, message) {
                        return Some(event);
                    }
                }
                None => return Some(self.fail(SplitError::WorkerLost)),
            }
        }
    }

    /// Drives the active session until it completes or fails.
    pub async fn run_to_completion(&mut self) -> Result<usize, SplitError> {
        while let Some(event) = self.next_event().await {
            match event {
                SessionEvent::Completed { segments } => return Ok(segments),
                SessionEvent::Failed(e) => return Err(e),
                _ => {}
            }
        }

        match &self.state.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.store.len()),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.active.is_some()
    }

    pub fn progress_percent(&self) -> u8 {
        self.state.progress_percent
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&SplitError> {
        self.state.last_error.as_ref()
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SegmentStore {
        &mut self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for ProcessingCoordinator {
    fn drop(&mut self) {
        self.finish();
    }
}
