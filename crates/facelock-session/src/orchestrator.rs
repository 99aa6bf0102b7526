//! Session orchestrator.
//!
//! One actor task owns the session state, the frame buffer, the pipeline
//! components and every collaborator handle. Callers talk to it through a
//! cloneable [`SessionHandle`]: commands go over an mpsc channel with oneshot
//! replies, state is published on a watch channel, and [`SessionEvent`]s on a
//! broadcast channel.
//!
//! Frame processing is single-flight. While one frame is in the pipeline,
//! newly arriving frames are counted and dropped. Results of a frame that was
//! in flight when its session ended are discarded on arrival.

use crate::collaborators::{
    CaptureSource, DescriptorCipher, EmbeddingExtractor, FaceDetector, FrameSink,
};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{DropReason, SessionEvent, SessionStats};
use crate::pipeline::{Collaborators, FrameOutcome, FrameReport, Gallery, Pipeline};
use crate::state::{FailureReason, SessionMode, SessionState};
use crate::store::{IdentityMetadata, IdentityStore};
use facelock_core::{Guidance, IdentityStatistics};
use facelock_hw::{BufferedFrame, Frame, FrameBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Instant};

const COMMAND_QUEUE_DEPTH: usize = 16;
const EVENT_CAPACITY: usize = 256;

type InFlight = JoinHandle<(Pipeline, FrameReport)>;

enum Command {
    Configure {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Start {
        mode: SessionMode,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
    BestRecentFrame {
        reply: oneshot::Sender<Option<BufferedFrame>>,
    },
    ListIdentities {
        reply: oneshot::Sender<Result<Vec<IdentityMetadata>, SessionError>>,
    },
    DeleteIdentity {
        id: String,
        reply: oneshot::Sender<Result<bool, SessionError>>,
    },
    IdentityStatistics {
        id: String,
        reply: oneshot::Sender<Option<IdentityStatistics>>,
    },
}

/// Clone-safe handle to a running orchestrator.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    frames: FrameSink,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Prepare collaborators and move to `Ready`.
    pub async fn configure(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Configure { reply }).await?
    }

    /// Begin a session. `timeout` overrides the configured session timeout.
    pub async fn start(
        &self,
        mode: SessionMode,
        timeout: Option<Duration>,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::Start { mode, timeout, reply }).await?
    }

    /// End any session and return to `Ready`. Idempotent.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// End any session in `Cancelled`. Idempotent.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    /// Offer a frame without waiting. Returns `false` if it was discarded at the queue.
    pub fn submit_frame(&self, frame: Frame) -> bool {
        self.frames.submit(frame)
    }

    pub fn frame_sink(&self) -> FrameSink {
        self.frames.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Resolve once the state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        predicate: impl Fn(&SessionState) -> bool,
    ) -> Result<SessionState, SessionError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        Ok(state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// The buffered frame with a detected face and the highest quality.
    pub async fn best_recent_frame(&self) -> Result<Option<BufferedFrame>, SessionError> {
        self.request(|reply| Command::BestRecentFrame { reply }).await
    }

    pub async fn list_identities(&self) -> Result<Vec<IdentityMetadata>, SessionError> {
        self.request(|reply| Command::ListIdentities { reply }).await?
    }

    pub async fn delete_identity(&self, id: &str) -> Result<bool, SessionError> {
        let id = id.to_string();
        self.request(|reply| Command::DeleteIdentity { id, reply }).await?
    }

    pub async fn identity_statistics(
        &self,
        id: &str,
    ) -> Result<Option<IdentityStatistics>, SessionError> {
        let id = id.to_string();
        self.request(|reply| Command::IdentityStatistics { id, reply }).await
    }
}

/// Collects collaborators. `build` succeeds only when every required one is present.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<SessionConfig>,
    detector: Option<Arc<dyn FaceDetector>>,
    extractor: Option<Arc<dyn EmbeddingExtractor>>,
    store: Option<Arc<dyn IdentityStore>>,
    cipher: Option<Arc<dyn DescriptorCipher>>,
    capture: Option<Arc<dyn CaptureSource>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn DescriptorCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Optional. Without one, frames arrive only through [`SessionHandle::submit_frame`].
    pub fn capture(mut self, capture: Arc<dyn CaptureSource>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Spawn the orchestrator task on the current tokio runtime.
    pub fn build(self) -> Result<SessionHandle, SessionError> {
        let collaborators = Collaborators {
            detector: self.detector.ok_or(SessionError::MissingComponent("face detector"))?,
            extractor: self.extractor.ok_or(SessionError::MissingComponent("embedding extractor"))?,
            store: self.store.ok_or(SessionError::MissingComponent("identity store"))?,
            cipher: self.cipher.ok_or(SessionError::MissingComponent("descriptor cipher"))?,
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SessionError::MissingComponent("tokio runtime"))?;
        let config = self.config.unwrap_or_default();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_depth.max(1));
        let overflow = Arc::new(AtomicU64::new(0));
        let sink = FrameSink::new(frame_tx, Arc::clone(&overflow));
        let (state_tx, state_rx) = watch::channel(SessionState::NotConfigured);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let orchestrator = Orchestrator {
            pipeline: Some(Pipeline::new(&config, collaborators.clone())),
            buffer: FrameBuffer::new(config.frame_buffer_size),
            in_flight: None,
            in_flight_generation: 0,
            generation: 0,
            collaborators,
            capture: self.capture,
            capturing: false,
            state_tx,
            events: events.clone(),
            stats: SessionStats::default(),
            overflow,
            sink: sink.clone(),
            configured: false,
            deadline: None,
            consecutive_failures: 0,
            last_guidance: None,
            config,
        };
        runtime.spawn(orchestrator.run(command_rx, frame_rx));

        Ok(SessionHandle {
            commands: command_tx,
            frames: sink,
            state: state_rx,
            events,
        })
    }
}

/// The actor. Constructed only through [`Orchestrator::builder`].
pub struct Orchestrator {
    config: SessionConfig,
    collaborators: Collaborators,
    capture: Option<Arc<dyn CaptureSource>>,
    capturing: bool,
    /// `None` while a frame is in flight.
    pipeline: Option<Pipeline>,
    in_flight: Option<InFlight>,
    in_flight_generation: u64,
    /// Bumped whenever a session begins or ends.
    generation: u64,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    buffer: FrameBuffer,
    stats: SessionStats,
    overflow: Arc<AtomicU64>,
    sink: FrameSink,
    configured: bool,
    deadline: Option<Instant>,
    consecutive_failures: u32,
    last_guidance: Option<Guidance>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut frames: mpsc::Receiver<Frame>,
    ) {
        tracing::info!(profile = ?self.config.profile, "session orchestrator started");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                joined = wait_in_flight(&mut self.in_flight) => self.on_frame_done(joined).await,
                _ = wait_deadline(self.deadline) => self.on_deadline().await,
                Some(frame) = frames.recv() => self.on_frame(frame),
            }
        }
        self.release().await;
        tracing::info!("session orchestrator exiting");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Configure { reply } => {
                let result = self.configure().await;
                let _ = reply.send(result);
            }
            Command::Start { mode, timeout, reply } => {
                let result = self.start(mode, timeout).await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Cancel { reply } => {
                self.cancel().await;
                let _ = reply.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::BestRecentFrame { reply } => {
                let _ = reply.send(self.buffer.best_with_face());
            }
            Command::ListIdentities { reply } => {
                let result = self.list_identities().await;
                let _ = reply.send(result);
            }
            Command::DeleteIdentity { id, reply } => {
                let result = self.delete_identity(&id).await;
                let _ = reply.send(result);
            }
            Command::IdentityStatistics { id, reply } => {
                self.reclaim().await;
                let stats = self
                    .pipeline
                    .as_ref()
                    .and_then(|p| p.matcher().statistics(&id).cloned());
                let _ = reply.send(stats);
            }
        }
    }

    fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&mut self, next: SessionState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        tracing::debug!(from = previous.name(), to = next.name(), "session state changed");
        self.state_tx.send_replace(next.clone());
        self.emit(SessionEvent::StateChanged { from: previous, to: next });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            dropped_busy: self.stats.dropped_busy + self.overflow.load(Ordering::Relaxed),
            ..self.stats
        }
    }

    async fn configure(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        if self.configured && state == SessionState::Ready {
            return Ok(());
        }

        self.set_state(SessionState::Configuring);
        match self.prepare_collaborators().await {
            Ok(()) => {
                self.configured = true;
                tracing::info!(capture = self.capture.is_some(), "collaborators ready");
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(err) => {
                self.configured = false;
                let reason = match err {
                    SessionError::Capture(_) => FailureReason::CaptureUnavailable,
                    _ => FailureReason::ConfigurationError,
                };
                tracing::error!(error = %err, "configuration failed");
                self.set_state(SessionState::Failed { reason });
                Err(err)
            }
        }
    }

    async fn prepare_collaborators(&self) -> Result<(), SessionError> {
        let limit = self.config.operation_timeout;
        timeout(limit, self.collaborators.detector.prepare())
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "detector setup",
            })??;
        timeout(limit, self.collaborators.extractor.prepare())
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "extractor setup",
            })??;
        if let Some(capture) = &self.capture {
            timeout(limit, capture.open())
                .await
                .map_err(|_| SessionError::Timeout { operation: "capture open" })??;
        }
        Ok(())
    }

    async fn start(
        &mut self,
        mode: SessionMode,
        session_timeout: Option<Duration>,
    ) -> Result<(), SessionError> {
        if !self.configured {
            return Err(SessionError::NotConfigured);
        }
        let state = self.state();
        if state.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        if state.is_terminal() {
            self.set_state(SessionState::Ready);
        }
        self.reclaim().await;

        let gallery = match self.load_gallery().await {
            Ok(gallery) => gallery,
            Err(err) => {
                let reason = match err {
                    SessionError::Cipher(_) => FailureReason::DecryptionFailure,
                    _ => FailureReason::StorageFailure,
                };
                tracing::error!(error = %err, "failed to load enrolled identities");
                self.set_state(SessionState::Failed { reason });
                return Err(err);
            }
        };

        if mode == SessionMode::Authenticate && gallery.is_empty() {
            tracing::warn!("authentication requested with no enrolled identities");
            self.set_state(SessionState::Failed {
                reason: FailureReason::NoIdentitiesEnrolled,
            });
            return Err(SessionError::NoIdentitiesEnrolled);
        }

        let session_timeout = session_timeout.unwrap_or(self.config.session_timeout);
        tracing::info!(
            mode = ?mode,
            identities = gallery.len(),
            timeout_ms = session_timeout.as_millis() as u64,
            "session started"
        );

        self.generation += 1;
        if !self.buffer.is_empty() {
            tracing::debug!(
                frames = self.buffer.len(),
                "dropping frames buffered before this session"
            );
            self.buffer.clear();
        }
        self.last_guidance = None;
        self.consecutive_failures = 0;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.begin(&mode, gallery);
        }
        self.deadline = Some(Instant::now() + session_timeout);

        let initial = match &mode {
            SessionMode::Enroll { name } => SessionState::UserRegistration {
                name: name.clone(),
                collected: 0,
                required: self.config.required_samples.max(1),
            },
            SessionMode::Authenticate | SessionMode::Auto => SessionState::Scanning,
        };
        self.set_state(initial);

        if let Some(capture) = self.capture.clone() {
            let limit = self.config.operation_timeout;
            let started = match timeout(limit, capture.start(self.sink.clone())).await {
                Ok(result) => result.map_err(SessionError::from),
                Err(_) => Err(SessionError::Timeout {
                    operation: "capture start",
                }),
            };
            if let Err(err) = started {
                tracing::error!(error = %err, "capture failed to start");
                self.finish(SessionState::Failed {
                    reason: FailureReason::CaptureUnavailable,
                })
                .await;
                return Err(err);
            }
            self.capturing = true;
        }
        Ok(())
    }

    async fn load_gallery(&self) -> Result<Gallery, SessionError> {
        let records = timeout(self.config.operation_timeout, self.collaborators.store.list())
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "identity store list",
            })??;

        let mut gallery = Gallery::default();
        for record in records {
            let descriptors = record
                .descriptors
                .iter()
                .map(|d| self.collaborators.cipher.decrypt(d))
                .collect::<Result<Vec<_>, _>>()?;
            gallery.insert(record.metadata.id, record.metadata.display_name, descriptors);
        }
        Ok(gallery)
    }

    async fn stop(&mut self) {
        if !self.configured || self.state() == SessionState::Ready {
            return;
        }
        tracing::info!(from = self.state().name(), "session stopped");
        self.set_state(SessionState::Ready);
        self.release().await;
    }

    async fn cancel(&mut self) {
        if !self.configured || self.state() == SessionState::Cancelled {
            return;
        }
        tracing::info!(from = self.state().name(), "session cancelled");
        self.set_state(SessionState::Cancelled);
        self.release().await;
    }

    /// Enter a terminal state and release session resources.
    async fn finish(&mut self, terminal: SessionState) {
        match &terminal {
            SessionState::Completed {
                identity,
                display_name,
                enrolled,
            } => tracing::info!(
                identity = %identity,
                name = %display_name,
                enrolled,
                "session completed"
            ),
            SessionState::Failed { reason } => tracing::error!(reason = %reason, "session failed"),
            other => tracing::info!(state = other.name(), "session ended"),
        }
        self.set_state(terminal);
        self.release().await;
    }

    /// Invalidate in-flight work, disarm the deadline and stop capture.
    async fn release(&mut self) {
        self.generation += 1;
        self.deadline = None;
        self.consecutive_failures = 0;
        self.last_guidance = None;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.end();
        }
        if self.capturing {
            self.capturing = false;
            if let Some(capture) = &self.capture {
                match timeout(self.config.operation_timeout, capture.stop()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::warn!(error = %err, "capture stop failed"),
                    Err(_) => tracing::warn!("capture stop timed out"),
                }
            }
        }
    }

    async fn on_deadline(&mut self) {
        self.deadline = None;
        if self.state().is_active() {
            tracing::warn!("session deadline reached");
            self.finish(SessionState::Failed {
                reason: FailureReason::Timeout,
            })
            .await;
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        self.stats.received += 1;
        let sequence = frame.sequence;
        let frame = Arc::new(frame);
        self.buffer.push(Arc::clone(&frame));

        let state = self.state();
        if !state.is_active() {
            self.stats.ignored += 1;
            self.emit(SessionEvent::FrameDropped {
                sequence,
                reason: DropReason::Inactive,
            });
            return;
        }

        let Some(mut pipeline) = self.pipeline.take() else {
            self.stats.dropped_busy += 1;
            tracing::trace!(sequence, "pipeline busy; frame dropped");
            self.emit(SessionEvent::FrameDropped {
                sequence,
                reason: DropReason::Busy,
            });
            return;
        };

        if state == SessionState::Scanning {
            self.set_state(SessionState::Processing);
        }
        self.in_flight_generation = self.generation;
        self.in_flight = Some(tokio::spawn(async move {
            let report = pipeline.process(&frame).await;
            (pipeline, report)
        }));
    }

    async fn on_frame_done(&mut self, joined: Result<(Pipeline, FrameReport), JoinError>) {
        let current = self.in_flight_generation == self.generation && self.state().is_active();
        let (mut pipeline, report) = match joined {
            Ok(done) => done,
            Err(err) => {
                tracing::error!(error = %err, "frame task ended abnormally; rebuilding pipeline");
                self.pipeline = Some(Pipeline::new(&self.config, self.collaborators.clone()));
                if current {
                    self.finish(SessionState::Failed {
                        reason: FailureReason::Internal,
                    })
                    .await;
                }
                return;
            }
        };

        if !current {
            pipeline.end();
            self.pipeline = Some(pipeline);
            self.stats.discarded += 1;
            tracing::debug!(sequence = report.sequence, "discarding result from ended session");
            return;
        }

        self.pipeline = Some(pipeline);
        self.stats.processed += 1;
        self.apply(report).await;
    }

    /// Wait for in-flight work and take the pipeline back.
    async fn reclaim(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            let joined = handle.await;
            self.on_frame_done(joined).await;
        }
    }

    async fn apply(&mut self, report: FrameReport) {
        let sequence = report.sequence;

        if report.collaborator_failure {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        if let Some(quality) = report.face_quality {
            self.buffer.annotate(sequence, quality);
        }
        if let Some(guidance) = report.guidance {
            if self.last_guidance != Some(guidance) {
                self.last_guidance = Some(guidance);
                self.emit(SessionEvent::Guidance(guidance));
            }
        }
        if let Some(name) = report.mode_switch {
            self.emit(SessionEvent::ModeSwitched { name });
        }

        match report.outcome {
            FrameOutcome::Rejected(reason) => {
                tracing::debug!(sequence, reason = ?reason, "frame rejected");
                self.emit(SessionEvent::FrameRejected { sequence, reason });
                if self.consecutive_failures >= self.config.max_consecutive_failures.max(1) {
                    tracing::error!(
                        failures = self.consecutive_failures,
                        "collaborators keep failing"
                    );
                    self.finish(SessionState::Failed {
                        reason: FailureReason::CollaboratorFailure,
                    })
                    .await;
                } else if self.state() == SessionState::Processing {
                    self.set_state(SessionState::Scanning);
                }
            }
            FrameOutcome::Progress(progress) => {
                tracing::debug!(
                    collected = progress.collected,
                    required = progress.required,
                    "enrollment sample accepted"
                );
                self.set_state(SessionState::UserRegistration {
                    name: progress.name.clone(),
                    collected: progress.collected,
                    required: progress.required,
                });
                self.emit(SessionEvent::EnrollmentProgress(progress));
            }
            FrameOutcome::Authenticated {
                identity,
                display_name,
                ..
            } => {
                self.finish(SessionState::Completed {
                    identity,
                    display_name,
                    enrolled: false,
                })
                .await;
            }
            FrameOutcome::Enrolled { metadata, progress } => {
                self.emit(SessionEvent::EnrollmentProgress(progress));
                self.finish(SessionState::Completed {
                    identity: metadata.id,
                    display_name: metadata.display_name,
                    enrolled: true,
                })
                .await;
            }
            FrameOutcome::Failed(reason) => {
                self.finish(SessionState::Failed { reason }).await;
            }
            FrameOutcome::Idle => {}
        }

        self.emit(SessionEvent::FrameHandled { sequence });
    }

    async fn list_identities(&self) -> Result<Vec<IdentityMetadata>, SessionError> {
        let records = timeout(self.config.operation_timeout, self.collaborators.store.list())
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "identity store list",
            })??;
        Ok(records.into_iter().map(|r| r.metadata).collect())
    }

    async fn delete_identity(&mut self, id: &str) -> Result<bool, SessionError> {
        let removed = timeout(self.config.operation_timeout, self.collaborators.store.delete(id))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "identity store delete",
            })??;
        if removed {
            self.reclaim().await;
            if let Some(pipeline) = self.pipeline.as_mut() {
                pipeline.matcher_mut().forget(id);
            }
            tracing::info!(identity = %id, "identity deleted");
        }
        Ok(removed)
    }
}

async fn wait_in_flight(slot: &mut Option<InFlight>) -> Result<(Pipeline, FrameReport), JoinError> {
    match slot.as_mut() {
        Some(handle) => {
            let joined = handle.await;
            *slot = None;
            joined
        }
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
