//! Capture page coordinator.
//!
//! [`CaptureWorkflow`] binds one [`UploadSession`] at a time to the state the
//! page renders, drives the session's timers through the [`TaskScheduler`]
//! and, once an upload completes, syncs the inspection status and navigates
//! back to the inspection page.
//!
//! Locking: the workflow state mutex is always taken before the registry
//! mutex, and neither is held across an `.await` or while calling the
//! navigator.

use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{Capabilities, ProgressSink, TransferProgress};
use crate::config::ControllerConfig;
use crate::error::{ConfigError, UploadError, WorkflowError};
use crate::metrics::ControllerMetrics;
use crate::model::{
    CaptureContext, ImageOrigin, ImageRole, InspectionStatus, SelectedFile, SessionId, TakenAt,
    UnixTimeMs, UploadRequest, WeatherCondition,
};
use crate::progress::{EstimatorSettings, FinishPlan};
use crate::registry::{
    HandleRef, ImageHandle, ImageHandleRegistry, NoopReleaseHook, ReleaseHook, SharedRegistry,
};
use crate::scheduler::{TaskScheduler, TimerKind};
use crate::session::{UploadSession, UploadState};

// ============================================================================
// View
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureStatus {
    #[default]
    Pending,
    Uploading,
    Completed,
    Error,
}

impl CaptureStatus {
    pub fn from_state(state: UploadState) -> Self {
        match state {
            UploadState::Idle | UploadState::Selecting | UploadState::Cancelled => Self::Pending,
            UploadState::Uploading | UploadState::Finishing => Self::Uploading,
            UploadState::Complete => Self::Completed,
            UploadState::Error => Self::Error,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Uploading => "Uploading",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

/// Everything the capture page renders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaptureView {
    pub status: CaptureStatus,
    pub upload_state: UploadState,
    pub progress_percent: u8,
    pub error_message: Option<String>,
    pub baseline_handle: Option<HandleRef>,
    pub current_handle: Option<HandleRef>,
    pub weather: WeatherCondition,
    pub inspection_status: InspectionStatus,
    pub captured_at: Option<UnixTimeMs>,
    pub baseline_taken_at: Option<TakenAt>,
}

// ============================================================================
// Workflow
// ============================================================================

struct Shared {
    session: Option<UploadSession>,
    scheduler: TaskScheduler,
    weather: WeatherCondition,
    inspection_status: InspectionStatus,
    baseline_taken_at: Option<TakenAt>,
    torn_down: bool,
}

struct Inner {
    context: CaptureContext,
    config: ControllerConfig,
    caps: Capabilities,
    registry: SharedRegistry,
    metrics: Arc<ControllerMetrics>,
    shared: Mutex<Shared>,
    view_tx: watch::Sender<CaptureView>,
}

/// Owned by the capture page. Dropping it tears everything down.
pub struct CaptureWorkflow {
    inner: Arc<Inner>,
}

impl CaptureWorkflow {
    pub fn new(
        context: CaptureContext,
        config: ControllerConfig,
        caps: Capabilities,
    ) -> Result<Self, ConfigError> {
        Self::with_release_hook(context, config, caps, Arc::new(NoopReleaseHook))
    }

    /// Rejects configs that fail [`ControllerConfig::validate`]; the timers
    /// need non-zero periods.
    pub fn with_release_hook(
        context: CaptureContext,
        config: ControllerConfig,
        caps: Capabilities,
        hook: Arc<dyn ReleaseHook>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let metrics = Arc::new(ControllerMetrics::new());
        let registry = SharedRegistry::new(ImageHandleRegistry::new(hook, metrics.clone()));
        let (view_tx, _) = watch::channel(CaptureView::default());
        Ok(Self {
            inner: Arc::new(Inner {
                context,
                config,
                caps,
                registry,
                metrics,
                shared: Mutex::new(Shared {
                    session: None,
                    scheduler: TaskScheduler::new(),
                    weather: WeatherCondition::default(),
                    inspection_status: InspectionStatus::InProgress,
                    baseline_taken_at: None,
                    torn_down: false,
                }),
                view_tx,
            }),
        })
    }

    pub fn context(&self) -> &CaptureContext {
        &self.inner.context
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.inner.metrics
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureView> {
        self.inner.view_tx.subscribe()
    }

    pub fn view(&self) -> CaptureView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn state(&self) -> UploadState {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(UploadState::Idle, UploadSession::state)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().session.as_ref().map(|s| s.id().clone())
    }

    /// Timers and deferred tasks still scheduled for the current session.
    pub fn pending_timers(&self) -> usize {
        let shared = self.inner.lock();
        shared
            .session
            .as_ref()
            .map_or(0, |s| shared.scheduler.pending(s.id()))
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.lock().scheduler.pending_total()
    }

    /// Applies to uploads started after this call.
    pub fn set_weather(&self, weather: WeatherCondition) {
        let mut shared = self.inner.lock();
        shared.weather = weather;
        self.inner.publish(&shared);
    }

    /// Starts a fresh upload session for `file`, replacing any prior one.
    /// Must be called within a Tokio runtime.
    #[instrument(skip(self, file), fields(file = %file.name, size_bytes = file.len()))]
    pub fn select_file(&self, file: SelectedFile) -> Result<SessionId, WorkflowError> {
        if file.is_empty() {
            return Err(WorkflowError::EmptyFile);
        }
        let max = self.inner.config.max_upload_bytes;
        if file.len() > max {
            return Err(WorkflowError::FileTooLarge {
                size: file.len(),
                max,
            });
        }
        self.inner.start_session(file)
    }

    /// Cancels a non-terminal session. Returns false when there was nothing
    /// to cancel.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Looks up the transformer's baseline and downloads its bytes for the
    /// page header. Failures leave the preview absent.
    #[instrument(skip(self), fields(transformer = %self.inner.context.transformer_id))]
    pub async fn load_baseline(&self) -> Option<HandleRef> {
        let lookup = self
            .inner
            .caps
            .api
            .fetch_baseline_image(&self.inner.context.transformer_id)
            .await;
        let baseline = match lookup {
            Ok(Some(baseline)) => baseline,
            Ok(None) => {
                debug!("no baseline image recorded");
                return None;
            }
            Err(error) => {
                warn!(%error, "baseline lookup failed");
                return None;
            }
        };
        let bytes = match self.inner.caps.api.download_image_bytes(&baseline.url).await {
            Ok(bytes) => bytes,
            Err(error) => {
                ControllerMetrics::incr(&self.inner.metrics.downloads_failed);
                warn!(%error, url = %baseline.url, "baseline download failed");
                return None;
            }
        };

        let mut shared = self.inner.lock();
        if shared.torn_down {
            return None;
        }
        let handle = {
            let mut registry = self.inner.registry.lock();
            let handle = registry.set(
                ImageRole::Baseline,
                ImageHandle::memory(bytes, ImageOrigin::Downloaded),
            );
            registry.flush();
            handle
        };
        shared.baseline_taken_at = baseline.taken_at;
        self.inner.publish(&shared);
        Some(handle)
    }

    /// Cancels every timer and releases every handle. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for CaptureWorkflow {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

fn active<'a>(session: &'a mut Option<UploadSession>, id: &SessionId) -> Option<&'a mut UploadSession> {
    session.as_mut().filter(|s| s.id() == id)
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn uploader_name(&self) -> String {
        self.caps
            .identity
            .current_user()
            .and_then(|user| user.display_name().map(str::to_string))
            .unwrap_or_else(|| self.config.fallback_uploader.clone())
    }

    fn build_view(&self, shared: &Shared) -> CaptureView {
        let (baseline_handle, current_handle) = {
            let registry = self.registry.lock();
            (
                registry.handle_ref(ImageRole::Baseline),
                registry
                    .handle_ref(ImageRole::CurrentUploaded)
                    .or_else(|| registry.handle_ref(ImageRole::CurrentPreview)),
            )
        };
        let upload_state = shared
            .session
            .as_ref()
            .map_or(UploadState::Idle, UploadSession::state);
        let session = shared.session.as_ref();
        let showing_capture = matches!(
            upload_state,
            UploadState::Uploading | UploadState::Finishing | UploadState::Complete | UploadState::Error
        );

        CaptureView {
            status: CaptureStatus::from_state(upload_state),
            upload_state,
            progress_percent: if showing_capture {
                session.map_or(0, UploadSession::progress)
            } else {
                0
            },
            error_message: session
                .and_then(UploadSession::last_error)
                .map(UploadError::user_message),
            baseline_handle,
            current_handle,
            weather: shared.weather,
            inspection_status: shared.inspection_status,
            captured_at: session
                .filter(|_| showing_capture)
                .map(UploadSession::captured_at),
            baseline_taken_at: shared.baseline_taken_at.clone(),
        }
    }

    fn publish(&self, shared: &Shared) {
        let view = self.build_view(shared);
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn start_session(self: &Arc<Self>, file: SelectedFile) -> Result<SessionId, WorkflowError> {
        let mut shared = self.lock();
        if shared.torn_down {
            return Err(WorkflowError::TornDown);
        }
        if let Some(mut previous) = shared.session.take() {
            if previous.cancel() {
                ControllerMetrics::incr(&self.metrics.uploads_cancelled);
            }
            shared.scheduler.cancel_session(previous.id());
        }

        let mut session = UploadSession::new(EstimatorSettings::from_config(&self.config));
        session.select()?;
        session.start_upload()?;
        let id = session.id().clone();

        {
            let mut registry = self.registry.lock();
            registry.set(
                ImageRole::CurrentPreview,
                ImageHandle::memory(file.bytes.clone(), ImageOrigin::LocalPreview),
            );
            registry.release_role(ImageRole::CurrentUploaded);
            registry.flush();
        }

        let request = UploadRequest {
            transformer_id: self.context.transformer_id.clone(),
            inspection_id: self.context.inspection_id.clone(),
            file,
            uploader_name: self.uploader_name(),
            weather: shared.weather,
        };

        let weak = Arc::downgrade(self);
        let tick_id = id.clone();
        shared.scheduler.every(
            &id,
            TimerKind::SimulatedProgress,
            self.config.simulated_tick(),
            move || match weak.upgrade() {
                Some(inner) => inner.on_sim_tick(&tick_id),
                None => ControlFlow::Break(()),
            },
        );

        let sink = {
            let weak = Arc::downgrade(self);
            let id = id.clone();
            ProgressSink::new(move |progress| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_progress(&id, progress);
                }
            })
        };
        let api = self.caps.api.clone();
        let weak = Arc::downgrade(self);
        let transfer_id = id.clone();
        session.attach_transfer(tokio::spawn(async move {
            let result = api.upload_thermal_image(request, sink).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_transfer_result(&transfer_id, result);
            }
        }));

        shared.session = Some(session);
        ControllerMetrics::incr(&self.metrics.uploads_started);
        info!(session = %id, "upload started");
        self.publish(&shared);
        Ok(id)
    }

    fn on_sim_tick(&self, id: &SessionId) -> ControlFlow<()> {
        let mut shared = self.lock();
        let Some(session) = active(&mut shared.session, id) else {
            return ControlFlow::Break(());
        };
        // None once the finish began or the session moved on.
        let Some(sample) = session.on_sim_tick() else {
            return ControlFlow::Break(());
        };
        debug!(session = %id, progress = sample.value, "simulated progress");
        self.publish(&shared);
        ControlFlow::Continue(())
    }

    fn on_progress(&self, id: &SessionId, progress: TransferProgress) {
        let mut shared = self.lock();
        let Some(session) = active(&mut shared.session, id) else {
            return;
        };
        if let Some(sample) = session.on_progress(progress.loaded, progress.total) {
            debug!(session = %id, progress = sample.value, loaded = progress.loaded, "transfer progress");
            self.publish(&shared);
        }
    }

    fn on_transfer_result(self: &Arc<Self>, id: &SessionId, result: Result<(), UploadError>) {
        let mut shared = self.lock();
        if shared.torn_down {
            return;
        }
        let outcome = {
            let Some(session) = active(&mut shared.session, id)
                .filter(|s| s.state() == UploadState::Uploading)
            else {
                debug!(session = %id, "transfer result for inactive session discarded");
                return;
            };
            match result {
                Ok(()) => session.on_transfer_succeeded().map(Some),
                Err(error) => {
                    warn!(session = %id, %error, "upload failed");
                    session.on_transfer_failed(error).map(|()| None)
                }
            }
        };

        match outcome {
            Ok(Some(plan)) => {
                shared.scheduler.cancel(id, TimerKind::SimulatedProgress);
                match plan {
                    FinishPlan::Immediate => self.complete(&mut shared, id),
                    FinishPlan::Ramp { steps, interval } => {
                        debug!(session = %id, steps, "finish ramp started");
                        let weak = Arc::downgrade(self);
                        let ramp_id = id.clone();
                        shared.scheduler.every(id, TimerKind::FinishRamp, interval, move || {
                            match weak.upgrade() {
                                Some(inner) => inner.on_ramp_tick(&ramp_id),
                                None => ControlFlow::Break(()),
                            }
                        });
                    }
                }
            }
            Ok(None) => {
                shared.scheduler.cancel_session(id);
                ControllerMetrics::incr(&self.metrics.uploads_failed);
            }
            Err(error) => warn!(session = %id, %error, "transfer result rejected"),
        }
        self.publish(&shared);
    }

    fn on_ramp_tick(self: &Arc<Self>, id: &SessionId) -> ControlFlow<()> {
        let mut shared = self.lock();
        let Some(step) = active(&mut shared.session, id).and_then(UploadSession::on_ramp_tick)
        else {
            return ControlFlow::Break(());
        };
        debug!(session = %id, progress = step.sample.value, "finish ramp");
        if step.last {
            let weak = Arc::downgrade(self);
            let grace_id = id.clone();
            shared.scheduler.after(
                id,
                TimerKind::FinishGrace,
                self.config.finish_grace(),
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_finish_grace(&grace_id);
                    }
                },
            );
        }
        self.publish(&shared);
        if step.last {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn on_finish_grace(self: &Arc<Self>, id: &SessionId) {
        let mut shared = self.lock();
        if shared.torn_down {
            return;
        }
        self.complete(&mut shared, id);
        self.publish(&shared);
    }

    /// Finishing to Complete: promotes the preview to the uploaded image,
    /// marks the inspection completed and schedules the status sync plus the
    /// deferred navigation.
    fn complete(self: &Arc<Self>, shared: &mut Shared, id: &SessionId) {
        let Some(session) = active(&mut shared.session, id) else {
            return;
        };
        if let Err(error) = session.finalize() {
            warn!(session = %id, %error, "completion rejected");
            return;
        }

        {
            let mut registry = self.registry.lock();
            if let Some(bytes) = registry.bytes(ImageRole::CurrentPreview) {
                registry.set(
                    ImageRole::CurrentUploaded,
                    ImageHandle::memory(bytes, ImageOrigin::Uploaded),
                );
            }
            registry.release_role(ImageRole::CurrentPreview);
            registry.flush();
        }
        shared.inspection_status = InspectionStatus::Completed;
        ControllerMetrics::incr(&self.metrics.uploads_completed);
        info!(session = %id, "upload complete");

        let api = self.caps.api.clone();
        let metrics = self.metrics.clone();
        let inspection_id = self.context.inspection_id.clone();
        let hold = self.config.success_hold();
        let weak = Arc::downgrade(self);
        let redirect_id = id.clone();
        shared.scheduler.spawn(id, TimerKind::Redirect, async move {
            let (synced, ()) = tokio::join!(
                api.update_inspection_status(&inspection_id, InspectionStatus::Completed),
                time::sleep(hold),
            );
            if let Err(error) = synced {
                ControllerMetrics::incr(&metrics.status_syncs_failed);
                warn!(%error, "inspection status sync failed");
            }
            if let Some(inner) = weak.upgrade() {
                inner.navigate_after_success(&redirect_id);
            }
        });
    }

    fn navigate_after_success(&self, id: &SessionId) {
        let path = {
            let shared = self.lock();
            let completed = shared
                .session
                .as_ref()
                .is_some_and(|s| s.id() == id && s.state() == UploadState::Complete);
            if shared.torn_down || !completed {
                return;
            }
            self.context.route().inspection_path()
        };
        info!(session = %id, %path, "leaving capture page");
        ControllerMetrics::incr(&self.metrics.redirects_issued);
        self.caps.navigator.navigate(&path, false);
    }

    fn cancel(&self) -> bool {
        let mut shared = self.lock();
        let Some(session) = shared.session.as_mut() else {
            return false;
        };
        if !session.cancel() {
            return false;
        }
        let id = session.id().clone();
        shared.scheduler.cancel_session(&id);
        {
            let mut registry = self.registry.lock();
            registry.release_role(ImageRole::CurrentPreview);
            registry.release_role(ImageRole::CurrentUploaded);
            registry.flush();
        }
        ControllerMetrics::incr(&self.metrics.uploads_cancelled);
        self.publish(&shared);
        true
    }

    fn teardown(&self) {
        let mut shared = self.lock();
        if shared.torn_down {
            return;
        }
        shared.torn_down = true;
        if let Some(session) = shared.session.as_mut() {
            if session.cancel() {
                ControllerMetrics::incr(&self.metrics.uploads_cancelled);
            }
            session.abort_transfer();
        }
        let tasks = shared.scheduler.cancel_all();
        let released = self.registry.release_all();
        info!(tasks, released, "capture workflow torn down");
        self.publish(&shared);
    }
}
