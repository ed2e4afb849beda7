//! Read path for the inspection page.
//!
//! Each [`InspectionImagePresenter::load`] call is one fetch with its own
//! [`FetchToken`]. Starting a new fetch cancels the previous token, and every
//! state mutation checks the token under the state lock first, so a slow,
//! superseded fetch can never overwrite what a newer one produced.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::Capabilities;
use crate::error::{FetchError, WorkflowError};
use crate::metrics::ControllerMetrics;
use crate::model::{
    ImageOrigin, ImageRef, ImageRole, InspectionRoute, InspectionSnapshot, SelectedFile,
};
use crate::registry::{
    HandleRef, ImageHandle, ImageHandleRegistry, NoopReleaseHook, ReleaseHook, SharedRegistry,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenterDecision {
    #[default]
    Loading,
    Comparison,
    CaptureAffordance,
    RedirectToCapture,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ImageSlot {
    #[default]
    Empty,
    Loading,
    Ready(HandleRef),
    Failed {
        message: String,
    },
}

impl ImageSlot {
    pub fn handle(&self) -> Option<&HandleRef> {
        match self {
            ImageSlot::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ImageSlot::Ready(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenterView {
    pub route: Option<InspectionRoute>,
    pub loading: bool,
    pub snapshot: Option<InspectionSnapshot>,
    pub has_baseline: Option<bool>,
    pub has_current: Option<bool>,
    pub fetch_error: Option<String>,
    pub baseline: ImageSlot,
    pub current: ImageSlot,
    pub local_preview: Option<HandleRef>,
    pub decision: PresenterDecision,
}

impl PresenterView {
    fn slot_mut(&mut self, role: ImageRole) -> &mut ImageSlot {
        match role {
            ImageRole::Baseline => &mut self.baseline,
            ImageRole::CurrentPreview | ImageRole::CurrentUploaded => &mut self.current,
        }
    }

    /// A fetch failure counts as "no current image".
    fn decide(&self) -> PresenterDecision {
        if self.loading {
            PresenterDecision::Loading
        } else if self.fetch_error.is_some() || self.has_current == Some(false) {
            PresenterDecision::RedirectToCapture
        } else if self.baseline.is_ready() && self.current.is_ready() {
            PresenterDecision::Comparison
        } else {
            PresenterDecision::CaptureAffordance
        }
    }
}

/// Cancellation flag scoped to one fetch.
#[derive(Clone, Debug)]
pub struct FetchToken {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    redirected: Arc<AtomicBool>,
}

impl FetchToken {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            cancelled: Arc::new(AtomicBool::new(false)),
            redirected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True the first time only.
    fn claim_redirect(&self) -> bool {
        !self.redirected.swap(true, Ordering::AcqRel)
    }
}

struct PresenterState {
    generation: u64,
    token: Option<FetchToken>,
    torn_down: bool,
    view: PresenterView,
}

struct PresenterInner {
    caps: Capabilities,
    registry: SharedRegistry,
    metrics: Arc<ControllerMetrics>,
    state: Mutex<PresenterState>,
    view_tx: watch::Sender<PresenterView>,
}

pub struct InspectionImagePresenter {
    inner: Arc<PresenterInner>,
}

impl InspectionImagePresenter {
    pub fn new(caps: Capabilities) -> Self {
        Self::with_release_hook(caps, Arc::new(NoopReleaseHook))
    }

    pub fn with_release_hook(caps: Capabilities, hook: Arc<dyn ReleaseHook>) -> Self {
        let metrics = Arc::new(ControllerMetrics::new());
        let registry = SharedRegistry::new(ImageHandleRegistry::new(hook, metrics.clone()));
        let (view_tx, _) = watch::channel(PresenterView::default());
        Self {
            inner: Arc::new(PresenterInner {
                caps,
                registry,
                metrics,
                state: Mutex::new(PresenterState {
                    generation: 0,
                    token: None,
                    torn_down: false,
                    view: PresenterView::default(),
                }),
                view_tx,
            }),
        }
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.inner.metrics
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenterView> {
        self.inner.view_tx.subscribe()
    }

    pub fn view(&self) -> PresenterView {
        self.inner.lock().view.clone()
    }

    /// Fetches the snapshot for `route`, downloads both images in parallel
    /// and settles on a decision. A newer `load` makes this one a no-op from
    /// the point it is superseded.
    #[instrument(skip(self), fields(inspection = %route.inspection_id))]
    pub async fn load(&self, route: InspectionRoute) -> PresenterView {
        let inner = &self.inner;
        let Some(token) = inner.begin(&route) else {
            return self.view();
        };

        let fetched = inner
            .caps
            .api
            .fetch_inspection_snapshot(&route.inspection_id, route.transformer_id.as_ref())
            .await;
        match fetched {
            Ok(snapshot) => {
                if !inner.apply_snapshot(&token, &snapshot) {
                    return self.view();
                }
                tokio::join!(
                    inner.materialize(
                        &token,
                        ImageRole::Baseline,
                        snapshot.baseline_image_ref().cloned()
                    ),
                    inner.materialize(
                        &token,
                        ImageRole::CurrentUploaded,
                        snapshot.current_image_ref().cloned()
                    ),
                );
            }
            Err(error) => {
                warn!(%error, "inspection snapshot unavailable");
                if !inner.apply_fetch_error(&token, &error) {
                    return self.view();
                }
            }
        }

        inner.settle(&token, &route);
        self.view()
    }

    /// Shows a locally picked file in the capture affordance.
    pub fn set_local_preview(&self, file: &SelectedFile) -> Result<HandleRef, WorkflowError> {
        if file.is_empty() {
            return Err(WorkflowError::EmptyFile);
        }
        let mut state = self.inner.lock();
        if state.torn_down {
            return Err(WorkflowError::TornDown);
        }
        let handle = {
            let mut registry = self.inner.registry.lock();
            let handle = registry.set(
                ImageRole::CurrentPreview,
                ImageHandle::memory(file.bytes.clone(), ImageOrigin::LocalPreview),
            );
            registry.flush();
            handle
        };
        state.view.local_preview = Some(handle.clone());
        self.inner.publish(&state);
        Ok(handle)
    }

    /// Cancels the in-flight fetch and releases every handle. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for InspectionImagePresenter {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl PresenterInner {
    fn lock(&self) -> MutexGuard<'_, PresenterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PresenterState) {
        let view = state.view.clone();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    /// Runs `apply` only while `token` is still the live fetch.
    fn with_live<R>(
        &self,
        token: &FetchToken,
        apply: impl FnOnce(&mut PresenterState) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if state.torn_down || token.is_cancelled() {
            ControllerMetrics::incr(&self.metrics.stale_results_discarded);
            debug!(generation = token.generation, "stale fetch result discarded");
            return None;
        }
        let result = apply(&mut *state);
        state.view.decision = state.view.decide();
        self.publish(&state);
        Some(result)
    }

    fn begin(&self, route: &InspectionRoute) -> Option<FetchToken> {
        let mut state = self.lock();
        if state.torn_down {
            return None;
        }
        if let Some(previous) = state.token.take() {
            previous.cancel();
            debug!(generation = previous.generation, "superseded fetch cancelled");
        }
        state.generation += 1;
        let token = FetchToken::new(state.generation);
        state.token = Some(token.clone());

        let local_preview = state.view.local_preview.take();
        state.view = PresenterView {
            route: Some(route.clone()),
            loading: true,
            baseline: ImageSlot::Loading,
            current: ImageSlot::Loading,
            local_preview,
            ..PresenterView::default()
        };
        ControllerMetrics::incr(&self.metrics.fetches_started);
        self.publish(&state);
        Some(token)
    }

    fn apply_snapshot(&self, token: &FetchToken, snapshot: &InspectionSnapshot) -> bool {
        self.with_live(token, |state| {
            let view = &mut state.view;
            view.has_baseline = Some(snapshot.has_baseline());
            view.has_current = Some(snapshot.has_current());
            view.snapshot = Some(snapshot.clone());
            for role in [ImageRole::Baseline, ImageRole::CurrentUploaded] {
                if snapshot.image_ref(role).is_none() {
                    self.registry.lock().release_role(role);
                    *view.slot_mut(role) = ImageSlot::Empty;
                }
            }
        })
        .is_some()
    }

    fn apply_fetch_error(&self, token: &FetchToken, error: &FetchError) -> bool {
        self.with_live(token, |state| {
            let view = &mut state.view;
            view.fetch_error = Some(error.user_message());
            view.has_baseline = None;
            view.has_current = Some(false);
            let mut registry = self.registry.lock();
            for role in [ImageRole::Baseline, ImageRole::CurrentUploaded] {
                registry.release_role(role);
                *view.slot_mut(role) = ImageSlot::Empty;
            }
        })
        .is_some()
    }

    async fn materialize(&self, token: &FetchToken, role: ImageRole, image: Option<ImageRef>) {
        let Some(image) = image else {
            return;
        };
        let downloaded = self.caps.api.download_image_bytes(&image).await;
        self.with_live(token, |state| match downloaded {
            Ok(bytes) => {
                let handle = {
                    let mut registry = self.registry.lock();
                    let handle =
                        registry.set(role, ImageHandle::memory(bytes, ImageOrigin::Downloaded));
                    registry.flush();
                    handle
                };
                *state.view.slot_mut(role) = ImageSlot::Ready(handle);
            }
            Err(error) => {
                ControllerMetrics::incr(&self.metrics.downloads_failed);
                warn!(%role, %error, "image download failed");
                self.registry.lock().release_role(role);
                *state.view.slot_mut(role) = ImageSlot::Failed {
                    message: error.user_message(),
                };
            }
        });
    }

    fn settle(&self, token: &FetchToken, route: &InspectionRoute) {
        let redirect = self.with_live(token, |state| {
            state.view.loading = false;
            let no_current =
                state.view.fetch_error.is_some() || state.view.has_current == Some(false);
            no_current && token.claim_redirect()
        });
        if redirect == Some(true) {
            let path = route.capture_path();
            info!(%path, "no current image, redirecting to capture");
            ControllerMetrics::incr(&self.metrics.redirects_issued);
            self.caps.navigator.navigate(&path, true);
        }
    }

    fn teardown(&self) {
        let mut state = self.lock();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        if let Some(token) = state.token.take() {
            token.cancel();
        }
        let released = self.registry.release_all();
        state.view.baseline = ImageSlot::Empty;
        state.view.current = ImageSlot::Empty;
        state.view.local_preview = None;
        info!(released, "inspection presenter torn down");
        self.publish(&state);
    }
}
