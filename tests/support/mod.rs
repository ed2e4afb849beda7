//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thermal_capture_core::capabilities::{
    Capabilities, IdentityProvider, InspectionApi, Navigator, ProgressSink,
};
use thermal_capture_core::{
    BaselineImage, DownloadError, FetchError, HandleId, ImageOrigin, ImageRef, InspectionId,
    InspectionSnapshot, InspectionStatus, ReleaseHook, TransformerId, UploadError, UploadRequest,
    UserProfile, WeatherCondition,
};

pub const TRANSFORMER: &str = "AZ-8370";
pub const INSPECTION: &str = "INS-42";
pub const BASELINE_URL: &str = "http://localhost:8080/uploads/baseline.png";
pub const CURRENT_URL: &str = "http://localhost:8080/uploads/current.png";

pub fn transformer_id() -> TransformerId {
    TransformerId::new(TRANSFORMER)
}

pub fn inspection_id() -> InspectionId {
    InspectionId::new(INSPECTION)
}

pub fn image_ref(url: &str) -> ImageRef {
    ImageRef::new(url).expect("non-empty url")
}

pub fn snapshot(baseline: Option<&str>, current: Option<&str>) -> InspectionSnapshot {
    InspectionSnapshot::new(
        baseline.map(image_ref),
        current.map(image_ref),
        None,
        None,
    )
}

// ============================================================================
// Upload scripting
// ============================================================================

/// One upload attempt: progress events spaced by their delays, then the
/// result after `settle_after`. A `None` result never resolves.
#[derive(Clone, Debug)]
pub struct UploadScript {
    pub steps: Vec<(Duration, u64, Option<u64>)>,
    pub settle_after: Duration,
    pub result: Option<Result<(), UploadError>>,
}

impl UploadScript {
    pub fn succeed_after(ms: u64) -> Self {
        Self {
            steps: Vec::new(),
            settle_after: Duration::from_millis(ms),
            result: Some(Ok(())),
        }
    }

    pub fn fail_after(ms: u64, error: UploadError) -> Self {
        Self {
            steps: Vec::new(),
            settle_after: Duration::from_millis(ms),
            result: Some(Err(error)),
        }
    }

    pub fn never() -> Self {
        Self {
            steps: Vec::new(),
            settle_after: Duration::ZERO,
            result: None,
        }
    }

    /// Adds a progress event `delay_ms` after the previous one.
    pub fn progress(mut self, delay_ms: u64, loaded: u64, total: Option<u64>) -> Self {
        self.steps
            .push((Duration::from_millis(delay_ms), loaded, total));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRecord {
    pub transformer_id: TransformerId,
    pub inspection_id: InspectionId,
    pub file_name: String,
    pub size_bytes: usize,
    pub uploader_name: String,
    pub weather: WeatherCondition,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// ScriptedApi
// ============================================================================

type Scripted<T> = (Duration, T);

#[derive(Default)]
pub struct ScriptedApi {
    snapshots: Mutex<VecDeque<Scripted<Result<InspectionSnapshot, FetchError>>>>,
    downloads: Mutex<HashMap<String, Scripted<Result<Bytes, DownloadError>>>>,
    baseline: Mutex<Option<Result<Option<BaselineImage>, FetchError>>>,
    uploads_script: Mutex<VecDeque<UploadScript>>,
    status_result: Mutex<Option<FetchError>>,

    pub uploads: Mutex<Vec<UploadRecord>>,
    pub status_updates: Mutex<Vec<(InspectionId, InspectionStatus)>>,
    pub downloads_requested: Mutex<Vec<String>>,
    pub snapshot_calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_snapshot(&self, delay_ms: u64, result: Result<InspectionSnapshot, FetchError>) {
        self.snapshots
            .lock()
            .unwrap()
            .push_back((Duration::from_millis(delay_ms), result));
    }

    pub fn set_download(&self, url: &str, delay_ms: u64, result: Result<Bytes, DownloadError>) {
        self.downloads
            .lock()
            .unwrap()
            .insert(url.to_string(), (Duration::from_millis(delay_ms), result));
    }

    pub fn set_baseline(&self, result: Result<Option<BaselineImage>, FetchError>) {
        *self.baseline.lock().unwrap() = Some(result);
    }

    pub fn push_upload(&self, script: UploadScript) {
        self.uploads_script.lock().unwrap().push_back(script);
    }

    pub fn fail_status_sync(&self, error: FetchError) {
        *self.status_result.lock().unwrap() = Some(error);
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<(InspectionId, InspectionStatus)> {
        self.status_updates.lock().unwrap().clone()
    }

    /// Upload futures that have started and not yet been dropped.
    pub fn uploads_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl InspectionApi for ScriptedApi {
    async fn fetch_inspection_snapshot(
        &self,
        _inspection_id: &InspectionId,
        _transformer_id: Option<&TransformerId>,
    ) -> Result<InspectionSnapshot, FetchError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.snapshots.lock().unwrap().pop_front();
        let (delay, result) = scripted.unwrap_or((Duration::ZERO, Err(FetchError::NotFound)));
        tokio::time::sleep(delay).await;
        result
    }

    async fn download_image_bytes(&self, image: &ImageRef) -> Result<Bytes, DownloadError> {
        self.downloads_requested
            .lock()
            .unwrap()
            .push(image.as_str().to_string());
        let scripted = self.downloads.lock().unwrap().get(image.as_str()).cloned();
        let (delay, result) =
            scripted.unwrap_or((Duration::ZERO, Err(DownloadError::Http { status: 404 })));
        tokio::time::sleep(delay).await;
        result
    }

    async fn fetch_baseline_image(
        &self,
        _transformer_id: &TransformerId,
    ) -> Result<Option<BaselineImage>, FetchError> {
        self.baseline.lock().unwrap().clone().unwrap_or(Ok(None))
    }

    async fn upload_thermal_image(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> Result<(), UploadError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());
        self.uploads.lock().unwrap().push(UploadRecord {
            transformer_id: request.transformer_id.clone(),
            inspection_id: request.inspection_id.clone(),
            file_name: request.file.name.clone(),
            size_bytes: request.file.len(),
            uploader_name: request.uploader_name.clone(),
            weather: request.weather,
        });

        let script = self
            .uploads_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(UploadScript::never);
        for (delay, loaded, total) in script.steps {
            tokio::time::sleep(delay).await;
            progress.report(loaded, total);
        }
        tokio::time::sleep(script.settle_after).await;
        match script.result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn update_inspection_status(
        &self,
        inspection_id: &InspectionId,
        status: InspectionStatus,
    ) -> Result<(), FetchError> {
        self.status_updates
            .lock()
            .unwrap()
            .push((inspection_id.clone(), status));
        match self.status_result.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Shell stand-ins
// ============================================================================

#[derive(Default)]
pub struct RecordingNavigator {
    calls: Mutex<Vec<(String, bool)>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str, replace: bool) {
        self.calls.lock().unwrap().push((path.to_string(), replace));
    }
}

pub struct StaticIdentity(pub Option<UserProfile>);

impl StaticIdentity {
    pub fn username(name: &str) -> Arc<Self> {
        Arc::new(Self(Some(UserProfile {
            username: Some(name.to_string()),
            email: None,
        })))
    }

    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self(None))
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserProfile> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct CountingReleaseHook {
    released: Mutex<Vec<(HandleId, ImageOrigin)>>,
}

impl CountingReleaseHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn released(&self) -> Vec<(HandleId, ImageOrigin)> {
        self.released.lock().unwrap().clone()
    }

    pub fn was_released(&self, id: HandleId) -> bool {
        self.released.lock().unwrap().iter().any(|(r, _)| *r == id)
    }
}

impl ReleaseHook for CountingReleaseHook {
    fn on_release(&self, id: HandleId, origin: ImageOrigin) {
        self.released.lock().unwrap().push((id, origin));
    }
}

pub fn capabilities(
    api: &Arc<ScriptedApi>,
    navigator: &Arc<RecordingNavigator>,
    identity: Arc<dyn IdentityProvider>,
) -> Capabilities {
    Capabilities::new(api.clone(), navigator.clone(), identity)
}
