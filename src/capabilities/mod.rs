//! Contracts for the collaborators the controllers consume.
//!
//! The shell supplies implementations: an [`InspectionApi`] (usually
//! [`http::HttpInspectionApi`] over the shell's HTTP client), a
//! [`Navigator`] for route changes and an [`IdentityProvider`] for the
//! signed-in user.

pub mod http;

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::error::{DownloadError, FetchError, UploadError};
use crate::model::{
    BaselineImage, ImageRef, InspectionId, InspectionSnapshot, InspectionStatus, TransformerId,
    UploadRequest, UserProfile,
};

pub use self::http::{
    HttpError, HttpInspectionApi, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    MultipartForm,
};

/// `(loaded, total)` reported by an in-flight transfer. `total` is `None`
/// when the length is not computable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }
}

/// Callback an upload reports progress through.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(TransferProgress) + Send + Sync>);

impl ProgressSink {
    pub fn new(f: impl Fn(TransferProgress) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, loaded: u64, total: Option<u64>) {
        (self.0)(TransferProgress::new(loaded, total));
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}

#[async_trait::async_trait]
pub trait InspectionApi: Send + Sync {
    async fn fetch_inspection_snapshot(
        &self,
        inspection_id: &InspectionId,
        transformer_id: Option<&TransformerId>,
    ) -> Result<InspectionSnapshot, FetchError>;

    async fn download_image_bytes(&self, image: &ImageRef) -> Result<Bytes, DownloadError>;

    /// Best-effort; callers treat any error as "no baseline preview".
    async fn fetch_baseline_image(
        &self,
        transformer_id: &TransformerId,
    ) -> Result<Option<BaselineImage>, FetchError>;

    /// Dropping the returned future cancels the transfer.
    async fn upload_thermal_image(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> Result<(), UploadError>;

    async fn update_inspection_status(
        &self,
        inspection_id: &InspectionId,
        status: InspectionStatus,
    ) -> Result<(), FetchError>;
}

pub trait Navigator: Send + Sync {
    /// `replace` swaps the current history entry instead of pushing one.
    fn navigate(&self, path: &str, replace: bool);
}

pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserProfile>;
}

/// Signed-out shells and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousIdentity;

impl IdentityProvider for AnonymousIdentity {
    fn current_user(&self) -> Option<UserProfile> {
        None
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub api: Arc<dyn InspectionApi>,
    pub navigator: Arc<dyn Navigator>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Capabilities {
    pub fn new(
        api: Arc<dyn InspectionApi>,
        navigator: Arc<dyn Navigator>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            api,
            navigator,
            identity,
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
