//! Upload and image-resource lifecycle controller for thermal inspections.
//!
//! The shell embeds this core and supplies the collaborators in
//! [`capabilities`]. Two page-level controllers are exposed:
//!
//! * [`InspectionImagePresenter`] loads an inspection's baseline and current
//!   images and decides between the comparison view, the capture affordance
//!   and a redirect to the capture page.
//! * [`CaptureWorkflow`] uploads a newly captured image with blended,
//!   monotonic progress, then completes the inspection and navigates back.
//!
//! All image bytes live in an [`ImageHandleRegistry`]; views only ever see
//! [`HandleRef`]s.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod capabilities;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod presenter;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod workflow;

pub use capabilities::{
    AnonymousIdentity, Capabilities, IdentityProvider, InspectionApi, Navigator, ProgressSink,
    TransferProgress,
};
pub use config::ControllerConfig;
pub use error::{
    ConfigError, DownloadError, ErrorKind, FetchError, TransitionError, UploadError, WorkflowError,
};
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use model::{
    BaselineImage, CaptureContext, ImageOrigin, ImageRef, ImageRole, InspectionId,
    InspectionRoute, InspectionSnapshot, InspectionStatus, SelectedFile, SessionId, TakenAt,
    TransformerId, UnixTimeMs, UploadRequest, UserProfile, WeatherCondition,
};
pub use presenter::{ImageSlot, InspectionImagePresenter, PresenterDecision, PresenterView};
pub use progress::{ProgressEstimator, ProgressSample, ProgressSource};
pub use registry::{HandleId, HandleRef, ImageHandle, ImageHandleRegistry, ReleaseHook};
pub use session::{UploadOutcome, UploadSession, UploadState};
pub use workflow::{CaptureStatus, CaptureView, CaptureWorkflow};
