use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WorkflowError;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Trims the input and rejects blank or control-character ids.
            pub fn parse(s: &str) -> Option<Self> {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
                    return None;
                }
                Some(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(TransformerId);
typed_id!(InspectionId);
typed_id!(SessionId);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }
}

/// Timestamp as reported by the backend. The API is not consistent about
/// whether it sends epoch millis or ISO-8601 text, so both are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TakenAt {
    EpochMillis(i64),
    Text(String),
}

impl TakenAt {
    pub fn from_local(at: UnixTimeMs) -> Self {
        Self::EpochMillis(i64::try_from(at.0).unwrap_or(i64::MAX))
    }
}

// --- Domain enums ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageRole {
    Baseline,
    CurrentPreview,
    CurrentUploaded,
}

impl ImageRole {
    pub const ALL: [ImageRole; 3] = [
        ImageRole::Baseline,
        ImageRole::CurrentPreview,
        ImageRole::CurrentUploaded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageRole::Baseline => "baseline",
            ImageRole::CurrentPreview => "currentPreview",
            ImageRole::CurrentUploaded => "currentUploaded",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageOrigin {
    LocalPreview,
    Downloaded,
    Uploaded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    #[default]
    Sunny,
    Cloudy,
    Rainy,
    Windy,
}

impl WeatherCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            WeatherCondition::Sunny => "sunny",
            WeatherCondition::Cloudy => "cloudy",
            WeatherCondition::Rainy => "rainy",
            WeatherCondition::Windy => "windy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunny" => Some(Self::Sunny),
            "cloudy" => Some(Self::Cloudy),
            "rainy" => Some(Self::Rainy),
            "windy" => Some(Self::Windy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionStatus {
    #[default]
    InProgress,
    Completed,
}

impl InspectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InspectionStatus::InProgress => "IN_PROGRESS",
            InspectionStatus::Completed => "COMPLETED",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InspectionStatus::InProgress => "Inspection in progress",
            InspectionStatus::Completed => "Inspection completed",
        }
    }
}

// --- Inspection snapshot ---

/// Reference to a remote image, already absolutized against the API base.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(String);

impl ImageRef {
    /// Empty or whitespace-only references count as "no image".
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return None;
        }
        Some(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only result of one metadata fetch. The derived flags are computed
/// at construction and there are no setters; a refetch builds a new value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InspectionSnapshot {
    baseline_image_ref: Option<ImageRef>,
    current_image_ref: Option<ImageRef>,
    baseline_taken_at: Option<TakenAt>,
    current_taken_at: Option<TakenAt>,
    has_baseline: bool,
    has_current: bool,
}

impl InspectionSnapshot {
    pub fn new(
        baseline_image_ref: Option<ImageRef>,
        current_image_ref: Option<ImageRef>,
        baseline_taken_at: Option<TakenAt>,
        current_taken_at: Option<TakenAt>,
    ) -> Self {
        let has_baseline = baseline_image_ref.is_some();
        let has_current = current_image_ref.is_some();
        Self {
            baseline_image_ref,
            current_image_ref,
            baseline_taken_at,
            current_taken_at,
            has_baseline,
            has_current,
        }
    }

    pub fn baseline_image_ref(&self) -> Option<&ImageRef> {
        self.baseline_image_ref.as_ref()
    }

    pub fn current_image_ref(&self) -> Option<&ImageRef> {
        self.current_image_ref.as_ref()
    }

    pub fn baseline_taken_at(&self) -> Option<&TakenAt> {
        self.baseline_taken_at.as_ref()
    }

    pub fn current_taken_at(&self) -> Option<&TakenAt> {
        self.current_taken_at.as_ref()
    }

    pub fn has_baseline(&self) -> bool {
        self.has_baseline
    }

    pub fn has_current(&self) -> bool {
        self.has_current
    }

    pub fn image_ref(&self, role: ImageRole) -> Option<&ImageRef> {
        match role {
            ImageRole::Baseline => self.baseline_image_ref(),
            ImageRole::CurrentPreview | ImageRole::CurrentUploaded => self.current_image_ref(),
        }
    }
}

/// Best-effort baseline lookup used by the capture page header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaselineImage {
    pub url: ImageRef,
    pub taken_at: Option<TakenAt>,
}

// --- Files and identity ---

/// A file chosen by the operator. Bytes are reference counted, so handing
/// the same file to the registry and the transfer does not copy it.
#[derive(Clone)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Image bytes stay out of logs.
impl fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl UserProfile {
    /// Username, falling back to email. Blank values are skipped.
    pub fn display_name(&self) -> Option<&str> {
        [self.username.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// Everything the upload endpoint needs for one attempt.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub transformer_id: TransformerId,
    pub inspection_id: InspectionId,
    pub file: SelectedFile,
    pub uploader_name: String,
    pub weather: WeatherCondition,
}

// --- Routes ---

/// Identifies the inspection page a component is mounted on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InspectionRoute {
    pub inspection_id: InspectionId,
    pub transformer_id: Option<TransformerId>,
}

impl InspectionRoute {
    pub fn new(inspection_id: InspectionId, transformer_id: Option<TransformerId>) -> Self {
        Self {
            inspection_id,
            transformer_id,
        }
    }

    pub fn inspection_path(&self) -> String {
        match &self.transformer_id {
            Some(t) => format!("/transformer/{t}/inspection/{}", self.inspection_id),
            None => format!("/inspection/{}", self.inspection_id),
        }
    }

    pub fn capture_path(&self) -> String {
        format!("{}/thermal-upload", self.inspection_path())
    }
}

/// Route context for the capture page; both ids are required to upload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CaptureContext {
    pub transformer_id: TransformerId,
    pub inspection_id: InspectionId,
}

impl CaptureContext {
    pub fn new(transformer_id: TransformerId, inspection_id: InspectionId) -> Self {
        Self {
            transformer_id,
            inspection_id,
        }
    }

    /// Builds the context from raw route parameters.
    pub fn from_route(
        transformer_id: Option<&str>,
        inspection_id: Option<&str>,
    ) -> Result<Self, WorkflowError> {
        let transformer_id = transformer_id
            .and_then(TransformerId::parse)
            .ok_or(WorkflowError::MissingRouteIds)?;
        let inspection_id = inspection_id
            .and_then(InspectionId::parse)
            .ok_or(WorkflowError::MissingRouteIds)?;
        Ok(Self::new(transformer_id, inspection_id))
    }

    pub fn route(&self) -> InspectionRoute {
        InspectionRoute::new(self.inspection_id.clone(), Some(self.transformer_id.clone()))
    }
}
