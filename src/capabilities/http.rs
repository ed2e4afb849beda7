use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{InspectionApi, ProgressSink};
use crate::config::ControllerConfig;
use crate::error::{DownloadError, FetchError, UploadError};
use crate::model::{
    BaselineImage, ImageRef, InspectionId, InspectionSnapshot, InspectionStatus, TakenAt,
    TransformerId, UploadRequest,
};

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_TIMEOUT_MS: u64 = 600_000;
pub const MAX_HEADER_NAME_LENGTH: usize = 256;
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;
pub const MAX_HEADERS_COUNT: usize = 100;

// ============================================================================
// URL and headers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    scheme: String,
    host: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(HttpError::InvalidUrl {
                url: String::new(),
                reason: "URL cannot be empty".to_string(),
            });
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(&url),
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(&url).map_err(|e| HttpError::InvalidUrl {
            url: Self::truncate_url(&url),
            reason: e.to_string(),
        })?;
        Self::from_url(&parsed)
    }

    pub fn from_url(parsed: &Url) -> Result<Self, HttpError> {
        let scheme = parsed.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(parsed.as_str()),
                reason: format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            });
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl {
                url: Self::truncate_url(parsed.as_str()),
                reason: "URL must have a host".to_string(),
            })?
            .to_lowercase();
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(parsed.as_str()),
                reason: "credentials in URL are not allowed".to_string(),
            });
        }

        Ok(Self {
            url: parsed.to_string(),
            scheme,
            host,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn truncate_url(url: &str) -> String {
        match url.char_indices().nth(100) {
            Some((idx, _)) => format!("{}...", &url[..idx]),
            None => url.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeaders {
    headers: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing header with the same (case-insensitive) name.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HttpError> {
        let name = name.into();
        let value = value.into();
        Self::validate_header_name(&name)?;
        Self::validate_header_value(&name, &value)?;

        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        if self.headers.len() >= MAX_HEADERS_COUNT {
            return Err(HttpError::TooManyHeaders {
                count: self.headers.len(),
                max: MAX_HEADERS_COUNT,
            });
        }
        self.headers.push((name, value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    fn validate_header_name(name: &str) -> Result<(), HttpError> {
        if name.is_empty() {
            return Err(HttpError::InvalidHeader {
                name: String::new(),
                reason: "header name cannot be empty".to_string(),
            });
        }
        if name.len() > MAX_HEADER_NAME_LENGTH {
            return Err(HttpError::InvalidHeader {
                name: name.chars().take(50).collect(),
                reason: format!(
                    "header name exceeds maximum length of {MAX_HEADER_NAME_LENGTH} bytes"
                ),
            });
        }
        if let Some(c) = name
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: format!("invalid character '{c}' in header name"),
            });
        }
        let lower = name.to_ascii_lowercase();
        if lower == "host" || lower == "content-length" || lower == "transfer-encoding" {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: "this header is managed by the transport".to_string(),
            });
        }
        Ok(())
    }

    fn validate_header_value(name: &str, value: &str) -> Result<(), HttpError> {
        if value.len() > MAX_HEADER_VALUE_LENGTH {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: format!(
                    "header value exceeds maximum length of {MAX_HEADER_VALUE_LENGTH} bytes"
                ),
            });
        }
        if value.contains(['\r', '\n', '\0']) {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: "header value contains invalid characters (CR, LF, or NULL)".to_string(),
            });
        }
        Ok(())
    }
}

impl From<Vec<(String, String)>> for HttpHeaders {
    fn from(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
        }
    }

    pub fn has_request_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Json,
    Multipart { boundary: String },
    OctetStream,
    Image,
    Custom(String),
}

impl ContentType {
    pub fn header_value(&self) -> String {
        match self {
            ContentType::Json => "application/json".to_string(),
            ContentType::Multipart { boundary } => {
                format!("multipart/form-data; boundary={boundary}")
            }
            ContentType::OctetStream => "application/octet-stream".to_string(),
            ContentType::Image => "image/*".to_string(),
            ContentType::Custom(s) => s.clone(),
        }
    }

    pub fn from_header(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("application/json") {
            ContentType::Json
        } else if lower.starts_with("multipart/form-data") {
            let boundary = value
                .split(';')
                .filter_map(|p| p.trim().strip_prefix("boundary="))
                .next()
                .unwrap_or_default()
                .trim_matches('"')
                .to_string();
            ContentType::Multipart { boundary }
        } else if lower.starts_with("application/octet-stream") {
            ContentType::OctetStream
        } else if lower.starts_with("image/") {
            ContentType::Image
        } else {
            ContentType::Custom(value.to_string())
        }
    }
}

/// `multipart/form-data` body with text fields and file parts.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: format!("----thermal-{}", uuid::Uuid::new_v4().simple()),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<String>,
        data: Bytes,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type,
            data,
        });
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self.parts.iter().map(|p| p.data.len() + 256).sum();
        let mut out = Vec::with_capacity(payload + self.boundary.len() + 8);
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            let mut disposition =
                format!("Content-Disposition: form-data; name=\"{}\"", escape_quoted(&part.name));
            if let Some(filename) = &part.filename {
                disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
            }
            out.extend_from_slice(disposition.as_bytes());
            out.extend_from_slice(b"\r\n");
            if part.filename.is_some() {
                let content_type = part
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream");
                out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        out
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    method: HttpMethod,
    url: ValidatedUrl,
    headers: HttpHeaders,
    body: Option<Vec<u8>>,
    timeout_ms: u64,
    request_id: String,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: ValidatedUrl) -> Self {
        Self {
            method,
            url,
            headers: HttpHeaders::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn get(url: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self::new(HttpMethod::Get, ValidatedUrl::new(url)?))
    }

    pub fn post(url: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self::new(HttpMethod::Post, ValidatedUrl::new(url)?))
    }

    pub fn patch(url: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self::new(HttpMethod::Patch, ValidatedUrl::new(url)?))
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, HttpError> {
        self.headers.insert(name, value)?;
        Ok(self)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Result<Self, HttpError> {
        if !self.method.has_request_body() {
            return Err(HttpError::InvalidRequest {
                reason: format!("{} requests cannot have a body", self.method.as_str()),
            });
        }
        if body.len() > MAX_REQUEST_BODY_SIZE {
            return Err(HttpError::BodyTooLarge {
                size: body.len(),
                max: MAX_REQUEST_BODY_SIZE,
            });
        }
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_vec(value).map_err(|e| HttpError::SerializationError {
            message: e.to_string(),
        })?;
        self.with_body(body)?
            .with_header("Content-Type", ContentType::Json.header_value())
    }

    pub fn with_multipart(self, form: &MultipartForm) -> Result<Self, HttpError> {
        let content_type = ContentType::Multipart {
            boundary: form.boundary().to_string(),
        };
        self.with_body(form.encode())?
            .with_header("Content-Type", content_type.header_value())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HttpError> {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 {
            return Err(HttpError::InvalidRequest {
                reason: "timeout cannot be zero".to_string(),
            });
        }
        if ms > MAX_TIMEOUT_MS {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout exceeds maximum of {MAX_TIMEOUT_MS}ms"),
            });
        }
        self.timeout_ms = ms;
        Ok(self)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &ValidatedUrl {
        &self.url
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

// ============================================================================
// Responses and errors
// ============================================================================

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("too many headers: {count} exceeds maximum of {max}")]
    TooManyHeaders { count: usize, max: usize },

    #[error("request body too large: {size} bytes exceeds maximum of {max} bytes")]
    BodyTooLarge { size: usize, max: usize },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("connection failed to {host}: {message}")]
    ConnectionError { host: String, message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("request cancelled")]
    Cancelled { request_id: String },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String, request_id: String },
}

impl HttpError {
    /// Failed on the wire, as opposed to while building the request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HttpError::ConnectionError { .. }
                | HttpError::Timeout { .. }
                | HttpError::Cancelled { .. }
                | HttpError::InvalidResponse { .. }
        )
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            HttpError::Timeout { request_id, .. }
            | HttpError::Cancelled { request_id }
            | HttpError::InvalidResponse { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: HttpHeaders,
    body: Vec<u8>,
    request_id: String,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HttpHeaders, body: Vec<u8>, request_id: String) -> Self {
        Self {
            status,
            headers,
            body,
            request_id,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.headers.get("content-type").map(ContentType::from_header)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::InvalidResponse {
            reason: format!("failed to parse JSON: {e}"),
            request_id: self.request_id.clone(),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

pub type HttpResult = Result<HttpResponse, HttpError>;

/// The shell's HTTP client. Non-2xx statuses are returned as responses, not
/// errors. Upload progress, when the client can observe it, goes to
/// `progress`.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest, progress: Option<ProgressSink>) -> HttpResult;
}

// ============================================================================
// HTTP-backed inspection API
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotBody {
    #[serde(default)]
    baseline_image: Option<String>,
    #[serde(default)]
    current_image: Option<String>,
    #[serde(default)]
    baseline_timestamp: Option<TakenAt>,
    #[serde(default)]
    current_timestamp: Option<TakenAt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BaselineBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    uploaded_at: Option<TakenAt>,
    #[serde(default)]
    created_at: Option<TakenAt>,
    #[serde(default)]
    taken_at: Option<TakenAt>,
}

#[derive(Debug, Serialize)]
struct StatusPatch {
    status: InspectionStatus,
}

pub struct HttpInspectionApi<T> {
    transport: T,
    base: Url,
    timeout: Duration,
}

impl<T: HttpTransport> HttpInspectionApi<T> {
    pub fn new(transport: T, config: &ControllerConfig) -> Result<Self, HttpError> {
        let base = Url::parse(&config.api_base).map_err(|e| HttpError::InvalidUrl {
            url: config.api_base.clone(),
            reason: e.to_string(),
        })?;
        ValidatedUrl::from_url(&base)?;
        Ok(Self {
            transport,
            base,
            timeout: config.request_timeout(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves an image reference from the backend. Relative paths are
    /// joined onto the API base; blank references mean "no image".
    pub fn absolutize(&self, raw: Option<&str>) -> Option<ImageRef> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        let resolved = match Url::parse(raw) {
            Ok(absolute) => absolute.to_string(),
            Err(_) => self
                .base
                .join(raw)
                .map_or_else(|_| raw.to_string(), |u| u.to_string()),
        };
        ImageRef::new(resolved)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HttpError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| HttpError::InvalidUrl {
                url: self.base.to_string(),
                reason: "API base cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: HttpMethod, url: &Url) -> Result<HttpRequest, HttpError> {
        HttpRequest::new(method, ValidatedUrl::from_url(url)?).with_timeout(self.timeout)
    }
}

fn fetch_error(error: HttpError) -> FetchError {
    match error {
        HttpError::InvalidResponse { reason, .. } => FetchError::InvalidResponse { reason },
        other => FetchError::Network {
            message: other.to_string(),
        },
    }
}

fn status_error(status: u16) -> FetchError {
    if status == 404 {
        FetchError::NotFound
    } else {
        FetchError::Http { status }
    }
}

#[async_trait::async_trait]
impl<T: HttpTransport> InspectionApi for HttpInspectionApi<T> {
    #[instrument(skip(self), fields(inspection = %inspection_id))]
    async fn fetch_inspection_snapshot(
        &self,
        inspection_id: &InspectionId,
        transformer_id: Option<&TransformerId>,
    ) -> Result<InspectionSnapshot, FetchError> {
        let mut url = self.endpoint(&["api", "get-inspection"]).map_err(fetch_error)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("inspectionId", inspection_id.as_str());
            if let Some(transformer) = transformer_id {
                query.append_pair("transformerNo", transformer.as_str());
            }
        }
        let request = self
            .request(HttpMethod::Get, &url)
            .and_then(|r| r.with_header("Accept", "application/json"))
            .map_err(fetch_error)?;

        let response = self.transport.execute(request, None).await.map_err(fetch_error)?;
        if !response.is_success() {
            return Err(status_error(response.status()));
        }
        let body: SnapshotBody = response.json().map_err(fetch_error)?;
        Ok(InspectionSnapshot::new(
            self.absolutize(body.baseline_image.as_deref()),
            self.absolutize(body.current_image.as_deref()),
            body.baseline_timestamp,
            body.current_timestamp,
        ))
    }

    #[instrument(skip(self), fields(image = %image))]
    async fn download_image_bytes(&self, image: &ImageRef) -> Result<Bytes, DownloadError> {
        let request = HttpRequest::get(image.as_str())
            .and_then(|r| r.with_timeout(self.timeout))
            .and_then(|r| r.with_header("Accept", ContentType::Image.header_value()))
            .map_err(|e| DownloadError::Network {
                message: e.to_string(),
            })?;
        let response = self
            .transport
            .execute(request, None)
            .await
            .map_err(|e| DownloadError::Network {
                message: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(DownloadError::Http {
                status: response.status(),
            });
        }
        debug!(size_bytes = response.body().len(), "image downloaded");
        Ok(Bytes::from(response.into_body()))
    }

    #[instrument(skip(self), fields(transformer = %transformer_id))]
    async fn fetch_baseline_image(
        &self,
        transformer_id: &TransformerId,
    ) -> Result<Option<BaselineImage>, FetchError> {
        let url = self
            .endpoint(&["api", "transformers", transformer_id.as_str(), "baseline"])
            .map_err(fetch_error)?;
        let request = self.request(HttpMethod::Get, &url).map_err(fetch_error)?;
        let response = self.transport.execute(request, None).await.map_err(fetch_error)?;
        if response.status() == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(status_error(response.status()));
        }
        let body: BaselineBody = response.json().map_err(fetch_error)?;
        Ok(self.absolutize(body.url.as_deref()).map(|url| BaselineImage {
            url,
            taken_at: body.uploaded_at.or(body.created_at).or(body.taken_at),
        }))
    }

    #[instrument(skip(self, request, progress), fields(
        transformer = %request.transformer_id,
        inspection = %request.inspection_id,
        size_bytes = request.file.len(),
    ))]
    async fn upload_thermal_image(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> Result<(), UploadError> {
        let transport_error = |e: HttpError| UploadError::Transport {
            message: e.to_string(),
        };
        let mut url = self
            .endpoint(&["api", "upload-thermal-image"])
            .map_err(transport_error)?;
        url.query_pairs_mut()
            .append_pair("transformer_id", request.transformer_id.as_str())
            .append_pair("inspection_no", request.inspection_id.as_str());

        let form = MultipartForm::new()
            .file(
                "file",
                request.file.name.clone(),
                request.file.content_type.clone(),
                request.file.bytes.clone(),
            )
            .text("uploaderName", request.uploader_name.clone())
            .text("weatherCondition", request.weather.as_str());
        let http_request = self
            .request(HttpMethod::Post, &url)
            .and_then(|r| r.with_multipart(&form))
            .map_err(transport_error)?;

        let response = self
            .transport
            .execute(http_request, Some(progress))
            .await
            .map_err(transport_error)?;
        if !response.is_success() {
            warn!(status = response.status(), "upload rejected");
            return Err(UploadError::Rejected {
                status: response.status(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(inspection = %inspection_id))]
    async fn update_inspection_status(
        &self,
        inspection_id: &InspectionId,
        status: InspectionStatus,
    ) -> Result<(), FetchError> {
        let url = self
            .endpoint(&["api", "inspections", inspection_id.as_str()])
            .map_err(fetch_error)?;
        let request = self
            .request(HttpMethod::Patch, &url)
            .and_then(|r| r.with_json(&StatusPatch { status }))
            .map_err(fetch_error)?;
        let response = self.transport.execute(request, None).await.map_err(fetch_error)?;
        if !response.is_success() {
            return Err(status_error(response.status()));
        }
        Ok(())
    }
}
