//! Remote API gateway.
//!
//! Stateless request/response client for the enforcement API. Every call is
//! one authenticated request with a bounded wait; transport errors, non-2xx
//! responses and unreadable bodies all come back as `GatewayError`. The
//! gateway never touches the local queue.

use std::future::Future;
use std::time::Duration;

use reqwest::{multipart, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ApiConfig, Endpoints};
use crate::models::RecordKind;
use crate::util::{compact_text, normalize_text_option};

/// Header carrying `"<kind>:<local_id>"` so the remote can drop duplicate retries
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote unreachable: {0}")]
    Unreachable(String),
    #[error("Remote request timed out")]
    Timeout,
    #[error("{message} ({status})")]
    Status { status: u16, message: String },
    #[error("Malformed response body: {0}")]
    MalformedBody(String),
}

impl GatewayError {
    /// Unreachable, timed out or a 5xx response
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidConfiguration(_) | Self::MalformedBody(_) => false,
        }
    }

    /// HTTP status when the remote answered with a non-2xx code
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::MalformedBody(error.to_string())
        } else if error.is_builder() {
            Self::InvalidConfiguration(error.to_string())
        } else {
            Self::Unreachable(error.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A photo attached to an already created infraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Photo {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Remote operations used by the sync engine
pub trait RemoteGateway: Send + Sync {
    /// Look up a registered vehicle by plate
    fn search_vehicle(&self, plate: &str) -> impl Future<Output = GatewayResult<Value>> + Send;

    fn register_vehicle(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> impl Future<Output = GatewayResult<Value>> + Send;

    fn create_ticket(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> impl Future<Output = GatewayResult<Value>> + Send;

    fn create_infraction(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> impl Future<Output = GatewayResult<Value>> + Send;

    /// Attach photos to an infraction; returns the stored photo URLs
    fn upload_infraction_photos(
        &self,
        infraction_id: u64,
        photos: Vec<Photo>,
    ) -> impl Future<Output = GatewayResult<Vec<String>>> + Send;
}

/// Submit `payload` through the operation matching `kind`
pub async fn submit<G: RemoteGateway>(
    gateway: &G,
    kind: RecordKind,
    payload: &Value,
    idempotency_key: &str,
) -> GatewayResult<Value> {
    match kind {
        RecordKind::Vehicle => gateway.register_vehicle(payload, idempotency_key).await,
        RecordKind::Ticket => gateway.create_ticket(payload, idempotency_key).await,
        RecordKind::Infraction => gateway.create_infraction(payload, idempotency_key).await,
    }
}

/// `RemoteGateway` over HTTP with bearer auth and JSON bodies
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    auth_token: Option<String>,
    endpoints: Endpoints,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    pub fn new(config: &ApiConfig) -> GatewayResult<Self> {
        Self::with_timeout(config, config.timeout())
    }

    pub fn with_timeout(config: &ApiConfig, timeout: Duration) -> GatewayResult<Self> {
        let base_url = config
            .normalized_base_url()
            .map_err(|error| GatewayError::InvalidConfiguration(error.to_string()))?;
        if timeout.is_zero() {
            return Err(GatewayError::InvalidConfiguration(
                "request timeout must be positive".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GatewayError::InvalidConfiguration(error.to_string()))?;

        Ok(Self {
            base_url,
            auth_token: normalize_text_option(config.auth_token.clone()),
            endpoints: config.endpoints.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json(
        &self,
        path: &str,
        payload: &Value,
        idempotency_key: &str,
    ) -> GatewayResult<Value> {
        let request = self
            .client
            .post(self.url(path))
            .header("Accept", "application/json")
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload);

        tracing::debug!(path, idempotency_key, "Submitting to remote");
        send(self.authorize(request)).await
    }
}

impl RemoteGateway for HttpGateway {
    async fn search_vehicle(&self, plate: &str) -> GatewayResult<Value> {
        let url = format!(
            "{}?plate={}",
            self.url(&self.endpoints.vehicle_search),
            urlencoding::encode(plate)
        );
        let request = self.client.get(url).header("Accept", "application/json");
        send(self.authorize(request)).await
    }

    async fn register_vehicle(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> GatewayResult<Value> {
        self.post_json(&self.endpoints.vehicle_register, payload, idempotency_key)
            .await
    }

    async fn create_ticket(&self, payload: &Value, idempotency_key: &str) -> GatewayResult<Value> {
        self.post_json(&self.endpoints.ticket_create, payload, idempotency_key)
            .await
    }

    async fn create_infraction(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> GatewayResult<Value> {
        self.post_json(&self.endpoints.infraction_create, payload, idempotency_key)
            .await
    }

    async fn upload_infraction_photos(
        &self,
        infraction_id: u64,
        photos: Vec<Photo>,
    ) -> GatewayResult<Vec<String>> {
        if photos.is_empty() {
            return Err(GatewayError::InvalidConfiguration(
                "at least one photo is required".to_string(),
            ));
        }

        let mut form = multipart::Form::new();
        for (index, photo) in photos.into_iter().enumerate() {
            let part = multipart::Part::bytes(photo.bytes)
                .file_name(photo.file_name)
                .mime_str(&photo.mime_type)
                .map_err(|error| GatewayError::InvalidConfiguration(error.to_string()))?;
            form = form.part(format!("photo_{index}"), part);
        }

        let url = format!(
            "{}/{infraction_id}",
            self.url(&self.endpoints.infraction_photos).trim_end_matches('/')
        );
        let request = self.client.post(url).multipart(form);
        let body = send(self.authorize(request)).await?;

        parse_photo_urls(body)
    }
}

async fn send(request: RequestBuilder) -> GatewayResult<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(GatewayError::Status {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|error| GatewayError::MalformedBody(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

/// Accepts either a bare URL list or `{"urls": [...]}`
fn parse_photo_urls(body: Value) -> GatewayResult<Vec<String>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PhotoUrls {
        List(Vec<String>),
        Wrapped { urls: Vec<String> },
    }

    match serde_json::from_value::<PhotoUrls>(body) {
        Ok(PhotoUrls::List(urls) | PhotoUrls::Wrapped { urls }) => Ok(urls),
        Err(error) => Err(GatewayError::MalformedBody(error.to_string())),
    }
}
