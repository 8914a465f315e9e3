//! Typed access to the annotation backend.
//!
//! Every call takes an explicit [`RequestContext`]; nothing about the base
//! URLs or the session token lives in global state.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::geometry::{GeometryError, GridPoint, polyline_from_value};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated: {0}")]
    Auth(String),

    #[error("Backend answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where to send requests and which token to send along.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub api_base: String,
    pub media_base: String,
    pub token: Option<String>,
}

impl RequestContext {
    pub fn new(api_base: impl Into<String>, media_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            media_base: media_base.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_url(&self, endpoint: &str) -> String {
        join_url(&self.api_base, endpoint)
    }

    pub fn media_url(&self, file: &str) -> String {
        join_url(&self.media_base, file)
    }

    fn authorization(&self) -> Result<String, ApiError> {
        self.token
            .as_deref()
            .map(|token| format!("jwt {token}"))
            .ok_or_else(|| ApiError::Auth("no session token".into()))
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Backend identifiers arrive either as numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Number(id) => write!(f, "{id}"),
            RemoteId::Text(id) => f.write_str(id),
        }
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        RemoteId::Text(id.to_owned())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileDescriptor {
    pub id: RemoteId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserDescriptor {
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum InferenceStatus {
    Failed,
    Error,
    Pending,
    Completed,
    Unknown,
}

impl From<i64> for InferenceStatus {
    fn from(code: i64) -> Self {
        match code {
            0 => InferenceStatus::Failed,
            1 => InferenceStatus::Error,
            2 => InferenceStatus::Pending,
            3 => InferenceStatus::Completed,
            _ => InferenceStatus::Unknown,
        }
    }
}

impl fmt::Display for InferenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InferenceStatus::Failed => "Failed",
            InferenceStatus::Error => "Error",
            InferenceStatus::Pending => "Pending",
            InferenceStatus::Completed => "Completed",
            InferenceStatus::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceSummary {
    pub id: RemoteId,
    pub service: ServiceDescriptor,
    pub user: UserDescriptor,
    pub created_at: String,
    pub status: InferenceStatus,
}

/// Input of one viewport for an inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    pub dicom_file_id: RemoteId,
    pub frame_number: usize,
    #[serde(default)]
    pub start_point: Option<GridPoint>,
    #[serde(default)]
    pub end_point: Option<GridPoint>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub path_1: Value,
    #[serde(default)]
    pub new_contour_1: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceOutput {
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl InferenceOutput {
    pub fn path(&self) -> Result<Vec<GridPoint>, GeometryError> {
        polyline_from_value(&self.metadata.path_1)
    }

    pub fn contour(&self) -> Result<Vec<GridPoint>, GeometryError> {
        polyline_from_value(&self.metadata.new_contour_1)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceRecord {
    pub id: RemoteId,
    #[serde(default)]
    pub params: Vec<InferenceParams>,
    #[serde(default)]
    pub results: Vec<InferenceOutput>,
}

#[derive(Debug, Clone, Serialize)]
struct RunRequest<'a> {
    instances: &'a [InferenceParams],
}

#[derive(Debug, Clone, Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    access: String,
}

#[derive(Debug, Clone, Serialize)]
struct PasswordChange<'a> {
    old_password: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct BackendClient {
    http: Client,
}

impl BackendClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(http: Client) -> Self {
        Self { http }
    }

    /// Exchange credentials for a session token.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> Result<String, ApiError> {
        let response = self
            .http
            .post(ctx.api_url("auth/login/"))
            .json(&Credentials { username, password })
            .send()
            .await?;
        if matches!(
            response.status(),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(ApiError::Auth(format!("login rejected for {username}")));
        }
        let LoginResponse { access } = check(response).await?.json().await?;
        info!(username, "logged in");
        Ok(access)
    }

    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let request = self.http.put(ctx.api_url("auth/password/change/")).json(&PasswordChange {
            old_password,
            new_password,
        });
        self.send(ctx, request).await?;
        Ok(())
    }

    pub async fn list_files(&self, ctx: &RequestContext) -> Result<Vec<FileDescriptor>, ApiError> {
        self.get_page(ctx, "registry/dicom-file/").await
    }

    pub async fn list_services(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<ServiceDescriptor>, ApiError> {
        self.get_page(ctx, "inference/service/").await
    }

    pub async fn list_inferences(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<InferenceSummary>, ApiError> {
        self.get_page(ctx, "inference/").await
    }

    pub async fn get_inference(
        &self,
        ctx: &RequestContext,
        id: &RemoteId,
    ) -> Result<InferenceRecord, ApiError> {
        let request = self.http.get(ctx.api_url(&format!("inference/{id}/")));
        Ok(self.send(ctx, request).await?.json().await?)
    }

    /// Submit one instance per viewport to an inference service.
    pub async fn run_inference(
        &self,
        ctx: &RequestContext,
        service: &str,
        instances: &[InferenceParams],
    ) -> Result<Value, ApiError> {
        let request = self
            .http
            .post(ctx.api_url(&format!("inference/service/{service}/run/")))
            .json(&RunRequest { instances });
        info!(service, instances = instances.len(), "submitting inference run");
        Ok(self.send(ctx, request).await?.json().await?)
    }

    /// Download `<file_id>.dcm` from the media store into `dir`.
    pub async fn download_dicom(
        &self,
        ctx: &RequestContext,
        file_id: &RemoteId,
        dir: &Path,
    ) -> Result<PathBuf, ApiError> {
        let file_name = format!("{file_id}.dcm");
        let request = self.http.get(ctx.media_url(&file_name));
        let bytes = self.send(ctx, request).await?.bytes().await?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "downloaded DICOM file");
        Ok(path)
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
    ) -> Result<Vec<T>, ApiError> {
        let request = self.http.get(ctx.api_url(endpoint));
        let page: Page<T> = self.send(ctx, request).await?.json().await?;
        Ok(page.results)
    }

    async fn send(&self, ctx: &RequestContext, request: RequestBuilder) -> Result<Response, ApiError> {
        let authorization = ctx.authorization()?;
        let response = request
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;
        check(response).await
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Auth(format!("backend answered {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_are_joined_once() {
        let ctx = RequestContext::new("http://host/api/v1/", "http://host/media");
        assert_eq!(ctx.api_url("/inference/"), "http://host/api/v1/inference/");
        assert_eq!(ctx.media_url("12.dcm"), "http://host/media/12.dcm");
    }

    #[test]
    fn token_is_required_for_authenticated_calls() {
        let ctx = RequestContext::new("http://host", "http://host");
        assert!(matches!(ctx.authorization(), Err(ApiError::Auth(_))));
        let ctx = ctx.with_token("abc");
        assert_eq!(ctx.authorization().unwrap(), "jwt abc");
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        // Nothing listens on this address; an attempted request would be an Http error.
        let ctx = RequestContext::new("http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = BackendClient::new().list_inferences(&ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[test]
    fn inference_list_decodes() {
        let page: Page<InferenceSummary> = serde_json::from_value(json!({
            "results": [{
                "id": 7,
                "service": {"name": "angiovision"},
                "user": {"username": "doc"},
                "created_at": "2024-05-01T10:00:00Z",
                "status": 3
            }, {
                "id": "b1",
                "service": {"name": "angiovision"},
                "user": {"username": "doc"},
                "created_at": "2024-05-01T11:00:00Z",
                "status": 9
            }]
        }))
        .unwrap();
        assert_eq!(page.results[0].id, RemoteId::Number(7));
        assert_eq!(page.results[0].status, InferenceStatus::Completed);
        assert_eq!(page.results[1].id.to_string(), "b1");
        assert_eq!(page.results[1].status.to_string(), "Unknown");
    }

    #[test]
    fn inference_record_exposes_polylines() {
        let record: InferenceRecord = serde_json::from_value(json!({
            "id": 3,
            "params": [
                {"dicom_file_id": "a", "frame_number": 2, "start_point": [1, 2], "end_point": [3, 4]},
                {"dicom_file_id": 5, "frame_number": 0}
            ],
            "results": [
                {"metadata": {"path_1": [[1, 1], [2, 2]], "new_contour_1": [[5, 5]]}},
                {"metadata": {}}
            ]
        }))
        .unwrap();
        assert_eq!(record.params[0].start_point, Some(GridPoint::new(1.0, 2.0)));
        assert_eq!(record.params[1].dicom_file_id.to_string(), "5");
        assert_eq!(record.results[0].path().unwrap().len(), 2);
        assert_eq!(record.results[0].contour().unwrap(), vec![GridPoint::new(5.0, 5.0)]);
        assert!(record.results[1].path().unwrap().is_empty());
    }

    #[test]
    fn run_request_serializes_instances() {
        let instances = vec![InferenceParams {
            dicom_file_id: "a".into(),
            frame_number: 4,
            start_point: Some(GridPoint::new(10.0, 20.0)),
            end_point: Some(GridPoint::new(30.0, 40.0)),
        }];
        let body = serde_json::to_value(RunRequest {
            instances: &instances,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"instances": [{
                "dicom_file_id": "a",
                "frame_number": 4,
                "start_point": [10, 20],
                "end_point": [30, 40]
            }]})
        );
    }
}
