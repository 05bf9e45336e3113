//! Common test utilities: an in-process fake of the B2 native API and a
//! test server running the real router against it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use furniar::config::{
    AppConfig, LoggingConfig, RetryConfig, ServerConfig, StorageConfig, UploadConfig,
};
use furniar::storage::{KeyStyle, ReferenceMode, content_sha1};
use furniar::{AppState, build_router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const BUCKET_NAME: &str = "furniar-assets";
pub const BUCKET_ID: &str = "4a48fe8875c6214145260818";
pub const KEY_ID: &str = "0012ab34cd56";
pub const APPLICATION_KEY: &str = "K001-super-secret-application-key";
pub const DOWNLOAD_TOKEN: &str = "download-token/xyz";

/// Scriptable failure modes of the fake service
#[derive(Debug, Default)]
pub struct Behavior {
    /// Answer 401 `unauthorized` to every authorization
    pub reject_credentials: bool,
    /// Answer 503 to this many authorizations before succeeding
    pub authorize_outages: usize,
    /// Answer 401 `unauthorized` to bucket listing (restricted key)
    pub deny_listing: bool,
    /// Answer 401 `expired_auth_token` to this many bucket listings
    pub expire_listing: usize,
    /// Answer 401 `expired_auth_token` to this many upload URL requests
    pub expire_upload_url: usize,
    /// Answer 401 `expired_auth_token` to this many uploads
    pub expire_uploads: usize,
    /// Answer every upload with this status
    pub reject_uploads_with: Option<u16>,
    /// Sleep before answering uploads
    pub upload_delay: Option<Duration>,
}

/// An upload as the fake service received it
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    pub sha1_header: String,
    pub body: Vec<u8>,
    pub upload_token: String,
}

#[derive(Debug, Default)]
pub struct FakeB2State {
    pub base_url: String,
    pub behavior: Mutex<Behavior>,
    pub authorize_calls: AtomicUsize,
    pub list_bucket_calls: AtomicUsize,
    pub upload_url_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub download_auth_calls: AtomicUsize,
    pub download_prefixes: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<RecordedUpload>>,
    pub last_authorization_header: Mutex<Option<String>>,
}

impl FakeB2State {
    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn list_bucket_calls(&self) -> usize {
        self.list_bucket_calls.load(Ordering::SeqCst)
    }

    pub fn upload_url_calls(&self) -> usize {
        self.upload_url_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn download_auth_calls(&self) -> usize {
        self.download_auth_calls.load(Ordering::SeqCst)
    }

    pub fn download_prefixes(&self) -> Vec<String> {
        self.download_prefixes.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

/// Fake B2 service bound to an ephemeral port
pub struct FakeB2 {
    pub url: String,
    pub state: Arc<FakeB2State>,
}

impl FakeB2 {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(FakeB2State {
            base_url: url.clone(),
            behavior: Mutex::new(behavior),
            ..Default::default()
        });

        let app = Router::new()
            .route("/b2api/v2/b2_authorize_account", get(authorize_account))
            .route("/b2api/v2/b2_list_buckets", post(list_buckets))
            .route("/b2api/v2/b2_get_upload_url", post(get_upload_url))
            .route(
                "/b2api/v2/b2_get_download_authorization",
                post(get_download_authorization),
            )
            .route("/upload/:bucket_id", post(upload_file))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state }
    }

    pub fn behave(&self, change: impl FnOnce(&mut Behavior)) {
        change(&mut self.state.behavior.lock().unwrap());
    }

    /// Storage configuration pointing at this fake
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            service_url: self.url.clone(),
            key_id: Some(KEY_ID.to_string()),
            application_key: Some(APPLICATION_KEY.to_string()),
            bucket_name: BUCKET_NAME.to_string(),
            bucket_id: None,
            reference_mode: ReferenceMode::Url,
            key_style: KeyStyle::Random,
            request_timeout_seconds: 5,
            upload_timeout_seconds: 10,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        }
    }
}

fn b2_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "status": status.as_u16(),
            "code": code,
            "message": message,
        })),
    )
        .into_response()
}

fn expired_token() -> Response {
    b2_error(
        StatusCode::UNAUTHORIZED,
        "expired_auth_token",
        "Authorization token has expired",
    )
}

/// Take one scripted failure from `counter`, if any remain
fn take(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn authorize_account(
    State(state): State<Arc<FakeB2State>>,
    headers: HeaderMap,
) -> Response {
    let call = state.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
    *state.last_authorization_header.lock().unwrap() = Some(header(&headers, "authorization"));

    {
        let mut behavior = state.behavior.lock().unwrap();
        if behavior.reject_credentials {
            return b2_error(StatusCode::UNAUTHORIZED, "unauthorized", "bad key");
        }
        if behavior.authorize_outages > 0 {
            behavior.authorize_outages -= 1;
            return b2_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "try again later",
            );
        }
    }

    Json(json!({
        "accountId": "account-1",
        "authorizationToken": format!("account-token-{call}"),
        "apiUrl": state.base_url,
        "downloadUrl": state.base_url,
        "recommendedPartSize": 100000000,
    }))
    .into_response()
}

async fn list_buckets(
    State(state): State<Arc<FakeB2State>>,
    Json(request): Json<Value>,
) -> Response {
    state.list_bucket_calls.fetch_add(1, Ordering::SeqCst);

    {
        let mut behavior = state.behavior.lock().unwrap();
        if behavior.deny_listing {
            return b2_error(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "not entitled to listBuckets",
            );
        }
        if take(&mut behavior.expire_listing) {
            return expired_token();
        }
    }

    let buckets: Vec<Value> = if request["bucketName"] == BUCKET_NAME {
        vec![json!({
            "accountId": "account-1",
            "bucketId": BUCKET_ID,
            "bucketName": BUCKET_NAME,
            "bucketType": "allPrivate",
        })]
    } else {
        Vec::new()
    };

    Json(json!({ "buckets": buckets })).into_response()
}

async fn get_upload_url(
    State(state): State<Arc<FakeB2State>>,
    Json(request): Json<Value>,
) -> Response {
    let call = state.upload_url_calls.fetch_add(1, Ordering::SeqCst) + 1;

    if take(&mut state.behavior.lock().unwrap().expire_upload_url) {
        return expired_token();
    }

    let Some(bucket_id) = request["bucketId"].as_str() else {
        return b2_error(StatusCode::BAD_REQUEST, "bad_request", "bucketId missing");
    };
    if bucket_id != BUCKET_ID {
        return b2_error(StatusCode::BAD_REQUEST, "bad_bucket_id", "no such bucket");
    }

    Json(json!({
        "bucketId": bucket_id,
        "uploadUrl": format!("{}/upload/{}", state.base_url, bucket_id),
        "authorizationToken": format!("upload-token-{call}"),
    }))
    .into_response()
}

async fn upload_file(
    State(state): State<Arc<FakeB2State>>,
    Path(bucket_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.upload_calls.fetch_add(1, Ordering::SeqCst);

    let (delay, reject) = {
        let mut behavior = state.behavior.lock().unwrap();
        if take(&mut behavior.expire_uploads) {
            return expired_token();
        }
        (behavior.upload_delay, behavior.reject_uploads_with)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = reject {
        let status = StatusCode::from_u16(status).unwrap();
        return b2_error(status, "rejected", "upload rejected by test");
    }

    let sha1_header = header(&headers, "x-bz-content-sha1");
    if sha1_header != content_sha1(&body) {
        return b2_error(StatusCode::BAD_REQUEST, "bad_request", "Sha1 did not match data received");
    }

    let file_name = urlencoding::decode(&header(&headers, "x-bz-file-name"))
        .unwrap()
        .into_owned();
    let content_type = header(&headers, "content-type");
    let upload = RecordedUpload {
        bucket_id: bucket_id.clone(),
        file_name: file_name.clone(),
        content_type: content_type.clone(),
        sha1_header: sha1_header.clone(),
        body: body.to_vec(),
        upload_token: header(&headers, "authorization"),
    };
    let file_id = {
        let mut uploads = state.uploads.lock().unwrap();
        uploads.push(upload);
        format!("4_z{}_f{}", bucket_id, uploads.len())
    };

    Json(json!({
        "accountId": "account-1",
        "action": "upload",
        "bucketId": bucket_id,
        "contentLength": body.len(),
        "contentSha1": sha1_header,
        "contentType": content_type,
        "fileId": file_id,
        "fileName": file_name,
    }))
    .into_response()
}

async fn get_download_authorization(
    State(state): State<Arc<FakeB2State>>,
    Json(request): Json<Value>,
) -> Response {
    state.download_auth_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(prefix) = request["fileNamePrefix"].as_str() {
        state.download_prefixes.lock().unwrap().push(prefix.to_string());
    }

    Json(json!({
        "bucketId": request["bucketId"],
        "fileNamePrefix": request["fileNamePrefix"],
        "authorizationToken": DOWNLOAD_TOKEN,
    }))
    .into_response()
}

/// Application configuration for route tests
pub fn app_config(storage: StorageConfig) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: Vec::new(),
        },
        storage,
        upload: UploadConfig {
            max_bytes: 64 * 1024,
            allowed_content_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
                "model/gltf-binary".to_string(),
                "model/vnd.usdz+zip".to_string(),
            ],
            default_folder: "products".to_string(),
            allowed_folders: vec![
                "products".to_string(),
                "ar-models".to_string(),
                "logos".to_string(),
            ],
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub b2: FakeB2,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default configuration
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        furniar::metrics::init_metrics();

        let b2 = FakeB2::start().await;
        let mut config = app_config(b2.storage_config());
        adjust(&mut config);

        let state = AppState::new(config).unwrap();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            b2,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// POST a single file to `/api/upload`
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
        folder: Option<&str>,
    ) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .unwrap();
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(folder) = folder {
            form = form.text("folder", folder.to_string());
        }

        self.client
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

/// Small payload standing in for a product photo
pub fn png_bytes() -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    data.extend((0..2048).map(|i| (i % 251) as u8));
    data
}
