#![forbid(unsafe_code)]

//! Axum server in front of the drive index.
//!
//! Listing, search and watch requests are answered from the remote drive API;
//! every item name is run through the metadata engine before it is returned.
//! Short links live in a local SQLite file. Anything that is not an API route
//! is served from the static front-end in `www_root`.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use drive_index::config::{RuntimeOverrides, RuntimeSettings, SiteConfig, resolve_runtime_settings};
use drive_index::drive::{
    DriveApi, DriveError, GraphClient, ItemRef, Listing, ListedItem, PageRequest, ThumbnailSize,
    VideoFolder, encode_path, find_video_folder, list_path, search_items,
};
use drive_index::links::{LINKS_DB_FILE, LinkStore};
use drive_index::names::{FileTypeClassification, NameDisplay, classify_file_type, describe_name};
use drive_index::watch::{folder_downloads, load_watch_page};
use mime_guess::MimeGuess;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Raw files below this size may be streamed through the server.
const PROXY_LIMIT: u64 = 4 * 1024 * 1024;
const UNRESOLVED_ROUTE: &str = "[...path]";

#[derive(Debug, Clone)]
struct BackendArgs {
    settings: RuntimeSettings,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    /// Accepts `--flag value` and `--flag=value`.
    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| anyhow!("{flag} requires a value"))
            };
            match flag.as_str() {
                "--data-root" => overrides.data_root = Some(PathBuf::from(value()?)),
                "--www-root" => overrides.www_root = Some(PathBuf::from(value()?)),
                "--site-config" => overrides.site_config = Some(PathBuf::from(value()?)),
                "--env-file" => overrides.env_path = Some(PathBuf::from(value()?)),
                "--port" => overrides.port = Some(parse_port_arg(&value()?)?),
                "--host" => {
                    let host = value()?;
                    parse_host_arg(&host)?;
                    overrides.host = Some(host);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(overrides)?;
        let listen_host = parse_host_arg(&settings.host)?;
        Ok(Self {
            settings,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/INDEX_HOST")
}

/// Shared state handed to every handler.
///
/// * `drive` talks to the storage vendor; calls block and run on the
///   blocking pool.
/// * `video_folders` remembers public `/watch?v=` lookups.
#[derive(Clone)]
struct AppState {
    drive: Arc<dyn DriveApi>,
    site: Arc<SiteConfig>,
    links: Arc<LinkStore>,
    www_root: Arc<PathBuf>,
    has_token: bool,
    video_folders: Arc<RwLock<HashMap<String, VideoFolder>>>,
}

impl AppState {
    fn require_token(&self) -> ApiResult<()> {
        if self.has_token {
            Ok(())
        } else {
            Err(ApiError::forbidden("No access token."))
        }
    }

    async fn run_drive<T, F>(&self, job: F) -> ApiResult<T>
    where
        F: FnOnce(&dyn DriveApi, &SiteConfig) -> Result<T, DriveError> + Send + 'static,
        T: Send + 'static,
    {
        let drive = Arc::clone(&self.drive);
        let site = Arc::clone(&self.site);
        tokio::task::spawn_blocking(move || job(drive.as_ref(), &site))
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?
            .map_err(ApiError::from)
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<DriveError> for ApiError {
    fn from(err: DriveError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        warn!(status = status.as_u16(), error = %err, "drive request failed");
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `true` only for an explicit `true`/`1`.
fn flag(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true") | Some("1"))
}

/// Percent-encodes each segment of a front-end path for a `Location` header.
fn location_for(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("/{}", segments.join("/"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drive_index=info,backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let BackendArgs {
        settings,
        listen_host,
    } = BackendArgs::parse()?;

    let site = SiteConfig::load(&settings.site_config)?;
    if site.drives_public.is_empty() && site.drives_members.is_empty() {
        warn!(path = %settings.site_config.display(), "no drives configured");
    }
    let links = LinkStore::open(&settings.data_root.join(LINKS_DB_FILE))
        .await
        .context("initializing short link store")?;

    let has_token = !settings.access_token.is_empty();
    if !has_token {
        warn!("DRIVE_ACCESS_TOKEN is empty; drive endpoints will answer 403");
    }
    let drive = GraphClient::new(settings.graph_api.clone(), settings.access_token.clone());

    let state = AppState {
        drive: Arc::new(drive),
        site: Arc::new(site),
        links: Arc::new(links),
        www_root: Arc::new(settings.www_root.clone()),
        has_token,
        video_folders: Arc::new(RwLock::new(HashMap::new())),
    };

    let addr = SocketAddr::new(listen_host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(list_items))
        .route("/api/", get(list_items))
        .route("/api/raw", get(raw_item))
        .route("/api/raw/", get(raw_item))
        .route("/api/thumbnail", get(thumbnail))
        .route("/api/thumbnail/", get(thumbnail))
        .route("/api/search", get(search))
        .route("/api/search/", get(search))
        .route("/api/watch", get(watch_data))
        .route("/api/watch/", get(watch_data))
        .route("/api/shorten", post(shorten))
        .route("/api/describe", get(describe))
        .route("/watch", get(watch_redirect))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", err);
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    path: Option<String>,
    members: Option<String>,
    next: Option<String>,
    sort: Option<String>,
}

async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let path = query.path.unwrap_or_else(|| "/".to_string());
    if path == UNRESOLVED_ROUTE {
        return Err(ApiError::bad_request("No path specified."));
    }
    state.require_token()?;

    let include_members = flag(query.members.as_deref());
    let page = PageRequest {
        top: Some(state.site.max_items),
        skip_token: query.next.filter(|next| !next.is_empty()),
        order_by: query.sort.filter(|sort| !sort.is_empty()),
    };
    debug!(path = %path, include_members, "listing");
    let listing = state
        .run_drive(move |api, site| list_path(api, site, &path, include_members, &page))
        .await?;

    let body = match listing {
        Listing::File(file) => serde_json::json!({ "file": file }),
        Listing::Folder { children, next } => {
            let downloads = folder_downloads(children.iter().map(|child| &child.item));
            let mut body = serde_json::json!({
                "folder": { "value": children },
                "downloads": downloads,
            });
            if let Some(next) = next {
                body["next"] = serde_json::Value::String(next);
            }
            body
        }
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemQuery {
    path: Option<String>,
    id: Option<String>,
    drive_id: Option<String>,
    proxy: Option<String>,
    size: Option<String>,
}

impl ItemQuery {
    fn target(&self, site: &SiteConfig) -> ApiResult<ItemRef> {
        if self.path.as_deref() == Some(UNRESOLVED_ROUTE) {
            return Err(ApiError::bad_request("No path specified."));
        }
        match (&self.id, &self.path) {
            (Some(id), _) if !id.is_empty() => Ok(ItemRef::Id(id.clone())),
            (_, Some(path)) => Ok(ItemRef::Path(encode_path(&site.base_directory, path))),
            _ => Err(ApiError::bad_request("Path query invalid.")),
        }
    }
}

async fn raw_item(
    State(state): State<AppState>,
    Query(query): Query<ItemQuery>,
) -> ApiResult<Response> {
    state.require_token()?;
    let target = query.target(&state.site)?;
    let drive_id = query
        .drive_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Drive query invalid."))?;
    let proxy = flag(query.proxy.as_deref());

    let item = state
        .run_drive(move |api, _| api.get_item(&drive_id, &target))
        .await?;
    let Some(url) = item.download_url.clone() else {
        return Err(ApiError::not_found("No download url found."));
    };
    if !proxy || item.size >= PROXY_LIMIT {
        return Ok(Redirect::temporary(&url).into_response());
    }

    let fetched = state.run_drive(move |api, _| api.fetch(&url)).await?;
    let mut response = Body::from(fetched.body).into_response();
    let headers = response.headers_mut();
    if let Some(value) = fetched
        .content_type
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn thumbnail(
    State(state): State<AppState>,
    Query(query): Query<ItemQuery>,
) -> ApiResult<Response> {
    state.require_token()?;
    let size = ThumbnailSize::parse(query.size.as_deref().unwrap_or("medium"))
        .ok_or_else(|| ApiError::bad_request("Invalid size"))?;
    let target = query.target(&state.site)?;
    let drive_id = query
        .drive_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("driveId query invalid."))?;

    let url = state
        .run_drive(move |api, _| api.thumbnail_url(&drive_id, &target, size))
        .await?
        .ok_or_else(|| ApiError::bad_request("The item doesn't have a valid thumbnail."))?;
    Ok(Redirect::temporary(&url).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    members: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Response> {
    state.require_token()?;
    let Some(q) = query.q.filter(|q| !q.trim().is_empty()) else {
        return Ok(Json(Vec::<ListedItem>::new()).into_response());
    };
    let include_members = flag(query.members.as_deref());
    let found = state
        .run_drive(move |api, site| search_items(api, site, &q, include_members))
        .await?;
    let results: Vec<ListedItem> = found.into_iter().map(ListedItem::new).collect();
    Ok(Json(results).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchQuery {
    video_id: Option<String>,
    members: Option<String>,
}

async fn watch_data(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> ApiResult<Response> {
    let video_id = query
        .video_id
        .ok_or_else(|| ApiError::not_found("Not Found"))?;
    if video_id == UNRESOLVED_ROUTE {
        return Err(ApiError::bad_request("No path specified."));
    }
    state.require_token()?;

    let include_members = flag(query.members.as_deref());
    let page = state
        .run_drive(move |api, site| load_watch_page(api, site, &video_id, include_members))
        .await?
        .ok_or_else(|| ApiError::not_found("Not Found"))?;
    Ok(Json(page).into_response())
}

#[derive(Debug, Deserialize)]
struct ShortenRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct ShortenResponse {
    url: String,
    short: String,
}

async fn shorten(
    State(state): State<AppState>,
    Json(payload): Json<ShortenRequest>,
) -> ApiResult<Json<ShortenResponse>> {
    let short = state
        .links
        .shorten(&payload.url)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(ShortenResponse {
        url: payload.url,
        short,
    }))
}

#[derive(Debug, Deserialize)]
struct DescribeQuery {
    name: String,
    folder: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribedName {
    display: NameDisplay,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<FileTypeClassification>,
}

async fn describe(Query(query): Query<DescribeQuery>) -> Json<DescribedName> {
    let is_folder = flag(query.folder.as_deref());
    Json(DescribedName {
        display: describe_name(&query.name, is_folder),
        classification: (!is_folder)
            .then(|| classify_file_type(&query.name))
            .filter(FileTypeClassification::is_classified),
    })
}

#[derive(Debug, Default, Deserialize)]
struct WatchRedirectQuery {
    v: Option<String>,
}

/// `/watch?v=<id>` jumps to the folder holding the recording, or home when
/// it cannot be found.
async fn watch_redirect(
    State(state): State<AppState>,
    Query(query): Query<WatchRedirectQuery>,
) -> Response {
    let Some(video_id) = query.v.filter(|v| !v.is_empty()) else {
        return Redirect::temporary("/").into_response();
    };

    let cached_folder = state.video_folders.read().get(&video_id).cloned();
    let folder = match cached_folder {
        Some(folder) => Some(folder),
        None if state.has_token => {
            let lookup = video_id.clone();
            match state
                .run_drive(move |api, site| find_video_folder(api, site, &lookup, false))
                .await
            {
                Ok(folder) => folder,
                Err(err) => {
                    debug!(video_id = %video_id, error = %err.message, "watch lookup failed");
                    None
                }
            }
        }
        None => None,
    };

    match folder {
        Some(folder) => {
            let location = location_for(&folder.path);
            state.video_folders.write().insert(video_id, folder);
            Redirect::temporary(&location).into_response()
        }
        None => Redirect::temporary("/").into_response(),
    }
}

async fn static_fallback(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    if let Some(short) = short_link_candidate(path)
        && !tokio::fs::try_exists(state.www_root.join(short))
            .await
            .unwrap_or(false)
    {
        match state.links.resolve(short).await {
            Ok(Some(long_path)) => {
                return Redirect::temporary(&location_for(&long_path)).into_response();
            }
            Ok(None) => {}
            Err(err) => warn!(short, error = %err, "short link lookup failed"),
        }
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Single, extension-less path segments may be short links.
fn short_link_candidate(request_path: &str) -> Option<&str> {
    let trimmed = request_path.trim_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('.') {
        return None;
    }
    Some(trimmed)
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html")).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
