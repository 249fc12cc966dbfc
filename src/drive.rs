//! Client and listing helpers for the remote drive API.
//!
//! Several drives can back one index: folders with the same name on
//! different drives are presented as a single folder. The HTTP client is
//! blocking; async callers run it on `spawn_blocking`.

use std::{io::Read, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::names::{FileTypeClassification, NameDisplay, classify_file_type, describe_name};

const ITEM_FIELDS: &str = "id,name,size,lastModifiedDateTime,folder,file,video,image,parentReference,webUrl";
const DOWNLOAD_FIELD: &str = "@microsoft.graph.downloadUrl";
const SEARCH_FIELDS: &str = "id,webUrl,name,size,file,folder,parentReference";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for bodies read into memory (readmes, proxied raw files).
pub const MAX_FETCH_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderFacet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileFacet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ParentReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(
        rename = "@microsoft.graph.downloadUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub download_url: Option<String>,
    /// Set for items that live on a members drive.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub members: bool,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn drive_id(&self) -> Option<&str> {
        self.parent_reference
            .as_ref()
            .and_then(|reference| reference.drive_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
}

/// One page of folder children as returned by the drive API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChildrenPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub top: Option<u32>,
    pub skip_token: Option<String>,
    pub order_by: Option<String>,
}

/// Addresses an item either by its encoded path (see [`encode_path`]) or by
/// its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    Path(String),
    Id(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSize {
    Large,
    Medium,
    Small,
}

impl ThumbnailSize {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "large" => Some(Self::Large),
            "medium" => Some(Self::Medium),
            "small" => Some(Self::Small),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("{message}")]
    Status { code: u16, message: String },
    #[error("drive request failed: {0}")]
    Transport(String),
    #[error("unexpected drive response: {0}")]
    Decode(String),
}

impl DriveError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Status { code, .. } => *code,
            Self::Transport(_) => 502,
            Self::Decode(_) => 500,
        }
    }
}

/// Operations the index needs from the storage vendor.
pub trait DriveApi: Send + Sync {
    fn get_item(&self, drive_id: &str, item: &ItemRef) -> Result<DriveItem, DriveError>;

    fn list_children(
        &self,
        drive_id: &str,
        encoded_path: &str,
        page: &PageRequest,
    ) -> Result<ChildrenPage, DriveError>;

    /// `query` must already be passed through [`sanitise_query`].
    fn search(
        &self,
        drive_id: &str,
        encoded_root: &str,
        query: &str,
    ) -> Result<Vec<DriveItem>, DriveError>;

    fn thumbnail_url(
        &self,
        drive_id: &str,
        item: &ItemRef,
        size: ThumbnailSize,
    ) -> Result<Option<String>, DriveError>;

    /// Downloads a pre-authenticated URL such as a `downloadUrl`.
    fn fetch(&self, url: &str) -> Result<Fetched, DriveError>;
}

pub struct GraphClient {
    agent: ureq::Agent,
    api_base: String,
    access_token: String,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ValueList<T> {
    #[serde(default)]
    value: Vec<T>,
}

#[derive(Deserialize, Default)]
struct ThumbnailSet {
    large: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    small: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

impl GraphClient {
    pub fn new(api_base: impl Into<String>, access_token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            api_base: api_base.into(),
            access_token: access_token.into(),
        }
    }

    fn item_url(&self, drive_id: &str, item: &ItemRef, suffix: &str) -> String {
        match item {
            ItemRef::Id(id) => format!(
                "{}/drives/{}/items/{}{}",
                self.api_base,
                drive_id,
                urlencoding::encode(id),
                if suffix.is_empty() {
                    String::new()
                } else {
                    format!("/{suffix}")
                }
            ),
            ItemRef::Path(encoded) => {
                let separator = if encoded.is_empty() || suffix.is_empty() {
                    ""
                } else {
                    ":"
                };
                let suffix = if suffix.is_empty() {
                    String::new()
                } else {
                    format!("/{suffix}")
                };
                format!(
                    "{}/drives/{}/root{}{}{}",
                    self.api_base, drive_id, encoded, separator, suffix
                )
            }
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DriveError> {
        debug!(url, "drive request");
        let mut request = self
            .agent
            .get(url)
            .set("Authorization", &format!("Bearer {}", self.access_token))
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request.call().map_err(map_ureq_error)?;
        response
            .into_json::<T>()
            .map_err(|err| DriveError::Decode(err.to_string()))
    }
}

impl DriveApi for GraphClient {
    fn get_item(&self, drive_id: &str, item: &ItemRef) -> Result<DriveItem, DriveError> {
        let url = self.item_url(drive_id, item, "");
        let fields = format!("{ITEM_FIELDS},{DOWNLOAD_FIELD}");
        self.get_json(&url, &[("select", fields.as_str())])
    }

    fn list_children(
        &self,
        drive_id: &str,
        encoded_path: &str,
        page: &PageRequest,
    ) -> Result<ChildrenPage, DriveError> {
        let url = self.item_url(drive_id, &ItemRef::Path(encoded_path.to_string()), "children");
        let top = page.top.map(|top| top.to_string());
        let mut query = vec![("select", ITEM_FIELDS)];
        if let Some(top) = top.as_deref() {
            query.push(("$top", top));
        }
        if let Some(token) = page.skip_token.as_deref() {
            query.push(("$skipToken", token));
        }
        if let Some(order) = page.order_by.as_deref() {
            query.push(("$orderby", order));
        }
        self.get_json(&url, &query)
    }

    fn search(
        &self,
        drive_id: &str,
        encoded_root: &str,
        query: &str,
    ) -> Result<Vec<DriveItem>, DriveError> {
        let separator = if encoded_root.is_empty() { "" } else { ":" };
        let url = format!(
            "{}/drives/{}/root{}{}/search(q='{}')",
            self.api_base, drive_id, encoded_root, separator, query
        );
        let list: ValueList<DriveItem> = self.get_json(&url, &[("select", SEARCH_FIELDS)])?;
        Ok(list.value)
    }

    fn thumbnail_url(
        &self,
        drive_id: &str,
        item: &ItemRef,
        size: ThumbnailSize,
    ) -> Result<Option<String>, DriveError> {
        let url = self.item_url(drive_id, item, "thumbnails");
        let list: ValueList<ThumbnailSet> = self.get_json(&url, &[])?;
        Ok(list.value.into_iter().next().and_then(|set| {
            let thumbnail = match size {
                ThumbnailSize::Large => set.large,
                ThumbnailSize::Medium => set.medium,
                ThumbnailSize::Small => set.small,
            };
            thumbnail.and_then(|thumbnail| thumbnail.url)
        }))
    }

    fn fetch(&self, url: &str) -> Result<Fetched, DriveError> {
        let response = self.agent.get(url).call().map_err(map_ureq_error)?;
        let content_type = response.header("Content-Type").map(str::to_string);
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_FETCH_BYTES)
            .read_to_end(&mut body)
            .map_err(|err| DriveError::Transport(err.to_string()))?;
        Ok(Fetched { content_type, body })
    }
}

fn map_ureq_error(err: ureq::Error) -> DriveError {
    match err {
        ureq::Error::Status(code, response) => {
            let message = response
                .into_json::<GraphErrorBody>()
                .map(|body| body.error.message)
                .ok()
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("drive API responded with {code}"));
            DriveError::Status { code, message }
        }
        ureq::Error::Transport(transport) => DriveError::Transport(transport.to_string()),
    }
}

/// Resolves `path` against `/`, folding `.` and `..`. The result always
/// starts with `/` and has no trailing slash unless it is the root.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Drive-API form of a path below the base directory: `""` for the root,
/// otherwise `:/segment/segment` with each segment percent-encoded.
pub fn encode_path(base_directory: &str, path: &str) -> String {
    let joined = clean_path(&format!("{base_directory}/{path}"));
    if joined == "/" {
        return String::new();
    }
    let encoded: Vec<String> = joined
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!(":/{}", encoded.join("/"))
}

/// Makes a user query safe to embed in a `search(q='…')` path segment.
pub fn sanitise_query(query: &str) -> String {
    let sanitised = query
        .replace('\'', "''")
        .replacen('<', " &lt; ", 1)
        .replacen('>', " &gt; ", 1)
        .replacen('?', " ", 1)
        .replacen('/', " ", 1);
    urlencoding::encode(&sanitised).into_owned()
}

/// Maps an item's `webUrl` to its path relative to the index root.
pub fn web_url_to_relative_path(
    web_url: &str,
    account_marker: &str,
    base_directory: &str,
) -> Option<String> {
    let base = clean_path(base_directory);
    let splitter = if base == "/" {
        account_marker.to_string()
    } else {
        format!("{account_marker}{base}")
    };
    let (_, tail) = web_url.split_once(&splitter)?;
    let segments: Vec<String> = tail
        .split('/')
        .map(|segment| decode_component(&decode_component(segment)))
        .filter(|segment| !segment.is_empty())
        .collect();
    Some(segments.join("/"))
}

fn decode_component(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// `$skiptoken` carried by an `@odata.nextLink`.
pub fn next_page_token(next_link: &str) -> Option<String> {
    let marker = "&$skiptoken=";
    let index = next_link.to_ascii_lowercase().find(marker)?;
    let token = &next_link[index + marker.len()..];
    (!token.is_empty()).then(|| token.to_string())
}

/// Combines children from several drives into one listing sorted by name.
///
/// Same-named folders merge into the first one seen: child counts and sizes
/// add up and the latest modification time wins.
pub fn merge_children(items: Vec<DriveItem>, site: &SiteConfig) -> Vec<DriveItem> {
    let mut merged: Vec<DriveItem> = Vec::with_capacity(items.len());
    for mut item in items {
        if item.drive_id().is_some_and(|id| site.is_members_drive(id)) {
            item.members = true;
        }
        if item.is_folder()
            && let Some(existing) = merged
                .iter_mut()
                .find(|existing| existing.is_folder() && existing.name == item.name)
        {
            if let (Some(target), Some(extra)) = (existing.folder.as_mut(), item.folder.as_ref()) {
                target.child_count += extra.child_count;
            }
            existing.size += item.size;
            existing.last_modified_date_time = latest_timestamp(
                existing.last_modified_date_time.as_deref(),
                item.last_modified_date_time.as_deref(),
            );
            continue;
        }
        merged.push(item);
    }
    merged.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    merged
}

fn latest_timestamp(a: Option<&str>, b: Option<&str>) -> Option<String> {
    let parse = |value: Option<&str>| {
        value
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
    };
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => Some(x.max(y).to_rfc3339_opts(SecondsFormat::Secs, true)),
        (Some(x), None) | (None, Some(x)) => Some(x.to_rfc3339_opts(SecondsFormat::Secs, true)),
        (None, None) => a.or(b).map(str::to_string),
    }
}

/// A drive item together with what the engine derives from its name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedItem {
    #[serde(flatten)]
    pub item: DriveItem,
    pub display: NameDisplay,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<FileTypeClassification>,
}

impl ListedItem {
    pub fn new(item: DriveItem) -> Self {
        let display = describe_name(&item.name, item.is_folder());
        let classification = item
            .is_file()
            .then(|| classify_file_type(&item.name))
            .filter(FileTypeClassification::is_classified);
        Self {
            item,
            display,
            classification,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Listing {
    File(ListedItem),
    Folder {
        children: Vec<ListedItem>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<String>,
    },
}

/// Lists `path` across every eligible drive. A path that names a file on
/// any drive yields that file instead of a folder listing.
pub fn list_path(
    api: &dyn DriveApi,
    site: &SiteConfig,
    path: &str,
    include_members: bool,
    page: &PageRequest,
) -> Result<Listing, DriveError> {
    let encoded = encode_path(&site.base_directory, path);
    let drives = site.drives(include_members);
    let mut errors = Vec::new();

    for drive_id in &drives {
        match api.get_item(drive_id, &ItemRef::Path(encoded.clone())) {
            Ok(item) if item.is_file() => return Ok(Listing::File(ListedItem::new(item))),
            Ok(_) => {}
            Err(err) => {
                debug!(drive_id = %drive_id, error = %err, "item lookup failed");
                errors.push(err);
            }
        }
    }

    let mut children = Vec::new();
    let mut next = None;
    for drive_id in &drives {
        match api.list_children(drive_id, &encoded, page) {
            Ok(page) => {
                if next.is_none() {
                    next = page.next_link.as_deref().and_then(next_page_token);
                }
                children.extend(page.value);
            }
            Err(err) => {
                debug!(drive_id = %drive_id, error = %err, "children lookup failed");
                errors.push(err);
            }
        }
    }

    let children = merge_children(children, site);
    if children.is_empty()
        && let Some(err) = errors.into_iter().next()
    {
        warn!(path, error = %err, "listing failed on every drive");
        return Err(err);
    }
    Ok(Listing::Folder {
        children: children.into_iter().map(ListedItem::new).collect(),
        next,
    })
}

/// Searches every eligible drive. Errors only surface when nothing was
/// found anywhere.
pub fn search_items(
    api: &dyn DriveApi,
    site: &SiteConfig,
    query: &str,
    include_members: bool,
) -> Result<Vec<DriveItem>, DriveError> {
    let root = encode_path(&site.base_directory, "/");
    let sanitised = sanitise_query(query);
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for drive_id in site.drives(include_members) {
        match api.search(&drive_id, &root, &sanitised) {
            Ok(found) => values.extend(found),
            Err(err) => errors.push(err),
        }
    }
    if values.is_empty()
        && let Some(err) = errors.into_iter().next()
    {
        return Err(err);
    }
    Ok(values)
}

/// Folder holding one archived recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFolder {
    pub path: String,
    pub drive_id: String,
}

/// Finds the folder whose name ends with `(<video_id>)`.
pub fn find_video_folder(
    api: &dyn DriveApi,
    site: &SiteConfig,
    video_id: &str,
    include_members: bool,
) -> Result<Option<VideoFolder>, DriveError> {
    let suffix = format!("({video_id})");
    let found = search_items(api, site, video_id, include_members)?;
    let folder = found
        .iter()
        .find(|item| item.is_folder() && item.name.ends_with(&suffix))
        .and_then(|item| {
            let path = web_url_to_relative_path(
                item.web_url.as_deref()?,
                &site.account_marker,
                &site.base_directory,
            )?;
            Some(VideoFolder {
                path,
                drive_id: item.drive_id()?.to_string(),
            })
        });
    Ok(folder)
}
