//! Watch page assembly: picks the files of one recording folder and
//! derives the embed metadata shown in link previews.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::drive::{
    DriveApi, DriveError, DriveItem, PageRequest, VideoFolder, encode_path, find_video_folder,
};
use crate::names::{FileType, classify_file_type, extension, unescape};

const SUBTITLE_EXTENSIONS: [&str; 3] = ["vtt", "srt", "ass"];
const SIZE_UNITS: [&str; 8] = ["KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

static FILE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?<date>[0-9]{8})\] (?<title>.+) \[(?<channel>.+)\] \((?<id>[^)]+)\)\..+")
        .expect("file name pattern is valid")
});

static README_TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"### ``\[(?<date>[0-9]{8})\] (?<title>.+) \[(?<channel>.+)\] \((?<id>[^)]+)\)``")
        .expect("readme title pattern is valid")
});

static README_DETAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+.+").expect("readme detail pattern is valid"));

/// `1536` → `1.50 KB`.
pub fn human_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let precision = if value < 10.0 {
        2
    } else if value < 100.0 {
        1
    } else {
        0
    };
    format!("{value:.precision$} {}", SIZE_UNITS[unit])
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchFile {
    #[serde(flatten)]
    pub item: DriveItem,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WatchFiles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subs: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<WatchFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<WatchFile>,
}

impl WatchFiles {
    /// Picks the first file of each role among `files`; folders are ignored.
    pub fn select(files: &[DriveItem], folder_path: &str) -> Self {
        let files: Vec<&DriveItem> = files.iter().filter(|item| item.is_file()).collect();
        let folder_path = folder_path.trim_end_matches('/');
        Self {
            readme: pick(&files, folder_path, |item| item.name.to_lowercase() == "readme.md"),
            desc: pick(&files, folder_path, |item| item.name.ends_with(".description")),
            video: pick(&files, folder_path, of_type(FileType::Video)),
            audio: pick(&files, folder_path, of_type(FileType::Audio)),
            thumb: pick(&files, folder_path, of_type(FileType::Thumbnail)),
            subs: pick(&files, folder_path, |item| {
                SUBTITLE_EXTENSIONS.contains(&extension(&item.name).as_str())
            }),
            meta: pick(&files, folder_path, |item| {
                item.name.ends_with(".info") || item.name.ends_with(".info.json")
            }),
            chat: pick(&files, folder_path, |item| item.name.contains(".live_chat.")),
        }
    }

    /// Every selected file except the readme, in role order.
    pub fn named(&self) -> Vec<&WatchFile> {
        [
            &self.desc,
            &self.video,
            &self.audio,
            &self.thumb,
            &self.subs,
            &self.meta,
            &self.chat,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.readme.is_none() && self.named().is_empty()
    }

    /// `N files (size)` over the non-readme files.
    pub fn summary(&self) -> String {
        let named = self.named();
        let size: u64 = named.iter().map(|file| file.item.size).sum();
        format!("{} files ({})", named.len(), human_file_size(size))
    }
}

fn pick(
    files: &[&DriveItem],
    folder_path: &str,
    predicate: impl Fn(&DriveItem) -> bool,
) -> Option<WatchFile> {
    files
        .iter()
        .find(|item| predicate(**item))
        .map(|item| WatchFile {
            item: (*item).clone(),
            path: format!("{folder_path}/{}", item.name),
            content: None,
        })
}

fn of_type(file_type: FileType) -> impl Fn(&DriveItem) -> bool {
    move |item| file_type.extensions().contains(&extension(&item.name).as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedData {
    pub title: String,
    pub short_description: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

impl EmbedData {
    pub fn build(
        video_id: &str,
        files: &WatchFiles,
        drive_id: &str,
        site: &SiteConfig,
        readme: Option<&str>,
    ) -> Self {
        let summary = files.summary();
        let mut embed = Self {
            title: video_id.to_string(),
            short_description: summary.clone(),
            url: format!("{}/watch?v={}", site.base_url, video_id),
            description: None,
            thumb: None,
            video: None,
        };

        if let Some(captures) = files
            .named()
            .into_iter()
            .find_map(|file| FILE_NAME_PATTERN.captures(&file.item.name))
        {
            let date = &captures["date"];
            embed.title = unescape(&captures["title"]);
            embed.short_description = format!(
                "{} - {} - {}/{}/{}",
                &captures["channel"],
                video_id,
                &date[..4],
                &date[4..6],
                &date[6..]
            );
        }

        if let Some(file) = files.thumb.as_ref().or(files.video.as_ref()) {
            embed.thumb = Some(format!(
                "{}/api/thumbnail?id={}&driveId={}",
                site.base_url, file.item.id, drive_id
            ));
        }
        if let Some(video) = &files.video
            && !site.is_members_drive(drive_id)
        {
            embed.video = Some(format!(
                "{}/api/raw?id={}&driveId={}",
                site.base_url, video.item.id, drive_id
            ));
        }

        if let Some(readme) = readme {
            let mut lines = readme.split("\r\n");
            let title = lines
                .next()
                .and_then(|line| README_TITLE_PATTERN.captures(line))
                .map(|captures| captures["title"].to_string());
            if let Some(title) = title {
                embed.title = title;
                if let Some(detail) = lines.next().filter(|line| README_DETAIL_PATTERN.is_match(line))
                {
                    embed.description =
                        Some(format!("{}\n{}\n{}", embed.short_description, detail, summary));
                }
            }
        }
        embed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorObject {
    pub code: u16,
    pub message: String,
}

impl ErrorObject {
    pub fn forbidden() -> Self {
        Self {
            code: 403,
            message: "Forbidden".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPage {
    pub path: String,
    pub embed_data: EmbedData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_files: Option<WatchFiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl WatchPage {
    /// Files of members drives stay hidden unless members content was asked
    /// for; the embed data is returned either way.
    pub fn assemble(
        video_id: &str,
        folder: &VideoFolder,
        mut files: WatchFiles,
        readme: Option<String>,
        site: &SiteConfig,
        include_members: bool,
    ) -> Self {
        let embed_data = EmbedData::build(
            video_id,
            &files,
            &folder.drive_id,
            site,
            readme.as_deref(),
        );
        if let Some(file) = files.readme.as_mut() {
            file.content = readme;
        }
        let hidden = site.is_members_drive(&folder.drive_id) && !include_members;
        Self {
            path: folder.path.clone(),
            embed_data,
            watch_files: (!hidden).then_some(files),
            error: hidden.then(ErrorObject::forbidden),
        }
    }
}

/// Resolves `video_id` to its folder and builds the watch page. `Ok(None)`
/// means no folder (or no files in it) exists.
pub fn load_watch_page(
    api: &dyn DriveApi,
    site: &SiteConfig,
    video_id: &str,
    include_members: bool,
) -> Result<Option<WatchPage>, DriveError> {
    let Some(folder) = find_video_folder(api, site, video_id, include_members)? else {
        debug!(video_id, "no folder for video");
        return Ok(None);
    };

    let encoded = encode_path(&site.base_directory, &folder.path);
    let children = api.list_children(&folder.drive_id, &encoded, &PageRequest::default())?;
    let files = WatchFiles::select(&children.value, &folder.path);
    if files.is_empty() {
        return Ok(None);
    }

    let readme = files
        .readme
        .as_ref()
        .and_then(|file| file.item.download_url.as_deref())
        .and_then(|url| match api.fetch(url) {
            Ok(fetched) => Some(String::from_utf8_lossy(&fetched.body).into_owned()),
            Err(err) => {
                warn!(video_id, error = %err, "could not fetch readme");
                None
            }
        });

    Ok(Some(WatchPage::assemble(
        video_id,
        &folder,
        files,
        readme,
        site,
        include_members,
    )))
}

/// One download button of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEntry {
    pub id: String,
    pub name: String,
    pub download_name: String,
    pub file_type: FileType,
    pub label: &'static str,
    pub color_tag: &'static str,
    pub sort_rank: usize,
    pub size: u64,
    pub size_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDownloads {
    pub entries: Vec<DownloadEntry>,
    pub total_size: u64,
    pub total_label: String,
}

/// Classified files of a folder ordered by type; unclassified files only
/// count toward the total.
pub fn folder_downloads<'a>(children: impl IntoIterator<Item = &'a DriveItem>) -> FolderDownloads {
    let files: Vec<&DriveItem> = children.into_iter().filter(|item| item.is_file()).collect();
    let total_size: u64 = files.iter().map(|item| item.size).sum();
    let mut entries: Vec<DownloadEntry> = files
        .iter()
        .filter_map(|item| {
            let classification = classify_file_type(&item.name);
            classification.is_classified().then(|| DownloadEntry {
                id: item.id.clone(),
                name: item.name.clone(),
                download_name: classification.download_name,
                file_type: classification.file_type,
                label: classification.file_type.label(),
                color_tag: classification.color_tag,
                sort_rank: classification.sort_rank,
                size: item.size,
                size_label: human_file_size(item.size),
            })
        })
        .collect();
    entries.sort_by_key(|entry| entry.sort_rank);
    FolderDownloads {
        entries,
        total_size,
        total_label: format!("All ({})", human_file_size(total_size)),
    }
}
