//! Semantic file types used to group and order download buttons.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileType {
    Video,
    Audio,
    Thumbnail,
    Description,
    Metadata,
    LiveChat,
    Unclassified,
}

/// Canonical ordering; a type's position is its sort rank.
pub const FILE_TYPE_ORDER: [FileType; 6] = [
    FileType::Video,
    FileType::Audio,
    FileType::Thumbnail,
    FileType::Description,
    FileType::Metadata,
    FileType::LiveChat,
];

/// Types recognised by extension alone, checked in order.
const EXTENSION_TABLE: [(FileType, &[&str]); 4] = [
    (FileType::Video, &["mp4", "mkv", "webm"]),
    (FileType::Audio, &["m4a", "mp3", "ogg"]),
    (FileType::Thumbnail, &["jpg", "png", "webp"]),
    (FileType::Description, &["description"]),
];

impl FileType {
    pub fn sort_rank(self) -> usize {
        FILE_TYPE_ORDER
            .iter()
            .position(|candidate| *candidate == self)
            .unwrap_or(FILE_TYPE_ORDER.len())
    }

    pub fn color_tag(self) -> &'static str {
        match self {
            Self::Video => "orange",
            Self::Audio => "purple",
            Self::Thumbnail => "teal",
            Self::Description => "grey",
            Self::Metadata => "cyan",
            Self::LiveChat => "yellow",
            Self::Unclassified => "gray",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Video => "Video",
            Self::Audio => "Audio Only",
            Self::Thumbnail => "Thumbnail",
            Self::Description => "Description",
            Self::Metadata => "Metadata",
            Self::LiveChat => "Live Chat",
            Self::Unclassified => "File",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        EXTENSION_TABLE
            .iter()
            .find(|(file_type, _)| *file_type == self)
            .map(|(_, extensions)| *extensions)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTypeClassification {
    pub file_type: FileType,
    pub color_tag: &'static str,
    pub sort_rank: usize,
    /// Filename offered when the file is saved locally.
    pub download_name: String,
}

impl FileTypeClassification {
    pub fn is_classified(&self) -> bool {
        self.file_type != FileType::Unclassified
    }
}

/// Lower-cased text after the last `.`; empty when the name has no dot or
/// only a leading one (`.hidden`).
pub fn extension(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(index) if index > 0 => file_name[index + 1..].to_lowercase(),
        _ => String::new(),
    }
}

pub fn classify_file_type(file_name: &str) -> FileTypeClassification {
    let ext = extension(file_name);
    let mut file_type = EXTENSION_TABLE
        .iter()
        .find(|(_, extensions)| extensions.contains(&ext.as_str()))
        .map(|(file_type, _)| *file_type)
        .unwrap_or(FileType::Unclassified);

    if file_type == FileType::Unclassified {
        if file_name.ends_with(".info.json") || ext == "info" {
            file_type = FileType::Metadata;
        }
        // Checked independently; a name matching both ends up as live chat.
        if file_name.contains(".live_chat.json") {
            file_type = FileType::LiveChat;
        }
    }

    FileTypeClassification {
        file_type,
        color_tag: file_type.color_tag(),
        sort_rank: file_type.sort_rank(),
        download_name: download_name(file_name, file_type, &ext),
    }
}

fn download_name(file_name: &str, file_type: FileType, ext: &str) -> String {
    if file_type == FileType::Metadata && ext == "info" {
        return format!("{file_name}.json");
    }
    file_name.to_string()
}
