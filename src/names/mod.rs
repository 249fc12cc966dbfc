//! Filename metadata engine.
//!
//! Turns the raw `name` of a drive item into what the listing shows: a
//! display label, optional title/channel/date columns, the source platform
//! and an icon. Every stage is a pure function; unparseable names fall back
//! to the normalized name and never produce errors.

pub mod emoji;
pub mod escape;
pub mod file_type;
pub mod platform;
pub mod structured;

pub use emoji::{Stripped, strip_leading_emoji};
pub use escape::unescape;
pub use file_type::{FileType, FileTypeClassification, classify_file_type, extension};
pub use platform::{Platform, classify_platform};
pub use structured::{
    ParsedName, TitleChannel, UploadDate, needs_unpad, parse_structured_name,
    split_channel_from_title,
};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ItemIcon {
    Platform(Platform),
    Emoji(String),
    Folder,
    File(FileType),
}

/// Everything the listing needs to render one item name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameDisplay {
    /// Escape-normalized, emoji-stripped name.
    pub text: String,
    /// Main label: the title for structured names, otherwise `text` or the
    /// virtual path.
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    pub needs_unpad: bool,
    /// Right-aligned columns of the listing row.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    pub icon: ItemIcon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_path: Option<String>,
}

impl NameDisplay {
    /// Breadcrumbs show bare ids for recognised platforms to stay short.
    pub fn breadcrumb_label(&self) -> &str {
        match (&self.video_id, self.platform) {
            (Some(video_id), Some(platform)) if platform.is_known() => video_id,
            _ => &self.label,
        }
    }
}

/// Runs the full pipeline for one listing entry.
pub fn describe_name(raw: &str, is_folder: bool) -> NameDisplay {
    let stripped = strip_leading_emoji(&unescape(raw));
    let parsed = parse_structured_name(&stripped.text);

    let fallback_icon = match (&stripped.emoji, is_folder) {
        (Some(glyph), _) => ItemIcon::Emoji(glyph.clone()),
        (None, true) => ItemIcon::Folder,
        (None, false) => ItemIcon::File(classify_file_type(&stripped.text).file_type),
    };

    let mut display = NameDisplay {
        label: stripped.text.clone(),
        text: stripped.text,
        channel: String::new(),
        video_id: None,
        platform: None,
        upload_date: None,
        needs_unpad: false,
        columns: Vec::new(),
        icon: fallback_icon,
        virtual_path: None,
    };

    if let Some(path) = parsed.path_label() {
        display.label = path.to_string();
        display.virtual_path = Some(path.to_string());
        return display;
    }

    let Some(video_id) = parsed.video_id.clone() else {
        return display;
    };

    let platform = classify_platform(&video_id);
    let TitleChannel { mut title, channel } = parsed.title_and_channel();
    if !platform.is_known() {
        title.push_str(&format!(" ({video_id})"));
    }
    let upload_date = parsed.upload_date().map(|date| date.slashed());

    if platform.is_known() {
        display.columns.push(video_id.clone());
    }
    if let Some(date) = &upload_date {
        display.columns.push(date.clone());
    }

    display.needs_unpad = needs_unpad(&title);
    display.label = title;
    display.channel = channel;
    display.icon = ItemIcon::Platform(platform);
    display.platform = Some(platform);
    display.video_id = Some(video_id);
    display.upload_date = upload_date;
    display
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_youtube_name() {
        let display = describe_name("[20230115] My Title [Channel Name] (dQw4w9WgXcQ)", true);
        assert_eq!(display.label, "My Title");
        assert_eq!(display.channel, "Channel Name");
        assert_eq!(display.platform, Some(Platform::Youtube));
        assert_eq!(display.columns, vec!["dQw4w9WgXcQ", "2023/01/15"]);
        assert_eq!(display.icon, ItemIcon::Platform(Platform::Youtube));
        assert_eq!(display.breadcrumb_label(), "dQw4w9WgXcQ");
    }

    #[test]
    fn file_names_with_an_extension_stay_unparsed() {
        let name = "[20230115] My Title [Channel Name] (dQw4w9WgXcQ).mp4";
        let display = describe_name(name, false);
        assert_eq!(display.label, name);
        assert_eq!(display.video_id, None);
        assert_eq!(display.icon, ItemIcon::File(FileType::Video));
    }

    #[test]
    fn twitch_name_without_channel() {
        let display = describe_name("[20210504] Just A Title (v1234567890)", true);
        assert_eq!(display.platform, Some(Platform::Twitch));
        assert_eq!(display.label, "Just A Title");
        assert_eq!(display.channel, "");
    }

    #[test]
    fn unknown_platform_keeps_id_in_title() {
        let display = describe_name("[20210504] Clip [Someone] (custom-id)", true);
        assert_eq!(display.platform, Some(Platform::Unknown));
        assert_eq!(display.label, "Clip (custom-id)");
        assert_eq!(display.columns, vec!["2021/05/04"]);
        assert_eq!(display.breadcrumb_label(), "Clip (custom-id)");
        assert_eq!(display.icon, ItemIcon::Platform(Platform::Unknown));
    }

    #[test]
    fn plain_names_pass_through() {
        let display = describe_name("random_file.txt", false);
        assert_eq!(display.label, "random_file.txt");
        assert_eq!(display.text, "random_file.txt");
        assert!(display.video_id.is_none());
        assert!(display.columns.is_empty());
        assert_eq!(display.icon, ItemIcon::File(FileType::Unclassified));

        let folder = describe_name("Archive", true);
        assert_eq!(folder.icon, ItemIcon::Folder);
    }

    #[test]
    fn unescapes_before_parsing() {
        let display = describe_name("[20230115] Why？ ＜Live＞ [Ch｜JP] (dQw4w9WgXcQ)", true);
        assert_eq!(display.label, "Why? <Live>");
        assert_eq!(display.channel, "Ch|JP");
    }

    #[test]
    fn escaped_slashes_become_virtual_paths() {
        let display = describe_name("⧸Members⧸[20230115] T [C] (dQw4w9WgXcQ)", true);
        assert_eq!(display.label, "Members");
        assert_eq!(display.virtual_path.as_deref(), Some("Members"));
        assert!(display.video_id.is_none());
    }

    #[test]
    fn emoji_folders_use_the_emoji_icon() {
        let display = describe_name("📺 Streams", true);
        assert_eq!(display.label, "Streams");
        assert_eq!(display.icon, ItemIcon::Emoji("📺".into()));
    }

    #[test]
    fn unpad_flag_follows_title() {
        let display = describe_name("[20230115] 「歌枠」 [Ch] (dQw4w9WgXcQ)", true);
        assert!(display.needs_unpad);
    }

    #[test]
    fn never_panics_on_odd_input() {
        for name in ["", "]", "[", "((", "[20230115] ]] [[ (x)", "/", "//", "⧸⧸", "\n"] {
            let _ = describe_name(name, false);
            let _ = describe_name(name, true);
        }
    }

    #[test]
    fn describe_is_deterministic() {
        let name = "🎵 [20230115] Song [Artist] (1abcdefghijkl)";
        assert_eq!(describe_name(name, false), describe_name(name, false));
    }
}
