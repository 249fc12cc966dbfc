//! Parser for archive names of the form
//! `[/virtual/path/][YYYYMMDD] Title [Channel] (videoId)`.
//!
//! The scanner behaves like the leftmost-first, greedy pattern
//! `(/.*/)?\[(\d{8})\] (.+) \(([^)]+)\)$`: start positions are tried left to
//! right, the path prefix before the bare form, the longest prefix first,
//! and the title absorbs everything up to the last viable ` (`.

use serde::Serialize;

/// Opening glyphs that carry built-in leading whitespace when rendered.
pub const UNPAD_CHARS: [char; 10] = ['「', '【', '『', '［', '（', '〈', '〔', '《', '〘', '〚'];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

impl ParsedName {
    pub fn is_match(&self) -> bool {
        self.date.is_some()
    }

    /// The prefix without its surrounding slashes, used verbatim as the label.
    pub fn path_label(&self) -> Option<&str> {
        let prefix = self.path_prefix.as_deref()?;
        let prefix = prefix.strip_prefix('/').unwrap_or(prefix);
        Some(prefix.strip_suffix('/').unwrap_or(prefix))
    }

    pub fn upload_date(&self) -> Option<UploadDate> {
        self.date.as_deref().and_then(UploadDate::parse)
    }

    /// Title/channel split of the combined capture. Unsplittable captures
    /// become the title with an empty channel.
    pub fn title_and_channel(&self) -> TitleChannel {
        let combined = self.title_channel.as_deref().unwrap_or_default();
        split_channel_from_title(combined).unwrap_or_else(|| TitleChannel {
            title: combined.to_string(),
            channel: String::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl UploadDate {
    /// Splits an 8-digit `YYYYMMDD` string at fixed offsets. No calendar
    /// validation is done; `20231399` decomposes like any other date.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            year: raw[0..4].parse().ok()?,
            month: raw[4..6].parse().ok()?,
            day: raw[6..8].parse().ok()?,
        })
    }

    pub fn slashed(&self) -> String {
        format!("{:04}/{:02}/{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleChannel {
    pub title: String,
    pub channel: String,
}

pub fn parse_structured_name(name: &str) -> ParsedName {
    for (start, c) in name.char_indices() {
        if c == '/'
            && let Some(parsed) = match_with_prefix(name, start)
        {
            return parsed;
        }
        if let Some(parsed) = match_body(&name[start..]) {
            return parsed;
        }
    }
    ParsedName::default()
}

fn match_with_prefix(name: &str, start: usize) -> Option<ParsedName> {
    let rest = &name[start + 1..];
    // `.*` cannot cross a line terminator, so the closing slash must come
    // before the first one.
    let limit = rest.find(is_line_terminator).unwrap_or(rest.len());
    let closing_slashes = rest[..limit].match_indices('/').map(|(i, _)| i);
    for offset in closing_slashes.rev() {
        let end = start + 1 + offset + 1;
        if let Some(mut parsed) = match_body(&name[end..]) {
            parsed.path_prefix = Some(name[start..end].to_string());
            return Some(parsed);
        }
    }
    None
}

/// Matches `[YYYYMMDD] <titleChannel> (<videoId>)` anchored at both ends.
fn match_body(body: &str) -> Option<ParsedName> {
    let rest = body.strip_prefix('[')?;
    let date = rest.get(..8)?;
    if !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = rest[8..].strip_prefix("] ")?;
    let inner = rest.strip_suffix(')')?;

    for (split, _) in inner.rmatch_indices(" (") {
        let video_id = &inner[split + 2..];
        if video_id.contains(')') {
            // Every split further left would include the same `)`.
            break;
        }
        let title_channel = &inner[..split];
        // `.+` cannot cross a line terminator; the identifier may.
        if video_id.is_empty()
            || title_channel.is_empty()
            || title_channel.contains(is_line_terminator)
        {
            continue;
        }
        return Some(ParsedName {
            path_prefix: None,
            date: Some(date.to_string()),
            title_channel: Some(title_channel.to_string()),
            video_id: Some(video_id.to_string()),
        });
    }
    None
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Splits `Title [Channel]` at the bracket group that closes the name.
///
/// Scans right to left: the first `]` marks the end of the channel and every
/// further `]` opens one more level, which the next `[` closes again. The `[`
/// met while only the outermost level is open marks the channel start.
/// Returns `None` when the name does not end with `]` or the group never
/// closes.
pub fn split_channel_from_title(title_channel: &str) -> Option<TitleChannel> {
    if !title_channel.ends_with(']') {
        return None;
    }
    let mut end = 0;
    let mut open = 0usize;
    for (i, c) in title_channel.char_indices().rev() {
        match c {
            ']' => {
                if open == 0 {
                    end = i;
                }
                open += 1;
            }
            '[' if open == 1 => {
                let title = &title_channel[..i];
                return Some(TitleChannel {
                    title: title.strip_suffix(' ').unwrap_or(title).to_string(),
                    channel: title_channel[i + 1..end].to_string(),
                });
            }
            '[' if open > 1 => open -= 1,
            _ => {}
        }
    }
    None
}

/// Whether a title starts with a glyph that needs a negative left margin.
pub fn needs_unpad(title: &str) -> bool {
    title
        .chars()
        .next()
        .is_some_and(|first| UNPAD_CHARS.contains(&first))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_youtube_name() {
        let parsed = parse_structured_name("[20230115] My Title [Channel Name] (dQw4w9WgXcQ)");
        assert_eq!(parsed.date.as_deref(), Some("20230115"));
        assert_eq!(
            parsed.title_channel.as_deref(),
            Some("My Title [Channel Name]")
        );
        assert_eq!(parsed.video_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert!(parsed.path_prefix.is_none());

        let split = parsed.title_and_channel();
        assert_eq!(split.title, "My Title");
        assert_eq!(split.channel, "Channel Name");
    }

    #[test]
    fn unstructured_names_have_no_fields() {
        for name in ["random_file.txt", "", "[2023011] short date (x)", "[20230115] (x)"] {
            let parsed = parse_structured_name(name);
            assert_eq!(parsed, ParsedName::default(), "{name}");
            assert!(!parsed.is_match());
        }
    }

    #[test]
    fn requires_video_id_at_end_of_string() {
        let parsed = parse_structured_name("[20230115] Title (abc) trailing");
        assert!(parsed.video_id.is_none());
        let parsed = parse_structured_name("[20230115] Title ()");
        assert!(parsed.video_id.is_none());
    }

    #[test]
    fn title_takes_the_last_parenthesis() {
        let parsed = parse_structured_name("[20210504] Part (1) of 2 (v1234567890)");
        assert_eq!(parsed.title_channel.as_deref(), Some("Part (1) of 2"));
        assert_eq!(parsed.video_id.as_deref(), Some("v1234567890"));
    }

    #[test]
    fn video_id_may_swallow_an_empty_trailing_group() {
        let parsed = parse_structured_name("[20210504] Title (ab ()");
        assert_eq!(parsed.title_channel.as_deref(), Some("Title"));
        assert_eq!(parsed.video_id.as_deref(), Some("ab ("));
    }

    #[test]
    fn match_may_start_after_leading_text() {
        let parsed = parse_structured_name("prefix [20230115] T (abc)");
        assert_eq!(parsed.date.as_deref(), Some("20230115"));
        assert_eq!(parsed.title_channel.as_deref(), Some("T"));
    }

    #[test]
    fn captures_path_prefix() {
        let parsed = parse_structured_name("/Members/Extras/[20230115] T [C] (dQw4w9WgXcQ)");
        assert_eq!(parsed.path_prefix.as_deref(), Some("/Members/Extras/"));
        assert_eq!(parsed.path_label(), Some("Members/Extras"));
        assert_eq!(parsed.video_id.as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn path_label_strips_exactly_one_slash_each_side() {
        let parsed = parse_structured_name("//a//[20230115] T (x)");
        assert_eq!(parsed.path_prefix.as_deref(), Some("//a//"));
        assert_eq!(parsed.path_label(), Some("/a/"));
    }

    #[test]
    fn slash_without_following_date_is_not_a_prefix() {
        let parsed = parse_structured_name("a/b [20230115] T (x)");
        assert!(parsed.path_prefix.is_none());
        assert_eq!(parsed.title_channel.as_deref(), Some("T"));
    }

    #[test]
    fn title_cannot_span_lines() {
        let parsed = parse_structured_name("[20230115] line\nbreak (x)");
        assert!(!parsed.is_match());
    }

    #[test]
    fn video_id_implies_date() {
        for name in [
            "[20230115] a (b)",
            "x (y)",
            "[2023] a (b)",
            "/p/[20230115] a (b)",
            "[20230115]  (b)",
        ] {
            let parsed = parse_structured_name(name);
            assert_eq!(parsed.video_id.is_some(), parsed.date.is_some(), "{name}");
        }
    }

    #[test]
    fn splits_trailing_channel() {
        let split = split_channel_from_title("Foo Bar [MyChannel]").unwrap();
        assert_eq!(split.title, "Foo Bar");
        assert_eq!(split.channel, "MyChannel");
    }

    #[test]
    fn no_split_without_trailing_bracket() {
        assert!(split_channel_from_title("Foo Bar").is_none());
        let parsed = ParsedName {
            title_channel: Some("Foo Bar".into()),
            ..ParsedName::default()
        };
        let split = parsed.title_and_channel();
        assert_eq!(split.title, "Foo Bar");
        assert_eq!(split.channel, "");
    }

    // Brackets are balanced, so a nested tag stays inside the channel. A scan
    // that never closes inner groups would leave this name unsplit.
    #[test]
    fn split_handles_nested_brackets() {
        let split = split_channel_from_title("Title [Ch [JP]]").unwrap();
        assert_eq!(split.title, "Title");
        assert_eq!(split.channel, "Ch [JP]");
    }

    #[test]
    fn split_uses_only_the_closing_group() {
        let split = split_channel_from_title("[Live] Song [Artist]").unwrap();
        assert_eq!(split.title, "[Live] Song");
        assert_eq!(split.channel, "Artist");
    }

    #[test]
    fn unbalanced_brackets_do_not_split() {
        assert!(split_channel_from_title("Title Channel]").is_none());
        assert!(split_channel_from_title("]").is_none());
        assert!(split_channel_from_title("Title [a [b]]]").is_none());
    }

    #[test]
    fn channel_only_name_has_empty_title() {
        let split = split_channel_from_title("[Channel]").unwrap();
        assert_eq!(split.title, "");
        assert_eq!(split.channel, "Channel");
    }

    #[test]
    fn upload_date_decomposes_at_fixed_offsets() {
        let date = UploadDate::parse("20230105").unwrap();
        assert_eq!(
            date,
            UploadDate {
                year: 2023,
                month: 1,
                day: 5
            }
        );
        assert_eq!(date.slashed(), "2023/01/05");
        assert!(UploadDate::parse("2023010").is_none());
        assert!(UploadDate::parse("2023o105").is_none());
    }

    #[test]
    fn unpad_glyphs() {
        assert!(needs_unpad("「Quoted」 title"));
        assert!(needs_unpad("【Live】"));
        assert!(!needs_unpad("Plain"));
        assert!(!needs_unpad(""));
    }

    #[test]
    fn parsing_is_deterministic() {
        let name = "/x/[20230115] A [B] (dQw4w9WgXcQ)";
        assert_eq!(parse_structured_name(name), parse_structured_name(name));
    }
}
