use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Source platform of an archived recording, inferred from the shape of its
/// video id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Twitch,
    Twitter,
    Unknown,
}

impl Platform {
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

// Ids may carry a leading `*` (or its full-width form) marking members-only
// recordings. Classes are spelled out because `\d`/`\w` are Unicode-aware here.
static PLATFORM_PATTERNS: LazyLock<[(Platform, Regex); 3]> = LazyLock::new(|| {
    [
        (Platform::Twitch, r"^[＊*]?[1-9v][0-9]{8,10}$"),
        (Platform::Youtube, r"^[＊*]?[A-Za-z0-9_-]{11}$"),
        (Platform::Twitter, r"^[＊*]?1[a-zA-Z]{12}$"),
    ]
    .map(|(platform, pattern)| {
        (
            platform,
            Regex::new(pattern).expect("platform pattern is valid"),
        )
    })
});

/// First matching pattern wins; anything else, including the empty id, is
/// `Unknown`.
pub fn classify_platform(video_id: &str) -> Platform {
    PLATFORM_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(video_id))
        .map(|(platform, _)| *platform)
        .unwrap_or(Platform::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_ids_are_eleven_word_chars() {
        assert_eq!(classify_platform("dQw4w9WgXcQ"), Platform::Youtube);
        assert_eq!(classify_platform("a-b_c-d_e-f"), Platform::Youtube);
        assert_eq!(classify_platform("＊dQw4w9WgXcQ"), Platform::Youtube);
        assert_eq!(classify_platform("*dQw4w9WgXcQ"), Platform::Youtube);
    }

    #[test]
    fn twitch_ids_are_numeric_or_v_prefixed() {
        assert_eq!(classify_platform("v1234567890"), Platform::Twitch);
        assert_eq!(classify_platform("123456789"), Platform::Twitch);
        assert_eq!(classify_platform("12345678901"), Platform::Twitch);
        assert_eq!(classify_platform("＊v123456789"), Platform::Twitch);
    }

    #[test]
    fn twitch_is_checked_before_youtube() {
        // Eleven digits also fit the YouTube shape.
        assert_eq!(classify_platform("12345678901"), Platform::Twitch);
    }

    #[test]
    fn twitter_ids_are_one_then_twelve_letters() {
        assert_eq!(classify_platform("1abcdefghijkl"), Platform::Twitter);
        assert_eq!(classify_platform("*1ABCDEFGHIJKL"), Platform::Twitter);
    }

    #[test]
    fn everything_else_is_unknown() {
        for id in ["", "vod123456789", "0123456789", "short", "1abc", "ｄQw4w9WgXcQ", "dQw4w9WgXc１"] {
            assert_eq!(classify_platform(id), Platform::Unknown, "{id}");
        }
    }

    #[test]
    fn only_unknown_is_not_known() {
        assert!(Platform::Youtube.is_known());
        assert!(Platform::Twitch.is_known());
        assert!(Platform::Twitter.is_known());
        assert!(!Platform::Unknown.is_known());
    }
}
