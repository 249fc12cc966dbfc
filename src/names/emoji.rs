//! Leading emoji decorations on folder and file names.
//!
//! Curators prefix some folders with an emoji (`📺 Streams`). The emoji is
//! shown as the item's icon and removed from the display text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Flag pairs, keycaps, and ZWJ chains of pictographs with optional
/// variation selector, skin tone modifier, and tag sequence.
static EMOJI_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"[\x{1F1E6}-\x{1F1FF}]{2}",
        r"|[#*0-9]\x{FE0F}?\x{20E3}",
        r"|\p{Extended_Pictographic}[\x{FE0F}\p{Emoji_Modifier}]?",
        r"(?:\x{200D}\p{Extended_Pictographic}[\x{FE0F}\p{Emoji_Modifier}]?)*",
        r"[\x{E0020}-\x{E007E}]*\x{E007F}?",
    ))
    .expect("emoji pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stripped {
    pub text: String,
    /// The decoration that was removed, if any.
    pub emoji: Option<String>,
}

impl Stripped {
    pub fn had_emoji(&self) -> bool {
        self.emoji.is_some()
    }
}

/// Removes an emoji sequence that starts the name. Emoji elsewhere in the
/// name are kept and leave the text untouched.
pub fn strip_leading_emoji(name: &str) -> Stripped {
    match EMOJI_SEQUENCE.find(name) {
        Some(found) if found.start() == 0 => Stripped {
            text: name[found.end()..].trim().to_string(),
            emoji: Some(found.as_str().to_string()),
        },
        _ => Stripped {
            text: name.to_string(),
            emoji: None,
        },
    }
}
