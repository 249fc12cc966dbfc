//! Reserved filesystem characters and the full-width look-alikes the
//! archiver writes in their place.

/// `(reserved, substitute)` pairs, applied in order.
pub const ESCAPE_CHARS: [(char, char); 9] = [
    ('<', '\u{FF1C}'),  // ＜
    ('>', '\u{FF1E}'),  // ＞
    (':', '\u{FF1A}'),  // ：
    ('"', '\u{2033}'),  // ″
    ('/', '\u{29F8}'),  // ⧸
    ('\\', '\u{29F9}'), // ⧹
    ('|', '\u{FF5C}'),  // ｜
    ('?', '\u{FF1F}'),  // ？
    ('*', '\u{FF0A}'),  // ＊
];

/// Restores every substitute glyph to the reserved character it stands for.
///
/// Genuine full-width characters that happen to equal a substitute are
/// restored too; the names carry no marker that would tell them apart.
pub fn unescape(name: &str) -> String {
    name.chars().map(restore_char).collect()
}

fn restore_char(c: char) -> char {
    ESCAPE_CHARS
        .iter()
        .find(|(_, substitute)| *substitute == c)
        .map(|(reserved, _)| *reserved)
        .unwrap_or(c)
}
