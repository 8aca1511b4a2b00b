/// Cosmetic text transforms — pure string functions, no gateway state.
/// Emoji → ASCII substitutions applied when `--ascii-smileys` is set.
const SMILEYS: &[(&str, &str)] = &[
    ("😀", ":D"),
    ("😃", ":D"),
    ("😄", ":D"),
    ("😁", ":D"),
    ("😅", ":D"),
    ("😆", "xD"),
    ("😂", ":'D"),
    ("🙂", ":)"),
    ("😊", ":)"),
    ("😉", ";)"),
    ("😍", "<3"),
    ("😘", ":*"),
    ("😛", ":P"),
    ("😜", ";P"),
    ("😐", ":|"),
    ("😮", ":O"),
    ("😢", ":'("),
    ("😭", ":'("),
    ("😞", ":("),
    ("☹", ":("),
    ("😠", ">:("),
    // Variation-selector form first, so the bare heart doesn't strand it.
    ("❤️", "<3"),
    ("❤", "<3"),
    ("👍", "+1"),
    ("👎", "-1"),
];

/// Replace known emoji with their ASCII renderings.
pub fn ascii_smileys(text: &str) -> String {
    let mut out = text.to_owned();
    for (emoji, ascii) in SMILEYS {
        if out.contains(emoji) {
            out = out.replace(emoji, ascii);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn replaces_known_emoji() {
        assert_eq!(ascii_smileys("hi 🙂"), "hi :)");
        assert_eq!(ascii_smileys("😂😂"), ":'D:'D");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(ascii_smileys("nothing to see"), "nothing to see");
    }

    #[test]
    fn leaves_unknown_emoji_alone() {
        assert_eq!(ascii_smileys("launch 🚀"), "launch 🚀");
    }
}
