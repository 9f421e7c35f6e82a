use tracing::warn;

use crate::error::RenameError;

/// Characters no file name may contain
pub const ILLEGAL_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Names longer than this (in characters) are suspicious on most filesystems
pub const LONG_NAME_WARN_CHARS: usize = 255;

/// Used when a suggestion cleans down to nothing
pub const UNTITLED_NAME: &str = "untitled_video";

/// Keep letters, digits, `-`, `_` and spaces; collapse runs of spaces and
/// cut the result to `max_len` characters.
pub fn clean_filename(name: &str, max_len: usize) -> String {
    let kept: String = name
        .chars()
        .filter(|&c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .collect();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed
        .chars()
        .take(max_len)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Turn an accepted suggestion into a base name without extension.
///
/// The model sometimes answers with a full file name, so a trailing
/// recognized video extension is dropped before cleaning.
pub fn safe_base_name(suggestion: &str, video_extensions: &[String], max_len: usize) -> String {
    let without_ext = strip_video_extension(suggestion, video_extensions);
    let cleaned = clean_filename(without_ext, max_len);

    if cleaned.is_empty() {
        UNTITLED_NAME.to_string()
    } else {
        cleaned
    }
}

/// Case-insensitive check against the recognized extensions (which carry a leading dot)
pub fn has_video_extension(name: &str, video_extensions: &[String]) -> bool {
    let lower = name.to_lowercase();
    video_extensions
        .iter()
        .any(|ext| lower.len() > ext.len() && lower.ends_with(&ext.to_lowercase()))
}

fn strip_video_extension<'a>(name: &'a str, video_extensions: &[String]) -> &'a str {
    if !has_video_extension(name, video_extensions) {
        return name;
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Guard run before every rename.
///
/// Empty names and names with `<>:"/\|?*` are rejected; overly long names
/// only produce a warning.
pub fn validate_filename(name: &str) -> Result<(), RenameError> {
    if name.trim().is_empty() {
        return Err(RenameError::EmptyName);
    }

    if name.contains(ILLEGAL_NAME_CHARS) {
        return Err(RenameError::IllegalCharacters(name.to_string()));
    }

    if name.chars().count() > LONG_NAME_WARN_CHARS {
        warn!(
            "File name is longer than {} characters: {}...",
            LONG_NAME_WARN_CHARS,
            name.chars().take(50).collect::<String>()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec![".mp4".to_string(), ".mkv".to_string()]
    }

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("  beach   sunset!! ", 50), "beach sunset");
        assert_eq!(clean_filename("浴室-剧情_01", 50), "浴室-剧情_01");
        assert_eq!(clean_filename("a\tb", 50), "ab");
        assert_eq!(clean_filename("abcdefghij klm", 11), "abcdefghij");
        assert_eq!(clean_filename("中文名字很长很长", 4), "中文名字");
        assert_eq!(clean_filename("one    two   three", 50), "one two three");
    }

    #[test]
    fn test_safe_base_name_strips_extension() {
        assert_eq!(safe_base_name("cat video.MP4", &exts(), 50), "cat video");
        assert_eq!(safe_base_name("version 1.5", &exts(), 50), "version 15");
        assert_eq!(safe_base_name("!!!", &exts(), 50), UNTITLED_NAME);
    }

    #[test]
    fn test_has_video_extension() {
        assert!(has_video_extension("clip.MKV", &exts()));
        assert!(!has_video_extension("clip", &exts()));
        assert!(!has_video_extension(".mp4", &exts()));
        assert!(!has_video_extension("clip.avi", &exts()));
    }

    #[test]
    fn test_validate_filename() {
        assert!(matches!(validate_filename(""), Err(RenameError::EmptyName)));
        assert!(matches!(validate_filename("   "), Err(RenameError::EmptyName)));
        for bad in ["a<b", "a>b", "a:b", "a\"b", "a/b", "a\\b", "a|b", "a?b", "a*b"] {
            assert!(
                matches!(validate_filename(bad), Err(RenameError::IllegalCharacters(_))),
                "{bad} should be rejected"
            );
        }
        assert!(validate_filename("good name.mp4").is_ok());
        // long names are only a warning
        assert!(validate_filename(&"x".repeat(300)).is_ok());
    }
}
