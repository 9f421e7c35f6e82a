use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use super::AnalysisResult;
use crate::rename::filename::UNTITLED_NAME;

const MB: u64 = 1024 * 1024;

/// How to pick among several per-frame suggestions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// First suggestion in frame order
    #[default]
    FirstNonEmpty,
    /// Suggestion from the best scoring frame; the earliest frame wins ties
    HighestQuality,
}

/// Merges per-frame suggestions into one name
#[derive(Debug, Clone, Copy, Default)]
pub struct Arbiter {
    policy: ArbitrationPolicy,
}

impl Arbiter {
    pub fn new(policy: ArbitrationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ArbitrationPolicy {
        self.policy
    }

    /// `results` must be in frame order
    pub fn choose(&self, results: &[AnalysisResult]) -> Option<String> {
        let mut candidates = results.iter().filter(|r| {
            r.suggestion
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
        });

        let chosen = match self.policy {
            ArbitrationPolicy::FirstNonEmpty => candidates.next(),
            ArbitrationPolicy::HighestQuality => {
                candidates.fold(None, |best: Option<&AnalysisResult>, r| match best {
                    Some(b) if b.quality >= r.quality => Some(b),
                    _ => Some(r),
                })
            }
        }?;

        debug!(
            "Chose suggestion from frame {} ({:?})",
            chosen.frame_index + 1,
            self.policy
        );
        chosen.suggestion.clone()
    }
}

/// Size class used in fallback names
pub fn size_tier(bytes: u64) -> &'static str {
    match bytes {
        b if b < 10 * MB => "small",
        b if b < 100 * MB => "medium",
        b if b < 1000 * MB => "large",
        _ => "huge",
    }
}

/// Deterministic name for a video no suggestion could be accepted for:
/// `<tier>_<unix seconds><ext>`, keeping the video's own extension.
pub fn fallback_name(video: &Path) -> String {
    let ts = Utc::now().timestamp();
    let ext = video
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    match std::fs::metadata(video) {
        Ok(meta) => format!("{}_{}{}", size_tier(meta.len()), ts, ext),
        Err(e) => {
            warn!("Failed to read size of {:?}: {}", video, e);
            format!("{}_{}{}", UNTITLED_NAME, ts, ext)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, suggestion: Option<&str>, quality: f64) -> AnalysisResult {
        AnalysisResult {
            suggestion: suggestion.map(str::to_string),
            frame_index: index,
            quality,
        }
    }

    #[test]
    fn test_choose_zero_and_one() {
        let arbiter = Arbiter::default();
        assert_eq!(arbiter.choose(&[]), None);
        assert_eq!(arbiter.choose(&[result(0, None, 90.0)]), None);
        assert_eq!(
            arbiter.choose(&[result(0, None, 90.0), result(1, Some("only"), 10.0)]),
            Some("only".to_string())
        );
    }

    #[test]
    fn test_first_non_empty_is_default() {
        let arbiter = Arbiter::default();
        assert_eq!(arbiter.policy(), ArbitrationPolicy::FirstNonEmpty);

        let results = [
            result(0, Some("  "), 10.0),
            result(1, Some("second"), 20.0),
            result(2, Some("third"), 99.0),
        ];
        assert_eq!(arbiter.choose(&results), Some("second".to_string()));
    }

    #[test]
    fn test_highest_quality_breaks_ties_by_frame_order() {
        let arbiter = Arbiter::new(ArbitrationPolicy::HighestQuality);
        let results = [
            result(0, Some("dim"), 20.0),
            result(1, Some("sharp"), 80.0),
            result(2, Some("also sharp"), 80.0),
            result(3, None, 100.0),
        ];
        assert_eq!(arbiter.choose(&results), Some("sharp".to_string()));
    }

    #[test]
    fn test_size_tiers() {
        assert_eq!(size_tier(0), "small");
        assert_eq!(size_tier(10 * MB - 1), "small");
        assert_eq!(size_tier(10 * MB), "medium");
        assert_eq!(size_tier(999 * MB), "large");
        assert_eq!(size_tier(1000 * MB), "huge");
    }

    #[test]
    fn test_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("0123456789abcdef.mkv");
        std::fs::write(&video, vec![0u8; 1024]).unwrap();

        let name = fallback_name(&video);
        assert!(name.starts_with("small_"), "{name}");
        assert!(name.ends_with(".mkv"), "{name}");
        let ts = &name["small_".len()..name.len() - ".mkv".len()];
        assert!(ts.parse::<i64>().is_ok(), "{name}");

        let missing = fallback_name(&dir.path().join("gone.avi"));
        assert!(missing.starts_with("untitled_video_"), "{missing}");
        assert!(missing.ends_with(".avi"), "{missing}");
    }
}
