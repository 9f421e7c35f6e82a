//! Runtime settings for the renamer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const ENV_PREFIX: &str = "VIDEO_RENAMER_";

pub const DEFAULT_API_URL: &str = "http://localhost:3001/proxy/free";

pub const DEFAULT_PROMPT: &str = "请分析这张视频截图，为视频文件生成一个合适的文件名。

要求：
1. 识别视频中的人物特征（性别、年龄、外貌特征）
2. 描述视频内容和场景
3. 识别视频类型（剧情、自拍、专业制作等）
4. 生成一个简洁、有描述性的文件名

文件名格式建议：
- 使用中文
- 2-8个字符
- 避免特殊符号
- 突出主要内容特征

请只返回文件名，不要其他解释。";

/// Settings consumed by the pipeline and the rename engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Inference endpoint URL
    pub api_url: String,
    /// Retries after the first attempt (1-10)
    pub max_retries: u32,
    /// Videos processed concurrently (1-10)
    pub max_workers: u32,
    /// Frames sampled per video (1-5)
    pub screenshot_count: u32,
    /// Max characters kept from a suggestion (10-100)
    pub max_filename_length: u32,
    /// Recognized video extensions, lowercase with leading dot
    pub video_extensions: Vec<String>,
    /// Directory for extracted frames
    pub temp_dir: PathBuf,
    /// Prompt sent with every frame
    pub analysis_prompt: String,
    /// Default tracing level for the binary
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            max_retries: 3,
            max_workers: 2,
            screenshot_count: 3,
            max_filename_length: 50,
            video_extensions: [".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".ts", ".m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            temp_dir: PathBuf::from("temp_screenshots"),
            analysis_prompt: DEFAULT_PROMPT.to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `VIDEO_RENAMER_*` environment variables (and `.env`).
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Build settings from an arbitrary key lookup (keys without prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(url) = lookup("API_URL") {
            settings.api_url = url;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            settings.max_retries = parse_u32("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("MAX_WORKERS") {
            settings.max_workers = parse_u32("MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("SCREENSHOT_COUNT") {
            settings.screenshot_count = parse_u32("SCREENSHOT_COUNT", &v)?;
        }
        if let Some(v) = lookup("MAX_FILENAME_LENGTH") {
            settings.max_filename_length = parse_u32("MAX_FILENAME_LENGTH", &v)?;
        }
        if let Some(v) = lookup("VIDEO_EXTENSIONS") {
            settings.video_extensions = v
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(normalize_extension)
                .collect();
        }
        if let Some(v) = lookup("TEMP_DIR") {
            settings.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ANALYSIS_PROMPT") {
            settings.analysis_prompt = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            settings.log_level = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check every bounded field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_retries", self.max_retries, 1, 10)?;
        check_range("max_workers", self.max_workers, 1, 10)?;
        check_range("screenshot_count", self.screenshot_count, 1, 5)?;
        check_range("max_filename_length", self.max_filename_length, 10, 100)?;

        if self.video_extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }
        if reqwest::Url::parse(&self.api_url).is_err() {
            return Err(ConfigError::Invalid {
                name: "api_url",
                value: self.api_url.clone(),
            });
        }

        Ok(())
    }
}

fn parse_u32(name: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn check_range(name: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            name,
            min,
            max,
            value,
        });
    }
    Ok(())
}

/// `MP4` / `.MP4` / `mp4` all become `.mp4`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.screenshot_count, 3);
        assert_eq!(settings.max_filename_length, 50);
        assert!(settings.video_extensions.contains(&".mkv".to_string()));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("API_URL", "http://example.test/infer"),
            ("MAX_RETRIES", "5"),
            ("SCREENSHOT_COUNT", "4"),
            ("VIDEO_EXTENSIONS", "MP4, .webm"),
        ]))
        .unwrap();

        assert_eq!(settings.api_url, "http://example.test/infer");
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.screenshot_count, 4);
        assert_eq!(settings.video_extensions, vec![".mp4", ".webm"]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = Settings::from_lookup(lookup_from(&[("SCREENSHOT_COUNT", "6")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                name: "screenshot_count",
                ..
            }
        ));

        let err = Settings::from_lookup(lookup_from(&[("MAX_WORKERS", "zero")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
