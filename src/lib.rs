#![deny(clippy::all)]

pub mod config;
pub mod error;
pub mod inference;
pub mod rename;
pub mod scan;

pub use config::Settings;
pub use error::{AnalysisError, ConfigError, PipelineError, RenameError};
pub use inference::analysis::{AnalysisClient, AnalysisClientConfig};
pub use inference::arbiter::{ArbitrationPolicy, Arbiter};
pub use inference::pipeline::{Pipeline, VideoOutcome};
pub use inference::video::{FfmpegFrameExtractor, FrameSource, VideoHandle, VideoInfo};
pub use inference::{AnalysisResult, FrameAsset, PipelineStats, RenamePlanEntry};
pub use rename::{RenameEngine, RenameLogEntry};
