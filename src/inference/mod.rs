pub mod analysis;
pub mod arbiter;
pub mod frame;
pub mod pipeline;
pub mod sampler;
pub mod video;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A frame extracted from a video and written to the temp directory
#[derive(Debug, Clone)]
pub struct FrameAsset {
    pub video: PathBuf,
    /// 0-based position in the frame plan
    pub index: usize,
    pub path: PathBuf,
    /// 0-100, higher is sharper / better exposed
    pub quality: f64,
}

/// Outcome of analyzing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub suggestion: Option<String>,
    pub frame_index: usize,
    pub quality: f64,
}

/// One proposed rename, produced per video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePlanEntry {
    pub original: PathBuf,
    /// New base name; the rename engine appends the original extension when missing
    pub proposed: String,
}

/// Run statistics handed back to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total: usize,
    pub processed: usize,
    pub renamed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}
