use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use super::analysis::{AnalysisClient, AnalysisClientConfig};
use super::arbiter::{Arbiter, fallback_name};
use super::video::FrameSource;
use super::{PipelineStats, RenamePlanEntry};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::rename::RenameEngine;
use crate::rename::engine::default_log_name;

/// What the pipeline decided for one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    /// A suggestion from the endpoint was accepted
    Suggested(String),
    /// No usable suggestion; a size/time based name was generated
    Fallback(String),
    /// Not a single frame could be extracted
    NoFrames,
}

impl VideoOutcome {
    pub fn proposed(&self) -> Option<&str> {
        match self {
            VideoOutcome::Suggested(name) | VideoOutcome::Fallback(name) => Some(name),
            VideoOutcome::NoFrames => None,
        }
    }
}

/// Drives videos through extraction, analysis and arbitration, then hands
/// the resulting plan to a [`RenameEngine`].
pub struct Pipeline<S: FrameSource> {
    settings: Settings,
    source: Arc<S>,
    client: AnalysisClient,
    arbiter: Arbiter,
    log_dir: Option<PathBuf>,
}

impl<S: FrameSource> Pipeline<S> {
    pub fn new(settings: Settings, source: S) -> Result<Self, PipelineError> {
        settings.validate()?;
        let client = AnalysisClient::new(AnalysisClientConfig::from(&settings))?;

        Ok(Self {
            settings,
            source: Arc::new(source),
            client,
            arbiter: Arbiter::default(),
            log_dir: None,
        })
    }

    /// Replace the analysis client built from the settings
    pub fn with_client(mut self, client: AnalysisClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_arbiter(mut self, arbiter: Arbiter) -> Self {
        self.arbiter = arbiter;
        self
    }

    /// Directory the rename log is written to (working directory by default)
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fails if the inference endpoint does not answer the probe.
    pub async fn check_endpoint(&self) -> Result<(), PipelineError> {
        let url = &self.client.config().api_url;
        info!("Checking inference endpoint {}", url);
        if self.client.probe().await {
            info!("Inference endpoint is reachable");
            Ok(())
        } else {
            Err(PipelineError::EndpointUnreachable(url.clone()))
        }
    }

    /// Extract, analyze and name a single video. Its screenshots are
    /// removed before returning.
    pub async fn process_video(&self, video: &Path) -> VideoOutcome {
        info!("Processing {:?}", video.file_name().unwrap_or_default());

        let source = Arc::clone(&self.source);
        let owned = video.to_path_buf();
        let frames = match tokio::task::spawn_blocking(move || source.extract_key_frames(&owned))
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                error!("Frame extraction for {:?} panicked: {}", video, e);
                Vec::new()
            }
        };

        if frames.is_empty() {
            error!("No frames extracted from {:?}", video);
            self.source.cleanup_video(video);
            return VideoOutcome::NoFrames;
        }

        let results = self.client.analyze_frames(&frames).await;
        let outcome = match self.arbiter.choose(&results) {
            Some(name) => {
                info!("Suggested name for {:?}: {}", video.file_name().unwrap_or_default(), name);
                VideoOutcome::Suggested(name)
            }
            None => {
                let name = fallback_name(video);
                warn!(
                    "No usable suggestion for {:?}, falling back to {}",
                    video.file_name().unwrap_or_default(),
                    name
                );
                VideoOutcome::Fallback(name)
            }
        };

        self.source.cleanup_video(video);
        outcome
    }

    /// Process `videos` with at most `max_workers` in flight.
    ///
    /// The plan comes back in the order of `videos`, whatever order the
    /// workers finished in.
    pub async fn plan_renames(&self, videos: &[PathBuf]) -> (Vec<RenamePlanEntry>, PipelineStats) {
        let mut stats = PipelineStats {
            total: videos.len(),
            ..Default::default()
        };
        let workers = self.settings.max_workers.max(1) as usize;

        info!("Planning renames for {} videos with {} workers", videos.len(), workers);

        let mut outcomes: Vec<(usize, VideoOutcome)> = stream::iter(videos.iter().enumerate())
            .map(|(index, video)| async move { (index, self.process_video(video).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut plan = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes {
            let video = &videos[index];
            match outcome.proposed() {
                Some(name) => {
                    stats.processed += 1;
                    plan.push(RenamePlanEntry {
                        original: video.clone(),
                        proposed: name.to_string(),
                    });
                }
                None => {
                    stats.failed += 1;
                    stats.errors.push(format!(
                        "{}: no frames could be extracted",
                        video.file_name().unwrap_or_default().to_string_lossy()
                    ));
                }
            }
        }

        (plan, stats)
    }

    /// Run a plan through `engine`, save the log and sweep old screenshots.
    pub fn apply_plan(
        &self,
        plan: &[RenamePlanEntry],
        engine: &mut RenameEngine,
        mut stats: PipelineStats,
    ) -> PipelineStats {
        let first_new = engine.log().len();
        let summary = engine.batch_rename(plan);

        stats.renamed += summary.success;
        stats.failed += summary.failed + summary.skipped;
        for entry in &engine.log()[first_new..] {
            if let Some(err) = entry.error.as_deref().filter(|_| !entry.success) {
                stats.errors.push(format!("{}: {}", entry.original_name, err));
            }
        }
        if summary.skipped > 0 {
            stats
                .errors
                .push(format!("{} files disappeared before renaming", summary.skipped));
        }

        if !engine.log().is_empty() {
            let target = self.log_dir.as_ref().map(|dir| dir.join(default_log_name()));
            if let Err(e) = engine.save_log(target.as_deref()) {
                error!("Failed to save rename log: {}", e);
                stats.errors.push(format!("rename log not saved: {}", e));
            }
        }

        self.source.cleanup_stale();
        stats
    }

    /// Probe, plan, rename. Nothing on disk is touched if the probe fails.
    pub async fn run(
        &self,
        videos: &[PathBuf],
        engine: &mut RenameEngine,
    ) -> Result<PipelineStats, PipelineError> {
        self.check_endpoint().await?;

        let (plan, stats) = self.plan_renames(videos).await;
        let stats = self.apply_plan(&plan, engine, stats);

        info!(
            "Run finished: {} total, {} processed, {} renamed, {} failed",
            stats.total, stats.processed, stats.renamed, stats.failed
        );
        Ok(stats)
    }
}
