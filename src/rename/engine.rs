use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use super::filename::{LONG_NAME_WARN_CHARS, has_video_extension, validate_filename};
use crate::error::RenameError;
use crate::inference::RenamePlanEntry;

/// One rename attempt. Appended once per attempt, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameLogEntry {
    pub timestamp: DateTime<Local>,
    pub original_path: PathBuf,
    pub original_name: String,
    pub new_path: PathBuf,
    pub new_name: String,
    pub success: bool,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where a file stands in the rename process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameStatus {
    Pending,
    /// Target name was free
    Resolved,
    /// Target name was taken and a `_<n>` suffix was added
    Conflicted,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub status: RenameStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoReport {
    pub restored: usize,
    /// Entries whose renamed file was gone (or whose old name was taken)
    pub skipped: usize,
    pub failed: usize,
}

impl UndoReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewEntry {
    pub original: PathBuf,
    pub original_name: String,
    pub new_path: PathBuf,
    pub new_name: String,
    pub status: RenameStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenameStatistics {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    /// Percent, 0 when nothing was attempted
    pub success_rate: f64,
}

/// Applies (or simulates) renames and keeps the run's log.
///
/// The log doubles as the undo stack. Undo is best effort and not
/// transactional: an entry is reverted if and only if the renamed file is
/// still at its renamed path when `undo` runs.
///
/// A dry run moves nothing, so the engine remembers which names it would
/// have taken and which originals it would have moved away. Conflict
/// resolution sees the same directory a live run would.
#[derive(Debug)]
pub struct RenameEngine {
    dry_run: bool,
    video_extensions: Vec<String>,
    log: Vec<RenameLogEntry>,
    claimed: HashSet<PathBuf>,
    vacated: HashSet<PathBuf>,
}

/// Paths taken or freed by renames that have not touched the disk
#[derive(Debug, Clone, Copy)]
struct Pending<'a> {
    claimed: &'a HashSet<PathBuf>,
    vacated: &'a HashSet<PathBuf>,
}

impl Pending<'_> {
    fn is_taken(&self, path: &Path) -> bool {
        self.claimed.contains(path) || (path.exists() && !self.vacated.contains(path))
    }
}

impl RenameEngine {
    pub fn new(dry_run: bool, video_extensions: Vec<String>) -> Self {
        Self {
            dry_run,
            video_extensions,
            log: Vec::new(),
            claimed: HashSet::new(),
            vacated: HashSet::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn log(&self) -> &[RenameLogEntry] {
        &self.log
    }

    /// Forget every recorded attempt
    pub fn reset(&mut self) {
        self.log.clear();
        self.claimed.clear();
        self.vacated.clear();
    }

    /// Work out the final path for renaming `original` to `proposed`.
    ///
    /// The original extension is appended unless `proposed` already ends in a
    /// recognized video extension. Taken names get `_1`, `_2`, ... before the
    /// extension. Renaming a file onto its own name resolves to itself.
    /// In dry-run mode, names claimed by earlier simulated renames count as
    /// taken.
    pub fn resolve_target_path(&self, original: &Path, proposed: &str) -> ResolvedTarget {
        let pending = Pending {
            claimed: &self.claimed,
            vacated: &self.vacated,
        };
        self.resolve_against(original, proposed, pending)
    }

    fn resolve_against(
        &self,
        original: &Path,
        proposed: &str,
        pending: Pending<'_>,
    ) -> ResolvedTarget {
        let file_name = if has_video_extension(proposed, &self.video_extensions) {
            proposed.to_string()
        } else {
            let ext = original
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            format!("{proposed}{ext}")
        };

        let parent = original.parent().unwrap_or_else(|| Path::new(""));
        let candidate = parent.join(&file_name);
        if candidate == original || !pending.is_taken(&candidate) {
            return ResolvedTarget {
                path: candidate,
                status: RenameStatus::Resolved,
            };
        }

        let (stem, ext) = split_extension(&file_name);
        let mut counter = 1u32;
        loop {
            let candidate = parent.join(format!("{stem}_{counter}{ext}"));
            if candidate == original || !pending.is_taken(&candidate) {
                return ResolvedTarget {
                    path: candidate,
                    status: RenameStatus::Conflicted,
                };
            }
            counter += 1;
        }
    }

    /// Rename one file. Returns whether the attempt succeeded.
    ///
    /// Every call appends exactly one log entry.
    pub fn rename_one(&mut self, original: &Path, proposed: &str) -> bool {
        let unresolved = original.with_file_name(proposed);

        if let Err(e) = validate_filename(proposed) {
            error!("Refusing to rename {:?}: {}", original, e);
            self.record(original, &unresolved, false, Some(e.to_string()));
            return false;
        }

        let source_check = match fs::metadata(original) {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(RenameError::NotAFile(original.to_path_buf())),
            Err(_) => Err(RenameError::SourceMissing(original.to_path_buf())),
        };
        if let Err(e) = source_check {
            error!("Cannot rename: {}", e);
            self.record(original, &unresolved, false, Some(e.to_string()));
            return false;
        }

        let target = self.resolve_target_path(original, proposed);
        let new_path = target.path;

        if new_path == original {
            info!("Name unchanged, nothing to do: {}", display_name(original));
            self.record(original, &new_path, true, None);
            return true;
        }

        if self.dry_run {
            info!(
                "[dry-run] Would rename: {} -> {}",
                display_name(original),
                display_name(&new_path)
            );
            self.claimed.insert(new_path.clone());
            self.vacated.insert(original.to_path_buf());
            self.record(original, &new_path, true, None);
            return true;
        }

        match fs::rename(original, &new_path) {
            Ok(()) => {
                info!(
                    "Renamed: {} -> {}",
                    display_name(original),
                    display_name(&new_path)
                );
                self.record(original, &new_path, true, None);
                true
            }
            Err(e) => {
                error!(
                    "Rename failed: {} -> {}: {}",
                    display_name(original),
                    display_name(&new_path),
                    e
                );
                self.record(original, &new_path, false, Some(e.to_string()));
                false
            }
        }
    }

    /// Apply a whole plan, in order. Originals that vanished are skipped
    /// without a log entry.
    pub fn batch_rename(&mut self, entries: &[RenamePlanEntry]) -> BatchSummary {
        let mut summary = BatchSummary {
            total: entries.len(),
            ..Default::default()
        };

        info!("Starting batch rename of {} files", summary.total);

        for entry in entries {
            if !entry.original.exists() || self.vacated.contains(&entry.original) {
                warn!("File no longer exists, skipping: {:?}", entry.original);
                summary.skipped += 1;
                continue;
            }

            if self.rename_one(&entry.original, &entry.proposed) {
                summary.success += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            "Batch rename finished: {} ok, {} failed, {} skipped",
            summary.success, summary.failed, summary.skipped
        );
        summary
    }

    /// Revert the live renames recorded so far, newest first.
    ///
    /// In dry-run mode nothing was changed, so there is nothing to undo.
    pub fn undo(&self) -> UndoReport {
        let mut report = UndoReport::default();

        if self.dry_run {
            info!("Dry run, nothing to undo");
            return report;
        }

        for entry in self.log.iter().rev() {
            if !entry.success || entry.dry_run || entry.new_path == entry.original_path {
                continue;
            }

            if !entry.new_path.exists() {
                warn!("Cannot undo, file is gone: {:?}", entry.new_path);
                report.skipped += 1;
                continue;
            }

            if entry.original_path.exists() {
                warn!(
                    "Cannot undo, original name is taken again: {:?}",
                    entry.original_path
                );
                report.skipped += 1;
                continue;
            }

            match fs::rename(&entry.new_path, &entry.original_path) {
                Ok(()) => {
                    info!(
                        "Undid rename: {} -> {}",
                        entry.new_name, entry.original_name
                    );
                    report.restored += 1;
                }
                Err(e) => {
                    error!("Undo failed for {:?}: {}", entry.new_path, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Undo finished: {} restored, {} skipped, {} failed",
            report.restored, report.skipped, report.failed
        );
        report
    }

    /// Write the log as a JSON array. Defaults to `rename_log_<timestamp>.json`
    /// in the working directory. Returns the path written.
    pub fn save_log(&self, path: Option<&Path>) -> Result<PathBuf, RenameError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(default_log_name()),
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // write next to the target and move into place
        let mut file = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, &self.log)?;
        file.write_all(b"\n")?;
        file.persist(&path).map_err(|e| RenameError::Io(e.error))?;

        info!("Rename log saved to {:?}", path);
        Ok(path)
    }

    /// Resolved targets for a plan, without touching anything. Each entry
    /// sees the names taken by the entries before it.
    pub fn preview(&self, entries: &[RenamePlanEntry]) -> Vec<PreviewEntry> {
        let mut claimed = self.claimed.clone();
        let mut vacated = self.vacated.clone();

        entries
            .iter()
            .map(|entry| {
                let pending = Pending {
                    claimed: &claimed,
                    vacated: &vacated,
                };
                let target = self.resolve_against(&entry.original, &entry.proposed, pending);
                if target.path != entry.original {
                    claimed.insert(target.path.clone());
                    vacated.insert(entry.original.clone());
                }

                PreviewEntry {
                    original: entry.original.clone(),
                    original_name: display_name(&entry.original),
                    new_name: display_name(&target.path),
                    new_path: target.path,
                    status: target.status,
                }
            })
            .collect()
    }

    /// Check a plan up front: missing sources and bad names are errors,
    /// overly long names are warnings.
    pub fn validate_plan(&self, entries: &[RenamePlanEntry]) -> PlanValidation {
        let mut result = PlanValidation {
            valid: true,
            ..Default::default()
        };

        for entry in entries {
            if !entry.original.exists() {
                result
                    .errors
                    .push(format!("Source file does not exist: {:?}", entry.original));
                result.valid = false;
                continue;
            }

            if let Err(e) = validate_filename(&entry.proposed) {
                result
                    .errors
                    .push(format!("{}: {}", display_name(&entry.original), e));
                result.valid = false;
                continue;
            }

            if entry.proposed.chars().count() > LONG_NAME_WARN_CHARS {
                result.warnings.push(format!(
                    "File name too long: {}...",
                    entry.proposed.chars().take(50).collect::<String>()
                ));
            }
        }

        result
    }

    pub fn statistics(&self) -> RenameStatistics {
        let total = self.log.len();
        let successful = self.log.iter().filter(|e| e.success).count();
        RenameStatistics {
            total_operations: total,
            successful_operations: successful,
            failed_operations: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    fn record(&mut self, original: &Path, new_path: &Path, success: bool, error: Option<String>) {
        self.log.push(RenameLogEntry {
            timestamp: Local::now(),
            original_path: original.to_path_buf(),
            original_name: display_name(original),
            new_path: new_path.to_path_buf(),
            new_name: display_name(new_path),
            success,
            dry_run: self.dry_run,
            error,
        });
    }
}

/// `rename_log_<YYYYmmdd_HHMMSS>.json` for the current local time
pub fn default_log_name() -> String {
    format!("rename_log_{}.json", Local::now().format("%Y%m%d_%H%M%S"))
}

/// `name.ext` -> (`name`, `.ext`); names without a dot keep an empty extension
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => file_name.split_at(dot),
        _ => (file_name, ""),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
