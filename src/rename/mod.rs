pub mod engine;
pub mod filename;

pub use engine::{
    BatchSummary, PlanValidation, PreviewEntry, RenameEngine, RenameLogEntry, RenameStatistics,
    RenameStatus, ResolvedTarget, UndoReport,
};
pub use filename::{clean_filename, safe_base_name, validate_filename};
