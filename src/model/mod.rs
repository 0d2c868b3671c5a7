//! Value objects exchanged between pipeline stages. All are created once and
//! never mutated thereafter; see each submodule for its specific invariants.

pub mod context;
pub mod defect;
pub mod fix;
pub mod patch;

pub use context::{CodeContext, FileEncoding, Language};
pub use defect::{ClassificationHints, ComplexityHint, ContextFlag, DefectCategory, ParsedDefect, Severity};
pub use fix::{
    BraceStyle, Complexity, DefectAnalysisResult, DefectCategoryLabel, DetectedStyle, FixCandidate,
    IndentationType, LineRange, NamingConvention, NimMetadata, Risk, StyleAnalysisResult,
};
pub use patch::{
    AppliedChange, ApplyMode, BackupEntry, BackupManifest, OverallStatus, PatchApplicationResult,
    PatchValidationResult,
};
