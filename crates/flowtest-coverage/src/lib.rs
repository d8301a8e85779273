//! Coverage aggregation for flowtest.
//!
//! Tests run in parallel, each writing raw counters into its own session
//! directory. Once they have all finished, a [`CoverageCollector`] discovers
//! the sessions, drives an external [`CoverageToolchain`] through merge, text
//! profile, HTML and summary stages, and records the aggregate percentage in
//! the [`Manifest`].

pub mod collector;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod toolchain;

pub use collector::{CoverageCollector, CoverageReport, DEFAULT_TOOL_TIMEOUT};
pub use discovery::{discover_sessions, find_marked_dirs, prune_sessions};
pub use error::{CoverageError, Stage};
pub use manifest::{
    MANIFEST_FILE, MANIFEST_VERSION, Manifest, ManifestEntry, ManifestSummary, TestStatus,
    read_result_shard, write_result_shard,
};
pub use toolchain::{
    CoverageToolchain, GoCovdata, HTML_REPORT, LlvmCov, MERGED_DIR, ReportPaths, SUMMARY_FILE,
    StageCommand, TEXT_PROFILE,
};
