//! Retainer Orchestrator - decides which apps are stale and truncates them
//!
//! - candidate: app metadata and where it comes from
//! - evaluator: the pure retention decision
//! - orchestrator: the per-app open/clear/save/close state machine
//! - report: what one run did

pub mod candidate;
pub mod evaluator;
pub mod orchestrator;
pub mod report;

pub use candidate::{CandidateSource, DocListSource, RetentionCandidate, StaticCandidates};
pub use evaluator::{ExclusionList, RetentionPolicy, SkipReason, Verdict, evaluate, is_eligible};
pub use orchestrator::{Assessment, TruncationOrchestrator, TruncationPlan};
pub use report::{FailureStage, OutcomeKind, ReportDocument, RunReport, RunSummary, TruncationOutcome};
