use crate::evaluator::SkipReason;
use chrono::{DateTime, Utc};
use retainer_engine::EngineError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The transition at which a truncation attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureStage {
    /// Never touched: the app did not open.
    Open,
    /// Opened, but the clearing call failed. Nothing was saved.
    Clear,
    /// Cleared in the engine but not persisted.
    Save,
}

impl FailureStage {
    pub fn error_kind(&self) -> &'static str {
        match self {
            FailureStage::Open => "OpenError",
            FailureStage::Clear => "InvokeError",
            FailureStage::Save => "SaveError",
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutcomeKind {
    Truncated,
    Skipped(SkipReason),
    Failed { stage: FailureStage, error: EngineError },
}

impl OutcomeKind {
    pub fn failed(stage: FailureStage, error: EngineError) -> Self {
        OutcomeKind::Failed { stage, error }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeKind::Failed { .. })
    }

    /// Truncated in memory but the save did not go through.
    pub fn is_half_applied(&self) -> bool {
        matches!(self, OutcomeKind::Failed { stage: FailureStage::Save, .. })
    }

    pub fn failure_stage(&self) -> Option<FailureStage> {
        match self {
            OutcomeKind::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            OutcomeKind::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Truncated => write!(f, "truncated"),
            OutcomeKind::Skipped(reason) => write!(f, "skipped({})", reason),
            OutcomeKind::Failed { stage, .. } => write!(f, "failed({})", stage.error_kind()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TruncationOutcome {
    pub app_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub kind: OutcomeKind,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub truncated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Failures after the clear step, the ones that may need a manual look.
    pub unsaved: usize,
    pub unprocessed: usize,
    pub reclaimed_bytes: u64,
}

/// The ordered result of one orchestrator pass.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub engine_version: Option<String>,
    /// In candidate order, whatever order the apps finished in.
    pub outcomes: Vec<TruncationOutcome>,
    /// Candidates known to the run; more than `outcomes.len()` after an abort.
    pub candidates: usize,
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            engine_version: None,
            outcomes: Vec::new(),
            candidates: 0,
            aborted: None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            unprocessed: self.candidates.saturating_sub(self.outcomes.len()),
            ..RunSummary::default()
        };
        for outcome in &self.outcomes {
            match &outcome.kind {
                OutcomeKind::Truncated => {
                    summary.truncated += 1;
                    summary.reclaimed_bytes += outcome.size_bytes;
                }
                OutcomeKind::Skipped(_) => summary.skipped += 1,
                OutcomeKind::Failed { stage, .. } => {
                    summary.failed += 1;
                    if *stage == FailureStage::Save {
                        summary.unsaved += 1;
                    }
                }
            }
        }
        summary
    }

    /// No failures and no abort.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && !self.outcomes.iter().any(|o| o.kind.is_failure())
    }

    pub fn outcome(&self, app_id: &str) -> Option<&TruncationOutcome> {
        self.outcomes.iter().find(|o| o.app_id == app_id)
    }

    pub fn to_document(&self) -> ReportDocument {
        ReportDocument {
            started_at: self.started_at,
            finished_at: self.finished_at,
            engine_version: self.engine_version.clone(),
            aborted: self.aborted.clone(),
            summary: self.summary(),
            outcomes: self
                .outcomes
                .iter()
                .map(|o| ReportRecord {
                    app_id: o.app_id.clone(),
                    name: o.name.clone(),
                    outcome: o.kind.to_string(),
                    detail: o.kind.error().map(ToString::to_string),
                    elapsed_ms: o.elapsed.as_millis() as u64,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub app_id: String,
    pub name: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub engine_version: Option<String>,
    pub aborted: Option<String>,
    pub summary: RunSummary,
    pub outcomes: Vec<ReportRecord>,
}
