use crate::candidate::{CandidateSource, RetentionCandidate};
use crate::evaluator::{RetentionPolicy, Verdict};
use crate::report::{FailureStage, OutcomeKind, RunReport, TruncationOutcome};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use retainer_core::config::AppConfig;
use retainer_engine::{AppEngine, AppHandle, MethodCall};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The calls that make up one truncation.
#[derive(Debug, Clone)]
pub struct TruncationPlan {
    /// Drops the app's data. `None` when opening without data already did.
    pub clear: Option<MethodCall>,
    pub save: MethodCall,
}

impl Default for TruncationPlan {
    fn default() -> Self {
        Self {
            clear: None,
            save: MethodCall::new("DoSave"),
        }
    }
}

impl TruncationPlan {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            clear: config
                .clear_method
                .as_deref()
                .filter(|m| !m.is_empty())
                .map(MethodCall::new),
            save: MethodCall::new(config.save_method.clone()).with_timeout(config.save_timeout()),
        }
    }
}

/// A candidate and what the policy says about it.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub candidate: RetentionCandidate,
    pub verdict: Verdict,
}

enum AppStage {
    Pending,
    Opened(AppHandle),
    Truncated(AppHandle),
    Saved(AppHandle),
    Closed(OutcomeKind),
}

#[derive(Default)]
struct Accumulator {
    /// Tagged with the candidate's position in the input.
    outcomes: Vec<(usize, TruncationOutcome)>,
    aborted: Option<String>,
}

pub struct TruncationOrchestrator<'a> {
    engine: &'a dyn AppEngine,
    policy: RetentionPolicy,
    plan: TruncationPlan,
    max_concurrency: usize,
    now: Option<DateTime<Utc>>,
}

impl<'a> TruncationOrchestrator<'a> {
    pub fn new(engine: &'a dyn AppEngine, policy: RetentionPolicy) -> Self {
        Self {
            engine,
            policy,
            plan: TruncationPlan::default(),
            max_concurrency: 1,
            now: None,
        }
    }

    pub fn with_plan(mut self, plan: TruncationPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Pins the clock used for idleness. Defaults to the run's start time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Evaluates without touching the engine.
    pub fn preview(&self, candidates: &[RetentionCandidate]) -> Vec<Assessment> {
        let now = self.now.unwrap_or_else(Utc::now);
        candidates
            .iter()
            .map(|c| Assessment {
                candidate: c.clone(),
                verdict: self.policy.evaluate(c, now),
            })
            .collect()
    }

    /// One full pass: open the session, list candidates, process them, close.
    pub async fn run(&self, source: &dyn CandidateSource) -> RunReport {
        let mut report = RunReport::new(Utc::now());

        match self.engine.open_session().await {
            Ok(token) => {
                report.engine_version = Some(token.engine_version);
                match source.candidates().await {
                    Ok(candidates) => self.process_all(candidates, &mut report).await,
                    Err(e) => {
                        error!("❌ Could not list applications: {:#}", e);
                        report.aborted = Some(format!("could not list applications: {:#}", e));
                    }
                }
            }
            Err(e) => {
                error!("❌ {}", e);
                report.aborted = Some(e.to_string());
            }
        }

        self.engine.close_session().await;
        report.finished_at = Utc::now();
        report
    }

    pub async fn run_candidates(&self, candidates: Vec<RetentionCandidate>) -> RunReport {
        self.run(&crate::candidate::StaticCandidates(candidates)).await
    }

    async fn process_all(&self, candidates: Vec<RetentionCandidate>, report: &mut RunReport) {
        let now = self.now.unwrap_or(report.started_at);
        report.candidates = candidates.len();
        info!(
            "🧹 Processing {} candidates (idle threshold {} days, concurrency {})",
            candidates.len(),
            self.policy.idle_threshold.num_days(),
            self.max_concurrency
        );

        let acc = Mutex::new(Accumulator::default());
        stream::iter(candidates.into_iter().enumerate())
            .for_each_concurrent(self.max_concurrency, |(index, candidate)| {
                let acc = &acc;
                async move {
                    if acc.lock().await.aborted.is_some() {
                        return;
                    }
                    let outcome = self.process(candidate, now).await;
                    let mut acc = acc.lock().await;
                    if let Some(err) = outcome.kind.error().filter(|e| e.is_session_fatal()) {
                        if acc.aborted.is_none() {
                            error!("🛑 Engine session lost, stopping the run: {}", err);
                            acc.aborted = Some(err.to_string());
                        }
                    }
                    acc.outcomes.push((index, outcome));
                }
            })
            .await;

        let mut acc = acc.into_inner();
        acc.outcomes.sort_by_key(|(index, _)| *index);
        report.outcomes = acc.outcomes.into_iter().map(|(_, outcome)| outcome).collect();
        report.aborted = acc.aborted;
    }

    async fn process(&self, candidate: RetentionCandidate, now: DateTime<Utc>) -> TruncationOutcome {
        let started = Instant::now();
        let kind = match self.policy.evaluate(&candidate, now) {
            Verdict::Skip(reason) => {
                debug!("⏭️ {} ({}): {}", candidate.name, candidate.app_id, reason);
                OutcomeKind::Skipped(reason)
            }
            Verdict::Eligible { idle_for } => {
                info!(
                    "✂️ Truncating {} ({}), idle {} days, {:.2} MB",
                    candidate.name,
                    candidate.app_id,
                    idle_for.num_days(),
                    candidate.size_mb()
                );
                self.truncate(&candidate.app_id).await
            }
        };
        TruncationOutcome {
            app_id: candidate.app_id,
            name: candidate.name,
            size_bytes: candidate.size_bytes,
            kind,
            elapsed: started.elapsed(),
        }
    }

    async fn truncate(&self, app_id: &str) -> OutcomeKind {
        let mut stage = AppStage::Pending;
        loop {
            stage = match stage {
                AppStage::Pending => match self.engine.open_app(app_id).await {
                    Ok(app) => AppStage::Opened(app),
                    Err(e) => {
                        warn!("⚠️ {}", e);
                        AppStage::Closed(OutcomeKind::failed(FailureStage::Open, e))
                    }
                },
                AppStage::Opened(app) => match &self.plan.clear {
                    None => AppStage::Truncated(app),
                    Some(call) => match self.engine.invoke(&app, call).await {
                        Ok(_) => AppStage::Truncated(app),
                        Err(e) => {
                            warn!("⚠️ {}", e);
                            self.engine.close_app(app).await;
                            AppStage::Closed(OutcomeKind::failed(FailureStage::Clear, e))
                        }
                    },
                },
                AppStage::Truncated(app) => match self.engine.invoke(&app, &self.plan.save).await {
                    Ok(_) => AppStage::Saved(app),
                    Err(e) => {
                        error!("🚨 {} was truncated but NOT saved: {}", app_id, e);
                        self.engine.close_app(app).await;
                        AppStage::Closed(OutcomeKind::failed(FailureStage::Save, e))
                    }
                },
                AppStage::Saved(app) => {
                    self.engine.close_app(app).await;
                    info!("✅ Truncated {}", app_id);
                    AppStage::Closed(OutcomeKind::Truncated)
                }
                AppStage::Closed(kind) => return kind,
            };
        }
    }
}
