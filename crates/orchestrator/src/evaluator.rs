//! Retention decisions. Pure: the clock is an input.

use crate::candidate::RetentionCandidate;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use retainer_core::config::AppConfig;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    NotIdle,
    Excluded,
    UnknownRecency,
    Published,
    BelowMinimumSize,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::NotIdle => "notIdle",
            SkipReason::Excluded => "excluded",
            SkipReason::UnknownRecency => "unknownRecency",
            SkipReason::Published => "published",
            SkipReason::BelowMinimumSize => "belowMinimumSize",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Eligible { idle_for: Duration },
    Skip(SkipReason),
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible { .. })
    }
}

/// Apps that are never truncated, by id or by name pattern.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    ids: HashSet<String>,
    patterns: Vec<Regex>,
}

impl ExclusionList {
    pub fn new<I, P>(ids: I, patterns: P) -> Result<Self, regex::Error>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ids: ids.into_iter().map(Into::into).collect(),
            patterns,
        })
    }

    pub fn matches(&self, candidate: &RetentionCandidate) -> bool {
        self.ids.contains(&candidate.app_id) || self.patterns.iter().any(|p| p.is_match(&candidate.name))
    }

}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub idle_threshold: Duration,
    pub exclusions: ExclusionList,
    /// Apps at or below this size are left alone. Zero disables the check.
    pub min_size_bytes: u64,
    /// Off unless asked for: published apps are shared with consumers.
    pub include_published: bool,
}

impl RetentionPolicy {
    pub fn new(idle_threshold: Duration) -> Self {
        Self {
            idle_threshold,
            exclusions: ExclusionList::default(),
            min_size_bytes: 0,
            include_published: false,
        }
    }

    pub fn idle_days(days: i64) -> Self {
        Self::new(Duration::days(days))
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionList) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_min_size(mut self, bytes: u64) -> Self {
        self.min_size_bytes = bytes;
        self
    }

    pub fn include_published(mut self, include: bool) -> Self {
        self.include_published = include;
        self
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, regex::Error> {
        let exclusions = ExclusionList::new(config.excluded_ids(), config.excluded_patterns())?;
        Ok(Self::idle_days(config.idle_days)
            .with_exclusions(exclusions)
            .with_min_size(config.min_size_bytes())
            .include_published(config.include_published))
    }

    pub fn evaluate(&self, candidate: &RetentionCandidate, now: DateTime<Utc>) -> Verdict {
        evaluate(candidate, self, now)
    }
}

pub fn evaluate(candidate: &RetentionCandidate, policy: &RetentionPolicy, now: DateTime<Utc>) -> Verdict {
    if policy.exclusions.matches(candidate) {
        return Verdict::Skip(SkipReason::Excluded);
    }
    if candidate.published && !policy.include_published {
        return Verdict::Skip(SkipReason::Published);
    }
    let Some(last_used) = candidate.last_used() else {
        return Verdict::Skip(SkipReason::UnknownRecency);
    };
    let idle_for = now - last_used;
    if idle_for < policy.idle_threshold {
        return Verdict::Skip(SkipReason::NotIdle);
    }
    if policy.min_size_bytes > 0 && candidate.size_bytes <= policy.min_size_bytes {
        return Verdict::Skip(SkipReason::BelowMinimumSize);
    }
    Verdict::Eligible { idle_for }
}

pub fn is_eligible(candidate: &RetentionCandidate, policy: &RetentionPolicy, now: DateTime<Utc>) -> bool {
    evaluate(candidate, policy, now).is_eligible()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    fn used_days_ago(days: i64) -> RetentionCandidate {
        RetentionCandidate::new("app", "Sales")
            .accessed_at(now() - Duration::days(days))
            .with_size(10 * 1024 * 1024)
    }

    #[test]
    fn test_idle_candidate_is_eligible() {
        let verdict = evaluate(&used_days_ago(400), &RetentionPolicy::idle_days(90), now());
        assert_eq!(verdict, Verdict::Eligible { idle_for: Duration::days(400) });
    }

    #[test]
    fn test_recent_candidate_is_not_idle() {
        let verdict = evaluate(&used_days_ago(5), &RetentionPolicy::idle_days(90), now());
        assert_eq!(verdict, Verdict::Skip(SkipReason::NotIdle));
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let policy = RetentionPolicy::idle_days(90);
        assert!(is_eligible(&used_days_ago(90), &policy, now()));
        let just_short = RetentionCandidate::new("app", "Sales")
            .accessed_at(now() - Duration::days(90) + Duration::seconds(1));
        assert!(!is_eligible(&just_short, &policy, now()));
    }

    #[test]
    fn test_recent_access_outweighs_old_reload() {
        let c = RetentionCandidate::new("app", "Sales")
            .reloaded_at(now() - Duration::days(400))
            .accessed_at(now() - Duration::days(3));
        assert!(!is_eligible(&c, &RetentionPolicy::idle_days(90), now()));
    }

    #[test]
    fn test_unknown_recency_is_never_eligible() {
        let c = RetentionCandidate::new("app", "Sales").with_size(u64::MAX);
        assert_eq!(
            evaluate(&c, &RetentionPolicy::idle_days(0), now()),
            Verdict::Skip(SkipReason::UnknownRecency)
        );
    }

    #[test]
    fn test_exclusions_by_id_and_pattern() {
        let exclusions = ExclusionList::new(["keep-me"], ["^Monitoring"]).unwrap();
        let policy = RetentionPolicy::idle_days(90).with_exclusions(exclusions);

        let by_id = RetentionCandidate::new("keep-me", "Sales").accessed_at(now() - Duration::days(400));
        let by_name = RetentionCandidate::new("x", "Monitoring - Ops").accessed_at(now() - Duration::days(400));
        assert_eq!(evaluate(&by_id, &policy, now()), Verdict::Skip(SkipReason::Excluded));
        assert_eq!(evaluate(&by_name, &policy, now()), Verdict::Skip(SkipReason::Excluded));
        assert!(is_eligible(&used_days_ago(400), &policy, now()));
    }

    #[test]
    fn test_bad_pattern_is_reported() {
        assert!(ExclusionList::new(Vec::<String>::new(), ["(unclosed"]).is_err());
    }

    #[test]
    fn test_published_apps_need_opt_in() {
        let c = used_days_ago(400).published(true);
        let strict = RetentionPolicy::idle_days(90);
        assert!(!strict.include_published);
        assert_eq!(evaluate(&c, &strict, now()), Verdict::Skip(SkipReason::Published));
        assert!(is_eligible(&c, &strict.include_published(true), now()));
    }

    #[test]
    fn test_small_apps_are_left_alone() {
        let policy = RetentionPolicy::idle_days(90).with_min_size(1024 * 1024);
        let tiny = used_days_ago(400).with_size(1024 * 1024);
        assert_eq!(evaluate(&tiny, &policy, now()), Verdict::Skip(SkipReason::BelowMinimumSize));
        assert!(is_eligible(&used_days_ago(400), &policy, now()));
    }

    #[test]
    fn test_verdict_is_deterministic() {
        let policy = RetentionPolicy::idle_days(90).with_min_size(1);
        let cases = [used_days_ago(400), used_days_ago(5), RetentionCandidate::new("a", "b")];
        for c in &cases {
            let first = evaluate(c, &policy, now());
            for _ in 0..5 {
                assert_eq!(evaluate(c, &policy, now()), first);
            }
        }
    }
}
