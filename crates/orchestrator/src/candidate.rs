use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retainer_engine::{DocEntry, EngineHandle};
use serde::Serialize;
use tracing::{debug, info};

/// Read-only metadata about one application, as the evaluator sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionCandidate {
    pub app_id: String,
    pub name: String,
    pub last_reload: Option<DateTime<Utc>>,
    pub last_access: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub published: bool,
}

impl RetentionCandidate {
    pub fn new(app_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            name: name.into(),
            last_reload: None,
            last_access: None,
            size_bytes: 0,
            published: false,
        }
    }

    pub fn reloaded_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_reload = Some(at);
        self
    }

    pub fn accessed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_access = Some(at);
        self
    }

    pub fn with_size(mut self, bytes: u64) -> Self {
        self.size_bytes = bytes;
        self
    }

    pub fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// The most recent of reload and access, if either is known.
    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        match (self.last_reload, self.last_access) {
            (Some(r), Some(a)) => Some(r.max(a)),
            (r, a) => r.or(a),
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0
    }

    /// Maps an engine doc-list entry. The engine does not report access
    /// times, so only the reload time is carried.
    pub fn from_doc(entry: &DocEntry) -> Self {
        let last_reload = entry.last_reload_time.as_deref().and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    debug!("Unparsable reload time {:?} on {}: {}", raw, entry.doc_id, e);
                    None
                }
            }
        });

        Self {
            app_id: entry.doc_id.clone(),
            name: entry
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| entry.doc_name.clone()),
            last_reload,
            last_access: None,
            size_bytes: entry.file_size.max(0.0) as u64,
            published: entry.meta.published,
        }
    }
}

/// Supplies the finite list of applications for one run.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self) -> anyhow::Result<Vec<RetentionCandidate>>;
}

/// Lists documents through the engine session (`GetDocList`).
pub struct DocListSource<'a> {
    engine: &'a EngineHandle,
}

impl<'a> DocListSource<'a> {
    pub fn new(engine: &'a EngineHandle) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CandidateSource for DocListSource<'_> {
    async fn candidates(&self) -> anyhow::Result<Vec<RetentionCandidate>> {
        let docs = self.engine.doc_list().await?;
        info!("📚 Engine lists {} applications", docs.len());
        Ok(docs.iter().map(RetentionCandidate::from_doc).collect())
    }
}

/// An already materialized list.
pub struct StaticCandidates(pub Vec<RetentionCandidate>);

#[async_trait]
impl CandidateSource for StaticCandidates {
    async fn candidates(&self) -> anyhow::Result<Vec<RetentionCandidate>> {
        Ok(self.0.clone())
    }
}
