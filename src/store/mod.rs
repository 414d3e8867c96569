/**
 * Store Capability Module
 *
 * One capability set over lesson persistence with three client-side
 * realizations: `MemoryStore` (mutex-guarded map), `SqliteStore` (embedded
 * single-file database with blob vectors), and `RemoteStore` (HTTP client
 * of the tenant-scoped server). The server implements the same search
 * contract on its own database path (`server::db`).
 *
 * Shared semantics, identical across backends:
 * - `list` orders by `created_at` descending
 * - `search` orders by score descending, ties by `created_at` then `id`,
 *   both descending
 * - tag filtering is subset (all-of); empty tag set matches everything
 * - `min_confidence` applies to raw confidence, before decay
 * - expired lessons and lessons without an embedding never appear in
 *   search results
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::lesson::Lesson;
use crate::scorer;

pub mod memory;
pub mod remote;
pub mod sqlite;

pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

/// Default number of search results when the caller does not say.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

/// Hybrid search parameters. The half-life rides along so stores stay
/// stateless about scoring; the remote store does not transmit it because
/// the server owns its own decay shape.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    /// Subset filter: a lesson matches iff every listed tag is present.
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub limit: usize,
    /// Raw-confidence floor, applied before decay.
    pub min_confidence: Option<f64>,
    pub half_life_days: f64,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            project: None,
            limit: DEFAULT_SEARCH_LIMIT,
            min_confidence: None,
            half_life_days: scorer::DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

/// One search hit. Serializes with the lesson fields flattened next to the
/// score, which is also the wire shape of `/v1/lessons/search` results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredLesson {
    pub score: f64,
    #[serde(flatten)]
    pub lesson: Lesson,
}

/// The capability set shared by every store variant. All operations may
/// block on I/O; none retries on failure. A closed store rejects every
/// subsequent operation; `close` itself is idempotent.
#[async_trait]
pub trait LessonStore: Send + Sync {
    /// Insert or overwrite by id. Durable before returning in persistent
    /// stores.
    async fn save(&self, lesson: &Lesson) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Lesson>>;

    /// Newest first; `limit` applied after ordering.
    async fn list(&self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Lesson>>;

    /// Update the mutable fields (confidence, tags, vote counters, meta,
    /// `updated_at`). Returns false when the id is unknown.
    async fn update(&self, lesson: &Lesson) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Atomic +1 on one vote counter. Returns false when the id is
    /// unknown.
    async fn vote(&self, id: &str, vote: Vote) -> Result<bool>;

    /// Hybrid retrieval per the shared semantics above.
    async fn search(&self, query: &[f32], filter: &SearchFilter) -> Result<Vec<ScoredLesson>>;

    /// Every accessible lesson, embeddings included, newest first.
    async fn export(&self) -> Result<Vec<Lesson>>;

    async fn count(&self) -> Result<usize>;

    /// Release backing resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Non-scoring filter predicate shared by the local stores (and used to
/// re-verify rows the SQL pre-filter returned).
pub(crate) fn matches_filter(lesson: &Lesson, filter: &SearchFilter, now: DateTime<Utc>) -> bool {
    if lesson.is_expired(now) {
        return false;
    }
    if let Some(project) = &filter.project {
        if lesson.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(min) = filter.min_confidence {
        if lesson.confidence < min {
            return false;
        }
    }
    filter.tags.iter().all(|tag| lesson.tags.contains(tag))
}

/// Score one candidate. `None` when the lesson has no embedding; a stored
/// vector whose dimension disagrees with the query is an integrity
/// failure.
pub(crate) fn score_lesson(
    lesson: &Lesson,
    query: &[f32],
    now: DateTime<Utc>,
    half_life_days: f64,
) -> Result<Option<f64>> {
    let embedding = match &lesson.embedding {
        Some(embedding) => embedding,
        None => return Ok(None),
    };
    if embedding.len() != query.len() {
        return Err(Error::Integrity(format!(
            "lesson {} holds a {}-dimension embedding, query has {}",
            lesson.id,
            embedding.len(),
            query.len()
        )));
    }

    let age_days = ((now - lesson.updated_at).num_milliseconds().max(0)) as f64 / 86_400_000.0;
    Ok(Some(scorer::final_score(
        scorer::cosine(query, embedding),
        lesson.confidence,
        age_days,
        lesson.upvotes,
        lesson.downvotes,
        half_life_days,
    )))
}

/// Deterministic result ordering: score descending, then `created_at`
/// descending, then `id` descending; truncated to `limit`.
pub(crate) fn rank(mut hits: Vec<ScoredLesson>, limit: usize) -> Vec<ScoredLesson> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.lesson.created_at.cmp(&a.lesson.created_at))
            .then_with(|| b.lesson.id.cmp(&a.lesson.id))
    });
    hits.truncate(limit);
    hits
}
