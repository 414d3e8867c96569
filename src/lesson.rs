/**
 * Lesson Model Module
 *
 * A Lesson is one unit of operational knowledge: what went wrong, how it
 * was resolved, and enough metadata to rank it later. Construction goes
 * through `LessonBuilder`, which validates the required text fields and
 * the confidence range; everything else has serde-visible defaults so the
 * same struct is the wire format.
 *
 * # Lesson Structure
 *
 * ```text
 * Lesson {
 *     id: "0192c01a2b3e0000a1b2c3d4"      (monotonic, lexicographically sortable)
 *     problem: "Stripe API returns 429 after 100 req/min"
 *     resolution: "Exponential backoff starting at 1s, cap at 32s"
 *     tags: ["rate-limit", "stripe"]      (sorted, deduplicated)
 *     confidence: 0.9
 *     embedding: [f32; 384]               (optional)
 *     created_at / updated_at / expires_at
 *     upvotes / downvotes
 *     meta: { ... }                       (opaque JSON extension map)
 * }
 * ```
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Last issued (milliseconds, sequence) pair; ids never go backwards even
/// if the wall clock does.
static ID_STATE: Mutex<(u64, u16)> = Mutex::new((0, 0));

/// Generate a lesson id: 12 hex chars of zero-padded unix milliseconds,
/// 4 hex chars of per-process sequence, 8 hex chars of randomness. Fixed
/// width makes lexicographic order equal creation order within a process.
pub fn lesson_id() -> String {
    let now_ms = Utc::now().timestamp_millis().max(0) as u64;
    let mut state = ID_STATE.lock().unwrap();
    let (millis, seq) = if now_ms > state.0 {
        (now_ms, 0)
    } else if state.1 == u16::MAX {
        (state.0 + 1, 0)
    } else {
        (state.0, state.1 + 1)
    };
    *state = (millis, seq);
    drop(state);

    let suffix: u32 = rand::random();
    format!("{:012x}{:04x}{:08x}", millis & 0xffff_ffff_ffff, seq, suffix)
}

/// Normalize a tag set: trim, drop empties, sort, coalesce duplicates.
/// Insertion order is irrelevant by contract, so sorted form is canonical.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lesson {
    /// Monotonic id from `lesson_id()`.
    pub id: String,

    /// What went wrong. Redacted before storage.
    pub problem: String,

    /// How it was fixed. Redacted before storage.
    pub resolution: String,

    /// Optional surrounding context. Redacted when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Canonicalized tag set.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Publisher's own estimate in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Free-form producer identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Optional namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Fixed-dimension vector; absent only when no embedding provider is
    /// configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Past expiry makes the lesson invisible to queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub upvotes: u32,
    #[serde(default)]
    pub downvotes: u32,

    /// Opaque JSON extension map.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Lesson {
    pub fn builder() -> LessonBuilder {
        LessonBuilder::default()
    }

    /// True when `expires_at` lies at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// The text the embedding is computed over: problem, resolution, and
    /// context when present, space-joined, after redaction.
    pub fn embedding_text(&self) -> String {
        match &self.context {
            Some(context) => format!("{} {} {}", self.problem, self.resolution, context),
            None => format!("{} {}", self.problem, self.resolution),
        }
    }
}

/// Builder with validation at `build()` time: problem and resolution must
/// be non-empty, confidence must sit in [0, 1]. Timestamps are captured
/// once so `created_at == updated_at` on a fresh lesson.
#[derive(Default)]
pub struct LessonBuilder {
    problem: Option<String>,
    resolution: Option<String>,
    context: Option<String>,
    tags: Vec<String>,
    confidence: Option<f64>,
    source: Option<String>,
    project: Option<String>,
    embedding: Option<Vec<f32>>,
    expires_at: Option<DateTime<Utc>>,
    meta: serde_json::Map<String, serde_json::Value>,
}

impl LessonBuilder {
    pub fn problem(mut self, problem: impl Into<String>) -> Self {
        self.problem = Some(problem.into());
        self
    }

    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn tags(mut self, tags: Vec<impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(|t| t.into()).collect();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn meta_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<Lesson> {
        let problem = self
            .problem
            .ok_or_else(|| Error::Validation("problem is required".to_string()))?;
        let resolution = self
            .resolution
            .ok_or_else(|| Error::Validation("resolution is required".to_string()))?;

        if problem.trim().is_empty() {
            return Err(Error::Validation("problem cannot be empty".to_string()));
        }
        if resolution.trim().is_empty() {
            return Err(Error::Validation("resolution cannot be empty".to_string()));
        }

        let confidence = self.confidence.unwrap_or_else(default_confidence);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::Validation(format!(
                "confidence must be within [0, 1], got {}",
                confidence
            )));
        }

        let now = Utc::now();
        Ok(Lesson {
            id: lesson_id(),
            problem,
            resolution,
            context: self.context,
            tags: normalize_tags(self.tags),
            confidence,
            source: self.source,
            project: self.project,
            embedding: self.embedding,
            created_at: now,
            updated_at: now,
            expires_at: self.expires_at,
            upvotes: 0,
            downvotes: 0,
            meta: self.meta,
        })
    }
}
