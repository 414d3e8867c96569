/**
 * Wire Protocol Module
 *
 * Request and response bodies for the `/v1` HTTP surface, shared by the
 * remote store client and the server so both sides deserialize the same
 * shapes. Embeddings travel as JSON arrays of numbers of length D.
 *
 * Vote increments ride the update payload as the `"+1"` sentinel
 * (`CounterDelta::Increment`), which the server applies as a single atomic
 * SQL increment; absolute counter values are accepted for import-style
 * round-trips.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lesson::Lesson;
use crate::store::ScoredLesson;

/// Machine-readable error body: `{error: <code>, message: <text>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Publish body. The id and timestamps are optional; the server fills in
/// a monotonic id and the current time when a bare client omits them. The
/// library client always sends the full record it already built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub problem: String,
    pub resolution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<u32>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl From<&Lesson> for PublishRequest {
    fn from(lesson: &Lesson) -> Self {
        Self {
            id: Some(lesson.id.clone()),
            problem: lesson.problem.clone(),
            resolution: lesson.resolution.clone(),
            context: lesson.context.clone(),
            tags: lesson.tags.clone(),
            confidence: Some(lesson.confidence),
            source: lesson.source.clone(),
            project: lesson.project.clone(),
            embedding: lesson.embedding.clone(),
            created_at: Some(lesson.created_at),
            updated_at: Some(lesson.updated_at),
            expires_at: lesson.expires_at,
            upvotes: Some(lesson.upvotes),
            downvotes: Some(lesson.downvotes),
            meta: lesson.meta.clone(),
        }
    }
}

/// Counter field in an update payload: either the `"+1"` increment
/// sentinel or an absolute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CounterDelta {
    Increment(String),
    Set(u32),
}

impl CounterDelta {
    pub fn plus_one() -> Self {
        CounterDelta::Increment("+1".to_string())
    }

    /// Resolve to (increment, absolute). Only `"+1"` is a valid sentinel.
    pub fn resolve(&self) -> Result<(u32, Option<u32>)> {
        match self {
            CounterDelta::Increment(s) if s == "+1" => Ok((1, None)),
            CounterDelta::Increment(s) => Err(Error::Validation(format!(
                "unsupported counter sentinel '{}', expected \"+1\"",
                s
            ))),
            CounterDelta::Set(value) => Ok((0, Some(*value))),
        }
    }
}

/// PATCH body. Absent fields are left untouched; the permitted set is
/// confidence, tags, meta, and the vote counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateLessonRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<CounterDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<CounterDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredLesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub lessons: Vec<Lesson>,
    /// Total accessible lessons in scope, independent of paging.
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgInitRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgInitResponse {
    pub org_id: Uuid,
    pub name: String,
    pub key_id: Uuid,
    /// Root key secret; returned exactly once.
    pub api_key: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// External identity subject to link for audit; the server upserts the
    /// matching user record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyResponse {
    pub id: Uuid,
    pub name: String,
    /// Key secret; returned exactly once.
    pub key: String,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
}

/// Key listing entry; never carries the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: Uuid,
    pub name: String,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub is_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyListResponse {
    pub keys: Vec<KeyInfo>,
}
