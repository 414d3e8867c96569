/**
 * Server Database Layer
 *
 * Postgres with a pgvector `vector(D)` column. Vectors are bound as text
 * literals cast with `::vector` and read back through `embedding::text`,
 * so no driver-side vector codec is needed. Ranking happens in SQL:
 *
 * ```text
 * score = (1 - (embedding <=> :query)) * confidence
 *         * exp(-lambda * age_in_days(updated_at))
 * ```
 *
 * filtered by org, optional project, tag-superset containment on the
 * JSONB tag column, raw min-confidence, and expiry. Vote increments are
 * a single UPDATE so two concurrent upvotes always converge to +2.
 */

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Error;
use crate::lesson::Lesson;
use crate::server::auth::GeneratedKey;
use crate::server::error::ApiError;
use crate::store::ScoredLesson;

type DbResult<T> = Result<T, ApiError>;

const LESSON_COLUMNS: &str =
    "id, problem, resolution, context, tags, confidence, source, project, \
     created_at, updated_at, expires_at, upvotes, downvotes, meta";

/// Create the schema if it is not there yet. Idempotent; run at startup.
pub async fn init_schema(pool: &PgPool, embedding_dim: usize) -> DbResult<()> {
    let statements = [
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        "CREATE TABLE IF NOT EXISTS orgs (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            subject TEXT NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS api_keys (
            id UUID PRIMARY KEY,
            org_id UUID NOT NULL REFERENCES orgs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            key_prefix TEXT NOT NULL,
            project TEXT,
            is_root BOOLEAN NOT NULL DEFAULT FALSE,
            role TEXT,
            user_id UUID REFERENCES users(id),
            revoked_at TIMESTAMPTZ,
            last_used_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS lessons (
                id TEXT PRIMARY KEY,
                org_id UUID NOT NULL REFERENCES orgs(id) ON DELETE CASCADE,
                problem TEXT NOT NULL,
                resolution TEXT NOT NULL,
                context TEXT,
                tags JSONB NOT NULL DEFAULT '[]'::jsonb,
                confidence DOUBLE PRECISION NOT NULL DEFAULT 0.5,
                source TEXT,
                project TEXT,
                embedding vector({embedding_dim}),
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ,
                upvotes INTEGER NOT NULL DEFAULT 0,
                downvotes INTEGER NOT NULL DEFAULT 0,
                meta JSONB NOT NULL DEFAULT '{{}}'::jsonb
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_lessons_org_project ON lessons(org_id, project)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_lessons_created_at ON lessons(created_at DESC)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_lessons_tags ON lessons USING GIN (tags)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(key_hash)".to_string(),
    ];

    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Render a vector as a pgvector text literal: `[0.1,0.2,...]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 8 + 2);
    out.push('[');
    for (index, value) in vector.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

/// Parse pgvector text output back into a vector.
pub fn parse_vector_text(text: &str) -> Result<Vec<f32>, Error> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| Error::Integrity(format!("malformed vector literal '{}'", text)))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| Error::Integrity(format!("malformed vector component '{}': {}", part, e)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Orgs, users, keys
// ---------------------------------------------------------------------------

pub async fn org_count(pool: &PgPool) -> DbResult<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM orgs").fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>("n")?)
}

pub async fn create_org(pool: &PgPool, name: &str) -> DbResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO orgs (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(id)
}

/// Upsert a user by external identity subject; returns its id.
pub async fn ensure_user(pool: &PgPool, subject: &str) -> DbResult<Uuid> {
    let row = sqlx::query(
        "INSERT INTO users (id, subject) VALUES ($1, $2)
         ON CONFLICT (subject) DO UPDATE SET subject = EXCLUDED.subject
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(subject)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("id")?)
}

#[derive(Debug, Clone)]
pub struct KeyRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub project: Option<String>,
    pub is_root: bool,
    pub role: Option<String>,
    pub user_id: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn key_from_row(row: &PgRow) -> Result<KeyRow, sqlx::Error> {
    Ok(KeyRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        key_hash: row.try_get("key_hash")?,
        key_prefix: row.try_get("key_prefix")?,
        project: row.try_get("project")?,
        is_root: row.try_get("is_root")?,
        role: row.try_get("role")?,
        user_id: row.try_get("user_id")?,
        revoked_at: row.try_get("revoked_at")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const KEY_COLUMNS: &str = "id, org_id, name, key_hash, key_prefix, project, is_root, role, \
                           user_id, revoked_at, last_used_at, created_at";

#[allow(clippy::too_many_arguments)]
pub async fn insert_key(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
    key: &GeneratedKey,
    project: Option<&str>,
    role: Option<&str>,
    user_id: Option<Uuid>,
    is_root: bool,
) -> DbResult<KeyRow> {
    let row = sqlx::query(&format!(
        "INSERT INTO api_keys (id, org_id, name, key_hash, key_prefix, project, is_root, role, user_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING {KEY_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(name)
    .bind(&key.hash)
    .bind(&key.prefix)
    .bind(project)
    .bind(is_root)
    .bind(role)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(key_from_row(&row)?)
}

pub async fn find_key_by_hash(pool: &PgPool, hash: &str) -> DbResult<Option<KeyRow>> {
    let row = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"))
        .bind(hash)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| key_from_row(&r)).transpose()?)
}

pub async fn touch_key_last_used(pool: &PgPool, key_id: Uuid) -> DbResult<()> {
    sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
        .bind(key_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_keys(pool: &PgPool, org_id: Uuid) -> DbResult<Vec<KeyRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE org_id = $1 ORDER BY created_at DESC"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(key_from_row)
        .collect::<Result<Vec<_>, _>>()?)
}

pub async fn get_key(pool: &PgPool, org_id: Uuid, key_id: Uuid) -> DbResult<Option<KeyRow>> {
    let row = sqlx::query(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE org_id = $1 AND id = $2"
    ))
    .bind(org_id)
    .bind(key_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| key_from_row(&r)).transpose()?)
}

pub async fn active_root_key_count(pool: &PgPool, org_id: Uuid) -> DbResult<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM api_keys
         WHERE org_id = $1 AND is_root AND revoked_at IS NULL",
    )
    .bind(org_id)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get::<i64, _>("n")?)
}

/// Set revoked_at on an active key; returns its hash for cache
/// invalidation, or None when no active key matched.
pub async fn revoke_key(pool: &PgPool, org_id: Uuid, key_id: Uuid) -> DbResult<Option<String>> {
    let row = sqlx::query(
        "UPDATE api_keys SET revoked_at = now()
         WHERE org_id = $1 AND id = $2 AND revoked_at IS NULL
         RETURNING key_hash",
    )
    .bind(org_id)
    .bind(key_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.try_get("key_hash")).transpose()?)
}

// ---------------------------------------------------------------------------
// Lessons
// ---------------------------------------------------------------------------

fn lesson_from_row(row: &PgRow) -> Result<Lesson, ApiError> {
    let id: String = row.try_get("id")?;

    let tags_value: serde_json::Value = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_value(tags_value)
        .map_err(|e| Error::Integrity(format!("lesson {} has corrupt tags: {}", id, e)))?;

    let meta_value: serde_json::Value = row.try_get("meta")?;
    let meta: serde_json::Map<String, serde_json::Value> = serde_json::from_value(meta_value)
        .map_err(|e| Error::Integrity(format!("lesson {} has corrupt meta: {}", id, e)))?;

    let embedding = row
        .try_get::<Option<String>, _>("embedding_text")?
        .map(|text| parse_vector_text(&text))
        .transpose()?;

    let upvotes: i32 = row.try_get("upvotes")?;
    let downvotes: i32 = row.try_get("downvotes")?;

    Ok(Lesson {
        id,
        problem: row.try_get("problem")?,
        resolution: row.try_get("resolution")?,
        context: row.try_get("context")?,
        tags,
        confidence: row.try_get("confidence")?,
        source: row.try_get("source")?,
        project: row.try_get("project")?,
        embedding,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
        upvotes: upvotes.max(0) as u32,
        downvotes: downvotes.max(0) as u32,
        meta,
    })
}

/// Insert or overwrite by id within one org. False means the id belongs
/// to a different org, which the caller reports as a conflict.
pub async fn upsert_lesson(pool: &PgPool, org_id: Uuid, lesson: &Lesson) -> DbResult<bool> {
    let tags = serde_json::to_value(&lesson.tags).map_err(Error::from)?;
    let meta = serde_json::to_value(&lesson.meta).map_err(Error::from)?;
    let embedding = lesson.embedding.as_deref().map(vector_literal);

    let result = sqlx::query(
        "INSERT INTO lessons
            (id, org_id, problem, resolution, context, tags, confidence, source, project,
             embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::vector, $11, $12, $13, $14, $15, $16)
         ON CONFLICT (id) DO UPDATE SET
            problem = EXCLUDED.problem,
            resolution = EXCLUDED.resolution,
            context = EXCLUDED.context,
            tags = EXCLUDED.tags,
            confidence = EXCLUDED.confidence,
            source = EXCLUDED.source,
            project = EXCLUDED.project,
            embedding = EXCLUDED.embedding,
            updated_at = EXCLUDED.updated_at,
            expires_at = EXCLUDED.expires_at,
            upvotes = EXCLUDED.upvotes,
            downvotes = EXCLUDED.downvotes,
            meta = EXCLUDED.meta
         WHERE lessons.org_id = EXCLUDED.org_id",
    )
    .bind(&lesson.id)
    .bind(org_id)
    .bind(&lesson.problem)
    .bind(&lesson.resolution)
    .bind(&lesson.context)
    .bind(tags)
    .bind(lesson.confidence)
    .bind(&lesson.source)
    .bind(&lesson.project)
    .bind(embedding)
    .bind(lesson.created_at)
    .bind(lesson.updated_at)
    .bind(lesson.expires_at)
    .bind(lesson.upvotes as i32)
    .bind(lesson.downvotes as i32)
    .bind(meta)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fetch one lesson within org and key scope; out-of-scope behaves as
/// absent.
pub async fn get_lesson(
    pool: &PgPool,
    org_id: Uuid,
    scope: Option<&str>,
    id: &str,
) -> DbResult<Option<Lesson>> {
    let row = sqlx::query(&format!(
        "SELECT {LESSON_COLUMNS}, embedding::text AS embedding_text
         FROM lessons
         WHERE id = $1 AND org_id = $2 AND ($3::text IS NULL OR project = $3::text)"
    ))
    .bind(id)
    .bind(org_id)
    .bind(scope)
    .fetch_optional(pool)
    .await?;
    row.map(|r| lesson_from_row(&r)).transpose()
}

/// Newest first, embeddings omitted (export carries them).
pub async fn list_lessons(
    pool: &PgPool,
    org_id: Uuid,
    project: Option<&str>,
    limit: i64,
    offset: i64,
) -> DbResult<Vec<Lesson>> {
    let rows = sqlx::query(&format!(
        "SELECT {LESSON_COLUMNS}, NULL::text AS embedding_text
         FROM lessons
         WHERE org_id = $1 AND ($2::text IS NULL OR project = $2::text)
         ORDER BY created_at DESC, id DESC
         LIMIT $3 OFFSET $4"
    ))
    .bind(org_id)
    .bind(project)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.iter().map(lesson_from_row).collect()
}

pub async fn count_lessons(pool: &PgPool, org_id: Uuid, project: Option<&str>) -> DbResult<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM lessons
         WHERE org_id = $1 AND ($2::text IS NULL OR project = $2::text)",
    )
    .bind(org_id)
    .bind(project)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get::<i64, _>("n")?)
}

/// Resolved PATCH payload: absolute values win over increments; both
/// default to no-op.
#[derive(Debug, Default)]
pub struct LessonChanges {
    pub confidence: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
    pub upvotes_abs: Option<i32>,
    pub upvote_inc: i32,
    pub downvotes_abs: Option<i32>,
    pub downvote_inc: i32,
}

/// Apply the permitted field updates and counter increments in a single
/// statement; the increments are atomic under concurrency.
pub async fn update_lesson(
    pool: &PgPool,
    org_id: Uuid,
    scope: Option<&str>,
    id: &str,
    changes: &LessonChanges,
) -> DbResult<Option<Lesson>> {
    let tags = changes
        .tags
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(Error::from)?;
    let meta = changes
        .meta
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(Error::from)?;

    let row = sqlx::query(&format!(
        "UPDATE lessons SET
            confidence = COALESCE($4::float8, confidence),
            tags = COALESCE($5::jsonb, tags),
            meta = COALESCE($6::jsonb, meta),
            upvotes = CASE WHEN $7::int4 IS NOT NULL THEN $7::int4 ELSE upvotes + $8 END,
            downvotes = CASE WHEN $9::int4 IS NOT NULL THEN $9::int4 ELSE downvotes + $10 END,
            updated_at = now()
         WHERE id = $1 AND org_id = $2 AND ($3::text IS NULL OR project = $3::text)
         RETURNING {LESSON_COLUMNS}, embedding::text AS embedding_text"
    ))
    .bind(id)
    .bind(org_id)
    .bind(scope)
    .bind(changes.confidence)
    .bind(tags)
    .bind(meta)
    .bind(changes.upvotes_abs)
    .bind(changes.upvote_inc)
    .bind(changes.downvotes_abs)
    .bind(changes.downvote_inc)
    .fetch_optional(pool)
    .await?;
    row.map(|r| lesson_from_row(&r)).transpose()
}

pub async fn delete_lesson(
    pool: &PgPool,
    org_id: Uuid,
    scope: Option<&str>,
    id: &str,
) -> DbResult<bool> {
    let result = sqlx::query(
        "DELETE FROM lessons
         WHERE id = $1 AND org_id = $2 AND ($3::text IS NULL OR project = $3::text)",
    )
    .bind(id)
    .bind(org_id)
    .bind(scope)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Ranked search over the native vector column. `lambda` is the
/// per-day exponential decay rate; min-confidence applies to the raw
/// value.
#[allow(clippy::too_many_arguments)]
pub async fn search_lessons(
    pool: &PgPool,
    org_id: Uuid,
    project: Option<&str>,
    tags: Option<&[String]>,
    min_confidence: Option<f64>,
    limit: i64,
    lambda: f64,
    query: &[f32],
) -> DbResult<Vec<ScoredLesson>> {
    let tags_json = match tags {
        Some(tags) if !tags.is_empty() => {
            Some(serde_json::to_value(tags).map_err(Error::from)?)
        }
        _ => None,
    };
    let now = Utc::now();

    let rows = sqlx::query(&format!(
        "SELECT {LESSON_COLUMNS}, embedding::text AS embedding_text,
                ((1 - (embedding <=> $2::vector)) * confidence
                 * exp(-$3 * GREATEST(EXTRACT(EPOCH FROM ($4 - updated_at))::float8, 0) / 86400.0)
                )::float8 AS score
         FROM lessons
         WHERE org_id = $1
           AND embedding IS NOT NULL
           AND ($5::text IS NULL OR project = $5::text)
           AND ($6::jsonb IS NULL OR tags @> $6::jsonb)
           AND ($7::float8 IS NULL OR confidence >= $7::float8)
           AND (expires_at IS NULL OR expires_at > $4)
         ORDER BY score DESC, created_at DESC, id DESC
         LIMIT $8"
    ))
    .bind(org_id)
    .bind(vector_literal(query))
    .bind(lambda)
    .bind(now)
    .bind(project)
    .bind(tags_json)
    .bind(min_confidence)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ScoredLesson {
                score: row.try_get::<f64, _>("score")?,
                lesson: lesson_from_row(row)?,
            })
        })
        .collect()
}

/// Every lesson in scope, embeddings included.
pub async fn export_lessons(
    pool: &PgPool,
    org_id: Uuid,
    project: Option<&str>,
) -> DbResult<Vec<Lesson>> {
    let rows = sqlx::query(&format!(
        "SELECT {LESSON_COLUMNS}, embedding::text AS embedding_text
         FROM lessons
         WHERE org_id = $1 AND ($2::text IS NULL OR project = $2::text)
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(org_id)
    .bind(project)
    .fetch_all(pool)
    .await?;
    rows.iter().map(lesson_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::auth::generate_key;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn test_vector_literal_round_trip() {
        let vector = vec![0.25, -1.5, 3.0];
        let literal = vector_literal(&vector);
        assert_eq!(literal, "[0.25,-1.5,3]");
        assert_eq!(parse_vector_text(&literal).unwrap(), vector);

        assert_eq!(parse_vector_text("[]").unwrap(), Vec::<f32>::new());
        assert!(parse_vector_text("0.1,0.2").is_err());
        assert!(parse_vector_text("[a,b]").is_err());
    }

    /// Live-database tests run only when LORE_TEST_DATABASE_URL points at
    /// a Postgres with the pgvector extension available.
    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("LORE_TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .ok()?;
        init_schema(&pool, crate::embedding::EMBEDDING_DIM).await.ok()?;
        Some(pool)
    }

    fn unit_vec(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; crate::embedding::EMBEDDING_DIM];
        v[hot] = 1.0;
        v
    }

    fn lesson(problem: &str, embedding: Vec<f32>) -> Lesson {
        Lesson::builder()
            .problem(problem)
            .resolution("fix")
            .tags(vec!["t"])
            .confidence(0.9)
            .embedding(embedding)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_org_and_key_round_trip() {
        let Some(pool) = test_pool().await else { return };

        let org = create_org(&pool, "acme").await.unwrap();
        let key = generate_key();
        let row = insert_key(&pool, org, "root", &key, None, None, None, true)
            .await
            .unwrap();
        assert!(row.is_root);
        assert!(row.revoked_at.is_none());

        let found = find_key_by_hash(&pool, &key.hash).await.unwrap().unwrap();
        assert_eq!(found.id, row.id);
        assert_eq!(found.org_id, org);

        assert_eq!(active_root_key_count(&pool, org).await.unwrap(), 1);

        let hash = revoke_key(&pool, org, row.id).await.unwrap().unwrap();
        assert_eq!(hash, key.hash);
        assert_eq!(active_root_key_count(&pool, org).await.unwrap(), 0);
        // Already revoked: no-op
        assert!(revoke_key(&pool, org, row.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lesson_upsert_get_and_scope() {
        let Some(pool) = test_pool().await else { return };

        let org = create_org(&pool, "acme").await.unwrap();
        let other_org = create_org(&pool, "intruder").await.unwrap();

        let mut l = lesson("broke", unit_vec(0));
        l.project = Some("api".to_string());
        assert!(upsert_lesson(&pool, org, &l).await.unwrap());

        // Same id from another org never overwrites
        assert!(!upsert_lesson(&pool, other_org, &l).await.unwrap());

        let got = get_lesson(&pool, org, None, &l.id).await.unwrap().unwrap();
        assert_eq!(got.problem, "broke");
        assert_eq!(got.embedding.as_ref().unwrap().len(), crate::embedding::EMBEDDING_DIM);

        // Project scope: matching scope sees it, foreign scope does not
        assert!(get_lesson(&pool, org, Some("api"), &l.id).await.unwrap().is_some());
        assert!(get_lesson(&pool, org, Some("web"), &l.id).await.unwrap().is_none());
        assert!(get_lesson(&pool, other_org, None, &l.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_atomic_vote_increments_converge() {
        let Some(pool) = test_pool().await else { return };

        let org = create_org(&pool, "acme").await.unwrap();
        let l = lesson("votes", unit_vec(1));
        upsert_lesson(&pool, org, &l).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let id = l.id.clone();
            handles.push(tokio::spawn(async move {
                let changes = LessonChanges {
                    upvote_inc: 1,
                    ..LessonChanges::default()
                };
                update_lesson(&pool, org, None, &id, &changes).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let got = get_lesson(&pool, org, None, &l.id).await.unwrap().unwrap();
        assert_eq!(got.upvotes, 8);
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let Some(pool) = test_pool().await else { return };

        let org = create_org(&pool, "acme").await.unwrap();

        let close = lesson("close", unit_vec(2));
        let far = lesson("far", unit_vec(3));
        let mut weak = lesson("weak", unit_vec(2));
        weak.confidence = 0.1;
        let mut expired = lesson("expired", unit_vec(2));
        expired.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));

        for l in [&close, &far, &weak, &expired] {
            upsert_lesson(&pool, org, l).await.unwrap();
        }

        let hits = search_lessons(
            &pool,
            org,
            None,
            Some(&["t".to_string()]),
            Some(0.5),
            10,
            0.01,
            &unit_vec(2),
        )
        .await
        .unwrap();

        let problems: Vec<&str> = hits.iter().map(|h| h.lesson.problem.as_str()).collect();
        assert!(problems.contains(&"close"));
        assert!(!problems.contains(&"weak"));
        assert!(!problems.contains(&"expired"));
        assert_eq!(problems.first(), Some(&"close"));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
