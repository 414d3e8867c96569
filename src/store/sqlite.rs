/**
 * Embedded SQLite Store
 *
 * Single-file database with the `lessons` table mirroring the data model.
 * Embeddings live in a BLOB column as little-endian f32 (`4*D` bytes),
 * the same bytes the canonical local interchange format uses. Write-ahead
 * journaling is enabled so concurrent readers never block the writer.
 *
 * SCHEMA:
 * - id TEXT PRIMARY KEY
 * - problem / resolution TEXT, context TEXT nullable
 * - tags TEXT (JSON array, canonical sorted form)
 * - confidence REAL, source / project TEXT nullable
 * - embedding BLOB nullable (4*D little-endian f32)
 * - created_at / updated_at TEXT (fixed-width RFC 3339 millis, so string
 *   order is time order), expires_at TEXT nullable
 * - upvotes / downvotes INTEGER
 * - meta TEXT (JSON object)
 *
 * Hybrid search runs the cheap filters in SQL (project, tag containment,
 * min-confidence, unexpired, embedding present), then scores the
 * candidates in Rust: cosine, geometric time decay, vote factor, top-k.
 */

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::embedding::{vector_from_blob, vector_to_blob};
use crate::error::{Error, Result};
use crate::lesson::{normalize_tags, Lesson};
use crate::store::{matches_filter, rank, score_lesson, LessonStore, ScoredLesson, SearchFilter, Vote};

const COLUMNS: &str = "id, problem, resolution, context, tags, confidence, source, project, \
                       embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta";

/// Raw row image; converted to a `Lesson` outside the rusqlite closure so
/// JSON and timestamp failures surface as integrity errors, not mapping
/// errors.
type RawLesson = (
    String,
    String,
    String,
    Option<String>,
    String,
    f64,
    Option<String>,
    Option<String>,
    Option<Vec<u8>>,
    String,
    String,
    Option<String>,
    i64,
    i64,
    String,
);

pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    dim: usize,
}

impl SqliteStore {
    /// Open (or create) the database file, enable WAL, and initialize the
    /// schema. `dim` is the one embedding dimension the store accepts.
    pub fn open<P: AsRef<Path>>(path: P, dim: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Io(format!("failed to create database directory: {}", e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("failed to open lesson database: {}", e)))?;

        // PRAGMA returns a row, so query_row instead of execute
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;

        let store = Self {
            conn: Mutex::new(Some(conn)),
            dim,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database for tests: no file cleanup, isolated state.
    pub fn open_in_memory(dim: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(Some(conn)),
            dim,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let guard = self.conn.lock().unwrap();
        let conn = open_conn(&guard)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS lessons (
                id TEXT PRIMARY KEY,
                problem TEXT NOT NULL,
                resolution TEXT NOT NULL,
                context TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                confidence REAL NOT NULL DEFAULT 0.5,
                source TEXT,
                project TEXT,
                embedding BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT,
                upvotes INTEGER NOT NULL DEFAULT 0,
                downvotes INTEGER NOT NULL DEFAULT 0,
                meta TEXT NOT NULL DEFAULT '{}'
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lessons_project ON lessons(project)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lessons_created_at ON lessons(created_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lessons_tags ON lessons(tags)",
            [],
        )?;

        Ok(())
    }

    fn check_dimension(&self, lesson: &Lesson) -> Result<()> {
        if let Some(embedding) = &lesson.embedding {
            if embedding.len() != self.dim {
                return Err(Error::Validation(format!(
                    "embedding has {} dimensions, store is configured for {}",
                    embedding.len(),
                    self.dim
                )));
            }
        }
        Ok(())
    }

    fn hydrate(&self, raw: RawLesson) -> Result<Lesson> {
        let (
            id,
            problem,
            resolution,
            context,
            tags_json,
            confidence,
            source,
            project,
            embedding_blob,
            created_at,
            updated_at,
            expires_at,
            upvotes,
            downvotes,
            meta_json,
        ) = raw;

        let tags: Vec<String> = serde_json::from_str(&tags_json)
            .map_err(|e| Error::Integrity(format!("lesson {} has corrupt tags: {}", id, e)))?;
        let meta: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&meta_json)
            .map_err(|e| Error::Integrity(format!("lesson {} has corrupt meta: {}", id, e)))?;
        let embedding = match embedding_blob {
            Some(blob) => Some(
                vector_from_blob(&blob, self.dim)
                    .map_err(|e| Error::Integrity(format!("lesson {}: {}", id, e)))?,
            ),
            None => None,
        };

        Ok(Lesson {
            id,
            problem,
            resolution,
            context,
            tags,
            confidence,
            source,
            project,
            embedding,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            expires_at: expires_at.as_deref().map(parse_ts).transpose()?,
            upvotes: upvotes.max(0) as u32,
            downvotes: downvotes.max(0) as u32,
            meta,
        })
    }
}

fn open_conn<'a>(guard: &'a std::sync::MutexGuard<'_, Option<Connection>>) -> Result<&'a Connection> {
    guard
        .as_ref()
        .ok_or_else(|| Error::Internal("sqlite store is closed".to_string()))
}

/// Fixed-width RFC 3339 with millisecond precision; lexicographic order
/// equals time order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Integrity(format!("corrupt timestamp '{}': {}", raw, e)))
}

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLesson> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

#[async_trait]
impl LessonStore for SqliteStore {
    async fn save(&self, lesson: &Lesson) -> Result<()> {
        self.check_dimension(lesson)?;

        let tags_json = serde_json::to_string(&normalize_tags(lesson.tags.clone()))?;
        let meta_json = serde_json::to_string(&lesson.meta)?;
        let blob = lesson.embedding.as_ref().map(|v| vector_to_blob(v));

        let guard = self.conn.lock().unwrap();
        let conn = open_conn(&guard)?;
        conn.execute(
            "INSERT OR REPLACE INTO lessons
                (id, problem, resolution, context, tags, confidence, source, project,
                 embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                lesson.id,
                lesson.problem,
                lesson.resolution,
                lesson.context,
                tags_json,
                lesson.confidence,
                lesson.source,
                lesson.project,
                blob,
                format_ts(lesson.created_at),
                format_ts(lesson.updated_at),
                lesson.expires_at.map(format_ts),
                lesson.upvotes,
                lesson.downvotes,
                meta_json,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Lesson>> {
        let raw = {
            let guard = self.conn.lock().unwrap();
            let conn = open_conn(&guard)?;
            conn.query_row(
                &format!("SELECT {} FROM lessons WHERE id = ?1", COLUMNS),
                params![id],
                raw_from_row,
            )
            .optional()?
        };
        raw.map(|r| self.hydrate(r)).transpose()
    }

    async fn list(&self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Lesson>> {
        let raws: Vec<RawLesson> = {
            let guard = self.conn.lock().unwrap();
            let conn = open_conn(&guard)?;
            // LIMIT -1 is SQLite for "no limit"
            let limit = limit.map_or(-1i64, |l| l as i64);
            match project {
                Some(project) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM lessons WHERE project = ?1
                         ORDER BY created_at DESC, id DESC LIMIT ?2",
                        COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![project, limit], raw_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM lessons ORDER BY created_at DESC, id DESC LIMIT ?1",
                        COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![limit], raw_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            }
        };
        raws.into_iter().map(|r| self.hydrate(r)).collect()
    }

    async fn update(&self, lesson: &Lesson) -> Result<bool> {
        let tags_json = serde_json::to_string(&normalize_tags(lesson.tags.clone()))?;
        let meta_json = serde_json::to_string(&lesson.meta)?;

        let guard = self.conn.lock().unwrap();
        let conn = open_conn(&guard)?;
        let changed = conn.execute(
            "UPDATE lessons
             SET confidence = ?2, tags = ?3, meta = ?4, upvotes = ?5, downvotes = ?6,
                 updated_at = ?7
             WHERE id = ?1",
            params![
                lesson.id,
                lesson.confidence,
                tags_json,
                meta_json,
                lesson.upvotes,
                lesson.downvotes,
                format_ts(lesson.updated_at),
            ],
        )?;
        Ok(changed > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let guard = self.conn.lock().unwrap();
        let conn = open_conn(&guard)?;
        let changed = conn.execute("DELETE FROM lessons WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    async fn vote(&self, id: &str, vote: Vote) -> Result<bool> {
        // Single transactional increment; never fetch-modify-save
        let column = match vote {
            Vote::Up => "upvotes",
            Vote::Down => "downvotes",
        };
        let guard = self.conn.lock().unwrap();
        let conn = open_conn(&guard)?;
        let changed = conn.execute(
            &format!(
                "UPDATE lessons SET {column} = {column} + 1, updated_at = ?2 WHERE id = ?1"
            ),
            params![id, format_ts(Utc::now())],
        )?;
        Ok(changed > 0)
    }

    async fn search(&self, query: &[f32], filter: &SearchFilter) -> Result<Vec<ScoredLesson>> {
        let now = Utc::now();

        let raws: Vec<RawLesson> = {
            let guard = self.conn.lock().unwrap();
            let conn = open_conn(&guard)?;

            // Build the SQL pre-filter dynamically; scoring happens in Rust
            let mut sql = format!(
                "SELECT {} FROM lessons WHERE embedding IS NOT NULL \
                 AND (expires_at IS NULL OR expires_at > ?)",
                COLUMNS
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(format_ts(now))];

            if let Some(project) = &filter.project {
                sql.push_str(" AND project = ?");
                args.push(Box::new(project.clone()));
            }
            if let Some(min) = filter.min_confidence {
                sql.push_str(" AND confidence >= ?");
                args.push(Box::new(min));
            }
            for tag in &filter.tags {
                sql.push_str(" AND tags LIKE ?");
                args.push(Box::new(format!("%\"{}\"%", tag)));
            }

            let mut stmt = conn.prepare(&sql)?;
            let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
            let rows = stmt.query_map(arg_refs.as_slice(), raw_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut hits = Vec::new();
        for raw in raws {
            let lesson = self.hydrate(raw)?;
            // The LIKE tag filter is a coarse containment check; re-verify
            // the subset predicate on the decoded tag list
            if !matches_filter(&lesson, filter, now) {
                continue;
            }
            if let Some(score) = score_lesson(&lesson, query, now, filter.half_life_days)? {
                hits.push(ScoredLesson { score, lesson });
            }
        }
        Ok(rank(hits, filter.limit))
    }

    async fn export(&self) -> Result<Vec<Lesson>> {
        self.list(None, None).await
    }

    async fn count(&self) -> Result<usize> {
        let guard = self.conn.lock().unwrap();
        let conn = open_conn(&guard)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM lessons", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| Error::Database(format!("failed to close database: {}", e)))?;
        }
        Ok(())
    }
}
