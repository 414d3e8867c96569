/**
 * Lore Facade
 *
 * Composes one embedding provider, one redactor (or none), the scorer,
 * and a chosen store into the publish/query API agents actually call.
 *
 * Publish path: validate -> redact every text field -> embed the
 * concatenated "problem resolution context?" -> assign a monotonic id ->
 * capture one timestamp for both created_at and updated_at -> save.
 *
 * Query path: embed the query text -> store-side candidate filtering
 * (scope, tags, expiry, min-confidence) -> score -> top-k, which
 * `render_prompt` can turn into a prompt fragment.
 *
 * # Examples
 *
 * ```no_run
 * use lore::{Lore, Publish, QueryOptions};
 * use lore::embedding::HashedEmbedding;
 * use std::sync::Arc;
 *
 * # async fn example() -> lore::Result<()> {
 * let lore = Lore::builder()
 *     .project("checkout")
 *     .embedding(Arc::new(HashedEmbedding::default()))
 *     .build()?;
 *
 * lore.publish(
 *     Publish::new(
 *         "Stripe API returns 429 after 100 req/min",
 *         "Exponential backoff starting at 1s, cap at 32s",
 *     )
 *     .tags(vec!["stripe", "rate-limit"])
 *     .confidence(0.9),
 * )
 * .await?;
 *
 * let hits = lore.query("stripe rate limiting", QueryOptions::default()).await?;
 * println!("{}", lore.render_prompt(&hits));
 * # Ok(())
 * # }
 * ```
 */

use chrono::{DateTime, Utc};
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{Error, Result};
use crate::lesson::{normalize_tags, Lesson, LessonBuilder};
use crate::redactor::Redactor;
use crate::scorer;
use crate::store::{
    LessonStore, RemoteStore, ScoredLesson, SearchFilter, SqliteStore, Vote, DEFAULT_SEARCH_LIMIT,
};

/// Publish parameters. Problem and resolution are required; everything
/// else defaults.
#[derive(Debug, Clone, Default)]
pub struct Publish {
    pub problem: String,
    pub resolution: String,
    pub context: Option<String>,
    pub tags: Vec<String>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub project: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Publish {
    pub fn new(problem: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
            resolution: resolution.into(),
            ..Self::default()
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn tags(mut self, tags: Vec<impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(|t| t.into()).collect();
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

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn meta_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Query parameters. Tag filtering is all-of; `min_confidence` applies to
/// raw confidence.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub limit: Option<usize>,
    pub min_confidence: Option<f64>,
}

pub struct Lore {
    store: Arc<dyn LessonStore>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    redactor: Option<Redactor>,
    project: Option<String>,
    half_life_days: f64,
}

impl std::fmt::Debug for Lore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lore")
            .field("project", &self.project)
            .field("half_life_days", &self.half_life_days)
            .finish_non_exhaustive()
    }
}

impl Lore {
    pub fn builder() -> LoreBuilder {
        LoreBuilder::default()
    }

    /// Validate, redact, embed, and persist one lesson. Returns its id.
    pub async fn publish(&self, publish: Publish) -> Result<String> {
        let mut builder = LessonBuilder::default()
            .problem(self.redact(&publish.problem))
            .resolution(self.redact(&publish.resolution))
            .tags(publish.tags);

        if let Some(context) = &publish.context {
            builder = builder.context(self.redact(context));
        }
        if let Some(confidence) = publish.confidence {
            builder = builder.confidence(confidence);
        }
        if let Some(source) = publish.source {
            builder = builder.source(source);
        }
        if let Some(project) = publish.project.or_else(|| self.project.clone()) {
            builder = builder.project(project);
        }
        if let Some(expires_at) = publish.expires_at {
            builder = builder.expires_at(expires_at);
        }

        let mut lesson = builder.build()?;
        lesson.meta = publish.meta;

        if let Some(provider) = &self.embedding {
            let vector = provider.embed(&lesson.embedding_text())?;
            if vector.len() != provider.dimension() {
                return Err(Error::Validation(format!(
                    "embedding provider returned {} dimensions, declared {}",
                    vector.len(),
                    provider.dimension()
                )));
            }
            lesson.embedding = Some(vector);
        }

        debug!("publishing lesson {} ({} tags)", lesson.id, lesson.tags.len());
        self.store.save(&lesson).await?;
        Ok(lesson.id)
    }

    /// Top-k lessons relevant to `text`. Requires an embedding provider;
    /// zero results is not an error.
    pub async fn query(&self, text: &str, options: QueryOptions) -> Result<Vec<ScoredLesson>> {
        let provider = self.embedding.as_ref().ok_or_else(|| {
            Error::Validation("query requires an embedding provider".to_string())
        })?;

        let vector = provider.embed(text)?;
        let filter = SearchFilter {
            tags: normalize_tags(options.tags),
            project: options.project.or_else(|| self.project.clone()),
            limit: options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            min_confidence: options.min_confidence,
            half_life_days: self.half_life_days,
        };

        let hits = self.store.search(&vector, &filter).await?;
        debug!("query returned {} of up to {} lessons", hits.len(), filter.limit);
        Ok(hits)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Lesson>> {
        self.store.get(id).await
    }

    pub async fn list(&self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Lesson>> {
        match project.map(str::to_string).or_else(|| self.project.clone()) {
            Some(project) => self.store.list(Some(&project), limit).await,
            None => self.store.list(None, limit).await,
        }
    }

    /// Write back the mutable fields of an already-stored lesson.
    pub async fn update(&self, lesson: &Lesson) -> Result<bool> {
        if !(0.0..=1.0).contains(&lesson.confidence) {
            return Err(Error::Validation(format!(
                "confidence must be within [0, 1], got {}",
                lesson.confidence
            )));
        }
        let mut lesson = lesson.clone();
        lesson.updated_at = Utc::now();
        self.store.update(&lesson).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete(id).await
    }

    /// +1 upvote; a missing lesson is a typed failure, not a silent no-op.
    pub async fn upvote(&self, id: &str) -> Result<()> {
        if self.store.vote(id, Vote::Up).await? {
            Ok(())
        } else {
            Err(Error::LessonNotFound(id.to_string()))
        }
    }

    pub async fn downvote(&self, id: &str) -> Result<()> {
        if self.store.vote(id, Vote::Down).await? {
            Ok(())
        } else {
            Err(Error::LessonNotFound(id.to_string()))
        }
    }

    /// Full lesson records, embeddings included, suitable for a
    /// round-trip through `import`.
    pub async fn export(&self) -> Result<Vec<Lesson>> {
        self.store.export().await
    }

    /// Insert records whose id is not present yet; existing ids are
    /// skipped, nothing is merged. Returns the number inserted.
    pub async fn import(&self, lessons: Vec<Lesson>) -> Result<usize> {
        let mut inserted = 0;
        for lesson in lessons {
            if self.store.get(&lesson.id).await?.is_none() {
                self.store.save(&lesson).await?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// Format query results as a prompt fragment for injection into an
    /// agent prompt. Empty input renders an empty string.
    pub fn render_prompt(&self, hits: &[ScoredLesson]) -> String {
        if hits.is_empty() {
            return String::new();
        }
        let mut out = String::from("Relevant lessons from past runs:\n");
        for (index, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "{}. Problem: {}\n   Resolution: {}\n",
                index + 1,
                hit.lesson.problem,
                hit.lesson.resolution
            ));
        }
        out
    }

    fn redact(&self, text: &str) -> String {
        match &self.redactor {
            Some(redactor) => redactor.redact(text),
            None => text.to_string(),
        }
    }
}

/// Configuration for a `Lore` instance. Store selection: an explicit
/// store wins; otherwise `api_url` + `api_key` selects the remote store;
/// otherwise the embedded store at `db_path` (default `~/.lore/lore.db`).
pub struct LoreBuilder {
    project: Option<String>,
    db_path: Option<PathBuf>,
    store: Option<Arc<dyn LessonStore>>,
    api_url: Option<String>,
    api_key: Option<String>,
    remote_timeout: Option<Duration>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    redact: bool,
    redact_patterns: Vec<(String, String)>,
    half_life_days: f64,
}

impl Default for LoreBuilder {
    fn default() -> Self {
        Self {
            project: None,
            db_path: None,
            store: None,
            api_url: None,
            api_key: None,
            remote_timeout: None,
            embedding: None,
            redact: true,
            redact_patterns: Vec::new(),
            half_life_days: scorer::DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

impl LoreBuilder {
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn LessonStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn remote(mut self, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self.api_key = Some(api_key.into());
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = Some(timeout);
        self
    }

    pub fn embedding(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding = Some(provider);
        self
    }

    /// Redaction is on by default; false disables the pipeline entirely.
    pub fn redact(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    /// Custom (pattern, label) pairs layered after the default patterns.
    pub fn redact_patterns(mut self, patterns: Vec<(String, String)>) -> Self {
        self.redact_patterns = patterns;
        self
    }

    pub fn decay_half_life_days(mut self, days: f64) -> Self {
        self.half_life_days = days;
        self
    }

    pub fn build(self) -> Result<Lore> {
        if self.half_life_days <= 0.0 {
            return Err(Error::Validation(format!(
                "decay half-life must be positive, got {}",
                self.half_life_days
            )));
        }

        let dimension = self
            .embedding
            .as_ref()
            .map_or(EMBEDDING_DIM, |provider| provider.dimension());

        let store: Arc<dyn LessonStore> = match (self.store, self.api_url) {
            (Some(store), _) => store,
            (None, Some(api_url)) => {
                let api_key = self.api_key.ok_or_else(|| {
                    Error::Validation("remote store requires an api_key".to_string())
                })?;
                let timeout = self.remote_timeout.unwrap_or(crate::store::remote::DEFAULT_TIMEOUT);
                Arc::new(RemoteStore::with_timeout(api_url, api_key, timeout)?)
            }
            (None, None) => {
                let path = match self.db_path {
                    Some(path) => path,
                    None => default_db_path()?,
                };
                Arc::new(SqliteStore::open(path, dimension)?)
            }
        };

        let redactor = if self.redact {
            Some(Redactor::new(&self.redact_patterns)?)
        } else {
            None
        };

        Ok(Lore {
            store,
            embedding: self.embedding,
            redactor,
            project: self.project,
            half_life_days: self.half_life_days,
        })
    }
}

fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Io("cannot determine the user home directory".to_string()))?;
    Ok(home.join(".lore").join("lore.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedding;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn memory_lore() -> Lore {
        Lore::builder()
            .store(Arc::new(MemoryStore::default()))
            .embedding(Arc::new(HashedEmbedding::default()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_validates_inputs() {
        let lore = memory_lore();

        let err = lore.publish(Publish::new("", "fix")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = lore
            .publish(Publish::new("broke", "fix").confidence(1.2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_publish_redacts_before_storage() {
        let lore = memory_lore();
        let id = lore
            .publish(Publish::new(
                "Auth failed with key sk-abc123def456ghi789jkl012mno",
                "rotate the key",
            ))
            .await
            .unwrap();

        let stored = lore.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.problem, "Auth failed with key [REDACTED:api_key]");
    }

    #[tokio::test]
    async fn test_custom_redaction_pattern() {
        let lore = Lore::builder()
            .store(Arc::new(MemoryStore::default()))
            .embedding(Arc::new(HashedEmbedding::default()))
            .redact_patterns(vec![(r"ACCT-\d{8}".to_string(), "account_id".to_string())])
            .build()
            .unwrap();

        let id = lore
            .publish(Publish::new("account ACCT-12345678 has error", "retry"))
            .await
            .unwrap();

        let stored = lore.get(&id).await.unwrap().unwrap();
        assert!(stored.problem.contains("[REDACTED:account_id]"));
        assert!(!stored.problem.contains("12345678"));
    }

    #[tokio::test]
    async fn test_redaction_disabled_is_skipped_entirely() {
        let lore = Lore::builder()
            .store(Arc::new(MemoryStore::default()))
            .embedding(Arc::new(HashedEmbedding::default()))
            .redact(false)
            .build()
            .unwrap();

        let id = lore
            .publish(Publish::new("key sk-abc123def456ghi789jkl012mno leaked", "rotate"))
            .await
            .unwrap();
        let stored = lore.get(&id).await.unwrap().unwrap();
        assert!(stored.problem.contains("sk-abc123def456ghi789jkl012mno"));
    }

    #[tokio::test]
    async fn test_query_requires_embedding_provider() {
        let lore = Lore::builder()
            .store(Arc::new(MemoryStore::default()))
            .build()
            .unwrap();
        let err = lore.query("anything", QueryOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_query_zero_results_is_ok() {
        let lore = memory_lore();
        let hits = lore.query("anything", QueryOptions::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_publish_uses_default_project() {
        let lore = Lore::builder()
            .store(Arc::new(MemoryStore::default()))
            .embedding(Arc::new(HashedEmbedding::default()))
            .project("checkout")
            .build()
            .unwrap();

        let id = lore.publish(Publish::new("broke", "fix")).await.unwrap();
        let stored = lore.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.project.as_deref(), Some("checkout"));

        let id = lore
            .publish(Publish::new("broke", "fix").project("billing"))
            .await
            .unwrap();
        let stored = lore.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.project.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn test_votes_and_not_found() {
        let lore = memory_lore();
        let id = lore.publish(Publish::new("broke", "fix")).await.unwrap();

        lore.upvote(&id).await.unwrap();
        lore.upvote(&id).await.unwrap();
        lore.downvote(&id).await.unwrap();

        let stored = lore.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.upvotes, 2);
        assert_eq!(stored.downvotes, 1);
        assert!(stored.updated_at >= stored.created_at);

        let err = lore.upvote("missing").await.unwrap_err();
        assert_eq!(err, Error::LessonNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_expired_lesson_never_returned() {
        let lore = memory_lore();
        lore.publish(
            Publish::new("stale stripe outage", "wait it out")
                .expires_at(Utc::now() - ChronoDuration::minutes(1)),
        )
        .await
        .unwrap();

        let hits = lore.query("stripe outage", QueryOptions::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let lore = memory_lore();
        lore.publish(Publish::new("one", "fix one")).await.unwrap();
        lore.publish(Publish::new("two", "fix two")).await.unwrap();

        let exported = lore.export().await.unwrap();
        assert_eq!(exported.len(), 2);
        assert!(exported.iter().all(|l| l.embedding.is_some()));

        // Importing into the same store skips every existing id
        assert_eq!(lore.import(exported.clone()).await.unwrap(), 0);

        let other = memory_lore();
        assert_eq!(other.import(exported).await.unwrap(), 2);
        assert_eq!(other.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_render_prompt() {
        let lore = memory_lore();
        assert_eq!(lore.render_prompt(&[]), "");

        lore.publish(
            Publish::new("Stripe API returns 429", "Exponential backoff").tags(vec!["stripe"]),
        )
        .await
        .unwrap();
        let hits = lore.query("stripe 429", QueryOptions::default()).await.unwrap();
        let prompt = lore.render_prompt(&hits);
        assert!(prompt.starts_with("Relevant lessons from past runs:"));
        assert!(prompt.contains("1. Problem: Stripe API returns 429"));
        assert!(prompt.contains("Resolution: Exponential backoff"));
    }

    #[tokio::test]
    async fn test_builder_rejects_bad_config() {
        let err = Lore::builder().decay_half_life_days(0.0).build().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
