/**
 * Memory Store
 *
 * A mutex-guarded map keyed by lesson id. Lessons are cloned on ingress
 * and egress, so callers never observe mutations through retained
 * references. Intended for tests and ephemeral single-process use; the
 * same search contract as the persistent stores, with no SQL pre-filter.
 */

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::lesson::{normalize_tags, Lesson};
use crate::store::{matches_filter, rank, score_lesson, LessonStore, ScoredLesson, SearchFilter, Vote};

struct Inner {
    lessons: HashMap<String, Lesson>,
    closed: bool,
}

pub struct MemoryStore {
    dim: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// `dim` is the one embedding dimension every stored record must have.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            inner: Mutex::new(Inner {
                lessons: HashMap::new(),
                closed: false,
            }),
        }
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
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::embedding::EMBEDDING_DIM)
    }
}

fn ensure_open(inner: &Inner) -> Result<()> {
    if inner.closed {
        return Err(Error::Internal("memory store is closed".to_string()));
    }
    Ok(())
}

#[async_trait]
impl LessonStore for MemoryStore {
    async fn save(&self, lesson: &Lesson) -> Result<()> {
        self.check_dimension(lesson)?;
        let mut inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;
        inner.lessons.insert(lesson.id.clone(), lesson.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Lesson>> {
        let inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;
        Ok(inner.lessons.get(id).cloned())
    }

    async fn list(&self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Lesson>> {
        let inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;

        let mut lessons: Vec<Lesson> = inner
            .lessons
            .values()
            .filter(|l| project.map_or(true, |p| l.project.as_deref() == Some(p)))
            .cloned()
            .collect();
        lessons.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = limit {
            lessons.truncate(limit);
        }
        Ok(lessons)
    }

    async fn update(&self, lesson: &Lesson) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;
        match inner.lessons.get_mut(&lesson.id) {
            Some(stored) => {
                stored.confidence = lesson.confidence;
                stored.tags = normalize_tags(lesson.tags.clone());
                stored.meta = lesson.meta.clone();
                stored.upvotes = lesson.upvotes;
                stored.downvotes = lesson.downvotes;
                stored.updated_at = lesson.updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;
        Ok(inner.lessons.remove(id).is_some())
    }

    async fn vote(&self, id: &str, vote: Vote) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;
        match inner.lessons.get_mut(id) {
            Some(stored) => {
                match vote {
                    Vote::Up => stored.upvotes += 1,
                    Vote::Down => stored.downvotes += 1,
                }
                stored.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn search(&self, query: &[f32], filter: &SearchFilter) -> Result<Vec<ScoredLesson>> {
        let inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;

        let now = Utc::now();
        let mut hits = Vec::new();
        for lesson in inner.lessons.values() {
            if !matches_filter(lesson, filter, now) {
                continue;
            }
            if let Some(score) = score_lesson(lesson, query, now, filter.half_life_days)? {
                hits.push(ScoredLesson {
                    score,
                    lesson: lesson.clone(),
                });
            }
        }
        Ok(rank(hits, filter.limit))
    }

    async fn export(&self) -> Result<Vec<Lesson>> {
        self.list(None, None).await
    }

    async fn count(&self) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        ensure_open(&inner)?;
        Ok(inner.lessons.len())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.lessons.clear();
        inner.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lesson(problem: &str, tags: Vec<&str>, confidence: f64, embedding: Vec<f32>) -> Lesson {
        Lesson::builder()
            .problem(problem)
            .resolution("fix")
            .tags(tags)
            .confidence(confidence)
            .embedding(embedding)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let store = MemoryStore::new(4);
        let l = lesson("broke", vec!["a"], 0.5, vec![0.1, 0.2, 0.3, 0.4]);

        store.save(&l).await.unwrap();
        let got = store.get(&l.id).await.unwrap().unwrap();
        assert_eq!(got, l);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_wrong_dimension() {
        let store = MemoryStore::new(4);
        let l = lesson("broke", vec![], 0.5, vec![0.1, 0.2]);
        let err = store.save(&l).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_egress_is_a_copy() {
        let store = MemoryStore::new(4);
        let l = lesson("broke", vec![], 0.5, vec![0.0; 4]);
        store.save(&l).await.unwrap();

        let mut got = store.get(&l.id).await.unwrap().unwrap();
        got.problem = "mutated".to_string();

        let again = store.get(&l.id).await.unwrap().unwrap();
        assert_eq!(again.problem, "broke");
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let store = MemoryStore::new(4);
        for i in 0..5 {
            let mut l = lesson(&format!("p{}", i), vec![], 0.5, vec![0.0; 4]);
            l.project = Some("api".to_string());
            store.save(&l).await.unwrap();
        }
        let other = lesson("other", vec![], 0.5, vec![0.0; 4]);
        store.save(&other).await.unwrap();

        let listed = store.list(Some("api"), Some(3)).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(listed[0].problem, "p4");
    }

    #[tokio::test]
    async fn test_update_touches_permitted_fields_only() {
        let store = MemoryStore::new(4);
        let l = lesson("broke", vec!["a"], 0.5, vec![0.0; 4]);
        store.save(&l).await.unwrap();

        let mut changed = l.clone();
        changed.problem = "rewritten".to_string();
        changed.confidence = 0.9;
        changed.tags = vec!["b".to_string()];
        changed.updated_at = Utc::now();
        assert!(store.update(&changed).await.unwrap());

        let got = store.get(&l.id).await.unwrap().unwrap();
        assert_eq!(got.problem, "broke");
        assert_eq!(got.confidence, 0.9);
        assert_eq!(got.tags, vec!["b"]);

        let absent = lesson("x", vec![], 0.5, vec![0.0; 4]);
        assert!(!store.update(&absent).await.unwrap());
    }

    #[tokio::test]
    async fn test_vote_increments() {
        let store = MemoryStore::new(4);
        let l = lesson("broke", vec![], 0.5, vec![0.0; 4]);
        store.save(&l).await.unwrap();

        assert!(store.vote(&l.id, Vote::Up).await.unwrap());
        assert!(store.vote(&l.id, Vote::Up).await.unwrap());
        assert!(store.vote(&l.id, Vote::Down).await.unwrap());
        assert!(!store.vote("missing", Vote::Up).await.unwrap());

        let got = store.get(&l.id).await.unwrap().unwrap();
        assert_eq!(got.upvotes, 2);
        assert_eq!(got.downvotes, 1);
        assert!(got.updated_at >= got.created_at);
    }

    #[tokio::test]
    async fn test_search_filters_and_orders() {
        let store = MemoryStore::new(2);

        let close = lesson("close", vec!["t"], 0.9, vec![1.0, 0.0]);
        let far = lesson("far", vec!["t"], 0.9, vec![0.0, 1.0]);
        let untagged = lesson("untagged", vec![], 0.9, vec![1.0, 0.0]);
        let mut expired = lesson("expired", vec!["t"], 0.9, vec![1.0, 0.0]);
        expired.expires_at = Some(Utc::now() - Duration::minutes(1));

        for l in [&close, &far, &untagged, &expired] {
            store.save(l).await.unwrap();
        }

        let filter = SearchFilter {
            tags: vec!["t".to_string()],
            ..SearchFilter::default()
        };
        let hits = store.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].lesson.problem, "close");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.lesson.tags.contains(&"t".to_string())));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let store = MemoryStore::new(4);
        store.save(&lesson("p", vec![], 0.5, vec![0.0; 4])).await.unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.count().await.is_err());
    }
}
