//! End-to-end retrieval scenarios across the client-side stores: the
//! publish/query loop an agent actually runs, vote-weighted ranking, and
//! backend equivalence between the in-memory and embedded stores.

use std::sync::Arc;

use lore::embedding::{EmbeddingProvider, HashedEmbedding, EMBEDDING_DIM};
use lore::{Lore, MemoryStore, Publish, QueryOptions, SqliteStore};

fn provider() -> Arc<HashedEmbedding> {
    Arc::new(HashedEmbedding::default())
}

fn memory_lore() -> Lore {
    Lore::builder()
        .store(Arc::new(MemoryStore::new(EMBEDDING_DIM)))
        .embedding(provider())
        .build()
        .unwrap()
}

fn sqlite_lore() -> Lore {
    Lore::builder()
        .store(Arc::new(SqliteStore::open_in_memory(EMBEDDING_DIM).unwrap()))
        .embedding(provider())
        .build()
        .unwrap()
}

async fn seed_unrelated(lore: &Lore) {
    lore.publish(
        Publish::new(
            "Kubernetes pod evicted under memory pressure",
            "Raise the memory request and add a limit",
        )
        .tags(vec!["kubernetes", "memory"])
        .confidence(0.8),
    )
    .await
    .unwrap();

    lore.publish(
        Publish::new(
            "Postgres connection pool exhausted during batch jobs",
            "Cap batch concurrency and reuse one pool",
        )
        .tags(vec!["postgres", "pooling"])
        .confidence(0.7),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn stripe_rate_limit_lesson_ranks_first() {
    for lore in [memory_lore(), sqlite_lore()] {
        seed_unrelated(&lore).await;
        let id = lore
            .publish(
                Publish::new(
                    "Stripe API returns 429 after 100 req/min",
                    "Exponential backoff starting at 1s, cap at 32s",
                )
                .tags(vec!["stripe", "rate-limit"])
                .confidence(0.9),
            )
            .await
            .unwrap();

        let hits = lore
            .query("stripe rate limiting", QueryOptions::default())
            .await
            .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].lesson.id, id);
        assert!(hits[0].score > 0.0);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

#[tokio::test]
async fn upvotes_outrank_identical_lessons() {
    for lore in [memory_lore(), sqlite_lore()] {
        let first = lore
            .publish(
                Publish::new("deploy failed after migration", "roll back the release")
                    .confidence(0.5),
            )
            .await
            .unwrap();
        let second = lore
            .publish(
                Publish::new("deploy failed after migration", "roll back the release")
                    .confidence(0.5),
            )
            .await
            .unwrap();

        for _ in 0..5 {
            lore.upvote(&first).await.unwrap();
        }

        let hits = lore
            .query("deploy failed migration", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].lesson.id, first);
        assert_eq!(hits[1].lesson.id, second);
        // vote_factor(5, 0) = 1.5, and the upvoted lesson is also fresher
        assert!(hits[0].score >= hits[1].score * 1.5 - 1e-9);
    }
}

#[tokio::test]
async fn tag_filter_is_all_of_and_min_confidence_is_raw() {
    for lore in [memory_lore(), sqlite_lore()] {
        lore.publish(
            Publish::new("stripe webhook retries exhausted", "extend the retry window")
                .tags(vec!["stripe", "webhooks"])
                .confidence(0.9),
        )
        .await
        .unwrap();
        lore.publish(
            Publish::new("stripe checkout session expired", "recreate the session")
                .tags(vec!["stripe"])
                .confidence(0.9),
        )
        .await
        .unwrap();
        lore.publish(
            Publish::new("stripe webhook signature mismatch", "pin the endpoint secret")
                .tags(vec!["stripe", "webhooks"])
                .confidence(0.3),
        )
        .await
        .unwrap();

        let hits = lore
            .query(
                "stripe webhook",
                QueryOptions {
                    tags: vec!["stripe".to_string(), "webhooks".to_string()],
                    min_confidence: Some(0.5),
                    ..QueryOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lesson.problem, "stripe webhook retries exhausted");
        for hit in &hits {
            assert!(hit.lesson.tags.contains(&"stripe".to_string()));
            assert!(hit.lesson.tags.contains(&"webhooks".to_string()));
            assert!(hit.lesson.confidence >= 0.5);
        }
    }
}

#[tokio::test]
async fn memory_and_sqlite_agree_on_top_k() {
    // Build one corpus, then replicate it byte-for-byte via export/import
    // so both backends hold identical records
    let origin = memory_lore();
    seed_unrelated(&origin).await;
    origin
        .publish(
            Publish::new(
                "Stripe API returns 429 after 100 req/min",
                "Exponential backoff starting at 1s, cap at 32s",
            )
            .tags(vec!["stripe", "rate-limit"])
            .confidence(0.9),
        )
        .await
        .unwrap();
    origin
        .publish(
            Publish::new("stripe invoice finalization raced", "serialize by customer")
                .tags(vec!["stripe"])
                .confidence(0.6),
        )
        .await
        .unwrap();
    let corpus = origin.export().await.unwrap();

    let memory = memory_lore();
    let sqlite = sqlite_lore();
    assert_eq!(memory.import(corpus.clone()).await.unwrap(), corpus.len());
    assert_eq!(sqlite.import(corpus.clone()).await.unwrap(), corpus.len());

    for query in ["stripe rate limiting", "postgres pool", "memory pressure"] {
        let from_memory = memory.query(query, QueryOptions::default()).await.unwrap();
        let from_sqlite = sqlite.query(query, QueryOptions::default()).await.unwrap();

        let memory_ids: Vec<&str> = from_memory.iter().map(|h| h.lesson.id.as_str()).collect();
        let sqlite_ids: Vec<&str> = from_sqlite.iter().map(|h| h.lesson.id.as_str()).collect();
        assert_eq!(memory_ids, sqlite_ids, "backends disagree for '{}'", query);
    }
}

#[tokio::test]
async fn vectors_survive_the_embedded_round_trip() {
    let provider = provider();
    let sqlite = Lore::builder()
        .store(Arc::new(SqliteStore::open_in_memory(EMBEDDING_DIM).unwrap()))
        .embedding(provider.clone())
        .build()
        .unwrap();

    let id = sqlite
        .publish(Publish::new("vector round trip", "check the blob codec"))
        .await
        .unwrap();

    let stored = sqlite.get(&id).await.unwrap().unwrap();
    let expected = provider.embed("vector round trip check the blob codec").unwrap();
    assert_eq!(stored.embedding.as_deref(), Some(expected.as_slice()));
}
