/**
 * Lore Core Library
 *
 * Cross-agent memory: autonomous agents publish short operational lessons
 * (problem/resolution pairs) and later retrieve the most relevant ones to
 * inject into their own prompts. The library composes four subsystems:
 *
 * ```text
 * +--------------------------------------------------------------+
 * |                        Lore facade                           |
 * |   publish / query / vote / export-import  (lore.rs)          |
 * +----------------+---------------------+-----------------------+
 * |  Redactor      |  Scorer             |  Store capability     |
 * |  (redactor.rs) |  (scorer.rs)        |  (store/)             |
 * |                |                     |   memory / sqlite /   |
 * |                |                     |   remote              |
 * +----------------+---------------------+-----------------------+
 * |  Lesson model (lesson.rs)  |  Embedding contract (embedding) |
 * +--------------------------------------------------------------+
 * |  Errors (error.rs)  |  Wire protocol (protocol.rs)           |
 * +--------------------------------------------------------------+
 * |  Optional network service (server/, bin/lore-server)         |
 * +--------------------------------------------------------------+
 * ```
 *
 * Redaction always runs before storage; embeddings come from a pluggable
 * provider; every store variant honors the same retrieval contract
 * (all-of tag filtering, raw min-confidence, expiry exclusion, score /
 * created_at / id descending order).
 */

pub mod embedding;
pub mod error;
pub mod lesson;
pub mod lore;
pub mod protocol;
pub mod redactor;
pub mod scorer;
pub mod server;
pub mod store;

pub use error::{Error, Result};
pub use lesson::{Lesson, LessonBuilder};
pub use lore::{Lore, LoreBuilder, Publish, QueryOptions};
pub use redactor::Redactor;
pub use store::{
    LessonStore, MemoryStore, RemoteStore, ScoredLesson, SearchFilter, SqliteStore, Vote,
};
