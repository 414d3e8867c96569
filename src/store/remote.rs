/**
 * Remote Store (HTTP client)
 *
 * Translates each capability operation into exactly one call against the
 * server's `/v1` surface. Embeddings travel as JSON arrays of numbers.
 * The client never retries a mutating request; after a timeout or
 * transport failure the outcome is indeterminate and reported as a
 * connection failure. Vote increments are the `"+1"` sentinel PATCH the
 * server applies atomically.
 *
 * Status mapping: 401/403 -> authentication, 404 -> absent (`Ok(None)` /
 * `Ok(false)` where the capability allows it), 422 -> validation,
 * 429 -> rate-limited with the Retry-After hint, transport -> connection.
 */

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lesson::Lesson;
use crate::protocol::{
    CounterDelta, ExportResponse, ListResponse, PublishRequest, SearchRequest, SearchResponse,
    UpdateLessonRequest,
};
use crate::store::{LessonStore, ScoredLesson, SearchFilter, Vote};

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RemoteStore {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_url, api_key, DEFAULT_TIMEOUT)
    }

    /// The timeout applies to every call made through this store.
    pub fn with_timeout(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }
}

/// Convert a non-success response into the typed failure taxonomy. Reads
/// the Retry-After header before consuming the body.
async fn api_error(resp: reqwest::Response) -> Error {
    let status = resp.status();
    let retry_after_secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let message = match resp.json::<crate::protocol::ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        StatusCode::NOT_FOUND => Error::LessonNotFound(message),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after_secs },
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {
            Error::Validation(message)
        }
        _ => Error::Internal(format!("server error {}: {}", status.as_u16(), message)),
    }
}

#[async_trait]
impl LessonStore for RemoteStore {
    async fn save(&self, lesson: &Lesson) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/lessons"))
            .bearer_auth(&self.api_key)
            .json(&PublishRequest::from(lesson))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(api_error(resp).await)
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Lesson>> {
        let resp = self
            .client
            .get(self.url(&format!("/lessons/{}", id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json::<Lesson>().await?)),
            _ => Err(api_error(resp).await),
        }
    }

    async fn list(&self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Lesson>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(project) = project {
            query.push(("project", project.to_string()));
        }
        // The server caps list pages at 200; an unbounded capability call
        // asks for the whole page (export is the true bulk path)
        query.push(("limit", limit.unwrap_or(200).to_string()));

        let resp = self
            .client
            .get(self.url("/lessons"))
            .query(&query)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(resp.json::<ListResponse>().await?.lessons)
        } else {
            Err(api_error(resp).await)
        }
    }

    async fn update(&self, lesson: &Lesson) -> Result<bool> {
        let body = UpdateLessonRequest {
            confidence: Some(lesson.confidence),
            tags: Some(lesson.tags.clone()),
            meta: Some(lesson.meta.clone()),
            upvotes: Some(CounterDelta::Set(lesson.upvotes)),
            downvotes: Some(CounterDelta::Set(lesson.downvotes)),
        };
        let resp = self
            .client
            .patch(self.url(&format!("/lessons/{}", lesson.id)))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(resp).await),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(self.url(&format!("/lessons/{}", id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(resp).await),
        }
    }

    async fn vote(&self, id: &str, vote: Vote) -> Result<bool> {
        let body = match vote {
            Vote::Up => UpdateLessonRequest {
                upvotes: Some(CounterDelta::plus_one()),
                ..UpdateLessonRequest::default()
            },
            Vote::Down => UpdateLessonRequest {
                downvotes: Some(CounterDelta::plus_one()),
                ..UpdateLessonRequest::default()
            },
        };
        let resp = self
            .client
            .patch(self.url(&format!("/lessons/{}", id)))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(resp).await),
        }
    }

    async fn search(&self, query: &[f32], filter: &SearchFilter) -> Result<Vec<ScoredLesson>> {
        // The server owns its own decay shape; the half-life never travels
        let body = SearchRequest {
            embedding: query.to_vec(),
            tags: if filter.tags.is_empty() {
                None
            } else {
                Some(filter.tags.clone())
            },
            project: filter.project.clone(),
            limit: Some(filter.limit),
            min_confidence: filter.min_confidence,
        };
        let resp = self
            .client
            .post(self.url("/lessons/search"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(resp.json::<SearchResponse>().await?.results)
        } else {
            Err(api_error(resp).await)
        }
    }

    async fn export(&self) -> Result<Vec<Lesson>> {
        let resp = self
            .client
            .post(self.url("/lessons/export"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(resp.json::<ExportResponse>().await?.lessons)
        } else {
            Err(api_error(resp).await)
        }
    }

    async fn count(&self) -> Result<usize> {
        let resp = self
            .client
            .get(self.url("/lessons"))
            .query(&[("limit", "1")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(resp.json::<ListResponse>().await?.total)
        } else {
            Err(api_error(resp).await)
        }
    }

    /// Nothing to release beyond the connection pool, which reqwest drops
    /// with the client.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
