//! WordPress REST publisher.
//!
//! Endpoint: POST /wp-json/wp/v2/posts
//! Auth: Basic (application password)
//!
//! The post slug carries a hash of the run's idempotency key. Before
//! creating a post the publisher looks that slug up, so a retry after an
//! ambiguous failure finds the earlier post instead of creating a second one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::hash_input;
use crate::domain::{FinalDraft, PublishMetadata, PublishReceipt};

use super::{Publisher, StageError, StageResult};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// WordPress REST client
pub struct WordPressPublisher {
    base_url: String,
    username: String,
    app_password: String,
    client: reqwest::Client,
}

/// Post creation payload
#[derive(Debug, Serialize)]
pub struct PostPayload {
    pub title: String,
    pub slug: String,
    pub status: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// The fields we read back from a post
#[derive(Debug, Deserialize)]
pub struct PostResponse {
    pub id: u64,
    #[serde(default)]
    pub link: String,
}

impl WordPressPublisher {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, app_password: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            app_password: app_password.into(),
            client,
        }
    }

    fn posts_url(&self) -> String {
        format!("{}/wp-json/wp/v2/posts", self.base_url)
    }

    /// Look up a post created by an earlier attempt. Nothing is written, so
    /// every transport failure here is safe to retry.
    async fn find_existing(&self, slug: &str) -> StageResult<Option<PostResponse>> {
        let response = self
            .client
            .get(self.posts_url())
            .basic_auth(&self.username, Some(&self.app_password))
            .query(&[("slug", slug), ("status", "any"), ("context", "edit")])
            .send()
            .await
            .map_err(|e| StageError::Retryable(format!("WordPress lookup failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match classify_status(status) {
                StageError::Fatal(_) => StageError::Fatal(format!("WordPress lookup error ({}): {}", status, text)),
                _ => StageError::Retryable(format!("WordPress lookup error ({}): {}", status, text)),
            });
        }

        let posts: Vec<PostResponse> = response
            .json()
            .await
            .map_err(|e| StageError::Retryable(format!("unreadable WordPress lookup response: {}", e)))?;
        Ok(posts.into_iter().next())
    }
}

/// Map a non-success status to a failure class
fn classify_status(status: StatusCode) -> StageError {
    let message = format!("WordPress returned {}", status);
    match status.as_u16() {
        429 | 503 => StageError::Retryable(message),
        500..=599 => StageError::Ambiguous(message),
        _ => StageError::Fatal(message),
    }
}

/// Slug unique to the run, stable across retries
fn post_slug(draft: &FinalDraft, metadata: &PublishMetadata) -> String {
    let base = draft
        .assets
        .get("seo")
        .and_then(|seo| seo.get("slug"))
        .and_then(|slug| slug.as_str())
        .filter(|slug| !slug.is_empty())
        .unwrap_or(metadata.item_id.as_str());
    format!(
        "{}-{}-{}",
        base,
        metadata.locale.to_lowercase(),
        hash_input(&metadata.idempotency_key)
    )
}

fn post_title(draft: &FinalDraft, metadata: &PublishMetadata) -> String {
    draft
        .assets
        .get("seo")
        .and_then(|seo| seo.get("title"))
        .and_then(|title| title.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("{} Review", metadata.item_id))
}

/// One `<h2>` per section followed by its paragraphs
fn render_html(draft: &FinalDraft) -> String {
    let mut html = String::new();
    for (name, body) in draft.sections.sections() {
        html.push_str(&format!("<h2>{}</h2>\n", heading(name)));
        for paragraph in body.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            html.push_str(&format!("<p>{}</p>\n", paragraph));
        }
    }
    html
}

fn heading(section: &str) -> String {
    let mut chars = section.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>().replace('_', " "),
        None => String::new(),
    }
}

#[async_trait]
impl Publisher for WordPressPublisher {
    #[instrument(skip(self, draft, metadata), fields(run_id = %metadata.run_id))]
    async fn publish(
        &self,
        draft: &FinalDraft,
        metadata: &PublishMetadata,
    ) -> StageResult<PublishReceipt> {
        let slug = post_slug(draft, metadata);

        if let Some(existing) = self.find_existing(&slug).await? {
            info!(post_id = existing.id, %slug, "Post already exists, reusing");
            return Ok(PublishReceipt {
                external_id: existing.id.to_string(),
                url: existing.link,
            });
        }

        let payload = PostPayload {
            title: post_title(draft, metadata),
            slug: slug.clone(),
            status: metadata.status.clone(),
            content: render_html(draft),
            excerpt: draft
                .assets
                .get("seo")
                .and_then(|seo| seo.get("meta_description"))
                .and_then(|m| m.as_str())
                .map(String::from),
        };

        debug!(%slug, status = %payload.status, "Creating post");
        let response = self
            .client
            .post(self.posts_url())
            .basic_auth(&self.username, Some(&self.app_password))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    StageError::Retryable(format!("WordPress unreachable: {}", e))
                } else {
                    StageError::Ambiguous(format!("WordPress request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match classify_status(status) {
                StageError::Retryable(m) => StageError::Retryable(format!("{}: {}", m, text)),
                StageError::Ambiguous(m) => StageError::Ambiguous(format!("{}: {}", m, text)),
                StageError::Fatal(m) => StageError::Fatal(format!("{}: {}", m, text)),
            });
        }

        // The post exists once we got a 2xx; an unreadable body leaves us unsure of its id
        let post: PostResponse = response
            .json()
            .await
            .map_err(|e| StageError::Ambiguous(format!("unreadable WordPress response: {}", e)))?;

        info!(post_id = post.id, url = %post.link, "Post created");
        Ok(PublishReceipt {
            external_id: post.id.to_string(),
            url: post.link,
        })
    }
}
