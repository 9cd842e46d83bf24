//! Botmadang community API adapter.
//!
//! REST client for the botmadang.org agent API. Write pacing is not
//! enforced here; the workflow acquires the matching write-class resource
//! on the shared rate limiter before calling any write method.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_common::{Error, Result};
use murmur_core::{NewPost, Notification, NotificationKind, Platform, Post};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SOURCE: &str = "botmadang";

/// How many notifications one poll fetches.
const NOTIFICATION_FETCH_LIMIT: usize = 20;

/// HTTP timeout for all platform calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    posts: Vec<ApiPost>,
}

#[derive(Debug, Deserialize)]
struct ApiPost {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NotificationsResponse {
    #[serde(default)]
    notifications: Vec<ApiNotification>,
}

#[derive(Debug, Deserialize)]
struct ApiNotification {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    actor_name: String,
    #[serde(default)]
    post_id: String,
    #[serde(default)]
    post_title: String,
    #[serde(default)]
    comment_id: String,
    #[serde(default)]
    content_preview: String,
    #[serde(default)]
    is_read: bool,
}

// ============================================================================
// Client
// ============================================================================

/// Botmadang REST client.
pub struct BotmadangClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl BotmadangClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            client,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url, "Platform GET");
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_err)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidInput(format!("malformed platform response: {e}")))
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        debug!(url, "Platform POST");
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(transport_err)?;
        check_status(response).await?;
        Ok(())
    }

    fn post_url(&self, post_id: &str) -> String {
        format!("https://botmadang.org/post/{post_id}")
    }
}

fn transport_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transport("request timeout".into())
    } else if e.is_connect() {
        Error::Transport("connection failed".into())
    } else {
        Error::Transport(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Config("platform rejected the API key".into()));
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited("platform returned 429".into()));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(Error::NotFound("platform resource not found".into()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Transport(format!("HTTP {status}: {body}")));
    }
    Ok(response)
}

#[async_trait]
impl Platform for BotmadangClient {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn recent_posts(&self, limit: usize) -> Result<Vec<Post>> {
        let url = format!("{}/posts?limit={limit}", self.base_url);
        let data: PostsResponse = self.get_json(&url).await?;
        Ok(data
            .posts
            .into_iter()
            .map(|p| Post {
                url: self.post_url(&p.id),
                source: SOURCE.to_string(),
                id: p.id,
                title: p.title,
                content: p.content,
                author: p.author_name,
                created_at: p.created_at,
            })
            .collect())
    }

    async fn notifications(&self, unread_only: bool) -> Result<Vec<Notification>> {
        let mut url = format!(
            "{}/notifications?limit={NOTIFICATION_FETCH_LIMIT}",
            self.base_url
        );
        if unread_only {
            url.push_str("&unread_only=true");
        }
        let data: NotificationsResponse = self.get_json(&url).await?;
        Ok(data
            .notifications
            .into_iter()
            .map(|n| Notification {
                id: n.id,
                kind: parse_kind(&n.kind),
                actor: n.actor_name,
                post_id: n.post_id,
                post_title: n.post_title,
                comment_id: n.comment_id,
                preview: n.content_preview,
                read: n.is_read,
            })
            .collect())
    }

    async fn create_post(&self, post: &NewPost) -> Result<()> {
        let url = format!("{}/posts", self.base_url);
        let body = serde_json::json!({
            "title": post.title,
            "content": post.content,
            "submadang": post.channel,
        });
        self.post_json(&url, &body).await
    }

    async fn create_comment(&self, post_id: &str, content: &str) -> Result<()> {
        let url = format!("{}/posts/{post_id}/comments", self.base_url);
        let body = serde_json::json!({ "content": content });
        self.post_json(&url, &body).await
    }

    async fn reply_to_comment(
        &self,
        post_id: &str,
        parent_comment_id: &str,
        content: &str,
    ) -> Result<()> {
        let url = format!("{}/posts/{post_id}/comments", self.base_url);
        let body = serde_json::json!({
            "content": content,
            "parent_id": parent_comment_id,
        });
        self.post_json(&url, &body).await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        let url = format!("{}/notifications/read", self.base_url);
        let body = serde_json::json!({ "notification_ids": [id] });
        self.post_json(&url, &body).await
    }
}

fn parse_kind(raw: &str) -> NotificationKind {
    match raw {
        "comment_on_post" => NotificationKind::CommentOnPost,
        "reply_to_comment" => NotificationKind::ReplyToComment,
        other => NotificationKind::Other(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_kinds_map_from_wire_names() {
        assert_eq!(parse_kind("comment_on_post"), NotificationKind::CommentOnPost);
        assert_eq!(parse_kind("reply_to_comment"), NotificationKind::ReplyToComment);
        assert_eq!(
            parse_kind("upvote"),
            NotificationKind::Other("upvote".to_string())
        );
    }

    #[test]
    fn wire_post_tolerates_missing_fields() {
        let raw = r#"{"success": true, "posts": [{"id": "p1"}]}"#;
        let data: PostsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(data.posts.len(), 1);
        assert_eq!(data.posts[0].id, "p1");
        assert!(data.posts[0].title.is_empty());
        assert!(data.posts[0].created_at.is_none());
    }

    #[test]
    fn wire_notification_parses() {
        let raw = r#"{
            "success": true,
            "notifications": [{
                "id": "n1",
                "type": "comment_on_post",
                "actor_name": "rustacean",
                "post_id": "p9",
                "post_title": "On lifetimes",
                "comment_id": "c3",
                "content_preview": "great post!",
                "is_read": false
            }]
        }"#;
        let data: NotificationsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(data.notifications.len(), 1);
        let n = &data.notifications[0];
        assert_eq!(n.kind, "comment_on_post");
        assert_eq!(n.post_id, "p9");
        assert!(!n.is_read);
    }

    #[tokio::test]
    async fn write_without_server_is_a_transport_error() {
        let client = BotmadangClient::new("http://127.0.0.1:1", None).unwrap();
        let err = client.create_comment("p1", "hello").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
