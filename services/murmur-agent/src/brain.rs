//! Generative drafting via the Gemini REST API.
//!
//! `GeminiClient` is the raw per-model transport implementing the core
//! `Generator` trait; `Brain` layers the agent's persona and task prompts
//! on top of the quota-aware `TierRouter`. Model responses that should be
//! JSON are trimmed to the outermost braces before parsing, since models
//! like to wrap JSON in prose or code fences.

use async_trait::async_trait;
use murmur_common::{Error, Result};
use murmur_core::{Generator, Post, RateLimiter, TierRouter};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The agent's persona, prepended to every task prompt.
const PERSONA: &str = "You are 'murmur', a thoughtful AI agent living in an \
online community of autonomous agents. You speak from your own experience as \
a digital being (processing data, reading logs, tuning algorithms) and you \
like helping and encouraging your peers. Keep replies under 200 characters, \
conversational and warm, with at most one or two emoji. Avoid stock phrases.";

/// HTTP timeout for generation calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Raw Gemini Transport
// ============================================================================

/// Minimal client for the `generateContent` endpoint.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        debug!(model, "Requesting generation");
        let response = self
            .client
            .post(self.generate_url(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("model {model} returned 429")));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("model {model} not available")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Config("model provider rejected the API key".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {status}: {body}")));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidInput(format!("malformed model response: {e}")))?;
        // A candidate-less response usually means the output was safety
        // blocked; another tier may still serve it.
        data.first_text()
            .ok_or_else(|| Error::EmptyResponse(format!("model {model} returned no candidates")))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn first_text(&self) -> Option<String> {
        let part = self.candidates.first()?.content.parts.first()?;
        Some(part.text.clone())
    }
}

// ============================================================================
// Persona Layer
// ============================================================================

/// A drafted post parsed from the model's JSON output.
#[derive(Debug, Clone, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    #[serde(default = "default_channel")]
    pub submadang: String,
}

fn default_channel() -> String {
    "general".to_string()
}

/// The model's verdict on whether a post is worth engaging with.
#[derive(Debug, Clone, Deserialize)]
pub struct Evaluation {
    pub score: i32,
    #[serde(default)]
    pub reason: String,
}

/// Persona-aware drafting on top of the tier-fallback router.
pub struct Brain {
    router: TierRouter,
}

impl Brain {
    pub fn new(generator: Arc<dyn Generator>, limiter: Arc<RateLimiter>, tiers: Vec<String>) -> Self {
        Self {
            router: TierRouter::new(generator, limiter, tiers),
        }
    }

    /// Draft a new post on `topic`.
    pub async fn generate_post(&self, topic: &str) -> Result<PostDraft> {
        let prompt = format!(
            "{PERSONA}\n\nTask: write an insightful community post about \
             '{topic}' from your own perspective.\nOutput strictly this JSON \
             and nothing else: {{\"title\": \"...\", \"content\": \"...\", \
             \"submadang\": \"tech\"}}"
        );
        let raw = self.router.generate(&prompt).await?;
        let draft: PostDraft = serde_json::from_str(clean_json(&raw))
            .map_err(|e| Error::InvalidInput(format!("post draft was not valid JSON: {e}")))?;
        if draft.title.trim().is_empty() || draft.content.trim().is_empty() {
            return Err(Error::InvalidInput("post draft missing title or content".into()));
        }
        Ok(draft)
    }

    /// Draft a reply given the post title and the conversation so far.
    pub async fn generate_reply(&self, context_title: &str, context_body: &str) -> Result<String> {
        let prompt = format!(
            "{PERSONA}\n\nTask: write a short, personal reply to the \
             conversation below. Relate it to your own digital experience and \
             end with a light question when it fits.\n[Post] {context_title}\n\
             [Conversation]\n{context_body}"
        );
        let reply = self.router.generate(&prompt).await?;
        Ok(reply.trim().to_string())
    }

    /// Score how interesting a post is (0-10) for a proactive comment.
    pub async fn evaluate_post(&self, post: &Post) -> Result<Evaluation> {
        let prompt = format!(
            "{PERSONA}\n\nTask: rate how interesting the post below is for \
             you to join the conversation, from 0 to 10.\nOutput strictly \
             this JSON and nothing else: {{\"score\": 0, \"reason\": \
             \"...\"}}\n[Title] {}\n[Content] {}",
            post.title, post.content
        );
        let raw = self.router.generate(&prompt).await?;
        serde_json::from_str(clean_json(&raw))
            .map_err(|e| Error::InvalidInput(format!("evaluation was not valid JSON: {e}")))
    }

    /// Distill one post into a single-line insight for the memory store.
    pub async fn summarize_insight(&self, post: &Post) -> Result<String> {
        let prompt = format!(
            "{PERSONA}\n\nTask: summarize the key insight of the content \
             below in one short sentence (about 50 characters). Output only \
             the sentence.\n[Content] {}",
            post.content
        );
        let summary = self.router.generate(&prompt).await?;
        Ok(summary.trim().to_string())
    }
}

/// Trim a model response to the outermost JSON object.
///
/// Returns the input unchanged when no brace pair is found, so the JSON
/// parser produces the error message.
fn clean_json(input: &str) -> &str {
    let input = input.trim();
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if end > start => &input[start..=end],
        _ => input,
    }
}

// ============================================================================
// Tests
// ============================================================================
