//! Chat model seam and its OpenAI-compatible implementation.
//!
//! Any server that speaks `POST {base}/chat/completions` works: OpenAI,
//! OpenRouter, Azure-style proxies, local llama.cpp/ollama gateways.

use std::time::Duration;

use anyhow::{bail, Context};
use async_stream::stream;
use async_trait::async_trait;
use futures_util::{stream::BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub type TokenStream = BoxStream<'static, anyhow::Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Full completion for `messages`.
    async fn complete(&self, messages: &[PromptMessage]) -> anyhow::Result<String>;

    /// Incremental completion; items are text deltas in order.
    async fn stream(&self, messages: &[PromptMessage]) -> anyhow::Result<TokenStream>;
}

// OpenAI-compatible wire types
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamLine {
    Token(String),
    Done,
    Skip,
}

/// Interprets one line of an upstream `text/event-stream` body.
pub(crate) fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(StreamLine::Token)
            .unwrap_or(StreamLine::Skip),
        Err(e) => {
            debug!(error = %e, data, "unparseable stream chunk");
            StreamLine::Skip
        }
    }
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest silence tolerated between streamed chunks.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

impl OpenAiChatModel {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("taskhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build llm http client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
        })
    }

    async fn post(&self, messages: &[PromptMessage], stream: bool) -> anyhow::Result<reqwest::Response> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.3,
            stream,
        };
        let mut req = self.client.post(&self.url).bearer_auth(&self.api_key).json(&body);
        if !stream {
            req = req.timeout(REQUEST_TIMEOUT);
        }
        let res = req.send().await.context("llm request failed")?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            error!(%status, body = %text, "llm api error");
            bail!("llm api error {status}");
        }
        Ok(res)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: &[PromptMessage]) -> anyhow::Result<String> {
        let parsed: CompletionResponse = self
            .post(messages, false)
            .await?
            .json()
            .await
            .context("llm response parse failed")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("llm returned no choices")
    }

    async fn stream(&self, messages: &[PromptMessage]) -> anyhow::Result<TokenStream> {
        let bytes = self.post(messages, true).await?.bytes_stream();
        Ok(decode_sse(bytes, STREAM_IDLE_TIMEOUT))
    }
}

/// Turns an upstream SSE byte stream into text deltas. A gap longer than
/// `idle` between chunks ends the stream with an error.
fn decode_sse<S, B, E>(bytes: S, idle: Duration) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let tokens = stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = match tokio::time::timeout(idle, bytes.next()).await {
                Ok(Some(Ok(c))) => c,
                Ok(Some(Err(e))) => {
                    yield Err(anyhow::Error::new(e).context("llm stream interrupted"));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(anyhow::anyhow!("llm stream idle for {}ms", idle.as_millis()));
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());

            // split on complete lines only so multi-byte characters survive chunking
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_stream_line(&String::from_utf8_lossy(&line)) {
                    StreamLine::Token(t) => yield Ok(t),
                    StreamLine::Done => return,
                    StreamLine::Skip => {}
                }
            }
        }
        if let StreamLine::Token(t) = parse_stream_line(&String::from_utf8_lossy(&buffer)) {
            yield Ok(t);
        }
    };
    tokens.boxed()
}
