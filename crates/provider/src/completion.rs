//! Chat-completion relay.
//!
//! [`CompletionRelay::send`] opens the upstream streaming request and returns
//! a [`CompletionStream`]; [`CompletionStream::receive`] decodes the upstream
//! event stream and re-emits normalized [`SseEvent`]s to an [`EventSink`],
//! flushing after every content chunk.

use crate::{
    http_util::ProviderHttp,
    sse::{Line, LineDecoder, classify_line},
};
use futures_util::StreamExt as _;
use promptgate_config::Config;
use promptgate_types::{
    SseEvent,
    traits::{ByteStream, EventSink, Result},
};
use reqwest::Client;
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Upstream request parameters, resolved from one configuration snapshot.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub organization: Option<String>,
    pub max_completion_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl CompletionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let c = &config.completions;
        Self {
            base_url: c.base_url.clone(),
            model: c.model.clone(),
            api_key: SecretString::from(config.openai.api_key.clone()),
            organization: config.openai.organization_id.clone(),
            max_completion_tokens: c.max_completion_tokens,
            system_prompt: c.system_prompt.clone(),
        }
    }
}

/// Relays one prompt to the upstream chat-completions endpoint.
pub struct CompletionRelay {
    ph: ProviderHttp,
    settings: CompletionSettings,
}

impl CompletionRelay {
    #[must_use]
    pub fn new(http: Client, settings: CompletionSettings) -> Self {
        Self {
            ph: ProviderHttp::new(http),
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Builds the streaming request body for `prompt`.
    #[must_use]
    pub fn request_body(&self, prompt: &str) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.settings.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut body = json!({
            "model": self.settings.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(max) = self.settings.max_completion_tokens {
            body["max_completion_tokens"] = json!(max);
        }
        body
    }

    /// Opens the upstream stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UpstreamUnreachable`](promptgate_types::GatewayError::UpstreamUnreachable)
    /// on transport failure and
    /// [`GatewayError::UpstreamRejected`](promptgate_types::GatewayError::UpstreamRejected)
    /// on a non-success status.
    pub async fn send(&self, prompt: &str) -> Result<CompletionStream> {
        let mut builder = self
            .ph
            .client()
            .post(self.endpoint())
            .bearer_auth(self.settings.api_key.expose_secret())
            .json(&self.request_body(prompt));
        if let Some(org) = &self.settings.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let resp = self.ph.send(builder).await?;
        tracing::debug!(model = %self.settings.model, "completion stream opened");
        Ok(CompletionStream::from_byte_stream(
            self.settings.model.clone(),
            ProviderHttp::byte_stream(resp),
        ))
    }
}

/// An open upstream completion stream. Consumed by [`receive`](Self::receive).
pub struct CompletionStream {
    model: String,
    bytes: ByteStream,
}

impl CompletionStream {
    #[must_use]
    pub fn from_byte_stream(model: impl Into<String>, bytes: ByteStream) -> Self {
        Self {
            model: model.into(),
            bytes,
        }
    }

    /// Model the request was issued for.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Pumps the upstream stream into `sink` until the terminator or EOF,
    /// then emits `Done` followed by one metadata event.
    ///
    /// # Errors
    ///
    /// Any upstream read error or sink write/flush error aborts the stream
    /// and is returned; in that case no `Done` is emitted.
    pub async fn receive<S: EventSink + ?Sized>(self, sink: &mut S) -> Result<()> {
        let Self { model, mut bytes } = self;
        let mut decoder = LineDecoder::new();
        let mut state = ReceiveState {
            model,
            finish_reason: None,
            chunks: 0,
        };

        'read: loop {
            match bytes.next().await {
                Some(chunk) => {
                    decoder.push(&chunk?);
                    while let Some(line) = decoder.next_line()? {
                        if state.on_line(&line, sink).await? {
                            break 'read;
                        }
                    }
                }
                None => {
                    if let Some(line) = decoder.finish() {
                        state.on_line(&line, sink).await?;
                    }
                    break;
                }
            }
        }

        sink.write(SseEvent::Done.encode()).await?;
        sink.write(state.metadata().encode()).await?;
        sink.flush().await?;
        tracing::debug!(
            model = %state.model,
            chunks = state.chunks,
            "completion stream finished"
        );
        Ok(())
    }
}

struct ReceiveState {
    model: String,
    finish_reason: Option<String>,
    chunks: usize,
}

impl ReceiveState {
    /// Handles one line; returns `true` once the terminator is seen.
    async fn on_line<S: EventSink + ?Sized>(&mut self, line: &str, sink: &mut S) -> Result<bool> {
        match classify_line(line) {
            Line::Skip => {}
            Line::Done => return Ok(true),
            Line::Malformed { data, error } => {
                tracing::warn!(%error, chunk = %data, "skipping malformed completion chunk");
            }
            Line::Chunk(chunk) => {
                if let Some(model) = &chunk.model {
                    self.model.clone_from(model);
                }
                if let Some(reason) = chunk.finish_reason() {
                    self.finish_reason = Some(reason.to_string());
                }
                if let Some(text) = chunk.content().filter(|t| !t.is_empty()) {
                    sink.write(SseEvent::Content(text.to_string()).encode())
                        .await?;
                    sink.flush().await?;
                    self.chunks += 1;
                }
            }
        }
        Ok(false)
    }

    fn metadata(&self) -> SseEvent {
        let mut fields = BTreeMap::new();
        fields.insert("model".to_string(), self.model.clone());
        if let Some(reason) = &self.finish_reason {
            fields.insert("finish_reason".to_string(), reason.clone());
        }
        SseEvent::Metadata(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_util::chunks_stream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use promptgate_types::GatewayError;

    /// Records every write and counts flushes.
    #[derive(Default)]
    struct RecordingSink {
        written: Vec<Bytes>,
        flushed: usize,
        fail_after: Option<usize>,
    }

    impl RecordingSink {
        fn text(&self) -> String {
            self.written
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect()
        }

        fn count(&self, needle: &str) -> usize {
            self.text().matches(needle).count()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn write(&mut self, chunk: Bytes) -> Result<()> {
            if self.fail_after.is_some_and(|n| self.written.len() >= n) {
                return Err(GatewayError::Transport("client went away".into()));
            }
            self.written.push(chunk);
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            self.flushed += 1;
            Ok(())
        }
    }

    fn stream_of(parts: &[&str]) -> CompletionStream {
        let chunks: Vec<Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        CompletionStream::from_byte_stream("gpt-4o-mini", chunks_stream(chunks))
    }

    #[tokio::test]
    async fn test_receive_content_then_done_then_metadata() {
        let mut sink = RecordingSink::default();
        stream_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            "data: [DONE]\n",
        ])
        .receive(&mut sink)
        .await
        .unwrap();

        assert_eq!(
            sink.text(),
            "data: {\"content\":\"Hi\"}\n\
             data: [DONE]\n\n\
             data: {\"metadata\":{\"model\":\"gpt-4o-mini\"}}\n\n"
        );
    }

    #[tokio::test]
    async fn test_receive_skips_malformed_line() {
        let mut sink = RecordingSink::default();
        stream_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: not-json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .receive(&mut sink)
        .await
        .unwrap();

        assert_eq!(sink.count("\"content\""), 2);
        assert_eq!(sink.count("[DONE]"), 1);
    }

    #[tokio::test]
    async fn test_receive_done_emitted_without_terminator() {
        let mut sink = RecordingSink::default();
        stream_of(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"])
            .receive(&mut sink)
            .await
            .unwrap();
        assert_eq!(sink.count("[DONE]"), 1);
        assert!(sink.text().ends_with("}}\n\n"));
    }

    #[tokio::test]
    async fn test_receive_done_exactly_once_with_terminator() {
        let mut sink = RecordingSink::default();
        stream_of(&[
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ])
        .receive(&mut sink)
        .await
        .unwrap();
        assert_eq!(sink.count("[DONE]"), 1);
        assert_eq!(sink.count("late"), 0);
    }

    #[tokio::test]
    async fn test_receive_split_lines_and_crlf() {
        let mut sink = RecordingSink::default();
        stream_of(&[
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"He\"}}]}\r\n\r\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}",
        ])
        .receive(&mut sink)
        .await
        .unwrap();
        assert_eq!(sink.count("\"content\""), 2);
        assert!(sink.text().starts_with("data: {\"content\":\"He\"}\ndata: {\"content\":\"llo\"}\n"));
    }

    #[tokio::test]
    async fn test_receive_flushes_each_content_chunk() {
        let mut sink = RecordingSink::default();
        stream_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            "data: [DONE]\n",
        ])
        .receive(&mut sink)
        .await
        .unwrap();
        // one per content chunk plus the final flush
        assert_eq!(sink.flushed, 3);
    }

    #[tokio::test]
    async fn test_receive_metadata_carries_upstream_model_and_finish_reason() {
        let mut sink = RecordingSink::default();
        stream_of(&[
            "data: {\"model\":\"gpt-4o-2024\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: [DONE]\n",
        ])
        .receive(&mut sink)
        .await
        .unwrap();
        assert_eq!(sink.count("\"content\""), 1);
        assert!(sink.text().ends_with(
            "data: {\"metadata\":{\"finish_reason\":\"stop\",\"model\":\"gpt-4o-2024\"}}\n\n"
        ));
    }

    #[tokio::test]
    async fn test_receive_upstream_error_aborts_without_done() {
        let chunks = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            )),
            Err(GatewayError::Transport("connection reset".into())),
        ];
        let mut sink = RecordingSink::default();
        let err = CompletionStream::from_byte_stream("m", chunks_stream(chunks))
            .receive(&mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(sink.count("[DONE]"), 0);
        assert_eq!(sink.count("\"content\""), 1);
    }

    #[tokio::test]
    async fn test_receive_overlong_line_aborts_without_done() {
        let chunks: Vec<Result<Bytes>> = (0..1100)
            .map(|_| Ok(Bytes::from(vec![b'x'; 1024])))
            .collect();
        let mut sink = RecordingSink::default();
        let err = CompletionStream::from_byte_stream("m", chunks_stream(chunks))
            .receive(&mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert!(sink.written.is_empty());
    }

    #[tokio::test]
    async fn test_receive_sink_error_aborts() {
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..RecordingSink::default()
        };
        let err = stream_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ])
        .receive(&mut sink)
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(sink.written.len(), 1);
    }

    fn settings(base_url: String) -> CompletionSettings {
        CompletionSettings {
            base_url,
            model: "gpt-4o-mini".into(),
            api_key: SecretString::from("sk-test".to_string()),
            organization: Some("org-1".into()),
            max_completion_tokens: Some(64),
            system_prompt: Some("be brief".into()),
        }
    }

    #[test]
    fn test_request_body() {
        let relay = CompletionRelay::new(Client::new(), settings("http://x".into()));
        let body = relay.request_body("hello");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_completion_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_request_body_minimal() {
        let mut s = settings("http://x".into());
        s.system_prompt = None;
        s.max_completion_tokens = None;
        let body = CompletionRelay::new(Client::new(), s).request_body("hi");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.openai.api_key = "sk-abc".into();
        config.completions.model = "gpt-4o".into();
        let s = CompletionSettings::from_config(&config);
        assert_eq!(s.model, "gpt-4o");
        assert_eq!(s.api_key.expose_secret(), "sk-abc");
        assert_eq!(s.base_url, "https://api.openai.com/v1");
    }

    async fn mock_upstream() -> String {
        use axum::{Json, http::HeaderMap, http::StatusCode, response::IntoResponse};

        async fn handler(headers: HeaderMap, Json(body): Json<Value>) -> axum::response::Response {
            let authorized = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer sk-test");
            let org = headers
                .get("openai-organization")
                .and_then(|v| v.to_str().ok());
            if !authorized || org != Some("org-1") || body["stream"] != true {
                return (StatusCode::UNAUTHORIZED, "bad request shape").into_response();
            }
            let prompt = body["messages"][1]["content"].as_str().unwrap_or("");
            let sse = format!(
                "data: {}\n\ndata: [DONE]\n\n",
                json!({"choices": [{"delta": {"content": prompt.to_uppercase()}}]})
            );
            ([("content-type", "text/event-stream")], sse).into_response()
        }

        let app = axum::Router::new().route("/v1/chat/completions", axum::routing::post(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/v1/")
    }

    #[tokio::test]
    async fn test_send_and_receive_against_mock_upstream() {
        let base = mock_upstream().await;
        let relay = CompletionRelay::new(Client::new(), settings(base));
        let stream = relay.send("echo").await.unwrap();
        assert_eq!(stream.model(), "gpt-4o-mini");

        let mut sink = RecordingSink::default();
        stream.receive(&mut sink).await.unwrap();
        assert!(sink.text().starts_with("data: {\"content\":\"ECHO\"}\n"));
        assert_eq!(sink.count("[DONE]"), 1);
    }

    #[tokio::test]
    async fn test_send_rejected_by_upstream() {
        let base = mock_upstream().await;
        let mut s = settings(base);
        s.api_key = SecretString::from("sk-wrong".to_string());
        let err = CompletionRelay::new(Client::new(), s)
            .send("x")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            GatewayError::UpstreamRejected { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn test_send_unreachable() {
        let relay = CompletionRelay::new(Client::new(), settings("http://127.0.0.1:1".into()));
        assert!(matches!(
            relay.send("x").await,
            Err(GatewayError::UpstreamUnreachable(_))
        ));
    }
}
