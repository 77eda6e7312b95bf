//! OpenAI-compatible LLM provider implementation.
//!
//! Speaks `POST {api_base}/chat/completions` with bearer auth. Streaming
//! responses are Server-Sent Events terminated by `data: [DONE]`.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};

use super::registry::ProviderId;
use super::translate::{delta_from_chunk, ApiRequest, ApiResponse, StreamResponseChunk};
use super::{DeltaStream, LlmProvider};
use crate::error::GatewayError;

pub struct OpenAiCompatibleProvider {
    id: ProviderId,
    api_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: ProviderId, api_key: String, api_base: Option<String>) -> Self {
        Self {
            id,
            api_key,
            api_base: api_base.unwrap_or_else(|| id.default_api_base().to_string()),
            client: reqwest::Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn request(&self, api_request: &ApiRequest) -> reqwest::RequestBuilder {
        self.client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(api_request)
    }

    fn upstream_error(&self, message: impl Into<String>) -> GatewayError {
        let error = GatewayError::upstream(self.id, message);
        tracing::error!(provider = %self.id, error = %error, "upstream request failed");
        error
    }
}

/// Turn an open event source into normalized deltas.
///
/// Ends quietly on `[DONE]` or when the server closes the stream; any
/// other failure becomes a single error item and ends the stream.
fn into_deltas(id: ProviderId, source: EventSource) -> DeltaStream {
    let deltas = stream::unfold(Some(source), move |state| async move {
        let mut source = state?;
        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) => {
                    let data = message.data.trim();
                    if data == "[DONE]" {
                        source.close();
                        return None;
                    }
                    let item = serde_json::from_str::<StreamResponseChunk>(data)
                        .map(delta_from_chunk)
                        .map_err(|e| {
                            GatewayError::upstream(id, format!("invalid stream chunk: {}", e))
                        });
                    return match item {
                        Ok(delta) => Some((Ok(delta), Some(source))),
                        Err(e) => {
                            source.close();
                            Some((Err(e), None))
                        }
                    };
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => return None,
                Some(Err(e)) => {
                    source.close();
                    return Some((Err(GatewayError::upstream(id, e.to_string())), None));
                }
            }
        }
    });
    Box::pin(deltas)
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn chat_completion(&self, api_request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
        let url = self.completions_url();
        tracing::debug!(provider = %self.id, model = %api_request.model, url = %url, "sending completion request");

        let response = self
            .request(api_request)
            .send()
            .await
            .map_err(|e| self.upstream_error(format!("failed to send request to {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(self.upstream_error(format!("API error ({}): {}", status, error_body)));
        }

        response
            .json::<ApiResponse>()
            .await
            .map_err(|e| self.upstream_error(format!("failed to parse API response: {}", e)))
    }

    async fn chat_completion_stream(
        &self,
        api_request: &ApiRequest,
    ) -> Result<DeltaStream, GatewayError> {
        tracing::debug!(provider = %self.id, model = %api_request.model, "opening completion stream");

        let mut source = self
            .request(api_request)
            .eventsource()
            .map_err(|e| self.upstream_error(format!("failed to build stream request: {}", e)))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        // Connect eagerly so connection and status failures reach the
        // caller before any event is emitted.
        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {
                source.close();
                return Err(self.upstream_error("stream sent data before opening"));
            }
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
                source.close();
                let error_body = response.text().await.unwrap_or_default();
                return Err(self.upstream_error(format!("API error ({}): {}", status, error_body)));
            }
            Some(Err(e)) => {
                source.close();
                return Err(self.upstream_error(e.to_string()));
            }
            None => return Err(self.upstream_error("stream closed before opening")),
        }

        Ok(into_deltas(self.id, source))
    }

    fn name(&self) -> &str {
        self.id.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::translate::build_api_request;
    use crate::types::{ChatMessage, ChatRequest, StreamDelta, ToolCallFragment};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            ProviderId::DeepSeek,
            "sk-test".to_string(),
            Some(format!("{}/v1/", server.uri())),
        )
    }

    fn api_request(stream: bool) -> ApiRequest {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        build_api_request(&request, "deepseek-chat", stream).unwrap()
    }

    fn sse_body(chunks: &[serde_json::Value]) -> String {
        let mut body = String::new();
        for chunk in chunks {
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[tokio::test]
    async fn test_chat_completion_posts_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "deepseek-chat",
                "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .chat_completion(&api_request(false))
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_chat_completion_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .chat_completion(&api_request(false))
            .await
            .unwrap_err();
        match err {
            GatewayError::UpstreamRequestFailed { provider, message } => {
                assert_eq!(provider, ProviderId::DeepSeek);
                assert!(message.contains("401"));
                assert!(message.contains("invalid api key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_yields_normalized_deltas() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]}),
            json!({"choices": [{"delta": {"content": "Hi"}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "t1", "function": {"name": "search", "arguments": "{}"}}
            ]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let deltas: Vec<StreamDelta> = provider(&server)
            .chat_completion_stream(&api_request(true))
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0].reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(deltas[1].content.as_deref(), Some("Hi"));
        assert_eq!(
            deltas[2].tool_calls,
            vec![ToolCallFragment::new(0).id("t1").name("search").arguments("{}")]
        );
        assert_eq!(deltas[3].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_synchronous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = provider(&server)
            .chat_completion_stream(&api_request(true))
            .await;
        match result {
            Err(GatewayError::UpstreamRequestFailed { message, .. }) => {
                assert!(message.contains("500"));
                assert!(message.contains("overloaded"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("stream should not open"),
        }
    }

    #[tokio::test]
    async fn test_stream_invalid_chunk_is_an_error_item() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: {not json\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let items: Vec<Result<StreamDelta, GatewayError>> = provider(&server)
            .chat_completion_stream(&api_request(true))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(GatewayError::UpstreamRequestFailed { .. })));
    }
}
