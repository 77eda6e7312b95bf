//! Stream aggregation: rebuilding one complete assistant message from the
//! ordered deltas of a streaming completion.
//!
//! Upstreams split a tool call across many deltas that share only a
//! positional index, interleave them with text, and give no guarantee the
//! argument text is valid JSON until the stream says tool calls are done.
//! [`StreamAggregator`] is the per-stream state machine; [`drive`] pulls
//! deltas one at a time and forwards the resulting events to a
//! [`StreamSink`].

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::translate::{parse_arguments, record_usage};
use super::DeltaStream;
use crate::error::GatewayError;
use crate::types::{
    ChatMessage, StreamDelta, TokenUsage, ToolCall, ToolCallFragment, ToolCallStatus,
};

/// Finish reason marking that no more tool-call fragments will arrive.
pub const TOOL_CALLS_FINISH_REASON: &str = "tool_calls";

/// Receiver of stream events.
///
/// Each callback is awaited before the next delta is read, so a slow sink
/// slows the stream down instead of buffering. Exactly one of
/// `on_complete` / `on_error` is called per stream, and nothing after it.
#[async_trait]
pub trait StreamSink: Send {
    async fn on_text_chunk(&mut self, text: &str, chunk: u64);

    async fn on_reasoning_chunk(&mut self, text: &str, chunk: u64);

    /// A tool call whose arguments are final.
    async fn on_tool_call(&mut self, call: &ToolCall);

    async fn on_complete(&mut self, message: &ChatMessage);

    async fn on_error(&mut self, error: &GatewayError);
}

/// Intermediate event produced while consuming deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorEvent {
    TextChunk { text: String, chunk: u64 },
    ReasoningChunk { text: String, chunk: u64 },
    ToolCall(ToolCall),
}

/// A tool call still receiving fragments.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn open(fragment_id: Option<&str>) -> Self {
        Self {
            id: fragment_id
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(generate_call_id),
            name: String::new(),
            arguments: String::new(),
        }
    }

    fn finalize(self) -> ToolCall {
        ToolCall {
            arguments: parse_arguments(&self.name, &self.arguments),
            id: self.id,
            name: self.name,
            status: ToolCallStatus::Success,
        }
    }
}

/// One occupied positional index of the tool-call arena.
#[derive(Debug)]
enum Slot {
    Accumulating(PendingToolCall),
    Finalized(ToolCall),
}

fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// State of exactly one in-flight streaming completion.
#[derive(Debug)]
pub struct StreamAggregator {
    model: String,
    content: String,
    reasoning: String,
    /// Tool calls keyed by the provider's positional index. Sparse, so an
    /// arbitrary upstream index costs one entry.
    slots: BTreeMap<usize, Slot>,
    /// Shared by text and reasoning events
    next_chunk: u64,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

impl StreamAggregator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: String::new(),
            reasoning: String::new(),
            slots: BTreeMap::new(),
            next_chunk: 0,
            usage: None,
            finish_reason: None,
        }
    }

    /// Fold one delta into the state, returning the events it produced.
    pub fn push(&mut self, delta: StreamDelta) -> Vec<AggregatorEvent> {
        let mut events = Vec::new();

        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            self.content.push_str(&text);
            let chunk = self.take_chunk_number();
            events.push(AggregatorEvent::TextChunk { text, chunk });
        }

        if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
            self.reasoning.push_str(&text);
            let chunk = self.take_chunk_number();
            events.push(AggregatorEvent::ReasoningChunk { text, chunk });
        }

        for fragment in delta.tool_calls {
            self.merge_fragment(fragment);
        }

        if let Some(usage) = delta.usage {
            self.usage = Some(usage);
        }

        if let Some(reason) = delta.finish_reason {
            let boundary = reason == TOOL_CALLS_FINISH_REASON;
            self.finish_reason = Some(reason);
            if boundary {
                events.extend(self.finalize_pending());
            }
        }

        events
    }

    /// End of stream: finalize what is left and build the final message.
    pub fn finish(mut self) -> (Vec<AggregatorEvent>, ChatMessage) {
        let events = self.finalize_pending();

        let tool_calls = self
            .slots
            .into_values()
            .filter_map(|slot| match slot {
                Slot::Finalized(call) => Some(call),
                Slot::Accumulating(_) => None,
            })
            .collect();

        let mut message = ChatMessage::assistant_with_tool_calls(self.content, tool_calls);
        if !self.reasoning.is_empty() {
            message.reasoning_content = Some(self.reasoning);
        }
        message
            .metadata
            .insert("model".to_string(), self.model.into());
        if let Some(reason) = self.finish_reason {
            message
                .metadata
                .insert("finish_reason".to_string(), reason.into());
        }
        if let Some(usage) = self.usage {
            record_usage(&mut message.metadata, usage);
        }

        (events, message)
    }

    fn take_chunk_number(&mut self) -> u64 {
        let chunk = self.next_chunk;
        self.next_chunk += 1;
        chunk
    }

    fn merge_fragment(&mut self, fragment: ToolCallFragment) {
        let index = fragment.index;
        let slot = match self.slots.entry(index) {
            Entry::Vacant(entry) => {
                entry.insert(Slot::Accumulating(PendingToolCall::open(fragment.id.as_deref())))
            }
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                if let (Slot::Accumulating(call), Some(id)) = (&mut *slot, fragment.id.as_deref()) {
                    if !id.is_empty() {
                        call.id = id.to_string();
                    }
                }
                slot
            }
        };

        match slot {
            Slot::Accumulating(call) => {
                if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
                    call.name = name;
                }
                if let Some(arguments) = fragment.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
            Slot::Finalized(call) => {
                tracing::warn!(
                    index,
                    tool = %call.name,
                    "ignoring fragment for an already finalized tool call"
                );
            }
        }
    }

    /// Finalize every accumulating call, in index order. Idempotent.
    fn finalize_pending(&mut self) -> Vec<AggregatorEvent> {
        let mut events = Vec::new();
        for slot in self.slots.values_mut() {
            let Slot::Accumulating(pending) = slot else {
                continue;
            };
            let call = std::mem::take(pending).finalize();
            events.push(AggregatorEvent::ToolCall(call.clone()));
            *slot = Slot::Finalized(call);
        }
        events
    }
}

async fn dispatch(sink: &mut dyn StreamSink, event: AggregatorEvent) {
    match event {
        AggregatorEvent::TextChunk { text, chunk } => sink.on_text_chunk(&text, chunk).await,
        AggregatorEvent::ReasoningChunk { text, chunk } => {
            sink.on_reasoning_chunk(&text, chunk).await
        }
        AggregatorEvent::ToolCall(call) => sink.on_tool_call(&call).await,
    }
}

/// Consume `deltas` with a fresh aggregator, forwarding every event to
/// `sink` in production order.
///
/// Returns the completed message, or `None` when the stream failed (the
/// failure has already been delivered through `on_error`).
pub async fn drive(
    mut deltas: DeltaStream,
    model: &str,
    sink: &mut dyn StreamSink,
) -> Option<ChatMessage> {
    let mut aggregator = StreamAggregator::new(model);

    while let Some(item) = deltas.next().await {
        match item {
            Ok(delta) => {
                for event in aggregator.push(delta) {
                    dispatch(sink, event).await;
                }
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "stream aborted");
                sink.on_error(&e).await;
                return None;
            }
        }
    }

    let (events, message) = aggregator.finish();
    for event in events {
        dispatch(sink, event).await;
    }
    tracing::debug!(
        model = %model,
        tool_calls = message.tool_calls.len(),
        "stream complete"
    );
    sink.on_complete(&message).await;
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::registry::ProviderId;
    use crate::llm::test_support::{Recorded, RecordingSink};
    use futures_util::stream;
    use serde_json::json;

    fn stream_of(deltas: Vec<StreamDelta>) -> DeltaStream {
        Box::pin(stream::iter(deltas.into_iter().map(Ok)))
    }

    fn search_scenario(last_fragment: &str) -> Vec<StreamDelta> {
        vec![
            StreamDelta::text("Hel"),
            StreamDelta::text("lo"),
            StreamDelta::tool_call(ToolCallFragment::new(0).id("t1").name("search")),
            StreamDelta::tool_call(ToolCallFragment::new(0).arguments("{\"q\":")),
            StreamDelta::tool_call(ToolCallFragment::new(0).arguments(last_fragment)),
            StreamDelta::finish("tool_calls"),
        ]
    }

    #[tokio::test]
    async fn test_text_and_tool_call_scenario() {
        let mut sink = RecordingSink::default();
        let message = drive(stream_of(search_scenario("\"cats\"}")), "m", &mut sink)
            .await
            .unwrap();

        let expected_call = ToolCall {
            id: "t1".to_string(),
            name: "search".to_string(),
            arguments: json!({"q": "cats"}).as_object().cloned().unwrap(),
            status: ToolCallStatus::Success,
        };
        assert_eq!(
            sink.events[..3],
            [
                Recorded::Text("Hel".to_string(), 0),
                Recorded::Text("lo".to_string(), 1),
                Recorded::ToolCall(expected_call.clone()),
            ]
        );
        assert_eq!(sink.events.len(), 4);
        assert_eq!(message.content, "Hello");
        assert_eq!(message.tool_calls, vec![expected_call]);
        assert_eq!(message.reasoning_content, None);
        assert_eq!(sink.completed(), Some(&message));
    }

    #[tokio::test]
    async fn test_truncated_arguments_become_raw() {
        let mut sink = RecordingSink::default();
        let message = drive(stream_of(search_scenario("\"cats")), "m", &mut sink)
            .await
            .unwrap();

        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].raw_arguments(), Some("{\"q\":\"cats"));
        assert_eq!(message.tool_calls[0].status, ToolCallStatus::Success);
        assert_eq!(sink.terminal_count(), 1);
    }

    #[test]
    fn test_reasoning_shares_chunk_numbers() {
        let mut aggregator = StreamAggregator::new("deepseek-reasoner");
        let mut events = aggregator.push(StreamDelta::reasoning("think"));
        events.extend(aggregator.push(StreamDelta {
            content: Some("A".to_string()),
            reasoning_content: Some("more".to_string()),
            ..StreamDelta::default()
        }));

        assert_eq!(
            events,
            vec![
                AggregatorEvent::ReasoningChunk { text: "think".to_string(), chunk: 0 },
                AggregatorEvent::TextChunk { text: "A".to_string(), chunk: 1 },
                AggregatorEvent::ReasoningChunk { text: "more".to_string(), chunk: 2 },
            ]
        );
        let (_, message) = aggregator.finish();
        assert_eq!(message.content, "A");
        assert_eq!(message.reasoning_content.as_deref(), Some("thinkmore"));
    }

    #[test]
    fn test_empty_fragments_emit_nothing() {
        let mut aggregator = StreamAggregator::new("m");
        let events = aggregator.push(StreamDelta {
            content: Some(String::new()),
            reasoning_content: Some(String::new()),
            ..StreamDelta::default()
        });
        assert!(events.is_empty());
    }

    #[test]
    fn test_name_replaced_and_arguments_concatenated() {
        let mut aggregator = StreamAggregator::new("m");
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).id("a").name("draft")));
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).arguments("{\"x\"")));
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).name("")));
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).name("final").arguments(":1}")));

        let (events, message) = aggregator.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(message.tool_calls[0].name, "final");
        assert_eq!(message.tool_calls[0].id, "a");
        assert_eq!(message.tool_calls[0].arguments["x"], json!(1));
    }

    #[test]
    fn test_interleaved_calls_emit_in_index_order() {
        let mut aggregator = StreamAggregator::new("m");
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(1).id("second").name("b")));
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).id("first").name("a")));
        aggregator.push(StreamDelta {
            tool_calls: vec![
                ToolCallFragment::new(1).arguments("{}"),
                ToolCallFragment::new(0).arguments("{\"k\":true}"),
            ],
            ..StreamDelta::default()
        });
        let events = aggregator.push(StreamDelta::finish("tool_calls"));

        let ids: Vec<&str> = events
            .iter()
            .map(|e| match e {
                AggregatorEvent::ToolCall(call) => call.id.as_str(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(ids, ["first", "second"]);
    }

    #[test]
    fn test_missing_id_is_generated_and_gaps_skipped() {
        let mut aggregator = StreamAggregator::new("m");
        aggregator.push(StreamDelta::tool_call(
            ToolCallFragment::new(2).name("ping").arguments("{}"),
        ));
        let (events, message) = aggregator.finish();

        assert_eq!(events.len(), 1);
        assert_eq!(message.tool_calls.len(), 1);
        assert!(message.tool_calls[0].id.starts_with("call_"));
        assert!(message.tool_calls[0].arguments.is_empty());
    }

    #[test]
    fn test_extreme_indices_stay_sparse() {
        let mut aggregator = StreamAggregator::new("m");
        aggregator.push(StreamDelta::tool_call(
            ToolCallFragment::new(usize::MAX).id("last").name("x").arguments("{}"),
        ));
        aggregator.push(StreamDelta::tool_call(
            ToolCallFragment::new(200_000_000).id("far").name("y"),
        ));
        aggregator.push(StreamDelta::tool_call(
            ToolCallFragment::new(200_000_000).arguments("{\"n\":2}"),
        ));
        let events = aggregator.push(StreamDelta::finish("tool_calls"));

        let ids: Vec<&str> = events
            .iter()
            .map(|e| match e {
                AggregatorEvent::ToolCall(call) => call.id.as_str(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(ids, ["far", "last"]);

        let (_, message) = aggregator.finish();
        assert_eq!(message.tool_calls.len(), 2);
        assert_eq!(message.tool_calls[0].arguments["n"], json!(2));
    }

    #[tokio::test]
    async fn test_huge_index_stream_completes() {
        let mut sink = RecordingSink::default();
        let deltas = vec![
            StreamDelta::text("calling"),
            StreamDelta::tool_call(ToolCallFragment::new(usize::MAX).name("x").arguments("{}")),
            StreamDelta::finish("tool_calls"),
        ];
        let message = drive(stream_of(deltas), "m", &mut sink).await.unwrap();

        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "x");
        assert_eq!(sink.terminal_count(), 1);
        assert_eq!(sink.completed(), Some(&message));
    }

    #[test]
    fn test_finalization_without_boundary_at_end_of_stream() {
        let mut aggregator = StreamAggregator::new("m");
        let events = aggregator.push(StreamDelta::tool_call(
            ToolCallFragment::new(0).id("t").name("n").arguments("{\"a\":1}"),
        ));
        assert!(events.is_empty());

        let (events, message) = aggregator.finish();
        assert!(matches!(&events[..], [AggregatorEvent::ToolCall(call)] if call.id == "t"));
        assert_eq!(message.tool_calls.len(), 1);
    }

    #[test]
    fn test_finalization_is_idempotent() {
        let mut aggregator = StreamAggregator::new("m");
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).id("t").name("n")));
        assert_eq!(aggregator.push(StreamDelta::finish("tool_calls")).len(), 1);
        assert!(aggregator.push(StreamDelta::finish("tool_calls")).is_empty());

        // Late fragment for a frozen call changes nothing
        aggregator.push(StreamDelta::tool_call(ToolCallFragment::new(0).arguments("junk")));
        let (events, message) = aggregator.finish();
        assert!(events.is_empty());
        assert_eq!(message.tool_calls[0].raw_arguments(), Some(""));
    }

    #[test]
    fn test_metadata_records_usage_and_finish_reason() {
        let mut aggregator = StreamAggregator::new("gpt-4o");
        aggregator.push(StreamDelta::text("ok"));
        aggregator.push(StreamDelta::finish("stop"));
        aggregator.push(StreamDelta {
            usage: Some(TokenUsage {
                input_tokens: 9,
                output_tokens: 1,
            }),
            ..StreamDelta::default()
        });
        let (_, message) = aggregator.finish();

        assert_eq!(message.metadata["model"], json!("gpt-4o"));
        assert_eq!(message.metadata["finish_reason"], json!("stop"));
        assert_eq!(message.usage().unwrap().input_tokens, 9);
        assert!(message.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_error_mid_stream_is_terminal() {
        let items = vec![
            Ok(StreamDelta::text("partial")),
            Ok(StreamDelta::tool_call(ToolCallFragment::new(0).id("t").name("n"))),
            Err(GatewayError::upstream(ProviderId::OpenAi, "connection reset")),
            Ok(StreamDelta::text("never seen")),
        ];
        let mut sink = RecordingSink::default();
        let result = drive(Box::pin(stream::iter(items)), "m", &mut sink).await;

        assert!(result.is_none());
        assert_eq!(sink.events.len(), 2);
        assert!(matches!(sink.events.last(), Some(Recorded::Error(_))));
        assert_eq!(sink.terminal_count(), 1);
        assert!(sink.completed().is_none());
    }

    #[tokio::test]
    async fn test_empty_stream_still_completes() {
        let mut sink = RecordingSink::default();
        let message = drive(stream_of(vec![]), "m", &mut sink).await.unwrap();
        assert_eq!(message.content, "");
        assert_eq!(sink.events.len(), 1);
    }
}
