use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use chorus_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ToolCall};

/// Accumulated state of a streaming completion.
struct StreamState {
    sse: Sse,
    id: Option<String>,
    // Tool calls arrive in fragments keyed by `index`, they are only
    // complete once the finish reason is received.
    tool_calls: Vec<ToolCall>,
    pending: VecDeque<ModelResponseEvent>,
    finished: bool,
    exhausted: bool,
}

impl StreamState {
    fn merge_tool_call(&mut self, fragment: ToolCall) {
        let Some(partial) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.index == fragment.index)
        else {
            self.tool_calls.push(fragment);
            return;
        };
        if let Some(id) = fragment.id {
            partial.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = fragment.r#type {
            partial.r#type.get_or_insert_default().push_str(&ty);
        }
        let Some(function) = fragment.function else {
            return;
        };
        let partial_func = partial.function.get_or_insert_default();
        if let Some(name) = function.name {
            partial_func.name.get_or_insert_default().push_str(&name);
        }
        if let Some(arguments) = function.arguments {
            partial_func
                .arguments
                .get_or_insert_default()
                .push_str(&arguments);
        }
    }

    /// Queues the completed tool calls followed by the completion event.
    fn finish(&mut self, reason: ModelFinishReason) {
        if self.finished {
            return;
        }
        self.finished = true;
        for tool_call in self.tool_calls.drain(..) {
            let function = tool_call.function.unwrap_or_default();
            let arguments = function.arguments.unwrap_or_default();
            let arguments = if arguments.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&arguments)
                    .unwrap_or(Value::String(arguments))
            };
            self.pending
                .push_back(ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: tool_call.id.unwrap_or_default(),
                    name: function.name.unwrap_or_default(),
                    arguments,
                }));
        }
        self.pending
            .push_back(ModelResponseEvent::Completed(reason));
    }
}

type NextEvent = Result<(Option<ModelResponseEvent>, StreamState), Error>;

/// A streaming chat completion.
pub struct OpenAIResponse {
    next_event_fut: Option<BoxFuture<'static, NextEvent>>,
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let state = StreamState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending: Default::default(),
            finished: false,
            exhausted: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let Some(next_event_fut) = &mut this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        match ready!(next_event_fut.as_mut().poll(cx)) {
            Ok((Some(event), state)) => {
                this.next_event_fut = Some(Box::pin(next_event(state)));
                Poll::Ready(Ok(Some(event)))
            }
            Ok((None, _)) => {
                this.next_event_fut = None;
                Poll::Ready(Ok(None))
            }
            Err(err) => {
                this.next_event_fut = None;
                Poll::Ready(Err(err))
            }
        }
    }
}

fn finish_reason(reason: &str) -> Result<ModelFinishReason, Error> {
    match reason {
        "tool_calls" | "function_call" => Ok(ModelFinishReason::ToolCalls),
        "length" => Ok(ModelFinishReason::Length),
        "content_filter" => Err(Error::new(
            "the response was filtered by the content policy",
            ErrorKind::Moderated,
        )),
        _ => Ok(ModelFinishReason::Stop),
    }
}

async fn next_event(mut state: StreamState) -> NextEvent {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Ok((Some(event), state));
        }
        if state.exhausted {
            return Ok((None, state));
        }

        let data = match state.sse.next_event().await {
            Ok(Some(data)) if data != "[DONE]" => data,
            Ok(_) => {
                // Some servers close the stream without a finish reason.
                state.exhausted = true;
                state.finish(ModelFinishReason::Stop);
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {data}");

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&data)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if chunk.id.is_empty() {
            // Azure sends prompt filter results in a chunk without an id.
            continue;
        }
        if state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }
        if state.finished {
            // Trailing usage chunks.
            continue;
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    state
                        .pending
                        .push_back(ModelResponseEvent::MessageDelta(content));
                }
            }
            for fragment in choice.delta.tool_calls.into_iter().flatten() {
                state.merge_tool_call(fragment);
            }
            if let Some(reason) = choice.finish_reason {
                state.finish(finish_reason(&reason)?);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    const TOOL_CALL_STREAM: &[u8] = br#"data: {"id":"c1","choices":[{"delta":{"role":"assistant","content":"Let me "},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"content":"check."},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"fetch_document","arguments":""}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"location\":"}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"essay.txt\"}"}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","type":"function","function":{"name":"search","arguments":""}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{},"finish_reason":"tool_calls"}]}

data: {"id":"c1","choices":[]}

data: [DONE]

"#;

    async fn collect(
        chunks: Chunks,
    ) -> Result<Vec<ModelResponseEvent>, Error> {
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_tool_call_stream() {
        let events = collect(Chunks::canned([TOOL_CALL_STREAM])).await.unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Let me ".to_owned()),
                ModelResponseEvent::MessageDelta("check.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_a".to_owned(),
                    name: "fetch_document".to_owned(),
                    arguments: json!({ "location": "essay.txt" }),
                }),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_b".to_owned(),
                    name: "search".to_owned(),
                    arguments: json!({}),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_azure_prompt_filter_chunk() {
        let chunks = Chunks::canned([&br#"data: {"choices":[],"created":0,"id":"","model":"","object":"","prompt_filter_results":[{"prompt_index":0,"content_filter_results":{"hate":{"filtered":false,"severity":"safe"}}}]}

data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}

data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}

data: [DONE]

"#[..]]);
        let events = collect(chunks).await.unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Hi".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_without_finish_reason() {
        let chunks = Chunks::canned([&br#"data: {"id":"c2","choices":[{"delta":{"content":"Done"},"finish_reason":null}]}

"#[..]]);
        let events = collect(chunks).await.unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Done".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_content_filter() {
        let chunks = Chunks::canned([&br#"data: {"id":"c3","choices":[{"delta":{},"finish_reason":"content_filter"}]}

"#[..]]);
        let err = collect(chunks).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Moderated);
    }

    #[tokio::test]
    async fn test_id_mismatch() {
        let chunks = Chunks::canned([&br#"data: {"id":"a","choices":[]}

data: {"id":"b","choices":[]}

"#[..]]);
        let err = collect(chunks).await.unwrap_err();
        assert_eq!(err.message(), "chunk id mismatch");
    }
}
