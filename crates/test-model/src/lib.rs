//! A local scripted model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use chorus_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    has_tool_call: bool,
    completed: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.completed {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = match this.events.pop_front() {
            Some(PresetEvent::MessageDelta(msg)) => {
                ModelResponseEvent::MessageDelta(msg)
            }
            Some(PresetEvent::ToolCall(req)) => ModelResponseEvent::ToolCall(req),
            None => {
                this.completed = true;
                ModelResponseEvent::Completed(if this.has_tool_call {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                })
            }
        };
        Poll::Ready(Ok(Some(event)))
    }
}

#[derive(Default)]
struct Script {
    steps: VecDeque<PresetResponse>,
    failed_attempts: u64,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Requests are answered with the preset responses in the order they were
/// added, no matter which agent sends them. Since a group chat runs its
/// turns strictly one after another, the script reads like the expected
/// conversation. If the script runs out of responses, an error will be
/// returned.
///
/// Clones share the same script, so a test can keep one clone to inspect
/// the recorded requests after handing the other one to the code under
/// test.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.lock().steps.push_back(preset);
    }

    /// Adds a response that streams the given text.
    #[inline]
    pub fn add_text_response(&mut self, text: &str) {
        self.add_response(PresetResponse::with_text(text));
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, including the failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of responses not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock().steps.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_response(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        let mut script = self.lock();
        script.requests.push(req.clone());

        let Some(step) = script.steps.front() else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };
        if let Some(failures) = step.failures {
            if failures == 0 || script.failed_attempts < failures {
                let kind = match step.failure_kind {
                    None | Some(PresetFailure::RateLimited) => {
                        ErrorKind::RateLimitExceeded
                    }
                    Some(PresetFailure::Moderated) => ErrorKind::Moderated,
                    Some(PresetFailure::Other) => ErrorKind::Other,
                };
                script.failed_attempts += 1;
                return Err(Error {
                    message: "injected failure",
                    kind,
                });
            }
        }

        script.failed_attempts = 0;
        let Some(step) = script.steps.pop_front() else {
            unreachable!("front step has been checked");
        };
        let has_tool_call = step
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        Ok(TestModelResponse {
            events: step.events.into(),
            has_tool_call,
            completed: false,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.next_response(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use chorus_model::{ModelMessage, ToolCallRequest};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Vec<ToolCallRequest>, ModelFinishReason) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_calls = vec![];
        loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => {
                    return (msg, tool_calls, reason);
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            }
        }
    }

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_responses_in_order() {
        let mut provider = TestModelProvider::default();
        provider.add_text_response("Hello, world!");
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me take a look.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "tool:1".to_owned(),
                name: "fetch_document".to_owned(),
                arguments: json!({ "location": "todo.txt" }),
            }),
        ]));

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, ModelFinishReason::Stop);

        let resp = provider.send_request(&request("Check")).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "Let me take a look.");
        assert_eq!(tool_calls[0].name, "fetch_document");
        assert_eq!(reason, ModelFinishReason::ToolCalls);

        let err = provider.send_request(&request("More")).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_text("ok").with_failures(2));
        provider.add_response(
            PresetResponse::with_text("never")
                .with_failures(0)
                .with_failure_kind(PresetFailure::Moderated),
        );

        for _ in 0..2 {
            let err = provider.send_request(&request("x")).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        let resp = provider.send_request(&request("x")).await.unwrap();
        assert_eq!(collect_response(resp).await.0, "ok");

        for _ in 0..3 {
            let err = provider.send_request(&request("x")).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Moderated);
        }
        assert_eq!(provider.remaining(), 1);
    }
}
