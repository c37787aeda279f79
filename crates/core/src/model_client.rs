use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chorus_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

use crate::agent::DeltaHandler;
use crate::error::GenerationError;

type SendRequestResult = Result<ModelClientResponse, GenerationError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<DeltaHandler>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// Controls how often and how long a request is attempted.
///
/// Only transient failures (rate limiting and timeouts) are retried, with
/// an exponentially growing delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_interval: Duration,
    max_interval: Duration,
    timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt without a time limit.
    #[inline]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets how many times a failed request may be sent again.
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[inline]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    /// Sets the time limit of a single attempt, including streaming.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns how many times a failed request may be sent again.
    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the time limit of a single attempt.
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    policy: RetryPolicy,
}

impl ModelClient {
    /// Creates a client with the default retry policy.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    match fut.await {
                        Ok(resp) => handle_response(resp, on_delta).await,
                        Err(err) => {
                            error!("got an error: {err:?}");
                            Err(GenerationError::new(
                                err.kind(),
                                err.to_string(),
                            ))
                        }
                    }
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    #[inline]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the retry policy.
    #[inline]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends a request and returns the completely received response.
    ///
    /// Every text delta is forwarded to `on_delta` as it arrives. If an
    /// attempt times out halfway, the deltas it produced have already been
    /// forwarded when the request is sent again.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_delta: Option<DeltaHandler>,
    ) -> SendRequestResult {
        let policy = self.policy;
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.initial_interval)
            .with_max_interval(policy.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;
        let operation = || {
            attempts += 1;
            let last_attempt = attempts > policy.max_retries;
            let fut = (self.handler_fn)(req.clone(), on_delta.clone());
            async move {
                let result = match policy.timeout {
                    Some(limit) => tokio::time::timeout(limit, fut)
                        .await
                        .unwrap_or_else(|_| {
                            Err(GenerationError::new(
                                ErrorKind::Timeout,
                                format!("no response within {limit:?}"),
                            ))
                        }),
                    None => fut.await,
                };
                result.map_err(|err| {
                    if err.kind().is_transient() && !last_attempt {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        };
        let notify = |err: GenerationError, delay: Duration| {
            warn!("request failed ({err}), retrying in {delay:?}");
        };
        backoff::future::retry_notify(backoff, operation, notify).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelClientResponse {
    /// The concatenated message deltas.
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<R: ModelResponse>(
    resp: R,
    on_delta: Option<DeltaHandler>,
) -> SendRequestResult {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(GenerationError::new(err.kind(), err.to_string()));
            }
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                if let Some(on_delta) = &on_delta {
                    on_delta(&delta);
                }
                text.push_str(&delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        text,
        tool_calls,
        finish_reason,
    })
}
