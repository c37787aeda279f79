use chorus_model::ToolCallRequest;
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

/// How a preset response fails before it is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetFailure {
    RateLimited,
    Moderated,
    Other,
}

/// The preset response for one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    #[serde(default)]
    pub failures: Option<u64>,
    /// The kind of the injected failures, rate limiting by default.
    #[serde(default)]
    pub failure_kind: Option<PresetFailure>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            failure_kind: None,
        }
    }

    /// Creates a `PresetResponse` that streams `text` in chunks of words.
    pub fn with_text(text: &str) -> Self {
        let mut events = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            let split = rest
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == ' ')
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            events.push(PresetEvent::MessageDelta(rest[..split].to_owned()));
            rest = &rest[split..];
        }
        Self::with_events(events)
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the kind of the injected failures.
    #[inline]
    pub fn with_failure_kind(mut self, kind: PresetFailure) -> Self {
        self.failure_kind = Some(kind);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_split_text() {
        let preset = PresetResponse::with_text("Needs a stronger opening.");
        let text: String = preset
            .events
            .iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(delta) => delta.as_str(),
                PresetEvent::ToolCall(_) => unreachable!(),
            })
            .collect();
        assert_eq!(preset.events.len(), 4);
        assert_eq!(text, "Needs a stronger opening.");
    }

    #[test]
    fn test_load_script_from_json() {
        let script = json!([
            {
                "events": [
                    { "type": "message_delta", "data": "Let me read it." },
                    {
                        "type": "tool_call",
                        "data": {
                            "id": "call_1",
                            "name": "fetch_document",
                            "arguments": { "location": "essay.txt" }
                        }
                    }
                ],
                "failures": 2,
                "failure_kind": "rate_limited"
            },
            { "events": [] }
        ]);
        let presets: Vec<PresetResponse> =
            serde_json::from_value(script).unwrap();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[0].failures, Some(2));
        assert_eq!(presets[0].failure_kind, Some(PresetFailure::RateLimited));
        assert!(matches!(presets[0].events[1], PresetEvent::ToolCall(_)));
        assert_eq!(presets[1].failures, None);
    }
}
