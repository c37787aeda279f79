use std::collections::BTreeMap;
use std::future::ready;
use std::sync::LazyLock;

use chorus_model::{ModelMessage, ToolCallRequest};
use chorus_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ConfigError;
use crate::tool::{Error as ToolError, Tool, ToolResult};
use crate::{Agent, AgentBuilder, Persona, Transcript, TurnContext};

static SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "properties": { "uri": { "type": "string" } },
        "required": ["uri"]
    })
});

#[derive(Deserialize)]
struct FetchInput {
    uri: String,
}

struct FakeFetchTool;

impl Tool for FakeFetchTool {
    type Input = FetchInput;

    fn name(&self) -> &str {
        "fetch_document"
    }

    fn description(&self) -> &str {
        "Fetches a document"
    }

    fn parameter_schema(&self) -> &Value {
        &SCHEMA
    }

    fn execute(
        &self,
        input: FetchInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(match input.uri.as_str() {
            "essay.txt" => Ok("Cats are great.".to_owned()),
            _ => Err(ToolError::execution_error().with_reason("404 not found")),
        })
    }
}

fn tool_call(uri: &str) -> PresetResponse {
    PresetResponse::with_events([PresetEvent::ToolCall(ToolCallRequest {
        id: format!("call_{uri}"),
        name: "fetch_document".to_owned(),
        arguments: json!({ "uri": uri }),
    })])
}

fn reviewer() -> Persona {
    Persona::new("Reviewer", "Review the essay.").with_temperature(0.2)
}

fn transcript() -> Transcript {
    let mut transcript = Transcript::new();
    transcript.push_user("Please review essay.txt");
    transcript
}

#[tokio::test]
async fn test_simple_message() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_text_response("Hi, what can I do for you?");

    let agent = AgentBuilder::with_model_provider(model_provider.clone(), reviewer())
        .build()
        .unwrap();
    assert_eq!(agent.name(), "Reviewer");

    let text = agent
        .generate(&transcript(), &TurnContext::default())
        .await
        .unwrap();
    assert_eq!(text, "Hi, what can I do for you?");

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].instructions(), Some("Review the essay."));
    assert_eq!(requests[0].sampling.temperature, Some(0.2));
    assert!(requests[0].tools.is_empty());
    assert_eq!(
        requests[0].messages[1],
        ModelMessage::User {
            name: Some("user".to_owned()),
            content: "Please review essay.txt".to_owned(),
        }
    );
}

#[tokio::test]
async fn test_tool_round_trip() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(tool_call("essay.txt"));
    model_provider.add_text_response("The essay needs a stronger opening.");

    let agent = AgentBuilder::with_model_provider(
        model_provider.clone(),
        reviewer().with_capability("fetch_document"),
    )
    .with_tool(FakeFetchTool)
    .build()
    .unwrap();

    let text = agent
        .generate(&transcript(), &TurnContext::default())
        .await
        .unwrap();
    assert_eq!(text, "The essay needs a stronger opening.");

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    let Some(ModelMessage::Tool(result)) = requests[1].messages.last() else {
        panic!("expected a tool result");
    };
    assert_eq!(result.id, "call_essay.txt");
    assert_eq!(result.content, "Cats are great.");
}

#[tokio::test]
async fn test_tool_failure_is_recovered() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(tool_call("missing.txt"));
    model_provider.add_text_response("I could not read the document.");

    let agent = AgentBuilder::with_model_provider(
        model_provider.clone(),
        reviewer().with_capability("fetch_document"),
    )
    .with_tool(FakeFetchTool)
    .build()
    .unwrap();

    let text = agent
        .generate(&transcript(), &TurnContext::default())
        .await
        .unwrap();
    assert_eq!(text, "I could not read the document.");

    let requests = model_provider.requests();
    let Some(ModelMessage::Tool(result)) = requests[1].messages.last() else {
        panic!("expected a tool result");
    };
    assert_eq!(result.content, "[fetch_document unavailable: 404 not found]");
}

#[tokio::test]
async fn test_last_round_has_no_tools() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(tool_call("essay.txt"));
    model_provider.add_text_response("Enough fetching.");

    let agent = AgentBuilder::with_model_provider(
        model_provider.clone(),
        reviewer().with_capability("fetch_document"),
    )
    .with_tool(FakeFetchTool)
    .with_max_tool_rounds(1)
    .build()
    .unwrap();

    let text = agent
        .generate(&transcript(), &TurnContext::default())
        .await
        .unwrap();
    assert_eq!(text, "Enough fetching.");

    let requests = model_provider.requests();
    assert_eq!(requests[0].tools.len(), 1);
    assert!(requests[1].tools.is_empty());
}

#[tokio::test]
async fn test_history_limit() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_text_response("ok");

    let agent = AgentBuilder::with_model_provider(model_provider.clone(), reviewer())
        .with_history_limit(2)
        .build()
        .unwrap();

    let mut transcript = transcript();
    transcript.push_agent("Reviewer", "first");
    transcript.push_agent("Writer", "second");
    agent
        .generate(&transcript, &TurnContext::default())
        .await
        .unwrap();

    let requests = model_provider.requests();
    // System instructions plus the two most recent messages.
    assert_eq!(requests[0].messages.len(), 3);
    assert_eq!(
        requests[0].messages[2],
        ModelMessage::assistant(Some("Writer".to_owned()), "second")
    );
}

#[test]
fn test_unknown_capability() {
    let err = AgentBuilder::with_model_provider(
        TestModelProvider::default(),
        reviewer().with_capability("search"),
    )
    .with_tool(FakeFetchTool)
    .build()
    .err()
    .unwrap();
    assert_eq!(
        err,
        ConfigError::UnknownCapability {
            agent: "Reviewer".to_owned(),
            capability: "search".to_owned(),
        }
    );
}

#[tokio::test]
async fn test_instructions_are_rendered_once() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_text_response("Hello Jane.");

    let persona = Persona::new("Greeter", "Greet {{first_name}} {{last_name}}.")
        .with_variable("first_name", "Jane");
    let shared = BTreeMap::from([("last_name".to_owned(), "Doe".to_owned())]);
    let agent = AgentBuilder::with_model_provider(model_provider.clone(), persona)
        .with_variables(&shared)
        .build()
        .unwrap();
    assert_eq!(agent.persona().instructions, "Greet Jane Doe.");

    agent
        .generate(&transcript(), &TurnContext::default())
        .await
        .unwrap();
    assert_eq!(
        model_provider.requests()[0].instructions(),
        Some("Greet Jane Doe.")
    );
}

#[test]
fn test_missing_variable_fails_build() {
    let err = AgentBuilder::with_model_provider(
        TestModelProvider::default(),
        Persona::new("Greeter", "Greet {{first_name}}."),
    )
    .build()
    .err()
    .unwrap();
    assert_eq!(
        err,
        ConfigError::MissingVariable {
            agent: "Greeter".to_owned(),
            variable: "first_name".to_owned(),
        }
    );
}
