use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::Arc;

use chorus_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_K: usize = 3;
const MAX_K: usize = 20;

/// A query against a [`SearchIndex`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The text to search for.
    pub text: String,
    /// An index-specific filter expression.
    pub filter: Option<String>,
    /// How many hits to return at most.
    pub k: usize,
}

/// A document found by a [`SearchIndex`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// The document text.
    pub document: String,
    /// Relevance, higher is better.
    pub score: f32,
}

/// A searchable document store, e.g. a vector index.
pub trait SearchIndex: Send + Sync + 'static {
    /// The error type of failed searches.
    type Error: StdError + Send + 'static;

    /// Searches the index.
    ///
    /// This method must return a future that is fully independent of `self`.
    fn search(
        &self,
        query: SearchQuery,
    ) -> impl Future<Output = Result<Vec<SearchHit>, Self::Error>> + Send + 'static;
}

/// Input of [`SearchTool`].
#[derive(Deserialize, JsonSchema)]
pub struct SearchParameters {
    #[schemars(description = "What to search for.")]
    query: String,
    #[schemars(description = "Optional filter expression.")]
    filter: Option<String>,
    #[schemars(description = "Number of results, default to 3.")]
    k: Option<usize>,
}

/// A tool for searching a document index.
pub struct SearchTool<I> {
    index: Arc<I>,
    parameter_schema: Value,
}

impl<I: SearchIndex> SearchTool<I> {
    /// Creates a new search tool over the index.
    #[inline]
    pub fn new(index: I) -> Self {
        SearchTool {
            index: Arc::new(index),
            parameter_schema: schema_for!(SearchParameters).to_value(),
        }
    }
}

impl<I: SearchIndex> Tool for SearchTool<I> {
    type Input = SearchParameters;

    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        r#"
Searches the document index and returns the most relevant documents, best first."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: SearchParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let k = input.k.unwrap_or(DEFAULT_K).clamp(1, MAX_K);
        let query = SearchQuery {
            text: input.query,
            filter: input.filter,
            k,
        };
        let search = self.index.search(query);
        async move {
            let hits = search.await.map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })?;
            Ok(render_hits(hits, k))
        }
    }
}

fn render_hits(mut hits: Vec<SearchHit>, k: usize) -> String {
    if hits.is_empty() {
        return "No results.".to_owned();
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);

    let mut output = String::new();
    for (idx, hit) in hits.iter().enumerate() {
        let _ = writeln!(output, "{}. ({:.3}) {}", idx + 1, hit.score, hit.document);
    }
    output
}
