//! A set of built-in tools that agents can use.

mod fetch_document;
mod search;

pub use fetch_document::FetchDocumentTool;
pub use search::{SearchHit, SearchIndex, SearchQuery, SearchTool};
