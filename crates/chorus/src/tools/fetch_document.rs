use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chorus_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const MAX_CHARS: usize = 20_000;
// Enough bytes for `MAX_CHARS` characters of any width.
const MAX_BYTES: usize = MAX_CHARS * 4;

/// Input of [`FetchDocumentTool`].
#[derive(Deserialize, JsonSchema)]
pub struct FetchDocumentParameters {
    #[schemars(description = "An http(s) URL or a file path relative to the document root.")]
    location: String,
}

/// A tool for loading a document from a URL or a local path.
///
/// Local paths are resolved against the document root and may not leave
/// it. Without a document root only URLs can be fetched. If the document
/// cannot be loaded, a copy with the same file name in the cache directory
/// is used instead.
#[derive(Clone)]
pub struct FetchDocumentTool {
    parameter_schema: Value,
    client: reqwest::Client,
    document_root: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
}

impl FetchDocumentTool {
    /// Creates a new fetch document tool.
    #[inline]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        FetchDocumentTool {
            parameter_schema: schema_for!(FetchDocumentParameters).to_value(),
            client,
            document_root: None,
            cache_dir: None,
        }
    }

    /// Allows reading local files below `dir`.
    #[inline]
    pub fn with_document_root<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.document_root = Some(dir.into());
        self
    }

    /// Sets the directory of cached copies.
    #[inline]
    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

impl Default for FetchDocumentTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FetchDocumentTool {
    type Input = FetchDocumentParameters;

    fn name(&self) -> &str {
        "fetch_document"
    }

    fn description(&self) -> &str {
        r#"
Fetches a text document from an http(s) URL or a file path relative to the document root and returns its content.
Long documents are truncated."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: FetchDocumentParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let document_root = self.document_root.clone();
        let cache_dir = self.cache_dir.clone();
        async move {
            let location = input.location.trim();
            let fetched = if is_url(location) {
                fetch_url(&client, location).await
            } else {
                match resolve_local(document_root.as_deref(), location).await {
                    Ok(path) => read_file(&path).await,
                    Err(err) => Err(err),
                }
            };

            match (fetched, cache_dir) {
                (Ok(text), _) => Ok(text),
                (Err(err), Some(cache_dir)) => {
                    let Some(name) = file_name(location) else {
                        return Err(err);
                    };
                    warn!("failed to fetch {location} ({err}), trying the cache");
                    read_file(&cache_dir.join(name)).await.map_err(|_| err)
                }
                (Err(err), None) => Err(err),
            }
        }
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// The last path segment, without query or fragment.
fn file_name(location: &str) -> Option<&str> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != ".." && !name.contains(':'))
}

fn rejected(location: &str, reason: &str) -> ToolError {
    ToolError::invalid_input().with_reason(format!("{location}: {reason}"))
}

/// Maps a relative location to a file below the document root.
async fn resolve_local(root: Option<&Path>, location: &str) -> Result<PathBuf, ToolError> {
    let Some(root) = root else {
        return Err(rejected(location, "local documents are disabled"));
    };
    let relative = Path::new(location);
    if relative
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(rejected(location, "absolute paths are not allowed"));
    }

    let io_error = |err: std::io::Error| rejected(location, &err.to_string());
    let root = tokio::fs::canonicalize(root).await.map_err(io_error)?;
    let path = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(io_error)?;
    if !path.starts_with(&root) {
        return Err(rejected(location, "outside of the document root"));
    }
    Ok(path)
}

async fn fetch_url(client: &reqwest::Client, url: &str) -> ToolResult {
    let to_tool_error =
        |err: reqwest::Error| ToolError::execution_error().with_reason(err.to_string());
    let mut resp = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(to_tool_error)?;
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(to_tool_error)? {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_BYTES {
            break;
        }
    }
    Ok(bounded_text(body))
}

async fn read_file(path: &Path) -> ToolResult {
    let to_tool_error = |err: std::io::Error| {
        ToolError::execution_error()
            .with_reason(format!("{}: {err}", path.display()))
    };
    let file = File::open(path).await.map_err(to_tool_error)?;
    let mut body = Vec::new();
    file.take(MAX_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .await
        .map_err(to_tool_error)?;
    Ok(bounded_text(body))
}

/// Decodes at most `MAX_BYTES` of a body, keeping at most `MAX_CHARS`.
fn bounded_text(mut body: Vec<u8>) -> String {
    let clipped = body.len() > MAX_BYTES;
    if clipped {
        body.truncate(MAX_BYTES);
        // Drop a character cut in half by the byte cap.
        if let Err(err) = std::str::from_utf8(&body) {
            if err.error_len().is_none() {
                body.truncate(err.valid_up_to());
            }
        }
    }
    let mut text = String::from_utf8_lossy(&body).into_owned();
    if let Some((idx, _)) = text.char_indices().nth(MAX_CHARS) {
        text.truncate(idx);
    } else if !clipped {
        return text;
    }
    text.push_str("\n[truncated]");
    text
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn input(location: &str) -> FetchDocumentParameters {
        FetchDocumentParameters {
            location: location.to_owned(),
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("https://example.com/jobs/posting.txt?x=1"), Some("posting.txt"));
        assert_eq!(file_name("docs/essay.md"), Some("essay.md"));
        assert_eq!(file_name("C:\\docs\\essay.md"), Some("essay.md"));
        assert_eq!(file_name("https://example.com/"), Some("example.com"));
        assert_eq!(file_name("../"), None);
    }

    #[tokio::test]
    async fn test_read_local_file() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("docs")).unwrap();
        fs::write(root.path().join("docs/essay.txt"), "Cats nap all day.").unwrap();

        let tool = FetchDocumentTool::new().with_document_root(root.path());
        assert_eq!(
            tool.execute(input("docs/essay.txt")).await.unwrap(),
            "Cats nap all day."
        );
        assert_eq!(
            tool.execute(input("docs/../docs/essay.txt")).await.unwrap(),
            "Cats nap all day."
        );
    }

    #[tokio::test]
    async fn test_paths_outside_root_are_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "hunter2").unwrap();
        fs::write(root.join("essay.txt"), "Cats nap all day.").unwrap();

        let tool = FetchDocumentTool::new().with_document_root(&root);
        let err = tool.execute(input("../secret.txt")).await.unwrap_err();
        assert!(err.reason().contains("outside of the document root"));

        let absolute = root.join("essay.txt").display().to_string();
        let err = tool.execute(input(&absolute)).await.unwrap_err();
        assert!(err.reason().contains("absolute paths are not allowed"));

        let tool = FetchDocumentTool::new();
        let err = tool.execute(input("essay.txt")).await.unwrap_err();
        assert!(err.reason().contains("local documents are disabled"));
    }

    #[tokio::test]
    async fn test_large_file_is_capped() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("big.txt"), "é".repeat(MAX_BYTES)).unwrap();

        let tool = FetchDocumentTool::new().with_document_root(root.path());
        let text = tool.execute(input("big.txt")).await.unwrap();
        let body = text.strip_suffix("\n[truncated]").unwrap();
        assert_eq!(body.chars().count(), MAX_CHARS);
        assert!(body.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_fall_back_to_cache() {
        let cache = tempfile::tempdir().unwrap();
        fs::write(cache.path().join("posting.txt"), "Cached posting").unwrap();

        let tool = FetchDocumentTool::new().with_cache_dir(cache.path());
        assert_eq!(
            tool.execute(input("jobs/posting.txt")).await.unwrap(),
            "Cached posting"
        );
    }

    #[tokio::test]
    async fn test_total_failure() {
        let root = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let tool = FetchDocumentTool::new()
            .with_document_root(root.path())
            .with_cache_dir(cache.path());
        let err = tool.execute(input("missing/posting.txt")).await.unwrap_err();
        assert!(err.reason().contains("missing/posting.txt"));
    }

    #[test]
    fn test_bounded_text() {
        let text = bounded_text("a".repeat(MAX_CHARS + 5).into_bytes());
        assert!(text.ends_with("[truncated]"));
        assert_eq!(bounded_text(b"short".to_vec()), "short");

        // A multi-byte character split by the byte cap is dropped.
        let mut body = "a".repeat(MAX_BYTES - 1).into_bytes();
        body.extend_from_slice("é".as_bytes());
        let text = bounded_text(body);
        assert!(!text.contains('\u{fffd}'));
    }
}
