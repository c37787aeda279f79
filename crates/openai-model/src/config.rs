use std::fmt::{self, Debug, Formatter};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Where the requests are sent to, and how they are authenticated.
#[derive(Clone, PartialEq, Eq, Hash)]
enum Endpoint {
    /// An OpenAI-compatible API using bearer tokens.
    OpenAI { base_url: Option<String> },
    /// An Azure OpenAI deployment using the `api-key` header.
    Azure { endpoint: String, deployment: String },
}

/// Builder for [`OpenAIConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OpenAIConfigBuilder {
    api_key: String,
    model: Option<String>,
    api_version: Option<String>,
    endpoint: Endpoint,
}

impl OpenAIConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            api_version: None,
            endpoint: Endpoint::OpenAI { base_url: None },
        }
    }

    /// Sets the model to use.
    ///
    /// Azure deployments ignore it, the deployment decides the model.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL of an OpenAI-compatible API.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.endpoint = Endpoint::OpenAI {
            base_url: Some(base_url.into()),
        };
        self
    }

    /// Targets an Azure OpenAI deployment, e.g.
    /// `https://my-resource.openai.azure.com` and `gpt-4o`.
    #[inline]
    pub fn with_azure_deployment<S1: Into<String>, S2: Into<String>>(
        mut self,
        endpoint: S1,
        deployment: S2,
    ) -> Self {
        self.endpoint = Endpoint::Azure {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
        };
        self
    }

    /// Sets the `api-version` query parameter of an Azure deployment.
    /// Can be called before or after [`Self::with_azure_deployment`], other
    /// endpoints ignore it.
    #[inline]
    pub fn with_api_version<S: Into<String>>(mut self, version: S) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> OpenAIConfig {
        let model = self.model.unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        let (url, auth) = match self.endpoint {
            Endpoint::OpenAI { base_url } => {
                let base_url =
                    base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
                (
                    format!(
                        "{}/chat/completions",
                        base_url.trim_end_matches('/')
                    ),
                    Auth::Bearer,
                )
            }
            Endpoint::Azure {
                endpoint,
                deployment,
            } => (
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint.trim_end_matches('/'),
                    deployment,
                    self.api_version
                        .as_deref()
                        .unwrap_or(DEFAULT_AZURE_API_VERSION),
                ),
                Auth::ApiKeyHeader,
            ),
        };
        OpenAIConfig {
            api_key: self.api_key,
            model,
            url,
            auth,
        }
    }
}

impl Debug for OpenAIConfigBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// How the API key is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Auth {
    Bearer,
    ApiKeyHeader,
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OpenAIConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) url: String,
    pub(crate) auth: Auth,
}

impl Debug for OpenAIConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("url", &self.url)
            .field("auth", &self.auth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_url() {
        let config = OpenAIConfigBuilder::with_api_key("sk-xxx")
            .with_base_url("http://localhost:8080/v1/")
            .build();
        assert_eq!(config.url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.auth, Auth::Bearer);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_azure_url() {
        let config = OpenAIConfigBuilder::with_api_key("key")
            .with_azure_deployment("https://res.openai.azure.com/", "chat")
            .with_api_version("2024-06-01")
            .build();
        assert_eq!(
            config.url,
            "https://res.openai.azure.com/openai/deployments/chat/chat/completions?api-version=2024-06-01"
        );
        assert_eq!(config.auth, Auth::ApiKeyHeader);
    }

    #[test]
    fn test_api_version_before_deployment() {
        let config = OpenAIConfigBuilder::with_api_key("key")
            .with_api_version("2024-06-01")
            .with_azure_deployment("https://res.openai.azure.com", "chat")
            .build();
        assert!(config.url.ends_with("?api-version=2024-06-01"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OpenAIConfigBuilder::with_api_key("sk-secret").build();
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
