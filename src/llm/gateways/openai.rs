//! OpenAI-compatible gateway for chat completions.
//!
//! Works against OpenAI itself and the many providers that expose the same
//! `/chat/completions` surface. Some of those providers authenticate through
//! a differently named header, so extra headers can be attached to every
//! request.

use crate::config::LlmSettings;
use crate::error::{LarkBotError, Result};
use crate::llm::gateway::{CompletionConfig, LlmGateway};
use crate::llm::gateways::openai_messages_adapter::{adapt_messages_to_openai, convert_tool_calls};
use crate::llm::models::{LlmGatewayResponse, LlmMessage};
use crate::llm::tools::LlmTool;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for connecting to an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<std::time::Duration>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl OpenAIConfig {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            headers: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Repeat the API key in the `x-api-key` and `api-key` headers used by
    /// Azure-style and proxy providers.
    pub fn with_provider_key_headers(self) -> Self {
        let key = self.api_key.clone();
        self.with_header("x-api-key", key.clone()).with_header("api-key", key)
    }
}

/// Gateway for OpenAI-compatible LLM services.
pub struct OpenAIGateway {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIGateway {
    /// Create a new gateway with custom configuration.
    pub fn with_config(config: OpenAIConfig) -> Result<Self> {
        let mut client_builder = Client::builder().default_headers(build_headers(&config)?);

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;

        Ok(Self { client, config })
    }

    /// Create gateway with custom API key and base URL.
    pub fn with_api_key_and_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_config(OpenAIConfig {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

fn build_headers(config: &OpenAIConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| LarkBotError::ConfigError(format!("Invalid API key: {}", e)))?;
    headers.insert(reqwest::header::AUTHORIZATION, bearer);

    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LarkBotError::ConfigError(format!("Invalid header name {}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| LarkBotError::ConfigError(format!("Invalid header value: {}", e)))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

#[async_trait]
impl LlmGateway for OpenAIGateway {
    async fn complete(
        &self,
        model: &str,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
    ) -> Result<LlmGatewayResponse> {
        info!("Delegating to OpenAI-compatible endpoint for completion");
        debug!("Model: {}, Message count: {}", model, messages.len());

        let mut body = serde_json::json!({
            "model": model,
            "messages": adapt_messages_to_openai(messages)?,
        });

        if let Some(temperature) = config.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if let Some(tools) = tools {
            if !tools.is_empty() {
                let tool_defs: Vec<_> = tools.iter().map(|t| t.descriptor()).collect();
                body["tools"] = serde_json::to_value(tool_defs)?;
            }
        }

        let response = self.client.post(self.completions_url()).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LarkBotError::GatewayError(format!(
                "OpenAI API error: {} - {}",
                status, error_text
            )));
        }

        let response_body: Value = response.json().await?;

        let message = match response_body["choices"].as_array().and_then(|c| c.first()) {
            Some(choice) => &choice["message"],
            None => {
                return Err(LarkBotError::GatewayError(
                    "OpenAI returned empty response".to_string(),
                ))
            }
        };

        let content = message["content"].as_str().map(String::from);

        let tool_calls = match message["tool_calls"].as_array() {
            Some(calls) => convert_tool_calls(calls)?,
            None => vec![],
        };

        Ok(LlmGatewayResponse {
            content,
            tool_calls,
        })
    }
}
