use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;

use nourish_core::advisor::{ChatRequest, ChatResponse, CompletionProvider};

use crate::config::Config;

/// Chat-completion client for Groq's OpenAI-compatible endpoint.
pub struct GroqClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GroqClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "nourish-cli/{} (diet tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(60))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(key) = config.groq_api_key.as_deref() else {
            bail!("No inference key configured. Set GROQ_API_KEY");
        };
        Self::new(&config.groq_base_url, key)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for GroqClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        debug!("Requesting completion from {}", request.model);
        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("Failed to reach inference API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Inference API returned {status}: {body}");
        }

        resp.json::<ChatResponse>()
            .await
            .context("Failed to parse inference response")
    }
}
