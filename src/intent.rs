//! Entity tagger backends.
//!
//! The rule-based tagger lives in the core crate. This module adds
//! [`HttpEntityTagger`], which posts the query to an external NER service,
//! and [`create_tagger`], which picks one from configuration.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use product_search_core::intent::{Entity, EntityTagger, RuleTagger};

use crate::config::IntentConfig;

/// NER over HTTP.
///
/// Sends `POST <url>` with `{"text": "<query>"}` and expects a JSON array
/// of `{"word": ..., "entity_group": ...}` objects (the shape produced by
/// aggregated token-classification pipelines). Extra keys such as
/// `score`, `start` or `end` are ignored.
pub struct HttpEntityTagger {
    url: String,
    client: reqwest::Client,
}

impl HttpEntityTagger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl EntityTagger for HttpEntityTagger {
    async fn tag(&self, text: &str) -> Result<Vec<Entity>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| anyhow!("entity tagger unreachable at {}: {}", self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("entity tagger error {}: {}", status, body);
        }

        Ok(response.json().await?)
    }
}

/// Build the tagger named by `config.tagger`.
pub fn create_tagger(config: &IntentConfig) -> Result<Arc<dyn EntityTagger>> {
    match config.tagger.as_str() {
        "rules" => Ok(Arc::new(RuleTagger)),
        "http" => {
            let url = config
                .tagger_url
                .clone()
                .ok_or_else(|| anyhow!("intent.tagger_url required for http tagger"))?;
            Ok(Arc::new(HttpEntityTagger::new(
                url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => bail!("Unknown intent tagger: {}", other),
    }
}
