use ai_client::openai::OpenAi;
use ai_client::traits::EmbedAgent;
use anyhow::Result;
use async_trait::async_trait;

use neutralnews_common::config::ModelsConfig;
use neutralnews_common::TextEmbedder;

/// Voyage AI embeddings through the OpenAI-compatible API.
pub struct VoyageEmbedder {
    client: OpenAi,
}

impl VoyageEmbedder {
    pub fn new(voyage_api_key: &str, models: &ModelsConfig) -> Self {
        let client = OpenAi::new(voyage_api_key)
            .with_base_url(models.embedding_base_url.as_str())
            .with_embedding_model(models.embedding.as_str());
        Self { client }
    }
}

#[async_trait]
impl TextEmbedder for VoyageEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.client.embed_batch(texts).await
    }
}
