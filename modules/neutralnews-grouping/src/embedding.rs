use std::collections::HashMap;
use std::sync::Arc;

use ai_client::util::truncate_to_char_boundary;
use anyhow::Result;
use tracing::{info, warn};

use neutralnews_common::{DocumentStore, Item, ItemId, NeutralNewsError, TextEmbedder};

/// Longest embedding input, in bytes.
const MAX_EMBED_TEXT: usize = 2000;

/// Text sent to the embedding model for an item: title then body (or the
/// feed description when the body is empty). `None` when the item has no text.
pub fn embedding_text(item: &Item) -> Option<String> {
    let text = item.text()?;
    let combined = format!("{} {}", item.title.trim(), text.trim());
    Some(truncate_to_char_boundary(&combined, MAX_EMBED_TEXT).to_string())
}

#[derive(Debug, Default)]
pub struct ResolvedItems {
    /// Items carrying a vector of the shared dimensionality.
    pub items: Vec<Item>,
    /// Ids left out of this pass (no text, or a vector of the wrong size).
    pub excluded: Vec<ItemId>,
    /// How many vectors were generated this pass.
    pub embedded: usize,
}

/// Guarantees every item in a pass carries an embedding, generating and
/// persisting the missing ones.
pub struct EmbeddingResolver {
    embedder: Arc<dyn TextEmbedder>,
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
    max_batch_ops: usize,
}

impl EmbeddingResolver {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        store: Arc<dyn DocumentStore>,
        batch_size: usize,
        max_batch_ops: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
            max_batch_ops: max_batch_ops.max(1),
        }
    }

    /// Items that already hold a valid vector pass through untouched. The rest
    /// are embedded in batches and written back to the store. Any embedder or
    /// store failure aborts the whole call.
    pub async fn resolve(&self, items: Vec<Item>) -> Result<ResolvedItems> {
        let mut resolved = ResolvedItems::default();
        let mut ready = Vec::with_capacity(items.len());
        let mut pending: Vec<(Item, String)> = Vec::new();

        for item in items {
            if item.has_valid_embedding() {
                ready.push(item);
                continue;
            }
            match embedding_text(&item) {
                Some(text) => pending.push((item, text)),
                None => {
                    warn!(item_id = item.id.as_str(), "No text to embed, excluding item");
                    resolved.excluded.push(item.id);
                }
            }
        }

        let mut fresh: Vec<(ItemId, Vec<f32>)> = Vec::with_capacity(pending.len());
        for chunk in pending.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(texts)
                .await
                .map_err(|e| NeutralNewsError::Embedding(format!("{e:#}")))?;
            if vectors.len() != chunk.len() {
                return Err(NeutralNewsError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                ))
                .into());
            }
            for ((item, _), vector) in chunk.iter().zip(vectors) {
                fresh.push((item.id.clone(), vector));
            }
        }

        for batch in fresh.chunks(self.max_batch_ops) {
            self.store.save_embeddings(batch).await?;
        }
        resolved.embedded = fresh.len();

        let mut vectors: HashMap<ItemId, Vec<f32>> = fresh.into_iter().collect();
        for (mut item, _) in pending {
            item.embedding = vectors.remove(&item.id);
            ready.push(item);
        }

        let dim = dominant_dimension(&ready);
        for item in ready {
            let len = item.embedding.as_ref().map_or(0, |v| v.len());
            if Some(len) == dim {
                resolved.items.push(item);
            } else {
                warn!(
                    item_id = item.id.as_str(),
                    dimension = len,
                    expected = ?dim,
                    "Embedding dimension mismatch, excluding item"
                );
                resolved.excluded.push(item.id);
            }
        }

        // Freshly embedded items were appended last; restore selection order.
        resolved
            .items
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        info!(
            items = resolved.items.len(),
            embedded = resolved.embedded,
            excluded = resolved.excluded.len(),
            "Embeddings resolved"
        );
        Ok(resolved)
    }
}

/// Most common vector length; ties go to the longer one.
fn dominant_dimension(items: &[Item]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for item in items {
        if let Some(v) = &item.embedding {
            *counts.entry(v.len()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(len, _)| *len > 0)
        .max_by_key(|(len, count)| (*count, *len))
        .map(|(len, _)| len)
}
