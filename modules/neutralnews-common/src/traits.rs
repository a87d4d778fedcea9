// Collaborator boundaries for the grouping core.
//
// DocumentStore: item/group/aggregate persistence (Firestore-like document store)
// TextEmbedder: embedding model inference
// NeutralSynthesizer: one neutral summary per group
//
// Production adapters live in neutralnews-grouping; in-memory doubles sit
// behind its `test-utils` feature.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SynthesisError;
use crate::types::{AggregateRecord, Group, GroupId, Item, ItemId, SynthesisOutput, SynthesisSource};

/// Default upper bound on operations per write call. Stores with a hard
/// transaction limit (e.g. 500) should stay comfortably below it.
pub const DEFAULT_MAX_BATCH_OPS: usize = 450;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // --- Item queries ---

    /// Items with no group assigned.
    async fn ungrouped_items(&self) -> Result<Vec<Item>>;

    /// Grouped items created at or after `since`.
    async fn grouped_items_since(&self, since: DateTime<Utc>) -> Result<Vec<Item>>;

    /// Every item currently assigned to one of `group_ids`.
    async fn items_in_groups(&self, group_ids: &[GroupId]) -> Result<Vec<Item>>;

    // --- Item writes (each call at most `max_batch_ops` entries) ---

    async fn save_embeddings(&self, batch: &[(ItemId, Vec<f32>)]) -> Result<()>;

    /// Set (`Some`) or clear (`None`) the group of each item.
    async fn assign_groups(&self, batch: &[(ItemId, Option<GroupId>)]) -> Result<()>;

    async fn save_neutral_scores(&self, batch: &[(ItemId, u8)]) -> Result<()>;

    // --- Groups ---

    /// Highest group id ever persisted, if any.
    async fn max_group_id(&self) -> Result<Option<GroupId>>;

    async fn group(&self, group_id: GroupId) -> Result<Option<Group>>;

    async fn upsert_groups(&self, groups: &[Group]) -> Result<()>;

    async fn delete_groups(&self, group_ids: &[GroupId]) -> Result<()>;

    // --- Aggregates ---

    async fn aggregate(&self, group_id: GroupId) -> Result<Option<AggregateRecord>>;

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> Result<()>;

    fn max_batch_ops(&self) -> usize {
        DEFAULT_MAX_BATCH_OPS
    }
}

/// Embedding model. Must be deterministic per text, with one fixed
/// dimensionality across the corpus.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Neutral-summary generation for one group of sources.
#[async_trait]
pub trait NeutralSynthesizer: Send + Sync {
    async fn generate(
        &self,
        sources: &[SynthesisSource],
    ) -> std::result::Result<SynthesisOutput, SynthesisError>;
}
