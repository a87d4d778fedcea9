//! In-memory doubles for the store, embedder and synthesizer.
//!
//! - `InMemoryStore`: stateful `DocumentStore` that rejects oversized write
//!   batches and logs every write call
//! - `FixedEmbedder`: prefix-registered vectors, hash vectors for the rest
//! - `ScriptedSynthesizer`: per-call scripted results, records what it saw

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use neutralnews_common::{
    AggregateRecord, Category, DocumentStore, Group, GroupId, Item, ItemId, NeutralSynthesizer,
    SynthesisError, SynthesisOutput, SynthesisSource, TextEmbedder,
};

// --- InMemoryStore ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Embeddings,
    Assignments,
    NeutralScores,
    Groups,
    GroupDeletes,
    Aggregate,
}

pub struct InMemoryStore {
    items: Mutex<BTreeMap<ItemId, Item>>,
    groups: Mutex<BTreeMap<GroupId, Group>>,
    aggregates: Mutex<BTreeMap<GroupId, AggregateRecord>>,
    writes: Mutex<Vec<(WriteKind, usize)>>,
    high_water: Mutex<Option<GroupId>>,
    max_batch_ops: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            groups: Mutex::new(BTreeMap::new()),
            aggregates: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            high_water: Mutex::new(None),
            max_batch_ops: neutralnews_common::traits::DEFAULT_MAX_BATCH_OPS,
        }
    }

    pub fn with_max_batch_ops(mut self, max: usize) -> Self {
        self.max_batch_ops = max;
        self
    }

    pub fn with_items(self, items: impl IntoIterator<Item = Item>) -> Self {
        for item in items {
            self.insert_item(item);
        }
        self
    }

    pub fn insert_item(&self, item: Item) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    pub fn insert_group(&self, group: Group) {
        self.bump(group.group_id);
        self.groups.lock().unwrap().insert(group.group_id, group);
    }

    pub fn insert_aggregate(&self, record: AggregateRecord) {
        self.aggregates.lock().unwrap().insert(record.group_id, record);
    }

    pub fn item(&self, id: &str) -> Option<Item> {
        self.items.lock().unwrap().get(id).cloned()
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    pub fn groups(&self) -> BTreeMap<GroupId, Group> {
        self.groups.lock().unwrap().clone()
    }

    pub fn aggregates(&self) -> BTreeMap<GroupId, AggregateRecord> {
        self.aggregates.lock().unwrap().clone()
    }

    /// Every write call so far, as `(kind, batch size)`.
    pub fn writes(&self) -> Vec<(WriteKind, usize)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn bump(&self, group_id: GroupId) {
        let mut hw = self.high_water.lock().unwrap();
        *hw = Some(hw.map_or(group_id, |h| h.max(group_id)));
    }

    fn record(&self, kind: WriteKind, size: usize) -> Result<()> {
        if size > self.max_batch_ops {
            bail!("batch of {size} exceeds limit of {}", self.max_batch_ops);
        }
        self.writes.lock().unwrap().push((kind, size));
        Ok(())
    }

    fn update_items(&self, ids: impl Iterator<Item = ItemId>, mut f: impl FnMut(&mut Item)) {
        let mut items = self.items.lock().unwrap();
        for id in ids {
            if let Some(item) = items.get_mut(&id) {
                f(item);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ungrouped_items(&self) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        Ok(items.values().filter(|i| i.existing_group.is_none()).cloned().collect())
    }

    async fn grouped_items_since(&self, since: DateTime<Utc>) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .values()
            .filter(|i| i.existing_group.is_some() && i.created_at >= since)
            .cloned()
            .collect())
    }

    async fn items_in_groups(&self, group_ids: &[GroupId]) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .values()
            .filter(|i| i.existing_group.is_some_and(|g| group_ids.contains(&g)))
            .cloned()
            .collect())
    }

    async fn save_embeddings(&self, batch: &[(ItemId, Vec<f32>)]) -> Result<()> {
        self.record(WriteKind::Embeddings, batch.len())?;
        let mut items = self.items.lock().unwrap();
        for (id, vector) in batch {
            if let Some(item) = items.get_mut(id) {
                item.embedding = Some(vector.clone());
            }
        }
        Ok(())
    }

    async fn assign_groups(&self, batch: &[(ItemId, Option<GroupId>)]) -> Result<()> {
        self.record(WriteKind::Assignments, batch.len())?;
        let mut items = self.items.lock().unwrap();
        for (id, group) in batch {
            if let Some(item) = items.get_mut(id) {
                item.existing_group = *group;
            }
        }
        Ok(())
    }

    async fn save_neutral_scores(&self, batch: &[(ItemId, u8)]) -> Result<()> {
        self.record(WriteKind::NeutralScores, batch.len())?;
        let scores: BTreeMap<&ItemId, u8> = batch.iter().map(|(id, s)| (id, *s)).collect();
        self.update_items(batch.iter().map(|(id, _)| id.clone()), |item| {
            item.neutral_score = scores.get(&item.id).copied();
        });
        Ok(())
    }

    async fn max_group_id(&self) -> Result<Option<GroupId>> {
        let from_items = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter_map(|i| i.existing_group)
            .max();
        let from_groups = self.groups.lock().unwrap().keys().max().copied();
        let from_aggregates = self.aggregates.lock().unwrap().keys().max().copied();
        let hw = *self.high_water.lock().unwrap();
        Ok([from_items, from_groups, from_aggregates, hw]
            .into_iter()
            .flatten()
            .max())
    }

    async fn group(&self, group_id: GroupId) -> Result<Option<Group>> {
        Ok(self.groups.lock().unwrap().get(&group_id).cloned())
    }

    async fn upsert_groups(&self, groups: &[Group]) -> Result<()> {
        self.record(WriteKind::Groups, groups.len())?;
        for group in groups {
            self.bump(group.group_id);
            self.groups.lock().unwrap().insert(group.group_id, group.clone());
        }
        Ok(())
    }

    async fn delete_groups(&self, group_ids: &[GroupId]) -> Result<()> {
        self.record(WriteKind::GroupDeletes, group_ids.len())?;
        let mut groups = self.groups.lock().unwrap();
        for id in group_ids {
            groups.remove(id);
        }
        Ok(())
    }

    async fn aggregate(&self, group_id: GroupId) -> Result<Option<AggregateRecord>> {
        Ok(self.aggregates.lock().unwrap().get(&group_id).cloned())
    }

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> Result<()> {
        self.record(WriteKind::Aggregate, 1)?;
        self.aggregates
            .lock()
            .unwrap()
            .insert(record.group_id, record.clone());
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }
}

// --- FixedEmbedder ---

/// Returns the registered vector for any text starting with a registered
/// prefix (longest prefix wins), and a deterministic hash vector otherwise.
pub struct FixedEmbedder {
    dimension: usize,
    vectors: Vec<(String, Vec<f32>)>,
    texts: Mutex<Vec<String>>,
    fail: bool,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            texts: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn with(mut self, prefix: &str, vector: Vec<f32>) -> Self {
        self.vectors.push((prefix.to_string(), vector));
        self
    }

    /// Every call errors, as an unavailable model would.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// All texts embedded so far.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .iter()
            .filter(|(prefix, _)| text.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| hash_vector(text, self.dimension))
    }
}

/// Components in `[-1, 1]` derived from the text's hash.
pub fn hash_vector(text: &str, dimension: usize) -> Vec<f32> {
    (0..dimension)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            (text, i).hash(&mut hasher);
            (hasher.finish() % 20_001) as f32 / 10_000.0 - 1.0
        })
        .collect()
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(anyhow!("embedding model unavailable"));
        }
        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        self.texts.lock().unwrap().extend(texts);
        Ok(vectors)
    }
}

// --- ScriptedSynthesizer ---

/// Plays back scripted results in call order. Once the script runs out,
/// every call succeeds with a generated output rating each outlet 50.
pub struct ScriptedSynthesizer {
    script: Mutex<VecDeque<Result<SynthesisOutput, SynthesisError>>>,
    calls: Mutex<Vec<Vec<SynthesisSource>>>,
    delay: Option<Duration>,
}

impl Default for ScriptedSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn then(self, result: Result<SynthesisOutput, SynthesisError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn then_err(self, error: SynthesisError) -> Self {
        self.then(Err(error))
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Sources received by each call, in call order.
    pub fn calls(&self) -> Vec<Vec<SynthesisSource>> {
        self.calls.lock().unwrap().clone()
    }
}

/// Plausible output for `sources`: the first title, every outlet rated 50.
pub fn generated_output(sources: &[SynthesisSource]) -> SynthesisOutput {
    SynthesisOutput {
        neutral_title: sources
            .first()
            .map(|s| format!("Neutral: {}", s.title))
            .unwrap_or_else(|| "Neutral".to_string()),
        neutral_summary: format!("Summary of {} sources", sources.len()),
        category: Category::Society,
        relevance: 3,
        source_ratings: sources.iter().map(|s| (s.outlet.clone(), 50)).collect(),
    }
}

#[async_trait]
impl NeutralSynthesizer for ScriptedSynthesizer {
    async fn generate(
        &self,
        sources: &[SynthesisSource],
    ) -> std::result::Result<SynthesisOutput, SynthesisError> {
        let scripted = {
            self.calls.lock().unwrap().push(sources.to_vec());
            self.script.lock().unwrap().pop_front()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.unwrap_or_else(|| Ok(generated_output(sources)))
    }
}
